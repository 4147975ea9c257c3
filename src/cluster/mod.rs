//! Cluster layer: topology, routing and orchestration.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐                          ┌──────────────┐
//!   │ Producer │                          │ Orchestrator │ × N
//!   │ Consumer │                          └──────┬───────┘
//!   └────┬─────┘                                 │ probe / repair / replay
//!        │ ClusterRouter                         │ quorum status writes
//!        ▼                                       ▼
//!   ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌─────────────┐
//!   │ Node n1 │   │ Node n2 │   │ Node n3 │   │ Coordination│
//!   └────┬────┘   └────┬────┘   └────┬────┘   │    store    │
//!        │ sync write  │             │        └─────────────┘
//!        ▼             ▼             ▼          ▲ watched by
//!   ┌──────────┐  ┌──────────┐                  │ router and
//!   │ Journal  │  │ Journal  │                  │ orchestrator
//!   └──────────┘  └──────────┘
//! ```
//!
//! - [`Topology`] is the typed view of the coordination store: node and
//!   journal records, topics and consumer groups.
//! - [`TopologyWatcher`] mirrors it in memory and publishes change events.
//! - [`ClusterRouter`] spreads posts round robin over writable nodes,
//!   replicates every post to the node's journals and routes acks back to the
//!   node named in the receipt.
//! - [`ClusterOrchestrator`] health-checks every member and moves it between
//!   UP and DOWN once enough orchestrators agree.
//! - [`ColdResync`] repairs and replays a single node outside the orchestrator.

pub mod background_tasks;
pub mod config;
pub mod connector;
pub mod coordination;
pub mod metrics;
pub mod orchestrator;
pub mod quorum;
pub mod resync;
pub mod retry;
pub mod router;
pub mod topology;
pub mod traits;
pub mod watcher;

pub use background_tasks::{BackgroundTaskRegistry, TaskStatus};
pub use config::{
    CoordinatorConfig, JournalConfig, NodeConfig, OrchestratorConfig, RouterConfig, RpcConfig,
    TopologyConfig,
};
pub use connector::{LocalConnector, TcpConnector};
pub use coordination::{CoordinationStore, MemoryCoordinationStore, RemoteCoordinationStore};
pub use orchestrator::{ClusterOrchestrator, MemberKind, OrchestratorEvent, TickReport};
pub use quorum::{Observation, QuorumRule, Verdict};
pub use resync::{ColdResync, RepairReport, ResyncReport};
pub use router::{ClusterRouter, PostOutcome, RoutedMessage};
pub use topology::{ClusterSnapshot, JournalRecord, NodeRecord, Topology, TopicView};
pub use traits::{Connector, JournalNode, QueueNode};
pub use watcher::{TopologyEvent, TopologySubscription, TopologyWatcher};
