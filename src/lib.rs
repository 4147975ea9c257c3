//! # clusterq
//! Distributed multi-tenant message queue.
//!
//! Messages are posted to topics and read by consumer groups. Every consumer
//! group of a topic sees every message; within a group each message is leased
//! to one reader at a time and must be acknowledged before the lease runs out,
//! otherwise it is delivered again.
//!
//! A cluster is made of:
//! - **nodes**, each an independent [`QueueStore`](store::QueueStore) persisted in
//!   SlateDB over object storage;
//! - **journals**, [`JournalStore`](store::JournalStore)s holding a per-node copy of
//!   every posted message so a node that lost data can be replayed;
//! - a **coordination store** holding topology: members, their status, topics and
//!   consumer groups;
//! - one or more **orchestrators** that probe members and decide their status by
//!   quorum.
//!
//! Clients talk to the cluster through a [`ClusterRouter`](cluster::ClusterRouter).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clusterq::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let topology_config = TopologyConfig::from_env()?;
//!     let store = Arc::new(
//!         RemoteCoordinationStore::connect(&topology_config.coordinator_addr, RpcConfig::from_env()?)
//!             .await?,
//!     );
//!     let topology = Topology::new(store, topology_config.cluster_path.clone());
//!     let watcher = Arc::new(TopologyWatcher::new(topology));
//!     watcher.refresh().await?;
//!
//!     let config = RouterConfig::from_env()?;
//!     let connector = Arc::new(TcpConnector::new(config.rpc.clone()));
//!     let router = ClusterRouter::new(config, watcher, connector);
//!
//!     router.create_topic("orders", None).await?;
//!     router.create_consumer_group("orders", "billing").await?;
//!     let mut object = serde_json::Map::new();
//!     object.insert("message".to_string(), "hello".into());
//!     router.post_object("orders", &object).await?;
//!     if let Some(msg) = router.get_message("orders", "billing", None).await? {
//!         router.ack_message("orders", "billing", &msg.receipt).await?;
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod constants;
pub mod error;
pub mod payload;
pub mod receipt;
pub mod rpc;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod validation;

pub mod prelude {
    //! Commonly used types.
    pub use crate::cluster::{
        ClusterOrchestrator, ClusterRouter, ColdResync, JournalRecord, LocalConnector,
        MemoryCoordinationStore, NodeRecord, OrchestratorConfig, RemoteCoordinationStore,
        RouterConfig, RpcConfig, TcpConnector, Topology, TopologyConfig, TopologyWatcher,
    };
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::receipt::Receipt;
    pub use crate::store::{JournalStore, QueueStore, QueueStoreConfig};
    pub use crate::types::{ConsumerStats, Fields, Status};
}
