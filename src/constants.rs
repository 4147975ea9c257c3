//! Centralized queue and cluster constants.
//!
//! # Categories
//!
//! - **Data Model Constants**: identifiers, payload and ttl conventions
//! - **Network Constants**: frame size limits and default timeouts
//! - **Orchestration Constants**: tick interval and quorum defaults

// =============================================================================
// Data Model Constants
// =============================================================================

/// Minimum length of topic, consumer group, node and journal identifiers.
pub const MIN_IDENTIFIER_LEN: usize = 2;

/// Maximum length of topic, consumer group, node and journal identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 50;

/// Payload field every posted message must carry.
pub const PAYLOAD_FIELD: &str = "message";

/// Payload field the router attaches to every posted message.
pub const UID_FIELD: &str = "uid";

/// Topic ttl meaning "never expire".
pub const NO_TTL: i64 = -1;

/// Ttl applied when a topic is created without one (7 days).
pub const DEFAULT_TOPIC_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// First message id on a fresh topic.
pub const FIRST_MESSAGE_ID: u64 = 1;

// =============================================================================
// Network Constants
// =============================================================================

/// Maximum RPC frame size (16 MB).
///
/// Frames larger than this are rejected before allocation so a corrupt length
/// prefix cannot exhaust memory.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default TCP connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Default per-request timeout in milliseconds.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Consecutive failures before a client's circuit breaker opens.
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// How long an open circuit stays open before a probe is allowed.
pub const DEFAULT_CIRCUIT_BREAKER_RESET_MS: u64 = 10_000;

/// Default node RPC port.
pub const DEFAULT_NODE_PORT: u16 = 7400;

/// Default journal RPC port.
pub const DEFAULT_JOURNAL_PORT: u16 = 7500;

/// Default coordination service port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 7600;

// =============================================================================
// Orchestration Constants
// =============================================================================

/// Default orchestrator tick interval in milliseconds.
pub const DEFAULT_ORCHESTRATOR_INTERVAL_MS: u64 = 5_000;

/// Default number of orchestrators that must report a node before it goes DOWN.
pub const DEFAULT_ORCHESTRATOR_QUORUM: usize = 1;

/// Default cluster root path in the coordination store.
pub const DEFAULT_CLUSTER_PATH: &str = "/clusterq";

/// Long-poll window used by the topology watcher.
pub const DEFAULT_WATCH_TIMEOUT_MS: u64 = 1_000;

/// Default interval between expired-message sweeps on nodes and journals.
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL_MS: u64 = 60_000;
