//! Configuration for every clusterq process role.
//!
//! Each struct has a `Default` suited to local development, a `from_env()`
//! constructor and a `validate()` that reports every problem at once.
//!
//! # Environment Variables
//!
//! | Variable                    | Used by                       | Default            |
//! |-----------------------------|-------------------------------|--------------------|
//! | `NODE_ID` / `JOURNAL_ID`    | node / journal                | `node_1` / `journal_1` |
//! | `HOST`, `PORT`              | node, journal, coordinator    | `127.0.0.1`, role default |
//! | `OBJECT_STORE_TYPE`         | node, journal                 | `local`            |
//! | `DATA_PATH`                 | node, journal                 | `/tmp/clusterq-*`  |
//! | `DEFAULT_TTL_SECS`          | node                          | 7 days             |
//! | `EXPIRY_SWEEP_INTERVAL_MS`  | node, journal                 | 60000              |
//! | `COORDINATOR_ADDR`          | router, orchestrator, admin   | `127.0.0.1:7600`   |
//! | `CLUSTER_PATH`              | router, orchestrator          | `/clusterq`        |
//! | `CLIENT_NAME`               | router                        | `$HOSTNAME`        |
//! | `ORCHESTRATOR_ID`           | orchestrator                  | random             |
//! | `ORCHESTRATOR_INTERVAL_MS`  | orchestrator                  | 5000               |
//! | `ORCHESTRATOR_QUORUM`       | orchestrator                  | 1                  |
//! | `RPC_CONNECT_TIMEOUT_MS`    | all clients                   | 2000               |
//! | `RPC_OPERATION_TIMEOUT_MS`  | all clients                   | 5000               |
//! | `RPC_MAX_RETRIES`           | all clients                   | 2                  |

use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CIRCUIT_BREAKER_RESET_MS, DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_CLUSTER_PATH,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_COORDINATOR_PORT, DEFAULT_EXPIRY_SWEEP_INTERVAL_MS,
    DEFAULT_JOURNAL_PORT, DEFAULT_NODE_PORT, DEFAULT_OPERATION_TIMEOUT_MS,
    DEFAULT_ORCHESTRATOR_INTERVAL_MS, DEFAULT_ORCHESTRATOR_QUORUM, DEFAULT_TOPIC_TTL_SECS,
    DEFAULT_WATCH_TIMEOUT_MS, NO_TTL,
};
use crate::error::{Error, Result};
use crate::store::ObjectStoreType;
use crate::store::engine::DEFAULT_FLUSH_INTERVAL;
use crate::validation::validate_member_id;

/// Read and parse an environment variable, falling back to `default` when unset.
fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn validate_port(port: u16, errors: &mut Vec<String>) {
    if port == 0 {
        errors.push("port must be between 1 and 65535".to_string());
    }
}

/// Timeouts, retries and circuit breaking for every RPC client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// Extra attempts made while a request could not be delivered.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(1),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_reset: Duration::from_millis(DEFAULT_CIRCUIT_BREAKER_RESET_MS),
        }
    }
}

impl RpcConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            connect_timeout: Duration::from_millis(env_or(
                "RPC_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?),
            operation_timeout: Duration::from_millis(env_or(
                "RPC_OPERATION_TIMEOUT_MS",
                DEFAULT_OPERATION_TIMEOUT_MS,
            )?),
            max_retries: env_or("RPC_MAX_RETRIES", defaults.max_retries)?,
            ..defaults
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.connect_timeout.is_zero() {
            errors.push("connect_timeout must be positive".to_string());
        }
        if self.operation_timeout.is_zero() {
            errors.push("operation_timeout must be positive".to_string());
        }
        if self.retry_base_delay > self.retry_max_delay {
            errors.push(format!(
                "retry_base_delay ({:?}) must not exceed retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            errors.push("circuit_breaker_threshold must be at least 1".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Storage node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub object_store: ObjectStoreType,
    pub default_ttl_secs: i64,
    pub flush_interval: Duration,
    pub expiry_sweep_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node_1".to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_NODE_PORT,
            object_store: ObjectStoreType::Local {
                path: "/tmp/clusterq-node".to_string(),
            },
            default_ttl_secs: DEFAULT_TOPIC_TTL_SECS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            expiry_sweep_interval: Duration::from_millis(DEFAULT_EXPIRY_SWEEP_INTERVAL_MS),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            node_id: env_string("NODE_ID", &defaults.node_id),
            host: env_string("HOST", &defaults.host),
            port: env_or("PORT", defaults.port)?,
            object_store: ObjectStoreType::from_env("/tmp/clusterq-node"),
            default_ttl_secs: env_or("DEFAULT_TTL_SECS", defaults.default_ttl_secs)?,
            flush_interval: defaults.flush_interval,
            expiry_sweep_interval: Duration::from_millis(env_or(
                "EXPIRY_SWEEP_INTERVAL_MS",
                DEFAULT_EXPIRY_SWEEP_INTERVAL_MS,
            )?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Err(e) = validate_member_id(&self.node_id) {
            errors.push(e.to_string());
        }
        validate_port(self.port, &mut errors);
        if let Err(e) = self.object_store.validate() {
            errors.push(e);
        }
        if self.default_ttl_secs != NO_TTL && self.default_ttl_secs <= 0 {
            errors.push(format!(
                "default_ttl_secs ({}) must be positive or {}",
                self.default_ttl_secs, NO_TTL
            ));
        }
        if self.expiry_sweep_interval.is_zero() {
            errors.push("expiry_sweep_interval must be positive".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Journal node process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalConfig {
    pub journal_id: String,
    pub host: String,
    pub port: u16,
    pub object_store: ObjectStoreType,
    pub flush_interval: Duration,
    pub expiry_sweep_interval: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            journal_id: "journal_1".to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_JOURNAL_PORT,
            object_store: ObjectStoreType::Local {
                path: "/tmp/clusterq-journal".to_string(),
            },
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            expiry_sweep_interval: Duration::from_millis(DEFAULT_EXPIRY_SWEEP_INTERVAL_MS),
        }
    }
}

impl JournalConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            journal_id: env_string("JOURNAL_ID", &defaults.journal_id),
            host: env_string("HOST", &defaults.host),
            port: env_or("PORT", defaults.port)?,
            object_store: ObjectStoreType::from_env("/tmp/clusterq-journal"),
            flush_interval: defaults.flush_interval,
            expiry_sweep_interval: Duration::from_millis(env_or(
                "EXPIRY_SWEEP_INTERVAL_MS",
                DEFAULT_EXPIRY_SWEEP_INTERVAL_MS,
            )?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if let Err(e) = validate_member_id(&self.journal_id) {
            errors.push(e.to_string());
        }
        validate_port(self.port, &mut errors);
        if let Err(e) = self.object_store.validate() {
            errors.push(e);
        }
        if self.expiry_sweep_interval.is_zero() {
            errors.push("expiry_sweep_interval must be positive".to_string());
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Coordination service process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_COORDINATOR_PORT,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_string("HOST", &defaults.host),
            port: env_or("PORT", defaults.port)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        validate_port(self.port, &mut errors);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Where the shared topology lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    pub coordinator_addr: String,
    pub cluster_path: String,
    /// Long-poll window for change notifications.
    pub watch_timeout: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: format!("127.0.0.1:{}", DEFAULT_COORDINATOR_PORT),
            cluster_path: DEFAULT_CLUSTER_PATH.to_string(),
            watch_timeout: Duration::from_millis(DEFAULT_WATCH_TIMEOUT_MS),
        }
    }
}

impl TopologyConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            coordinator_addr: env_string("COORDINATOR_ADDR", &defaults.coordinator_addr),
            cluster_path: env_string("CLUSTER_PATH", &defaults.cluster_path),
            watch_timeout: defaults.watch_timeout,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.coordinator_addr.is_empty() {
            errors.push("coordinator_addr must not be empty".to_string());
        }
        if !self.cluster_path.starts_with('/') || self.cluster_path.len() < 2 {
            errors.push(format!(
                "cluster_path ({}) must be an absolute path below the root",
                self.cluster_path
            ));
        }
        if self.cluster_path.ends_with('/') {
            errors.push(format!(
                "cluster_path ({}) must not end with '/'",
                self.cluster_path
            ));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Producer/consumer side router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Host part of every generated message uid.
    pub client_name: String,
    pub rpc: RpcConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            rpc: RpcConfig::default(),
        }
    }
}

fn default_client_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_name: env_string("CLIENT_NAME", &default_client_name()),
            rpc: RpcConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.client_name.is_empty() || self.client_name.contains(':') {
            errors.push(format!(
                "client_name ({}) must be non-empty and contain no ':'",
                self.client_name
            ));
        }
        if let Err(mut rpc_errors) = self.rpc.validate() {
            errors.append(&mut rpc_errors);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Cluster orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identity written into orchestrator error lists.
    pub orchestrator_id: String,
    pub interval: Duration,
    /// Amount of orchestrators that must report a target before it goes DOWN.
    pub quorum: usize,
    pub rpc: RpcConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator_id: format!("orchestrator_{}", uuid::Uuid::new_v4().simple()),
            interval: Duration::from_millis(DEFAULT_ORCHESTRATOR_INTERVAL_MS),
            quorum: DEFAULT_ORCHESTRATOR_QUORUM,
            rpc: RpcConfig {
                max_retries: 0,
                ..RpcConfig::default()
            },
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut rpc = RpcConfig::from_env()?;
        rpc.max_retries = env_or("RPC_MAX_RETRIES", 0)?;
        Ok(Self {
            orchestrator_id: env_string("ORCHESTRATOR_ID", &defaults.orchestrator_id),
            interval: Duration::from_millis(env_or(
                "ORCHESTRATOR_INTERVAL_MS",
                DEFAULT_ORCHESTRATOR_INTERVAL_MS,
            )?),
            quorum: env_or("ORCHESTRATOR_QUORUM", DEFAULT_ORCHESTRATOR_QUORUM)?,
            rpc,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.orchestrator_id.is_empty() {
            errors.push("orchestrator_id must not be empty".to_string());
        }
        if self.interval < Duration::from_millis(10) {
            errors.push(format!(
                "interval ({:?}) must be at least 10ms",
                self.interval
            ));
        }
        if self.quorum == 0 {
            errors.push("quorum must be at least 1".to_string());
        }
        if let Err(mut rpc_errors) = self.rpc.validate() {
            errors.append(&mut rpc_errors);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RpcConfig::default().validate().is_ok());
        assert!(NodeConfig::default().validate().is_ok());
        assert!(JournalConfig::default().validate().is_ok());
        assert!(CoordinatorConfig::default().validate().is_ok());
        assert!(TopologyConfig::default().validate().is_ok());
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_node_config_reports_all_errors() {
        let config = NodeConfig {
            node_id: "bad id".to_string(),
            port: 0,
            default_ttl_secs: 0,
            ..NodeConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3, "{:?}", errors);
    }

    #[test]
    fn test_orchestrator_quorum_must_be_positive() {
        let config = OrchestratorConfig {
            quorum: 0,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_topology_path_rules() {
        for bad in ["", "/", "relative", "/trailing/"] {
            let config = TopologyConfig {
                cluster_path: bad.to_string(),
                ..TopologyConfig::default()
            };
            assert!(config.validate().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_router_client_name_cannot_hold_separator() {
        let config = RouterConfig {
            client_name: "a:b".to_string(),
            ..RouterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_orchestrator_ids_are_unique_by_default() {
        let a = OrchestratorConfig::default();
        let b = OrchestratorConfig::default();
        assert_ne!(a.orchestrator_id, b.orchestrator_id);
    }
}
