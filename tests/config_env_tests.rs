//! Integration tests for the `from_env()` constructors.
//!
//! Environment variables are process-global, so every test runs serially and
//! saves and restores every variable any constructor reads.

use clusterq::cluster::{NodeConfig, OrchestratorConfig, RouterConfig, RpcConfig, TopologyConfig};
use clusterq::error::ErrorKind;
use clusterq::store::ObjectStoreType;
use serial_test::serial;
use std::env;
use std::time::Duration;

const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "NODE_ID",
    "JOURNAL_ID",
    "HOST",
    "PORT",
    "DATA_PATH",
    "OBJECT_STORE_TYPE",
    "S3_BUCKET",
    "S3_REGION",
    "S3_ENDPOINT",
    "DEFAULT_TTL_SECS",
    "EXPIRY_SWEEP_INTERVAL_MS",
    "COORDINATOR_ADDR",
    "CLUSTER_PATH",
    "CLIENT_NAME",
    "ORCHESTRATOR_ID",
    "ORCHESTRATOR_INTERVAL_MS",
    "ORCHESTRATOR_QUORUM",
    "RPC_CONNECT_TIMEOUT_MS",
    "RPC_OPERATION_TIMEOUT_MS",
    "RPC_MAX_RETRIES",
];

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();
    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, value) in originals {
        match value {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }
    result
}

// ============================================================================
// NodeConfig
// ============================================================================

#[test]
#[serial]
fn test_node_config_defaults() {
    let config = with_env_vars(&[], || NodeConfig::from_env().unwrap());
    assert_eq!(config, NodeConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_node_config_from_env() {
    let config = with_env_vars(
        &[
            ("NODE_ID", "node_7"),
            ("HOST", "0.0.0.0"),
            ("PORT", "9100"),
            ("DATA_PATH", "/var/lib/cq"),
            ("DEFAULT_TTL_SECS", "-1"),
            ("EXPIRY_SWEEP_INTERVAL_MS", "250"),
        ],
        || NodeConfig::from_env().unwrap(),
    );
    assert_eq!(config.node_id, "node_7");
    assert_eq!(config.listen_addr(), "0.0.0.0:9100");
    assert_eq!(
        config.object_store,
        ObjectStoreType::Local {
            path: "/var/lib/cq".to_string()
        }
    );
    assert_eq!(config.default_ttl_secs, -1);
    assert_eq!(config.expiry_sweep_interval, Duration::from_millis(250));
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_node_config_invalid_port_is_config_error() {
    let err = with_env_vars(&[("PORT", "not_a_port")], || {
        NodeConfig::from_env().unwrap_err()
    });
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(err.to_string().contains("PORT"));
}

#[test]
#[serial]
fn test_node_config_validation_collects_every_problem() {
    let config = with_env_vars(
        &[
            ("NODE_ID", "x"),
            ("DEFAULT_TTL_SECS", "0"),
            ("OBJECT_STORE_TYPE", "s3"),
        ],
        || NodeConfig::from_env().unwrap(),
    );
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 3, "{:?}", errors);
}

#[test]
#[serial]
fn test_memory_object_store() {
    let config = with_env_vars(&[("OBJECT_STORE_TYPE", "memory")], || {
        NodeConfig::from_env().unwrap()
    });
    assert_eq!(config.object_store, ObjectStoreType::Memory);
}

// ============================================================================
// Cluster-side configs
// ============================================================================

#[test]
#[serial]
fn test_orchestrator_config_from_env() {
    let config = with_env_vars(
        &[
            ("ORCHESTRATOR_ID", "orch_a"),
            ("ORCHESTRATOR_INTERVAL_MS", "1500"),
            ("ORCHESTRATOR_QUORUM", "2"),
        ],
        || OrchestratorConfig::from_env().unwrap(),
    );
    assert_eq!(config.orchestrator_id, "orch_a");
    assert_eq!(config.interval, Duration::from_millis(1500));
    assert_eq!(config.quorum, 2);
    // Probes must fail fast, so orchestrator clients do not retry by default.
    assert_eq!(config.rpc.max_retries, 0);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_orchestrator_quorum_zero_rejected() {
    let config = with_env_vars(&[("ORCHESTRATOR_QUORUM", "0")], || {
        OrchestratorConfig::from_env().unwrap()
    });
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_router_and_topology_config_from_env() {
    let (router, topology) = with_env_vars(
        &[
            ("CLIENT_NAME", "web_1"),
            ("COORDINATOR_ADDR", "10.0.0.5:7600"),
            ("CLUSTER_PATH", "/prod"),
            ("RPC_OPERATION_TIMEOUT_MS", "750"),
        ],
        || {
            (
                RouterConfig::from_env().unwrap(),
                TopologyConfig::from_env().unwrap(),
            )
        },
    );
    assert_eq!(router.client_name, "web_1");
    assert_eq!(router.rpc.operation_timeout, Duration::from_millis(750));
    assert_eq!(topology.coordinator_addr, "10.0.0.5:7600");
    assert_eq!(topology.cluster_path, "/prod");
    assert!(router.validate().is_ok());
    assert!(topology.validate().is_ok());
}

#[test]
#[serial]
fn test_client_name_with_separator_rejected() {
    let router = with_env_vars(&[("CLIENT_NAME", "a:b")], || {
        RouterConfig::from_env().unwrap()
    });
    assert!(router.validate().is_err());
}

#[test]
#[serial]
fn test_rpc_config_defaults() {
    let config = with_env_vars(&[], || RpcConfig::from_env().unwrap());
    assert_eq!(config, RpcConfig::default());
}
