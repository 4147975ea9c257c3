//! clusterq process entry point.
//!
//! ## Running
//!
//! One coordinator, one journal, two nodes and an orchestrator on one machine:
//! ```bash
//! clusterq coordinator
//! JOURNAL_ID=j1 PORT=7700 DATA_PATH=/tmp/cq-j1 clusterq journal
//! NODE_ID=n1 PORT=7801 DATA_PATH=/tmp/cq-n1 clusterq node
//! NODE_ID=n2 PORT=7802 DATA_PATH=/tmp/cq-n2 clusterq node
//!
//! clusterq register-journal j1 127.0.0.1 7700
//! clusterq register-node n1 127.0.0.1 7801 j1
//! clusterq register-node n2 127.0.0.1 7802 j1
//!
//! ORCHESTRATOR_ID=o1 clusterq orchestrator
//! ```
//!
//! Repair and replay one node without an orchestrator:
//! ```bash
//! clusterq resync n1            # replay from the node's longest-running UP journal
//! clusterq resync n1 j1         # replay from j1
//! clusterq resync n1 --no-replay
//! ```
//!
//! Set `LOG_FORMAT=json` for JSON logs. All other settings come from the
//! environment; see `clusterq::cluster::config`.

use std::sync::Arc;

use clusterq::cluster::coordination::CoordinationService;
use clusterq::cluster::retry::with_network_policy;
use clusterq::cluster::{
    BackgroundTaskRegistry, ClusterOrchestrator, ColdResync, CoordinatorConfig, JournalConfig,
    JournalRecord, MemoryCoordinationStore, NodeConfig, NodeRecord, OrchestratorConfig,
    RemoteCoordinationStore, RpcConfig, TcpConnector, Topology, TopologyConfig, TopologyWatcher,
};
use clusterq::error::{Error, Result};
use clusterq::rpc::{JournalService, NodeService, RpcServer};
use clusterq::store::{JournalStore, QueueStore, QueueStoreConfig, create_object_store};
use clusterq::telemetry::{LogFormat, init_logging};
use clusterq::types::Status;
use tracing::{error, info, warn};

const USAGE: &str = "\
usage: clusterq <command> [args]

processes:
  node                                   serve a queue node
  journal                                serve a journal node
  coordinator                            serve an in-memory coordination store
  orchestrator                           run the cluster control loop
  resync <node_id> [journal_id] [--no-replay]

administration:
  register-node <id> <host> <port> [journal_id,...]
  register-journal <id> <host> <port>
  set-status node|journal <id> UP|DOWN|READONLY|FORCEDOWN";

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env()).map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let rest = &args[1..];

    let result = match command.as_str() {
        "node" => run_node().await,
        "journal" => run_journal().await,
        "coordinator" => run_coordinator().await,
        "orchestrator" => run_orchestrator().await,
        "resync" => run_resync(rest).await,
        "register-node" => register_node(rest).await,
        "register-journal" => register_journal(rest).await,
        "set-status" => set_status(rest).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(Error::Config(format!("unknown command '{}'\n{}", other, USAGE))),
    };

    if let Err(e) = &result {
        error!(error = %e, command = %command, "clusterq exited with error");
    }
    result.map_err(Into::into)
}

fn check(validation: std::result::Result<(), Vec<String>>) -> Result<()> {
    validation.map_err(|errors| Error::Config(errors.join("; ")))
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| Error::Config(format!("missing argument <{}>\n{}", name, USAGE)))
}

fn port_arg(args: &[String], index: usize) -> Result<u16> {
    arg(args, index, "port")?
        .parse()
        .map_err(|e| Error::Config(format!("invalid port: {}", e)))
}

/// Connect to the coordinator named by the environment, retrying while it is unreachable.
async fn connect_topology() -> Result<Topology> {
    let config = TopologyConfig::from_env()?;
    check(config.validate())?;
    let rpc = RpcConfig::from_env()?;
    let store = with_network_policy(
        || RemoteCoordinationStore::connect(&config.coordinator_addr, rpc.clone()),
        |e: &Error| e.is_retriable(),
    )
    .await?;
    let topology = Topology::new(Arc::new(store), config.cluster_path.clone());
    topology.ensure_layout().await?;
    Ok(topology)
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn run_node() -> Result<()> {
    let config = NodeConfig::from_env()?;
    check(config.validate())?;
    info!(
        node_id = %config.node_id,
        addr = %config.listen_addr(),
        object_store = ?config.object_store,
        "Starting queue node"
    );

    let object_store = create_object_store(&config.object_store)?;
    let store = Arc::new(
        QueueStore::open(
            object_store,
            &config.node_id,
            QueueStoreConfig {
                default_ttl_secs: config.default_ttl_secs,
                flush_interval: config.flush_interval,
            },
        )
        .await?,
    );

    let mut tasks = BackgroundTaskRegistry::new();
    let sweeper = store.clone();
    tasks.spawn_periodic("expiry_sweep", config.expiry_sweep_interval, move |_| {
        let store = sweeper.clone();
        async move {
            if let Err(e) = store.purge_expired().await {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    });

    let server = RpcServer::bind(
        &config.listen_addr(),
        Arc::new(NodeService::new(store.clone())),
        "node",
    )
    .await?;
    let shutdown = tasks.subscribe_shutdown();
    tokio::select! {
        result = server.run(shutdown) => result?,
        _ = wait_for_ctrl_c() => info!(node_id = %config.node_id, "Shutting down"),
    }

    tasks.shutdown_all().await;
    store.close().await
}

async fn run_journal() -> Result<()> {
    let config = JournalConfig::from_env()?;
    check(config.validate())?;
    info!(
        journal_id = %config.journal_id,
        addr = %config.listen_addr(),
        object_store = ?config.object_store,
        "Starting journal"
    );

    let object_store = create_object_store(&config.object_store)?;
    let store = Arc::new(
        JournalStore::open(object_store, &config.journal_id, config.flush_interval).await?,
    );

    let mut tasks = BackgroundTaskRegistry::new();
    let sweeper = store.clone();
    tasks.spawn_periodic("expiry_sweep", config.expiry_sweep_interval, move |_| {
        let store = sweeper.clone();
        async move {
            if let Err(e) = store.purge_expired().await {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    });

    let server = RpcServer::bind(
        &config.listen_addr(),
        Arc::new(JournalService::new(store.clone())),
        "journal",
    )
    .await?;
    let shutdown = tasks.subscribe_shutdown();
    tokio::select! {
        result = server.run(shutdown) => result?,
        _ = wait_for_ctrl_c() => info!(journal_id = %config.journal_id, "Shutting down"),
    }

    tasks.shutdown_all().await;
    store.close().await
}

async fn run_coordinator() -> Result<()> {
    let config = CoordinatorConfig::from_env()?;
    check(config.validate())?;
    info!(addr = %config.listen_addr(), "Starting coordinator");

    let store = Arc::new(MemoryCoordinationStore::new());
    let server = RpcServer::bind(
        &config.listen_addr(),
        Arc::new(CoordinationService::new(store)),
        "coordinator",
    )
    .await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::select! {
        result = server.run(shutdown_rx) => result?,
        _ = wait_for_ctrl_c() => {
            info!("Shutting down");
            let _ = shutdown_tx.send(());
        }
    }
    Ok(())
}

async fn run_orchestrator() -> Result<()> {
    let config = OrchestratorConfig::from_env()?;
    check(config.validate())?;
    let watch_timeout = TopologyConfig::from_env()?.watch_timeout;
    let topology = connect_topology().await?;

    let watcher = Arc::new(TopologyWatcher::new(topology));
    watcher.refresh().await?;
    let connector = Arc::new(TcpConnector::new(config.rpc.clone()));
    let orchestrator = Arc::new(ClusterOrchestrator::new(config, watcher.clone(), connector));

    let mut tasks = BackgroundTaskRegistry::new();
    tasks.spawn("topology_watcher", watcher.run(watch_timeout));
    let shutdown = tasks.subscribe_shutdown();

    let result = tokio::select! {
        result = orchestrator.run(shutdown) => result,
        _ = wait_for_ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };
    tasks.shutdown_all().await;
    result
}

async fn run_resync(args: &[String]) -> Result<()> {
    let node_id = arg(args, 0, "node_id")?;
    let replay = !args.iter().any(|a| a == "--no-replay");
    let journal_id = args[1..]
        .iter()
        .map(String::as_str)
        .find(|a| !a.starts_with("--"));

    let topology = connect_topology().await?;
    let connector = Arc::new(TcpConnector::new(RpcConfig::from_env()?));
    let report = ColdResync::new(topology, connector)
        .run(node_id, journal_id, replay)
        .await?;

    info!(
        node_id = %node_id,
        topics_created = report.repair.topics_created.len(),
        groups_created = report.repair.groups_created.len(),
        journal_id = ?report.journal_id,
        replayed = report.replayed,
        "Resync complete"
    );
    Ok(())
}

async fn register_node(args: &[String]) -> Result<()> {
    let id = arg(args, 0, "id")?;
    let host = arg(args, 1, "host")?;
    let port = port_arg(args, 2)?;
    let journals: Vec<String> = args
        .get(3)
        .map(|list| {
            list.split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let topology = connect_topology().await?;
    topology
        .register_node(id, &NodeRecord::new(host, port, journals))
        .await
}

async fn register_journal(args: &[String]) -> Result<()> {
    let id = arg(args, 0, "id")?;
    let host = arg(args, 1, "host")?;
    let port = port_arg(args, 2)?;

    let topology = connect_topology().await?;
    topology
        .register_journal(id, &JournalRecord::new(host, port))
        .await
}

async fn set_status(args: &[String]) -> Result<()> {
    let kind = arg(args, 0, "node|journal")?;
    let id = arg(args, 1, "id")?;
    let status: Status = arg(args, 2, "status")?.parse()?;

    let topology = connect_topology().await?;
    match kind {
        "node" => topology.set_node_status(id, status).await,
        "journal" => topology.set_journal_status(id, status).await,
        other => Err(Error::Config(format!(
            "expected 'node' or 'journal', got '{}'",
            other
        ))),
    }
}
