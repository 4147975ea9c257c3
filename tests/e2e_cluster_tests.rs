//! End-to-end cluster tests over loopback TCP.
//!
//! A coordinator, a journal and two queue nodes each run their RPC server on an
//! ephemeral port. The router and orchestrator reach them only through
//! `TcpConnector` and `RemoteCoordinationStore`, the way separate processes do.

use clusterq::cluster::coordination::CoordinationService;
use clusterq::cluster::{
    ClusterOrchestrator, ClusterRouter, ColdResync, JournalRecord,
    MemoryCoordinationStore, NodeRecord, OrchestratorConfig, RemoteCoordinationStore,
    RouterConfig, RpcConfig, TcpConnector, Topology, TopologyWatcher,
};
use clusterq::constants::NO_TTL;
use clusterq::rpc::{JournalService, NodeService, RpcHandler, RpcServer};
use clusterq::store::{JournalStore, QueueStore, QueueStoreConfig};
use clusterq::types::{Fields, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn rpc_config() -> RpcConfig {
    RpcConfig {
        connect_timeout: Duration::from_millis(500),
        operation_timeout: Duration::from_secs(2),
        max_retries: 0,
        ..RpcConfig::default()
    }
}

async fn serve<H: RpcHandler>(handler: H, name: &'static str) -> (u16, broadcast::Sender<()>) {
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(handler), name)
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(server.run(rx));
    (port, tx)
}

async fn serve_node() -> (u16, broadcast::Sender<()>) {
    let store = QueueStore::open_in_memory(QueueStoreConfig::default())
        .await
        .unwrap();
    serve(NodeService::new(Arc::new(store)), "node").await
}

fn msg(body: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("message".to_string(), body.to_string());
    fields
}

struct Deployment {
    topology: Topology,
    watcher: Arc<TopologyWatcher>,
    router: ClusterRouter,
    orchestrator: ClusterOrchestrator,
    journal: Arc<JournalStore>,
    servers: Vec<broadcast::Sender<()>>,
}

impl Deployment {
    async fn start() -> Self {
        let (coord_port, coord_stop) = serve(
            CoordinationService::new(Arc::new(MemoryCoordinationStore::new())),
            "coordinator",
        )
        .await;
        let journal = Arc::new(JournalStore::open_in_memory().await.unwrap());
        let (journal_port, journal_stop) =
            serve(JournalService::new(journal.clone()), "journal").await;
        let (n1_port, n1_stop) = serve_node().await;
        let (n2_port, n2_stop) = serve_node().await;

        let store = RemoteCoordinationStore::connect(
            &format!("127.0.0.1:{}", coord_port),
            rpc_config(),
        )
        .await
        .unwrap();
        let topology = Topology::new(Arc::new(store), "/e2e");
        topology.ensure_layout().await.unwrap();
        topology
            .register_journal("j1", &JournalRecord::new("127.0.0.1", journal_port))
            .await
            .unwrap();
        for (id, port) in [("n1", n1_port), ("n2", n2_port)] {
            topology
                .register_node(id, &NodeRecord::new("127.0.0.1", port, vec!["j1".to_string()]))
                .await
                .unwrap();
        }

        let watcher = Arc::new(TopologyWatcher::new(topology.clone()));
        watcher.refresh().await.unwrap();
        let orchestrator = ClusterOrchestrator::new(
            OrchestratorConfig {
                orchestrator_id: "o1".to_string(),
                quorum: 1,
                rpc: rpc_config(),
                ..OrchestratorConfig::default()
            },
            watcher.clone(),
            Arc::new(TcpConnector::new(rpc_config())),
        );
        let router = ClusterRouter::new(
            RouterConfig {
                client_name: "e2e".to_string(),
                rpc: rpc_config(),
            },
            watcher.clone(),
            Arc::new(TcpConnector::new(rpc_config())),
        );

        Self {
            topology,
            watcher,
            router,
            orchestrator,
            journal,
            servers: vec![coord_stop, journal_stop, n1_stop, n2_stop],
        }
    }

    /// One orchestrator tick, then make its writes visible to the router.
    async fn tick(&self) {
        self.orchestrator.tick().await.unwrap().unwrap();
        self.watcher.refresh().await.unwrap();
    }
}

#[tokio::test]
async fn test_cluster_comes_up_and_serves_traffic() {
    let d = Deployment::start().await;
    assert!(d.router.post_message("orders", msg("x")).await.is_err());

    d.tick().await;
    for (id, status) in d.router.nodes() {
        assert_eq!(status, Status::Up, "node {}", id);
    }

    d.router.create_topic("orders", Some(NO_TTL)).await.unwrap();
    d.router
        .create_consumer_group("orders", "billing")
        .await
        .unwrap();
    for i in 0..4 {
        d.router
            .post_message("orders", msg(&format!("m{}", i)))
            .await
            .unwrap();
    }

    let heads = d.router.get_heads().await.unwrap();
    assert_eq!(heads["n1"]["orders"], 2);
    assert_eq!(heads["n2"]["orders"], 2);
    for node_id in ["n1", "n2"] {
        assert_eq!(d.journal.get_head(node_id, "orders").await.unwrap(), 2);
    }

    let mut bodies = Vec::new();
    while let Some(m) = d
        .router
        .get_message("orders", "billing", Some(Duration::from_secs(30)))
        .await
        .unwrap()
    {
        bodies.push(m.fields["message"].clone());
        d.router
            .ack_message("orders", "billing", &m.receipt)
            .await
            .unwrap();
    }
    bodies.sort();
    assert_eq!(bodies, vec!["m0", "m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_replaced_node_is_repaired_and_replayed_on_rejoin() {
    let mut d = Deployment::start().await;
    d.tick().await;
    d.router.create_topic("orders", Some(NO_TTL)).await.unwrap();
    d.router
        .create_consumer_group("orders", "billing")
        .await
        .unwrap();
    for i in 0..4 {
        d.router
            .post_message("orders", msg(&format!("m{}", i)))
            .await
            .unwrap();
    }

    // n1 lost its disk: an empty node comes back on a new port.
    let (new_port, new_stop) = serve_node().await;
    d.servers.push(new_stop);
    let current = d.topology.get_node("n1").await.unwrap();
    let mut record = current.record.clone();
    record.port = new_port;
    record.status = Status::Down;
    d.topology
        .update_node("n1", &record, Some(current.version))
        .await
        .unwrap();

    d.tick().await;
    assert_eq!(
        d.topology.get_node("n1").await.unwrap().record.status,
        Status::Up
    );

    let heads = d.router.get_heads().await.unwrap();
    assert_eq!(heads["n1"]["orders"], 2);

    let mut count = 0;
    while let Some(m) = d
        .router
        .get_message("orders", "billing", Some(Duration::from_secs(30)))
        .await
        .unwrap()
    {
        d.router
            .ack_message("orders", "billing", &m.receipt)
            .await
            .unwrap();
        count += 1;
    }
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_cold_resync_over_tcp() {
    let mut d = Deployment::start().await;
    d.tick().await;
    d.router.create_topic("orders", Some(NO_TTL)).await.unwrap();
    d.router
        .create_consumer_group("orders", "billing")
        .await
        .unwrap();
    for i in 0..2 {
        d.router
            .post_message("orders", msg(&format!("m{}", i)))
            .await
            .unwrap();
    }

    let (new_port, new_stop) = serve_node().await;
    d.servers.push(new_stop);
    let current = d.topology.get_node("n1").await.unwrap();
    let mut record = current.record.clone();
    record.port = new_port;
    d.topology
        .update_node("n1", &record, Some(current.version))
        .await
        .unwrap();

    let resync = ColdResync::new(d.topology.clone(), Arc::new(TcpConnector::new(rpc_config())));
    let report = resync.run("n1", None, true).await.unwrap();
    assert_eq!(report.repair.topics_created, vec!["orders"]);
    assert_eq!(report.journal_id.as_deref(), Some("j1"));
    assert_eq!(report.replayed, 1);

    let again = resync.run("n1", None, true).await.unwrap();
    assert!(again.repair.is_empty());
    assert_eq!(again.replayed, 0);

    d.watcher.refresh().await.unwrap();
    assert_eq!(d.router.get_heads().await.unwrap()["n1"]["orders"], 1);
}
