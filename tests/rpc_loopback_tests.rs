//! RPC services and clients over loopback TCP.
//!
//! Each test binds a server on an ephemeral port and talks to it through the
//! matching client, checking that results and typed errors survive the wire.

use clusterq::cluster::coordination::{CoordinationService, CoordinationStore};
use clusterq::cluster::{JournalNode, MemoryCoordinationStore, QueueNode, RemoteCoordinationStore, RpcConfig};
use clusterq::constants::NO_TTL;
use clusterq::error::{Error, ErrorKind};
use clusterq::rpc::{JournalClient, JournalService, NodeClient, NodeService, RpcHandler, RpcServer};
use clusterq::store::{JournalStore, QueueStore, QueueStoreConfig};
use clusterq::types::Fields;
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

fn msg(body: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("message".to_string(), body.to_string());
    fields
}

/// Bind `handler` on an ephemeral port. Dropping the sender stops the accept loop.
async fn serve<H: RpcHandler>(handler: H, name: &'static str) -> (String, broadcast::Sender<()>) {
    let server = RpcServer::bind("127.0.0.1:0", Arc::new(handler), name)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(server.run(rx));
    (addr, tx)
}

// ============================================================================
// Node service
// ============================================================================

#[tokio::test]
async fn test_node_queue_cycle_over_tcp() {
    let store = QueueStore::open_in_memory(QueueStoreConfig::default())
        .await
        .unwrap();
    let (addr, _shutdown) = serve(NodeService::new(Arc::new(store)), "node").await;
    let client = NodeClient::connect(&addr, rpc_config()).await.unwrap();

    client.create_topic("orders", Some(NO_TTL)).await.unwrap();
    client.create_consumer_group("orders", "billing").await.unwrap();
    let posted = client.post_message("orders", msg("hello")).await.unwrap();
    assert_eq!(posted.id, 1);
    assert_eq!(posted.ttl, NO_TTL);

    let delivered = client
        .get_message("orders", "billing", Some(Duration::from_secs(30)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id, 1);
    assert_eq!(delivered.fields["message"], "hello");
    assert_eq!(delivered.remaining, 0);

    client.ack_message("orders", "billing", 1).await.unwrap();
    assert!(
        client
            .get_message("orders", "billing", None)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(client.get_heads().await.unwrap()["orders"], 1);
}

#[tokio::test]
async fn test_node_errors_keep_their_type() {
    let store = QueueStore::open_in_memory(QueueStoreConfig::default())
        .await
        .unwrap();
    let (addr, _shutdown) = serve(NodeService::new(Arc::new(store)), "node").await;
    let client = NodeClient::connect(&addr, rpc_config()).await.unwrap();

    let err = client
        .get_message("missing", "billing", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchTopic(ref t) if t == "missing"));

    client.create_topic("orders", None).await.unwrap();
    let err = client.create_topic("orders", None).await.unwrap_err();
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn test_restore_message_over_tcp() {
    let store = QueueStore::open_in_memory(QueueStoreConfig::default())
        .await
        .unwrap();
    let (addr, _shutdown) = serve(NodeService::new(Arc::new(store)), "node").await;
    let client = NodeClient::connect(&addr, rpc_config()).await.unwrap();

    client.create_topic("orders", Some(NO_TTL)).await.unwrap();
    assert!(client.restore_message("orders", 5, msg("late")).await.unwrap());
    assert_eq!(client.get_head("orders").await.unwrap(), 5);
    assert!(!client.restore_message("orders", 5, msg("late")).await.unwrap());
}

#[tokio::test]
async fn test_connect_to_closed_port_is_retriable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = NodeClient::connect(&addr, rpc_config()).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.is_retriable());
}

// ============================================================================
// Journal service
// ============================================================================

#[tokio::test]
async fn test_journal_over_tcp() {
    let store = JournalStore::open_in_memory().await.unwrap();
    let (addr, _shutdown) = serve(JournalService::new(Arc::new(store)), "journal").await;
    let client = JournalClient::connect(&addr, rpc_config()).await.unwrap();

    for id in 1..=3 {
        client
            .write("n1", "orders", id, msg(&format!("m{}", id)), NO_TTL)
            .await
            .unwrap();
    }
    let entries = client.retrieve_messages("n1", "orders", 2).await.unwrap();
    let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(client.get_head("n1", "orders").await.unwrap(), 3);
    assert_eq!(client.get_head("n2", "orders").await.unwrap(), 0);

    let err = client
        .write("n1", "orders", 0, msg("bad"), NO_TTL)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

// ============================================================================
// Coordination service
// ============================================================================

#[tokio::test]
async fn test_coordination_over_tcp() {
    let backing = Arc::new(MemoryCoordinationStore::new());
    let (addr, _shutdown) = serve(CoordinationService::new(backing), "coordinator").await;
    let store = RemoteCoordinationStore::connect(&addr, rpc_config())
        .await
        .unwrap();

    store.create("/cq", b"root".to_vec()).await.unwrap();
    let err = store.create("/cq", Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));

    let read = store.get("/cq").await.unwrap();
    assert_eq!(read.data, b"root");
    assert_eq!(read.version, 0);

    assert_eq!(store.set("/cq", b"v1".to_vec(), Some(0)).await.unwrap(), 1);
    let err = store.set("/cq", b"v2".to_vec(), Some(0)).await.unwrap_err();
    assert!(err.is_benign_race());

    store.create("/cq/child", Vec::new()).await.unwrap();
    assert_eq!(store.children("/cq").await.unwrap(), vec!["child"]);
    assert!(store.exists("/cq/child").await.unwrap());
}

#[tokio::test]
async fn test_remote_watch_wakes_on_change() {
    let backing = Arc::new(MemoryCoordinationStore::new());
    let (addr, _shutdown) = serve(CoordinationService::new(backing.clone()), "coordinator").await;
    let store = Arc::new(
        RemoteCoordinationStore::connect(&addr, rpc_config())
            .await
            .unwrap(),
    );

    let since = store.wait_for_change(0, Duration::from_millis(10)).await.unwrap();
    let waiter = tokio::spawn({
        let store = store.clone();
        async move { store.wait_for_change(since, Duration::from_secs(5)).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    backing.create("/cq", Vec::new()).await.unwrap();

    let counter = waiter.await.unwrap().unwrap();
    assert!(counter > since);
}
