//! Client-side routing across storage nodes.
//!
//! The router keeps an ordered list of nodes and the journals they declare,
//! updated only from [`TopologyWatcher`] events. Selection is round robin: the
//! chosen node moves to the back of the list.
//!
//! - Writes go to UP nodes; on an `Unavailable` failure the next node is tried,
//!   at most once per known node. An accepted post is replicated to every
//!   journal of the accepting node before the call returns.
//! - Reads go to UP and READONLY nodes; "no message" moves on to the next node.
//! - Ack and fail are pinned to the node named in the receipt.
//! - Topic and consumer-group creation needs every known node UP, fans out to
//!   all of them and is recorded in topology only when every node succeeded.

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::RouterConfig;
use super::metrics::{REPLICATION_FAILURES, ROUTER_MEMBERS, ROUTER_RETRIES};
use super::topology::{ClusterSnapshot, JournalRecord, NodeRecord, Topology};
use super::traits::{Connector, JournalNode, QueueNode};
use super::watcher::{TopologyEvent, TopologySubscription, TopologyWatcher};
use crate::constants::{DEFAULT_TOPIC_TTL_SECS, PAYLOAD_FIELD, UID_FIELD};
use crate::error::{Error, Result};
use crate::payload;
use crate::receipt::Receipt;
use crate::store::now_millis;
use crate::types::{ConsumerStats, Delivered, Fields, Status};
use crate::validation::{validate_group_name, validate_topic_name};

/// Result of a routed post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostOutcome {
    pub id: u64,
    /// Client-unique id attached to the message, usable for dedup upstream.
    pub uid: String,
    pub node_id: String,
}

/// A delivered message together with the receipt needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub node_id: String,
    pub receipt: String,
    pub id: u64,
    pub fields: Fields,
    pub redelivery: bool,
    pub remaining: u64,
}

impl RoutedMessage {
    /// Fields with serialized objects and arrays parsed back.
    pub fn payload(&self) -> Map<String, Value> {
        payload::reconstruct(&self.fields)
    }
}

#[derive(Default)]
struct Membership {
    /// Rotation order.
    order: VecDeque<String>,
    nodes: HashMap<String, NodeRecord>,
    journals: HashMap<String, JournalRecord>,
}

pub struct ClusterRouter {
    config: RouterConfig,
    topology: Topology,
    watcher: Arc<TopologyWatcher>,
    connector: Arc<dyn Connector>,
    members: Mutex<Membership>,
    subscription: Mutex<TopologySubscription>,
    node_handles: DashMap<String, Arc<dyn QueueNode>>,
    journal_handles: DashMap<String, Arc<dyn JournalNode>>,
    uid_counter: AtomicU64,
}

impl ClusterRouter {
    /// Build a router from the watcher's current mirror.
    ///
    /// Later changes are picked up from the watcher's events, which it publishes
    /// on [`TopologyWatcher::refresh`] or while [`TopologyWatcher::run`] is active.
    pub fn new(
        config: RouterConfig,
        watcher: Arc<TopologyWatcher>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let subscription = watcher.subscribe();
        let router = Self {
            config,
            topology: watcher.topology().clone(),
            watcher,
            connector,
            members: Mutex::new(Membership::default()),
            subscription: Mutex::new(subscription),
            node_handles: DashMap::new(),
            journal_handles: DashMap::new(),
            uid_counter: AtomicU64::new(0),
        };
        router.rebuild(&router.watcher.snapshot());
        router
    }

    fn members(&self) -> MutexGuard<'_, Membership> {
        self.members.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply every topology event published since the last call.
    pub fn sync_membership(&self) {
        let mut events = Vec::new();
        {
            let mut subscription = self.subscription.lock().unwrap_or_else(|p| p.into_inner());
            while let Some(event) = subscription.try_next() {
                events.push(event);
            }
        }
        if events.is_empty() {
            return;
        }
        for event in events {
            self.apply(event);
        }
        self.publish_member_counts();
    }

    fn apply(&self, event: TopologyEvent) {
        match event {
            TopologyEvent::NodeAdded { id, record } | TopologyEvent::NodeChanged { id, record } => {
                let mut members = self.members();
                if !members.order.contains(&id) {
                    members.order.push_back(id.clone());
                }
                if members
                    .nodes
                    .get(&id)
                    .is_some_and(|old| old.addr() != record.addr())
                {
                    self.node_handles.remove(&id);
                }
                debug!(node_id = %id, status = %record.status, "Router node updated");
                members.nodes.insert(id, record);
            }
            TopologyEvent::NodeRemoved { id } => {
                let mut members = self.members();
                members.order.retain(|n| n != &id);
                members.nodes.remove(&id);
                self.node_handles.remove(&id);
                debug!(node_id = %id, "Router node removed");
            }
            TopologyEvent::JournalAdded { id, record }
            | TopologyEvent::JournalChanged { id, record } => {
                let mut members = self.members();
                if members
                    .journals
                    .get(&id)
                    .is_some_and(|old| old.addr() != record.addr())
                {
                    self.journal_handles.remove(&id);
                }
                members.journals.insert(id, record);
            }
            TopologyEvent::JournalRemoved { id } => {
                self.members().journals.remove(&id);
                self.journal_handles.remove(&id);
            }
            TopologyEvent::Reset => self.rebuild(&self.watcher.snapshot()),
            TopologyEvent::TopicAdded { .. }
            | TopologyEvent::TopicChanged { .. }
            | TopologyEvent::TopicRemoved { .. } => {}
        }
    }

    /// Replace membership with `snapshot`, keeping the rotation order of
    /// surviving nodes.
    fn rebuild(&self, snapshot: &ClusterSnapshot) {
        {
            let mut members = self.members();
            members.order.retain(|id| snapshot.nodes.contains_key(id));
            for id in snapshot.nodes.keys() {
                if !members.order.contains(id) {
                    members.order.push_back(id.clone());
                }
            }
            members.nodes = snapshot
                .nodes
                .iter()
                .map(|(id, v)| (id.clone(), v.record.clone()))
                .collect();
            members.journals = snapshot
                .journals
                .iter()
                .map(|(id, v)| (id.clone(), v.record.clone()))
                .collect();
        }
        self.node_handles.clear();
        self.journal_handles.clear();
        self.publish_member_counts();
    }

    fn publish_member_counts(&self) {
        let members = self.members();
        ROUTER_MEMBERS
            .with_label_values(&["node"])
            .set(members.nodes.len() as i64);
        ROUTER_MEMBERS
            .with_label_values(&["journal"])
            .set(members.journals.len() as i64);
    }

    /// Node ids in rotation order with their status.
    pub fn nodes(&self) -> Vec<(String, Status)> {
        self.sync_membership();
        let members = self.members();
        members
            .order
            .iter()
            .filter_map(|id| members.nodes.get(id).map(|r| (id.clone(), r.status)))
            .collect()
    }

    pub fn journals(&self) -> Vec<(String, Status)> {
        self.sync_membership();
        let mut journals: Vec<_> = self
            .members()
            .journals
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect();
        journals.sort();
        journals
    }

    fn next_uid(&self) -> String {
        let counter = self.uid_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}:{}:{}", self.config.client_name, now_millis(), counter)
    }

    /// Pick the first eligible untried node and move it to the back.
    fn next_node(
        &self,
        eligible: fn(&Status) -> bool,
        tried: &HashSet<String>,
    ) -> Option<(String, NodeRecord)> {
        let mut members = self.members();
        let position = members.order.iter().position(|id| {
            !tried.contains(id)
                && members
                    .nodes
                    .get(id)
                    .is_some_and(|record| eligible(&record.status))
        })?;
        let id = members.order.remove(position)?;
        members.order.push_back(id.clone());
        members.nodes.get(&id).cloned().map(|record| (id, record))
    }

    fn known_node_count(&self) -> usize {
        self.members().order.len()
    }

    async fn node_handle(&self, node_id: &str, record: &NodeRecord) -> Result<Arc<dyn QueueNode>> {
        if let Some(handle) = self.node_handles.get(node_id) {
            return Ok(handle.value().clone());
        }
        let handle = self.connector.connect_node(node_id, record).await?;
        self.node_handles
            .insert(node_id.to_string(), handle.clone());
        Ok(handle)
    }

    async fn journal_handle(&self, journal_id: &str) -> Result<Arc<dyn JournalNode>> {
        if let Some(handle) = self.journal_handles.get(journal_id) {
            return Ok(handle.value().clone());
        }
        let record = self
            .members()
            .journals
            .get(journal_id)
            .cloned()
            .ok_or_else(|| Error::NoSuchJournal(journal_id.to_string()))?;
        let handle = self.connector.connect_journal(journal_id, &record).await?;
        self.journal_handles
            .insert(journal_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// A known node whose status allows `eligible`.
    fn pinned_node(&self, node_id: &str, eligible: fn(&Status) -> bool) -> Result<NodeRecord> {
        let record = self
            .members()
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| Error::NoSuchNode(node_id.to_string()))?;
        if !eligible(&record.status) {
            return Err(Error::NotEligible {
                node_id: node_id.to_string(),
                reason: format!("status is {}", record.status),
            });
        }
        Ok(record)
    }

    /// Post a JSON object; object and array values are stored as JSON text.
    pub async fn post_object(&self, topic: &str, object: &Map<String, Value>) -> Result<PostOutcome> {
        self.post_message(topic, payload::stringify(object)).await
    }

    pub async fn post_message(&self, topic: &str, mut fields: Fields) -> Result<PostOutcome> {
        self.sync_membership();
        validate_topic_name(topic)?;
        if !fields.contains_key(PAYLOAD_FIELD) {
            return Err(Error::MissingPayload(PAYLOAD_FIELD.to_string()));
        }

        let uid = self.next_uid();
        fields.insert(UID_FIELD.to_string(), uid.clone());

        let mut tried = HashSet::new();
        let mut last_error = None;
        for _ in 0..self.known_node_count() {
            let Some((node_id, record)) = self.next_node(Status::is_writable, &tried) else {
                break;
            };
            tried.insert(node_id.clone());

            let result = match self.node_handle(&node_id, &record).await {
                Ok(node) => node.post_message(topic, fields.clone()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(posted) => {
                    debug!(node_id = %node_id, topic = %topic, id = posted.id, "Message posted");
                    self.replicate(&node_id, &record.journals, topic, posted.id, posted.ttl, &fields, &uid)
                        .await?;
                    return Ok(PostOutcome {
                        id: posted.id,
                        uid,
                        node_id,
                    });
                }
                Err(e) if e.is_retriable() => {
                    warn!(node_id = %node_id, topic = %topic, error = %e, "Post failed, trying next node");
                    ROUTER_RETRIES.with_label_values(&["post"]).inc();
                    self.node_handles.remove(&node_id);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Unavailable("no writable node".to_string())))
    }

    /// Write an accepted message to every journal of the accepting node.
    #[allow(clippy::too_many_arguments)]
    async fn replicate(
        &self,
        node_id: &str,
        journals: &[String],
        topic: &str,
        id: u64,
        ttl: i64,
        fields: &Fields,
        uid: &str,
    ) -> Result<()> {
        if journals.is_empty() {
            return Ok(());
        }

        let writes = journals.iter().map(|journal_id| async move {
            let result = match self.journal_handle(journal_id).await {
                Ok(journal) => journal.write(node_id, topic, id, fields.clone(), ttl).await,
                Err(e) => Err(e),
            };
            (journal_id, result)
        });

        let mut failures = Vec::new();
        for (journal_id, result) in join_all(writes).await {
            if let Err(e) = result {
                if e.is_retriable() {
                    self.journal_handles.remove(journal_id);
                }
                failures.push(format!("{}: {}", journal_id, e));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }

        REPLICATION_FAILURES.inc();
        warn!(node_id = %node_id, topic = %topic, id, uid = %uid, failures = ?failures, "Journal replication failed");
        Err(Error::NotReplicated {
            node_id: node_id.to_string(),
            id,
            uid: uid.to_string(),
            reason: failures.join("; "),
        })
    }

    /// Lease the next message from any readable node.
    pub async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<RoutedMessage>> {
        self.sync_membership();

        let mut tried = HashSet::new();
        let mut answered = false;
        let mut last_error = None;
        for _ in 0..self.known_node_count() {
            let Some((node_id, record)) = self.next_node(Status::is_readable, &tried) else {
                break;
            };
            tried.insert(node_id.clone());

            let result = match self.node_handle(&node_id, &record).await {
                Ok(node) => node.get_message(topic, group, window).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(delivered)) => return Ok(Some(routed(&node_id, topic, group, delivered))),
                Ok(None) => answered = true,
                Err(e) if e.is_retriable() => {
                    debug!(node_id = %node_id, error = %e, "Read failed, trying next node");
                    ROUTER_RETRIES.with_label_values(&["get"]).inc();
                    self.node_handles.remove(&node_id);
                    last_error = Some(e);
                }
                Err(e @ Error::MessageExpired { .. }) => {
                    debug!(node_id = %node_id, error = %e, "Transient read conflict, trying next node");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if tried.is_empty() {
            return Err(Error::Unavailable("no readable node".to_string()));
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    /// Lease the next message from one specific node.
    pub async fn get_message_from_node(
        &self,
        node_id: &str,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<RoutedMessage>> {
        self.sync_membership();
        let record = self.pinned_node(node_id, Status::is_readable)?;
        let node = self.node_handle(node_id, &record).await?;
        Ok(node
            .get_message(topic, group, window)
            .await?
            .map(|delivered| routed(node_id, topic, group, delivered)))
    }

    /// Resolve a receipt to its node after checking it belongs to `topic`/`group`.
    /// The node must be UP.
    async fn settle_target(
        &self,
        topic: &str,
        group: &str,
        receipt: &str,
    ) -> Result<(Receipt, Arc<dyn QueueNode>)> {
        self.sync_membership();
        let receipt = Receipt::decode(receipt)?;
        if receipt.topic != topic || receipt.consumer_group != group {
            return Err(Error::Invalid(format!(
                "receipt was issued for {}/{}, not {}/{}",
                receipt.topic, receipt.consumer_group, topic, group
            )));
        }
        let record = self.pinned_node(&receipt.node_id, Status::is_writable)?;
        let node = self.node_handle(&receipt.node_id, &record).await?;
        Ok((receipt, node))
    }

    pub async fn ack_message(&self, topic: &str, group: &str, receipt: &str) -> Result<()> {
        let (receipt, node) = self.settle_target(topic, group, receipt).await?;
        node.ack_message(topic, group, receipt.id).await
    }

    pub async fn fail_message(&self, topic: &str, group: &str, receipt: &str) -> Result<()> {
        let (receipt, node) = self.settle_target(topic, group, receipt).await?;
        node.fail_message(topic, group, receipt.id).await
    }

    /// Every known node, provided all of them are UP.
    fn all_nodes_up(&self) -> Result<Vec<(String, NodeRecord)>> {
        let members = self.members();
        if members.nodes.is_empty() {
            return Err(Error::Unavailable("no nodes are known".to_string()));
        }
        let mut nodes = Vec::with_capacity(members.nodes.len());
        for id in &members.order {
            let Some(record) = members.nodes.get(id) else {
                continue;
            };
            if record.status != Status::Up {
                return Err(Error::NotEligible {
                    node_id: id.clone(),
                    reason: format!("status is {}, every node must be UP", record.status),
                });
            }
            nodes.push((id.clone(), record.clone()));
        }
        Ok(nodes)
    }

    fn readable_nodes(&self) -> Result<Vec<(String, NodeRecord)>> {
        let members = self.members();
        let nodes: Vec<_> = members
            .order
            .iter()
            .filter_map(|id| members.nodes.get(id).map(|r| (id.clone(), r.clone())))
            .filter(|(_, record)| record.status.is_readable())
            .collect();
        if nodes.is_empty() {
            return Err(Error::Unavailable("no readable node".to_string()));
        }
        Ok(nodes)
    }

    /// Run `call` on every node in `targets` concurrently and wait for all of them.
    ///
    /// Fails with `PartialFailure` naming every node that failed; calls that
    /// succeeded are not undone.
    async fn with_every<T, F, Fut>(
        &self,
        operation: &'static str,
        targets: Vec<(String, NodeRecord)>,
        call: F,
    ) -> Result<Vec<(String, T)>>
    where
        F: Fn(Arc<dyn QueueNode>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let call = &call;
        let calls = targets.into_iter().map(|(node_id, record)| async move {
            let result = match self.node_handle(&node_id, &record).await {
                Ok(node) => call(node).await,
                Err(e) => Err(e),
            };
            (node_id, result)
        });

        let mut values = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for (node_id, result) in join_all(calls).await {
            match result {
                Ok(value) => values.push((node_id, value)),
                Err(e) => {
                    warn!(node_id = %node_id, operation, error = %e, "Fan-out call failed");
                    if e.is_retriable() {
                        self.node_handles.remove(&node_id);
                    }
                    first_error.get_or_insert_with(|| e.to_string());
                    failed.push(node_id);
                }
            }
        }

        match first_error {
            None => Ok(values),
            Some(error) => Err(Error::PartialFailure {
                message: format!("{}: {}", operation, error),
                failed,
            }),
        }
    }

    /// Create a topic on every node, then record it in topology.
    pub async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()> {
        self.sync_membership();
        validate_topic_name(topic)?;
        let ttl = ttl_secs.unwrap_or(DEFAULT_TOPIC_TTL_SECS);
        let nodes = self.all_nodes_up()?;

        self.with_every("create_topic", nodes, |node| async move {
            match node.create_topic(topic, Some(ttl)).await {
                Err(e) if e.is_already_exists() => Ok(()),
                other => other,
            }
        })
        .await?;
        self.topology.create_topic(topic, ttl).await?;
        info!(topic = %topic, ttl, "Topic created");
        Ok(())
    }

    /// Create a consumer group on every node, then record it in topology.
    pub async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.sync_membership();
        validate_topic_name(topic)?;
        validate_group_name(group)?;
        let view = self.topology.get_topic(topic).await?;
        if view.groups.contains(group) {
            return Err(Error::AlreadyExists(format!(
                "consumer group {} on topic {}",
                group, topic
            )));
        }
        let nodes = self.all_nodes_up()?;

        self.with_every("create_consumer_group", nodes, |node| async move {
            match node.create_consumer_group(topic, group).await {
                Err(e) if e.is_already_exists() => Ok(()),
                other => other,
            }
        })
        .await?;
        self.topology.create_consumer_group(topic, group).await?;
        info!(topic = %topic, group = %group, "Consumer group created");
        Ok(())
    }

    /// Remove a consumer group from topology, then from every node.
    pub async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.sync_membership();
        let nodes = self.all_nodes_up()?;
        self.topology.delete_consumer_group(topic, group).await?;
        self.with_every("delete_consumer_group", nodes, |node| async move {
            match node.delete_consumer_group(topic, group).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await?;
        info!(topic = %topic, group = %group, "Consumer group deleted");
        Ok(())
    }

    /// Remove a topic without consumer groups from topology, then from every node.
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        self.sync_membership();
        let nodes = self.all_nodes_up()?;
        self.topology.delete_topic(topic).await?;
        self.with_every("delete_topic", nodes, |node| async move {
            match node.delete_topic(topic).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await?;
        info!(topic = %topic, "Topic deleted");
        Ok(())
    }

    /// Move a consumer group to the current head on every node.
    pub async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.sync_membership();
        let nodes = self.all_nodes_up()?;
        self.with_every("reset_consumer_group", nodes, |node| async move {
            node.reset_consumer_group(topic, group).await
        })
        .await?;
        info!(topic = %topic, group = %group, "Consumer group reset");
        Ok(())
    }

    /// Counters summed over every readable node.
    pub async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats> {
        self.sync_membership();
        let nodes = self.readable_nodes()?;
        let per_node = self
            .with_every("get_consumer_stats", nodes, |node| async move {
                node.get_consumer_stats(topic, group).await
            })
            .await?;
        let mut total = ConsumerStats::default();
        for (_, stats) in &per_node {
            total.merge(stats);
        }
        Ok(total)
    }

    /// Topic heads of every readable node, keyed by node id.
    pub async fn get_heads(&self) -> Result<BTreeMap<String, BTreeMap<String, u64>>> {
        self.sync_membership();
        let nodes = self.readable_nodes()?;
        let per_node = self
            .with_every("get_heads", nodes, |node| async move { node.get_heads().await })
            .await?;
        Ok(per_node.into_iter().collect())
    }

    /// Topics recorded in topology.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        self.topology.list_topics().await
    }
}

fn routed(node_id: &str, topic: &str, group: &str, delivered: Delivered) -> RoutedMessage {
    RoutedMessage {
        node_id: node_id.to_string(),
        receipt: Receipt::new(node_id, topic, group, delivered.id).encode(),
        id: delivered.id,
        fields: delivered.fields,
        redelivery: delivered.redelivery,
        remaining: delivered.remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::connector::LocalConnector;
    use crate::cluster::coordination::MemoryCoordinationStore;
    use crate::store::{QueueStore, QueueStoreConfig};

    async fn two_node_router() -> (ClusterRouter, Arc<TopologyWatcher>) {
        let topology = Topology::new(Arc::new(MemoryCoordinationStore::new()), "/cq");
        topology.ensure_layout().await.unwrap();
        let connector = Arc::new(LocalConnector::new());
        for id in ["n1", "n2"] {
            let store = QueueStore::open_in_memory(QueueStoreConfig::default())
                .await
                .unwrap();
            connector.register_node(id, Arc::new(store));
            topology
                .register_node(id, &NodeRecord::new("local", 0, vec![]))
                .await
                .unwrap();
            topology.set_node_status(id, Status::Up).await.unwrap();
        }
        let watcher = Arc::new(TopologyWatcher::new(topology));
        watcher.refresh().await.unwrap();
        let config = RouterConfig {
            client_name: "tester".to_string(),
            ..RouterConfig::default()
        };
        (ClusterRouter::new(config, watcher.clone(), connector), watcher)
    }

    #[tokio::test]
    async fn test_uid_format() {
        let (router, _) = two_node_router().await;
        let first = router.next_uid();
        let second = router.next_uid();
        let parts: Vec<&str> = first.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "tester");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2], "0");
        assert!(second.ends_with(":1"));
    }

    #[tokio::test]
    async fn test_rotation_moves_selected_to_back() {
        let (router, _) = two_node_router().await;
        let tried = HashSet::new();
        let (first, _) = router.next_node(Status::is_writable, &tried).unwrap();
        let (second, _) = router.next_node(Status::is_writable, &tried).unwrap();
        let (third, _) = router.next_node(Status::is_writable, &tried).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_membership_follows_watcher() {
        let (router, watcher) = two_node_router().await;
        assert_eq!(router.nodes().len(), 2);

        watcher
            .topology()
            .set_node_status("n2", Status::ForceDown)
            .await
            .unwrap();
        watcher.topology().remove_node("n1").await.unwrap();
        watcher.refresh().await.unwrap();

        assert_eq!(
            router.nodes(),
            vec![("n2".to_string(), Status::ForceDown)]
        );
        let err = router.post_message("orders", {
            let mut f = Fields::new();
            f.insert("message".into(), "x".into());
            f
        })
        .await
        .unwrap_err();
        assert!(err.is_retriable());
    }
}
