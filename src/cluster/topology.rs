//! Typed view of the cluster layout in the coordination store.
//!
//! ```text
//! {root}/nodes/{node_id}                        NodeRecord (JSON)
//! {root}/journals/{journal_id}                  JournalRecord (JSON)
//! {root}/topics/{topic}                         TopicRecord (JSON)
//! {root}/topics/{topic}/consumerGroups/{group}  (empty)
//! ```
//!
//! Orchestrators write node and journal records with the version they read
//! them at; administrators go through the `set_*_status` helpers, which retry
//! their read-modify-write on version races.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::coordination::{CoordinationStore, ensure_path, join_path};
use super::retry::{with_coordination_policy, with_fast_policy};
use crate::constants::DEFAULT_TOPIC_TTL_SECS;
use crate::error::{Error, Result};
use crate::types::Status;
use crate::validation::{validate_group_name, validate_member_id, validate_topic_name};

const NODES: &str = "nodes";
const JOURNALS: &str = "journals";
const TOPICS: &str = "topics";
const CONSUMER_GROUPS: &str = "consumerGroups";

fn default_status() -> Status {
    Status::Down
}

/// Metadata of one storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_status")]
    pub status: Status,
    /// Failed health checks seen by any orchestrator.
    #[serde(default)]
    pub errors: u64,
    /// Orchestrators currently reporting the node unreachable.
    #[serde(default)]
    pub orchestrator_errors: Vec<String>,
    /// Journals every accepted write must be replicated to.
    #[serde(default)]
    pub journals: Vec<String>,
}

impl NodeRecord {
    /// A freshly registered node starts DOWN until an orchestrator admits it.
    pub fn new(host: impl Into<String>, port: u16, journals: Vec<String>) -> Self {
        Self {
            host: host.into(),
            port,
            status: Status::Down,
            errors: 0,
            orchestrator_errors: Vec::new(),
            journals,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Metadata of one journal node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_status")]
    pub status: Status,
    #[serde(default)]
    pub errors: u64,
    /// Epoch milliseconds of the last transition to UP.
    #[serde(default)]
    pub start_date: i64,
    #[serde(default)]
    pub orchestrator_errors: Vec<String>,
}

impl JournalRecord {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            status: Status::Down,
            errors: 0,
            start_date: 0,
            orchestrator_errors: Vec::new(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Data stored at a topic path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub ttl: i64,
}

/// A topic together with its consumer groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicView {
    pub ttl: i64,
    pub groups: BTreeSet<String>,
}

/// A record and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord<T> {
    pub record: T,
    pub version: u64,
}

/// Everything below the cluster root at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterSnapshot {
    pub nodes: BTreeMap<String, VersionedRecord<NodeRecord>>,
    pub journals: BTreeMap<String, VersionedRecord<JournalRecord>>,
    pub topics: BTreeMap<String, TopicView>,
}

impl ClusterSnapshot {
    /// Among `journal_ids`, the UP journal that has been up the longest.
    ///
    /// That journal has seen every write since it came up, so it holds the
    /// most complete log for replay.
    pub fn freshest_journal(&self, journal_ids: &[String]) -> Option<String> {
        journal_ids
            .iter()
            .filter_map(|id| self.journals.get(id).map(|j| (id, &j.record)))
            .filter(|(_, record)| record.status == Status::Up)
            .min_by_key(|(id, record)| (record.start_date, (*id).clone()))
            .map(|(id, _)| id.clone())
    }
}

#[derive(Clone)]
pub struct Topology {
    store: Arc<dyn CoordinationStore>,
    root: String,
}

impl Topology {
    pub fn new(store: Arc<dyn CoordinationStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn collection(&self, name: &str) -> String {
        join_path(&self.root, name)
    }

    pub fn node_path(&self, node_id: &str) -> String {
        join_path(&self.collection(NODES), node_id)
    }

    pub fn journal_path(&self, journal_id: &str) -> String {
        join_path(&self.collection(JOURNALS), journal_id)
    }

    pub fn topic_path(&self, topic: &str) -> String {
        join_path(&self.collection(TOPICS), topic)
    }

    fn groups_path(&self, topic: &str) -> String {
        join_path(&self.topic_path(topic), CONSUMER_GROUPS)
    }

    pub fn group_path(&self, topic: &str, group: &str) -> String {
        join_path(&self.groups_path(topic), group)
    }

    /// Create the root and its `nodes`, `journals` and `topics` collections.
    pub async fn ensure_layout(&self) -> Result<()> {
        for name in [NODES, JOURNALS, TOPICS] {
            let path = self.collection(name);
            with_coordination_policy(
                || ensure_path(self.store.as_ref(), &path),
                |e| e.is_retriable(),
            )
            .await?;
        }
        debug!(root = %self.root, "Cluster layout ensured");
        Ok(())
    }

    pub async fn register_node(&self, node_id: &str, record: &NodeRecord) -> Result<()> {
        validate_member_id(node_id)?;
        for journal_id in &record.journals {
            validate_member_id(journal_id)?;
        }
        match self
            .store
            .create(&self.node_path(node_id), serde_json::to_vec(record)?)
            .await
        {
            Ok(()) => {
                info!(node_id = %node_id, addr = %record.addr(), "Node registered");
                Ok(())
            }
            Err(Error::NodeExists(_)) => Err(Error::AlreadyExists(format!("node {}", node_id))),
            Err(e) => Err(e),
        }
    }

    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        match self.store.delete(&self.node_path(node_id), None).await {
            Ok(()) => {
                info!(node_id = %node_id, "Node removed");
                Ok(())
            }
            Err(Error::NoNode(_)) => Err(Error::NoSuchNode(node_id.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn register_journal(&self, journal_id: &str, record: &JournalRecord) -> Result<()> {
        validate_member_id(journal_id)?;
        match self
            .store
            .create(&self.journal_path(journal_id), serde_json::to_vec(record)?)
            .await
        {
            Ok(()) => {
                info!(journal_id = %journal_id, addr = %record.addr(), "Journal registered");
                Ok(())
            }
            Err(Error::NodeExists(_)) => {
                Err(Error::AlreadyExists(format!("journal {}", journal_id)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn remove_journal(&self, journal_id: &str) -> Result<()> {
        match self.store.delete(&self.journal_path(journal_id), None).await {
            Ok(()) => {
                info!(journal_id = %journal_id, "Journal removed");
                Ok(())
            }
            Err(Error::NoNode(_)) => Err(Error::NoSuchJournal(journal_id.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn get_node(&self, node_id: &str) -> Result<VersionedRecord<NodeRecord>> {
        match self.store.get(&self.node_path(node_id)).await {
            Ok(v) => Ok(VersionedRecord {
                record: serde_json::from_slice(&v.data)?,
                version: v.version,
            }),
            Err(Error::NoNode(_)) => Err(Error::NoSuchNode(node_id.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn get_journal(&self, journal_id: &str) -> Result<VersionedRecord<JournalRecord>> {
        match self.store.get(&self.journal_path(journal_id)).await {
            Ok(v) => Ok(VersionedRecord {
                record: serde_json::from_slice(&v.data)?,
                version: v.version,
            }),
            Err(Error::NoNode(_)) => Err(Error::NoSuchJournal(journal_id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Version-checked write of a node record. Returns the new version.
    ///
    /// `BadVersion` and `NoNode` are passed through untouched so callers can
    /// tell a lost race from a real failure.
    pub async fn update_node(
        &self,
        node_id: &str,
        record: &NodeRecord,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.store
            .set(
                &self.node_path(node_id),
                serde_json::to_vec(record)?,
                expected_version,
            )
            .await
    }

    /// Version-checked write of a journal record. Returns the new version.
    pub async fn update_journal(
        &self,
        journal_id: &str,
        record: &JournalRecord,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        self.store
            .set(
                &self.journal_path(journal_id),
                serde_json::to_vec(record)?,
                expected_version,
            )
            .await
    }

    /// Administrative status change of a node.
    pub async fn set_node_status(&self, node_id: &str, status: Status) -> Result<()> {
        with_fast_policy(
            || async move {
                let current = self.get_node(node_id).await?;
                let mut record = current.record;
                record.status = status;
                if status == Status::Up {
                    record.orchestrator_errors.clear();
                }
                self.update_node(node_id, &record, Some(current.version))
                    .await
                    .map(|_| ())
            },
            |e| matches!(e, Error::BadVersion { .. }) || e.is_retriable(),
        )
        .await?;
        info!(node_id = %node_id, status = %status, "Node status set");
        Ok(())
    }

    /// Administrative status change of a journal. Journals have no READONLY state.
    pub async fn set_journal_status(&self, journal_id: &str, status: Status) -> Result<()> {
        if status == Status::ReadOnly {
            return Err(Error::Invalid(
                "journals cannot be set to READONLY".to_string(),
            ));
        }
        with_fast_policy(
            || async move {
                let current = self.get_journal(journal_id).await?;
                let mut record = current.record;
                if status == Status::Up && record.status != Status::Up {
                    record.start_date = crate::store::now_millis();
                    record.orchestrator_errors.clear();
                }
                record.status = status;
                self.update_journal(journal_id, &record, Some(current.version))
                    .await
                    .map(|_| ())
            },
            |e| matches!(e, Error::BadVersion { .. }) || e.is_retriable(),
        )
        .await?;
        info!(journal_id = %journal_id, status = %status, "Journal status set");
        Ok(())
    }

    pub async fn create_topic(&self, topic: &str, ttl_secs: i64) -> Result<()> {
        validate_topic_name(topic)?;
        let data = serde_json::to_vec(&TopicRecord { ttl: ttl_secs })?;
        match self.store.create(&self.topic_path(topic), data).await {
            Ok(()) => {}
            Err(Error::NodeExists(_)) => return Err(Error::AlreadyExists(format!("topic {}", topic))),
            Err(e) => return Err(e),
        }
        match self
            .store
            .create(&self.groups_path(topic), Vec::new())
            .await
        {
            Ok(()) | Err(Error::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
        info!(topic = %topic, ttl_secs, "Topic recorded");
        Ok(())
    }

    pub async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        validate_group_name(group)?;
        if !self.store.exists(&self.topic_path(topic)).await? {
            return Err(Error::NoSuchTopic(topic.to_string()));
        }
        // Topics written by older tooling may lack the collection node.
        match self
            .store
            .create(&self.groups_path(topic), Vec::new())
            .await
        {
            Ok(()) | Err(Error::NodeExists(_)) => {}
            Err(e) => return Err(e),
        }
        match self
            .store
            .create(&self.group_path(topic, group), Vec::new())
            .await
        {
            Ok(()) => {
                info!(topic = %topic, group = %group, "Consumer group recorded");
                Ok(())
            }
            Err(Error::NodeExists(_)) => Err(Error::AlreadyExists(format!(
                "consumer group {} on topic {}",
                group, topic
            ))),
            Err(Error::NoNode(_)) => Err(Error::NoSuchTopic(topic.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        match self
            .store
            .delete(&self.group_path(topic, group), None)
            .await
        {
            Ok(()) => {
                info!(topic = %topic, group = %group, "Consumer group removed");
                Ok(())
            }
            Err(Error::NoNode(_)) => Err(Error::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Remove a topic that has no consumer groups left.
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        let view = self.get_topic(topic).await?;
        if !view.groups.is_empty() {
            return Err(Error::TopicInUse(topic.to_string()));
        }
        match self.store.delete(&self.groups_path(topic), None).await {
            Ok(()) | Err(Error::NoNode(_)) => {}
            Err(e) => return Err(e),
        }
        match self.store.delete(&self.topic_path(topic), None).await {
            Ok(()) => {
                info!(topic = %topic, "Topic removed");
                Ok(())
            }
            Err(Error::NoNode(_)) => Err(Error::NoSuchTopic(topic.to_string())),
            // A group was added between the check and the delete.
            Err(Error::Invalid(_)) => Err(Error::TopicInUse(topic.to_string())),
            Err(e) => Err(e),
        }
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        match self.store.children(&self.collection(TOPICS)).await {
            Ok(topics) => Ok(topics),
            Err(Error::NoNode(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_topic(&self, topic: &str) -> Result<TopicView> {
        let data = match self.store.get(&self.topic_path(topic)).await {
            Ok(v) => v.data,
            Err(Error::NoNode(_)) => return Err(Error::NoSuchTopic(topic.to_string())),
            Err(e) => return Err(e),
        };
        let ttl = parse_topic_ttl(topic, &data);
        let groups = match self.store.children(&self.groups_path(topic)).await {
            Ok(groups) => groups.into_iter().collect(),
            Err(Error::NoNode(_)) => BTreeSet::new(),
            Err(e) => return Err(e),
        };
        Ok(TopicView { ttl, groups })
    }

    /// Read the whole layout.
    ///
    /// Records that vanish between listing and reading are left out, as are
    /// records whose data cannot be parsed.
    pub async fn snapshot(&self) -> Result<ClusterSnapshot> {
        with_coordination_policy(|| self.read_snapshot(), |e| e.is_retriable()).await
    }

    async fn read_snapshot(&self) -> Result<ClusterSnapshot> {
        let mut snapshot = ClusterSnapshot::default();

        for node_id in self.children_or_empty(&self.collection(NODES)).await? {
            match self.get_node(&node_id).await {
                Ok(record) => {
                    snapshot.nodes.insert(node_id, record);
                }
                Err(Error::NoSuchNode(_)) => {}
                Err(Error::Protocol(e)) => {
                    warn!(node_id = %node_id, error = %e, "Skipping unreadable node record");
                }
                Err(e) => return Err(e),
            }
        }

        for journal_id in self.children_or_empty(&self.collection(JOURNALS)).await? {
            match self.get_journal(&journal_id).await {
                Ok(record) => {
                    snapshot.journals.insert(journal_id, record);
                }
                Err(Error::NoSuchJournal(_)) => {}
                Err(Error::Protocol(e)) => {
                    warn!(journal_id = %journal_id, error = %e, "Skipping unreadable journal record");
                }
                Err(e) => return Err(e),
            }
        }

        for topic in self.children_or_empty(&self.collection(TOPICS)).await? {
            match self.get_topic(&topic).await {
                Ok(view) => {
                    snapshot.topics.insert(topic, view);
                }
                Err(Error::NoSuchTopic(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(snapshot)
    }

    async fn children_or_empty(&self, path: &str) -> Result<Vec<String>> {
        match self.store.children(path).await {
            Ok(children) => Ok(children),
            Err(Error::NoNode(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn parse_topic_ttl(topic: &str, data: &[u8]) -> i64 {
    if data.is_empty() {
        return DEFAULT_TOPIC_TTL_SECS;
    }
    match serde_json::from_slice::<TopicRecord>(data) {
        Ok(record) => record.ttl,
        Err(e) => {
            warn!(topic = %topic, error = %e, "Unreadable topic record, using default ttl");
            DEFAULT_TOPIC_TTL_SECS
        }
    }
}
