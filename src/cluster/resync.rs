//! Structural repair and journal replay.
//!
//! Both steps only ever add to a node: missing topics and consumer groups are
//! created from topology, and journal entries above the node's own head are
//! restored at their original ids. Running them again after a partial failure
//! therefore picks up where the previous run stopped.
//!
//! The orchestrator runs them when a node rejoins; [`ColdResync`] runs them
//! once for a single node outside any orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::metrics::{REPAIRS, record_replayed};
use super::topology::{ClusterSnapshot, Topology, TopicView};
use super::traits::{Connector, JournalNode, QueueNode};
use crate::error::{Error, Result};

/// What [`repair_structure`] created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub topics_created: Vec<String>,
    /// `(topic, group)` pairs.
    pub groups_created: Vec<(String, String)>,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.topics_created.is_empty() && self.groups_created.is_empty()
    }
}

/// Create on `node` every topic and consumer group of `topics` it lacks.
pub async fn repair_structure(
    node_id: &str,
    node: &dyn QueueNode,
    topics: &BTreeMap<String, TopicView>,
) -> Result<RepairReport> {
    let mut report = RepairReport::default();
    let present: BTreeSet<String> = node.list_topics().await?.into_iter().collect();

    for (topic, view) in topics {
        if !present.contains(topic) {
            match node.create_topic(topic, Some(view.ttl)).await {
                Ok(()) => {
                    REPAIRS.with_label_values(&["topic"]).inc();
                    report.topics_created.push(topic.clone());
                }
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }

        let groups: BTreeSet<String> = node.get_consumer_groups(topic).await?.into_iter().collect();
        for group in view.groups.difference(&groups) {
            match node.create_consumer_group(topic, group).await {
                Ok(()) => {
                    REPAIRS.with_label_values(&["group"]).inc();
                    report.groups_created.push((topic.clone(), group.clone()));
                }
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e),
            }
        }
    }

    if !report.is_empty() {
        info!(
            node_id = %node_id,
            topics = report.topics_created.len(),
            groups = report.groups_created.len(),
            "Repaired node structure"
        );
    }
    Ok(report)
}

/// Restore on `node` every journal entry above the node's head, per topic.
///
/// Returns the number of messages written.
pub async fn replay_from_journal<'a>(
    node_id: &str,
    node: &dyn QueueNode,
    journal: &dyn JournalNode,
    topics: impl IntoIterator<Item = &'a String>,
) -> Result<u64> {
    let mut replayed = 0u64;
    for topic in topics {
        let head = node.get_head(topic).await?;
        let entries = journal.retrieve_messages(node_id, topic, head + 1).await?;
        if entries.is_empty() {
            continue;
        }
        let mut restored = 0u64;
        for entry in entries {
            if node.restore_message(topic, entry.id, entry.fields).await? {
                restored += 1;
            }
        }
        debug!(node_id = %node_id, topic = %topic, from = head + 1, restored, "Replayed topic");
        replayed += restored;
    }
    record_replayed(node_id, replayed);
    if replayed > 0 {
        info!(node_id = %node_id, replayed, "Replayed messages from journal");
    }
    Ok(replayed)
}

/// Result of one [`ColdResync::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub repair: RepairReport,
    /// Journal used for replay, if replay ran.
    pub journal_id: Option<String>,
    pub replayed: u64,
}

/// One-shot repair and replay of a single node.
pub struct ColdResync {
    topology: Topology,
    connector: Arc<dyn Connector>,
}

impl ColdResync {
    pub fn new(topology: Topology, connector: Arc<dyn Connector>) -> Self {
        Self {
            topology,
            connector,
        }
    }

    /// Bring `node_id` in line with topology.
    ///
    /// With `replay`, messages come from `journal_id` or, when `None`, from the
    /// longest-running UP journal the node declares.
    pub async fn run(
        &self,
        node_id: &str,
        journal_id: Option<&str>,
        replay: bool,
    ) -> Result<ResyncReport> {
        let snapshot = self.topology.snapshot().await?;
        self.run_with_snapshot(&snapshot, node_id, journal_id, replay)
            .await
    }

    pub async fn run_with_snapshot(
        &self,
        snapshot: &ClusterSnapshot,
        node_id: &str,
        journal_id: Option<&str>,
        replay: bool,
    ) -> Result<ResyncReport> {
        let node_record = snapshot
            .nodes
            .get(node_id)
            .ok_or_else(|| Error::NoSuchNode(node_id.to_string()))?;
        let node = self
            .connector
            .connect_node(node_id, &node_record.record)
            .await?;

        let mut report = ResyncReport {
            repair: repair_structure(node_id, node.as_ref(), &snapshot.topics).await?,
            ..ResyncReport::default()
        };
        if !replay {
            return Ok(report);
        }

        let journal_id = match journal_id {
            Some(id) => id.to_string(),
            None => snapshot.freshest_journal(&node_record.record.journals).ok_or_else(|| {
                Error::Unavailable(format!("node {} has no UP journal to replay from", node_id))
            })?,
        };
        let journal_record = snapshot
            .journals
            .get(&journal_id)
            .ok_or_else(|| Error::NoSuchJournal(journal_id.clone()))?;
        let journal = self
            .connector
            .connect_journal(&journal_id, &journal_record.record)
            .await?;

        report.replayed =
            replay_from_journal(node_id, node.as_ref(), journal.as_ref(), snapshot.topics.keys())
                .await?;
        if report.replayed == 0 {
            debug!(node_id = %node_id, journal_id = %journal_id, "Replay found nothing to restore");
        }
        report.journal_id = Some(journal_id);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NO_TTL;
    use crate::store::{JournalStore, QueueStore, QueueStoreConfig};
    use crate::types::Fields;

    fn msg(body: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("message".to_string(), body.to_string());
        fields
    }

    fn topics() -> BTreeMap<String, TopicView> {
        let mut topics = BTreeMap::new();
        topics.insert(
            "orders".to_string(),
            TopicView {
                ttl: NO_TTL,
                groups: ["billing".to_string()].into_iter().collect(),
            },
        );
        topics
    }

    #[tokio::test]
    async fn test_repair_creates_missing_and_is_idempotent() {
        let node = QueueStore::open_in_memory(QueueStoreConfig::default())
            .await
            .unwrap();
        let first = repair_structure("n1", &node, &topics()).await.unwrap();
        assert_eq!(first.topics_created, vec!["orders"]);
        assert_eq!(
            first.groups_created,
            vec![("orders".to_string(), "billing".to_string())]
        );

        let second = repair_structure("n1", &node, &topics()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_replay_restores_above_head_only() {
        let node = QueueStore::open_in_memory(QueueStoreConfig::default())
            .await
            .unwrap();
        let journal = JournalStore::open_in_memory().await.unwrap();
        node.create_topic("orders", Some(NO_TTL)).await.unwrap();
        node.post_message("orders", msg("a")).await.unwrap();
        let repair = repair_structure("n1", &node, &topics()).await.unwrap();
        assert!(repair.topics_created.is_empty());
        assert_eq!(repair.groups_created.len(), 1);
        for id in 1..=3 {
            journal
                .write("n1", "orders", id, msg(&format!("m{}", id)), NO_TTL)
                .await
                .unwrap();
        }

        let names: Vec<String> = vec!["orders".to_string()];
        assert_eq!(
            replay_from_journal("n1", &node, &journal, &names).await.unwrap(),
            2
        );
        assert_eq!(node.get_head("orders").await.unwrap(), 3);
        assert_eq!(
            replay_from_journal("n1", &node, &journal, &names).await.unwrap(),
            0
        );

        // Replayed messages are visible to groups created before the replay.
        let first = node.get_message("orders", "billing", None).await.unwrap().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(first.fields["message"], "m2");
    }
}
