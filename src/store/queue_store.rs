//! Per-node queue engine.
//!
//! A `QueueStore` holds every topic, consumer cursor, lease set and retry list of
//! one storage node. All operations are linearized through a single async mutex,
//! so each read-modify-write sequence observes and produces a consistent state,
//! the same guarantee a server-side script gives.
//!
//! # Delivery semantics
//!
//! `get_message` serves, in priority order:
//!
//! 1. the front of the retry ("fail") list, leased again without moving the cursor;
//! 2. nothing, if sweeping expired leases into the retry list hit the id the cursor
//!    was about to hand out (the caller retries);
//! 3. the message at the cursor (`last`), leased for the visibility window;
//! 4. nothing when the cursor is past the head.
//!
//! Messages whose ttl elapsed are never delivered: the head walk skips them and a
//! retry-list entry pointing at one is consumed with [`Error::MessageExpired`].
//!
//! # Invariants
//!
//! - `head` only grows; ids start at 1 and increase by exactly one per post.
//! - `last` only grows, except on `reset_consumer_group`.
//! - An id is never both leased and in the retry list.

use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::engine::{DEFAULT_FLUSH_INTERVAL, KvStore};
use super::keys::{
    MESSAGE_KEY_PREFIX, TOPIC_KEY_PREFIX, decode_topic_key, decode_trailing_id, encode_group_key,
    encode_message_key, encode_topic_key, message_key_prefix,
};
use super::{StoredMessage, now_millis};
use crate::cluster::metrics::{
    MESSAGES_ACKED, MESSAGES_DELIVERED, MESSAGES_FAILED, MESSAGES_POSTED, MESSAGES_PURGED,
};
use crate::constants::{DEFAULT_TOPIC_TTL_SECS, NO_TTL, PAYLOAD_FIELD};
use crate::error::{Error, Result};
use crate::types::{ConsumerStats, Delivered, Fields, Posted};
use crate::validation::{validate_group_name, validate_topic_name};

/// Persisted topic metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TopicMeta {
    ttl_secs: i64,
    head: u64,
    groups: BTreeSet<String>,
}

/// Persisted consumer group state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct GroupState {
    /// Next id the head walk hands out.
    last: u64,
    /// Leased ids and their lease expiry (epoch ms); `None` never expires.
    processing: BTreeMap<u64, Option<i64>>,
    /// Ids awaiting redelivery, front first.
    fails: VecDeque<u64>,
}

impl GroupState {
    fn starting_after(head: u64) -> Self {
        Self {
            last: head + 1,
            ..Default::default()
        }
    }

    fn undelivered(&self, head: u64) -> u64 {
        (head + 1).saturating_sub(self.last)
    }

    fn lease(&mut self, id: u64, window: Option<Duration>, now_ms: i64) {
        let expiry = window.map(|w| now_ms.saturating_add(w.as_millis() as i64));
        self.processing.insert(id, expiry);
    }

    fn push_fail(&mut self, id: u64) {
        if !self.fails.contains(&id) {
            self.fails.push_back(id);
        }
    }
}

/// Configuration for a [`QueueStore`].
#[derive(Debug, Clone)]
pub struct QueueStoreConfig {
    /// Ttl for topics created without one; `-1` disables expiry.
    pub default_ttl_secs: i64,
    pub flush_interval: Duration,
}

impl Default for QueueStoreConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TOPIC_TTL_SECS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

pub struct QueueStore {
    kv: KvStore,
    config: QueueStoreConfig,
    op_lock: Mutex<()>,
}

impl QueueStore {
    pub async fn open(
        object_store: Arc<dyn ObjectStore>,
        path: &str,
        config: QueueStoreConfig,
    ) -> Result<Self> {
        let kv = KvStore::open(object_store, path, config.flush_interval).await?;
        info!(path = %path, default_ttl_secs = config.default_ttl_secs, "Queue store opened");
        Ok(Self {
            kv,
            config,
            op_lock: Mutex::new(()),
        })
    }

    /// Open a store on a fresh in-memory object store.
    pub async fn open_in_memory(config: QueueStoreConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        Self::open(store, "queue", config).await
    }

    async fn load_topic(&self, topic: &str) -> Result<TopicMeta> {
        self.kv
            .get(&encode_topic_key(topic))
            .await?
            .ok_or_else(|| Error::NoSuchTopic(topic.to_string()))
    }

    async fn load_group(&self, topic: &str, group: &str) -> Result<GroupState> {
        self.kv
            .get(&encode_group_key(topic, group))
            .await?
            .ok_or_else(|| Error::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })
    }

    async fn save_topic(&self, topic: &str, meta: &TopicMeta) -> Result<()> {
        self.kv.put(&encode_topic_key(topic), meta).await
    }

    async fn save_group(&self, topic: &str, group: &str, state: &GroupState) -> Result<()> {
        self.kv.put(&encode_group_key(topic, group), state).await
    }

    /// Message at `id` if it exists and has not expired.
    async fn load_live_message(
        &self,
        topic: &str,
        id: u64,
        now_ms: i64,
    ) -> Result<Option<StoredMessage>> {
        let msg: Option<StoredMessage> = self.kv.get(&encode_message_key(topic, id)).await?;
        Ok(msg.filter(|m| !m.is_expired(now_ms)))
    }

    pub async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()> {
        validate_topic_name(topic)?;
        let ttl_secs = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        if ttl_secs != NO_TTL && ttl_secs <= 0 {
            return Err(Error::Invalid(format!(
                "ttl must be positive or {}, got {}",
                NO_TTL, ttl_secs
            )));
        }

        let _guard = self.op_lock.lock().await;
        if self.kv.get_raw(&encode_topic_key(topic)).await?.is_some() {
            return Err(Error::AlreadyExists(format!("Topic {}", topic)));
        }

        let meta = TopicMeta {
            ttl_secs,
            ..Default::default()
        };
        self.save_topic(topic, &meta).await?;
        info!(topic = %topic, ttl_secs, "Topic created");
        Ok(())
    }

    pub async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        validate_group_name(group)?;

        let _guard = self.op_lock.lock().await;
        let mut meta = self.load_topic(topic).await?;
        if meta.groups.contains(group) {
            return Err(Error::AlreadyExists(format!(
                "Consumer group {} on topic {}",
                group, topic
            )));
        }

        let state = GroupState::starting_after(meta.head);
        self.save_group(topic, group, &state).await?;
        meta.groups.insert(group.to_string());
        self.save_topic(topic, &meta).await?;
        info!(topic = %topic, group = %group, starts_at = state.last, "Consumer group created");
        Ok(())
    }

    /// Append a message; its id is the new topic head.
    pub async fn post_message(&self, topic: &str, fields: Fields) -> Result<Posted> {
        if !fields.contains_key(PAYLOAD_FIELD) {
            return Err(Error::MissingPayload(PAYLOAD_FIELD.to_string()));
        }

        let _guard = self.op_lock.lock().await;
        let mut meta = self.load_topic(topic).await?;
        let id = meta.head + 1;

        let msg = StoredMessage::new(fields, meta.ttl_secs, now_millis());
        self.kv.put(&encode_message_key(topic, id), &msg).await?;
        meta.head = id;
        self.save_topic(topic, &meta).await?;

        MESSAGES_POSTED.with_label_values(&[topic]).inc();
        debug!(topic = %topic, id, "Message posted");
        Ok(Posted {
            id,
            ttl: meta.ttl_secs,
        })
    }

    /// Write a message at an explicit id, as replayed from a journal.
    ///
    /// Returns `false` without touching anything when a record already exists at
    /// `id`. The head is raised to `id` if it was lower.
    pub async fn restore_message(&self, topic: &str, id: u64, fields: Fields) -> Result<bool> {
        if id == 0 {
            return Err(Error::Invalid("message ids start at 1".to_string()));
        }

        let _guard = self.op_lock.lock().await;
        let mut meta = self.load_topic(topic).await?;
        let key = encode_message_key(topic, id);
        if self.kv.get_raw(&key).await?.is_some() {
            return Ok(false);
        }

        let msg = StoredMessage::new(fields, meta.ttl_secs, now_millis());
        self.kv.put(&key, &msg).await?;
        if id > meta.head {
            meta.head = id;
            self.save_topic(topic, &meta).await?;
        }
        Ok(true)
    }

    /// Lease the next message for `group`; `None` when nothing is available.
    ///
    /// `window` is the visibility window; `None` leases forever.
    pub async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<Delivered>> {
        let _guard = self.op_lock.lock().await;
        let meta = self.load_topic(topic).await?;
        let mut state = self.load_group(topic, group).await?;
        let now = now_millis();

        if let Some(id) = state.fails.pop_front() {
            let Some(msg) = self.load_live_message(topic, id, now).await? else {
                self.save_group(topic, group, &state).await?;
                warn!(topic = %topic, group = %group, id, "Retry entry expired before redelivery");
                return Err(Error::MessageExpired {
                    topic: topic.to_string(),
                    id,
                });
            };
            state.lease(id, window, now);
            self.save_group(topic, group, &state).await?;
            MESSAGES_DELIVERED.with_label_values(&[topic, "true"]).inc();
            return Ok(Some(Delivered {
                id,
                fields: msg.fields,
                redelivery: true,
                remaining: state.undelivered(meta.head) + state.fails.len() as u64,
            }));
        }

        let expired: Vec<u64> = state
            .processing
            .iter()
            .filter(|(_, expiry)| expiry.is_some_and(|at| at <= now))
            .map(|(id, _)| *id)
            .collect();

        if !expired.is_empty() {
            let mut requeued = 0;
            for id in expired {
                state.processing.remove(&id);
                if self.load_live_message(topic, id, now).await?.is_some() {
                    state.push_fail(id);
                    requeued += 1;
                }
            }
            self.save_group(topic, group, &state).await?;
            debug!(topic = %topic, group = %group, requeued, fails = state.fails.len(), "Swept expired leases");
            // Requeued ids go out before anything new, starting with the next call.
            if requeued > 0 {
                return Ok(None);
            }
        }

        while state.last <= meta.head {
            let id = state.last;
            state.last += 1;
            if let Some(msg) = self.load_live_message(topic, id, now).await? {
                state.lease(id, window, now);
                self.save_group(topic, group, &state).await?;
                MESSAGES_DELIVERED.with_label_values(&[topic, "false"]).inc();
                return Ok(Some(Delivered {
                    id,
                    fields: msg.fields,
                    redelivery: false,
                    remaining: state.undelivered(meta.head) + state.fails.len() as u64,
                }));
            }
        }

        self.save_group(topic, group, &state).await?;
        Ok(None)
    }

    pub async fn ack_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.load_topic(topic).await?;
        let mut state = self.load_group(topic, group).await?;

        if state.processing.remove(&id).is_none() {
            return Err(Error::NothingToAck {
                topic: topic.to_string(),
                group: group.to_string(),
                id,
            });
        }
        self.save_group(topic, group, &state).await?;
        MESSAGES_ACKED.with_label_values(&[topic]).inc();
        debug!(topic = %topic, group = %group, id, "Message acked");
        Ok(())
    }

    /// Queue `id` for redelivery ahead of new messages.
    ///
    /// Succeeds whether or not the lease already expired; an id already in the
    /// retry list keeps its position.
    pub async fn fail_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let meta = self.load_topic(topic).await?;
        let mut state = self.load_group(topic, group).await?;

        if id == 0 || id > meta.head {
            return Err(Error::Invalid(format!(
                "message {} is outside topic {} (head {})",
                id, topic, meta.head
            )));
        }

        state.processing.remove(&id);
        state.push_fail(id);
        self.save_group(topic, group, &state).await?;
        MESSAGES_FAILED.with_label_values(&[topic]).inc();
        debug!(topic = %topic, group = %group, id, "Message failed");
        Ok(())
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let _guard = self.op_lock.lock().await;
        Ok(self
            .kv
            .scan_prefix(&[TOPIC_KEY_PREFIX])
            .await?
            .iter()
            .filter_map(|(key, _)| decode_topic_key(key))
            .collect())
    }

    pub async fn get_consumer_groups(&self, topic: &str) -> Result<Vec<String>> {
        let _guard = self.op_lock.lock().await;
        Ok(self.load_topic(topic).await?.groups.into_iter().collect())
    }

    pub async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats> {
        let _guard = self.op_lock.lock().await;
        let meta = self.load_topic(topic).await?;
        let state = self.load_group(topic, group).await?;
        Ok(ConsumerStats {
            lag: state.undelivered(meta.head),
            fails: state.fails.len() as u64,
            processing: state.processing.len() as u64,
        })
    }

    pub async fn get_head(&self, topic: &str) -> Result<u64> {
        let _guard = self.op_lock.lock().await;
        Ok(self.load_topic(topic).await?.head)
    }

    /// Head of every topic on this node.
    pub async fn get_heads(&self) -> Result<BTreeMap<String, u64>> {
        let _guard = self.op_lock.lock().await;
        let mut heads = BTreeMap::new();
        for (key, value) in self.kv.scan_prefix(&[TOPIC_KEY_PREFIX]).await? {
            if let Some(topic) = decode_topic_key(&key) {
                let meta: TopicMeta = bincode::deserialize(&value)?;
                heads.insert(topic, meta.head);
            }
        }
        Ok(heads)
    }

    /// Skip the backlog and drop all leases and retries of `group`.
    pub async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let meta = self.load_topic(topic).await?;
        self.load_group(topic, group).await?;
        self.save_group(topic, group, &GroupState::starting_after(meta.head))
            .await?;
        info!(topic = %topic, group = %group, head = meta.head, "Consumer group reset");
        Ok(())
    }

    pub async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let mut meta = self.load_topic(topic).await?;
        if !meta.groups.remove(group) {
            return Err(Error::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            });
        }
        self.kv.delete(&encode_group_key(topic, group)).await?;
        self.save_topic(topic, &meta).await?;
        info!(topic = %topic, group = %group, "Consumer group deleted");
        Ok(())
    }

    /// Delete a topic and its messages. Refused while consumer groups remain.
    pub async fn delete_topic(&self, topic: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let meta = self.load_topic(topic).await?;
        if !meta.groups.is_empty() {
            return Err(Error::TopicInUse(topic.to_string()));
        }

        for (key, _) in self.kv.scan_prefix(&message_key_prefix(topic)).await? {
            self.kv.delete(&key).await?;
        }
        self.kv.delete(&encode_topic_key(topic)).await?;
        info!(topic = %topic, "Topic deleted");
        Ok(())
    }

    /// Delete every message whose ttl elapsed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;
        for (key, value) in self.kv.scan_prefix(&[MESSAGE_KEY_PREFIX]).await? {
            let msg: StoredMessage = bincode::deserialize(&value)?;
            if msg.is_expired(now) {
                self.kv.delete(&key).await?;
                removed += 1;
                debug!(id = ?decode_trailing_id(&key), "Purged expired message");
            }
        }
        if removed > 0 {
            MESSAGES_PURGED
                .with_label_values(&["queue"])
                .inc_by(removed as u64);
            info!(removed, "Purged expired messages");
        }
        Ok(removed)
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }

    pub async fn close(&self) -> Result<()> {
        self.kv.close().await
    }
}
