//! Append-only message logs kept by a journal node.
//!
//! A journal holds one log per (node, topic) pair, keyed by the id the node
//! assigned. Writes overwrite in place, so replaying the same write is harmless.
//! Each log tracks its own head, raised to the largest id ever written.

use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::engine::KvStore;
use super::keys::{
    JOURNAL_MESSAGE_KEY_PREFIX, decode_head, decode_trailing_id, encode_head,
    encode_journal_head_key, encode_journal_message_key, journal_message_key_prefix, prefix_end,
};
use super::{StoredMessage, now_millis};
use crate::cluster::metrics::MESSAGES_PURGED;
use crate::error::{Error, Result};
use crate::types::{Fields, JournalEntry};

pub struct JournalStore {
    kv: KvStore,
    write_lock: Mutex<()>,
}

impl JournalStore {
    pub async fn open(
        object_store: Arc<dyn ObjectStore>,
        path: &str,
        flush_interval: Duration,
    ) -> Result<Self> {
        let kv = KvStore::open(object_store, path, flush_interval).await?;
        info!(path = %path, "Journal store opened");
        Ok(Self {
            kv,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a journal on a fresh in-memory object store.
    pub async fn open_in_memory() -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
        Self::open(store, "journal", super::engine::DEFAULT_FLUSH_INTERVAL).await
    }

    /// Record `fields` at `id` in the log of (`node_id`, `topic`).
    pub async fn write(
        &self,
        node_id: &str,
        topic: &str,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    ) -> Result<()> {
        if id == 0 {
            return Err(Error::Invalid("message ids start at 1".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let msg = StoredMessage::new(fields, ttl_secs, now_millis());
        self.kv
            .put(&encode_journal_message_key(node_id, topic, id), &msg)
            .await?;

        let head_key = encode_journal_head_key(node_id, topic);
        let head = self
            .kv
            .get_raw(&head_key)
            .await?
            .map(|b| decode_head(&b))
            .unwrap_or(0);
        if id > head {
            self.kv.put_raw(&head_key, &encode_head(id)).await?;
        }

        debug!(node_id = %node_id, topic = %topic, id, "Journal write");
        Ok(())
    }

    /// Every unexpired message with id `>= from_id`, ascending.
    pub async fn retrieve_messages(
        &self,
        node_id: &str,
        topic: &str,
        from_id: u64,
    ) -> Result<Vec<JournalEntry>> {
        let prefix = journal_message_key_prefix(node_id, topic);
        let start = encode_journal_message_key(node_id, topic, from_id.max(1));
        let end = prefix_end(&prefix);
        let now = now_millis();

        let mut entries = Vec::new();
        for (key, value) in self.kv.scan_range(&start, &end).await? {
            let Some(id) = decode_trailing_id(&key) else {
                continue;
            };
            let msg: StoredMessage = bincode::deserialize(&value)?;
            if !msg.is_expired(now) {
                entries.push(JournalEntry {
                    id,
                    fields: msg.fields,
                });
            }
        }
        Ok(entries)
    }

    /// Largest id ever written for (`node_id`, `topic`); 0 when none.
    pub async fn get_head(&self, node_id: &str, topic: &str) -> Result<u64> {
        Ok(self
            .kv
            .get_raw(&encode_journal_head_key(node_id, topic))
            .await?
            .map(|b| decode_head(&b))
            .unwrap_or(0))
    }

    /// Delete every entry whose ttl elapsed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;
        for (key, value) in self.kv.scan_prefix(&[JOURNAL_MESSAGE_KEY_PREFIX]).await? {
            let msg: StoredMessage = bincode::deserialize(&value)?;
            if msg.is_expired(now) {
                self.kv.delete(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            MESSAGES_PURGED
                .with_label_values(&["journal"])
                .inc_by(removed as u64);
            info!(removed, "Purged expired journal entries");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NO_TTL;

    fn msg(body: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("message".to_string(), body.to_string());
        fields
    }

    #[tokio::test]
    async fn test_write_and_retrieve_from_id() {
        let j = JournalStore::open_in_memory().await.unwrap();
        for id in 1..=4 {
            j.write("n1", "orders", id, msg(&format!("m{}", id)), NO_TTL)
                .await
                .unwrap();
        }

        let entries = j.retrieve_messages("n1", "orders", 3).await.unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(entries[0].fields["message"], "m3");
        assert_eq!(j.get_head("n1", "orders").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_logs_are_isolated_per_node_and_topic() {
        let j = JournalStore::open_in_memory().await.unwrap();
        j.write("n1", "orders", 1, msg("a"), NO_TTL).await.unwrap();
        j.write("n2", "orders", 1, msg("b"), NO_TTL).await.unwrap();
        j.write("n1", "orders_v2", 7, msg("c"), NO_TTL).await.unwrap();

        let n1 = j.retrieve_messages("n1", "orders", 1).await.unwrap();
        assert_eq!(n1.len(), 1);
        assert_eq!(n1[0].fields["message"], "a");
        assert_eq!(j.get_head("n2", "orders").await.unwrap(), 1);
        assert_eq!(j.get_head("n1", "orders_v2").await.unwrap(), 7);
        assert_eq!(j.get_head("n3", "orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_head() {
        let j = JournalStore::open_in_memory().await.unwrap();
        j.write("n1", "orders", 5, msg("a"), NO_TTL).await.unwrap();
        j.write("n1", "orders", 2, msg("b"), NO_TTL).await.unwrap();
        j.write("n1", "orders", 5, msg("a2"), NO_TTL).await.unwrap();

        assert_eq!(j.get_head("n1", "orders").await.unwrap(), 5);
        let entries = j.retrieve_messages("n1", "orders", 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].fields["message"], "a2");
    }

    #[tokio::test]
    async fn test_expired_entries_are_skipped() {
        let j = JournalStore::open_in_memory().await.unwrap();
        j.write("n1", "orders", 1, msg("short"), 1).await.unwrap();
        j.write("n1", "orders", 2, msg("long"), NO_TTL).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let entries = j.retrieve_messages("n1", "orders", 1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 2);
        assert_eq!(j.purge_expired().await.unwrap(), 1);
    }
}
