//! Per-process storage engines.
//!
//! - [`QueueStore`]: topics, consumer cursors, leases and retry lists of one node
//! - [`JournalStore`]: append-only per (node, topic) message logs of one journal
//!
//! Both persist through SlateDB ([`engine::KvStore`]) on an object store backend.

pub mod engine;
pub mod journal_store;
pub mod keys;
pub mod object_store;
pub mod queue_store;

use serde::{Deserialize, Serialize};

use crate::types::Fields;

pub use engine::KvStore;
pub use journal_store::JournalStore;
pub use object_store::{ObjectStoreType, create_object_store};
pub use queue_store::{QueueStore, QueueStoreConfig};

/// Current wall clock in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a record stored now with `ttl_secs` (`<= 0` = never).
pub fn expiry_from_ttl(ttl_secs: i64, now_ms: i64) -> Option<i64> {
    (ttl_secs > 0).then(|| now_ms.saturating_add(ttl_secs.saturating_mul(1000)))
}

/// A message record as persisted by nodes and journals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Absolute expiry in epoch milliseconds; `None` never expires.
    pub expires_at_ms: Option<i64>,
    pub fields: Fields,
}

impl StoredMessage {
    pub fn new(fields: Fields, ttl_secs: i64, now_ms: i64) -> Self {
        Self {
            expires_at_ms: expiry_from_ttl(ttl_secs, now_ms),
            fields,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}
