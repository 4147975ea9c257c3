//! Traits at the seams between the cluster layer and the stores.
//!
//! The router and orchestrator only ever talk to [`QueueNode`] and
//! [`JournalNode`] handles obtained from a [`Connector`]. Two families of
//! implementations exist:
//!
//! - the stores themselves ([`QueueStore`], [`JournalStore`]), used in-process
//! - the RPC clients ([`NodeClient`](crate::rpc::NodeClient),
//!   [`JournalClient`](crate::rpc::JournalClient)), used across the network
//!
//! # Trait Hierarchy
//!
//! - [`QueueNode`]: the node RPC surface (every queue operation plus `ping`)
//! - [`JournalNode`]: the journal RPC surface
//! - [`Connector`]: turns topology records into connected handles

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::topology::{JournalRecord, NodeRecord};
use crate::error::Result;
use crate::store::{JournalStore, QueueStore};
use crate::types::{ConsumerStats, Delivered, Fields, JournalEntry, Posted};

/// Operations offered by one storage node.
#[async_trait]
pub trait QueueNode: Send + Sync {
    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;

    async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()>;

    async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()>;

    async fn post_message(&self, topic: &str, fields: Fields) -> Result<Posted>;

    /// Write at an explicit id; `false` when the id was already present.
    async fn restore_message(&self, topic: &str, id: u64, fields: Fields) -> Result<bool>;

    async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<Delivered>>;

    async fn ack_message(&self, topic: &str, group: &str, id: u64) -> Result<()>;

    async fn fail_message(&self, topic: &str, group: &str, id: u64) -> Result<()>;

    async fn list_topics(&self) -> Result<Vec<String>>;

    async fn get_consumer_groups(&self, topic: &str) -> Result<Vec<String>>;

    async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats>;

    async fn get_head(&self, topic: &str) -> Result<u64>;

    async fn get_heads(&self) -> Result<BTreeMap<String, u64>>;

    async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()>;

    async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()>;

    async fn delete_topic(&self, topic: &str) -> Result<()>;
}

/// Operations offered by one journal node.
#[async_trait]
pub trait JournalNode: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn write(
        &self,
        node_id: &str,
        topic: &str,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    ) -> Result<()>;

    async fn retrieve_messages(
        &self,
        node_id: &str,
        topic: &str,
        from_id: u64,
    ) -> Result<Vec<JournalEntry>>;

    async fn get_head(&self, node_id: &str, topic: &str) -> Result<u64>;
}

/// Opens handles to the members named in topology.
///
/// A successful `connect_*` means the member answered a ping; the returned
/// handle is ready for use.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_node(&self, node_id: &str, record: &NodeRecord)
    -> Result<Arc<dyn QueueNode>>;

    async fn connect_journal(
        &self,
        journal_id: &str,
        record: &JournalRecord,
    ) -> Result<Arc<dyn JournalNode>>;
}

#[async_trait]
impl QueueNode for QueueStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()> {
        QueueStore::create_topic(self, topic, ttl_secs).await
    }

    async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        QueueStore::create_consumer_group(self, topic, group).await
    }

    async fn post_message(&self, topic: &str, fields: Fields) -> Result<Posted> {
        QueueStore::post_message(self, topic, fields).await
    }

    async fn restore_message(&self, topic: &str, id: u64, fields: Fields) -> Result<bool> {
        QueueStore::restore_message(self, topic, id, fields).await
    }

    async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<Delivered>> {
        QueueStore::get_message(self, topic, group, window).await
    }

    async fn ack_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        QueueStore::ack_message(self, topic, group, id).await
    }

    async fn fail_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        QueueStore::fail_message(self, topic, group, id).await
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        QueueStore::list_topics(self).await
    }

    async fn get_consumer_groups(&self, topic: &str) -> Result<Vec<String>> {
        QueueStore::get_consumer_groups(self, topic).await
    }

    async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats> {
        QueueStore::get_consumer_stats(self, topic, group).await
    }

    async fn get_head(&self, topic: &str) -> Result<u64> {
        QueueStore::get_head(self, topic).await
    }

    async fn get_heads(&self) -> Result<BTreeMap<String, u64>> {
        QueueStore::get_heads(self).await
    }

    async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        QueueStore::reset_consumer_group(self, topic, group).await
    }

    async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        QueueStore::delete_consumer_group(self, topic, group).await
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        QueueStore::delete_topic(self, topic).await
    }
}

#[async_trait]
impl JournalNode for JournalStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn write(
        &self,
        node_id: &str,
        topic: &str,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    ) -> Result<()> {
        JournalStore::write(self, node_id, topic, id, fields, ttl_secs).await
    }

    async fn retrieve_messages(
        &self,
        node_id: &str,
        topic: &str,
        from_id: u64,
    ) -> Result<Vec<JournalEntry>> {
        JournalStore::retrieve_messages(self, node_id, topic, from_id).await
    }

    async fn get_head(&self, node_id: &str, topic: &str) -> Result<u64> {
        JournalStore::get_head(self, node_id, topic).await
    }
}
