//! [`Connector`] implementations.
//!
//! - [`TcpConnector`]: RPC clients to the addresses recorded in topology,
//!   one cached client per address
//! - [`LocalConnector`]: in-process stores registered by id, each behind a
//!   reachability switch so embedded clusters and tests can simulate outages

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::config::RpcConfig;
use super::topology::{JournalRecord, NodeRecord};
use super::traits::{Connector, JournalNode, QueueNode};
use crate::error::{Error, Result};
use crate::rpc::{JournalClient, NodeClient};
use crate::types::{ConsumerStats, Delivered, Fields, JournalEntry, Posted};

pub struct TcpConnector {
    rpc: RpcConfig,
    nodes: DashMap<String, Arc<NodeClient>>,
    journals: DashMap<String, Arc<JournalClient>>,
}

impl TcpConnector {
    pub fn new(rpc: RpcConfig) -> Self {
        Self {
            rpc,
            nodes: DashMap::new(),
            journals: DashMap::new(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect_node(
        &self,
        _node_id: &str,
        record: &NodeRecord,
    ) -> Result<Arc<dyn QueueNode>> {
        let addr = record.addr();
        let cached = self.nodes.get(&addr).map(|c| c.value().clone());
        let client = match cached {
            Some(client) => {
                QueueNode::ping(client.as_ref()).await?;
                client
            }
            None => {
                let client = Arc::new(NodeClient::connect(&addr, self.rpc.clone()).await?);
                self.nodes.insert(addr, client.clone());
                client
            }
        };
        Ok(client)
    }

    async fn connect_journal(
        &self,
        _journal_id: &str,
        record: &JournalRecord,
    ) -> Result<Arc<dyn JournalNode>> {
        let addr = record.addr();
        let cached = self.journals.get(&addr).map(|c| c.value().clone());
        let client = match cached {
            Some(client) => {
                JournalNode::ping(client.as_ref()).await?;
                client
            }
            None => {
                let client = Arc::new(JournalClient::connect(&addr, self.rpc.clone()).await?);
                self.journals.insert(addr, client.clone());
                client
            }
        };
        Ok(client)
    }
}

/// A member behind a reachability switch.
pub struct Gated<T: ?Sized> {
    id: String,
    reachable: Arc<AtomicBool>,
    inner: Arc<T>,
}

impl<T: ?Sized> Gated<T> {
    fn check(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unavailable(format!("{} is unreachable", self.id)))
        }
    }
}

struct LocalMember<T: ?Sized> {
    reachable: Arc<AtomicBool>,
    inner: Arc<T>,
}

/// Connector over stores living in this process.
#[derive(Default)]
pub struct LocalConnector {
    nodes: DashMap<String, LocalMember<dyn QueueNode>>,
    journals: DashMap<String, LocalMember<dyn JournalNode>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&self, node_id: &str, node: Arc<dyn QueueNode>) {
        self.nodes.insert(
            node_id.to_string(),
            LocalMember {
                reachable: Arc::new(AtomicBool::new(true)),
                inner: node,
            },
        );
    }

    pub fn register_journal(&self, journal_id: &str, journal: Arc<dyn JournalNode>) {
        self.journals.insert(
            journal_id.to_string(),
            LocalMember {
                reachable: Arc::new(AtomicBool::new(true)),
                inner: journal,
            },
        );
    }

    /// Make a node (and every handle already given out for it) fail or recover.
    pub fn set_node_reachable(&self, node_id: &str, reachable: bool) {
        if let Some(member) = self.nodes.get(node_id) {
            member.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    pub fn set_journal_reachable(&self, journal_id: &str, reachable: bool) {
        if let Some(member) = self.journals.get(journal_id) {
            member.reachable.store(reachable, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect_node(
        &self,
        node_id: &str,
        _record: &NodeRecord,
    ) -> Result<Arc<dyn QueueNode>> {
        let member = self
            .nodes
            .get(node_id)
            .ok_or_else(|| Error::Unavailable(format!("node {} is not running", node_id)))?;
        let gated = Gated {
            id: node_id.to_string(),
            reachable: member.reachable.clone(),
            inner: member.inner.clone(),
        };
        drop(member);
        gated.ping().await?;
        Ok(Arc::new(gated))
    }

    async fn connect_journal(
        &self,
        journal_id: &str,
        _record: &JournalRecord,
    ) -> Result<Arc<dyn JournalNode>> {
        let member = self
            .journals
            .get(journal_id)
            .ok_or_else(|| Error::Unavailable(format!("journal {} is not running", journal_id)))?;
        let gated = Gated {
            id: journal_id.to_string(),
            reachable: member.reachable.clone(),
            inner: member.inner.clone(),
        };
        drop(member);
        gated.ping().await?;
        Ok(Arc::new(gated))
    }
}

#[async_trait]
impl QueueNode for Gated<dyn QueueNode> {
    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }

    async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()> {
        self.check()?;
        self.inner.create_topic(topic, ttl_secs).await
    }

    async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.check()?;
        self.inner.create_consumer_group(topic, group).await
    }

    async fn post_message(&self, topic: &str, fields: Fields) -> Result<Posted> {
        self.check()?;
        self.inner.post_message(topic, fields).await
    }

    async fn restore_message(&self, topic: &str, id: u64, fields: Fields) -> Result<bool> {
        self.check()?;
        self.inner.restore_message(topic, id, fields).await
    }

    async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<Delivered>> {
        self.check()?;
        self.inner.get_message(topic, group, window).await
    }

    async fn ack_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        self.check()?;
        self.inner.ack_message(topic, group, id).await
    }

    async fn fail_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        self.check()?;
        self.inner.fail_message(topic, group, id).await
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_topics().await
    }

    async fn get_consumer_groups(&self, topic: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.get_consumer_groups(topic).await
    }

    async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats> {
        self.check()?;
        self.inner.get_consumer_stats(topic, group).await
    }

    async fn get_head(&self, topic: &str) -> Result<u64> {
        self.check()?;
        self.inner.get_head(topic).await
    }

    async fn get_heads(&self) -> Result<BTreeMap<String, u64>> {
        self.check()?;
        self.inner.get_heads().await
    }

    async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.check()?;
        self.inner.reset_consumer_group(topic, group).await
    }

    async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_consumer_group(topic, group).await
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_topic(topic).await
    }
}

#[async_trait]
impl JournalNode for Gated<dyn JournalNode> {
    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }

    async fn write(
        &self,
        node_id: &str,
        topic: &str,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    ) -> Result<()> {
        self.check()?;
        self.inner.write(node_id, topic, id, fields, ttl_secs).await
    }

    async fn retrieve_messages(
        &self,
        node_id: &str,
        topic: &str,
        from_id: u64,
    ) -> Result<Vec<JournalEntry>> {
        self.check()?;
        self.inner.retrieve_messages(node_id, topic, from_id).await
    }

    async fn get_head(&self, node_id: &str, topic: &str) -> Result<u64> {
        self.check()?;
        self.inner.get_head(node_id, topic).await
    }
}
