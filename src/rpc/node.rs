//! Node RPC service and client.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::client::RpcClient;
use super::messages::{NodeRequest, NodeResponse};
use super::server::RpcHandler;
use crate::cluster::config::RpcConfig;
use crate::cluster::traits::QueueNode;
use crate::error::{Error, Result};
use crate::types::{ConsumerStats, Delivered, Fields, Posted};

/// Serves [`NodeRequest`]s from a local queue.
pub struct NodeService {
    queue: Arc<dyn QueueNode>,
}

impl NodeService {
    pub fn new(queue: Arc<dyn QueueNode>) -> Self {
        Self { queue }
    }
}

fn done(result: Result<()>) -> NodeResponse {
    match result {
        Ok(()) => NodeResponse::Done,
        Err(e) => NodeResponse::Error(e),
    }
}

fn reply<T>(result: Result<T>, wrap: impl FnOnce(T) -> NodeResponse) -> NodeResponse {
    match result {
        Ok(value) => wrap(value),
        Err(e) => NodeResponse::Error(e),
    }
}

#[async_trait]
impl RpcHandler for NodeService {
    type Request = NodeRequest;
    type Response = NodeResponse;

    async fn handle(&self, request: NodeRequest) -> NodeResponse {
        let q = &self.queue;
        match request {
            NodeRequest::Ping => reply(q.ping().await, |_| NodeResponse::Pong),
            NodeRequest::CreateTopic { topic, ttl_secs } => {
                done(q.create_topic(&topic, ttl_secs).await)
            }
            NodeRequest::CreateConsumerGroup { topic, group } => {
                done(q.create_consumer_group(&topic, &group).await)
            }
            NodeRequest::PostMessage { topic, fields } => {
                reply(q.post_message(&topic, fields).await, NodeResponse::Posted)
            }
            NodeRequest::RestoreMessage { topic, id, fields } => reply(
                q.restore_message(&topic, id, fields).await,
                NodeResponse::Restored,
            ),
            NodeRequest::GetMessage {
                topic,
                group,
                window_ms,
            } => reply(
                q.get_message(&topic, &group, window_ms.map(Duration::from_millis))
                    .await,
                NodeResponse::Message,
            ),
            NodeRequest::AckMessage { topic, group, id } => {
                done(q.ack_message(&topic, &group, id).await)
            }
            NodeRequest::FailMessage { topic, group, id } => {
                done(q.fail_message(&topic, &group, id).await)
            }
            NodeRequest::ListTopics => reply(q.list_topics().await, NodeResponse::Topics),
            NodeRequest::GetConsumerGroups { topic } => {
                reply(q.get_consumer_groups(&topic).await, NodeResponse::Groups)
            }
            NodeRequest::GetConsumerStats { topic, group } => reply(
                q.get_consumer_stats(&topic, &group).await,
                NodeResponse::Stats,
            ),
            NodeRequest::GetHead { topic } => reply(q.get_head(&topic).await, NodeResponse::Head),
            NodeRequest::GetHeads => reply(q.get_heads().await, NodeResponse::Heads),
            NodeRequest::ResetConsumerGroup { topic, group } => {
                done(q.reset_consumer_group(&topic, &group).await)
            }
            NodeRequest::DeleteConsumerGroup { topic, group } => {
                done(q.delete_consumer_group(&topic, &group).await)
            }
            NodeRequest::DeleteTopic { topic } => done(q.delete_topic(&topic).await),
        }
    }

    fn error_response(&self, error: Error) -> NodeResponse {
        NodeResponse::Error(error)
    }

    fn is_error(&self, response: &NodeResponse) -> bool {
        matches!(response, NodeResponse::Error(_))
    }
}

/// Remote handle to a storage node.
pub struct NodeClient {
    rpc: RpcClient<NodeRequest, NodeResponse>,
}

/// Unwrap the expected variant or surface the remote error.
macro_rules! expect_response {
    ($response:expr, $pattern:pat => $value:expr) => {
        match $response {
            $pattern => Ok($value),
            NodeResponse::Error(e) => Err(e),
            other => Err(Error::Protocol(format!("unexpected node response: {:?}", other))),
        }
    };
}

impl NodeClient {
    /// Connect to the node at `addr` and verify it answers a ping.
    pub async fn connect(addr: &str, config: RpcConfig) -> Result<Self> {
        let client = Self {
            rpc: RpcClient::new(addr, config),
        };
        QueueNode::ping(&client).await?;
        debug!(addr = %addr, "Connected to node");
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        self.rpc.target_addr()
    }

    async fn call(&self, request: NodeRequest) -> Result<NodeResponse> {
        self.rpc.call(&request).await
    }
}

#[async_trait]
impl QueueNode for NodeClient {
    async fn ping(&self) -> Result<()> {
        expect_response!(self.call(NodeRequest::Ping).await?, NodeResponse::Pong => ())
    }

    async fn create_topic(&self, topic: &str, ttl_secs: Option<i64>) -> Result<()> {
        let request = NodeRequest::CreateTopic {
            topic: topic.to_string(),
            ttl_secs,
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn create_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        let request = NodeRequest::CreateConsumerGroup {
            topic: topic.to_string(),
            group: group.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn post_message(&self, topic: &str, fields: Fields) -> Result<Posted> {
        let request = NodeRequest::PostMessage {
            topic: topic.to_string(),
            fields,
        };
        expect_response!(self.call(request).await?, NodeResponse::Posted(p) => p)
    }

    async fn restore_message(&self, topic: &str, id: u64, fields: Fields) -> Result<bool> {
        let request = NodeRequest::RestoreMessage {
            topic: topic.to_string(),
            id,
            fields,
        };
        expect_response!(self.call(request).await?, NodeResponse::Restored(applied) => applied)
    }

    async fn get_message(
        &self,
        topic: &str,
        group: &str,
        window: Option<Duration>,
    ) -> Result<Option<Delivered>> {
        let request = NodeRequest::GetMessage {
            topic: topic.to_string(),
            group: group.to_string(),
            window_ms: window.map(|w| w.as_millis() as u64),
        };
        expect_response!(self.call(request).await?, NodeResponse::Message(m) => m)
    }

    async fn ack_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        let request = NodeRequest::AckMessage {
            topic: topic.to_string(),
            group: group.to_string(),
            id,
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn fail_message(&self, topic: &str, group: &str, id: u64) -> Result<()> {
        let request = NodeRequest::FailMessage {
            topic: topic.to_string(),
            group: group.to_string(),
            id,
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        expect_response!(self.call(NodeRequest::ListTopics).await?, NodeResponse::Topics(t) => t)
    }

    async fn get_consumer_groups(&self, topic: &str) -> Result<Vec<String>> {
        let request = NodeRequest::GetConsumerGroups {
            topic: topic.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Groups(g) => g)
    }

    async fn get_consumer_stats(&self, topic: &str, group: &str) -> Result<ConsumerStats> {
        let request = NodeRequest::GetConsumerStats {
            topic: topic.to_string(),
            group: group.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Stats(s) => s)
    }

    async fn get_head(&self, topic: &str) -> Result<u64> {
        let request = NodeRequest::GetHead {
            topic: topic.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Head(h) => h)
    }

    async fn get_heads(&self) -> Result<BTreeMap<String, u64>> {
        expect_response!(self.call(NodeRequest::GetHeads).await?, NodeResponse::Heads(h) => h)
    }

    async fn reset_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        let request = NodeRequest::ResetConsumerGroup {
            topic: topic.to_string(),
            group: group.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn delete_consumer_group(&self, topic: &str, group: &str) -> Result<()> {
        let request = NodeRequest::DeleteConsumerGroup {
            topic: topic.to_string(),
            group: group.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }

    async fn delete_topic(&self, topic: &str) -> Result<()> {
        let request = NodeRequest::DeleteTopic {
            topic: topic.to_string(),
        };
        expect_response!(self.call(request).await?, NodeResponse::Done => ())
    }
}
