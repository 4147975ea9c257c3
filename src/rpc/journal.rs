//! Journal RPC service and client.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::client::RpcClient;
use super::messages::{JournalRequest, JournalResponse};
use super::server::RpcHandler;
use crate::cluster::config::RpcConfig;
use crate::cluster::traits::JournalNode;
use crate::error::{Error, Result};
use crate::types::{Fields, JournalEntry};

/// Serves [`JournalRequest`]s from a local journal.
pub struct JournalService {
    journal: Arc<dyn JournalNode>,
}

impl JournalService {
    pub fn new(journal: Arc<dyn JournalNode>) -> Self {
        Self { journal }
    }
}

#[async_trait]
impl RpcHandler for JournalService {
    type Request = JournalRequest;
    type Response = JournalResponse;

    async fn handle(&self, request: JournalRequest) -> JournalResponse {
        let result = match request {
            JournalRequest::Ping => self.journal.ping().await.map(|_| JournalResponse::Pong),
            JournalRequest::Write {
                node_id,
                topic,
                id,
                fields,
                ttl_secs,
            } => self
                .journal
                .write(&node_id, &topic, id, fields, ttl_secs)
                .await
                .map(|_| JournalResponse::Done),
            JournalRequest::RetrieveMessages {
                node_id,
                topic,
                from_id,
            } => self
                .journal
                .retrieve_messages(&node_id, &topic, from_id)
                .await
                .map(JournalResponse::Messages),
            JournalRequest::GetHead { node_id, topic } => self
                .journal
                .get_head(&node_id, &topic)
                .await
                .map(JournalResponse::Head),
        };
        result.unwrap_or_else(JournalResponse::Error)
    }

    fn error_response(&self, error: Error) -> JournalResponse {
        JournalResponse::Error(error)
    }

    fn is_error(&self, response: &JournalResponse) -> bool {
        matches!(response, JournalResponse::Error(_))
    }
}

/// Remote handle to a journal node.
pub struct JournalClient {
    rpc: RpcClient<JournalRequest, JournalResponse>,
}

impl JournalClient {
    /// Connect to the journal at `addr` and verify it answers a ping.
    pub async fn connect(addr: &str, config: RpcConfig) -> Result<Self> {
        let client = Self {
            rpc: RpcClient::new(addr, config),
        };
        JournalNode::ping(&client).await?;
        debug!(addr = %addr, "Connected to journal");
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        self.rpc.target_addr()
    }
}

fn unexpected(response: JournalResponse) -> Error {
    Error::Protocol(format!("unexpected journal response: {:?}", response))
}

#[async_trait]
impl JournalNode for JournalClient {
    async fn ping(&self) -> Result<()> {
        match self.rpc.call(&JournalRequest::Ping).await? {
            JournalResponse::Pong => Ok(()),
            JournalResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn write(
        &self,
        node_id: &str,
        topic: &str,
        id: u64,
        fields: Fields,
        ttl_secs: i64,
    ) -> Result<()> {
        let request = JournalRequest::Write {
            node_id: node_id.to_string(),
            topic: topic.to_string(),
            id,
            fields,
            ttl_secs,
        };
        match self.rpc.call(&request).await? {
            JournalResponse::Done => Ok(()),
            JournalResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn retrieve_messages(
        &self,
        node_id: &str,
        topic: &str,
        from_id: u64,
    ) -> Result<Vec<JournalEntry>> {
        let request = JournalRequest::RetrieveMessages {
            node_id: node_id.to_string(),
            topic: topic.to_string(),
            from_id,
        };
        match self.rpc.call(&request).await? {
            JournalResponse::Messages(entries) => Ok(entries),
            JournalResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn get_head(&self, node_id: &str, topic: &str) -> Result<u64> {
        let request = JournalRequest::GetHead {
            node_id: node_id.to_string(),
            topic: topic.to_string(),
        };
        match self.rpc.call(&request).await? {
            JournalResponse::Head(head) => Ok(head),
            JournalResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }
}
