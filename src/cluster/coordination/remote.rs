//! Coordination over TCP: service side and client side.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{CoordinationStore, Versioned};
use crate::cluster::config::RpcConfig;
use crate::error::{Error, Result};
use crate::rpc::{CoordRequest, CoordResponse, RpcClient, RpcHandler};

/// Serves [`CoordRequest`]s from a local tree.
pub struct CoordinationService {
    store: Arc<dyn CoordinationStore>,
}

impl CoordinationService {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RpcHandler for CoordinationService {
    type Request = CoordRequest;
    type Response = CoordResponse;

    async fn handle(&self, request: CoordRequest) -> CoordResponse {
        let result = match request {
            CoordRequest::Create { path, data } => {
                self.store.create(&path, data).await.map(|_| CoordResponse::Done)
            }
            CoordRequest::Get { path } => self.store.get(&path).await.map(CoordResponse::Node),
            CoordRequest::Set {
                path,
                data,
                expected_version,
            } => self
                .store
                .set(&path, data, expected_version)
                .await
                .map(CoordResponse::Version),
            CoordRequest::Delete {
                path,
                expected_version,
            } => self
                .store
                .delete(&path, expected_version)
                .await
                .map(|_| CoordResponse::Done),
            CoordRequest::Children { path } => {
                self.store.children(&path).await.map(CoordResponse::Children)
            }
            CoordRequest::Exists { path } => {
                self.store.exists(&path).await.map(CoordResponse::Exists)
            }
            CoordRequest::WaitForChange { since, timeout_ms } => self
                .store
                .wait_for_change(since, Duration::from_millis(timeout_ms))
                .await
                .map(CoordResponse::ChangeCounter),
        };
        result.unwrap_or_else(CoordResponse::Error)
    }

    fn error_response(&self, error: Error) -> CoordResponse {
        CoordResponse::Error(error)
    }

    fn is_error(&self, response: &CoordResponse) -> bool {
        matches!(response, CoordResponse::Error(_))
    }
}

/// Client for a remote coordination service.
///
/// Long polls travel on their own connection so they never delay reads and
/// writes issued by the same process.
pub struct RemoteCoordinationStore {
    rpc: RpcClient<CoordRequest, CoordResponse>,
    watch_rpc: RpcClient<CoordRequest, CoordResponse>,
    operation_timeout: Duration,
}

fn unexpected(response: CoordResponse) -> Error {
    Error::Protocol(format!("unexpected coordination response: {:?}", response))
}

impl RemoteCoordinationStore {
    /// Connect to the coordinator at `addr` and verify it answers.
    pub async fn connect(addr: &str, config: RpcConfig) -> Result<Self> {
        let operation_timeout = config.operation_timeout;
        let client = Self {
            rpc: RpcClient::new(addr, config.clone()),
            watch_rpc: RpcClient::new(addr, config),
            operation_timeout,
        };
        client.exists("/").await?;
        debug!(addr = %addr, "Connected to coordinator");
        Ok(client)
    }
}

#[async_trait]
impl CoordinationStore for RemoteCoordinationStore {
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let request = CoordRequest::Create {
            path: path.to_string(),
            data,
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Done => Ok(()),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn get(&self, path: &str) -> Result<Versioned> {
        let request = CoordRequest::Get {
            path: path.to_string(),
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Node(node) => Ok(node),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn set(&self, path: &str, data: Vec<u8>, expected_version: Option<u64>) -> Result<u64> {
        let request = CoordRequest::Set {
            path: path.to_string(),
            data,
            expected_version,
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Version(version) => Ok(version),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, path: &str, expected_version: Option<u64>) -> Result<()> {
        let request = CoordRequest::Delete {
            path: path.to_string(),
            expected_version,
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Done => Ok(()),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let request = CoordRequest::Children {
            path: path.to_string(),
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Children(children) => Ok(children),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let request = CoordRequest::Exists {
            path: path.to_string(),
        };
        match self.rpc.call(&request).await? {
            CoordResponse::Exists(exists) => Ok(exists),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }

    async fn wait_for_change(&self, since: u64, timeout: Duration) -> Result<u64> {
        let request = CoordRequest::WaitForChange {
            since,
            timeout_ms: timeout.as_millis() as u64,
        };
        let response = self
            .watch_rpc
            .call_with_timeout(&request, timeout + self.operation_timeout)
            .await?;
        match response {
            CoordResponse::ChangeCounter(counter) => Ok(counter),
            CoordResponse::Error(e) => Err(e),
            other => Err(unexpected(other)),
        }
    }
}
