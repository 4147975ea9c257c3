//! Generic TCP server for request/response services.
//!
//! Each accepted connection is served by its own task, handling frames
//! sequentially until the peer disconnects. A frame that fails to decode is
//! answered with an error response and the connection is closed.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::frame::{read_frame, write_frame};
use crate::cluster::metrics::{ACTIVE_CONNECTIONS, record_request};
use crate::error::{Error, Result};

/// Service logic behind an [`RpcServer`].
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + Sync + 'static;

    async fn handle(&self, request: Self::Request) -> Self::Response;

    /// Response sent when a request frame could not be decoded.
    fn error_response(&self, error: Error) -> Self::Response;

    /// Whether `response` carries an error, for request metrics.
    fn is_error(&self, _response: &Self::Response) -> bool {
        false
    }
}

pub struct RpcServer<H: RpcHandler> {
    listener: TcpListener,
    handler: Arc<H>,
    name: &'static str,
}

impl<H: RpcHandler> RpcServer<H> {
    pub async fn bind(addr: &str, handler: Arc<H>, name: &'static str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(service = name, addr = %listener.local_addr()?, "RPC server listening");
        Ok(Self {
            listener,
            handler,
            name,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = self.handler.clone();
                            let name = self.name;
                            tokio::spawn(async move {
                                ACTIVE_CONNECTIONS.with_label_values(&[name]).inc();
                                if let Err(e) = handle_connection(stream, handler, name).await {
                                    debug!(service = name, peer = %peer, error = %e, "Connection closed with error");
                                }
                                ACTIVE_CONNECTIONS.with_label_values(&[name]).dec();
                            });
                        }
                        Err(e) => {
                            warn!(service = self.name, error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(service = self.name, "RPC server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection<H: RpcHandler>(
    mut stream: TcpStream,
    handler: Arc<H>,
    name: &'static str,
) -> Result<()> {
    stream.set_nodelay(true)?;
    loop {
        match read_frame::<_, H::Request>(&mut stream).await {
            Ok(Some(request)) => {
                let started = Instant::now();
                let response = handler.handle(request).await;
                record_request(
                    name,
                    !handler.is_error(&response),
                    started.elapsed().as_secs_f64(),
                );
                write_frame(&mut stream, &response).await?;
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                let response = handler.error_response(e.clone());
                // Best effort: the peer may already be gone.
                let _ = write_frame(&mut stream, &response).await;
                return Err(e);
            }
        }
    }
}
