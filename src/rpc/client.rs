//! Generic request/response client with connection reuse and a circuit breaker.
//!
//! Requests are retried with jittered exponential backoff only while the
//! request has provably not reached the peer (the connection could not be
//! established). Once a request was written, a failure is returned as-is: the
//! peer may have applied it, and the caller decides whether another node should
//! be tried.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::frame::{encode, read_frame, write_raw};
use crate::cluster::config::RpcConfig;
use crate::error::{Error, Result};

/// Circuit breaker state for one peer.
#[derive(Debug)]
struct CircuitBreakerState {
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerState {
    fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_time: None,
            threshold,
            reset_timeout,
        }
    }

    /// Whether requests should be rejected without touching the network.
    fn is_open(&self) -> bool {
        if self.consecutive_failures < self.threshold {
            return false;
        }
        match self.last_failure_time {
            Some(last_failure) => last_failure.elapsed() < self.reset_timeout,
            None => false,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure_time = None;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure_time = Some(Instant::now());
    }
}

/// Outcome of a failed single attempt.
enum AttemptError {
    /// The request never left this process.
    NotSent(Error),
    /// The request was written; the peer may have processed it.
    Sent(Error),
}

pub struct RpcClient<Req, Resp> {
    target_addr: String,
    config: RpcConfig,
    cached_conn: Mutex<Option<TcpStream>>,
    circuit_breaker: Mutex<CircuitBreakerState>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> RpcClient<Req, Resp>
where
    Req: Serialize + Send + Sync,
    Resp: DeserializeOwned + Send,
{
    pub fn new(target_addr: impl Into<String>, config: RpcConfig) -> Self {
        let circuit_breaker = CircuitBreakerState::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_reset,
        );
        Self {
            target_addr: target_addr.into(),
            config,
            cached_conn: Mutex::new(None),
            circuit_breaker: Mutex::new(circuit_breaker),
            _marker: PhantomData,
        }
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    pub async fn call(&self, request: &Req) -> Result<Resp> {
        self.call_with_timeout(request, self.config.operation_timeout)
            .await
    }

    /// Send `request` and wait up to `op_timeout` for the response.
    pub async fn call_with_timeout(&self, request: &Req, op_timeout: Duration) -> Result<Resp> {
        {
            let cb = self.circuit_breaker.lock().await;
            if cb.is_open() {
                debug!(
                    target = %self.target_addr,
                    consecutive_failures = cb.consecutive_failures,
                    "Circuit breaker is open, rejecting RPC"
                );
                return Err(Error::CircuitOpen(self.target_addr.clone()));
            }
        }

        let data = encode(request)?;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = std::cmp::min(
                    self.config.retry_base_delay * (1 << (attempt - 1).min(16)),
                    self.config.retry_max_delay,
                );
                let jitter_factor = 0.75 + (fastrand::f64() * 0.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor);
                debug!(
                    target = %self.target_addr,
                    attempt,
                    delay_ms = jittered_delay.as_millis() as u64,
                    "Retrying RPC after backoff"
                );
                tokio::time::sleep(jittered_delay).await;
            }

            match self.try_send(&data, op_timeout).await {
                Ok(response) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(response);
                }
                Err(AttemptError::NotSent(e)) => {
                    last_error = Some(e);
                }
                Err(AttemptError::Sent(e)) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        {
            let mut cb = self.circuit_breaker.lock().await;
            cb.record_failure();
            if cb.consecutive_failures == cb.threshold {
                warn!(
                    target = %self.target_addr,
                    consecutive_failures = cb.consecutive_failures,
                    "Circuit breaker opened due to consecutive failures"
                );
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Unavailable("RPC failed with no error".into())))
    }

    /// Single attempt: reuse the cached connection, reconnecting once if it broke.
    async fn try_send(
        &self,
        data: &[u8],
        op_timeout: Duration,
    ) -> std::result::Result<Resp, AttemptError> {
        let mut guard = self.cached_conn.lock().await;
        if let Some(ref mut stream) = *guard {
            match self.exchange(stream, data, op_timeout).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::NotSent(e)) => {
                    debug!(target = %self.target_addr, error = %e, "Cached connection is stale, reconnecting");
                    *guard = None;
                }
                Err(sent) => {
                    *guard = None;
                    return Err(sent);
                }
            }
        }

        let mut stream = match timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.target_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(AttemptError::NotSent(Error::Unavailable(format!(
                    "connect to {}: {}",
                    self.target_addr, e
                ))));
            }
            Err(_) => {
                return Err(AttemptError::NotSent(Error::Timeout {
                    operation: format!("connect to {}", self.target_addr),
                    timeout_ms: self.config.connect_timeout.as_millis() as u64,
                }));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            return Err(AttemptError::NotSent(e.into()));
        }

        let response = self.exchange(&mut stream, data, op_timeout).await?;
        *guard = Some(stream);
        Ok(response)
    }

    /// Write `data` and read the response. Only a failed write is `NotSent`;
    /// anything after it, including a timeout, is `Sent`.
    async fn exchange(
        &self,
        stream: &mut TcpStream,
        data: &[u8],
        op_timeout: Duration,
    ) -> std::result::Result<Resp, AttemptError> {
        timeout(op_timeout, async {
            write_raw(stream, data).await.map_err(AttemptError::NotSent)?;
            read_frame::<_, Resp>(stream)
                .await
                .map_err(AttemptError::Sent)?
                .ok_or_else(|| {
                    AttemptError::Sent(Error::Unavailable(format!(
                        "{} closed the connection",
                        self.target_addr
                    )))
                })
        })
        .await
        .map_err(|_| AttemptError::Sent(self.timeout_error(op_timeout)))?
    }

    fn timeout_error(&self, op_timeout: Duration) -> Error {
        Error::Timeout {
            operation: format!("rpc to {}", self.target_addr),
            timeout_ms: op_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::frame::write_frame;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_circuit_breaker_new_is_closed() {
        let cb = CircuitBreakerState::new(3, Duration::from_secs(10));
        assert!(!cb.is_open());
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let mut cb = CircuitBreakerState::new(3, Duration::from_secs(10));
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_circuit_breaker_success_resets() {
        let mut cb = CircuitBreakerState::new(2, Duration::from_secs(10));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert!(!cb.is_open());
        assert_eq!(cb.consecutive_failures, 0);
    }

    #[test]
    fn test_circuit_breaker_resets_after_timeout() {
        let mut cb = CircuitBreakerState::new(1, Duration::from_millis(1));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cb.is_open());
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = RpcConfig {
            max_retries: 0,
            ..RpcConfig::default()
        };
        let client: RpcClient<u64, u64> = RpcClient::new(addr, config);
        let err = client.call(&1).await.unwrap_err();
        assert!(err.is_retriable(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_request_lost_after_write_is_not_resent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Arc::new(AtomicUsize::new(0));

        // Echo the first request, then drop the connection after reading the
        // next one without answering.
        let seen = received.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    while let Ok(Some(value)) = read_frame::<_, u64>(&mut stream).await {
                        if seen.fetch_add(1, Ordering::SeqCst) > 0 {
                            return;
                        }
                        write_frame(&mut stream, &value).await.unwrap();
                    }
                });
            }
        });

        let config = RpcConfig {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            operation_timeout: Duration::from_secs(2),
            ..RpcConfig::default()
        };
        let client: RpcClient<u64, u64> = RpcClient::new(addr, config);
        assert_eq!(client.call(&7).await.unwrap(), 7);

        assert!(client.call(&8).await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 2);
    }
}
