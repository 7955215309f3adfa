//! Host-side connection to a running plugin.

use crate::config::DialConfig;
use crate::error::{Result, RpcError, TransportError};
use crate::plugin::operations::{EXIT, REVERT};
use crate::protocol::{
    CallRequest, CallResponse, HostCodec, Outcome, TextPayload, DEFAULT_MAX_FRAME_BYTES,
};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration, Instant};
use tokio_util::codec::Framed;

/// How hard `dial` tries before giving up with a connect error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    /// Total time budget across all attempts. Zero means a single attempt.
    pub deadline: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl DialPolicy {
    /// One attempt, no retry.
    pub fn once() -> Self {
        Self {
            deadline: Duration::ZERO,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self::from(&DialConfig::default())
    }
}

impl From<&DialConfig> for DialPolicy {
    fn from(config: &DialConfig) -> Self {
        Self {
            deadline: Duration::from_millis(config.timeout_ms),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Synchronous call channel to one plugin.
///
/// `invoke` takes `&mut self`, so at most one call is in flight per handle.
/// Once a call fails at the transport level (or times out) the handle is
/// closed and every later call fails with a call error.
pub struct RemoteHandle {
    framed: Framed<TcpStream, HostCodec>,
    peer: SocketAddr,
    next_id: u64,
    call_timeout: Option<Duration>,
    closed: bool,
}

impl RemoteHandle {
    /// Connects to `addr`, retrying refused connections with exponential
    /// backoff until the policy deadline runs out.
    pub async fn dial(addr: SocketAddr, policy: DialPolicy) -> Result<Self> {
        Self::dial_with_frame_limit(addr, policy, DEFAULT_MAX_FRAME_BYTES).await
    }

    pub async fn dial_with_frame_limit(
        addr: SocketAddr,
        policy: DialPolicy,
        max_frame_bytes: usize,
    ) -> Result<Self> {
        let started = Instant::now();
        let mut backoff = policy.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = policy.deadline.saturating_sub(started.elapsed());
            let attempt = if remaining.is_zero() {
                TcpStream::connect(addr).await
            } else {
                timeout(remaining, TcpStream::connect(addr))
                    .await
                    .unwrap_or_else(|_| {
                        Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
                    })
            };

            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::info!(%addr, attempts, "Connected to plugin");
                    return Ok(Self {
                        framed: Framed::new(stream, HostCodec::new(max_frame_bytes)),
                        peer: addr,
                        next_id: 1,
                        call_timeout: None,
                        closed: false,
                    });
                }
                Err(e) => {
                    let remaining = policy.deadline.saturating_sub(started.elapsed());
                    if remaining.is_zero() || !is_retryable(&e) {
                        return Err(TransportError::Connect {
                            addr,
                            reason: format!("{e} (after {attempts} attempt(s))"),
                        }
                        .into());
                    }

                    tracing::debug!(%addr, attempts, ?backoff, error = %e, "Plugin not reachable yet, retrying");
                    sleep(backoff.min(remaining)).await;
                    backoff = (backoff * 2).min(policy.max_backoff).max(Duration::from_millis(1));
                }
            }
        }
    }

    /// Bounds every later `invoke`. `None` blocks until the plugin answers.
    pub fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends one call and waits for its response.
    ///
    /// A remote operation failure comes back as `RpcError::Operation` and the
    /// handle stays usable. Transport failures come back as
    /// `TransportError::Call` (or `Frame`/`Timeout`) and close the handle.
    pub async fn invoke(&mut self, operation: &str, arg: Value) -> Result<Value> {
        if self.closed {
            return Err(TransportError::Call(format!(
                "connection to {} is closed",
                self.peer
            ))
            .into());
        }

        let id = self.next_id;
        self.next_id += 1;
        let request = CallRequest::new(id, operation, arg);

        let exchanged = match self.call_timeout {
            Some(limit) => match timeout(limit, self.exchange(request)).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout(limit)),
            },
            None => self.exchange(request).await,
        };

        let response = match exchanged {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(call_id = id, %operation, error = %e, "Call failed, closing handle");
                self.closed = true;
                return Err(e);
            }
        };

        if response.id != id {
            self.closed = true;
            return Err(TransportError::Frame(format!(
                "response id {} does not match request id {}",
                response.id, id
            ))
            .into());
        }

        match response.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(e) => Err(e.into()),
        }
    }

    async fn exchange(&mut self, request: CallRequest) -> Result<CallResponse> {
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(response) => Ok(response?),
            None => Err(TransportError::Call("connection closed by plugin".into()).into()),
        }
    }

    /// `invoke` with typed argument and result.
    pub async fn invoke_typed<A, R>(&mut self, operation: &str, arg: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.invoke(operation, serde_json::to_value(arg)?).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Byte-wise reversal in the plugin. The result is only UTF-8 when the
    /// reversed bytes happen to be.
    pub async fn revert(&mut self, input: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let arg = TextPayload::from_bytes(input.as_ref().to_vec());
        let reversed: TextPayload = self.invoke_typed(REVERT, &arg).await?;
        Ok(reversed.into_bytes())
    }

    /// Asks the plugin to shut down. No further call on this handle will
    /// succeed once this returns.
    pub async fn exit(&mut self) -> Result<()> {
        self.invoke(EXIT, Value::Null).await?;
        self.closed = true;
        Ok(())
    }
}
