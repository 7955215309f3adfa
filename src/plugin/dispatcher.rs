//! Reads call frames, runs the named operation, writes the outcome back.

use super::registry::{AfterReply, OperationRegistry};
use super::watchdog::IdleWatchdog;
use crate::error::{OperationError, Result, TransportError};
use crate::protocol::{CallRequest, CallResponse, PluginCodec};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// Why a connection stopped being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The `exit` operation ran and its reply was flushed.
    Exit,
    /// The host closed or reset the connection.
    Disconnected,
}

pub struct Dispatcher {
    registry: Arc<OperationRegistry>,
    watchdog: Option<IdleWatchdog>,
    max_frame_bytes: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<OperationRegistry>, max_frame_bytes: usize) -> Self {
        Self {
            registry,
            watchdog: None,
            max_frame_bytes,
        }
    }

    /// Kick `watchdog` after every dispatched call.
    pub fn with_watchdog(mut self, watchdog: IdleWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Serves one connection until `exit`, disconnect, or a frame fault.
    ///
    /// A malformed frame is returned as `TransportError::Frame`; no attempt is
    /// made to resynchronise the stream.
    pub async fn serve<S>(&self, stream: S) -> Result<ServeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, PluginCodec::new(self.max_frame_bytes));

        loop {
            let request = match framed.next().await {
                None => {
                    tracing::info!("Host closed the connection");
                    return Ok(ServeOutcome::Disconnected);
                }
                Some(Ok(request)) => request,
                Some(Err(e)) => match TransportError::from(e) {
                    TransportError::Call(reason) => {
                        tracing::warn!(%reason, "Connection lost");
                        return Ok(ServeOutcome::Disconnected);
                    }
                    fault => {
                        tracing::error!(error = %fault, "Transport fault, closing connection");
                        return Err(fault.into());
                    }
                },
            };

            let (response, after) = self.dispatch(request).await;
            if let Err(e) = framed.send(response).await {
                tracing::warn!(error = %e, "Failed to write response");
                return Ok(ServeOutcome::Disconnected);
            }

            if let Some(watchdog) = &self.watchdog {
                watchdog.kick();
            }

            if after == AfterReply::Shutdown {
                return Ok(ServeOutcome::Exit);
            }
        }
    }

    /// Runs a single request. Operation failures become error responses and
    /// never end the connection.
    pub async fn dispatch(&self, request: CallRequest) -> (CallResponse, AfterReply) {
        let CallRequest { id, operation, arg } = request;

        let Some(op) = self.registry.get(&operation) else {
            tracing::warn!(call_id = id, %operation, "Unknown operation");
            return (
                CallResponse::error(id, OperationError::no_such_operation(&operation)),
                AfterReply::Continue,
            );
        };

        match op.call(arg).await {
            Ok(reply) => {
                tracing::debug!(call_id = id, %operation, "Operation succeeded");
                (CallResponse::ok(id, reply.value), reply.after)
            }
            Err(e) => {
                tracing::debug!(call_id = id, %operation, error = %e, "Operation failed");
                (CallResponse::error(id, e), AfterReply::Continue)
            }
        }
    }
}
