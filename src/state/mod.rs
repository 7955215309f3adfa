use crate::error::{Result, RpcError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the single plugin instance, tracked on both sides of the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Process spawned, listener not yet bound.
    Starting,
    /// Listener bound and accepting.
    Ready,
    /// A host connection has been accepted.
    Serving,
    /// Exit requested, idle deadline fired, or signal received.
    Exiting,
    /// Process gone (plugin side: runner returned; host side: reaped).
    Terminated,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Ready, Serving)
                | (Starting | Ready | Serving, Exiting)
                | (Starting | Ready | Serving | Exiting, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Terminated
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Ready => "ready",
            LifecycleState::Serving => "serving",
            LifecycleState::Exiting => "exiting",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Shared lifecycle cell. Cloning shares the same state.
#[derive(Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Starting);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let mut rejected_from = None;
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                tracing::debug!(from = %current, to = %next, "Lifecycle transition");
                *current = next;
                true
            } else {
                rejected_from = Some(*current);
                false
            }
        });

        match rejected_from {
            Some(from) => Err(RpcError::InvalidStateTransition {
                from: from.to_string(),
                to: next.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Moves to `Terminated` unless already there.
    pub fn terminate(&self) {
        if !self.current().is_terminal() {
            let _ = self.transition(LifecycleState::Terminated);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
