//! Idle deadline that forces the plugin down if the host never says `exit`.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};

/// One-shot idle deadline. With `renewable` set, [`IdleWatchdog::kick`]
/// pushes the deadline out to `now + timeout`; otherwise kicks are ignored
/// and the watchdog fires `timeout` after it was armed.
///
/// Clones share the same deadline.
#[derive(Clone)]
pub struct IdleWatchdog {
    timeout: Duration,
    renewable: bool,
    deadline: Arc<watch::Sender<Instant>>,
}

impl IdleWatchdog {
    /// Arms the watchdog now.
    pub fn start(timeout: Duration, renewable: bool) -> Self {
        let (deadline, _rx) = watch::channel(Instant::now() + timeout);
        tracing::debug!(?timeout, renewable, "Idle watchdog armed");
        Self {
            timeout,
            renewable,
            deadline: Arc::new(deadline),
        }
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.borrow()
    }

    /// Records activity.
    pub fn kick(&self) {
        if self.renewable {
            self.deadline.send_replace(Instant::now() + self.timeout);
        }
    }

    /// Resolves once the deadline has passed without being renewed.
    pub async fn expired(&self) {
        loop {
            let deadline = self.deadline();
            sleep_until(deadline).await;
            // Deadlines only move forward; if nobody kicked while we slept we are done.
            if self.deadline() <= Instant::now() {
                tracing::warn!(timeout = ?self.timeout, "Idle deadline reached");
                return;
            }
        }
    }
}
