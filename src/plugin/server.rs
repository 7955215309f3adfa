//! Plugin-server mode: bind, announce, serve one host, shut down.

use super::dispatcher::{Dispatcher, ServeOutcome};
use super::listener::PluginListener;
use super::registry::OperationRegistry;
use super::watchdog::IdleWatchdog;
use crate::config::Config;
use crate::error::Result;
use crate::state::{Lifecycle, LifecycleState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Why the plugin stopped. Every variant is an orderly exit (status 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    ExitRequested,
    IdleTimeout,
    PeerDisconnected,
    Signal,
}

#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub addr: SocketAddr,
    pub idle_timeout: Duration,
    pub reset_on_activity: bool,
    pub max_frame_bytes: usize,
}

impl From<&Config> for PluginSettings {
    fn from(config: &Config) -> Self {
        Self {
            addr: config.endpoint_addr(),
            idle_timeout: config.idle_timeout(),
            reset_on_activity: config.watchdog.reset_on_activity,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

pub struct PluginServer {
    settings: PluginSettings,
    registry: Arc<OperationRegistry>,
    lifecycle: Lifecycle,
}

impl PluginServer {
    pub fn new(settings: PluginSettings, registry: OperationRegistry) -> Self {
        Self {
            settings,
            registry: Arc::new(registry),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    /// Binds the endpoint and arms the idle watchdog.
    pub async fn bind(self) -> Result<BoundPlugin> {
        let listener = match PluginListener::bind(self.settings.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.lifecycle.terminate();
                return Err(e);
            }
        };
        self.lifecycle.transition(LifecycleState::Ready)?;

        let watchdog = IdleWatchdog::start(
            self.settings.idle_timeout,
            self.settings.reset_on_activity,
        );

        Ok(BoundPlugin {
            listener,
            watchdog,
            dispatcher: Dispatcher::new(self.registry, self.settings.max_frame_bytes),
            lifecycle: self.lifecycle,
        })
    }
}

/// A plugin whose endpoint is bound and accepting.
pub struct BoundPlugin {
    listener: PluginListener,
    watchdog: IdleWatchdog,
    dispatcher: Dispatcher,
    lifecycle: Lifecycle,
}

impl BoundPlugin {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Serves until `exit`, disconnect, idle timeout, or `shutdown` resolves.
    /// Whichever comes first decides the plugin's fate. The listener and the
    /// connection are closed before this returns.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<ExitReason>
    where
        F: Future<Output = ()>,
    {
        let BoundPlugin {
            listener,
            watchdog,
            dispatcher,
            lifecycle,
        } = self;
        let dispatcher = dispatcher.with_watchdog(watchdog.clone());

        let serve = async {
            let (stream, _peer) = listener.accept_one().await?;
            lifecycle.transition(LifecycleState::Serving)?;
            dispatcher.serve(stream).await
        };

        let outcome = tokio::select! {
            served = serve => served.map(|outcome| match outcome {
                ServeOutcome::Exit => ExitReason::ExitRequested,
                ServeOutcome::Disconnected => ExitReason::PeerDisconnected,
            }),
            _ = watchdog.expired() => Ok(ExitReason::IdleTimeout),
            _ = shutdown => Ok(ExitReason::Signal),
        };

        let _ = lifecycle.transition(LifecycleState::Exiting);
        match &outcome {
            Ok(reason) => tracing::info!(?reason, "Plugin shutting down"),
            Err(e) => tracing::error!(error = %e, "Plugin stopping after fault"),
        }
        lifecycle.terminate();
        outcome
    }

    pub async fn serve(self) -> Result<ExitReason> {
        self.serve_until(std::future::pending()).await
    }
}
