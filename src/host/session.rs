//! Host-driver mode: one complete plugin session.

use super::handle::{DialPolicy, RemoteHandle};
use super::supervisor::{PluginInstance, ProcessSupervisor, SupervisorSettings};
use crate::config::Config;
use crate::error::Result;
use crate::state::LifecycleState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitStatus;

/// What one session did, in input order.
#[derive(Debug)]
pub struct SessionReport {
    pub endpoint: SocketAddr,
    /// Each input with its byte-reversed output.
    pub reverted: Vec<(String, Vec<u8>)>,
    pub exit_status: ExitStatus,
}

/// Resolves the plugin executable. Defaults to this binary, which doubles as
/// the plugin when started with the plugin marker argument.
pub fn plugin_program(config: &Config) -> Result<PathBuf> {
    match &config.plugin.command {
        Some(command) => Ok(command.clone()),
        None => Ok(std::env::current_exe()?),
    }
}

/// Spawns the plugin, waits for readiness, reverts every input, sends `exit`,
/// and reaps the child. On any failure the child is terminated and reaped
/// before the error is returned.
pub async fn run(config: &Config, inputs: &[String]) -> Result<SessionReport> {
    let supervisor = ProcessSupervisor::new(SupervisorSettings::from(config));
    let program = plugin_program(config)?;
    let mut instance = supervisor.spawn(&program, &config.plugin.args)?;

    match drive(config, &supervisor, &mut instance, inputs).await {
        Ok((endpoint, reverted)) => {
            let exit_status = supervisor.shutdown(instance).await?;
            tracing::info!(%exit_status, calls = reverted.len(), "Session complete");
            Ok(SessionReport {
                endpoint,
                reverted,
                exit_status,
            })
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                pid = instance.pid(),
                command = instance.command(),
                "Session failed, terminating plugin"
            );
            if let Err(reap) = supervisor.terminate(instance).await {
                tracing::warn!(error = %reap, "Failed to reap plugin after session error");
            }
            Err(e)
        }
    }
}

async fn drive(
    config: &Config,
    supervisor: &ProcessSupervisor,
    instance: &mut PluginInstance,
    inputs: &[String],
) -> Result<(SocketAddr, Vec<(String, Vec<u8>)>)> {
    let endpoint = supervisor.wait_ready(instance).await?;

    let mut handle = RemoteHandle::dial_with_frame_limit(
        endpoint,
        DialPolicy::from(&config.dial),
        config.max_frame_bytes,
    )
    .await?
    .with_call_timeout(config.call_timeout());
    tracing::debug!(peer = %handle.peer(), pid = instance.pid(), "Connected to plugin");
    instance.lifecycle().transition(LifecycleState::Serving)?;

    let mut reverted = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = handle.revert(input).await?;
        tracing::info!(input = %input, output = %String::from_utf8_lossy(&output), "Reverted");
        reverted.push((input.clone(), output));
    }

    handle.exit().await?;
    Ok((endpoint, reverted))
}
