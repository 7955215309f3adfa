//! Spawning, readiness, and reaping of the plugin process.

use crate::config::{plugin_env, Config, ReadinessConfig};
use crate::error::{ProcessError, Result};
use crate::protocol::parse_ready_line;
use crate::state::{Lifecycle, LifecycleState};
use std::net::SocketAddr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{sleep, timeout, Duration};

/// How the host decides the plugin is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Wait up to the given time for the plugin's `READY <addr>` line.
    Handshake(Duration),
    /// Sleep blindly, then assume the configured endpoint is listening.
    FixedDelay(Duration),
}

impl From<&ReadinessConfig> for Readiness {
    fn from(config: &ReadinessConfig) -> Self {
        match config {
            ReadinessConfig::Handshake { timeout_ms } => {
                Readiness::Handshake(Duration::from_millis(*timeout_ms))
            }
            ReadinessConfig::FixedDelay { delay_ms } => {
                Readiness::FixedDelay(Duration::from_millis(*delay_ms))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub readiness: Readiness,
    /// Endpoint assumed under fixed-delay readiness.
    pub endpoint: SocketAddr,
    /// How long to wait for a voluntary exit before signalling.
    pub grace: Duration,
    /// Extra environment for the child.
    pub env: Vec<(String, String)>,
}

impl From<&Config> for SupervisorSettings {
    fn from(config: &Config) -> Self {
        let mut env = plugin_env(config);
        env.extend(config.plugin.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            readiness: Readiness::from(&config.readiness),
            endpoint: config.endpoint_addr(),
            grace: config.shutdown_grace(),
            env,
        }
    }
}

/// The single running plugin process. Owned by the supervisor's caller and
/// consumed when reaped. Dropping it without reaping kills the child.
pub struct PluginInstance {
    pid: u32,
    command: String,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    addr: Option<SocketAddr>,
    lifecycle: Lifecycle,
}

impl PluginInstance {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// True while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

pub struct ProcessSupervisor {
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    /// Starts the plugin. Does not wait for it to become reachable.
    pub fn spawn(&self, program: &Path, args: &[String]) -> Result<PluginInstance> {
        let command = program.display().to_string();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(self.settings.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true); // Prevent orphaned plugins

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| ProcessError::NotReady(
            "plugin exited before its pid could be read".to_string(),
        ))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(pid, "stderr", BufReader::new(stderr)));
        }
        let stdout = child.stdout.take().map(BufReader::new);

        tracing::info!(pid, %command, "Spawned plugin");
        Ok(PluginInstance {
            pid,
            command,
            child,
            stdout,
            addr: None,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Blocks until the plugin can be dialled and returns its endpoint.
    pub async fn wait_ready(&self, instance: &mut PluginInstance) -> Result<SocketAddr> {
        let addr = match self.settings.readiness {
            Readiness::Handshake(limit) => {
                let stdout = instance.stdout.as_mut().ok_or_else(|| {
                    ProcessError::NotReady("plugin stdout is not captured".to_string())
                })?;

                let addr = timeout(limit, read_ready_marker(stdout))
                    .await
                    .map_err(|_| {
                        ProcessError::NotReady(format!("no ready marker within {limit:?}"))
                    })??;

                // Keep draining stdout so the child never blocks on a full pipe.
                if let Some(stdout) = instance.stdout.take() {
                    tokio::spawn(forward_lines(instance.pid, "stdout", stdout));
                }
                addr
            }
            Readiness::FixedDelay(delay) => {
                sleep(delay).await;
                if !instance.is_running() {
                    return Err(ProcessError::NotReady(
                        "plugin exited during the readiness delay".to_string(),
                    )
                    .into());
                }
                self.settings.endpoint
            }
        };

        instance.lifecycle.transition(LifecycleState::Ready)?;
        instance.addr = Some(addr);
        tracing::info!(pid = instance.pid, %addr, "Plugin ready");
        Ok(addr)
    }

    /// Blocks until the plugin exits on its own and reaps it.
    pub async fn wait(&self, mut instance: PluginInstance) -> Result<ExitStatus> {
        let pid = instance.pid;
        match instance.child.wait().await {
            Ok(status) => {
                instance.lifecycle.terminate();
                tracing::info!(pid, %status, "Plugin exited");
                Ok(status)
            }
            Err(e) => {
                // Dropping the instance still kills the child.
                tracing::error!(pid, error = %e, "Failed to reap plugin");
                Err(ProcessError::Wait {
                    pid,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Waits up to the grace period for a voluntary exit, then terminates.
    pub async fn shutdown(&self, mut instance: PluginInstance) -> Result<ExitStatus> {
        let _ = instance.lifecycle.transition(LifecycleState::Exiting);
        match timeout(self.settings.grace, instance.child.wait()).await {
            Ok(Ok(status)) => {
                instance.lifecycle.terminate();
                tracing::info!(pid = instance.pid, addr = ?instance.addr, %status, "Plugin exited");
                Ok(status)
            }
            Ok(Err(e)) => Err(ProcessError::Wait {
                pid: instance.pid,
                reason: e.to_string(),
            }
            .into()),
            Err(_) => {
                tracing::warn!(
                    pid = instance.pid,
                    grace = ?self.settings.grace,
                    "Plugin did not exit in time, terminating"
                );
                self.terminate(instance).await
            }
        }
    }

    /// Asks the plugin to stop (SIGTERM), escalates to SIGKILL after the grace
    /// period, and always reaps.
    pub async fn terminate(&self, mut instance: PluginInstance) -> Result<ExitStatus> {
        let pid = instance.pid;
        let _ = instance.lifecycle.transition(LifecycleState::Exiting);

        if let Ok(Some(status)) = instance.child.try_wait() {
            instance.lifecycle.terminate();
            return Ok(status);
        }

        if let Err(e) = send_terminate(pid) {
            tracing::warn!(pid, error = %e, "Failed to signal plugin, killing");
        } else if let Ok(Ok(status)) = timeout(self.settings.grace, instance.child.wait()).await {
            instance.lifecycle.terminate();
            tracing::info!(pid, addr = ?instance.addr, %status, "Plugin terminated");
            return Ok(status);
        }

        if let Err(e) = instance.child.start_kill() {
            tracing::warn!(pid, error = %e, "Failed to kill plugin");
        }
        self.wait(instance).await
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
        pid,
        reason: "pid out of range".to_string(),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|e| ProcessError::Signal {
        pid,
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(pid: u32) -> Result<()> {
    Err(ProcessError::Signal {
        pid,
        reason: "graceful termination is not supported on this platform".to_string(),
    }
    .into())
}

async fn read_ready_marker(stdout: &mut BufReader<ChildStdout>) -> Result<SocketAddr> {
    let mut line = String::new();
    loop {
        line.clear();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(ProcessError::NotReady(
                "plugin closed stdout before announcing readiness".to_string(),
            )
            .into());
        }
        match parse_ready_line(&line) {
            Some(addr) => return Ok(addr),
            None => tracing::debug!(line = line.trim_end(), "Ignoring plugin output"),
        }
    }
}

async fn forward_lines<R>(pid: u32, stream: &'static str, reader: BufReader<R>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "plugin_rpc::plugin_output", pid, stream, "{}", line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use std::path::PathBuf;

    fn settings(readiness: Readiness) -> SupervisorSettings {
        SupervisorSettings {
            readiness,
            endpoint: "127.0.0.1:7070".parse().unwrap(),
            grace: Duration::from_millis(500),
            env: Vec::new(),
        }
    }

    fn sh(script: &str) -> (PathBuf, Vec<String>) {
        (PathBuf::from("/bin/sh"), vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let supervisor = ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_secs(1))));
        let err = supervisor
            .spawn(Path::new("/definitely/not/a/plugin"), &[])
            .err()
            .unwrap();
        assert!(matches!(err, RpcError::Process(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_handshake_reads_ready_marker() {
        let supervisor = ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_secs(5))));
        let (program, args) = sh("echo booting; echo 'READY 127.0.0.1:4567'; sleep 0.2");
        let mut instance = supervisor.spawn(&program, &args).unwrap();

        let addr = supervisor.wait_ready(&mut instance).await.unwrap();
        assert_eq!(addr.port(), 4567);
        assert_eq!(instance.addr, Some(addr));
        assert_eq!(instance.lifecycle().current(), LifecycleState::Ready);

        let status = supervisor.wait(instance).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_handshake_fails_when_plugin_dies_first() {
        let supervisor = ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_secs(5))));
        let (program, args) = sh("exit 3");
        let mut instance = supervisor.spawn(&program, &args).unwrap();

        let err = supervisor.wait_ready(&mut instance).await.unwrap_err();
        assert!(matches!(err, RpcError::Process(ProcessError::NotReady(_))));

        let status = supervisor.wait(instance).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let supervisor =
            ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_millis(100))));
        let (program, args) = sh("sleep 5");
        let mut instance = supervisor.spawn(&program, &args).unwrap();

        let err = supervisor.wait_ready(&mut instance).await.unwrap_err();
        assert!(matches!(err, RpcError::Process(ProcessError::NotReady(_))));
        supervisor.terminate(instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_fixed_delay_uses_configured_endpoint() {
        let supervisor =
            ProcessSupervisor::new(settings(Readiness::FixedDelay(Duration::from_millis(50))));
        let (program, args) = sh("sleep 5");
        let mut instance = supervisor.spawn(&program, &args).unwrap();

        let addr = supervisor.wait_ready(&mut instance).await.unwrap();
        assert_eq!(addr, "127.0.0.1:7070".parse().unwrap());
        supervisor.terminate(instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let supervisor = ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_secs(1))));
        // ignores SIGTERM
        let (program, args) = sh("trap '' TERM; sleep 30");
        let instance = supervisor.spawn(&program, &args).unwrap();
        let lifecycle = instance.lifecycle().clone();
        sleep(Duration::from_millis(100)).await;

        let status = timeout(Duration::from_secs(10), supervisor.terminate(instance))
            .await
            .expect("terminate must not hang")
            .unwrap();
        assert!(!status.success());
        assert_eq!(lifecycle.current(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_shutdown_reaps_voluntary_exit() {
        let supervisor = ProcessSupervisor::new(settings(Readiness::Handshake(Duration::from_secs(1))));
        let (program, args) = sh("sleep 0.1");
        let instance = supervisor.spawn(&program, &args).unwrap();

        let status = supervisor.shutdown(instance).await.unwrap();
        assert!(status.success());
    }
}
