use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Marker argument that switches the binary into plugin-server mode.
pub const PLUGIN_MARKER: &str = "plugin";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub plugin: PluginCommandConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub dial: DialConfig,
    #[serde(default)]
    pub call: CallConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Loopback address both sides agree on out-of-band.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_endpoint_host")]
    pub host: IpAddr,
    /// `0` lets the plugin pick a free port and report it in its ready line.
    #[serde(default = "default_endpoint_port")]
    pub port: u16,
}

/// How the host launches the plugin. `command = None` means "this binary".
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PluginCommandConfig {
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default = "default_plugin_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    /// Re-arm the deadline after every dispatched call. Off by default: the
    /// plugin ends `idle_timeout_ms` after it starts listening, busy or not.
    #[serde(default = "default_reset_on_activity")]
    pub reset_on_activity: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadinessConfig {
    /// Wait for the plugin's `READY <addr>` line on stdout.
    Handshake {
        #[serde(default = "default_handshake_timeout")]
        timeout_ms: u64,
    },
    /// Sleep blindly, then assume the configured endpoint is listening.
    FixedDelay {
        #[serde(default = "default_fixed_delay")]
        delay_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DialConfig {
    #[serde(default = "default_dial_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CallConfig {
    /// `0` disables the per-call deadline.
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
}

// Default value functions
fn default_endpoint_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_endpoint_port() -> u16 {
    7070
}

fn default_plugin_args() -> Vec<String> {
    vec![PLUGIN_MARKER.to_string()]
}

fn default_idle_timeout() -> u64 {
    10_000
}

fn default_reset_on_activity() -> bool {
    false
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_fixed_delay() -> u64 {
    1_000
}

fn default_dial_timeout() -> u64 {
    3_000
}

fn default_initial_backoff() -> u64 {
    50
}

fn default_max_backoff() -> u64 {
    500
}

fn default_call_timeout() -> u64 {
    5_000
}

fn default_grace() -> u64 {
    2_000
}

fn default_max_frame_bytes() -> usize {
    crate::protocol::DEFAULT_MAX_FRAME_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            plugin: PluginCommandConfig::default(),
            watchdog: WatchdogConfig::default(),
            readiness: ReadinessConfig::default(),
            dial: DialConfig::default(),
            call: CallConfig::default(),
            shutdown: ShutdownConfig::default(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_endpoint_host(),
            port: default_endpoint_port(),
        }
    }
}

impl Default for PluginCommandConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: default_plugin_args(),
            env: HashMap::new(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
            reset_on_activity: default_reset_on_activity(),
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        ReadinessConfig::Handshake {
            timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dial_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_call_timeout(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace(),
        }
    }
}

impl EndpointConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Config {
    pub fn endpoint_addr(&self) -> SocketAddr {
        self.endpoint.socket_addr()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.idle_timeout_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        match self.call.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_ms)
    }
}
