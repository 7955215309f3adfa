use super::loader::ENV_PREFIX;
use super::schema::Config;
use std::net::IpAddr;

/// Command-line values that take precedence over files and environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub host: Option<IpAddr>,
    pub port: Option<u16>,
    pub idle_timeout_ms: Option<u64>,
}

impl CliOverrides {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none() && self.idle_timeout_ms.is_none()
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = self.host {
            config.endpoint.host = host;
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.watchdog.idle_timeout_ms = ms;
        }
    }
}

/// Environment handed to a spawned plugin so that it binds the endpoint and
/// arms the watchdog exactly as the host has them configured.
pub fn plugin_env(config: &Config) -> Vec<(String, String)> {
    vec![
        (
            format!("{ENV_PREFIX}ENDPOINT__HOST"),
            config.endpoint.host.to_string(),
        ),
        (
            format!("{ENV_PREFIX}ENDPOINT__PORT"),
            config.endpoint.port.to_string(),
        ),
        (
            format!("{ENV_PREFIX}WATCHDOG__IDLE_TIMEOUT_MS"),
            config.watchdog.idle_timeout_ms.to_string(),
        ),
        (
            format!("{ENV_PREFIX}WATCHDOG__RESET_ON_ACTIVITY"),
            config.watchdog.reset_on_activity.to_string(),
        ),
        (
            format!("{ENV_PREFIX}MAX_FRAME_BYTES"),
            config.max_frame_bytes.to_string(),
        ),
    ]
}
