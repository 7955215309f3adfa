use super::schema::{Config, ReadinessConfig};
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use std::path::Path;

/// Environment prefix; nested keys are separated by `__`
/// (`PLUGIN_RPC_ENDPOINT__PORT=9000`).
pub const ENV_PREFIX: &str = "PLUGIN_RPC_";

/// Loads from the default locations: the user config dir, then
/// `plugin-rpc.{toml,json,yaml,yml}` in the working directory, then env.
pub fn load() -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(dir) = dirs::config_dir() {
        figment = figment.merge(Toml::file(dir.join("plugin-rpc").join("config.toml")));
    }

    let figment = figment
        .merge(Toml::file("plugin-rpc.toml"))
        .merge(Json::file("plugin-rpc.json"))
        .merge(Yaml::file("plugin-rpc.yaml"))
        .merge(Yaml::file("plugin-rpc.yml"))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    finish(figment)
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let base = Figment::from(Serialized::defaults(Config::default()));

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        Some("yaml") | Some("yml") => base.merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    if !path.exists() {
        return Err(ConfigError::Parse(format!(
            "Config file not found: {}",
            path.display()
        ))
        .into());
    }

    finish(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

fn finish(figment: Figment) -> Result<Config> {
    let config: Config = figment
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if !config.endpoint.host.is_loopback() {
        return Err(ConfigError::Validation(format!(
            "Endpoint host {} is not a loopback address",
            config.endpoint.host
        ))
        .into());
    }

    if config.watchdog.idle_timeout_ms == 0 {
        return Err(
            ConfigError::Validation("Idle timeout must be greater than 0".into()).into(),
        );
    }

    if config.max_frame_bytes == 0 {
        return Err(
            ConfigError::Validation("Max frame size must be greater than 0".into()).into(),
        );
    }

    if let Some(command) = &config.plugin.command {
        if command.as_os_str().is_empty() {
            return Err(ConfigError::Validation("Plugin command is empty".into()).into());
        }
    }

    if config.dial.initial_backoff_ms > config.dial.max_backoff_ms {
        return Err(ConfigError::Validation(
            "Dial initial backoff cannot exceed max backoff".into(),
        )
        .into());
    }

    // Without the handshake the host has no way to learn a dynamic port.
    if matches!(config.readiness, ReadinessConfig::FixedDelay { .. }) && config.endpoint.port == 0
    {
        return Err(ConfigError::Validation(
            "Fixed-delay readiness requires a fixed endpoint port".into(),
        )
        .into());
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    for arg in &mut config.plugin.args {
        *arg = substitute_env_vars(arg)?;
    }

    for value in config.plugin.env.values_mut() {
        *value = substitute_env_vars(value)?;
    }

    Ok(config)
}

/// Expands `${VAR}` and `${VAR:-default}`.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut result = input.to_string();

    for cap in re.captures_iter(input) {
        let expr = &cap[1];
        let (name, default) = match expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        let value = match (std::env::var(name), default) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(ConfigError::EnvVar(format!(
                    "Environment variable '{name}' not found"
                ))
                .into())
            }
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}
