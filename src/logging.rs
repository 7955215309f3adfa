//! Tracing setup shared by both process roles.
//!
//! All log output goes to stderr: in plugin mode stdout carries the ready
//! line the host is waiting for.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub json: bool,
}

/// Builds the filter. `RUST_LOG` directives are kept; the crate's own level
/// is added on top.
pub fn filter(options: LogOptions) -> EnvFilter {
    let log_level = if options.debug { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env();
    match format!("plugin_rpc={log_level}").parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(options: LogOptions) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(options))
        .with_writer(std::io::stderr);

    let result = if options.json {
        builder.json().try_init()
    } else {
        builder
            .with_ansi(std::io::stderr().is_terminal())
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
