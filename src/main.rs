use clap::Parser;
use std::future::Future;
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::{error, info, warn};

use plugin_rpc::config::{self, CliOverrides, Config};
use plugin_rpc::error::Result;
use plugin_rpc::host;
use plugin_rpc::logging::{self, LogOptions};
use plugin_rpc::plugin::{OperationRegistry, PluginServer, PluginSettings};
use plugin_rpc::protocol::format_ready_line;

const DEFAULT_TEXT: &str = "Live on time, emit no evil";

#[derive(Parser, Debug)]
#[command(name = "plugin-rpc")]
#[command(about = "Out-of-process plugin host speaking a loopback call protocol", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Loopback address the plugin binds
    #[arg(long, global = true)]
    host: Option<IpAddr>,

    /// Port the plugin binds (0 picks a free one)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Idle watchdog timeout for the plugin
    #[arg(long, value_name = "MS", global = true)]
    idle_timeout_ms: Option<u64>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Spawn the plugin, revert each text, then ask it to exit (default)
    Host {
        /// Text to revert; may be repeated
        #[arg(long = "text", value_name = "TEXT")]
        texts: Vec<String>,
    },
    /// Run as the plugin server
    Plugin,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    logging::init(LogOptions {
        debug: args.debug,
        json: args.log_json,
    });

    let config = load_config(&args)?;

    match args.command.unwrap_or(Command::Host { texts: Vec::new() }) {
        Command::Plugin => run_plugin(config).await,
        Command::Host { texts } => run_host(config, texts).await,
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let loaded = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path)
        }
        None => config::load(),
    };
    let mut config = loaded.inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    let overrides = CliOverrides {
        host: args.host,
        port: args.port,
        idle_timeout_ms: args.idle_timeout_ms,
    };
    if !overrides.is_empty() {
        overrides.apply(&mut config);
        config::validate(&config)?;
    }
    Ok(config)
}

async fn run_plugin(config: Config) -> Result<ExitCode> {
    let registry = OperationRegistry::with_builtins()
        .inspect_err(|e| error!("Failed to register operations: {}", e))?;
    info!(operations = ?registry.names(), "Registered operations");
    let server = PluginServer::new(PluginSettings::from(&config), registry);
    let bound = server.bind().await?;
    let shutdown = shutdown_signal();
    let addr = bound.local_addr();
    info!(%addr, pid = std::process::id(), "Announcing readiness");

    let mut stdout = tokio::io::stdout();
    AsyncWriteExt::write_all(&mut stdout, format_ready_line(addr).as_bytes()).await?;
    AsyncWriteExt::flush(&mut stdout).await?;

    let reason = bound.serve_until(shutdown).await?;
    info!(?reason, "Plugin exited");
    Ok(ExitCode::SUCCESS)
}

async fn run_host(config: Config, mut texts: Vec<String>) -> Result<ExitCode> {
    if texts.is_empty() {
        texts.push(DEFAULT_TEXT.to_string());
    }

    let report = host::run(&config, &texts).await?;
    let mut stdout = std::io::stdout().lock();
    for (_, reverted) in &report.reverted {
        stdout.write_all(reverted)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    if report.exit_status.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(status = %report.exit_status, "Plugin exited abnormally");
        Ok(ExitCode::FAILURE)
    }
}

/// Installs the SIGTERM handler immediately so a signal that arrives right
/// after the ready line is still an orderly exit.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .inspect_err(|e| warn!("Failed to install signal handler: {}", e))
        .ok();

    async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match terminate.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            },
            _ = terminate => {
                info!("Received terminate signal");
            },
        }
    }
}
