//! Host-driver mode, both as a library call and through the CLI.

use plugin_rpc::config::{Config, ReadinessConfig};
use plugin_rpc::host;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

fn plugin_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_plugin-rpc"))
}

#[tokio::test]
async fn test_session_reverts_inputs_in_order() {
    let mut config = Config::default();
    config.endpoint.port = 0;
    config.plugin.command = Some(plugin_binary());

    let inputs = vec!["abc".to_string(), "stressed".to_string()];
    let report = host::run(&config, &inputs).await.unwrap();

    assert!(report.endpoint.ip().is_loopback());
    assert_eq!(
        report.reverted,
        vec![
            ("abc".to_string(), b"cba".to_vec()),
            ("stressed".to_string(), b"desserts".to_vec()),
        ]
    );
    assert!(report.exit_status.success());
}

#[tokio::test]
async fn test_session_reverts_multibyte_input_byte_wise() {
    let mut config = Config::default();
    config.endpoint.port = 0;
    config.plugin.command = Some(plugin_binary());

    let reversed: Vec<u8> = "héllo".bytes().rev().collect();
    let inputs = vec!["héllo".to_string()];
    let report = host::run(&config, &inputs).await.unwrap();

    assert_eq!(report.reverted[0].1, reversed);
    assert!(report.exit_status.success());
}

#[cfg(unix)]
#[tokio::test]
async fn test_session_with_unready_plugin_fails_fast() {
    let mut config = Config::default();
    config.endpoint.port = 0;
    // `true` exits immediately without a ready line.
    config.plugin.command = Some(PathBuf::from("/bin/true"));
    config.plugin.args = Vec::new();
    config.readiness = ReadinessConfig::Handshake { timeout_ms: 2000 };

    let err = host::run(&config, &[]).await.unwrap_err();
    assert!(matches!(
        err,
        plugin_rpc::error::RpcError::Process(plugin_rpc::error::ProcessError::NotReady(_))
    ));
}

#[test]
fn test_cli_host_mode_prints_reverted_text() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[endpoint]
port = 0

[watchdog]
idle_timeout_ms = 5000
"#
    )
    .unwrap();

    let output = Command::new(plugin_binary())
        .arg("--config")
        .arg(file.path())
        .args(["host", "--text", "abc", "--text", "Live on time, emit no evil"])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout, "cba\nlive on time ,emit no eviL\n");
}

#[test]
fn test_cli_rejects_unknown_config_extension() {
    let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
    let output = Command::new(plugin_binary())
        .arg("--config")
        .arg(file.path())
        .arg("host")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
