//! End-to-end tests against the real binary running in plugin mode.
//!
//! Every test uses port 0 so runs never collide on the default endpoint.

use plugin_rpc::config::{Config, ReadinessConfig};
use plugin_rpc::error::{ProcessError, RpcError, TransportError};
use plugin_rpc::host::{DialPolicy, ProcessSupervisor, RemoteHandle, SupervisorSettings};
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn plugin_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_plugin-rpc"))
}

fn test_config(idle_timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.endpoint.port = 0;
    config.plugin.command = Some(plugin_binary());
    config.watchdog.idle_timeout_ms = idle_timeout_ms;
    config.shutdown.grace_ms = 2000;
    config
}

fn supervisor(config: &Config) -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorSettings::from(config))
}

#[tokio::test]
async fn test_revert_then_exit() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");

    let addr = supervisor.wait_ready(&mut instance).await.unwrap();
    assert!(addr.ip().is_loopback());
    assert_ne!(addr.port(), 0, "ready line must carry the bound port");

    let mut handle = RemoteHandle::dial(addr, DialPolicy::default()).await.unwrap();
    assert_eq!(handle.revert("abc").await.unwrap(), b"cba");
    assert_eq!(
        handle.revert("Live on time, emit no evil").await.unwrap(),
        b"live on time ,emit no eviL"
    );
    assert!(handle.revert("").await.unwrap().is_empty());

    let once = handle.revert("héllo").await.unwrap();
    assert_eq!(handle.revert(&once).await.unwrap(), "héllo".as_bytes());

    handle.exit().await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), supervisor.wait(instance))
        .await
        .expect("plugin must exit after `exit`")
        .unwrap();
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_call_after_exit_fails() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    let addr = supervisor.wait_ready(&mut instance).await.unwrap();

    let mut handle = RemoteHandle::dial(addr, DialPolicy::default()).await.unwrap();
    handle.exit().await.unwrap();

    let err = handle.revert("abc").await.unwrap_err();
    assert!(err.is_call(), "unexpected error: {err:?}");

    let status = supervisor.wait(instance).await.unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_unknown_operation_over_process_boundary() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    let addr = supervisor.wait_ready(&mut instance).await.unwrap();

    let mut handle = RemoteHandle::dial(addr, DialPolicy::default()).await.unwrap();
    let err = handle
        .invoke("rotate", serde_json::json!("abc"))
        .await
        .unwrap_err();
    let op = err.as_operation().expect("operation error");
    assert_eq!(op.code, plugin_rpc::error::OperationError::NO_SUCH_OPERATION);

    // Still usable.
    assert_eq!(handle.revert("xy").await.unwrap(), b"yx");
    handle.exit().await.unwrap();
    assert!(supervisor.wait(instance).await.unwrap().success());
}

#[tokio::test]
async fn test_idle_watchdog_ends_unused_plugin() {
    let config = test_config(300);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    supervisor.wait_ready(&mut instance).await.unwrap();

    let started = Instant::now();
    let status = tokio::time::timeout(Duration::from_secs(10), supervisor.wait(instance))
        .await
        .expect("watchdog must end the plugin")
        .unwrap();
    assert_eq!(status.code(), Some(0));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_idle_watchdog_fires_despite_steady_calls() {
    let config = test_config(500);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    let addr = supervisor.wait_ready(&mut instance).await.unwrap();
    let ready_at = Instant::now();

    let mut handle = RemoteHandle::dial(addr, DialPolicy::default())
        .await
        .unwrap()
        .with_call_timeout(Some(Duration::from_secs(2)));
    let mut calls = 0;
    while handle.revert("abc").await.is_ok() {
        calls += 1;
        assert!(ready_at.elapsed() < Duration::from_secs(3), "plugin outlived its idle window");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(calls > 0);

    let status = tokio::time::timeout(Duration::from_secs(10), supervisor.wait(instance))
        .await
        .expect("watchdog must end the plugin")
        .unwrap();
    assert_eq!(status.code(), Some(0));
    assert!(ready_at.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_immediate_dial_races_plugin_startup() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = test_config(30_000);
    config.endpoint.port = port;
    config.readiness = ReadinessConfig::FixedDelay { delay_ms: 0 };
    plugin_rpc::config::validate(&config).unwrap();

    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    let addr = supervisor.wait_ready(&mut instance).await.unwrap();
    assert_eq!(addr.port(), port);

    // No settle time: the child has not bound its endpoint yet.
    let err = RemoteHandle::dial(addr, DialPolicy::once())
        .await
        .err()
        .expect("plugin cannot be listening yet");
    assert!(err.is_connect(), "unexpected error: {err:?}");

    let lifecycle = instance.lifecycle().clone();
    supervisor.terminate(instance).await.unwrap();
    assert!(lifecycle.current().is_terminal());
}

#[tokio::test]
async fn test_dial_failure_still_reaps_plugin() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    supervisor.wait_ready(&mut instance).await.unwrap();

    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let err = RemoteHandle::dial(closed, DialPolicy::once())
        .await
        .err()
        .expect("nothing listens there");
    assert!(err.is_connect());

    let lifecycle = instance.lifecycle().clone();
    let status = supervisor.terminate(instance).await.unwrap();
    // SIGTERM is an orderly exit for the plugin.
    assert!(status.success());
    assert!(lifecycle.current().is_terminal());
}

#[tokio::test]
async fn test_missing_executable_is_spawn_error() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let err = supervisor
        .spawn(
            &PathBuf::from("/nonexistent/plugin-rpc-missing"),
            &config.plugin.args,
        )
        .err()
        .expect("spawn must fail");
    assert!(matches!(
        err,
        RpcError::Process(ProcessError::Spawn { .. })
    ));
}

#[test]
fn test_plugin_bind_failure_exits_non_zero() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let output = std::process::Command::new(plugin_binary())
        .args(["--port", &port.to_string(), "plugin"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "no ready line on bind failure");
}

#[test]
fn test_non_loopback_override_rejected() {
    let output = std::process::Command::new(plugin_binary())
        .args(["--host", "0.0.0.0", "--port", "0", "plugin"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_frame_limit_mismatch_is_transport_fault() {
    let config = test_config(30_000);
    let supervisor = supervisor(&config);
    let mut instance = supervisor
        .spawn(&plugin_binary(), &config.plugin.args)
        .expect("spawn plugin");
    let addr = supervisor.wait_ready(&mut instance).await.unwrap();

    let mut handle = RemoteHandle::dial(addr, DialPolicy::default()).await.unwrap();
    let huge = "a".repeat(config.max_frame_bytes + 1);
    let err = handle.revert(&huge).await.unwrap_err();
    assert!(
        matches!(
            err,
            RpcError::Transport(TransportError::Call(_)) | RpcError::Transport(TransportError::Frame(_))
        ),
        "unexpected error: {err:?}"
    );
    assert!(handle.is_closed());

    supervisor.terminate(instance).await.unwrap();
}
