// ABOUTME: Integration tests for the control socket connection policy.
// ABOUTME: Unix listeners stand in for sockets; fake ssh scripts for the master.

mod support;

use muxgate::config::{ControlConfig, MasterConfig, MultiplexMode};
use muxgate::control::connect_via_control;
use muxgate::shutdown::ShutdownRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

/// Fake ssh that records its invocation through a marker file, so tests can
/// assert whether a master was started at all.
fn marked_ssh(dir: &std::path::Path, marker: &std::path::Path) -> std::path::PathBuf {
    support::fake_ssh(
        dir,
        "ssh-marked",
        &format!("touch {}\necho ok\nsleep 10", marker.display()),
    )
}

async fn run_connect(
    control: &ControlConfig,
    cfg: &MasterConfig,
    registry: &ShutdownRegistry,
) -> (Option<bool>, bool) {
    let attached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&attached);
    let result = connect_via_control(control, cfg, registry, None, move |mut stream| async move {
        flag.store(true, Ordering::SeqCst);
        stream.write_all(b"ping").await?;
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await?;
        Ok::<bool, std::io::Error>(&buf == b"ping")
    })
    .await;
    (result, attached.load(Ordering::SeqCst))
}

fn echo_listener(listener: UnixListener) {
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
            }
        }
    });
}

/// Test: multiplexing mode off.
/// Expected: no master spawned, no dial, caller told to connect directly.
#[tokio::test]
async fn mode_off_skips_everything() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let marker = dir.path().join("spawned");
    let ssh = marked_ssh(dir.path(), &marker);

    let control = ControlConfig::new(MultiplexMode::Off, dir.path().join("ctl").to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, None);
    assert!(!attached);
    assert!(!marker.exists());
}

/// Test: control path set to `none`.
/// Expected: multiplexing disabled regardless of mode.
#[tokio::test]
async fn path_none_disables_multiplexing() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let marker = dir.path().join("spawned");
    let ssh = marked_ssh(dir.path(), &marker);

    let control = ControlConfig::new(MultiplexMode::Auto, "None");
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, None);
    assert!(!attached);
    assert!(!marker.exists());
}

/// Test: mode yes with a path that already exists.
/// Expected: neither started nor dialed; the existing socket is left alone.
#[tokio::test]
async fn yes_mode_backs_off_from_existing_socket() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let marker = dir.path().join("spawned");
    let ssh = marked_ssh(dir.path(), &marker);

    let socket = dir.path().join("ctl");
    std::fs::write(&socket, b"").expect("pre-existing path");

    let control = ControlConfig::new(MultiplexMode::Yes, socket.to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, None);
    assert!(!attached);
    assert!(!marker.exists());
}

/// Test: auto mode with a healthy master and a listening socket.
/// Expected: master started, socket dialed, attach round-trips data.
#[tokio::test]
async fn auto_mode_connects_through_the_socket() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let marker = dir.path().join("spawned");
    let ssh = marked_ssh(dir.path(), &marker);

    // The real master would create this listener itself; binding it up front
    // keeps the test independent of OpenSSH.
    let socket = dir.path().join("ctl");
    echo_listener(UnixListener::bind(&socket).expect("bind control socket"));

    let control = ControlConfig::new(MultiplexMode::Auto, socket.to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, Some(true));
    assert!(attached);
    assert!(marker.exists());
    assert_eq!(registry.pending(), 1);

    registry.drain().await;
}

/// Test: master start fails but something is already listening on the path.
/// Expected: the failure is non-fatal and the dial still succeeds.
#[tokio::test]
async fn failed_start_still_dials_existing_master() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");

    let socket = dir.path().join("ctl");
    echo_listener(UnixListener::bind(&socket).expect("bind control socket"));

    let control = ControlConfig::new(MultiplexMode::Auto, socket.to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(dir.path().join("no-such-ssh"));
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, Some(true));
    assert!(attached);
}

/// Test: nothing listens on the socket path.
/// Expected: dial failure degrades to a direct connection.
#[tokio::test]
async fn dial_failure_falls_back_to_direct() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let ssh = support::fake_ssh(dir.path(), "ssh-ok", "echo ok\nsleep 10");

    let socket = dir.path().join("ctl");
    let control = ControlConfig::new(MultiplexMode::Auto, socket.to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let (result, attached) = run_connect(&control, &cfg, &registry).await;
    assert_eq!(result, None);
    assert!(!attached);

    // The master itself started fine; release it.
    registry.drain().await;
}

/// Test: attach closure rejects the stream.
/// Expected: treated like any other multiplexing failure.
#[tokio::test]
async fn attach_failure_falls_back_to_direct() {
    support::init_tracing();
    let dir = tempdir().expect("tempdir");
    let ssh = support::fake_ssh(dir.path(), "ssh-ok", "echo ok\nsleep 10");

    let socket = dir.path().join("ctl");
    echo_listener(UnixListener::bind(&socket).expect("bind control socket"));

    let control = ControlConfig::new(MultiplexMode::Auto, socket.to_str().unwrap());
    let cfg = MasterConfig::new("testhost").ssh_path(ssh);
    let registry = ShutdownRegistry::new();

    let result = connect_via_control(&control, &cfg, &registry, None, |_stream| async {
        Err::<bool, _>(std::io::Error::other("handshake refused"))
    })
    .await;
    assert_eq!(result, None);

    registry.drain().await;
}
