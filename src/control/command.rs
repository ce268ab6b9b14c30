// ABOUTME: OpenSSH binary resolution and control master argument construction.
// ABOUTME: Rejects self-invocation and filters internal-only options from pass-through.

use super::error::{Error, Result};
use crate::config::MasterConfig;
use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_SSH_PATH: &str = "/usr/bin/ssh";

/// Keys never passed through to the OpenSSH invocation: the remote command
/// is pinned by the control master itself, and the prompt-automation toggles
/// only mean something inside this client.
const FILTERED_OPTIONS: &[&str] = &["remotecommand", "expectcount", "expecttimeout"];

fn real_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Resolve the OpenSSH client binary to spawn. Spawning ourselves would
/// recurse, so the resolved path must not be the current executable.
pub fn openssh_path(cfg: &MasterConfig) -> Result<PathBuf> {
    let ssh_path = cfg
        .ssh_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SSH_PATH));
    let current = std::env::current_exe()?;
    if real_path(&current) == real_path(&ssh_path) {
        return Err(Error::SelfInvocation(ssh_path));
    }
    Ok(ssh_path)
}

/// Build the argument list for the control master invocation.
///
/// `-T` plus a pinned remote command: the child exists to authenticate, emit
/// the handshake token, and idle just long enough for the control socket to
/// be dialed.
pub fn build_args(cfg: &MasterConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-T".into(),
        "-oRemoteCommand=none".into(),
        "-oConnectTimeout=5".into(),
    ];

    if cfg.debug {
        args.push("-v".into());
    }
    if cfg.forward_agent && !cfg.no_forward_agent {
        args.push("-A".into());
    }
    if let Some(login) = &cfg.login_name {
        args.push("-l".into());
        args.push(login.clone());
    }
    if let Some(port) = cfg.port {
        args.push("-p".into());
        args.push(port.to_string());
    }
    if let Some(file) = &cfg.config_file {
        args.push("-F".into());
        args.push(file.display().to_string());
    }
    if let Some(jump) = &cfg.proxy_jump {
        args.push("-J".into());
        args.push(jump.clone());
    }

    for identity in &cfg.identities {
        args.push("-i".into());
        args.push(identity.clone());
    }
    for bind in &cfg.dynamic_forwards {
        args.push("-D".into());
        args.push(bind.clone());
    }
    for forward in &cfg.local_forwards {
        args.push("-L".into());
        args.push(forward.clone());
    }
    for forward in &cfg.remote_forwards {
        args.push("-R".into());
        args.push(forward.clone());
    }

    for (key, values) in &cfg.options {
        if FILTERED_OPTIONS.contains(&key.as_str()) {
            continue;
        }
        for value in values {
            args.push(format!("-o{key}={value}"));
        }
    }

    args.push(
        cfg.original_destination
            .clone()
            .unwrap_or_else(|| cfg.destination.clone()),
    );
    // 10 seconds of idle keeps the socket attachable while we dial it.
    args.push("echo ok; sleep 10".into());
    args
}
