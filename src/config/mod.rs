// ABOUTME: Resolved per-destination configuration for multiplexing and agent use.
// ABOUTME: Values arrive pre-resolved from the surrounding client's option layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// ControlMaster policy for a destination.
///
/// Anything other than the four active modes (including "no" and unknown
/// values) disables multiplexing for this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexMode {
    #[default]
    Off,
    Yes,
    Ask,
    Auto,
    AutoAsk,
}

impl FromStr for MultiplexMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "yes" => Self::Yes,
            "ask" => Self::Ask,
            "auto" => Self::Auto,
            "autoask" => Self::AutoAsk,
            _ => Self::Off,
        })
    }
}

/// Multiplexing settings resolved for one destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    /// ControlMaster mode.
    pub mode: MultiplexMode,
    /// ControlPath after token expansion. A leading `~` is resolved by this
    /// crate; an empty value or `none` disables multiplexing.
    pub path: String,
}

impl ControlConfig {
    pub fn new(mode: MultiplexMode, path: impl Into<String>) -> Self {
        Self {
            mode,
            path: path.into(),
        }
    }
}

/// Everything needed to launch the background OpenSSH control master.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Destination as the user typed it, after alias resolution.
    pub destination: String,
    /// Destination before alias resolution, preferred for the OpenSSH
    /// invocation when present so its own config lookup matches.
    pub original_destination: Option<String>,
    /// OpenSSH client binary. Defaults to `/usr/bin/ssh`.
    pub ssh_path: Option<PathBuf>,
    /// Pass `-v` to the child.
    pub debug: bool,
    /// Request agent forwarding (`-A`).
    pub forward_agent: bool,
    /// Explicit agent-forwarding opt-out; wins over `forward_agent`.
    pub no_forward_agent: bool,
    pub login_name: Option<String>,
    pub port: Option<u16>,
    pub config_file: Option<PathBuf>,
    pub proxy_jump: Option<String>,
    /// Identity files, in order (`-i`).
    pub identities: Vec<String>,
    /// Dynamic port-forward binds (`-D`).
    pub dynamic_forwards: Vec<String>,
    /// Local port-forward specs (`-L`).
    pub local_forwards: Vec<String>,
    /// Remote port-forward specs (`-R`).
    pub remote_forwards: Vec<String>,
    /// Remaining resolved options, keyed by lowercased name, passed through
    /// as `-okey=value` minus the filtered internal ones.
    pub options: HashMap<String, Vec<String>>,
    /// Number of interactive prompts expected during login. Zero means no
    /// pseudo-terminal and no prompter.
    pub expect_count: u32,
    /// Deadline for the prompter task. Unset means it runs until `start`
    /// returns.
    #[serde(default, with = "humantime_serde")]
    pub expect_timeout: Option<Duration>,
}

impl MasterConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn ssh_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_path = Some(path.into());
        self
    }

    pub fn login_name(mut self, name: impl Into<String>) -> Self {
        self.login_name = Some(name.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn expect_count(mut self, count: u32) -> Self {
        self.expect_count = count;
        self
    }

    pub fn expect_timeout(mut self, timeout: Duration) -> Self {
        self.expect_timeout = Some(timeout);
        self
    }
}

/// Agent-related settings resolved for one destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Per-host IdentityAgent value. `none` disables agent use entirely;
    /// unset falls back to `SSH_AUTH_SOCK`, then the default socket path.
    pub identity_agent: Option<String>,
}

/// Resolve a leading `~` or `~/` prefix against `$HOME`. Anything else
/// passes through untouched.
pub fn resolve_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
