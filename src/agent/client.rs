// ABOUTME: Agent address resolution and the once-constructed agent client holder.
// ABOUTME: Absent or unreachable agents are an explicit None, never a silent global.

use crate::config::{AgentConfig, resolve_home};
use crate::shutdown::ShutdownRegistry;
use parking_lot::Mutex;
use russh::keys::agent::client::AgentClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Fallback socket consulted when neither config nor environment name one.
const DEFAULT_AGENT_SOCK: &str = "~/.ssh/agent.sock";

/// Resolve the agent socket address: per-host config first (`none` disables
/// agent use), then `SSH_AUTH_SOCK`, then the default path if it exists.
pub fn resolve_agent_addr(cfg: &AgentConfig) -> Option<PathBuf> {
    if let Some(addr) = &cfg.identity_agent {
        if addr.eq_ignore_ascii_case("none") {
            return None;
        }
        return Some(resolve_home(addr));
    }
    if let Ok(addr) = std::env::var("SSH_AUTH_SOCK") {
        if !addr.is_empty() {
            return Some(PathBuf::from(addr));
        }
    }
    let default = resolve_home(DEFAULT_AGENT_SOCK);
    if default.exists() {
        return Some(default);
    }
    None
}

/// Dial the local agent socket. Each forwarding channel gets its own fresh
/// connection; there is no pooling.
pub async fn dial_agent(addr: &Path) -> std::io::Result<UnixStream> {
    UnixStream::connect(addr).await
}

pub type SharedAgent = Arc<AsyncMutex<AgentClient<UnixStream>>>;

/// Holder for the local agent client, constructed once during client setup
/// and passed by handle to every consumer (primarily authentication).
pub struct AgentHolder {
    client: Mutex<Option<SharedAgent>>,
}

impl AgentHolder {
    /// Connect to the configured agent. "Not configured" and "unreachable"
    /// both yield a holder with no client; consumers see an explicit `None`.
    /// Registers a close on `registry` so the connection is released once
    /// login is finished with it.
    pub async fn connect(cfg: &AgentConfig, registry: &ShutdownRegistry) -> Arc<Self> {
        let Some(addr) = resolve_agent_addr(cfg) else {
            debug!("ssh agent address is not set");
            return Arc::new(Self {
                client: Mutex::new(None),
            });
        };

        match AgentClient::connect_uds(&addr).await {
            Ok(client) => {
                debug!(addr = %addr.display(), "new ssh agent client success");
                let holder = Arc::new(Self {
                    client: Mutex::new(Some(Arc::new(AsyncMutex::new(client)))),
                });
                let cleanup = Arc::clone(&holder);
                registry.register(move || async move { cleanup.close() });
                holder
            }
            Err(err) => {
                debug!(addr = %addr.display(), "dial ssh agent failed: {err}");
                Arc::new(Self {
                    client: Mutex::new(None),
                })
            }
        }
    }

    /// The shared client, if an agent was reachable at setup.
    pub fn client(&self) -> Option<SharedAgent> {
        self.client.lock().clone()
    }

    /// Drop the held client; the connection closes once the last consumer
    /// lets go. Safe to call more than once.
    pub fn close(&self) {
        self.client.lock().take();
    }
}
