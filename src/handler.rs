// ABOUTME: russh client handler: host key verification plus agent-forward channels.
// ABOUTME: Remote-opened auth-agent channels are routed into the shared forwarder.

use crate::agent::AgentForwarder;
use russh::Channel;
use russh::client::{self, Msg, Session};
use russh::keys::known_hosts::{check_known_hosts, learn_known_hosts};
use russh::keys::ssh_key;
use std::sync::Arc;
use tracing::warn;

/// Client-side connection handler for sessions built by the surrounding
/// client. Holds the forwarder so every `auth-agent@openssh.com` channel the
/// remote opens gets relayed to the local agent.
pub struct ClientHandler {
    host: String,
    port: u16,
    /// Accept and record unknown host keys instead of failing.
    trust_on_first_use: bool,
    forwarder: Arc<AgentForwarder>,
}

impl ClientHandler {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        trust_on_first_use: bool,
        forwarder: Arc<AgentForwarder>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            trust_on_first_use,
            forwarder,
        }
    }

    pub fn forwarder(&self) -> &Arc<AgentForwarder> {
        &self.forwarder
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) if self.trust_on_first_use => {
                warn!(
                    "trust-on-first-use: accepting unknown host key for {}:{}",
                    self.host, self.port
                );
                if let Err(err) = learn_known_hosts(&self.host, self.port, server_public_key) {
                    warn!("failed to save host key to known_hosts: {err}");
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(russh::keys::Error::KeyChanged { .. }) => Ok(false),
            Err(_) => Ok(self.trust_on_first_use),
        }
    }

    async fn server_channel_open_agent_forward(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        self.forwarder.accept(channel);
        Ok(())
    }
}
