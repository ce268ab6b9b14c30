// ABOUTME: Forwards the local ssh agent into the remote session.
// ABOUTME: One fresh agent connection and relay task per remote-opened channel.

use super::client::dial_agent;
use super::error::{Error, Result};
use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Channel type the remote side opens for agent forwarding.
pub const CHANNEL_TYPE: &str = "auth-agent@openssh.com";

/// Per-session forwarding registration. The address latch is single-use:
/// at most one forwarding handler per session.
#[derive(Default)]
pub struct AgentForwarder {
    addr: OnceLock<PathBuf>,
}

impl AgentForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the local agent address for this session and probe it once.
    /// The probe connection is closed immediately; reachability is all it
    /// proves. A second call fails with `AlreadyForwarding` and leaves the
    /// first registration intact.
    pub async fn enable(&self, addr: impl Into<PathBuf>) -> Result<()> {
        let addr = addr.into();
        let probe = addr.clone();
        self.addr.set(addr).map_err(|_| Error::AlreadyForwarding)?;

        let conn = dial_agent(&probe)
            .await
            .map_err(|source| Error::Dial { addr: probe, source })?;
        drop(conn);
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.addr.get().is_some()
    }

    /// Hand an accepted forwarding channel its own relay task. Channels
    /// arriving before `enable` are closed.
    pub fn accept(&self, channel: Channel<Msg>) {
        match self.addr.get() {
            Some(addr) => {
                let addr = addr.clone();
                tokio::spawn(async move {
                    relay(channel, &addr).await;
                });
            }
            None => {
                tokio::spawn(async move {
                    let _ = channel.close().await;
                });
            }
        }
    }
}

/// The slice of the session channel the copy loop needs. Tests run the loop
/// against an in-memory double instead of a live session.
#[async_trait]
trait ForwardingChannel: Send {
    async fn recv(&mut self) -> Option<ChannelMsg>;
    async fn send_data(&mut self, buf: &[u8]) -> std::result::Result<(), russh::Error>;
    async fn send_eof(&mut self) -> std::result::Result<(), russh::Error>;
    async fn send_close(&mut self) -> std::result::Result<(), russh::Error>;
}

#[async_trait]
impl ForwardingChannel for Channel<Msg> {
    async fn recv(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }

    async fn send_data(&mut self, buf: &[u8]) -> std::result::Result<(), russh::Error> {
        self.data(buf).await
    }

    async fn send_eof(&mut self) -> std::result::Result<(), russh::Error> {
        self.eof().await
    }

    async fn send_close(&mut self) -> std::result::Result<(), russh::Error> {
        self.close().await
    }
}

/// Relay one forwarding channel to a fresh agent connection. Errors stay
/// confined to this channel.
async fn relay(mut channel: Channel<Msg>, addr: &Path) {
    let stream = match dial_agent(addr).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(addr = %addr.display(), "dial ssh agent failed: {err}");
            let _ = channel.close().await;
            return;
        }
    };
    let (agent_rd, agent_wr) = stream.into_split();
    pump(&mut channel, agent_rd, agent_wr).await;
}

/// Copy loop between a forwarding channel and the agent connection, both
/// directions until each source reaches end-of-stream. Half-close keeps
/// in-flight replies alive: channel EOF shuts down only the agent's write
/// side, agent EOF sends channel EOF. The channel is closed once both
/// directions are done (or on a hard close from the remote).
async fn pump<C, R, W>(channel: &mut C, mut agent_rd: R, mut agent_wr: W)
where
    C: ForwardingChannel,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut agent_done = false;
    let mut channel_done = false;
    let mut buf = vec![0u8; 8192];

    while !(agent_done && channel_done) {
        tokio::select! {
            read = agent_rd.read(&mut buf), if !agent_done => match read {
                Ok(0) => {
                    agent_done = true;
                    let _ = channel.send_eof().await;
                }
                Ok(n) => {
                    if let Err(err) = channel.send_data(&buf[..n]).await {
                        debug!("forward channel data error: {err}");
                        break;
                    }
                }
                Err(err) => {
                    debug!("agent read error: {err}");
                    agent_done = true;
                    let _ = channel.send_eof().await;
                }
            },
            msg = channel.recv(), if !channel_done => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    if let Err(err) = agent_wr.write_all(data).await {
                        debug!("agent write error: {err}");
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    channel_done = true;
                    let _ = agent_wr.shutdown().await;
                }
                Some(ChannelMsg::Close) | None => break,
                // Out-of-band requests on forwarding channels are discarded.
                Some(_) => {}
            },
        }
    }

    let _ = channel.send_close().await;
}
