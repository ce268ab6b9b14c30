// ABOUTME: Local ssh-agent integration: address resolution, client holder, forwarding.
// ABOUTME: The agent's private material never leaves this machine; only its replies do.

mod client;
mod error;
mod forward;

pub use client::{AgentHolder, SharedAgent, dial_agent, resolve_agent_addr};
pub use error::{Error, Result};
pub use forward::{AgentForwarder, CHANNEL_TYPE};
