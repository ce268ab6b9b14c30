// ABOUTME: Agent-side error types.
// ABOUTME: Covers forwarding registration and local agent dialing failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("agent forwarding already enabled for this session")]
    AlreadyForwarding,

    #[error("dial ssh agent [{}] failed: {source}", .addr.display())]
    Dial {
        addr: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
