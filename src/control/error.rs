// ABOUTME: Control-plane error types.
// ABOUTME: Covers binary resolution, process startup, and handshake failures.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{} is the current program", .0.display())]
    SelfInvocation(PathBuf),

    #[error("open pty failed: {0}")]
    Pty(#[source] nix::Error),

    #[error("control master start failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("read stdout failed: {0}")]
    StdoutRead(#[source] std::io::Error),

    #[error("control master stdout invalid: {0:?}")]
    UnexpectedToken(Vec<u8>),

    #[error("control master process exited")]
    Exited,

    #[error("user interrupt control master")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
