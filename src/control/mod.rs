// ABOUTME: Control master supervision and control socket connection.
// ABOUTME: Multiplexes client invocations over one authenticated background process.

mod command;
mod connect;
mod error;
mod master;
mod pty;

pub use command::{build_args, openssh_path};
pub use connect::connect_via_control;
pub use error::{Error, Result};
pub use master::{MasterHandle, start_control_master};
