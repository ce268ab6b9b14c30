// ABOUTME: Library root for muxgate - connection multiplexing and agent forwarding.
// ABOUTME: The surrounding SSH client consumes these components via resolved config structs.

pub mod agent;
pub mod config;
pub mod control;
pub mod handler;
pub mod prompt;
pub mod shutdown;
