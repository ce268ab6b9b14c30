// ABOUTME: Pseudo-terminal plumbing for interactive credential entry.
// ABOUTME: The slave becomes the child's stdin and controlling terminal; the master stays local.

use super::error::{Error, Result};
use nix::pty::openpty;
use std::process::Stdio;
use tokio::process::Command;

/// Master side of an allocated pty. Owned by the supervisor; closed exactly
/// once by the exit watcher.
pub(crate) struct PtyMaster {
    file: std::fs::File,
}

impl PtyMaster {
    /// Duplicate the master for the prompter task. The original stays here.
    pub(crate) fn prompter_handle(&self) -> std::io::Result<tokio::fs::File> {
        Ok(tokio::fs::File::from_std(self.file.try_clone()?))
    }

    pub(crate) fn into_file(self) -> std::fs::File {
        self.file
    }
}

/// Allocate a pty and attach its slave as `cmd`'s stdin and controlling
/// terminal. The child is placed in a fresh session so TIOCSCTTY succeeds;
/// stdout/stderr stay whatever pipes the caller configured.
pub(crate) fn attach_controlling_tty(cmd: &mut Command) -> Result<PtyMaster> {
    let pty = openpty(None, None).map_err(Error::Pty)?;
    cmd.stdin(Stdio::from(pty.slave));
    // Runs between fork and exec: only async-signal-safe calls allowed.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(PtyMaster {
        file: std::fs::File::from(pty.master),
    })
}
