// ABOUTME: Supervises the background OpenSSH control master process.
// ABOUTME: Races the handshake token, process exit, and user interrupt; bounded shutdown.

use super::command;
use super::error::{Error, Result};
use super::pty;
use crate::config::MasterConfig;
use crate::prompt::{PromptGuard, Prompter};
use crate::shutdown::ShutdownRegistry;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::{oneshot, watch};
use tokio::time::{Duration, sleep};
use tracing::debug;

/// How long a quitting master gets between SIGINT and SIGKILL.
const GRACE_PERIOD: Duration = Duration::from_millis(500);

/// One supervised background multiplexing process.
pub(crate) struct ControlMaster {
    path: PathBuf,
    args: Vec<String>,
    /// True while credential entry may still be occurring; bounds the stderr
    /// pass-through task. Written only by `start`.
    logging_in: Arc<AtomicBool>,
    /// Set at most once, by the exit watcher.
    exited: Arc<AtomicBool>,
}

/// Shutdown handle for a started control master.
#[derive(Clone)]
pub struct MasterHandle {
    pid: Option<i32>,
    exited: Arc<AtomicBool>,
    exit_rx: watch::Receiver<bool>,
}

impl MasterHandle {
    /// Ask the process to quit. No-op once it has exited; otherwise SIGINT,
    /// escalating to SIGKILL after the grace period, then wait for the exit
    /// watcher to reap it.
    pub async fn quit(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        self.kill(Signal::SIGINT);
        let mut exit_rx = self.exit_rx.clone();
        tokio::select! {
            _ = async {
                let _ = exit_rx.wait_for(|exited| *exited).await;
            } => {}
            _ = sleep(GRACE_PERIOD) => {
                self.kill(Signal::SIGKILL);
                let _ = self.exit_rx.clone().wait_for(|exited| *exited).await;
            }
        }
    }

    fn kill(&self, sig: Signal) {
        // The saved pid may be recycled once the exit watcher has reaped the
        // child; re-check right before signalling.
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        if let Some(pid) = self.pid {
            let _ = signal::kill(Pid::from_raw(pid), sig);
        }
    }
}

impl ControlMaster {
    pub(crate) fn new(path: PathBuf, args: Vec<String>) -> Self {
        Self {
            path,
            args,
            logging_in: Arc::new(AtomicBool::new(false)),
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pass the child's stderr through to ours while login is in progress,
    /// so interactive diagnostics (host key prompts, banners) stay visible.
    fn spawn_stderr(&self, mut stderr: ChildStderr) {
        let logging_in = Arc::clone(&self.logging_in);
        tokio::spawn(async move {
            let mut out = tokio::io::stderr();
            let mut buf = [0u8; 100];
            while logging_in.load(Ordering::SeqCst) {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = out.write_all(&buf[..n]).await;
                        let _ = out.flush().await;
                    }
                }
            }
        });
    }

    /// Single read of the child's stdout: the handshake is the literal token
    /// `ok`, trimmed of surrounding whitespace. Anything else is a protocol
    /// violation.
    fn spawn_stdout(&self, mut stdout: ChildStdout) -> oneshot::Receiver<Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut buf = [0u8; 1000];
            let result = match stdout.read(&mut buf).await {
                Err(err) => Err(Error::StdoutRead(err)),
                Ok(n) => {
                    if buf[..n].trim_ascii().eq_ignore_ascii_case(b"ok") {
                        Ok(())
                    } else {
                        Err(Error::UnexpectedToken(buf[..n].to_vec()))
                    }
                }
            };
            let _ = done_tx.send(result);
        });
        done_rx
    }

    /// Reap the child and flip `exited`; also the single place the pty
    /// master is closed.
    fn spawn_exit_watcher(
        &self,
        mut child: Child,
        master: Option<std::fs::File>,
    ) -> watch::Receiver<bool> {
        let (exit_tx, exit_rx) = watch::channel(false);
        let exited = Arc::clone(&self.exited);
        tokio::spawn(async move {
            let _ = child.wait().await;
            exited.store(true, Ordering::SeqCst);
            drop(master);
            let _ = exit_tx.send(true);
        });
        exit_rx
    }

    pub(crate) async fn start(
        &self,
        cfg: &MasterConfig,
        registry: &ShutdownRegistry,
        prompter: Option<Arc<dyn Prompter>>,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut master = None;
        let mut _prompt_guard = None;
        if cfg.expect_count > 0 {
            let pty_master = pty::attach_controlling_tty(&mut cmd)?;
            if let Some(prompter) = prompter {
                let terminal = pty_master.prompter_handle()?;
                _prompt_guard = Some(PromptGuard::spawn(
                    prompter,
                    terminal,
                    cfg.destination.clone(),
                    cfg.expect_count,
                    cfg.expect_timeout,
                ));
            }
            master = Some(pty_master.into_file());
        }

        let mut child = cmd.spawn().map_err(Error::Spawn)?;
        let pid = child.id().map(|pid| pid as i32);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("stdout pipe missing")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("stderr pipe missing")))?;

        self.logging_in.store(true, Ordering::SeqCst);

        // The race below is this stream's only consumer, but listening
        // changes the process-wide SIGINT disposition for good (see
        // `start_control_master`).
        let mut interrupt = unix_signal(SignalKind::interrupt())?;

        self.spawn_stderr(stderr);
        let mut exit_rx = self.spawn_exit_watcher(child, master);
        let mut done_rx = self.spawn_stdout(stdout);

        let handle = MasterHandle {
            pid,
            exited: Arc::clone(&self.exited),
            exit_rx: exit_rx.clone(),
        };

        let result = tokio::select! {
            done = &mut done_rx => match done {
                Ok(result) => result,
                Err(_) => Err(Error::StdoutRead(std::io::Error::other(
                    "stdout watcher dropped",
                ))),
            },
            _ = exit_rx.wait_for(|exited| *exited) => Err(Error::Exited),
            _ = interrupt.recv() => {
                handle.quit().await;
                Err(Error::Interrupted)
            }
        };

        self.logging_in.store(false, Ordering::SeqCst);

        // The master stays up on success; ask it to quit when the whole
        // client run ends, unless it went away on its own first.
        if result.is_ok() && !self.exited.load(Ordering::SeqCst) {
            let handle = handle.clone();
            registry.register(move || async move { handle.quit().await });
        }

        result
    }
}

/// Launch a control master for `cfg` and wait for its handshake signal.
///
/// Listening for SIGINT during the handshake installs a process-global
/// handler that outlives this call, so the default terminate-on-interrupt
/// behavior is gone once it has run. The embedding client owns interrupt
/// handling from then on.
pub async fn start_control_master(
    cfg: &MasterConfig,
    registry: &ShutdownRegistry,
    prompter: Option<Arc<dyn Prompter>>,
) -> Result<()> {
    let path = command::openssh_path(cfg)?;
    let args = command::build_args(cfg);
    debug!(path = %path.display(), args = ?args, "control master");

    let master = ControlMaster::new(path, args);
    master.start(cfg, registry, prompter).await?;
    debug!("start control master success");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn spawn_for_quit(script: &str) -> MasterHandle {
        let master = ControlMaster::new("/bin/sh".into(), vec!["-c".into(), script.into()]);
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn");
        let pid = child.id().map(|pid| pid as i32);
        let exit_rx = master.spawn_exit_watcher(child, None);
        MasterHandle {
            pid,
            exited: Arc::clone(&master.exited),
            exit_rx,
        }
    }

    /// Test: quit a process that ignores SIGINT.
    /// Expected: SIGKILL after the 500ms grace window; never blocks much past it.
    #[tokio::test]
    async fn quit_escalates_to_kill_within_grace_window() {
        let handle = spawn_for_quit("trap '' INT; sleep 30").await;
        // Let the shell install its trap before signalling.
        sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        handle.quit().await;

        assert!(handle.exited.load(Ordering::SeqCst));
        let elapsed = started.elapsed();
        assert!(
            elapsed >= GRACE_PERIOD && elapsed < Duration::from_secs(3),
            "quit took {elapsed:?}"
        );
    }

    /// Test: quit a process that honors SIGINT.
    /// Expected: voluntary exit well before the grace window ends.
    #[tokio::test]
    async fn quit_observes_voluntary_exit() {
        let handle = spawn_for_quit("sleep 30").await;
        sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        handle.quit().await;

        assert!(handle.exited.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Test: signalling through a handle already marked exited.
    /// Expected: nothing is delivered, even if the saved pid is live again.
    #[tokio::test]
    async fn kill_is_suppressed_once_exited() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn");
        let (_exit_tx, exit_rx) = watch::channel(false);
        let handle = MasterHandle {
            pid: child.id().map(|pid| pid as i32),
            exited: Arc::new(AtomicBool::new(true)),
            exit_rx,
        };

        handle.kill(Signal::SIGKILL);
        sleep(Duration::from_millis(100)).await;
        assert!(child.try_wait().expect("try_wait").is_none());

        let _ = child.kill().await;
    }

    /// Test: quit after the process has already exited.
    /// Expected: immediate no-op, no signal sent.
    #[tokio::test]
    async fn quit_is_a_noop_once_exited() {
        let handle = spawn_for_quit("exit 0").await;
        let mut exit_rx = handle.exit_rx.clone();
        exit_rx.wait_for(|exited| *exited).await.expect("exit watch");

        let started = Instant::now();
        handle.quit().await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
