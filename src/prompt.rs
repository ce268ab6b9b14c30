// ABOUTME: Seam for the interactive credential prompter collaborator.
// ABOUTME: The supervisor lends it a dup of the pty master, bounded by a deadline or guard.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Feeds credentials into the control master's pseudo-terminal.
///
/// Implemented by the surrounding client; this crate only schedules it.
/// `terminal` is a duplicate of the pty master, good for reading prompts and
/// writing responses. The supervisor keeps the original and closes it when
/// the process exits.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn drive(&self, terminal: tokio::fs::File, destination: String, expect_count: u32);
}

/// Cancels the prompter task when dropped. Cancellation never touches the
/// child process; only the supervisor's quit does that.
pub struct PromptGuard {
    handle: JoinHandle<()>,
}

impl PromptGuard {
    pub(crate) fn spawn(
        prompter: Arc<dyn Prompter>,
        terminal: tokio::fs::File,
        destination: String,
        expect_count: u32,
        deadline: Option<Duration>,
    ) -> Self {
        let fut = async move {
            prompter.drive(terminal, destination, expect_count).await;
        };
        let handle = match deadline {
            Some(limit) => tokio::spawn(async move {
                let _ = tokio::time::timeout(limit, fut).await;
            }),
            None => tokio::spawn(fut),
        };
        Self { handle }
    }
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
