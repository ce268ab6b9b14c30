// ABOUTME: Explicit registry of deferred cleanup actions.
// ABOUTME: Appended to during setup, drained exactly once at a well-defined shutdown point.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Deferred teardown actions with a lifecycle bound to one phase of the
/// client run (end of process, after login, ...). The client creates one
/// registry per phase and passes it to whatever needs to register cleanup.
#[derive(Default)]
pub struct ShutdownRegistry {
    actions: Mutex<Vec<Action>>,
    drained: AtomicBool,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup action. Actions registered after the drain has run
    /// are dropped with a warning rather than executed out of phase.
    pub fn register<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.drained.load(Ordering::SeqCst) {
            tracing::warn!("cleanup action registered after shutdown, dropping");
            return;
        }
        self.actions.lock().push(Box::new(move || action().boxed()));
    }

    /// Number of actions currently registered.
    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    /// Run every registered action, most recent first. Only the first call
    /// drains; later calls are no-ops.
    pub async fn drain(&self) {
        if self.drained.swap(true, Ordering::SeqCst) {
            return;
        }
        let actions = std::mem::take(&mut *self.actions.lock());
        for action in actions.into_iter().rev() {
            action().await;
        }
    }
}
