//! Cooperative cancellation shared across harvest tasks.
//!
//! A [`CancelToken`] is created once at startup, wired to Ctrl+C (and
//! optionally a wall-clock deadline), and passed explicitly to every task
//! that needs to observe it. Tasks check the flag at window boundaries and
//! wait on it during backoff sleeps so cancellation is honored promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation token observed by all in-flight harvest work.
///
/// Cloning is cheap and all clones share one flag. Once cancelled, the token
/// stays cancelled for the rest of the process.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is requested. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        // Register the waiter before re-checking the flag so a cancel()
        // between the check and the await cannot be missed.
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Spawn a task that cancels this token after `deadline` elapses.
    /// Used for the run-level wall-clock budget.
    pub fn cancel_after(&self, deadline: Duration) {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !token.is_cancelled() {
                tracing::warn!(
                    deadline_secs = deadline.as_secs(),
                    "run deadline reached, cancelling remaining work"
                );
                token.cancel();
            }
        });
    }

    /// Sleep for `duration`, returning early with `false` if cancellation
    /// arrives first. Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
