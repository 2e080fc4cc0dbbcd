//! Pacing and cancellation for the background verification loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Enforces a minimum gap between consecutive explorer calls.
///
/// One pacer is shared by every loop talking to the same explorer. The first
/// call goes through immediately; a later call waits until its `spacing` has
/// elapsed since the previous call was released.
#[derive(Debug, Default)]
pub struct Pacer {
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next slot. Returns `false` if cancelled while waiting.
    pub async fn ready(&self, spacing: Duration, cancel: &CancellationFlag) -> bool {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let due = previous + spacing;
            if Instant::now() < due {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = cancel.cancelled() => return false,
                }
            }
        }
        if cancel.is_cancelled() {
            return false;
        }
        *last = Some(Instant::now());
        true
    }
}

/// Externally settable stop signal shared by the sweep, poll loop and hydration.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    inner: Arc<FlagInner>,
}

#[derive(Debug, Default)]
struct FlagInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`. Returns `false` if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}
