//! Detached task tracker.
//!
//! Work spawned here runs on its own task, so cancelling whoever scheduled it
//! does not cancel the work. Tasks are kept in a [`JoinSet`] so shutdown can
//! wait for them with [`drain_with_timeout`](BackgroundTracker::drain_with_timeout).

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::warn;

/// Decrements the pending count when the task finishes or is aborted.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Tracks fire-and-forget tasks for eventual draining.
///
/// Dropping the tracker aborts whatever is still running.
pub struct BackgroundTracker {
    tasks: Mutex<JoinSet<()>>,
    pending: Arc<AtomicUsize>,
}

impl BackgroundTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn `future` as a tracked task. Must be called inside a tokio runtime.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(Arc::clone(&self.pending));

        let mut tasks = self.tasks.lock();
        while let Some(done) = tasks.try_join_next() {
            log_join_error(done);
        }
        let _ = tasks.spawn(async move {
            let _guard = guard;
            future.await;
        });
    }

    /// Wait for every tracked task, including ones spawned while draining.
    pub async fn drain_all(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                log_join_error(done);
            }
        }
    }

    /// [`drain_all`](Self::drain_all) with a deadline. Returns `true` if
    /// everything finished; on timeout the remaining tasks are aborted.
    /// Aborted tasks have been dropped by the time this returns.
    pub async fn drain_with_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return true;
            }
            loop {
                match tokio::time::timeout_at(deadline, batch.join_next()).await {
                    Ok(Some(done)) => log_join_error(done),
                    Ok(None) => break,
                    Err(_) => {
                        abort_and_reap(&mut batch).await;
                        let mut late = std::mem::take(&mut *self.tasks.lock());
                        abort_and_reap(&mut late).await;
                        return false;
                    }
                }
            }
        }
    }

    /// Tasks spawned but not yet finished.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn abort_and_reap(tasks: &mut JoinSet<()>) {
    tasks.abort_all();
    while let Some(done) = tasks.join_next().await {
        log_join_error(done);
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            warn!(error = %e, "background task panicked");
        }
    }
}

impl Default for BackgroundTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTracker")
            .field("pending_count", &self.pending_count())
            .finish()
    }
}
