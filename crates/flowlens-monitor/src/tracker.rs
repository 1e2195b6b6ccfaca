//! Tracking of detached export tasks so shutdown can wait for them.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Result of waiting for in-flight exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Counts background export tasks and wakes waiters as they finish.
#[derive(Clone, Default)]
pub struct ExportTracker {
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ExportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a detached task on the current runtime.
    ///
    /// A panic inside the task is logged and contained. Outside a Tokio
    /// runtime the task is handed back so the caller can run it inline.
    pub fn spawn<F>(&self, task: F) -> Result<(), F>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Err(task);
        };

        let guard = self.track();
        handle.spawn(async move {
            let _guard = guard;
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                tracing::error!("Background export task panicked");
            }
        });
        Ok(())
    }

    /// Registers one in-flight unit of work until the guard drops.
    pub fn track(&self) -> TrackGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        TrackGuard {
            counter: self.in_flight.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Number of tracked tasks not yet finished.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until nothing is in flight or `timeout` elapses.
    pub async fn wait_idle(&self, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let count = self.in_flight();
            if count == 0 {
                return DrainResult::Complete;
            }

            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining_time.is_zero() {
                return DrainResult::Timeout { remaining: count };
            }

            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = tokio::time::sleep(remaining_time) => {
                    let final_count = self.in_flight();
                    if final_count == 0 {
                        return DrainResult::Complete;
                    }
                    return DrainResult::Timeout { remaining: final_count };
                }
            }
        }
    }
}

/// RAII guard for one tracked task.
pub struct TrackGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for TrackGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_idle_after_tasks_finish() {
        let tracker = ExportTracker::new();
        for _ in 0..3 {
            assert!(tracker
                .spawn(async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                })
                .is_ok());
        }
        assert_eq!(tracker.wait_idle(Duration::from_secs(2)).await, DrainResult::Complete);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out() {
        let tracker = ExportTracker::new();
        let _held = tracker.track();
        let result = tracker.wait_idle(Duration::from_millis(20)).await;
        assert_eq!(result, DrainResult::Timeout { remaining: 1 });
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let tracker = ExportTracker::new();
        assert!(tracker.spawn(async { panic!("boom") }).is_ok());
        assert_eq!(tracker.wait_idle(Duration::from_secs(1)).await, DrainResult::Complete);
    }

    #[test]
    fn test_spawn_without_runtime() {
        let tracker = ExportTracker::new();
        assert!(tracker.spawn(async {}).is_err());
        assert_eq!(tracker.in_flight(), 0);
    }
}
