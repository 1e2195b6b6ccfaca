//! Graceful shutdown coordination.
//!
//! On termination the coordinator force-closes every open run, exports them,
//! and waits for background exports before the process exits.

use flowlens_monitor::{DrainResult, TraceAssembler};
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    /// Every open run was closed and every export finished.
    Complete { closed: usize },
    /// The deadline passed with work still outstanding.
    Timeout { remaining: u32 },
}

/// Drains open traces on process termination.
pub struct ShutdownCoordinator {
    assembler: Arc<TraceAssembler>,
    state: Arc<RwLock<ShutdownState>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Creates a coordinator that drains `assembler` within `timeout`.
    pub fn new(assembler: Arc<TraceAssembler>, timeout: Duration) -> Self {
        Self {
            assembler,
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            timeout,
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Force-closes open runs (as successful) and waits for all exports.
    ///
    /// Only the first call drains; later calls return immediately.
    pub async fn shutdown(&self) -> ShutdownResult {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                return ShutdownResult::Complete { closed: 0 };
            }
            *state = ShutdownState::Draining;
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let result = match tokio::time::timeout_at(deadline, self.assembler.force_close_all()).await {
            Ok(closed) => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                match self.assembler.wait_for_exports(remaining).await {
                    DrainResult::Complete => ShutdownResult::Complete { closed },
                    DrainResult::Timeout { remaining } => ShutdownResult::Timeout { remaining },
                }
            }
            Err(_) => {
                let open = self.assembler.buffer().all_runs().len() as u32;
                ShutdownResult::Timeout {
                    remaining: open + self.assembler.tracker().in_flight(),
                }
            }
        };

        match &result {
            ShutdownResult::Complete { closed } => {
                tracing::info!(closed, "Trace drain complete")
            }
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "Trace drain timed out")
            }
        }

        *self.state.write().await = ShutdownState::Stopped;
        result
    }

    /// Runs `main` until it finishes or a termination signal arrives, then drains.
    ///
    /// Returns the process exit code: 0 after a clean finish or a signal,
    /// 1 when `main` returned an error or panicked.
    pub async fn run<F, T, E>(&self, main: F) -> i32
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let code = tokio::select! {
            outcome = AssertUnwindSafe(main).catch_unwind() => match outcome {
                Ok(Ok(_)) => 0,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Fatal error, draining traces before exit");
                    1
                }
                Err(_) => {
                    tracing::error!("Fatal panic, draining traces before exit");
                    1
                }
            },
            signal = wait_for_signal() => {
                tracing::info!(signal, "Received termination signal, draining traces");
                0
            }
        };

        self.shutdown().await;
        code
    }
}

/// Resolves with the name of the first termination signal received.
///
/// If signal handlers cannot be installed the error is logged and this never resolves.
pub async fn wait_for_signal() -> &'static str {
    match listen().await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install signal handlers");
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn listen() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn listen() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

/// Logs panics through `tracing` before the default hook runs.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "Uncaught panic");
        previous(info);
    }));
}

/// Logs a failed detached task. The process keeps running.
pub fn report_task_failure(err: tokio::task::JoinError) {
    if err.is_cancelled() {
        tracing::debug!("Background task cancelled");
    } else {
        tracing::error!(error = %err, "Background task failed");
    }
}
