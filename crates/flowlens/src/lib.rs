//! Trace instrumentation for workflow engines.
//!
//! Wraps a [`WorkflowHost`] so every run and step is recorded, assembled into
//! a trace, and exported to a collector when the run finishes.
//!
//! ```no_run
//! use flowlens::prelude::*;
//!
//! # async fn example<H: WorkflowHost>(host: H) {
//! let config = TracingConfig::from_env().unwrap_or_default();
//! flowlens::init_logging(&config.log_level);
//!
//! let (host, instrumentation) = flowlens::instrument(host, &config);
//! // drive `host` as the engine normally would
//! # let _ = host;
//! if let Some(instrumentation) = instrumentation {
//!     instrumentation.shutdown_coordinator().shutdown().await;
//! }
//! # }
//! ```

mod shutdown;

use flowlens_config::{ConfigError, TracingConfig};
use flowlens_core::{ExportError, TraceExporter, WorkflowHost};
use flowlens_export::ExportClient;
use flowlens_monitor::{InstrumentedHost, TraceAssembler};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use shutdown::{
    install_panic_hook, report_task_failure, wait_for_signal, ShutdownCoordinator,
    ShutdownResult, ShutdownState,
};

pub use flowlens_config as config;
pub use flowlens_core as model;
pub use flowlens_export as export;
pub use flowlens_extract as extract;
pub use flowlens_monitor as monitor;

pub mod prelude {
    pub use crate::{instrument, Instrumentation, ShutdownCoordinator, ShutdownResult};
    pub use flowlens_config::TracingConfig;
    pub use flowlens_core::{
        ExportError, Payload, Run, RunHistory, RunOutcome, RunResult, StepContext,
        StepDescriptor, StepKind, StepRecord, StepResult, TraceExporter, WorkflowDescriptor,
        WorkflowHost,
    };
    pub use flowlens_export::ExportClient;
    pub use flowlens_monitor::{InstrumentedHost, TraceAssembler, TraceBuffer};
}

/// Failure while building the tracing pipeline.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Export client error: {0}")]
    Export(#[from] ExportError),
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Returns false when a subscriber
/// was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .compact()
        .try_init()
        .is_ok()
}

/// An installed tracing pipeline: assembler, exporter and shutdown settings.
#[derive(Clone)]
pub struct Instrumentation {
    assembler: Arc<TraceAssembler>,
    shutdown_timeout: Duration,
}

impl Instrumentation {
    /// Builds the pipeline with an HTTP [`ExportClient`].
    pub fn install(config: &TracingConfig) -> Result<Self, SetupError> {
        let client = ExportClient::new(config)?;
        if client.is_enabled() {
            tracing::info!(url = client.url(), "Trace export enabled");
        } else {
            tracing::info!("No collector API key set; traces will be assembled but not exported");
        }
        Ok(Self::with_exporter(Arc::new(client)).with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Builds the pipeline around any exporter.
    pub fn with_exporter(exporter: Arc<dyn TraceExporter>) -> Self {
        Self {
            assembler: Arc::new(TraceAssembler::new(exporter)),
            shutdown_timeout: TracingConfig::default().shutdown_timeout(),
        }
    }

    /// Overrides the shutdown drain bound.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Wraps `host` so its lifecycle calls feed this pipeline.
    pub fn wrap<H: WorkflowHost>(&self, host: H) -> InstrumentedHost<H> {
        flowlens_monitor::wrap(&self.assembler, host)
    }

    /// Returns the shared assembler.
    pub fn assembler(&self) -> &Arc<TraceAssembler> {
        &self.assembler
    }

    /// Creates a coordinator bound to this pipeline's assembler and drain timeout.
    pub fn shutdown_coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(self.assembler.clone(), self.shutdown_timeout)
    }
}

/// Wraps `host` with tracing.
///
/// Never fails: if the pipeline cannot be built the error is logged and the
/// host is returned untraced.
pub fn instrument<H: WorkflowHost>(
    host: H,
    config: &TracingConfig,
) -> (InstrumentedHost<H>, Option<Instrumentation>) {
    match Instrumentation::install(config) {
        Ok(instrumentation) => (instrumentation.wrap(host), Some(instrumentation)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to set up tracing; continuing without it");
            (InstrumentedHost::passthrough(host), None)
        }
    }
}

/// Loads configuration from the environment and wraps `host` with tracing.
pub fn instrument_from_env<H: WorkflowHost>(
    host: H,
) -> (InstrumentedHost<H>, Option<Instrumentation>) {
    match TracingConfig::from_env() {
        Ok(config) => instrument(host, &config),
        Err(e) => {
            tracing::error!(error = %e, "Invalid tracing configuration; continuing without it");
            (InstrumentedHost::passthrough(host), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowlens_core::{RunHistory, RunResult, StepContext, StepResult, WorkflowDescriptor};
    use serde_json::Value;

    struct NoopHost;

    #[async_trait]
    impl WorkflowHost for NoopHost {
        type Error = String;

        async fn begin_workflow_run(&self, _: &WorkflowDescriptor) -> Result<RunResult, String> {
            Ok(RunResult::default())
        }

        async fn execute_step(
            &self,
            _: &WorkflowDescriptor,
            _: &StepContext,
            _: &RunHistory,
            _: usize,
            _: &Value,
        ) -> Result<StepResult, String> {
            Ok(StepResult::default())
        }
    }

    #[test]
    fn test_instrument_without_key_still_traces() {
        let (host, instrumentation) = instrument(NoopHost, &TracingConfig::default());
        assert!(host.is_instrumented());
        assert!(instrumentation.is_some());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("debug");
        assert!(!init_logging("info"));
    }
}
