//! Core domain types and error definitions for flowlens.
//!
//! This crate provides the types shared across the flowlens workspace:
//!
//! - [`Run`] and [`StepRecord`]: the in-progress trace and its spans
//! - [`Payload`]: tagged input/output values carried by a span
//! - [`WorkflowHost`]: the two host lifecycle calls that get instrumented
//! - [`TraceExporter`] and [`ExportError`]: the seam between assembly and delivery
//!
//! # Example
//!
//! ```rust
//! use flowlens_core::{Payload, StepKind, StepRecord};
//!
//! let step = StepRecord::new(
//!     StepKind::Component,
//!     "Set",
//!     Payload::json(serde_json::json!({"x": 1})),
//!     1_700_000_000_000,
//! );
//! assert_eq!(step.kind, StepKind::Component);
//! ```

mod host;
mod record;

pub use host::{
    RunHistory, RunResult, StepContext, StepDescriptor, StepResult, WorkflowDescriptor,
    WorkflowHost,
};
pub use record::{
    now_ms, ChatMessage, LlmDetails, Payload, Run, RunOutcome, StepKind, StepRecord, Timestamps,
    TokenMetrics,
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while delivering a finished trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// The collector answered with a non-success status.
    #[error("Collector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (connect failure, reset, DNS).
    #[error("Collector request failed: {0}")]
    Transport(String),

    /// The request exceeded the per-attempt timeout.
    #[error("Collector request timed out after {0} ms")]
    Timeout(u64),

    /// The trace could not be serialized.
    #[error("Failed to serialize trace: {0}")]
    Serialize(String),

    /// Every attempt failed with a retryable error.
    #[error("Export failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ExportError {
    /// Returns true for failures worth another attempt: 5xx, transport errors, timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Status { status, .. } => *status >= 500,
            ExportError::Transport(_) | ExportError::Timeout(_) => true,
            ExportError::Serialize(_) | ExportError::RetriesExhausted { .. } => false,
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialize(err.to_string())
    }
}

/// Destination for closed runs.
///
/// Implementations receive an immutable snapshot; the buffer never mutates
/// a run after handing it over.
#[async_trait]
pub trait TraceExporter: Send + Sync {
    /// Delivers one finished trace.
    async fn export(&self, run: &Run) -> Result<(), ExportError>;
}
