//! Trace buffering and assembly for instrumented workflow runs.
//!
//! - [`TraceBuffer`] owns open runs and orphaned steps
//! - [`TraceAssembler`] turns lifecycle calls into step records and closed runs
//! - [`InstrumentedHost`] wraps a [`flowlens_core::WorkflowHost`] to drive the assembler
//! - [`ExportTracker`] follows detached export tasks for shutdown draining

mod assembler;
mod buffer;
mod instrumented;
mod tracker;

pub use assembler::{PendingStep, TraceAssembler};
pub use buffer::TraceBuffer;
pub use instrumented::{wrap, InstrumentedHost};
pub use tracker::{DrainResult, ExportTracker, TrackGuard};
