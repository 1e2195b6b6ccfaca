//! Correlates host lifecycle calls into run-level traces.

use flowlens_core::{
    now_ms, LlmDetails, Payload, Run, RunHistory, RunOutcome, StepContext, StepKind, StepRecord,
    TokenMetrics, TraceExporter, WorkflowDescriptor,
};
use flowlens_extract::{extract_output, is_model_step, ModelCall};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::TraceBuffer;
use crate::tracker::{DrainResult, ExportTracker};

/// A step record waiting for its host call to finish.
#[derive(Debug, Clone)]
pub struct PendingStep {
    run_id: String,
    record: StepRecord,
    model: Option<ModelCall>,
}

impl PendingStep {
    /// Run the step belongs to.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Classification decided when the step started.
    pub fn kind(&self) -> StepKind {
        self.record.kind
    }
}

/// Builds step records, feeds them to the buffer, and exports closed runs.
pub struct TraceAssembler {
    buffer: Arc<TraceBuffer>,
    exporter: Arc<dyn TraceExporter>,
    tracker: ExportTracker,
}

impl TraceAssembler {
    /// Creates an assembler with a fresh buffer.
    pub fn new(exporter: Arc<dyn TraceExporter>) -> Self {
        Self::with_buffer(Arc::new(TraceBuffer::new()), exporter)
    }

    /// Creates an assembler over an existing buffer.
    pub fn with_buffer(buffer: Arc<TraceBuffer>, exporter: Arc<dyn TraceExporter>) -> Self {
        Self {
            buffer,
            exporter,
            tracker: ExportTracker::new(),
        }
    }

    /// The buffer holding open runs and orphaned steps.
    pub fn buffer(&self) -> &Arc<TraceBuffer> {
        &self.buffer
    }

    /// Tracks exports still in flight.
    pub fn tracker(&self) -> &ExportTracker {
        &self.tracker
    }

    /// Registers the run for a workflow about to execute.
    pub fn open_run(&self, workflow: &WorkflowDescriptor) -> Run {
        let run = self.buffer.begin_run(workflow.run_id(), workflow.run_name());
        tracing::info!(run_id = %run.run_id, trace_id = %run.trace_id, "Workflow run started");
        run
    }

    /// Classifies a step and prepares its record before the host executes it.
    pub fn start_step(
        &self,
        workflow: &WorkflowDescriptor,
        context: &StepContext,
        history: &RunHistory,
    ) -> PendingStep {
        let run_id = workflow.run_id().to_string();
        let name = context.step.display_name().to_string();
        let started_at = now_ms();

        if !self.buffer.contains(&run_id) {
            tracing::debug!(%run_id, step = %name, "Step started before its run was registered");
        }

        if is_model_step(&context.step) {
            let call = ModelCall::inspect(context, history);
            let record = StepRecord::new(StepKind::Llm, name, call.input_payload(), started_at)
                .with_llm(LlmDetails {
                    vendor: call.target.vendor.clone(),
                    model: call.target.model.clone(),
                    parameters: call.parameters.clone(),
                    metrics: TokenMetrics::default(),
                });
            return PendingStep { run_id, record, model: Some(call) };
        }

        let record = StepRecord::new(
            StepKind::Component,
            name,
            Payload::json(context.step.parameters.clone()),
            started_at,
        );
        PendingStep { run_id, record, model: None }
    }

    /// Finalizes a step with the host's output rows and appends it.
    pub fn complete_step(&self, pending: PendingStep, rows: &[Value]) {
        let PendingStep { run_id, mut record, model } = pending;

        let output = match &model {
            Some(call) => {
                let extracted = extract_output(rows);
                let usage = extracted.usage_or_estimate(&call.system_message, &call.user_input);
                if let Some(details) = record.llm.as_mut() {
                    details.metrics = usage;
                }
                Payload::text(extracted.text)
            }
            None => Payload::json(Value::Array(rows.to_vec())),
        };

        record.finish(output, now_ms());
        tracing::debug!(
            %run_id,
            step = %record.name,
            kind = record.kind.as_str(),
            tokens = record.metrics().total_tokens,
            "Step completed"
        );
        self.buffer.append_step(&run_id, record);
    }

    /// Finalizes a step whose host call failed and appends it.
    pub fn fail_step(&self, pending: PendingStep, message: &str) {
        let PendingStep { run_id, mut record, .. } = pending;
        record.finish(Payload::text(format!("Error: {}", message)), now_ms());
        tracing::debug!(%run_id, step = %record.name, error = %message, "Step failed");
        self.buffer.append_step(&run_id, record);
    }

    /// Closes a run and exports it on a detached task.
    ///
    /// Returns as soon as the export is spawned; the run is removed from the
    /// buffer once the export attempt finishes, whether or not it succeeded.
    /// Outside a Tokio runtime the export runs inline before returning.
    pub async fn complete_run(&self, run_id: &str, outcome: RunOutcome) {
        let Some(run) = self.buffer.close_run(run_id, &outcome) else {
            return;
        };
        tracing::info!(
            run_id,
            trace_id = %run.trace_id,
            steps = run.steps.len(),
            outcome = ?outcome,
            "Workflow run closed"
        );

        let buffer = self.buffer.clone();
        let exporter = self.exporter.clone();
        let task = async move {
            export_and_release(&buffer, exporter.as_ref(), &run).await;
        };

        if let Err(task) = self.tracker.spawn(task) {
            tracing::debug!(run_id, "No Tokio runtime; exporting trace inline");
            task.await;
        }
    }

    /// Closes a run and exports it on the caller's task.
    pub async fn close_and_export(&self, run_id: &str, outcome: RunOutcome) {
        let Some(run) = self.buffer.close_run(run_id, &outcome) else {
            return;
        };
        export_and_release(&self.buffer, self.exporter.as_ref(), &run).await;
    }

    /// Force-closes every open run and exports them all.
    ///
    /// Runs without a known outcome are closed as successful.
    pub async fn force_close_all(&self) -> usize {
        let open: Vec<String> = self
            .buffer
            .all_runs()
            .into_iter()
            .filter(|run| !run.is_complete)
            .map(|run| run.run_id)
            .collect();

        if !open.is_empty() {
            tracing::info!(count = open.len(), "Force-closing open workflow runs");
        }

        let dropped = self.buffer.clear_orphans();
        if dropped > 0 {
            tracing::warn!(steps = dropped, "Dropping steps whose run never began");
        }

        let exports = open
            .iter()
            .map(|run_id| self.close_and_export(run_id, RunOutcome::success()));
        futures::future::join_all(exports).await;

        open.len()
    }

    /// Waits for detached exports to finish.
    pub async fn wait_for_exports(&self, timeout: Duration) -> DrainResult {
        self.tracker.wait_idle(timeout).await
    }
}

async fn export_and_release(buffer: &TraceBuffer, exporter: &dyn TraceExporter, run: &Run) {
    match exporter.export(run).await {
        Ok(()) => tracing::debug!(trace_id = %run.trace_id, "Trace exported"),
        Err(e) => tracing::error!(trace_id = %run.trace_id, error = %e, "Failed to export trace"),
    }
    buffer.remove_trace(&run.run_id, &run.trace_id);
}
