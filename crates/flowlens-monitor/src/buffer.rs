//! In-memory store of open runs and of steps that arrived before their run.

use flowlens_core::{now_ms, Payload, Run, RunOutcome, StepKind, StepRecord};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct BufferState {
    runs: HashMap<String, Run>,
    orphans: HashMap<String, Vec<StepRecord>>,
}

/// Owner of all run and orphan state.
///
/// Every operation takes the lock once, so each call is atomic with respect
/// to any other call on the same buffer. Runs are handed out as snapshots.
#[derive(Default)]
pub struct TraceBuffer {
    state: Mutex<BufferState>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run started now. See [`TraceBuffer::begin_run_at`].
    pub fn begin_run(&self, run_id: &str, run_name: &str) -> Run {
        self.begin_run_at(run_id, run_name, now_ms())
    }

    /// Registers a run, replacing any open run with the same id, and drains
    /// orphaned steps queued under that id in arrival order.
    pub fn begin_run_at(&self, run_id: &str, run_name: &str, started_at: i64) -> Run {
        let mut run = Run::new(run_id, run_name, started_at);

        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(run_id, "Failed to acquire trace buffer lock");
            return run;
        };

        if let Some(orphans) = state.orphans.remove(run_id) {
            tracing::debug!(run_id, count = orphans.len(), "Draining orphaned steps into run");
            for step in orphans {
                attach(&mut run, step);
            }
        }

        if let Some(previous) = state.runs.insert(run_id.to_string(), run.clone()) {
            tracing::debug!(
                run_id,
                replaced_trace = %previous.trace_id,
                dropped_steps = previous.steps.len(),
                "Replaced open run with the same id"
            );
        }

        run
    }

    /// Snapshot of a run, if registered.
    pub fn get_run(&self, run_id: &str) -> Option<Run> {
        let state = self.state.lock().ok()?;
        state.runs.get(run_id).cloned()
    }

    /// True while a run with this id is open. A poisoned lock reads as absent.
    pub fn contains(&self, run_id: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.runs.contains_key(run_id))
            .unwrap_or(false)
    }

    /// Appends a step to its run, or queues it as an orphan until the run is registered.
    pub fn append_step(&self, run_id: &str, step: StepRecord) {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(run_id, "Failed to acquire trace buffer lock");
            return;
        };

        match state.runs.get_mut(run_id) {
            Some(run) => attach(run, step),
            None => {
                tracing::debug!(run_id, step = %step.name, "Queued step for unregistered run");
                state.orphans.entry(run_id.to_string()).or_default().push(step);
            }
        }
    }

    /// Appends the workflow summary span and marks the run complete.
    ///
    /// Not idempotent: closing twice appends two summaries.
    pub fn close_run(&self, run_id: &str, outcome: &RunOutcome) -> Option<Run> {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!(run_id, "Failed to acquire trace buffer lock");
            return None;
        };

        let Some(run) = state.runs.get_mut(run_id) else {
            tracing::warn!(run_id, "Cannot close unknown run");
            return None;
        };

        let mut summary = StepRecord::new(
            StepKind::WorkflowSummary,
            run.run_name.clone(),
            Payload::text(format!("Workflow: {}", run.run_name)),
            run.started_at,
        );
        summary.finish(Payload::json(outcome.to_value()), now_ms());
        attach(run, summary);
        run.is_complete = true;

        Some(run.clone())
    }

    /// Deletes a run entry.
    pub fn remove_run(&self, run_id: &str) -> Option<Run> {
        let mut state = self.state.lock().ok()?;
        state.runs.remove(run_id)
    }

    /// Deletes a run entry only if it still holds the given trace.
    ///
    /// Used after a background export so that a newer run registered under
    /// the same id is left alone.
    pub fn remove_trace(&self, run_id: &str, trace_id: &str) -> Option<Run> {
        let mut state = self.state.lock().ok()?;
        match state.runs.get(run_id) {
            Some(run) if run.trace_id == trace_id => state.runs.remove(run_id),
            _ => None,
        }
    }

    /// Snapshots of every registered run.
    pub fn all_runs(&self) -> Vec<Run> {
        self.state
            .lock()
            .map(|s| s.runs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Discards every orphan queue, returning how many steps were dropped.
    pub fn clear_orphans(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            tracing::warn!("Failed to acquire trace buffer lock");
            return 0;
        };
        state.orphans.drain().map(|(_, steps)| steps.len()).sum()
    }

    /// Number of steps queued under a run id that has not been registered.
    pub fn orphan_count(&self, run_id: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.orphans.get(run_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Assigns the span id and folds token usage into the run.
///
/// A step whose span id is already present replaces the earlier record in
/// place. Summaries are always appended.
fn attach(run: &mut Run, mut step: StepRecord) {
    run.token_usage.accumulate(&step.metrics());

    if step.kind == StepKind::WorkflowSummary {
        step.span_id = run.summary_span_id();
        run.steps.push(step);
        return;
    }

    step.span_id = run.step_span_id(&step.name);
    match run.steps.iter_mut().find(|s| s.span_id == step.span_id) {
        Some(existing) => *existing = step,
        None => run.steps.push(step),
    }
}
