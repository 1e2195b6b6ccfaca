//! Decorator that instruments a [`WorkflowHost`] without changing its behavior.

use async_trait::async_trait;
use flowlens_core::{
    RunHistory, RunOutcome, RunResult, StepContext, StepResult, WorkflowDescriptor, WorkflowHost,
};
use serde_json::Value;
use std::sync::Arc;

use crate::assembler::TraceAssembler;

/// A host whose lifecycle calls are traced.
///
/// Results and errors of the wrapped host are returned untouched. Without an
/// assembler the wrapper is a plain passthrough.
pub struct InstrumentedHost<H> {
    inner: H,
    assembler: Option<Arc<TraceAssembler>>,
}

impl<H: WorkflowHost> InstrumentedHost<H> {
    /// Wraps `inner`, feeding its lifecycle calls to `assembler`.
    pub fn new(inner: H, assembler: Arc<TraceAssembler>) -> Self {
        Self { inner, assembler: Some(assembler) }
    }

    /// Wraps a host without tracing; used when instrumentation could not be set up.
    pub fn passthrough(inner: H) -> Self {
        Self { inner, assembler: None }
    }

    /// Returns the wrapped host.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Unwraps the host.
    pub fn into_inner(self) -> H {
        self.inner
    }

    /// False for a [`InstrumentedHost::passthrough`] wrapper.
    pub fn is_instrumented(&self) -> bool {
        self.assembler.is_some()
    }
}

/// Wraps `host` so that both lifecycle calls feed `assembler`.
pub fn wrap<H: WorkflowHost>(assembler: &Arc<TraceAssembler>, host: H) -> InstrumentedHost<H> {
    InstrumentedHost::new(host, assembler.clone())
}

#[async_trait]
impl<H: WorkflowHost> WorkflowHost for InstrumentedHost<H> {
    type Error = H::Error;

    async fn begin_workflow_run(&self, workflow: &WorkflowDescriptor) -> Result<RunResult, H::Error> {
        let Some(assembler) = &self.assembler else {
            return self.inner.begin_workflow_run(workflow).await;
        };

        let run_id = workflow.run_id().to_string();
        assembler.open_run(workflow);

        let result = self.inner.begin_workflow_run(workflow).await;

        let outcome = match &result {
            Ok(run) => RunOutcome::Completed { success: run.error.is_none() },
            Err(e) => RunOutcome::failed(e.to_string()),
        };
        assembler.complete_run(&run_id, outcome).await;

        result
    }

    async fn execute_step(
        &self,
        workflow: &WorkflowDescriptor,
        context: &StepContext,
        history: &RunHistory,
        step_index: usize,
        options: &Value,
    ) -> Result<StepResult, H::Error> {
        let Some(assembler) = &self.assembler else {
            return self
                .inner
                .execute_step(workflow, context, history, step_index, options)
                .await;
        };

        let pending = assembler.start_step(workflow, context, history);
        let result = self
            .inner
            .execute_step(workflow, context, history, step_index, options)
            .await;

        match &result {
            Ok(output) => assembler.complete_step(pending, &output.rows),
            Err(e) => assembler.fail_step(pending, &e.to_string()),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::{ExportError, Payload, Run, StepDescriptor, TraceExporter};
    use serde_json::json;
    use std::fmt;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct HostError(String);

    impl fmt::Display for HostError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    struct FailingHost;

    #[async_trait]
    impl WorkflowHost for FailingHost {
        type Error = HostError;

        async fn begin_workflow_run(&self, _workflow: &WorkflowDescriptor) -> Result<RunResult, HostError> {
            Err(HostError("run exploded".into()))
        }

        async fn execute_step(
            &self,
            _workflow: &WorkflowDescriptor,
            _context: &StepContext,
            _history: &RunHistory,
            _step_index: usize,
            _options: &Value,
        ) -> Result<StepResult, HostError> {
            Err(HostError("step exploded".into()))
        }
    }

    #[derive(Default)]
    struct Collected(Mutex<Vec<Run>>);

    #[async_trait]
    impl TraceExporter for Collected {
        async fn export(&self, run: &Run) -> Result<(), ExportError> {
            self.0.lock().unwrap().push(run.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_host_errors_pass_through_unchanged() {
        let exporter = Arc::new(Collected::default());
        let assembler = Arc::new(TraceAssembler::new(exporter.clone()));
        let host = wrap(&assembler, FailingHost);
        let wf = WorkflowDescriptor::new("9", "failing");

        let ctx = StepContext::new(StepDescriptor::new("Http", "httpRequest", json!({})), Value::Null);
        let step_err = host
            .execute_step(&wf, &ctx, &RunHistory::new(), 0, &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(step_err, HostError("step exploded".into()));

        let run_err = host.begin_workflow_run(&wf).await.unwrap_err();
        assert_eq!(run_err, HostError("run exploded".into()));

        assembler.wait_for_exports(Duration::from_secs(2)).await;
        let traces = exporter.0.lock().unwrap();
        let summary = traces[0].steps.last().unwrap();
        assert_eq!(summary.output, Payload::json(json!({"error": "run exploded"})));
    }

    #[tokio::test]
    async fn test_passthrough_records_nothing() {
        let host = InstrumentedHost::passthrough(FailingHost);
        assert!(!host.is_instrumented());
        let err = host.begin_workflow_run(&WorkflowDescriptor::default()).await.unwrap_err();
        assert_eq!(err.0, "run exploded");
    }
}
