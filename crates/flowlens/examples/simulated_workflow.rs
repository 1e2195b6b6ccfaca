//! Traces a simulated two-step workflow.
//!
//! Run with: cargo run --example simulated_workflow
//!
//! Set COLLECTOR_API_KEY (and optionally COLLECTOR_ENDPOINT) to export the
//! trace; without a key it is assembled and logged only.

use async_trait::async_trait;
use flowlens::prelude::*;
use serde_json::{json, Value};

/// A tiny in-memory engine: "Edit Fields" echoes its parameters, "OpenAI Chat" answers with a canned reply.
struct InMemoryEngine;

#[async_trait]
impl WorkflowHost for InMemoryEngine {
    type Error = anyhow::Error;

    async fn begin_workflow_run(&self, workflow: &WorkflowDescriptor) -> anyhow::Result<RunResult> {
        tracing::info!(workflow = workflow.run_name(), "Engine run finished");
        Ok(RunResult::default())
    }

    async fn execute_step(
        &self,
        _workflow: &WorkflowDescriptor,
        context: &StepContext,
        _history: &RunHistory,
        _step_index: usize,
        _options: &Value,
    ) -> anyhow::Result<StepResult> {
        let rows = match context.step.step_type.as_deref() {
            Some("set") => vec![json!({ "json": context.step.parameters })],
            Some("openai-chat") => vec![json!({
                "json": {
                    "output": "Rust is a systems programming language.",
                    "usage": { "prompt_tokens": 12, "completion_tokens": 9, "total_tokens": 21 }
                }
            })],
            other => anyhow::bail!("unsupported step type {:?}", other),
        };
        Ok(StepResult::new(rows))
    }
}

async fn run_workflow(host: &InstrumentedHost<InMemoryEngine>) -> anyhow::Result<()> {
    let workflow = WorkflowDescriptor::new("1001", "Simulated workflow");
    let mut history = RunHistory::new();

    let steps = [
        StepDescriptor::new("Edit Fields", "set", json!({ "topic": "Rust" })),
        StepDescriptor::new(
            "OpenAI Chat",
            "openai-chat",
            json!({ "model": "gpt-4o-mini", "prompt": "=What is {{ $json.topic }}?", "temperature": 0.2 }),
        ),
    ];

    // Steps reported before their run begins wait in the orphan queue.
    let mut input = Value::Null;
    for (index, step) in steps.into_iter().enumerate() {
        let name = step.display_name().to_string();
        let context = StepContext::new(step, input.clone());
        let result = host
            .execute_step(&workflow, &context, &history, index, &Value::Null)
            .await?;
        if let Some(row) = result.rows.first() {
            history.record(name, row.clone());
            input = row.clone();
        }
    }

    host.begin_workflow_run(&workflow).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TracingConfig::from_env()?;
    flowlens::init_logging(&config.log_level);
    flowlens::install_panic_hook();

    let (host, instrumentation) = flowlens::instrument(InMemoryEngine, &config);

    let code = match instrumentation {
        Some(instrumentation) => {
            let coordinator = instrumentation.shutdown_coordinator();
            coordinator.run(run_workflow(&host)).await
        }
        None => match run_workflow(&host).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "Workflow failed");
                1
            }
        },
    };

    std::process::exit(code);
}
