//! Trace and span types for in-progress workflow runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// A step classified as a model invocation.
    Llm,
    /// Any other step; input/output are carried verbatim.
    Component,
    /// Synthetic span appended when a run closes.
    WorkflowSummary,
}

impl StepKind {
    /// Wire name of the kind, as sent in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Llm => "llm",
            StepKind::Component => "component",
            StepKind::WorkflowSummary => "workflow-summary",
        }
    }
}

/// A single chat message in a `chat_messages` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Tagged input/output value of a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Json(Value),
    ChatMessages(Vec<ChatMessage>),
}

impl Payload {
    /// Plain text payload.
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    /// Arbitrary JSON payload.
    pub fn json(value: Value) -> Self {
        Payload::Json(value)
    }

    /// Returns the text content when this is a `text` payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Token counters for a span or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenMetrics {
    /// Creates metrics with `total_tokens` as the (saturating) sum of both sides.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Adds another set of counters into this one. Counters only grow.
    pub fn accumulate(&mut self, other: &TokenMetrics) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }

    /// True when every counter is zero.
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// Start and end of a span, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub started_at: i64,
    pub finished_at: i64,
}

/// Model-specific fields present only on `llm` spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDetails {
    pub vendor: String,
    pub model: String,
    #[serde(rename = "params")]
    pub parameters: Map<String, Value>,
    pub metrics: TokenMetrics,
}

/// One unit of work inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Span kind.
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Span identifier; assigned when the record is attached to its run.
    pub span_id: String,
    /// Step name as declared in the workflow.
    pub name: String,
    /// Input to this step.
    pub input: Payload,
    /// Output from this step.
    pub output: Payload,
    /// Start and end of the step.
    pub timestamps: Timestamps,
    /// Model details, only for `llm` spans.
    #[serde(flatten)]
    pub llm: Option<LlmDetails>,
}

impl StepRecord {
    /// Creates an unfinished record; output is empty text until [`StepRecord::finish`].
    pub fn new(kind: StepKind, name: impl Into<String>, input: Payload, started_at: i64) -> Self {
        Self {
            kind,
            span_id: String::new(),
            name: name.into(),
            input,
            output: Payload::Text(String::new()),
            timestamps: Timestamps { started_at, finished_at: started_at },
            llm: None,
        }
    }

    /// Marks the record as a model call.
    pub fn with_llm(mut self, details: LlmDetails) -> Self {
        self.llm = Some(details);
        self
    }

    /// Sets the output and end time. The end time never precedes the start.
    pub fn finish(&mut self, output: Payload, finished_at: i64) {
        self.output = output;
        self.timestamps.finished_at = finished_at.max(self.timestamps.started_at);
    }

    /// Token counters, zero for non-model spans.
    pub fn metrics(&self) -> TokenMetrics {
        self.llm.as_ref().map(|d| d.metrics).unwrap_or_default()
    }
}

/// How a run resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    /// The host call returned; `success` is false when the result carried an error.
    Completed { success: bool },
    /// The host call itself failed.
    Failed { error: String },
}

impl RunOutcome {
    /// A completed run without error.
    pub fn success() -> Self {
        RunOutcome::Completed { success: true }
    }

    /// A run whose host call failed with `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        RunOutcome::Failed { error: error.into() }
    }

    /// Output of the summary span: `{"success": bool}` or `{"error": msg}`.
    pub fn to_value(&self) -> Value {
        match self {
            RunOutcome::Completed { success } => serde_json::json!({ "success": success }),
            RunOutcome::Failed { error } => serde_json::json!({ "error": error }),
        }
    }
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Host-provided run identifier (`"unknown"` when absent).
    pub run_id: String,
    /// Workflow name for display.
    pub run_name: String,
    /// `wf-<run_id>-<started_at>`.
    pub trace_id: String,
    /// Unix timestamp (milliseconds) when the run began.
    pub started_at: i64,
    /// Recorded steps in completion order.
    pub steps: Vec<StepRecord>,
    /// Set once the summary span has been appended.
    pub is_complete: bool,
    /// Token usage across every model step of the run.
    pub token_usage: TokenMetrics,
}

impl Run {
    /// Opens a run. The trace id is derived from `run_id` and `started_at`
    /// so repeated executions of one workflow get distinct traces.
    pub fn new(run_id: impl Into<String>, run_name: impl Into<String>, started_at: i64) -> Self {
        let run_id = run_id.into();
        let trace_id = format!("wf-{}-{}", run_id, started_at);
        Self {
            run_id,
            run_name: run_name.into(),
            trace_id,
            started_at,
            steps: Vec::new(),
            is_complete: false,
            token_usage: TokenMetrics::default(),
        }
    }

    /// Span id for a named step of this run.
    pub fn step_span_id(&self, step_name: &str) -> String {
        format!("{}-node-{}", self.trace_id, step_name)
    }

    /// Span id of the run summary.
    pub fn summary_span_id(&self) -> String {
        format!("{}-workflow", self.trace_id)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
