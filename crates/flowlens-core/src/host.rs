//! Host workflow engine lifecycle surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;

/// Workflow definition passed to both lifecycle calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub settings: Value,
}

impl WorkflowDescriptor {
    /// Descriptor with both an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Run identifier used to correlate steps, `"unknown"` when the host gave none.
    pub fn run_id(&self) -> &str {
        self.id.as_deref().filter(|s| !s.is_empty()).unwrap_or("unknown")
    }

    /// Display name, `"Unnamed workflow"` when missing or empty.
    pub fn run_name(&self) -> &str {
        self.name.as_deref().filter(|s| !s.is_empty()).unwrap_or("Unnamed workflow")
    }
}

/// Declared shape of a single step (node) in the workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub type_version: Option<f64>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub credentials: Value,
}

impl StepDescriptor {
    /// Named step of the given type.
    pub fn new(name: impl Into<String>, step_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: Some(name.into()),
            step_type: Some(step_type.into()),
            parameters,
            ..Default::default()
        }
    }

    /// Attaches the step's credential references.
    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = credentials;
        self
    }

    /// Step name, falling back to the declared type and then `"unnamed"`.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.step_type.as_deref())
            .unwrap_or("unnamed")
    }
}

/// Per-call execution context for a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepContext {
    pub step: StepDescriptor,
    /// First incoming item, either `{"json": {...}}` or a bare object.
    #[serde(default)]
    pub input: Value,
}

impl StepContext {
    pub fn new(step: StepDescriptor, input: Value) -> Self {
        Self { step, input }
    }

    /// The JSON body of the incoming item, if any.
    pub fn input_json(&self) -> Option<&Value> {
        match self.input.get("json") {
            Some(json) if json.is_object() => Some(json),
            _ => None,
        }
    }
}

/// Output items recorded so far in the run, keyed by step name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    #[serde(flatten)]
    pub steps: HashMap<String, Vec<Value>>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` to the output list of `step_name`.
    pub fn record(&mut self, step_name: impl Into<String>, item: Value) {
        self.steps.entry(step_name.into()).or_default().push(item);
    }

    /// Most recent item recorded for a step.
    pub fn latest(&self, step_name: &str) -> Option<&Value> {
        self.steps.get(step_name).and_then(|items| items.last())
    }
}

/// Value the host returns when a run resolves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub data: Value,
    /// Error the run finished with, if the host reports one without failing the call.
    #[serde(default)]
    pub error: Option<String>,
}

/// Output rows of a step; each row is `{"json": {...}}` or one array of them per branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResult {
    pub rows: Vec<Value>,
}

impl StepResult {
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }
}

/// The two entry points of a workflow engine that flowlens wraps.
///
/// Wrappers implement this same trait with the same `Error`, so arguments,
/// return values and failures reach the caller unchanged.
#[async_trait]
pub trait WorkflowHost: Send + Sync {
    type Error: Display + Send + Sync + 'static;

    /// Runs a whole workflow to resolution.
    async fn begin_workflow_run(&self, workflow: &WorkflowDescriptor) -> Result<RunResult, Self::Error>;

    /// Executes one step of a running workflow.
    async fn execute_step(
        &self,
        workflow: &WorkflowDescriptor,
        context: &StepContext,
        history: &RunHistory,
        step_index: usize,
        options: &Value,
    ) -> Result<StepResult, Self::Error>;
}
