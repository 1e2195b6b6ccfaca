//! Wire document posted to the collector.

use flowlens_core::{Run, StepRecord};
use serde::Serialize;

/// Trace body of a collector POST.
#[derive(Debug, Clone, Serialize)]
pub struct TraceDocument<'a> {
    pub trace_id: &'a str,
    pub spans: &'a [StepRecord],
    pub metadata: TraceMetadata,
}

/// Attribution attached to every trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceMetadata {
    pub user_id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
}

impl<'a> TraceDocument<'a> {
    /// Borrows `run` as a collector document.
    ///
    /// The thread id is `workflow-<run_id>` and doubles as the second label.
    pub fn new(run: &'a Run, user_id: &str, label: &str) -> Self {
        let thread_id = format!("workflow-{}", run.run_id);
        Self {
            trace_id: &run.trace_id,
            spans: &run.steps,
            metadata: TraceMetadata {
                user_id: user_id.to_string(),
                labels: vec![label.to_string(), thread_id.clone(), run.run_name.clone()],
                thread_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::{Payload, StepKind};
    use serde_json::json;

    #[test]
    fn test_document_shape() {
        let mut run = Run::new("42", "demo", 1000);
        run.steps.push(StepRecord::new(StepKind::Component, "Set", Payload::json(json!({"x": 1})), 1000));

        let value = serde_json::to_value(TraceDocument::new(&run, "n8n-system", "n8n")).unwrap();
        assert_eq!(value["trace_id"], "wf-42-1000");
        assert_eq!(value["spans"][0]["type"], "component");
        assert_eq!(
            value["metadata"],
            json!({
                "user_id": "n8n-system",
                "thread_id": "workflow-42",
                "labels": ["n8n", "workflow-42", "demo"]
            })
        );
    }
}
