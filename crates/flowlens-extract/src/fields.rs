//! Heuristic extraction of user input, system message, output text and usage.

use flowlens_core::{RunHistory, StepDescriptor, TokenMetrics};
use serde_json::Value;

use crate::template::{display_value, resolve_str};
use crate::tokens::estimate_usage;

/// Fields that may hold a model's output text, in search order.
const OUTPUT_FIELDS: &[&str] = &[
    "text",
    "content",
    "output",
    "completion",
    "response",
    "answer",
    "message",
    "result",
    "generated_text",
];

/// A possible user input and how strongly its location suggests it.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    priority: u8,
    value: Value,
}

#[derive(Default)]
struct Candidates(Vec<Candidate>);

impl Candidates {
    fn push(&mut self, priority: u8, value: Option<&Value>) {
        let Some(value) = value.filter(|v| is_present(v)) else {
            return;
        };
        self.0.push(Candidate { priority, value: value.clone() });
    }

    /// Highest priority wins; ties keep discovery order.
    fn best(mut self) -> Option<Value> {
        self.0.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.0.into_iter().next().map(|c| c.value)
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Unwraps `{"json": {...}}` items; bare objects are returned as-is.
fn item_body(item: &Value) -> Option<&Value> {
    match item.get("json") {
        Some(json) if json.is_object() => Some(json),
        _ if item.is_object() => Some(item),
        _ => None,
    }
}

/// Locates the user-provided input of a step.
///
/// `input` is the first incoming item. Returns an empty string when nothing
/// plausible is found; never fails.
pub fn extract_user_input(step: &StepDescriptor, input: &Value, history: &RunHistory) -> String {
    let mut candidates = Candidates::default();
    let params = &step.parameters;

    let incoming_json = match input.get("json") {
        Some(json) if json.is_object() => Some(json),
        _ => None,
    };

    if let Some(json) = incoming_json {
        candidates.push(10, json.get("chatInput"));
        candidates.push(9, json.get("message"));
        candidates.push(8, json.get("input"));
        candidates.push(1, Some(json));
    } else if input.as_object().is_some_and(|o| !o.is_empty()) {
        candidates.push(5, Some(input));
    }

    candidates.push(6, params.get("options").and_then(|o| o.get("input")));
    for key in ["prompt", "message", "input"] {
        candidates.push(4, params.get(key));
    }
    candidates.push(3, params.get("text"));

    if let Some(previous) = step
        .name
        .as_deref()
        .and_then(|name| history.latest(name))
        .and_then(item_body)
    {
        candidates.push(7, previous.get("chatInput"));
        candidates.push(6, previous.get("message"));
        candidates.push(5, previous.get("input"));
    }

    let Some(chosen) = candidates.best() else {
        return String::new();
    };

    let context = incoming_json
        .or_else(|| input.is_object().then_some(input))
        .unwrap_or(&Value::Null);

    // Only a non-empty string `chatInput` is unwrapped.
    if let Some(nested) = chosen.get("chatInput") {
        return match nested.as_str().filter(|_| is_present(nested)) {
            Some(text) => resolve_str(text, context),
            None => String::new(),
        };
    }

    render(&chosen, context)
}

/// Resolves the system message from `options.systemMessage`, `systemMessage` or `system`.
pub fn extract_system_message(parameters: &Value, context: &Value) -> String {
    let found = [
        parameters.get("options").and_then(|o| o.get("systemMessage")),
        parameters.get("systemMessage"),
        parameters.get("system"),
    ]
    .into_iter()
    .flatten()
    .find(|v| is_present(v));

    found.map(|v| render(v, context)).unwrap_or_default()
}

fn render(value: &Value, context: &Value) -> String {
    match value {
        Value::String(s) => resolve_str(s, context),
        other => display_value(other),
    }
}

/// Output text and reported usage of a model step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedOutput {
    pub text: String,
    /// Usage reported by the step itself, if any.
    pub usage: Option<TokenMetrics>,
}

impl ExtractedOutput {
    /// Reported usage, or a length-based estimate when the step reported none.
    ///
    /// The estimate is approximate (see [`crate::estimate_tokens`]); it is only
    /// produced when some output text was found.
    pub fn usage_or_estimate(&self, system_message: &str, user_input: &str) -> TokenMetrics {
        match self.usage {
            Some(usage) => usage,
            None if !self.text.is_empty() => estimate_usage(system_message, user_input, &self.text),
            None => TokenMetrics::default(),
        }
    }
}

/// Inspects the first output row for text and usage.
pub fn extract_output(rows: &[Value]) -> ExtractedOutput {
    let first = match rows.first() {
        Some(Value::Array(branch)) => branch.first(),
        other => other,
    };
    let Some(body) = first.and_then(item_body) else {
        return ExtractedOutput::default();
    };

    ExtractedOutput {
        text: output_text(body).unwrap_or_default(),
        usage: output_usage(body),
    }
}

fn output_text(body: &Value) -> Option<String> {
    if let Some(text) = body.get("output").and_then(text_of) {
        return Some(text);
    }
    if let Some(text) = body.get("result").and_then(|r| r.get("output")).and_then(text_of) {
        return Some(text);
    }
    if let Some(text) = OUTPUT_FIELDS.iter().find_map(|f| body.get(*f).and_then(text_of)) {
        return Some(text);
    }

    let choice = body.get("choices").and_then(|c| c.get(0))?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(text_of)
        .or_else(|| choice.get("text").and_then(text_of))
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => match obj.get("content") {
            Some(content) => text_of(content),
            None => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn output_usage(body: &Value) -> Option<TokenMetrics> {
    [
        body.get("usage"),
        body.get("tokenUsage"),
        body.get("result").and_then(|r| r.get("usage")),
    ]
    .into_iter()
    .flatten()
    .find_map(parse_usage)
}

fn parse_usage(value: &Value) -> Option<TokenMetrics> {
    let obj = value.as_object()?;
    let count = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64));

    let prompt = count(&["prompt_tokens", "promptTokens", "input_tokens"]);
    let completion = count(&["completion_tokens", "completionTokens", "output_tokens"]);
    let total = count(&["total_tokens", "totalTokens"]);

    if prompt.is_none() && completion.is_none() && total.is_none() {
        return None;
    }

    let prompt = prompt.unwrap_or(0);
    let completion = completion.unwrap_or(0);
    Some(TokenMetrics {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total.unwrap_or(prompt.saturating_add(completion)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(parameters: Value) -> StepDescriptor {
        StepDescriptor::new("Agent", "agent", parameters)
    }

    #[test]
    fn test_highest_priority_wins() {
        let input = json!({"json": {"chatInput": "from chat", "input": "from input"}});
        let s = step(json!({"text": "from text"}));
        assert_eq!(extract_user_input(&s, &input, &RunHistory::new()), "from chat");
    }

    #[test]
    fn test_config_candidates_ordering() {
        let s = step(json!({"prompt": "prompt value", "text": "text value"}));
        assert_eq!(extract_user_input(&s, &Value::Null, &RunHistory::new()), "prompt value");

        let s = step(json!({"prompt": "prompt value", "options": {"input": "option input"}}));
        assert_eq!(extract_user_input(&s, &Value::Null, &RunHistory::new()), "option input");
    }

    #[test]
    fn test_history_beats_step_prompt() {
        let mut history = RunHistory::new();
        history.record("Agent", json!({"json": {"chatInput": "earlier"}}));
        let s = step(json!({"prompt": "configured"}));
        assert_eq!(extract_user_input(&s, &Value::Null, &history), "earlier");
    }

    #[test]
    fn test_bare_object_unwraps_chat_input() {
        let input = json!({"chatInput": "hello there", "sessionId": "abc"});
        assert_eq!(extract_user_input(&step(json!({})), &input, &RunHistory::new()), "hello there");
    }

    #[test]
    fn test_template_prompt_resolved_against_incoming_json() {
        let input = json!({"json": {"topic": "rust"}});
        let s = step(json!({"text": "=Tell me about {{ $json.topic }}"}));
        assert_eq!(extract_user_input(&s, &input, &RunHistory::new()), "Tell me about rust");
    }

    #[test]
    fn test_whole_json_is_last_resort() {
        let input = json!({"json": {"query": "q"}});
        assert_eq!(
            extract_user_input(&step(json!({})), &input, &RunHistory::new()),
            r#"{"query":"q"}"#
        );
    }

    #[test]
    fn test_null_chat_input_is_empty() {
        let input = json!({"json": {"chatInput": null, "sessionId": "abc"}});
        assert_eq!(extract_user_input(&step(json!({})), &input, &RunHistory::new()), "");

        let input = json!({"chatInput": 42});
        assert_eq!(extract_user_input(&step(json!({})), &input, &RunHistory::new()), "");
    }

    #[test]
    fn test_no_candidates_is_empty() {
        assert_eq!(extract_user_input(&StepDescriptor::default(), &Value::Null, &RunHistory::new()), "");
    }

    #[test]
    fn test_system_message_order() {
        let params = json!({"system": "sys", "options": {"systemMessage": "=Today is {{ $json.day }}"}});
        assert_eq!(extract_system_message(&params, &json!({"day": "Monday"})), "Today is Monday");
        assert_eq!(extract_system_message(&json!({"system": "sys"}), &Value::Null), "sys");
        assert_eq!(extract_system_message(&json!({}), &Value::Null), "");
    }

    #[test]
    fn test_output_field_order() {
        let out = extract_output(&[json!({"json": {"output": "hello"}})]);
        assert_eq!(out.text, "hello");

        let out = extract_output(&[json!({"json": {"result": {"output": "nested"}}})]);
        assert_eq!(out.text, "nested");

        let out = extract_output(&[json!({"json": {"message": {"role": "assistant", "content": "unwrapped"}}})]);
        assert_eq!(out.text, "unwrapped");

        let out = extract_output(&[json!({"json": {"choices": [{"message": {"content": "choice"}}]}})]);
        assert_eq!(out.text, "choice");

        let out = extract_output(&[json!([{"json": {"text": "branched"}}])]);
        assert_eq!(out.text, "branched");
    }

    #[test]
    fn test_reported_usage() {
        let out = extract_output(&[json!({"json": {
            "text": "hi",
            "tokenUsage": {"promptTokens": 12, "completionTokens": 3}
        }})]);
        assert_eq!(out.usage, Some(TokenMetrics::new(12, 3)));
        assert_eq!(out.usage_or_estimate("", ""), TokenMetrics::new(12, 3));
    }

    #[test]
    fn test_extreme_usage_saturates() {
        let out = extract_output(&[json!({"json": {
            "text": "hi",
            "usage": {"prompt_tokens": u64::MAX, "completion_tokens": 1}
        }})]);
        let usage = out.usage.unwrap();
        assert_eq!(usage.prompt_tokens, u64::MAX);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, u64::MAX);
        assert_eq!(TokenMetrics::new(u64::MAX, 5).total_tokens, u64::MAX);
    }

    #[test]
    fn test_estimated_usage_when_unreported() {
        let out = extract_output(&[json!({"json": {"output": "hello"}})]);
        assert_eq!(out.usage, None);
        let usage = out.usage_or_estimate("", "hi");
        assert_eq!(usage, TokenMetrics::new(1, 2));
    }

    #[test]
    fn test_empty_rows() {
        let out = extract_output(&[]);
        assert_eq!(out, ExtractedOutput::default());
        assert!(out.usage_or_estimate("sys", "in").is_empty());
    }
}
