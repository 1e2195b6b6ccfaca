//! Step classification and field extraction for flowlens.
//!
//! Everything here is heuristic and total: a field that cannot be found
//! degrades to an empty string or a default, never to an error.

mod classify;
mod fields;
mod template;
mod tokens;

pub use classify::{
    detect_vendor_and_model, extract_parameters, is_model_step, model_name, vendor_for_model,
    ModelTarget, FALLBACK_MODEL, FALLBACK_VENDOR,
};
pub use fields::{extract_output, extract_system_message, extract_user_input, ExtractedOutput};
pub use template::{resolve_expression, resolve_str, resolve_str_at};
pub use tokens::{estimate_tokens, estimate_usage};

use flowlens_core::{ChatMessage, Payload, RunHistory, StepContext};
use serde_json::{Map, Value};

/// Everything known about a model step before the host runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCall {
    pub target: ModelTarget,
    pub parameters: Map<String, Value>,
    pub system_message: String,
    pub user_input: String,
}

impl ModelCall {
    /// Runs the extraction pipeline over a step about to execute.
    pub fn inspect(context: &StepContext, history: &RunHistory) -> Self {
        let step = &context.step;
        let template_context = context.input_json().unwrap_or(&context.input);

        let call = Self {
            target: detect_vendor_and_model(step),
            parameters: extract_parameters(&step.parameters),
            system_message: extract_system_message(&step.parameters, template_context),
            user_input: extract_user_input(step, &context.input, history),
        };

        tracing::debug!(
            step = %step.display_name(),
            vendor = %call.target.vendor,
            model = %call.target.model,
            input_chars = call.user_input.len(),
            "Inspected model step"
        );

        call
    }

    /// Chat-message payload: the system message when present, then the user input.
    pub fn input_payload(&self) -> Payload {
        let mut messages = Vec::with_capacity(2);
        if !self.system_message.is_empty() {
            messages.push(ChatMessage::system(&self.system_message));
        }
        messages.push(ChatMessage::user(&self.user_input));
        Payload::ChatMessages(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::StepDescriptor;
    use serde_json::json;

    #[test]
    fn test_inspect_model_step() {
        let context = StepContext::new(
            StepDescriptor::new(
                "Assistant",
                "openai-chat",
                json!({
                    "prompt": "={{ $json.question }}",
                    "options": {"systemMessage": "Be brief", "temperature": 0.3}
                }),
            ),
            json!({"json": {"question": "What is Rust?"}}),
        );

        let call = ModelCall::inspect(&context, &RunHistory::new());
        assert_eq!(call.target.vendor, "openai");
        assert_eq!(call.target.model, "gpt-4");
        assert_eq!(call.user_input, "What is Rust?");
        assert_eq!(call.system_message, "Be brief");
        assert_eq!(call.parameters.get("temperature"), Some(&json!(0.3)));

        let Payload::ChatMessages(messages) = call.input_payload() else {
            panic!("expected chat messages");
        };
        assert_eq!(messages, vec![ChatMessage::system("Be brief"), ChatMessage::user("What is Rust?")]);
    }
}
