//! Step classification: model-step detection, vendor/model lookup, tunable parameters.

use flowlens_core::StepDescriptor;
use serde_json::{Map, Value};

/// Substrings that mark a type, name or parameter key as model-related.
const MODEL_INDICATORS: &[&str] = &[
    "ai",
    "llm",
    "gpt",
    "agent",
    "chat",
    "completion",
    "openai",
    "anthropic",
    "claude",
    "gemini",
    "mistral",
    "llama",
    "ollama",
];

/// Parameter keys that only model steps carry.
const MODEL_KEYS: &[&str] = &["model", "prompt", "system", "messages"];

/// Vendors recognised from the declared step type.
const TYPE_VENDORS: &[&str] = &["openai", "anthropic", "google", "mistral"];

/// Credential type fragments (lowercased) and the vendor they imply.
const CREDENTIAL_VENDORS: &[(&str, &str)] = &[
    ("azureopenai", "openai"),
    ("openai", "openai"),
    ("anthropic", "anthropic"),
    ("googlepalm", "google"),
    ("googlegemini", "google"),
    ("mistral", "mistral"),
];

/// Exported name and accepted spellings of each tunable parameter.
const PARAMETERS: &[(&str, &[&str])] = &[
    ("temperature", &["temperature"]),
    ("max_tokens", &["max_tokens", "maxTokens"]),
    ("top_p", &["top_p", "topP"]),
    ("frequency_penalty", &["frequency_penalty", "frequencyPenalty"]),
    ("presence_penalty", &["presence_penalty", "presencePenalty"]),
    ("stop", &["stop"]),
];

pub const FALLBACK_VENDOR: &str = "n8n";
pub const FALLBACK_MODEL: &str = "unknown";

/// Vendor and model a model step targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub vendor: String,
    pub model: String,
}

impl Default for ModelTarget {
    fn default() -> Self {
        Self {
            vendor: FALLBACK_VENDOR.to_string(),
            model: FALLBACK_MODEL.to_string(),
        }
    }
}

fn has_indicator(text: &str) -> bool {
    let lower = text.to_lowercase();
    MODEL_INDICATORS.iter().any(|i| lower.contains(i))
}

/// Returns true when the step looks like a language-model invocation.
///
/// Total over any descriptor: missing or oddly-typed fields never match.
pub fn is_model_step(step: &StepDescriptor) -> bool {
    if step.step_type.as_deref().is_some_and(has_indicator) {
        return true;
    }
    if step.name.as_deref().is_some_and(has_indicator) {
        return true;
    }

    let Some(params) = step.parameters.as_object() else {
        return false;
    };

    if params.keys().any(|k| has_indicator(k)) {
        return true;
    }
    if MODEL_KEYS.iter().any(|k| params.get(*k).is_some_and(|v| !v.is_null())) {
        return true;
    }
    params
        .get("options")
        .and_then(|o| o.get("model"))
        .is_some_and(|v| !v.is_null())
}

/// Model name from `model` or `options.model`, unwrapping resource locators.
pub fn model_name(parameters: &Value) -> Option<String> {
    let direct = parameters.get("model");
    let nested = parameters.get("options").and_then(|o| o.get("model"));
    direct.and_then(model_string).or_else(|| nested.and_then(model_string))
}

fn model_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("value")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// Vendor implied by a model name.
pub fn vendor_for_model(model: &str) -> Option<&'static str> {
    let lower = model.to_lowercase();
    if lower.contains("gpt") || lower.starts_with("text-") || lower.contains("davinci") {
        Some("openai")
    } else if lower.contains("claude") {
        Some("anthropic")
    } else if lower.contains("gemini") {
        Some("google")
    } else if lower.contains("mistral") {
        Some("mistral")
    } else if lower.contains("llama") {
        Some("meta")
    } else {
        None
    }
}

fn vendor_for_credentials(credentials: &Value) -> Option<&'static str> {
    let creds = credentials.as_object()?;
    creds.keys().find_map(|key| {
        let lower = key.to_lowercase();
        CREDENTIAL_VENDORS
            .iter()
            .find(|(fragment, _)| lower.contains(fragment))
            .map(|(_, vendor)| *vendor)
    })
}

fn vendor_for_type(step_type: &str) -> Option<&'static str> {
    let lower = step_type.to_lowercase();
    TYPE_VENDORS.iter().find(|v| lower.contains(*v)).copied()
}

fn default_model(vendor: &str) -> Option<&'static str> {
    match vendor {
        "openai" => Some("gpt-4"),
        "anthropic" => Some("claude-3-sonnet"),
        "google" => Some("gemini-pro"),
        "mistral" => Some("mistral-large"),
        _ => None,
    }
}

/// Detects vendor and model.
///
/// Precedence, lowest to highest: model-name prefix, credential type,
/// vendor named in the declared type. Falls back to `n8n` / `unknown`.
pub fn detect_vendor_and_model(step: &StepDescriptor) -> ModelTarget {
    let model = model_name(&step.parameters);

    let mut vendor = model.as_deref().and_then(vendor_for_model);
    if let Some(v) = vendor_for_credentials(&step.credentials) {
        vendor = Some(v);
    }

    let forced = step.step_type.as_deref().and_then(vendor_for_type);
    let model = match (forced, model) {
        (Some(v), None) => default_model(v).map(str::to_string),
        (_, model) => model,
    };
    if forced.is_some() {
        vendor = forced;
    }

    ModelTarget {
        vendor: vendor.unwrap_or(FALLBACK_VENDOR).to_string(),
        model: model.unwrap_or_else(|| FALLBACK_MODEL.to_string()),
    }
}

/// Tunable parameters under their exported names; top level wins over `options`.
pub fn extract_parameters(parameters: &Value) -> Map<String, Value> {
    let options = parameters.get("options");
    let mut out = Map::new();

    for (name, spellings) in PARAMETERS {
        let found = [Some(parameters), options]
            .into_iter()
            .flatten()
            .flat_map(|scope| spellings.iter().filter_map(move |s| scope.get(*s)))
            .find(|v| !v.is_null());

        if let Some(value) = found {
            out.insert(name.to_string(), value.clone());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(step_type: &str, parameters: Value) -> StepDescriptor {
        StepDescriptor::new("Step", step_type, parameters)
    }

    #[test]
    fn test_model_step_by_type() {
        assert!(is_model_step(&step("openai-chat", json!({}))));
        assert!(is_model_step(&step("@n8n/n8n-nodes-langchain.agent", json!({}))));
        assert!(!is_model_step(&step("set", json!({"x": 1}))));
    }

    #[test]
    fn test_model_step_by_parameters() {
        assert!(is_model_step(&step("httpRequest", json!({"prompt": "hi"}))));
        assert!(is_model_step(&step("httpRequest", json!({"options": {"model": "gpt-4o"}}))));
        assert!(is_model_step(&step("code", json!({"chatHistory": []}))));
        assert!(!is_model_step(&step("code", json!({"model": null}))));
    }

    #[test]
    fn test_model_step_tolerates_missing_fields() {
        assert!(!is_model_step(&StepDescriptor::default()));
        let odd = StepDescriptor {
            parameters: json!([1, 2, 3]),
            credentials: json!("x"),
            ..Default::default()
        };
        assert!(!is_model_step(&odd));
        assert!(!is_model_step(&step("noop", json!("string params"))));
    }

    #[test]
    fn test_vendor_from_model_name() {
        let target = detect_vendor_and_model(&step("lmChat", json!({"model": "claude-3-opus"})));
        assert_eq!(target, ModelTarget { vendor: "anthropic".into(), model: "claude-3-opus".into() });

        let target = detect_vendor_and_model(&step("x", json!({"options": {"model": "text-davinci-003"}})));
        assert_eq!(target.vendor, "openai");

        let target = detect_vendor_and_model(&step("x", json!({"model": "llama3:8b"})));
        assert_eq!(target.vendor, "meta");
    }

    #[test]
    fn test_resource_locator_model() {
        let target = detect_vendor_and_model(&step(
            "lmChat",
            json!({"model": {"__rl": true, "value": "gemini-1.5-pro", "mode": "list"}}),
        ));
        assert_eq!(target.vendor, "google");
        assert_eq!(target.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_credentials_override_name_guess() {
        let s = step("lmChat", json!({"model": "llama3"})).with_credentials(json!({"mistralCloudApi": {"id": "1"}}));
        assert_eq!(detect_vendor_and_model(&s).vendor, "mistral");
    }

    #[test]
    fn test_type_forces_vendor_and_default_model() {
        let target = detect_vendor_and_model(&step("openai-chat", json!({"prompt": "hi"})));
        assert_eq!(target, ModelTarget { vendor: "openai".into(), model: "gpt-4".into() });

        let target = detect_vendor_and_model(&step("openai-chat", json!({"model": "gpt-4o-mini"})));
        assert_eq!(target.model, "gpt-4o-mini");
    }

    #[test]
    fn test_fallback_target() {
        assert_eq!(detect_vendor_and_model(&step("agent", json!({}))), ModelTarget::default());
        assert_eq!(detect_vendor_and_model(&StepDescriptor::default()).vendor, "n8n");
    }

    #[test]
    fn test_extract_parameters() {
        let params = extract_parameters(&json!({
            "temperature": 0.2,
            "options": {"maxTokens": 256, "topP": 0.9, "temperature": 0.8, "stop": ["\n"]},
            "frequency_penalty": null
        }));
        assert_eq!(params.get("temperature"), Some(&json!(0.2)));
        assert_eq!(params.get("max_tokens"), Some(&json!(256)));
        assert_eq!(params.get("top_p"), Some(&json!(0.9)));
        assert_eq!(params.get("stop"), Some(&json!(["\n"])));
        assert!(!params.contains_key("frequency_penalty"));
    }
}
