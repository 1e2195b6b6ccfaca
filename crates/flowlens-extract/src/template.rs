//! Resolution of `=`-prefixed workflow expressions.

use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

static EXPRESSION: OnceLock<Regex> = OnceLock::new();

fn expression() -> &'static Regex {
    EXPRESSION.get_or_init(|| {
        Regex::new(
            r"\{\{\s*(?:\$json\.(?P<bj>[A-Za-z_]\w*)|\$now\.format\('(?P<bf>[^']*)'\))\s*\}\}|\$json\.(?P<j>[A-Za-z_]\w*)|\$now\.format\('(?P<f>[^']*)'\)|\{\{.*?\}\}",
        )
        .expect("expression pattern is valid")
    })
}

/// Resolves a value against `context`. Only strings are ever rewritten.
pub fn resolve_expression(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, context)),
        other => other.clone(),
    }
}

/// Resolves a string expression using the current local time.
///
/// Strings without a leading `=` are returned unchanged.
pub fn resolve_str(template: &str, context: &Value) -> String {
    resolve_str_at(template, context, Local::now())
}

/// Resolves a string expression against a fixed clock.
///
/// Supported: `$json.<field>` (looked up in `context`),
/// `$now.format('cccc')` (full weekday name) and
/// `$now.format('yyyy-MM-dd HH:mm')`, bare or inside `{{ }}`.
/// Anything else is kept verbatim with the leading `=` removed.
pub fn resolve_str_at(template: &str, context: &Value, now: DateTime<Local>) -> String {
    let Some(body) = template.strip_prefix('=') else {
        return template.to_string();
    };

    expression()
        .replace_all(body, |caps: &Captures| {
            let original = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let field = caps.name("bj").or_else(|| caps.name("j"));
            let format = caps.name("bf").or_else(|| caps.name("f"));

            if let Some(field) = field {
                return context
                    .get(field.as_str())
                    .filter(|v| !v.is_null())
                    .map(display_value)
                    .unwrap_or_else(|| original.to_string());
            }
            if let Some(format) = format {
                return format_now(format.as_str(), now).unwrap_or_else(|| original.to_string());
            }
            original.to_string()
        })
        .into_owned()
}

fn format_now(pattern: &str, now: DateTime<Local>) -> Option<String> {
    match pattern {
        "cccc" => Some(now.format("%A").to_string()),
        "yyyy-MM-dd HH:mm" => Some(now.format("%Y-%m-%d %H:%M").to_string()),
        _ => None,
    }
}

/// Renders a JSON value as plain text: strings unquoted, everything else as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
