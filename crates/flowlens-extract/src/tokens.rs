//! Length-based token estimation.
//!
//! These are approximations (about four characters per token), not
//! tokenizer-exact counts. They are only used when a step reports no usage.

use flowlens_core::TokenMetrics;

/// Estimated token count: `ceil(chars / 4)`, zero for absent or empty text.
pub fn estimate_tokens(text: Option<&str>) -> u64 {
    match text {
        Some(t) => (t.chars().count() as u64).div_ceil(4),
        None => 0,
    }
}

/// Estimated usage for one model call. System message and user input count as prompt.
pub fn estimate_usage(system_message: &str, user_input: &str, output: &str) -> TokenMetrics {
    let prompt = estimate_tokens(Some(system_message)) + estimate_tokens(Some(user_input));
    TokenMetrics::new(prompt, estimate_tokens(Some(output)))
}
