//! HTTP client that posts finished traces to the collector.

use async_trait::async_trait;
use flowlens_config::TracingConfig;
use flowlens_core::{ExportError, Run, TraceExporter};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::document::TraceDocument;

const AUTH_HEADER: &str = "X-Auth-Token";
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Client for the collector ingestion endpoint.
///
/// Delivery is at-least-once and best effort: 5xx responses, connect errors
/// and timeouts are retried with `base * 2^attempt` backoff up to the
/// configured attempt count; 4xx responses fail immediately.
pub struct ExportClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    max_attempts: u32,
    timeout: Duration,
    backoff_base: Duration,
    user_id: String,
    label: String,
    skip_logged: AtomicBool,
}

impl ExportClient {
    /// Creates a client from configuration.
    pub fn new(config: &TracingConfig) -> Result<Self, ExportError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExportError::Transport(format!("failed to build http client: {}", e)))?;

        tracing::debug!(
            url = %config.collector_url(),
            enabled = config.export_enabled(),
            max_attempts = config.max_retries,
            timeout_ms = config.timeout_ms,
            "ExportClient configured"
        );

        Ok(Self {
            client,
            url: config.collector_url(),
            api_key: config.api_key.clone(),
            max_attempts: config.max_retries.max(1),
            timeout: config.timeout(),
            backoff_base: DEFAULT_BACKOFF_BASE,
            user_id: config.user_id.clone(),
            label: config.label.clone(),
            skip_logged: AtomicBool::new(false),
        })
    }

    /// Overrides the backoff unit (one second by default).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Full collector URL traces are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// False when no API key is configured; exports are then skipped.
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(16))
    }

    /// Serializes and posts a trace, retrying transient failures.
    ///
    /// Returns immediately without touching the network when no API key is configured.
    pub async fn send(&self, run: &Run) -> Result<(), ExportError> {
        let Some(api_key) = self.api_key.as_deref() else {
            if !self.skip_logged.swap(true, Ordering::Relaxed) {
                tracing::debug!("No collector API key configured; skipping trace export");
            }
            return Ok(());
        };

        let body = serde_json::to_vec(&TraceDocument::new(run, &self.user_id, &self.label))?;

        let mut attempt = 1;
        loop {
            match self.post(api_key, &body).await {
                Ok(()) => {
                    tracing::debug!(trace_id = %run.trace_id, attempt, "Trace delivered");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        trace_id = %run.trace_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Trace export failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ExportError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post(&self, api_key: &str, body: &[u8]) -> Result<(), ExportError> {
        let response = self
            .client
            .post(&self.url)
            .header(AUTH_HEADER, api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ExportError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }

    fn map_request_error(&self, err: reqwest::Error) -> ExportError {
        if err.is_timeout() {
            ExportError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ExportError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl TraceExporter for ExportClient {
    async fn export(&self, run: &Run) -> Result<(), ExportError> {
        self.send(run).await
    }
}
