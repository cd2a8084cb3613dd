use std::time::Duration;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation webhook is not configured")]
    NotConfigured,
    #[error("generation transport error: {0}")]
    Transport(String),
    #[error("generation webhook returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("generation response was not valid JSON: {0}")]
    Parse(String),
}

/// HTTP client for the external generation service.
///
/// Sends the planner inputs verbatim and returns the raw JSON body. Never
/// retries: the upstream is slow and bills per request, so a blind retry
/// risks double-charging; re-submission is the caller's decision.
#[derive(Clone)]
pub struct GenerationClient {
    webhook_url: Option<String>,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl GenerationClient {
    #[must_use]
    pub fn new(webhook_url: Option<String>, timeout_ms: u64) -> Self {
        Self {
            webhook_url: webhook_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            // A stalled webhook must not hold a debited credit indefinitely.
            timeout_ms: timeout_ms.clamp(250, 300_000),
            http: reqwest::Client::new(),
        }
    }

    pub async fn generate(&self, inputs: &Value) -> Result<Value, GenerationError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or(GenerationError::NotConfigured)?;

        let response = self
            .http
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(inputs)
            .send()
            .await
            .map_err(|error| GenerationError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Keep the body for diagnostics; it is never trusted as a result.
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|error| GenerationError::Parse(error.to_string()))
    }
}
