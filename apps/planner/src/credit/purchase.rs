use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("purchase webhook is not configured")]
    NotConfigured,
    #[error("purchase webhook transport error: {0}")]
    Transport(String),
    #[error("purchase webhook returned status {0}")]
    Upstream(u16),
}

/// Unit price per credit, in the shop's local currency.
pub const CREDIT_UNIT_PRICE: f64 = 9.90;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPurchaseRequest {
    #[serde(default)]
    pub nome_completo: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub quantidade: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseWebhookPayload {
    nome_completo: String,
    whatsapp: String,
    email: String,
    quantidade: u32,
    total: String,
    timestamp: String,
}

/// Forwards credit purchase requests to the sales webhook.
///
/// No credits are granted here; fulfilment happens out of band once the
/// purchase is processed.
pub struct PurchaseForwarder {
    webhook_url: Option<String>,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl PurchaseForwarder {
    #[must_use]
    pub fn new(webhook_url: Option<String>, timeout_ms: u64) -> Self {
        Self {
            webhook_url: webhook_url
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            timeout_ms: timeout_ms.clamp(250, 60_000),
            http: reqwest::Client::new(),
        }
    }

    pub async fn forward(&self, request: CreditPurchaseRequest) -> Result<(), PurchaseError> {
        let payload = build_payload(request)?;
        let url = self
            .webhook_url
            .as_deref()
            .ok_or(PurchaseError::NotConfigured)?;

        let response = self
            .http
            .post(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .json(&payload)
            .send()
            .await
            .map_err(|error| PurchaseError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PurchaseError::Upstream(status.as_u16()));
        }

        tracing::info!(
            email = %payload.email,
            quantidade = payload.quantidade,
            total = %payload.total,
            "credit purchase request forwarded"
        );
        Ok(())
    }
}

fn build_payload(request: CreditPurchaseRequest) -> Result<PurchaseWebhookPayload, PurchaseError> {
    let required = |value: Option<String>, field: &str| -> Result<String, PurchaseError> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PurchaseError::InvalidRequest(format!("{field} is required")))
    };

    let nome_completo = required(request.nome_completo, "nomeCompleto")?;
    let whatsapp = required(request.whatsapp, "whatsapp")?;
    let email = required(request.email, "email")?;
    let quantidade = request
        .quantidade
        .filter(|value| *value >= 1)
        .ok_or_else(|| {
            PurchaseError::InvalidRequest("quantidade must be a positive integer".to_string())
        })?;

    let total = f64::from(quantidade) * CREDIT_UNIT_PRICE;
    Ok(PurchaseWebhookPayload {
        nome_completo,
        whatsapp,
        email,
        quantidade,
        total: format!("{total:.2}"),
        timestamp: Utc::now().to_rfc3339(),
    })
}
