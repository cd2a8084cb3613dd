use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingCredential,
    #[error("invalid authorization scheme")]
    InvalidScheme,
    #[error("credential did not resolve to a live identity")]
    InvalidCredential,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// The resolved principal a request is billed and recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Resolves a bearer credential to an identity. Read-only; verified on every
/// request, with no cached auth state.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn extract_bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingCredential)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(AuthError::InvalidScheme)?;
    if token.is_empty() {
        return Err(AuthError::InvalidScheme);
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct IdentityEnvelope {
    #[serde(default)]
    id: String,
}

/// Verifies credentials against an external identity service over HTTP.
pub struct HttpIdentityVerifier {
    base_url: String,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl HttpIdentityVerifier {
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: timeout_ms.clamp(250, 30_000),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let url = format!("{}/auth/v1/user", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_millis(self.timeout_ms))
            .header("authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|error| AuthError::Unavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::InvalidCredential);
        }

        let parsed = response
            .json::<IdentityEnvelope>()
            .await
            .map_err(|error| AuthError::Unavailable(error.to_string()))?;
        if parsed.id.trim().is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        Ok(Identity::new(parsed.id))
    }
}

/// Fixed token-to-identity map for tests and local development.
#[derive(Debug, Default)]
pub struct StaticIdentityVerifier {
    tokens: HashMap<String, String>,
}

impl StaticIdentityVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .map(Identity::new)
            .ok_or(AuthError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthError, IdentityVerifier, StaticIdentityVerifier, extract_bearer_token};

    #[test]
    fn extracts_a_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer_token(Some("bearer abc")), Ok("abc"));
    }

    #[test]
    fn rejects_a_missing_header() {
        assert_eq!(
            extract_bearer_token(None),
            Err(AuthError::MissingCredential)
        );
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(
            extract_bearer_token(Some("Basic abc")),
            Err(AuthError::InvalidScheme)
        );
        assert_eq!(
            extract_bearer_token(Some("Bearer ")),
            Err(AuthError::InvalidScheme)
        );
    }

    #[tokio::test]
    async fn static_verifier_resolves_known_tokens_only() {
        let verifier = StaticIdentityVerifier::new().with_token("tok", "user-1");
        let identity = verifier.verify("tok").await.unwrap();
        assert_eq!(identity.as_str(), "user-1");
        assert_eq!(
            verifier.verify("other").await,
            Err(AuthError::InvalidCredential)
        );
    }
}
