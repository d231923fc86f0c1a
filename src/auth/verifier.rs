use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::config::SessionServiceConfig;

use super::DecodedToken;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("session service rejected the token (status {0})")]
    Rejected(u16),

    #[error("session service unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("token expired")]
    Expired,
}

/// Sole trust boundary for bearer tokens. Local token decoding is never
/// treated as proof of authenticity.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<DecodedToken, VerifyError>;
}

/// Delegates verification to the external session service.
pub struct HttpAuthVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpAuthVerifier {
    pub fn new(config: &SessionServiceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            verify_url: format!("{}/v1/verify", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AuthVerifier for HttpAuthVerifier {
    async fn verify(&self, token: &str) -> Result<DecodedToken, VerifyError> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&json!({ "jwt": token }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VerifyError::Rejected(response.status().as_u16()));
        }

        let decoded: DecodedToken = response.json().await?;
        if decoded.is_expired() {
            return Err(VerifyError::Expired);
        }

        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_url_normalization() {
        let config = SessionServiceConfig {
            base_url: "http://sessions.internal/".to_string(),
            request_timeout_secs: 5,
        };
        let verifier = HttpAuthVerifier::new(&config).unwrap();
        assert_eq!(verifier.verify_url, "http://sessions.internal/v1/verify");
    }
}
