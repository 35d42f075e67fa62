//! Bearer credential verification against the external auth service.
//!
//! Signup/login and token issuance live in a separate service; the interview
//! server only needs to turn a bearer credential into a user identifier
//! before a session may start.

use crate::config::AuthConfig;
use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Resolves a bearer credential to a user identifier.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the user identifier it belongs to.
    ///
    /// # Errors
    ///
    /// Returns `Auth` when the credential is missing, expired, or rejected
    /// by the auth service.
    async fn verify(&self, token: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user_id: String,
}

/// [`TokenVerifier`] backed by the auth service's HTTP verify endpoint.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    config: AuthConfig,
}

impl HttpTokenVerifier {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        // Clients may send the credential with or without the scheme prefix.
        let token = token.trim().trim_start_matches("Bearer ").trim();
        if token.is_empty() {
            return Err(InterviewError::Auth("empty bearer token".to_owned()));
        }

        let response = self
            .client
            .post(&self.config.verify_url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| InterviewError::Auth(format!("auth service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(InterviewError::Auth(format!(
                "auth service rejected token: HTTP {}",
                response.status()
            )));
        }

        let verified: VerifyResponse = response
            .json()
            .await
            .map_err(|e| InterviewError::Auth(format!("invalid auth service response: {e}")))?;

        if verified.user_id.trim().is_empty() {
            return Err(InterviewError::Auth(
                "auth service returned empty user_id".to_owned(),
            ));
        }

        Ok(verified.user_id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verifier_for(server: &MockServer) -> HttpTokenVerifier {
        HttpTokenVerifier::new(AuthConfig {
            verify_url: format!("{}/auth/verify", server.uri()),
            api_key: "test-key".to_owned(),
        })
    }

    #[tokio::test]
    async fn verify_extracts_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/verify"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"user_id": "u-42"})),
            )
            .mount(&server)
            .await;

        let user_id = verifier_for(&server).verify("Bearer tok-1").await.unwrap();
        assert_eq!(user_id, "u-42");
    }

    #[tokio::test]
    async fn verify_rejects_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/verify"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = verifier_for(&server).verify("bad").await.unwrap_err();
        assert!(matches!(err, InterviewError::Auth(_)));
    }

    #[tokio::test]
    async fn verify_rejects_empty_token() {
        let server = MockServer::start().await;
        let err = verifier_for(&server).verify("Bearer ").await.unwrap_err();
        assert!(matches!(err, InterviewError::Auth(_)));
    }
}
