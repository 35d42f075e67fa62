//! Chat model client for the moderation and follow-up adapters.
//!
//! Supports any server implementing the OpenAI chat completions API. The
//! adapters only need whole responses (a label, a boolean, or one question),
//! so requests are non-streaming.

use crate::config::LlmConfig;
use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use tracing::debug;

/// A single text-in, text-out chat completion.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion with the given system and user prompts.
    ///
    /// # Errors
    ///
    /// Returns `Llm` on transport failure, non-success status, or an
    /// unparseable response body.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// [`ChatModel`] over an OpenAI-compatible HTTP API.
pub struct HttpChatModel {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpChatModel {
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn completions_url(&self) -> String {
        let base = match self.config.api_url.strip_suffix("/v1") {
            Some(u) => u,
            None => &self.config.api_url,
        };
        let base = base.trim_end_matches('/');
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.api_model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let mut request = self.client.post(self.completions_url()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InterviewError::Llm(format!("API request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(InterviewError::Llm(format!(
                "API returned HTTP {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InterviewError::Llm(format!("invalid API response: {e}")))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InterviewError::Llm("response missing message content".to_owned()))?;

        debug!(model = %self.config.api_model, "chat completion finished");
        Ok(content.trim().to_owned())
    }
}
