//! Speech-to-text seam.
//!
//! The raw engine (microphone capture, voice-activity detection, vendor
//! streaming protocol) runs in the capture gateway; the session only needs
//! "listen until sustained silence or the window closes, and give me the
//! transcript". Cancellation is wired through so a mid-turn termination
//! aborts an in-flight capture promptly.

use crate::config::SttConfig;
use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One bounded transcription attempt.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Capture and transcribe one utterance.
    ///
    /// Stops after `silence_stop` of sustained silence once speech started,
    /// or after `max_wait` without any speech. Returns an empty string when
    /// nothing was heard or the capture was cancelled.
    ///
    /// # Errors
    ///
    /// Returns `Stt` on engine/transport failure. Callers treat errors as
    /// an empty transcript and enter the retry path.
    async fn transcribe(
        &self,
        silence_stop: Duration,
        max_wait: Duration,
        cancel: CancellationToken,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    transcript: String,
}

/// [`SpeechToText`] backed by the transcription gateway's HTTP endpoint.
pub struct HttpSpeechToText {
    client: reqwest::Client,
    config: SttConfig,
}

impl HttpSpeechToText {
    #[must_use]
    pub fn new(config: SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(
        &self,
        silence_stop: Duration,
        max_wait: Duration,
        cancel: CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Ok(String::new());
        }

        let request = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            // The gateway holds the capture open for up to max_wait; give
            // the HTTP call a little extra headroom on top of that.
            .timeout(max_wait + Duration::from_secs(10))
            .json(&serde_json::json!({
                "silence_stop_seconds": silence_stop.as_secs(),
                "max_wait_seconds": max_wait.as_secs(),
            }));

        let response = tokio::select! {
            () = cancel.cancelled() => {
                info!("capture cancelled mid-transcription");
                return Ok(String::new());
            }
            result = request.send() => {
                result.map_err(|e| InterviewError::Stt(format!("STT gateway request failed: {e}")))?
            }
        };

        if !response.status().is_success() {
            return Err(InterviewError::Stt(format!(
                "STT gateway returned HTTP {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| InterviewError::Stt(format!("invalid STT gateway response: {e}")))?;

        Ok(body.transcript)
    }
}
