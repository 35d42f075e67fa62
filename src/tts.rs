//! Text-to-speech seam.
//!
//! The vendor streaming protocol and MP3 framing live in the synthesis
//! gateway; the session only needs complete audio bytes per utterance.
//! `Ok(None)` means the vendor produced no audio, in which case the caller
//! falls back to a text-only envelope.

use crate::config::TtsConfig;
use crate::error::{InterviewError, Result};
use crate::wire::SpeechKind;
use async_trait::async_trait;
use tracing::info;

/// Synthesizes one utterance to audio bytes.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text` for playback. `kind` is a styling hint for the
    /// vendor voice (questions read slower than transitions).
    ///
    /// Returns `Ok(None)` when the vendor produced no audio.
    ///
    /// # Errors
    ///
    /// Returns `Tts` on transport failure. Callers treat errors the same as
    /// `None` and fall back to a text-only envelope.
    async fn synthesize(&self, text: &str, kind: SpeechKind) -> Result<Option<Vec<u8>>>;
}

/// [`TextToSpeech`] backed by the synthesis gateway's HTTP endpoint.
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpTextToSpeech {
    #[must_use]
    pub fn new(config: TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str, kind: SpeechKind) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "text": text,
                "voice": self.config.voice,
                "format": self.config.format,
                "speech_type": kind.as_str(),
            }))
            .send()
            .await
            .map_err(|e| InterviewError::Tts(format!("TTS gateway request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(InterviewError::Tts(format!(
                "TTS gateway returned HTTP {}",
                response.status()
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| InterviewError::Tts(format!("failed to read TTS audio: {e}")))?;

        if audio.is_empty() {
            info!("TTS returned no audio; falling back to text-only delivery");
            return Ok(None);
        }

        Ok(Some(audio.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tts_for(server: &MockServer) -> HttpTextToSpeech {
        HttpTextToSpeech::new(TtsConfig {
            api_url: server.uri(),
            api_key: "k".to_owned(),
            ..TtsConfig::default()
        })
    }

    #[tokio::test]
    async fn synthesize_returns_audio_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let audio = tts_for(&server)
            .synthesize("Hello there.", SpeechKind::System)
            .await
            .unwrap();
        assert_eq!(audio, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn empty_body_means_no_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let audio = tts_for(&server)
            .synthesize("Hello there.", SpeechKind::Question)
            .await
            .unwrap();
        assert!(audio.is_none());
    }

    #[tokio::test]
    async fn synthesize_surfaces_gateway_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = tts_for(&server)
            .synthesize("Hello there.", SpeechKind::Retry)
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::Tts(_)));
    }
}
