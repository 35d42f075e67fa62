//! Configuration types for the interview server.
//!
//! Settings load from an optional TOML file and are overlaid with
//! environment-supplied vendor credentials. Validation runs once at startup
//! and reports every missing or malformed option in a single error so a
//! misconfigured deployment fails fast with a complete picture.

use crate::error::{InterviewError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the auth-service API key.
pub const ENV_AUTH_API_KEY: &str = "ARON_AUTH_API_KEY";
/// Environment variable carrying the LLM API key.
pub const ENV_LLM_API_KEY: &str = "ARON_LLM_API_KEY";
/// Environment variable carrying the STT vendor API key.
pub const ENV_STT_API_KEY: &str = "ARON_STT_API_KEY";
/// Environment variable carrying the TTS vendor API key.
pub const ENV_TTS_API_KEY: &str = "ARON_TTS_API_KEY";

/// Top-level configuration for the interview server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP/WebSocket listener settings.
    pub server: ServerConfig,
    /// Per-session interview limits.
    pub session: SessionConfig,
    /// Utterance handshake and STT listening windows.
    pub audio: AudioConfig,
    /// Conversational memory store settings.
    pub memory: MemoryConfig,
    /// Question bank artifact location.
    pub bank: BankConfig,
    /// Interview block storage settings.
    pub storage: StorageConfig,
    /// Auth service settings.
    pub auth: AuthConfig,
    /// LLM settings (moderation + follow-up engine).
    pub llm: LlmConfig,
    /// Speech-to-text vendor settings.
    pub stt: SttConfig,
    /// Text-to-speech vendor settings.
    pub tts: TtsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8000`.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_owned(),
        }
    }
}

/// Per-session interview limits. Snapshotted immutably at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Overall session time budget in seconds.
    pub duration_limit_seconds: u64,
    /// Minimum number of topics to cover before the session may complete.
    pub min_topics: usize,
    /// Maximum follow-up questions per topic.
    pub max_followups_per_topic: usize,
    /// Interval between heartbeat envelopes in seconds.
    pub heartbeat_interval_seconds: u64,
    /// Grace period for auxiliary tasks to unwind after cancellation.
    pub supervisor_grace_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_limit_seconds: 1800,
            min_topics: 1,
            max_followups_per_topic: 2,
            heartbeat_interval_seconds: 5,
            supervisor_grace_seconds: 5,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn duration_limit(&self) -> Duration {
        Duration::from_secs(self.duration_limit_seconds)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    #[must_use]
    pub fn supervisor_grace(&self) -> Duration {
        Duration::from_secs(self.supervisor_grace_seconds)
    }
}

/// Utterance handshake and listening windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// How long to wait for the client's playback-complete acknowledgement.
    pub playback_wait_seconds: u64,
    /// Pause inserted after a text-only (TTS fallback) envelope so the
    /// candidate has time to read it.
    pub fallback_pause_seconds: u64,
    /// Sustained silence that ends an STT capture.
    pub stt_silence_stop_seconds: u64,
    /// Maximum wait for any speech before STT gives up.
    pub stt_max_wait_seconds: u64,
    /// Listening attempts per question before the turn is skipped.
    pub stt_max_retries: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            playback_wait_seconds: 30,
            fallback_pause_seconds: 2,
            stt_silence_stop_seconds: 3,
            stt_max_wait_seconds: 60,
            stt_max_retries: 2,
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub fn playback_wait(&self) -> Duration {
        Duration::from_secs(self.playback_wait_seconds)
    }

    #[must_use]
    pub fn fallback_pause(&self) -> Duration {
        Duration::from_secs(self.fallback_pause_seconds)
    }

    #[must_use]
    pub fn stt_silence_stop(&self) -> Duration {
        Duration::from_secs(self.stt_silence_stop_seconds)
    }

    #[must_use]
    pub fn stt_max_wait(&self) -> Duration {
        Duration::from_secs(self.stt_max_wait_seconds)
    }
}

/// Conversational memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Idle time after which a session's memory is eligible for expiry.
    pub ttl_seconds: u64,
    /// Interval between background expiry sweeps.
    pub sweep_interval_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 7200,
            sweep_interval_seconds: 600,
        }
    }
}

impl MemoryConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Question bank artifact location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Path to the topic-to-questions JSON document.
    pub path: PathBuf,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("questions.json"),
        }
    }
}

/// Interview block storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file for completed interview blocks.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("interviews.db"),
        }
    }
}

/// Auth service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token verification endpoint.
    pub verify_url: String,
    /// API key for the auth service (from `ARON_AUTH_API_KEY`).
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verify_url: "http://localhost:8001/auth/verify".to_owned(),
            api_key: String::new(),
        }
    }
}

/// LLM settings shared by the moderation and follow-up adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub api_url: String,
    /// Model identifier.
    pub api_model: String,
    /// Sampling temperature for follow-up question generation.
    pub question_temperature: f32,
    /// Sampling temperature for follow-up decisions and moderation.
    pub decision_temperature: f32,
    /// Token cap for generated follow-up questions.
    pub max_tokens: u32,
    /// API key (from `ARON_LLM_API_KEY`).
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            question_temperature: 0.7,
            decision_temperature: 0.2,
            max_tokens: 250,
            api_key: String::new(),
        }
    }
}

/// Speech-to-text vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Transcription gateway endpoint.
    pub api_url: String,
    /// API key (from `ARON_STT_API_KEY`).
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8002/stt/transcribe".to_owned(),
            api_key: String::new(),
        }
    }
}

/// Text-to-speech vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesis endpoint.
    pub api_url: String,
    /// Vendor voice identifier.
    pub voice: String,
    /// Audio container format sent to clients.
    pub format: String,
    /// API key (from `ARON_TTS_API_KEY`).
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8003/tts/synthesize".to_owned(),
            voice: "cove".to_owned(),
            format: "mp3".to_owned(),
            api_key: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (if it exists), overlay environment
    /// credentials, and validate.
    ///
    /// # Errors
    ///
    /// Returns a single `Config` error enumerating every missing or
    /// malformed option.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                InterviewError::Config(format!(
                    "failed to read config file {}: {e}",
                    path.display()
                ))
            })?;
            toml::from_str(&raw).map_err(|e| {
                InterviewError::Config(format!("invalid config file {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };

        config.apply_env_credentials();
        config.validate()?;
        Ok(config)
    }

    /// Overlay vendor credentials from the environment. Environment values
    /// always win over file values so keys never need to live on disk.
    pub fn apply_env_credentials(&mut self) {
        if let Ok(v) = std::env::var(ENV_AUTH_API_KEY) {
            self.auth.api_key = v;
        }
        if let Ok(v) = std::env::var(ENV_LLM_API_KEY) {
            self.llm.api_key = v;
        }
        if let Ok(v) = std::env::var(ENV_STT_API_KEY) {
            self.stt.api_key = v;
        }
        if let Ok(v) = std::env::var(ENV_TTS_API_KEY) {
            self.tts.api_key = v;
        }
    }

    /// Validate the full configuration, collecting every problem.
    ///
    /// # Errors
    ///
    /// Returns `Config` with one line per missing or malformed option.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let credentials = [
            (ENV_AUTH_API_KEY, &self.auth.api_key, "auth service API key"),
            (ENV_LLM_API_KEY, &self.llm.api_key, "LLM API key"),
            (ENV_STT_API_KEY, &self.stt.api_key, "speech-to-text API key"),
            (ENV_TTS_API_KEY, &self.tts.api_key, "text-to-speech API key"),
        ];
        for (var, value, description) in credentials {
            if value.trim().is_empty() {
                problems.push(format!("missing {var} ({description})"));
            }
        }

        let urls = [
            ("auth.verify_url", &self.auth.verify_url),
            ("llm.api_url", &self.llm.api_url),
            ("stt.api_url", &self.stt.api_url),
            ("tts.api_url", &self.tts.api_url),
        ];
        for (name, value) in urls {
            if value.trim().is_empty() {
                problems.push(format!("{name} is empty"));
            }
        }

        if self.llm.api_model.trim().is_empty() {
            problems.push("llm.api_model is empty".to_owned());
        }
        if self.session.duration_limit_seconds == 0 {
            problems.push("session.duration_limit_seconds must be positive".to_owned());
        }
        if self.session.heartbeat_interval_seconds == 0 {
            problems.push("session.heartbeat_interval_seconds must be positive".to_owned());
        }
        if self.audio.playback_wait_seconds == 0 {
            problems.push("audio.playback_wait_seconds must be positive".to_owned());
        }
        if self.audio.stt_max_retries == 0 {
            problems.push("audio.stt_max_retries must be at least 1".to_owned());
        }
        if self.bank.path.as_os_str().is_empty() {
            problems.push("bank.path is empty".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(InterviewError::Config(format!(
                "configuration is incomplete:\n  - {}",
                problems.join("\n  - ")
            )))
        }
    }
}
