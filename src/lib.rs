//! Aron: live voice-driven behavioral interview server.
//!
//! A candidate connects over a bidirectional JSON WebSocket channel; each
//! session drives a multi-turn spoken dialogue:
//! seed question → TTS → playback ack → listen gate → STT → moderation →
//! follow-ups → persisted topic block.
//!
//! # Architecture
//!
//! Each session is a small task group sharing one cancellation token:
//! - **Turn engine**: the per-topic interview loop
//! - **Audio coordinator**: the per-utterance ask/ack/listen handshake
//! - **Message reader**: routes playback acks, watches for `end_session`
//! - **Heartbeat**: liveness probe; a failed send cancels the session
//!
//! Vendor concerns (auth, LLM, STT, TTS) sit behind seam traits so the
//! orchestrator is testable with in-memory fakes.

pub mod auth;
pub mod bank;
pub mod channel;
pub mod config;
pub mod error;
pub mod followup;
pub mod llm;
pub mod memory;
pub mod moderation;
pub mod server;
pub mod session;
pub mod sink;
pub mod stt;
pub mod tts;
pub mod wire;

pub use config::AppConfig;
pub use error::{InterviewError, Result};
pub use session::supervisor::{SessionServices, run_session};
pub use wire::{ClientEnvelope, ServerEnvelope, SpeechKind};
