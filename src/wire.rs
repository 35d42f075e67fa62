//! JSON envelope types exchanged with the interview client.
//!
//! One bidirectional channel per session carries newline-less JSON objects
//! tagged by a `type` field. Server-to-client envelopes cover the spoken
//! interview flow (speech, questions, listen gates, transcript echoes) plus
//! session control (heartbeat, terminate, complete). Client-to-server
//! envelopes cover playback acknowledgements and explicit termination.

use serde::{Deserialize, Serialize};

/// Category of a spoken utterance, carried on `speech` envelopes so the
/// client can style playback (e.g. dim transitions, highlight questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechKind {
    System,
    Question,
    Transition,
    Moderation,
    Retry,
    Skip,
    Termination,
    Completion,
}

impl SpeechKind {
    /// Render to wire format (used in logs and vendor TTS hints).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Question => "question",
            Self::Transition => "transition",
            Self::Moderation => "moderation",
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Termination => "termination",
            Self::Completion => "completion",
        }
    }
}

/// Envelopes sent from the server to the interview client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Session opener carrying the session identifier.
    System { text: String, session_id: String },
    /// A spoken utterance that is not an interview question.
    Speech {
        text: String,
        speech_type: SpeechKind,
        message_id: String,
        /// Base64-encoded audio payload; absent when TTS fell back to text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// An interview question (main or follow-up).
    Question {
        text: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Listen gate: authorizes the client to start capturing audio.
    StartListening,
    /// Echo of the accepted transcript for the last utterance.
    Answer { text: String },
    /// Liveness probe.
    Heartbeat { timestamp: chrono::DateTime<chrono::Utc> },
    /// Session is being terminated with the given reason.
    Terminate { reason: String },
    /// Interview ran to normal completion.
    Complete { session_id: String },
}

impl ServerEnvelope {
    /// The message identifier carried by this envelope, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Speech { message_id, .. } | Self::Question { message_id, .. } => {
                Some(message_id)
            }
            _ => None,
        }
    }
}

/// Envelopes received from the interview client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Client finished playing the utterance tagged `message_id`.
    AudioPlaybackCompleted {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Playback failed; treated as completion for handshake purposes.
    AudioPlaybackError { message_id: String, error: String },
    /// Candidate requests termination.
    EndSession,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn speech_envelope_roundtrip_json() {
        let envelope = ServerEnvelope::Speech {
            text: "Welcome.".to_owned(),
            speech_type: SpeechKind::System,
            message_id: "m1".to_owned(),
            audio_data: Some("AAAA".to_owned()),
            format: Some("mp3".to_owned()),
        };
        let json = serde_json::to_string(&envelope).expect("serialize in test");
        assert!(json.contains(r#""type":"speech""#));
        assert!(json.contains(r#""speech_type":"system""#));
        let parsed: ServerEnvelope = serde_json::from_str(&json).expect("deserialize in test");
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn text_only_speech_omits_audio_fields() {
        let envelope = ServerEnvelope::Question {
            text: "Tell me about ownership.".to_owned(),
            message_id: "m2".to_owned(),
            audio_data: None,
            format: None,
        };
        let json = serde_json::to_string(&envelope).expect("serialize in test");
        assert!(!json.contains("audio_data"));
        assert!(!json.contains("format"));
    }

    #[test]
    fn client_envelope_tags_match_wire_contract() {
        let completed: ClientEnvelope =
            serde_json::from_str(r#"{"type":"audio_playback_completed","message_id":"m1"}"#)
                .expect("deserialize in test");
        assert_eq!(
            completed,
            ClientEnvelope::AudioPlaybackCompleted {
                message_id: "m1".to_owned(),
                error: None,
            }
        );

        let end: ClientEnvelope =
            serde_json::from_str(r#"{"type":"end_session"}"#).expect("deserialize in test");
        assert_eq!(end, ClientEnvelope::EndSession);
    }

    #[test]
    fn message_id_accessor_covers_spoken_envelopes() {
        let q = ServerEnvelope::Question {
            text: "q".to_owned(),
            message_id: "m3".to_owned(),
            audio_data: None,
            format: None,
        };
        assert_eq!(q.message_id(), Some("m3"));
        assert_eq!(ServerEnvelope::StartListening.message_id(), None);
    }
}
