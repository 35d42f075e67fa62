//! Audio coordination: the per-utterance handshake with the client.
//!
//! Every spoken utterance follows the same strict ordering: mint a message
//! identifier, register a pending utterance, emit the speech or question
//! envelope, and wait for the client's playback acknowledgement (or the
//! timeout). Only after the playback settles may the listen gate open and
//! STT start; this prevents the candidate's device from capturing the
//! interviewer's own audio as input.
//!
//! All methods run on the turn engine's task. The supervisor's message
//! reader enters concurrently only through [`AudioCoordinator::on_client_message`],
//! which touches nothing but the pending-utterance map under its lock.

use crate::channel::ClientChannel;
use crate::config::AudioConfig;
use crate::error::Result;
use crate::stt::SpeechToText;
use crate::tts::TextToSpeech;
use crate::wire::{ClientEnvelope, ServerEnvelope, SpeechKind};
use base64::Engine as _;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prompt spoken when a listening attempt produced no transcript.
pub const RETRY_PROMPT: &str = "Please share your thoughts when you're ready.";

/// Notice spoken when all listening attempts are exhausted.
pub const SKIP_NOTICE: &str = "No response detected. Let's move on.";

/// Handshake and listening windows, snapshotted from [`AudioConfig`].
#[derive(Debug, Clone, Copy)]
pub struct AudioTiming {
    pub playback_wait: Duration,
    pub fallback_pause: Duration,
    pub stt_silence_stop: Duration,
    pub stt_max_wait: Duration,
    pub stt_max_retries: u32,
}

impl From<&AudioConfig> for AudioTiming {
    fn from(config: &AudioConfig) -> Self {
        Self {
            playback_wait: config.playback_wait(),
            fallback_pause: config.fallback_pause(),
            stt_silence_stop: config.stt_silence_stop(),
            stt_max_wait: config.stt_max_wait(),
            stt_max_retries: config.stt_max_retries,
        }
    }
}

/// Lifecycle of one outgoing utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UtteranceStatus {
    AwaitingPlayback,
    Played,
    Errored,
}

/// Bookkeeping for an utterance whose playback is still outstanding.
#[derive(Debug)]
struct PendingUtterance {
    kind: SpeechKind,
    status: UtteranceStatus,
    created_at: Instant,
    done: Option<oneshot::Sender<()>>,
}

/// Sole interface for speaking to and hearing from the candidate.
pub struct AudioCoordinator {
    channel: Arc<dyn ClientChannel>,
    tts: Arc<dyn TextToSpeech>,
    stt: Arc<dyn SpeechToText>,
    cancel: CancellationToken,
    timing: AudioTiming,
    pending: Mutex<HashMap<String, PendingUtterance>>,
}

impl AudioCoordinator {
    #[must_use]
    pub fn new(
        channel: Arc<dyn ClientChannel>,
        tts: Arc<dyn TextToSpeech>,
        stt: Arc<dyn SpeechToText>,
        cancel: CancellationToken,
        timing: AudioTiming,
    ) -> Self {
        Self {
            channel,
            tts,
            stt,
            cancel,
            timing,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingUtterance>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Speak one utterance and wait for the client's playback
    /// acknowledgement (bounded by the playback timeout).
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the envelope cannot be sent.
    pub async fn speak_and_wait(&self, text: &str, kind: SpeechKind) -> Result<()> {
        self.emit_and_wait(text, kind, false).await
    }

    /// Ask a question (TTS + playback wait), then open the listen gate and
    /// capture the candidate's reply. Returns an empty string when no
    /// transcript could be obtained after all retries.
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the transport fails mid-handshake.
    pub async fn ask_and_listen(&self, question: &str) -> Result<String> {
        self.emit_and_wait(question, SpeechKind::Question, true)
            .await?;
        self.listen().await
    }

    /// Open the listen gate without re-speaking anything. Used after
    /// moderation branches that must re-listen without repeating the
    /// question.
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the transport fails.
    pub async fn listen_only(&self) -> Result<String> {
        self.listen().await
    }

    /// Dispatch point for playback envelopes from the client, called from
    /// the supervisor's message reader.
    pub fn on_client_message(&self, envelope: &ClientEnvelope) {
        match envelope {
            ClientEnvelope::AudioPlaybackCompleted { message_id, error } => {
                self.settle(message_id, error.as_deref());
            }
            ClientEnvelope::AudioPlaybackError { message_id, error } => {
                self.settle(message_id, Some(error));
            }
            ClientEnvelope::EndSession => {}
        }
    }

    /// Emit one utterance envelope and wait out its playback handshake.
    async fn emit_and_wait(&self, text: &str, kind: SpeechKind, as_question: bool) -> Result<()> {
        let message_id = Uuid::new_v4().to_string();
        let (done_tx, done_rx) = oneshot::channel();
        self.lock_pending().insert(
            message_id.clone(),
            PendingUtterance {
                kind,
                status: UtteranceStatus::AwaitingPlayback,
                created_at: Instant::now(),
                done: Some(done_tx),
            },
        );

        let audio = match self.tts.synthesize(text, kind).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(error = %e, "TTS synthesis failed; falling back to text-only");
                None
            }
        };
        let has_audio = audio.is_some();
        let audio_data = audio.map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));
        let format = audio_data.as_ref().map(|_| "mp3".to_owned());

        let envelope = if as_question {
            ServerEnvelope::Question {
                text: text.to_owned(),
                message_id: message_id.clone(),
                audio_data,
                format,
            }
        } else {
            ServerEnvelope::Speech {
                text: text.to_owned(),
                speech_type: kind,
                message_id: message_id.clone(),
                audio_data,
                format,
            }
        };

        if let Err(e) = self.channel.send(&envelope).await {
            self.lock_pending().remove(&message_id);
            return Err(e);
        }

        if has_audio {
            // Race the acknowledgement against the timeout and cancellation.
            tokio::select! {
                _ = done_rx => {
                    debug!(message_id, "playback settled");
                }
                () = tokio::time::sleep(self.timing.playback_wait) => {
                    warn!(message_id, "playback acknowledgement timed out; proceeding");
                }
                () = self.cancel.cancelled() => {
                    debug!(message_id, "cancelled while awaiting playback");
                }
            }
        } else {
            // Text-only fallback: give the candidate a moment to read.
            tokio::select! {
                () = tokio::time::sleep(self.timing.fallback_pause) => {}
                () = self.cancel.cancelled() => {}
            }
        }

        self.lock_pending().remove(&message_id);
        Ok(())
    }

    /// Listen-gate loop: up to `stt_max_retries` attempts, with a retry
    /// prompt in between and a skip notice on exhaustion.
    async fn listen(&self) -> Result<String> {
        for attempt in 0..self.timing.stt_max_retries {
            if self.cancel.is_cancelled() {
                return Ok(String::new());
            }

            self.channel.send(&ServerEnvelope::StartListening).await?;
            info!(attempt = attempt + 1, max = self.timing.stt_max_retries, "listening for response");

            let transcript = match self
                .stt
                .transcribe(
                    self.timing.stt_silence_stop,
                    self.timing.stt_max_wait,
                    self.cancel.child_token(),
                )
                .await
            {
                Ok(transcript) => transcript,
                Err(e) => {
                    warn!(error = %e, "STT failed; treating as empty transcript");
                    String::new()
                }
            };

            if self.cancel.is_cancelled() {
                return Ok(String::new());
            }

            let transcript = transcript.trim().to_owned();
            if !transcript.is_empty() {
                info!("transcript received");
                self.channel
                    .send(&ServerEnvelope::Answer {
                        text: transcript.clone(),
                    })
                    .await?;
                return Ok(transcript);
            }

            if attempt + 1 < self.timing.stt_max_retries {
                self.speak_and_wait(RETRY_PROMPT, SpeechKind::Retry).await?;
            }
        }

        self.speak_and_wait(SKIP_NOTICE, SpeechKind::Skip).await?;
        Ok(String::new())
    }

    /// Settle a pending utterance. Unknown identifiers are late
    /// acknowledgements for handshakes that already timed out.
    fn settle(&self, message_id: &str, error: Option<&str>) {
        let mut pending = self.lock_pending();
        let Some(mut utterance) = pending.remove(message_id) else {
            debug!(message_id, "playback ack for unknown or settled utterance");
            return;
        };
        utterance.status = if error.is_some() {
            UtteranceStatus::Errored
        } else {
            UtteranceStatus::Played
        };
        if let Some(error) = error {
            warn!(message_id, error, "playback settled with error");
        }
        let elapsed_ms = utterance.created_at.elapsed().as_millis() as u64;
        debug!(
            message_id,
            kind = utterance.kind.as_str(),
            status = ?utterance.status,
            elapsed_ms,
            "pending utterance settled"
        );
        if let Some(done) = utterance.done.take() {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::InterviewError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct FakeChannel {
        sent: Mutex<Vec<ServerEnvelope>>,
        notify: mpsc::UnboundedSender<ServerEnvelope>,
    }

    impl FakeChannel {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnvelope>) {
            let (notify, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    sent: Mutex::new(Vec::new()),
                    notify,
                }),
                rx,
            )
        }

        fn sent(&self) -> Vec<ServerEnvelope> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClientChannel for FakeChannel {
        async fn send(&self, envelope: &ServerEnvelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope.clone());
            let _ = self.notify.send(envelope.clone());
            Ok(())
        }

        async fn recv(&self) -> Result<Option<ClientEnvelope>> {
            Ok(None)
        }
    }

    struct FakeStt {
        transcripts: Mutex<VecDeque<String>>,
    }

    impl FakeStt {
        fn with(transcripts: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                transcripts: Mutex::new(transcripts.iter().map(|t| (*t).to_owned()).collect()),
            })
        }
    }

    #[async_trait]
    impl SpeechToText for FakeStt {
        async fn transcribe(
            &self,
            _: Duration,
            _: Duration,
            _: CancellationToken,
        ) -> Result<String> {
            Ok(self
                .transcripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    struct FakeTts {
        fail: bool,
    }

    #[async_trait]
    impl TextToSpeech for FakeTts {
        async fn synthesize(&self, _: &str, _: SpeechKind) -> Result<Option<Vec<u8>>> {
            if self.fail {
                Err(InterviewError::Tts("vendor down".to_owned()))
            } else {
                Ok(Some(vec![0x0a, 0x0b]))
            }
        }
    }

    fn timing() -> AudioTiming {
        AudioTiming {
            playback_wait: Duration::from_millis(100),
            fallback_pause: Duration::from_millis(10),
            stt_silence_stop: Duration::from_secs(3),
            stt_max_wait: Duration::from_secs(60),
            stt_max_retries: 2,
        }
    }

    fn coordinator(
        channel: Arc<FakeChannel>,
        stt: Arc<FakeStt>,
        tts_fails: bool,
        cancel: CancellationToken,
    ) -> Arc<AudioCoordinator> {
        Arc::new(AudioCoordinator::new(
            channel,
            Arc::new(FakeTts { fail: tts_fails }),
            stt,
            cancel,
            timing(),
        ))
    }

    /// Acknowledge every spoken envelope as soon as it is emitted,
    /// mimicking a responsive client.
    fn spawn_auto_acker(
        coordinator: Arc<AudioCoordinator>,
        mut rx: mpsc::UnboundedReceiver<ServerEnvelope>,
    ) {
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Some(message_id) = envelope.message_id() {
                    coordinator.on_client_message(&ClientEnvelope::AudioPlaybackCompleted {
                        message_id: message_id.to_owned(),
                        error: None,
                    });
                }
            }
        });
    }

    #[tokio::test]
    async fn handshake_emits_gate_only_after_question() {
        let (channel, rx) = FakeChannel::new();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&["I led a migration."]),
            false,
            CancellationToken::new(),
        );
        spawn_auto_acker(Arc::clone(&coordinator), rx);

        let transcript = coordinator.ask_and_listen("Tell me about ownership.").await.unwrap();
        assert_eq!(transcript, "I led a migration.");

        let sent = channel.sent();
        assert!(matches!(sent[0], ServerEnvelope::Question { .. }));
        assert_eq!(sent[1], ServerEnvelope::StartListening);
        assert_eq!(
            sent[2],
            ServerEnvelope::Answer {
                text: "I led a migration.".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn playback_timeout_proceeds_to_listen() {
        let (channel, _rx) = FakeChannel::new();
        // No acker: the playback wait must elapse, then the gate opens.
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&["fine"]),
            false,
            CancellationToken::new(),
        );

        let transcript = coordinator.ask_and_listen("Q?").await.unwrap();
        assert_eq!(transcript, "fine");
        assert!(
            channel
                .sent()
                .iter()
                .any(|e| *e == ServerEnvelope::StartListening)
        );
    }

    #[tokio::test]
    async fn playback_error_settles_the_handshake() {
        let (channel, rx) = FakeChannel::new();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&[]),
            false,
            CancellationToken::new(),
        );

        // Ack with an error instead of a clean completion.
        let acker = Arc::clone(&coordinator);
        let mut rx = rx;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Some(message_id) = envelope.message_id() {
                    acker.on_client_message(&ClientEnvelope::AudioPlaybackError {
                        message_id: message_id.to_owned(),
                        error: "decode failed".to_owned(),
                    });
                }
            }
        });

        let started = Instant::now();
        coordinator
            .speak_and_wait("Welcome.", SpeechKind::System)
            .await
            .unwrap();
        // Settled well before the 100ms playback timeout.
        assert!(started.elapsed() < Duration::from_millis(90));
    }

    #[tokio::test]
    async fn empty_transcripts_retry_then_skip() {
        let (channel, rx) = FakeChannel::new();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&[]),
            false,
            CancellationToken::new(),
        );
        spawn_auto_acker(Arc::clone(&coordinator), rx);

        let transcript = coordinator.ask_and_listen("Q?").await.unwrap();
        assert!(transcript.is_empty());

        let sent = channel.sent();
        let gates = sent
            .iter()
            .filter(|e| **e == ServerEnvelope::StartListening)
            .count();
        assert_eq!(gates, 2);
        let retries = sent
            .iter()
            .filter(|e| {
                matches!(e, ServerEnvelope::Speech { speech_type: SpeechKind::Retry, .. })
            })
            .count();
        assert_eq!(retries, 1);
        let skips = sent
            .iter()
            .filter(|e| matches!(e, ServerEnvelope::Speech { speech_type: SpeechKind::Skip, .. }))
            .count();
        assert_eq!(skips, 1);
        // No answer envelope was emitted.
        assert!(!sent.iter().any(|e| matches!(e, ServerEnvelope::Answer { .. })));
    }

    #[tokio::test]
    async fn tts_failure_falls_back_to_text_only() {
        let (channel, _rx) = FakeChannel::new();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&[]),
            true,
            CancellationToken::new(),
        );

        coordinator
            .speak_and_wait("Welcome.", SpeechKind::System)
            .await
            .unwrap();

        let sent = channel.sent();
        match &sent[0] {
            ServerEnvelope::Speech {
                audio_data, format, ..
            } => {
                assert!(audio_data.is_none());
                assert!(format.is_none());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_session_stops_listening_immediately() {
        let (channel, _rx) = FakeChannel::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&["ignored"]),
            false,
            cancel,
        );

        let transcript = coordinator.listen_only().await.unwrap();
        assert!(transcript.is_empty());
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn message_ids_are_unique_per_utterance() {
        let (channel, rx) = FakeChannel::new();
        let coordinator = coordinator(
            Arc::clone(&channel),
            FakeStt::with(&["a", "b"]),
            false,
            CancellationToken::new(),
        );
        spawn_auto_acker(Arc::clone(&coordinator), rx);

        coordinator.ask_and_listen("Q1?").await.unwrap();
        coordinator.ask_and_listen("Q1?").await.unwrap();

        let ids: Vec<String> = channel
            .sent()
            .iter()
            .filter_map(|e| e.message_id().map(str::to_owned))
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
