//! Per-session supervisor: task group, cancellation, and cleanup.
//!
//! Owns the session's cancellation token and the three concurrent tasks
//! that share it: the turn engine, the client message reader, and the
//! heartbeat. Whichever finishes first triggers cooperative cancellation of
//! the rest, bounded by a grace period. Registry membership is released on
//! every exit path through the [`SessionSlot`] guard.

use crate::auth::TokenVerifier;
use crate::bank::QuestionBank;
use crate::channel::ClientChannel;
use crate::config::{AudioConfig, LlmConfig, SessionConfig};
use crate::error::Result;
use crate::followup::FollowupEngine;
use crate::llm::ChatModel;
use crate::memory::SessionMemoryStore;
use crate::moderation::Moderator;
use crate::session::audio::{AudioCoordinator, AudioTiming};
use crate::session::registry::ActiveSessions;
use crate::session::turn_engine::{SessionLimits, SessionStats, SessionStatus, TurnEngine};
use crate::sink::InteractionSink;
use crate::stt::SpeechToText;
use crate::tts::TextToSpeech;
use crate::wire::{ClientEnvelope, ServerEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process-wide collaborators injected into every session.
pub struct SessionServices {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub llm: LlmConfig,
    pub bank: Arc<QuestionBank>,
    pub memory: Arc<SessionMemoryStore>,
    pub registry: Arc<ActiveSessions>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub chat: Arc<dyn ChatModel>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub sink: Arc<dyn InteractionSink>,
}

/// Verify a bearer credential and extract the user identifier.
///
/// # Errors
///
/// Returns `Auth` when the credential is rejected; the transport closes
/// the connection with an authorization-refused code.
pub async fn authenticate(services: &SessionServices, token: &str) -> Result<String> {
    services.verifier.verify(token).await
}

/// Run one interview session over an accepted channel.
///
/// # Errors
///
/// Returns `Channel` only for failures before the task group starts (the
/// duplicate-session notice). Once the tasks are running, every outcome is
/// handled here and logged; nothing propagates past this boundary.
pub async fn run_session(
    services: &Arc<SessionServices>,
    channel: Arc<dyn ClientChannel>,
    user_id: &str,
) -> Result<()> {
    let Some(slot) = services.registry.acquire(user_id) else {
        warn!(user_id, "rejected duplicate session");
        channel
            .send(&ServerEnvelope::Terminate {
                reason: "already active".to_owned(),
            })
            .await?;
        return Ok(());
    };

    let session_id = Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    info!(session_id, user_id = slot.user_id(), "session starting");

    let audio = Arc::new(AudioCoordinator::new(
        Arc::clone(&channel),
        Arc::clone(&services.tts),
        Arc::clone(&services.stt),
        cancel.clone(),
        AudioTiming::from(&services.audio),
    ));
    let engine = TurnEngine::new(
        session_id.clone(),
        user_id.to_owned(),
        SessionLimits::from(&services.session),
        Arc::clone(&services.bank),
        Arc::clone(&audio),
        Moderator::new(Arc::clone(&services.chat)),
        FollowupEngine::new(
            Arc::clone(&services.chat),
            Arc::clone(&services.memory),
            services.llm.question_temperature,
            services.llm.decision_temperature,
        ),
        Arc::clone(&services.memory),
        Arc::clone(&services.sink),
        Arc::clone(&channel),
        cancel.clone(),
    );

    let mut interview = tokio::spawn(engine.run());
    let mut reader = tokio::spawn(read_client_messages(
        Arc::clone(&channel),
        Arc::clone(&audio),
        cancel.clone(),
    ));
    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&channel),
        cancel.clone(),
        services.session.heartbeat_interval(),
    ));

    let grace = services.session.supervisor_grace();

    // First task to finish wins; the rest get the grace period to unwind.
    tokio::select! {
        result = &mut interview => {
            log_interview_outcome(&session_id, result);
            cancel.cancel();
            settle_task("reader", reader, grace).await;
            settle_task("heartbeat", heartbeat, grace).await;
        }
        _ = &mut reader => {
            info!(session_id, "message reader finished first");
            cancel.cancel();
            settle_interview(&session_id, interview, grace).await;
            settle_task("heartbeat", heartbeat, grace).await;
        }
        _ = &mut heartbeat => {
            info!(session_id, "heartbeat finished first");
            cancel.cancel();
            settle_interview(&session_id, interview, grace).await;
            settle_task("reader", reader, grace).await;
        }
    }

    // Best-effort memory cleanup; idempotent with the turn engine's own
    // cleanup on normal completion.
    services.memory.cleanup_session(&session_id);
    info!(session_id, user_id = slot.user_id(), "session ended");
    drop(slot);
    Ok(())
}

/// Reader loop: route playback envelopes to the audio coordinator and
/// watch for `end_session` and disconnects.
async fn read_client_messages(
    channel: Arc<dyn ClientChannel>,
    audio: Arc<AudioCoordinator>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = channel.recv() => match received {
                Ok(Some(envelope)) => {
                    audio.on_client_message(&envelope);
                    if matches!(envelope, ClientEnvelope::EndSession) {
                        info!("end_session received");
                        cancel.cancel();
                        break;
                    }
                }
                Ok(None) => {
                    info!("client closed the channel");
                    cancel.cancel();
                    break;
                }
                Err(e) => {
                    info!(error = %e, "client transport failed");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

/// Heartbeat loop: a failed emission means the client is gone.
async fn run_heartbeat(
    channel: Arc<dyn ClientChannel>,
    cancel: CancellationToken,
    interval: Duration,
) {
    loop {
        if let Err(e) = channel
            .send(&ServerEnvelope::Heartbeat {
                timestamp: chrono::Utc::now(),
            })
            .await
        {
            info!(error = %e, "heartbeat emission failed");
            cancel.cancel();
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
}

fn log_interview_outcome(
    session_id: &str,
    result: std::result::Result<Result<SessionStats>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(stats)) => {
            let status = if stats.status == SessionStatus::Active {
                SessionStatus::Terminated
            } else {
                stats.status
            };
            info!(
                session_id,
                status = ?status,
                topics = stats.topics_covered,
                followups = stats.total_followups,
                "interview task finished"
            );
        }
        Ok(Err(e)) => error!(session_id, error = %e, "interview task failed"),
        Err(e) => error!(session_id, error = %e, "interview task panicked"),
    }
}

/// Await the interview task with the grace period, then abandon it.
async fn settle_interview(
    session_id: &str,
    mut handle: JoinHandle<Result<SessionStats>>,
    grace: Duration,
) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(result) => log_interview_outcome(session_id, result),
        Err(_) => {
            warn!(session_id, "interview task did not unwind within grace; aborting");
            handle.abort();
        }
    }
}

/// Await an auxiliary task with the grace period, then abandon it.
async fn settle_task(name: &str, mut handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
        Err(_) => {
            warn!(task = name, "task did not unwind within grace; aborting");
            handle.abort();
        }
    }
}
