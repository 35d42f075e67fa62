//! Per-topic interview loop.
//!
//! Runs inside the supervisor's task group: opening system envelope,
//! introduction, then the main loop of seed question, moderation branching,
//! follow-ups, and block persistence, all under the session time budget and
//! the shared cancellation token.

use crate::bank::{QuestionBank, TopicSelector};
use crate::channel::ClientChannel;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::followup::{FollowupEngine, FollowupSignals};
use crate::memory::SessionMemoryStore;
use crate::moderation::{ModerationLabel, Moderator};
use crate::session::audio::AudioCoordinator;
use crate::sink::{InteractionSink, QuestionAnswer, TurnRecord};
use crate::wire::{ServerEnvelope, SpeechKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Opening line spoken before the first topic.
pub const INTRO_PROMPT: &str =
    "Hi there! My name is Aron, and I'll be your interviewer today.";

const TRANSITION_AFTER_INTRO: &str = "Thanks for the introduction. It's great to learn a bit \
about you. Let's get started with the interview.";
const TRANSITION_NO_INTRO: &str = "Let's begin with the interview.";
const TRANSITION_NEXT_TOPIC: &str =
    "Thank you for your response. Let's move to the next topic.";
const COMPLETION_NOTICE: &str =
    "Thank you for your time. The interview session is now complete.";
const TERMINATION_NOTICE: &str = "Interview terminated due to inappropriate behavior.";
const OFF_TOPIC_REDIRECT: &str =
    "Please try to answer the question related to your experience.";
const REPEAT_CONFIRM: &str = "Sure, let me repeat the question.";
const CHANGE_REFUSAL: &str = "Unfortunately, we can't change the question, but feel free to \
use any academic, co-curricular, or personal experiences to answer it.";
const THINKING_ACK: &str = "Sure, take your time.";

/// Immutable per-session limits, snapshotted from [`SessionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub duration_limit: Duration,
    pub min_topics: usize,
    pub max_followups: usize,
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            duration_limit: config.duration_limit(),
            min_topics: config.min_topics,
            max_followups: config.max_followups_per_topic,
        }
    }
}

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
    Error,
}

/// Final accounting for one session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub topics_covered: usize,
    pub total_followups: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Monotonic clock over the session time budget.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    started: Instant,
    limit: Duration,
}

impl SessionClock {
    #[must_use]
    pub fn start(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left in the budget, saturating at zero.
    #[must_use]
    pub fn time_remaining(&self) -> Duration {
        self.limit.saturating_sub(self.started.elapsed())
    }
}

/// The per-session interview driver.
pub struct TurnEngine {
    session_id: String,
    user_id: String,
    limits: SessionLimits,
    clock: SessionClock,
    bank: Arc<QuestionBank>,
    selector: TopicSelector,
    audio: Arc<AudioCoordinator>,
    moderator: Moderator,
    followups: FollowupEngine,
    memory: Arc<SessionMemoryStore>,
    sink: Arc<dyn InteractionSink>,
    channel: Arc<dyn ClientChannel>,
    cancel: CancellationToken,
    stats: SessionStats,
}

impl TurnEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        user_id: String,
        limits: SessionLimits,
        bank: Arc<QuestionBank>,
        audio: Arc<AudioCoordinator>,
        moderator: Moderator,
        followups: FollowupEngine,
        memory: Arc<SessionMemoryStore>,
        sink: Arc<dyn InteractionSink>,
        channel: Arc<dyn ClientChannel>,
        cancel: CancellationToken,
    ) -> Self {
        let selector = bank.selector();
        let stats = SessionStats {
            session_id: session_id.clone(),
            user_id: user_id.clone(),
            status: SessionStatus::Active,
            topics_covered: 0,
            total_followups: 0,
            started_at: Utc::now(),
            ended_at: None,
        };
        Self {
            session_id,
            user_id,
            limits,
            clock: SessionClock::start(limits.duration_limit),
            bank,
            selector,
            audio,
            moderator,
            followups,
            memory,
            sink,
            channel,
            cancel,
            stats,
        }
    }

    /// Run the interview to completion, termination, or cancellation.
    ///
    /// # Errors
    ///
    /// Returns `Channel` when the transport fails mid-session; the
    /// supervisor treats that the same as a disconnect.
    pub async fn run(mut self) -> Result<SessionStats> {
        info!(session_id = %self.session_id, user_id = %self.user_id, "interview starting");
        self.clock = SessionClock::start(self.limits.duration_limit);

        self.channel
            .send(&ServerEnvelope::System {
                text: "Interview started!".to_owned(),
                session_id: self.session_id.clone(),
            })
            .await?;

        self.run_intro().await?;

        while !self.cancel.is_cancelled()
            && self.clock.time_remaining() > Duration::ZERO
            && self.stats.topics_covered < self.limits.min_topics
        {
            let Some(topic) = self.selector.pick_new_topic() else {
                info!("question bank exhausted");
                break;
            };
            let Some(seed) = self.bank.seed_question(&topic) else {
                continue;
            };
            info!(topic, "starting topic");

            let main_answer = self.ask_with_moderation(&seed).await?;
            if main_answer.is_empty() || self.cancel.is_cancelled() {
                continue;
            }

            let followups = self.handle_followups(&topic, &seed, &main_answer).await?;

            if !self.cancel.is_cancelled() {
                let record = TurnRecord {
                    session_id: self.session_id.clone(),
                    user_id: self.user_id.clone(),
                    principle: topic.clone(),
                    main_question: QuestionAnswer {
                        question: seed,
                        answer: main_answer,
                    },
                    followups,
                    timestamp: Utc::now(),
                };
                if let Err(e) = self.sink.append(&record).await {
                    warn!(error = %e, topic, "failed to persist topic block");
                }
                self.stats.topics_covered += 1;

                if self.stats.topics_covered < self.limits.min_topics {
                    self.audio
                        .speak_and_wait(TRANSITION_NEXT_TOPIC, SpeechKind::Transition)
                        .await?;
                }
            }
        }

        if !self.cancel.is_cancelled() {
            self.audio
                .speak_and_wait(COMPLETION_NOTICE, SpeechKind::Completion)
                .await?;
            self.channel
                .send(&ServerEnvelope::Complete {
                    session_id: self.session_id.clone(),
                })
                .await?;
            self.stats.status = SessionStatus::Completed;
            self.stats.ended_at = Some(Utc::now());
            // Eager cleanup on normal completion; the supervisor repeats
            // this best-effort on every exit path.
            self.memory.cleanup_session(&self.session_id);
            info!(
                session_id = %self.session_id,
                topics = self.stats.topics_covered,
                followups = self.stats.total_followups,
                "interview completed"
            );
        }

        Ok(self.stats)
    }

    /// Introduction: one spoken prompt whose reply is used only to pick the
    /// transition wording.
    async fn run_intro(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let introduction = self.audio.ask_and_listen(INTRO_PROMPT).await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let transition = if introduction.trim().is_empty() {
            TRANSITION_NO_INTRO
        } else {
            TRANSITION_AFTER_INTRO
        };
        self.audio
            .speak_and_wait(transition, SpeechKind::Transition)
            .await
    }

    /// Ask a question and loop on moderation branches until a safe reply,
    /// an empty transcript, or a fatal label.
    async fn ask_with_moderation(&self, question: &str) -> Result<String> {
        let mut asked = false;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(String::new());
            }

            let answer = if asked {
                self.audio.listen_only().await?
            } else {
                asked = true;
                self.audio.ask_and_listen(question).await?
            };
            if answer.is_empty() {
                return Ok(String::new());
            }

            match self.moderator.moderate(question, &answer).await {
                ModerationLabel::Safe => return Ok(answer),
                ModerationLabel::Abusive | ModerationLabel::Malicious => {
                    self.audio
                        .speak_and_wait(TERMINATION_NOTICE, SpeechKind::Termination)
                        .await?;
                    self.channel
                        .send(&ServerEnvelope::Terminate {
                            reason: "inappropriate".to_owned(),
                        })
                        .await?;
                    self.cancel.cancel();
                    return Ok(String::new());
                }
                ModerationLabel::OffTopic => {
                    self.audio
                        .speak_and_wait(OFF_TOPIC_REDIRECT, SpeechKind::Moderation)
                        .await?;
                }
                ModerationLabel::Change => {
                    self.audio
                        .speak_and_wait(CHANGE_REFUSAL, SpeechKind::Moderation)
                        .await?;
                }
                ModerationLabel::Thinking => {
                    self.audio
                        .speak_and_wait(THINKING_ACK, SpeechKind::Moderation)
                        .await?;
                }
                ModerationLabel::Repeat => {
                    self.audio
                        .speak_and_wait(REPEAT_CONFIRM, SpeechKind::Moderation)
                        .await?;
                    // Re-ask with fresh TTS on the next iteration.
                    asked = false;
                }
            }
        }
    }

    /// Follow-up loop for one topic. A negative decision from the follow-up
    /// engine ends the loop for this topic.
    async fn handle_followups(
        &mut self,
        topic: &str,
        main_question: &str,
        main_answer: &str,
    ) -> Result<Vec<QuestionAnswer>> {
        let mut followups = Vec::new();
        let mut question = main_question.to_owned();
        let mut answer = main_answer.to_owned();

        while followups.len() < self.limits.max_followups
            && self.clock.time_remaining() > Duration::ZERO
            && !self.cancel.is_cancelled()
        {
            let signals = FollowupSignals {
                time_remaining_min: self.clock.time_remaining().as_secs() / 60,
                time_spent_min: self.clock.elapsed().as_secs() / 60,
                followups_so_far: followups.len(),
                topics_covered: self.stats.topics_covered,
            };

            if !self
                .followups
                .should_generate(&self.session_id, topic, &question, &answer, signals)
                .await
            {
                info!(topic, "follow-up engine chose to move on");
                break;
            }

            let followup_question = match self
                .followups
                .generate(&self.session_id, topic, &question, &answer)
                .await
            {
                Ok(q) => q,
                Err(e) => {
                    warn!(error = %e, topic, "follow-up generation failed; moving on");
                    break;
                }
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let followup_answer = self.ask_with_moderation(&followup_question).await?;
            if followup_answer.is_empty() || self.cancel.is_cancelled() {
                break;
            }

            followups.push(QuestionAnswer {
                question: followup_question.clone(),
                answer: followup_answer.clone(),
            });
            question = followup_question;
            answer = followup_answer;
            self.stats.total_followups += 1;
        }

        Ok(followups)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn clock_time_remaining_saturates_at_zero() {
        let clock = SessionClock::start(Duration::ZERO);
        assert_eq!(clock.time_remaining(), Duration::ZERO);

        let clock = SessionClock::start(Duration::from_secs(1800));
        assert!(clock.time_remaining() > Duration::from_secs(1790));
    }

    #[test]
    fn limits_snapshot_from_config() {
        let config = SessionConfig::default();
        let limits = SessionLimits::from(&config);
        assert_eq!(limits.duration_limit, Duration::from_secs(1800));
        assert_eq!(limits.min_topics, 1);
        assert_eq!(limits.max_followups, 2);
    }
}
