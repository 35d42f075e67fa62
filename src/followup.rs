//! Follow-up question engine.
//!
//! Two operations, both consulted once per follow-up slot: a time- and
//! coverage-aware decision (`should_generate`) and question generation
//! (`generate`). Both record the latest exchange into session memory before
//! consulting the model, so they are safe to call in either order and each
//! mutates memory exactly once.

use crate::error::Result;
use crate::llm::ChatModel;
use crate::memory::{HistoryMessage, QuestionKind, SessionMemoryStore, Speaker};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// System prompt for follow-up question generation.
pub const FOLLOWUP_QUESTION_SYSTEM_PROMPT: &str = "You are a senior interviewer with over 10 \
years of experience in evaluating candidates for behavioral interviews. You are conducting a \
round focused on leadership principles. Your role is to assess candidates by asking thoughtful, \
context-aware follow-up questions that uncover depth, impact, decision-making, and ownership. \
Always maintain a professional tone. Avoid vague or generic questions. Go beyond surface-level \
answers by probing into motivations, tradeoffs, measurable outcomes, and team dynamics. You are \
not here to answer questions, only to guide the candidate deeper through precise, relevant \
questioning.";

/// System prompt for the follow-up decision.
pub const FOLLOWUP_DECISION_SYSTEM_PROMPT: &str = "You are a senior interviewer with over 10 \
years of experience in behavioral interviewing for leadership principles. Your goal is to \
collect sufficient behavioral signal on the required number of principles within a strict time \
budget. Each principle block consists of one main question and a few follow-up questions \
depending on answer quality and time remaining. You prioritize depth of insight, especially \
when answers are vague or lack structure, but your top priority is covering the minimum number \
of principles in the allotted time. If you are behind schedule, reduce follow-ups and move on. \
Respond with `true` if a follow-up should be asked, or `false` if it is better to move on to \
the next principle.";

/// Time and coverage context for the follow-up decision.
#[derive(Debug, Clone, Copy)]
pub struct FollowupSignals {
    /// Whole minutes left in the session budget.
    pub time_remaining_min: u64,
    /// Whole minutes elapsed since the session started.
    pub time_spent_min: u64,
    /// Follow-ups already asked on the current topic.
    pub followups_so_far: usize,
    /// Topics fully covered so far this session.
    pub topics_covered: usize,
}

fn render_history(history: &[HistoryMessage]) -> String {
    let mut rendered = String::new();
    for message in history {
        let speaker = match message.speaker {
            Speaker::Interviewer => match message.kind {
                Some(QuestionKind::Followup) => "Interviewer (follow-up)",
                _ => "Interviewer",
            },
            Speaker::Candidate => "Candidate",
        };
        let _ = writeln!(rendered, "{speaker}: {}", message.content);
    }
    rendered
}

const QUESTION_MAX_TOKENS: u32 = 250;
const DECISION_MAX_TOKENS: u32 = 16;

/// Follow-up adapter around the chat model and session memory.
pub struct FollowupEngine {
    model: Arc<dyn ChatModel>,
    memory: Arc<SessionMemoryStore>,
    question_temperature: f32,
    decision_temperature: f32,
}

impl FollowupEngine {
    #[must_use]
    pub fn new(
        model: Arc<dyn ChatModel>,
        memory: Arc<SessionMemoryStore>,
        question_temperature: f32,
        decision_temperature: f32,
    ) -> Self {
        Self {
            model,
            memory,
            question_temperature,
            decision_temperature,
        }
    }

    /// Record the latest (question, answer) exchange for a topic: the first
    /// exchange starts the topic, later ones append as follow-ups.
    fn record_exchange(&self, session_id: &str, topic: &str, question: &str, answer: &str) {
        if self.memory.has(session_id, topic) {
            self.memory
                .append_followup(session_id, topic, question, answer);
        } else {
            self.memory.start_topic(session_id, topic, question, answer);
        }
    }

    /// Decide whether another follow-up is worth asking. Ambiguous model
    /// output and model failures both default to `true`.
    pub async fn should_generate(
        &self,
        session_id: &str,
        topic: &str,
        question: &str,
        answer: &str,
        signals: FollowupSignals,
    ) -> bool {
        self.record_exchange(session_id, topic, question, answer);
        let history = self.memory.history(session_id, topic);

        let prompt = format!(
            "Current principle: {topic}\n\
             Time remaining: {} minutes\n\
             Time spent: {} minutes\n\
             Follow-ups asked on this principle: {}\n\
             Principles covered so far: {}\n\n\
             Conversation so far:\n{}\n\
             Should you ask another follow-up question on this principle? \
             Answer `true` or `false`.",
            signals.time_remaining_min,
            signals.time_spent_min,
            signals.followups_so_far,
            signals.topics_covered,
            render_history(&history),
        );

        let raw = match self
            .model
            .complete(
                FOLLOWUP_DECISION_SYSTEM_PROMPT,
                &prompt,
                self.decision_temperature,
                DECISION_MAX_TOKENS,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "follow-up decision failed; defaulting to true");
                return true;
            }
        };

        let normalized = raw.to_lowercase();
        if normalized.contains("true") {
            true
        } else if normalized.contains("false") {
            false
        } else {
            warn!(raw = %raw, "unexpected follow-up decision response; defaulting to true");
            true
        }
    }

    /// Generate the next follow-up question from the topic's full history.
    ///
    /// # Errors
    ///
    /// Returns `Llm` when the model call fails; the caller ends the
    /// follow-up loop for this topic.
    pub async fn generate(
        &self,
        session_id: &str,
        topic: &str,
        question: &str,
        answer: &str,
    ) -> Result<String> {
        self.record_exchange(session_id, topic, question, answer);
        let history = self.memory.history(session_id, topic);

        let prompt = format!(
            "Current principle: {topic}\n\n\
             Conversation so far:\n{}\n\
             Ask the single best follow-up question to probe deeper into the candidate's last \
             answer. Respond with the question only.",
            render_history(&history),
        );

        let followup = self
            .model
            .complete(
                FOLLOWUP_QUESTION_SYSTEM_PROMPT,
                &prompt,
                self.question_temperature,
                QUESTION_MAX_TOKENS,
            )
            .await?;

        info!(topic, "generated follow-up question");
        Ok(followup.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::InterviewError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StubModel {
        responses: Mutex<Vec<Result<String>>>,
    }

    impl StubModel {
        fn with(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn complete(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("true".to_owned()))
        }
    }

    fn engine_with(model: Arc<StubModel>) -> (FollowupEngine, Arc<SessionMemoryStore>) {
        let memory = Arc::new(SessionMemoryStore::new(Duration::from_secs(7200)));
        let engine = FollowupEngine::new(model, Arc::clone(&memory), 0.7, 0.2);
        (engine, memory)
    }

    fn signals() -> FollowupSignals {
        FollowupSignals {
            time_remaining_min: 25,
            time_spent_min: 5,
            followups_so_far: 0,
            topics_covered: 0,
        }
    }

    #[tokio::test]
    async fn should_generate_parses_true_false_and_ambiguity() {
        let model = StubModel::with(vec![
            Ok("hmm, not sure".to_owned()),
            Ok("False.".to_owned()),
            Ok("TRUE".to_owned()),
        ]);
        let (engine, _memory) = engine_with(model);

        assert!(engine.should_generate("s1", "ownership", "Q?", "A.", signals()).await);
        assert!(!engine.should_generate("s1", "ownership", "Q?", "A.", signals()).await);
        // Ambiguous output defaults to true.
        assert!(engine.should_generate("s1", "ownership", "Q?", "A.", signals()).await);
    }

    #[tokio::test]
    async fn should_generate_defaults_to_true_on_model_failure() {
        let model = StubModel::with(vec![Err(InterviewError::Llm("down".to_owned()))]);
        let (engine, _memory) = engine_with(model);
        assert!(engine.should_generate("s1", "ownership", "Q?", "A.", signals()).await);
    }

    #[tokio::test]
    async fn each_invocation_mutates_memory_exactly_once() {
        let model = StubModel::with(vec![
            Ok("What was the outcome?".to_owned()),
            Ok("true".to_owned()),
        ]);
        let (engine, memory) = engine_with(model);

        // First invocation starts the topic: main question + answer.
        assert!(engine.should_generate("s1", "ownership", "Q?", "A.", signals()).await);
        assert_eq!(memory.history("s1", "ownership").len(), 2);

        // Second invocation appends one follow-up exchange.
        let question = engine.generate("s1", "ownership", "F1?", "B.").await.unwrap();
        assert_eq!(question, "What was the outcome?");
        let history = memory.history("s1", "ownership");
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].kind, Some(QuestionKind::Followup));
    }

    #[tokio::test]
    async fn generate_works_without_prior_decision_call() {
        let model = StubModel::with(vec![Ok("Why that tradeoff?".to_owned())]);
        let (engine, memory) = engine_with(model);

        let question = engine.generate("s1", "ownership", "Q?", "A.").await.unwrap();
        assert_eq!(question, "Why that tradeoff?");
        // The first exchange started the topic as a main question.
        let history = memory.history("s1", "ownership");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, Some(QuestionKind::Main));
    }

    #[tokio::test]
    async fn generate_propagates_model_failure() {
        let model = StubModel::with(vec![Err(InterviewError::Llm("down".to_owned()))]);
        let (engine, _memory) = engine_with(model);
        assert!(engine.generate("s1", "ownership", "Q?", "A.").await.is_err());
    }
}
