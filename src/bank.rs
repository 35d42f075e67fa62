//! Question bank: static topic-to-seed-questions mapping.
//!
//! Loaded once at startup from a JSON document and validated eagerly so a
//! malformed bank fails the process before any session starts. Topic
//! selection is per session, uniform over the topics not yet drawn.

use crate::error::{InterviewError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Immutable topic-to-questions mapping shared by all sessions.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    topics: HashMap<String, Vec<String>>,
}

impl QuestionBank {
    /// Build a bank from an in-memory mapping, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns `Bank` when the mapping is empty, a topic has no questions,
    /// or a question is blank.
    pub fn new(topics: HashMap<String, Vec<String>>) -> Result<Self> {
        if topics.is_empty() {
            return Err(InterviewError::Bank(
                "question bank has no topics".to_owned(),
            ));
        }
        for (topic, questions) in &topics {
            if questions.is_empty() {
                return Err(InterviewError::Bank(format!(
                    "topic '{topic}' has no questions"
                )));
            }
            if questions.iter().any(|q| q.trim().is_empty()) {
                return Err(InterviewError::Bank(format!(
                    "topic '{topic}' contains a blank question"
                )));
            }
        }
        Ok(Self { topics })
    }

    /// Load and validate the bank from a JSON artifact.
    ///
    /// # Errors
    ///
    /// Returns `Bank` when the file is unreadable, not valid JSON, or fails
    /// shape validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            InterviewError::Bank(format!(
                "failed to read question bank {}: {e}",
                path.display()
            ))
        })?;
        let topics: HashMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
            InterviewError::Bank(format!(
                "invalid question bank {}: {e}",
                path.display()
            ))
        })?;
        let bank = Self::new(topics)?;
        info!(
            topics = bank.topics.len(),
            path = %path.display(),
            "question bank loaded"
        );
        Ok(bank)
    }

    /// Number of topics in the bank.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Draw a seed question uniformly at random from a topic's list.
    #[must_use]
    pub fn seed_question(&self, topic: &str) -> Option<String> {
        self.topics
            .get(topic)?
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Start a fresh without-replacement topic selector for one session.
    #[must_use]
    pub fn selector(&self) -> TopicSelector {
        TopicSelector {
            remaining: self.topics.keys().cloned().collect(),
        }
    }
}

/// Per-session topic drawing state: uniform random without replacement.
#[derive(Debug)]
pub struct TopicSelector {
    remaining: Vec<String>,
}

impl TopicSelector {
    /// Draw a topic not yet returned by this selector, or `None` when the
    /// bank is exhausted.
    pub fn pick_new_topic(&mut self) -> Option<String> {
        if self.remaining.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.remaining.len());
        Some(self.remaining.swap_remove(index))
    }
}
