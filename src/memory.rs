//! Per-session conversational memory.
//!
//! Keyed by (session, topic), each entry holds the ordered interviewer and
//! candidate messages for one topic so the follow-up engine can reason over
//! the full exchange. Entries carry creation and last-access timestamps;
//! sessions whose entries have all gone idle past the TTL are removed by the
//! periodic expiry sweep. All mutation serializes on one store-wide lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Who produced a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Interviewer,
    Candidate,
}

/// Whether an interviewer message was the topic's main question or a
/// follow-up. Candidate messages carry no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Main,
    Followup,
}

/// One role-tagged message in a topic's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub speaker: Speaker,
    pub kind: Option<QuestionKind>,
    pub content: String,
}

impl HistoryMessage {
    fn interviewer(kind: QuestionKind, content: &str) -> Self {
        Self {
            speaker: Speaker::Interviewer,
            kind: Some(kind),
            content: content.to_owned(),
        }
    }

    fn candidate(content: &str) -> Self {
        Self {
            speaker: Speaker::Candidate,
            kind: None,
            content: content.to_owned(),
        }
    }
}

/// History and access bookkeeping for one (session, topic) entry.
#[derive(Debug)]
struct TopicMemory {
    history: Vec<HistoryMessage>,
    created_at: Instant,
    last_accessed: Instant,
}

impl TopicMemory {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            history: Vec::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Aggregate store statistics for the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MemoryStats {
    pub sessions: usize,
    pub topics: usize,
    pub messages: usize,
    pub ttl_seconds: u64,
}

/// Per-topic breakdown of one session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TopicDetails {
    pub topic: String,
    pub messages: usize,
    pub age_seconds: u64,
    pub idle_seconds: u64,
}

/// Process-wide conversational memory store.
#[derive(Debug)]
pub struct SessionMemoryStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, HashMap<String, TopicMemory>>>,
}

impl SessionMemoryStore {
    /// Create a store whose entries expire after `ttl` of idleness.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, TopicMemory>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a (session, topic) entry exists.
    #[must_use]
    pub fn has(&self, session_id: &str, topic: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|topics| topics.contains_key(topic))
    }

    /// Start a topic: create the entry if absent and record the main
    /// question plus the candidate's answer.
    pub fn start_topic(&self, session_id: &str, topic: &str, question: &str, answer: &str) {
        let mut sessions = self.lock();
        let entry = sessions
            .entry(session_id.to_owned())
            .or_default()
            .entry(topic.to_owned())
            .or_insert_with(TopicMemory::new);
        entry
            .history
            .push(HistoryMessage::interviewer(QuestionKind::Main, question));
        entry.history.push(HistoryMessage::candidate(answer));
        entry.touch();
    }

    /// Record a follow-up exchange on an existing entry. No-op when the
    /// entry does not exist.
    pub fn append_followup(&self, session_id: &str, topic: &str, question: &str, answer: &str) {
        let mut sessions = self.lock();
        let Some(entry) = sessions
            .get_mut(session_id)
            .and_then(|topics| topics.get_mut(topic))
        else {
            return;
        };
        entry
            .history
            .push(HistoryMessage::interviewer(QuestionKind::Followup, question));
        entry.history.push(HistoryMessage::candidate(answer));
        entry.touch();
    }

    /// Snapshot of a topic's history in insertion order. Empty when the
    /// entry does not exist.
    #[must_use]
    pub fn history(&self, session_id: &str, topic: &str) -> Vec<HistoryMessage> {
        let mut sessions = self.lock();
        match sessions
            .get_mut(session_id)
            .and_then(|topics| topics.get_mut(topic))
        {
            Some(entry) => {
                entry.touch();
                entry.history.clone()
            }
            None => Vec::new(),
        }
    }

    /// Remove everything stored for one session. Returns whether anything
    /// was removed; a second call for the same session returns `false`.
    pub fn cleanup_session(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id).is_some();
        if removed {
            info!(session_id, "cleaned up session memory");
        }
        removed
    }

    /// Remove one topic from a session. Removing the last topic removes the
    /// session key as well.
    pub fn cleanup_topic(&self, session_id: &str, topic: &str) -> bool {
        let mut sessions = self.lock();
        let Some(topics) = sessions.get_mut(session_id) else {
            return false;
        };
        if topics.remove(topic).is_none() {
            return false;
        }
        if topics.is_empty() {
            sessions.remove(session_id);
        }
        true
    }

    /// Remove sessions whose entries have all been idle past the TTL.
    /// A session with any fresh topic is kept whole.
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|session_id, topics| {
            let expired = topics
                .values()
                .all(|entry| entry.last_accessed.elapsed() > self.ttl);
            if expired {
                info!(session_id, "expired session memory");
            }
            !expired
        });
        before - sessions.len()
    }

    /// Drop all sessions. Returns how many were removed.
    pub fn force_cleanup_all(&self) -> usize {
        let mut sessions = self.lock();
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            info!(count, "force-cleaned all session memory");
        }
        count
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let sessions = self.lock();
        let topics = sessions.values().map(HashMap::len).sum();
        let messages = sessions
            .values()
            .flat_map(HashMap::values)
            .map(|entry| entry.history.len())
            .sum();
        MemoryStats {
            sessions: sessions.len(),
            topics,
            messages,
            ttl_seconds: self.ttl.as_secs(),
        }
    }

    /// Per-topic breakdown of one session, if it exists.
    #[must_use]
    pub fn session_details(&self, session_id: &str) -> Option<Vec<TopicDetails>> {
        let sessions = self.lock();
        let topics = sessions.get(session_id)?;
        let mut details: Vec<TopicDetails> = topics
            .iter()
            .map(|(topic, entry)| TopicDetails {
                topic: topic.clone(),
                messages: entry.history.len(),
                age_seconds: entry.created_at.elapsed().as_secs(),
                idle_seconds: entry.last_accessed.elapsed().as_secs(),
            })
            .collect();
        details.sort_by(|a, b| a.topic.cmp(&b.topic));
        Some(details)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn store() -> SessionMemoryStore {
        SessionMemoryStore::new(Duration::from_secs(7200))
    }

    #[test]
    fn start_topic_then_cleanup_round_trip() {
        let store = store();
        assert!(!store.has("s1", "ownership"));

        store.start_topic("s1", "ownership", "Q?", "A.");
        assert!(store.has("s1", "ownership"));

        assert!(store.cleanup_session("s1"));
        assert!(!store.has("s1", "ownership"));
    }

    #[test]
    fn cleanup_session_is_idempotent() {
        let store = store();
        store.start_topic("s1", "ownership", "Q?", "A.");
        assert!(store.cleanup_session("s1"));
        assert!(!store.cleanup_session("s1"));
    }

    #[test]
    fn history_preserves_insertion_order_and_roles() {
        let store = store();
        store.start_topic("s1", "ownership", "Main?", "First answer.");
        store.append_followup("s1", "ownership", "Follow-up?", "Second answer.");

        let history = store.history("s1", "ownership");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].speaker, Speaker::Interviewer);
        assert_eq!(history[0].kind, Some(QuestionKind::Main));
        assert_eq!(history[1].speaker, Speaker::Candidate);
        assert_eq!(history[1].kind, None);
        assert_eq!(history[2].kind, Some(QuestionKind::Followup));
        assert_eq!(history[3].content, "Second answer.");
    }

    #[test]
    fn missing_entries_are_soft() {
        let store = store();
        // Write on a missing entry is a no-op, read returns empty.
        store.append_followup("nope", "ownership", "Q?", "A.");
        assert!(store.history("nope", "ownership").is_empty());
        assert!(!store.has("nope", "ownership"));
    }

    #[test]
    fn removing_last_topic_removes_session_key() {
        let store = store();
        store.start_topic("s1", "ownership", "Q?", "A.");
        store.start_topic("s1", "bias for action", "Q?", "A.");

        assert!(store.cleanup_topic("s1", "ownership"));
        assert_eq!(store.stats().sessions, 1);

        assert!(store.cleanup_topic("s1", "bias for action"));
        assert_eq!(store.stats().sessions, 0);
        assert!(!store.cleanup_session("s1"));
    }

    #[test]
    fn expiry_sweep_removes_only_fully_idle_sessions() {
        let store = SessionMemoryStore::new(Duration::from_millis(10));
        store.start_topic("old", "ownership", "Q?", "A.");
        std::thread::sleep(Duration::from_millis(25));
        store.start_topic("fresh", "ownership", "Q?", "A.");
        // Touching one topic keeps a mixed session alive.
        store.start_topic("mixed", "ownership", "Q?", "A.");

        let removed = store.cleanup_expired();
        assert_eq!(removed, 1);
        assert!(!store.has("old", "ownership"));
        assert!(store.has("fresh", "ownership"));
        assert!(store.has("mixed", "ownership"));
    }

    #[test]
    fn history_read_refreshes_last_access() {
        let store = SessionMemoryStore::new(Duration::from_millis(30));
        store.start_topic("s1", "ownership", "Q?", "A.");
        std::thread::sleep(Duration::from_millis(20));
        let _ = store.history("s1", "ownership");
        std::thread::sleep(Duration::from_millis(20));
        // 40ms since creation but only 20ms since the read.
        assert_eq!(store.cleanup_expired(), 0);
        assert!(store.has("s1", "ownership"));
    }

    #[test]
    fn stats_and_details_count_entries() {
        let store = store();
        store.start_topic("s1", "ownership", "Q?", "A.");
        store.append_followup("s1", "ownership", "F?", "B.");
        store.start_topic("s2", "ownership", "Q?", "A.");

        let stats = store.stats();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.messages, 6);
        assert_eq!(stats.ttl_seconds, 7200);

        let details = store.session_details("s1").unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].messages, 4);
        assert!(store.session_details("missing").is_none());
    }

    #[test]
    fn force_cleanup_drops_everything() {
        let store = store();
        store.start_topic("s1", "ownership", "Q?", "A.");
        store.start_topic("s2", "ownership", "Q?", "A.");
        assert_eq!(store.force_cleanup_all(), 2);
        assert_eq!(store.stats().sessions, 0);
    }
}
