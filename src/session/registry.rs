//! Process-wide registry of users currently in an interview.
//!
//! Enforces the single-session-per-user rule. Membership is tied to the
//! supervisor's scope through [`SessionSlot`], whose drop removes the user
//! on every exit path, including panics.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Set of user identifiers with an active session.
#[derive(Debug, Default)]
pub struct ActiveSessions {
    users: Mutex<HashSet<String>>,
}

impl ActiveSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomic test-and-set: returns `false` when the user already has a
    /// session.
    pub fn try_insert(&self, user_id: &str) -> bool {
        self.lock().insert(user_id.to_owned())
    }

    /// Remove a user. Safe to call for users not present.
    pub fn remove(&self, user_id: &str) {
        self.lock().remove(user_id);
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.lock().contains(user_id)
    }

    /// Number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Claim a session slot for `user_id`. Returns `None` when the user is
    /// already active; the returned guard releases the slot on drop.
    #[must_use]
    pub fn acquire(self: &Arc<Self>, user_id: &str) -> Option<SessionSlot> {
        if !self.try_insert(user_id) {
            return None;
        }
        info!(user_id, active = self.len(), "session slot acquired");
        Some(SessionSlot {
            registry: Arc::clone(self),
            user_id: user_id.to_owned(),
        })
    }
}

/// RAII guard for one user's registry membership.
#[derive(Debug)]
pub struct SessionSlot {
    registry: Arc<ActiveSessions>,
    user_id: String,
}

impl SessionSlot {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.registry.remove(&self.user_id);
        info!(
            user_id = %self.user_id,
            active = self.registry.len(),
            "session slot released"
        );
    }
}
