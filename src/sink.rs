//! Durable storage for completed topic blocks.
//!
//! One document per covered topic: the main exchange plus its follow-ups.
//! The interview must never abort because of a storage outage, so callers
//! log append failures and move on; nothing here propagates into the
//! session tasks.

use crate::error::{InterviewError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One question with the candidate's accepted answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// A completed topic block, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub user_id: String,
    pub principle: String,
    pub main_question: QuestionAnswer,
    pub followups: Vec<QuestionAnswer>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only sink for completed topic blocks.
#[async_trait]
pub trait InteractionSink: Send + Sync {
    /// Persist one topic block.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on failure. Callers log and continue; a logging
    /// outage must not abort the interview.
    async fn append(&self, record: &TurnRecord) -> Result<()>;
}

/// [`InteractionSink`] over a local SQLite database.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Open (or create) the database and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns `Storage` when the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| InterviewError::Storage(format!("failed to open {}: {e}", path.display())))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS interview_blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                principle TEXT NOT NULL,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_session ON interview_blocks(session_id);
            CREATE INDEX IF NOT EXISTS idx_blocks_user ON interview_blocks(user_id);",
        )
        .map_err(|e| InterviewError::Storage(format!("failed to migrate schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cheap connectivity probe, consulted by the health endpoint.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let conn = Self::lock(&self.conn);
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }

    /// Read back the stored documents for one session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on query failure.
    pub fn blocks_for_session(&self, session_id: &str) -> Result<Vec<serde_json::Value>> {
        let conn = Self::lock(&self.conn);
        let mut statement = conn
            .prepare("SELECT document FROM interview_blocks WHERE session_id = ?1 ORDER BY id")
            .map_err(|e| InterviewError::Storage(format!("query failed: {e}")))?;
        let rows = statement
            .query_map([session_id], |row| row.get::<_, String>(0))
            .map_err(|e| InterviewError::Storage(format!("query failed: {e}")))?;

        let mut documents = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| InterviewError::Storage(format!("row read failed: {e}")))?;
            let document = serde_json::from_str(&raw)
                .map_err(|e| InterviewError::Storage(format!("stored document corrupt: {e}")))?;
            documents.push(document);
        }
        Ok(documents)
    }
}

#[async_trait]
impl InteractionSink for SqliteSink {
    async fn append(&self, record: &TurnRecord) -> Result<()> {
        let document = serde_json::to_string(record)
            .map_err(|e| InterviewError::Storage(format!("failed to serialize record: {e}")))?;
        let conn = Arc::clone(&self.conn);
        let record = record.clone();

        // SQLite calls block; keep them off the session's cooperative tasks.
        tokio::task::spawn_blocking(move || {
            let conn = Self::lock(&conn);
            conn.execute(
                "INSERT INTO interview_blocks
                    (session_id, user_id, principle, document, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.session_id,
                    record.user_id,
                    record.principle,
                    document,
                    record.timestamp.to_rfc3339(),
                ],
            )
            .map(|_| ())
            .map_err(|e| InterviewError::Storage(format!("insert failed: {e}")))
        })
        .await
        .map_err(|e| InterviewError::Storage(format!("storage task failed: {e}")))?
    }
}
