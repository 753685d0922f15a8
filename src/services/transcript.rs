//! Tutor transcript store.
//!
//! Records chat messages from the tutor connection class: user messages as
//! they arrive and assistant replies once streaming ends. A reply cut short
//! by an upstream failure is kept with `is_partial` set.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    pub text: String,
    pub is_partial: bool,
    pub created_at: i64,
}

impl TranscriptEntry {
    #[must_use]
    pub fn new(session_id: &str, user_id: &str, role: Role, text: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            role,
            text: text.into(),
            is_partial: false,
            created_at,
        }
    }

    #[must_use]
    pub fn partial(mut self) -> Self {
        self.is_partial = true;
        self
    }
}

#[async_trait::async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, entry: &TranscriptEntry) -> Result<(), StoreError>;
    /// Entries of a session in the order they were recorded.
    async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError>;
}

#[derive(Default)]
pub struct MemoryTranscriptStore {
    sessions: RwLock<HashMap<String, Vec<TranscriptEntry>>>,
}

#[async_trait::async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn append(&self, entry: &TranscriptEntry) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct PgTranscriptStore {
    pool: PgPool,
}

impl PgTranscriptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TranscriptStore for PgTranscriptStore {
    async fn append(&self, entry: &TranscriptEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tutor_messages (id, session_id, user_id, role, text, is_partial, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(&entry.session_id)
        .bind(&entry.user_id)
        .bind(entry.role.as_str())
        .bind(&entry.text)
        .bind(entry.is_partial)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, String, String, bool, i64)>(
            "SELECT id, session_id, user_id, role, text, is_partial, created_at
             FROM tutor_messages WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, session_id, user_id, role, text, is_partial, created_at)| TranscriptEntry {
                id,
                session_id,
                user_id,
                role: if role == "assistant" { Role::Assistant } else { Role::User },
                text,
                is_partial,
                created_at,
            })
            .collect())
    }
}
