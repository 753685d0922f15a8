//! Action log / snapshot sequencer.
//!
//! ARCHITECTURE
//! ============
//! Every accepted batch becomes one immutable record at the next index of
//! its session. Records are kept by a `SnapshotStore` collaborator
//! (Postgres or in-memory); `SnapshotLog` owns the numbering.
//!
//! DESIGN
//! ======
//! - Indices start at 0 and grow by exactly one per accepted batch.
//!   The read-max, compute-next, write sequence runs under a per-session
//!   mutex, so concurrent appenders in this process never collide.
//! - `put` is insert-or-patch keyed by `(session_id, snapshot_index)`. A
//!   client resubmitting the index it last wrote patches that record
//!   instead of creating a duplicate; the later payload wins.
//! - `sequence` hands out the per-session lock as a guard, so a caller
//!   can apply a batch to durable state and append it without another
//!   batch slipping in between. Lock entries are dropped with the last
//!   guard, so sessions that never had a socket leave nothing behind.
//! - Deleting a session's snapshots is explicit; connection teardown never
//!   touches the log.
//!
//! TRADE-OFFS
//! ==========
//! Two writers that target the same explicit index resolve as
//! last-writer-wins. Operational transform or CRDT merging is out of reach
//! of this layer.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::canvas::ActionBatch;
use crate::db::StoreError;
use crate::frame::ErrorCode;

// =============================================================================
// TYPES
// =============================================================================

/// One persisted batch. `actions_json` is a serialized `WhiteboardAction[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SnapshotRecord {
    pub session_id: String,
    pub snapshot_index: i64,
    pub actions_json: String,
    pub created_at: i64,
}

/// Whether `put` created a new record or patched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Patched,
}

/// Replay window. Bounds are exclusive for `after_index` and inclusive for
/// `max_index`; results are always ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub after_index: Option<i64>,
    pub max_index: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot index must be non-negative, got {0}")]
    InvalidIndex(i64),
    #[error("snapshot index {requested} would leave a gap; next index is {next}")]
    IndexGap { requested: i64, next: i64 },
    #[error("failed to encode actions: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ErrorCode for SnapshotError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIndex(_) => "E_INVALID_SNAPSHOT_INDEX",
            Self::IndexGap { .. } => "E_SNAPSHOT_INDEX_GAP",
            Self::Encode(_) => "E_ENCODE",
            Self::Storage(_) => "E_STORAGE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.retryable())
    }
}

// =============================================================================
// COLLABORATOR
// =============================================================================

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Highest stored index, or `None` for an empty session.
    async fn max_index(&self, session_id: &str) -> Result<Option<i64>, StoreError>;
    /// Insert the record, or patch the one already at its index.
    async fn put(&self, record: &SnapshotRecord) -> Result<PutOutcome, StoreError>;
    /// Ascending records within the window. `limit` is already clamped.
    async fn list(
        &self,
        session_id: &str,
        after_index: Option<i64>,
        max_index: Option<i64>,
        limit: i64,
    ) -> Result<Vec<SnapshotRecord>, StoreError>;
    async fn delete_all(&self, session_id: &str) -> Result<u64, StoreError>;
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    sessions: RwLock<HashMap<String, BTreeMap<i64, SnapshotRecord>>>,
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn max_index(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|records| records.keys().next_back().copied()))
    }

    async fn put(&self, record: &SnapshotRecord) -> Result<PutOutcome, StoreError> {
        let mut sessions = self.sessions.write().await;
        let previous = sessions
            .entry(record.session_id.clone())
            .or_default()
            .insert(record.snapshot_index, record.clone());
        Ok(if previous.is_some() { PutOutcome::Patched } else { PutOutcome::Inserted })
    }

    async fn list(
        &self,
        session_id: &str,
        after_index: Option<i64>,
        max_index: Option<i64>,
        limit: i64,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let sessions = self.sessions.read().await;
        let Some(records) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let lower = after_index.map_or(i64::MIN, |after| after.saturating_add(1));
        let upper = max_index.unwrap_or(i64::MAX);
        if lower > upper {
            return Ok(Vec::new());
        }
        Ok(records
            .range(lower..=upper)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn delete_all(&self, session_id: &str) -> Result<u64, StoreError> {
        let removed = self.sessions.write().await.remove(session_id);
        Ok(removed.map_or(0, |records| u64::try_from(records.len()).unwrap_or(u64::MAX)))
    }
}

pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn max_index(&self, session_id: &str) -> Result<Option<i64>, StoreError> {
        let (max,) = sqlx::query_as::<_, (Option<i64>,)>(
            "SELECT MAX(snapshot_index) FROM whiteboard_snapshots WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn put(&self, record: &SnapshotRecord) -> Result<PutOutcome, StoreError> {
        // `xmax = 0` only holds for a freshly inserted tuple.
        let (inserted,) = sqlx::query_as::<_, (bool,)>(
            "INSERT INTO whiteboard_snapshots (session_id, snapshot_index, actions_json, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (session_id, snapshot_index)
             DO UPDATE SET actions_json = EXCLUDED.actions_json, created_at = EXCLUDED.created_at
             RETURNING (xmax = 0)",
        )
        .bind(&record.session_id)
        .bind(record.snapshot_index)
        .bind(&record.actions_json)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(if inserted { PutOutcome::Inserted } else { PutOutcome::Patched })
    }

    async fn list(
        &self,
        session_id: &str,
        after_index: Option<i64>,
        max_index: Option<i64>,
        limit: i64,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT session_id, snapshot_index, actions_json, created_at
             FROM whiteboard_snapshots
             WHERE session_id = $1
               AND ($2::BIGINT IS NULL OR snapshot_index > $2)
               AND ($3::BIGINT IS NULL OR snapshot_index <= $3)
             ORDER BY snapshot_index ASC
             LIMIT $4",
        )
        .bind(session_id)
        .bind(after_index)
        .bind(max_index)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_all(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM whiteboard_snapshots WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// SEQUENCER
// =============================================================================

pub struct SnapshotLog {
    store: Arc<dyn SnapshotStore>,
    /// Entries only live while some caller holds or awaits the session.
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    page_limit_max: i64,
}

impl SnapshotLog {
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, page_limit_max: i64) -> Self {
        Self { store, locks: StdMutex::new(HashMap::new()), page_limit_max: page_limit_max.max(1) }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take exclusive sequencing rights for a session. Anything done while
    /// the returned guard is alive is ordered against every other append to
    /// the same session.
    pub async fn sequence(&self, session_id: &str) -> SessionSequence<'_> {
        let lock = self.lock_table().entry(session_id.to_owned()).or_default().clone();
        let guard = lock.lock_owned().await;
        SessionSequence { log: self, session_id: session_id.to_owned(), guard: Some(guard) }
    }

    /// Append at the next index. Returns the assigned index.
    ///
    /// # Errors
    ///
    /// `Encode` if the actions cannot be serialized, `Storage` on store failure.
    pub async fn append_batch(&self, session_id: &str, batch: &ActionBatch, now_ms: i64) -> Result<i64, SnapshotError> {
        self.sequence(session_id).await.append(batch, now_ms).await
    }

    /// Write at a client-supplied index: patch an existing record or append
    /// at exactly the next index.
    ///
    /// # Errors
    ///
    /// `InvalidIndex` for negative indices, `IndexGap` past the next index,
    /// plus encode and storage failures.
    pub async fn append_at(
        &self,
        session_id: &str,
        snapshot_index: i64,
        batch: &ActionBatch,
        now_ms: i64,
    ) -> Result<i64, SnapshotError> {
        if snapshot_index < 0 {
            return Err(SnapshotError::InvalidIndex(snapshot_index));
        }
        self.sequence(session_id)
            .await
            .append_at(snapshot_index, batch, now_ms)
            .await
    }

    /// Ascending replay page. `limit` is clamped to `1..=page_limit_max`.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn list(&self, session_id: &str, query: SnapshotQuery) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        let limit = query
            .limit
            .unwrap_or(self.page_limit_max)
            .clamp(1, self.page_limit_max);
        Ok(self
            .store
            .list(session_id, query.after_index, query.max_index, limit)
            .await?)
    }

    /// Records strictly after `after_index` (all records for `None`).
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn list_since(
        &self,
        session_id: &str,
        after_index: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<SnapshotRecord>, SnapshotError> {
        self.list(session_id, SnapshotQuery { after_index, max_index: None, limit })
            .await
    }

    /// High-water mark, or -1 for an empty session.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn latest_index(&self, session_id: &str) -> Result<i64, SnapshotError> {
        Ok(self.store.max_index(session_id).await?.unwrap_or(-1))
    }

    /// Remove every snapshot of a session.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64, SnapshotError> {
        let deleted = {
            let _sequence = self.sequence(session_id).await;
            self.store.delete_all(session_id).await?
        };
        info!(%session_id, deleted, "snapshot: session history deleted");
        Ok(deleted)
    }

    /// Forget the session's lock entry unless another caller still holds or
    /// awaits it.
    fn release(&self, session_id: &str) {
        let mut locks = self.lock_table();
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    /// Sessions with a live lock entry.
    pub fn tracked_sessions(&self) -> usize {
        self.lock_table().len()
    }
}

// =============================================================================
// SESSION SEQUENCE
// =============================================================================

/// Exclusive sequencing rights for one session, from `SnapshotLog::sequence`.
/// Dropping it unlocks the session and forgets the lock entry once nobody
/// else is waiting.
pub struct SessionSequence<'a> {
    log: &'a SnapshotLog,
    session_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionSequence<'_> {
    /// Index the next append will receive.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn next_index(&self) -> Result<i64, SnapshotError> {
        Ok(self
            .log
            .store
            .max_index(&self.session_id)
            .await?
            .map_or(0, |max| max + 1))
    }

    /// Check that a client-supplied index can land: it must name an
    /// existing record or exactly the next one.
    ///
    /// # Errors
    ///
    /// `InvalidIndex` for negative indices, `IndexGap` past the next index,
    /// `Storage` on store failure.
    pub async fn check_index(&self, requested: i64) -> Result<(), SnapshotError> {
        if requested < 0 {
            return Err(SnapshotError::InvalidIndex(requested));
        }
        let next = self.next_index().await?;
        if requested > next {
            return Err(SnapshotError::IndexGap { requested, next });
        }
        Ok(())
    }

    /// Append at the next index. Returns the assigned index.
    ///
    /// # Errors
    ///
    /// `Encode` if the actions cannot be serialized, `Storage` on store failure.
    pub async fn append(&self, batch: &ActionBatch, now_ms: i64) -> Result<i64, SnapshotError> {
        let actions_json = batch.actions_json()?;
        let next = self.next_index().await?;
        let outcome = self.put(next, actions_json, now_ms).await?;
        debug!(session_id = %self.session_id, snapshot_index = next, batch_id = %batch.batch_id, ?outcome, "snapshot: appended");
        Ok(next)
    }

    /// Patch an existing index or append at exactly the next one.
    ///
    /// # Errors
    ///
    /// Index errors as in `check_index`, plus encode and storage failures.
    pub async fn append_at(&self, snapshot_index: i64, batch: &ActionBatch, now_ms: i64) -> Result<i64, SnapshotError> {
        let actions_json = batch.actions_json()?;
        self.check_index(snapshot_index).await?;
        let outcome = self.put(snapshot_index, actions_json, now_ms).await?;
        if outcome == PutOutcome::Patched {
            info!(session_id = %self.session_id, snapshot_index, batch_id = %batch.batch_id, "snapshot: patched existing index");
        }
        Ok(snapshot_index)
    }

    async fn put(&self, snapshot_index: i64, actions_json: String, now_ms: i64) -> Result<PutOutcome, SnapshotError> {
        let record = SnapshotRecord {
            session_id: self.session_id.clone(),
            snapshot_index,
            actions_json,
            created_at: now_ms,
        };
        Ok(self.log.store.put(&record).await?)
    }
}

impl Drop for SessionSequence<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.log.release(&self.session_id);
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
