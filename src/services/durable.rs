//! Durable object store: reconciliation with the storage collaborator.
//!
//! ARCHITECTURE
//! ============
//! Persistence and session ownership are external collaborators behind
//! `ObjectStore` and `SessionOwnership`. `DurableObjects` sits in front of
//! them and keeps a per-session hydration cache so reconnecting clients
//! do not hit storage on every join.
//!
//! DESIGN
//! ======
//! - Every mutating call checks ownership before any write.
//! - Objects created through this path always get `source = user`; a client
//!   cannot claim assistant provenance.
//! - Writes go to storage first and the cache second. A failed write leaves
//!   the cache as it was.
//! - Each session's cache sits behind its own mutex, held across the store
//!   round trip, so mutations within one session apply in order while other
//!   sessions proceed independently.
//!
//! TRADE-OFFS
//! ==========
//! Evicting the cache on session teardown never deletes persisted rows;
//! durable objects outlive every connection.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::canvas::{CanvasObjectSpec, ClearScope, ObjectKind, ObjectSource, SpecError, WhiteboardAction};
use crate::db::StoreError;
use crate::frame::ErrorCode;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("user {user_id} does not own session {session_id}")]
    Forbidden { session_id: String, user_id: String },
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object kind {0:?} is ephemeral and cannot be stored durably")]
    EphemeralKind(ObjectKind),
    #[error(transparent)]
    InvalidObject(#[from] SpecError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl ErrorCode for DurableError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::NotFound(_) => "E_OBJECT_NOT_FOUND",
            Self::EphemeralKind(_) => "E_EPHEMERAL_KIND",
            Self::InvalidObject(e) => e.error_code(),
            Self::Storage(_) => "E_STORAGE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.retryable())
    }
}

// =============================================================================
// COLLABORATORS
// =============================================================================

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects of a session in creation order.
    async fn list(&self, session_id: &str) -> Result<Vec<CanvasObjectSpec>, StoreError>;
    async fn upsert(&self, session_id: &str, spec: &CanvasObjectSpec) -> Result<(), StoreError>;
    /// Returns how many of `ids` existed.
    async fn delete(&self, session_id: &str, ids: &[String]) -> Result<u64, StoreError>;
    async fn clear(&self, session_id: &str) -> Result<u64, StoreError>;
}

#[async_trait::async_trait]
pub trait SessionOwnership: Send + Sync {
    /// Owner of a session. `None` marks an open session.
    async fn owner_of(&self, session_id: &str) -> Result<Option<String>, StoreError>;
}

// --- in-memory ---

#[derive(Default)]
pub struct MemoryObjectStore {
    sessions: RwLock<HashMap<String, Vec<CanvasObjectSpec>>>,
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, session_id: &str) -> Result<Vec<CanvasObjectSpec>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, session_id: &str, spec: &CanvasObjectSpec) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let objects = sessions.entry(session_id.to_owned()).or_default();
        match objects.iter_mut().find(|o| o.id == spec.id) {
            Some(existing) => *existing = spec.clone(),
            None => objects.push(spec.clone()),
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str, ids: &[String]) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(objects) = sessions.get_mut(session_id) else {
            return Ok(0);
        };
        let before = objects.len();
        objects.retain(|o| !ids.contains(&o.id));
        Ok(u64::try_from(before - objects.len()).unwrap_or(u64::MAX))
    }

    async fn clear(&self, session_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .sessions
            .write()
            .await
            .remove(session_id)
            .map_or(0, |objects| u64::try_from(objects.len()).unwrap_or(u64::MAX)))
    }
}

#[derive(Default)]
pub struct MemoryOwnership {
    owners: RwLock<HashMap<String, String>>,
}

impl MemoryOwnership {
    pub async fn assign(&self, session_id: &str, owner_id: &str) {
        self.owners
            .write()
            .await
            .insert(session_id.to_owned(), owner_id.to_owned());
    }
}

#[async_trait::async_trait]
impl SessionOwnership for MemoryOwnership {
    async fn owner_of(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.owners.read().await.get(session_id).cloned())
    }
}

// --- postgres ---

pub struct PgObjectStore {
    pool: PgPool,
}

impl PgObjectStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ObjectStore for PgObjectStore {
    async fn list(&self, session_id: &str) -> Result<Vec<CanvasObjectSpec>, StoreError> {
        let rows = sqlx::query_as::<_, (Value,)>(
            "SELECT spec FROM canvas_objects WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(spec,)| serde_json::from_value(spec).map_err(StoreError::from))
            .collect()
    }

    async fn upsert(&self, session_id: &str, spec: &CanvasObjectSpec) -> Result<(), StoreError> {
        let json = serde_json::to_value(spec)?;
        sqlx::query(
            "INSERT INTO canvas_objects (session_id, id, spec) VALUES ($1, $2, $3)
             ON CONFLICT (session_id, id) DO UPDATE SET spec = EXCLUDED.spec, updated_at = now()",
        )
        .bind(session_id)
        .bind(&spec.id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str, ids: &[String]) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM canvas_objects WHERE session_id = $1 AND id = ANY($2)")
            .bind(session_id)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM canvas_objects WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgOwnership {
    pool: PgPool,
}

impl PgOwnership {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionOwnership for PgOwnership {
    async fn owner_of(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query_as::<_, (Option<String>,)>("SELECT owner_id FROM tutor_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(owner,)| owner))
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[derive(Default)]
struct SessionObjects {
    loaded: bool,
    objects: Vec<CanvasObjectSpec>,
}

/// Counts from applying one batch, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

pub struct DurableObjects {
    store: Arc<dyn ObjectStore>,
    ownership: Arc<dyn SessionOwnership>,
    cache: Mutex<HashMap<String, Arc<Mutex<SessionObjects>>>>,
}

impl DurableObjects {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, ownership: Arc<dyn SessionOwnership>) -> Self {
        Self { store, ownership, cache: Mutex::new(HashMap::new()) }
    }

    /// Reject the call unless the session is open or owned by `user_id`.
    ///
    /// # Errors
    ///
    /// `Forbidden` on an ownership mismatch; `Storage` if the lookup fails.
    pub async fn authorize(&self, session_id: &str, user_id: &str) -> Result<(), DurableError> {
        match self.ownership.owner_of(session_id).await? {
            Some(owner) if owner != user_id => {
                warn!(%session_id, %user_id, "durable: ownership check failed");
                Err(DurableError::Forbidden { session_id: session_id.to_owned(), user_id: user_id.to_owned() })
            }
            _ => Ok(()),
        }
    }

    async fn session(&self, session_id: &str) -> Arc<Mutex<SessionObjects>> {
        self.cache
            .lock()
            .await
            .entry(session_id.to_owned())
            .or_default()
            .clone()
    }

    async fn hydrate(&self, session_id: &str, objects: &mut SessionObjects) -> Result<(), DurableError> {
        if !objects.loaded {
            objects.objects = self.store.list(session_id).await?;
            objects.loaded = true;
        }
        Ok(())
    }

    /// Current durable objects of a session.
    ///
    /// # Errors
    ///
    /// `Storage` if hydration from the store fails.
    pub async fn list(&self, session_id: &str) -> Result<Vec<CanvasObjectSpec>, DurableError> {
        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;
        Ok(objects.objects.clone())
    }

    /// Add (or replace) an object on behalf of a user.
    ///
    /// # Errors
    ///
    /// Ownership, validation, or storage failures.
    pub async fn add(&self, session_id: &str, user_id: &str, spec: CanvasObjectSpec) -> Result<CanvasObjectSpec, DurableError> {
        self.authorize(session_id, user_id).await?;
        let spec = prepare_user_object(spec)?;
        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;
        self.store_add(session_id, &mut objects, spec).await
    }

    /// Merge a partial update into an existing object.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, plus ownership/validation/storage.
    pub async fn update(
        &self,
        session_id: &str,
        user_id: &str,
        object_id: &str,
        changes: &Map<String, Value>,
    ) -> Result<CanvasObjectSpec, DurableError> {
        self.authorize(session_id, user_id).await?;
        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;
        self.store_update(session_id, &mut objects, object_id, changes)
            .await
    }

    /// Delete an object. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Ownership or storage failures.
    pub async fn delete(&self, session_id: &str, user_id: &str, object_id: &str) -> Result<bool, DurableError> {
        self.authorize(session_id, user_id).await?;
        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;
        let deleted = self
            .store_delete(session_id, &mut objects, &[object_id.to_owned()])
            .await?;
        Ok(deleted > 0)
    }

    /// Delete every durable object in the session.
    ///
    /// # Errors
    ///
    /// Ownership or storage failures.
    pub async fn clear(&self, session_id: &str, user_id: &str) -> Result<usize, DurableError> {
        self.clear_scope(session_id, user_id, ClearScope::All)
            .await
            .map(|ids| ids.len())
    }

    /// Delete the objects matched by `scope`. Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Ownership or storage failures.
    pub async fn clear_scope(&self, session_id: &str, user_id: &str, scope: ClearScope) -> Result<Vec<String>, DurableError> {
        self.authorize(session_id, user_id).await?;
        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;
        self.store_clear(session_id, &mut objects, scope).await
    }

    /// Apply a batch of actions in order under one ownership check and one
    /// hold of the session lock. The whole batch is validated before the
    /// first write; an update naming an unknown object is skipped.
    ///
    /// # Errors
    ///
    /// Ownership, validation, or storage failures. A storage failure part
    /// way through leaves earlier actions applied.
    pub async fn apply_actions(
        &self,
        session_id: &str,
        user_id: &str,
        actions: &[WhiteboardAction],
    ) -> Result<Applied, DurableError> {
        self.authorize(session_id, user_id).await?;

        let mut prepared = Vec::with_capacity(actions.len());
        for action in actions {
            prepared.push(match action {
                WhiteboardAction::AddObjects { objects } => WhiteboardAction::AddObjects {
                    objects: objects
                        .iter()
                        .cloned()
                        .map(prepare_user_object)
                        .collect::<Result<_, _>>()?,
                },
                other => other.clone(),
            });
        }

        let session = self.session(session_id).await;
        let mut objects = session.lock().await;
        self.hydrate(session_id, &mut objects).await?;

        let mut applied = Applied::default();
        for action in prepared {
            match action {
                WhiteboardAction::AddObjects { objects: specs } => {
                    for spec in specs {
                        self.store_add(session_id, &mut objects, spec).await?;
                        applied.added += 1;
                    }
                }
                WhiteboardAction::UpdateObjects { objects: updates } => {
                    for update in updates {
                        match self
                            .store_update(session_id, &mut objects, &update.object_id, &update.updates)
                            .await
                        {
                            Ok(_) => applied.updated += 1,
                            Err(e @ (DurableError::NotFound(_) | DurableError::InvalidObject(_) | DurableError::EphemeralKind(_))) => {
                                warn!(%session_id, object_id = %update.object_id, error = %e, "durable: update skipped");
                                applied.skipped += 1;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                WhiteboardAction::DeleteObjects { ids } => {
                    let deleted = self.store_delete(session_id, &mut objects, &ids).await?;
                    applied.deleted += usize::try_from(deleted).unwrap_or(usize::MAX);
                }
                WhiteboardAction::ClearCanvas { scope } => {
                    applied.deleted += self.store_clear(session_id, &mut objects, scope).await?.len();
                }
                WhiteboardAction::HighlightObject { .. } => {}
            }
        }

        info!(%session_id, %user_id, added = applied.added, updated = applied.updated, deleted = applied.deleted, skipped = applied.skipped, "durable: batch applied");
        Ok(applied)
    }

    /// Drop the hydration cache for a session. Persisted objects stay.
    pub async fn evict(&self, session_id: &str) {
        self.cache.lock().await.remove(session_id);
    }

    pub async fn is_cached(&self, session_id: &str) -> bool {
        self.cache.lock().await.contains_key(session_id)
    }

    // --- write-through helpers (session lock held, cache hydrated) ---

    async fn store_add(
        &self,
        session_id: &str,
        objects: &mut SessionObjects,
        spec: CanvasObjectSpec,
    ) -> Result<CanvasObjectSpec, DurableError> {
        self.store.upsert(session_id, &spec).await?;
        match objects.objects.iter_mut().find(|o| o.id == spec.id) {
            Some(existing) => *existing = spec.clone(),
            None => objects.objects.push(spec.clone()),
        }
        Ok(spec)
    }

    async fn store_update(
        &self,
        session_id: &str,
        objects: &mut SessionObjects,
        object_id: &str,
        changes: &Map<String, Value>,
    ) -> Result<CanvasObjectSpec, DurableError> {
        let Some(index) = objects.objects.iter().position(|o| o.id == object_id) else {
            return Err(DurableError::NotFound(object_id.to_owned()));
        };
        let mut merged = objects.objects[index].merged(changes)?;
        if merged.kind.is_ephemeral() {
            return Err(DurableError::EphemeralKind(merged.kind));
        }
        // Provenance is server-owned; updates cannot rewrite it.
        merged.metadata.source = objects.objects[index].metadata.source;

        self.store.upsert(session_id, &merged).await?;
        objects.objects[index] = merged.clone();
        Ok(merged)
    }

    async fn store_delete(&self, session_id: &str, objects: &mut SessionObjects, ids: &[String]) -> Result<u64, DurableError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete(session_id, ids).await?;
        objects.objects.retain(|o| !ids.contains(&o.id));
        Ok(deleted)
    }

    async fn store_clear(
        &self,
        session_id: &str,
        objects: &mut SessionObjects,
        scope: ClearScope,
    ) -> Result<Vec<String>, DurableError> {
        if scope == ClearScope::All {
            let ids = objects.objects.iter().map(|o| o.id.clone()).collect();
            self.store.clear(session_id).await?;
            objects.objects.clear();
            return Ok(ids);
        }
        let ids: Vec<String> = objects
            .objects
            .iter()
            .filter(|o| scope.matches(o))
            .map(|o| o.id.clone())
            .collect();
        self.store_delete(session_id, objects, &ids).await?;
        Ok(ids)
    }
}

/// Validate a client-created object and stamp server-owned provenance.
pub fn prepare_user_object(mut spec: CanvasObjectSpec) -> Result<CanvasObjectSpec, DurableError> {
    if spec.id.trim().is_empty() {
        return Err(SpecError::EmptyId.into());
    }
    if spec.kind.is_ephemeral() {
        return Err(DurableError::EphemeralKind(spec.kind));
    }
    spec.metadata.source = ObjectSource::User;
    spec.geometry.normalize();
    Ok(spec)
}

#[cfg(test)]
#[path = "durable_test.rs"]
mod tests;
