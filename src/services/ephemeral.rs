//! Ephemeral object store and garbage collector.
//!
//! ARCHITECTURE
//! ============
//! `EphemeralStore` is a per-session map from object id to a time-boxed
//! annotation. It never touches the action log. The functions below it
//! pair each mutation with its broadcast, and `spawn_gc_task` runs the
//! periodic sweep that reclaims expired entries even when no client asks.
//!
//! DESIGN
//! ======
//! - All time-dependent operations take an explicit `now_ms`.
//! - `list_valid` evicts expired entries it encounters, so a joining
//!   client never hydrates stale visuals between sweeps.
//! - The sweep collects expired ids per session under the lock, then
//!   broadcasts outside it. One session's broadcast failing cannot stop
//!   the others from being notified.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::canvas::{CanvasObjectSpec, EphemeralObject, SpecError};
use crate::frame::{ServerMessage, now_ms};
use crate::services::registry::{BroadcastFilter, ConnectionClass, ConnectionHandle};
use crate::services::session;
use crate::state::AppState;

// =============================================================================
// STORE
// =============================================================================

#[derive(Default)]
pub struct EphemeralStore {
    sessions: RwLock<HashMap<String, HashMap<String, EphemeralObject>>>,
}

impl EphemeralStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by id.
    pub async fn insert(&self, session_id: &str, object: EphemeralObject) {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_owned())
            .or_default()
            .insert(object.id().to_owned(), object);
    }

    /// Delete by id. Returns whether the id existed.
    pub async fn remove(&self, session_id: &str, object_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(objects) = sessions.get_mut(session_id) else {
            return false;
        };
        let removed = objects.remove(object_id).is_some();
        if objects.is_empty() {
            sessions.remove(session_id);
        }
        removed
    }

    /// Non-expired objects for a session, ordered by id. Expired entries
    /// found along the way are dropped.
    pub async fn list_valid(&self, session_id: &str, now_ms: i64) -> Vec<EphemeralObject> {
        let mut sessions = self.sessions.write().await;
        let Some(objects) = sessions.get_mut(session_id) else {
            return Vec::new();
        };
        objects.retain(|_, object| !object.is_expired(now_ms));

        let mut valid: Vec<EphemeralObject> = objects.values().cloned().collect();
        if objects.is_empty() {
            sessions.remove(session_id);
        }
        valid.sort_by(|a, b| a.id().cmp(b.id()));
        valid
    }

    /// Remove every expired entry across all sessions. Returns the expired
    /// ids grouped by session, each group sorted.
    pub async fn sweep(&self, now_ms: i64) -> Vec<(String, Vec<String>)> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();

        for (session_id, objects) in sessions.iter_mut() {
            let mut ids: Vec<String> = objects
                .values()
                .filter(|object| object.is_expired(now_ms))
                .map(|object| object.id().to_owned())
                .collect();
            if ids.is_empty() {
                continue;
            }
            for id in &ids {
                objects.remove(id);
            }
            ids.sort();
            expired.push((session_id.clone(), ids));
        }

        sessions.retain(|_, objects| !objects.is_empty());
        expired
    }

    /// Drop a session's whole map. Returns how many objects were held.
    pub async fn purge_session(&self, session_id: &str) -> usize {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map_or(0, |objects| objects.len())
    }

    pub async fn len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, HashMap::len)
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Stamp, store, and announce an ephemeral object. The author is excluded
/// from the broadcast; it already renders the object locally.
///
/// # Errors
///
/// Returns a `SpecError` if the object is not an ephemeral kind or has a
/// blank id.
pub async fn add(
    state: &AppState,
    author: &ConnectionHandle,
    spec: CanvasObjectSpec,
    now_ms: i64,
) -> Result<EphemeralObject, SpecError> {
    let object = EphemeralObject::stamp(spec, &author.user_id, now_ms)?;
    state
        .ephemeral
        .insert(&author.session_id, object.clone())
        .await;

    let delivered = session::broadcast(
        state,
        &author.session_id,
        &ServerMessage::EphemeralObjectAdded { object: object.clone() },
        Some(author.id),
        &BroadcastFilter::classes(&ConnectionClass::CANVAS),
    )
    .await;
    debug!(session_id = %author.session_id, object_id = object.id(), kind = ?object.spec().kind, delivered, "ephemeral: added");
    Ok(object)
}

/// Remove an ephemeral object, announcing it only if it existed.
pub async fn remove(state: &AppState, author: &ConnectionHandle, object_id: &str) -> bool {
    if !state.ephemeral.remove(&author.session_id, object_id).await {
        debug!(session_id = %author.session_id, %object_id, "ephemeral: remove of unknown id ignored");
        return false;
    }
    session::broadcast(
        state,
        &author.session_id,
        &ServerMessage::EphemeralObjectRemoved { object_id: object_id.to_owned() },
        Some(author.id),
        &BroadcastFilter::classes(&ConnectionClass::CANVAS),
    )
    .await;
    true
}

/// Run one GC pass and notify each affected session with a single batched
/// `EPHEMERAL_OBJECTS_EXPIRED`. Returns the total number of expired objects.
pub async fn sweep_and_notify(state: &AppState, now_ms: i64) -> usize {
    let expired = state.ephemeral.sweep(now_ms).await;
    let mut total = 0;

    for (session_id, expired_ids) in expired {
        total += expired_ids.len();
        let delivered = session::broadcast(
            state,
            &session_id,
            &ServerMessage::EphemeralObjectsExpired { expired_ids },
            None,
            &BroadcastFilter::classes(&ConnectionClass::CANVAS),
        )
        .await;
        debug!(%session_id, delivered, "ephemeral: expiry notified");
    }

    if total > 0 {
        info!(expired = total, "ephemeral: gc sweep");
    }
    total
}

// =============================================================================
// GC TASK
// =============================================================================

/// Spawn the periodic sweep.
pub fn spawn_gc_task(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = state.config.gc_interval.max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let swept = tokio::spawn(sweep_tick(state.clone())).await;
            if let Err(e) = swept {
                warn!(error = %e, "ephemeral: gc sweep task failed");
            }
        }
    })
}

async fn sweep_tick(state: AppState) {
    sweep_and_notify(&state, now_ms()).await;
}

#[cfg(test)]
#[path = "ephemeral_test.rs"]
mod tests;
