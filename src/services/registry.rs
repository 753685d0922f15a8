//! Session registry: live connections grouped by session and class.
//!
//! ARCHITECTURE
//! ============
//! One process-wide map from session id to a bucket of connections,
//! partitioned by `ConnectionClass`. Each entry owns the only long-lived
//! `mpsc::Sender` for its connection's outbox. Removing the entry drops
//! that sender, the connection task sees its outbox close, and the socket
//! is shut down. Eviction and client close therefore share one path.
//!
//! DESIGN
//! ======
//! - The registry knows nothing about ephemeral or durable state. `detach`
//!   and `broadcast` report whether they emptied a session so the caller
//!   (`services::session`) can cascade teardown.
//! - Broadcast sends with `try_send` under the read lock; peers whose
//!   outbox is full or closed are evicted afterwards under the write lock.
//!   A slow peer never blocks delivery to the others.

use std::collections::HashMap;

use tokio::sync::{RwLock, RwLockWriteGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::Outbound;

// =============================================================================
// TYPES
// =============================================================================

/// Functional channel a websocket serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionClass {
    Tutor,
    Whiteboard,
    Ephemeral,
}

impl ConnectionClass {
    /// Both canvas classes receive ephemeral-object traffic.
    pub const CANVAS: [Self; 2] = [Self::Whiteboard, Self::Ephemeral];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tutor => "tutor",
            Self::Whiteboard => "whiteboard",
            Self::Ephemeral => "ephemeral",
        }
    }
}

impl std::fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one attached connection. Cheap to clone; holds no
/// reference to the socket or outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub class: ConnectionClass,
}

/// Broadcast targeting. Empty `classes` means every class.
#[derive(Debug, Clone, Default)]
pub struct BroadcastFilter {
    pub classes: Vec<ConnectionClass>,
    pub exclude_user_ids: Vec<String>,
}

impl BroadcastFilter {
    #[must_use]
    pub fn classes(classes: &[ConnectionClass]) -> Self {
        Self { classes: classes.to_vec(), exclude_user_ids: Vec::new() }
    }

    #[must_use]
    pub fn excluding_users(mut self, user_ids: impl IntoIterator<Item = String>) -> Self {
        self.exclude_user_ids.extend(user_ids);
        self
    }

    fn admits(&self, handle: &ConnectionHandle) -> bool {
        (self.classes.is_empty() || self.classes.contains(&handle.class))
            && !self.exclude_user_ids.iter().any(|u| *u == handle.user_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detached {
    /// False when the connection was already gone (double detach).
    pub removed: bool,
    /// True when this detach emptied the session bucket.
    pub session_emptied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionHandle>,
    pub session_emptied: bool,
}

struct Entry {
    handle: ConnectionHandle,
    tx: mpsc::Sender<Outbound>,
    last_activity_ms: i64,
}

#[derive(Default)]
struct SessionBucket {
    classes: HashMap<ConnectionClass, HashMap<Uuid, Entry>>,
}

impl SessionBucket {
    fn is_empty(&self) -> bool {
        self.classes.values().all(HashMap::is_empty)
    }

    fn len(&self) -> usize {
        self.classes.values().map(HashMap::len).sum()
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.classes.values().flat_map(HashMap::values)
    }

    fn entry_mut(&mut self, handle: &ConnectionHandle) -> Option<&mut Entry> {
        self.classes
            .get_mut(&handle.class)
            .and_then(|set| set.get_mut(&handle.id))
    }

    fn remove(&mut self, handle: &ConnectionHandle) -> bool {
        let Some(set) = self.classes.get_mut(&handle.class) else {
            return false;
        };
        let removed = set.remove(&handle.id).is_some();
        if set.is_empty() {
            self.classes.remove(&handle.class);
        }
        removed
    }
}

/// Exclusive hold on the registry for a session with no connections,
/// from `SessionRegistry::vacancy`. Keep it short-lived and free of I/O.
pub struct Vacancy<'a> {
    _sessions: RwLockWriteGuard<'a, HashMap<String, SessionBucket>>,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionBucket>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, creating the session bucket on first use.
    pub async fn attach(
        &self,
        session_id: &str,
        user_id: &str,
        class: ConnectionClass,
        tx: mpsc::Sender<Outbound>,
        now_ms: i64,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            session_id: session_id.to_owned(),
            user_id: user_id.to_owned(),
            class,
        };

        let mut sessions = self.sessions.write().await;
        let bucket = sessions.entry(session_id.to_owned()).or_default();
        bucket
            .classes
            .entry(class)
            .or_default()
            .insert(handle.id, Entry { handle: handle.clone(), tx, last_activity_ms: now_ms });

        info!(%session_id, connection_id = %handle.id, %user_id, %class, peers = bucket.len(), "registry: attached");
        handle
    }

    /// Remove a connection. Idempotent.
    pub async fn detach(&self, handle: &ConnectionHandle) -> Detached {
        let mut sessions = self.sessions.write().await;
        let detached = Self::remove_locked(&mut sessions, handle);
        if detached.removed {
            info!(session_id = %handle.session_id, connection_id = %handle.id, class = %handle.class, emptied = detached.session_emptied, "registry: detached");
        }
        detached
    }

    fn remove_locked(sessions: &mut HashMap<String, SessionBucket>, handle: &ConnectionHandle) -> Detached {
        let Some(bucket) = sessions.get_mut(&handle.session_id) else {
            return Detached::default();
        };
        let removed = bucket.remove(handle);
        let session_emptied = removed && bucket.is_empty();
        if bucket.is_empty() {
            sessions.remove(&handle.session_id);
        }
        Detached { removed, session_emptied }
    }

    /// Deliver `message` to every connection in the session that passes
    /// `filter`, except `origin`. Peers that cannot accept the message are
    /// evicted; delivery to the rest continues.
    pub async fn broadcast(
        &self,
        session_id: &str,
        message: &Outbound,
        origin: Option<Uuid>,
        filter: &BroadcastFilter,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        {
            let sessions = self.sessions.read().await;
            let Some(bucket) = sessions.get(session_id) else {
                return report;
            };

            for entry in bucket.entries() {
                if Some(entry.handle.id) == origin || !filter.admits(&entry.handle) {
                    continue;
                }
                match entry.tx.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(%session_id, connection_id = %entry.handle.id, error = %e, "registry: peer send failed; evicting");
                        failed.push(entry.handle.clone());
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for handle in failed {
                let detached = Self::remove_locked(&mut sessions, &handle);
                report.session_emptied |= detached.session_emptied;
                if detached.removed {
                    report.evicted.push(handle);
                }
            }
        }

        debug!(%session_id, delivered = report.delivered, evicted = report.evicted.len(), "registry: broadcast");
        report
    }

    /// Refresh a connection's activity timestamp.
    pub async fn touch(&self, handle: &ConnectionHandle, now_ms: i64) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions
            .get_mut(&handle.session_id)
            .and_then(|bucket| bucket.entry_mut(handle))
        {
            entry.last_activity_ms = entry.last_activity_ms.max(now_ms);
        }
    }

    /// Every attached connection with its last activity timestamp.
    pub async fn activity(&self) -> Vec<(ConnectionHandle, i64)> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .flat_map(SessionBucket::entries)
            .map(|entry| (entry.handle.clone(), entry.last_activity_ms))
            .collect()
    }

    /// Claim a session that has no connections. While the returned guard
    /// is alive no connection can attach anywhere, so session-scoped state
    /// can be released without losing a racing joiner's writes. `None` if
    /// the session still has connections.
    pub async fn vacancy(&self, session_id: &str) -> Option<Vacancy<'_>> {
        let sessions = self.sessions.write().await;
        if sessions.get(session_id).is_none_or(SessionBucket::is_empty) {
            Some(Vacancy { _sessions: sessions })
        } else {
            None
        }
    }

    pub async fn is_empty(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).is_none_or(SessionBucket::is_empty)
    }

    pub async fn contains_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn connection_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map_or(0, SessionBucket::len)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
