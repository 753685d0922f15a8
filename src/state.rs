//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to the background tasks. Every collaborator is behind an `Arc`
//! (trait objects where a storage backend or external service is
//! involved), so Postgres-backed and in-memory deployments share all of
//! the protocol code and tests can swap in fakes.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::llm::LlmStream;
use crate::services::auth::Authenticator;
use crate::services::durable::{
    DurableObjects, MemoryObjectStore, MemoryOwnership, ObjectStore, PgObjectStore, PgOwnership, SessionOwnership,
};
use crate::services::ephemeral::EphemeralStore;
use crate::services::registry::SessionRegistry;
use crate::services::snapshot::{MemorySnapshotStore, PgSnapshotStore, SnapshotLog, SnapshotStore};
use crate::services::transcript::{MemoryTranscriptStore, PgTranscriptStore, TranscriptStore};

// =============================================================================
// BACKENDS
// =============================================================================

/// Storage collaborators, chosen once at startup.
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub ownership: Arc<dyn SessionOwnership>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub transcripts: Arc<dyn TranscriptStore>,
}

impl Backends {
    /// Process-local stores; state is lost on restart.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            objects: Arc::new(MemoryObjectStore::default()),
            ownership: Arc::new(MemoryOwnership::default()),
            snapshots: Arc::new(MemorySnapshotStore::default()),
            transcripts: Arc::new(MemoryTranscriptStore::default()),
        }
    }

    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            objects: Arc::new(PgObjectStore::new(pool.clone())),
            ownership: Arc::new(PgOwnership::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotStore::new(pool.clone())),
            transcripts: Arc::new(PgTranscriptStore::new(pool.clone())),
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; all inner fields
/// are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<Authenticator>,
    pub registry: Arc<SessionRegistry>,
    pub ephemeral: Arc<EphemeralStore>,
    pub durable: Arc<DurableObjects>,
    pub snapshots: Arc<SnapshotLog>,
    pub transcripts: Arc<dyn TranscriptStore>,
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmStream>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, auth: Authenticator, backends: Backends, llm: Option<Arc<dyn LlmStream>>) -> Self {
        let snapshots = SnapshotLog::new(backends.snapshots, config.snapshot_page_limit_max);
        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            registry: Arc::new(SessionRegistry::new()),
            ephemeral: Arc::new(EphemeralStore::new()),
            durable: Arc::new(DurableObjects::new(backends.objects, backends.ownership)),
            snapshots: Arc::new(snapshots),
            transcripts: backends.transcripts,
            llm,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
