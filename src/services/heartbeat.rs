//! Heartbeat / liveness monitor.
//!
//! DESIGN
//! ======
//! Every inbound message refreshes a connection's activity timestamp in the
//! registry. A periodic task classifies connections against the heartbeat
//! interval and the staleness threshold and evicts the stale ones through
//! the same detach path a client close takes. Dropping the registry's
//! outbox sender is what makes the connection task close its socket.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::frame::now_ms;
use crate::services::registry::ConnectionHandle;
use crate::services::session;
use crate::state::AppState;

/// Where a connection sits between its last message and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    /// Silent for at least one heartbeat interval; still attached.
    Idle,
    /// Silent for the staleness threshold; due for eviction.
    Stale,
}

impl Liveness {
    #[must_use]
    pub fn classify(last_activity_ms: i64, now_ms: i64, idle_after: Duration, stale_after: Duration) -> Self {
        let silent = now_ms.saturating_sub(last_activity_ms);
        if silent >= duration_ms(stale_after) {
            Self::Stale
        } else if silent >= duration_ms(idle_after) {
            Self::Idle
        } else {
            Self::Active
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Classify every connection and evict the stale ones. Returns the
/// handles that were removed.
pub async fn sweep_stale(state: &AppState, now_ms: i64) -> Vec<ConnectionHandle> {
    let idle_after = state.config.heartbeat_interval;
    let stale_after = state.config.stale_after;

    let mut idle = 0usize;
    let mut stale = Vec::new();
    for (handle, last_activity_ms) in state.registry.activity().await {
        match Liveness::classify(last_activity_ms, now_ms, idle_after, stale_after) {
            Liveness::Active => {}
            Liveness::Idle => idle += 1,
            Liveness::Stale => stale.push(handle),
        }
    }

    let mut evicted = Vec::with_capacity(stale.len());
    for handle in stale {
        let detached = session::detach(state, &handle).await;
        if detached.removed {
            info!(session_id = %handle.session_id, connection_id = %handle.id, user_id = %handle.user_id, class = %handle.class, "heartbeat: evicted stale connection");
            evicted.push(handle);
        }
    }
    debug!(idle, evicted = evicted.len(), "heartbeat: sweep");
    evicted
}

/// Spawn the periodic staleness sweep.
pub fn spawn_heartbeat_task(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = state.config.heartbeat_interval.max(Duration::from_millis(10));
    info!(interval_ms = duration_ms(period), stale_ms = duration_ms(state.config.stale_after), "heartbeat monitor configured");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let swept = tokio::spawn(sweep_tick(state.clone())).await;
            if let Err(e) = swept {
                warn!(error = %e, "heartbeat: sweep task failed");
            }
        }
    })
}

async fn sweep_tick(state: AppState) {
    sweep_stale(&state, now_ms()).await;
}
