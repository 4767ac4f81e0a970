//! Upgraded relay lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique relay IDs for tracing
//! - Count relays that outlive their HTTP exchange (websocket upgrades)
//! - Broadcast a close signal so shutdown tears every relay down

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::observability::metrics;

/// Only uniqueness is needed, so relaxed ordering suffices.
static RELAY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an upgraded relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayId(u64);

impl RelayId {
    /// Generate a new unique relay ID.
    pub fn new() -> Self {
        Self(RELAY_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for RelayId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "relay-{}", self.0)
    }
}

/// Tracks active relays for observability and shutdown.
#[derive(Debug, Clone)]
pub struct RelayTracker {
    active_count: Arc<AtomicU64>,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

impl RelayTracker {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            close_tx: Arc::new(tx),
            close_rx: rx,
        }
    }

    /// Record a new relay. The guard decrements the count on drop.
    pub fn track(&self) -> RelayGuard {
        let now = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_relays(now);
        RelayGuard {
            active_count: Arc::clone(&self.active_count),
            id: RelayId::new(),
        }
    }

    /// Current number of live relays.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` once `close_all` is called.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_rx.clone()
    }

    /// Ask every relay to terminate.
    pub fn close_all(&self) {
        let _ = self.close_tx.send(true);
    }

    /// Wait until every relay has ended, or `limit` elapses. Returns true if drained.
    pub async fn wait_for_drain(&self, limit: Duration) -> bool {
        let drained = async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }
}

impl Default for RelayTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard tied to one relay's lifetime.
#[derive(Debug)]
pub struct RelayGuard {
    active_count: Arc<AtomicU64>,
    id: RelayId,
}

impl RelayGuard {
    pub fn id(&self) -> RelayId {
        self.id
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let now = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_relays(now);
        tracing::trace!(relay_id = %self.id, "Relay closed");
    }
}
