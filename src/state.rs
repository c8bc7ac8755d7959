//! Shared activity tracker
//!
//! A process-wide liveness counter the host pipeline injects into endpoints
//! and session groups. It answers one question cheaply from any thread:
//! is there anything alive worth scheduling for?

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters reflecting receiver activity.
///
/// Injected by the host (wrapped in `Arc`), never a singleton. Updates use
/// relaxed ordering; the tracker is advisory, not a synchronization point.
#[derive(Debug, Default)]
pub struct StateTracker {
    /// Live sessions across all groups sharing this tracker
    active_sessions: AtomicUsize,
    /// Packets enqueued but not yet pulled into the pipeline
    pending_packets: AtomicUsize,
    /// Total sessions ever created (monotonic)
    sessions_created: AtomicU64,
    /// Total sessions ever removed (monotonic)
    sessions_removed: AtomicU64,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any session is alive or any packet awaits processing.
    pub fn is_active(&self) -> bool {
        self.active_sessions.load(Ordering::Relaxed) > 0
            || self.pending_packets.load(Ordering::Relaxed) > 0
    }

    /// Number of live sessions.
    pub fn num_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Number of packets queued but not yet pulled.
    pub fn num_pending_packets(&self) -> usize {
        self.pending_packets.load(Ordering::Relaxed)
    }

    /// Total sessions created since construction.
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    /// Total sessions removed since construction.
    pub fn sessions_removed(&self) -> u64 {
        self.sessions_removed.load(Ordering::Relaxed)
    }

    pub(crate) fn register_session(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unregister_session(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.sessions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn register_packet(&self) {
        self.pending_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unregister_packet(&self) {
        self.pending_packets.fetch_sub(1, Ordering::Relaxed);
    }
}
