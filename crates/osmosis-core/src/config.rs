use std::time::Duration;

/// Runtime knobs read by the store and sync session. Osmosis does not load
/// these from a file or environment itself — config *loading* is the
/// embedding application's job (out of scope, per the top-level spec).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of ops to always keep regardless of `max_history`.
    pub min_history: u32,
    /// Once `ops.len() - min_history` exceeds this, a compaction pass drops
    /// ops older than the oldest save point still needed. `u32::MAX`
    /// (the default) disables compaction entirely.
    pub max_history: u32,
    pub session: SessionTimeouts,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            min_history: 64,
            max_history: u32::MAX,
            session: SessionTimeouts::default(),
        }
    }
}

/// The five timeouts that bound every suspension point in a sync session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub state_summary: Duration,
    pub applied_ops: Duration,
    pub echoed_summary: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        SessionTimeouts {
            state_summary: Duration::from_secs(3),
            applied_ops: Duration::from_secs(60),
            echoed_summary: Duration::from_secs(10),
        }
    }
}

/// Minimum number of new ops required before a save point is considered,
/// per spec.md §3/§4.5.
pub const MIN_SAVE_POINT_SIZE: usize = 4;

/// Base backoff for retrying a `liveUpdate` that failed with
/// `BUSY_WITH_SESSION_UPDATE`; doubles on every retry with no built-in cap.
pub const LIVE_UPDATE_BACKOFF_BASE: Duration = Duration::from_millis(500);
