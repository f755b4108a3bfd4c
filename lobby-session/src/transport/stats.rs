//! Counters of transport role and scene activity

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Snapshot of transport activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStats {
    /// Successful host starts
    pub host_starts: u64,
    /// Successful client starts
    pub client_starts: u64,
    /// Scene changes issued as host
    pub scene_changes: u64,
    /// Time since the tracker was created or reset
    pub uptime: Duration,
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "host starts: {}, client starts: {}, scene changes: {} ({:.1}s)",
            self.host_starts,
            self.client_starts,
            self.scene_changes,
            self.uptime.as_secs_f64()
        )
    }
}

/// Thread-safe transport counters
///
/// Uses atomic operations for lock-free concurrent updates
#[derive(Debug, Clone)]
pub struct StatsTracker {
    host_starts: Arc<AtomicU64>,
    client_starts: Arc<AtomicU64>,
    scene_changes: Arc<AtomicU64>,
    start_time: Instant,
}

impl StatsTracker {
    /// Create a new StatsTracker
    pub fn new() -> Self {
        Self {
            host_starts: Arc::new(AtomicU64::new(0)),
            client_starts: Arc::new(AtomicU64::new(0)),
            scene_changes: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Count a host start
    pub fn host_started(&self) {
        self.host_starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a client start
    pub fn client_started(&self) {
        self.client_starts.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a scene change
    pub fn scene_changed(&self) {
        self.scene_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn get_stats(&self) -> TransportStats {
        TransportStats {
            host_starts: self.host_starts.load(Ordering::Relaxed),
            client_starts: self.client_starts.load(Ordering::Relaxed),
            scene_changes: self.scene_changes.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }

    /// Reset counters
    pub fn reset(&self) {
        self.host_starts.store(0, Ordering::Relaxed);
        self.client_starts.store(0, Ordering::Relaxed);
        self.scene_changes.store(0, Ordering::Relaxed);
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
