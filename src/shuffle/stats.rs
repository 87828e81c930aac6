//! Shuffle counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the shuffling scheduler
#[derive(Debug, Default)]
pub struct ShuffleStats {
    /// Timer firings that did work
    pub rounds: AtomicU64,
    /// Successful reassignments
    pub shuffles: AtomicU64,
    /// Draws rejected by the table because another host took the address
    pub collisions: AtomicU64,
    /// Draws that found the pool exhausted
    pub exhausted: AtomicU64,
    /// Host shuffles abandoned for the cycle after the retry budget
    pub skipped: AtomicU64,
}

impl ShuffleStats {
    /// Create new stats
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current stats
    #[must_use]
    pub fn snapshot(&self) -> ShuffleStatsSnapshot {
        ShuffleStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            shuffles: self.shuffles.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of shuffle statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShuffleStatsSnapshot {
    /// Timer rounds
    pub rounds: u64,
    /// Reassignments
    pub shuffles: u64,
    /// Collisions
    pub collisions: u64,
    /// Exhausted draws
    pub exhausted: u64,
    /// Skipped host shuffles
    pub skipped: u64,
}
