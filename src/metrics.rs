//! Hit/miss counters for monitoring cache health
//!
//! Process-lifetime state: initialized when the cache is built, reset via
//! an explicit operation, never persisted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomically-updated hit/miss counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    /// Create a zeroed counter pair
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in [0.0, 1.0]; 0.0 before any traffic
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Zero both counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Capture a point-in-time view, combined with the backend's entry count
    pub fn snapshot(&self, entry_count: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            entry_count,
        }
    }
}

/// Point-in-time view of cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Number of cache hits since start or last reset
    pub hits: u64,
    /// Number of cache misses since start or last reset
    pub misses: u64,
    /// Hit rate in [0.0, 1.0]
    pub hit_rate: f64,
    /// Live entries in the local backend (0 when the primary is remote)
    pub entry_count: u64,
}
