use std::sync::atomic::{AtomicU64, Ordering};

/// Per-lane statistics counters.
///
/// Relaxed ordering throughout: the counters are purely statistical, no
/// control flow depends on them, and eventual visibility is enough.
#[derive(Debug)]
pub struct Metrics {
    offered: AtomicU64,
    polled: AtomicU64,
    rejected_full: AtomicU64,
    lost_races: AtomicU64,
}

impl Metrics {
    /// Creates a metrics counter set, all zeroed.
    pub fn new() -> Self {
        Self {
            offered: AtomicU64::new(0),
            polled: AtomicU64::new(0),
            rejected_full: AtomicU64::new(0),
            lost_races: AtomicU64::new(0),
        }
    }

    /// Count elements enqueued.
    #[inline]
    pub fn add_offered(&self, n: u64) {
        self.offered.fetch_add(n, Ordering::Relaxed);
    }

    /// Count elements dequeued.
    #[inline]
    pub fn add_polled(&self, n: u64) {
        self.polled.fetch_add(n, Ordering::Relaxed);
    }

    /// Count offers refused because the lane was full.
    #[inline]
    pub fn add_rejected_full(&self, n: u64) {
        self.rejected_full.fetch_add(n, Ordering::Relaxed);
    }

    /// Count fail-fast offers that lost the claim race.
    #[inline]
    pub fn add_lost_races(&self, n: u64) {
        self.lost_races.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            offered: self.offered.load(Ordering::Relaxed),
            polled: self.polled.load(Ordering::Relaxed),
            rejected_full: self.rejected_full.load(Ordering::Relaxed),
            lost_races: self.lost_races.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of [`Metrics`], plain data for aggregation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    /// Elements enqueued.
    pub offered: u64,
    /// Elements dequeued.
    pub polled: u64,
    /// Offers refused because the lane was full.
    pub rejected_full: u64,
    /// Fail-fast offers that lost the claim race to another producer.
    pub lost_races: u64,
}
