#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Optional scheduler counters, accumulated since pool construction.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Thief -> active -> thief round trips performed.
    pub round_trips: AtomicU64,
    /// Successful steals from peer deques.
    pub steal_hits: AtomicU64,
    /// Full stealing passes that came up empty.
    pub steal_misses: AtomicU64,
    /// Times a worker parked in the notifier.
    pub parks: AtomicU64,
    /// Times a parked worker was woken.
    pub wakeups: AtomicU64,
    /// Batches submitted to worker inboxes.
    pub submissions: AtomicU64,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub(crate) fn new() -> Self {
        Metrics {
            round_trips: AtomicU64::new(0),
            steal_hits: AtomicU64::new(0),
            steal_misses: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        }
    }

    /// Returns a snapshot of the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            round_trips: self.round_trips.load(Ordering::Relaxed),
            steal_hits: self.steal_hits.load(Ordering::Relaxed),
            steal_misses: self.steal_misses.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of scheduler counters at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub round_trips: u64,
    pub steal_hits: u64,
    pub steal_misses: u64,
    pub parks: u64,
    pub wakeups: u64,
    pub submissions: u64,
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let metrics = Metrics::new();
        metrics.round_trips.fetch_add(3, Ordering::Relaxed);
        metrics.parks.fetch_add(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.round_trips, 3);
        assert_eq!(snapshot.parks, 2);
        assert_eq!(snapshot.steal_hits, 0);
    }
}
