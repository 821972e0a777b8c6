//! Shared coordination state for the worker pool.
//!
//! Workers are always in one of three states: searching for work (a
//! "thief"), executing work ("active"), or parked in the notifier (a
//! "sleeper"). The thief and active counts live in one 64-bit word (low 32
//! bits thieves, high 32 bits actives) so every state transition is a single
//! read-modify-write; the sleeper count is implicit (`S = N - T - A`).
//!
//! The invariant everything here protects:
//!
//! > if any worker is active, then at least one thief exists OR no worker
//! > is asleep.
//!
//! A violation loses work: something could be pushed onto an active worker's
//! deque while every other worker is parked and nobody ever looks. Promoting
//! a sleeper to thief always restores the invariant: if sleepers exist, the
//! promotion makes `T > 0`; if none exist, it already held.

use crate::notifier::Notifier;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

const THIEF_ONE: u64 = 1;
const ACTIVE_ONE: u64 = THIEF_ONE << 32;
const THIEF_MASK: u64 = ACTIVE_ONE - 1;

/// Coordination state shared by the pool and every worker.
pub(crate) struct Coordinator {
    counts: CachePadded<AtomicU64>,
    stop: CachePadded<AtomicBool>,
    pub(crate) notifier: CachePadded<Notifier>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: crate::metrics::Metrics,
}

impl Coordinator {
    pub(crate) fn new() -> Self {
        Coordinator {
            counts: CachePadded::new(AtomicU64::new(0)),
            stop: CachePadded::new(AtomicBool::new(false)),
            notifier: CachePadded::new(Notifier::new()),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        }
    }

    /// Registers the calling worker as a thief.
    ///
    /// Taken on entry to the main loop and on every wake-up, symmetric with
    /// the decrement in [`Coordinator::try_sleep`].
    pub(crate) fn enter_thieving(&self) {
        self.counts.fetch_add(THIEF_ONE, Ordering::Release);
    }

    /// Runs `work` with the caller promoted from thief to active.
    ///
    /// The promotion (`T -= 1, A += 1`) is one atomic add, so no observer
    /// ever sees a transient word that breaks the invariant. If the caller
    /// was the last thief, one sleeper is woken so somebody keeps searching
    /// while this worker is busy. The inverse subtraction afterwards returns
    /// the caller to thieving; the net effect is thief -> active -> thief.
    pub(crate) fn thief_round_trip(&self, work: impl FnOnce()) {
        let prev = self.counts.fetch_add(ACTIVE_ONE - THIEF_ONE, Ordering::AcqRel);

        if prev & THIEF_MASK == 1 {
            trace!("last thief went active, waking a sleeper");
            self.notifier.notify_one();
        }

        #[cfg(feature = "metrics")]
        self.metrics
            .round_trips
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        work();

        self.counts.fetch_sub(ACTIVE_ONE - THIEF_ONE, Ordering::AcqRel);
    }

    /// Attempts the thief -> sleeper transition.
    ///
    /// Returns `false` when the caller was the last thief while active
    /// workers exist: parking then would break the invariant, so the caller
    /// must immediately re-register as a thief instead of sleeping. The
    /// decrement has already happened in that case; re-entering thieving is
    /// exactly the compensation.
    pub(crate) fn try_sleep(&self) -> bool {
        let prev = self.counts.fetch_sub(THIEF_ONE, Ordering::AcqRel);
        let was_last_thief = prev & THIEF_MASK == 1;
        let any_active = prev >> 32 != 0;
        !(was_last_thief && any_active)
    }

    /// A coherent snapshot of `(thieves, actives)` from one load.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let word = self.counts.load(Ordering::Acquire);
        ((word & THIEF_MASK) as usize, (word >> 32) as usize)
    }

    /// Asks every worker to exit and wakes the sleepers so they notice.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.notifier.notify_all();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}
