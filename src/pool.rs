//! The job pool facade.
//!
//! Owns the shared coordination state, one context per worker, and the
//! worker threads. Producers hand work to [`JobPool::schedule`]; dropping
//! the pool performs a quiescent shutdown.

use crate::coordinator::Coordinator;
use crate::job::{Batch, Job};
use crate::topology::{Placement, Topology};
use crate::worker::{Worker, WorkerCore, WorkerRemote};
use crossbeam::deque::{Stealer, Worker as Deque};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use std::io;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

/// Pool construction failure.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A worker thread could not be spawned. Workers spawned before the
    /// failure have already been shut down and joined.
    #[error("failed to spawn worker thread")]
    Spawn(#[from] io::Error),
}

/// A sleep-capable work-stealing pool of fiber workers.
///
/// Workers search for work, execute it, and park when the whole system is
/// quiescent, so an idle pool costs no CPU. Dropping the pool stops and
/// joins every worker.
pub struct JobPool {
    remotes: Vec<Arc<WorkerRemote>>,
    coordinator: Arc<Coordinator>,
    workers: Vec<Worker>,
}

impl JobPool {
    /// Creates a pool with `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero or a worker thread cannot be spawned;
    /// use [`JobPool::try_new`] to handle spawn failure.
    pub fn new(threads: usize) -> Self {
        JobPool::try_new(threads).expect("failed to spawn worker threads")
    }

    /// Creates a pool with one worker per hardware thread.
    pub fn with_default_threads() -> Self {
        let threads = thread::available_parallelism()
            .map(|threads| threads.get())
            .unwrap_or(4);
        JobPool::new(threads)
    }

    /// Creates a pool with `threads` workers, propagating spawn failure.
    ///
    /// On failure, workers spawned before the failing one are stopped and
    /// joined before the error is returned.
    pub fn try_new(threads: usize) -> Result<Self, PoolError> {
        assert!(threads > 0, "a pool needs at least one worker");

        let coordinator = Arc::new(Coordinator::new());
        let mut master = SmallRng::from_entropy();

        let mut deques = Vec::with_capacity(threads);
        let mut stealers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let deque = Deque::new_lifo();
            stealers.push(deque.stealer());
            deques.push(deque);
        }

        let remotes: Vec<Arc<WorkerRemote>> = (0..threads)
            .map(|id| Arc::new(WorkerRemote::new(id, Arc::clone(&coordinator))))
            .collect();

        let topology = Topology::detect();
        let placements = topology.placements(threads);
        debug!(
            workers = threads,
            nodes = topology.num_nodes,
            "starting pool"
        );

        let mut pool = JobPool {
            remotes,
            coordinator,
            workers: Vec::with_capacity(threads),
        };

        for (id, deque) in deques.into_iter().enumerate() {
            let groups = steal_groups(id, &placements, &stealers);
            // Each worker gets an independent stream seeded from the master
            // generator, so victim selection decorrelates across workers.
            let rng = SmallRng::seed_from_u64(master.next_u64());
            let core = WorkerCore::new(Arc::clone(&pool.remotes[id]), deque, groups, rng);

            match Worker::spawn(core, placements[id].core) {
                Ok(worker) => pool.workers.push(worker),
                Err(err) => {
                    pool.clean_up();
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        Ok(pool)
    }

    /// Schedules a batch of jobs for execution.
    ///
    /// The batch lands on a uniformly random worker's inbox; the submit
    /// wakes every parked worker so at least one starts searching.
    pub fn schedule(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        let target = rand::thread_rng().gen_range(0..self.remotes.len());
        self.remotes[target].submit(batch);
    }

    /// The number of worker threads.
    pub fn size(&self) -> usize {
        self.remotes.len()
    }

    /// A coherent `(searching, active)` snapshot from one atomic load.
    pub fn worker_counts(&self) -> (usize, usize) {
        self.coordinator.counts()
    }

    /// Workers currently searching for work.
    pub fn searching_count(&self) -> usize {
        self.worker_counts().0
    }

    /// Workers currently executing a job.
    pub fn active_count(&self) -> usize {
        self.worker_counts().1
    }

    /// Workers currently parked. Meaningful only before shutdown begins.
    pub fn sleeping_count(&self) -> usize {
        let (searching, active) = self.worker_counts();
        self.size().saturating_sub(searching + active)
    }

    /// Scheduler counters accumulated since construction.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.coordinator.metrics.snapshot()
    }

    /// Stops the pool and reports how many workers panicked, if any.
    ///
    /// Parked workers wake, observe the stop, and exit; a worker that is
    /// mid-job finishes it first.
    pub fn shutdown(mut self) -> Result<(), usize> {
        let failed = self.clean_up();
        if failed == 0 {
            Ok(())
        } else {
            Err(failed)
        }
    }

    /// Sets the stop flag, wakes everyone, joins every worker. Returns the
    /// number of workers that panicked.
    fn clean_up(&mut self) -> usize {
        if self.workers.is_empty() {
            return 0;
        }
        debug!("requesting stop");
        self.coordinator.request_stop();

        let mut failed = 0;
        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                failed += 1;
                error!(worker = id, "worker panicked");
            }
        }
        failed
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.clean_up();
    }
}

/// Builds one worker's steal targets: peers on the same node first, then
/// everyone else; a thief probes the groups in that order.
fn steal_groups(
    id: usize,
    placements: &[Placement],
    stealers: &[Stealer<Job>],
) -> Vec<Vec<Stealer<Job>>> {
    let mut near = Vec::new();
    let mut far = Vec::new();

    for (peer, stealer) in stealers.iter().enumerate() {
        if peer == id {
            continue;
        }
        if placements[peer].node == placements[id].node {
            near.push(stealer.clone());
        } else {
            far.push(stealer.clone());
        }
    }

    let mut groups = Vec::new();
    if !near.is_empty() {
        groups.push(near);
    }
    if !far.is_empty() {
        groups.push(far);
    }
    groups
}
