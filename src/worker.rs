//! Worker threads and the wake -> thieve -> park state machine.
//!
//! Each worker owns the mutable half of its state exclusively: the owner end
//! of its deque, its RNG, and the consumer end of its inbox. Peers interact
//! only through the shared [`WorkerRemote`] (submissions) and cloned deque
//! stealers. The main loop keeps the pool-wide invariant (an active worker
//! implies a searching worker or no sleepers) by routing every state change
//! through the [`Coordinator`].

use crate::coordinator::Coordinator;
use crate::fiber::{self, Fiber, FiberHandle, FiberInput, FiberState};
use crate::job::{Batch, Job, Work};
use crate::queue::SubmissionQueue;
use core_affinity::CoreId;
use crossbeam::deque::{Steal, Stealer, Worker as Deque};
use rand::rngs::SmallRng;
use rand::Rng;
use std::cell::RefCell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, trace};

/// Misuse of the per-thread worker state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    /// `worker_init` was called on a thread that is already a worker.
    #[error("worker state is already initialized on this thread")]
    AlreadyInitialized,
    /// `worker_finalize` was called without a prior `worker_init`, or twice.
    #[error("worker state is not initialized on this thread")]
    NotInitialized,
    /// `worker_finalize` was called with a context bound to another thread.
    #[error("finalize called with a context that does not belong to this thread")]
    ForeignContext,
}

/// The shared half of a worker: what producers and peers may touch.
pub struct WorkerRemote {
    id: usize,
    inbox: SubmissionQueue,
    pub(crate) coordinator: Arc<Coordinator>,
}

impl WorkerRemote {
    pub(crate) fn new(id: usize, coordinator: Arc<Coordinator>) -> Self {
        WorkerRemote {
            id,
            inbox: SubmissionQueue::new(),
            coordinator,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Hands a batch to this worker and wakes every sleeper.
    ///
    /// Submissions are deliberately noisy: a producer cannot cheaply tell
    /// which worker would be the best target, so all parked workers are
    /// woken and at least one becomes a thief and finds the work.
    pub fn submit(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        #[cfg(feature = "metrics")]
        self.coordinator
            .metrics
            .submissions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        self.inbox.submit(batch);
        self.coordinator.notifier.notify_all();
    }
}

/// The thread-owned half of a worker.
///
/// Pinned to exactly one worker thread for that thread's lifetime via
/// [`worker_init`] / [`worker_finalize`]. All methods take `&self`; the
/// exclusivity is per-thread, not per-reference.
pub struct WorkerCore {
    pub(crate) remote: Arc<WorkerRemote>,
    deque: Deque<Job>,
    steal_groups: Vec<Vec<Stealer<Job>>>,
    rng: RefCell<SmallRng>,
}

impl WorkerCore {
    pub(crate) fn new(
        remote: Arc<WorkerRemote>,
        deque: Deque<Job>,
        steal_groups: Vec<Vec<Stealer<Job>>>,
        rng: SmallRng,
    ) -> Self {
        WorkerCore {
            remote,
            deque,
            steal_groups,
            rng: RefCell::new(rng),
        }
    }

    pub fn remote(&self) -> &Arc<WorkerRemote> {
        &self.remote
    }

    pub(crate) fn id(&self) -> usize {
        self.remote.id
    }

    /// Drains this worker's inbox. Owner only.
    fn try_get_submitted(&self) -> Option<Batch> {
        self.remote.inbox.try_get_submitted()
    }

    /// One full stealing pass over the neighbor groups, nearest first.
    ///
    /// Within a group the starting victim is chosen uniformly at random;
    /// contention aborts (`Steal::Retry`) just move on to the next victim
    /// rather than ending the pass.
    fn try_steal(&self) -> Option<Job> {
        for group in &self.steal_groups {
            let start = self.rng.borrow_mut().gen_range(0..group.len());
            for offset in 0..group.len() {
                let victim = &group[(start + offset) % group.len()];
                match victim.steal() {
                    Steal::Success(job) => {
                        #[cfg(feature = "metrics")]
                        self.remote
                            .coordinator
                            .metrics
                            .steal_hits
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        return Some(job);
                    }
                    Steal::Empty | Steal::Retry => continue,
                }
            }
        }

        #[cfg(feature = "metrics")]
        self.remote
            .coordinator
            .metrics
            .steal_misses
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    /// Pushes child work onto this worker's own deque, where it is visible
    /// to thieves.
    pub(crate) fn push_local(&self, job: Job) {
        self.deque.push(job);
    }

    /// Runs a drained inbox batch in chain order, then any local fallout.
    fn run_batch(&self, batch: Batch) {
        for job in batch {
            self.run_one(job);
            self.drain_local();
        }
    }

    /// Runs a stolen job, then any local fallout.
    fn run_stolen(&self, job: Job) {
        self.run_one(job);
        self.drain_local();
    }

    /// Drains this worker's own deque, newest first.
    ///
    /// Runs while the worker is still counted active, so forked children
    /// execute depth-first here unless a thief takes them.
    fn drain_local(&self) {
        while let Some(job) = self.deque.pop() {
            self.run_one(job);
        }
    }

    /// Resumes one job to its next suspension point or completion.
    fn run_one(&self, job: Job) {
        let (mut fiber, input) = match job.work {
            Work::Resume(handle) => {
                // SAFETY: the handle owns the box leaked when this fiber
                // suspended; we are the one worker resuming it.
                let fiber = unsafe { Box::from_raw(handle.0) };
                (fiber, FiberInput::Resume)
            }
            work => {
                let mut fiber = fiber::acquire();
                let fiber_ptr: *mut Fiber = &mut *fiber;
                (fiber, FiberInput::Start(Job { work }, fiber_ptr))
            }
        };

        match fiber.resume(input) {
            FiberState::Complete => fiber::release(fiber),
            FiberState::Yielded => {
                // Park the fiber as a resumption on our own deque so we, or
                // a thief, pick it back up.
                let handle = FiberHandle(Box::into_raw(fiber));
                self.push_local(Job::resumption(handle));
            }
            FiberState::Panic(payload) => {
                let msg = if let Some(msg) = payload.downcast_ref::<&str>() {
                    *msg
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    msg.as_str()
                } else {
                    "unknown panic payload"
                };
                error!(worker = self.id(), "job panicked: {msg}");
            }
        }
    }
}

thread_local! {
    static CURRENT_CORE: RefCell<Option<WorkerCore>> = const { RefCell::new(None) };
}

/// Installs `core` as the calling thread's worker state and sets up the
/// thread-local fiber cache.
///
/// Must be paired with [`worker_finalize`] on the same thread. Embedders
/// that bring their own threads call this instead of using the pool's.
pub fn worker_init(core: WorkerCore) -> Result<(), WorkerError> {
    CURRENT_CORE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() || fiber::cache_installed() {
            return Err(WorkerError::AlreadyInitialized);
        }
        fiber::install_cache();
        *slot = Some(core);
        Ok(())
    })
}

/// Tears down the calling thread's worker state and returns the core.
///
/// `remote` must identify the context installed on this thread; passing a
/// foreign context is reported without touching the installed state.
pub fn worker_finalize(remote: &Arc<WorkerRemote>) -> Result<WorkerCore, WorkerError> {
    CURRENT_CORE.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.take() {
            None => Err(WorkerError::NotInitialized),
            Some(core) => {
                if !Arc::ptr_eq(&core.remote, remote) {
                    *slot = Some(core);
                    return Err(WorkerError::ForeignContext);
                }
                if !fiber::uninstall_cache() {
                    *slot = Some(core);
                    return Err(WorkerError::NotInitialized);
                }
                Ok(core)
            }
        }
    })
}

/// Runs `f` against the calling thread's worker core.
///
/// Panics when the thread has no installed core; callers are the worker
/// main loop and job-facing APIs that only exist inside one.
pub(crate) fn with_core<R>(f: impl FnOnce(&WorkerCore) -> R) -> R {
    CURRENT_CORE.with(|slot| {
        let slot = slot.borrow();
        let core = slot
            .as_ref()
            .expect("not running on an initialized worker thread");
        f(core)
    })
}

/// Finalizes the worker state on every exit path from the main loop.
struct FinalizeGuard<'a> {
    remote: &'a Arc<WorkerRemote>,
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = worker_finalize(self.remote) {
            error!(worker = self.remote.id(), %err, "worker finalize failed");
        }
    }
}

/// A worker thread handle.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker thread running the main loop, pinned to `core_id`
    /// when one was assigned.
    pub(crate) fn spawn(core: WorkerCore, core_id: Option<CoreId>) -> io::Result<Worker> {
        let id = core.id();
        let handle = thread::Builder::new()
            .name(format!("idlefiber-{id}"))
            .spawn(move || {
                if let Some(core_id) = core_id {
                    core_affinity::set_for_current(core_id);
                }
                run_loop(core);
            })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// The wake -> thieve -> park state machine.
///
/// Fast path first: drain our own inbox, then steal from peers, wrapping
/// every execution in a thief round trip. Only when both come up empty do we
/// go near the notifier: publish intent to wait, re-check the inbox, honor a
/// stop request, and finally attempt the sleep transition, backing out if
/// parking would leave active workers unwatched.
fn run_loop(core: WorkerCore) {
    let remote = Arc::clone(&core.remote);
    let coordinator = Arc::clone(&remote.coordinator);
    let id = remote.id();

    if let Err(err) = worker_init(core) {
        error!(worker = id, %err, "worker failed to initialize");
        return;
    }
    let _finalize = FinalizeGuard { remote: &remote };
    debug!(worker = id, "worker online");

    loop {
        // Symmetric with the sleep decrement: taken on first entry and on
        // every wake-up.
        coordinator.enter_thieving();

        'thieving: loop {
            if let Some(batch) = with_core(|core| core.try_get_submitted()) {
                coordinator.thief_round_trip(|| with_core(|core| core.run_batch(batch)));
                continue 'thieving;
            }
            if let Some(job) = with_core(|core| core.try_steal()) {
                coordinator.thief_round_trip(|| with_core(|core| core.run_stolen(job)));
                continue 'thieving;
            }

            let key = coordinator.notifier.prepare_wait();

            // A submission may have raced ahead of the epoch read; the inbox
            // has to be clean before we commit to anything else.
            if let Some(batch) = with_core(|core| core.try_get_submitted()) {
                coordinator.notifier.cancel_wait(key);
                coordinator.thief_round_trip(|| with_core(|core| core.run_batch(batch)));
                continue 'thieving;
            }

            if coordinator.stop_requested() {
                coordinator.notifier.cancel_wait(key);
                // Exit as a "ghost thief": the searcher count stays raised,
                // which is harmless because nothing can sleep once stop is
                // set.
                trace!(worker = id, "stop observed, exiting");
                return;
            }

            if coordinator.try_sleep() {
                trace!(worker = id, "parking");
                #[cfg(feature = "metrics")]
                coordinator
                    .metrics
                    .parks
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                // A stale key (someone notified since prepare_wait) returns
                // immediately; a spurious wakeup just costs another lap.
                coordinator.notifier.wait(key);

                #[cfg(feature = "metrics")]
                coordinator
                    .metrics
                    .wakeups
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                trace!(worker = id, "woken");
            } else {
                // We are the last thief and someone is active: parking would
                // break the invariant. The sleep registration is already
                // done, so promoting ourselves back to thief is exactly the
                // compensation.
                coordinator.notifier.cancel_wait(key);
            }
            break 'thieving;
        }
    }
}
