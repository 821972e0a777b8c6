//! # idlefiber - Sleep-Capable Work-Stealing Fiber Scheduler
//!
//! A fork/join job scheduler whose workers steal work from each other when
//! busy and park when the system is quiescent, so an idle pool costs no
//! CPU. Jobs run on lightweight stackful fibers, may fork child work onto
//! the executing worker, and may suspend cooperatively.
//!
//! ## Architecture
//!
//! Every worker is always in one of three states: searching for work (a
//! *thief*), executing a job (*active*), or parked (*sleeping*). The thief
//! and active counts are packed into a single atomic word, and all
//! transitions preserve one invariant: while any worker is active, either
//! some worker is still searching or none are asleep. That is what makes
//! sleeping safe: work can never appear while every non-busy worker is
//! parked and nobody would ever find it.
//!
//! Key components:
//!
//! - **Jobs and batches**: units of work, submitted as ordered chains
//! - **Fibers**: stackful contexts so jobs can yield without blocking a
//!   worker thread
//! - **Per-worker deques**: owner-LIFO, thief-FIFO work-stealing queues
//! - **Submission inboxes**: lock-free MPSC queues drained by their owner
//! - **The notifier**: an event count that parks idle workers without
//!   losing wakeups
//!
//! ## Example
//!
//! ```no_run
//! use idlefiber::{Batch, Job, JobPool};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let pool = JobPool::new(4);
//! let done = Arc::new(AtomicUsize::new(0));
//!
//! let mut batch = Batch::new();
//! for _ in 0..100 {
//!     let done = done.clone();
//!     batch.push(Job::new(move |ctx| {
//!         // Fork a child onto this worker; a peer may steal it.
//!         let done = done.clone();
//!         ctx.fork(Job::new(move |_| {
//!             done.fetch_add(1, Ordering::Relaxed);
//!         }));
//!     }));
//! }
//! pool.schedule(batch);
//! ```

pub mod context;
mod coordinator;
mod fiber;
pub mod job;
pub mod metrics;
mod notifier;
pub mod pool;
mod queue;
mod topology;
pub mod worker;

pub use context::{yield_now, Context};
pub use job::{Batch, Job};
pub use pool::{JobPool, PoolError};
pub use worker::{worker_finalize, worker_init, WorkerCore, WorkerError, WorkerRemote};
