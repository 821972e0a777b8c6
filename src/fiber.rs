//! Fiber management: the stackful execution contexts jobs run on.
//!
//! Every job executes inside a fiber so it can suspend without blocking the
//! worker thread. A suspended fiber is leaked into a raw [`FiberHandle`]
//! and travels through the scheduler as a resumption job; whichever worker
//! picks it up (its owner or a thief) reclaims the box and resumes it.
//!
//! Worker threads keep a thread-local cache of spare fibers, installed by
//! `worker_init` and torn down by `worker_finalize`. Off-worker callers
//! (tests, mostly) fall back to one-shot fibers.

use crate::job::Job;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::{Cell, RefCell};
use std::panic;

/// Raw handle to a suspended fiber.
///
/// Wraps the pointer produced by leaking a `Box<Fiber>` when the fiber
/// yields. Ownership transfers with the handle: exactly one worker reclaims
/// it via `Box::from_raw` on resumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FiberHandle(pub(crate) *mut Fiber);

// The pointee is only ever touched by the worker currently resuming it.
unsafe impl Send for FiberHandle {}

/// Input delivered to a fiber on resume.
pub(crate) enum FiberInput {
    /// Begin a fresh job. Carries a pointer to the hosting fiber so the
    /// coroutine can publish its yielder before user code runs.
    Start(Job, *mut Fiber),
    /// Continue a suspended job.
    Resume,
}

/// Outcome of driving a fiber one step.
pub(crate) enum FiberState {
    /// The job ran to completion; the fiber can be recycled.
    Complete,
    /// The job suspended; the fiber must be kept alive for resumption.
    Yielded,
    /// The job panicked; the payload is reported and the fiber discarded.
    Panic(Box<dyn std::any::Any + Send>),
}

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
}

/// A stackful execution context backed by a `corosensei` coroutine.
pub(crate) struct Fiber {
    coroutine: Option<Coroutine<FiberInput, (), ()>>,
    /// Set by the coroutine body when it starts; valid only while the fiber
    /// is running or suspended.
    yielder: *const Yielder<FiberInput, ()>,
}

// Fibers move between workers when a suspended job is stolen; the yielder
// pointer is only dereferenced from inside the running coroutine.
unsafe impl Send for Fiber {}

impl Fiber {
    pub(crate) fn new() -> Self {
        let coroutine = Coroutine::new(move |yielder, input: FiberInput| {
            if let FiberInput::Start(job, fiber_ptr) = input {
                // SAFETY: fiber_ptr points at the boxed fiber driving this
                // coroutine; it stays pinned for the coroutine's lifetime.
                unsafe {
                    (*fiber_ptr).yielder = yielder as *const _;
                }
                job.run_fresh();
            }
        });

        Fiber {
            coroutine: Some(coroutine),
            yielder: std::ptr::null(),
        }
    }

    /// Drives the fiber until it completes, suspends, or panics.
    pub(crate) fn resume(&mut self, input: FiberInput) -> FiberState {
        let self_ptr = self as *mut _;
        if let Some(coroutine) = self.coroutine.as_mut() {
            CURRENT_FIBER.set(Some(FiberHandle(self_ptr)));

            let result =
                panic::catch_unwind(panic::AssertUnwindSafe(|| coroutine.resume(input)));

            CURRENT_FIBER.set(None);

            match result {
                Ok(CoroutineResult::Yield(())) => FiberState::Yielded,
                Ok(CoroutineResult::Return(())) => FiberState::Complete,
                Err(payload) => FiberState::Panic(payload),
            }
        } else {
            FiberState::Complete
        }
    }

    /// Recreates the coroutine so the fiber can host a new job.
    pub(crate) fn reset(&mut self) {
        *self = Fiber::new();
    }

    /// Suspends the calling fiber, or yields the thread when called outside
    /// of one.
    pub(crate) fn yield_now() {
        if let Some(handle) = CURRENT_FIBER.get() {
            // SAFETY: the handle was set by the resume that is driving us,
            // and the yielder was published before user code started.
            unsafe {
                let fiber = &*handle.0;
                debug_assert!(!fiber.yielder.is_null());
                let yielder = &*fiber.yielder;
                let _ = yielder.suspend(());
            }
        } else {
            std::thread::yield_now();
        }
    }
}

const SPARE_FIBERS: usize = 32;

/// Per-thread cache of spare fibers.
pub(crate) struct FiberCache {
    spare: Vec<Box<Fiber>>,
}

impl FiberCache {
    fn new() -> Self {
        FiberCache { spare: Vec::new() }
    }

    fn get(&mut self) -> Box<Fiber> {
        if let Some(mut fiber) = self.spare.pop() {
            fiber.reset();
            fiber
        } else {
            Box::new(Fiber::new())
        }
    }

    fn put(&mut self, fiber: Box<Fiber>) {
        if self.spare.len() < SPARE_FIBERS {
            self.spare.push(fiber);
        }
    }
}

thread_local! {
    static FIBER_CACHE: RefCell<Option<FiberCache>> = const { RefCell::new(None) };
}

/// Whether the calling thread has a fiber cache installed.
pub(crate) fn cache_installed() -> bool {
    FIBER_CACHE.with(|cache| cache.borrow().is_some())
}

/// Installs the thread-local fiber cache. Part of worker initialization.
pub(crate) fn install_cache() {
    FIBER_CACHE.with(|cache| {
        *cache.borrow_mut() = Some(FiberCache::new());
    });
}

/// Removes the thread-local fiber cache, dropping any spares. Returns
/// whether a cache was present.
pub(crate) fn uninstall_cache() -> bool {
    FIBER_CACHE.with(|cache| cache.borrow_mut().take().is_some())
}

/// Takes a fiber from the calling thread's cache, or builds a one-shot
/// fiber when no cache is installed.
pub(crate) fn acquire() -> Box<Fiber> {
    FIBER_CACHE.with(|cache| match cache.borrow_mut().as_mut() {
        Some(cache) => cache.get(),
        None => Box::new(Fiber::new()),
    })
}

/// Returns a completed fiber to the calling thread's cache, if any.
pub(crate) fn release(fiber: Box<Fiber>) {
    FIBER_CACHE.with(|cache| {
        if let Some(cache) = cache.borrow_mut().as_mut() {
            cache.put(fiber);
        }
    });
}
