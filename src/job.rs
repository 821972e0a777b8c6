//! Job definitions and the submission batch chain.
//!
//! A [`Job`] is the unit of work the scheduler moves around: either a fresh
//! closure that has not started yet, or the resumption of a fiber that
//! suspended mid-execution. A [`Batch`] is an ordered chain of jobs handed
//! to the scheduler as one unit; the chain order is preserved when the
//! receiving worker runs it.

use crate::context::Context;
use crate::fiber::FiberHandle;
use std::ptr::NonNull;

/// Internal representation of work to be executed.
pub(crate) enum Work {
    /// A closure that has not started yet.
    Fresh(Box<dyn FnOnce(&Context) + Send + 'static>),
    /// Resumption of a suspended fiber.
    Resume(FiberHandle),
}

/// A unit of work executed by the scheduler.
///
/// Jobs receive a [`Context`] through which they can fork child work onto
/// the worker executing them and yield cooperatively.
pub struct Job {
    pub(crate) work: Work,
}

impl Job {
    /// Creates a job from a closure.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        Job {
            work: Work::Fresh(Box::new(work)),
        }
    }

    /// Creates a job that resumes a suspended fiber.
    pub(crate) fn resumption(handle: FiberHandle) -> Self {
        Job {
            work: Work::Resume(handle),
        }
    }

    /// Runs a fresh job to its first suspension point or completion.
    ///
    /// Called from inside the fiber that hosts the job. Resumptions never
    /// reach this path; they are driven through the fiber directly.
    pub(crate) fn run_fresh(self) {
        match self.work {
            Work::Fresh(work) => work(&Context::new()),
            Work::Resume(_) => panic!("a resumption must be driven through its fiber"),
        }
    }
}

struct JobNode {
    job: Job,
    next: Option<Box<JobNode>>,
}

/// An ordered chain of jobs submitted to the scheduler as one unit.
///
/// Producers build the chain up front, so the scheduler itself performs no
/// allocation per submission; the whole chain changes hands as a single
/// node. Jobs run in the order they were pushed.
pub struct Batch {
    head: Option<Box<JobNode>>,
    tail: Option<NonNull<JobNode>>,
    len: usize,
}

// The tail pointer aliases a node owned by `head`; the chain itself is made
// of owned boxes of `Send` jobs.
unsafe impl Send for Batch {}

impl Batch {
    pub fn new() -> Self {
        Batch {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Appends a job to the end of the chain.
    pub fn push(&mut self, job: Job) {
        let mut node = Box::new(JobNode { job, next: None });
        let ptr = NonNull::from(&mut *node);
        match self.tail {
            Some(mut tail) => unsafe { tail.as_mut().next = Some(node) },
            None => self.head = Some(node),
        }
        self.tail = Some(ptr);
        self.len += 1;
    }

    /// Splices `other` onto the end of this chain.
    pub(crate) fn append(&mut self, mut other: Batch) {
        let Some(head) = other.head.take() else {
            return;
        };
        match self.tail {
            Some(mut tail) => unsafe { tail.as_mut().next = Some(head) },
            None => self.head = Some(head),
        }
        self.tail = other.tail.take();
        self.len += other.len;
        other.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

impl Default for Batch {
    fn default() -> Self {
        Batch::new()
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        // Unlink iteratively; a recursive drop of a long chain would exhaust
        // the stack.
        let mut node = self.head.take();
        while let Some(mut unlinked) = node {
            node = unlinked.next.take();
        }
    }
}

impl FromIterator<Job> for Batch {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for job in iter {
            batch.push(job);
        }
        batch
    }
}

impl Extend<Job> for Batch {
    fn extend<I: IntoIterator<Item = Job>>(&mut self, iter: I) {
        for job in iter {
            self.push(job);
        }
    }
}

impl IntoIterator for Batch {
    type Item = Job;
    type IntoIter = BatchIter;

    fn into_iter(mut self) -> BatchIter {
        BatchIter {
            next: self.head.take(),
        }
    }
}

/// Draining iterator over a [`Batch`], in chain order.
pub struct BatchIter {
    next: Option<Box<JobNode>>,
}

impl Iterator for BatchIter {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        let mut node = self.next.take()?;
        self.next = node.next.take();
        Some(node.job)
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        let mut node = self.next.take();
        while let Some(mut unlinked) = node {
            node = unlinked.next.take();
        }
    }
}
