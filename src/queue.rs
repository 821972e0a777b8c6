//! Per-worker submission inbox.
//!
//! An intrusive multi-producer, single-consumer list of submitted batches.
//! Producers push a whole batch chain as one node; the owning worker drains
//! the entire list in a single atomic take. Only the owner may consume.

use crate::job::Batch;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct SubmitNode {
    batch: Batch,
    next: *mut SubmitNode,
}

/// Lock-free MPSC inbox of submitted batches.
pub(crate) struct SubmissionQueue {
    head: AtomicPtr<SubmitNode>,
}

// Nodes are heap-allocated, contain only `Send` data, and are only ever
// shared through the atomic head.
unsafe impl Send for SubmissionQueue {}
unsafe impl Sync for SubmissionQueue {}

impl SubmissionQueue {
    pub(crate) fn new() -> Self {
        SubmissionQueue {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Producer side: links the batch in front of the current head.
    ///
    /// The release ordering on the successful exchange publishes the batch
    /// contents to the consumer's acquire take.
    pub(crate) fn submit(&self, batch: Batch) {
        let node = Box::into_raw(Box::new(SubmitNode {
            batch,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Consumer side (owner only): takes every pending batch in one swap.
    ///
    /// The list is in push order (newest first); batches are re-spliced so
    /// the returned chain runs the oldest submission first, and jobs within
    /// each batch keep their chain order.
    pub(crate) fn try_get_submitted(&self) -> Option<Batch> {
        let mut node = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        if node.is_null() {
            return None;
        }

        let mut drained = Batch::new();
        while !node.is_null() {
            // SAFETY: the swap made this list exclusively ours; each node
            // was created by `Box::into_raw` in `submit`.
            let SubmitNode { batch, next } = *unsafe { Box::from_raw(node) };
            node = next;
            let mut front = batch;
            front.append(drained);
            drained = front;
        }
        Some(drained)
    }
}

impl Drop for SubmissionQueue {
    fn drop(&mut self) {
        // Undelivered batches are freed, not run.
        let _ = self.try_get_submitted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn batch_of(ids: &[usize], log: &Arc<Mutex<Vec<usize>>>) -> Batch {
        ids.iter()
            .map(|&id| {
                let log = Arc::clone(log);
                Job::new(move |_| log.lock().unwrap().push(id))
            })
            .collect()
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let queue = SubmissionQueue::new();
        assert!(queue.try_get_submitted().is_none());
    }

    #[test]
    fn take_all_preserves_submission_order() {
        let queue = SubmissionQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.submit(batch_of(&[0, 1], &log));
        queue.submit(batch_of(&[2], &log));
        queue.submit(batch_of(&[3, 4], &log));

        let drained = queue.try_get_submitted().expect("three pending batches");
        assert_eq!(drained.len(), 5);
        for job in drained {
            job.run_fresh();
        }
        // Oldest submission first, chain order within each batch.
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);

        assert!(queue.try_get_submitted().is_none());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(SubmissionQueue::new());
        let ran = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let ran = Arc::clone(&ran);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let ran = Arc::clone(&ran);
                        let mut batch = Batch::new();
                        batch.push(Job::new(move |_| {
                            ran.fetch_add(1, Ordering::Relaxed);
                        }));
                        queue.submit(batch);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut total = 0;
        while let Some(drained) = queue.try_get_submitted() {
            for job in drained {
                total += 1;
                job.run_fresh();
            }
        }
        assert_eq!(total, 400);
        assert_eq!(ran.load(Ordering::Relaxed), 400);
    }

    #[test]
    fn drop_frees_undelivered_batches() {
        let queue = SubmissionQueue::new();
        queue.submit(batch_of(&[0], &Arc::new(Mutex::new(Vec::new()))));
        drop(queue);
    }
}
