use idlefiber::{Batch, Job, JobPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(counter: &Arc<AtomicUsize>, expected: usize) {
    let start = Instant::now();
    while counter.load(Ordering::Relaxed) < expected {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "jobs did not finish"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn single(job: Job) -> Batch {
    let mut batch = Batch::new();
    batch.push(job);
    batch
}

#[test]
fn worker_survives_a_panicking_job() {
    let pool = JobPool::new(1);

    pool.schedule(single(Job::new(|_| panic!("intentional test panic"))));

    // The same (only) worker must still be able to run work afterwards.
    let done = Arc::new(AtomicUsize::new(0));
    let done_clone = done.clone();
    pool.schedule(single(Job::new(move |_| {
        done_clone.fetch_add(1, Ordering::Relaxed);
    })));

    wait_for(&done, 1);
    pool.shutdown()
        .expect("a job panic must not take the worker down");
}

#[test]
fn panics_do_not_poison_siblings_in_a_batch() {
    let pool = JobPool::new(2);
    let done = Arc::new(AtomicUsize::new(0));

    let mut batch = Batch::new();
    for i in 0..10 {
        let done = done.clone();
        batch.push(Job::new(move |_| {
            if i == 3 {
                panic!("intentional test panic");
            }
            done.fetch_add(1, Ordering::Relaxed);
        }));
    }
    pool.schedule(batch);

    wait_for(&done, 9);
    pool.shutdown().expect("workers should all survive");
}
