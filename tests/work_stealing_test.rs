use idlefiber::{Batch, Job, JobPool};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(counter: &Arc<AtomicUsize>, expected: usize) {
    let start = Instant::now();
    while counter.load(Ordering::Relaxed) < expected {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "jobs did not finish"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn imbalanced_fork_load_spreads_across_workers() {
    let pool = JobPool::new(4);
    let done = Arc::new(AtomicUsize::new(0));
    let executors: Arc<Mutex<HashSet<thread::ThreadId>>> = Arc::new(Mutex::new(HashSet::new()));

    // One root forks all the work; everything lands on a single deque and
    // can only spread by stealing.
    let fork_done = done.clone();
    let fork_executors = executors.clone();
    let mut batch = Batch::new();
    batch.push(Job::new(move |ctx| {
        for _ in 0..400 {
            let done = fork_done.clone();
            let executors = fork_executors.clone();
            ctx.fork(Job::new(move |_| {
                executors.lock().unwrap().insert(thread::current().id());
                thread::sleep(Duration::from_micros(50));
                done.fetch_add(1, Ordering::Relaxed);
            }));
        }
    }));
    pool.schedule(batch);

    wait_for(&done, 400);
    assert!(
        executors.lock().unwrap().len() >= 2,
        "all forked work ran on one worker"
    );
}

#[test]
fn deep_fork_chains_complete() {
    let pool = JobPool::new(4);
    let done = Arc::new(AtomicUsize::new(0));

    // Each job forks its successor; the chain hops down one worker's deque
    // with thieves free to grab links.
    fn chain(remaining: usize, done: Arc<AtomicUsize>) -> Job {
        Job::new(move |ctx| {
            done.fetch_add(1, Ordering::Relaxed);
            if remaining > 0 {
                ctx.fork(chain(remaining - 1, done.clone()));
            }
        })
    }

    let mut batch = Batch::new();
    batch.push(chain(499, done.clone()));
    pool.schedule(batch);

    wait_for(&done, 500);
}

#[test]
fn many_independent_batches_all_complete() {
    let pool = JobPool::new(8);
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..20 {
        let batch: Batch = (0..50)
            .map(|_| {
                let done = done.clone();
                Job::new(move |_| {
                    done.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();
        pool.schedule(batch);
    }

    wait_for(&done, 1000);
}
