//! Fan-out throughput benchmark.
//!
//! Measures scheduling plus execution of flat batches of trivial jobs, the
//! worst case for wake/park churn.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use idlefiber::{Batch, Job, JobPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn bench_fan_out(c: &mut Criterion) {
    let pool = JobPool::with_default_threads();

    let mut group = c.benchmark_group("fan_out");
    group.sample_size(20);

    for total_jobs in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(total_jobs as u64));

        group.bench_function(BenchmarkId::new("independent", total_jobs), |b| {
            b.iter(|| {
                let done = Arc::new(AtomicUsize::new(0));
                let batch: Batch = (0..total_jobs)
                    .map(|_| {
                        let done = done.clone();
                        Job::new(move |_| {
                            std::hint::black_box(());
                            done.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                    .collect();

                pool.schedule(batch);
                while done.load(Ordering::Relaxed) < total_jobs {
                    std::hint::spin_loop();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
