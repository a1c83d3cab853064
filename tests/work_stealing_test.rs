use jobforge::{JobContext, JobId, JobSystem};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

fn leaked_counter() -> &'static AtomicUsize {
    Box::leak(Box::new(AtomicUsize::new(0)))
}

fn bump(_ctx: &JobContext, _id: JobId, counter: &&'static AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// A large fan-out from the main queue. Every job lands in queue 0, so
/// anything a worker runs was stolen.
#[test]
fn test_workers_steal_from_main_queue() {
    let job_system = JobSystem::new(4);
    let counter = leaked_counter();

    let root = job_system.create_empty_job();
    let mut jobs: Vec<JobId> = (0..2000)
        .map(|_| job_system.create_job_as_child(root, bump, counter))
        .collect();
    jobs.push(root);

    assert_eq!(job_system.submit_all(&jobs), 2001);
    job_system.wait(root);

    assert_eq!(counter.load(Ordering::SeqCst), 2000);
    job_system.shutdown().expect("shutdown failed");
}

/// Uneven load: one job spawns all the real work from a worker's own
/// queue, so peers have to steal from that worker to help.
#[test]
fn test_peers_steal_from_busy_worker() {
    let job_system = JobSystem::new(4);
    let counter = leaked_counter();

    fn producer(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
        for _ in 0..1000 {
            let child = ctx.create_job_as_child(id, busy_bump, *counter);
            ctx.submit(child);
        }
    }

    fn busy_bump(_ctx: &JobContext, _id: JobId, counter: &&'static AtomicUsize) {
        // Enough work per job that stealing is worth it.
        let mut acc = 0u64;
        for i in 0..200u64 {
            acc = acc.wrapping_add(i * i);
        }
        std::hint::black_box(acc);
        counter.fetch_add(1, Ordering::SeqCst);
    }

    let root = job_system.create_job(producer, counter);
    job_system.submit(root);
    job_system.wait(root);

    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    job_system.shutdown().expect("shutdown failed");
}

/// Repeated waves of random size keep the queues churning through
/// allocation wrap-around of the default 4096-slot pools.
#[test]
fn test_sustained_throughput_over_pool_recycling() {
    let job_system = JobSystem::new(4);
    let counter = leaked_counter();
    let mut rng = rand::thread_rng();

    let mut expected = 0;
    for _ in 0..20 {
        let wave: usize = rng.gen_range(200..800);
        expected += wave;

        let root = job_system.create_empty_job();
        let mut jobs: Vec<JobId> = (0..wave)
            .map(|_| job_system.create_job_as_child(root, bump, counter))
            .collect();
        jobs.push(root);
        job_system.submit_all(&jobs);
        job_system.wait(root);
    }

    assert_eq!(counter.load(Ordering::SeqCst), expected);
    job_system.shutdown().expect("shutdown failed");
}

/// Every submitted job runs exactly once, checked with per-job slots
/// instead of a single counter.
#[test]
fn test_each_job_runs_exactly_once() {
    const JOBS: usize = 1024;
    let job_system = JobSystem::new(4);
    let slots: &'static Vec<AtomicUsize> =
        Box::leak(Box::new((0..JOBS).map(|_| AtomicUsize::new(0)).collect()));

    #[derive(Clone, Copy)]
    struct Slot {
        slots: &'static Vec<AtomicUsize>,
        index: usize,
    }

    fn mark(_ctx: &JobContext, _id: JobId, slot: &Slot) {
        slot.slots[slot.index].fetch_add(1, Ordering::SeqCst);
    }

    let root = job_system.create_empty_job();
    let mut jobs: Vec<JobId> = (0..JOBS)
        .map(|index| job_system.create_job_as_child(root, mark, Slot { slots, index }))
        .collect();
    jobs.push(root);

    assert_eq!(job_system.submit_all(&jobs), JOBS + 1);
    job_system.wait(root);

    for (index, slot) in slots.iter().enumerate() {
        assert_eq!(slot.load(Ordering::SeqCst), 1, "job {index} ran a wrong number of times");
    }
    job_system.shutdown().expect("shutdown failed");
}
