//! Integration tests for the job system core.

use crate::job_system::{JobContext, Shared};
use crate::{CountSplitter, JobError, JobId, JobSystem, MAX_CONTINUATIONS};
use std::sync::atomic::{AtomicUsize, Ordering};

fn leaked_counter(initial: usize) -> &'static AtomicUsize {
    Box::leak(Box::new(AtomicUsize::new(initial)))
}

fn decrement(_ctx: &JobContext, _id: JobId, counter: &&'static AtomicUsize) {
    counter.fetch_sub(1, Ordering::SeqCst);
}

fn increment(_ctx: &JobContext, _id: JobId, counter: &&'static AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_job_system_creation() {
    let system = JobSystem::new(2);
    assert_eq!(system.num_workers(), 2.min(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)));
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_single_job_runs() {
    let system = JobSystem::new(2);
    let counter = leaked_counter(0);

    let job = system.create_job(increment, counter);
    system.submit(job);
    system.wait(job);

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(system.unfinished_jobs(job), 0);
    system.shutdown().expect("shutdown failed");
}

/// Spec scenario A: a no-op root with 100 children, each decrementing a
/// shared counter.
#[test]
fn test_root_with_hundred_children() {
    let system = JobSystem::new(4);
    let counter = leaked_counter(100);

    let root = system.create_empty_job();
    let mut jobs = Vec::with_capacity(101);
    for _ in 0..100 {
        jobs.push(system.create_job_as_child(root, decrement, counter));
    }
    jobs.push(root);

    assert_eq!(system.submit_all(&jobs), 101);
    system.wait(root);

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(system.unfinished_jobs(root), 0);
    system.shutdown().expect("shutdown failed");
}

/// Spec scenario B: waiting on a job also covers its continuation, which
/// the caller never submitted.
#[test]
fn test_wait_observes_continuation() {
    let system = JobSystem::new(2);
    let flag = leaked_counter(0);

    let job = system.create_job(|_ctx, _id, _data: &()| {}, ());
    let continuation = system.create_job(increment, flag);
    system
        .add_continuation(job, continuation)
        .expect("registration failed");

    system.submit(job);
    system.wait(job);

    assert_eq!(flag.load(Ordering::SeqCst), 1);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_continuation_capacity_is_bounded() {
    let system = JobSystem::new(1);
    let flag = leaked_counter(0);

    let job = system.create_job(|_ctx, _id, _data: &()| {}, ());
    for _ in 0..MAX_CONTINUATIONS {
        let cont = system.create_job(increment, flag);
        system.add_continuation(job, cont).expect("within capacity");
    }
    assert_eq!(system.continuation_count(job), MAX_CONTINUATIONS as i32);

    let rejected = system.create_job(increment, flag);
    match system.add_continuation(job, rejected) {
        Err(JobError::ContinuationLimit(id)) => assert_eq!(id, job),
        other => panic!("expected ContinuationLimit, got {other:?}"),
    }

    // The rejected job is never submitted; the registered ones all fire.
    system.submit(job);
    system.wait(job);
    assert_eq!(flag.load(Ordering::SeqCst), MAX_CONTINUATIONS);
    system.shutdown().expect("shutdown failed");
}

/// Parent propagation: children created inside the parent's body gate the
/// wait on the parent.
#[test]
fn test_wait_covers_children_spawned_in_body() {
    let system = JobSystem::new(4);
    let counter = leaked_counter(0);

    fn spawn_eight(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
        for _ in 0..8 {
            let child = ctx.create_job_as_child(id, increment, *counter);
            ctx.submit(child);
        }
    }

    let parent = system.create_job(spawn_eight, counter);
    system.submit(parent);
    system.wait(parent);

    assert_eq!(counter.load(Ordering::SeqCst), 8);
    assert_eq!(system.unfinished_jobs(parent), 0);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_stale_identity_is_neutral() {
    let config = crate::JobSystemConfig {
        worker_threads: 1,
        queue_capacity: 16,
        ..Default::default()
    };
    let system = JobSystem::with_config(config).expect("config rejected");

    let old = system.create_job(|_ctx, _id, _data: &()| {}, ());
    // Lap the 16-slot pool so the old identity's slot is recycled.
    for _ in 0..16 {
        system.create_empty_job();
    }

    assert_eq!(system.unfinished_jobs(old), 0);
    assert_eq!(system.continuation_count(old), 0);
    // A consumed identity is "finished": wait returns immediately.
    system.wait(old);
    system.shutdown().expect("shutdown failed");
}

/// Spec property: a waiting thread with no helpers still makes progress by
/// draining its own queue. Built directly on the shared internals so no
/// worker threads exist at all.
#[test]
fn test_cooperative_wait_drains_without_workers() {
    let shared = Shared::new(1, 256);
    let ctx = JobContext::new(shared, 0);
    let counter = leaked_counter(0);

    let root = ctx.create_empty_job();
    for _ in 0..50 {
        let child = ctx.create_job_as_child(root, increment, counter);
        ctx.submit(child);
    }
    ctx.submit(root);
    ctx.wait(root);

    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert_eq!(ctx.unfinished_jobs(root), 0);
}

#[test]
fn test_queue_overflow_drops_jobs() {
    // No workers, so nothing drains the queue while we overflow it.
    let shared = Shared::new(1, 4);
    let ctx = JobContext::new(shared, 0);

    let jobs: Vec<JobId> = (0..6).map(|_| ctx.create_empty_job()).collect();
    assert_eq!(ctx.submit_all(&jobs), 4);

    for id in &jobs[..4] {
        ctx.wait(*id);
    }
}

#[test]
fn test_batch_submission_counts() {
    let system = JobSystem::new(2);
    let counter = leaked_counter(0);

    let jobs: Vec<JobId> = (0..10).map(|_| system.create_job(increment, counter)).collect();
    assert_eq!(system.submit_all(&jobs), 10);
    for job in &jobs {
        system.wait(*job);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_payload_mutation_through_pointer() {
    #[derive(Clone, Copy)]
    struct OutPtr(*mut u64);
    // Safety: the pointee outlives the wait below and is only written by
    // the single job holding the pointer.
    unsafe impl Send for OutPtr {}

    let mut result: u64 = 0;
    let system = JobSystem::new(2);

    let job = system.create_job(
        |_ctx, _id, out: &OutPtr| unsafe { *out.0 = 1234 },
        OutPtr(&mut result),
    );
    system.submit(job);
    system.wait(job);
    system.shutdown().expect("shutdown failed");

    assert_eq!(result, 1234);
}

#[test]
fn test_parallel_for_small_slice_runs_inline() {
    let system = JobSystem::new(2);
    let mut data = [1u32, 2, 3];
    system.parallel_for(&mut data, CountSplitter::new(500), |value| *value *= 10);
    assert_eq!(data, [10, 20, 30]);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_recursive_fan_out_stress() {
    let system = JobSystem::new(4);
    let counter = leaked_counter(0);

    fn middle(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        for _ in 0..8 {
            let grandchild = ctx.create_job_as_child(id, increment, *counter);
            ctx.submit(grandchild);
        }
    }

    fn root_body(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
        for _ in 0..32 {
            let child = ctx.create_job_as_child(id, middle, *counter);
            ctx.submit(child);
        }
    }

    let root = system.create_job(root_body, counter);
    system.submit(root);
    system.wait(root);

    assert_eq!(counter.load(Ordering::SeqCst), 32 + 32 * 8);
    system.shutdown().expect("shutdown failed");
}
