use jobforge::{JobContext, JobId, JobSystem};
use std::sync::atomic::{AtomicUsize, Ordering};

fn leaked_counter() -> &'static AtomicUsize {
    Box::leak(Box::new(AtomicUsize::new(0)))
}

fn bump(_ctx: &JobContext, _id: JobId, counter: &&'static AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn grandchild_spawner(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
    for _ in 0..2 {
        let grandchild = ctx.create_job_as_child(id, bump, *counter);
        ctx.submit(grandchild);
    }
}

fn child_spawner(ctx: &JobContext, id: JobId, counter: &&'static AtomicUsize) {
    for _ in 0..3 {
        let child = ctx.create_job_as_child(id, grandchild_spawner, *counter);
        ctx.submit(child);
    }
}

#[test]
fn test_hierarchical_job_tree() {
    let job_system = JobSystem::new(2);
    let total_work = leaked_counter();

    let root = job_system.create_job(child_spawner, total_work);
    job_system.submit(root);
    job_system.wait(root);

    // 3 children each doing 1 unit plus 2 grandchildren.
    assert_eq!(total_work.load(Ordering::SeqCst), 9);
    assert_eq!(job_system.unfinished_jobs(root), 0);
    job_system.shutdown().expect("shutdown failed");
}

#[test]
fn test_pre_built_job_graph_counts_down_once() {
    let job_system = JobSystem::new(4);
    let total_work = leaked_counter();

    // Build the whole graph up front, then submit everything at once.
    let root = job_system.create_empty_job();
    let mut jobs = Vec::new();
    for _ in 0..4 {
        let child = job_system.create_empty_child(root);
        for _ in 0..4 {
            jobs.push(job_system.create_job_as_child(child, bump, total_work));
        }
        jobs.push(child);
    }
    jobs.push(root);

    assert_eq!(job_system.submit_all(&jobs), jobs.len());
    job_system.wait(root);

    assert_eq!(total_work.load(Ordering::SeqCst), 16);
    assert_eq!(job_system.unfinished_jobs(root), 0);
    job_system.shutdown().expect("shutdown failed");
}

#[test]
fn test_sibling_order_is_unconstrained_but_all_run() {
    let job_system = JobSystem::new(4);
    let total_work = leaked_counter();

    let root = job_system.create_empty_job();
    let mut jobs: Vec<JobId> = (0..64)
        .map(|_| job_system.create_job_as_child(root, bump, total_work))
        .collect();
    jobs.push(root);

    job_system.submit_all(&jobs);
    job_system.wait(root);

    assert_eq!(total_work.load(Ordering::SeqCst), 64);
    job_system.shutdown().expect("shutdown failed");
}
