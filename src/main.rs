use jobforge::{CountSplitter, JobContext, JobId, JobSystem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn main() {
    println!("jobforge - Work-Stealing Job System\n");

    // Create a job system with 4 worker threads
    let num_threads = 4;
    let job_system = JobSystem::new(num_threads);
    println!("Initialized job system with {} worker threads\n", job_system.num_workers());

    // Example 1: Simple job execution
    println!("Example 1: Simple job execution");
    let job = job_system.create_job(
        |_ctx, _id, _data: &()| {
            println!("  Hello from a stolen job!");
        },
        (),
    );
    job_system.submit(job);
    job_system.wait(job);
    println!("  Job completed\n");

    // Example 2: Fork/join with a job hierarchy
    println!("Example 2: Job hierarchy");
    let sum: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
    let num_jobs = 100;

    fn accumulate(_ctx: &JobContext, _id: JobId, args: &(&'static AtomicUsize, usize)) {
        let (sum, value) = *args;
        let mut local = 0;
        for j in 0..1000 {
            local += j;
        }
        std::hint::black_box(local);
        sum.fetch_add(value, Ordering::SeqCst);
    }

    let start = Instant::now();
    let root = job_system.create_empty_job();
    let mut jobs = Vec::with_capacity(num_jobs + 1);
    for i in 0..num_jobs {
        jobs.push(job_system.create_job_as_child(root, accumulate, (sum, i)));
    }
    jobs.push(root);
    job_system.submit_all(&jobs);
    job_system.wait(root);

    let duration = start.elapsed();
    let expected_sum: usize = (0..num_jobs).sum();
    println!("  Executed {} jobs in {:?}", num_jobs, duration);
    println!("  Sum result: {} (expected: {})\n", sum.load(Ordering::SeqCst), expected_sum);

    // Example 3: Continuations
    println!("Example 3: Continuations");
    let head = job_system.create_job(
        |_ctx, _id, _data: &()| {
            println!("  First stage done");
        },
        (),
    );
    let tail = job_system.create_job(
        |_ctx, _id, _data: &()| {
            println!("  Continuation ran after the first stage");
        },
        (),
    );
    if let Err(err) = job_system.add_continuation(head, tail) {
        eprintln!("  Continuation registration failed: {err}");
    }
    job_system.submit(head);
    job_system.wait(head);
    println!();

    // Example 4: parallel_for over a slice
    println!("Example 4: parallel_for");
    let mut data: Vec<u64> = (0..1_000_000).collect();
    let start = Instant::now();
    job_system.parallel_for(&mut data, CountSplitter::new(4096), |value| *value *= 2);
    let duration = start.elapsed();
    let elements_per_second = data.len() as f64 / duration.as_secs_f64();
    println!("  Doubled {} elements in {:?}", data.len(), duration);
    println!("  Throughput: {:.2} elements/second\n", elements_per_second);

    // Shutdown the system
    println!("Shutting down job system...");
    match job_system.shutdown() {
        Ok(_) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
}
