//! The work-stealing scheduler.
//!
//! The [`JobSystem`] owns one [`JobQueue`](crate::deque::JobQueue) per
//! worker thread plus queue 0 for the calling thread, spawns the worker
//! pool, and implements job creation, continuation registration,
//! submission, the victim-selection policy, the finish/continuation
//! cascade, and the cooperative wait loop.
//!
//! Job bodies receive a [`JobContext`]: the executing thread's view of the
//! system. The `JobSystem` value itself is the main thread's context and is
//! deliberately not `Sync`, so owner-only operations on queue 0 cannot be
//! raced from two threads.

use crate::deque::JobQueue;
use crate::error::JobError;
use crate::job::{
    JobId, JobRecord, PayloadFits, RawJobFn, MAX_CONTINUATIONS, SLOT_CLAIMED_BIT, SLOT_EMPTY,
};
use crate::worker::{Sleep, Worker, STATE_RUNNING, STATE_WAITING};
use crate::PinningStrategy;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

/// Queue index of the calling/main thread.
pub(crate) const MAIN_QUEUE: usize = 0;

/// Empty victim passes between potential-deadlock diagnostics in `wait`.
const DEADLOCK_REPORT_INTERVAL: u64 = 100_000;
/// Empty passes spent spinning before `wait` starts yielding the thread.
const WAIT_SPIN_LIMIT: u32 = 64;

/// Configuration for the job system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSystemConfig {
    /// Number of worker threads. 0 means "use the detected processor
    /// count"; explicit values are clamped to `[1, detected]`.
    pub worker_threads: usize,
    /// Capacity of each queue's deque and record pool. Must be a power of
    /// two in `[2, 65536]`. Size for worst-case fan-out: overflowing jobs
    /// are dropped.
    pub queue_capacity: usize,
    /// Worker thread CPU pinning.
    pub pinning: PinningStrategy,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            queue_capacity: 4096,
            pinning: PinningStrategy::None,
        }
    }
}

impl JobSystemConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if !self.queue_capacity.is_power_of_two() || !(2..=1 << 16).contains(&self.queue_capacity)
        {
            return Err(JobError::InvalidCapacity(self.queue_capacity));
        }
        Ok(())
    }

    /// Requested worker count resolved against the machine.
    pub fn effective_workers(&self) -> usize {
        let detected = detected_parallelism();
        if self.worker_threads == 0 {
            detected
        } else {
            self.worker_threads.clamp(1, detected)
        }
    }
}

fn detected_parallelism() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// State shared by every thread participating in the system.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) queues: Box<[JobQueue]>,
    pub(crate) sleep: Sleep,
    pub(crate) worker_states: Box<[AtomicU8]>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: crate::metrics::Metrics,
}

impl Shared {
    pub(crate) fn new(queue_count: usize, capacity: usize) -> Arc<Shared> {
        Arc::new(Shared {
            queues: (0..queue_count).map(|_| JobQueue::new(capacity)).collect(),
            sleep: Sleep::new(),
            worker_states: (0..queue_count.saturating_sub(1))
                .map(|_| AtomicU8::new(STATE_WAITING))
                .collect(),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        })
    }

    /// Resolves an identity to its record, or `None` if the id is invalid
    /// or the slot has been recycled under a newer generation.
    pub(crate) fn record(&self, id: JobId) -> Option<&JobRecord> {
        if !id.is_valid() {
            return None;
        }
        let queue = self.queues.get(id.queue())?;
        let record = queue.record(id.slot())?;
        (record.generation.load(Ordering::Relaxed) == id.generation()).then_some(record)
    }
}

/// A thread's view of the job system.
///
/// Worker threads each own one context; the main thread's context is the
/// [`JobSystem`] itself. Job bodies receive a `&JobContext` for the thread
/// executing them, which is how nested jobs (e.g. parallel-for splits) are
/// created without any global scheduler state.
#[derive(Debug)]
pub struct JobContext {
    shared: Arc<Shared>,
    queue_index: usize,
    /// Rotating start point for the peer-steal scan; advances every
    /// `get_job` call so no single victim is hot-spotted.
    rotation: Cell<usize>,
}

impl JobContext {
    pub(crate) fn new(shared: Arc<Shared>, queue_index: usize) -> Self {
        JobContext {
            shared,
            queue_index,
            rotation: Cell::new(queue_index),
        }
    }

    /// Creates a root job. Equivalent to
    /// [`create_job_as_child`](Self::create_job_as_child) with an invalid
    /// parent.
    ///
    /// The body and payload are copied into the record's fixed inline
    /// buffer; a combination that does not fit
    /// [`PAYLOAD_CAPACITY`](crate::PAYLOAD_CAPACITY) fails to compile.
    /// The job does not run until it is submitted.
    pub fn create_job<T, F>(&self, body: F, data: T) -> JobId
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        self.create_job_as_child(JobId::INVALID, body, data)
    }

    /// Creates a job whose completion gates `parent`.
    ///
    /// The record is allocated from the calling thread's own pool, and the
    /// parent's unfinished counter is incremented before this returns, so
    /// the parent cannot reach zero until this child has finished.
    pub fn create_job_as_child<T, F>(&self, parent: JobId, body: F, data: T) -> JobId
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        let () = PayloadFits::<(F, T)>::CHECK;
        let (id, record) = self.allocate_record(Some(trampoline::<T, F>), parent);
        // Safety: the record was just initialized by this (owner) thread
        // and is not yet published; (F, T) fits per the check above.
        unsafe { ptr::write(record.payload_ptr() as *mut (F, T), (body, data)) };
        id
    }

    /// Creates a job with no body: a pure synchronization point. It must
    /// still be submitted like any other job; it finishes once it has run
    /// (a no-op) and all of its children have finished.
    pub fn create_empty_job(&self) -> JobId {
        self.create_empty_child(JobId::INVALID)
    }

    /// Bodiless child job; see [`create_empty_job`](Self::create_empty_job).
    pub fn create_empty_child(&self, parent: JobId) -> JobId {
        self.allocate_record(None, parent).0
    }

    fn allocate_record(&self, function: Option<RawJobFn>, parent: JobId) -> (JobId, &JobRecord) {
        let queue = &self.shared.queues[self.queue_index];
        let id = queue.allocate(self.queue_index as u16);
        let record = queue.record_at(id.slot());
        // Safety: owner thread, freshly retired slot.
        unsafe { record.init(function, parent) };

        if parent.is_valid() {
            match self.shared.record(parent) {
                Some(parent_record) => {
                    let prev = parent_record.unfinished.fetch_add(1, Ordering::Relaxed);
                    debug_assert!(prev > 0, "child created under already-finished {parent:?}");
                }
                None => {
                    debug_assert!(false, "child created under stale parent {parent:?}");
                    tracing::debug!(parent = ?parent, "ignoring stale parent at job creation");
                }
            }
        }

        #[cfg(feature = "metrics")]
        self.shared
            .metrics
            .jobs_created
            .fetch_add(1, Ordering::Relaxed);

        (id, record)
    }

    /// Registers `continuation` to be submitted automatically once
    /// `ancestor` (and all of its children) has finished.
    ///
    /// Fails with [`JobError::ContinuationLimit`] when the ancestor already
    /// carries [`MAX_CONTINUATIONS`] continuations, and with
    /// [`JobError::StaleJob`] when the ancestor identity has been consumed.
    /// On failure the caller still owns `continuation` and must dispose of
    /// it. The system will never submit it.
    ///
    /// A registration racing with the ancestor's completion still fires the
    /// continuation exactly once: whichever side both wrote the slot and
    /// observed the finished counter claims the submission atomically.
    pub fn add_continuation(&self, ancestor: JobId, continuation: JobId) -> Result<(), JobError> {
        debug_assert!(continuation.is_valid());
        let record = self
            .shared
            .record(ancestor)
            .ok_or(JobError::StaleJob(ancestor))?;

        let slot_index = record.continuation_count.fetch_add(1, Ordering::SeqCst) as usize;
        if slot_index >= MAX_CONTINUATIONS {
            record.continuation_count.fetch_sub(1, Ordering::SeqCst);
            return Err(JobError::ContinuationLimit(ancestor));
        }
        let slot = &record.continuations[slot_index];
        slot.store(continuation.encode(), Ordering::SeqCst);

        // The finish cascade may have scanned past this slot before the
        // store above. All four accesses involved (slot store, unfinished
        // load here; unfinished decrement, slot claim there) are SeqCst, so
        // at least one side observes the other; the claim bit makes the
        // handoff exactly-once.
        if record.unfinished.load(Ordering::SeqCst) <= 0 {
            let raw = slot.fetch_or(SLOT_CLAIMED_BIT, Ordering::SeqCst);
            if raw != SLOT_EMPTY && raw & SLOT_CLAIMED_BIT == 0 {
                self.submit(JobId::decode(raw));
            }
        }
        Ok(())
    }

    /// Pushes the job onto the calling thread's own queue and wakes
    /// sleeping workers. On queue overflow the job is dropped and the
    /// overflow logged; size the queue capacity for worst-case fan-out.
    pub fn submit(&self, id: JobId) {
        self.submit_one(id);
    }

    /// Batch submission. Returns how many jobs entered the queue.
    pub fn submit_all(&self, jobs: &[JobId]) -> usize {
        jobs.iter().filter(|&&id| self.submit_one(id)).count()
    }

    fn submit_one(&self, id: JobId) -> bool {
        if !id.is_valid() {
            debug_assert!(false, "submitting the invalid job id");
            return false;
        }
        let pushed = self.shared.queues[self.queue_index].push(id);
        if pushed {
            #[cfg(feature = "metrics")]
            self.shared
                .metrics
                .submissions
                .fetch_add(1, Ordering::Relaxed);
            self.shared.sleep.wake_all();
        } else {
            tracing::error!(job = ?id, queue = self.queue_index, "job queue overflow; job dropped");
            #[cfg(feature = "metrics")]
            self.shared
                .metrics
                .overflow_drops
                .fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }

    /// Victim selection: own queue first (owner pop), then the main queue,
    /// then peers starting from the rotating index. One full pass; `None`
    /// means "nothing found this round".
    pub(crate) fn get_job(&self) -> Option<JobId> {
        let queues = &self.shared.queues;
        if let Some(job) = queues[self.queue_index].pop() {
            return Some(job);
        }
        if self.queue_index != MAIN_QUEUE {
            if let Some(job) = queues[MAIN_QUEUE].steal() {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .steals_success
                    .fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
        }

        let start = self.rotation.get();
        self.rotation.set(start.wrapping_add(1));
        let queue_count = queues.len();
        for offset in 0..queue_count {
            let victim = (start + offset) % queue_count;
            if victim == self.queue_index || victim == MAIN_QUEUE {
                continue;
            }
            if let Some(job) = queues[victim].steal() {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .steals_success
                    .fetch_add(1, Ordering::Relaxed);
                return Some(job);
            }
        }

        #[cfg(feature = "metrics")]
        self.shared
            .metrics
            .steals_failed
            .fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Runs a job's body, then applies the finish cascade.
    pub(crate) fn execute(&self, id: JobId) {
        let Some(record) = self.shared.record(id) else {
            tracing::debug!(job = ?id, "record recycled before execution; job skipped");
            return;
        };
        // Safety: this thread received the job through the deque handoff,
        // which ordered the owner's record writes before our reads.
        if let Some(function) = unsafe { record.function() } {
            unsafe { function(self, id, record.payload_ptr() as *const u8) };
        }
        self.finish(id);

        #[cfg(feature = "metrics")]
        self.shared
            .metrics
            .jobs_executed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Finish cascade: decrement-and-check-zero exactly once, then cascade
    /// into the parent and hand registered continuations to this thread's
    /// queue.
    pub(crate) fn finish(&self, id: JobId) {
        let Some(record) = self.shared.record(id) else {
            return;
        };
        let previous = record.unfinished.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "finish cascade fired twice for {id:?}");
        if previous != 1 {
            return;
        }

        // This job and all of its children are done.
        // Safety: parent was written before the job was published.
        let parent = unsafe { record.parent() };
        if parent.is_valid() {
            self.finish(parent);
        }

        let count =
            (record.continuation_count.load(Ordering::SeqCst) as usize).min(MAX_CONTINUATIONS);
        for slot in &record.continuations[..count] {
            let raw = slot.fetch_or(SLOT_CLAIMED_BIT, Ordering::SeqCst);
            if raw != SLOT_EMPTY && raw & SLOT_CLAIMED_BIT == 0 {
                self.submit(JobId::decode(raw));
            }
        }
    }

    /// Cooperative wait: keeps pulling and executing jobs from the shared
    /// set of queues until the target (and every continuation registered on
    /// it) has finished. Only spins/yields when no work is discoverable.
    /// Never gives up: a potential-deadlock diagnostic is logged every
    /// ~100k empty rounds instead.
    ///
    /// After `wait` returns the identity is consumed; further operations on
    /// it are best-effort no-ops.
    pub fn wait(&self, id: JobId) {
        self.wait_counter(id);

        // A continuation must be observable as finished by the time waiting
        // on its ancestor returns. The claim bit preserves the encoded id
        // in the slot, so follow each one. Best-effort if the record has
        // already been recycled.
        let Some(record) = self.shared.record(id) else {
            return;
        };
        let count =
            (record.continuation_count.load(Ordering::SeqCst) as usize).min(MAX_CONTINUATIONS);
        for slot in &record.continuations[..count] {
            let raw = slot.load(Ordering::SeqCst);
            if raw != SLOT_EMPTY {
                self.wait(JobId::decode(raw & !SLOT_CLAIMED_BIT));
            }
        }
    }

    fn wait_counter(&self, id: JobId) {
        let mut empty_rounds: u64 = 0;
        let mut spins: u32 = 0;
        while !self.is_finished(id) {
            if let Some(job) = self.get_job() {
                self.execute(job);
                spins = 0;
            } else {
                empty_rounds += 1;
                if empty_rounds % DEADLOCK_REPORT_INTERVAL == 0 {
                    tracing::warn!(
                        job = ?id,
                        unfinished = self.unfinished_jobs(id),
                        empty_rounds,
                        "wait is not making progress; potential deadlock"
                    );
                    #[cfg(feature = "metrics")]
                    self.shared
                        .metrics
                        .deadlock_warnings
                        .fetch_add(1, Ordering::Relaxed);
                }
                if spins < WAIT_SPIN_LIMIT {
                    spins += 1;
                    std::hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
        }
    }

    pub(crate) fn is_finished(&self, id: JobId) -> bool {
        match self.shared.record(id) {
            // Recycled or invalid identities count as consumed.
            None => true,
            Some(record) => record.unfinished.load(Ordering::Acquire) <= 0,
        }
    }

    /// Atomic read of the job's unfinished counter. Returns 0 for consumed
    /// or invalid identities.
    pub fn unfinished_jobs(&self, id: JobId) -> i32 {
        self.shared
            .record(id)
            .map(|record| record.unfinished.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Number of continuations registered on the job. Returns 0 for
    /// consumed or invalid identities.
    pub fn continuation_count(&self, id: JobId) -> i32 {
        self.shared
            .record(id)
            .map(|record| {
                (record.continuation_count.load(Ordering::Relaxed) as usize)
                    .min(MAX_CONTINUATIONS) as i32
            })
            .unwrap_or(0)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// Monomorphized shim: recovers the typed `(body, data)` tuple from the
/// record's payload bytes.
unsafe fn trampoline<T, F>(ctx: &JobContext, id: JobId, payload: *const u8)
where
    T: Copy + Send + 'static,
    F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
{
    let env = unsafe { &*(payload as *const (F, T)) };
    (env.0)(ctx, id, &env.1);
}

/// The main job system managing worker threads and job execution.
///
/// The owning thread participates as queue index 0: every creation and
/// submission through `&JobSystem` uses that queue, and [`JobSystem::wait`]
/// drains work cooperatively from the whole system. Job bodies use their
/// [`JobContext`] instead.
#[derive(Debug)]
pub struct JobSystem {
    main: JobContext,
    workers: Vec<Worker>,
}

impl JobSystem {
    /// Creates a job system with the given number of worker threads
    /// (0 means one per detected processor; values are clamped to the
    /// processor count) and default configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use jobforge::JobSystem;
    ///
    /// let system = JobSystem::new(4);
    /// assert!(system.num_workers() >= 1);
    /// ```
    pub fn new(worker_threads: usize) -> Self {
        let config = JobSystemConfig {
            worker_threads,
            ..JobSystemConfig::default()
        };
        match Self::with_config(config) {
            Ok(system) => system,
            Err(err) => panic!("failed to start job system: {err}"),
        }
    }

    /// Creates a job system with one worker per detected processor.
    pub fn with_default_threads() -> Self {
        Self::new(0)
    }

    /// Creates a job system from an explicit configuration.
    pub fn with_config(config: JobSystemConfig) -> Result<Self, JobError> {
        config.validate()?;
        let worker_count = config.effective_workers();
        let shared = Shared::new(worker_count + 1, config.queue_capacity);

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            match Worker::spawn(index, Arc::clone(&shared), config.pinning) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    shared.sleep.request_quit();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "job system started"
        );
        Ok(JobSystem {
            main: JobContext::new(shared, MAIN_QUEUE),
            workers,
        })
    }

    /// The calling thread's context (queue 0).
    pub fn context(&self) -> &JobContext {
        &self.main
    }

    /// See [`JobContext::create_job`].
    pub fn create_job<T, F>(&self, body: F, data: T) -> JobId
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        self.main.create_job(body, data)
    }

    /// See [`JobContext::create_job_as_child`].
    pub fn create_job_as_child<T, F>(&self, parent: JobId, body: F, data: T) -> JobId
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        self.main.create_job_as_child(parent, body, data)
    }

    /// See [`JobContext::create_empty_job`].
    pub fn create_empty_job(&self) -> JobId {
        self.main.create_empty_job()
    }

    /// See [`JobContext::create_empty_child`].
    pub fn create_empty_child(&self, parent: JobId) -> JobId {
        self.main.create_empty_child(parent)
    }

    /// See [`JobContext::add_continuation`].
    pub fn add_continuation(&self, ancestor: JobId, continuation: JobId) -> Result<(), JobError> {
        self.main.add_continuation(ancestor, continuation)
    }

    /// See [`JobContext::submit`].
    pub fn submit(&self, id: JobId) {
        self.main.submit(id);
    }

    /// See [`JobContext::submit_all`].
    pub fn submit_all(&self, jobs: &[JobId]) -> usize {
        self.main.submit_all(jobs)
    }

    /// See [`JobContext::wait`].
    pub fn wait(&self, id: JobId) {
        self.main.wait(id);
    }

    /// See [`JobContext::unfinished_jobs`].
    pub fn unfinished_jobs(&self, id: JobId) -> i32 {
        self.main.unfinished_jobs(id)
    }

    /// See [`JobContext::continuation_count`].
    pub fn continuation_count(&self, id: JobId) -> i32 {
        self.main.continuation_count(id)
    }

    /// Returns the number of worker threads in the system.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Returns how many workers are currently executing jobs.
    pub fn active_workers(&self) -> usize {
        self.main
            .shared()
            .worker_states
            .iter()
            .filter(|state| state.load(Ordering::Relaxed) == STATE_RUNNING)
            .count()
    }

    /// Metrics snapshot (feature `metrics`).
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.main.shared().metrics.snapshot()
    }

    /// Shuts down the worker pool. Jobs still sitting in queues are
    /// dropped; wait on anything you care about first.
    ///
    /// Returns an error if any worker thread panicked.
    pub fn shutdown(mut self) -> Result<(), JobError> {
        let panicked = self.shutdown_impl();
        if panicked > 0 {
            Err(JobError::WorkerPanic(panicked))
        } else {
            Ok(())
        }
    }

    fn shutdown_impl(&mut self) -> usize {
        if self.workers.is_empty() {
            return 0;
        }
        self.main.shared().sleep.request_quit();
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            let index = worker.index();
            if worker.join().is_err() {
                panicked += 1;
                tracing::error!(worker = index, "worker panicked during execution");
            }
        }
        panicked
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        JobSystem::with_default_threads()
    }
}
