//! Worker thread implementation.
//!
//! Each worker owns one queue (index `worker + 1`; queue 0 belongs to the
//! calling thread) and cycles through a small state machine: WAITING on the
//! shared condition variable, RUNNING a get-job/execute loop, and back to
//! WAITING after one full victim pass finds nothing. Unlike a cooperative
//! `wait`, idle workers sleep instead of spinning and rely on the next
//! submit broadcast.

use crate::job_system::{JobContext, Shared};
use crate::{JobError, PinningStrategy};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) const STATE_WAITING: u8 = 0;
pub(crate) const STATE_RUNNING: u8 = 1;
pub(crate) const STATE_SHUTTING_DOWN: u8 = 2;

#[derive(Debug)]
struct WakeState {
    /// Bumped on every submit. Workers compare against their last seen
    /// value before sleeping, so a submit landing between "queues drained"
    /// and "condvar wait" is never lost.
    version: u64,
    quit: bool,
}

/// Condition-variable wake channel between submitters and idle workers.
#[derive(Debug)]
pub(crate) struct Sleep {
    state: Mutex<WakeState>,
    condvar: Condvar,
}

impl Sleep {
    pub(crate) fn new() -> Self {
        Sleep {
            state: Mutex::new(WakeState {
                version: 0,
                quit: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Broadcast wake after new work was submitted.
    pub(crate) fn wake_all(&self) {
        {
            let mut state = self.state.lock();
            state.version = state.version.wrapping_add(1);
        }
        self.condvar.notify_all();
    }

    pub(crate) fn request_quit(&self) {
        {
            let mut state = self.state.lock();
            state.quit = true;
        }
        self.condvar.notify_all();
    }

    /// Blocks until the wake version moves past `seen` or shutdown is
    /// requested. Returns false on shutdown.
    fn wait_for_work(&self, seen: &mut u64) -> bool {
        let mut state = self.state.lock();
        while state.version == *seen && !state.quit {
            self.condvar.wait(&mut state);
        }
        if state.quit {
            return false;
        }
        *seen = state.version;
        true
    }
}

/// A worker thread executing jobs from the shared queue set.
#[derive(Debug)]
pub(crate) struct Worker {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns worker `index`, owner of queue `index + 1`.
    pub(crate) fn spawn(
        index: usize,
        shared: Arc<Shared>,
        pinning: PinningStrategy,
    ) -> Result<Worker, JobError> {
        let handle = thread::Builder::new()
            .name(format!("jobforge-worker-{index}"))
            .spawn(move || {
                pin_current(index, pinning);
                let ctx = JobContext::new(Arc::clone(&shared), index + 1);
                Worker::run(index, ctx, shared);
            })?;

        Ok(Worker {
            index,
            handle: Some(handle),
        })
    }

    fn run(index: usize, ctx: JobContext, shared: Arc<Shared>) {
        tracing::debug!(worker = index, "worker started");
        let state = &shared.worker_states[index];
        let mut seen = 0u64;

        loop {
            state.store(STATE_WAITING, Ordering::Relaxed);
            if !shared.sleep.wait_for_work(&mut seen) {
                break;
            }

            state.store(STATE_RUNNING, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            shared.metrics.wakeups.fetch_add(1, Ordering::Relaxed);

            while let Some(job) = ctx.get_job() {
                ctx.execute(job);
            }
            // Full pass found nothing: back to sleep rather than spin.
        }

        state.store(STATE_SHUTTING_DOWN, Ordering::Relaxed);
        tracing::debug!(worker = index, "worker shut down");
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Waits for the worker thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn pin_current(index: usize, pinning: PinningStrategy) {
    let target = match pinning {
        PinningStrategy::None => return,
        PinningStrategy::Linear => index,
        PinningStrategy::AvoidSMT => index * 2,
    };
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if target < core_ids.len() {
            core_affinity::set_for_current(core_ids[target]);
        }
    }
}
