//! # jobforge - Work-Stealing Job System
//!
//! A fixed-capacity, lock-free work-stealing job scheduler that fans
//! fine-grained units of work ("jobs") across a pool of worker threads.
//! Each worker owns a Chase-Lev style double-ended queue: the owner pushes
//! and pops from the bottom while any other thread may steal from the top.
//!
//! ## Architecture
//!
//! - **Job records**: fixed-size slots holding an erased body function and
//!   a small inline payload, tracked by an atomic "unfinished" counter
//! - **Job queues**: one lock-free deque plus record pool per worker thread
//!   (the calling thread owns queue 0)
//! - **Hierarchies**: child jobs gate the completion of their parent
//! - **Continuations**: jobs submitted automatically once another job and
//!   all of its children have finished
//! - **Cooperative waiting**: a thread waiting on a job keeps executing
//!   other pending jobs instead of blocking
//!
//! ## Example
//!
//! ```no_run
//! use jobforge::JobSystem;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let system = JobSystem::new(4); // 4 worker threads
//!
//! let total: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
//! let job = system.create_job(
//!     |_ctx, _id, out: &&AtomicUsize| {
//!         out.fetch_add(1, Ordering::Relaxed);
//!     },
//!     total,
//! );
//! system.submit(job);
//! system.wait(job);
//! assert_eq!(total.load(Ordering::Relaxed), 1);
//! ```

pub mod deque;
pub mod error;
pub mod handle;
pub mod job;
pub mod job_system;
pub mod metrics;
pub mod parallel;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

pub use error::JobError;
pub use handle::{JobHandle, ScopedJobHandle};
pub use job::{JobId, MAX_CONTINUATIONS, PAYLOAD_CAPACITY};
pub use job_system::{JobContext, JobSystem, JobSystemConfig};
pub use parallel::{CountSplitter, DataSizeSplitter, ParallelSliceMut, Splitter};

#[cfg(feature = "metrics")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(test)]
mod tests;
