//! Error types for the job system.

use crate::job::JobId;
use thiserror::Error;

/// Errors surfaced by the job system.
///
/// Lost steal/pop races are never reported here; they are expected
/// contention and show up as "no job found this round".
#[derive(Debug, Error)]
pub enum JobError {
    /// Queue capacity must be a power of two within the supported range.
    #[error("queue capacity {0} is not a power of two in [2, 65536]")]
    InvalidCapacity(usize),

    /// The job already carries the maximum number of continuations. The
    /// caller owns the rejected continuation and must dispose of it (it
    /// will never be submitted automatically).
    #[error("continuation limit reached for job {0:?}")]
    ContinuationLimit(JobId),

    /// The identity refers to a job slot that has been recycled, or was
    /// never valid.
    #[error("stale or invalid job id {0:?}")]
    StaleJob(JobId),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// One or more worker threads panicked before shutdown completed.
    #[error("{0} worker thread(s) panicked")]
    WorkerPanic(usize),
}
