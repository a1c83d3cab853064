#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional performance metrics for the job system.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Total job records allocated.
    pub jobs_created: AtomicU64,
    /// Total job bodies executed (including empty joins).
    pub jobs_executed: AtomicU64,
    /// Jobs that entered a queue.
    pub submissions: AtomicU64,
    /// Jobs dropped because their queue was full.
    pub overflow_drops: AtomicU64,
    /// Successful steals (main queue or peers).
    pub steals_success: AtomicU64,
    /// Full victim passes that found nothing.
    pub steals_failed: AtomicU64,
    /// Worker transitions from WAITING to RUNNING.
    pub wakeups: AtomicU64,
    /// Potential-deadlock diagnostics emitted by `wait`.
    pub deadlock_warnings: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_created: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
            overflow_drops: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_failed: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            deadlock_warnings: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_failed: self.steals_failed.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            deadlock_warnings: self.deadlock_warnings.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_executed: u64,
    pub submissions: u64,
    pub overflow_drops: u64,
    pub steals_success: u64,
    pub steals_failed: u64,
    pub wakeups: u64,
    pub deadlock_warnings: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximates jobs created but not yet executed.
    pub fn jobs_in_flight(&self) -> i64 {
        self.jobs_created as i64 - self.jobs_executed as i64
    }
}
