//! Per-worker lock-free job queue.
//!
//! Each worker thread owns one [`JobQueue`]: a Chase-Lev style circular
//! double-ended queue of encoded job ids, backed by a fixed pool of job
//! records allocated round-robin from the same capacity. The owner pushes
//! and pops at the bottom (LIFO, cache-friendly); any other thread steals
//! from the top (FIFO relative to stealers). `bottom` is written only by
//! the owner; `top` only advances through a compare-and-swap race between
//! stealers and the owner's pop on the single-element boundary.
//!
//! Pool slots are recycled purely by allocation count modulo capacity. A
//! generation counter per record lets observers detect a recycled identity.
//! A job still unfinished when its slot is lapped is a capacity
//! misconfiguration; size queues for worst-case fan-out.

use crate::job::{JobId, JobRecord};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};

/// A fixed-capacity work-stealing deque plus its backing record pool.
#[derive(Debug)]
pub(crate) struct JobQueue {
    /// Next slot the owner pushes into. Owner-write only.
    bottom: CachePadded<AtomicI64>,
    /// Oldest pending entry. Advanced via CAS by stealers and by the
    /// owner's pop when closing out the last element.
    top: CachePadded<AtomicI64>,
    ring: Box<[AtomicU64]>,
    mask: i64,
    pool: Box<[JobRecord]>,
    /// Monotonic allocation counter for the record pool. Owner-only, kept
    /// atomic so the queue stays `Sync`; relaxed is sufficient.
    allocated: AtomicU64,
}

impl JobQueue {
    /// `capacity` must be a power of two no larger than `1 << 16`
    /// (validated by the system's configuration).
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!((2..=1 << 16).contains(&capacity));
        JobQueue {
            bottom: CachePadded::new(AtomicI64::new(0)),
            top: CachePadded::new(AtomicI64::new(0)),
            ring: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            mask: capacity as i64 - 1,
            pool: (0..capacity).map(|_| JobRecord::new()).collect(),
            allocated: AtomicU64::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.ring.len()
    }

    pub(crate) fn record(&self, slot: usize) -> Option<&JobRecord> {
        self.pool.get(slot)
    }

    /// For slots produced by [`JobQueue::allocate`]; panics on an out of
    /// range slot.
    pub(crate) fn record_at(&self, slot: usize) -> &JobRecord {
        &self.pool[slot]
    }

    /// Allocates the next record slot from the pool and retires whatever
    /// logical job previously lived there. Owner thread only.
    ///
    /// Returns the freshly issued identity; the record itself still needs
    /// [`JobRecord::init`] before publication.
    pub(crate) fn allocate(&self, queue_index: u16) -> JobId {
        let count = self.allocated.fetch_add(1, Ordering::Relaxed);
        let slot = (count & self.mask as u64) as usize;
        let record = &self.pool[slot];
        if record.unfinished.load(Ordering::Relaxed) > 0 && count >= self.capacity() as u64 {
            // Slot lapped while its job is still live. See module docs.
            tracing::error!(
                queue = queue_index,
                slot,
                "job record recycled while still unfinished; queue capacity too small"
            );
        }
        let generation = record.bump_generation();
        JobId::new(queue_index, slot as u16, generation)
    }

    /// Appends a job at the bottom. Owner thread only.
    ///
    /// Returns false when the ring is full; the caller drops the job and
    /// reports the overflow.
    pub(crate) fn push(&self, job: JobId) -> bool {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b - t >= self.ring.len() as i64 {
            return false;
        }
        self.ring[(b & self.mask) as usize].store(job.encode(), Ordering::Relaxed);
        // Publish the entry (and the record the owner just initialized)
        // before making it visible to stealers.
        self.bottom.store(b + 1, Ordering::Release);
        true
    }

    /// Removes the most recently pushed job. Owner thread only.
    pub(crate) fn pop(&self) -> Option<JobId> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        // Full fence: the speculative bottom decrement must be ordered
        // before re-reading top, or a concurrent steal could hand the same
        // job to two threads.
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t <= b {
            let raw = self.ring[(b & self.mask) as usize].load(Ordering::Relaxed);
            if t != b {
                // More than one entry left; no race possible.
                return Some(JobId::decode(raw));
            }
            // Exactly one entry: win the CAS on top against stealers or
            // concede the job. Either way the deque ends up empty and
            // bottom is reset to the canonical empty position.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(t + 1, Ordering::Relaxed);
            if won {
                return Some(JobId::decode(raw));
            }
            return None;
        }

        // Queue was already empty; undo the decrement.
        self.bottom.store(b + 1, Ordering::Relaxed);
        None
    }

    /// Takes the oldest pending job. Callable from any thread.
    ///
    /// A `None` may mean the queue is empty or that the caller lost a race
    /// to another stealer or the owner; callers retry against a different
    /// victim rather than spinning here.
    pub(crate) fn steal(&self) -> Option<JobId> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);
        if t < b {
            let raw = self.ring[(t & self.mask) as usize].load(Ordering::Relaxed);
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(JobId::decode(raw));
            }
        }
        None
    }

    /// Approximate number of pending entries; owner-side snapshot.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }
}
