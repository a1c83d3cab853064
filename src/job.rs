//! Job identities and fixed-size job records.
//!
//! A job record is a plain, fixed-size slot: an erased body function, an
//! inline payload buffer, a parent reference, and the atomic counters that
//! drive the finish/continuation protocol. Records live in per-queue ring
//! pools and are never individually freed; a slot is recycled by bumping
//! its generation counter, which invalidates all outstanding [`JobId`]s
//! pointing at the old logical job.

use crate::job_system::JobContext;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

/// Inline payload capacity of a job record, in bytes.
///
/// Payloads are stored by value inside the record together with the job's
/// body; anything larger fails to compile (see [`PayloadFits`]).
pub const PAYLOAD_CAPACITY: usize = 128;

/// Maximum alignment supported by the inline payload buffer.
pub const PAYLOAD_ALIGN: usize = 16;

/// Maximum number of continuations that can be registered on one job.
pub const MAX_CONTINUATIONS: usize = 4;

/// Erased job body. The payload pointer aims at the `(body, data)` tuple
/// written by the creating thread.
pub(crate) type RawJobFn = unsafe fn(&JobContext, JobId, *const u8);

/// Opaque identity of a job: which queue owns its record, which slot it
/// occupies, and the slot generation it was allocated under.
///
/// A `JobId` does not own the job it names. Once the job has been waited
/// on (or its slot recycled) the identity is consumed and all further
/// operations on it are best-effort no-ops.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId {
    queue: u16,
    slot: u16,
    generation: u32,
}

impl JobId {
    /// The distinguished invalid identity. Generation 0 is never issued.
    pub const INVALID: JobId = JobId {
        queue: u16::MAX,
        slot: u16::MAX,
        generation: 0,
    };

    pub(crate) fn new(queue: u16, slot: u16, generation: u32) -> Self {
        JobId {
            queue,
            slot,
            generation,
        }
    }

    /// Returns true if this identity was ever issued by a queue.
    pub fn is_valid(&self) -> bool {
        self.generation != 0
    }

    pub(crate) fn queue(&self) -> usize {
        self.queue as usize
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the identity into a `u64` for atomic storage in deque rings
    /// and continuation slots. Valid ids always encode non-zero because
    /// generation 0 is never issued. Bit 63 stays clear (queue indices are
    /// bounded by the worker count) so it can serve as a claim marker.
    pub(crate) fn encode(self) -> u64 {
        debug_assert!(self.queue < 0x8000, "queue index overflows encoding");
        ((self.queue as u64) << 48) | ((self.slot as u64) << 32) | self.generation as u64
    }

    pub(crate) fn decode(raw: u64) -> JobId {
        JobId {
            queue: (raw >> 48) as u16,
            slot: (raw >> 32) as u16,
            generation: raw as u32,
        }
    }
}

impl std::fmt::Debug for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "JobId({}:{}#{})", self.queue, self.slot, self.generation)
        } else {
            write!(f, "JobId(invalid)")
        }
    }
}

/// Continuation slot sentinel: nothing registered yet.
pub(crate) const SLOT_EMPTY: u64 = 0;
/// Set on a continuation slot once the stored job has been handed off for
/// submission. The encoded id is preserved under the bit so waiters can
/// still follow it.
pub(crate) const SLOT_CLAIMED_BIT: u64 = 1 << 63;

#[repr(align(16))]
pub(crate) struct PayloadBuf(pub(crate) [u8; PAYLOAD_CAPACITY]);

/// Compile-time check that an erased `(body, data)` tuple fits the inline
/// payload buffer. Referencing `CHECK` in a generic function turns an
/// oversized payload into a build failure instead of a runtime fault.
pub(crate) struct PayloadFits<P>(PhantomData<P>);

impl<P> PayloadFits<P> {
    pub(crate) const CHECK: () = assert!(
        std::mem::size_of::<P>() <= PAYLOAD_CAPACITY
            && std::mem::align_of::<P>() <= PAYLOAD_ALIGN,
        "job payload exceeds the inline record capacity"
    );
}

/// One fixed-size job record.
///
/// Non-atomic fields are written by the allocating thread before the job is
/// published through its queue; the deque's release/acquire handoff makes
/// them visible to whichever thread pops or steals the job. The atomic
/// fields carry the cross-thread finish and continuation protocol.
#[repr(align(64))]
#[derive(Debug)]
pub(crate) struct JobRecord {
    function: UnsafeCell<Option<RawJobFn>>,
    parent: UnsafeCell<JobId>,
    payload: UnsafeCell<PayloadBuf>,
    /// 1 for the job itself plus 1 per outstanding child. Signed so that
    /// double-finish bugs are observable instead of wrapping.
    pub(crate) unfinished: AtomicI32,
    /// Bumped on every slot allocation; compared against `JobId::generation`
    /// to detect use of a recycled identity.
    pub(crate) generation: AtomicU32,
    pub(crate) continuation_count: AtomicU32,
    pub(crate) continuations: [AtomicU64; MAX_CONTINUATIONS],
}

// Safety: the UnsafeCell fields are only written by the owning thread
// before publication through the deque, and only read by the single
// executing thread afterwards; everything else is atomic.
unsafe impl Sync for JobRecord {}

impl JobRecord {
    pub(crate) fn new() -> Self {
        JobRecord {
            function: UnsafeCell::new(None),
            parent: UnsafeCell::new(JobId::INVALID),
            payload: UnsafeCell::new(PayloadBuf([0; PAYLOAD_CAPACITY])),
            unfinished: AtomicI32::new(0),
            generation: AtomicU32::new(0),
            continuation_count: AtomicU32::new(0),
            // AtomicU64::default() is 0 == SLOT_EMPTY
            continuations: Default::default(),
        }
    }

    /// Advances the slot generation, retiring whatever logical job lived
    /// here before. Generation 0 is skipped so it stays reserved for
    /// [`JobId::INVALID`].
    pub(crate) fn bump_generation(&self) -> u32 {
        let mut gen = self.generation.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if gen == 0 {
            gen = self.generation.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        }
        gen
    }

    /// Initializes the record for a freshly allocated logical job.
    ///
    /// # Safety
    ///
    /// Caller must be the owner thread of the queue holding this record,
    /// and the previous logical job in this slot must be retired.
    pub(crate) unsafe fn init(&self, function: Option<RawJobFn>, parent: JobId) {
        unsafe {
            *self.function.get() = function;
            *self.parent.get() = parent;
        }
        self.unfinished.store(1, Ordering::Relaxed);
        self.continuation_count.store(0, Ordering::Relaxed);
        for slot in &self.continuations {
            slot.store(SLOT_EMPTY, Ordering::Relaxed);
        }
    }

    /// # Safety
    ///
    /// Only meaningful on the thread executing the job, after the deque
    /// handoff established visibility of the owner's writes.
    pub(crate) unsafe fn function(&self) -> Option<RawJobFn> {
        unsafe { *self.function.get() }
    }

    /// # Safety
    ///
    /// Same visibility contract as [`JobRecord::function`].
    pub(crate) unsafe fn parent(&self) -> JobId {
        unsafe { *self.parent.get() }
    }

    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        self.payload.get() as *mut u8
    }
}
