//! Ergonomic, move-only job handles.
//!
//! [`JobHandle`] wraps an opaque [`JobId`] together with the system that
//! issued it and tracks whether the job has entered a queue. Dropping a
//! plain handle detaches from the job (`release` semantics); the
//! [`ScopedJobHandle`] variant instead guarantees cancel-or-wait on drop so
//! a job is never silently abandoned while still outstanding.

use crate::error::JobError;
use crate::job::JobId;
use crate::job_system::{JobContext, JobSystem};

/// A move-only handle to a job.
///
/// Handles live on the thread that owns the [`JobSystem`]; job bodies use
/// their [`JobContext`] instead. Waiting on a handle that was never
/// submitted (and has no children finishing it) blocks forever. Cancel
/// such a handle instead of waiting on it.
pub struct JobHandle<'s> {
    system: &'s JobSystem,
    id: JobId,
    submitted: bool,
}

impl<'s> JobHandle<'s> {
    pub(crate) fn new(system: &'s JobSystem, id: JobId) -> Self {
        JobHandle {
            system,
            id,
            submitted: false,
        }
    }

    /// The underlying identity.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// False once the handle has been consumed by `wait`, `cancel` or
    /// `release`.
    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Creates a child job gating this one.
    pub fn child<T, F>(&self, body: F, data: T) -> JobHandle<'s>
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        JobHandle::new(self.system, self.system.create_job_as_child(self.id, body, data))
    }

    /// Bodiless child job (pure synchronization point).
    pub fn empty_child(&self) -> JobHandle<'s> {
        JobHandle::new(self.system, self.system.create_empty_child(self.id))
    }

    /// Creates a job and registers it to run once this job (and all of its
    /// children) has finished. The returned handle must not be submitted;
    /// the finish cascade owns its submission.
    ///
    /// On a full continuation array the freshly created job is discarded
    /// (never submitted) and the error returned.
    pub fn continuation<T, F>(&self, body: F, data: T) -> Result<JobHandle<'s>, JobError>
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        let id = self.system.create_job(body, data);
        self.system.add_continuation(self.id, id)?;
        let mut handle = JobHandle::new(self.system, id);
        // Submission belongs to the cascade; mark it so scoped drops wait
        // instead of cancelling.
        handle.submitted = true;
        Ok(handle)
    }

    /// Pushes the job onto the calling thread's queue. Submitting twice or
    /// submitting a consumed handle is a no-op.
    pub fn submit(&mut self) {
        if self.id.is_valid() && !self.submitted {
            self.system.submit(self.id);
            self.submitted = true;
        }
    }

    /// Batch submission; returns how many handles were newly submitted.
    pub fn submit_batch(handles: &mut [JobHandle<'_>]) -> usize {
        let mut submitted = 0;
        for handle in handles.iter_mut() {
            if handle.id.is_valid() && !handle.submitted {
                handle.submit();
                submitted += 1;
            }
        }
        submitted
    }

    /// Cooperatively waits until the job and its continuations have
    /// finished, consuming the handle.
    pub fn wait(mut self) {
        if self.id.is_valid() {
            self.system.wait(self.id);
            self.id = JobId::INVALID;
        }
    }

    /// Best-effort cancellation: succeeds only when the job can still be
    /// prevented from running, i.e. it was never submitted. Otherwise the
    /// handle is returned and the caller must wait on it.
    pub fn cancel(mut self) -> Result<(), JobHandle<'s>> {
        if !self.id.is_valid() || !self.submitted {
            // Never entered a queue; it will simply never execute.
            self.id = JobId::INVALID;
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Detaches from the job without waiting. Equivalent to dropping the
    /// handle.
    pub fn release(mut self) {
        self.id = JobId::INVALID;
    }

    /// Converts into the RAII variant that cancels-or-waits on drop.
    pub fn scoped(self) -> ScopedJobHandle<'s> {
        ScopedJobHandle { inner: Some(self) }
    }
}

impl std::fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("submitted", &self.submitted)
            .finish()
    }
}

/// RAII job handle: on drop, an unsubmitted job is cancelled and a
/// submitted one is waited for, so no job outcome is silently lost.
pub struct ScopedJobHandle<'s> {
    inner: Option<JobHandle<'s>>,
}

impl<'s> ScopedJobHandle<'s> {
    pub fn id(&self) -> JobId {
        self.inner.as_ref().map(JobHandle::id).unwrap_or(JobId::INVALID)
    }

    pub fn is_valid(&self) -> bool {
        self.inner.as_ref().is_some_and(JobHandle::is_valid)
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.as_ref().is_some_and(JobHandle::is_submitted)
    }

    /// See [`JobHandle::submit`].
    pub fn submit(&mut self) {
        if let Some(handle) = self.inner.as_mut() {
            handle.submit();
        }
    }

    /// See [`JobHandle::wait`].
    pub fn wait(mut self) {
        if let Some(handle) = self.inner.take() {
            handle.wait();
        }
    }

    /// Best-effort cancel. When the job is already submitted this waits
    /// for it instead and returns false, upholding the scoped guarantee.
    pub fn cancel(mut self) -> bool {
        match self.inner.take() {
            Some(handle) => match handle.cancel() {
                Ok(()) => true,
                Err(handle) => {
                    handle.wait();
                    false
                }
            },
            None => true,
        }
    }
}

impl Drop for ScopedJobHandle<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take() {
            if handle.is_submitted() && handle.is_valid() {
                handle.wait();
            }
            // Unsubmitted: dropping the handle is the cancellation.
        }
    }
}

impl JobSystem {
    /// Creates a job and returns a handle to it.
    pub fn job<T, F>(&self, body: F, data: T) -> JobHandle<'_>
    where
        T: Copy + Send + 'static,
        F: Fn(&JobContext, JobId, &T) + Copy + Send + 'static,
    {
        JobHandle::new(self, self.create_job(body, data))
    }

    /// Creates a bodiless job and returns a handle to it.
    pub fn empty_job(&self) -> JobHandle<'_> {
        JobHandle::new(self, self.create_empty_job())
    }
}
