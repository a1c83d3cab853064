//! Parallel-for built entirely on child jobs and submission.
//!
//! A range job bisects its slice while the [`Splitter`] policy says to,
//! creating the halves as children of itself; leaves process their
//! elements inline. The entry point waits on the root before returning,
//! which is what makes handing raw subrange pointers to jobs sound.

use crate::job::JobId;
use crate::job_system::{JobContext, JobSystem};
use std::marker::PhantomData;

/// Policy deciding when a range is still worth bisecting.
pub trait Splitter: Copy + Send + 'static {
    fn should_split(&self, count: usize) -> bool;
}

/// Splits while a range holds more than `threshold` elements.
#[derive(Clone, Copy, Debug)]
pub struct CountSplitter {
    threshold: usize,
}

impl CountSplitter {
    pub fn new(threshold: usize) -> Self {
        CountSplitter {
            threshold: threshold.max(1),
        }
    }
}

impl Default for CountSplitter {
    fn default() -> Self {
        CountSplitter::new(64)
    }
}

impl Splitter for CountSplitter {
    fn should_split(&self, count: usize) -> bool {
        count > self.threshold
    }
}

/// Splits while a range spans more than `max_bytes` of element data,
/// keeping leaves cache-sized regardless of the element type.
pub struct DataSizeSplitter<T> {
    max_bytes: usize,
    _elem: PhantomData<fn() -> T>,
}

impl<T> DataSizeSplitter<T> {
    pub fn new(max_bytes: usize) -> Self {
        DataSizeSplitter {
            max_bytes: max_bytes.max(1),
            _elem: PhantomData,
        }
    }
}

// Manual impls to avoid a T: Copy/Clone bound.
impl<T> Copy for DataSizeSplitter<T> {}
impl<T> Clone for DataSizeSplitter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Splitter for DataSizeSplitter<T> {
    fn should_split(&self, count: usize) -> bool {
        count * std::mem::size_of::<T>() > self.max_bytes
    }
}

/// One contiguous subrange of the slice being processed. Lives inline in
/// the job payload.
struct SliceTask<T, F, S> {
    data: *mut T,
    len: usize,
    body: F,
    splitter: S,
}

impl<T, F: Copy, S: Copy> Copy for SliceTask<T, F, S> {}
impl<T, F: Copy, S: Copy> Clone for SliceTask<T, F, S> {
    fn clone(&self) -> Self {
        *self
    }
}

// Safety: tasks partition the slice into disjoint subranges, and the
// parallel_for entry keeps the slice borrowed until the root is waited on.
unsafe impl<T: Send, F: Send, S: Send> Send for SliceTask<T, F, S> {}

fn split_range<T, F, S>(ctx: &JobContext, id: JobId, task: &SliceTask<T, F, S>)
where
    T: Send + 'static,
    F: Fn(&mut T) + Copy + Send + 'static,
    S: Splitter,
{
    if task.len > 1 && task.splitter.should_split(task.len) {
        let mid = task.len / 2;
        let left = SliceTask {
            data: task.data,
            len: mid,
            body: task.body,
            splitter: task.splitter,
        };
        let right = SliceTask {
            data: unsafe { task.data.add(mid) },
            len: task.len - mid,
            body: task.body,
            splitter: task.splitter,
        };
        let left_job = ctx.create_job_as_child(id, split_range::<T, F, S>, left);
        ctx.submit(left_job);
        let right_job = ctx.create_job_as_child(id, split_range::<T, F, S>, right);
        ctx.submit(right_job);
    } else {
        // Safety: this leaf's subrange is disjoint from every other task's.
        let slice = unsafe { std::slice::from_raw_parts_mut(task.data, task.len) };
        for item in slice {
            (task.body)(item);
        }
    }
}

impl JobContext {
    /// Applies `body` to every element of `data` in parallel, bisecting
    /// the slice into child jobs per `splitter`. Blocks (cooperatively,
    /// executing other jobs) until the whole slice is processed.
    pub fn parallel_for<T, F, S>(&self, data: &mut [T], splitter: S, body: F)
    where
        T: Send + 'static,
        F: Fn(&mut T) + Copy + Send + 'static,
        S: Splitter,
    {
        if data.is_empty() {
            return;
        }
        let task = SliceTask {
            data: data.as_mut_ptr(),
            len: data.len(),
            body,
            splitter,
        };
        let root = self.create_job(split_range::<T, F, S>, task);
        self.submit(root);
        self.wait(root);
    }
}

impl JobSystem {
    /// See [`JobContext::parallel_for`].
    pub fn parallel_for<T, F, S>(&self, data: &mut [T], splitter: S, body: F)
    where
        T: Send + 'static,
        F: Fn(&mut T) + Copy + Send + 'static,
        S: Splitter,
    {
        self.context().parallel_for(data, splitter, body);
    }
}

/// Slice sugar over [`JobSystem::parallel_for`] with the default count
/// splitter.
pub trait ParallelSliceMut<T> {
    fn par_apply<F>(&mut self, system: &JobSystem, body: F)
    where
        F: Fn(&mut T) + Copy + Send + 'static;
}

impl<T: Send + 'static> ParallelSliceMut<T> for [T] {
    fn par_apply<F>(&mut self, system: &JobSystem, body: F)
    where
        F: Fn(&mut T) + Copy + Send + 'static,
    {
        system.parallel_for(self, CountSplitter::default(), body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_splitter() {
        let splitter = CountSplitter::new(500);
        assert!(splitter.should_split(501));
        assert!(!splitter.should_split(500));
        assert!(!splitter.should_split(0));
    }

    #[test]
    fn test_count_splitter_floors_at_one() {
        let splitter = CountSplitter::new(0);
        assert!(!splitter.should_split(1));
        assert!(splitter.should_split(2));
    }

    #[test]
    fn test_data_size_splitter() {
        let splitter = DataSizeSplitter::<u64>::new(64);
        assert!(!splitter.should_split(8)); // 64 bytes
        assert!(splitter.should_split(9)); // 72 bytes
    }
}
