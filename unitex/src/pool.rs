//! Bounded task pool for blocking, CPU-bound work.
//!
//! One reusable abstraction used at two call sites with different
//! granularities: whole compression jobs, and block-range chunks inside
//! a single transcode unit. The two are never nested for the same
//! batch; the orchestrator picks exactly one strategy up front.

use rayon::prelude::*;
use thiserror::Error;

/// Error building the underlying thread pool.
#[derive(Debug, Error)]
#[error("failed to build task pool: {0}")]
pub struct PoolError(String);

/// A fixed-size pool of OS worker threads.
///
/// Sizing follows `min(detected hardware concurrency, cap)`, with a
/// floor of one thread. All submission calls block the caller until
/// every unit of work has completed (join-all semantics).
pub struct TaskPool {
    inner: rayon::ThreadPool,
    threads: usize,
}

impl TaskPool {
    /// Create a pool of `min(hardware_concurrency, cap)` threads.
    ///
    /// A `cap` of zero means "hardware concurrency".
    pub fn bounded(cap: u32) -> Result<Self, PoolError> {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let threads = if cap == 0 {
            hw
        } else {
            hw.min(cap as usize).max(1)
        };
        let inner = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("unitex-worker-{i}"))
            .build()
            .map_err(|e| PoolError(e.to_string()))?;
        Ok(Self { inner, threads })
    }

    /// Number of worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `f` over every item, blocking until all complete.
    ///
    /// Execution order across threads is unspecified; results are
    /// returned in submission order.
    pub fn run_ordered<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.inner
            .install(|| items.into_par_iter().map(f).collect())
    }

    /// Split `dst` into chunks of at most `chunk_len` bytes and run
    /// `f(chunk_index, chunk)` on each, joining before returning.
    ///
    /// Used for block-range sub-jobs inside one transcode unit; the
    /// first error (by chunk index) is returned.
    pub fn run_chunks<E, F>(&self, dst: &mut [u8], chunk_len: usize, f: F) -> Result<(), E>
    where
        E: Send,
        F: Fn(usize, &mut [u8]) -> Result<(), E> + Send + Sync,
    {
        debug_assert!(chunk_len > 0);
        self.inner.install(|| {
            dst.par_chunks_mut(chunk_len)
                .enumerate()
                .map(|(i, chunk)| f(i, chunk))
                .collect::<Result<(), E>>()
        })
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bounded_respects_cap() {
        let pool = TaskPool::bounded(1).unwrap();
        assert_eq!(pool.threads(), 1);
    }

    #[test]
    fn test_bounded_zero_means_hardware() {
        let pool = TaskPool::bounded(0).unwrap();
        assert!(pool.threads() >= 1);
    }

    #[test]
    fn test_run_ordered_preserves_submission_order() {
        let pool = TaskPool::bounded(4).unwrap();
        let items: Vec<u32> = (0..64).collect();
        let results = pool.run_ordered(items, |i| i * 2);
        let expected: Vec<u32> = (0..64).map(|i| i * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_run_ordered_executes_every_item() {
        let pool = TaskPool::bounded(2).unwrap();
        let counter = AtomicUsize::new(0);
        let results = pool.run_ordered((0..100).collect(), |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(results.len(), 100);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_run_chunks_covers_whole_buffer() {
        let pool = TaskPool::bounded(4).unwrap();
        let mut buf = vec![0u8; 1000];
        pool.run_chunks(&mut buf, 128, |_, chunk| {
            chunk.fill(0xAB);
            Ok::<(), ()>(())
        })
        .unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_run_chunks_propagates_error() {
        let pool = TaskPool::bounded(2).unwrap();
        let mut buf = vec![0u8; 512];
        let result = pool.run_chunks(&mut buf, 128, |i, _| if i == 2 { Err(i) } else { Ok(()) });
        assert_eq!(result, Err(2));
    }

    #[test]
    fn test_single_thread_pool_does_not_deadlock() {
        let pool = TaskPool::bounded(1).unwrap();
        let results = pool.run_ordered((0..32).collect(), |i: u32| i + 1);
        assert_eq!(results.len(), 32);
    }
}
