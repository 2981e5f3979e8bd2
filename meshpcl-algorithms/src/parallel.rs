//! Bounded worker pools for the parallel pipeline stages
//!
//! Every stage that runs in parallel builds its own small pool from a
//! [`WorkerPoolConfig`] instead of sharing a process-wide one. Work is always
//! split over disjoint output slots, so workers never need locks.

use meshpcl_core::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Smallest pool a stage will run with
pub const MIN_WORKERS: usize = 3;
/// Largest pool a stage will run with
pub const MAX_WORKERS: usize = 8;
/// Worker count used when none is configured
pub const DEFAULT_WORKERS: usize = 4;

/// Thread pool configuration for a parallel stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker threads, clamped to `MIN_WORKERS..=MAX_WORKERS`
    pub workers: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Inputs shorter than this are processed on the calling thread
    pub min_parallel_len: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            thread_name_prefix: "meshpcl-worker".to_string(),
            min_parallel_len: 64,
        }
    }
}

impl WorkerPoolConfig {
    /// Set number of threads
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Worker count after clamping to the supported range
    pub fn effective_workers(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }
}

/// A small fixed-size pool owned by one pipeline stage
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
    min_parallel_len: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers())
            .finish()
    }
}

impl WorkerPool {
    /// Build a pool from its configuration
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().num_threads(config.effective_workers());
        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        let pool = builder
            .build()
            .map_err(|e| Error::config(format!("failed to create worker pool: {}", e)))?;

        Ok(Self {
            pool: Arc::new(pool),
            min_parallel_len: config.min_parallel_len,
        })
    }

    /// Build a pool with `workers` threads and default settings
    pub fn with_workers(workers: usize) -> Result<Self> {
        Self::new(&WorkerPoolConfig::default().with_workers(workers))
    }

    /// Number of threads in the pool
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool
    pub fn install<F, R>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Map every element to one output slot, keeping order
    pub fn map<T, U, F>(&self, data: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        if data.len() < self.min_parallel_len {
            return data.iter().map(f).collect();
        }
        self.install(|| data.par_iter().map(f).collect())
    }

    /// Map `0..len` to one output slot per index, keeping order
    pub fn map_range<U, F>(&self, len: usize, f: F) -> Vec<U>
    where
        U: Send,
        F: Fn(usize) -> U + Sync + Send,
    {
        if len < self.min_parallel_len {
            return (0..len).map(f).collect();
        }
        self.install(|| (0..len).into_par_iter().map(f).collect())
    }

    /// Fill `out` in blocks of `block_len` elements; `f` receives the block
    /// index and the block, which no other worker touches
    pub fn for_each_block<T, F>(&self, out: &mut [T], block_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let block_len = block_len.max(1);
        self.install(|| {
            out.par_chunks_mut(block_len)
                .enumerate()
                .for_each(|(block, chunk)| f(block, chunk))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_is_clamped() {
        assert_eq!(WorkerPoolConfig::default().with_workers(1).effective_workers(), MIN_WORKERS);
        assert_eq!(WorkerPoolConfig::default().with_workers(64).effective_workers(), MAX_WORKERS);
        let pool = WorkerPool::with_workers(5).unwrap();
        assert_eq!(pool.workers(), 5);
    }

    #[test]
    fn threads_carry_the_stage_prefix() {
        let config = WorkerPoolConfig::default().with_thread_name_prefix("meshpcl-normals");
        let pool = WorkerPool::new(&config).unwrap();
        let name = pool.install(|| std::thread::current().name().map(str::to_owned));
        assert!(name.is_some_and(|n| n.starts_with("meshpcl-normals-")));
    }

    #[test]
    fn map_keeps_order() {
        let pool = WorkerPool::with_workers(4).unwrap();
        let data: Vec<usize> = (0..1000).collect();
        let doubled = pool.map(&data, |x| x * 2);
        assert!(doubled.iter().enumerate().all(|(i, &v)| v == i * 2));
        let squares = pool.map_range(10, |i| i * i);
        assert_eq!(squares[9], 81);
    }

    #[test]
    fn blocks_write_disjoint_slots() {
        let pool = WorkerPool::with_workers(3).unwrap();
        let mut out = vec![0usize; 103];
        pool.for_each_block(&mut out, 10, |block, chunk| {
            for (i, slot) in chunk.iter_mut().enumerate() {
                *slot = block * 10 + i;
            }
        });
        assert!(out.iter().enumerate().all(|(i, &v)| v == i));
    }
}
