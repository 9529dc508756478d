//! Parallel-map capability injected into the tracker and assembler.
//!
//! Every executor returns results in input order, so downstream aggregation
//! never depends on scheduling.

use rayon::prelude::*;

use crate::error::{Error, Result};

pub trait Executor: Send + Sync {
    /// Apply `f` to every item, returning results in input order.
    fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send;

    /// Apply `f` to every index in `0..len`, returning results in order.
    fn map_indices<R, F>(&self, len: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send;

    fn worker_count(&self) -> usize;
}

/// Runs everything on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        items.iter().map(f).collect()
    }

    fn map_indices<R, F>(&self, len: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        (0..len).map(f).collect()
    }

    fn worker_count(&self) -> usize {
        1
    }
}

/// Bounded rayon pool owned by the executor.
#[derive(Debug)]
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

impl ThreadPoolExecutor {
    /// Build a pool with `worker_count` threads. 0 uses one thread per core.
    pub fn new(worker_count: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|i| format!("speckle-worker-{i}"))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        Ok(Self { pool })
    }
}

impl Executor for ThreadPoolExecutor {
    fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| items.par_iter().map(f).collect())
    }

    fn map_indices<R, F>(&self, len: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        self.pool.install(|| (0..len).into_par_iter().map(f).collect())
    }

    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}
