//! Execution strategies for block fetches

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::buffer::NumericArray;
use super::lazy::BlockTask;
use crate::config::ExecutorConfig;
use crate::error::{CatalogError, Result};

/// Runs a batch of block tasks, returning results in task order
pub trait BlockExecutor: Send + Sync {
    fn execute(&self, tasks: &[&BlockTask]) -> Result<Vec<NumericArray>>;

    fn name(&self) -> &'static str;
}

/// Fetch blocks one after another on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl BlockExecutor for SequentialExecutor {
    fn execute(&self, tasks: &[&BlockTask]) -> Result<Vec<NumericArray>> {
        tasks.iter().map(|task| task.run()).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Fetch blocks concurrently on a dedicated rayon pool
pub struct ThreadPoolExecutor {
    pool: ThreadPool,
}

impl ThreadPoolExecutor {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("orbit-catalog-fetch-{}", index))
            .build()
            .map_err(|e| CatalogError::Config(format!("Failed to build thread pool: {}", e)))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl BlockExecutor for ThreadPoolExecutor {
    fn execute(&self, tasks: &[&BlockTask]) -> Result<Vec<NumericArray>> {
        self.pool
            .install(|| tasks.par_iter().map(|task| task.run()).collect())
    }

    fn name(&self) -> &'static str {
        "thread-pool"
    }
}

/// Build the executor selected in configuration
pub fn executor_from_config(config: &ExecutorConfig) -> Result<Box<dyn BlockExecutor>> {
    match config {
        ExecutorConfig::Sequential => Ok(Box::new(SequentialExecutor)),
        ExecutorConfig::Threads { threads } => Ok(Box::new(ThreadPoolExecutor::new(*threads)?)),
    }
}
