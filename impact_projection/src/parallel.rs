//! Parallel execution of independent batches
//!
//! Each batch owns its pval store, its model state and its output directory,
//! so batches share nothing mutable and can run in any order on any thread.
//!
//! # Example
//!
//! ```rust
//! use impact_projection::parallel::{ParallelRunner, log_progress_reporter};
//!
//! let results = ParallelRunner::new(8, |batch| batch * 2)
//!     .progress(log_progress_reporter(4))
//!     .num_threads(2)
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(results.len(), 8);
//! assert_eq!(results[3], Ok(6));
//! ```
//!
//! # Error Handling
//!
//! A panic inside one batch is caught and returned as `Err(String)` in that
//! batch's slot; the other batches keep running.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::info;
use rayon::prelude::*;

use crate::error::ProjectionError;

/// Runs `num_batches` calls of `job` in parallel, results in batch order
pub struct ParallelRunner<F> {
    num_batches: usize,
    job: F,
    num_threads: Option<usize>,
    progress_callback: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl<F> ParallelRunner<F> {
    pub fn new<R>(num_batches: usize, job: F) -> Self
    where
        F: Fn(usize) -> R + Send + Sync,
    {
        ParallelRunner {
            num_batches,
            job,
            num_threads: None,
            progress_callback: None,
        }
    }

    /// Use a dedicated pool of `n` threads instead of rayon's global pool
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Called with `(completed, total)` after each batch
    pub fn progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Run every batch; a panicking batch yields `Err` with the panic message
    pub fn run<R>(self) -> Result<Vec<Result<R, String>>, ProjectionError>
    where
        F: Fn(usize) -> R + Send + Sync,
        R: Send,
    {
        let progress_counter = AtomicUsize::new(0);

        let pool = match self.num_threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| ProjectionError::Config(format!("thread pool: {e}")))?,
            ),
            None => None,
        };

        let execute = || {
            (0..self.num_batches)
                .into_par_iter()
                .map(|batch| {
                    let result =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.job)(batch)));

                    let completed = progress_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(completed, self.num_batches);
                    }

                    result.map_err(|panic| {
                        if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        }
                    })
                })
                .collect()
        };

        Ok(match pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        })
    }
}

/// Progress callback logging every `interval` batches and the last one
pub fn log_progress_reporter(interval: usize) -> impl Fn(usize, usize) + Send + Sync {
    let interval = interval.max(1);
    move |completed, total| {
        if completed % interval == 0 || completed == total {
            info!("Completed {}/{} batches", completed, total);
        }
    }
}
