//! Drives a set of tasks to completion.
//!
//! The engine itself doesn't care which worker runs which task or in what
//! order. [`SerialExecutor`] runs them one after another on the calling
//! thread (in the order given, which is handy for reproducing a specific
//! merge order). [`PooledExecutor`] runs them on a dedicated rayon pool.

use crate::config::ExecConfig;
use crate::error::Error;
use crate::task::Task;
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};

pub trait Executor {
    /// Executes every task with the function variant `function_id`.
    ///
    /// Each task uses its own batch size. When tasks fail, one of the errors
    /// is returned after the remaining tasks have finished.
    fn run(&mut self, tasks: &[Box<dyn Task>], function_id: u32) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SerialExecutor;

impl Executor for SerialExecutor {
    fn run(&mut self, tasks: &[Box<dyn Task>], function_id: u32) -> Result<(), Error> {
        for task in tasks {
            task.execute(function_id, task.batch_size().get())?;
        }
        Ok(())
    }
}

pub struct PooledExecutor {
    pool: rayon::ThreadPool,
}

impl std::fmt::Debug for PooledExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledExecutor")
            .field("n_workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl PooledExecutor {
    pub fn new(n_workers: NonZeroUsize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers.get())
            .thread_name(|idx| format!("vectask-worker-{idx}"))
            .build()
            .map_err(|err| {
                tracing::error!(%err, "failed to build the worker pool");
                Error::worker(err.to_string())
            })?;
        Ok(PooledExecutor { pool })
    }

    pub fn from_config(config: &ExecConfig) -> Result<Self, Error> {
        Self::new(config.n_workers)
    }

    pub fn n_workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Executor for PooledExecutor {
    fn run(&mut self, tasks: &[Box<dyn Task>], function_id: u32) -> Result<(), Error> {
        tracing::debug!(n_tasks = tasks.len(), n_workers = self.n_workers(), "dispatching tasks");
        let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        self.pool.scope(|s| {
            for (idx, task) in tasks.iter().enumerate() {
                let errors_ref = &errors;
                s.spawn(move |_| {
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| task.execute(function_id, task.batch_size().get())));
                    let err = match outcome {
                        Ok(Ok(())) => return,
                        Ok(Err(err)) => err,
                        Err(payload) => {
                            Error::worker(format!("task {idx} panicked: {}", panic_message(payload.as_ref())))
                        }
                    };
                    tracing::error!(task = idx, %err, "task failed");
                    errors_ref
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(err);
                });
            }
        });
        let errs = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        match errs.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
