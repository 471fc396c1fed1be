use crate::error::Error;
use std::num::NonZeroUsize;

const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

/// Knobs for running a pipeline invocation.
///
/// The zero checks happen in the `with_*` setters, so a constructed config
/// is always usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecConfig {
    /// number of pool threads (and the default number of row partitions)
    pub n_workers: NonZeroUsize,
    /// rows per pipeline function call
    pub batch_size: NonZeroUsize,
    /// the compiled variant to run
    pub function_id: u32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            n_workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            batch_size: DEFAULT_BATCH_SIZE,
            function_id: 0,
        }
    }
}

impl ExecConfig {
    pub fn with_workers(mut self, n_workers: usize) -> Result<Self, Error> {
        self.n_workers = NonZeroUsize::new(n_workers)
            .ok_or_else(|| Error::integer_range("n_workers", 0, 1, i64::MAX))?;
        Ok(self)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self, Error> {
        self.batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| Error::integer_range("batch_size", 0, 1, i64::MAX))?;
        Ok(self)
    }

    pub fn with_function_id(mut self, function_id: u32) -> Self {
        self.function_id = function_id;
        self
    }
}
