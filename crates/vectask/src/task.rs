//! The unit of work a worker executes: one row partition of a pipeline.

use crate::backend::CombineBackend;
use crate::buffer::DenseMatrix;
use crate::descriptor::{InputSplit, PartitionDescriptor};
use crate::error::Error;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use vectask_nostd_internal::{CombineStrategy, Element, batch_ranges, block_placement};

/// Something a worker can execute.
///
/// This is object-safe so that an executor can run tasks with differing
/// element types and backends side by side.
pub trait Task: Send + Sync {
    /// Runs the task with the compiled variant `function_id`, feeding it
    /// `batch_size` rows at a time.
    fn execute(&self, function_id: u32, batch_size: usize) -> Result<(), Error>;

    /// the batch size the task was created with
    fn batch_size(&self) -> NonZeroUsize;
}

/// Executes a compiled pipeline over one row partition and merges the
/// outputs into the pipeline's shared results with the backend `B`.
///
/// Per batch, the task slices its inputs, invokes the pipeline function,
/// merges every output according to its combine strategy, and destroys the
/// batch's buffers. Disjoint-write outputs go straight into the shared
/// destination. Commutative outputs are summed into a task-local
/// accumulator, which is folded into the shared slot once at the end, so a
/// task takes the shared lock at most once per output.
///
/// A task may be executed any number of times, but not by two threads at
/// once.
pub struct PipelineTask<T: Element, B: CombineBackend<T>> {
    descr: PartitionDescriptor<T>,
    backend: B,
    running: AtomicBool,
}

/// Marks a task as running until dropped (also when unwinding)
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RunningGuard(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Element, B: CombineBackend<T>> PipelineTask<T, B> {
    pub fn new(descr: PartitionDescriptor<T>, backend: B) -> Self {
        PipelineTask {
            descr,
            backend,
            running: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &PartitionDescriptor<T> {
        &self.descr
    }

    /// Resolves the strategy of every output before any work is done, so an
    /// unsupported tag can't leave behind a partially merged result.
    fn resolve_strategies(&self) -> Result<Vec<CombineStrategy>, Error> {
        let pipeline = self.descr.pipeline();
        let results = pipeline.results();
        let mut strategies = Vec::with_capacity(pipeline.n_outputs());
        for (o, spec) in pipeline.outputs().iter().enumerate() {
            let strategy = CombineStrategy::from_tag(spec.combine).map_err(|err| {
                tracing::error!(output = o, tag = spec.combine.0, "unsupported combine strategy");
                Error::unsupported_combine(o, err)
            })?;
            if !strategy.is_commutative() && results.destination(o).is_none() {
                return Err(Error::missing_output(
                    o,
                    "a disjoint-write output needs a preallocated result",
                ));
            }
            strategies.push(strategy);
        }
        Ok(strategies)
    }

    fn create_func_inputs(&self, batch: &Range<usize>) -> Result<Vec<DenseMatrix<T>>, Error> {
        self.descr
            .pipeline()
            .inputs()
            .iter()
            .map(|input| match input.split {
                InputSplit::Rows => input.buffer.slice_rows(batch.start, batch.end),
                InputSplit::Broadcast => input.buffer.slice_rows(0, input.buffer.rows()),
            })
            .collect()
    }

    fn accumulate_outputs(
        &self,
        strategies: &[CombineStrategy],
        local_results: &mut [Option<DenseMatrix<T>>],
        local_sums: &mut [Option<DenseMatrix<T>>],
        batch: &Range<usize>,
    ) -> Result<(), Error> {
        let pipeline = self.descr.pipeline();
        let ctx = pipeline.ctx();
        for (o, &strategy) in strategies.iter().enumerate() {
            let spec = &pipeline.outputs()[o];
            match strategy {
                CombineStrategy::Rows | CombineStrategy::Cols => {
                    let lres = local_results[o].as_ref().ok_or_else(|| {
                        Error::missing_output(o, "the pipeline function didn't produce it")
                    })?;
                    let dst = pipeline.results().destination(o).ok_or_else(|| {
                        Error::missing_output(o, "a disjoint-write output needs a preallocated result")
                    })?;
                    let placement =
                        block_placement(strategy, batch.clone(), spec.offset, spec.out_rows, dst.cols())
                            .map_err(|_| {
                                Error::integer_range(
                                    "the output offset",
                                    spec.offset as i64,
                                    0,
                                    batch.start as i64,
                                )
                            })?;
                    // SAFETY: live descriptors of a pipeline with disjoint
                    // outputs never share rows and `execute` holds a
                    // `RunningGuard`, so nobody else writes this block
                    unsafe { self.backend.batch_merge(dst, &placement, lres)? };
                }
                CombineStrategy::Add => {
                    let lres = local_results[o].take().ok_or_else(|| {
                        Error::missing_output(o, "the pipeline function didn't produce it")
                    })?;
                    match local_sums[o].as_mut() {
                        None => local_sums[o] = Some(lres.into_exclusive()?),
                        Some(acc) => {
                            self.backend.batch_merge_commutative(acc, &lres, ctx)?;
                            ctx.factory().destroy(lres);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl<T: Element, B: CombineBackend<T>> Task for PipelineTask<T, B> {
    fn execute(&self, function_id: u32, batch_size: usize) -> Result<(), Error> {
        let batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| Error::integer_range("batch_size", 0, 1, i64::MAX))?;
        let pipeline = self.descr.pipeline();
        let rows = self.descr.rows();
        let _span = tracing::debug_span!(
            "pipeline_task",
            backend = B::NAME,
            element = T::NAME,
            row_low = rows.start,
            row_high = rows.end,
        )
        .entered();

        let _running = RunningGuard::acquire(&self.running)
            .ok_or_else(|| Error::overlapping_rows(rows.clone(), rows.clone()))?;
        let strategies = self.resolve_strategies()?;
        let func = pipeline.variant(function_id)?;
        let ctx = pipeline.ctx();
        let n_outputs = pipeline.n_outputs();
        tracing::debug!(function_id, batch_size = batch_size.get(), n_outputs, "starting task");

        let mut local_results: Vec<Option<DenseMatrix<T>>> = (0..n_outputs).map(|_| None).collect();
        let mut local_sums: Vec<Option<DenseMatrix<T>>> = (0..n_outputs).map(|_| None).collect();

        let mut n_batches = 0usize;
        for batch in batch_ranges(rows, batch_size) {
            tracing::trace!(r = batch.start, r2 = batch.end, "batch");
            let inputs = self.create_func_inputs(&batch)?;

            (func.as_ref())(local_results.as_mut_slice(), inputs.as_slice(), ctx)
                .map_err(|err| Error::pipeline_function(function_id, err))?;

            self.accumulate_outputs(&strategies, &mut local_results, &mut local_sums, &batch)?;

            for lres in local_results.iter_mut() {
                if let Some(buffer) = lres.take() {
                    ctx.factory().destroy(buffer);
                }
            }
            for view in inputs {
                ctx.factory().destroy(view);
            }
            n_batches += 1;
        }

        for (o, partial) in local_sums.into_iter().enumerate() {
            let Some(partial) = partial else { continue };
            let outcome =
                pipeline
                    .results()
                    .fold_commutative(o, partial, &self.backend, ctx)?;
            tracing::debug!(output = o, ?outcome, "folded partial sum");
        }
        tracing::debug!(n_batches, "finished task");
        Ok(())
    }

    fn batch_size(&self) -> NonZeroUsize {
        self.descr.batch_size()
    }
}

/// Wraps each descriptor in a [`PipelineTask`] that uses `backend`
pub fn pipeline_tasks<T, B>(descrs: Vec<PartitionDescriptor<T>>, backend: B) -> Vec<Box<dyn Task>>
where
    T: Element,
    B: CombineBackend<T> + Clone + 'static,
{
    descrs
        .into_iter()
        .map(|descr| Box::new(PipelineTask::new(descr, backend.clone())) as Box<dyn Task>)
        .collect()
}
