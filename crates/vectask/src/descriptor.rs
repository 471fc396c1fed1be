//! The immutable description of a pipeline invocation and the per-task
//! partition descriptors handed to the workers.
//!
//! A [`Pipeline`] bundles everything the tasks of one invocation share: the
//! compiled function variants, the inputs, the per-output combine
//! configuration, the execution context and the shared result slots. It is
//! assembled through [`PipelineBuilder`] and then frozen behind an `Arc`.
//! A [`PartitionDescriptor`] is nothing more than a row range plus a handle
//! to that pipeline.

use crate::buffer::DenseMatrix;
use crate::context::ExecContext;
use crate::error::{Error, PipelineFnError};
use crate::results::SharedResults;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use vectask_nostd_internal::{CombineStrategy, CombineTag, Element};

/// A compiled pipeline function.
///
/// It is called once per batch with the (initially empty) output slots, the
/// batch's input views and the execution context. On success, every output
/// slot must hold a freshly allocated buffer.
pub type PipelineFn<T> = Arc<
    dyn Fn(&mut [Option<DenseMatrix<T>>], &[DenseMatrix<T>], &ExecContext) -> Result<(), PipelineFnError>
        + Send
        + Sync,
>;

/// How an input is presented to the pipeline function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSplit {
    /// the function sees the batch's rows
    Rows,
    /// the function sees the whole input for every batch
    Broadcast,
}

pub(crate) struct InputBinding<T: Element> {
    pub(crate) buffer: DenseMatrix<T>,
    pub(crate) split: InputSplit,
}

/// Describes how the batches of one output are combined into the result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSpec {
    /// raw strategy tag, only resolved when a task executes
    pub combine: CombineTag,
    /// the output's total row count (used to place column blocks)
    pub out_rows: usize,
    /// subtracted from global row indices to get result-local ones
    pub offset: usize,
}

impl OutputSpec {
    pub fn new(combine: impl Into<CombineTag>, out_rows: usize) -> Self {
        OutputSpec {
            combine: combine.into(),
            out_rows,
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

pub struct Pipeline<T: Element> {
    variants: Box<[PipelineFn<T>]>,
    inputs: Box<[InputBinding<T>]>,
    outputs: Box<[OutputSpec]>,
    ctx: ExecContext,
    results: SharedResults<T>,
    // row ranges held by live descriptors; only tracked when some output is
    // written without a lock
    claims: Option<Mutex<Vec<Range<usize>>>>,
}

impl<T: Element> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("n_variants", &self.variants.len())
            .field("n_inputs", &self.inputs.len())
            .field("outputs", &self.outputs)
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl<T: Element> Pipeline<T> {
    pub fn n_variants(&self) -> usize {
        self.variants.len()
    }

    pub fn n_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn ctx(&self) -> &ExecContext {
        &self.ctx
    }

    pub(crate) fn variant(&self, function_id: u32) -> Result<&PipelineFn<T>, Error> {
        usize::try_from(function_id)
            .ok()
            .and_then(|idx| self.variants.get(idx))
            .ok_or_else(|| Error::function_id(function_id, self.variants.len()))
    }

    pub(crate) fn inputs(&self) -> &[InputBinding<T>] {
        &self.inputs
    }

    pub(crate) fn results(&self) -> &SharedResults<T> {
        &self.results
    }

    /// A descriptor for a task that processes `rows` in batches of
    /// `batch_size` rows.
    ///
    /// When the pipeline has a disjoint-write output, the rows of all live
    /// descriptors must be disjoint: `rows` stays claimed until the returned
    /// descriptor is dropped, and a range that overlaps a claimed one is
    /// rejected. Pipelines whose outputs are all commutative accept any
    /// ranges.
    pub fn partition(
        self: &Arc<Self>,
        rows: Range<usize>,
        batch_size: NonZeroUsize,
    ) -> Result<PartitionDescriptor<T>, Error> {
        let claimed = match (&self.claims, rows.is_empty()) {
            (Some(claims), false) => {
                let mut claims = claims.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(other) = claims
                    .iter()
                    .find(|other| other.start < rows.end && rows.start < other.end)
                {
                    return Err(Error::overlapping_rows(rows, other.clone()));
                }
                claims.push(rows.clone());
                true
            }
            _ => false,
        };
        Ok(PartitionDescriptor {
            rows,
            batch_size,
            pipeline: Arc::clone(self),
            claimed,
        })
    }

    /// Splits `rows` into at most `n_tasks` disjoint descriptors of nearly
    /// equal size (see [`static_partition`]).
    pub fn partitions(
        self: &Arc<Self>,
        rows: Range<usize>,
        n_tasks: NonZeroUsize,
        batch_size: NonZeroUsize,
    ) -> Result<Vec<PartitionDescriptor<T>>, Error> {
        static_partition(rows, n_tasks)
            .into_iter()
            .map(|chunk| self.partition(chunk, batch_size))
            .collect()
    }

    fn release(&self, rows: &Range<usize>) {
        if let Some(claims) = &self.claims {
            let mut claims = claims.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pos) = claims.iter().position(|other| other == rows) {
                claims.swap_remove(pos);
            }
        }
    }

    /// Ends the invocation and hands over the outputs, in order.
    ///
    /// While any other handle to the pipeline (e.g. a descriptor or a task
    /// that hasn't been dropped) is still around, the pipeline is handed
    /// back unchanged so the call can be retried later.
    pub fn into_outputs(self: Arc<Self>) -> Result<Vec<Option<DenseMatrix<T>>>, Arc<Self>> {
        let pipeline = Arc::try_unwrap(self)?;
        Ok(pipeline.results.into_outputs())
    }
}

/// Assembles a [`Pipeline`].
///
/// Outputs that use a disjoint-write strategy need a destination buffer,
/// which must not be aliased by any other handle. A commutative output may
/// optionally be seeded with an existing buffer that the contributions get
/// added into.
pub struct PipelineBuilder<T: Element> {
    ctx: ExecContext,
    variants: Vec<PipelineFn<T>>,
    inputs: Vec<InputBinding<T>>,
    outputs: Vec<(OutputSpec, Option<DenseMatrix<T>>)>,
}

impl<T: Element> PipelineBuilder<T> {
    pub fn new(ctx: ExecContext) -> Self {
        PipelineBuilder {
            ctx,
            variants: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Appends a function variant. Variants are numbered by insertion order.
    pub fn variant<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut [Option<DenseMatrix<T>>], &[DenseMatrix<T>], &ExecContext) -> Result<(), PipelineFnError>
            + Send
            + Sync
            + 'static,
    {
        self.variants.push(Arc::new(f));
        self
    }

    pub fn shared_variant(mut self, f: PipelineFn<T>) -> Self {
        self.variants.push(f);
        self
    }

    pub fn input(mut self, buffer: DenseMatrix<T>, split: InputSplit) -> Self {
        self.inputs.push(InputBinding { buffer, split });
        self
    }

    pub fn output(mut self, spec: OutputSpec, destination: Option<DenseMatrix<T>>) -> Self {
        self.outputs.push((spec, destination));
        self
    }

    pub fn build(self) -> Result<Arc<Pipeline<T>>, Error> {
        let mut specs = Vec::with_capacity(self.outputs.len());
        let mut destinations = Vec::with_capacity(self.outputs.len());
        let mut sums = Vec::with_capacity(self.outputs.len());
        let mut disjoint_writes = false;
        for (spec, mut buffer) in self.outputs {
            if let Some(buffer) = buffer.as_mut() {
                if !buffer.is_exclusive() {
                    return Err(Error::aliased_storage("a result buffer"));
                }
            }
            // unknown tags are kept as-is, they're reported by the tasks
            match CombineStrategy::from_tag(spec.combine) {
                Ok(CombineStrategy::Add) => {
                    destinations.push(None);
                    sums.push(buffer);
                }
                strategy => {
                    disjoint_writes |= strategy.is_ok();
                    destinations.push(buffer);
                    sums.push(None);
                }
            }
            specs.push(spec);
        }
        tracing::debug!(
            n_variants = self.variants.len(),
            n_inputs = self.inputs.len(),
            n_outputs = specs.len(),
            residency = self.ctx.residency().name(),
            "built pipeline"
        );
        Ok(Arc::new(Pipeline {
            variants: self.variants.into_boxed_slice(),
            inputs: self.inputs.into_boxed_slice(),
            outputs: specs.into_boxed_slice(),
            ctx: self.ctx,
            results: SharedResults::new(destinations, sums),
            claims: disjoint_writes.then(|| Mutex::new(Vec::new())),
        }))
    }
}

/// The row range one task processes, plus the pipeline it belongs to.
///
/// Descriptors are created by [`Pipeline::partition`].
pub struct PartitionDescriptor<T: Element> {
    rows: Range<usize>,
    batch_size: NonZeroUsize,
    pipeline: Arc<Pipeline<T>>,
    claimed: bool,
}

impl<T: Element> Drop for PartitionDescriptor<T> {
    fn drop(&mut self) {
        if self.claimed {
            self.pipeline.release(&self.rows);
        }
    }
}

impl<T: Element> std::fmt::Debug for PartitionDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionDescriptor")
            .field("rows", &self.rows)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<T: Element> PartitionDescriptor<T> {
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<T>> {
        &self.pipeline
    }
}

/// Splits `rows` into at most `n_tasks` contiguous, disjoint ranges that
/// cover it exactly. Sizes differ by at most one and empty ranges are left
/// out.
pub fn static_partition(rows: Range<usize>, n_tasks: NonZeroUsize) -> Vec<Range<usize>> {
    let len = rows.end.saturating_sub(rows.start);
    let n_tasks = n_tasks.get();
    let (base, remainder) = (len / n_tasks, len % n_tasks);
    let mut out = Vec::with_capacity(n_tasks.min(len));
    let mut start = rows.start;
    for i in 0..n_tasks {
        let size = base + usize::from(i < remainder);
        if size == 0 {
            break;
        }
        out.push(start..start + size);
        start += size;
    }
    out
}
