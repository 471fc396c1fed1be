// the reason this is named mod.rs has to do with how integration tests share
// code, see
// https://doc.rust-lang.org/book/ch11-03-test-organization.html#submodules-in-integration-tests
#![allow(dead_code)]

use rand::distr::{Distribution, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;
use std::num::NonZeroUsize;
use std::ops::Range;
use tracing_subscriber::EnvFilter;
use vectask::{
    BufferFactory, CombineBackend, CombineStrategy, DenseMatrix, Element, ExecContext, Executor,
    InputSplit, OutputSpec, PipelineBuilder, PipelineFnError, pipeline_tasks,
};

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

/// Routes the engine's log output through the test harness (filtered by
/// `RUST_LOG`). Safe to call from every test.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A matrix of random integer values, so that sums are exact regardless of
/// the order of the additions
pub fn random_integer_matrix<T: Element>(
    factory: &BufferFactory,
    seed: u64,
    rows: usize,
    cols: usize,
) -> DenseMatrix<T> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let value_dist = Uniform::try_from(-50..50).unwrap();
    factory.from_fn(rows, cols, |_, _| T::from_f64(value_dist.sample(&mut rng) as f64))
}

/// Splits `rows` at (up to) `n_cuts` random points. The returned ranges are
/// disjoint, cover `rows` and may be empty.
pub fn random_partition(seed: u64, rows: Range<usize>, n_cuts: usize) -> Vec<Range<usize>> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let cut_dist = Uniform::try_from(rows.clone()).unwrap();
    let mut cuts: Vec<usize> = (0..n_cuts).map(|_| cut_dist.sample(&mut rng)).collect();
    cuts.sort_unstable();
    let mut out = Vec::with_capacity(n_cuts + 1);
    let mut start = rows.start;
    for cut in cuts {
        out.push(start..cut);
        start = cut;
    }
    out.push(start..rows.end);
    out
}

/// A row-major copy of `m`'s contents, as f64
pub fn values<T: Element>(m: &DenseMatrix<T>) -> Vec<f64> {
    m.to_vec().into_iter().map(T::to_f64).collect()
}

// the compiled pipeline functions used throughout the tests

/// `outputs[0]` is a copy of `inputs[0]`
pub fn copy_rows<T: Element>(
    outputs: &mut [Option<DenseMatrix<T>>],
    inputs: &[DenseMatrix<T>],
    ctx: &ExecContext,
) -> Result<(), PipelineFnError> {
    let input = inputs.first().ok_or("copy_rows expects an input")?;
    outputs[0] = Some(
        ctx.factory()
            .from_fn(input.rows(), input.cols(), |i, j| input.get(i, j)),
    );
    Ok(())
}

/// `outputs[0]` is `2 * inputs[0]`
pub fn double_rows<T: Element>(
    outputs: &mut [Option<DenseMatrix<T>>],
    inputs: &[DenseMatrix<T>],
    ctx: &ExecContext,
) -> Result<(), PipelineFnError> {
    let input = inputs.first().ok_or("double_rows expects an input")?;
    outputs[0] = Some(ctx.factory().from_fn(input.rows(), input.cols(), |i, j| {
        input.get(i, j) + input.get(i, j)
    }));
    Ok(())
}

/// `outputs[0]` is the transpose of `inputs[0]`
pub fn transpose<T: Element>(
    outputs: &mut [Option<DenseMatrix<T>>],
    inputs: &[DenseMatrix<T>],
    ctx: &ExecContext,
) -> Result<(), PipelineFnError> {
    let input = inputs.first().ok_or("transpose expects an input")?;
    outputs[0] = Some(
        ctx.factory()
            .from_fn(input.cols(), input.rows(), |i, j| input.get(j, i)),
    );
    Ok(())
}

/// `outputs[0]` is a single row holding the column sums of `inputs[0]`
pub fn column_sums<T: Element>(
    outputs: &mut [Option<DenseMatrix<T>>],
    inputs: &[DenseMatrix<T>],
    ctx: &ExecContext,
) -> Result<(), PipelineFnError> {
    let input = inputs.first().ok_or("column_sums expects an input")?;
    outputs[0] = Some(ctx.factory().from_fn(1, input.cols(), |_, j| {
        (0..input.rows()).fold(T::default(), |acc, i| acc + input.get(i, j))
    }));
    Ok(())
}

/// Reference column sums over `rows` of `input`
pub fn reference_column_sums<T: Element>(input: &DenseMatrix<T>, rows: Range<usize>) -> Vec<f64> {
    (0..input.cols())
        .map(|j| rows.clone().map(|i| input.get(i, j).to_f64()).sum())
        .collect()
}

/// Produces three outputs at once: `double_rows`, `transpose` and
/// `column_sums` of `inputs[0]`
pub fn three_outputs<T: Element>(
    outputs: &mut [Option<DenseMatrix<T>>],
    inputs: &[DenseMatrix<T>],
    ctx: &ExecContext,
) -> Result<(), PipelineFnError> {
    double_rows(&mut outputs[0..1], inputs, ctx)?;
    transpose(&mut outputs[1..2], inputs, ctx)?;
    column_sums(&mut outputs[2..3], inputs, ctx)
}

/// The contents of the outputs of a `three_outputs` pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct ThreeOutputs {
    pub rows: Vec<f64>,
    pub cols: Vec<f64>,
    pub sums: Vec<f64>,
}

impl ThreeOutputs {
    /// what a `three_outputs` pipeline over every row of `input` must produce
    pub fn expected<T: Element>(input: &DenseMatrix<T>) -> Self {
        let (n_rows, n_cols) = input.shape();
        let mut rows = Vec::new();
        for i in 0..n_rows {
            for j in 0..n_cols {
                rows.push(2.0 * input.get(i, j).to_f64());
            }
        }
        let mut cols = Vec::new();
        for j in 0..n_cols {
            for i in 0..n_rows {
                cols.push(input.get(i, j).to_f64());
            }
        }
        ThreeOutputs {
            rows,
            cols,
            sums: reference_column_sums(input, 0..n_rows),
        }
    }
}

/// Runs a `three_outputs` pipeline over `input` with one task per range of
/// `partition`.
///
/// The input is bound through a view, so the caller keeps ownership.
pub fn run_three_outputs<B>(
    ctx: &ExecContext,
    input: &DenseMatrix<f64>,
    partition: &[Range<usize>],
    batch_size: usize,
    backend: B,
    executor: &mut dyn Executor,
) -> ThreeOutputs
where
    B: CombineBackend<f64> + Clone + 'static,
{
    let (n_rows, n_cols) = input.shape();
    let pipeline = PipelineBuilder::new(ctx.clone())
        .variant(three_outputs::<f64>)
        .input(input.slice_rows(0, n_rows).unwrap(), InputSplit::Rows)
        .output(
            OutputSpec::new(CombineStrategy::Rows, n_rows),
            Some(ctx.factory().create(n_rows, n_cols)),
        )
        .output(
            OutputSpec::new(CombineStrategy::Cols, n_cols),
            Some(ctx.factory().create(n_cols, n_rows)),
        )
        .output(OutputSpec::new(CombineStrategy::Add, 1), None)
        .build()
        .unwrap();
    let batch_size = NonZeroUsize::new(batch_size).unwrap();
    let descrs = partition
        .iter()
        .map(|rows| pipeline.partition(rows.clone(), batch_size).unwrap())
        .collect();
    let tasks = pipeline_tasks(descrs, backend);
    executor.run(&tasks, 0).unwrap();
    drop(tasks);

    let outputs = pipeline.into_outputs().unwrap();
    ThreeOutputs {
        rows: values(outputs[0].as_ref().unwrap()),
        cols: values(outputs[1].as_ref().unwrap()),
        sums: values(outputs[2].as_ref().unwrap()),
    }
}
