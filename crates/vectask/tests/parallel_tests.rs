use std::num::NonZeroUsize;
use vectask::{
    CombineStrategy, DenseMatrix, ExecConfig, ExecContext, Executor, HostBackend, InputSplit,
    OutputSpec, PipelineBuilder, PooledExecutor, SerialExecutor, pipeline_tasks, static_partition,
};

mod common;

use common::ThreeOutputs;

#[test]
fn pooled_matches_serial() {
    common::init_logging();
    let ctx = ExecContext::host();
    let mut pool = PooledExecutor::new(NonZeroUsize::new(4).unwrap()).unwrap();
    assert_eq!(pool.n_workers(), 4);

    for seed in [3_u64, 1234, 998_244_353] {
        let input: DenseMatrix<f64> = common::random_integer_matrix(ctx.factory(), seed, 101, 3);
        let partition = common::random_partition(seed, 0..101, 15);
        let serial =
            common::run_three_outputs(&ctx, &input, &partition, 4, HostBackend, &mut SerialExecutor);
        let pooled = common::run_three_outputs(&ctx, &input, &partition, 4, HostBackend, &mut pool);
        assert_eq!(serial, ThreeOutputs::expected(&input));
        assert_eq!(pooled, serial);
    }
    assert_eq!(ctx.factory().stats().live_views, 0);
}

#[test]
fn concurrent_folds_lose_no_update() {
    common::init_logging();
    let ctx = ExecContext::host();
    let pipeline = PipelineBuilder::<f64>::new(ctx.clone())
        .variant(|outputs, inputs, ctx| {
            let n = inputs[0].rows() as f64;
            outputs[0] = Some(ctx.factory().filled(16, 16, n));
            Ok(())
        })
        .input(ctx.factory().create(256, 1), InputSplit::Rows)
        .output(OutputSpec::new(CombineStrategy::Add, 16), None)
        .build()
        .unwrap();
    // one task per row, so plenty of tasks race to install the first sum
    let descrs = (0..256)
        .map(|r| pipeline.partition(r..r + 1, NonZeroUsize::MIN).unwrap())
        .collect();
    let tasks = pipeline_tasks(descrs, HostBackend);
    let mut pool = PooledExecutor::new(NonZeroUsize::new(8).unwrap()).unwrap();
    pool.run(&tasks, 0).unwrap();
    drop(tasks);
    let outputs = pipeline.into_outputs().unwrap();
    assert_eq!(outputs[0].as_ref().unwrap().to_vec(), vec![256.0; 256]);
    // the input went away with the pipeline, only the installed sum is left
    assert_eq!(ctx.factory().stats().live_buffers, 1);
    drop(outputs);
    assert_eq!(ctx.factory().stats().live_buffers, 0);
}

#[test]
fn config_drives_partitioning() {
    common::init_logging();
    let config = ExecConfig::default()
        .with_workers(3)
        .unwrap()
        .with_batch_size(5)
        .unwrap();
    let ctx = ExecContext::host();
    let input: DenseMatrix<f64> = common::random_integer_matrix(ctx.factory(), 11, 40, 2);
    let expected = ThreeOutputs::expected(&input);
    let pipeline = PipelineBuilder::new(ctx.clone())
        .variant(common::three_outputs::<f64>)
        .input(input, InputSplit::Rows)
        .output(
            OutputSpec::new(CombineStrategy::Rows, 40),
            Some(ctx.factory().create(40, 2)),
        )
        .output(
            OutputSpec::new(CombineStrategy::Cols, 2),
            Some(ctx.factory().create(2, 40)),
        )
        .output(OutputSpec::new(CombineStrategy::Add, 1), None)
        .build()
        .unwrap();
    let descrs = pipeline
        .partitions(0..40, config.n_workers, config.batch_size)
        .unwrap();
    assert_eq!(descrs.len(), 3);
    assert!(descrs.iter().all(|d| d.batch_size() == config.batch_size));
    let tasks = pipeline_tasks(descrs, HostBackend);
    let mut pool = PooledExecutor::from_config(&config).unwrap();
    pool.run(&tasks, config.function_id).unwrap();
    drop(tasks);

    let outputs = pipeline.into_outputs().unwrap();
    let actual = ThreeOutputs {
        rows: common::values(outputs[0].as_ref().unwrap()),
        cols: common::values(outputs[1].as_ref().unwrap()),
        sums: common::values(outputs[2].as_ref().unwrap()),
    };
    assert_eq!(actual, expected);
}

#[test]
fn failures_are_reported_after_all_tasks_ran() {
    common::init_logging();
    let ctx = ExecContext::host();
    let input: DenseMatrix<f64> = ctx.factory().from_fn(8, 1, |i, _| i as f64);
    let pipeline = PipelineBuilder::<f64>::new(ctx.clone())
        .variant(|outputs, inputs, ctx| {
            if inputs[0].get(0, 0) == 2.0 {
                return Err("bad batch".into());
            }
            common::copy_rows(outputs, inputs, ctx)
        })
        .variant(|outputs, inputs, ctx| {
            if inputs[0].get(0, 0) == 6.0 {
                panic!("the compiled function blew up");
            }
            common::copy_rows(outputs, inputs, ctx)
        })
        .input(input, InputSplit::Rows)
        .output(
            OutputSpec::new(CombineStrategy::Rows, 8),
            Some(ctx.factory().filled(8, 1, -1.0)),
        )
        .build()
        .unwrap();
    let tasks = pipeline_tasks(
        static_partition(0..8, NonZeroUsize::new(4).unwrap())
            .into_iter()
            .map(|rows| pipeline.partition(rows, NonZeroUsize::MIN).unwrap())
            .collect(),
        HostBackend,
    );
    let mut pool = PooledExecutor::new(NonZeroUsize::new(2).unwrap()).unwrap();

    let err = pool.run(&tasks, 0).unwrap_err();
    assert!(err.is_pipeline_function(), "{err}");

    // a panicking task turns into an error rather than tearing down the pool
    let err = pool.run(&tasks, 1).unwrap_err();
    assert!(err.to_string().contains("panicked"), "{err}");
    assert!(err.to_string().contains("blew up"), "{err}");

    drop(tasks);
    let outputs = pipeline.into_outputs().unwrap();
    // the first run left rows [2, 4) untouched, the second run filled them in
    // (and failed on rows [6, 8), which the first run had already written)
    assert_eq!(
        outputs[0].as_ref().unwrap().to_vec(),
        vec![0., 1., 2., 3., 4., 5., 6., 7.]
    );
}

#[test]
fn overlapping_tasks_are_refused() {
    common::init_logging();
    let ctx = ExecContext::host();
    let input: DenseMatrix<f64> = ctx.factory().from_fn(8, 1, |i, _| i as f64);
    let pipeline = PipelineBuilder::new(ctx.clone())
        .variant(common::copy_rows::<f64>)
        .input(input, InputSplit::Rows)
        .output(
            OutputSpec::new(CombineStrategy::Rows, 8),
            Some(ctx.factory().create(8, 1)),
        )
        .build()
        .unwrap();
    let mut descrs = vec![pipeline.partition(0..8, NonZeroUsize::MIN).unwrap()];
    for _ in 0..3 {
        let err = pipeline.partition(0..8, NonZeroUsize::MIN).unwrap_err();
        assert!(err.to_string().contains("overlap"), "{err}");
    }
    assert!(pipeline.partition(7..9, NonZeroUsize::MIN).is_err());
    descrs.push(pipeline.partition(8..8, NonZeroUsize::MIN).unwrap());

    let tasks = pipeline_tasks(descrs, HostBackend);
    let mut pool = PooledExecutor::new(NonZeroUsize::new(4).unwrap()).unwrap();
    pool.run(&tasks, 0).unwrap();
    drop(tasks);
    let outputs = pipeline.into_outputs().unwrap();
    assert_eq!(
        outputs[0].as_ref().unwrap().to_vec(),
        (0..8).map(|v| v as f64).collect::<Vec<_>>()
    );
}

#[test]
fn early_readback_keeps_the_results() {
    common::init_logging();
    let ctx = ExecContext::host();
    let pipeline = PipelineBuilder::<f64>::new(ctx.clone())
        .variant(|outputs, inputs, ctx| {
            outputs[0] = Some(ctx.factory().filled(1, 2, inputs[0].rows() as f64));
            Ok(())
        })
        .input(ctx.factory().create(12, 1), InputSplit::Rows)
        .output(OutputSpec::new(CombineStrategy::Add, 1), None)
        .build()
        .unwrap();
    let descrs = pipeline
        .partitions(0..12, NonZeroUsize::new(3).unwrap(), NonZeroUsize::MIN)
        .unwrap();
    let tasks = pipeline_tasks(descrs, HostBackend);
    let mut pool = PooledExecutor::new(NonZeroUsize::new(3).unwrap()).unwrap();
    pool.run(&tasks, 0).unwrap();

    // the tasks still hold the pipeline, so it is handed back untouched
    let pipeline = pipeline.into_outputs().unwrap_err();
    drop(tasks);
    assert_eq!(ctx.factory().stats().live_buffers, 2);
    let outputs = pipeline.into_outputs().unwrap();
    assert_eq!(outputs[0].as_ref().unwrap().to_vec(), vec![12.0, 12.0]);
}
