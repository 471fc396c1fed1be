/*!
Executes compiled data pipelines in parallel over row partitions of their
inputs and combines the per-partition outputs into shared results.

# Overview

A pipeline invocation is described by a [`Pipeline`]: one or more compiled
function variants ([`PipelineFn`]), the input buffers, and one
[`OutputSpec`] per output. The rows of the inputs get split into disjoint
ranges ([`static_partition`]), each one becomes a [`PartitionDescriptor`],
and each descriptor is executed by a [`PipelineTask`]. A task feeds its rows
to the pipeline function one batch at a time and merges every batch's
outputs into the shared results according to the output's combine strategy:

- [`CombineStrategy::Rows`]: the batch's rows are written into the
  matching rows of a preallocated result.
- [`CombineStrategy::Cols`]: like `Rows`, but the task's rows index the
  result's columns.
- [`CombineStrategy::Add`]: batches are summed element-wise. Every task
  keeps a local partial sum and folds it into the shared result once, under
  a lock. Since addition is commutative, the outcome doesn't depend on the
  order in which the tasks finish.

The disjoint-write strategies don't take a lock at all. Instead, a pipeline
with such an output refuses to hand out descriptors whose rows overlap
those of a live descriptor, and a task never runs on two threads at once.

The merges are carried out by a [`CombineBackend`]. [`HostBackend`] works
on host memory element by element, while [`DeviceBackend`] sticks to bulk
copies and an add kernel. [`SerialExecutor`] and [`PooledExecutor`] drive
a set of tasks to completion.

# Developer Guide

The allocation-free pieces (tag decoding, batching, block placement and the
strided copy/add kernels) live in [`vectask_nostd_internal`].
*/

#![deny(rustdoc::broken_intra_doc_links)]

mod backend;
mod buffer;
mod config;
mod context;
mod descriptor;
mod device;
mod error;
mod executor;
mod results;
mod task;

pub use backend::{CombineBackend, HostBackend};
pub use buffer::{AllocStats, BufferFactory, DenseMatrix, Residency};
pub use config::ExecConfig;
pub use context::ExecContext;
pub use descriptor::{
    InputSplit, OutputSpec, PartitionDescriptor, Pipeline, PipelineBuilder, PipelineFn,
    static_partition,
};
pub use device::DeviceBackend;
pub use error::{Error, PipelineFnError};
pub use executor::{Executor, PooledExecutor, SerialExecutor};
pub use task::{PipelineTask, Task, pipeline_tasks};
pub use vectask_nostd_internal::{BlockPlacement, CombineStrategy, CombineTag, Element};
