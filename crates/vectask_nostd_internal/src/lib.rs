//! Backend-independent building blocks for executing compiled pipelines over
//! row partitions.
//!
//! Nothing in this crate allocates or synchronizes. It knows how to:
//! - decode the combine tags handed over by the compiler
//!   ([`CombineStrategy`]),
//! - cut a task's row range into batches ([`batch_ranges`]),
//! - work out where a batch's output lands inside a result
//!   ([`block_placement`]),
//! - move and add strided 2D blocks of elements ([`StridedBlock`] and
//!   friends).
//!
//! Ownership of buffers, locking and error reporting live in the `vectask`
//! crate.
#![no_std]
mod batch;
mod combine;
mod element;
mod strided;

pub use batch::{BatchRanges, batch_ranges};
pub use combine::{
    BlockPlacement, CombineStrategy, CombineTag, UnsupportedCombine, block_placement,
};
pub use element::Element;
pub use strided::{
    StridedBlock, StridedBlockMut, add_assign_rowwise, add_assign_view, copy_block_elementwise,
    copy_block_rowwise,
};
