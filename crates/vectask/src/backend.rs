//! The merge primitives that distinguish the execution backends.
//!
//! The control flow of a [`crate::PipelineTask`] is the same for every
//! backend. The only thing that differs is how a batch's output physically
//! gets written (or added) into its destination, which is what
//! [`CombineBackend`] captures. [`HostBackend`] works element by element on
//! host memory; [`crate::DeviceBackend`] restricts itself to bulk copies and
//! its own add kernel.

use crate::buffer::{DenseMatrix, Residency};
use crate::context::ExecContext;
use crate::error::Error;
use vectask_nostd_internal::{
    BlockPlacement, Element, StridedBlockMut, add_assign_view, copy_block_elementwise,
};

pub trait CombineBackend<T: Element>: Send + Sync {
    /// used in log messages
    const NAME: &'static str;

    /// the residency of the buffers that this backend operates on
    fn residency(&self) -> Residency;

    /// Writes `src` into the rectangle of `dst` described by `placement`.
    ///
    /// This is used for the disjoint-write strategies, where every task
    /// writes straight into the shared result without taking a lock.
    ///
    /// # Safety
    /// No other thread may access the elements covered by `placement` while
    /// this runs. For the tasks of a single invocation, this holds because
    /// `Pipeline::partition` only hands out disjoint row ranges.
    unsafe fn batch_merge(
        &self,
        dst: &DenseMatrix<T>,
        placement: &BlockPlacement,
        src: &DenseMatrix<T>,
    ) -> Result<(), Error>;

    /// Element-wise `acc += contrib`.
    ///
    /// `acc` must be the only handle to its storage.
    fn batch_merge_commutative(
        &self,
        acc: &mut DenseMatrix<T>,
        contrib: &DenseMatrix<T>,
        ctx: &ExecContext,
    ) -> Result<(), Error>;
}

pub(crate) fn check_residency<T: Element>(
    expected: Residency,
    what: &'static str,
    buffer: &DenseMatrix<T>,
) -> Result<(), Error> {
    if buffer.residency() == expected {
        Ok(())
    } else {
        Err(Error::residency(what, expected.name()))
    }
}

/// Validates a disjoint write and returns the destination rectangle.
pub(crate) fn target_block<T: Element>(
    dst: &DenseMatrix<T>,
    placement: &BlockPlacement,
    src: &DenseMatrix<T>,
) -> Result<StridedBlockMut<T>, Error> {
    let expected = (placement.n_rows, placement.n_cols);
    if src.shape() != expected {
        return Err(Error::shape_mismatch("the batch output", expected, src.shape()));
    }
    dst.shared_block_mut().sub_block(placement).ok_or_else(|| {
        Error::slice_bounds(
            [
                placement.row,
                placement.row.saturating_add(placement.n_rows),
                placement.col,
                placement.col.saturating_add(placement.n_cols),
            ],
            dst.rows(),
            dst.cols(),
        )
    })
}

pub(crate) fn check_same_shape<T: Element>(
    acc: &DenseMatrix<T>,
    contrib: &DenseMatrix<T>,
) -> Result<(), Error> {
    if acc.shape() != contrib.shape() {
        return Err(Error::shape_mismatch(
            "a commutative contribution",
            acc.shape(),
            contrib.shape(),
        ));
    }
    Ok(())
}

/// Merges through element-wise loops over host memory
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBackend;

impl<T: Element> CombineBackend<T> for HostBackend {
    const NAME: &'static str = "host";

    fn residency(&self) -> Residency {
        Residency::Host
    }

    unsafe fn batch_merge(
        &self,
        dst: &DenseMatrix<T>,
        placement: &BlockPlacement,
        src: &DenseMatrix<T>,
    ) -> Result<(), Error> {
        check_residency(Residency::Host, "the shared result", dst)?;
        check_residency(Residency::Host, "the batch output", src)?;
        let block = target_block(dst, placement, src)?;
        // SAFETY: forwarded to our caller. `src` can't overlap `block`, since
        // `dst` only ever lives in the shared results (which never hand out
        // views of it)
        unsafe { copy_block_elementwise(&block, &src.strided()) }
            .map_err(|_| Error::shape_mismatch("the batch output", block.shape(), src.shape()))
    }

    fn batch_merge_commutative(
        &self,
        acc: &mut DenseMatrix<T>,
        contrib: &DenseMatrix<T>,
        _ctx: &ExecContext,
    ) -> Result<(), Error> {
        check_residency(Residency::Host, "the accumulator", acc)?;
        check_residency(Residency::Host, "a commutative contribution", contrib)?;
        check_same_shape(acc, contrib)?;
        let src = contrib.view()?;
        let mut values = acc.values_mut()?;
        add_assign_view(&mut values, &src).map_err(|_| {
            Error::shape_mismatch("a commutative contribution", values.dim(), src.dim())
        })
    }
}
