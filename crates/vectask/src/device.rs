//! The device flavor of the combine primitives.
//!
//! Device memory isn't addressed element by element. Disjoint writes become
//! bulk device-to-device copies (a single copy when the target rows are
//! contiguous, one per row otherwise), and commutative merges go through the
//! add kernel.

use crate::backend::{CombineBackend, check_residency, check_same_shape, target_block};
use crate::buffer::{DenseMatrix, Residency};
use crate::context::ExecContext;
use crate::error::Error;
use vectask_nostd_internal::{BlockPlacement, Element, add_assign_rowwise, copy_block_rowwise};

#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceBackend;

impl<T: Element> CombineBackend<T> for DeviceBackend {
    const NAME: &'static str = "device";

    fn residency(&self) -> Residency {
        Residency::Device
    }

    unsafe fn batch_merge(
        &self,
        dst: &DenseMatrix<T>,
        placement: &BlockPlacement,
        src: &DenseMatrix<T>,
    ) -> Result<(), Error> {
        check_residency(Residency::Device, "the shared result", dst)?;
        check_residency(Residency::Device, "the batch output", src)?;
        let block = target_block(dst, placement, src)?;
        tracing::trace!(
            row = placement.row,
            col = placement.col,
            bulk = block.is_contiguous() && src.strided().is_contiguous(),
            "device-to-device copy"
        );
        // SAFETY: forwarded to our caller
        unsafe { copy_block_rowwise(&block, &src.strided()) }
            .map_err(|_| Error::shape_mismatch("the batch output", block.shape(), src.shape()))
    }

    fn batch_merge_commutative(
        &self,
        acc: &mut DenseMatrix<T>,
        contrib: &DenseMatrix<T>,
        ctx: &ExecContext,
    ) -> Result<(), Error> {
        check_residency(Residency::Device, "the accumulator", acc)?;
        check_residency(Residency::Device, "a commutative contribution", contrib)?;
        check_same_shape(acc, contrib)?;
        let dst = acc.exclusive_block_mut("the accumulator")?;
        tracing::trace!(device = ctx.device_id(), shape = ?acc.shape(), "add kernel");
        // SAFETY: `acc` is the sole handle to its storage, so `contrib` (which
        // is a distinct handle) can't alias it and nobody else can touch it
        unsafe { add_assign_rowwise(&dst, &contrib.strided()) }
            .map_err(|_| Error::shape_mismatch("a commutative contribution", dst.shape(), contrib.shape()))
    }
}
