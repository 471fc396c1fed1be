use crate::backend::CombineBackend;
use crate::buffer::DenseMatrix;
use crate::context::ExecContext;
use crate::error::Error;
use std::sync::{Mutex, PoisonError};
use vectask_nostd_internal::Element;

/// What [`SharedResults::fold_commutative`] did with a task's partial sum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FoldOutcome {
    /// the slot was empty, so the partial sum became the result
    Installed,
    /// the partial sum was added into the existing result and destroyed
    Merged,
}

/// The result slots shared by every task of one pipeline invocation.
///
/// Outputs with a disjoint-write strategy live in `destinations`. They are
/// allocated before the tasks start and the tasks write into them without
/// synchronization. Commutative outputs live behind a single mutex: the slot
/// starts out empty (unless the caller seeded it) and the first task to
/// finish installs its partial sum there.
pub(crate) struct SharedResults<T: Element> {
    destinations: Box<[Option<DenseMatrix<T>>]>,
    sums: Mutex<Box<[Option<DenseMatrix<T>>]>>,
}

impl<T: Element> SharedResults<T> {
    pub(crate) fn new(
        destinations: Vec<Option<DenseMatrix<T>>>,
        sums: Vec<Option<DenseMatrix<T>>>,
    ) -> Self {
        debug_assert_eq!(destinations.len(), sums.len());
        SharedResults {
            destinations: destinations.into_boxed_slice(),
            sums: Mutex::new(sums.into_boxed_slice()),
        }
    }

    pub(crate) fn destination(&self, output: usize) -> Option<&DenseMatrix<T>> {
        self.destinations.get(output).and_then(Option::as_ref)
    }

    /// Folds a task's partial sum for `output` into the shared slot.
    ///
    /// The lock is held while merging so that concurrent folds never
    /// interleave. Destroying the merged partial sum happens afterwards.
    pub(crate) fn fold_commutative<B: CombineBackend<T>>(
        &self,
        output: usize,
        partial: DenseMatrix<T>,
        backend: &B,
        ctx: &ExecContext,
    ) -> Result<FoldOutcome, Error> {
        let mut slots = self
            .sums
            .lock()
            .map_err(|_| Error::worker("the shared result lock is poisoned".to_string()))?;
        if output >= slots.len() {
            return Err(Error::missing_output(output, "there is no such result slot"));
        }
        if let Some(existing) = slots[output].as_mut() {
            backend.batch_merge_commutative(existing, &partial, ctx)?;
            drop(slots);
            ctx.factory().destroy(partial);
            Ok(FoldOutcome::Merged)
        } else {
            slots[output] = Some(partial);
            Ok(FoldOutcome::Installed)
        }
    }

    /// Hands over every output: destinations for the disjoint strategies and
    /// the accumulated sums for the commutative one (`None` if no task
    /// contributed).
    pub(crate) fn into_outputs(self) -> Vec<Option<DenseMatrix<T>>> {
        let sums = self.sums.into_inner().unwrap_or_else(PoisonError::into_inner);
        self.destinations
            .into_vec()
            .into_iter()
            .zip(sums.into_vec())
            .map(|(dst, sum)| dst.or(sum))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    #[test]
    fn first_fold_installs_then_merges() {
        let ctx = ExecContext::host();
        let results: SharedResults<f64> = SharedResults::new(vec![None], vec![None]);
        let a = ctx.factory().filled(1, 2, 1.0);
        let b = ctx.factory().filled(1, 2, 2.5);
        assert_eq!(
            results.fold_commutative(0, a, &HostBackend, &ctx).unwrap(),
            FoldOutcome::Installed
        );
        assert_eq!(
            results.fold_commutative(0, b, &HostBackend, &ctx).unwrap(),
            FoldOutcome::Merged
        );
        assert_eq!(ctx.factory().stats().live_buffers, 1);
        let mut outputs = results.into_outputs();
        assert_eq!(outputs.pop().unwrap().unwrap().to_vec(), vec![3.5, 3.5]);
    }

    #[test]
    fn failed_merge_keeps_existing_sum() {
        let ctx = ExecContext::host();
        let results: SharedResults<f64> = SharedResults::new(vec![None], vec![None]);
        let a = ctx.factory().filled(2, 2, 1.0);
        let wrong = ctx.factory().filled(1, 2, 1.0);
        results.fold_commutative(0, a, &HostBackend, &ctx).unwrap();
        assert!(results.fold_commutative(0, wrong, &HostBackend, &ctx).is_err());
        let outputs = results.into_outputs();
        assert_eq!(outputs[0].as_ref().unwrap().to_vec(), vec![1.0; 4]);
    }
}
