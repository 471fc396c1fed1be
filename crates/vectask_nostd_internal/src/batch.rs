use core::num::NonZeroUsize;
use core::ops::Range;

/// Iterator over the batches of a task's row range.
///
/// Each item is `[r, min(r + batch_size, row_high))`. An empty row range
/// produces no batches.
#[derive(Clone, Debug)]
pub struct BatchRanges {
    next: usize,
    end: usize,
    batch_size: usize,
}

impl Iterator for BatchRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next;
        let stop = start.saturating_add(self.batch_size).min(self.end);
        self.next = stop;
        Some(start..stop)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchRanges {}

pub fn batch_ranges(rows: Range<usize>, batch_size: NonZeroUsize) -> BatchRanges {
    BatchRanges {
        next: rows.start,
        end: rows.end,
        batch_size: batch_size.get(),
    }
}
