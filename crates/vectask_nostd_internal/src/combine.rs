//! Combine strategies describe how the partial output that a task computes
//! for a batch of rows gets merged into the result that is shared by every
//! task of a pipeline invocation.
//!
//! The compiler hands us a raw integer tag per output ([`CombineTag`]). We
//! keep the raw tag around (rather than decoding it up front) so that an
//! inconsistency between the compiler and the engine surfaces as an error
//! from the task that consults it, with the offending value attached.

use core::fmt;
use core::ops::Range;

/// The raw, undecoded combine tag for a single output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CombineTag(pub i64);

impl fmt::Display for CombineTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombineStrategy {
    /// every batch writes a disjoint range of the result's rows
    Rows,
    /// every batch writes a disjoint range of the result's columns
    Cols,
    /// every task contributes a full-shaped partial result that gets summed
    Add,
}

impl CombineStrategy {
    pub const fn tag(self) -> CombineTag {
        match self {
            CombineStrategy::Rows => CombineTag(1),
            CombineStrategy::Cols => CombineTag(2),
            CombineStrategy::Add => CombineTag(3),
        }
    }

    pub fn from_tag(tag: CombineTag) -> Result<Self, UnsupportedCombine> {
        match tag.0 {
            1 => Ok(CombineStrategy::Rows),
            2 => Ok(CombineStrategy::Cols),
            3 => Ok(CombineStrategy::Add),
            _ => Err(UnsupportedCombine { tag }),
        }
    }

    /// `true` when contributions are reduced rather than written into
    /// disjoint regions
    pub const fn is_commutative(self) -> bool {
        matches!(self, CombineStrategy::Add)
    }

    pub const fn name(self) -> &'static str {
        match self {
            CombineStrategy::Rows => "rows",
            CombineStrategy::Cols => "cols",
            CombineStrategy::Add => "add",
        }
    }
}

impl From<CombineStrategy> for CombineTag {
    fn from(strategy: CombineStrategy) -> CombineTag {
        strategy.tag()
    }
}

/// Produced when a tag doesn't correspond to any [`CombineStrategy`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnsupportedCombine {
    pub tag: CombineTag,
}

impl fmt::Display for UnsupportedCombine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "combine strategy `{}` not supported", self.tag)
    }
}

/// The rectangle of a result that a single batch of a disjoint-write output
/// covers (in result-local coordinates).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPlacement {
    pub row: usize,
    pub col: usize,
    pub n_rows: usize,
    pub n_cols: usize,
}

impl BlockPlacement {
    /// whether the block lies within a `rows` x `cols` matrix
    pub fn fits_within(&self, rows: usize, cols: usize) -> bool {
        match (self.row.checked_add(self.n_rows), self.col.checked_add(self.n_cols)) {
            (Some(row_stop), Some(col_stop)) => row_stop <= rows && col_stop <= cols,
            _ => false,
        }
    }
}

/// Computes where the output of the batch covering the global rows
/// `batch_rows` lands in the result.
///
/// `offset` translates global row coordinates into result-local coordinates
/// (it is nonzero when the result only represents a horizontal sub-range of
/// a larger logical matrix). `out_rows` is the output's total row count and
/// `result_cols` is the column count of the result buffer.
///
/// For [`CombineStrategy::Cols`], the task's rows index the result's
/// columns, so the block spans all `out_rows` rows.
pub fn block_placement(
    strategy: CombineStrategy,
    batch_rows: Range<usize>,
    offset: usize,
    out_rows: usize,
    result_cols: usize,
) -> Result<BlockPlacement, &'static str> {
    let start = batch_rows
        .start
        .checked_sub(offset)
        .ok_or("the output offset exceeds the first row of the batch")?;
    let len = batch_rows.end.saturating_sub(batch_rows.start);
    match strategy {
        CombineStrategy::Rows => Ok(BlockPlacement {
            row: start,
            col: 0,
            n_rows: len,
            n_cols: result_cols,
        }),
        CombineStrategy::Cols => Ok(BlockPlacement {
            row: 0,
            col: start,
            n_rows: out_rows,
            n_cols: len,
        }),
        CombineStrategy::Add => Err("commutative outputs are not written to a block"),
    }
}
