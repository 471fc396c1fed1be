//! Raw views of strided, row-major 2D blocks and the kernels that move data
//! between them.
//!
//! A block is described by a pointer to its first element, a shape and a row
//! stride (`row_skip`), so that element `(i, j)` lives at
//! `ptr + i * row_skip + j`. The row stride may exceed the number of columns,
//! which is what lets a block alias a sub-rectangle of a larger buffer without
//! copying.
//!
//! These types are deliberately pointer based. The destination of a
//! disjoint-write merge is a buffer that several tasks write into at the same
//! time (each task into its own rectangle). Rust's reference rules can't
//! express "disjoint rectangles of a strided buffer", so the kernels that
//! write to such a destination are `unsafe` and state the requirement
//! instead.

use crate::element::Element;
use core::ptr;
use core::slice;
use ndarray::{ArrayView2, ArrayViewMut2, ShapeBuilder, Zip};

use crate::combine::BlockPlacement;

/// A read-only strided block
#[derive(Clone, Copy, Debug)]
pub struct StridedBlock<T> {
    ptr: *const T,
    rows: usize,
    cols: usize,
    row_skip: usize,
}

impl<T: Element> StridedBlock<T> {
    /// # Safety
    /// For as long as the block (or any copy of it) is used, `ptr` must be
    /// valid for reads of `ptr.add(i * row_skip + j)` for every `i < rows`
    /// and `j < cols`.
    pub unsafe fn from_raw_parts(ptr: *const T, rows: usize, cols: usize, row_skip: usize) -> Self {
        debug_assert!(rows <= 1 || row_skip >= cols);
        StridedBlock {
            ptr,
            rows,
            cols,
            row_skip,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_skip(&self) -> usize {
        self.row_skip
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// `true` when the rows are packed back to back in memory
    pub fn is_contiguous(&self) -> bool {
        self.rows <= 1 || self.row_skip == self.cols
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    #[inline(always)]
    fn row_ptr(&self, i: usize) -> *const T {
        self.ptr.wrapping_add(i * self.row_skip)
    }

    /// # Safety
    /// `i < rows`, `j < cols` and nobody may be writing the element.
    #[inline(always)]
    pub unsafe fn get(&self, i: usize, j: usize) -> T {
        debug_assert!(i < self.rows && j < self.cols);
        unsafe { self.ptr.add(i * self.row_skip + j).read() }
    }

    /// Wraps the block in an ndarray view.
    ///
    /// # Safety
    /// The caller picks `'a`. Nothing may write to the block during `'a`.
    pub unsafe fn as_array_view<'a>(&self) -> ArrayView2<'a, T> {
        unsafe {
            ArrayView2::from_shape_ptr(
                (self.rows, self.cols).strides((self.row_skip, 1)),
                self.ptr,
            )
        }
    }
}

/// A writable strided block
#[derive(Clone, Copy, Debug)]
pub struct StridedBlockMut<T> {
    ptr: *mut T,
    rows: usize,
    cols: usize,
    row_skip: usize,
}

impl<T: Element> StridedBlockMut<T> {
    /// # Safety
    /// Same requirements as [`StridedBlock::from_raw_parts`], except that the
    /// elements must also be valid for writes.
    pub unsafe fn from_raw_parts(ptr: *mut T, rows: usize, cols: usize, row_skip: usize) -> Self {
        debug_assert!(rows <= 1 || row_skip >= cols);
        StridedBlockMut {
            ptr,
            rows,
            cols,
            row_skip,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_skip(&self) -> usize {
        self.row_skip
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_contiguous(&self) -> bool {
        self.rows <= 1 || self.row_skip == self.cols
    }

    pub fn as_const(&self) -> StridedBlock<T> {
        StridedBlock {
            ptr: self.ptr,
            rows: self.rows,
            cols: self.cols,
            row_skip: self.row_skip,
        }
    }

    #[inline(always)]
    fn row_ptr(&self, i: usize) -> *mut T {
        self.ptr.wrapping_add(i * self.row_skip)
    }

    /// The sub-block described by `placement`, or `None` if it doesn't fit.
    ///
    /// The sub-block shares this block's row stride.
    pub fn sub_block(&self, placement: &BlockPlacement) -> Option<StridedBlockMut<T>> {
        if !placement.fits_within(self.rows, self.cols) {
            return None;
        }
        Some(StridedBlockMut {
            // wrapping_add: an empty placement may start one past the last row
            ptr: self
                .ptr
                .wrapping_add(placement.row * self.row_skip + placement.col),
            rows: placement.n_rows,
            cols: placement.n_cols,
            row_skip: self.row_skip,
        })
    }

    /// # Safety
    /// `i < rows`, `j < cols` and nobody else may be accessing the element.
    #[inline(always)]
    pub unsafe fn set(&self, i: usize, j: usize, value: T) {
        debug_assert!(i < self.rows && j < self.cols);
        unsafe { self.ptr.add(i * self.row_skip + j).write(value) }
    }

    /// # Safety
    /// Nothing else may access the block during `'a`.
    pub unsafe fn as_array_view_mut<'a>(&self) -> ArrayViewMut2<'a, T> {
        unsafe {
            ArrayViewMut2::from_shape_ptr(
                (self.rows, self.cols).strides((self.row_skip, 1)),
                self.ptr,
            )
        }
    }
}

/// Copies `src` into `dst` one element at a time.
///
/// # Safety
/// `src` and `dst` must not overlap, and no other thread may access the
/// elements of `dst` while this runs.
pub unsafe fn copy_block_elementwise<T: Element>(
    dst: &StridedBlockMut<T>,
    src: &StridedBlock<T>,
) -> Result<(), &'static str> {
    if dst.shape() != src.shape() {
        return Err("source and destination blocks have different shapes");
    }
    for i in 0..src.rows {
        for j in 0..src.cols {
            unsafe { dst.set(i, j, src.get(i, j)) };
        }
    }
    Ok(())
}

/// Copies `src` into `dst` with bulk memory copies: a single copy when both
/// blocks are contiguous, otherwise one copy per row.
///
/// # Safety
/// Same as [`copy_block_elementwise`].
pub unsafe fn copy_block_rowwise<T: Element>(
    dst: &StridedBlockMut<T>,
    src: &StridedBlock<T>,
) -> Result<(), &'static str> {
    if dst.shape() != src.shape() {
        return Err("source and destination blocks have different shapes");
    }
    let (rows, cols) = src.shape();
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    if dst.is_contiguous() && src.is_contiguous() {
        unsafe { ptr::copy_nonoverlapping(src.ptr, dst.ptr, rows * cols) };
    } else {
        for i in 0..rows {
            unsafe { ptr::copy_nonoverlapping(src.row_ptr(i), dst.row_ptr(i), cols) };
        }
    }
    Ok(())
}

/// Element-wise `dst += src` over two ndarray views.
pub fn add_assign_view<T: Element>(
    dst: &mut ArrayViewMut2<T>,
    src: &ArrayView2<T>,
) -> Result<(), &'static str> {
    if dst.dim() != src.dim() {
        return Err("operands of the addition have different shapes");
    }
    Zip::from(dst).and(src).for_each(|d, &s| *d += s);
    Ok(())
}

/// Element-wise `dst += src`, processed one row slice at a time.
///
/// # Safety
/// Same as [`copy_block_elementwise`].
pub unsafe fn add_assign_rowwise<T: Element>(
    dst: &StridedBlockMut<T>,
    src: &StridedBlock<T>,
) -> Result<(), &'static str> {
    if dst.shape() != src.shape() {
        return Err("operands of the addition have different shapes");
    }
    let (rows, cols) = src.shape();
    if cols == 0 {
        return Ok(());
    }
    for i in 0..rows {
        let dst_row = unsafe { slice::from_raw_parts_mut(dst.row_ptr(i), cols) };
        let src_row = unsafe { slice::from_raw_parts(src.row_ptr(i), cols) };
        for (d, s) in dst_row.iter_mut().zip(src_row) {
            *d += *s;
        }
    }
    Ok(())
}
