//! Dense, row-major numeric buffers and the factory that hands them out.
//!
//! A [`DenseMatrix`] is a handle to (a rectangle of) shared storage. The
//! handle returned by [`BufferFactory::create`] and friends covers the whole
//! allocation. [`DenseMatrix::slice`] produces additional "view" handles that
//! alias a sub-rectangle of the same storage without copying it. Storage is
//! released once the last handle referencing it goes away, so destroying a
//! view never frees data that another handle can still see.
//!
//! Lifetimes are explicit: the engine calls [`BufferFactory::destroy`] at the
//! exact points where a buffer is no longer needed (e.g. at the end of every
//! batch). Every factory tracks how many buffers and views are alive, which
//! is what [`BufferFactory::stats`] reports.
//!
//! # Residency
//! Each buffer is tagged with a [`Residency`]. Device-resident buffers are
//! not meant to be addressed element by element from the orchestrating
//! thread: [`DenseMatrix::view`] and [`DenseMatrix::values_mut`] refuse them,
//! and the device backend only touches them through bulk copies and its own
//! add kernel. The remaining accessors work for either residency and amount
//! to explicit transfers: [`DenseMatrix::to_vec`] is a bulk download (one
//! copy per row), [`DenseMatrix::get`] downloads a single element and
//! [`DenseMatrix::fill`] is a fill kernel.

use crate::error::Error;
use ndarray::{ArrayView2, ArrayViewMut2};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vectask_nostd_internal::{Element, StridedBlock, StridedBlockMut, copy_block_rowwise};

/// Where a buffer's storage lives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Residency {
    Host,
    Device,
}

impl Residency {
    pub const fn name(self) -> &'static str {
        match self {
            Residency::Host => "host",
            Residency::Device => "device",
        }
    }
}

#[derive(Debug, Default)]
struct AllocCounters {
    live_buffers: AtomicUsize,
    live_views: AtomicUsize,
    created: AtomicUsize,
}

/// A snapshot of a factory's allocation accounting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocStats {
    /// allocations that haven't been released yet
    pub live_buffers: usize,
    /// view handles (see [`DenseMatrix::slice`]) that haven't been destroyed
    pub live_views: usize,
    /// allocations made over the factory's lifetime
    pub total_created: usize,
}

struct Storage<T> {
    cells: Box<[UnsafeCell<T>]>,
    counters: Arc<AllocCounters>,
}

// SAFETY: elements are only ever written in two ways:
// - through `&mut DenseMatrix` after checking that no other handle shares
//   the storage
// - through the `unsafe` block writes of the combine backends, whose callers
//   promise that nobody else touches the written rectangle at the same time
unsafe impl<T: Send> Sync for Storage<T> {}

impl<T> Storage<T> {
    fn base_ptr(&self) -> *mut T {
        UnsafeCell::raw_get(self.cells.as_ptr())
    }
}

impl<T> Drop for Storage<T> {
    fn drop(&mut self) {
        self.counters.live_buffers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Present in every view handle, so that views are counted until they are
/// destroyed.
struct ViewToken(Arc<AllocCounters>);

impl ViewToken {
    fn new(counters: &Arc<AllocCounters>) -> Self {
        counters.live_views.fetch_add(1, Ordering::AcqRel);
        ViewToken(Arc::clone(counters))
    }
}

impl Drop for ViewToken {
    fn drop(&mut self) {
        self.0.live_views.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A dense row-major matrix with a row stride (`row_skip`) that may exceed
/// its column count.
pub struct DenseMatrix<T: Element> {
    storage: Arc<Storage<T>>,
    // index of element (0, 0) within the storage
    offset: usize,
    rows: usize,
    cols: usize,
    row_skip: usize,
    residency: Residency,
    view: Option<ViewToken>,
}

impl<T: Element> std::fmt::Debug for DenseMatrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseMatrix")
            .field("element", &T::NAME)
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("row_skip", &self.row_skip)
            .field("residency", &self.residency)
            .field("is_view", &self.is_view())
            .finish()
    }
}

impl<T: Element> DenseMatrix<T> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row_skip(&self) -> usize {
        self.row_skip
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// `true` if this handle was produced by [`DenseMatrix::slice`]
    pub fn is_view(&self) -> bool {
        self.view.is_some()
    }

    /// Pointer to element `(0, 0)`.
    ///
    /// For device-resident buffers, this is a device address and must not be
    /// dereferenced by host code.
    pub fn as_ptr(&self) -> *const T {
        self.storage.base_ptr().wrapping_add(self.offset) as *const T
    }

    /// Creates a view of rows `[row_lower, row_upper)` and columns
    /// `[col_lower, col_upper)` that aliases this buffer's storage.
    pub fn slice(
        &self,
        row_lower: usize,
        row_upper: usize,
        col_lower: usize,
        col_upper: usize,
    ) -> Result<DenseMatrix<T>, Error> {
        if row_lower > row_upper
            || row_upper > self.rows
            || col_lower > col_upper
            || col_upper > self.cols
        {
            return Err(Error::slice_bounds(
                [row_lower, row_upper, col_lower, col_upper],
                self.rows,
                self.cols,
            ));
        }
        Ok(DenseMatrix {
            storage: Arc::clone(&self.storage),
            offset: self.offset + row_lower * self.row_skip + col_lower,
            rows: row_upper - row_lower,
            cols: col_upper - col_lower,
            row_skip: self.row_skip,
            residency: self.residency,
            view: Some(ViewToken::new(&self.storage.counters)),
        })
    }

    /// Shorthand for a view of rows `[row_lower, row_upper)` and every column
    pub fn slice_rows(&self, row_lower: usize, row_upper: usize) -> Result<DenseMatrix<T>, Error> {
        self.slice(row_lower, row_upper, 0, self.cols)
    }

    /// Reads a single element. Panics if `(i, j)` is out of bounds.
    ///
    /// For device buffers this amounts to a (slow) single-element download.
    pub fn get(&self, i: usize, j: usize) -> T {
        assert!(
            i < self.rows && j < self.cols,
            "({i}, {j}) is out of bounds for a {}x{} matrix",
            self.rows,
            self.cols
        );
        // SAFETY: bounds were checked above
        unsafe { self.strided().get(i, j) }
    }

    /// Copies the logical contents into a row-major `Vec` (without padding),
    /// one row at a time.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.rows * self.cols);
        if self.cols == 0 {
            return out;
        }
        for i in 0..self.rows {
            let start = self.as_ptr().wrapping_add(i * self.row_skip);
            // SAFETY: row i lies inside the storage and, as for `view`, the
            // only concurrent writers are callers that promised nobody reads it
            let row = unsafe { std::slice::from_raw_parts(start, self.cols) };
            out.extend_from_slice(row);
        }
        out
    }

    /// Read-only ndarray view of a host-resident buffer
    pub fn view(&self) -> Result<ArrayView2<'_, T>, Error> {
        if self.residency != Residency::Host {
            return Err(Error::residency("an ndarray-viewed buffer", "host"));
        }
        // SAFETY: the view borrows `self`. Concurrent block writes into this
        // storage are only made by callers that promised nobody reads it.
        Ok(unsafe { self.strided().as_array_view() })
    }

    /// Mutable ndarray view of a host-resident buffer.
    ///
    /// Fails if any other handle (e.g. a view) shares the storage.
    pub fn values_mut(&mut self) -> Result<ArrayViewMut2<'_, T>, Error> {
        if self.residency != Residency::Host {
            return Err(Error::residency("a mutably viewed buffer", "host"));
        }
        let block = self.exclusive_block_mut("the buffer")?;
        // SAFETY: we hold the only handle and `&mut self` for the whole
        // lifetime of the returned view
        Ok(unsafe { block.as_array_view_mut() })
    }

    /// Overwrites every element with `value`.
    pub fn fill(&mut self, value: T) -> Result<(), Error> {
        let block = self.exclusive_block_mut("the buffer")?;
        for i in 0..block.rows() {
            for j in 0..block.cols() {
                // SAFETY: exclusive access was checked above
                unsafe { block.set(i, j, value) };
            }
        }
        Ok(())
    }

    pub(crate) fn strided(&self) -> StridedBlock<T> {
        // SAFETY: offset, rows, cols & row_skip always describe a region
        // inside the storage (enforced by the factory and by `slice`)
        unsafe { StridedBlock::from_raw_parts(self.as_ptr(), self.rows, self.cols, self.row_skip) }
    }

    /// A writable block covering the whole buffer, for use with the
    /// disjoint-write kernels. Writing through it is only sound while no
    /// other thread accesses the written elements.
    pub(crate) fn shared_block_mut(&self) -> StridedBlockMut<T> {
        unsafe {
            StridedBlockMut::from_raw_parts(
                self.storage.base_ptr().wrapping_add(self.offset),
                self.rows,
                self.cols,
                self.row_skip,
            )
        }
    }

    /// A writable block, provided that this is the only handle to the
    /// storage.
    pub(crate) fn exclusive_block_mut(
        &mut self,
        what: &'static str,
    ) -> Result<StridedBlockMut<T>, Error> {
        if Arc::get_mut(&mut self.storage).is_none() {
            return Err(Error::aliased_storage(what));
        }
        Ok(self.shared_block_mut())
    }

    pub(crate) fn is_exclusive(&mut self) -> bool {
        Arc::get_mut(&mut self.storage).is_some()
    }

    /// Returns `self` if it is the only handle to its storage, otherwise a
    /// private copy (allocated with the same residency and accounting) made
    /// with bulk row copies.
    pub(crate) fn into_exclusive(mut self) -> Result<DenseMatrix<T>, Error> {
        if Arc::get_mut(&mut self.storage).is_some() {
            return Ok(self);
        }
        let factory = BufferFactory {
            residency: self.residency,
            counters: Arc::clone(&self.storage.counters),
        };
        let copy = factory.create(self.rows, self.cols);
        // SAFETY: `copy` is a fresh allocation that nothing else can see
        unsafe { copy_block_rowwise(&copy.shared_block_mut(), &self.strided()) }
            .map_err(|_| Error::shape_mismatch("a private copy", copy.shape(), self.shape()))?;
        Ok(copy)
    }
}

/// Allocates buffers of a single residency and keeps count of them.
///
/// Cloning a factory shares its accounting.
#[derive(Clone, Debug)]
pub struct BufferFactory {
    residency: Residency,
    counters: Arc<AllocCounters>,
}

impl BufferFactory {
    pub fn new(residency: Residency) -> Self {
        BufferFactory {
            residency,
            counters: Arc::new(AllocCounters::default()),
        }
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// A factory for `residency` that shares this factory's accounting
    pub fn with_residency(&self, residency: Residency) -> Self {
        BufferFactory {
            residency,
            counters: Arc::clone(&self.counters),
        }
    }

    fn allocate<T: Element>(
        &self,
        rows: usize,
        cols: usize,
        row_skip: usize,
        mut init: impl FnMut(usize, usize) -> T,
    ) -> DenseMatrix<T> {
        debug_assert!(row_skip >= cols);
        let cells: Box<[UnsafeCell<T>]> = (0..rows * row_skip)
            .map(|idx| {
                let (i, j) = (idx / row_skip, idx % row_skip);
                UnsafeCell::new(if j < cols { init(i, j) } else { T::default() })
            })
            .collect();
        self.counters.created.fetch_add(1, Ordering::AcqRel);
        self.counters.live_buffers.fetch_add(1, Ordering::AcqRel);
        DenseMatrix {
            storage: Arc::new(Storage {
                cells,
                counters: Arc::clone(&self.counters),
            }),
            offset: 0,
            rows,
            cols,
            row_skip,
            residency: self.residency,
            view: None,
        }
    }

    /// A zero-initialized `rows` x `cols` buffer.
    pub fn create<T: Element>(&self, rows: usize, cols: usize) -> DenseMatrix<T> {
        self.allocate(rows, cols, cols, |_, _| T::default())
    }

    /// A zero-initialized buffer whose rows are `row_skip` elements apart.
    pub fn create_padded<T: Element>(
        &self,
        rows: usize,
        cols: usize,
        row_skip: usize,
    ) -> Result<DenseMatrix<T>, Error> {
        if row_skip < cols {
            return Err(Error::integer_range(
                "row_skip",
                row_skip as i64,
                cols as i64,
                i64::MAX,
            ));
        }
        Ok(self.allocate(rows, cols, row_skip, |_, _| T::default()))
    }

    pub fn filled<T: Element>(&self, rows: usize, cols: usize, value: T) -> DenseMatrix<T> {
        self.allocate(rows, cols, cols, |_, _| value)
    }

    pub fn from_fn<T: Element>(
        &self,
        rows: usize,
        cols: usize,
        f: impl FnMut(usize, usize) -> T,
    ) -> DenseMatrix<T> {
        self.allocate(rows, cols, cols, f)
    }

    /// A buffer initialized from row-major `data`
    pub fn from_slice<T: Element>(
        &self,
        rows: usize,
        cols: usize,
        data: &[T],
    ) -> Result<DenseMatrix<T>, Error> {
        if data.len() != rows * cols {
            return Err(Error::shape_mismatch(
                "the initialization data",
                (rows, cols),
                (data.len() / cols.max(1), cols),
            ));
        }
        Ok(self.allocate(rows, cols, cols, |i, j| data[i * cols + j]))
    }

    /// Releases a buffer or view handle.
    ///
    /// The underlying storage is freed once no handle references it anymore.
    pub fn destroy<T: Element>(&self, buffer: DenseMatrix<T>) {
        drop(buffer)
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            live_buffers: self.counters.live_buffers.load(Ordering::Acquire),
            live_views: self.counters.live_views.load(Ordering::Acquire),
            total_created: self.counters.created.load(Ordering::Acquire),
        }
    }
}
