// We follow the same approach as everywhere else in the project: a single
// opaque public `Error` that wraps a private `ErrorKind`, with one small
// struct per kind. `vectask_nostd_internal` can't use any of this (no std),
// so it reports problems with `&'static str` or small `Copy` types, and we
// wrap those here.

use std::ops::Range;
use vectask_nostd_internal::{CombineTag, UnsupportedCombine};

/// The boxed error that a compiled pipeline function returns on failure
pub type PipelineFnError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The underlying internal error type
#[non_exhaustive]
#[derive(Debug)]
enum ErrorKind {
    /// A buffer stored somewhere we can't address it from here (e.g. a host
    /// buffer handed to the device backend)
    Residency(ResidencyError),
    /// Mutable access was requested for storage that other handles alias
    AliasedStorage(AliasedStorageError),
    /// The requested function variant doesn't exist
    FunctionId(FunctionIdError),
    /// An integer lies outside of the acceptable range of values
    IntegerRange(IntegerRangeError),
    /// An output buffer that should exist doesn't
    MissingOutput(MissingOutputError),
    /// Two tasks (or two runs of one task) would write the same rows of a
    /// disjoint-write output
    OverlappingRows(OverlappingRowsError),
    /// A compiled pipeline function failed
    PipelineFunction(PipelineFunctionError),
    /// The operands of a merge have incompatible shapes
    ShapeMismatch(ShapeMismatchError),
    /// A slice doesn't lie within its parent
    SliceBounds(SliceBoundsError),
    /// The compiler handed us a combine tag that we don't know about. This
    /// points at an inconsistency between compiler and engine
    UnsupportedCombine(UnsupportedCombineError),
    /// A worker failed outside of the pipeline function (it panicked, a lock
    /// got poisoned, the pool couldn't be built, ...)
    Worker(WorkerError),
}

// define constructor methods for Error
impl Error {
    pub(crate) fn residency(what: &'static str, expected: &'static str) -> Self {
        Error {
            kind: ErrorKind::Residency(ResidencyError { what, expected }),
        }
    }

    pub(crate) fn aliased_storage(what: &'static str) -> Self {
        Error {
            kind: ErrorKind::AliasedStorage(AliasedStorageError { what }),
        }
    }

    pub(crate) fn function_id(id: u32, n_variants: usize) -> Self {
        Error {
            kind: ErrorKind::FunctionId(FunctionIdError { id, n_variants }),
        }
    }

    /// produce an error indicating that an integer lies outside the acceptable
    /// range of values
    pub(crate) fn integer_range(
        description: &'static str,
        actual: i64,
        min_val: i64,
        max_val: i64,
    ) -> Self {
        Error {
            kind: ErrorKind::IntegerRange(IntegerRangeError {
                description,
                actual,
                min_val,
                max_val,
            }),
        }
    }

    pub(crate) fn missing_output(output: usize, what: &'static str) -> Self {
        Error {
            kind: ErrorKind::MissingOutput(MissingOutputError { output, what }),
        }
    }

    pub(crate) fn overlapping_rows(rows: Range<usize>, other: Range<usize>) -> Self {
        Error {
            kind: ErrorKind::OverlappingRows(OverlappingRowsError { rows, other }),
        }
    }

    pub(crate) fn pipeline_function(function_id: u32, source: PipelineFnError) -> Self {
        Error {
            kind: ErrorKind::PipelineFunction(PipelineFunctionError {
                function_id,
                source,
            }),
        }
    }

    pub(crate) fn shape_mismatch(
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    ) -> Self {
        Error {
            kind: ErrorKind::ShapeMismatch(ShapeMismatchError {
                what,
                expected,
                actual,
            }),
        }
    }

    pub(crate) fn slice_bounds(
        requested: [usize; 4],
        parent_rows: usize,
        parent_cols: usize,
    ) -> Self {
        Error {
            kind: ErrorKind::SliceBounds(SliceBoundsError {
                requested,
                parent_rows,
                parent_cols,
            }),
        }
    }

    pub(crate) fn unsupported_combine(output: usize, err: UnsupportedCombine) -> Self {
        Error {
            kind: ErrorKind::UnsupportedCombine(UnsupportedCombineError {
                output,
                tag: err.tag,
            }),
        }
    }

    pub(crate) fn worker(what: String) -> Self {
        Error {
            kind: ErrorKind::Worker(WorkerError { what }),
        }
    }

    /// The offending tag, if this error reports an unsupported combine
    /// strategy
    pub fn unsupported_combine_tag(&self) -> Option<CombineTag> {
        match &self.kind {
            ErrorKind::UnsupportedCombine(err) => Some(err.tag),
            _ => None,
        }
    }

    /// `true` if a compiled pipeline function reported the failure
    pub fn is_pipeline_function(&self) -> bool {
        matches!(self.kind, ErrorKind::PipelineFunction(_))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::PipelineFunction(err) => Some(err.source.as_ref()),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.kind.fmt(f)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            ErrorKind::Residency(ref err) => err.fmt(f),
            ErrorKind::AliasedStorage(ref err) => err.fmt(f),
            ErrorKind::FunctionId(ref err) => err.fmt(f),
            ErrorKind::IntegerRange(ref err) => err.fmt(f),
            ErrorKind::MissingOutput(ref err) => err.fmt(f),
            ErrorKind::OverlappingRows(ref err) => err.fmt(f),
            ErrorKind::PipelineFunction(ref err) => err.fmt(f),
            ErrorKind::ShapeMismatch(ref err) => err.fmt(f),
            ErrorKind::SliceBounds(ref err) => err.fmt(f),
            ErrorKind::UnsupportedCombine(ref err) => err.fmt(f),
            ErrorKind::Worker(ref err) => err.fmt(f),
        }
    }
}

#[derive(Clone, Debug)]
struct ResidencyError {
    what: &'static str,
    expected: &'static str,
}

impl core::fmt::Display for ResidencyError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{} must be {}-resident", self.what, self.expected)
    }
}

#[derive(Clone, Debug)]
struct AliasedStorageError {
    what: &'static str,
}

impl core::fmt::Display for AliasedStorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} can't be modified while other handles alias its storage",
            self.what
        )
    }
}

#[derive(Clone, Debug)]
struct FunctionIdError {
    id: u32,
    n_variants: usize,
}

impl core::fmt::Display for FunctionIdError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "function id {} is invalid, the pipeline has {} variant(s)",
            self.id, self.n_variants
        )
    }
}

/// An error that occurs when an integer lies outside of the acceptable
/// range of values
#[derive(Clone, Debug)]
struct IntegerRangeError {
    description: &'static str,
    actual: i64,
    min_val: i64,
    max_val: i64,
}

impl core::fmt::Display for IntegerRangeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} has a value of {}. The value should be no less than {} and \
             not exceed {}",
            self.description, self.actual, self.min_val, self.max_val
        )
    }
}

#[derive(Clone, Debug)]
struct MissingOutputError {
    output: usize,
    what: &'static str,
}

impl core::fmt::Display for MissingOutputError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "output {}: {}", self.output, self.what)
    }
}

#[derive(Debug)]
struct PipelineFunctionError {
    function_id: u32,
    source: PipelineFnError,
}

impl core::fmt::Display for PipelineFunctionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "pipeline function {} failed: {}",
            self.function_id, self.source
        )
    }
}

#[derive(Clone, Debug)]
struct ShapeMismatchError {
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
}

impl core::fmt::Display for ShapeMismatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let (er, ec) = self.expected;
        let (ar, ac) = self.actual;
        write!(
            f,
            "{} has a shape of {ar}x{ac}, but {er}x{ec} was expected",
            self.what
        )
    }
}

#[derive(Clone, Debug)]
struct SliceBoundsError {
    // [row_lower, row_upper, col_lower, col_upper]
    requested: [usize; 4],
    parent_rows: usize,
    parent_cols: usize,
}

impl core::fmt::Display for SliceBoundsError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let [rl, ru, cl, cu] = self.requested;
        write!(
            f,
            "the slice [{rl}, {ru}) x [{cl}, {cu}) doesn't lie within a {}x{} \
             matrix",
            self.parent_rows, self.parent_cols
        )
    }
}

#[derive(Clone, Debug)]
struct UnsupportedCombineError {
    output: usize,
    tag: CombineTag,
}

impl core::fmt::Display for UnsupportedCombineError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "output {}: combine strategy `{}` not supported",
            self.output, self.tag
        )
    }
}

#[derive(Clone, Debug)]
struct OverlappingRowsError {
    rows: Range<usize>,
    other: Range<usize>,
}

impl core::fmt::Display for OverlappingRowsError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "rows [{}, {}) overlap rows [{}, {}), which are already being written",
            self.rows.start, self.rows.end, self.other.start, self.other.end
        )
    }
}

#[derive(Clone, Debug)]
struct WorkerError {
    what: String,
}

impl core::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "worker failure: {}", self.what)
    }
}
