use core::fmt::Debug;
use core::ops::{Add, AddAssign};

/// The scalar types that can be stored in a numeric buffer.
///
/// `Default::default()` must be the additive identity, since freshly created
/// buffers are filled with it.
pub trait Element:
    Copy + Default + Debug + PartialEq + Add<Output = Self> + AddAssign + Send + Sync + 'static
{
    /// short name used in log messages
    const NAME: &'static str;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;
}

impl Element for f32 {
    const NAME: &'static str = "f32";

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline(always)]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f64 {
    const NAME: &'static str = "f64";

    #[inline(always)]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline(always)]
    fn to_f64(self) -> f64 {
        self
    }
}
