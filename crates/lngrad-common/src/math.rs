//! Small integer helpers shared by launch planning and the reference kernels

/// `ceil(a / b)` for `b > 0`.
#[inline]
pub const fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}
