//! Utility functions.

use core::ptr::{null_mut, NonNull};

/// Returns the smallest `align`-aligned value greater or equal to `addr`
/// or `None` if no such value fits in a `usize`.
///
/// # Panics
/// Panics in debug builds if `align` is not a power-of-two.
#[inline]
pub(crate) fn align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two(), "Alignment should be a power of two.");
    Some(addr.checked_add(align - 1)? & !(align - 1))
}

/// Returns the greatest `align`-aligned value less or equal to `addr`.
#[inline]
pub(crate) fn align_down(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two(), "Alignment should be a power of two.");
    addr & !(align - 1)
}

/// Returns the largest power of two that divides `value`.
/// Zero is divisible by everything, so it reports the largest representable power.
#[inline]
pub(crate) fn alignment_of(value: usize) -> usize {
    match value {
        0 => 1 << (usize::BITS - 1),
        v => 1 << v.trailing_zeros(),
    }
}

#[inline(always)]
pub(crate) fn raw_ptr<T>(p: Option<NonNull<T>>) -> *mut T {
    p.map_or(null_mut(), |p| p.as_ptr())
}
