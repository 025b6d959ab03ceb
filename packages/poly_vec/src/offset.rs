use std::fmt::Debug;

use num_traits::{FromPrimitive, PrimInt, ToPrimitive, Unsigned};

/// An unsigned integer type used to store byte offsets and slot indexes inside a
/// [`PolyVec`][crate::PolyVec].
///
/// The default is `usize`. A narrower type such as `u32` or `u16` shrinks the slot offset table
/// and the free list at the cost of a smaller maximum buffer size. The per-slot type record
/// that dispatches to each occupant is not affected. Every conversion into the
/// narrower type is checked: an insertion that would produce a byte offset or slot index not
/// representable in the offset type panics instead of silently truncating.
///
/// This trait is implemented for every unsigned primitive integer type.
///
/// # Examples
///
/// ```
/// use poly_vec::PolyVec;
///
/// // Byte offsets and free slot indexes are stored as u16.
/// let mut vec = PolyVec::<u32, u16>::default();
///
/// let index = vec.push(42_u32);
/// assert_eq!(vec[index], 42);
/// ```
pub trait Offset: PrimInt + Unsigned + FromPrimitive + ToPrimitive + Debug + 'static {}

impl<T> Offset for T where T: PrimInt + Unsigned + FromPrimitive + ToPrimitive + Debug + 'static {}

/// Converts a `usize` into the offset type.
///
/// # Panics
///
/// Panics if the value is not representable in `O`.
#[must_use]
pub(crate) fn narrow<O: Offset>(value: usize) -> O {
    O::from_usize(value).unwrap_or_else(|| {
        panic!(
            "value {value} exceeds the range of the poly_vec offset type {}",
            std::any::type_name::<O>()
        )
    })
}

/// Converts a value of the offset type back into a `usize`.
///
/// Every stored offset was produced by [`narrow()`] so this only fails if the offset type is
/// wider than `usize` and the value did not originate from this crate.
#[must_use]
pub(crate) fn widen<O: Offset>(value: O) -> usize {
    value
        .to_usize()
        .expect("offsets are always narrowed from usize, so widening cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_and_widen_preserve_value() {
        let narrowed: u16 = narrow(1234);
        assert_eq!(narrowed, 1234);
        assert_eq!(widen(narrowed), 1234);

        let narrowed: usize = narrow(usize::MAX);
        assert_eq!(widen(narrowed), usize::MAX);
    }

    #[test]
    fn narrow_accepts_type_maximum() {
        let narrowed: u8 = narrow(255);
        assert_eq!(narrowed, u8::MAX);
    }

    #[test]
    #[should_panic]
    fn narrow_past_type_maximum_panics() {
        let _narrowed: u8 = narrow(256);
    }
}
