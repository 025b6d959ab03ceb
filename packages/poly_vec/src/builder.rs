use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::{DropPolicy, Offset, PolyVec};

/// Builder for creating an instance of [`PolyVec`].
///
/// All settings are optional. The offset type is selected through the type parameter `O`.
///
/// # Examples
///
/// ```
/// use std::fmt::Debug;
///
/// use poly_vec::{DropPolicy, PolyVec};
///
/// let vec = PolyVec::<dyn Debug, u32>::builder()
///     .slot_capacity(64)
///     .byte_capacity(4096)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// assert!(vec.byte_capacity() >= 4096);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[must_use]
pub struct PolyVecBuilder<I: ?Sized, O: Offset = usize> {
    slot_capacity: usize,
    byte_capacity: usize,
    alignment: usize,
    drop_policy: DropPolicy,

    _types: PhantomData<fn() -> (*const I, O)>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<I: ?Sized, O: Offset> PolyVecBuilder<I, O> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            slot_capacity: 0,
            byte_capacity: 0,
            alignment: align_of::<usize>(),
            drop_policy: DropPolicy::default(),
            _types: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the number of slots the container can track before its bookkeeping reallocates.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<u64>::builder().slot_capacity(100).build();
    /// ```
    #[inline]
    pub fn slot_capacity(mut self, slots: usize) -> Self {
        self.slot_capacity = slots;
        self
    }

    /// Sets the number of bytes the backing buffer allocates up front.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<u64>::builder().byte_capacity(1024).build();
    ///
    /// assert!(vec.byte_capacity() >= 1024);
    /// ```
    #[inline]
    pub fn byte_capacity(mut self, bytes: usize) -> Self {
        self.byte_capacity = bytes;
        self
    }

    /// Sets the initial alignment of the backing buffer's base address.
    ///
    /// The buffer realigns itself automatically when an object with a larger alignment is
    /// inserted. Setting the largest expected alignment up front avoids that relocation.
    /// The default is the alignment of `usize`.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<u64>::builder().alignment(64).build();
    ///
    /// assert_eq!(vec.as_ptr() as usize % 64, 0);
    /// ```
    #[inline]
    pub fn alignment(mut self, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "PolyVec alignment must be a power of two, got {alignment}"
        );
        self.alignment = alignment;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the container. This governs how to treat
    /// remaining objects when the container is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::{DropPolicy, PolyVec};
    ///
    /// let vec = PolyVec::<u64>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the container with the specified configuration.
    #[must_use]
    #[inline]
    pub fn build(self) -> PolyVec<I, O> {
        let mut vec = PolyVec::new_inner(self.alignment, self.drop_policy);
        vec.reserve(self.slot_capacity, self.byte_capacity);
        vec
    }
}

impl<I: ?Sized, O: Offset> fmt::Debug for PolyVecBuilder<I, O> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyVecBuilder")
            .field("slot_capacity", &self.slot_capacity)
            .field("byte_capacity", &self.byte_capacity)
            .field("alignment", &self.alignment)
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PolyVecBuilder<dyn Debug>: Send, Debug);
    assert_not_impl_any!(PolyVecBuilder<dyn Debug>: Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = PolyVecBuilder::<dyn Debug>::new();

        assert_eq!(builder.slot_capacity, 0);
        assert_eq!(builder.byte_capacity, 0);
        assert_eq!(builder.alignment, align_of::<usize>());
        assert_eq!(builder.drop_policy, DropPolicy::default());
    }

    #[test]
    fn settings_are_recorded() {
        let builder = PolyVecBuilder::<dyn Debug, u16>::new()
            .slot_capacity(3)
            .byte_capacity(40)
            .alignment(32)
            .drop_policy(DropPolicy::MustNotDropItems);

        assert_eq!(builder.slot_capacity, 3);
        assert_eq!(builder.byte_capacity, 40);
        assert_eq!(builder.alignment, 32);
        assert_eq!(builder.drop_policy, DropPolicy::MustNotDropItems);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        _ = PolyVecBuilder::<dyn Debug>::new().alignment(12);
    }

    #[test]
    fn build_applies_capacity_and_alignment() {
        let vec = PolyVecBuilder::<dyn Debug>::new()
            .byte_capacity(256)
            .alignment(128)
            .build();

        assert!(vec.byte_capacity() >= 256);
        assert_eq!(vec.as_ptr() as usize % 128, 0);
        assert!(vec.is_empty());
    }
}
