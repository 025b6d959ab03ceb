use std::alloc::Layout;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::Upcast;

/// Remembers how to reach and destroy the occupant of a live slot while forgetting its type.
///
/// The container keeps one `Option<SlotMeta<I>>` per slot. `None` is the tombstone of a vacant
/// slot, so liveness checks never touch the object bytes themselves.
pub(crate) struct SlotMeta<I: ?Sized> {
    /// Rebuilds a pointer to the interface type from the address of the occupant.
    /// Monomorphized for the concrete type of the occupant.
    upcast_fn: fn(*mut u8) -> *mut I,

    /// Layout of the concrete type of the occupant.
    layout: Layout,

    /// Whether the occupant may be duplicated by copying its bytes.
    bitwise_copy: bool,
}

impl<I: ?Sized> SlotMeta<I> {
    /// Creates the metadata for an occupant of type `T`.
    #[must_use]
    pub(crate) fn for_type<T: Upcast<I>>(bitwise_copy: bool) -> Self {
        Self {
            upcast_fn: upcast_fn::<T, I>,
            layout: Layout::new::<T>(),
            bitwise_copy,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub(crate) fn is_bitwise_copy(&self) -> bool {
        self.bitwise_copy
    }

    /// Returns a pointer to the occupant as the interface type.
    #[must_use]
    pub(crate) fn object_ptr(&self, data: NonNull<u8>) -> NonNull<I> {
        let ptr = (self.upcast_fn)(data.as_ptr());

        debug_assert_eq!(
            ptr.cast::<u8>(),
            data.as_ptr(),
            "Upcast implementation moved the pointer"
        );

        // SAFETY: Upcast implementations are required to preserve the address, which came
        // from a NonNull.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    /// Runs the destructor of the occupant through the interface type.
    ///
    /// # Safety
    ///
    /// `data` must point to a live occupant described by this metadata, and the occupant must
    /// not be used again after this call.
    pub(crate) unsafe fn destroy(&self, data: NonNull<u8>) {
        let object = self.object_ptr(data);

        // SAFETY: Forwarding guarantee from caller that the occupant is live and will not be
        // used again. The pointer carries the metadata of the concrete type, so the correct
        // destructor runs.
        unsafe {
            ptr::drop_in_place(object.as_ptr());
        }
    }
}

impl<I: ?Sized> Clone for SlotMeta<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: ?Sized> Copy for SlotMeta<I> {}

impl<I: ?Sized> fmt::Debug for SlotMeta<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotMeta")
            .field("upcast_fn", &(self.upcast_fn as *const ()))
            .field("layout", &self.layout)
            .field("bitwise_copy", &self.bitwise_copy)
            .finish()
    }
}

fn upcast_fn<T: Upcast<I>, I: ?Sized>(data: *mut u8) -> *mut I {
    T::upcast(data.cast::<T>())
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::mem::ManuallyDrop;
    use std::rc::Rc;

    use super::*;

    trait Named {
        fn name(&self) -> &'static str;
    }

    /// Test helper that counts how many times it has been dropped.
    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }

    impl Named for DropCounter {
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    crate::upcast!(dyn Named => DropCounter);

    #[test]
    fn object_ptr_dispatches_to_concrete_type() {
        let meta = SlotMeta::<dyn Named>::for_type::<DropCounter>(false);
        let drops = Rc::new(Cell::new(0));
        let mut value = ManuallyDrop::new(DropCounter {
            drops: Rc::clone(&drops),
        });

        let data = NonNull::from(&mut *value).cast::<u8>();
        let object = meta.object_ptr(data);

        assert_eq!(unsafe { object.as_ref() }.name(), "counter");
        assert_eq!(meta.layout(), Layout::new::<DropCounter>());
        assert!(!meta.is_bitwise_copy());

        unsafe { ManuallyDrop::drop(&mut value) };
    }

    #[test]
    fn destroy_runs_destructor_once() {
        let meta = SlotMeta::<dyn Named>::for_type::<DropCounter>(false);
        let drops = Rc::new(Cell::new(0));
        let mut value = ManuallyDrop::new(DropCounter {
            drops: Rc::clone(&drops),
        });

        unsafe { meta.destroy(NonNull::from(&mut *value).cast::<u8>()) };

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn tombstone_costs_no_extra_space() {
        assert_eq!(
            size_of::<Option<SlotMeta<dyn Named>>>(),
            size_of::<SlotMeta<dyn Named>>()
        );
    }
}
