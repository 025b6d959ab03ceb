use std::alloc::{Layout, alloc, dealloc, handle_alloc_error, realloc};
use std::ptr::{self, NonNull};

/// Smallest allocation made when the buffer first grows, to avoid a reallocation per insert
/// for the first few small objects.
const MIN_NON_ZERO_CAPACITY: usize = 64;

/// Contiguous, growable, raw byte storage with a configurable base alignment.
///
/// The buffer only ever grows by appending. Its contents are untyped bytes: the buffer does not
/// know what objects live inside it and never drops anything. Any growth or realignment may move
/// the storage to a new address, which invalidates every pointer previously derived from
/// [`as_ptr()`](Self::as_ptr). Offsets into the buffer remain valid.
///
/// The base address is always aligned to [`align()`](Self::align), so an offset that is a
/// multiple of some alignment `a <= align()` yields an address that is also a multiple of `a`.
#[derive(Debug)]
pub(crate) struct Buffer {
    /// Start of the allocation, or a dangling pointer aligned to `align` if `capacity` is zero.
    ptr: NonNull<u8>,

    /// Number of bytes in use. Bytes in `len..capacity` are reserved but unused.
    len: usize,

    /// Number of bytes allocated.
    capacity: usize,

    /// Alignment of the base address. Always a power of two.
    align: usize,
}

impl Buffer {
    /// Creates an empty buffer that has not yet allocated any memory.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    pub(crate) fn new(align: usize) -> Self {
        assert!(
            align.is_power_of_two(),
            "buffer alignment must be a power of two, got {align}"
        );

        Self {
            ptr: dangling(align),
            len: 0,
            capacity: 0,
            align,
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub(crate) fn align(&self) -> usize {
        self.align
    }

    /// Returns a pointer to the first byte of the buffer.
    ///
    /// The pointer is only valid until the next call to a method that takes `&mut self`.
    #[must_use]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the used part of the buffer.
    #[must_use]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset <= self.len,
            "offset {offset} is out of bounds of buffer with length {}",
            self.len
        );

        // SAFETY: offset <= len <= capacity, so the result is within the allocation or one byte
        // past its end. For an unallocated buffer len is zero so the offset is zero.
        unsafe { self.ptr.add(offset) }
    }

    /// Extends the used part of the buffer to `new_len` bytes, allocating if necessary.
    ///
    /// Does nothing if the buffer is already at least `new_len` bytes long.
    pub(crate) fn grow_to(&mut self, new_len: usize) {
        if new_len <= self.len {
            return;
        }

        if new_len > self.capacity {
            let doubled = self.capacity.saturating_mul(2);
            let new_capacity = new_len.max(doubled).max(MIN_NON_ZERO_CAPACITY);
            self.relocate(new_capacity, self.align);
        }

        self.len = new_len;
    }

    /// Ensures the base address of the buffer is aligned to at least `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub(crate) fn ensure_align(&mut self, align: usize) {
        assert!(
            align.is_power_of_two(),
            "buffer alignment must be a power of two, got {align}"
        );

        if align <= self.align {
            return;
        }

        if self.capacity == 0 {
            self.ptr = dangling(align);
            self.align = align;
        } else {
            self.relocate(self.capacity, align);
        }
    }

    /// Reserves capacity for at least `additional` more bytes past the used length.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let required = self
            .len
            .checked_add(additional)
            .expect("requested capacity exceeds size of virtual memory");

        if required > self.capacity {
            self.relocate(required, self.align);
        }
    }

    /// Marks every byte as unused while keeping the allocation.
    pub(crate) fn reset(&mut self) {
        self.len = 0;
    }

    /// Marks every byte as unused and releases the allocation.
    pub(crate) fn release(&mut self) {
        self.free_allocation();
        self.ptr = dangling(self.align);
        self.len = 0;
        self.capacity = 0;
    }

    /// Creates a new buffer with the same alignment, capacity and byte contents.
    #[must_use]
    pub(crate) fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.align);

        if self.capacity == 0 {
            return copy;
        }

        copy.relocate(self.capacity, self.align);

        // SAFETY: Both allocations are at least self.len bytes long and they are distinct
        // allocations, so they cannot overlap. Copying possibly uninitialized padding bytes
        // through a raw byte copy is permitted.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), copy.ptr.as_ptr(), self.len);
        }

        copy.len = self.len;
        copy
    }

    /// Moves the used bytes into an allocation with the given capacity and alignment.
    fn relocate(&mut self, new_capacity: usize, new_align: usize) {
        debug_assert!(new_capacity >= self.len);
        debug_assert!(new_align >= self.align);

        let new_layout = Layout::from_size_align(new_capacity, new_align)
            .expect("buffer size exceeds the maximum size of an allocation");

        tracing::trace!(
            old_capacity = self.capacity,
            new_capacity,
            old_align = self.align,
            new_align,
            "relocating poly_vec buffer"
        );

        let new_ptr = if self.capacity == 0 {
            // SAFETY: new_capacity is non-zero because it is at least MIN_NON_ZERO_CAPACITY
            // or at least the non-zero capacity requested by reserve() or duplicate().
            unsafe { alloc(new_layout) }
        } else if new_align == self.align {
            // SAFETY: ptr was allocated with current_layout() and the new size is non-zero
            // and, as validated by Layout::from_size_align, does not overflow isize.
            unsafe { realloc(self.ptr.as_ptr(), self.current_layout(), new_capacity) }
        } else {
            // realloc() cannot change alignment, so we copy into a fresh allocation.
            // SAFETY: new_layout has a non-zero size because capacity is non-zero.
            let new_ptr = unsafe { alloc(new_layout) };

            if !new_ptr.is_null() {
                // SAFETY: Both allocations hold at least len bytes and do not overlap.
                unsafe {
                    ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr, self.len);
                }

                self.free_allocation();
            }

            new_ptr
        };

        self.ptr = NonNull::new(new_ptr).unwrap_or_else(|| handle_alloc_error(new_layout));
        self.capacity = new_capacity;
        self.align = new_align;
    }

    fn current_layout(&self) -> Layout {
        Layout::from_size_align(self.capacity, self.align)
            .expect("layout was already validated when the allocation was made")
    }

    fn free_allocation(&mut self) {
        if self.capacity == 0 {
            return;
        }

        // SAFETY: The pointer was allocated with exactly this layout and is not used again
        // before being replaced by the caller.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.current_layout());
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.free_allocation();
    }
}

/// A non-null pointer with the given alignment that is valid for zero-sized accesses.
fn dangling(align: usize) -> NonNull<u8> {
    NonNull::new(ptr::without_provenance_mut::<u8>(align)).expect("alignment is never zero")
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty_and_aligned() {
        let buffer = Buffer::new(16);

        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 0);
        assert_eq!(buffer.as_ptr().as_ptr() as usize % 16, 0);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        drop(Buffer::new(3));
    }

    #[test]
    fn grow_to_extends_length_and_keeps_contents() {
        let mut buffer = Buffer::new(8);

        buffer.grow_to(8);
        unsafe {
            buffer.ptr_at(0).cast::<u64>().write(0xDEAD_BEEF);
        }

        // Force at least one relocation.
        buffer.grow_to(10_000);

        assert_eq!(buffer.len(), 10_000);
        assert!(buffer.capacity() >= 10_000);
        assert_eq!(unsafe { buffer.ptr_at(0).cast::<u64>().read() }, 0xDEAD_BEEF);
    }

    #[test]
    fn grow_to_smaller_length_is_no_op() {
        let mut buffer = Buffer::new(8);

        buffer.grow_to(32);
        buffer.grow_to(16);

        assert_eq!(buffer.len(), 32);
    }

    #[test]
    fn ensure_align_realigns_and_keeps_contents() {
        let mut buffer = Buffer::new(1);

        buffer.grow_to(4);
        unsafe {
            buffer.ptr_at(0).cast::<u32>().write_unaligned(0x0102_0304);
        }

        buffer.ensure_align(256);

        assert_eq!(buffer.align(), 256);
        assert_eq!(buffer.as_ptr().as_ptr() as usize % 256, 0);
        assert_eq!(
            unsafe { buffer.ptr_at(0).cast::<u32>().read_unaligned() },
            0x0102_0304
        );
    }

    #[test]
    fn ensure_align_never_lowers_alignment() {
        let mut buffer = Buffer::new(64);

        buffer.ensure_align(8);

        assert_eq!(buffer.align(), 64);
    }

    #[test]
    fn reserve_grows_capacity_without_length() {
        let mut buffer = Buffer::new(8);

        buffer.reserve(1000);

        assert_eq!(buffer.len(), 0);
        assert!(buffer.capacity() >= 1000);
    }

    #[test]
    fn reset_keeps_capacity_release_drops_it() {
        let mut buffer = Buffer::new(8);
        buffer.grow_to(100);
        let capacity = buffer.capacity();

        buffer.reset();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), capacity);

        buffer.release();
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn duplicate_copies_bytes_into_new_allocation() {
        let mut buffer = Buffer::new(8);
        buffer.grow_to(16);
        unsafe {
            buffer.ptr_at(8).cast::<u64>().write(77);
        }

        let copy = buffer.duplicate();

        assert_ne!(copy.as_ptr(), buffer.as_ptr());
        assert_eq!(copy.len(), 16);
        assert_eq!(copy.align(), 8);
        assert_eq!(unsafe { copy.ptr_at(8).cast::<u64>().read() }, 77);
    }

    #[test]
    #[should_panic]
    fn ptr_at_past_length_panics() {
        let mut buffer = Buffer::new(8);
        buffer.grow_to(8);

        _ = buffer.ptr_at(9);
    }
}
