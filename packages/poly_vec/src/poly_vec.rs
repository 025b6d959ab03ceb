use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ops::{Index, IndexMut, Range};
use std::ptr::{self, NonNull};
use std::thread;

use scopeguard::ScopeGuard;

use crate::buffer::Buffer;
use crate::placement::{self, FreeList, Placement};
use crate::slot_meta::SlotMeta;
use crate::slot_table::SlotTable;
use crate::{
    Cursor, DropPolicy, Error, Iter, IterMut, LiveIndices, Offset, PolyVecBuilder, Result, Upcast,
};

/// A packed container of objects of different concrete types that share one interface.
///
/// `PolyVec<I>` stores every object contiguously in a single byte buffer instead of in separate
/// heap allocations. `I` is the interface the objects are accessed through, typically a trait
/// object type such as `dyn Shape`. Any type `T` that implements [`Upcast<I>`] can be inserted;
/// the [`upcast!`][crate::upcast!] macro provides that implementation.
///
/// # Slots and indexes
///
/// Each insertion returns a slot index. The index remains a valid handle to the same byte range
/// until the container is reset with [`free_all()`](Self::free_all) or [`clear()`](Self::clear).
/// Freeing a slot destroys its occupant and leaves a tombstone; a later insertion may reuse the
/// slot if the new object fits into its byte range without moving its start. Slots are never
/// split or compacted, so reusing a large slot for a small object wastes the remaining bytes.
///
/// [`len()`](Self::len) counts every slot ever allocated, including vacant ones.
/// [`live_len()`](Self::live_len) counts only live objects.
///
/// # References and relocation
///
/// Insertions may grow and relocate the backing buffer. References returned by accessors borrow
/// the container, so the borrow checker rejects any attempt to keep them across an insertion.
/// Raw pointers obtained from such references become dangling after any insertion; re-resolve
/// them from their index instead.
///
/// # Examples
///
/// ```
/// use poly_vec::{PolyVec, upcast};
///
/// trait Animal {
///     fn sound(&self) -> String;
/// }
///
/// struct Dog;
///
/// struct Cat {
///     lives: u8,
/// }
///
/// impl Animal for Dog {
///     fn sound(&self) -> String {
///         "woof".to_string()
///     }
/// }
///
/// impl Animal for Cat {
///     fn sound(&self) -> String {
///         format!("meow x{}", self.lives)
///     }
/// }
///
/// upcast!(dyn Animal => Dog, Cat);
///
/// let mut animals = PolyVec::<dyn Animal>::new();
///
/// let dog = animals.push(Dog);
/// let cat = animals.push(Cat { lives: 9 });
///
/// let sounds: Vec<String> = animals.iter().map(|animal| animal.sound()).collect();
/// assert_eq!(sounds, ["woof", "meow x9"]);
///
/// animals.free(dog).unwrap();
/// assert!(animals.get(dog).unwrap().is_none());
/// assert_eq!(animals[cat].sound(), "meow x9");
/// ```
///
/// # Thread safety
///
/// The container is neither [`Send`] nor [`Sync`]. It must be used from the thread that
/// created it.
pub struct PolyVec<I: ?Sized, O: Offset = usize> {
    /// Object bytes, addressed by the offsets in `slots`.
    buffer: Buffer,

    /// Byte range of every slot ever allocated.
    slots: SlotTable<O>,

    /// Vacant slots available for reuse.
    free: FreeList<O>,

    /// Liveness tag and type-erased dispatch record for every slot. `None` marks a tombstone.
    /// Always exactly as long as the slot table.
    metas: Vec<Option<SlotMeta<I>>>,

    /// Number of live objects. We track this explicitly to avoid scanning `metas`.
    live: usize,

    drop_policy: DropPolicy,

    /// The container owns values of the interface type and drops them.
    _owns: PhantomData<Box<I>>,
}

/// Whether an insertion may reuse a vacant slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum InsertMode {
    FirstFit,
    AppendOnly,
}

impl<I: ?Sized> PolyVec<I> {
    /// Creates an empty container with the default configuration and `usize` offsets.
    ///
    /// No memory is allocated until the first insertion.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<dyn Debug>::new();
    ///
    /// assert_eq!(vec.len(), 0);
    /// assert!(vec.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        PolyVecBuilder::new().build()
    }
}

impl<I: ?Sized, O: Offset> PolyVec<I, O> {
    /// Creates a builder for configuring and constructing a [`PolyVec`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Debug;
    ///
    /// use poly_vec::PolyVec;
    ///
    /// let vec = PolyVec::<dyn Debug, u32>::builder().slot_capacity(16).build();
    /// ```
    #[inline]
    pub fn builder() -> PolyVecBuilder<I, O> {
        PolyVecBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(alignment: usize, drop_policy: DropPolicy) -> Self {
        Self {
            buffer: Buffer::new(alignment),
            slots: SlotTable::new(),
            free: FreeList::new(),
            metas: Vec::new(),
            live: 0,
            drop_policy,
            _owns: PhantomData,
        }
    }

    /// The number of slots ever allocated, including vacant slots.
    ///
    /// Valid slot indexes are `0..len()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// let first = vec.push(1_u32);
    /// vec.push(2_u32);
    ///
    /// vec.free(first).unwrap();
    ///
    /// // The vacant slot still counts.
    /// assert_eq!(vec.len(), 2);
    /// assert_eq!(vec.live_len(), 1);
    /// ```
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// The number of live objects in the container.
    #[must_use]
    #[inline]
    pub fn live_len(&self) -> usize {
        self.live
    }

    /// Whether the container holds no live objects.
    ///
    /// A container whose slots have all been freed is empty even though [`len()`](Self::len)
    /// is non-zero.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(
            self.live == 0,
            self.free.len() == self.len(),
            "live count and free list disagree"
        );

        self.live == 0
    }

    /// The number of bytes of the backing buffer in use, including alignment padding and the
    /// unused tails of reused slots.
    #[must_use]
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// The number of bytes the backing buffer can hold without reallocating.
    #[must_use]
    #[inline]
    pub fn byte_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Returns a pointer to the start of the backing buffer.
    ///
    /// The pointer is invalidated by any insertion, reservation or reset.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr().as_ptr().cast_const()
    }

    /// Returns the byte range occupied by a slot, relative to [`as_ptr()`](Self::as_ptr).
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u64>::new();
    /// let index = vec.push(7_u64);
    ///
    /// assert_eq!(vec.slot_range(index).unwrap(), 0..8);
    /// assert!(vec.slot_range(5).is_err());
    /// ```
    pub fn slot_range(&self, index: usize) -> Result<Range<usize>> {
        self.slots.range(index).ok_or(Error::IndexOutOfRange {
            operation: "slot_range",
            index,
            size: self.len(),
        })
    }

    /// Whether the slot currently holds a live object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    pub fn is_live(&self, index: usize) -> Result<bool> {
        self.check_bounds("is_live", index)?;

        Ok(self.meta(index).is_some())
    }

    /// Whether the slot is vacant, its previous occupant having been freed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    pub fn is_free(&self, index: usize) -> Result<bool> {
        self.check_bounds("is_free", index)?;

        Ok(self.meta(index).is_none())
    }

    /// Returns a reference to the object in a slot, or `None` if the slot is vacant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<String>::new();
    /// let index = vec.push("hello".to_string());
    ///
    /// assert_eq!(vec.get(index).unwrap().unwrap(), "hello");
    ///
    /// vec.free(index).unwrap();
    /// assert!(vec.get(index).unwrap().is_none());
    ///
    /// assert!(vec.get(index + 1).is_err());
    /// ```
    pub fn get(&self, index: usize) -> Result<Option<&I>> {
        self.check_bounds("at", index)?;

        // SAFETY: We just checked that the index is in bounds.
        Ok(unsafe { self.get_unchecked(index) })
    }

    /// Returns an exclusive reference to the object in a slot, or `None` if the slot is vacant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()`.
    pub fn get_mut(&mut self, index: usize) -> Result<Option<&mut I>> {
        self.check_bounds("at", index)?;

        // SAFETY: We just checked that the index is in bounds.
        Ok(unsafe { self.get_unchecked_mut(index) })
    }

    /// Returns a reference to the object in a slot without checking the index, or `None` if
    /// the slot is vacant.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `index < len()`.
    #[must_use]
    pub unsafe fn get_unchecked(&self, index: usize) -> Option<&I> {
        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        let meta = unsafe { self.metas.get_unchecked(index) }.as_ref()?;

        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        let data = unsafe { self.data_ptr_unchecked(index) };

        // SAFETY: The slot is live, so it holds an initialized object described by its meta.
        // Mutation requires &mut self, so no exclusive reference can coexist with this one.
        Some(unsafe { meta.object_ptr(data).as_ref() })
    }

    /// Returns an exclusive reference to the object in a slot without checking the index, or
    /// `None` if the slot is vacant.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `index < len()`.
    #[must_use]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> Option<&mut I> {
        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        let meta = unsafe { self.metas.get_unchecked(index) }.as_ref()?;

        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        let data = unsafe { self.data_ptr_unchecked(index) };

        // SAFETY: The slot is live, so it holds an initialized object described by its meta.
        // We hold &mut self, so this is the only reference into the buffer.
        Some(unsafe { meta.object_ptr(data).as_mut() })
    }

    /// Inserts an object, reusing the first vacant slot it fits into or appending a new slot.
    ///
    /// Returns the index of the slot the object was placed in.
    ///
    /// # Panics
    ///
    /// Panics if the buffer size or slot count would exceed the range of the offset type `O`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u64>::new();
    ///
    /// let first = vec.push(1_u64);
    /// let second = vec.push(2_u64);
    /// assert_eq!((first, second), (0, 1));
    ///
    /// vec.free(first).unwrap();
    ///
    /// // The vacant slot is reused.
    /// assert_eq!(vec.push(3_u64), first);
    /// ```
    pub fn push<T: Upcast<I>>(&mut self, value: T) -> usize {
        // SAFETY: The closure initializes the value.
        unsafe {
            self.insert_with(InsertMode::FirstFit, false, |uninit: &mut MaybeUninit<T>| {
                uninit.write(value);
            })
        }
    }

    /// Inserts an object into a newly appended slot, ignoring vacant slots.
    ///
    /// Returns the index of the new slot, which is always `len() - 1` after the call.
    ///
    /// # Panics
    ///
    /// Panics if the buffer size or slot count would exceed the range of the offset type `O`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u64>::new();
    ///
    /// let first = vec.push(1_u64);
    /// vec.free(first).unwrap();
    ///
    /// assert_eq!(vec.push_back(2_u64), 1);
    /// ```
    pub fn push_back<T: Upcast<I>>(&mut self, value: T) -> usize {
        // SAFETY: The closure initializes the value.
        unsafe {
            self.insert_with(InsertMode::AppendOnly, false, |uninit: &mut MaybeUninit<T>| {
                uninit.write(value);
            })
        }
    }

    /// Inserts an object by constructing it in place inside the buffer.
    ///
    /// Slot selection is the same as for [`push()`](Self::push). This allows large objects to
    /// be built without first materializing them on the stack.
    ///
    /// If the closure panics, the slot is left vacant and is available for reuse.
    ///
    /// # Panics
    ///
    /// Panics if the buffer size or slot count would exceed the range of the offset type `O`.
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the `MaybeUninit<T>` before returning.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<[u8; 4096]>::new();
    ///
    /// // SAFETY: The closure initializes the whole array.
    /// let index = unsafe {
    ///     vec.push_with(|uninit: &mut MaybeUninit<[u8; 4096]>| {
    ///         uninit.write([7; 4096]);
    ///     })
    /// };
    ///
    /// assert!(vec[index].iter().all(|&byte| byte == 7));
    /// ```
    pub unsafe fn push_with<T: Upcast<I>>(&mut self, f: impl FnOnce(&mut MaybeUninit<T>)) -> usize {
        // SAFETY: Forwarding guarantee from caller that the closure initializes the value.
        unsafe { self.insert_with(InsertMode::FirstFit, false, f) }
    }

    /// Inserts a copy of an object.
    ///
    /// Objects inserted this way may be duplicated by [`try_clone()`](Self::try_clone).
    ///
    /// # Panics
    ///
    /// Panics if the buffer size or slot count would exceed the range of the offset type `O`.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<(u32, u32)>::new();
    /// let point = (3, 4);
    ///
    /// let index = vec.push_copy(&point);
    ///
    /// assert_eq!(vec[index], point);
    /// ```
    pub fn push_copy<T: Upcast<I> + Copy>(&mut self, value: &T) -> usize {
        // SAFETY: The closure initializes the value.
        unsafe {
            self.insert_with(InsertMode::FirstFit, true, |uninit: &mut MaybeUninit<T>| {
                uninit.write(*value);
            })
        }
    }

    /// Inserts a bit-for-bit duplicate of an already constructed object.
    ///
    /// The source object is left untouched. Objects inserted this way may be duplicated by
    /// [`try_clone()`](Self::try_clone).
    ///
    /// # Panics
    ///
    /// Panics if the buffer size or slot count would exceed the range of the offset type `O`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// * `source` is valid for reads of an initialized `T`.
    /// * Duplicating `T` by copying its bytes is sound, meaning that the duplicate and the
    ///   original may both be used and dropped independently. Types that own resources, such as
    ///   `String` or `Box`, do not satisfy this.
    pub unsafe fn push_bitwise<T: Upcast<I>>(&mut self, source: NonNull<T>) -> usize {
        // SAFETY: The closure initializes the value by copying the source, which the caller
        // guarantees to be valid for reads and sound to duplicate.
        unsafe {
            self.insert_with(InsertMode::FirstFit, true, |uninit: &mut MaybeUninit<T>| {
                ptr::copy_nonoverlapping(source.as_ptr(), uninit.as_mut_ptr(), 1);
            })
        }
    }

    /// Destroys the object in a slot and marks the slot vacant for reuse.
    ///
    /// The index stays valid: afterwards [`get()`](Self::get) returns `Ok(None)` for it until
    /// another insertion reuses the slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index >= len()` and [`Error::SlotVacant`] if the
    /// slot is already vacant. Nothing is destroyed in either case.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::{Error, PolyVec};
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// let index = vec.push(5_u32);
    ///
    /// vec.free(index).unwrap();
    ///
    /// assert!(matches!(vec.free(index), Err(Error::SlotVacant { .. })));
    /// ```
    pub fn free(&mut self, index: usize) -> Result<()> {
        self.check_bounds("free", index)?;

        let meta = self
            .metas
            .get_mut(index)
            .expect("metas is always as long as the slot table")
            .take()
            .ok_or(Error::SlotVacant {
                operation: "free",
                index,
            })?;

        // SAFETY: We just checked that the index is in bounds.
        let data = unsafe { self.data_ptr_unchecked(index) };

        // The slot is tombstoned and listed as vacant before the destructor runs, so a panicking
        // destructor cannot lead to a second destruction.
        self.free.push(index);

        // Cannot wrap because the slot was live.
        self.live = self.live.wrapping_sub(1);

        // SAFETY: The slot was live and is now tombstoned, so the occupant is never used again.
        unsafe {
            meta.destroy(data);
        }

        Ok(())
    }

    /// Destroys every live object in ascending index order and resets the container to its
    /// freshly created state, keeping the buffer's allocated capacity.
    ///
    /// All previously returned indexes are invalidated.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<String>::new();
    /// vec.push("a".to_string());
    /// vec.push("b".to_string());
    /// let capacity = vec.byte_capacity();
    ///
    /// vec.free_all();
    ///
    /// assert_eq!(vec.len(), 0);
    /// assert_eq!(vec.byte_capacity(), capacity);
    /// ```
    pub fn free_all(&mut self) {
        tracing::debug!(
            slots = self.len(),
            live = self.live,
            "freeing all poly_vec objects"
        );

        self.destroy_live();

        self.slots.reset();
        self.free.clear();
        self.metas.clear();
        self.buffer.reset();
    }

    /// Destroys every live object and resets the container to its freshly created state,
    /// releasing the backing buffer.
    ///
    /// All previously returned indexes are invalidated.
    pub fn clear(&mut self) {
        tracing::debug!(
            slots = self.len(),
            live = self.live,
            "clearing poly_vec"
        );

        self.destroy_live();

        self.slots.reset();
        self.free.clear();
        self.metas.clear();
        self.buffer.release();
    }

    /// Reserves capacity for at least `additional_slots` more slots and `additional_bytes` more
    /// bytes of object storage.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u64>::new();
    /// vec.reserve(10, 80);
    ///
    /// assert!(vec.byte_capacity() >= 80);
    /// ```
    pub fn reserve(&mut self, additional_slots: usize, additional_bytes: usize) {
        self.slots.reserve(additional_slots);
        self.metas.reserve(additional_slots);
        self.free.reserve(additional_slots);
        self.buffer.reserve(additional_bytes);
    }

    /// Creates a deep copy of the container by duplicating its buffer byte for byte.
    ///
    /// The copy has the same slots, the same vacant slots and the same indexes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotBitwiseCopyable`] if any live object was inserted by a method other
    /// than [`push_copy()`](Self::push_copy) or [`push_bitwise()`](Self::push_bitwise), since
    /// such objects may own resources that a byte copy would alias.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// vec.push_copy(&10_u32);
    ///
    /// let copy = vec.try_clone().unwrap();
    /// assert_eq!(copy[0], 10);
    ///
    /// // push() does not record that the value is safe to copy.
    /// vec.push(11_u32);
    /// assert!(vec.try_clone().is_err());
    /// ```
    pub fn try_clone(&self) -> Result<Self> {
        if let Some(index) = self
            .metas
            .iter()
            .position(|meta| meta.is_some_and(|meta| !meta.is_bitwise_copy()))
        {
            return Err(Error::NotBitwiseCopyable { index });
        }

        Ok(Self {
            buffer: self.buffer.duplicate(),
            slots: self.slots.clone(),
            free: self.free.clone(),
            metas: self.metas.clone(),
            live: self.live,
            drop_policy: self.drop_policy,
            _owns: PhantomData,
        })
    }

    /// Returns an iterator over the live objects in ascending index order.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// let first = vec.push(1_u32);
    /// vec.push(2_u32);
    /// vec.push(3_u32);
    /// vec.free(first).unwrap();
    ///
    /// assert_eq!(vec.iter().copied().collect::<Vec<_>>(), [2, 3]);
    /// assert_eq!(vec.iter().rev().copied().collect::<Vec<_>>(), [3, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, I, O> {
        Iter::new(self)
    }

    /// Returns an iterator over exclusive references to the live objects in ascending index
    /// order.
    pub fn iter_mut(&mut self) -> IterMut<'_, I, O> {
        IterMut::new(&self.buffer, &self.slots, &self.metas)
    }

    /// Returns an iterator over the indexes of live slots in ascending order.
    pub fn live_indices(&self) -> LiveIndices<'_, I> {
        LiveIndices::new(&self.metas)
    }

    /// Returns a cursor positioned at the first live slot, or at the end position if there is
    /// no live object.
    ///
    /// # Examples
    ///
    /// ```
    /// use poly_vec::PolyVec;
    ///
    /// let mut vec = PolyVec::<u32>::new();
    /// vec.push(1_u32);
    /// vec.push(2_u32);
    ///
    /// let mut cursor = vec.cursor();
    /// assert_eq!(*cursor.get(&vec).unwrap(), 1);
    ///
    /// cursor.advance(&vec);
    /// assert_eq!(*cursor.get(&vec).unwrap(), 2);
    ///
    /// cursor.advance(&vec);
    /// assert!(cursor.is_end(&vec));
    /// ```
    pub fn cursor(&self) -> Cursor {
        Cursor::at(self.first_live_index().unwrap_or(self.len()))
    }

    /// Returns the lowest index of a live slot.
    #[must_use]
    pub fn first_live_index(&self) -> Option<usize> {
        self.metas.iter().position(Option::is_some)
    }

    /// Returns the highest index of a live slot.
    #[must_use]
    pub fn last_live_index(&self) -> Option<usize> {
        self.metas.iter().rposition(Option::is_some)
    }

    /// Returns the lowest index of a live slot that is greater than `index`.
    #[must_use]
    pub fn next_live_index(&self, index: usize) -> Option<usize> {
        let start = index.checked_add(1)?;

        self.metas
            .get(start..)?
            .iter()
            .position(Option::is_some)
            // Cannot overflow because the result is a valid index into metas.
            .map(|offset| offset.wrapping_add(start))
    }

    /// Places an object produced by `f` into a slot chosen according to `mode`.
    ///
    /// # Safety
    ///
    /// The closure must fully initialize the `MaybeUninit<T>` before returning.
    unsafe fn insert_with<T: Upcast<I>>(
        &mut self,
        mode: InsertMode,
        bitwise_copy: bool,
        f: impl FnOnce(&mut MaybeUninit<T>),
    ) -> usize {
        let layout = Layout::new::<T>();

        // Slot start offsets only guarantee alignment relative to the buffer base, so the base
        // must be at least as aligned as the object. This may relocate the buffer.
        self.buffer.ensure_align(layout.align());

        let placement = match mode {
            InsertMode::FirstFit => placement::place(&mut self.slots, &mut self.free, layout),
            InsertMode::AppendOnly => placement::append(&mut self.slots, layout),
        };

        if let Placement::Appended { range, .. } = &placement {
            self.buffer.grow_to(range.end);
            self.metas.push(None);
        }

        let index = placement.index();
        let data = self.buffer.ptr_at(placement.start());

        // If the closure panics the slot stays tombstoned and goes back on the free list.
        let vacate_on_unwind = scopeguard::guard(&mut self.free, |free| free.push(index));

        // SAFETY: The placement guarantees that the slot range holds at least size_of::<T>()
        // bytes starting at a multiple of align_of::<T>() from a base aligned to at least
        // align_of::<T>(). The slot is vacant, so nothing else references this memory.
        let uninit = unsafe { data.cast::<MaybeUninit<T>>().as_mut() };
        f(uninit);

        ScopeGuard::into_inner(vacate_on_unwind);

        *self
            .metas
            .get_mut(index)
            .expect("metas is always as long as the slot table") =
            Some(SlotMeta::for_type::<T>(bitwise_copy));

        // This can never overflow since that would mean the container is greater than virtual memory.
        self.live = self.live.wrapping_add(1);

        index
    }

    /// Destroys every live object in ascending index order, tombstoning each slot and adding it
    /// to the free list first.
    fn destroy_live(&mut self) {
        for index in 0..self.len() {
            let Some(meta) = self
                .metas
                .get_mut(index)
                .expect("metas is always as long as the slot table")
                .take()
            else {
                continue;
            };

            // SAFETY: index < len() by the loop bounds.
            let data = unsafe { self.data_ptr_unchecked(index) };

            // Listed as vacant before the destructor runs. If it panics, the reset in the caller
            // is skipped and the slot must still be reusable.
            self.free.push(index);

            // Cannot wrap because the slot was live.
            self.live = self.live.wrapping_sub(1);

            // SAFETY: The slot was live and is now tombstoned, so the occupant is never used
            // again.
            unsafe {
                meta.destroy(data);
            }
        }

        debug_assert_eq!(self.live, 0);
    }

    fn check_bounds(&self, operation: &'static str, index: usize) -> Result<()> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                operation,
                index,
                size: self.len(),
            });
        }

        Ok(())
    }

    fn meta(&self, index: usize) -> Option<&SlotMeta<I>> {
        self.metas
            .get(index)
            .expect("caller has checked bounds and metas is as long as the slot table")
            .as_ref()
    }

    /// # Safety
    ///
    /// The caller must guarantee that `index < len()`.
    unsafe fn data_ptr_unchecked(&self, index: usize) -> NonNull<u8> {
        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        let start = unsafe { self.slots.start_unchecked(index) };

        self.buffer.ptr_at(start)
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.slots.integrity_check();

        assert_eq!(self.metas.len(), self.len());
        assert_eq!(self.metas.iter().filter(|meta| meta.is_some()).count(), self.live);
        assert_eq!(self.free.len(), self.len().wrapping_sub(self.live));
        assert!(self.buffer.len() >= self.slots.sentinel());

        for (index, meta) in self.metas.iter().enumerate() {
            assert_eq!(meta.is_none(), self.free.contains(index));

            if let Some(meta) = meta {
                let range = self.slots.range(index).expect("index is in bounds");
                assert!(range.len() >= meta.layout().size());
                assert_eq!(range.start % meta.layout().align(), 0);
            }
        }
    }
}

impl<I: ?Sized, O: Offset> Default for PolyVec<I, O> {
    fn default() -> Self {
        PolyVecBuilder::new().build()
    }
}

impl<I: ?Sized, O: Offset> Drop for PolyVec<I, O> {
    fn drop(&mut self) {
        let original_live = self.live;

        self.destroy_live();

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && matches!(self.drop_policy, DropPolicy::MustNotDropItems) {
            assert!(
                original_live == 0,
                "dropped a PolyVec with {original_live} live objects - this is forbidden by DropPolicy::MustNotDropItems"
            );
        }
    }
}

impl<I: ?Sized, O: Offset> fmt::Debug for PolyVec<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolyVec")
            .field("len", &self.len())
            .field("live", &self.live)
            .field("byte_len", &self.buffer.len())
            .field("byte_capacity", &self.buffer.capacity())
            .field("alignment", &self.buffer.align())
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<I: ?Sized, O: Offset> Index<usize> for PolyVec<I, O> {
    type Output = I;

    /// # Panics
    ///
    /// Panics if `index >= len()` or if the slot is vacant.
    fn index(&self, index: usize) -> &I {
        match self.get(index) {
            Ok(Some(object)) => object,
            Ok(None) => panic!("poly_vec slot {index} is vacant"),
            Err(error) => panic!("{error}"),
        }
    }
}

impl<I: ?Sized, O: Offset> IndexMut<usize> for PolyVec<I, O> {
    /// # Panics
    ///
    /// Panics if `index >= len()` or if the slot is vacant.
    fn index_mut(&mut self, index: usize) -> &mut I {
        match self.get_mut(index) {
            Ok(Some(object)) => object,
            Ok(None) => panic!("poly_vec slot {index} is vacant"),
            Err(error) => panic!("{error}"),
        }
    }
}

impl<T: Upcast<I>, I: ?Sized, O: Offset> Extend<T> for PolyVec<I, O> {
    fn extend<It: IntoIterator<Item = T>>(&mut self, iter: It) {
        for value in iter {
            self.push(value);
        }
    }
}

impl<'a, I: ?Sized, O: Offset> IntoIterator for &'a PolyVec<I, O> {
    type Item = &'a I;
    type IntoIter = Iter<'a, I, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, I: ?Sized, O: Offset> IntoIterator for &'a mut PolyVec<I, O> {
    type Item = &'a mut I;
    type IntoIter = IterMut<'a, I, O>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::fmt::Debug;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PolyVec<dyn Debug>: Debug, Default);
    assert_not_impl_any!(PolyVec<dyn Debug>: Send, Sync);
    assert_not_impl_any!(PolyVec<u64, u16>: Send, Sync);

    trait Tracked {
        fn id(&self) -> u32;
    }

    /// Test helper that records how many times it has been dropped.
    struct DropCounter {
        id: u32,
        drops: Rc<Cell<usize>>,
    }

    impl DropCounter {
        fn new(id: u32, drops: &Rc<Cell<usize>>) -> Self {
            Self {
                id,
                drops: Rc::clone(drops),
            }
        }
    }

    impl Tracked for DropCounter {
        fn id(&self) -> u32 {
            self.id
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[repr(align(64))]
    struct Overaligned(u32);

    impl Tracked for Overaligned {
        fn id(&self) -> u32 {
            self.0
        }
    }

    #[derive(Clone, Copy)]
    struct Plain(u32);

    impl Tracked for Plain {
        fn id(&self) -> u32 {
            self.0
        }
    }

    struct Marker;

    /// Test helper whose destructor always panics.
    struct Exploding(u32);

    impl Tracked for Exploding {
        fn id(&self) -> u32 {
            self.0
        }
    }

    impl Drop for Exploding {
        fn drop(&mut self) {
            panic!("destructor of {} failed", self.0);
        }
    }

    impl Tracked for Marker {
        fn id(&self) -> u32 {
            u32::MAX
        }
    }

    crate::upcast!(dyn Tracked => DropCounter, Overaligned, Plain, Marker, Exploding);

    #[test]
    fn smoke_test() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());

        let a = vec.push(DropCounter::new(1, &drops));
        let b = vec.push(Plain(2));
        let c = vec.push(Overaligned(3));

        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.live_len(), 3);
        assert!(!vec.is_empty());

        assert_eq!(vec[a].id(), 1);
        assert_eq!(vec[b].id(), 2);
        assert_eq!(vec[c].id(), 3);

        vec.free(a).unwrap();
        assert_eq!(drops.get(), 1);
        assert_eq!(vec.live_len(), 2);

        vec.integrity_check();
    }

    #[test]
    fn objects_are_placed_at_aligned_addresses() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        vec.push(Plain(1));
        let index = vec.push(Overaligned(2));

        let object: *const dyn Tracked = &vec[index];
        assert_eq!(object.cast::<u8>() as usize % 64, 0);
        assert_eq!(vec.slot_range(index).unwrap().start % 64, 0);

        vec.integrity_check();
    }

    #[test]
    fn realignment_keeps_existing_objects() {
        let mut vec = PolyVec::<dyn Tracked>::builder().alignment(1).build();

        let first = vec.push(Plain(11));
        vec.push(Overaligned(22));

        assert_eq!(vec[first].id(), 11);
        assert_eq!(vec.as_ptr() as usize % 64, 0);
    }

    #[test]
    fn growth_keeps_indexes_resolving_to_same_objects() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        let indexes: Vec<_> = (0..1000).map(|id| vec.push(Plain(id))).collect();

        for (id, index) in indexes.into_iter().enumerate() {
            assert_eq!(vec[index].id(), u32::try_from(id).unwrap());
        }

        vec.integrity_check();
    }

    #[test]
    fn free_out_of_range_is_error_without_mutation() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        vec.push(Plain(1));

        assert_eq!(
            vec.free(1),
            Err(Error::IndexOutOfRange {
                operation: "free",
                index: 1,
                size: 1
            })
        );
        assert_eq!(vec.live_len(), 1);
    }

    #[test]
    fn double_free_is_error_and_destroys_once() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        let index = vec.push(DropCounter::new(1, &drops));

        vec.free(index).unwrap();
        assert_eq!(
            vec.free(index),
            Err(Error::SlotVacant {
                operation: "free",
                index
            })
        );

        assert_eq!(drops.get(), 1);
        vec.integrity_check();
    }

    #[test]
    fn freed_slot_reads_as_vacant() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let index = vec.push(Plain(1));

        vec.free(index).unwrap();

        assert!(!vec.is_live(index).unwrap());
        assert!(vec.is_free(index).unwrap());
        assert!(vec.get(index).unwrap().is_none());
        assert!(vec.get_mut(index).unwrap().is_none());
        assert!(unsafe { vec.get_unchecked(index) }.is_none());
    }

    #[test]
    fn checked_accessors_reject_out_of_range() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        assert!(matches!(
            vec.get(0),
            Err(Error::IndexOutOfRange { index: 0, size: 0, .. })
        ));
        assert!(vec.get_mut(0).is_err());
        assert!(vec.is_live(0).is_err());
        assert!(vec.is_free(0).is_err());
        assert!(vec.slot_range(0).is_err());
    }

    #[test]
    #[should_panic]
    fn index_out_of_range_panics() {
        let vec = PolyVec::<dyn Tracked>::new();
        _ = &vec[0];
    }

    #[test]
    #[should_panic]
    fn index_vacant_panics() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let index = vec.push(Plain(1));
        vec.free(index).unwrap();

        _ = &vec[index];
    }

    #[test]
    fn get_mut_modifies_through_interface() {
        let mut vec = PolyVec::<u64>::new();
        let index = vec.push(1_u64);

        *vec.get_mut(index).unwrap().unwrap() += 41;
        vec[index] *= 2;

        assert_eq!(vec[index], 84);
    }

    #[test]
    fn push_back_never_reuses() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        let first = vec.push(Plain(1));
        vec.free(first).unwrap();

        let second = vec.push_back(Plain(2));

        assert_eq!(second, 1);
        assert!(vec.is_free(first).unwrap());
        vec.integrity_check();
    }

    #[test]
    fn push_with_constructs_in_place() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        let index = unsafe {
            vec.push_with(|uninit: &mut MaybeUninit<Plain>| {
                uninit.write(Plain(9));
            })
        };

        assert_eq!(vec[index].id(), 9);
    }

    #[test]
    fn panicking_constructor_leaves_slot_vacant_and_reusable() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        vec.push(Plain(1));

        let result = catch_unwind(AssertUnwindSafe(|| unsafe {
            vec.push_with(|_: &mut MaybeUninit<Plain>| panic!("constructor failed"))
        }));
        assert!(result.is_err());

        assert_eq!(vec.len(), 2);
        assert_eq!(vec.live_len(), 1);
        assert!(vec.is_free(1).unwrap());
        vec.integrity_check();

        assert_eq!(vec.push(Plain(2)), 1);
    }

    #[test]
    fn panicking_destructor_in_free_leaves_slot_vacant_and_reusable() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let index = vec.push(Exploding(1));

        let result = catch_unwind(AssertUnwindSafe(|| vec.free(index)));
        assert!(result.is_err());

        assert!(vec.is_free(index).unwrap());
        assert_eq!(vec.live_len(), 0);
        assert!(vec.is_empty());
        vec.integrity_check();

        assert_eq!(
            vec.free(index),
            Err(Error::SlotVacant {
                operation: "free",
                index
            })
        );

        assert_eq!(vec.push(Plain(2)), index);
        vec.integrity_check();
    }

    #[test]
    fn panicking_destructor_in_free_all_leaves_slot_vacant_and_reusable() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let exploding = vec.push(Exploding(1));
        let survivor = vec.push(Plain(2));

        let result = catch_unwind(AssertUnwindSafe(|| vec.free_all()));
        assert!(result.is_err());

        // The reset never happened, so the objects after the panicking one are still live.
        assert_eq!(vec.len(), 2);
        assert_eq!(vec.live_len(), 1);
        assert!(!vec.is_empty());
        assert!(vec.is_free(exploding).unwrap());
        assert_eq!(vec[survivor].id(), 2);
        vec.integrity_check();

        assert_eq!(vec.push(Plain(3)), exploding);
        vec.integrity_check();
    }

    #[test]
    fn panicking_destructor_in_clear_leaves_slot_vacant_and_reusable() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let exploding = vec.push(Exploding(1));

        let result = catch_unwind(AssertUnwindSafe(|| vec.clear()));
        assert!(result.is_err());

        assert!(vec.is_empty());
        assert!(vec.is_free(exploding).unwrap());
        vec.integrity_check();

        assert_eq!(vec.push(Plain(2)), exploding);
    }

    #[test]
    fn push_bitwise_duplicates_source() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let source = Plain(17);

        let index = unsafe { vec.push_bitwise(NonNull::from(&source)) };

        assert_eq!(vec[index].id(), 17);
        assert_eq!(source.id(), 17);
    }

    #[test]
    fn zero_sized_objects_occupy_empty_slots() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        let a = vec.push(Marker);
        let b = vec.push(Marker);

        assert_eq!((a, b), (0, 1));
        assert_eq!(vec.slot_range(a).unwrap().len(), 0);
        assert_eq!(vec[b].id(), u32::MAX);

        vec.free(a).unwrap();
        assert_eq!(vec.push(Marker), a);
        vec.integrity_check();
    }

    #[test]
    fn try_clone_copies_bitwise_objects() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        let a = vec.push_copy(&Plain(1));
        let b = vec.push_copy(&Plain(2));
        vec.free(a).unwrap();

        let copy = vec.try_clone().unwrap();

        assert_eq!(copy.len(), 2);
        assert_eq!(copy.live_len(), 1);
        assert!(copy.is_free(a).unwrap());
        assert_eq!(copy[b].id(), 2);
        assert_ne!(copy.as_ptr(), vec.as_ptr());
        copy.integrity_check();
    }

    #[test]
    fn try_clone_rejects_owning_objects() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        vec.push_copy(&Plain(1));
        vec.push(DropCounter::new(2, &drops));

        assert_eq!(
            vec.try_clone().unwrap_err(),
            Error::NotBitwiseCopyable { index: 1 }
        );
    }

    #[test]
    fn try_clone_ignores_vacant_owning_slots() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        let owning = vec.push(DropCounter::new(1, &drops));
        vec.push_copy(&Plain(2));
        vec.free(owning).unwrap();

        assert!(vec.try_clone().is_ok());
    }

    #[test]
    fn free_all_destroys_every_live_object_once() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        for id in 0..5 {
            vec.push(DropCounter::new(id, &drops));
        }
        vec.free(2).unwrap();
        let capacity = vec.byte_capacity();

        vec.free_all();

        assert_eq!(drops.get(), 5);
        assert_eq!(vec.len(), 0);
        assert!(vec.is_empty());
        assert_eq!(vec.byte_len(), 0);
        assert_eq!(vec.byte_capacity(), capacity);
        vec.integrity_check();
    }

    #[test]
    fn clear_destroys_objects_and_releases_buffer() {
        let mut vec = PolyVec::<dyn Tracked>::new();
        let drops = Rc::new(Cell::new(0));

        vec.push(DropCounter::new(1, &drops));
        vec.push(DropCounter::new(2, &drops));

        vec.clear();

        assert_eq!(drops.get(), 2);
        assert_eq!(vec.len(), 0);
        assert_eq!(vec.byte_capacity(), 0);
        vec.integrity_check();

        assert_eq!(vec.push(Plain(3)), 0);
    }

    #[test]
    fn drop_destroys_remaining_objects() {
        let drops = Rc::new(Cell::new(0));

        {
            let mut vec = PolyVec::<dyn Tracked>::new();
            vec.push(DropCounter::new(1, &drops));
            let freed = vec.push(DropCounter::new(2, &drops));
            vec.push(DropCounter::new(3, &drops));
            vec.free(freed).unwrap();
        }

        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn drop_with_no_live_objects_does_not_panic_if_policy_must_not_drop() {
        let mut vec = PolyVec::<dyn Tracked>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let index = vec.push(Plain(1));
        vec.free(index).unwrap();

        drop(vec);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_objects_panics_if_policy_must_not_drop() {
        let mut vec = PolyVec::<dyn Tracked>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        vec.push(Plain(1));

        drop(vec);
    }

    #[test]
    fn reserve_preallocates() {
        let mut vec = PolyVec::<dyn Tracked>::new();

        vec.reserve(10, 1000);
        let capacity = vec.byte_capacity();
        assert!(capacity >= 1000);

        for id in 0..10 {
            vec.push(Plain(id));
        }

        assert_eq!(vec.byte_capacity(), capacity);
    }

    #[test]
    fn narrow_offsets_work_within_range() {
        let mut vec = PolyVec::<dyn Tracked, u8>::default();

        for id in 0..60 {
            vec.push(Plain(id));
        }

        assert_eq!(vec.byte_len(), 240);
        assert_eq!(vec[59].id(), 59);
        vec.integrity_check();
    }

    #[test]
    #[should_panic]
    fn narrow_offsets_overflow_panics() {
        let mut vec = PolyVec::<dyn Tracked, u8>::default();

        for id in 0..65 {
            vec.push(Plain(id));
        }
    }

    #[test]
    fn live_index_helpers_skip_vacant_slots() {
        let mut vec = PolyVec::<u32>::new();

        for value in 0..5_u32 {
            vec.push(value);
        }
        vec.free(0).unwrap();
        vec.free(2).unwrap();
        vec.free(4).unwrap();

        assert_eq!(vec.first_live_index(), Some(1));
        assert_eq!(vec.last_live_index(), Some(3));
        assert_eq!(vec.next_live_index(1), Some(3));
        assert_eq!(vec.next_live_index(3), None);
        assert_eq!(vec.next_live_index(usize::MAX), None);
    }

    #[test]
    fn extend_pushes_every_value() {
        let mut vec = PolyVec::<u16>::new();

        vec.extend([1_u16, 2, 3]);

        assert_eq!(vec.iter().copied().collect::<Vec<_>>(), [1, 2, 3]);
    }
}
