use std::iter::FusedIterator;
use std::marker::PhantomData;

use crate::buffer::Buffer;
use crate::slot_meta::SlotMeta;
use crate::slot_table::SlotTable;
use crate::{Error, Offset, PolyVec, Result};

/// Iterator over the indexes of live slots of a [`PolyVec`], in ascending order.
///
/// Both ends of the iterator skip vacant slots.
///
/// Created by [`PolyVec::live_indices()`].
#[derive(Debug)]
pub struct LiveIndices<'a, I: ?Sized> {
    metas: &'a [Option<SlotMeta<I>>],

    /// Next position to inspect from the front.
    front: usize,

    /// One past the next position to inspect from the back.
    back: usize,
}

impl<'a, I: ?Sized> LiveIndices<'a, I> {
    pub(crate) fn new(metas: &'a [Option<SlotMeta<I>>]) -> Self {
        Self {
            metas,
            front: 0,
            back: metas.len(),
        }
    }

    fn is_live(&self, index: usize) -> bool {
        self.metas.get(index).is_some_and(Option::is_some)
    }
}

impl<I: ?Sized> Iterator for LiveIndices<'_, I> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.front < self.back {
            let index = self.front;

            // Cannot overflow because front < back <= metas.len().
            self.front = self.front.wrapping_add(1);

            if self.is_live(index) {
                return Some(index);
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // Every remaining position may be vacant, or all of them may be live.
        (0, Some(self.back.saturating_sub(self.front)))
    }
}

impl<I: ?Sized> DoubleEndedIterator for LiveIndices<'_, I> {
    fn next_back(&mut self) -> Option<usize> {
        while self.back > self.front {
            // Cannot wrap because back > front >= 0.
            self.back = self.back.wrapping_sub(1);

            if self.is_live(self.back) {
                return Some(self.back);
            }
        }

        None
    }
}

impl<I: ?Sized> FusedIterator for LiveIndices<'_, I> {}

/// Iterator over shared references to the live objects of a [`PolyVec`], in ascending index
/// order.
///
/// Created by [`PolyVec::iter()`].
#[derive(Debug)]
pub struct Iter<'a, I: ?Sized, O: Offset = usize> {
    vec: &'a PolyVec<I, O>,
    indices: LiveIndices<'a, I>,
}

impl<'a, I: ?Sized, O: Offset> Iter<'a, I, O> {
    pub(crate) fn new(vec: &'a PolyVec<I, O>) -> Self {
        Self {
            vec,
            indices: vec.live_indices(),
        }
    }

    fn resolve(&self, index: usize) -> &'a I {
        // SAFETY: LiveIndices only yields indexes of live slots, which are in bounds.
        unsafe { self.vec.get_unchecked(index) }
            .expect("LiveIndices only yields indexes of live slots")
    }
}

impl<'a, I: ?Sized, O: Offset> Iterator for Iter<'a, I, O> {
    type Item = &'a I;

    fn next(&mut self) -> Option<&'a I> {
        let index = self.indices.next()?;
        Some(self.resolve(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<'a, I: ?Sized, O: Offset> DoubleEndedIterator for Iter<'a, I, O> {
    fn next_back(&mut self) -> Option<&'a I> {
        let index = self.indices.next_back()?;
        Some(self.resolve(index))
    }
}

impl<I: ?Sized, O: Offset> FusedIterator for Iter<'_, I, O> {}

/// Iterator over exclusive references to the live objects of a [`PolyVec`], in ascending
/// index order.
///
/// Created by [`PolyVec::iter_mut()`].
#[derive(Debug)]
pub struct IterMut<'a, I: ?Sized, O: Offset = usize> {
    buffer: &'a Buffer,
    slots: &'a SlotTable<O>,
    indices: LiveIndices<'a, I>,

    // The iterator hands out exclusive references into the buffer.
    _exclusive: PhantomData<&'a mut I>,
}

impl<'a, I: ?Sized, O: Offset> IterMut<'a, I, O> {
    /// Creates the iterator from the parts of a container that is exclusively borrowed for `'a`.
    pub(crate) fn new(
        buffer: &'a Buffer,
        slots: &'a SlotTable<O>,
        metas: &'a [Option<SlotMeta<I>>],
    ) -> Self {
        Self {
            buffer,
            slots,
            indices: LiveIndices::new(metas),
            _exclusive: PhantomData,
        }
    }

    fn resolve(&self, index: usize) -> &'a mut I {
        let meta = self
            .indices
            .metas
            .get(index)
            .and_then(Option::as_ref)
            .expect("LiveIndices only yields indexes of live slots");

        let start = self
            .slots
            .range(index)
            .expect("LiveIndices only yields indexes of allocated slots")
            .start;

        let data = self.buffer.ptr_at(start);

        // SAFETY: The slot is live, so it holds an initialized object described by its meta.
        // The container is exclusively borrowed for 'a and every index is yielded at most once,
        // so the references handed out never alias each other or anything else.
        unsafe { meta.object_ptr(data).as_mut() }
    }
}

impl<'a, I: ?Sized, O: Offset> Iterator for IterMut<'a, I, O> {
    type Item = &'a mut I;

    fn next(&mut self) -> Option<&'a mut I> {
        let index = self.indices.next()?;
        Some(self.resolve(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.indices.size_hint()
    }
}

impl<'a, I: ?Sized, O: Offset> DoubleEndedIterator for IterMut<'a, I, O> {
    fn next_back(&mut self) -> Option<&'a mut I> {
        let index = self.indices.next_back()?;
        Some(self.resolve(index))
    }
}

impl<I: ?Sized, O: Offset> FusedIterator for IterMut<'_, I, O> {}

/// A restartable position in the slot sequence of a [`PolyVec`].
///
/// A cursor only stores an index and does not borrow the container, so it stays usable across
/// insertions and frees. Dereferencing re-checks the slot every time: a cursor whose slot was
/// freed after it was positioned reports [`Error::SlotVacant`] instead of reading a dead object.
///
/// Created by [`PolyVec::cursor()`], which positions it at the first live slot.
///
/// # Examples
///
/// ```
/// use poly_vec::{Error, PolyVec};
///
/// let mut vec = PolyVec::<u32>::new();
/// vec.push(1_u32);
/// let second = vec.push(2_u32);
///
/// let mut cursor = vec.cursor();
/// cursor.advance(&vec);
/// assert_eq!(cursor.index(), second);
///
/// vec.free(second).unwrap();
/// assert!(matches!(cursor.get(&vec), Err(Error::SlotVacant { .. })));
///
/// cursor.advance(&vec);
/// assert!(matches!(cursor.get(&vec), Err(Error::CursorAtEnd { .. })));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cursor {
    index: usize,
}

impl Cursor {
    pub(crate) fn at(index: usize) -> Self {
        Self { index }
    }

    /// The slot index the cursor is positioned at.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the cursor is positioned past the last slot of the container.
    #[must_use]
    pub fn is_end<I: ?Sized, O: Offset>(&self, vec: &PolyVec<I, O>) -> bool {
        self.index >= vec.len()
    }

    /// Moves the cursor forward by at least one position, then past any vacant slots, stopping
    /// at the next live slot or at the end position.
    pub fn advance<I: ?Sized, O: Offset>(&mut self, vec: &PolyVec<I, O>) {
        self.index = vec.next_live_index(self.index).unwrap_or(vec.len());
    }

    /// Returns a reference to the object at the cursor position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorAtEnd`] if the cursor is at the end position and
    /// [`Error::SlotVacant`] if the slot under the cursor is vacant.
    pub fn get<'a, I: ?Sized, O: Offset>(&self, vec: &'a PolyVec<I, O>) -> Result<&'a I> {
        if self.is_end(vec) {
            return Err(Error::CursorAtEnd { size: vec.len() });
        }

        vec.get(self.index)?.ok_or(Error::SlotVacant {
            operation: "cursor",
            index: self.index,
        })
    }

    /// Returns an exclusive reference to the object at the cursor position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CursorAtEnd`] if the cursor is at the end position and
    /// [`Error::SlotVacant`] if the slot under the cursor is vacant.
    pub fn get_mut<'a, I: ?Sized, O: Offset>(
        &self,
        vec: &'a mut PolyVec<I, O>,
    ) -> Result<&'a mut I> {
        if self.is_end(vec) {
            return Err(Error::CursorAtEnd { size: vec.len() });
        }

        let index = self.index;

        vec.get_mut(index)?.ok_or(Error::SlotVacant {
            operation: "cursor",
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(Iter<'static, dyn Debug>: Send, Sync);
    assert_not_impl_any!(IterMut<'static, dyn Debug>: Send, Sync);

    fn with_vacancies() -> PolyVec<u32> {
        let mut vec = PolyVec::new();

        for value in 0..6_u32 {
            vec.push(value);
        }

        // Leave live objects at 1, 2 and 4.
        vec.free(0).unwrap();
        vec.free(3).unwrap();
        vec.free(5).unwrap();

        vec
    }

    #[test]
    fn forward_iteration_skips_vacant_slots() {
        let vec = with_vacancies();

        assert_eq!(vec.iter().copied().collect::<Vec<_>>(), [1, 2, 4]);
        assert_eq!(vec.live_indices().collect::<Vec<_>>(), [1, 2, 4]);
    }

    #[test]
    fn backward_iteration_skips_vacant_slots() {
        let vec = with_vacancies();

        assert_eq!(vec.iter().rev().copied().collect::<Vec<_>>(), [4, 2, 1]);
        assert_eq!(vec.live_indices().rev().collect::<Vec<_>>(), [4, 2, 1]);
    }

    #[test]
    fn both_ends_meet_without_repeating() {
        let vec = with_vacancies();
        let mut iter = vec.iter();

        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next_back(), Some(&4));
        assert_eq!(iter.next(), Some(&2));
        assert_eq!(iter.next_back(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn iter_mut_modifies_live_objects_only() {
        let mut vec = with_vacancies();

        for value in &mut vec {
            *value *= 10;
        }

        assert_eq!(vec.iter().copied().collect::<Vec<_>>(), [10, 20, 40]);
        assert_eq!(vec.get(0).unwrap(), None);
    }

    #[test]
    fn iteration_is_restartable() {
        let vec = with_vacancies();

        let first: Vec<_> = vec.iter().collect();
        let second: Vec<_> = vec.iter().collect();

        assert_eq!(first, second);
    }

    #[test]
    fn empty_container_yields_nothing() {
        let vec = PolyVec::<u32>::new();

        assert_eq!(vec.iter().next(), None);
        assert!(vec.cursor().is_end(&vec));
    }

    #[test]
    fn all_vacant_container_yields_nothing() {
        let mut vec = PolyVec::<u32>::new();
        let index = vec.push(1);
        vec.free(index).unwrap();

        assert_eq!(vec.iter().next(), None);
        assert_eq!(vec.iter().next_back(), None);
        assert!(vec.cursor().is_end(&vec));
    }

    #[test]
    fn cursor_starts_at_first_live_slot() {
        let vec = with_vacancies();

        let cursor = vec.cursor();

        assert_eq!(cursor.index(), 1);
        assert_eq!(*cursor.get(&vec).unwrap(), 1);
    }

    #[test]
    fn cursor_walks_live_slots_then_stops_at_end() {
        let vec = with_vacancies();
        let mut cursor = vec.cursor();
        let mut seen = Vec::new();

        while !cursor.is_end(&vec) {
            seen.push(*cursor.get(&vec).unwrap());
            cursor.advance(&vec);
        }

        assert_eq!(seen, [1, 2, 4]);
        assert_eq!(cursor.index(), vec.len());

        // Advancing past the end stays at the end.
        cursor.advance(&vec);
        assert_eq!(cursor.index(), vec.len());
        assert_eq!(cursor.get(&vec), Err(Error::CursorAtEnd { size: 6 }));
    }

    #[test]
    fn cursor_get_mut_modifies_object() {
        let mut vec = with_vacancies();
        let cursor = vec.cursor();

        *cursor.get_mut(&mut vec).unwrap() = 100;

        assert_eq!(vec[1], 100);
    }

    #[test]
    fn cursor_over_freed_slot_reports_vacancy() {
        let mut vec = with_vacancies();
        let cursor = vec.cursor();

        vec.free(cursor.index()).unwrap();

        assert_eq!(
            cursor.get(&vec),
            Err(Error::SlotVacant {
                operation: "cursor",
                index: 1
            })
        );
    }

    #[test]
    fn cursor_survives_reset() {
        let mut vec = with_vacancies();
        let cursor = vec.cursor();

        vec.clear();

        assert!(cursor.is_end(&vec));
        assert_eq!(cursor.get(&vec), Err(Error::CursorAtEnd { size: 0 }));
    }
}
