use std::ops::Range;

use crate::offset::{Offset, narrow, widen};

/// Maps stable slot indexes to the half-open byte ranges they occupy in the backing buffer.
///
/// The table holds `N + 1` non-decreasing offsets for `N` allocated slots. Offset `i` is the
/// start of slot `i` and offset `i + 1` is its end. The final offset is a sentinel that marks
/// where the next appended slot will start.
///
/// The table only grows. A slot's start never changes until the whole table is reset. Its end
/// is fixed once the next slot is appended; the append may move it forward to absorb alignment
/// padding but never backward.
#[derive(Clone, Debug)]
pub(crate) struct SlotTable<O: Offset> {
    offsets: Vec<O>,
}

impl<O: Offset> SlotTable<O> {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            offsets: vec![O::zero()],
        }
    }

    /// Number of slots ever appended, including slots that are currently vacant.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        // The sentinel is always present, so this cannot wrap.
        self.offsets.len().wrapping_sub(1)
    }

    /// Byte offset at which the next appended slot would start before alignment.
    #[must_use]
    pub(crate) fn sentinel(&self) -> usize {
        widen(
            *self
                .offsets
                .last()
                .expect("the sentinel offset is always present"),
        )
    }

    /// Returns the byte range of the slot, or `None` if the slot has never been appended.
    #[must_use]
    pub(crate) fn range(&self, index: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(index)?;
        let end = *self.offsets.get(index.checked_add(1)?)?;

        Some(widen(start)..widen(end))
    }

    /// Returns the start offset of the slot without checking that it exists.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `index < self.len()`.
    #[must_use]
    pub(crate) unsafe fn start_unchecked(&self, index: usize) -> usize {
        debug_assert!(index < self.len());

        // SAFETY: Forwarding guarantee from caller that the index is in bounds.
        widen(*unsafe { self.offsets.get_unchecked(index) })
    }

    /// Appends a slot of `size` bytes whose start is aligned to `align` and returns its index
    /// and byte range. The caller is responsible for growing the buffer to the range's end.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or if the new end offset or slot count is not
    /// representable in the offset type.
    pub(crate) fn append(&mut self, size: usize, align: usize) -> (usize, Range<usize>) {
        let start = align_up(self.sentinel(), align);
        let end = start
            .checked_add(size)
            .expect("slot end offset exceeds size of virtual memory");

        let narrow_start: O = narrow(start);
        let narrow_end: O = narrow(end);

        // The new slot index must itself be representable, as it may later enter the free list.
        let index = self.len();
        let _: O = narrow(index);

        let sentinel = self
            .offsets
            .last_mut()
            .expect("the sentinel offset is always present");

        // Alignment padding extends the end of the previous slot. This is the only way a range
        // ever changes after its slot is appended, and it only ever grows.
        *sentinel = narrow_start;
        self.offsets.push(narrow_end);

        (index, start..end)
    }

    /// Reserves space for at least `additional` more slots.
    pub(crate) fn reserve(&mut self, additional: usize) {
        self.offsets.reserve(additional);
    }

    /// Forgets every slot, returning the table to its freshly created state.
    pub(crate) fn reset(&mut self) {
        self.offsets.truncate(1);

        let sentinel = self
            .offsets
            .first_mut()
            .expect("the sentinel offset is always present");
        *sentinel = O::zero();
    }

    #[cfg(test)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        assert!(!self.offsets.is_empty());
        assert!(self.offsets.is_sorted());
    }
}

/// Rounds `offset` up to the next multiple of `align`.
///
/// # Panics
///
/// Panics if `align` is not a power of two or if the result exceeds `usize::MAX`.
#[must_use]
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    assert!(
        align.is_power_of_two(),
        "alignment must be a power of two, got {align}"
    );

    // align is at least 1, so this cannot wrap.
    let mask = align.wrapping_sub(1);

    offset
        .checked_add(mask)
        .expect("aligned offset exceeds size of virtual memory")
        & !mask
}

#[cfg(test)]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn new_table_has_only_sentinel() {
        let table = SlotTable::<usize>::new();

        assert_eq!(table.len(), 0);
        assert_eq!(table.sentinel(), 0);
        assert_eq!(table.range(0), None);
    }

    #[test]
    fn append_returns_consecutive_indexes_and_ranges() {
        let mut table = SlotTable::<usize>::new();

        assert_eq!(table.append(8, 8), (0, 0..8));
        assert_eq!(table.append(16, 8), (1, 8..24));
        assert_eq!(table.len(), 2);
        assert_eq!(table.range(1), Some(8..24));
        assert_eq!(table.sentinel(), 24);
    }

    #[test]
    fn append_aligns_start_by_extending_previous_slot() {
        let mut table = SlotTable::<usize>::new();

        assert_eq!(table.append(1, 1), (0, 0..1));
        assert_eq!(table.append(8, 8), (1, 8..16));

        // The padding between 1 and 8 extends slot 0.
        assert_eq!(table.range(0), Some(0..8));
        table.integrity_check();
    }

    #[test]
    fn zero_sized_slots_are_empty_ranges() {
        let mut table = SlotTable::<usize>::new();

        assert_eq!(table.append(0, 1), (0, 0..0));
        assert_eq!(table.append(0, 1), (1, 0..0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reset_forgets_all_slots() {
        let mut table = SlotTable::<u32>::new();
        table.append(8, 8);
        table.append(8, 8);

        table.reset();

        assert_eq!(table.len(), 0);
        assert_eq!(table.sentinel(), 0);
        assert_eq!(table.append(4, 4), (0, 0..4));
    }

    #[test]
    #[should_panic]
    fn append_past_offset_range_panics() {
        let mut table = SlotTable::<u8>::new();

        table.append(200, 1);
        table.append(100, 1);
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(5, 1), 5);
    }

    #[test]
    #[should_panic]
    fn align_up_rejects_non_power_of_two() {
        _ = align_up(5, 6);
    }
}
