use std::alloc::Layout;
use std::ops::Range;

use crate::offset::{Offset, narrow, widen};
use crate::slot_table::{SlotTable, align_up};

/// Indexes of vacant slots that may be reused by future insertions.
///
/// The list is unordered. Removing an entry swaps the last entry into its place.
#[derive(Clone, Debug)]
pub(crate) struct FreeList<O: Offset> {
    indices: Vec<O>,
}

/// Where the placement allocator decided to put a new object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Placement {
    /// A vacant slot was taken from the free list.
    Reused {
        /// Index of the reused slot.
        index: usize,

        /// Byte offset at which the object is to be written.
        start: usize,
    },

    /// A new slot was appended to the slot table.
    ///
    /// The buffer has not yet been grown to cover the range.
    Appended {
        /// Index of the new slot.
        index: usize,

        /// Byte range of the new slot.
        range: Range<usize>,
    },
}

impl Placement {
    #[must_use]
    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Reused { index, .. } | Self::Appended { index, .. } => *index,
        }
    }

    #[must_use]
    pub(crate) fn start(&self) -> usize {
        match self {
            Self::Reused { start, .. } => *start,
            Self::Appended { range, .. } => range.start,
        }
    }
}

impl<O: Offset> FreeList<O> {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            indices: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    pub(crate) fn push(&mut self, index: usize) {
        self.indices.push(narrow(index));
    }

    pub(crate) fn clear(&mut self) {
        self.indices.clear();
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.indices.reserve(additional);
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn contains(&self, index: usize) -> bool {
        self.indices.iter().any(|&candidate| widen(candidate) == index)
    }

    /// Removes and returns the first vacant slot that can hold an object with the given layout
    /// without moving the slot's start.
    ///
    /// A slot fits if its start offset is already a multiple of the layout's alignment and its
    /// range is at least as long as the layout's size. The first fitting slot in list order wins,
    /// even if a tighter fit exists later in the list. Slots are never split.
    #[must_use]
    pub(crate) fn take_first_fit(&mut self, table: &SlotTable<O>, layout: Layout) -> Option<usize> {
        let position = self.indices.iter().position(|&candidate| {
            let range = table
                .range(widen(candidate))
                .expect("the free list only holds indexes of allocated slots");

            align_up(range.start, layout.align()) == range.start && range.len() >= layout.size()
        })?;

        Some(widen(self.indices.swap_remove(position)))
    }
}

/// Picks a slot for an object with the given layout.
///
/// A fitting vacant slot from the free list is preferred. If none fits, a new slot is appended.
#[must_use]
pub(crate) fn place<O: Offset>(
    table: &mut SlotTable<O>,
    free: &mut FreeList<O>,
    layout: Layout,
) -> Placement {
    if let Some(index) = free.take_first_fit(table, layout) {
        let range = table
            .range(index)
            .expect("the free list only holds indexes of allocated slots");

        return Placement::Reused {
            index,
            start: range.start,
        };
    }

    append(table, layout)
}

/// Appends a new slot for an object with the given layout, ignoring the free list.
#[must_use]
pub(crate) fn append<O: Offset>(table: &mut SlotTable<O>, layout: Layout) -> Placement {
    let (index, range) = table.append(layout.size(), layout.align());
    Placement::Appended { index, range }
}
