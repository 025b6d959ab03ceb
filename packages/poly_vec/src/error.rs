use thiserror::Error;

/// Errors that can occur when addressing slots of a [`PolyVec`][crate::PolyVec].
///
/// No operation that returns an error has mutated the container before failing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The caller provided a slot index that has never been allocated.
    #[error("poly_vec::{operation}(): index {index} not less than size {size}")]
    IndexOutOfRange {
        /// The operation that rejected the index.
        operation: &'static str,

        /// The offending index.
        index: usize,

        /// The number of slots the container had allocated at the time of the call.
        size: usize,
    },

    /// The slot exists but its occupant has already been destroyed.
    #[error("poly_vec::{operation}(): slot {index} is vacant")]
    SlotVacant {
        /// The operation that rejected the index.
        operation: &'static str,

        /// The index of the vacant slot.
        index: usize,
    },

    /// A cursor was dereferenced while positioned past the last slot.
    #[error("poly_vec cursor dereferenced at end position {size}")]
    CursorAtEnd {
        /// The number of slots the container had allocated at the time of the call.
        size: usize,
    },

    /// The container cannot be duplicated because a live occupant was not inserted through
    /// one of the bitwise copy paths.
    #[error("poly_vec::try_clone(): occupant of slot {index} is not bitwise copyable")]
    NotBitwiseCopyable {
        /// The index of the first offending slot.
        index: usize,
    },
}

/// A specialized `Result` type for `poly_vec` operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, std::error::Error);

    #[test]
    fn out_of_range_message_names_index_and_size() {
        let error = Error::IndexOutOfRange {
            operation: "at",
            index: 7,
            size: 3,
        };

        assert_eq!(
            error.to_string(),
            "poly_vec::at(): index 7 not less than size 3"
        );
    }

    #[test]
    fn vacant_message_names_index() {
        let error = Error::SlotVacant {
            operation: "free",
            index: 2,
        };

        assert_eq!(error.to_string(), "poly_vec::free(): slot 2 is vacant");
    }
}
