/// Determines what happens to live objects when a [`PolyVec`][crate::PolyVec] is dropped.
///
/// By default, the container destroys its remaining objects when it is dropped.
///
/// # Examples
///
/// ```
/// use poly_vec::{DropPolicy, PolyVec};
///
/// // The drop policy is set when the container is built.
/// let mut vec = PolyVec::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// vec.push(1_u32);
///
/// // Leaving the object in place would panic when `vec` is dropped.
/// vec.free_all();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The container destroys its live objects when it is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The container panics if it still contains live objects when it is dropped.
    ///
    /// This is useful when objects must be released in a controlled way, for example when
    /// their destructors need resources that the owner tears down separately.
    MustNotDropItems,
}
