/// Declares that values of `Self` can be stored in a [`PolyVec<I>`][crate::PolyVec] and accessed
/// through the interface type `I`.
///
/// `I` is typically a trait object type such as `dyn Shape`. Every sized type is its own
/// interface, so a `PolyVec<u64>` accepts `u64` values without any declaration.
///
/// Implement this trait with the [`upcast!`][crate::upcast!] macro, which generates the
/// conversion through the compiler's unsizing coercion. A type that does not implement the
/// interface trait is then rejected at compile time.
///
/// # Safety
///
/// [`upcast()`](Self::upcast) must return a pointer to the same address as its input, carrying
/// the metadata (vtable) that belongs to `Self`. Returning any other pointer causes undefined
/// behavior when the container dispatches through it.
///
/// # Examples
///
/// ```
/// use poly_vec::{PolyVec, upcast};
///
/// trait Shape {
///     fn area(&self) -> f64;
/// }
///
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// upcast!(dyn Shape => Square);
///
/// let mut shapes = PolyVec::<dyn Shape>::new();
/// let index = shapes.push(Square(3.0));
///
/// assert_eq!(shapes[index].area(), 9.0);
/// ```
pub unsafe trait Upcast<I: ?Sized> {
    /// Converts a pointer to `Self` into a pointer to the interface type at the same address.
    fn upcast(ptr: *mut Self) -> *mut I;
}

// SAFETY: The identity conversion returns its input unchanged.
unsafe impl<T> Upcast<T> for T {
    #[inline]
    fn upcast(ptr: *mut Self) -> *mut T {
        ptr
    }
}

/// Implements [`Upcast`][crate::Upcast] for one or more concrete types, making them storable in a
/// [`PolyVec`][crate::PolyVec] of the given interface type.
///
/// The conversion is the compiler's unsizing coercion, so the invocation fails to compile if a
/// listed type does not implement the interface trait.
///
/// # Examples
///
/// ```
/// use std::fmt::Display;
///
/// use poly_vec::{PolyVec, upcast};
///
/// struct Meters(u32);
///
/// impl Display for Meters {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{} m", self.0)
///     }
/// }
///
/// upcast!(dyn Display => Meters);
///
/// let mut values = PolyVec::<dyn Display>::new();
/// values.push(Meters(5));
///
/// assert_eq!(values[0].to_string(), "5 m");
/// ```
#[macro_export]
macro_rules! upcast {
    ($interface:ty => $($concrete:ty),+ $(,)?) => {
        $(
            // SAFETY: Unsizing coercion keeps the address and attaches the metadata of the
            // concrete type.
            unsafe impl $crate::Upcast<$interface> for $concrete {
                #[inline]
                fn upcast(ptr: *mut Self) -> *mut $interface {
                    ptr
                }
            }
        )+
    };
}
