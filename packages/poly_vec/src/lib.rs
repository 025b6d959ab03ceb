//! A packed, cache-friendly container for objects of different types behind one interface.
//!
//! This crate provides [`PolyVec`], which stores values of heterogeneous concrete types that
//! share a common interface (typically a trait object type such as `dyn Shape`) contiguously
//! in a single byte buffer. Compared to a `Vec<Box<dyn Shape>>`, there is one allocation for the
//! whole collection instead of one per object, and iteration walks memory front to back.
//!
//! # Key Features
//!
//! - **Packed storage**: All objects live in one growable, aligned byte buffer
//! - **Stable indexes**: Every insertion returns an index that stays valid until the container
//!   is reset, regardless of buffer growth
//! - **Slot reuse**: Freed slots are reused first-fit by later insertions that fit into them
//! - **Virtual destruction**: Objects are dropped through the interface type when freed
//! - **Tombstones**: Freed slots are marked vacant and skipped by iteration
//! - **Configurable offset width**: Narrower offset types such as `u32` shrink the offset
//!   table and the free list
//! - **Drop policies**: Configurable behavior when dropping a container with live objects
//!
//! # Storing trait objects
//!
//! Concrete types declare that they can be stored as the interface type with the [`upcast!`]
//! macro. Inserting a type that has no such declaration is a compile error.
//!
//! ```rust
//! use poly_vec::{PolyVec, upcast};
//!
//! trait Shape {
//!     fn area(&self) -> f64;
//! }
//!
//! struct Circle {
//!     radius: f64,
//! }
//!
//! struct Rectangle {
//!     width: f64,
//!     height: f64,
//! }
//!
//! impl Shape for Circle {
//!     fn area(&self) -> f64 {
//!         std::f64::consts::PI * self.radius * self.radius
//!     }
//! }
//!
//! impl Shape for Rectangle {
//!     fn area(&self) -> f64 {
//!         self.width * self.height
//!     }
//! }
//!
//! upcast!(dyn Shape => Circle, Rectangle);
//!
//! let mut shapes = PolyVec::<dyn Shape>::new();
//!
//! let circle = shapes.push(Circle { radius: 1.0 });
//! let rectangle = shapes.push(Rectangle {
//!     width: 2.0,
//!     height: 3.0,
//! });
//!
//! let total: f64 = shapes.iter().map(|shape| shape.area()).sum();
//! assert!((total - (std::f64::consts::PI + 6.0)).abs() < 1e-9);
//!
//! // Freeing leaves a tombstone; the index of the rectangle is unaffected.
//! shapes.free(circle).unwrap();
//! assert!(shapes.get(circle).unwrap().is_none());
//! assert_eq!(shapes[rectangle].area(), 6.0);
//!
//! // A new object that fits into the vacant slot reuses its index.
//! assert_eq!(shapes.push(Circle { radius: 2.0 }), circle);
//! ```
//!
//! # Slot reuse
//!
//! A vacant slot is reused only if the new object fits into the slot's byte range and the
//! slot's start already satisfies the object's alignment. The first fitting slot wins. Slots are
//! never split, so the unused tail of a reused slot stays wasted until the container is reset
//! with [`PolyVec::free_all()`] or [`PolyVec::clear()`].
//!
//! # Thread safety
//!
//! [`PolyVec`] is single-threaded: it is neither [`Send`] nor [`Sync`].

mod buffer;
mod builder;
mod drop_policy;
mod error;
mod iter;
mod offset;
mod placement;
mod poly_vec;
mod slot_meta;
mod slot_table;
mod upcast;

pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use iter::*;
pub use offset::Offset;
pub use poly_vec::PolyVec;
pub use upcast::Upcast;
