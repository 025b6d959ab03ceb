//! Integration tests for the `poly_vec` package.
//!
//! These tests exercise `PolyVec` through its public API only: slot placement and reuse,
//! tombstones, iteration order and the lifecycle of stored objects.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use poly_vec::{DropPolicy, Error, PolyVec, upcast};

/// Interface shared by every test object type.
trait Object {
    fn tag(&self) -> &'static str;

    fn value(&self) -> u64;

    fn set_value(&mut self, value: u64);
}

#[repr(C, align(8))]
#[derive(Clone, Copy, Debug)]
struct Small {
    value: u64,
}

#[repr(C, align(8))]
#[derive(Clone, Copy, Debug)]
struct Medium {
    value: u64,
    check: u64,
}

#[repr(C, align(8))]
#[derive(Clone, Copy, Debug)]
struct Large {
    value: u64,
    padding: [u64; 2],
}

/// Records its own value into a shared log when dropped.
struct Logged {
    value: u64,
    log: Rc<RefCell<Vec<u64>>>,
}

impl Drop for Logged {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.value);
    }
}

impl Object for Small {
    fn tag(&self) -> &'static str {
        "small"
    }

    fn value(&self) -> u64 {
        self.value
    }

    fn set_value(&mut self, value: u64) {
        self.value = value;
    }
}

impl Object for Medium {
    fn tag(&self) -> &'static str {
        "medium"
    }

    fn value(&self) -> u64 {
        assert_eq!(self.check, !self.value, "medium object corrupted");
        self.value
    }

    fn set_value(&mut self, value: u64) {
        self.value = value;
        self.check = !value;
    }
}

impl Object for Large {
    fn tag(&self) -> &'static str {
        "large"
    }

    fn value(&self) -> u64 {
        assert!(self.padding.iter().all(|word| *word == 0), "large object corrupted");
        self.value
    }

    fn set_value(&mut self, value: u64) {
        self.value = value;
    }
}

impl Object for Logged {
    fn tag(&self) -> &'static str {
        "logged"
    }

    fn value(&self) -> u64 {
        self.value
    }

    fn set_value(&mut self, value: u64) {
        self.value = value;
    }
}

upcast!(dyn Object => Small, Medium, Large, Logged);

fn small(value: u64) -> Small {
    Small { value }
}

fn medium(value: u64) -> Medium {
    Medium {
        value,
        check: !value,
    }
}

fn large(value: u64) -> Large {
    Large {
        value,
        padding: [0; 2],
    }
}

#[test]
fn freed_slot_is_reused_by_fitting_object() {
    let mut vec = PolyVec::<dyn Object>::new();

    assert_eq!(vec.push(small(1)), 0);
    assert_eq!(vec.push(medium(2)), 1);

    vec.free(0).unwrap();

    assert_eq!(vec.push(small(3)), 0);

    // Nothing is vacant any more, so the large object is appended.
    assert_eq!(vec.push(large(4)), 2);

    let seen: Vec<_> = vec.iter().map(|object| (object.tag(), object.value())).collect();
    assert_eq!(seen, [("small", 3), ("medium", 2), ("large", 4)]);

    assert_eq!(vec.slot_range(0).unwrap(), 0..8);
    assert_eq!(vec.slot_range(1).unwrap(), 8..24);
    assert_eq!(vec.slot_range(2).unwrap(), 24..48);
}

#[test]
fn object_too_large_for_vacant_slot_is_appended() {
    let mut vec = PolyVec::<dyn Object>::new();

    let first = vec.push(small(1));
    vec.push(small(2));
    vec.free(first).unwrap();

    let index = vec.push(medium(3));

    assert_eq!(index, 2);
    assert!(vec.is_free(first).unwrap());

    // The vacant slot still accepts an object that fits.
    assert_eq!(vec.push(small(4)), first);
}

#[test]
fn smaller_object_reuses_larger_slot_without_splitting() {
    let mut vec = PolyVec::<dyn Object>::new();

    let index = vec.push(large(1));
    vec.free(index).unwrap();

    assert_eq!(vec.push(small(2)), index);

    // The unused tail of the slot is not offered to another object.
    assert_eq!(vec.push(small(3)), 1);
    assert_eq!(vec.slot_range(index).unwrap(), 0..24);
    assert_eq!(vec.slot_range(1).unwrap(), 24..32);
}

#[test]
fn first_fitting_vacant_slot_wins() {
    let mut vec = PolyVec::<dyn Object>::new();

    let a = vec.push(small(1));
    let b = vec.push(medium(2));
    let c = vec.push(medium(3));

    vec.free(c).unwrap();
    vec.free(a).unwrap();
    vec.free(b).unwrap();

    // Only b and c can hold a medium object. c was freed first.
    let first = vec.push(medium(4));
    let second = vec.push(medium(5));

    assert_eq!(first, c);
    assert_eq!(second, b);
    assert!(vec.is_free(a).unwrap());
}

#[test]
fn indexes_stay_valid_across_growth_and_reuse() {
    let mut vec = PolyVec::<dyn Object>::new();

    let mut expected = Vec::new();

    for value in 0..300 {
        let index = match value % 3 {
            0 => vec.push(small(value)),
            1 => vec.push(medium(value)),
            _ => vec.push(large(value)),
        };
        expected.push((index, value));
    }

    for (index, value) in expected.iter().copied().filter(|(index, _)| index % 5 == 0) {
        assert_eq!(vec[index].value(), value);
        vec.free(index).unwrap();
    }

    for (index, value) in expected.iter().copied().filter(|(index, _)| index % 5 != 0) {
        assert_eq!(vec[index].value(), value);
    }

    // Refill the vacant slots and check that older objects are unaffected.
    for value in 1000..1060 {
        vec.push(small(value));
    }

    for (index, value) in expected.iter().copied().filter(|(index, _)| index % 5 != 0) {
        assert_eq!(vec[index].value(), value);
    }
}

#[test]
fn iteration_visits_live_objects_in_index_order() {
    let mut vec = PolyVec::<dyn Object>::new();

    for value in 0..10 {
        vec.push(small(value));
    }

    for index in [0, 3, 4, 9] {
        vec.free(index).unwrap();
    }

    let forward: Vec<_> = vec.iter().map(|object| object.value()).collect();
    assert_eq!(forward, [1, 2, 5, 6, 7, 8]);

    let backward: Vec<_> = vec.iter().rev().map(|object| object.value()).collect();
    assert_eq!(backward, [8, 7, 6, 5, 2, 1]);

    assert_eq!(vec.iter().count(), vec.live_len());
    assert_eq!(vec.live_indices().collect::<Vec<_>>(), [1, 2, 5, 6, 7, 8]);
}

#[test]
fn iteration_over_only_vacant_slots_yields_nothing() {
    let mut vec = PolyVec::<dyn Object>::new();

    let a = vec.push(small(1));
    let b = vec.push(medium(2));
    vec.free(a).unwrap();
    vec.free(b).unwrap();

    assert_eq!(vec.len(), 2);
    assert!(vec.is_empty());
    assert!(vec.iter().next().is_none());
    assert!(vec.iter().rev().next().is_none());
    assert!(vec.cursor().is_end(&vec));
}

#[test]
fn iter_mut_modifies_through_interface() {
    let mut vec = PolyVec::<dyn Object>::new();

    vec.push(small(1));
    let freed = vec.push(medium(2));
    vec.push(large(3));
    vec.free(freed).unwrap();

    for object in &mut vec {
        let doubled = object.value() * 2;
        object.set_value(doubled);
    }

    let values: Vec<_> = (&vec).into_iter().map(|object| object.value()).collect();
    assert_eq!(values, [2, 6]);
}

#[test]
fn cursor_walks_live_slots_and_reports_end() {
    let mut vec = PolyVec::<dyn Object>::new();

    vec.push(small(1));
    let freed = vec.push(small(2));
    vec.push(small(3));
    vec.free(freed).unwrap();

    let mut cursor = vec.cursor();
    assert_eq!(cursor.index(), 0);
    assert_eq!(cursor.get(&vec).unwrap().value(), 1);

    cursor.advance(&vec);
    assert_eq!(cursor.index(), 2);

    cursor.get_mut(&mut vec).unwrap().set_value(30);
    assert_eq!(vec[2].value(), 30);

    cursor.advance(&vec);
    assert!(cursor.is_end(&vec));
    assert_eq!(
        cursor.get(&vec).map(|object| object.value()),
        Err(Error::CursorAtEnd { size: 3 })
    );
}

#[test]
fn freeing_destroys_exactly_once() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut vec = PolyVec::<dyn Object>::new();

    for value in 0..4 {
        vec.push(Logged {
            value,
            log: Rc::clone(&log),
        });
    }

    vec.free(2).unwrap();
    assert_eq!(*log.borrow(), [2]);

    assert!(matches!(vec.free(2), Err(Error::SlotVacant { index: 2, .. })));
    assert_eq!(*log.borrow(), [2]);

    assert!(vec.get(2).unwrap().is_none());
    assert!(vec.iter().all(|object| object.value() != 2));

    vec.free_all();
    assert_eq!(*log.borrow(), [2, 0, 1, 3]);

    drop(vec);
    assert_eq!(log.borrow().len(), 4);
}

#[test]
fn out_of_range_error_carries_index_and_size() {
    let mut vec = PolyVec::<dyn Object>::new();
    vec.push(small(1));
    vec.push(small(2));

    let error = vec.free(7).unwrap_err();

    assert_eq!(
        error,
        Error::IndexOutOfRange {
            operation: "free",
            index: 7,
            size: 2
        }
    );
    assert_eq!(
        error.to_string(),
        "poly_vec::free(): index 7 not less than size 2"
    );
}

#[test]
fn free_all_restores_fresh_placement() {
    fn fill(vec: &mut PolyVec<dyn Object>) -> Vec<(usize, std::ops::Range<usize>)> {
        [
            vec.push(small(1)),
            vec.push(large(2)),
            vec.push(medium(3)),
            vec.push(small(4)),
        ]
        .into_iter()
        .map(|index| (index, vec.slot_range(index).unwrap()))
        .collect()
    }

    let mut fresh = PolyVec::<dyn Object>::new();
    let expected = fill(&mut fresh);

    let mut reused = PolyVec::<dyn Object>::new();
    fill(&mut reused);
    reused.free(1).unwrap();
    reused.free(3).unwrap();

    reused.free_all();

    assert_eq!(reused.len(), 0);
    assert_eq!(fill(&mut reused), expected);
}

#[test]
fn clear_resets_and_releases_memory() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut vec = PolyVec::<dyn Object>::new();

    vec.push(Logged {
        value: 1,
        log: Rc::clone(&log),
    });
    vec.push(small(2));

    vec.clear();

    assert_eq!(*log.borrow(), [1]);
    assert_eq!(vec.len(), 0);
    assert_eq!(vec.byte_len(), 0);
    assert_eq!(vec.byte_capacity(), 0);

    assert_eq!(vec.push(medium(3)), 0);
    assert_eq!(vec[0].value(), 3);
}

#[test]
fn narrow_offsets_store_objects() {
    let mut vec = PolyVec::<dyn Object, u16>::builder()
        .slot_capacity(16)
        .build();

    for value in 0..16 {
        vec.push(medium(value));
    }

    vec.free(4).unwrap();
    assert_eq!(vec.push(small(99)), 4);

    assert_eq!(vec.byte_len(), 256);
    assert_eq!(vec[4].value(), 99);
    assert_eq!(vec[15].value(), 15);
}

#[test]
#[should_panic]
fn narrow_offset_overflow_panics() {
    let mut vec = PolyVec::<dyn Object, u8>::default();

    // 16 medium objects need 256 bytes, one more than u8 can address.
    for value in 0..16 {
        vec.push(medium(value));
    }
}

#[test]
fn cloned_container_is_independent() {
    let mut original = PolyVec::<dyn Object>::new();

    original.push_copy(&small(1));
    original.push_copy(&medium(2));

    let mut copy = original.try_clone().unwrap();

    copy[0].set_value(10);
    copy.push_copy(&large(3));

    assert_eq!(original[0].value(), 1);
    assert_eq!(original.len(), 2);
    assert_eq!(copy[0].value(), 10);
    assert_eq!(copy[1].tag(), "medium");
    assert_eq!(copy.len(), 3);
}

#[test]
fn clone_rejected_for_owning_objects() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut vec = PolyVec::<dyn Object>::new();

    vec.push_copy(&small(1));
    vec.push(Logged {
        value: 2,
        log: Rc::clone(&log),
    });

    assert!(matches!(
        vec.try_clone(),
        Err(Error::NotBitwiseCopyable { index: 1 })
    ));
}

#[test]
fn must_not_drop_policy_allows_drop_after_free_all() {
    let mut vec = PolyVec::<dyn Object>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    vec.push(small(1));
    vec.push(medium(2));
    vec.free_all();

    drop(vec);
}

#[test]
#[should_panic]
fn must_not_drop_policy_panics_with_live_objects() {
    let mut vec = PolyVec::<dyn Object>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    vec.push(small(1));

    drop(vec);
}

#[test]
fn sized_interface_needs_no_declaration() {
    let mut vec = PolyVec::<String>::new();

    let hello = vec.push("hello".to_string());
    vec.push("world".to_string());

    vec[hello].push('!');

    assert_eq!(vec.iter().cloned().collect::<Vec<_>>(), ["hello!", "world"]);
}

#[test]
fn standard_trait_objects_can_be_stored() {
    let mut vec = PolyVec::<dyn Debug>::new();

    vec.push(small(5));
    vec.push(medium(6));

    let formatted: Vec<_> = vec.iter().map(|object| format!("{object:?}")).collect();

    assert_eq!(
        formatted,
        [
            "Small { value: 5 }",
            "Medium { value: 6, check: 18446744073709551609 }"
        ]
    );
}

upcast!(dyn Debug => Small, Medium);
