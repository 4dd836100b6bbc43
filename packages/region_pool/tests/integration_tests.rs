//! Integration tests for the `region_pool` package.
//!
//! These exercise the public API of `Region`, `RawPool` and `Pool` through longer operation
//! sequences than the unit tests, checking the observable invariants after every step.
#![allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::{BTreeMap, HashSet};
use std::num::NonZero;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use region_pool::{AllocateError, Handle, Index, Pool, RawPool, Region, SlotState};

#[test]
fn round_trip() {
    let mut pool = RawPool::<String>::new();

    let handle = pool.allocate("round trip".to_string());
    assert_eq!(pool.get(handle).map(String::as_str), Some("round trip"));

    pool.free(handle);

    assert_eq!(pool.get(handle), None);
    assert!(pool.is_empty());
}

#[test]
fn region_scenario() {
    let mut region = Region::<i32>::with_capacity(10);

    for position in 0..=5_usize {
        let value = i32::try_from(position).unwrap();
        assert!(region.emplace(Index::new(position), value).is_some());
    }

    region.free(Index::new(5));

    assert_eq!(region.get(Index::new(5)), None);
    assert_eq!(region.get(Index::new(4)), Some(&4));

    region.free(Index::new(0));

    assert_eq!(region.get(Index::new(0)), None);
    assert_eq!(region.slot_state(Index::new(0)), Some(SlotState::FirstFree));
    assert_eq!(region.slot_state(Index::new(5)), Some(SlotState::FirstFree));
    assert_eq!(region.slot_state(Index::new(10)), Some(SlotState::Gravestone));
    assert_eq!(region.slot_state(Index::new(11)), None);

    let live: Vec<_> = region.iter().map(|(_, value)| *value).collect();
    assert_eq!(live, [1, 2, 3, 4]);
}

#[test]
fn pool_scenario() {
    let pool = Pool::<i32>::new();

    let borrows: Vec<_> = [66, 67, 68, 69]
        .into_iter()
        .map(|value| pool.allocate(value))
        .collect();

    let resolved: Vec<_> = borrows.iter().map(|borrow| borrow.cloned()).collect();
    assert_eq!(resolved, [Some(66), Some(67), Some(68), Some(69)]);

    pool.free(borrows[1]);

    let values: Vec<i32> = pool.iter().map(|value| *value).collect();
    assert_eq!(values, [66, 68, 69]);
    assert_eq!(pool.len(), 3);
}

#[test]
fn three_adjacent_runs_merge() {
    let mut region = Region::<u32>::with_capacity(5);

    for position in 0..5 {
        region.emplace(Index::new(position), u32::try_from(position).unwrap());
    }

    // Runs at 1 and 3, separated by the occupied slot 2.
    region.free(Index::new(1));
    region.free(Index::new(3));

    region.free(Index::new(2));

    assert_eq!(region.slot_state(Index::new(1)), Some(SlotState::FirstFree));
    assert_eq!(region.slot_state(Index::new(2)), Some(SlotState::Free));
    assert_eq!(region.slot_state(Index::new(3)), Some(SlotState::Free));
    assert_eq!(region.first_free(), Some(Index::new(1)));

    // The merged run is filled front to back.
    for expected in 1..=3 {
        let index = region.first_free().unwrap();
        assert_eq!(index, Index::new(expected));
        region.emplace(index, 0);
    }

    assert_eq!(region.first_free(), None);
}

#[test]
fn live_set_matches_model() {
    let mut rng = SmallRng::seed_from_u64(0x0D0C_0FFE);

    let mut pool = RawPool::<u64>::builder()
        .default_capacity(NonZero::new(4).unwrap())
        .build_raw();
    let mut model = BTreeMap::<Handle, u64>::new();

    for step in 0..5_000_u64 {
        if model.is_empty() || rng.random_bool(0.6) {
            let handle = pool.allocate(step);
            assert!(model.insert(handle, step).is_none());
        } else {
            let victim = *model
                .keys()
                .nth(rng.random_range(0..model.len()))
                .unwrap();

            assert_eq!(pool.take(victim), model.remove(&victim));
            assert_eq!(pool.get(victim), None);
        }

        assert_eq!(pool.len(), model.len());
    }

    for (handle, value) in &model {
        assert_eq!(pool.get(*handle), Some(value));
    }

    // Iteration yields every live value exactly once, in ascending slot order.
    let mut by_index: Vec<(Index, u64)> = model
        .iter()
        .map(|(handle, value)| (pool.index_of(*handle).unwrap(), *value))
        .collect();
    by_index.sort_unstable();

    let iterated: Vec<u64> = pool.iter().copied().collect();
    let expected: Vec<u64> = by_index.into_iter().map(|(_, value)| value).collect();

    assert_eq!(iterated.len(), pool.len());
    assert_eq!(iterated, expected);
}

#[test]
fn growth_preserves_data() {
    let mut pool = RawPool::<String>::builder()
        .default_capacity(NonZero::new(2).unwrap())
        .build_raw();

    let handles: Vec<_> = (0..1_000).map(|i| pool.allocate(i.to_string())).collect();

    assert!(pool.capacity() >= 1_000);

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(pool.get(*handle), Some(&i.to_string()));
    }
}

#[test]
fn handles_are_not_reused_on_same_index() {
    let mut pool = RawPool::<u32>::with_capacity(1);
    let mut seen = HashSet::new();

    for round in 0..100 {
        let handle = pool.allocate(round);

        assert_eq!(pool.index_of(handle), Some(Index::new(0)));
        assert!(seen.insert(handle), "handle reused in round {round}");

        pool.free(handle);
    }

    assert_eq!(pool.capacity(), 1);
}

#[test]
fn try_allocate_reports_no_error_in_normal_use() {
    let mut pool = RawPool::<u32>::new();

    let result: Result<Handle, AllocateError> = pool.try_allocate(1);

    assert!(result.is_ok());
}

#[test]
fn try_allocate_reports_capacity_overflow() {
    let mut pool = RawPool::<u64>::builder()
        .default_capacity(NonZero::new(usize::MAX / 4).unwrap())
        .build_raw();

    assert!(matches!(
        pool.try_allocate(1),
        Err(AllocateError::CapacityOverflow { .. })
    ));
    assert!(pool.is_empty());

    let shared = Pool::<u64>::builder()
        .default_capacity(NonZero::new(usize::MAX / 4).unwrap())
        .build();

    assert!(matches!(
        shared.try_allocate(1),
        Err(AllocateError::CapacityOverflow { .. })
    ));
    assert!(shared.is_empty());
}

#[test]
fn borrows_survive_unrelated_frees() {
    let pool = Pool::<u32>::with_capacity(3);

    let a = pool.allocate(1);
    let b = pool.allocate(2);
    let c = pool.allocate(3);

    a.free();
    c.free();

    assert_eq!(b.cloned(), Some(2));
    assert_eq!(pool.len(), 1);

    let d = pool.allocate(4);

    // The lowest free slot is the one `a` used to occupy.
    assert_eq!(d.index(), Some(Index::new(0)));
    assert_eq!(b.cloned(), Some(2));
}
