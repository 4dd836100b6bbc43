use std::any::type_name;
use std::iter::FusedIterator;
use std::num::NonZero;
use std::thread;

use foldhash::{HashMap, HashMapExt};
use tracing::debug;

use crate::handle::HandleCounter;
use crate::{AllocateError, DropPolicy, Handle, Index, PoolBuilder, Region, region};

/// An object pool of unbounded size that identifies its items by never-reused [`Handle`]s.
///
/// The pool stores its items in a [`Region`] and keeps a table from each handle to the index of
/// the slot holding the item. Growing the region may move the items, but their handles remain
/// valid. A handle of an item that has been freed resolves to nothing - no other item will ever
/// be issued the same handle.
///
/// All access goes through `&mut self` or `&self`, so the borrow checker guarantees that no
/// reference to an item outlives the next allocation or removal. If you need to allocate and
/// free while holding on to item references of some kind, use [`Pool`][crate::Pool], which
/// hands out [`Borrow`][crate::Borrow]s.
///
/// # Resource usage
///
/// The first allocation reserves a default capacity (512 unless configured otherwise via
/// [`builder()`][Self::builder]). Whenever the pool is full, its capacity is multiplied by the
/// growth factor (2 unless configured otherwise). Capacity is never released.
///
/// # Example
///
/// ```rust
/// use region_pool::RawPool;
///
/// let mut pool = RawPool::<String>::new();
///
/// let hello = pool.allocate("Hello".to_string());
/// let world = pool.allocate("World".to_string());
///
/// assert_eq!(pool.get(hello).map(String::as_str), Some("Hello"));
///
/// pool.free(hello);
///
/// assert_eq!(pool.get(hello), None);
/// assert_eq!(pool.len(), 1);
/// # _ = world;
/// ```
#[derive(Debug)]
pub struct RawPool<T> {
    region: Region<T>,

    /// Where each live item is stored. We use foldhash for better performance with the small,
    /// integer-like keys we have here.
    indices: HashMap<Handle, Index>,

    handles: HandleCounter,

    /// Number of live items. Tracked explicitly so we do not need to ask the hash table.
    length: usize,

    default_capacity: NonZero<usize>,
    growth_factor: NonZero<usize>,
    drop_policy: DropPolicy,
}

impl<T> RawPool<T> {
    #[must_use]
    pub(crate) fn new_inner(
        default_capacity: NonZero<usize>,
        growth_factor: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        Self {
            region: Region::new(),
            indices: HashMap::new(),
            handles: HandleCounter::default(),
            length: 0,
            default_capacity,
            growth_factor,
            drop_policy,
        }
    }

    /// Creates a new pool with the default configuration.
    ///
    /// No memory is reserved until the first item is allocated.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build_raw()
    }

    /// Creates a new pool with the default configuration and room for `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is `usize::MAX`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().initial_capacity(capacity).build_raw()
    }

    /// Starts building a new pool.
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::new()
    }

    /// The number of items in the pool.
    #[doc(alias = "size")]
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.length, self.indices.len());

        self.length
    }

    /// Whether the pool has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The number of items the pool can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Ensures the pool can hold at least `count` items without growing. Does nothing if the
    /// capacity is already at least `count`.
    ///
    /// # Panics
    ///
    /// Panics if `count` is `usize::MAX` or if the storage cannot be allocated.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn reserve(&mut self, count: usize) {
        if count <= self.capacity() {
            return;
        }

        self.region.reserve(count);
        self.indices
            .reserve(count.saturating_sub(self.indices.len()));
    }

    /// Allocates `value` in the pool and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items. See [`AllocateError`] for the reasons.
    pub fn allocate(&mut self, value: T) -> Handle {
        self.allocate_with(|| value)
    }

    /// Allocates the value returned by `f` in the pool and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items. See [`AllocateError`] for the reasons.
    pub fn allocate_with<F>(&mut self, f: F) -> Handle
    where
        F: FnOnce() -> T,
    {
        match self.try_allocate_with(f) {
            Ok(handle) => handle,
            Err(error) => panic!("cannot allocate in pool of {}: {error}", type_name::<T>()),
        }
    }

    /// Allocates a default-constructed value in the pool and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items. See [`AllocateError`] for the reasons.
    pub fn allocate_default(&mut self) -> Handle
    where
        T: Default,
    {
        self.allocate_with(T::default)
    }

    /// Allocates `value` in the pool and returns its handle, or an error if the pool can accept
    /// no more items.
    ///
    /// On error, `value` is dropped.
    pub fn try_allocate(&mut self, value: T) -> Result<Handle, AllocateError> {
        self.try_allocate_with(|| value)
    }

    /// Allocates the value returned by `f` in the pool and returns its handle, or an error if
    /// the pool can accept no more items.
    ///
    /// `f` is not called if an error is returned.
    pub fn try_allocate_with<F>(&mut self, f: F) -> Result<Handle, AllocateError>
    where
        F: FnOnce() -> T,
    {
        let handle = self.handles.peek().ok_or(AllocateError::HandlesExhausted)?;

        if !self.region.alive() {
            debug!(
                item_type = type_name::<T>(),
                capacity = self.default_capacity.get(),
                "reserving default pool capacity"
            );

            self.try_grow_to(self.default_capacity.get())?;
        }

        if self.region.first_free().is_none() {
            self.grow()?;
        }

        let index = self
            .region
            .first_free()
            .expect("the region has a free slot, either already or because it just grew");

        assert!(
            self.region.emplace_with(index, f).is_some(),
            "region of {} refused to emplace at its own first free index {index}",
            type_name::<T>()
        );

        self.handles.advance();
        self.indices.insert(handle, index);
        self.length = self
            .length
            .checked_add(1)
            .expect("each item occupies a slot, so the count cannot exceed the capacity");

        Ok(handle)
    }

    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    fn grow(&mut self) -> Result<(), AllocateError> {
        let capacity = self.capacity();

        let grown = capacity
            .checked_mul(self.growth_factor.get())
            .ok_or(AllocateError::CapacityOverflow { capacity })?;

        debug!(
            item_type = type_name::<T>(),
            from = capacity,
            to = grown,
            "growing pool"
        );

        self.try_grow_to(grown)
    }

    /// Fallible counterpart of [`reserve()`][Self::reserve], used on the allocation path.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    fn try_grow_to(&mut self, count: usize) -> Result<(), AllocateError> {
        let capacity = self.capacity();

        // The last position belongs to the region's gravestone.
        if count == usize::MAX {
            return Err(AllocateError::CapacityOverflow { capacity });
        }

        self.region.try_reserve(count).map_err(|error| {
            debug!(
                item_type = type_name::<T>(),
                capacity,
                requested = count,
                %error,
                "cannot reserve pool slots"
            );

            AllocateError::CapacityOverflow { capacity }
        })?;

        // Handle table growth failing is tolerated: the insert will grow it on demand.
        _ = self
            .indices
            .try_reserve(count.saturating_sub(self.indices.len()));

        Ok(())
    }

    /// Removes the item with the given handle and returns it.
    ///
    /// Returns `None` if the handle does not refer to a live item of this pool.
    pub fn take(&mut self, handle: Handle) -> Option<T> {
        let index = self.indices.remove(&handle)?;

        let value = self
            .region
            .take(index)
            .expect("every live handle maps to an occupied slot");

        self.length = self
            .length
            .checked_sub(1)
            .expect("we just removed a live item so the count must be non-zero");

        Some(value)
    }

    /// Drops the item with the given handle.
    ///
    /// Does nothing if the handle does not refer to a live item of this pool, for example because
    /// it has already been freed.
    pub fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    /// Returns a reference to the item with the given handle, if it is still live.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.indices
            .get(&handle)
            .and_then(|index| self.region.get(*index))
    }

    /// Returns an exclusive reference to the item with the given handle, if it is still live.
    #[must_use]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = *self.indices.get(&handle)?;
        self.region.get_mut(index)
    }

    /// Whether the handle refers to a live item of this pool.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.indices.contains_key(&handle)
    }

    /// The index of the slot currently holding the item with the given handle.
    ///
    /// The index is only valid until the item is freed, after which it may be reused.
    #[must_use]
    pub fn index_of(&self, handle: Handle) -> Option<Index> {
        self.indices.get(&handle).copied()
    }

    /// Drops every item in the pool. The capacity is retained.
    ///
    /// Handles issued before this call never become valid again.
    pub fn clear(&mut self) {
        self.region.clear();
        self.indices.clear();
        self.length = 0;
    }

    /// Iterates over the items in ascending slot order.
    pub fn iter(&self) -> RawPoolIter<'_, T> {
        RawPoolIter {
            inner: self.region.iter(),
        }
    }

    /// Iterates over the items in ascending slot order, with exclusive access to them.
    pub fn iter_mut(&mut self) -> RawPoolIterMut<'_, T> {
        RawPoolIterMut {
            inner: self.region.iter_mut(),
        }
    }

    pub(crate) fn region(&self) -> &Region<T> {
        &self.region
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.region.integrity_check();

        assert_eq!(self.length, self.indices.len());
        assert_eq!(self.region.iter().count(), self.length);

        for index in self.indices.values() {
            assert!(
                self.region.get(*index).is_some(),
                "handle maps to unoccupied slot {index}"
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn set_next_handle(&mut self, next: u64) {
        self.handles = HandleCounter::starting_at(next);
    }
}

impl<T> Default for RawPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RawPool<T> {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                self.is_empty(),
                "dropped a non-empty pool of {} with a policy that says it must be empty when dropped",
                type_name::<T>()
            );
        }
    }
}

impl<'a, T> IntoIterator for &'a RawPool<T> {
    type Item = &'a T;
    type IntoIter = RawPoolIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut RawPool<T> {
    type Item = &'a mut T;
    type IntoIter = RawPoolIterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the items of a [`RawPool`], created by [`RawPool::iter()`].
#[derive(Debug)]
pub struct RawPoolIter<'a, T> {
    inner: region::Iter<'a, T>,
}

impl<'a, T> Iterator for RawPoolIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}

impl<T> FusedIterator for RawPoolIter<'_, T> {}

/// Iterator over the items of a [`RawPool`] with exclusive access to them, created by
/// [`RawPool::iter_mut()`].
#[derive(Debug)]
pub struct RawPoolIterMut<'a, T> {
    inner: region::IterMut<'a, T>,
}

impl<'a, T> Iterator for RawPoolIterMut<'a, T> {
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }
}

impl<T> FusedIterator for RawPoolIterMut<'_, T> {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    fn small_pool<T>(default_capacity: usize) -> RawPool<T> {
        RawPool::builder()
            .default_capacity(NonZero::new(default_capacity).unwrap())
            .build_raw()
    }

    #[test]
    fn smoke_test() {
        let mut pool = RawPool::<u32>::new();

        let a = pool.allocate(42);
        let b = pool.allocate(43);
        let c = pool.allocate(44);

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(a), Some(&42));
        assert_eq!(pool.get(b), Some(&43));
        assert_eq!(pool.get(c), Some(&44));

        pool.free(b);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b), None);
        assert!(!pool.contains(b));

        let d = pool.allocate(45);

        assert_eq!(pool.get(d), Some(&45));
        assert_ne!(d, b);

        pool.integrity_check();
    }

    #[test]
    fn first_allocation_reserves_default_capacity() {
        let mut pool = RawPool::<u32>::new();
        assert_eq!(pool.capacity(), 0);

        _ = pool.allocate(1);

        assert_eq!(pool.capacity(), 512);
    }

    #[test]
    fn with_capacity_skips_default_capacity() {
        let mut pool = RawPool::<u32>::with_capacity(3);
        assert_eq!(pool.capacity(), 3);

        _ = pool.allocate(1);

        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn full_pool_grows_by_growth_factor() {
        let mut pool = RawPool::<usize>::builder()
            .default_capacity(NonZero::new(2).unwrap())
            .growth_factor(NonZero::new(3).unwrap())
            .build_raw();

        let handles: Vec<_> = (0..7).map(|value| pool.allocate(value)).collect();

        // 2 -> 6 -> 18
        assert_eq!(pool.capacity(), 18);

        for (value, handle) in handles.iter().enumerate() {
            assert_eq!(pool.get(*handle), Some(&value));
        }

        pool.integrity_check();
    }

    #[test]
    fn growth_preserves_handles() {
        let mut pool = small_pool::<String>(1);

        let first = pool.allocate("first".to_string());
        let index_before = pool.index_of(first);

        for i in 0..100 {
            _ = pool.allocate(i.to_string());
        }

        assert_eq!(pool.get(first).map(String::as_str), Some("first"));
        assert_eq!(pool.index_of(first), index_before);
    }

    #[test]
    fn freed_slot_is_reused_but_handle_is_not() {
        let mut pool = small_pool::<u32>(4);

        let a = pool.allocate(1);
        let a_index = pool.index_of(a).unwrap();
        pool.free(a);

        let b = pool.allocate(2);

        assert_eq!(pool.index_of(b), Some(a_index));
        assert_ne!(a, b);
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&2));
    }

    #[test]
    fn handles_are_never_reused() {
        let mut pool = small_pool::<u32>(2);
        let mut seen = HashSet::new();

        for round in 0..50 {
            let handle = pool.allocate(round);
            assert!(seen.insert(handle));

            if round % 3 != 0 {
                pool.free(handle);
            }
        }
    }

    #[test]
    fn take_returns_value_once() {
        let mut pool = RawPool::<String>::new();

        let handle = pool.allocate("value".to_string());

        assert_eq!(pool.take(handle).as_deref(), Some("value"));
        assert_eq!(pool.take(handle), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn free_twice_is_noop() {
        let mut pool = RawPool::<u32>::new();

        let a = pool.allocate(1);
        let b = pool.allocate(2);

        pool.free(a);
        pool.free(a);

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(b), Some(&2));
        pool.integrity_check();
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut pool = RawPool::<u32>::new();

        let handle = pool.allocate(1);
        *pool.get_mut(handle).unwrap() = 10;

        assert_eq!(pool.get(handle), Some(&10));
    }

    #[test]
    fn allocate_default_and_with() {
        let mut pool = RawPool::<Vec<u8>>::new();

        let empty = pool.allocate_default();
        let filled = pool.allocate_with(|| vec![1, 2, 3]);

        assert_eq!(pool.get(empty), Some(&Vec::new()));
        assert_eq!(pool.get(filled), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn panicking_constructor_leaves_pool_intact() {
        let mut pool = RawPool::<u32>::new();
        let existing = pool.allocate(1);

        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.allocate_with(|| panic!("constructor failed"));
        }));

        assert!(result.is_err());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(existing), Some(&1));
        pool.integrity_check();

        // The handle that was peeked for the failed allocation is still available.
        let next = pool.allocate(2);
        assert_eq!(next.raw(), existing.raw() + 1);
    }

    #[test]
    fn exhausted_handles_are_reported() {
        let mut pool = RawPool::<u32>::new();
        pool.set_next_handle(u64::MAX - 1);

        let last = pool.try_allocate(1).unwrap();
        assert_eq!(last.raw(), u64::MAX - 1);

        let constructed = Cell::new(false);
        let result = pool.try_allocate_with(|| {
            constructed.set(true);
            2
        });

        assert_eq!(result, Err(AllocateError::HandlesExhausted));
        assert!(!constructed.get());
        assert_eq!(pool.len(), 1);

        // Freeing does not give any handles back.
        pool.free(last);
        assert_eq!(pool.try_allocate(3), Err(AllocateError::HandlesExhausted));
    }

    #[test]
    fn oversized_default_capacity_is_reported() {
        let mut pool = small_pool::<u64>(usize::MAX / 4);

        let constructed = Cell::new(false);
        let result = pool.try_allocate_with(|| {
            constructed.set(true);
            1
        });

        assert_eq!(
            result,
            Err(AllocateError::CapacityOverflow { capacity: 0 })
        );
        assert!(!constructed.get());
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn default_capacity_of_usize_max_is_reported() {
        let mut pool = small_pool::<u8>(usize::MAX);

        assert_eq!(
            pool.try_allocate(1),
            Err(AllocateError::CapacityOverflow { capacity: 0 })
        );
    }

    #[test]
    fn oversized_growth_is_reported() {
        let mut pool = RawPool::<u64>::builder()
            .default_capacity(NonZero::new(2).unwrap())
            .growth_factor(NonZero::new(usize::MAX / 8).unwrap())
            .build_raw();

        let first = pool.try_allocate(1).unwrap();
        let second = pool.try_allocate(2).unwrap();

        assert_eq!(
            pool.try_allocate(3),
            Err(AllocateError::CapacityOverflow { capacity: 2 })
        );

        // The pool is still usable after the failed growth.
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.get(first), Some(&1));
        assert_eq!(pool.get(second), Some(&2));

        pool.free(first);
        let third = pool.try_allocate(3).unwrap();
        assert_eq!(pool.get(third), Some(&3));
        pool.integrity_check();
    }

    #[test]
    fn growth_multiplication_overflow_is_reported() {
        let mut pool = RawPool::<u8>::builder()
            .default_capacity(NonZero::new(2).unwrap())
            .growth_factor(NonZero::new(usize::MAX).unwrap())
            .build_raw();

        _ = pool.allocate(1);
        _ = pool.allocate(2);

        assert_eq!(
            pool.try_allocate(3),
            Err(AllocateError::CapacityOverflow { capacity: 2 })
        );
    }

    #[test]
    #[should_panic]
    fn allocate_panics_on_capacity_overflow() {
        let mut pool = small_pool::<u64>(usize::MAX / 4);

        _ = pool.allocate(1);
    }

    #[test]
    #[should_panic]
    fn allocate_panics_when_handles_exhausted() {
        let mut pool = RawPool::<u32>::new();
        pool.set_next_handle(u64::MAX);

        _ = pool.allocate(1);
    }

    #[test]
    fn clear_drops_items_but_keeps_handles_dead() {
        let mut pool = RawPool::<u32>::new();

        let a = pool.allocate(1);
        _ = pool.allocate(2);
        let capacity = pool.capacity();

        pool.clear();

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), capacity);
        assert_eq!(pool.get(a), None);

        let b = pool.allocate(3);
        assert!(b > a);
        pool.integrity_check();
    }

    #[test]
    fn iter_yields_items_in_slot_order() {
        let mut pool = small_pool::<u32>(8);

        let handles: Vec<_> = (0..6).map(|value| pool.allocate(value)).collect();
        pool.free(handles[1]);
        pool.free(handles[4]);

        let values: Vec<_> = pool.iter().copied().collect();
        assert_eq!(values, [0, 2, 3, 5]);

        for value in &mut pool {
            *value *= 10;
        }

        let values: Vec<_> = (&pool).into_iter().copied().collect();
        assert_eq!(values, [0, 20, 30, 50]);
    }

    #[test]
    fn drop_drops_remaining_items() {
        let counter = Rc::new(());

        {
            let mut pool = RawPool::<Rc<()>>::new();
            _ = pool.allocate(Rc::clone(&counter));
            _ = pool.allocate(Rc::clone(&counter));

            assert_eq!(Rc::strong_count(&counter), 3);
        }

        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn must_not_drop_items_allows_empty_pool() {
        let mut pool = RawPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build_raw();

        let handle = pool.allocate(1);
        pool.free(handle);

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_with_items() {
        let mut pool = RawPool::<u32>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build_raw();

        _ = pool.allocate(1);

        drop(pool);
    }

    #[test]
    fn thread_mobility() {
        assert_impl_all!(RawPool<u32>: Send, Sync);
        assert_not_impl_any!(RawPool<Rc<u32>>: Send, Sync);
    }
}
