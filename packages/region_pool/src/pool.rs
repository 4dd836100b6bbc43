use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::iter::FusedIterator;
use std::ptr;

use tracing::debug;

use crate::{AllocateError, Borrow, Handle, Index, PoolBuilder, RawPool};

/// A single-threaded object pool that hands out [`Borrow`]s to its items.
///
/// This is a [`RawPool`] behind interior mutability. Every method takes `&self`, so any number of
/// [`Borrow`]s can be alive while the pool allocates and frees items. A [`Borrow`] never caches
/// the location of its item - it asks the pool every time, and resolves to nothing once the
/// item has been freed.
///
/// # Panics
///
/// Items are accessed through [`Ref`] and [`RefMut`] guards. Holding a guard while calling a
/// method that mutates the pool ([`allocate()`][1], [`free()`][2], [`reserve()`][3] and the
/// like) panics, as growth could otherwise relocate the item out from under the guard. Holding
/// a [`RefMut`] while calling any other method of the pool also panics.
///
/// The same applies to the constructor passed to [`allocate_with()`][4], which must not call
/// back into the pool.
///
/// # Example
///
/// ```rust
/// use region_pool::Pool;
///
/// let pool = Pool::<String>::new();
///
/// let greeting = pool.allocate("Hello".to_string());
/// let subject = pool.allocate("world".to_string());
///
/// greeting.get_mut().unwrap().push_str(", ");
///
/// let text: String = pool.iter().map(|part| part.clone()).collect();
/// assert_eq!(text, "Hello, world");
///
/// subject.free();
///
/// assert!(subject.get().is_none());
/// assert_eq!(pool.len(), 1);
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::free
/// [3]: Self::reserve
/// [4]: Self::allocate_with
#[derive(Debug)]
pub struct Pool<T> {
    inner: RefCell<RawPool<T>>,
}

impl<T> Pool<T> {
    /// Creates a new pool with the default configuration.
    ///
    /// No memory is reserved until the first item is allocated.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new pool with the default configuration and room for `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is `usize::MAX`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().initial_capacity(capacity).build()
    }

    /// Starts building a new pool.
    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::new()
    }

    /// Unwraps the exclusive-access pool this pool is built on.
    ///
    /// All outstanding [`Borrow`]s must have ended before this can be called, which the borrow
    /// checker guarantees.
    #[must_use]
    pub fn into_raw(self) -> RawPool<T> {
        self.inner.into_inner()
    }

    /// The number of items in the pool.
    #[doc(alias = "size")]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Whether the pool has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// The number of items the pool can hold without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity()
    }

    /// Ensures the pool can hold at least `count` items without growing.
    ///
    /// # Panics
    ///
    /// Panics if `count` is `usize::MAX` or if a guard to any item is alive.
    pub fn reserve(&self, count: usize) {
        self.inner.borrow_mut().reserve(count);
    }

    /// Allocates `value` in the pool and returns a [`Borrow`] to it.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items (see [`AllocateError`]) or if a guard to any
    /// item is alive.
    pub fn allocate(&self, value: T) -> Borrow<'_, T> {
        self.allocate_with(|| value)
    }

    /// Allocates the value returned by `f` in the pool and returns a [`Borrow`] to it.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items (see [`AllocateError`]), if a guard to any
    /// item is alive or if `f` accesses this pool.
    pub fn allocate_with<F>(&self, f: F) -> Borrow<'_, T>
    where
        F: FnOnce() -> T,
    {
        let handle = self.inner.borrow_mut().allocate_with(f);
        Borrow::new(self, handle)
    }

    /// Allocates a default-constructed value in the pool and returns a [`Borrow`] to it.
    ///
    /// # Panics
    ///
    /// Panics if the pool can accept no more items (see [`AllocateError`]) or if a guard to any
    /// item is alive.
    pub fn allocate_default(&self) -> Borrow<'_, T>
    where
        T: Default,
    {
        self.allocate_with(T::default)
    }

    /// Allocates `value` in the pool and returns a [`Borrow`] to it, or an error if the pool can
    /// accept no more items.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item is alive.
    pub fn try_allocate(&self, value: T) -> Result<Borrow<'_, T>, AllocateError> {
        let handle = self.inner.borrow_mut().try_allocate(value)?;
        Ok(Borrow::new(self, handle))
    }

    /// Drops the item that `borrow` refers to.
    ///
    /// Does nothing if the item has already been freed or if `borrow` was issued by a different
    /// pool.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item is alive.
    pub fn free(&self, borrow: Borrow<'_, T>) {
        drop(self.take(borrow));
    }

    /// Removes the item that `borrow` refers to and returns it.
    ///
    /// Returns `None` if the item has already been freed or if `borrow` was issued by a
    /// different pool.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item is alive.
    pub fn take(&self, borrow: Borrow<'_, T>) -> Option<T> {
        if !self.owns(borrow) {
            debug!(
                item_type = type_name::<T>(),
                "ignoring borrow issued by a different pool"
            );
            return None;
        }

        self.inner.borrow_mut().take(borrow.handle())
    }

    /// Returns a shared guard for the item that `borrow` refers to, if it is still live.
    ///
    /// Returns `None` if `borrow` was issued by a different pool.
    ///
    /// # Panics
    ///
    /// Panics if an exclusive guard to any item is alive.
    #[must_use]
    pub fn get(&self, borrow: Borrow<'_, T>) -> Option<Ref<'_, T>> {
        if !self.owns(borrow) {
            return None;
        }

        self.get_by_handle(borrow.handle())
    }

    /// Returns an exclusive guard for the item that `borrow` refers to, if it is still live.
    ///
    /// Returns `None` if `borrow` was issued by a different pool.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item is alive.
    #[must_use]
    pub fn get_mut(&self, borrow: Borrow<'_, T>) -> Option<RefMut<'_, T>> {
        if !self.owns(borrow) {
            return None;
        }

        self.get_mut_by_handle(borrow.handle())
    }

    /// Creates a [`Borrow`] for a handle previously obtained from [`Borrow::handle()`].
    ///
    /// This is how a handle that was stored outside the lifetime of the pool reference gets
    /// turned back into something that can access the item. If the handle was not issued by
    /// this pool or its item has been freed, the returned [`Borrow`] resolves to nothing.
    #[must_use]
    pub fn borrow(&self, handle: Handle) -> Borrow<'_, T> {
        Borrow::new(self, handle)
    }

    /// Drops every item in the pool. The capacity is retained.
    ///
    /// Existing [`Borrow`]s resolve to nothing afterwards.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item is alive.
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    /// Iterates over the items in ascending slot order.
    ///
    /// The iterator holds a shared guard on the pool, so the pool cannot be mutated until the
    /// iterator and every guard it produced are dropped.
    ///
    /// # Panics
    ///
    /// Panics if an exclusive guard to any item is alive.
    pub fn iter(&self) -> PoolIter<'_, T> {
        PoolIter {
            pool: self.inner.borrow(),
            position: 0,
        }
    }

    pub(crate) fn get_by_handle(&self, handle: Handle) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.inner.borrow(), |raw| raw.get(handle)).ok()
    }

    pub(crate) fn get_mut_by_handle(&self, handle: Handle) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.inner.borrow_mut(), |raw| raw.get_mut(handle)).ok()
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.inner.borrow().contains(handle)
    }

    pub(crate) fn index_of(&self, handle: Handle) -> Option<Index> {
        self.inner.borrow().index_of(handle)
    }

    fn owns(&self, borrow: Borrow<'_, T>) -> bool {
        ptr::eq(borrow.pool(), self)
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<RawPool<T>> for Pool<T> {
    fn from(raw: RawPool<T>) -> Self {
        Self {
            inner: RefCell::new(raw),
        }
    }
}

impl<'a, T> IntoIterator for &'a Pool<T> {
    type Item = Ref<'a, T>;
    type IntoIter = PoolIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the items of a [`Pool`], created by [`Pool::iter()`].
#[derive(Debug)]
pub struct PoolIter<'a, T> {
    pool: Ref<'a, RawPool<T>>,

    /// Slot position from which to search for the next item.
    position: usize,
}

impl<'a, T> Iterator for PoolIter<'a, T> {
    type Item = Ref<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        let (position, _) = self.pool.region().next_occupied(self.position)?;

        self.position = position
            .checked_add(1)
            .expect("an occupied slot is always followed by at least the gravestone");

        Some(Ref::map(Ref::clone(&self.pool), |raw| {
            raw.region()
                .get(Index::new(position))
                .expect("we just found this slot to be occupied")
        }))
    }
}

impl<T> FusedIterator for PoolIter<'_, T> {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::num::NonZero;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn smoke_test() {
        let pool = Pool::<i32>::new();

        let borrows: Vec<_> = (66..=69).map(|value| pool.allocate(value)).collect();

        let values: Vec<i32> = borrows.iter().map(|b| b.cloned().unwrap()).collect();
        assert_eq!(values, [66, 67, 68, 69]);

        pool.free(borrows[1]);

        let values: Vec<i32> = pool.iter().map(|v| *v).collect();
        assert_eq!(values, [66, 68, 69]);
        assert_eq!(pool.len(), 3);
        assert!(borrows[1].get().is_none());
    }

    #[test]
    fn free_twice_is_noop() {
        let pool = Pool::<i32>::new();

        let a = pool.allocate(1);
        let b = pool.allocate(2);

        pool.free(a);
        pool.free(a);

        assert_eq!(pool.len(), 1);
        assert_eq!(b.cloned(), Some(2));
    }

    #[test]
    fn foreign_borrow_is_ignored() {
        let pool = Pool::<i32>::new();
        let other = Pool::<i32>::new();

        let ours = pool.allocate(1);
        let theirs = other.allocate(2);

        // Both are the first handle of their pool, so only the pool identity tells them apart.
        assert_eq!(ours.handle(), theirs.handle());

        assert!(pool.get(theirs).is_none());
        assert!(pool.get_mut(theirs).is_none());
        assert_eq!(pool.take(theirs), None);
        pool.free(theirs);

        assert_eq!(pool.len(), 1);
        assert_eq!(other.len(), 1);
        assert_eq!(theirs.cloned(), Some(2));
    }

    #[test]
    fn take_returns_value() {
        let pool = Pool::<String>::new();

        let borrow = pool.allocate("value".to_string());

        assert_eq!(pool.take(borrow).as_deref(), Some("value"));
        assert_eq!(pool.take(borrow), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn borrow_resolves_after_growth() {
        let pool = Pool::<usize>::builder()
            .default_capacity(NonZero::new(1).unwrap())
            .build();

        let first = pool.allocate(0);

        for value in 1..100 {
            _ = pool.allocate(value);
        }

        assert!(pool.capacity() >= 100);
        assert_eq!(first.cloned(), Some(0));
    }

    #[test]
    fn rebinding_a_stored_handle() {
        let pool = Pool::<i32>::new();

        let handle = pool.allocate(5).handle();

        assert_eq!(pool.borrow(handle).cloned(), Some(5));

        pool.borrow(handle).free();

        assert!(pool.borrow(handle).get().is_none());
    }

    #[test]
    fn allocate_with_and_default() {
        let pool = Pool::<Vec<u8>>::new();

        let empty = pool.allocate_default();
        let filled = pool.allocate_with(|| vec![1, 2]);

        assert_eq!(empty.cloned(), Some(Vec::new()));
        assert_eq!(filled.cloned(), Some(vec![1, 2]));
    }

    #[test]
    fn try_allocate_succeeds() {
        let pool = Pool::<i32>::new();

        let borrow = pool.try_allocate(3).unwrap();

        assert_eq!(borrow.cloned(), Some(3));
    }

    #[test]
    fn clear_invalidates_borrows() {
        let pool = Pool::<i32>::with_capacity(4);

        let a = pool.allocate(1);
        let b = pool.allocate(2);

        pool.clear();

        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 4);
        assert!(a.get().is_none());
        assert!(b.get().is_none());
    }

    #[test]
    #[should_panic]
    fn allocate_while_holding_guard_panics() {
        let pool = Pool::<i32>::new();

        let borrow = pool.allocate(1);
        let _guard = borrow.get();

        _ = pool.allocate(2);
    }

    #[test]
    #[should_panic]
    fn allocate_while_iterating_panics() {
        let pool = Pool::<i32>::new();
        _ = pool.allocate(1);

        for _value in &pool {
            _ = pool.allocate(2);
        }
    }

    #[test]
    fn iter_guards_outlive_iterator() {
        let pool = Pool::<i32>::new();
        _ = pool.allocate(1);
        _ = pool.allocate(2);

        let guards: Vec<_> = pool.iter().collect();

        assert_eq!(*guards[0], 1);
        assert_eq!(*guards[1], 2);
    }

    #[test]
    fn into_raw_keeps_items() {
        let pool = Pool::<i32>::new();
        let handle = pool.allocate(7).handle();

        let raw = pool.into_raw();

        assert_eq!(raw.get(handle), Some(&7));
    }

    #[test]
    fn drops_items_once() {
        let drops = Rc::new(Cell::new(0));

        {
            let pool = Pool::<Tracked>::new();

            let a = pool.allocate(Tracked(Rc::clone(&drops)));
            _ = pool.allocate(Tracked(Rc::clone(&drops)));

            pool.free(a);
            assert_eq!(drops.get(), 1);

            pool.free(a);
            assert_eq!(drops.get(), 1);
        }

        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn thread_mobility() {
        assert_impl_all!(Pool<u32>: Send);
        assert_not_impl_any!(Pool<u32>: Sync);
        assert_not_impl_any!(Pool<Rc<u32>>: Send, Sync);
    }
}
