use std::any::type_name;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;

use crate::{Handle, Index, Pool};

/// A weak reference to an item in a [`Pool`].
///
/// A borrow is a copyable pair of a pool reference and a [`Handle`]. It does not keep the item
/// alive and does not prevent the pool from relocating its storage. Every access asks the pool
/// for the item anew, so once the item is freed, every copy of the borrow resolves to `None`.
///
/// # Example
///
/// ```rust
/// use region_pool::Pool;
///
/// let pool = Pool::<u32>::new();
///
/// let borrow = pool.allocate(10);
/// let copy = borrow;
///
/// *borrow.get_mut().unwrap() += 1;
/// assert_eq!(copy.cloned(), Some(11));
///
/// borrow.free();
///
/// assert!(!copy.is_live());
/// assert!(copy.get().is_none());
/// ```
pub struct Borrow<'p, T> {
    pool: &'p Pool<T>,
    handle: Handle,
}

impl<'p, T> Borrow<'p, T> {
    pub(crate) fn new(pool: &'p Pool<T>, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Returns a shared guard for the item, if it is still live.
    ///
    /// # Panics
    ///
    /// Panics if an exclusive guard to any item in the same pool is alive.
    #[must_use]
    pub fn get(self) -> Option<Ref<'p, T>> {
        self.pool.get_by_handle(self.handle)
    }

    /// Returns an exclusive guard for the item, if it is still live.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item in the same pool is alive.
    #[must_use]
    pub fn get_mut(self) -> Option<RefMut<'p, T>> {
        self.pool.get_mut_by_handle(self.handle)
    }

    /// Returns a clone of the item, if it is still live.
    ///
    /// Unlike [`get()`][Self::get], this does not leave a guard behind.
    #[must_use]
    pub fn cloned(self) -> Option<T>
    where
        T: Clone,
    {
        self.get().map(|value| T::clone(&value))
    }

    /// The handle of the item. This can be stored independently of the pool reference and turned
    /// back into a borrow via [`Pool::borrow()`].
    #[must_use]
    pub fn handle(self) -> Handle {
        self.handle
    }

    /// The slot the item currently occupies, if it is still live.
    #[must_use]
    pub fn index(self) -> Option<Index> {
        self.pool.index_of(self.handle)
    }

    /// Whether the item has not been freed yet.
    #[must_use]
    pub fn is_live(self) -> bool {
        self.pool.contains(self.handle)
    }

    /// The pool the item was allocated from.
    #[must_use]
    pub fn pool(self) -> &'p Pool<T> {
        self.pool
    }

    /// Drops the item. Does nothing if it has already been freed.
    ///
    /// # Panics
    ///
    /// Panics if a guard to any item in the same pool is alive.
    pub fn free(self) {
        self.pool.free(self);
    }
}

impl<T> Clone for Borrow<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Borrow<'_, T> {}

impl<T> PartialEq for Borrow<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.pool, other.pool) && self.handle == other.handle
    }
}

impl<T> Eq for Borrow<'_, T> {}

impl<T> Hash for Borrow<'_, T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl<T> fmt::Debug for Borrow<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("pool", &ptr::from_ref(self.pool))
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    #[test]
    fn copies_resolve_to_same_item() {
        let pool = Pool::<u32>::new();

        let borrow = pool.allocate(1);
        let copy = borrow;

        *copy.get_mut().unwrap() = 2;

        assert_eq!(*borrow.get().unwrap(), 2);
        assert_eq!(borrow, copy);
    }

    #[test]
    fn resolves_to_none_after_free() {
        let pool = Pool::<u32>::new();

        let borrow = pool.allocate(1);
        let index = borrow.index();
        assert!(index.is_some());

        borrow.free();

        assert!(!borrow.is_live());
        assert!(borrow.get().is_none());
        assert!(borrow.get_mut().is_none());
        assert_eq!(borrow.cloned(), None);
        assert_eq!(borrow.index(), None);

        // Freeing again is harmless.
        borrow.free();
    }

    #[test]
    fn stale_borrow_does_not_see_slot_reuse() {
        let pool = Pool::<u32>::new();

        let old = pool.allocate(1);
        let old_index = old.index();
        old.free();

        let new = pool.allocate(2);

        assert_eq!(new.index(), old_index);
        assert!(old.get().is_none());
        assert_ne!(old, new);
    }

    #[test]
    fn equality_considers_pool_identity() {
        let a = Pool::<u32>::new();
        let b = Pool::<u32>::new();

        let from_a = a.allocate(1);
        let from_b = b.allocate(1);

        assert_eq!(from_a.handle(), from_b.handle());
        assert_ne!(from_a, from_b);
        assert_eq!(from_a, a.borrow(from_a.handle()));
    }

    #[test]
    fn hashes_by_handle() {
        let pool = Pool::<u32>::new();

        let first = pool.allocate(1);
        let second = pool.allocate(2);

        let set: HashSet<_> = [first, second, first].into_iter().collect();

        assert_eq!(set.len(), 2);
        assert!(set.contains(&second));
    }

    #[test]
    fn pool_accessor_returns_owner() {
        let pool = Pool::<u32>::new();

        let borrow = pool.allocate(1);

        assert!(ptr::eq(borrow.pool(), &pool));
    }

    #[test]
    fn debug_mentions_handle() {
        let pool = Pool::<u32>::new();

        let borrow = pool.allocate(1);

        assert!(format!("{borrow:?}").contains("handle"));
    }

    #[test]
    fn thread_mobility() {
        assert_impl_all!(Borrow<'static, u32>: Copy);
        assert_not_impl_any!(Borrow<'static, u32>: Send, Sync);
    }
}
