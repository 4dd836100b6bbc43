use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DropPolicy, Pool, RawPool};

/// Number of slots reserved the first time an item is allocated from a pool that was created
/// without any capacity.
pub(crate) const DEFAULT_CAPACITY: NonZero<usize> = match NonZero::new(512) {
    Some(value) => value,
    None => panic!("default capacity must be non-zero"),
};

/// Multiplier applied to the capacity whenever a full pool needs to grow.
pub(crate) const DEFAULT_GROWTH_FACTOR: NonZero<usize> = match NonZero::new(2) {
    Some(value) => value,
    None => panic!("default growth factor must be non-zero"),
};

/// Builder for creating an instance of [`Pool`] or [`RawPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`Pool::new()`][1] and [`RawPool::new()`][2] is sufficient
/// for most use cases.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use region_pool::{DropPolicy, Pool};
///
/// let pool = Pool::<u32>::builder()
///     .default_capacity(NonZero::new(64).unwrap())
///     .growth_factor(NonZero::new(4).unwrap())
///     .drop_policy(DropPolicy::MayDropItems)
///     .build();
///
/// assert_eq!(pool.capacity(), 0);
///
/// _ = pool.allocate(1);
/// assert_eq!(pool.capacity(), 64);
/// ```
///
/// [1]: Pool::new
/// [2]: RawPool::new
#[must_use]
pub struct PoolBuilder<T> {
    default_capacity: NonZero<usize>,
    growth_factor: NonZero<usize>,
    initial_capacity: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for PoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("default_capacity", &self.default_capacity)
            .field("growth_factor", &self.growth_factor)
            .field("initial_capacity", &self.initial_capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> PoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            initial_capacity: 0,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets how many slots the pool reserves when the first item is allocated, if no capacity
    /// was reserved before that. Defaults to 512.
    pub fn default_capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.default_capacity = capacity;
        self
    }

    /// Sets the multiplier applied to the capacity whenever the pool is full and needs to grow.
    /// Defaults to 2.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is less than 2, as the pool would then be unable to grow.
    pub fn growth_factor(mut self, factor: NonZero<usize>) -> Self {
        assert!(
            factor.get() >= 2,
            "growth factor of pool of {} must be at least 2 but was {factor}",
            type_name::<T>()
        );

        self.growth_factor = factor;
        self
    }

    /// Sets how many slots to reserve immediately when building the pool. Defaults to 0, in
    /// which case nothing is reserved until the first item is allocated.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining items in the pool when the pool is dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds a [`Pool`] with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity is `usize::MAX`.
    #[must_use]
    pub fn build(self) -> Pool<T> {
        Pool::from(self.build_raw())
    }

    /// Builds a [`RawPool`] with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the initial capacity is `usize::MAX`.
    #[must_use]
    pub fn build_raw(self) -> RawPool<T> {
        let mut pool = RawPool::new_inner(
            self.default_capacity,
            self.growth_factor,
            self.drop_policy,
        );

        pool.reserve(self.initial_capacity);
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let pool = PoolBuilder::<u32>::new().build_raw();

        assert_eq!(pool.capacity(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn initial_capacity_is_reserved_eagerly() {
        let pool = PoolBuilder::<u32>::new().initial_capacity(10).build_raw();

        assert_eq!(pool.capacity(), 10);
    }

    #[test]
    #[should_panic]
    fn growth_factor_of_one_panics() {
        _ = PoolBuilder::<u32>::new().growth_factor(NonZero::new(1).unwrap());
    }

    #[test]
    fn debug_names_item_type() {
        let builder = PoolBuilder::<String>::new();

        let debug = format!("{builder:?}");

        assert!(debug.contains("String"));
        assert!(debug.contains("default_capacity"));
    }
}
