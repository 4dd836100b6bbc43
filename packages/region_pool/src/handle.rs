/// Opaque identifier of an item allocated from a [`RawPool`][crate::RawPool] or
/// [`Pool`][crate::Pool].
///
/// Handles are issued in increasing order and are never reused by the pool that issued them,
/// even after the item is freed. This makes them safe to retain as weak references: a handle to
/// a freed item simply resolves to nothing.
///
/// Handles carry no information that callers can decode. The only way to obtain one is to
/// allocate an item. A handle is only meaningful to the pool that issued it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Handle(u64);

impl Handle {
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[cfg(test)]
    pub(crate) const fn raw(self) -> u64 {
        self.0
    }
}

/// Source of never-repeating handles.
///
/// Once the counter reaches the end of its range it stops issuing handles instead of wrapping
/// around, which would violate the no-reuse guarantee.
#[derive(Debug, Default)]
pub(crate) struct HandleCounter {
    next: u64,
}

impl HandleCounter {
    /// The handle that the next call to [`advance()`][Self::advance] will commit to, if any.
    #[must_use]
    pub(crate) fn peek(&self) -> Option<Handle> {
        // The last value of the range is never issued, so that we always have a
        // successor value to store in `next`.
        self.next.checked_add(1).map(|_| Handle::from_raw(self.next))
    }

    /// Marks the handle returned by [`peek()`][Self::peek] as issued.
    ///
    /// # Panics
    ///
    /// Panics if the counter is exhausted. Callers are expected to `peek()` first.
    pub(crate) fn advance(&mut self) {
        self.next = self
            .next
            .checked_add(1)
            .expect("caller peeked a handle first, so the counter cannot be exhausted");
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u64) -> Self {
        Self { next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_increasing_handles() {
        let mut counter = HandleCounter::default();

        let first = counter.peek().unwrap();
        counter.advance();
        let second = counter.peek().unwrap();
        counter.advance();

        assert!(first < second);
        assert_eq!(first.raw(), 0);
        assert_eq!(second.raw(), 1);
    }

    #[test]
    fn peek_without_advance_is_stable() {
        let counter = HandleCounter::default();

        assert_eq!(counter.peek(), counter.peek());
    }

    #[test]
    fn exhausted_counter_issues_nothing() {
        let mut counter = HandleCounter::starting_at(u64::MAX - 1);

        assert_eq!(counter.peek(), Some(Handle::from_raw(u64::MAX - 1)));
        counter.advance();

        assert_eq!(counter.peek(), None);
    }
}
