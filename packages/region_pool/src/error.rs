use thiserror::Error;

/// Reasons why a pool could not allocate a new item.
///
/// These are only reported by the fallible `try_allocate*` methods. The infallible variants
/// panic with the error message instead.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum AllocateError {
    /// The pool has issued every handle it can. Handles are never reused, so the pool cannot
    /// accept any more items, even if it has free slots.
    #[error("the pool has issued every available handle and handles are never reused")]
    HandlesExhausted,

    /// The pool needed more slots but could not get them, either because the new slot count
    /// overflows `usize` or because storage for that many slots could not be allocated.
    ///
    /// The pool is left unchanged and existing items remain accessible.
    #[error("cannot grow a pool with capacity {capacity}: the new slot count is not addressable or cannot be allocated")]
    CapacityOverflow {
        /// The capacity of the pool at the time of the failed growth.
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_describe_cause() {
        assert!(
            AllocateError::HandlesExhausted
                .to_string()
                .contains("every available handle")
        );
        assert!(
            AllocateError::CapacityOverflow { capacity: 42 }
                .to_string()
                .contains("capacity 42")
        );
    }
}
