use std::fmt;

/// Position of a slot in a [`Region`][crate::Region].
///
/// Indices are physical positions and are reused once the slot they refer to is freed. Retain a
/// [`Handle`][crate::Handle] instead if you need an identifier that is never reused.
///
/// [`Index::GRAVESTONE`] is the distinguished "no index" value. It is never a valid slot
/// position, which makes it suitable for packing optional indices into tables without the
/// overhead of `Option<Index>`. All region operations treat it (and any other index at or past
/// the capacity) as referring to no slot.
///
/// # Example
///
/// ```rust
/// use region_pool::{Index, Region};
///
/// let mut region = Region::<u32>::with_capacity(4);
///
/// region.emplace(Index::new(0), 10);
///
/// assert_eq!(region.get(Index::new(0)), Some(&10));
/// assert_eq!(region.get(Index::GRAVESTONE), None);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Index(usize);

impl Index {
    /// The "no index" sentinel. Never refers to a slot.
    pub const GRAVESTONE: Self = Self(usize::MAX);

    /// Creates an index referring to the slot at `position`.
    #[must_use]
    #[inline]
    pub const fn new(position: usize) -> Self {
        Self(position)
    }

    /// The slot position this index refers to.
    #[must_use]
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this is the [`GRAVESTONE`][Self::GRAVESTONE] sentinel.
    #[must_use]
    #[inline]
    pub const fn is_gravestone(self) -> bool {
        self.0 == usize::MAX
    }
}

impl From<usize> for Index {
    #[inline]
    fn from(position: usize) -> Self {
        Self(position)
    }
}

impl From<Index> for usize {
    #[inline]
    fn from(index: Index) -> Self {
        index.0
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_gravestone() {
            write!(f, "gravestone")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gravestone_is_max() {
        assert!(Index::GRAVESTONE.is_gravestone());
        assert_eq!(Index::GRAVESTONE.get(), usize::MAX);
        assert!(!Index::new(0).is_gravestone());
    }

    #[test]
    fn converts_both_ways() {
        let index = Index::from(17_usize);
        assert_eq!(index, Index::new(17));
        assert_eq!(usize::from(index), 17);
    }

    #[test]
    fn orders_by_position() {
        assert!(Index::new(1) < Index::new(2));
        assert!(Index::new(usize::MAX - 1) < Index::GRAVESTONE);
    }

    #[test]
    fn display() {
        assert_eq!(Index::new(42).to_string(), "42");
        assert_eq!(Index::GRAVESTONE.to_string(), "gravestone");
    }
}
