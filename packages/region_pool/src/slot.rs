/// One storage cell of a [`Region`][crate::Region].
///
/// Free slots form maximal runs that are annotated only at their two endpoints:
///
/// * The head of every run is `FirstFree` and knows the distance forward to the run's last slot.
/// * The last slot of a run longer than one slot is `Free` and knows the distance back to the
///   head. A run of length one is its own tail and has `to_tail == 0`.
///
/// Interior `Free` slots carry stale anchors that must never be read. The last slot of the
/// buffer is always the `Gravestone`, so scanning forward from any slot always terminates
/// without a separate bounds check.
#[derive(Debug)]
pub(crate) enum Slot<T> {
    Occupied(T),

    /// A non-head member of a free run.
    Free {
        /// Distance back to the run's head. Only meaningful on the run's tail.
        to_head: usize,
    },

    /// The head of a free run.
    FirstFree {
        /// Distance forward to the run's tail.
        to_tail: usize,
    },

    Gravestone,
}

impl<T> Slot<T> {
    /// A freshly reserved slot, not yet stitched into any run.
    pub(crate) const VACANT: Self = Self::Free { to_head: 0 };

    #[must_use]
    pub(crate) fn state(&self) -> SlotState {
        match self {
            Self::Occupied(_) => SlotState::InUse,
            Self::Free { .. } => SlotState::Free,
            Self::FirstFree { .. } => SlotState::FirstFree,
            Self::Gravestone => SlotState::Gravestone,
        }
    }
}

/// The bookkeeping state of a slot, as reported by
/// [`Region::slot_state()`][crate::Region::slot_state].
///
/// This is mostly useful for diagnostics and tests. Only [`InUse`][Self::InUse] slots hold a
/// value and only [`FirstFree`][Self::FirstFree] slots accept a new one.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SlotState {
    /// The slot holds a live value.
    InUse,

    /// The slot is free but is not the head of its free run.
    Free,

    /// The slot is the head of a run of free slots.
    FirstFree,

    /// The sentinel slot one past the last usable slot.
    Gravestone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_matches_variant() {
        assert_eq!(Slot::Occupied(5_u8).state(), SlotState::InUse);
        assert_eq!(Slot::<u8>::VACANT.state(), SlotState::Free);
        assert_eq!(
            Slot::<u8>::FirstFree { to_tail: 3 }.state(),
            SlotState::FirstFree
        );
        assert_eq!(Slot::<u8>::Gravestone.state(), SlotState::Gravestone);
    }
}
