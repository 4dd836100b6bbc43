use std::any::type_name;
use std::collections::TryReserveError;
use std::iter::FusedIterator;
use std::mem;

use tracing::trace;

use crate::{Index, Slot, SlotState};

/// A growable, contiguous arena of slots for values of a single type, addressed by [`Index`].
///
/// The region tracks which slots are free without any auxiliary free list or bitmap. Free slots
/// form maximal runs, and each run records its length only at its two endpoints, inside the free
/// slots themselves. This keeps the following operations O(1):
///
/// * [`emplace()`][1] - allocating at the head of a free run shrinks the run from the front.
/// * [`take()`][2] / [`free()`][3] - freeing a slot merges it with the neighboring runs.
/// * advancing an [`Iter`] - a free run of any length is skipped in a single jump.
///
/// Values can only be placed at the head of a free run. Use [`first_free()`][4] to find one.
///
/// # Moving storage
///
/// [`reserve()`][5] may relocate the entire buffer. References into the region cannot outlive
/// the next mutation, so only [`Index`] values may be retained across calls.
///
/// # Example
///
/// ```rust
/// use region_pool::{Index, Region};
///
/// let mut region = Region::<u32>::with_capacity(10);
///
/// for i in 0..6 {
///     region.emplace(Index::new(i), i as u32);
/// }
///
/// region.free(Index::new(2));
/// region.free(Index::new(3));
///
/// let live: Vec<_> = region.iter().map(|(_, value)| *value).collect();
/// assert_eq!(live, [0, 1, 4, 5]);
///
/// // The lowest free run now starts where the first freed value used to be.
/// assert_eq!(region.first_free(), Some(Index::new(2)));
/// ```
///
/// [1]: Self::emplace
/// [2]: Self::take
/// [3]: Self::free
/// [4]: Self::first_free
/// [5]: Self::reserve
#[derive(Debug)]
pub struct Region<T> {
    /// `capacity + 1` slots, the last of which is the gravestone. Empty until the first
    /// reservation, which is what distinguishes a region that is not alive.
    slots: Vec<Slot<T>>,

    /// Every slot below this position is occupied. This lets us find the first free run without
    /// rescanning the occupied prefix every time. It is a lower bound, not the ground truth -
    /// there may be more occupied slots at and after this position.
    free_hint: usize,
}

impl<T> Region<T> {
    /// Creates a region without any storage. Nothing can be emplaced until the region is
    /// [reserved][Self::reserve].
    ///
    /// # Example
    ///
    /// ```rust
    /// use region_pool::Region;
    ///
    /// let region = Region::<String>::new();
    ///
    /// assert_eq!(region.capacity(), 0);
    /// assert!(!region.alive());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_hint: 0,
        }
    }

    /// Creates a region with storage for `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is `usize::MAX`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut region = Self::new();
        region.reserve(capacity);
        region
    }

    /// The number of usable slots, occupied or not.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    /// Whether any storage has been reserved yet.
    #[must_use]
    #[inline]
    pub fn alive(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Grows the region to hold `count` values. Does nothing if the capacity is already at least
    /// `count`.
    ///
    /// Existing values keep their indices. The new slots join the free run at the end of the
    /// region if there is one, otherwise they form a new free run.
    ///
    /// # Panics
    ///
    /// Panics if `count` is `usize::MAX`, as that position is reserved for
    /// [`Index::GRAVESTONE`]. Also panics if the storage cannot be allocated. Use
    /// [`try_reserve()`][Self::try_reserve] to handle that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use region_pool::{Index, Region};
    ///
    /// let mut region = Region::<u64>::with_capacity(1);
    /// region.emplace(Index::new(0), 42);
    ///
    /// region.reserve(64);
    ///
    /// assert_eq!(region.capacity(), 64);
    /// assert_eq!(region.get(Index::new(0)), Some(&42));
    /// assert_eq!(region.first_free(), Some(Index::new(1)));
    /// ```
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn reserve(&mut self, count: usize) {
        if let Err(error) = self.try_reserve(count) {
            panic!(
                "cannot reserve {count} slots in region of {}: {error}",
                type_name::<T>()
            );
        }
    }

    /// Grows the region to hold `count` values, reporting an error instead of panicking if the
    /// storage for that many slots cannot be allocated.
    ///
    /// On error, the region is left unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `count` is `usize::MAX`, as that position is reserved for
    /// [`Index::GRAVESTONE`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use region_pool::Region;
    ///
    /// let mut region = Region::<u64>::new();
    ///
    /// assert!(region.try_reserve(usize::MAX / 4).is_err());
    /// assert!(!region.alive());
    ///
    /// assert!(region.try_reserve(8).is_ok());
    /// assert_eq!(region.capacity(), 8);
    /// ```
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn try_reserve(&mut self, count: usize) -> Result<(), TryReserveError> {
        let old_capacity = self.capacity();

        if count <= old_capacity {
            return Ok(());
        }

        assert!(
            count < usize::MAX,
            "cannot reserve {count} slots in region of {} because the last position belongs to the gravestone",
            type_name::<T>()
        );

        let new_len = count
            .checked_add(1)
            .expect("guarded by count < usize::MAX above");
        let additional = new_len
            .checked_sub(self.slots.len())
            .expect("we are growing, so the new length exceeds the old one");

        // Everything after this point works within the reserved memory and cannot fail.
        self.slots.try_reserve_exact(additional)?;

        trace!(
            item_type = type_name::<T>(),
            from = old_capacity,
            to = count,
            "reserving region slots"
        );

        // If the region ends with a free run, that run absorbs the new slots.
        let trailing_run_head = old_capacity
            .checked_sub(1)
            .and_then(|last| self.head_of_run_ending_at(last));

        if let Some(gravestone) = self.slots.pop() {
            debug_assert!(
                matches!(gravestone, Slot::Gravestone),
                "last slot of region of {} was not the gravestone",
                type_name::<T>()
            );
        }

        self.slots.resize_with(count, || Slot::VACANT);
        self.slots.push(Slot::Gravestone);

        let tail = count
            .checked_sub(1)
            .expect("count exceeds the old capacity, so it is non-zero");
        self.mark_run(trailing_run_head.unwrap_or(old_capacity), tail);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Places `value` at `index`, returning a reference to it.
    ///
    /// Returns `None` (and drops `value`) if `index` is not the head of a free run. That
    /// includes occupied slots, interior slots of a free run and any index at or beyond the
    /// capacity.
    ///
    /// # Example
    ///
    /// ```rust
    /// use region_pool::{Index, Region};
    ///
    /// let mut region = Region::<u32>::with_capacity(1);
    ///
    /// assert_eq!(region.emplace(Index::new(0), 5), Some(&mut 5));
    ///
    /// // The slot is taken now.
    /// assert_eq!(region.emplace(Index::new(0), 6), None);
    /// ```
    pub fn emplace(&mut self, index: Index, value: T) -> Option<&mut T> {
        self.emplace_with(index, || value)
    }

    /// Places the value returned by `f` at `index`, returning a reference to it.
    ///
    /// `f` is only called if `index` is the head of a free run, otherwise this returns `None`.
    /// If `f` panics, the region is left unchanged.
    pub fn emplace_with<F>(&mut self, index: Index, f: F) -> Option<&mut T>
    where
        F: FnOnce() -> T,
    {
        let position = index.get();

        let Some(&Slot::FirstFree { to_tail }) = self.slots.get(position) else {
            return None;
        };

        let value = f();

        if to_tail > 0 {
            // The run shrinks from the front, so the next slot becomes its head.
            let new_head = position
                .checked_add(1)
                .expect("a free run never extends past the gravestone");
            let tail = position
                .checked_add(to_tail)
                .expect("a free run never extends past the gravestone");
            self.mark_run(new_head, tail);
        }

        if self.free_hint == position {
            self.free_hint = position
                .checked_add(1)
                .expect("the slot was free, so it is below the gravestone");
        }

        let slot = self.slot_mut(position);
        *slot = Slot::Occupied(value);

        match slot {
            Slot::Occupied(value) => Some(value),
            _ => panic!(
                "slot {position} was not occupied after we emplaced into it in region of {}",
                type_name::<T>()
            ),
        }
    }

    /// Removes the value at `index` and returns it, merging the freed slot with any neighboring
    /// free runs.
    ///
    /// Returns `None` and does nothing if the slot at `index` is not occupied.
    ///
    /// # Example
    ///
    /// ```rust
    /// use region_pool::{Index, Region};
    ///
    /// let mut region = Region::<String>::with_capacity(4);
    /// region.emplace(Index::new(0), "hello".to_string());
    ///
    /// assert_eq!(region.take(Index::new(0)).as_deref(), Some("hello"));
    /// assert_eq!(region.take(Index::new(0)), None);
    /// ```
    pub fn take(&mut self, index: Index) -> Option<T> {
        let position = index.get();

        if !matches!(self.slots.get(position), Some(Slot::Occupied(_))) {
            return None;
        }

        // A free slot on the left is necessarily the tail of its run.
        let head = position
            .checked_sub(1)
            .and_then(|left| self.head_of_run_ending_at(left))
            .unwrap_or(position);

        let right = position
            .checked_add(1)
            .expect("an occupied slot is always followed by at least the gravestone");

        let right_run_length = match self.slot(right) {
            Slot::FirstFree { to_tail } => Some(*to_tail),
            Slot::Occupied(_) | Slot::Gravestone => None,
            Slot::Free { .. } => panic!(
                "slot {right} follows occupied slot {position} but is not the head of its free run in region of {}",
                type_name::<T>()
            ),
        };

        let tail = match right_run_length {
            Some(to_tail) => {
                // The right-hand run is absorbed, so its head becomes an interior slot.
                *self.slot_mut(right) = Slot::VACANT;

                right
                    .checked_add(to_tail)
                    .expect("a free run never extends past the gravestone")
            }
            None => position,
        };

        let previous = mem::replace(self.slot_mut(position), Slot::VACANT);
        self.mark_run(head, tail);
        self.free_hint = self.free_hint.min(head);

        match previous {
            Slot::Occupied(value) => Some(value),
            _ => panic!(
                "slot {position} was occupied when we started freeing it but is no longer in region of {}",
                type_name::<T>()
            ),
        }
    }

    /// Drops the value at `index`. Does nothing if the slot at `index` is not occupied.
    pub fn free(&mut self, index: Index) {
        drop(self.take(index));
    }

    /// Returns a reference to the value at `index`, if that slot is occupied.
    #[must_use]
    pub fn get(&self, index: Index) -> Option<&T> {
        match self.slots.get(index.get()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns an exclusive reference to the value at `index`, if that slot is occupied.
    #[must_use]
    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        match self.slots.get_mut(index.get()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// The bookkeeping state of the slot at `index`.
    ///
    /// Returns `None` for positions beyond the gravestone, which sits at `capacity()`.
    #[must_use]
    pub fn slot_state(&self, index: Index) -> Option<SlotState> {
        self.slots.get(index.get()).map(Slot::state)
    }

    /// Finds the lowest index at which a value can be emplaced, if the region has any free slot.
    ///
    /// The search starts from a remembered position below which every slot is occupied, and
    /// moves that position forward as it goes. Freeing a slot only ever moves it back to the
    /// freed run. As long as values are mostly allocated rather than freed, this is amortized
    /// O(1).
    ///
    /// The worst case is O(capacity). After the only free run below the remembered position is
    /// consumed by a one-slot allocation, the next call scans every occupied slot up to the next
    /// free run. A workload that keeps freeing a low slot and a high slot alternately pays that
    /// scan on every other allocation.
    ///
    /// It takes `&mut self` because it remembers how far it had to look.
    #[must_use]
    pub fn first_free(&mut self) -> Option<Index> {
        let mut position = self.free_hint;

        loop {
            match self.slots.get(position) {
                Some(Slot::Occupied(_)) => {
                    position = position
                        .checked_add(1)
                        .expect("an occupied slot is always followed by at least the gravestone");
                }
                Some(Slot::FirstFree { .. }) => {
                    self.free_hint = position;
                    return Some(Index::new(position));
                }
                Some(Slot::Gravestone) | None => {
                    self.free_hint = position;
                    return None;
                }
                Some(Slot::Free { .. }) => panic!(
                    "slot {position} is inside a free run that was entered without passing its head in region of {}",
                    type_name::<T>()
                ),
            }
        }
    }

    /// Drops every value, leaving all slots free. The capacity is retained.
    pub fn clear(&mut self) {
        let capacity = self.capacity();

        let Some(last) = capacity.checked_sub(1) else {
            return;
        };

        for slot in self.slots.iter_mut().take(capacity) {
            *slot = Slot::VACANT;
        }

        self.mark_run(0, last);
        self.free_hint = 0;

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Iterates over the occupied slots in ascending index order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            region: self,
            position: 0,
        }
    }

    /// Iterates over the occupied slots in ascending index order, with exclusive access to the
    /// values.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            slots: &mut self.slots,
            position: 0,
        }
    }

    /// Finds the first occupied slot at or after `from`, skipping any free run in one jump.
    pub(crate) fn next_occupied(&self, from: usize) -> Option<(usize, &T)> {
        let mut position = from;

        // A free run is always followed by an occupied slot or the gravestone, so this loops
        // at most twice.
        loop {
            match self.slots.get(position) {
                Some(Slot::Occupied(value)) => return Some((position, value)),
                Some(Slot::FirstFree { to_tail }) => {
                    position = position
                        .checked_add(*to_tail)
                        .and_then(|tail| tail.checked_add(1))
                        .expect("a free run never extends past the gravestone");
                }
                Some(Slot::Gravestone) | None => return None,
                Some(Slot::Free { .. }) => panic!(
                    "iteration landed on slot {position} inside a free run in region of {}",
                    type_name::<T>()
                ),
            }
        }
    }

    /// Returns the head of the free run whose last slot is at `last`, or `None` if that slot
    /// is occupied.
    ///
    /// The caller must ensure the slot after `last` is not free, otherwise the backward anchor
    /// read here is stale.
    fn head_of_run_ending_at(&self, last: usize) -> Option<usize> {
        match self.slot(last) {
            Slot::Occupied(_) => None,
            Slot::FirstFree { .. } => Some(last),
            Slot::Free { to_head } => Some(
                last.checked_sub(*to_head)
                    .expect("backward anchor points before the start of the region"),
            ),
            Slot::Gravestone => panic!(
                "slot {last} is the gravestone, which cannot end a free run in region of {}",
                type_name::<T>()
            ),
        }
    }

    /// Writes the anchors of a free run spanning `head..=tail`. Interior slots are not touched.
    fn mark_run(&mut self, head: usize, tail: usize) {
        let distance = tail
            .checked_sub(head)
            .expect("the tail of a free run never precedes its head");

        *self.slot_mut(head) = Slot::FirstFree { to_tail: distance };

        if distance > 0 {
            *self.slot_mut(tail) = Slot::Free { to_head: distance };
        }
    }

    fn slot(&self, position: usize) -> &Slot<T> {
        self.slots.get(position).unwrap_or_else(|| {
            panic!(
                "slot {position} out of bounds in region of {}",
                type_name::<T>()
            )
        })
    }

    fn slot_mut(&mut self, position: usize) -> &mut Slot<T> {
        self.slots.get_mut(position).unwrap_or_else(|| {
            panic!(
                "slot {position} out of bounds in region of {}",
                type_name::<T>()
            )
        })
    }

    /// Verifies that the free-run encoding is consistent, panicking if it is not.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    #[allow(
        clippy::arithmetic_side_effects,
        reason = "positions are bounded by the slot count, which never reaches usize::MAX"
    )]
    pub(crate) fn integrity_check(&self) {
        let Some((last, body)) = self.slots.split_last() else {
            assert!(
                self.free_hint == 0,
                "region of {} without storage has free hint {}",
                type_name::<T>(),
                self.free_hint
            );
            return;
        };

        assert!(
            matches!(last, Slot::Gravestone),
            "last slot of region of {} is not the gravestone",
            type_name::<T>()
        );

        let capacity = body.len();
        let mut position = 0;

        // Each step lands on the start of either an occupied slot or a free run. Interior run
        // members are only ever visited from their head.
        while let Some(slot) = body.get(position) {
            match slot {
                Slot::Occupied(_) => position += 1,
                Slot::Gravestone => panic!(
                    "slot {position} is a second gravestone before the end of region of {}",
                    type_name::<T>()
                ),
                Slot::Free { .. } => panic!(
                    "slot {position} is a free slot that does not belong to any run in region of {}",
                    type_name::<T>()
                ),
                Slot::FirstFree { to_tail } => {
                    let tail = position + to_tail;

                    assert!(
                        tail < capacity,
                        "free run at {position} has its tail at {tail}, past the last usable slot {} in region of {}",
                        capacity.saturating_sub(1),
                        type_name::<T>()
                    );

                    for interior in (position + 1)..=tail {
                        assert!(
                            matches!(body.get(interior), Some(Slot::Free { .. })),
                            "slot {interior} inside the free run at {position} is not plain free in region of {}",
                            type_name::<T>()
                        );
                    }

                    if *to_tail > 0 {
                        assert!(
                            matches!(body.get(tail), Some(Slot::Free { to_head }) if to_head == to_tail),
                            "tail {tail} of the free run at {position} does not point back to its head in region of {}",
                            type_name::<T>()
                        );
                    }

                    // The slot after a run must end it, otherwise two runs would be adjacent.
                    let after = tail + 1;
                    assert!(
                        matches!(
                            self.slots.get(after),
                            Some(Slot::Occupied(_) | Slot::Gravestone)
                        ),
                        "free run at {position} is not followed by an occupied slot or the gravestone in region of {}",
                        type_name::<T>()
                    );

                    position = after;
                }
            }
        }

        assert!(
            self.free_hint <= capacity,
            "free hint {} is beyond the capacity {capacity} of region of {}",
            self.free_hint,
            type_name::<T>()
        );

        for position in 0..self.free_hint {
            assert!(
                matches!(body.get(position), Some(Slot::Occupied(_))),
                "slot {position} is below the free hint {} but is not occupied in region of {}",
                self.free_hint,
                type_name::<T>()
            );
        }
    }
}

impl<T> Default for Region<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> IntoIterator for &'a Region<T> {
    type Item = (Index, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Region<T> {
    type Item = (Index, &'a mut T);
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the occupied slots of a [`Region`], created by [`Region::iter()`].
#[derive(Debug)]
pub struct Iter<'a, T> {
    region: &'a Region<T>,
    position: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Index, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let (position, value) = self.region.next_occupied(self.position)?;

        self.position = position
            .checked_add(1)
            .expect("an occupied slot is always followed by at least the gravestone");

        Some((Index::new(position), value))
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// Iterator over the occupied slots of a [`Region`] with exclusive access to the values,
/// created by [`Region::iter_mut()`].
#[derive(Debug)]
pub struct IterMut<'a, T> {
    /// The slots not yet visited. Emptied once we reach the gravestone.
    slots: &'a mut [Slot<T>],

    /// Index of the first slot in `slots`.
    position: usize,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = (Index, &'a mut T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (first, rest) = mem::take(&mut self.slots).split_first_mut()?;
            let position = self.position;

            self.position = position
                .checked_add(1)
                .expect("positions are bounded by the slot count");

            match first {
                Slot::Occupied(value) => {
                    self.slots = rest;
                    return Some((Index::new(position), value));
                }
                Slot::FirstFree { to_tail } => {
                    // Skip the remaining members of the run in one jump.
                    let skip = *to_tail;
                    self.slots = rest.get_mut(skip..)?;
                    self.position = self
                        .position
                        .checked_add(skip)
                        .expect("positions are bounded by the slot count");
                }
                Slot::Gravestone => return None,
                Slot::Free { .. } => panic!(
                    "iteration landed on slot {position} inside a free run in region of {}",
                    type_name::<T>()
                ),
            }
        }
    }
}

impl<T> FusedIterator for IterMut<'_, T> {}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use static_assertions::assert_impl_all;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Payload {
        a: i32,
        b: f32,
        c: &'static str,
    }

    impl Default for Payload {
        fn default() -> Self {
            Self {
                a: 52,
                b: 2.5,
                c: "Hello, world!",
            }
        }
    }

    fn idx(position: usize) -> Index {
        Index::new(position)
    }

    fn states<T>(region: &Region<T>) -> Vec<SlotState> {
        (0..=region.capacity())
            .map(|position| region.slot_state(idx(position)).unwrap())
            .collect()
    }

    fn full_region(capacity: usize) -> Region<usize> {
        let mut region = Region::with_capacity(capacity);

        for position in 0..capacity {
            region.emplace(idx(position), position).unwrap();
        }

        region.integrity_check();
        region
    }

    #[test]
    fn capacity_not_initialized() {
        let region = Region::<Payload>::new();

        assert_eq!(region.capacity(), 0);
        assert!(!region.alive());
        region.integrity_check();
    }

    #[test]
    fn capacity_initialized() {
        let region = Region::<Payload>::with_capacity(64);

        assert_eq!(region.capacity(), 64);
        assert!(region.alive());
        region.integrity_check();
    }

    #[test]
    fn capacity_extended() {
        let mut region = Region::<Payload>::with_capacity(64);
        region.reserve(128);

        assert_eq!(region.capacity(), 128);
        assert!(region.alive());
        region.integrity_check();
    }

    #[test]
    fn zero_capacity_is_not_alive() {
        let region = Region::<Payload>::with_capacity(0);

        assert!(!region.alive());
        assert_eq!(region.capacity(), 0);
    }

    #[test]
    fn fresh_region_is_one_run() {
        let region = Region::<u32>::with_capacity(4);

        assert_eq!(
            states(&region),
            [
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Free,
                SlotState::Gravestone
            ]
        );
        assert_eq!(region.slot_state(idx(5)), None);
    }

    #[test]
    fn emplace_not_initialized() {
        let mut region = Region::<Payload>::new();

        assert!(region.emplace(idx(0), Payload::default()).is_none());
        assert!(region.get(idx(0)).is_none());
    }

    #[test]
    fn emplace_initialized() {
        let mut region = Region::<Payload>::with_capacity(1);

        region.emplace(idx(0), Payload::default()).unwrap();

        assert_eq!(region.get(idx(0)), Some(&Payload::default()));
        region.integrity_check();
    }

    #[test]
    fn emplace_with_args() {
        let mut region = Region::<Payload>::with_capacity(3);

        region.emplace_with(idx(0), || Payload {
            a: -6,
            b: 5.0,
            c: "hi",
        });
        region.emplace_with(idx(1), || Payload {
            a: 0,
            b: 0.0,
            c: "",
        });
        region.emplace_with(idx(2), || Payload {
            a: 555,
            b: 555.0,
            c: "555",
        });

        assert_eq!(region.get(idx(0)).unwrap().a, -6);
        assert_eq!(region.get(idx(1)).unwrap().c, "");
        assert_eq!(region.get(idx(2)).unwrap().c, "555");
        region.integrity_check();
    }

    #[test]
    fn cannot_emplace_over_occupied() {
        let mut region = Region::<Payload>::with_capacity(1);

        region.emplace(idx(0), Payload::default()).unwrap();

        assert!(region.emplace(idx(0), Payload::default()).is_none());
        region.integrity_check();
    }

    #[test]
    fn cannot_emplace_inside_run() {
        let mut region = Region::<u32>::with_capacity(4);

        assert!(region.emplace(idx(2), 1).is_none());
        assert_eq!(region.slot_state(idx(2)), Some(SlotState::Free));
        region.integrity_check();
    }

    #[test]
    fn cannot_emplace_at_or_past_gravestone() {
        let mut region = Region::<u32>::with_capacity(4);

        assert!(region.emplace(idx(4), 1).is_none());
        assert!(region.emplace(idx(100), 1).is_none());
        assert!(region.emplace(Index::GRAVESTONE, 1).is_none());
        region.integrity_check();
    }

    #[test]
    fn failed_emplace_with_does_not_construct() {
        let mut region = Region::<u32>::with_capacity(2);
        let called = Cell::new(false);

        region.emplace(idx(0), 1).unwrap();

        assert!(
            region
                .emplace_with(idx(0), || {
                    called.set(true);
                    2
                })
                .is_none()
        );
        assert!(!called.get());
    }

    #[test]
    fn emplace_shrinks_run_from_front() {
        let mut region = Region::<u32>::with_capacity(4);

        region.emplace(idx(0), 10).unwrap();

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();

        region.emplace(idx(1), 11).unwrap();
        region.emplace(idx(2), 12).unwrap();

        // The run is down to a single slot, which is its own head and tail.
        assert_eq!(region.slot_state(idx(3)), Some(SlotState::FirstFree));
        region.integrity_check();

        region.emplace(idx(3), 13).unwrap();

        assert_eq!(region.first_free(), None);
        region.integrity_check();
    }

    #[test]
    fn emplace_returns_reference_to_value() {
        let mut region = Region::<String>::with_capacity(2);

        let value = region.emplace(idx(0), "foo".to_string()).unwrap();
        value.push_str("bar");

        assert_eq!(region.get(idx(0)).map(String::as_str), Some("foobar"));
    }

    #[test]
    fn panicking_constructor_leaves_region_intact() {
        let mut region = Region::<u32>::with_capacity(3);
        region.emplace(idx(0), 1).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            region.emplace_with(idx(1), || panic!("constructor failed"));
        }));

        assert!(result.is_err());
        assert_eq!(region.slot_state(idx(1)), Some(SlotState::FirstFree));
        region.integrity_check();

        region.emplace(idx(1), 2).unwrap();
        assert_eq!(region.get(idx(1)), Some(&2));
    }

    #[test]
    fn scenario_free_last_then_first() {
        let mut region = Region::<i32>::with_capacity(10);

        for i in 0..6 {
            region.emplace(idx(i), i as i32).unwrap();
        }
        region.integrity_check();

        region.free(idx(5));

        assert_eq!(region.get(idx(5)), None);
        assert_eq!(region.get(idx(4)), Some(&4));
        region.integrity_check();

        region.free(idx(0));

        assert_eq!(region.get(idx(0)), None);
        region.integrity_check();

        // The freed slot 5 merged with the trailing run.
        assert_eq!(region.slot_state(idx(5)), Some(SlotState::FirstFree));
        assert_eq!(region.first_free(), Some(idx(0)));
    }

    #[test]
    fn free_isolated_slot() {
        let mut region = full_region(3);

        region.free(idx(1));

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::InUse,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();
    }

    #[test]
    fn free_extends_left_run_whose_head_is_neighbor() {
        let mut region = full_region(4);

        region.free(idx(1));
        region.free(idx(2));

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::InUse,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();
    }

    #[test]
    fn free_extends_left_run_with_existing_tail() {
        let mut region = full_region(5);

        region.free(idx(0));
        region.free(idx(1));
        region.free(idx(2));
        region.integrity_check();

        region.free(idx(3));

        assert_eq!(
            states(&region),
            [
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Free,
                SlotState::InUse,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();
    }

    #[test]
    fn free_absorbs_right_run() {
        let mut region = full_region(5);

        region.free(idx(3));
        region.free(idx(4));
        region.integrity_check();

        region.free(idx(2));

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();
        assert_eq!(region.first_free(), Some(idx(2)));
    }

    #[test]
    fn free_merges_runs_on_both_sides() {
        let mut region = full_region(7);

        region.free(idx(1));
        region.free(idx(2));
        region.free(idx(4));
        region.free(idx(5));
        region.integrity_check();

        region.free(idx(3));

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Free,
                SlotState::Free,
                SlotState::InUse,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();

        let live: Vec<_> = region.iter().map(|(index, _)| index.get()).collect();
        assert_eq!(live, [0, 6]);
    }

    #[test]
    fn three_single_slot_runs_merge_into_one() {
        let mut region = full_region(5);

        // Two single-slot runs separated by a live slot.
        region.free(idx(1));
        region.free(idx(3));
        region.integrity_check();

        // Freeing the separator joins them.
        region.free(idx(2));
        region.integrity_check();

        region.free(idx(0));
        region.free(idx(4));
        region.integrity_check();

        assert_eq!(region.iter().count(), 0);
        assert_eq!(region.first_free(), Some(idx(0)));

        // The whole region is one run again, so emplacing fills it in order.
        for position in 0..5 {
            assert_eq!(region.first_free(), Some(idx(position)));
            region.emplace(idx(position), position).unwrap();
        }
        assert_eq!(region.first_free(), None);
        region.integrity_check();
    }

    #[test]
    fn take_returns_value_once() {
        let mut region = Region::<String>::with_capacity(2);
        region.emplace(idx(0), "a".to_string()).unwrap();

        assert_eq!(region.take(idx(0)), Some("a".to_string()));
        assert_eq!(region.take(idx(0)), None);
        region.integrity_check();
    }

    #[test]
    fn free_invalid_positions_is_noop() {
        let mut region = full_region(3);
        region.free(idx(1));

        // Already free, gravestone, out of range, sentinel.
        region.free(idx(1));
        region.free(idx(3));
        region.free(idx(17));
        region.free(Index::GRAVESTONE);

        assert_eq!(region.iter().count(), 2);
        region.integrity_check();
    }

    #[test]
    fn free_on_empty_region_is_noop() {
        let mut region = Region::<u32>::new();

        region.free(idx(0));

        assert!(!region.alive());
        region.integrity_check();
    }

    #[test]
    fn reserve_not_initialized() {
        let mut region = Region::<Payload>::new();
        region.reserve(64);

        assert_eq!(region.capacity(), 64);
        region.integrity_check();
    }

    #[test]
    fn reserve_twice() {
        let mut region = Region::<Payload>::new();
        region.reserve(70);
        region.reserve(75);

        assert_eq!(region.capacity(), 75);

        // The trailing run absorbed the new slots, so there is still just one run.
        assert_eq!(region.slot_state(idx(0)), Some(SlotState::FirstFree));
        assert_eq!(region.slot_state(idx(70)), Some(SlotState::Free));
        region.integrity_check();
    }

    #[test]
    fn reserve_less_than_capacity_is_noop() {
        let mut region = Region::<Payload>::with_capacity(1);
        region.emplace(idx(0), Payload::default()).unwrap();
        region.reserve(70);
        region.reserve(50);

        assert_eq!(region.capacity(), 70);
        assert_eq!(region.get(idx(0)), Some(&Payload::default()));
        region.integrity_check();
    }

    #[test]
    fn reserve_with_occupied_last_slot() {
        let mut region = Region::<Payload>::with_capacity(1);
        region.emplace(idx(0), Payload::default()).unwrap();
        region.reserve(70);

        assert_eq!(region.capacity(), 70);
        assert_eq!(region.get(idx(0)), Some(&Payload::default()));
        assert_eq!(region.slot_state(idx(1)), Some(SlotState::FirstFree));
        region.integrity_check();
    }

    #[test]
    fn reserve_repeatedly_with_occupied_prefix() {
        let mut region = Region::<Payload>::with_capacity(1);
        region.emplace(idx(0), Payload::default()).unwrap();
        region.reserve(70);
        region.emplace(idx(1), Payload::default()).unwrap();
        region.reserve(120);
        region.emplace(idx(2), Payload::default()).unwrap();
        region.emplace(idx(3), Payload::default()).unwrap();
        region.emplace(idx(4), Payload::default()).unwrap();
        region.reserve(130);

        assert_eq!(region.capacity(), 130);
        region.integrity_check();

        for position in 0..5 {
            assert_eq!(region.get(idx(position)), Some(&Payload::default()));
        }

        assert_ne!(region.slot_state(idx(5)), Some(SlotState::InUse));
    }

    #[test]
    fn reserve_extends_single_slot_trailing_run() {
        let mut region = full_region(3);
        region.free(idx(2));

        region.reserve(6);

        assert_eq!(
            states(&region),
            [
                SlotState::InUse,
                SlotState::InUse,
                SlotState::FirstFree,
                SlotState::Free,
                SlotState::Free,
                SlotState::Free,
                SlotState::Gravestone
            ]
        );
        region.integrity_check();
    }

    #[test]
    fn reserve_extends_multi_slot_trailing_run() {
        let mut region = full_region(4);
        region.free(idx(2));
        region.free(idx(3));

        region.reserve(8);
        region.integrity_check();

        // Filling the region from the first free slot must land exactly on the new capacity.
        let mut filled = 0;
        while let Some(index) = region.first_free() {
            region.emplace(index, 100 + index.get()).unwrap();
            filled += 1;
        }

        assert_eq!(filled, 6);
        assert_eq!(region.iter().count(), 8);
        region.integrity_check();
    }

    #[test]
    fn reserve_preserves_values() {
        let mut region = Region::<String>::with_capacity(2);
        region.emplace(idx(0), "zero".to_string()).unwrap();
        region.emplace(idx(1), "one".to_string()).unwrap();

        region.reserve(1000);

        assert_eq!(region.get(idx(0)).map(String::as_str), Some("zero"));
        assert_eq!(region.get(idx(1)).map(String::as_str), Some("one"));
        region.integrity_check();
    }

    #[test]
    #[should_panic]
    fn reserve_usize_max_panics() {
        let mut region = Region::<u8>::new();
        region.reserve(usize::MAX);
    }

    #[test]
    fn try_reserve_too_large_leaves_region_unchanged() {
        let mut region = Region::<u64>::new();

        assert!(region.try_reserve(usize::MAX / 4).is_err());
        assert!(!region.alive());
        region.integrity_check();

        region.reserve(3);
        region.emplace(idx(0), 7).unwrap();

        assert!(region.try_reserve(usize::MAX / 4).is_err());

        assert_eq!(region.capacity(), 3);
        assert_eq!(region.get(idx(0)), Some(&7));
        assert_eq!(region.first_free(), Some(idx(1)));
        region.integrity_check();
    }

    #[test]
    fn try_reserve_grows_like_reserve() {
        let mut region = full_region(2);

        region.try_reserve(5).unwrap();

        assert_eq!(region.capacity(), 5);
        assert_eq!(region.first_free(), Some(idx(2)));
        assert_eq!(states(&region)[2..], [
            SlotState::FirstFree,
            SlotState::Free,
            SlotState::Free,
            SlotState::Gravestone
        ]);
        region.integrity_check();
    }

    #[test]
    #[should_panic]
    fn try_reserve_usize_max_panics() {
        let mut region = Region::<u8>::new();
        _ = region.try_reserve(usize::MAX);
    }

    #[test]
    fn first_free_finds_high_run_after_low_single_slot_is_consumed() {
        let mut region = full_region(64);

        for _ in 0..3 {
            region.free(idx(0));
            assert_eq!(region.first_free(), Some(idx(0)));
            region.emplace(idx(0), 0).unwrap();

            region.free(idx(60));
            assert_eq!(region.first_free(), Some(idx(60)));
            region.emplace(idx(60), 60).unwrap();

            assert_eq!(region.first_free(), None);
            region.integrity_check();
        }
    }

    #[test]
    fn get_only_resolves_occupied_slots() {
        let mut region = Region::<u32>::with_capacity(3);
        region.emplace(idx(0), 1).unwrap();

        assert_eq!(region.get(idx(0)), Some(&1));
        assert_eq!(region.get(idx(1)), None);
        assert_eq!(region.get(idx(2)), None);
        assert_eq!(region.get(idx(3)), None);
        assert_eq!(region.get(Index::GRAVESTONE), None);
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut region = Region::<u32>::with_capacity(3);
        region.emplace(idx(0), 1).unwrap();

        *region.get_mut(idx(0)).unwrap() += 41;

        assert_eq!(region.get(idx(0)), Some(&42));
        assert!(region.get_mut(idx(1)).is_none());
    }

    #[test]
    fn first_free_on_empty_region() {
        let mut region = Region::<u32>::new();

        assert_eq!(region.first_free(), None);
        region.integrity_check();
    }

    #[test]
    fn first_free_moves_back_after_free() {
        let mut region = full_region(6);

        assert_eq!(region.first_free(), None);

        region.free(idx(4));
        assert_eq!(region.first_free(), Some(idx(4)));

        region.free(idx(1));
        assert_eq!(region.first_free(), Some(idx(1)));

        region.emplace(idx(1), 1).unwrap();
        assert_eq!(region.first_free(), Some(idx(4)));
        region.integrity_check();
    }

    #[test]
    fn iter_skips_free_runs() {
        let mut region = full_region(8);
        region.free(idx(0));
        region.free(idx(1));
        region.free(idx(3));
        region.free(idx(5));
        region.free(idx(6));

        let live: Vec<_> = region
            .iter()
            .map(|(index, value)| (index.get(), *value))
            .collect();

        assert_eq!(live, [(2, 2), (4, 4), (7, 7)]);
    }

    #[test]
    fn iter_on_region_without_storage() {
        let region = Region::<u32>::new();

        assert_eq!(region.iter().count(), 0);
    }

    #[test]
    fn iter_on_empty_region() {
        let region = Region::<u32>::with_capacity(16);

        assert_eq!(region.iter().count(), 0);
    }

    #[test]
    fn iter_is_fused() {
        let region = full_region(2);
        let mut iter = region.iter();

        assert!(iter.next().is_some());
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn iter_mut_skips_free_runs() {
        let mut region = full_region(8);
        region.free(idx(0));
        region.free(idx(3));
        region.free(idx(4));
        region.free(idx(7));

        for (index, value) in &mut region {
            *value += 10 * index.get();
        }

        let live: Vec<_> = region.iter().map(|(_, value)| *value).collect();
        assert_eq!(live, [11, 22, 55, 66]);
        region.integrity_check();
    }

    #[test]
    fn iter_mut_is_fused() {
        let mut region = full_region(1);
        let mut iter = region.iter_mut();

        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn clear_drops_everything_and_keeps_capacity() {
        let mut region = full_region(5);
        region.free(idx(2));

        region.clear();

        assert_eq!(region.capacity(), 5);
        assert_eq!(region.iter().count(), 0);
        assert_eq!(region.first_free(), Some(idx(0)));
        region.integrity_check();
    }

    #[test]
    fn clear_on_region_without_storage() {
        let mut region = Region::<u32>::new();

        region.clear();

        assert!(!region.alive());
    }

    #[test]
    fn drops_values_on_free_and_on_drop() {
        let counter = Rc::new(());
        let mut region = Region::<Rc<()>>::with_capacity(3);

        region.emplace(idx(0), Rc::clone(&counter)).unwrap();
        region.emplace(idx(1), Rc::clone(&counter)).unwrap();
        assert_eq!(Rc::strong_count(&counter), 3);

        region.free(idx(0));
        assert_eq!(Rc::strong_count(&counter), 2);

        drop(region);
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn random_operations_match_model() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let mut region = Region::<u64>::with_capacity(8);
        let mut model = BTreeMap::new();

        for step in 0..2_000_u64 {
            if rng.random_bool(0.55) {
                let index = match region.first_free() {
                    Some(index) => index,
                    None => {
                        region.reserve(region.capacity() * 2);
                        region.first_free().unwrap()
                    }
                };

                region.emplace(index, step).unwrap();
                model.insert(index.get(), step);
            } else if !model.is_empty() {
                let nth = rng.random_range(0..model.len());
                let position = *model.keys().nth(nth).unwrap();

                assert_eq!(region.take(idx(position)), model.remove(&position));
            }

            region.integrity_check();
        }

        let live: Vec<_> = region
            .iter()
            .map(|(index, value)| (index.get(), *value))
            .collect();
        let expected: Vec<_> = model.into_iter().collect();

        assert_eq!(live, expected);
    }

    #[test]
    fn thread_mobility() {
        assert_impl_all!(Region<u32>: Send, Sync);
        assert_impl_all!(Iter<'static, u32>: Send, Sync);
    }
}
