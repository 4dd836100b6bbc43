//! A growable slot arena and a handle-indirected object pool built on top of it.
//!
//! This crate provides the storage layer for per-entity and per-component data:
//!
//! * [`Region<T>`] - a contiguous, growable buffer of slots addressed by [`Index`]. Allocating,
//!   freeing and stepping an iterator are all O(1). Free slots are tracked without any side
//!   table: every maximal run of free slots records its length only at its two endpoints, in the
//!   free slots themselves.
//! * [`RawPool<T>`] - owns a region and hands out never-reused [`Handle`]s, growing the region
//!   as needed. Access goes through `&mut self`, so the borrow checker guarantees that no
//!   reference into the region survives a mutation.
//! * [`Pool<T>`] - the same pool behind single-threaded interior mutability, handing out
//!   [`Borrow`]s that can be freely copied and resolved at any time, even after their item has
//!   been freed (in which case they resolve to nothing).
//!
//! # Stable identifiers, moving storage
//!
//! Growing a region may relocate its entire buffer. Only [`Handle`] and [`Index`] values are
//! stable identifiers; references obtained from `get()` and friends must not be held across any
//! call that allocates, frees or reserves. [`Region`] and [`RawPool`] enforce this at compile
//! time. [`Pool`] enforces it at runtime via [`RefCell`][std::cell::RefCell] - attempting to
//! mutate the pool while a [`Ref`][std::cell::Ref] to one of its items is alive panics.
//!
//! # Example
//!
//! ```rust
//! use region_pool::Pool;
//!
//! let pool = Pool::<i32>::new();
//!
//! let a = pool.allocate(66);
//! let b = pool.allocate(67);
//! let c = pool.allocate(68);
//!
//! pool.free(b);
//!
//! assert_eq!(b.get().as_deref(), None);
//! assert_eq!(a.cloned(), Some(66));
//!
//! let values: Vec<i32> = pool.iter().map(|v| *v).collect();
//! assert_eq!(values, [66, 68]);
//! assert_eq!(pool.len(), 2);
//! # _ = c;
//! ```
//!
//! # Thread safety
//!
//! None of the types are thread-safe ([`Sync`]). [`Region`], [`RawPool`] and [`Pool`] are
//! thread-mobile ([`Send`]) if `T` is. [`Borrow`] is neither, as it refers to a [`Pool`].

mod borrow;
mod builder;
mod drop_policy;
mod error;
mod handle;
mod index;
mod pool;
mod raw_pool;
mod region;
mod slot;

pub use borrow::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use handle::*;
pub use index::*;
pub use pool::*;
pub use raw_pool::*;
pub use region::*;
pub(crate) use slot::Slot;
pub use slot::SlotState;
