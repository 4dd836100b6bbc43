/// Determines what happens to remaining items when a pool is dropped.
///
/// By default, the pool drops its items when it is dropped.
///
/// # Examples
///
/// ```
/// use region_pool::{DropPolicy, Pool};
///
/// // The drop policy is set at pool creation time.
/// let pool = Pool::<u32>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool drops its items when the pool is dropped. This is the default.
    #[default]
    MayDropItems,

    /// The pool panics if it still contains items when it is dropped.
    ///
    /// Useful when items must be released through some external protocol first. For example,
    /// an entity store may require every component to be detached explicitly, and a pool
    /// dropped with components still in it indicates a leak in that protocol.
    MustNotDropItems,
}
