//! Construction errors.

use thiserror::Error;

/// Errors surfaced while building a filter.
///
/// Lookups never fail; only allocation and population do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The allocator could not provide the requested storage.
    #[error("allocation failed")]
    AllocationFailed,

    /// No peelable ordering was found within the retry limit.
    ///
    /// The theoretical failure probability for a correctly sized, unique
    /// key set is below 2^-40 per attempt, so exhausting 100 seeds almost
    /// certainly means the input contains duplicate keys.
    #[error("construction failed after 100 seeds; keys are likely not unique")]
    KeysLikelyNotUnique,
}
