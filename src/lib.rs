//! This library implements xor, fuse and binary fuse filters -- data structures for fast
//! approximation of set membership using little memory. Probabilistic filters like these are
//! useful for quickly estimating the existence of an entity to avoid using an expensive
//! resource. For example, they can be used to [reduce disk writes] in a cache or
//! [identify malicious URLs].
//!
//! Xor-family filters are faster and smaller than Bloom and Cuckoo filters. They incur a
//! relative time penalty in construction, but are very fast in lookups; the expectation is
//! that construction of a filter is amortized after many queries.
//!
//! Filters operate on sets of 64-bit (unsigned) integer keys, are immutable once populated,
//! and guarantee no false negatives. Three constructions are provided:
//!
//! - [`Xor`] — the general default; ≈1.23 fingerprints per key.
//! - [`BinaryFuse`] — denser (≈1.13 fingerprints per key), handles arbitrarily small key
//!   sets, and absorbs duplicate keys during construction.
//! - [`Fuse`] — the classical fuse layout; deprecated, as it needs very large key sets.
//!
//! Each is generic over its fingerprint width (see [`Fingerprint`] and
//! [`narrow_fingerprint!`]); a *w*-bit fingerprint gives a false-positive rate of ≈2^-w.
//! The xor and fuse constructors require **distinct** keys — the in-place [`dedup`] module
//! satisfies that precondition in O(N) time and O(1) auxiliary space.
//!
//! Construction rescans its keys once per seed retry, so key iterators must be cheaply
//! cloneable and yield the same sequence every time (`ExactSizeIterator + Clone`); an
//! iterator that does not restart silently corrupts construction.
//!
//! ```
//! use xorfuse::{Filter, Xor8};
//!
//! let keys: Vec<u64> = (0..10_000).collect();
//! let filter = Xor8::try_from(&keys).unwrap();
//!
//! for key in keys {
//!     assert!(filter.contains(&key));
//! }
//! ```
//!
//! This library is `no_std`. Filters are implemented as described in the paper
//! [Xor Filters: Faster and Smaller Than Bloom and Cuckoo Filters], the follow-up work on
//! [binary fuse filters], and Daniel Lemire's [go] and [c] implementations. All are useful
//! references on the theory behind the constructions.
//!
//! [reduce disk writes]: https://en.wikipedia.org/wiki/Bloom_filter#Cache_filtering
//! [identify malicious URLs]: https://en.wikipedia.org/wiki/Bloom_filter#Examples
//! [Xor Filters: Faster and Smaller Than Bloom and Cuckoo Filters]: https://arxiv.org/abs/1912.08258
//! [binary fuse filters]: https://arxiv.org/abs/2201.01174
//! [go]: https://github.com/FastFilter/xorfilter
//! [c]: https://github.com/FastFilter/xor_singleheader

#![no_std]
// Configuration attributes
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::len_without_is_empty)]

extern crate alloc;

mod error;
mod hash;
mod peel;
mod splitmix64;

pub mod dedup;

#[cfg(feature = "binary-fuse")]
mod bfuse;
mod fingerprint;
mod fuse;
mod xor;

#[cfg(feature = "binary-fuse")]
pub use bfuse::{BinaryFuse, BinaryFuse16, BinaryFuse32, BinaryFuse8};
pub use error::Error;
pub use fingerprint::Fingerprint;
#[allow(deprecated)]
pub use fuse::{Fuse, Fuse16, Fuse8};
pub use xor::{Xor, Xor16, Xor32, Xor8};

/// Methods common to xor-family filters.
pub trait Filter<Type> {
    /// Returns `true` if the filter probably contains the specified key.
    ///
    /// There can never be a false negative, but there is a small possibility of false
    /// positives. Refer to individual filters' documentation for false positive rates.
    fn contains(&self, key: &Type) -> bool;

    /// Returns the number of fingerprints in the filter.
    fn len(&self) -> usize;

    /// Returns the memory the filter occupies: fingerprint storage plus the
    /// descriptor header.
    fn size_in_bytes(&self) -> usize;
}
