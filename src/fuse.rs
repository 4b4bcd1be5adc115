//! Implements classical fuse filters.

#![allow(deprecated)]

use crate::error::Error;
use crate::hash::{fingerprint, mix, reduce, rotl64};
use crate::peel::{fingerprint_block, try_block, try_enqueue, HSet, KeyIndex, MAX_ITERATIONS};
use crate::splitmix64::splitmix64;
use crate::{Filter, Fingerprint};
use alloc::{boxed::Box, vec::Vec};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};

const H3: u64 = 0xBF58_476D_1CE4_E5B9;
const ARITY: usize = 3;
const SEGMENT_COUNT: usize = 100;
const SLOTS: usize = SEGMENT_COUNT + ARITY - 1;
const FUSE_OVERHEAD: f64 = 1.0 / 0.879;

/// The three slot indexes of a hash, in three consecutive segments.
#[inline]
const fn segment_indexes(hash: u64, segment_length: usize) -> [usize; 3] {
    let r0 = hash as u32;
    let r1 = rotl64(hash, 21) as u32;
    let r2 = rotl64(hash, 42) as u32;
    let r3 = (H3.wrapping_mul(hash) >> 32) as u32;

    let seg = reduce(r0, SEGMENT_COUNT as u32) as usize;
    [
        seg * segment_length + reduce(r1, segment_length as u32) as usize,
        (seg + 1) * segment_length + reduce(r2, segment_length as u32) as usize,
        (seg + 2) * segment_length + reduce(r3, segment_length as u32) as usize,
    ]
}

/// Classical fuse filter over `F`-width fingerprints.
///
/// Fuse filters spread each key's three slots over consecutive segments of a
/// single [fuse graph] array, reaching a ≈0.879 fill factor (<9.11 bits per entry for
/// [`Fuse8`]) against the xor filter's 1/1.23. The segment count is fixed at
/// 100, which is tuned for very large key sets: construction reliably
/// succeeds only above roughly 125,000 distinct keys and fails with
/// [`Error::KeysLikelyNotUnique`] below that. Prefer a
/// [`BinaryFuse8`](crate::BinaryFuse8), which has no such floor.
///
/// [fuse graph]: https://arxiv.org/abs/1907.04749
#[deprecated(since = "0.2.0", note = "prefer using a `BinaryFuse8`")]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone)]
pub struct Fuse<F: 'static> {
    /// The seed that produced a peelable hypergraph.
    pub seed: u64,
    /// Length of each of the 102 segments.
    pub segment_length: usize,
    /// The fingerprints, `102 * segment_length` of them.
    pub fingerprints: Box<[F]>,
}

/// Classical fuse filter with 8-bit fingerprints.
#[deprecated(since = "0.2.0", note = "prefer using a `BinaryFuse8`")]
pub type Fuse8 = Fuse<u8>;
/// Classical fuse filter with 16-bit fingerprints.
#[deprecated(since = "0.2.0", note = "prefer using a `BinaryFuse16`")]
pub type Fuse16 = Fuse<u16>;

impl<F: Fingerprint> Fuse<F> {
    /// Allocates a filter sized for `capacity` keys: `capacity / 0.879`
    /// slots, rounded down to a multiple of the 102 segments.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let slots = (FUSE_OVERHEAD * capacity as f64) as usize;
        let slots = slots / SLOTS * SLOTS;
        Ok(Self {
            seed: 0,
            segment_length: slots / SLOTS,
            fingerprints: fingerprint_block(slots)?,
        })
    }

    /// One-shot construction from a restartable key iterator; see
    /// [`Xor::populate`](crate::Xor::populate) for the iterator contract.
    /// Keys must be distinct.
    pub fn populate<K>(&mut self, keys: K) -> Result<(), Error>
    where
        K: ExactSizeIterator<Item = u64> + Clone,
    {
        #[cfg(debug_assertions)]
        {
            use crate::peel::all_distinct;
            debug_assert!(
                all_distinct(keys.clone()),
                "fuse filters must be constructed from a collection of distinct keys"
            );
        }

        let num_keys = keys.len();
        let segment_length = self.segment_length;
        let capacity = self.fingerprints.len();

        let mut sets: Box<[HSet]> = try_block(capacity)?;
        let mut queue: Box<[KeyIndex]> = try_block(capacity)?;
        let mut stack: Box<[KeyIndex]> = try_block(num_keys)?;

        let mut rng = 1;
        let mut seed = splitmix64(&mut rng);
        let mut done = false;
        for _ in 0..MAX_ITERATIONS {
            for key in keys.clone() {
                let hash = mix(key, seed);
                for idx in segment_indexes(hash, segment_length) {
                    sets[idx].mask ^= hash;
                    sets[idx].count += 1;
                }
            }

            let mut q_size = 0;
            for idx in 0..capacity {
                try_enqueue(&sets, idx, &mut queue, &mut q_size);
            }

            let mut stack_size = 0;
            while q_size > 0 {
                q_size -= 1;
                let ki = queue[q_size];
                if sets[ki.index].count == 0 {
                    continue;
                }

                stack[stack_size] = ki;
                stack_size += 1;

                // Remove the edge from all three slots; its own slot drops to
                // zero in passing.
                for idx in segment_indexes(ki.hash, segment_length) {
                    sets[idx].mask ^= ki.hash;
                    sets[idx].count -= 1;
                    try_enqueue(&sets, idx, &mut queue, &mut q_size);
                }
            }

            if stack_size == num_keys {
                done = true;
                break;
            }

            for set in sets.iter_mut() {
                *set = HSet::default();
            }
            seed = splitmix64(&mut rng);
        }
        if !done {
            return Err(Error::KeysLikelyNotUnique);
        }
        self.seed = seed;

        for ki in stack.iter().rev() {
            let [h0, h1, h2] = segment_indexes(ki.hash, segment_length);
            let fp = F::from_hash(fingerprint(ki.hash))
                ^ match ki.index {
                    i if i == h0 => self.fingerprints[h1] ^ self.fingerprints[h2],
                    i if i == h1 => self.fingerprints[h0] ^ self.fingerprints[h2],
                    _ => self.fingerprints[h0] ^ self.fingerprints[h1],
                };
            self.fingerprints[ki.index] = fp;
        }
        Ok(())
    }

    /// [`populate`](Fuse::populate) from a slice of distinct keys.
    pub fn populate_from_slice(&mut self, keys: &[u64]) -> Result<(), Error> {
        self.populate(keys.iter().copied())
    }

    /// Allocates and populates in one step.
    pub fn try_from_iterator<K>(keys: K) -> Result<Self, Error>
    where
        K: ExactSizeIterator<Item = u64> + Clone,
    {
        let mut filter = Self::new(keys.len())?;
        filter.populate(keys)?;
        Ok(filter)
    }
}

impl<F: Fingerprint> Filter<u64> for Fuse<F> {
    /// Returns `true` if the filter probably contains the specified key.
    /// Has no false negatives.
    fn contains(&self, key: &u64) -> bool {
        if self.fingerprints.is_empty() {
            return false;
        }
        let hash = mix(*key, self.seed);
        let [h0, h1, h2] = segment_indexes(hash, self.segment_length);
        F::from_hash(fingerprint(hash))
            == self.fingerprints[h0] ^ self.fingerprints[h1] ^ self.fingerprints[h2]
    }

    fn len(&self) -> usize {
        self.fingerprints.len()
    }

    fn size_in_bytes(&self) -> usize {
        self.fingerprints.len() * core::mem::size_of::<F>() + core::mem::size_of::<Self>()
    }
}

impl<F: Fingerprint> TryFrom<&[u64]> for Fuse<F> {
    type Error = Error;

    fn try_from(keys: &[u64]) -> Result<Self, Self::Error> {
        Self::try_from_iterator(keys.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<&Vec<u64>> for Fuse<F> {
    type Error = Error;

    fn try_from(v: &Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<Vec<u64>> for Fuse<F> {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}
