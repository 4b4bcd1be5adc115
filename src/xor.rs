//! Implements xor filters as described in [Xor Filters: Faster and Smaller Than Bloom and Cuckoo Filters].
//!
//! [Xor Filters: Faster and Smaller Than Bloom and Cuckoo Filters]: https://arxiv.org/abs/1912.08258

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

/// Computes the intra-block index of `hash` in the `i`'th filter block.
#[inline]
const fn block_index(hash: u64, i: usize, block_length: usize) -> usize {
    let r = rotl64(hash, (i as isize) * 21) as u32;
    reduce(r, block_length as u32) as usize
}

/// Xor filter over `F`-width fingerprints.
///
/// An xor filter stores three fingerprint blocks; each key addresses one slot
/// per block and is contained iff the xor of those three slots equals the low
/// bits of the key's own fingerprint. Storage is ≈1.23 fingerprints per key,
/// so an [`Xor8`] uses <10 bits per entry with a false positive rate of
/// ≈0.39%, an [`Xor16`] <20 bits per entry at ≈0.0015%.
///
/// A filter is constructed once from a set of **distinct** 64-bit keys and is
/// immutable afterwards; lookups are read-only and freely shareable across
/// threads. Use [`crate::dedup`] first if the key buffer may hold duplicates,
/// or a [`BinaryFuse8`](crate::BinaryFuse8), which absorbs duplicates itself.
///
/// ```
/// use xorfuse::{Filter, Xor8};
/// use rand::Rng;
///
/// let mut rng = rand::thread_rng();
/// const SAMPLE_SIZE: usize = 100_000;
/// let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();
/// let filter = Xor8::try_from(&keys).unwrap();
///
/// // no false negatives
/// for key in keys {
///     assert!(filter.contains(&key));
/// }
///
/// // bits per entry
/// let bpe = (filter.len() as f64) * 8.0 / (SAMPLE_SIZE as f64);
/// assert!(bpe < 10., "Bits per entry is {}", bpe);
///
/// // false positive rate
/// let false_positives: usize = (0..SAMPLE_SIZE)
///     .map(|_| rng.gen())
///     .filter(|n| filter.contains(n))
///     .count();
/// let fp_rate: f64 = (false_positives * 100) as f64 / SAMPLE_SIZE as f64;
/// assert!(fp_rate < 0.55, "False positive rate is {}", fp_rate);
/// ```
///
/// Serializing and deserializing xor filters can be enabled with the `serde`
/// feature (or `bincode` for bincode); the public fields are the complete
/// reconstruction surface for callers that roll their own encoding.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone)]
pub struct Xor<F: 'static> {
    /// The seed that produced a peelable hypergraph.
    pub seed: u64,
    /// Length of each of the three fingerprint blocks.
    pub block_length: usize,
    /// The fingerprints, `3 * block_length` of them.
    pub fingerprints: Box<[F]>,
}

/// Xor filter with 8-bit fingerprints (≈0.39% false positives).
pub type Xor8 = Xor<u8>;
/// Xor filter with 16-bit fingerprints (≈0.0015% false positives).
pub type Xor16 = Xor<u16>;
/// Xor filter with 32-bit fingerprints (≈2^-32 false positives).
pub type Xor32 = Xor<u32>;

impl<F: Fingerprint> Xor<F> {
    /// Allocates a filter sized for `capacity` keys: `3 * block_length` slots
    /// with `block_length = (32 + 1.23 * capacity) / 3`.
    ///
    /// The filter contains nothing until [`populate`](Xor::populate) runs.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let slots = (1.23 * capacity as f64) as usize + 32;
        let slots = slots / 3 * 3; // round to a multiple of 3
        Ok(Self {
            seed: 0,
            block_length: slots / 3,
            fingerprints: fingerprint_block(slots)?,
        })
    }

    /// One-shot construction from a restartable key iterator.
    ///
    /// Construction rescans the keys once per seed retry by cloning the
    /// iterator, so every clone must yield the same keys in the same order.
    /// Keys must be distinct and their count should match the `capacity`
    /// given to [`Xor::new`]; duplicated keys make every seed fail and
    /// surface as [`Error::KeysLikelyNotUnique`].
    pub fn populate<K>(&mut self, keys: K) -> Result<(), Error>
    where
        K: ExactSizeIterator<Item = u64> + Clone,
    {
        #[cfg(debug_assertions)]
        {
            use crate::peel::all_distinct;
            debug_assert!(
                all_distinct(keys.clone()),
                "xor filters must be constructed from a collection of distinct keys"
            );
        }

        let num_keys = keys.len();
        let block_length = self.block_length;

        // See Algorithm 3 in the paper: three slot arrays, three queues of
        // degree-1 slots, and the stack recording the peel order.
        let mut sets: [Box<[HSet]>; 3] = [
            try_block(block_length)?,
            try_block(block_length)?,
            try_block(block_length)?,
        ];
        let mut queues: [Box<[KeyIndex]>; 3] = [
            try_block(block_length)?,
            try_block(block_length)?,
            try_block(block_length)?,
        ];
        let mut stack: Box<[KeyIndex]> = try_block(num_keys)?;

        let mut rng = 1;
        let mut seed = splitmix64(&mut rng);
        let mut done = false;
        for _ in 0..MAX_ITERATIONS {
            // Add each key to its slot in all three blocks.
            for key in keys.clone() {
                let hash = mix(key, seed);
                for (b, block) in sets.iter_mut().enumerate() {
                    let idx = block_index(hash, b, block_length);
                    block[idx].mask ^= hash;
                    block[idx].count += 1;
                }
            }

            // Slots holding a single key seed the queues.
            let mut q_sizes: [usize; 3] = [0, 0, 0];
            for b in 0..3 {
                for idx in 0..block_length {
                    try_enqueue(&sets[b], idx, &mut queues[b], &mut q_sizes[b]);
                }
            }

            let mut stack_size = 0;
            while q_sizes.iter().sum::<usize>() > 0 {
                macro_rules! drain(
                    (block $block:expr, others $a:expr, $b:expr) => {
                        while q_sizes[$block] > 0 {
                            q_sizes[$block] -= 1;
                            let mut ki = queues[$block][q_sizes[$block]];
                            if sets[$block][ki.index].count == 0 {
                                continue;
                            }

                            // Record the peeled edge with its global slot id,
                            // then remove it from the two other blocks.
                            ki.index += $block * block_length;
                            stack[stack_size] = ki;
                            stack_size += 1;
                            for j in [$a, $b] {
                                let idx = block_index(ki.hash, j, block_length);
                                sets[j][idx].mask ^= ki.hash;
                                sets[j][idx].count -= 1;
                                try_enqueue(&sets[j], idx, &mut queues[j], &mut q_sizes[j]);
                            }
                        }
                    };
                );

                drain!(block 0, others 1, 2);
                drain!(block 1, others 0, 2);
                drain!(block 2, others 0, 1);
            }

            if stack_size == num_keys {
                done = true;
                break;
            }

            // The hypergraph was not peelable; reset and retry.
            for block in sets.iter_mut() {
                for set in block.iter_mut() {
                    *set = HSet::default();
                }
            }
            seed = splitmix64(&mut rng);
        }
        if !done {
            return Err(Error::KeysLikelyNotUnique);
        }
        self.seed = seed;

        // Assign fingerprints in reverse peel order (Algorithm 4): the popped
        // slot is still vacant while its two peer slots are already final.
        for ki in stack.iter().rev() {
            let h0 = block_index(ki.hash, 0, block_length);
            let h1 = block_index(ki.hash, 1, block_length) + block_length;
            let h2 = block_index(ki.hash, 2, block_length) + 2 * block_length;
            let (other1, other2) = if ki.index < block_length {
                (h1, h2)
            } else if ki.index < 2 * block_length {
                (h0, h2)
            } else {
                (h0, h1)
            };
            self.fingerprints[ki.index] = F::from_hash(fingerprint(ki.hash))
                ^ self.fingerprints[other1]
                ^ self.fingerprints[other2];
        }
        Ok(())
    }

    /// [`populate`](Xor::populate) from a slice of distinct keys.
    pub fn populate_from_slice(&mut self, keys: &[u64]) -> Result<(), Error> {
        self.populate(keys.iter().copied())
    }

    /// Allocates and populates in one step. Can be used directly if you
    /// don't have a contiguous array of u64 keys.
    pub fn try_from_iterator<K>(keys: K) -> Result<Self, Error>
    where
        K: ExactSizeIterator<Item = u64> + Clone,
    {
        let mut filter = Self::new(keys.len())?;
        filter.populate(keys)?;
        Ok(filter)
    }
}

impl<F: Fingerprint> Filter<u64> for Xor<F> {
    /// Returns `true` if the filter probably contains the specified key.
    /// Has no false negatives.
    fn contains(&self, key: &u64) -> bool {
        let hash = mix(*key, self.seed);
        let h0 = block_index(hash, 0, self.block_length);
        let h1 = block_index(hash, 1, self.block_length) + self.block_length;
        let h2 = block_index(hash, 2, self.block_length) + 2 * self.block_length;
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

impl<F: Fingerprint> TryFrom<&[u64]> for Xor<F> {
    type Error = Error;

    fn try_from(keys: &[u64]) -> Result<Self, Self::Error> {
        Self::try_from_iterator(keys.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<&Vec<u64>> for Xor<F> {
    type Error = Error;

    fn try_from(v: &Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<Vec<u64>> for Xor<F> {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use crate::{Error, Filter, Xor16, Xor32, Xor8};
    use alloc::vec::Vec;
    use core::mem;
    use rand::Rng;
    use std::collections::hash_map::DefaultHasher;

    #[test]
    fn test_initialization() {
        const SAMPLE_SIZE: usize = 10_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = Xor8::try_from(&keys).unwrap();

        for key in keys {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_bits_per_entry() {
        const SAMPLE_SIZE: usize = 10_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = Xor8::try_from(&keys).unwrap();
        let bpe = (filter.len() as f64) * 8.0 / (SAMPLE_SIZE as f64);

        assert!(bpe < 10., "Bits per entry is {}", bpe);
    }

    #[test]
    fn test_false_positives() {
        const SAMPLE_SIZE: usize = 10_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = Xor8::try_from(&keys).unwrap();

        const NEGATIVES: usize = 1_000_000;
        let false_positives: usize = (0..NEGATIVES)
            .map(|_| rng.gen())
            .filter(|n| filter.contains(n))
            .count();
        let fp_rate: f64 = (false_positives * 100) as f64 / NEGATIVES as f64;
        assert!(fp_rate < 0.43, "False positive rate is {}", fp_rate);
    }

    #[test]
    fn test_geometry_for_10k_keys() {
        let keys: Vec<u64> = (0..10_000).collect();
        let filter = Xor8::try_from(&keys).unwrap();

        assert_eq!(filter.block_length, 4110);
        assert_eq!(filter.fingerprints.len(), 3 * 4110);
        assert_eq!(filter.size_in_bytes(), 3 * 4110 + mem::size_of::<Xor8>());

        for key in [1u64, 5, 9, 1234] {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_wide_fingerprints() {
        let keys: Vec<u64> = (0..10_000).collect();
        let filter = Xor16::try_from(&keys).unwrap();

        assert_eq!(filter.fingerprints.len(), 3 * 4110);
        assert_eq!(
            filter.size_in_bytes(),
            3 * 4110 * 2 + mem::size_of::<Xor16>()
        );
        for key in keys {
            assert!(filter.contains(&key));
        }

        let mut rng = rand::thread_rng();
        const NEGATIVES: usize = 1_000_000;
        let false_positives: usize = (0..NEGATIVES)
            .map(|_| rng.gen())
            .filter(|n| filter.contains(n))
            .count();
        let fp_rate: f64 = (false_positives * 100) as f64 / NEGATIVES as f64;
        assert!(fp_rate < 0.01, "False positive rate is {}", fp_rate);
    }

    #[test]
    fn test_xor32_false_positives_vanish() {
        let keys: Vec<u64> = (0..10_000).collect();
        let filter = Xor32::try_from(&keys).unwrap();
        for key in &keys {
            assert!(filter.contains(key));
        }

        let mut rng = rand::thread_rng();
        let false_positives: usize = (0..1_000_000)
            .map(|_| rng.gen())
            .filter(|n| filter.contains(n))
            .count();
        assert!(
            false_positives <= 1,
            "observed {} false positives",
            false_positives
        );
    }

    #[test]
    fn test_two_phase_construction() {
        let keys: Vec<u64> = (0..50_000).map(|i| i * 7 + 1).collect();

        let mut filter = Xor8::new(keys.len()).unwrap();
        filter.populate_from_slice(&keys).unwrap();

        for key in keys {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_deterministic_construction() {
        let keys: Vec<u64> = (0..20_000).map(|i| i * 31).collect();

        let a = Xor16::try_from(&keys).unwrap();
        let b = Xor16::try_from(&keys).unwrap();

        assert_eq!(a.seed, b.seed);
        assert_eq!(a.fingerprints, b.fingerprints);
    }

    #[test]
    fn test_undersized_filter_reports_failure() {
        let keys: Vec<u64> = (0..1000).collect();

        let mut filter = Xor8::new(10).unwrap();
        assert_eq!(
            filter.populate_from_slice(&keys),
            Err(Error::KeysLikelyNotUnique)
        );
    }

    #[test]
    fn test_populate_after_dedup() {
        let mut keys: Vec<u64> = (0..10_000).map(|i| i % 1_000).collect();
        let unique = crate::dedup::auto_unique::<_, DefaultHasher>(&mut keys);
        assert_eq!(unique.len(), 1_000);

        let mut filter = Xor8::new(unique.len()).unwrap();
        filter.populate(unique.iter().copied()).unwrap();
        for key in 0..1_000 {
            assert!(filter.contains(&key));
        }
    }
}
