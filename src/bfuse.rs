//! Implements binary fuse filters.
//!
//! The construction follows the revised fuse design: three consecutive
//! power-of-two segments per key, bucket-sorted key addition, and a peel that
//! tracks each slot's incidence count and edge-role in a packed counter.

use crate::error::Error;
use crate::hash::{fingerprint, mix};
use crate::peel::{fingerprint_block, try_block, MAX_ITERATIONS};
use crate::splitmix64::splitmix64;
use crate::{Filter, Fingerprint};
use alloc::{boxed::Box, vec::Vec};
use libm::{floor, fmax, log, round};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "bincode")]
use bincode::{Decode, Encode};

const ARITY: u32 = 3;
const MAX_SEGMENT_LENGTH: u32 = 262_144;

/// First state of the retry-seed stream.
const RETRY_STREAM: u64 = 0x726b_2b9d_438b_9d4d;

#[inline]
fn derive_segment_length(size: u32) -> u32 {
    if size == 0 {
        return 4;
    }
    1 << (floor(log(size as f64) / log(3.33_f64) + 2.25) as u32)
}

#[inline]
fn derive_size_factor(size: u32) -> f64 {
    fmax(1.125_f64, 0.875 + 0.25 * log(1_000_000_f64) / log(size as f64))
}

/// The three slot indexes of a hash: one per consecutive segment, with the
/// intra-segment position taken from separate bits of the hash.
#[inline]
const fn hash_of_hash(
    hash: u64,
    segment_length: u32,
    segment_length_mask: u32,
    segment_count_length: u32,
) -> (u32, u32, u32) {
    let hi = ((hash as u128 * segment_count_length as u128) >> 64) as u64;
    let h0 = hi as u32;
    let mut h1 = h0 + segment_length;
    let mut h2 = h1 + segment_length;
    h1 ^= ((hash >> 18) as u32) & segment_length_mask;
    h2 ^= (hash as u32) & segment_length_mask;
    (h0, h1, h2)
}

#[inline]
const fn mod3(x: u8) -> u8 {
    if x > 2 {
        x - 3
    } else {
        x
    }
}

/// Binary fuse filter over `F`-width fingerprints.
///
/// A binary fuse filter is an xor-like filter with the fingerprints arranged
/// in a binary-partitioned [fuse graph]. It reaches a ≈0.879 fill factor like
/// a classical [`Fuse`](crate::Fuse), but works on arbitrarily small key sets
/// — sizes 0 and 1 included — and absorbs duplicate keys during construction
/// instead of failing on them. A [`BinaryFuse8`] uses ≈9 bits per entry with
/// a false positive rate of ≈0.39%; a [`BinaryFuse16`] ≈18 bits at <0.002%.
///
/// ```
/// use xorfuse::{BinaryFuse8, Filter};
/// use rand::Rng;
///
/// let mut rng = rand::thread_rng();
/// const SAMPLE_SIZE: usize = 1_000_000;
/// let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();
/// let filter = BinaryFuse8::try_from(&keys).unwrap();
///
/// // no false negatives
/// for key in keys {
///     assert!(filter.contains(&key));
/// }
///
/// // bits per entry
/// let bpe = (filter.len() as f64) * 8.0 / (SAMPLE_SIZE as f64);
/// assert!(bpe < 9.1, "Bits per entry is {}", bpe);
/// ```
///
/// Serializing and deserializing binary fuse filters can be enabled with the
/// `serde` feature (or `bincode` for bincode); the public fields are the
/// complete reconstruction surface for callers that roll their own encoding.
///
/// [fuse graph]: https://arxiv.org/abs/1907.04749
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "bincode", derive(Encode, Decode))]
#[derive(Debug, Clone)]
pub struct BinaryFuse<F: 'static> {
    /// The seed that produced a peelable hypergraph.
    pub seed: u64,
    /// Length of one segment; a power of two, at most 262,144.
    pub segment_length: u32,
    /// `segment_length - 1`.
    pub segment_length_mask: u32,
    /// Number of addressable segments; keys spill into the two segments past
    /// the last addressable one.
    pub segment_count: u32,
    /// `segment_count * segment_length`.
    pub segment_count_length: u32,
    /// The fingerprints, `(segment_count + 2) * segment_length` of them.
    pub fingerprints: Box<[F]>,
}

/// Binary fuse filter with 8-bit fingerprints (≈0.39% false positives).
pub type BinaryFuse8 = BinaryFuse<u8>;
/// Binary fuse filter with 16-bit fingerprints (<0.002% false positives).
pub type BinaryFuse16 = BinaryFuse<u16>;
/// Binary fuse filter with 32-bit fingerprints (≈2^-32 false positives).
pub type BinaryFuse32 = BinaryFuse<u32>;

impl<F: Fingerprint> BinaryFuse<F> {
    /// Allocates a filter sized for `capacity` keys.
    ///
    /// The segment length grows with `log(capacity)` up to 2^18 and the
    /// total slot count is `capacity` times an empirically derived factor of
    /// at least 1.125; the filter contains nothing until
    /// [`populate`](BinaryFuse::populate) runs.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let size = capacity as u32;
        let segment_length = derive_segment_length(size).min(MAX_SEGMENT_LENGTH);
        let segment_length_mask = segment_length - 1;
        let slots = if size > 1 {
            round(size as f64 * derive_size_factor(size)) as u32
        } else {
            0
        };
        let init_segment_count = (slots + segment_length - 1) / segment_length;
        let segment_count = if init_segment_count < ARITY {
            1
        } else {
            init_segment_count - (ARITY - 1)
        };
        let array_len = ((segment_count + ARITY - 1) * segment_length) as usize;
        let segment_count_length = segment_count * segment_length;

        Ok(Self {
            seed: 0,
            segment_length,
            segment_length_mask,
            segment_count,
            segment_count_length,
            fingerprints: fingerprint_block(array_len)?,
        })
    }

    /// One-shot construction from a restartable key iterator.
    ///
    /// Construction rescans the keys once per seed retry by cloning the
    /// iterator, so every clone must yield the same keys in the same order.
    /// Unlike the xor and fuse constructors, duplicate keys are detected and
    /// absorbed; the key count should match the `capacity` given to
    /// [`BinaryFuse::new`].
    pub fn populate<K>(&mut self, keys: K) -> Result<(), Error>
    where
        K: ExactSizeIterator<Item = u64> + Clone,
    {
        let mut rng = RETRY_STREAM;
        let size = keys.len();
        if size == 0 {
            self.seed = splitmix64(&mut rng);
            return Ok(());
        }

        let capacity = self.fingerprints.len();
        let segment_length = self.segment_length;

        // `reverse_order` holds the bucket-sorted hashes during addition and
        // is reused as the peel stack; the extra slot is a non-zero sentinel
        // that stops the bucket probe.
        let mut reverse_order: Box<[u64]> = try_block(size + 1)?;
        reverse_order[size] = 1;
        let mut reverse_h: Box<[u8]> = try_block(size)?;
        let mut alone: Box<[u32]> = try_block(capacity)?;
        // Incidence count in the upper 30 bits, xor of the incident edges'
        // slot-roles (0/1/2) in the low 2 bits.
        let mut t2count: Box<[u32]> = try_block(capacity)?;
        let mut t2hash: Box<[u64]> = try_block(capacity)?;

        let mut block_bits = 1;
        while (1u32 << block_bits) < self.segment_count {
            block_bits += 1;
        }
        let start_pos_len: usize = 1 << block_bits;
        let mut start_pos: Box<[usize]> = try_block(start_pos_len)?;

        let mut h012 = [0u32; 5];
        let mut seed = splitmix64(&mut rng);
        let mut done = false;
        let mut stack_size = 0;
        for _ in 0..MAX_ITERATIONS {
            // Order the keys by the top hash bits so that the counting pass
            // touches slots roughly in segment order. Buckets have uneven
            // sizes, hence the probe for a free slot.
            for (i, pos) in start_pos.iter_mut().enumerate() {
                *pos = ((i as u64 * size as u64) >> block_bits) as usize;
            }
            for key in keys.clone() {
                let hash = mix(key, seed);
                let mut segment_index = (hash >> (64 - block_bits)) as usize;
                while reverse_order[start_pos[segment_index]] != 0 {
                    segment_index += 1;
                    segment_index &= (1 << block_bits) - 1;
                }
                reverse_order[start_pos[segment_index]] = hash;
                start_pos[segment_index] += 1;
            }

            // Count slot incidences. A slot whose xor-ed hashes cancel back
            // to zero at count two signals the same hash added twice: roll
            // the edge back and remember the duplicate.
            let mut error = false;
            let mut duplicates = 0;
            for i in 0..size {
                let hash = reverse_order[i];
                let (h0, h1, h2) = hash_of_hash(
                    hash,
                    segment_length,
                    self.segment_length_mask,
                    self.segment_count_length,
                );
                let (h0, h1, h2) = (h0 as usize, h1 as usize, h2 as usize);

                t2count[h0] += 4;
                t2hash[h0] ^= hash;
                t2count[h1] += 4;
                t2count[h1] ^= 1;
                t2hash[h1] ^= hash;
                t2count[h2] += 4;
                t2count[h2] ^= 2;
                t2hash[h2] ^= hash;

                if t2hash[h0] & t2hash[h1] & t2hash[h2] == 0 {
                    if (t2hash[h0] == 0 && t2count[h0] == 8)
                        || (t2hash[h1] == 0 && t2count[h1] == 8)
                        || (t2hash[h2] == 0 && t2count[h2] == 8)
                    {
                        duplicates += 1;
                        t2count[h0] -= 4;
                        t2hash[h0] ^= hash;
                        t2count[h1] -= 4;
                        t2count[h1] ^= 1;
                        t2hash[h1] ^= hash;
                        t2count[h2] -= 4;
                        t2count[h2] ^= 2;
                        t2hash[h2] ^= hash;
                    }
                }

                // A count that fell below one incidence means the duplicate
                // signature fired on an edge that was not one; only a reseed
                // recovers.
                error = error || t2count[h0] < 4 || t2count[h1] < 4 || t2count[h2] < 4;
            }

            if !error {
                // Queue degree-1 slots and peel.
                let mut qsize = 0;
                for i in 0..capacity {
                    alone[qsize] = i as u32;
                    if t2count[i] >> 2 == 1 {
                        qsize += 1;
                    }
                }

                stack_size = 0;
                while qsize > 0 {
                    qsize -= 1;
                    let index = alone[qsize] as usize;
                    if t2count[index] >> 2 == 1 {
                        // The lone incident edge's role at this slot is what
                        // remains in the low bits.
                        let hash = t2hash[index];
                        let found = (t2count[index] & 3) as u8;
                        reverse_h[stack_size] = found;
                        reverse_order[stack_size] = hash;
                        stack_size += 1;

                        let (h0, h1, h2) = hash_of_hash(
                            hash,
                            segment_length,
                            self.segment_length_mask,
                            self.segment_count_length,
                        );
                        h012[1] = h1;
                        h012[2] = h2;
                        h012[3] = h0;
                        h012[4] = h012[1];

                        let other1 = h012[(found + 1) as usize] as usize;
                        alone[qsize] = other1 as u32;
                        if t2count[other1] >> 2 == 2 {
                            qsize += 1;
                        }
                        t2count[other1] -= 4;
                        t2count[other1] ^= mod3(found + 1) as u32;
                        t2hash[other1] ^= hash;

                        let other2 = h012[(found + 2) as usize] as usize;
                        alone[qsize] = other2 as u32;
                        if t2count[other2] >> 2 == 2 {
                            qsize += 1;
                        }
                        t2count[other2] -= 4;
                        t2count[other2] ^= mod3(found + 2) as u32;
                        t2hash[other2] ^= hash;
                    }
                }

                if stack_size + duplicates == size {
                    done = true;
                    break;
                }
            }

            // Failed attempt; reset the scratch (the probe sentinel stays)
            // and reseed.
            reverse_order[..size].fill(0);
            t2count.fill(0);
            t2hash.fill(0);
            seed = splitmix64(&mut rng);
        }
        if !done {
            return Err(Error::KeysLikelyNotUnique);
        }
        self.seed = seed;

        // Assign fingerprints in reverse peel order: the popped edge's role
        // slot is still vacant while its two peers are already final.
        for i in (0..stack_size).rev() {
            let hash = reverse_order[i];
            let fp = F::from_hash(fingerprint(hash));
            let (h0, h1, h2) = hash_of_hash(
                hash,
                segment_length,
                self.segment_length_mask,
                self.segment_count_length,
            );
            h012[0] = h0;
            h012[1] = h1;
            h012[2] = h2;
            h012[3] = h0;
            h012[4] = h1;

            let found = reverse_h[i] as usize;
            self.fingerprints[h012[found] as usize] = fp
                ^ self.fingerprints[h012[found + 1] as usize]
                ^ self.fingerprints[h012[found + 2] as usize];
        }
        Ok(())
    }

    /// [`populate`](BinaryFuse::populate) from a slice of keys; duplicates
    /// are allowed.
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

impl<F: Fingerprint> Filter<u64> for BinaryFuse<F> {
    /// Returns `true` if the filter probably contains the specified key.
    /// Has no false negatives.
    fn contains(&self, key: &u64) -> bool {
        let hash = mix(*key, self.seed);
        let (h0, h1, h2) = hash_of_hash(
            hash,
            self.segment_length,
            self.segment_length_mask,
            self.segment_count_length,
        );
        F::from_hash(fingerprint(hash))
            ^ self.fingerprints[h0 as usize]
            ^ self.fingerprints[h1 as usize]
            ^ self.fingerprints[h2 as usize]
            == F::default()
    }

    fn len(&self) -> usize {
        self.fingerprints.len()
    }

    fn size_in_bytes(&self) -> usize {
        self.fingerprints.len() * core::mem::size_of::<F>() + core::mem::size_of::<Self>()
    }
}

impl<F: Fingerprint> TryFrom<&[u64]> for BinaryFuse<F> {
    type Error = Error;

    fn try_from(keys: &[u64]) -> Result<Self, Self::Error> {
        Self::try_from_iterator(keys.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<&Vec<u64>> for BinaryFuse<F> {
    type Error = Error;

    fn try_from(v: &Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}

impl<F: Fingerprint> TryFrom<Vec<u64>> for BinaryFuse<F> {
    type Error = Error;

    fn try_from(v: Vec<u64>) -> Result<Self, Self::Error> {
        Self::try_from_iterator(v.iter().copied())
    }
}

#[cfg(test)]
mod test {
    use crate::{BinaryFuse16, BinaryFuse32, BinaryFuse8, Filter};
    use alloc::vec::Vec;
    use core::mem;
    use rand::Rng;

    #[test]
    fn test_initialization() {
        const SAMPLE_SIZE: usize = 1_000_000;
        let keys: Vec<u64> = (0..SAMPLE_SIZE as u64).collect();

        let filter = BinaryFuse8::try_from(&keys).unwrap();

        for key in keys {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_bits_per_entry() {
        const SAMPLE_SIZE: usize = 1_000_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = BinaryFuse8::try_from(&keys).unwrap();
        let bpe = (filter.len() as f64) * 8.0 / (SAMPLE_SIZE as f64);

        assert!(bpe < 9.1, "Bits per entry is {}", bpe);
    }

    #[test]
    fn test_false_positives() {
        const SAMPLE_SIZE: usize = 1_000_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = BinaryFuse8::try_from(&keys).unwrap();

        let false_positives: usize = (0..SAMPLE_SIZE)
            .map(|_| rng.gen())
            .filter(|n| filter.contains(n))
            .count();
        let fp_rate: f64 = (false_positives * 100) as f64 / SAMPLE_SIZE as f64;
        assert!(fp_rate < 0.42, "False positive rate is {}", fp_rate);
    }

    #[test]
    fn test_false_positives_16() {
        const SAMPLE_SIZE: usize = 1_000_000;
        let mut rng = rand::thread_rng();
        let keys: Vec<u64> = (0..SAMPLE_SIZE).map(|_| rng.gen()).collect();

        let filter = BinaryFuse16::try_from(&keys).unwrap();

        let false_positives: usize = (0..SAMPLE_SIZE)
            .map(|_| rng.gen())
            .filter(|n| filter.contains(n))
            .count();
        let fp_rate: f64 = (false_positives * 100) as f64 / SAMPLE_SIZE as f64;
        assert!(fp_rate < 0.0065, "False positive rate is {}", fp_rate);
    }

    #[test]
    fn test_false_positives_32_vanish() {
        let keys: Vec<u64> = (0..100_000).collect();
        let filter = BinaryFuse32::try_from(&keys).unwrap();
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
    fn test_degenerate_sizes() {
        for n in [0u64, 1, 2, 3, 10] {
            let keys: Vec<u64> = (0..n).map(|i| i * 999_983 + 7).collect();
            let filter = BinaryFuse8::try_from(&keys)
                .unwrap_or_else(|_| panic!("construction failed for {} keys", n));
            for key in &keys {
                assert!(filter.contains(key));
            }
        }
    }

    #[test]
    fn test_empty_filter_lookup() {
        let filter = BinaryFuse8::try_from(&Vec::new()).unwrap();
        assert_eq!(filter.len(), 12);
        let _ = filter.contains(&1);
    }

    #[test]
    fn test_duplicate_keys_are_absorbed() {
        let keys: Vec<u64> = [303, 1, 77, 31, 241, 303].to_vec();

        let filter = BinaryFuse8::try_from(&keys).unwrap();

        for key in [303u64, 1, 77, 31, 241] {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_many_keys_with_duplicates() {
        let mut keys: Vec<u64> = (0..1336).collect();
        keys.push(0);
        assert_eq!(keys.len(), 1337);

        let filter = BinaryFuse8::try_from(&keys).unwrap();

        for key in 0..1336 {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_geometry() {
        let keys: Vec<u64> = (0..10_000).collect();
        let filter = BinaryFuse8::try_from(&keys).unwrap();

        assert!(filter.segment_length.is_power_of_two());
        assert!(filter.segment_length <= 262_144);
        assert_eq!(filter.segment_length_mask + 1, filter.segment_length);
        assert_eq!(
            filter.segment_count_length,
            filter.segment_count * filter.segment_length
        );
        assert_eq!(
            filter.fingerprints.len(),
            ((filter.segment_count + 2) * filter.segment_length) as usize
        );
        assert_eq!(
            filter.size_in_bytes(),
            filter.fingerprints.len() + mem::size_of::<BinaryFuse8>()
        );
    }

    #[test]
    fn test_two_phase_construction() {
        let keys: Vec<u64> = (0..100_000).map(|i| i * 3 + 5).collect();

        let mut filter = BinaryFuse16::new(keys.len()).unwrap();
        filter.populate_from_slice(&keys).unwrap();

        for key in keys {
            assert!(filter.contains(&key));
        }
    }

    #[test]
    fn test_deterministic_construction() {
        let keys: Vec<u64> = (0..50_000).map(|i| i * 13).collect();

        let a = BinaryFuse8::try_from(&keys).unwrap();
        let b = BinaryFuse8::try_from(&keys).unwrap();

        assert_eq!(a.seed, b.seed);
        assert_eq!(a.fingerprints, b.fingerprints);
    }
}
