//! Scratch shared by the peeling constructors.

use crate::error::Error;
use crate::fingerprint::Fingerprint;
use alloc::{boxed::Box, vec::Vec};

/// Seed attempts before a constructor gives up.
pub(crate) const MAX_ITERATIONS: usize = 100;

/// A slot in the construction array. The keys mapped to the slot are encoded
/// by xor into the mask, so a slot with `count == 1` holds its key's hash
/// wholly.
#[derive(Default, Clone)]
pub(crate) struct HSet {
    pub(crate) count: u32,
    pub(crate) mask: u64,
}

/// The hash of a peeled key and the slot it was peeled from.
#[derive(Default, Copy, Clone)]
pub(crate) struct KeyIndex {
    pub(crate) hash: u64,
    pub(crate) index: usize,
}

/// Queues a slot once its count drops to a single key.
#[inline]
pub(crate) fn try_enqueue(
    sets: &[HSet],
    idx: usize,
    queue: &mut [KeyIndex],
    queue_size: &mut usize,
) {
    if sets[idx].count == 1 {
        queue[*queue_size] = KeyIndex {
            index: idx,
            hash: sets[idx].mask,
        };
        *queue_size += 1;
    }
}

/// Allocates a zero-initialised block, reporting allocator exhaustion
/// instead of aborting.
pub(crate) fn try_block<T: Default + Clone>(len: usize) -> Result<Box<[T]>, Error> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed)?;
    block.resize(len, T::default());
    Ok(block.into_boxed_slice())
}

/// Allocates the long-lived fingerprint block.
///
/// Slots no key is ever assigned to keep their initial value. With the
/// `uniform-random` feature that value is random rather than zero, which
/// keeps keys whose fingerprint happens to be zero from matching every
/// unused slot triple.
pub(crate) fn fingerprint_block<F: Fingerprint>(len: usize) -> Result<Box<[F]>, Error> {
    #[cfg(feature = "uniform-random")]
    {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let mut block = Vec::new();
        block
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed)?;
        for _ in 0..len {
            block.push(F::from_hash(rng.gen()));
        }
        Ok(block.into_boxed_slice())
    }

    #[cfg(not(feature = "uniform-random"))]
    {
        try_block(len)
    }
}

/// Checks that a collection of keys has all distinct values.
#[cfg(debug_assertions)]
pub(crate) fn all_distinct(keys: impl IntoIterator<Item = u64>) -> bool {
    let mut seen = alloc::collections::BTreeSet::new();
    keys.into_iter().all(move |k| seen.insert(k))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_block_zeroes() {
        let block: Box<[u64]> = try_block(16).unwrap();
        assert_eq!(block.len(), 16);
        assert!(block.iter().all(|&v| v == 0));
    }

    #[test]
    fn enqueue_only_single_key_slots() {
        let mut sets = [HSet::default(), HSet::default()];
        sets[0].count = 1;
        sets[0].mask = 0xfeed;
        sets[1].count = 2;

        let mut queue = [KeyIndex::default(); 2];
        let mut size = 0;
        try_enqueue(&sets, 0, &mut queue, &mut size);
        try_enqueue(&sets, 1, &mut queue, &mut size);

        assert_eq!(size, 1);
        assert_eq!(queue[0].index, 0);
        assert_eq!(queue[0].hash, 0xfeed);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn distinct_check() {
        assert!(all_distinct([1u64, 2, 3]));
        assert!(!all_distinct([1u64, 2, 1]));
    }
}
