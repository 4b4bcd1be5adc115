//! The fingerprint-width abstraction.

use core::ops::BitXor;

/// A *w*-bit fingerprint value, stored in an integer wide enough to hold it.
///
/// Filters are generic over their fingerprint: the width decides both the
/// memory per key and the false-positive rate, which is asymptotically
/// `2^-BITS`. The primitive unsigned integers implement full-width
/// fingerprints (`u8` for the common 8-bit case, up to `u64`); the
/// [`narrow_fingerprint!`](crate::narrow_fingerprint) macro defines types for
/// any width from 2 to 63 bits, rounding storage up to the chosen backing
/// integer.
pub trait Fingerprint: Copy + Default + PartialEq + BitXor<Output = Self> {
    /// The backing integer the fingerprint is stored in.
    type Storage;

    /// Number of significant bits.
    const BITS: u32;

    /// `(1 << BITS) - 1`, widened to 64 bits.
    const MASK: u64;

    /// Keeps the low [`BITS`](Fingerprint::BITS) bits of a folded hash.
    fn from_hash(hash: u64) -> Self;
}

macro_rules! primitive_fingerprint(
    ($($ty:ty),*) => {$(
        impl Fingerprint for $ty {
            type Storage = $ty;
            const BITS: u32 = <$ty>::BITS;
            const MASK: u64 = <$ty>::MAX as u64;

            #[inline]
            fn from_hash(hash: u64) -> Self {
                hash as $ty
            }
        }
    )*};
);

primitive_fingerprint!(u8, u16, u32, u64);

/// Defines a fingerprint type of an arbitrary width between 2 and 63 bits.
///
/// The value is stored in `$storage` (any unsigned primitive wide enough);
/// memory rounds up to that storage, but lookups compare only the low
/// `$bits` bits, so the type is useful when the caller bit-packs
/// fingerprints for serialisation.
///
/// ```
/// use xorfuse::{narrow_fingerprint, Filter, Fingerprint, Xor};
///
/// narrow_fingerprint!(F4, u8, 4);
/// assert_eq!(F4::MASK, 0b1111);
///
/// let keys: Vec<u64> = (0..1000).collect();
/// let filter: Xor<F4> = Xor::try_from(&keys).unwrap();
/// for key in keys {
///     assert!(filter.contains(&key));
/// }
/// ```
#[macro_export]
macro_rules! narrow_fingerprint(
    ($vis:vis $name:ident, $storage:ty, $bits:expr) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        #[repr(transparent)]
        $vis struct $name($storage);

        impl ::core::ops::BitXor for $name {
            type Output = Self;

            #[inline]
            fn bitxor(self, rhs: Self) -> Self {
                Self(self.0 ^ rhs.0)
            }
        }

        impl $crate::Fingerprint for $name {
            type Storage = $storage;
            const BITS: u32 = $bits;
            const MASK: u64 = (1u64 << $bits) - 1;

            #[inline]
            fn from_hash(hash: u64) -> Self {
                Self((hash & Self::MASK) as $storage)
            }
        }

        const _: () = assert!(
            $bits >= 2 && $bits < 64 && $bits <= <$storage>::BITS,
            "fingerprint width must be in 2..=63 and fit the storage type",
        );
    };
);
