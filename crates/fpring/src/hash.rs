//! Content identity for arrays.

use ndarray::{ArrayBase, Data, Dimension};
use sha1::{Digest, Sha1};

/// Element types with a fixed little-endian byte encoding.
pub trait LeBytes: Copy {
    /// Feed the little-endian bytes of `self` to the hasher.
    fn feed(self, hasher: &mut Sha1);
}

macro_rules! impl_le_bytes {
    ($($t:ty),*) => {
        $(impl LeBytes for $t {
            #[inline]
            fn feed(self, hasher: &mut Sha1) {
                hasher.update(self.to_le_bytes());
            }
        })*
    };
}

impl_le_bytes!(f64, f32, u8, u16, u32, u64, i8, i16, i32, i64);

/// SHA-1 hex digest of the array's elements in logical row-major order.
///
/// Memory layout does not matter: a transposed view hashes like its
/// standard-layout copy. Shape and element type are not part of the digest.
pub fn array_hash<S, D>(array: &ArrayBase<S, D>) -> String
where
    S: Data,
    S::Elem: LeBytes,
    D: Dimension,
{
    let mut hasher = Sha1::new();
    for &v in array.iter() {
        v.feed(&mut hasher);
    }
    format!("{:x}", hasher.finalize())
}
