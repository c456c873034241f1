//! Lexicographic ordering of decrypted values
//!
//! Unsigned byte-wise comparison over the common prefix; on a tie the
//! shorter value sorts first. Lengths are always explicit, so embedded
//! zero bytes are ordinary data.

use crate::outcome::Outcome;

/// Compare two plaintexts
#[inline]
pub fn compare(a: &[u8], b: &[u8]) -> Outcome {
    let n = a.len().min(b.len());

    for i in 0..n {
        if a[i] != b[i] {
            return if a[i] < b[i] { Outcome::Less } else { Outcome::Greater };
        }
    }

    Outcome::from(a.len().cmp(&b.len()))
}
