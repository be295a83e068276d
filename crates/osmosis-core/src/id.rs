use std::fmt::{Debug, Display};
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::ExprError;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const UUID_LEN: usize = 26;

/// A 26-character, lexicographically orderable opaque identifier (ULID-shaped:
/// 48 bits of millisecond time followed by 80 bits of randomness, both
/// Crockford-base32 encoded). Used for peer/author ids and session ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Uuid([u8; UUID_LEN]);

impl Uuid {
    /// Generates a new id from the current wall-clock time plus secure
    /// randomness. Monotonic only to millisecond resolution; two ids minted
    /// in the same millisecond are ordered by their random suffix, which is
    /// fine since `Uuid` is an opaque author/session id, not a causal clock.
    pub fn new() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut rand_bytes = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut rand_bytes);
        Self::from_parts(millis, &rand_bytes)
    }

    fn from_parts(millis: u64, rand_bytes: &[u8; 10]) -> Self {
        let mut out = [0u8; UUID_LEN];
        encode_base32(millis, 10, &mut out[0..10]);
        let rand_value = u128::from_be_bytes({
            let mut buf = [0u8; 16];
            buf[6..16].copy_from_slice(rand_bytes);
            buf
        });
        encode_base32_u128(rand_value, 16, &mut out[10..26]);
        Uuid(out)
    }

    pub fn nil() -> Self {
        Uuid([b'0'; UUID_LEN])
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: every byte written by `encode_base32*` is one of CROCKFORD,
        // which is ASCII.
        std::str::from_utf8(&self.0).expect("uuid bytes are always ascii")
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_base32(mut value: u64, len: usize, out: &mut [u8]) {
    for i in (0..len).rev() {
        out[i] = CROCKFORD[(value & 0x1f) as usize];
        value >>= 5;
    }
}

fn encode_base32_u128(mut value: u128, len: usize, out: &mut [u8]) {
    for i in (0..len).rev() {
        out[i] = CROCKFORD[(value & 0x1f) as usize];
        value >>= 5;
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Uuid({})", self.as_str())
    }
}

impl FromStr for Uuid {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != UUID_LEN || !s.bytes().all(|b| CROCKFORD.contains(&b.to_ascii_uppercase())) {
            return Err(ExprError::Syntax(format!("invalid uuid: {s}")));
        }
        let mut out = [0u8; UUID_LEN];
        out.copy_from_slice(s.to_ascii_uppercase().as_bytes());
        Ok(Uuid(out))
    }
}

impl TryFrom<String> for Uuid {
    type Error = ExprError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Uuid> for String {
    fn from(value: Uuid) -> Self {
        value.as_str().to_string()
    }
}

/// Number of base-32 digits used to zero-pad `Timestamp::index` in the total
/// order string (`lpad(index, 11) + "@" + author`). 11 digits of base-32
/// comfortably exceeds `u32::MAX`.
const INDEX_PAD: usize = 11;

/// A causal timestamp: a monotonically increasing per-author counter.
///
/// Two timestamps with different authors are *concurrent* — this is not a
/// causal order, only a total order used for sorting the op log and
/// tie-breaking concurrent writes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub author: Uuid,
    pub index: u32,
}

impl Timestamp {
    pub fn new(author: Uuid, index: u32) -> Self {
        Timestamp { author, index }
    }

    pub fn zero() -> Self {
        Timestamp {
            author: Uuid::nil(),
            index: 0,
        }
    }

    /// The `lpad(index, 11) + "@" + author` string that defines the total
    /// order. Exposed so the Operation Log's binary search can compare
    /// without re-deriving it from scratch every call.
    pub fn total_order_key(&self) -> String {
        let mut index_digits = [0u8; INDEX_PAD];
        encode_base32(self.index as u64, INDEX_PAD, &mut index_digits);
        let mut key = String::with_capacity(INDEX_PAD + 1 + UUID_LEN);
        key.push_str(std::str::from_utf8(&index_digits).unwrap());
        key.push('@');
        key.push_str(self.author.as_str());
        key
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?}, {})", self.author, self.index)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.total_order_key().cmp(&other.total_order_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_round_trips_through_string() {
        let id = Uuid::new();
        let s = id.to_string();
        assert_eq!(s.len(), UUID_LEN);
        assert_eq!(s.parse::<Uuid>().unwrap(), id);
    }

    #[test]
    fn total_order_is_index_major_author_minor() {
        let a1 = Uuid::new();
        let a2 = Uuid::new();
        let lo = Timestamp::new(a1.min(a2), 5);
        let hi = Timestamp::new(a1.max(a2), 5);
        assert!(lo < hi || a1 == a2);

        let low_index = Timestamp::new(a1, 1);
        let high_index = Timestamp::new(a2, 2);
        assert!(low_index < high_index);
    }

    #[test]
    fn concurrent_timestamps_have_different_authors() {
        let a = Timestamp::new(Uuid::new(), 3);
        let b = Timestamp::new(Uuid::new(), 3);
        assert_ne!(a.author, b.author);
    }
}
