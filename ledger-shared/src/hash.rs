use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit hash used to identify blocks and transactions. Serializes as its
/// lowercase hex encoding so it round-trips byte-for-byte through the same
/// canonical JSON the hash is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the SHA-256 hash of `data`.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Returns the lowercase hex encoding, the form used everywhere on the wire.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True if the hex encoding begins with `prefix` (the difficulty prefix, e.g. `"0000"`).
    #[must_use]
    pub fn meets_difficulty(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<&str> for Hash256 {
    type Error = hex::FromHexError;

    fn try_from(hex_str: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash256::try_from(s.as_str()).map_err(DeError::custom)
    }
}

/// Hashes the canonical JSON encoding of `value`: object keys sorted
/// lexicographically at every nesting level, no extraneous whitespace. This is
/// the hash preimage used for both transaction ids and block hashes, so any
/// two implementations serializing the same logical value must agree
/// byte-for-byte.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized to JSON.
pub fn canonical_json_sha256<T: Serialize>(value: &T) -> serde_json::Result<Hash256> {
    // Round-tripping through `Value` (a `BTreeMap`-backed object by default)
    // sorts keys at every level without requiring callers to hand-order struct
    // fields.
    let as_value = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&as_value)?;
    Ok(Hash256::sha256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_displays_as_64_zero_chars() {
        let hash = Hash256::zero();
        assert_eq!(hash.to_string(), "0".repeat(64));
    }

    #[test]
    fn sha256_of_data_is_nonzero() {
        let hash = Hash256::sha256(b"hello world");
        assert_ne!(hash, Hash256::zero());
    }

    #[test]
    fn sha256_is_deterministic() {
        let a = Hash256::sha256(b"same input");
        let b = Hash256::sha256(b"same input");
        assert_eq!(a, b);
    }

    #[test]
    fn difficulty_prefix_check() {
        let hash = Hash256::zero();
        assert!(hash.meets_difficulty("0000"));
        assert!(!Hash256::sha256(b"nonzero").meets_difficulty("ffff"));
    }

    #[test]
    fn round_trips_through_hex() {
        let hash = Hash256::sha256(b"round trip me");
        let hex = hash.to_hex();
        let parsed = Hash256::try_from(hex.as_str()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn serializes_as_hex_json_string_not_byte_array() {
        let hash = Hash256::sha256(b"serialize me");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        #[derive(Serialize)]
        struct Unsorted {
            z: u32,
            a: u32,
        }
        #[derive(Serialize)]
        struct Sorted {
            a: u32,
            z: u32,
        }
        let unsorted = Unsorted { z: 1, a: 2 };
        let sorted = Sorted { a: 2, z: 1 };
        assert_eq!(
            canonical_json_sha256(&unsorted).unwrap(),
            canonical_json_sha256(&sorted).unwrap()
        );
    }
}
