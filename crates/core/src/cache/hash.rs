//! Content-addressed cache key generation.
//!
//! A [`Digest`] is both an entry's file name and its routing key in the tree.
//! Directory names of internal nodes are digests too (range upper bounds), so
//! routing never compares values of different widths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::Error;

/// Width of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Width of a digest rendered as hex.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// SHA-256 digest of a cache key, ordered by numeric value.
///
/// Byte-wise ordering of the big-endian array is the numeric ordering, and
/// also the lexicographic ordering of the lowercase hex form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Lowest value of the keyspace.
    pub const MIN: Digest = Digest([0x00; DIGEST_LEN]);

    /// Highest value of the keyspace.
    pub const MAX: Digest = Digest([0xff; DIGEST_LEN]);

    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// `floor((self + high) / 2)`, i.e. `self + (high - self) / 2` when `self <= high`.
    pub fn midpoint(self, high: Digest) -> Digest {
        let mut sum = [0u8; DIGEST_LEN];
        let mut carry = 0u16;
        for ((slot, a), b) in sum.iter_mut().zip(self.0).zip(high.0).rev() {
            let total = u16::from(a) + u16::from(b) + carry;
            *slot = (total & 0xff) as u8;
            carry = total >> 8;
        }

        // 257-bit sum shifted right by one; the carry becomes the top bit.
        let mut out = [0u8; DIGEST_LEN];
        let mut shifted_in = carry as u8;
        for (slot, byte) in out.iter_mut().zip(sum) {
            *slot = (shifted_in << 7) | (byte >> 1);
            shifted_in = byte & 1;
        }
        Digest(out)
    }

    /// `self + 1`, or `None` at [`Digest::MAX`].
    pub fn successor(self) -> Option<Digest> {
        let mut out = self.0;
        for byte in out.iter_mut().rev() {
            if *byte == 0xff {
                *byte = 0;
            } else {
                *byte += 1;
                return Some(Digest(out));
            }
        }
        None
    }
}

/// Compute the digest addressing `key` in the cache.
pub fn digest_key(key: &str) -> Digest {
    let hash = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; DIGEST_LEN];
    bytes.copy_from_slice(&hash);
    Digest(bytes)
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = Error;

    /// Parses only the canonical form: 64 lowercase hex characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_HEX_LEN || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::InvalidDigest(s.to_string()));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::InvalidDigest(s.to_string()))?;
        Ok(Digest(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
