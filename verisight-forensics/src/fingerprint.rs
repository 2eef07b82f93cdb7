/*!
Content fingerprints for normalized images
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ForensicsError;

/// Length of a fingerprint in bytes (BLAKE3 output size).
pub const FINGERPRINT_LEN: usize = blake3::OUT_LEN;

/// Fixed-length content hash of a normalized image.
///
/// Two submissions that normalize to the same pixels and metadata share a
/// fingerprint, which makes it the cache key for finished reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageFingerprint([u8; FINGERPRINT_LEN]);

impl ImageFingerprint {
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash a finished hasher state into a fingerprint.
    pub(crate) fn from_hasher(hasher: &blake3::Hasher) -> Self {
        Self(*hasher.finalize().as_bytes())
    }

    /// Fingerprint arbitrary content. Mostly useful for tests and tooling
    /// that key reports by something other than pixels.
    pub fn of_content(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex rendering (64 characters).
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    pub fn from_hex(hex: &str) -> Result<Self, ForensicsError> {
        blake3::Hash::from_hex(hex.trim())
            .map(|hash| Self(*hash.as_bytes()))
            .map_err(|_| ForensicsError::InvalidFingerprint(hex.to_string()))
    }
}

impl fmt::Display for ImageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ImageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageFingerprint({})", self.short())
    }
}

impl FromStr for ImageFingerprint {
    type Err = ForensicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ImageFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ImageFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip_preserves_bytes() {
        let fingerprint = ImageFingerprint::of_content(b"sample");
        let parsed: ImageFingerprint = fingerprint.to_hex().parse().unwrap();
        assert_eq!(parsed, fingerprint);
        assert_eq!(fingerprint.to_hex().len(), 64);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(ImageFingerprint::from_hex("abc").is_err());
        assert!(ImageFingerprint::from_hex(&"z".repeat(64)).is_err());
    }

    #[test]
    fn short_form_is_a_prefix() {
        let fingerprint = ImageFingerprint::of_content(b"prefix");
        assert!(fingerprint.to_hex().starts_with(&fingerprint.short()));
        assert_eq!(fingerprint.short().len(), 12);
    }
}
