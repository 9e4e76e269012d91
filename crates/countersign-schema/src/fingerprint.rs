use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in hex digits of a SHA-1 certificate fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = 40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("fingerprint must be {FINGERPRINT_HEX_LEN} hex digits, got {0}")]
    Length(usize),
    #[error("fingerprint contains non-hex character '{0}'")]
    NonHex(char),
}

/// SHA-1 digest of a certificate's DER encoding.
///
/// Always held in canonical form: 40 uppercase hex digits, no separators.
/// Both the trust store and the provisioning manifest go through
/// [`Fingerprint::parse`] or [`Fingerprint::of_der`], so comparisons are
/// plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Normalize a fingerprint as printed by any tool. Accepts upper or lower
    /// case and ignores `:`, space, and `-` separators.
    pub fn parse(input: &str) -> Result<Self, FingerprintError> {
        let mut out = String::with_capacity(FINGERPRINT_HEX_LEN);
        for c in input.chars() {
            if matches!(c, ':' | ' ' | '-') {
                continue;
            }
            if !c.is_ascii_hexdigit() {
                return Err(FingerprintError::NonHex(c));
            }
            out.push(c.to_ascii_uppercase());
        }
        if out.len() != FINGERPRINT_HEX_LEN {
            return Err(FingerprintError::Length(out.len()));
        }
        Ok(Self(out))
    }

    /// Fingerprint of a DER-encoded certificate.
    pub fn of_der(der: &[u8]) -> Self {
        Self(hex::encode_upper(Sha1::digest(der)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
