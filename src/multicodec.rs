//! # Multibase / Multicodec
//!
//! Self-describing encodings for key material and content addresses. Key
//! strings are base58btc with a `z` multibase prefix and a two-byte
//! multicodec tag ahead of the raw key bytes; CIDs and DID suffixes use
//! lowercase unpadded base32.

use std::fmt::{self, Display, Formatter};

use multibase::Base;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Multicodec tag for a secp256k1 public key.
pub const SECP256K1_PUB: [u8; 2] = [0xe7, 0x01];
/// Multicodec tag for a secp256k1 private key.
pub const SECP256K1_PRIV: [u8; 2] = [0x81, 0x26];
/// Multicodec tag for a NIST P-256 public key.
pub const P256_PUB: [u8; 2] = [0x80, 0x24];
/// Multicodec tag for a NIST P-256 private key.
pub const P256_PRIV: [u8; 2] = [0x06, 0x26];
/// Multicodec tag for an Ed25519 public key.
pub const ED25519_PUB: [u8; 2] = [0xed, 0x01];
/// Multicodec tag for an Ed25519 private key.
pub const ED25519_PRIV: [u8; 2] = [0x80, 0x26];

/// Curves supported by the PLC method.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Curve {
    /// ECDSA over secp256k1.
    Secp256k1,

    /// ECDSA over NIST P-256.
    P256,

    /// EdDSA over edwards25519.
    Ed25519,
}

impl Display for Curve {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp256k1 => write!(f, "secp256k1"),
            Self::P256 => write!(f, "p256"),
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// A decoded multicodec tag: the curve plus a public/private discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Multicodec {
    /// The curve the tag names.
    pub curve: Curve,

    /// `true` when the tag names private key material.
    pub private: bool,
}

impl Multicodec {
    /// The two-byte tag for this codec.
    #[must_use]
    pub const fn tag(&self) -> [u8; 2] {
        match (self.curve, self.private) {
            (Curve::Secp256k1, false) => SECP256K1_PUB,
            (Curve::Secp256k1, true) => SECP256K1_PRIV,
            (Curve::P256, false) => P256_PUB,
            (Curve::P256, true) => P256_PRIV,
            (Curve::Ed25519, false) => ED25519_PUB,
            (Curve::Ed25519, true) => ED25519_PRIV,
        }
    }

    /// Match a two-byte tag to a known codec.
    #[must_use]
    pub const fn from_tag(tag: [u8; 2]) -> Option<Self> {
        match tag {
            SECP256K1_PUB => Some(Self { curve: Curve::Secp256k1, private: false }),
            SECP256K1_PRIV => Some(Self { curve: Curve::Secp256k1, private: true }),
            P256_PUB => Some(Self { curve: Curve::P256, private: false }),
            P256_PRIV => Some(Self { curve: Curve::P256, private: true }),
            ED25519_PUB => Some(Self { curve: Curve::Ed25519, private: false }),
            ED25519_PRIV => Some(Self { curve: Curve::Ed25519, private: true }),
            _ => None,
        }
    }
}

/// Encode `tag || raw` as a `z`-prefixed base58btc multibase string.
#[must_use]
pub fn encode_key(codec: Multicodec, raw: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(2 + raw.len());
    bytes.extend_from_slice(&codec.tag());
    bytes.extend_from_slice(raw);
    multibase::encode(Base::Base58Btc, bytes)
}

/// Decode a multibase key string into its codec and raw key bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedMultibase`] if the string has no `z` prefix,
/// fails base58btc decoding, or is too short to carry a tag and key.
/// Returns [`Error::UnsupportedCurve`] when the two-byte tag is unknown.
pub fn decode_key(mbstr: &str) -> Result<(Multicodec, Vec<u8>)> {
    let (base, bytes) =
        multibase::decode(mbstr).map_err(|e| Error::MalformedMultibase(format!("{mbstr}: {e}")))?;
    if base != Base::Base58Btc {
        return Err(Error::MalformedMultibase(format!(
            "expected base58btc ('z') prefix on {mbstr}"
        )));
    }
    if bytes.len() <= 2 {
        return Err(Error::MalformedMultibase(format!("payload too short in {mbstr}")));
    }

    let tag = [bytes[0], bytes[1]];
    let Some(codec) = Multicodec::from_tag(tag) else {
        return Err(Error::UnsupportedCurve(format!(
            "unknown multicodec tag {:02x} {:02x}",
            tag[0], tag[1]
        )));
    };

    Ok((codec, bytes[2..].to_vec()))
}

/// Multibase base32-lower encoding (RFC 4648 lowercase, no padding, `b`
/// prefix). Used for CIDs.
#[must_use]
pub fn encode_base32(bytes: &[u8]) -> String {
    multibase::encode(Base::Base32Lower, bytes)
}

/// Bare base32-lower encoding without the multibase prefix. Used for the
/// DID suffix.
#[must_use]
pub fn base32_lower(bytes: &[u8]) -> String {
    let encoded = multibase::encode(Base::Base32Lower, bytes);
    encoded[1..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_leading_zeros() {
        // each leading 0x00 byte contributes one leading '1' character
        let encoded = multibase::encode(Base::Base58Btc, [0x00, 0x00, 0x61]);
        assert_eq!(encoded, "z112g");
    }

    #[test]
    fn base32_zero_digest() {
        let suffix = base32_lower(&[0u8; 32]);
        assert_eq!(suffix.len(), 52);
        assert!(suffix.chars().all(|c| c == 'a'));
    }

    #[test]
    fn key_round_trip() {
        let codec = Multicodec { curve: Curve::Secp256k1, private: false };
        let raw = [7u8; 33];

        let encoded = encode_key(codec, &raw);
        assert!(encoded.starts_with('z'));

        let (decoded, bytes) = decode_key(&encoded).expect("should decode");
        assert_eq!(decoded, codec);
        assert_eq!(bytes, raw);
    }

    #[test]
    fn unknown_tag() {
        let encoded = multibase::encode(Base::Base58Btc, [0x12, 0x34, 0x01, 0x02, 0x03]);
        let err = decode_key(&encoded).expect_err("tag should be rejected");
        assert!(matches!(err, Error::UnsupportedCurve(_)));
    }

    #[test]
    fn wrong_prefix() {
        // base32 prefix where base58btc is required
        let encoded = multibase::encode(Base::Base32Lower, [0xe7, 0x01, 0x07]);
        let err = decode_key(&encoded).expect_err("prefix should be rejected");
        assert!(matches!(err, Error::MalformedMultibase(_)));

        let err = decode_key("not-multibase").expect_err("garbage should be rejected");
        assert!(matches!(err, Error::MalformedMultibase(_)));
    }

    #[test]
    fn short_payload() {
        let encoded = multibase::encode(Base::Base58Btc, [0xe7, 0x01]);
        let err = decode_key(&encoded).expect_err("tag with no key should be rejected");
        assert!(matches!(err, Error::MalformedMultibase(_)));
    }
}
