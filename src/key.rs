//! # Keys
//!
//! Key generation, multibase encoding, and signing over the three curves
//! the PLC method admits. A [`Keypair`] is a value type: generated from the
//! operating system's secure randomness, encoded to multibase for
//! persistence, decoded back on demand, and never mutated.
//!
//! Signing takes the hex-encoded SHA-256 digest of the payload, not the
//! payload itself. Output form by curve: secp256k1 is compact IEEE-P1363
//! `r || s` with a low-S scalar, P-256 is a DER `SEQUENCE{r, s}` (low-S
//! applied identically), and Ed25519 is the raw 64-byte `R || S` of
//! RFC 8032.

use std::fmt::{self, Debug, Formatter};

use anyhow::anyhow;
use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::OsRng;

use crate::error::{Error, Result};
use crate::multicodec::{self, Curve, Multicodec};

/// Prefix of a `did:key` identifier.
pub const DID_KEY_PREFIX: &str = "did:key:";

/// A signing or verification key on one of the supported curves.
///
/// The secret component is optional: keys decoded from their public
/// multibase form can verify but not sign.
#[derive(Clone)]
pub enum Keypair {
    /// ECDSA over secp256k1. The curve PLC rotation keys use.
    Secp256k1 {
        /// Private scalar, absent for public-only keys.
        secret: Option<k256::SecretKey>,
        /// Public point.
        public: k256::PublicKey,
    },

    /// ECDSA over NIST P-256.
    P256 {
        /// Private scalar, absent for public-only keys.
        secret: Option<p256::SecretKey>,
        /// Public point.
        public: p256::PublicKey,
    },

    /// EdDSA over edwards25519. The curve PLC verification methods use.
    Ed25519 {
        /// Signing key, absent for public-only keys.
        secret: Option<ed25519_dalek::SigningKey>,
        /// Verifying key.
        public: ed25519_dalek::VerifyingKey,
    },
}

impl Keypair {
    /// Generate a fresh keypair on the given curve.
    ///
    /// EC scalars are rejection-sampled into `[1, n-1]` by the underlying
    /// implementation; Ed25519 takes 32 uniform seed bytes.
    #[must_use]
    pub fn generate(curve: Curve) -> Self {
        match curve {
            Curve::Secp256k1 => {
                let secret = k256::SecretKey::random(&mut OsRng);
                Self::Secp256k1 { public: secret.public_key(), secret: Some(secret) }
            }
            Curve::P256 => {
                let secret = p256::SecretKey::random(&mut OsRng);
                Self::P256 { public: secret.public_key(), secret: Some(secret) }
            }
            Curve::Ed25519 => {
                let secret = ed25519_dalek::SigningKey::generate(&mut OsRng);
                Self::Ed25519 { public: secret.verifying_key(), secret: Some(secret) }
            }
        }
    }

    /// The curve this key lives on.
    #[must_use]
    pub const fn curve(&self) -> Curve {
        match self {
            Self::Secp256k1 { .. } => Curve::Secp256k1,
            Self::P256 { .. } => Curve::P256,
            Self::Ed25519 { .. } => Curve::Ed25519,
        }
    }

    /// `true` when the secret component is present.
    #[must_use]
    pub fn is_private(&self) -> bool {
        match self {
            Self::Secp256k1 { secret, .. } => secret.is_some(),
            Self::P256 { secret, .. } => secret.is_some(),
            Self::Ed25519 { secret, .. } => secret.is_some(),
        }
    }

    // Compressed SEC1 form for EC curves (33 bytes), encoded point for
    // Ed25519 (32 bytes).
    fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::Secp256k1 { public, .. } => public.to_encoded_point(true).as_bytes().to_vec(),
            Self::P256 { public, .. } => public.to_encoded_point(true).as_bytes().to_vec(),
            Self::Ed25519 { public, .. } => public.to_bytes().to_vec(),
        }
    }

    fn private_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Secp256k1 { secret, .. } => secret.as_ref().map(|s| s.to_bytes().to_vec()),
            Self::P256 { secret, .. } => secret.as_ref().map(|s| s.to_bytes().to_vec()),
            Self::Ed25519 { secret, .. } => secret.as_ref().map(|s| s.to_bytes().to_vec()),
        }
    }

    /// The public key as a `z`-prefixed multibase string.
    #[must_use]
    pub fn encode_public(&self) -> String {
        let codec = Multicodec { curve: self.curve(), private: false };
        multicodec::encode_key(codec, &self.public_bytes())
    }

    /// The private key as a `z`-prefixed multibase string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAPrivateKey`] when the key is public-only.
    pub fn encode_private(&self) -> Result<String> {
        let Some(bytes) = self.private_bytes() else {
            return Err(Error::NotAPrivateKey(self.encode_public()));
        };
        let codec = Multicodec { curve: self.curve(), private: true };
        Ok(multicodec::encode_key(codec, &bytes))
    }

    /// The key's `did:key` form: `did:key:` plus the public multibase
    /// encoding.
    #[must_use]
    pub fn did_key(&self) -> String {
        format!("{DID_KEY_PREFIX}{}", self.encode_public())
    }

    /// Decode a public multibase string into a public-only keypair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMultibase`] if the string does not decode
    /// to a public key of the tagged curve, or [`Error::UnsupportedCurve`]
    /// for an unknown tag.
    pub fn from_public(mbstr: &str) -> Result<Self> {
        let (codec, bytes) = multicodec::decode_key(mbstr)?;
        if codec.private {
            return Err(Error::MalformedMultibase(format!(
                "expected a public-key tag in {mbstr}"
            )));
        }

        match codec.curve {
            Curve::Secp256k1 => {
                let public = k256::PublicKey::from_sec1_bytes(&bytes).map_err(|e| {
                    Error::MalformedMultibase(format!("invalid secp256k1 public key: {e}"))
                })?;
                Ok(Self::Secp256k1 { secret: None, public })
            }
            Curve::P256 => {
                let public = p256::PublicKey::from_sec1_bytes(&bytes).map_err(|e| {
                    Error::MalformedMultibase(format!("invalid p256 public key: {e}"))
                })?;
                Ok(Self::P256 { secret: None, public })
            }
            Curve::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    Error::MalformedMultibase("ed25519 public key is not 32 bytes".into())
                })?;
                let public = ed25519_dalek::VerifyingKey::from_bytes(&arr).map_err(|e| {
                    Error::MalformedMultibase(format!("invalid ed25519 public key: {e}"))
                })?;
                Ok(Self::Ed25519 { secret: None, public })
            }
        }
    }

    /// Decode a private multibase string into a full keypair, deriving the
    /// public component.
    ///
    /// Historically mis-encoded stores carry a public-key tag on private
    /// material; the curve is taken from the tag and the payload is read as
    /// a private scalar either way. Encoders always emit the correct tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMultibase`] if the payload is not a valid
    /// private scalar for the tagged curve, or [`Error::UnsupportedCurve`]
    /// for an unknown tag.
    pub fn from_private(mbstr: &str) -> Result<Self> {
        let (codec, bytes) = multicodec::decode_key(mbstr)?;

        match codec.curve {
            Curve::Secp256k1 => {
                let secret = k256::SecretKey::from_slice(&bytes).map_err(|e| {
                    Error::MalformedMultibase(format!("invalid secp256k1 private key: {e}"))
                })?;
                Ok(Self::Secp256k1 { public: secret.public_key(), secret: Some(secret) })
            }
            Curve::P256 => {
                let secret = p256::SecretKey::from_slice(&bytes).map_err(|e| {
                    Error::MalformedMultibase(format!("invalid p256 private key: {e}"))
                })?;
                Ok(Self::P256 { public: secret.public_key(), secret: Some(secret) })
            }
            Curve::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    Error::MalformedMultibase("ed25519 private key is not 32 bytes".into())
                })?;
                let secret = ed25519_dalek::SigningKey::from_bytes(&arr);
                Ok(Self::Ed25519 { public: secret.verifying_key(), secret: Some(secret) })
            }
        }
    }

    /// Decode a `did:key` identifier into a public-only keypair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedMultibase`] when the `did:key:` prefix is
    /// missing, plus any error from [`Self::from_public`].
    pub fn from_did_key(did_key: &str) -> Result<Self> {
        let Some(mbstr) = did_key.strip_prefix(DID_KEY_PREFIX) else {
            return Err(Error::MalformedMultibase(format!(
                "expected {DID_KEY_PREFIX} prefix on {did_key}"
            )));
        };
        Self::from_public(mbstr)
    }

    /// Sign a hex-encoded SHA-256 digest, returning the hex-encoded
    /// signature in the curve's output form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAPrivateKey`] on a public-only key, or an error
    /// when the digest is not valid hex or the underlying signer fails.
    pub fn sign(&self, digest_hex: &str) -> Result<String> {
        let digest =
            hex::decode(digest_hex).map_err(|e| anyhow!("digest is not valid hex: {e}"))?;

        match self {
            Self::Secp256k1 { secret, .. } => {
                let Some(secret) = secret else {
                    return Err(Error::NotAPrivateKey(self.encode_public()));
                };
                let signing_key = k256::ecdsa::SigningKey::from(secret);
                let signature: k256::ecdsa::Signature = signing_key
                    .sign_prehash(&digest)
                    .map_err(|e| anyhow!("secp256k1 signing failed: {e}"))?;
                // normalize to low-S form
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(hex::encode(signature.to_bytes()))
            }
            Self::P256 { secret, .. } => {
                let Some(secret) = secret else {
                    return Err(Error::NotAPrivateKey(self.encode_public()));
                };
                let signing_key = p256::ecdsa::SigningKey::from(secret);
                let signature: p256::ecdsa::Signature = signing_key
                    .sign_prehash(&digest)
                    .map_err(|e| anyhow!("p256 signing failed: {e}"))?;
                let signature = signature.normalize_s().unwrap_or(signature);
                Ok(hex::encode(signature.to_der().as_bytes()))
            }
            Self::Ed25519 { secret, .. } => {
                let Some(secret) = secret else {
                    return Err(Error::NotAPrivateKey(self.encode_public()));
                };
                // RFC 8032 has no prehash in this profile: the digest bytes
                // are the message
                let signature = secret.sign(&digest);
                Ok(hex::encode(signature.to_bytes()))
            }
        }
    }

    /// Verify a hex-encoded signature (in the curve's output form) over a
    /// hex-encoded SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns an error when either input fails to decode or the signature
    /// does not verify under this key.
    pub fn verify(&self, digest_hex: &str, sig_hex: &str) -> Result<()> {
        let digest =
            hex::decode(digest_hex).map_err(|e| anyhow!("digest is not valid hex: {e}"))?;
        let sig = hex::decode(sig_hex).map_err(|e| anyhow!("signature is not valid hex: {e}"))?;

        match self {
            Self::Secp256k1 { public, .. } => {
                let verifying_key = k256::ecdsa::VerifyingKey::from(public);
                let signature = k256::ecdsa::Signature::from_slice(&sig)
                    .map_err(|e| anyhow!("signature is not compact r||s form: {e}"))?;
                verifying_key
                    .verify_prehash(&digest, &signature)
                    .map_err(|e| anyhow!("secp256k1 verification failed: {e}").into())
            }
            Self::P256 { public, .. } => {
                let verifying_key = p256::ecdsa::VerifyingKey::from(public);
                let signature = p256::ecdsa::Signature::from_der(&sig)
                    .map_err(|e| anyhow!("signature is not DER form: {e}"))?;
                verifying_key
                    .verify_prehash(&digest, &signature)
                    .map_err(|e| anyhow!("p256 verification failed: {e}").into())
            }
            Self::Ed25519 { public, .. } => {
                let signature = ed25519_dalek::Signature::from_slice(&sig)
                    .map_err(|e| anyhow!("signature is not 64 bytes: {e}"))?;
                public
                    .verify_strict(&digest, &signature)
                    .map_err(|e| anyhow!("ed25519 verification failed: {e}").into())
            }
        }
    }

    /// Strip the secret component, leaving a verification-only key.
    #[must_use]
    pub fn to_public(&self) -> Self {
        match self {
            Self::Secp256k1 { public, .. } => Self::Secp256k1 { secret: None, public: *public },
            Self::P256 { public, .. } => Self::P256 { secret: None, public: *public },
            Self::Ed25519 { public, .. } => Self::Ed25519 { secret: None, public: *public },
        }
    }
}

impl Debug for Keypair {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("curve", &self.curve())
            .field("public", &self.encode_public())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use sha2::{Digest, Sha256};

    use super::*;

    const CURVES: [Curve; 3] = [Curve::Secp256k1, Curve::P256, Curve::Ed25519];

    fn digest_hex(msg: &[u8]) -> String {
        hex::encode(Sha256::digest(msg))
    }

    #[test]
    fn round_trip_all_curves() {
        for curve in CURVES {
            let key = Keypair::generate(curve);
            assert!(key.is_private());

            let public = Keypair::from_public(&key.encode_public()).expect("should decode");
            assert_eq!(public.curve(), curve);
            assert_eq!(public.encode_public(), key.encode_public());
            assert!(!public.is_private());

            let private = Keypair::from_private(&key.encode_private().expect("should encode"))
                .expect("should decode");
            assert_eq!(private.curve(), curve);
            assert_eq!(
                private.encode_private().expect("should encode"),
                key.encode_private().expect("should encode")
            );
            // the public component re-derives to the same point
            assert_eq!(private.encode_public(), key.encode_public());
        }
    }

    #[test]
    fn sign_verify_all_curves() {
        let digest = digest_hex(b"an operation payload");
        for curve in CURVES {
            let key = Keypair::generate(curve);
            let sig = key.sign(&digest).expect("should sign");
            key.verify(&digest, &sig).expect("should verify");

            let other = Keypair::generate(curve);
            other.verify(&digest, &sig).expect_err("wrong key should fail");
        }
    }

    #[test]
    fn secp256k1_low_s() {
        let key = Keypair::generate(Curve::Secp256k1);
        for i in 0..16 {
            let digest = digest_hex(format!("message {i}").as_bytes());
            let sig_hex = key.sign(&digest).expect("should sign");
            assert_eq!(sig_hex.len(), 128, "compact r||s is 64 bytes");

            let bytes = hex::decode(&sig_hex).expect("should decode");
            let sig = k256::ecdsa::Signature::from_slice(&bytes).expect("should parse");
            assert!(sig.normalize_s().is_none(), "s must already be low");
        }
    }

    #[test]
    fn p256_low_s_der() {
        let key = Keypair::generate(Curve::P256);
        for i in 0..16 {
            let digest = digest_hex(format!("message {i}").as_bytes());
            let sig_hex = key.sign(&digest).expect("should sign");

            let bytes = hex::decode(&sig_hex).expect("should decode");
            let sig = p256::ecdsa::Signature::from_der(&bytes).expect("should parse DER");
            assert!(sig.normalize_s().is_none(), "s must already be low");
        }
    }

    #[test]
    fn ed25519_deterministic() {
        let key = Keypair::generate(Curve::Ed25519);
        let digest = digest_hex(b"same message");
        let first = key.sign(&digest).expect("should sign");
        let second = key.sign(&digest).expect("should sign");
        assert_eq!(first, second);
        assert_eq!(first.len(), 128, "raw R||S is 64 bytes");
    }

    #[test]
    fn ec_signatures_all_verify() {
        // ECDSA output may differ across calls; every signature must
        // verify
        let key = Keypair::generate(Curve::Secp256k1);
        let digest = digest_hex(b"repeated message");
        for _ in 0..4 {
            let sig = key.sign(&digest).expect("should sign");
            key.verify(&digest, &sig).expect("should verify");
        }
    }

    #[test]
    fn public_only_cannot_sign() {
        let key = Keypair::generate(Curve::Secp256k1).to_public();
        let digest = digest_hex(b"payload");

        let err = key.sign(&digest).expect_err("signing should fail");
        assert!(matches!(err, Error::NotAPrivateKey(_)));

        let err = key.encode_private().expect_err("encoding should fail");
        assert!(matches!(err, Error::NotAPrivateKey(_)));
    }

    #[test]
    fn legacy_public_tag_on_private_material() {
        // historically mis-encoded stores tag private scalars as public keys
        for curve in CURVES {
            let key = Keypair::generate(curve);
            let scalar = match &key {
                Keypair::Secp256k1 { secret, .. } =>
                    secret.as_ref().expect("generated").to_bytes().to_vec(),
                Keypair::P256 { secret, .. } =>
                    secret.as_ref().expect("generated").to_bytes().to_vec(),
                Keypair::Ed25519 { secret, .. } =>
                    secret.as_ref().expect("generated").to_bytes().to_vec(),
            };

            let mislabelled =
                multicodec::encode_key(Multicodec { curve, private: false }, &scalar);
            let decoded = Keypair::from_private(&mislabelled).expect("legacy decode");
            assert_eq!(decoded.encode_public(), key.encode_public());
        }
    }

    #[test]
    fn did_key_form() {
        let key = Keypair::generate(Curve::Ed25519);
        let did_key = key.did_key();
        assert!(did_key.starts_with("did:key:z"));

        let decoded = Keypair::from_did_key(&did_key).expect("should decode");
        assert_eq!(decoded.encode_public(), key.encode_public());

        let err = Keypair::from_did_key("did:web:example.com").expect_err("should fail");
        assert!(matches!(err, Error::MalformedMultibase(_)));
    }
}
