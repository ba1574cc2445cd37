//! # DID and CID derivation
//!
//! Content addressing for signed operations. A CID is CIDv1 with the
//! dag-cbor codec and a SHA-256 multihash, rendered as base32-lower
//! multibase. A DID is `did:plc:` plus the first 24 base32 characters of
//! the signed genesis digest. The 24-character truncation is fixed by the
//! protocol.

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::multicodec;
use crate::operation::{SignedEntry, SignedOperation, SignedTombstone};

// CIDv1, dag-cbor (0x71), sha2-256 (0x12), 32-byte digest (0x20).
const CID_PREFIX: [u8; 4] = [0x01, 0x71, 0x12, 0x20];

/// Length of the method-specific identifier in a `did:plc`.
pub const DID_SUFFIX_LEN: usize = 24;

// CID of already-encoded signed operation bytes.
fn cid_for_bytes(encoded: &[u8]) -> String {
    let digest = Sha256::digest(encoded);
    let mut bytes = Vec::with_capacity(CID_PREFIX.len() + digest.len());
    bytes.extend_from_slice(&CID_PREFIX);
    bytes.extend_from_slice(&digest);
    multicodec::encode_base32(&bytes)
}

/// Derive the CID naming a signed operation.
///
/// # Errors
///
/// Returns an error if the operation fails to encode.
pub fn derive_cid(signed: &SignedOperation) -> Result<String> {
    Ok(cid_for_bytes(&signed.encode_full()?))
}

/// Derive the `did:plc` identifier from a signed genesis operation.
///
/// The digest is taken over the *signed* encoding; the first 24 characters
/// of its base32 form become the method-specific identifier.
///
/// # Errors
///
/// Returns an error if the operation fails to encode.
pub fn derive_did(signed_genesis: &SignedOperation) -> Result<String> {
    let digest = Sha256::digest(signed_genesis.encode_full()?);
    let encoded = multicodec::base32_lower(&digest);
    Ok(format!("did:plc:{}", &encoded[..DID_SUFFIX_LEN]))
}

impl SignedEntry {
    /// The CID naming this entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry fails to encode.
    pub fn cid(&self) -> Result<String> {
        Ok(cid_for_bytes(&self.encode_full()?))
    }
}

impl SignedTombstone {
    /// The CID naming this tombstone.
    ///
    /// # Errors
    ///
    /// Returns an error if the tombstone fails to encode.
    pub fn cid(&self) -> Result<String> {
        Ok(cid_for_bytes(&self.encode_full()?))
    }
}
