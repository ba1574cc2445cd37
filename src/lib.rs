//! # did:plc Client
//!
//! A client library for the PLC DID method used by the AT Protocol
//! ecosystem. It creates, updates, rotates keys for, and deactivates
//! `did:plc:*` identifiers by constructing signed operations, deriving DIDs
//! and content identifiers from them, and submitting them to a PLC
//! directory.
//!
//! Key encoding over secp256k1, P-256, and Ed25519 lives in [`key`] and
//! [`multicodec`]. Deterministic DAG-CBOR encoding lives in [`dagcbor`],
//! the operation model and signing in [`operation`], and DID/CID
//! derivation in [`cid`].
//!
//! [`manager::DidManager`] drives the operation chain end to end against a
//! [`directory::Directory`] and a [`store::KeyStore`]. HTTP and file-backed
//! implementations of both are included.
//!
//! See <https://web.plc.directory/spec/v0.1/did-plc> for the method
//! specification.

pub mod canonical;
pub mod cid;
pub mod dagcbor;
pub mod directory;
pub mod document;
mod error;
pub mod key;
pub mod manager;
pub mod multicodec;
pub mod operation;
pub mod store;

pub use directory::{Directory, LastOperation, PlcDirectory, DEFAULT_DIRECTORY};
pub use document::Document;
pub use error::{Error, OperationReason, Result};
pub use key::Keypair;
pub use manager::{
    CreateResult, DeactivateOutcome, DidManager, RotationResult, UpdateChanges,
};
pub use multicodec::Curve;
pub use operation::{
    Operation, PlcService, SignedEntry, SignedOperation, SignedTombstone, Tombstone,
};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore, StoredDid, StoredKey};
