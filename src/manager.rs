//! # DID manager
//!
//! Drives the PLC operation state machine (create, update, rotate,
//! deactivate) against a [`Directory`] and a [`KeyStore`]. The directory
//! enforces a linear log per DID, so callers must not run two concurrent
//! operations on the same DID; distinct DIDs are independent.
//!
//! Local persistence strictly follows directory acceptance: a record is
//! never written (and rotated keys are never replaced) until the directory
//! has accepted the operation that makes it true.

use std::collections::BTreeMap;

use anyhow::anyhow;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::cid;
use crate::directory::{Directory, LastOperation};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::key::Keypair;
use crate::multicodec::Curve;
use crate::operation::{Operation, PlcService, SignedEntry, Tombstone};
use crate::store::{KeyStore, StoredDid, StoredKey};

/// Service id of the subject's personal data server.
pub const ATPROTO_PDS_ID: &str = "atproto_pds";

/// Output of a `create` operation.
#[derive(Clone, Debug)]
pub struct CreateResult {
    /// The newly registered DID.
    pub did: String,

    /// The rotation keypair now authorized for the DID.
    pub rotation_key: Keypair,

    /// The published verification keypair.
    pub verification_key: Keypair,

    /// The handle registered, if any.
    pub handle: Option<String>,

    /// The PDS endpoint registered, if any.
    pub service_endpoint: Option<String>,
}

/// Output of a `rotate_keys` operation.
#[derive(Clone, Debug)]
pub struct RotationResult {
    /// The DID whose keys were rotated.
    pub did: String,

    /// The incoming rotation keypair.
    pub rotation_key: Keypair,

    /// The incoming verification keypair.
    pub verification_key: Keypair,

    /// CID of the rotation operation.
    pub cid: String,
}

/// Changes applied by an `update` operation.
#[derive(Clone, Debug, Default)]
pub struct UpdateChanges {
    /// Replace the handle: the sole `alsoKnownAs` entry becomes
    /// `at://<handle>`.
    pub handle: Option<String>,

    /// Overwrite the `atproto_pds` service endpoint.
    pub service_endpoint: Option<String>,
}

/// How a `deactivate` ended up retiring the DID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeactivateOutcome {
    /// The directory accepted a tombstone.
    Tombstoned,

    /// The tombstone was rejected; an all-empty operation was accepted
    /// instead.
    SoftDeactivated,
}

/// Drives the PLC operation state machine.
pub struct DidManager<D, S> {
    directory: D,
    store: S,
}

impl<D: Directory, S: KeyStore> DidManager<D, S> {
    /// A manager over the given directory and key store.
    pub const fn new(directory: D, store: S) -> Self {
        Self { directory, store }
    }

    /// The directory this manager submits to.
    pub const fn directory(&self) -> &D {
        &self.directory
    }

    /// The key store this manager persists to.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Register a new DID.
    ///
    /// Generates a secp256k1 rotation key and an Ed25519 verification key,
    /// builds and signs the genesis operation, derives the DID, submits,
    /// and only then persists both keypairs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the directory rejects the genesis
    /// operation; nothing is persisted in that case.
    pub async fn create(
        &self, handle: Option<&str>, service_endpoint: Option<&str>,
    ) -> Result<CreateResult> {
        let rotation_key = Keypair::generate(Curve::Secp256k1);
        let verification_key = Keypair::generate(Curve::Ed25519);

        let mut operation = Operation::new();
        operation.rotation_keys = vec![rotation_key.clone()];
        operation
            .verification_methods
            .insert(verification_method_id(&verification_key), verification_key.clone());
        if let Some(handle) = handle {
            operation.also_known_as = vec![format!("at://{handle}")];
        }
        if let Some(endpoint) = service_endpoint {
            operation.services.insert(ATPROTO_PDS_ID.to_string(), PlcService::pds(endpoint));
        }
        operation.validate()?;

        let signed = operation.sign(&rotation_key)?;
        let did = cid::derive_did(&signed)?;

        self.directory.create_did(&signed.to_wire()).await?;
        info!(%did, "registered did:plc");

        self.store.put(StoredDid::new(
            &did,
            StoredKey {
                private: rotation_key.encode_private()?,
                public: rotation_key.encode_public(),
            },
            StoredKey {
                private: verification_key.encode_private()?,
                public: verification_key.encode_public(),
            },
        ))?;

        Ok(CreateResult {
            did,
            rotation_key,
            verification_key,
            handle: handle.map(ToString::to_string),
            service_endpoint: service_endpoint.map(ToString::to_string),
        })
    }

    /// Apply handle and/or service changes to an active DID.
    ///
    /// The current state is rebuilt from the resolved document and the last
    /// operation, the changes are applied, and the result is chained to the
    /// head via `prev` and signed with the locally held rotation key.
    ///
    /// Returns the CID of the accepted operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] (before any network call) when
    /// the store has no rotation key for the DID, and [`Error::Directory`]
    /// if the directory rejects the operation, including a stale `prev`, in
    /// which case the caller may refetch and retry.
    pub async fn update(&self, did: &str, changes: UpdateChanges) -> Result<String> {
        let rotation_key = self.local_rotation_key(did)?;

        let document = self.directory.resolve_did(did).await?;
        let last = self.head(did).await?;

        let mut operation = reconstruct(did, &document, &last)?;
        if let Some(handle) = &changes.handle {
            // replace the list wholesale, never append
            operation.also_known_as = vec![format!("at://{handle}")];
        }
        if let Some(endpoint) = &changes.service_endpoint {
            operation.services.insert(ATPROTO_PDS_ID.to_string(), PlcService::pds(endpoint));
        }
        operation.prev = Some(last.cid.clone());
        operation.validate()?;

        let signed = operation.sign(&rotation_key)?;
        self.directory.update_did(did, &signed.to_wire()).await?;

        let cid = cid::derive_cid(&signed)?;
        info!(%did, %cid, "updated did:plc");
        Ok(cid)
    }

    /// Replace both the rotation and verification keys of an active DID.
    ///
    /// The operation is signed with the *outgoing* rotation key. The
    /// incoming key has no authority until the directory accepts the
    /// operation that introduces it. The stored keys are replaced only
    /// after acceptance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] when the store has no rotation
    /// key for the DID, and [`Error::Directory`] on rejection; the stored
    /// keys are untouched in that case.
    pub async fn rotate_keys(&self, did: &str, reason: Option<&str>) -> Result<RotationResult> {
        let outgoing = self.local_rotation_key(did)?;

        let document = self.directory.resolve_did(did).await?;
        let last = self.head(did).await?;

        let rotation_key = Keypair::generate(Curve::Secp256k1);
        let verification_key = Keypair::generate(Curve::Ed25519);

        let mut operation = reconstruct(did, &document, &last)?;
        operation.rotation_keys = vec![rotation_key.clone()];
        operation.verification_methods = BTreeMap::from([(
            verification_method_id(&verification_key),
            verification_key.clone(),
        )]);
        operation.prev = Some(last.cid.clone());
        operation.validate()?;

        let signed = operation.sign(&outgoing)?;
        self.directory.update_did(did, &signed.to_wire()).await?;

        self.store.update_keys(
            did,
            StoredKey {
                private: rotation_key.encode_private()?,
                public: rotation_key.encode_public(),
            },
            StoredKey {
                private: verification_key.encode_private()?,
                public: verification_key.encode_public(),
            },
        )?;
        if let Some(reason) = reason {
            let mut metadata = serde_json::Map::new();
            metadata.insert("rotationReason".to_string(), json!(reason));
            self.store.update_metadata(did, metadata)?;
        }

        let cid = cid::derive_cid(&signed)?;
        info!(%did, %cid, "rotated keys");
        Ok(RotationResult { did: did.to_string(), rotation_key, verification_key, cid })
    }

    /// Permanently retire a DID.
    ///
    /// A tombstone is attempted first. If the directory rejects it, the
    /// fallback is a soft deactivation: a `plc_operation` with empty
    /// rotation keys, verification methods, handles, and services. Either
    /// way the stored record is marked deactivated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] when the store has no rotation
    /// key for the DID, and [`Error::Directory`] when both paths are
    /// rejected or the transport fails.
    pub async fn deactivate(&self, did: &str) -> Result<DeactivateOutcome> {
        let rotation_key = self.local_rotation_key(did)?;
        let last = self.head(did).await?;

        let tombstone = Tombstone::new(last.cid.clone()).sign(&rotation_key)?;
        match self.directory.update_did(did, &tombstone.to_wire()).await {
            Ok(_) => {
                self.store.deactivate(did)?;
                info!(%did, "tombstoned did:plc");
                Ok(DeactivateOutcome::Tombstoned)
            }
            Err(Error::Directory { status: Some(status), message }) => {
                debug!(status, message = %message, "tombstone rejected, soft-deactivating");

                // the all-empty shape `validate` rejects; built directly
                let mut operation = Operation::new();
                operation.prev = Some(last.cid.clone());
                let signed = operation.sign(&rotation_key)?;

                self.directory.update_did(did, &signed.to_wire()).await?;
                self.store.deactivate(did)?;
                info!(%did, "soft-deactivated did:plc");
                Ok(DeactivateOutcome::SoftDeactivated)
            }
            Err(e) => Err(e),
        }
    }

    // The locally held rotation key. Checked before any network call.
    fn local_rotation_key(&self, did: &str) -> Result<Keypair> {
        let Some(record) = self.store.get(did)? else {
            return Err(Error::MissingLocalKey(did.to_string()));
        };
        Keypair::from_private(&record.rotation_key.private)
    }

    async fn head(&self, did: &str) -> Result<LastOperation> {
        self.directory
            .last_operation(did)
            .await?
            .ok_or_else(|| Error::Directory {
                status: None,
                message: format!("directory has no operations for {did}"),
            })
    }
}

// Method id for a verification key: `fair_` plus the first six hex
// characters of the SHA-256 of its public multibase encoding.
fn verification_method_id(key: &Keypair) -> String {
    let digest = hex::encode(Sha256::digest(key.encode_public().as_bytes()));
    format!("fair_{}", &digest[..6])
}

// Rebuild operation state: verification methods, handles, and services
// come from the resolved document; rotation keys come from the last
// operation, since the document does not carry them.
fn reconstruct(did: &str, document: &Document, last: &LastOperation) -> Result<Operation> {
    let SignedEntry::Operation(head) = &last.operation else {
        return Err(anyhow!("{did} is tombstoned; no further operations are accepted").into());
    };

    let mut verification_methods = BTreeMap::new();
    for vm in &document.verification_method {
        let Some(multibase) = &vm.public_key_multibase else {
            continue;
        };
        verification_methods.insert(vm.fragment().to_string(), Keypair::from_public(multibase)?);
    }

    let services = document
        .service
        .iter()
        .map(|s| {
            (s.fragment().to_string(), PlcService {
                type_: s.type_.clone(),
                endpoint: s.service_endpoint.clone(),
            })
        })
        .collect();

    let mut operation = Operation::new();
    operation.rotation_keys = head.operation().rotation_keys.clone();
    operation.verification_methods = verification_methods;
    operation.also_known_as = document.also_known_as.clone();
    operation.services = services;
    Ok(operation)
}
