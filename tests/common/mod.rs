//! In-memory PLC directory used by the manager flow tests.
//!
//! Mimics the directory-side rules that matter to a client: DIDs derive
//! from the signed genesis, a submitted operation must chain to the current
//! head via `prev`, its signature must verify under the *previous* head's
//! rotation keys, and a tombstoned DID accepts nothing further.

use std::collections::HashMap;
use std::sync::Mutex;

use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use did_plc::document::{Document, Service, VerificationMethod};
use did_plc::{cid, Directory, Error, Keypair, LastOperation, Result, SignedEntry, Tombstone};

pub struct MockDirectory {
    // did -> [(cid, wire operation)]
    log: Mutex<HashMap<String, Vec<(String, Value)>>>,
    reject_tombstones: bool,
    reject_all: bool,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self { log: Mutex::new(HashMap::new()), reject_tombstones: false, reject_all: false }
    }

    /// A directory that refuses tombstones, forcing the soft-deactivation
    /// fallback.
    pub fn rejecting_tombstones() -> Self {
        Self { reject_tombstones: true, ..Self::new() }
    }

    /// A directory that refuses every submission.
    pub fn rejecting_all() -> Self {
        Self { reject_all: true, ..Self::new() }
    }

    /// Number of operations recorded for a DID.
    pub fn log_len(&self, did: &str) -> usize {
        self.log.lock().expect("mock lock").get(did).map_or(0, Vec::len)
    }
}

fn reject(status: u16, message: &str) -> Error {
    Error::Directory { status: Some(status), message: message.to_string() }
}

// The rotation keys authorized by a wire operation.
fn rotation_keys_of(wire: &Value) -> Vec<Keypair> {
    wire["rotationKeys"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|did_key| Keypair::from_did_key(did_key).ok())
        .collect()
}

// Verify a submitted entry's signature against a set of rotation keys.
fn signature_authorized(entry: &SignedEntry, rotation_keys: &[Keypair]) -> bool {
    let unsigned = match entry {
        SignedEntry::Operation(op) => op.operation().encode_for_signing(),
        SignedEntry::Tombstone(ts) => Tombstone::new(ts.prev()).encode_for_signing(),
    };
    let Ok(unsigned) = unsigned else { return false };
    let digest = hex::encode(Sha256::digest(&unsigned));

    let sig = match entry {
        SignedEntry::Operation(op) => op.sig(),
        SignedEntry::Tombstone(ts) => ts.sig(),
    };
    let Ok(raw) = Base64UrlUnpadded::decode_vec(sig) else { return false };
    let sig_hex = hex::encode(raw);

    rotation_keys.iter().any(|key| key.verify(&digest, &sig_hex).is_ok())
}

impl Directory for MockDirectory {
    async fn create_did(&self, operation: &Value) -> Result<Value> {
        if self.reject_all {
            return Err(reject(500, "directory unavailable"));
        }

        let entry = SignedEntry::from_wire(operation)?;
        let SignedEntry::Operation(op) = &entry else {
            return Err(reject(400, "genesis must be a plc_operation"));
        };
        if op.operation().prev.is_some() {
            return Err(reject(400, "genesis must not have a prev"));
        }
        // genesis is self-certifying
        if !signature_authorized(&entry, &rotation_keys_of(operation)) {
            return Err(reject(400, "signature does not match rotation keys"));
        }

        let did = cid::derive_did(op)?;
        let cid = entry.cid()?;
        let mut log = self.log.lock().expect("mock lock");
        if log.contains_key(&did) {
            return Err(reject(409, "DID already registered"));
        }
        log.insert(did, vec![(cid, operation.clone())]);
        Ok(json!({"success": true, "http_code": 200}))
    }

    async fn update_did(&self, did: &str, operation: &Value) -> Result<Value> {
        if self.reject_all {
            return Err(reject(500, "directory unavailable"));
        }

        let mut log = self.log.lock().expect("mock lock");
        let Some(entries) = log.get_mut(did) else {
            return Err(reject(404, "DID not registered"));
        };
        let (head_cid, head_wire) = entries.last().cloned().expect("log is never empty");

        let head = SignedEntry::from_wire(&head_wire)?;
        if matches!(head, SignedEntry::Tombstone(_)) {
            return Err(reject(410, "DID has been deactivated"));
        }

        let entry = SignedEntry::from_wire(operation)?;
        if self.reject_tombstones && matches!(entry, SignedEntry::Tombstone(_)) {
            return Err(reject(400, "tombstones are not accepted"));
        }
        if entry.prev() != Some(head_cid.as_str()) {
            return Err(reject(409, "operation is out of date"));
        }
        // authority lies with the keys of the head being superseded
        if !signature_authorized(&entry, &rotation_keys_of(&head_wire)) {
            return Err(reject(400, "signature does not match rotation keys"));
        }

        entries.push((entry.cid()?, operation.clone()));
        Ok(json!({"success": true, "http_code": 200}))
    }

    async fn resolve_did(&self, did: &str) -> Result<Document> {
        let log = self.log.lock().expect("mock lock");
        let Some(entries) = log.get(did) else {
            return Err(reject(404, "DID not registered"));
        };
        let (_, head_wire) = entries.last().expect("log is never empty");

        let entry = SignedEntry::from_wire(head_wire)?;
        let SignedEntry::Operation(op) = &entry else {
            return Err(reject(410, "DID has been deactivated"));
        };
        let op = op.operation();

        let verification_method = op
            .verification_methods
            .iter()
            .map(|(fragment, key)| VerificationMethod {
                id: format!("{did}#{fragment}"),
                type_: "Multikey".to_string(),
                controller: did.to_string(),
                public_key_multibase: Some(key.encode_public()),
            })
            .collect();
        let service = op
            .services
            .iter()
            .map(|(fragment, s)| Service {
                id: format!("#{fragment}"),
                type_: s.type_.clone(),
                service_endpoint: s.endpoint.clone(),
            })
            .collect();

        Ok(Document {
            context: vec!["https://www.w3.org/ns/did/v1".to_string()],
            id: did.to_string(),
            also_known_as: op.also_known_as.clone(),
            verification_method,
            service,
        })
    }

    async fn last_operation(&self, did: &str) -> Result<Option<LastOperation>> {
        let log = self.log.lock().expect("mock lock");
        let Some(entries) = log.get(did) else {
            return Ok(None);
        };
        let (cid, wire) = entries.last().expect("log is never empty");
        Ok(Some(LastOperation { cid: cid.clone(), operation: SignedEntry::from_wire(wire)? }))
    }

    async fn audit_log(&self, did: &str) -> Result<Vec<Value>> {
        let log = self.log.lock().expect("mock lock");
        let Some(entries) = log.get(did) else {
            return Err(reject(404, "DID not registered"));
        };
        Ok(entries
            .iter()
            .map(|(cid, operation)| {
                json!({"did": did, "cid": cid, "operation": operation, "nullified": false})
            })
            .collect())
    }
}
