//! # Operations
//!
//! The PLC operation model: construction, validation, deterministic
//! encoding, and signing. Unsigned and signed operations are distinct types
//! so that content addressing ([`crate::cid`]) can only be asked of a value
//! that actually has a signature.
//!
//! The signing discipline is fixed by the protocol: the unsigned map is
//! encoded as DAG-CBOR, its SHA-256 digest (hex) is handed to the rotation
//! key, and the resulting signature is carried as unpadded base64url in the
//! `sig` field of the signed encoding.

use std::collections::BTreeMap;

use anyhow::anyhow;
use base64ct::{Base64UrlUnpadded, Encoding};
use ciborium::Value as Cbor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::dagcbor;
use crate::error::{Error, OperationReason, Result};
use crate::key::{Keypair, DID_KEY_PREFIX};

/// Operation type of a standard PLC operation.
pub const PLC_OPERATION: &str = "plc_operation";
/// Operation type of a tombstone.
pub const PLC_TOMBSTONE: &str = "plc_tombstone";

/// A service advertised in the DID document, e.g. the subject's personal
/// data server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PlcService {
    /// Service type, e.g. `AtprotoPersonalDataServer`.
    #[serde(rename = "type")]
    pub type_: String,

    /// Service endpoint URL.
    pub endpoint: String,
}

impl PlcService {
    /// An `AtprotoPersonalDataServer` service for the given endpoint.
    #[must_use]
    pub fn pds(endpoint: impl Into<String>) -> Self {
        Self { type_: "AtprotoPersonalDataServer".to_string(), endpoint: endpoint.into() }
    }
}

/// An unsigned PLC operation.
#[derive(Clone, Debug, Default)]
pub struct Operation {
    /// Operation type: [`PLC_OPERATION`] for everything the client builds
    /// through this type.
    pub kind: String,

    /// Keys authorized to sign operations, highest priority first.
    pub rotation_keys: Vec<Keypair>,

    /// Keys published for third parties to verify content, by method id.
    pub verification_methods: BTreeMap<String, Keypair>,

    /// Other identifiers of the subject, e.g. `at://` handles.
    pub also_known_as: Vec<String>,

    /// Advertised services by service id.
    pub services: BTreeMap<String, PlcService>,

    /// CID of the previous operation; `None` only for genesis.
    pub prev: Option<String>,
}

impl Operation {
    /// An empty `plc_operation` with no predecessor.
    #[must_use]
    pub fn new() -> Self {
        Self { kind: PLC_OPERATION.to_string(), ..Self::default() }
    }

    /// Check the operation is well-formed.
    ///
    /// The deactivation path does not call this: a soft-deactivation
    /// operation has empty rotation keys and verification methods, which
    /// this check rejects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] with the failing
    /// [`OperationReason`].
    pub fn validate(&self) -> Result<()> {
        if self.kind.is_empty() {
            return Err(Error::InvalidOperation(OperationReason::EmptyType));
        }
        if self.kind != PLC_OPERATION && self.kind != PLC_TOMBSTONE {
            return Err(Error::InvalidOperation(OperationReason::InvalidType(self.kind.clone())));
        }
        if self.rotation_keys.is_empty() {
            return Err(Error::InvalidOperation(OperationReason::EmptyRotationKeys));
        }
        if self.verification_methods.is_empty() {
            return Err(Error::InvalidOperation(OperationReason::EmptyVerificationMethods));
        }
        Ok(())
    }

    // The operation as a CBOR map. Key order is irrelevant here: the
    // encoder sorts every level.
    fn cbor_map(&self, sig: Option<&str>) -> Cbor {
        let rotation_keys = self.rotation_keys.iter().map(|k| Cbor::Text(k.did_key())).collect();
        let verification_methods = self
            .verification_methods
            .iter()
            .map(|(id, key)| (Cbor::Text(id.clone()), Cbor::Text(key.did_key())))
            .collect();
        let also_known_as =
            self.also_known_as.iter().map(|aka| Cbor::Text(aka.clone())).collect();
        let services = self
            .services
            .iter()
            .map(|(id, service)| {
                let entry = Cbor::Map(vec![
                    (Cbor::Text("type".to_string()), Cbor::Text(service.type_.clone())),
                    (Cbor::Text("endpoint".to_string()), Cbor::Text(service.endpoint.clone())),
                ]);
                (Cbor::Text(id.clone()), entry)
            })
            .collect();

        let mut entries = vec![
            (Cbor::Text("type".to_string()), Cbor::Text(self.kind.clone())),
            (Cbor::Text("rotationKeys".to_string()), Cbor::Array(rotation_keys)),
            (Cbor::Text("verificationMethods".to_string()), Cbor::Map(verification_methods)),
            (Cbor::Text("alsoKnownAs".to_string()), Cbor::Array(also_known_as)),
            (Cbor::Text("services".to_string()), Cbor::Map(services)),
            (
                Cbor::Text("prev".to_string()),
                self.prev.as_ref().map_or(Cbor::Null, |p| Cbor::Text(p.clone())),
            ),
        ];
        if let Some(sig) = sig {
            entries.push((Cbor::Text("sig".to_string()), Cbor::Text(sig.to_string())));
        }
        Cbor::Map(entries)
    }

    /// The deterministic DAG-CBOR encoding without a `sig` field. These
    /// are the bytes whose digest is signed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CborEncoding`] on writer failure.
    pub fn encode_for_signing(&self) -> Result<Vec<u8>> {
        dagcbor::encode(self.cbor_map(None))
    }

    /// Sign with a rotation key, producing an immutable [`SignedOperation`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAPrivateKey`] when the key cannot sign, plus any
    /// encoding error.
    pub fn sign(self, rotation_key: &Keypair) -> Result<SignedOperation> {
        let sig = sign_payload(&self.encode_for_signing()?, rotation_key)?;
        Ok(SignedOperation { operation: self, sig })
    }

    /// The submission JSON without a `sig` field.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let rotation_keys: Vec<String> =
            self.rotation_keys.iter().map(Keypair::did_key).collect();
        let verification_methods: BTreeMap<&String, String> =
            self.verification_methods.iter().map(|(id, key)| (id, key.did_key())).collect();
        let services: BTreeMap<&String, Value> = self
            .services
            .iter()
            .map(|(id, s)| (id, json!({"type": s.type_, "endpoint": s.endpoint})))
            .collect();

        json!({
            "type": self.kind,
            "rotationKeys": rotation_keys,
            "verificationMethods": verification_methods,
            "alsoKnownAs": self.also_known_as,
            "services": services,
            "prev": self.prev,
        })
    }
}

/// A signed, content-addressed PLC operation. Immutable.
#[derive(Clone, Debug)]
pub struct SignedOperation {
    operation: Operation,
    sig: String,
}

impl SignedOperation {
    /// The operation fields.
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// The unpadded base64url signature.
    #[must_use]
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// The deterministic DAG-CBOR encoding including `sig`, the input to
    /// CID and DID derivation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CborEncoding`] on writer failure.
    pub fn encode_full(&self) -> Result<Vec<u8>> {
        dagcbor::encode(self.operation.cbor_map(Some(&self.sig)))
    }

    /// The submission JSON, `sig` included.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut wire = self.operation.to_wire();
        wire["sig"] = json!(self.sig);
        wire
    }

    /// Rebuild a signed operation from its wire JSON, as returned by a
    /// directory log endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] when a listed key does not
    /// decode, or an error describing the malformed field.
    pub fn from_wire(wire: &Value) -> Result<Self> {
        let kind = require_str(wire, "type")?;
        if kind != PLC_OPERATION {
            return Err(Error::InvalidOperation(OperationReason::InvalidType(kind)));
        }

        let mut rotation_keys = Vec::new();
        for entry in require_array(wire, "rotationKeys")? {
            let did_key = entry
                .as_str()
                .ok_or_else(|| anyhow!("rotationKeys entry is not a string"))?;
            rotation_keys.push(decode_wire_key(did_key)?);
        }

        let mut verification_methods = BTreeMap::new();
        for (id, entry) in require_object(wire, "verificationMethods")? {
            let did_key = entry
                .as_str()
                .ok_or_else(|| anyhow!("verification method {id} is not a string"))?;
            verification_methods.insert(id.clone(), decode_wire_key(did_key)?);
        }

        let mut also_known_as = Vec::new();
        for entry in require_array(wire, "alsoKnownAs")? {
            let aka =
                entry.as_str().ok_or_else(|| anyhow!("alsoKnownAs entry is not a string"))?;
            also_known_as.push(aka.to_string());
        }

        let mut services = BTreeMap::new();
        for (id, entry) in require_object(wire, "services")? {
            let service: PlcService = serde_json::from_value(entry.clone())
                .map_err(|e| anyhow!("service {id} is malformed: {e}"))?;
            services.insert(id.clone(), service);
        }

        let prev = match wire.get("prev") {
            None | Some(Value::Null) => None,
            Some(Value::String(cid)) => Some(cid.clone()),
            Some(_) => return Err(anyhow!("prev is neither a string nor null").into()),
        };

        let sig = require_str(wire, "sig")?;

        Ok(Self {
            operation: Operation {
                kind,
                rotation_keys,
                verification_methods,
                also_known_as,
                services,
                prev,
            },
            sig,
        })
    }
}

/// An unsigned tombstone: the minimal record that permanently retires a
/// DID. Carries nothing but the head it supersedes.
#[derive(Clone, Debug)]
pub struct Tombstone {
    /// CID of the operation being superseded.
    pub prev: String,
}

impl Tombstone {
    /// A tombstone chained to the given head CID.
    #[must_use]
    pub fn new(prev: impl Into<String>) -> Self {
        Self { prev: prev.into() }
    }

    fn cbor_map(&self, sig: Option<&str>) -> Cbor {
        let mut entries = vec![
            (Cbor::Text("type".to_string()), Cbor::Text(PLC_TOMBSTONE.to_string())),
            (Cbor::Text("prev".to_string()), Cbor::Text(self.prev.clone())),
        ];
        if let Some(sig) = sig {
            entries.push((Cbor::Text("sig".to_string()), Cbor::Text(sig.to_string())));
        }
        Cbor::Map(entries)
    }

    /// The deterministic DAG-CBOR encoding of the minimal map, without
    /// `sig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CborEncoding`] on writer failure.
    pub fn encode_for_signing(&self) -> Result<Vec<u8>> {
        dagcbor::encode(self.cbor_map(None))
    }

    /// Sign with a rotation key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAPrivateKey`] when the key cannot sign, plus any
    /// encoding error.
    pub fn sign(self, rotation_key: &Keypair) -> Result<SignedTombstone> {
        let sig = sign_payload(&self.encode_for_signing()?, rotation_key)?;
        Ok(SignedTombstone { tombstone: self, sig })
    }
}

/// A signed tombstone. Immutable.
#[derive(Clone, Debug)]
pub struct SignedTombstone {
    tombstone: Tombstone,
    sig: String,
}

impl SignedTombstone {
    /// CID of the operation the tombstone supersedes.
    #[must_use]
    pub fn prev(&self) -> &str {
        &self.tombstone.prev
    }

    /// The unpadded base64url signature.
    #[must_use]
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// The deterministic DAG-CBOR encoding including `sig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CborEncoding`] on writer failure.
    pub fn encode_full(&self) -> Result<Vec<u8>> {
        dagcbor::encode(self.tombstone.cbor_map(Some(&self.sig)))
    }

    /// The submission JSON: `{type, prev, sig}`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "type": PLC_TOMBSTONE,
            "prev": self.tombstone.prev,
            "sig": self.sig,
        })
    }

    /// Rebuild a signed tombstone from its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error describing the malformed field.
    pub fn from_wire(wire: &Value) -> Result<Self> {
        let kind = require_str(wire, "type")?;
        if kind != PLC_TOMBSTONE {
            return Err(Error::InvalidOperation(OperationReason::InvalidType(kind)));
        }
        let prev = require_str(wire, "prev")?;
        let sig = require_str(wire, "sig")?;
        Ok(Self { tombstone: Tombstone { prev }, sig })
    }
}

/// Either kind of signed operation, as found in a directory log.
#[derive(Clone, Debug)]
pub enum SignedEntry {
    /// A standard operation.
    Operation(SignedOperation),

    /// A tombstone.
    Tombstone(SignedTombstone),
}

impl SignedEntry {
    /// Dispatch on the wire `type` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] for an unknown or missing type,
    /// plus any field error from the variant parsers.
    pub fn from_wire(wire: &Value) -> Result<Self> {
        match wire.get("type").and_then(Value::as_str) {
            Some(PLC_OPERATION) => Ok(Self::Operation(SignedOperation::from_wire(wire)?)),
            Some(PLC_TOMBSTONE) => Ok(Self::Tombstone(SignedTombstone::from_wire(wire)?)),
            Some(other) => {
                Err(Error::InvalidOperation(OperationReason::InvalidType(other.to_string())))
            }
            None => Err(Error::InvalidOperation(OperationReason::EmptyType)),
        }
    }

    /// The deterministic DAG-CBOR encoding including `sig`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CborEncoding`] on writer failure.
    pub fn encode_full(&self) -> Result<Vec<u8>> {
        match self {
            Self::Operation(op) => op.encode_full(),
            Self::Tombstone(ts) => ts.encode_full(),
        }
    }

    /// The submission JSON.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Operation(op) => op.to_wire(),
            Self::Tombstone(ts) => ts.to_wire(),
        }
    }

    /// CID of the predecessor, `None` for genesis.
    #[must_use]
    pub fn prev(&self) -> Option<&str> {
        match self {
            Self::Operation(op) => op.operation().prev.as_deref(),
            Self::Tombstone(ts) => Some(ts.prev()),
        }
    }
}

// Shared signing discipline: SHA-256 the canonical bytes, sign the hex
// digest, carry the raw signature as unpadded base64url.
fn sign_payload(encoded: &[u8], rotation_key: &Keypair) -> Result<String> {
    let digest = hex::encode(Sha256::digest(encoded));
    let sig_hex = rotation_key.sign(&digest)?;
    let sig_bytes =
        hex::decode(&sig_hex).map_err(|e| anyhow!("signature is not valid hex: {e}"))?;
    Ok(Base64UrlUnpadded::encode_string(&sig_bytes))
}

fn require_str(wire: &Value, field: &str) -> Result<String> {
    wire.get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("operation field {field} is missing or not a string").into())
}

fn require_array<'a>(wire: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
    wire.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("operation field {field} is missing or not an array").into())
}

fn require_object<'a>(wire: &'a Value, field: &str) -> Result<&'a serde_json::Map<String, Value>> {
    wire.get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("operation field {field} is missing or not an object").into())
}

fn decode_wire_key(did_key: &str) -> Result<Keypair> {
    let Some(mbstr) = did_key.strip_prefix(DID_KEY_PREFIX) else {
        return Err(Error::InvalidOperation(OperationReason::InvalidKeyMaterial(format!(
            "expected a did:key, found {did_key}"
        ))));
    };
    Keypair::from_public(mbstr).map_err(|e| {
        Error::InvalidOperation(OperationReason::InvalidKeyMaterial(format!("{did_key}: {e}")))
    })
}
