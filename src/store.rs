//! # Key store
//!
//! Per-DID persistence of rotation and verification key material.
//! [`FileKeyStore`] keeps everything in one JSON document and replaces it
//! with a write-then-rename on every mutation, so a reader never observes a
//! torn file. Private keys are stored in cleartext; protecting the file is
//! the caller's responsibility.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A stored keypair, both halves multibase-encoded.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StoredKey {
    /// The private key (`z…`, private multicodec tag).
    pub private: String,

    /// The public key (`z…`, public multicodec tag).
    pub public: String,
}

/// The stored record for one DID.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDid {
    /// The DID this record owns.
    pub did: String,

    /// The current rotation keypair.
    pub rotation_key: StoredKey,

    /// The current verification keypair.
    pub verification_key: StoredKey,

    /// DID method; always `plc` for records this crate writes.
    #[serde(rename = "type", default = "plc_type")]
    pub type_: String,

    /// `false` once the DID has been deactivated.
    pub active: bool,

    /// When the record was first written.
    pub created_at: DateTime<Utc>,

    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,

    /// When the DID was deactivated, if it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,

    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

fn plc_type() -> String {
    "plc".to_string()
}

impl StoredDid {
    /// A fresh active record stamped with the current time.
    #[must_use]
    pub fn new(did: impl Into<String>, rotation_key: StoredKey, verification_key: StoredKey) -> Self {
        let now = Utc::now();
        Self {
            did: did.into(),
            rotation_key,
            verification_key,
            type_: plc_type(),
            active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Store operations the manager depends on.
pub trait KeyStore: Send + Sync {
    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put(&self, record: StoredDid) -> Result<()>;

    /// Fetch a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, did: &str) -> Result<Option<StoredDid>>;

    /// Replace both keypairs of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] if there is no record for the
    /// DID.
    fn update_keys(&self, did: &str, rotation_key: StoredKey, verification_key: StoredKey)
        -> Result<()>;

    /// Merge entries into a record's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] if there is no record for the
    /// DID.
    fn update_metadata(&self, did: &str, metadata: serde_json::Map<String, Value>) -> Result<()>;

    /// Mark a record deactivated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingLocalKey`] if there is no record for the
    /// DID.
    fn deactivate(&self, did: &str) -> Result<()>;

    /// All records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn list(&self) -> Result<Vec<StoredDid>>;

    /// Remove a record. Removing an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete(&self, did: &str) -> Result<()>;
}

// The single JSON document on disk: `{"dids": {"did:plc:…": {…}}}`.
#[derive(Default, Deserialize, Serialize)]
struct StoreFile {
    dids: BTreeMap<String, StoredDid>,
}

/// Key store backed by a single JSON file.
#[derive(Clone, Debug)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// A store at the given path. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let bytes = fs::read(&self.path)
            .map_err(|e| anyhow!("failed to read key store {}: {e}", self.path.display()))?;
        Ok(serde_json::from_slice(&bytes)
            .map_err(|e| anyhow!("key store {} is not valid JSON: {e}", self.path.display()))?)
    }

    // Write-then-rename: the store is never observable half-written.
    fn save(&self, file: &StoreFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| anyhow!("failed to serialize key store: {e}"))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)
            .map_err(|e| anyhow!("failed to write key store {}: {e}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| anyhow!("failed to replace key store {}: {e}", self.path.display()))?;
        Ok(())
    }

    fn mutate(&self, did: &str, apply: impl FnOnce(&mut StoredDid)) -> Result<()> {
        let mut file = self.load()?;
        let Some(record) = file.dids.get_mut(did) else {
            return Err(Error::MissingLocalKey(did.to_string()));
        };
        apply(record);
        record.updated_at = Utc::now();
        self.save(&file)
    }
}

impl KeyStore for FileKeyStore {
    fn put(&self, record: StoredDid) -> Result<()> {
        let mut file = self.load()?;
        file.dids.insert(record.did.clone(), record);
        self.save(&file)
    }

    fn get(&self, did: &str) -> Result<Option<StoredDid>> {
        Ok(self.load()?.dids.get(did).cloned())
    }

    fn update_keys(
        &self, did: &str, rotation_key: StoredKey, verification_key: StoredKey,
    ) -> Result<()> {
        self.mutate(did, |record| {
            record.rotation_key = rotation_key;
            record.verification_key = verification_key;
        })
    }

    fn update_metadata(&self, did: &str, metadata: serde_json::Map<String, Value>) -> Result<()> {
        self.mutate(did, |record| {
            for (key, value) in metadata {
                record.metadata.insert(key, value);
            }
        })
    }

    fn deactivate(&self, did: &str) -> Result<()> {
        self.mutate(did, |record| {
            record.active = false;
            record.deactivated_at = Some(Utc::now());
        })
    }

    fn list(&self) -> Result<Vec<StoredDid>> {
        Ok(self.load()?.dids.into_values().collect())
    }

    fn delete(&self, did: &str) -> Result<()> {
        let mut file = self.load()?;
        if file.dids.remove(did).is_some() {
            self.save(&file)?;
        }
        Ok(())
    }
}

/// In-memory key store for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    dids: Mutex<BTreeMap<String, StoredDid>>,
}

impl MemoryKeyStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate(&self, did: &str, apply: impl FnOnce(&mut StoredDid)) -> Result<()> {
        let mut dids = self.dids.lock().expect("lock on key store mutex failed");
        let Some(record) = dids.get_mut(did) else {
            return Err(Error::MissingLocalKey(did.to_string()));
        };
        apply(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

impl KeyStore for MemoryKeyStore {
    fn put(&self, record: StoredDid) -> Result<()> {
        let mut dids = self.dids.lock().expect("lock on key store mutex failed");
        dids.insert(record.did.clone(), record);
        Ok(())
    }

    fn get(&self, did: &str) -> Result<Option<StoredDid>> {
        let dids = self.dids.lock().expect("lock on key store mutex failed");
        Ok(dids.get(did).cloned())
    }

    fn update_keys(
        &self, did: &str, rotation_key: StoredKey, verification_key: StoredKey,
    ) -> Result<()> {
        self.mutate(did, |record| {
            record.rotation_key = rotation_key;
            record.verification_key = verification_key;
        })
    }

    fn update_metadata(&self, did: &str, metadata: serde_json::Map<String, Value>) -> Result<()> {
        self.mutate(did, |record| {
            for (key, value) in metadata {
                record.metadata.insert(key, value);
            }
        })
    }

    fn deactivate(&self, did: &str) -> Result<()> {
        self.mutate(did, |record| {
            record.active = false;
            record.deactivated_at = Some(Utc::now());
        })
    }

    fn list(&self) -> Result<Vec<StoredDid>> {
        let dids = self.dids.lock().expect("lock on key store mutex failed");
        Ok(dids.values().cloned().collect())
    }

    fn delete(&self, did: &str) -> Result<()> {
        let mut dids = self.dids.lock().expect("lock on key store mutex failed");
        dids.remove(did);
        Ok(())
    }
}
