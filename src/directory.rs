//! # Directory client
//!
//! The PLC directory is the authoritative, linear operation log per DID.
//! [`Directory`] is the surface the manager drives; [`PlcDirectory`] is the
//! HTTP implementation speaking the directory wire protocol. Implement the
//! trait directly to substitute a cache, a fixture, or a mock.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::canonical;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::operation::SignedEntry;

/// The default public PLC directory.
pub const DEFAULT_DIRECTORY: &str = "https://plc.directory";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The head of a DID's operation log together with its content address.
#[derive(Clone, Debug)]
pub struct LastOperation {
    /// CID of the operation, computed locally from its signed encoding.
    pub cid: String,

    /// The operation itself.
    pub operation: SignedEntry,
}

/// Operations a PLC directory exposes.
pub trait Directory: Send + Sync {
    /// Submit a signed genesis operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the directory rejects the operation
    /// or the transport fails.
    fn create_did(&self, operation: &Value) -> impl Future<Output = Result<Value>> + Send;

    /// Submit a signed non-genesis operation for an existing DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the directory rejects the operation
    /// (a stale `prev` included) or the transport fails.
    fn update_did(&self, did: &str, operation: &Value)
        -> impl Future<Output = Result<Value>> + Send;

    /// Resolve a DID to its document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the DID is unknown or the transport
    /// fails.
    fn resolve_did(&self, did: &str) -> impl Future<Output = Result<Document>> + Send;

    /// The head of the DID's operation log, or `None` for a DID with no
    /// operations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] on directory or transport failure.
    fn last_operation(&self, did: &str)
        -> impl Future<Output = Result<Option<LastOperation>>> + Send;

    /// The full audit log for a DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] on directory or transport failure.
    fn audit_log(&self, did: &str) -> impl Future<Output = Result<Vec<Value>>> + Send;
}

/// HTTP client for a PLC directory.
#[derive(Clone, Debug)]
pub struct PlcDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl PlcDirectory {
    /// A client for the given directory with the default 30 second timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// A client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] if the HTTP client cannot be built.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client =
            reqwest::Client::builder().timeout(timeout).build().map_err(|e| Error::Directory {
                status: None,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { base_url, client })
    }

    /// The directory base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The raw operation log for a DID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Directory`] on directory or transport failure.
    pub async fn operation_log(&self, did: &str) -> Result<Vec<Value>> {
        let log = self.get(&format!("/{did}/log")).await?;
        as_entries(log)
    }

    async fn post(&self, path: &str, operation: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "submitting operation");

        // submission bodies are canonical JSON, forward slashes unescaped
        let body = canonical::json_string(operation)?;
        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        unpack(response).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "fetching");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;
        unpack(response).await
    }
}

impl Directory for PlcDirectory {
    async fn create_did(&self, operation: &Value) -> Result<Value> {
        self.post("/", operation).await
    }

    async fn update_did(&self, did: &str, operation: &Value) -> Result<Value> {
        self.post(&format!("/{did}"), operation).await
    }

    async fn resolve_did(&self, did: &str) -> Result<Document> {
        let value = self.get(&format!("/{did}")).await?;
        serde_json::from_value(value).map_err(|e| Error::Directory {
            status: None,
            message: format!("malformed DID document: {e}"),
        })
    }

    async fn last_operation(&self, did: &str) -> Result<Option<LastOperation>> {
        let value = self.get(&format!("/{did}/log/last")).await?;
        if value.is_null() {
            return Ok(None);
        }
        let operation = SignedEntry::from_wire(&value)?;
        let cid = operation.cid()?;
        Ok(Some(LastOperation { cid, operation }))
    }

    async fn audit_log(&self, did: &str) -> Result<Vec<Value>> {
        let log = self.get(&format!("/{did}/log/audit")).await?;
        as_entries(log)
    }
}

async fn unpack(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    unpack_body(status.as_u16(), status.is_success(), &body)
}

fn unpack_body(status: u16, success: bool, body: &str) -> Result<Value> {
    if !success {
        return Err(response_error(status, body));
    }
    if body.trim().is_empty() {
        return Ok(json!({"success": true, "http_code": status}));
    }
    serde_json::from_str(body).map_err(|e| Error::Directory {
        status: Some(status),
        message: format!("malformed JSON response: {e}"),
    })
}

// Message precedence: `error`, then `message`, then the raw body.
fn response_error(status: u16, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            v.get("error")
                .and_then(Value::as_str)
                .or_else(|| v.get("message").and_then(Value::as_str))
        })
        .map_or_else(|| body.to_string(), ToString::to_string);
    Error::Directory { status: Some(status), message }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::Directory { status: None, message: e.to_string() }
}

fn as_entries(log: Value) -> Result<Vec<Value>> {
    match log {
        Value::Array(entries) => Ok(entries),
        _ => Err(Error::Directory {
            status: None,
            message: "expected a JSON array of log entries".to_string(),
        }),
    }
}
