//! # Errors
//!
//! Error types surfaced by the PLC client. Every failure in the codec and
//! signing core propagates to the caller; only the directory client wraps
//! transport-level detail.

use thiserror::Error;

/// Returns PLC-specific errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Public error type for the PLC client.
#[derive(Error, Debug)]
pub enum Error {
    /// A multibase key string carried a multicodec tag this crate does not
    /// support.
    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// A multibase string could not be decoded: wrong prefix, invalid
    /// alphabet, or a payload that is not key-shaped.
    #[error("malformed multibase: {0}")]
    MalformedMultibase(String),

    /// A private-key operation was attempted on a public-only key.
    #[error("not a private key: {0}")]
    NotAPrivateKey(String),

    /// Operation validation failed.
    #[error("invalid operation: {0}")]
    InvalidOperation(OperationReason),

    /// The DAG-CBOR writer failed. The operation model is total, so this is
    /// not expected in practice.
    #[error("CBOR encoding failed: {0}")]
    CborEncoding(String),

    /// A 4xx/5xx response from the PLC directory, or a transport failure
    /// (timeout, DNS, malformed response) in which case `status` is `None`.
    #[error("directory error: {message}")]
    Directory {
        /// HTTP status code, when the directory responded at all.
        status: Option<u16>,
        /// Message drawn from the response `error` field, then `message`,
        /// then the raw body.
        message: String,
    },

    /// The key store holds no record (or no rotation key) for the DID.
    #[error("missing local key for {0}")]
    MissingLocalKey(String),

    /// Any other failure from ambient plumbing (I/O, serialization).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The HTTP status carried by a `Directory` error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Directory { status, .. } => *status,
            _ => None,
        }
    }
}

/// Sub-reason carried by [`Error::InvalidOperation`].
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum OperationReason {
    /// The operation `type` is empty.
    #[error("operation type is empty")]
    EmptyType,

    /// The operation `type` is not `plc_operation` or `plc_tombstone`.
    #[error("unknown operation type {0}")]
    InvalidType(String),

    /// A `plc_operation` has no rotation keys.
    #[error("rotation keys are empty")]
    EmptyRotationKeys,

    /// A `plc_operation` has no verification methods.
    #[error("verification methods are empty")]
    EmptyVerificationMethods,

    /// A listed entry is not a well-formed key.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_status() {
        let err = Error::Directory {
            status: Some(409),
            message: "operation is out of date".into(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.to_string(), "directory error: operation is out of date");

        let err = Error::MissingLocalKey("did:plc:abc".into());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn operation_reason_display() {
        let err = Error::InvalidOperation(OperationReason::InvalidType("genesis".into()));
        assert_eq!(err.to_string(), "invalid operation: unknown operation type genesis");
    }
}
