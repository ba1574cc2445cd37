//! # DID Document
//!
//! The document shape a PLC directory returns when resolving a `did:plc`.
//! The document does not carry rotation keys; they live in the operation
//! log.

use serde::{Deserialize, Serialize};

/// A resolved PLC DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    /// The document contexts.
    #[serde(rename = "@context", skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,

    /// The DID of the subject.
    pub id: String,

    /// Other identifiers of the subject, e.g. `at://` handles.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub also_known_as: Vec<String>,

    /// Published verification methods.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verification_method: Vec<VerificationMethod>,

    /// Advertised services.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
}

impl Document {
    /// The subject's handle: the first `alsoKnownAs` entry with its `at://`
    /// scheme stripped.
    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.also_known_as.first().and_then(|aka| aka.strip_prefix("at://"))
    }

    /// The endpoint of the subject's personal data server, if advertised.
    #[must_use]
    pub fn pds_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .find(|s| s.fragment() == "atproto_pds")
            .map(|s| s.service_endpoint.as_str())
    }
}

/// A verification method published in a DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationMethod {
    /// Method id: the DID plus a `#`-fragment.
    pub id: String,

    /// Method type, e.g. `Multikey`.
    #[serde(rename = "type")]
    pub type_: String,

    /// The controlling DID.
    pub controller: String,

    /// The public key in multibase form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,
}

impl VerificationMethod {
    /// The method id's fragment, or the whole id when there is none.
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.id.rsplit('#').next().unwrap_or(&self.id)
    }
}

/// A service published in a DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    /// Service id: the DID plus a `#`-fragment.
    pub id: String,

    /// Service type.
    #[serde(rename = "type")]
    pub type_: String,

    /// The service endpoint URL.
    pub service_endpoint: String,
}

impl Service {
    /// The service id's fragment, or the whole id when there is none.
    #[must_use]
    pub fn fragment(&self) -> &str {
        self.id.rsplit('#').next().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_directory_response() {
        let json = json!({
            "@context": ["https://www.w3.org/ns/did/v1"],
            "id": "did:plc:yk4dd2qkboz2yv6tpubpc6co",
            "alsoKnownAs": ["at://example.bsky.social"],
            "verificationMethod": [{
                "id": "did:plc:yk4dd2qkboz2yv6tpubpc6co#atproto",
                "type": "Multikey",
                "controller": "did:plc:yk4dd2qkboz2yv6tpubpc6co",
                "publicKeyMultibase": "zQ3shXjHeiBuRCKmM36cuYnm7YEMzhGnCmCyW92sRJ9pribSF"
            }],
            "service": [{
                "id": "#atproto_pds",
                "type": "AtprotoPersonalDataServer",
                "serviceEndpoint": "https://pds.example.com"
            }]
        });

        let document: Document = serde_json::from_value(json).expect("should deserialize");
        assert_eq!(document.handle(), Some("example.bsky.social"));
        assert_eq!(document.pds_endpoint(), Some("https://pds.example.com"));
        assert_eq!(document.verification_method[0].fragment(), "atproto");
    }

    #[test]
    fn missing_fields_default() {
        let document: Document =
            serde_json::from_value(json!({"id": "did:plc:abc"})).expect("should deserialize");
        assert!(document.also_known_as.is_empty());
        assert_eq!(document.handle(), None);
        assert_eq!(document.pds_endpoint(), None);
    }
}
