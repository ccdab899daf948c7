//! Wire types of the key-service request/response protocol.
//!
//! Binary fields travel as base64 strings and names are camelCase on the
//! wire, so the bodies stay readable in transcripts and test fixtures.

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeKey;

pub(crate) mod b64 {
    //! Serde helpers encoding binary fields as base64 strings.

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(val: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&BASE64.encode(val.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_opt {
    //! Serde helpers for optional binary fields.

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(val: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match val {
            Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|e| BASE64.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Session material returned by the key service at login.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Opaque session token quoted on every subsequent request.
    pub session_token: String,

    /// Secret material bound to the session. A session without it is
    /// unusable and is rejected by the client.
    #[serde(with = "b64")]
    pub secret: Vec<u8>,
}

/// One attribute version pushed at registration.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttribute {
    /// Attribute id.
    pub id: u32,

    /// Version number.
    pub version: u32,

    /// Key material of this version.
    #[serde(with = "b64")]
    pub key_material: Vec<u8>,
}

impl From<&AttributeKey> for WireAttribute {
    fn from(key: &AttributeKey) -> Self {
        Self {
            id: key.id,
            version: key.version,
            key_material: key.key_material.clone(),
        }
    }
}

/// Body of the attribute-registration request.
///
/// Registration is idempotent; the client pushes the full locally-held set
/// every time the session is (re)established.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterAttributesRequest {
    /// Every locally-held attribute version.
    pub attributes: Vec<WireAttribute>,
}

/// Body of an encryption request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRequest {
    /// The serialized policy equation.
    #[serde(with = "b64")]
    pub equation: Vec<u8>,

    /// The plaintext to encrypt.
    #[serde(with = "b64")]
    pub plaintext: Vec<u8>,

    /// Reuse an already-derived symmetric key instead of deriving a fresh
    /// one per request.
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub reuse_key: Option<Vec<u8>>,

    /// Initialization vector paired with `reuse_key`.
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub reuse_iv: Option<Vec<u8>>,
}

/// Reply to an encryption request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResponse {
    /// The ciphertext; empty when the service could not encrypt.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    /// The initialization vector used.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,

    /// The policy equation as resolved by the service.
    #[serde(with = "b64")]
    pub resolved_equation: Vec<u8>,

    /// The derived symmetric key, reusable for further field encryptions.
    #[serde(with = "b64")]
    pub symmetric_key: Vec<u8>,

    /// Attribute ids required by the policy but unknown to the service;
    /// non-empty means the request failed.
    #[serde(default)]
    pub missing_attributes: Vec<u32>,
}

/// Body of a decryption request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    /// The serialized policy equation recovered from the arriving item.
    #[serde(with = "b64")]
    pub equation: Vec<u8>,

    /// The ciphertext to decrypt.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    /// The initialization vector recovered from the arriving item.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
}

/// Reply to a decryption request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResponse {
    /// The recovered plaintext. Absent or empty when the session's attribute
    /// holdings do not satisfy the policy; this is not a transport error.
    #[serde(with = "b64_opt", default, skip_serializing_if = "Option::is_none")]
    pub plaintext: Option<Vec<u8>>,
}
