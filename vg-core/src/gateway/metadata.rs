//! Metadata documents and the encryption bookkeeping codec.
//!
//! A document is an attribute-value mapping describing a published item.
//! Three reserved keys are owned exclusively by the gateway: the
//! access-policy blob, the initialization vector and the encrypted-field
//! list. They are written at publish time and read back and stripped at
//! arrival time, so application listeners only ever see the document as the
//! publisher authored it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::{
    ENCRYPTED_FIELDS_KEY, FIELD_LIST_SEPARATOR, IV_KEY, NO_FIELDS_SENTINEL, POLICY_KEY,
};
use crate::error::Error;

/// An attribute-value metadata document with stable key ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, String>);

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Removes a field, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Whether a field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serializes the document to JSON, for proxy integrations.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The bookkeeping recovered from an arriving document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionMarkers {
    /// The base64 access-policy blob.
    pub policy: String,

    /// The base64 initialization vector, absent for policy-only items.
    pub iv: Option<String>,

    /// Names of the ciphertext-valued fields; empty means the sentinel was
    /// present and the item is policy-bound without field ciphertext.
    pub fields: Vec<String>,
}

impl EncryptionMarkers {
    /// Whether the item carries a policy but no field ciphertext.
    pub fn is_policy_only(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Writes the three reserved bookkeeping keys into a document.
///
/// An empty `fields` list is rendered as the sentinel: no field is
/// ciphertext, but the policy blob still travels with the item.
pub fn embed_encryption(
    document: &mut Document,
    policy: &str,
    iv: Option<&str>,
    fields: &[String],
) {
    document.insert(POLICY_KEY, policy);
    if let Some(iv) = iv {
        document.insert(IV_KEY, iv);
    }

    let list = if fields.is_empty() {
        NO_FIELDS_SENTINEL.to_string()
    } else {
        fields.join(&FIELD_LIST_SEPARATOR.to_string())
    };
    document.insert(ENCRYPTED_FIELDS_KEY, list);
}

/// Reads and removes the three reserved bookkeeping keys, leaving the
/// document as the application authored it.
pub fn extract_encryption(document: &mut Document) -> Result<EncryptionMarkers, Error> {
    let policy = document
        .remove(POLICY_KEY)
        .ok_or_else(|| Error::MalformedMessage("missing policy marker".into()))?;
    let iv = document.remove(IV_KEY);
    let list = document
        .remove(ENCRYPTED_FIELDS_KEY)
        .ok_or_else(|| Error::MalformedMessage("missing encrypted-field list".into()))?;

    let fields = if list == NO_FIELDS_SENTINEL {
        Vec::new()
    } else {
        let fields: Vec<String> = list
            .split(FIELD_LIST_SEPARATOR)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(Error::MalformedMessage("empty encrypted-field list".into()));
        }
        fields
    };

    Ok(EncryptionMarkers { policy, iv, fields })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        [("sensor", "thermal"), ("observer", "alpha")]
            .into_iter()
            .collect()
    }

    #[test]
    fn embed_extract_round_trip() {
        let original = sample();
        let mut document = original.clone();

        embed_encryption(
            &mut document,
            "cG9saWN5",
            Some("aXY="),
            &["sensor".to_string(), "observer".to_string()],
        );
        assert_eq!(document.get(ENCRYPTED_FIELDS_KEY), Some("sensor;observer"));

        let markers = extract_encryption(&mut document).unwrap();
        assert_eq!(document, original);
        assert_eq!(markers.policy, "cG9saWN5");
        assert_eq!(markers.iv.as_deref(), Some("aXY="));
        assert_eq!(markers.fields, vec!["sensor", "observer"]);
        assert!(!markers.is_policy_only());
    }

    #[test]
    fn sentinel_round_trip() {
        let original = sample();
        let mut document = original.clone();

        embed_encryption(&mut document, "cG9saWN5", None, &[]);
        assert_eq!(document.get(ENCRYPTED_FIELDS_KEY), Some(NO_FIELDS_SENTINEL));
        assert!(document.get(IV_KEY).is_none());

        let markers = extract_encryption(&mut document).unwrap();
        assert_eq!(document, original);
        assert!(markers.is_policy_only());
        assert!(markers.iv.is_none());
    }

    #[test]
    fn missing_markers_are_malformed() {
        let mut document = sample();
        assert!(matches!(
            extract_encryption(&mut document),
            Err(Error::MalformedMessage(_))
        ));

        let mut document = sample();
        document.insert(POLICY_KEY, "cG9saWN5");
        assert!(matches!(
            extract_encryption(&mut document),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn empty_field_list_is_malformed() {
        let mut document = sample();
        document.insert(POLICY_KEY, "cG9saWN5");
        document.insert(ENCRYPTED_FIELDS_KEY, ";;");
        assert!(matches!(
            extract_encryption(&mut document),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn json_round_trip() {
        let document = sample();
        let json = document.to_json().unwrap();
        assert_eq!(Document::from_json(&json).unwrap(), document);
    }
}
