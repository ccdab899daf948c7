//! The locally-known attribute universe and its key-material versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::ATTRIBUTE_LABEL_PREFIX;

/// One key-material version of an [`Attribute`].
///
/// Version numbers are unique within an attribute and monotonic, but not
/// required to be contiguous. Rotation replaces the key material of an
/// existing version in place; revocation is modeled by ceasing to hold a
/// version locally, never by erasing history elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeVersion {
    /// The version number.
    pub version: u32,

    /// Opaque key material, as supplied by the configuration source.
    pub key_material: Vec<u8>,
}

/// A named capability unit with versioned key material, used as an atom in
/// access policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    id: u32,
    name: String,
    versions: Vec<AttributeVersion>,
}

impl Attribute {
    fn new(id: u32, name: Option<&str>) -> Self {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{ATTRIBUTE_LABEL_PREFIX}{id}"),
        };

        Self {
            id,
            name,
            versions: Vec::new(),
        }
    }

    /// The externally-assigned stable identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The human-readable name, synthesized when none was configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All locally-held versions, in registration order.
    pub fn versions(&self) -> &[AttributeVersion] {
        &self.versions
    }

    /// The highest locally-held version, if any.
    pub fn latest(&self) -> Option<&AttributeVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }

    /// Looks up one exact version.
    pub fn version(&self, version: u32) -> Option<&AttributeVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    fn upsert(&mut self, version: u32, key_material: Vec<u8>) {
        match self.versions.iter_mut().find(|v| v.version == version) {
            Some(existing) => existing.key_material = key_material,
            None => self.versions.push(AttributeVersion {
                version,
                key_material,
            }),
        }
    }
}

/// A flat (id, version, key material) record, the unit pushed to the key
/// service when the session is (re)established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeKey {
    /// Attribute id.
    pub id: u32,

    /// Version number.
    pub version: u32,

    /// Key material of this version.
    pub key_material: Vec<u8>,
}

/// The registry of locally-known attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    attributes: BTreeMap<u32, Attribute>,
}

impl AttributeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an attribute without any key material yet.
    ///
    /// A declared attribute with no versions cannot be referenced by a
    /// policy; it only fixes the name for later registrations.
    pub fn declare(&mut self, id: u32, name: Option<&str>) {
        self.attributes
            .entry(id)
            .or_insert_with(|| Attribute::new(id, name));
    }

    /// Inserts a new version, or replaces the key material of an existing
    /// (id, version) pair without disturbing other versions (rotation).
    pub fn register(&mut self, id: u32, version: u32, key_material: Vec<u8>) {
        self.register_named(id, None, version, key_material);
    }

    /// Like [`register`](Self::register), also naming the attribute when it
    /// is first seen.
    pub fn register_named(
        &mut self,
        id: u32,
        name: Option<&str>,
        version: u32,
        key_material: Vec<u8>,
    ) {
        self.attributes
            .entry(id)
            .or_insert_with(|| Attribute::new(id, name))
            .upsert(version, key_material);
    }

    /// Looks up an attribute by id.
    pub fn lookup(&self, id: u32) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    /// Whether the exact (id, version) pair is held locally.
    pub fn has_version(&self, id: u32, version: u32) -> bool {
        self.lookup(id).map_or(false, |a| a.version(version).is_some())
    }

    /// The latest held version of an attribute, if any.
    pub fn latest_version(&self, id: u32) -> Option<u32> {
        self.lookup(id).and_then(Attribute::latest).map(|v| v.version)
    }

    /// Flattens the registry into the records pushed to the key service.
    pub fn snapshot(&self) -> Vec<AttributeKey> {
        self.attributes
            .values()
            .flat_map(|attribute| {
                attribute.versions.iter().map(move |v| AttributeKey {
                    id: attribute.id,
                    version: v.version,
                    key_material: v.key_material.clone(),
                })
            })
            .collect()
    }

    /// Iterates over all attributes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> + '_ {
        self.attributes.values()
    }

    /// Number of known attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether no attribute is known.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
