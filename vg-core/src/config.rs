//! Attribute bulk-load from a line-oriented configuration source.
//!
//! The source is a `key=value` listing; `#` starts a comment line:
//!
//! ```text
//! attribute.0.id = 1
//! attribute.0.name = clearance
//! attribute.0.version.0.id = 3
//! attribute.0.version.0.keyfile = /etc/veilgate/keys/clearance-3.key
//! policy.default = 1
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::attributes::AttributeRegistry;
use crate::error::Error;

/// One configured attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEntry {
    /// Externally-assigned attribute id.
    pub id: u32,

    /// Optional human-readable name.
    pub name: Option<String>,

    /// Configured key-material versions.
    pub versions: Vec<VersionEntry>,
}

/// One configured key-material version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Version number.
    pub version: u32,

    /// Path of the key-material file.
    pub keyfile: PathBuf,
}

/// The parsed attribute configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeConfig {
    entries: Vec<AttributeEntry>,
    default_policy: Option<String>,
}

#[derive(Default)]
struct RawVersion {
    version: Option<u32>,
    keyfile: Option<PathBuf>,
}

#[derive(Default)]
struct RawEntry {
    id: Option<u32>,
    name: Option<String>,
    versions: BTreeMap<u32, RawVersion>,
}

impl AttributeConfig {
    /// Parses a configuration from any buffered reader.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut entries: BTreeMap<u32, RawEntry> = BTreeMap::new();
        let mut default_policy = None;

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let number = number + 1;

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("line {number}: expected key=value")))?;
            let (key, value) = (key.trim(), value.trim());

            let parts: Vec<&str> = key.split('.').collect();
            match parts.as_slice() {
                ["policy", "default"] => default_policy = Some(value.to_string()),
                ["attribute", index, "id"] => {
                    entries.entry(parse_index(index, number)?).or_default().id =
                        Some(parse_number(value, number)?);
                }
                ["attribute", index, "name"] => {
                    entries.entry(parse_index(index, number)?).or_default().name =
                        Some(value.to_string());
                }
                ["attribute", index, "version", v_index, "id"] => {
                    entries
                        .entry(parse_index(index, number)?)
                        .or_default()
                        .versions
                        .entry(parse_index(v_index, number)?)
                        .or_default()
                        .version = Some(parse_number(value, number)?);
                }
                ["attribute", index, "version", v_index, "keyfile"] => {
                    entries
                        .entry(parse_index(index, number)?)
                        .or_default()
                        .versions
                        .entry(parse_index(v_index, number)?)
                        .or_default()
                        .keyfile = Some(PathBuf::from(value));
                }
                _ => {
                    return Err(Error::Config(format!(
                        "line {number}: unrecognized key `{key}`"
                    )))
                }
            }
        }

        let mut finished = Vec::with_capacity(entries.len());
        for (index, raw) in entries {
            let id = raw
                .id
                .ok_or_else(|| Error::Config(format!("attribute.{index}: missing id")))?;

            let mut versions = Vec::with_capacity(raw.versions.len());
            for (v_index, raw_version) in raw.versions {
                let version = raw_version.version.ok_or_else(|| {
                    Error::Config(format!("attribute.{index}.version.{v_index}: missing id"))
                })?;
                let keyfile = raw_version.keyfile.ok_or_else(|| {
                    Error::Config(format!(
                        "attribute.{index}.version.{v_index}: missing keyfile"
                    ))
                })?;
                versions.push(VersionEntry { version, keyfile });
            }

            finished.push(AttributeEntry {
                id,
                name: raw.name,
                versions,
            });
        }

        Ok(Self {
            entries: finished,
            default_policy,
        })
    }

    /// Opens and parses a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::parse(BufReader::new(fs::File::open(path)?))
    }

    /// The configured attribute entries, in index order.
    pub fn entries(&self) -> &[AttributeEntry] {
        &self.entries
    }

    /// The configured default textual policy, if any.
    pub fn default_policy(&self) -> Option<&str> {
        self.default_policy.as_deref()
    }

    /// Builds a registry by reading every key-material file.
    pub fn into_registry(self) -> Result<AttributeRegistry, Error> {
        self.into_registry_with(|path| fs::read(path))
    }

    /// Builds a registry with a custom key-material reader.
    pub fn into_registry_with<F>(self, mut read_key: F) -> Result<AttributeRegistry, Error>
    where
        F: FnMut(&Path) -> io::Result<Vec<u8>>,
    {
        let mut registry = AttributeRegistry::new();
        for entry in self.entries {
            registry.declare(entry.id, entry.name.as_deref());
            for version in entry.versions {
                let key_material = read_key(&version.keyfile)?;
                registry.register_named(
                    entry.id,
                    entry.name.as_deref(),
                    version.version,
                    key_material,
                );
            }
        }

        Ok(registry)
    }
}

fn parse_index(token: &str, line: usize) -> Result<u32, Error> {
    token
        .parse()
        .map_err(|_| Error::Config(format!("line {line}: `{token}` is not an index")))
}

fn parse_number(value: &str, line: usize) -> Result<u32, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("line {line}: `{value}` is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
# attribute universe
attribute.0.id = 1
attribute.0.name = clearance
attribute.0.version.0.id = 2
attribute.0.version.0.keyfile = keys/clearance-2.key
attribute.0.version.1.id = 3
attribute.0.version.1.keyfile = keys/clearance-3.key

attribute.1.id = 2
attribute.1.version.0.id = 1
attribute.1.version.0.keyfile = keys/squad-1.key

policy.default = 1 AND 2
";

    #[test]
    fn parses_entries_and_default_policy() {
        let config = AttributeConfig::parse(Cursor::new(SAMPLE)).unwrap();

        assert_eq!(config.entries().len(), 2);
        let first = &config.entries()[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.name.as_deref(), Some("clearance"));
        assert_eq!(first.versions.len(), 2);
        assert_eq!(first.versions[1].version, 3);
        assert_eq!(
            first.versions[1].keyfile,
            PathBuf::from("keys/clearance-3.key")
        );
        assert_eq!(config.default_policy(), Some("1 AND 2"));
    }

    #[test]
    fn builds_a_registry_through_the_reader() {
        let config = AttributeConfig::parse(Cursor::new(SAMPLE)).unwrap();
        let registry = config
            .into_registry_with(|path| Ok(path.to_string_lossy().into_owned().into_bytes()))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup(1).unwrap().name(), "clearance");
        assert_eq!(registry.latest_version(1), Some(3));
        assert_eq!(
            registry.lookup(1).unwrap().version(2).unwrap().key_material,
            b"keys/clearance-2.key"
        );
        assert!(registry.has_version(2, 1));
    }

    #[test]
    fn keyfile_read_failures_propagate() {
        let config = AttributeConfig::parse(Cursor::new(SAMPLE)).unwrap();
        let result = config.into_registry_with(|_| {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such keyfile"))
        });
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            AttributeConfig::parse(Cursor::new("attribute.0.id")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AttributeConfig::parse(Cursor::new("attribute.x.id = 1")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AttributeConfig::parse(Cursor::new("unknown.key = 1")),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AttributeConfig::parse(Cursor::new("attribute.0.id = one")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn incomplete_entries_are_rejected() {
        // A version without a keyfile.
        let source = "attribute.0.id = 1\nattribute.0.version.0.id = 2\n";
        assert!(matches!(
            AttributeConfig::parse(Cursor::new(source)),
            Err(Error::Config(_))
        ));

        // Versions without an attribute id.
        let source = "attribute.0.version.0.id = 2\nattribute.0.version.0.keyfile = k\n";
        assert!(matches!(
            AttributeConfig::parse(Cursor::new(source)),
            Err(Error::Config(_))
        ));
    }
}
