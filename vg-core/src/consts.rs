//! Constants of the Veilgate metadata and envelope formats.

use std::time::Duration;

/// Reserved metadata key holding the serialized access-policy blob (base64).
pub const POLICY_KEY: &str = "vg.policy";

/// Reserved metadata key holding the initialization vector (base64).
pub const IV_KEY: &str = "vg.iv";

/// Reserved metadata key listing which metadata fields are ciphertext-valued.
pub const ENCRYPTED_FIELDS_KEY: &str = "vg.encrypted-fields";

/// Sentinel stored under [`ENCRYPTED_FIELDS_KEY`] when no field is ciphertext
/// but the item is still policy-bound.
pub const NO_FIELDS_SENTINEL: &str = "NONE";

/// Separator of the encrypted-field list.
pub const FIELD_LIST_SEPARATOR: char = ';';

/// Metadata key of the application metadata blob.
///
/// This field is always policy-bound: whenever it is present it is encrypted,
/// even if no other field is.
pub const APPLICATION_METADATA_KEY: &str = "application.metadata";

/// The size of the tag with which all payload envelopes begin.
pub const PRELUDE_SIZE: usize = 4;

/// The tag bytes with which all payload envelopes begin.
pub const PRELUDE: [u8; PRELUDE_SIZE] = [0x56, 0x47, 0x45, 0x31];

/// Version identifier of the envelope format.
pub const ENVELOPE_VERSION: u16 = 1;

/// The size of the version identifier.
pub const VERSION_SIZE: usize = std::mem::size_of::<u16>();

/// The preamble contains the following bytes:
/// * Prelude: 4 bytes,
/// * Version identifier: 2 bytes.
pub const PREAMBLE_SIZE: usize = PRELUDE_SIZE + VERSION_SIZE;

/// Default timeout applied to every key-service request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of the label synthesized for attributes configured without a name.
pub const ATTRIBUTE_LABEL_PREFIX: &str = "attr-";
