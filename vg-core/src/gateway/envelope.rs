//! The opaque encrypted-payload container exchanged through the messaging
//! proxy.
//!
//! The wire format is the prelude, a version identifier and a bincode body:
//!
//! ```text
//!              PREAMBLE (6)
//! = PRELUDE (4) || VERSION (2)
//!
//!              BODY (*)
//! = bincode { equation, iv, ciphertext }
//! ```
//!
//! The envelope records the resolved policy, IV and ciphertext together, so
//! the arrival path decrypts payloads without consulting the metadata
//! bookkeeping; payload and metadata are sealed and opened independently.

use serde::{Deserialize, Serialize};

use crate::consts::{ENVELOPE_VERSION, PREAMBLE_SIZE, PRELUDE, PRELUDE_SIZE};
use crate::error::Error;
use crate::policy::PolicyEquation;

/// An encrypted payload with everything needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The policy the payload was sealed under, as resolved by the service.
    pub equation: PolicyEquation,

    /// The initialization vector.
    pub iv: Vec<u8>,

    /// The payload ciphertext.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serializes the envelope to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(PREAMBLE_SIZE + self.iv.len() + self.ciphertext.len() + 32);
        out.extend_from_slice(&PRELUDE);
        out.extend_from_slice(&ENVELOPE_VERSION.to_be_bytes());
        bincode::serialize_into(&mut out, self)?;
        Ok(out)
    }

    /// Parses an envelope from its wire form.
    ///
    /// Bytes that do not start with the prelude, or that carry an unknown
    /// version, were not produced by a gateway and yield
    /// [`Error::NotAnEnvelope`]; a recognized envelope with an unreadable
    /// body is a (de)serialization error instead.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < PREAMBLE_SIZE || bytes[..PRELUDE_SIZE] != PRELUDE {
            return Err(Error::NotAnEnvelope);
        }

        let version = u16::from_be_bytes([bytes[PRELUDE_SIZE], bytes[PRELUDE_SIZE + 1]]);
        if version != ENVELOPE_VERSION {
            return Err(Error::NotAnEnvelope);
        }

        Ok(bincode::deserialize(&bytes[PREAMBLE_SIZE..])?)
    }
}
