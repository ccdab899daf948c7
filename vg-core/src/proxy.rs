//! Seam to the underlying store-and-forward messaging proxy.
//!
//! The proxy stores, forwards, chunks and delivers opaque byte payloads and
//! metadata documents; transport, wire framing and chunk reassembly all live
//! on its side of the seam. The gateway only hands it ciphertext.

use std::time::Duration;

use crate::error::Error;
use crate::gateway::metadata::Document;

/// Chunk bookkeeping forwarded untouched from the messaging layer.
///
/// Payload encryption happens after any chunk fragmentation the messaging
/// layer performs; each chunk is an opaque buffer to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkInfo {
    /// Index of this chunk.
    pub index: u32,

    /// Total number of chunks of the item.
    pub total: u32,
}

/// An arriving item as delivered by the messaging proxy.
#[derive(Debug, Clone)]
pub struct Arrival {
    /// Message id assigned by the messaging layer.
    pub id: String,

    /// The metadata document, when the item carries one.
    pub metadata: Option<Document>,

    /// The opaque payload bytes, when the item carries them.
    pub payload: Option<Vec<u8>>,

    /// MIME type reported by the messaging layer.
    pub mime_type: String,

    /// Chunk bookkeeping, when the payload is a fragment.
    pub chunk: Option<ChunkInfo>,

    /// Id of the subscription query that matched, when any.
    pub query_id: Option<String>,
}

/// Parameters of one proxy publication.
#[derive(Debug)]
pub struct PublishRequest<'a> {
    /// Destination group.
    pub group: &'a str,

    /// Object id of the published item.
    pub object_id: &'a str,

    /// Instance id of the published item.
    pub instance_id: &'a str,

    /// The (already transformed) metadata document.
    pub metadata: &'a Document,

    /// The (already enveloped) payload bytes, when any.
    pub payload: Option<&'a [u8]>,

    /// Time to live of the item in the network.
    pub ttl: Duration,
}

/// The publish surface of the messaging proxy (an external collaborator).
pub trait DisseminationProxy: Send + Sync {
    /// Stores and forwards an item, returning the assigned message id.
    fn publish(&self, request: &PublishRequest<'_>) -> Result<String, Error>;
}
