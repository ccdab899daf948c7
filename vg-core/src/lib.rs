//! # Veilgate core library
#![deny(
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs,
    rustdoc::broken_intra_doc_links
)]
//! Veilgate is a policy-based encryption gateway for store-and-forward
//! dissemination networks. It sits between application code and a
//! publish/subscribe messaging proxy, transparently enforcing
//! attribute-based confidentiality on published content and metadata, and
//! transparently decrypting (or reporting as undecryptable) content arriving
//! from peers.
//!
//! The attribute-based cryptographic primitive itself runs inside a remote
//! key service; this library owns everything around it:
//!
//! * [`attributes`]: the locally-known attribute universe and its
//!   key-material versions (registration, rotation, snapshots).
//! * [`policy`]: boolean access policies in OR-of-ANDs form over
//!   (attribute id, version) pairs, with a textual `AND`/`OR` grammar and a
//!   local decryptability test.
//! * [`client`]: the session to the key service, including the
//!   reconnect-and-retry policy that survives server-side session loss
//!   without duplicating or losing cryptographic operations.
//! * [`gateway`]: the publish/arrival pipeline, the metadata bookkeeping
//!   codec and the payload envelope.
//! * [`config`]: attribute bulk-load from a line-oriented configuration
//!   source.
//!
//! ## Publishing
//!
//! At publish time the gateway encrypts the payload and every protected
//! metadata field under the caller's policy equation. The first field
//! derives a fresh symmetric key and IV through the key service; every
//! further field reuses them, so a document costs one key derivation no
//! matter how many fields it protects. The payload is sealed independently
//! into an [`Envelope`](gateway::envelope::Envelope), so payload and
//! metadata can be opened independently on arrival.
//!
//! ## Arrival
//!
//! Arriving metadata is restored all-or-nothing: if any listed field fails
//! to decrypt, the whole document is routed to the undecryptable listener
//! set. Items carrying a policy but no field ciphertext are checked with a
//! purely local satisfiability test and never touch the key service.
//! Malformed input is logged and dropped; arrival callbacks never propagate
//! errors to the messaging layer.
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//!
//! use vg_core::test::{MockProxy, MockService, RecordingListener};
//! use vg_core::{AttributeRegistry, Document, Gateway};
//!
//! # fn main() -> Result<(), vg_core::Error> {
//! let mut registry = AttributeRegistry::new();
//! registry.register_named(1, Some("clearance"), 3, b"opaque key material".to_vec());
//!
//! let service = MockService::new();
//! let proxy = MockProxy::default();
//! let gateway = Gateway::new(service.connector(), proxy.clone(), registry)
//!     .with_protected_fields(["sensor"]);
//! gateway.login()?;
//!
//! let mut document = Document::new();
//! document.insert("sensor", "thermal");
//!
//! let equation = gateway.parse_equation("1")?;
//! gateway.publish(
//!     "blue.force",
//!     "track-7",
//!     "0",
//!     &document,
//!     Some(b"0123"),
//!     Duration::from_secs(300),
//!     &equation,
//! )?;
//!
//! // The proxy only ever sees ciphertext.
//! let published = proxy.published();
//! let sent = &published[0];
//! assert_ne!(sent.metadata.get("sensor"), Some("thermal"));
//!
//! // A gateway holding the right attribute version recovers the original.
//! let listener = RecordingListener::new();
//! gateway.add_listener(listener.clone());
//! assert!(gateway.on_metadata_arrived(&sent.metadata));
//! assert_eq!(listener.documents()[0], document);
//! # Ok(()) }
//! ```
//!
//! ## Envelope wire format
//!
//! ```text
//!              PREAMBLE (6)
//! = PRELUDE (4) || VERSION (2)
//!
//!              BODY (*)
//! = bincode { equation, iv, ciphertext }
//! ```

pub mod api;
pub mod attributes;
pub mod client;
pub mod config;
pub mod consts;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod proxy;


pub use attributes::{Attribute, AttributeKey, AttributeRegistry, AttributeVersion};
pub use error::Error;
pub use gateway::metadata::Document;
pub use gateway::{Gateway, MessageListener, PayloadEvent};
pub use policy::{AttributeRef, Conjunction, PolicyEquation};
