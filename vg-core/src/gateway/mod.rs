//! The publish/arrival pipeline.
//!
//! The gateway is the façade between application code and the messaging
//! proxy. Outgoing items have their payload and selected metadata fields
//! encrypted before the proxy sees them; arriving items are decrypted (or
//! reported as undecryptable) before application listeners see them.
//!
//! Arrival callbacks never propagate errors past the gateway boundary:
//! every failure mode resolves to delivered, delivered as undecryptable, or
//! dropped with a diagnostic log line.

pub mod envelope;
pub mod listeners;
pub mod metadata;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::attributes::AttributeRegistry;
use crate::client::{CryptoConnector, EncryptedPayload, SessionClient};
use crate::consts::APPLICATION_METADATA_KEY;
use crate::error::Error;
use crate::gateway::envelope::Envelope;
use crate::gateway::listeners::ListenerSet;
use crate::gateway::metadata::{embed_encryption, extract_encryption, Document};
use crate::policy::PolicyEquation;
use crate::proxy::{Arrival, ChunkInfo, DisseminationProxy, PublishRequest};

/// A payload delivered to listeners.
#[derive(Debug, Clone)]
pub struct PayloadEvent {
    /// Message id assigned by the messaging layer, when known.
    pub id: Option<String>,

    /// MIME type reported by the messaging layer, when known.
    pub mime_type: Option<String>,

    /// Chunk bookkeeping, passed through untouched.
    pub chunk: Option<ChunkInfo>,

    /// Id of the subscription query that matched, when any.
    pub query_id: Option<String>,

    /// The recovered plaintext on the normal path; the raw arriving bytes on
    /// the undecryptable path.
    pub data: Vec<u8>,
}

/// Capability interface of arrival listeners.
///
/// One trait serves both listener sets: the gateway routes decrypted
/// arrivals to the normal set and policy mismatches to the undecryptable
/// set. Implementations return `true` to report the event as handled.
pub trait MessageListener: Send + Sync {
    /// A payload arrived.
    fn payload_arrived(&self, event: &PayloadEvent) -> bool;

    /// A metadata document arrived, bookkeeping fields stripped.
    fn metadata_arrived(&self, document: &Document) -> bool;
}

/// The policy-based encryption gateway.
///
/// Safe for concurrent use; publish and arrival paths serialize on one
/// coarse per-gateway lock, since policy and session operations are
/// infrequent relative to message traffic.
pub struct Gateway<C: CryptoConnector, P: DisseminationProxy> {
    client: SessionClient<C>,
    proxy: P,
    registry: Arc<RwLock<AttributeRegistry>>,
    listeners: ListenerSet<dyn MessageListener>,
    undecryptable: ListenerSet<dyn MessageListener>,
    protected_fields: Vec<String>,
    default_policy: Option<String>,
    pipeline: Mutex<()>,
}

impl<C: CryptoConnector, P: DisseminationProxy> Gateway<C, P> {
    /// Creates a gateway over a key-service connector, a messaging proxy and
    /// the locally-held attribute universe.
    pub fn new(connector: C, proxy: P, registry: AttributeRegistry) -> Self {
        let registry = Arc::new(RwLock::new(registry));

        Self {
            client: SessionClient::new(connector, Arc::clone(&registry)),
            proxy,
            registry,
            listeners: ListenerSet::new(),
            undecryptable: ListenerSet::new(),
            protected_fields: vec![APPLICATION_METADATA_KEY.to_string()],
            default_policy: None,
            pipeline: Mutex::new(()),
        }
    }

    /// Adds metadata fields to encrypt at publication, on top of the
    /// always-protected application metadata field.
    pub fn with_protected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.protected_fields.contains(&field) {
                self.protected_fields.push(field);
            }
        }
        self
    }

    /// Sets the default textual policy, usually taken from the attribute
    /// configuration source.
    pub fn with_default_policy(mut self, text: impl Into<String>) -> Self {
        self.default_policy = Some(text.into());
        self
    }

    /// Establishes the crypto session and registers all held attributes.
    pub fn login(&self) -> Result<(), Error> {
        self.client.login()
    }

    /// The session client, for state inspection.
    pub fn session(&self) -> &SessionClient<C> {
        &self.client
    }

    /// Shared handle to the attribute registry.
    pub fn registry(&self) -> Arc<RwLock<AttributeRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Registers (or rotates) an attribute version locally.
    ///
    /// The new material reaches the key service at the next session
    /// (re)establishment, or immediately via
    /// [`push_attributes`](Self::push_attributes).
    pub fn register_attribute(&self, id: u32, version: u32, key_material: Vec<u8>) {
        self.registry.write().register(id, version, key_material);
    }

    /// Pushes the current attribute snapshot to the key service.
    pub fn push_attributes(&self) -> Result<(), Error> {
        self.client.register_attributes()
    }

    /// Parses a textual equation against the current registry.
    pub fn parse_equation(&self, text: &str) -> Result<PolicyEquation, Error> {
        PolicyEquation::parse(text, &self.registry.read())
    }

    /// The equation parsed from the configured default policy, or the
    /// identity policy when none is configured.
    pub fn default_equation(&self) -> Result<PolicyEquation, Error> {
        match &self.default_policy {
            Some(text) => self.parse_equation(text),
            None => Ok(PolicyEquation::empty()),
        }
    }

    /// Registers a normal arrival listener.
    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.add(listener);
    }

    /// Deregisters a normal arrival listener.
    pub fn remove_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Registers a listener for items this gateway cannot decrypt.
    pub fn add_undecryptable_listener(&self, listener: Arc<dyn MessageListener>) {
        self.undecryptable.add(listener);
    }

    /// Deregisters an undecryptable-arrival listener.
    pub fn remove_undecryptable_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.undecryptable.remove(listener)
    }

    /// Publishes a metadata document and optional payload under an access
    /// policy.
    ///
    /// Protected fields present in the document are replaced by base64
    /// ciphertext: the first derives a fresh key and IV, later ones reuse
    /// them. The payload is sealed independently into an envelope under the
    /// same equation. On any failure nothing reaches the proxy, and the
    /// caller's document is never mutated.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &self,
        group: &str,
        object_id: &str,
        instance_id: &str,
        document: &Document,
        payload: Option<&[u8]>,
        ttl: Duration,
        equation: &PolicyEquation,
    ) -> Result<String, Error> {
        let _pipeline = self.pipeline.lock();

        let mut transformed = document.clone();
        let mut encrypted_fields = Vec::new();
        let mut derived: Option<EncryptedPayload> = None;

        for field in &self.protected_fields {
            let value = match transformed.get(field) {
                Some(value) => value.to_string(),
                None => continue,
            };

            let ciphertext = match &derived {
                None => {
                    let sealed = self.client.encrypt_payload(equation, value.as_bytes())?;
                    let ciphertext = sealed.ciphertext.clone();
                    derived = Some(sealed);
                    ciphertext
                }
                Some(first) => {
                    self.client
                        .encrypt_field(&first.symmetric_key, &first.iv, value.as_bytes())?
                }
            };

            transformed.insert(field.clone(), BASE64.encode(ciphertext));
            encrypted_fields.push(field.clone());
        }

        let policy = match &derived {
            Some(first) => first.resolved_equation.to_base64()?,
            None => equation.to_base64()?,
        };
        let iv = derived.as_ref().map(|first| BASE64.encode(&first.iv));
        embed_encryption(&mut transformed, &policy, iv.as_deref(), &encrypted_fields);

        let envelope = match payload {
            Some(bytes) => {
                let sealed = self.client.encrypt_payload(equation, bytes)?;
                Some(
                    Envelope {
                        equation: sealed.resolved_equation,
                        iv: sealed.iv,
                        ciphertext: sealed.ciphertext,
                    }
                    .to_bytes()?,
                )
            }
            None => None,
        };

        debug!("publishing {object_id}/{instance_id} to {group} under policy {equation}");
        self.proxy.publish(&PublishRequest {
            group,
            object_id,
            instance_id,
            metadata: &transformed,
            payload: envelope.as_deref(),
            ttl,
        })
    }

    /// Arrival callback for an opaque payload.
    ///
    /// Returns `true` when the event was delivered or counted as delivered,
    /// `false` when it was dropped as malformed or left unhandled.
    pub fn on_payload_arrived(&self, bytes: &[u8]) -> bool {
        self.payload_arrival(bytes, None, None, None, None)
    }

    /// Arrival callback for a metadata document.
    pub fn on_metadata_arrived(&self, document: &Document) -> bool {
        let _pipeline = self.pipeline.lock();
        self.metadata_arrival(document)
    }

    /// Routes one proxy arrival through the decryption pipeline.
    pub fn on_arrival(&self, arrival: &Arrival) -> bool {
        let mut handled = false;
        if let Some(document) = &arrival.metadata {
            let _pipeline = self.pipeline.lock();
            handled |= self.metadata_arrival(document);
        }
        if let Some(payload) = &arrival.payload {
            handled |= self.payload_arrival(
                payload,
                Some(arrival.id.as_str()),
                Some(arrival.mime_type.as_str()),
                arrival.chunk,
                arrival.query_id.as_deref(),
            );
        }
        handled
    }

    fn payload_arrival(
        &self,
        bytes: &[u8],
        id: Option<&str>,
        mime_type: Option<&str>,
        chunk: Option<ChunkInfo>,
        query_id: Option<&str>,
    ) -> bool {
        let _pipeline = self.pipeline.lock();

        let parsed = match Envelope::from_bytes(bytes) {
            Ok(parsed) => parsed,
            Err(Error::NotAnEnvelope) => {
                debug!("arriving payload is not an envelope, routing as undecryptable");
                return self.undecryptable_payload(bytes, id, mime_type, chunk, query_id);
            }
            Err(e) => {
                warn!("dropping malformed payload envelope: {e}");
                return false;
            }
        };

        match self
            .client
            .decrypt(&parsed.equation, &parsed.ciphertext, &parsed.iv)
        {
            Ok(Some(plaintext)) => {
                let event = Self::payload_event(plaintext, id, mime_type, chunk, query_id);
                self.listeners.dispatch(|l| l.payload_arrived(&event))
            }
            Ok(None) => {
                debug!("payload policy {} not satisfied", parsed.equation);
                self.undecryptable_payload(bytes, id, mime_type, chunk, query_id)
            }
            Err(e) => {
                warn!("dropping payload, decryption failed: {e}");
                false
            }
        }
    }

    fn undecryptable_payload(
        &self,
        bytes: &[u8],
        id: Option<&str>,
        mime_type: Option<&str>,
        chunk: Option<ChunkInfo>,
        query_id: Option<&str>,
    ) -> bool {
        if self.undecryptable.is_empty() {
            // The messaging layer already counts the item as delivered.
            return true;
        }

        let event = Self::payload_event(bytes.to_vec(), id, mime_type, chunk, query_id);
        self.undecryptable.dispatch(|l| l.payload_arrived(&event))
    }

    fn payload_event(
        data: Vec<u8>,
        id: Option<&str>,
        mime_type: Option<&str>,
        chunk: Option<ChunkInfo>,
        query_id: Option<&str>,
    ) -> PayloadEvent {
        PayloadEvent {
            id: id.map(str::to_string),
            mime_type: mime_type.map(str::to_string),
            chunk,
            query_id: query_id.map(str::to_string),
            data,
        }
    }

    /// A metadata document is all-or-nothing: either every listed field
    /// decrypts and the restored document is delivered, or the whole
    /// document goes to the undecryptable path.
    fn metadata_arrival(&self, document: &Document) -> bool {
        let mut stripped = document.clone();
        let markers = match extract_encryption(&mut stripped) {
            Ok(markers) => markers,
            Err(e) => {
                warn!("dropping metadata document: {e}");
                return false;
            }
        };
        let equation = match PolicyEquation::from_base64(&markers.policy) {
            Ok(equation) => equation,
            Err(e) => {
                warn!("dropping metadata document: {e}");
                return false;
            }
        };

        if markers.is_policy_only() {
            // No field ciphertext to recover; a local satisfiability check
            // decides the routing without a remote call.
            return if equation.is_satisfiable(&self.registry.read()) {
                self.listeners.dispatch(|l| l.metadata_arrived(&stripped))
            } else {
                debug!("metadata policy {equation} not satisfiable locally");
                self.undecryptable
                    .dispatch(|l| l.metadata_arrived(&stripped))
            };
        }

        let iv = match markers.iv.as_deref().map(|iv| BASE64.decode(iv)) {
            Some(Ok(iv)) => iv,
            Some(Err(e)) => {
                warn!("dropping metadata document, bad IV: {e}");
                return false;
            }
            None => {
                warn!("dropping metadata document: encrypted fields without an IV");
                return false;
            }
        };

        let mut recovered = Vec::with_capacity(markers.fields.len());
        for field in &markers.fields {
            let value = match stripped.get(field) {
                Some(value) => value,
                None => continue,
            };
            let ciphertext = match BASE64.decode(value) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    warn!("dropping metadata document, field `{field}` is not base64: {e}");
                    return false;
                }
            };

            match self.client.decrypt(&equation, &ciphertext, &iv) {
                Ok(Some(plaintext)) => match String::from_utf8(plaintext) {
                    Ok(text) => recovered.push((field.clone(), text)),
                    Err(_) => {
                        warn!("dropping metadata document, field `{field}` is not UTF-8");
                        return false;
                    }
                },
                Ok(None) => {
                    debug!("field `{field}` not decryptable, whole document undecryptable");
                    return self
                        .undecryptable
                        .dispatch(|l| l.metadata_arrived(&stripped));
                }
                Err(e) => {
                    warn!("dropping metadata document, decryption failed: {e}");
                    return false;
                }
            }
        }

        for (field, value) in recovered {
            stripped.insert(field, value);
        }
        self.listeners.dispatch(|l| l.metadata_arrived(&stripped))
    }
}

impl<C: CryptoConnector, P: DisseminationProxy> fmt::Debug for Gateway<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("session", &self.client.phase())
            .field("protected_fields", &self.protected_fields)
            .field("listeners", &self.listeners)
            .field("undecryptable", &self.undecryptable)
            .finish_non_exhaustive()
    }
}
