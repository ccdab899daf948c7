//! The crypto session client.
//!
//! Owns the channel and session to the remote key service and the
//! reconnect-and-retry policy. All cryptographic primitives run inside the
//! service; this client only moves requests and responses and keeps the
//! session alive.
//!
//! An operation that fails with an authentication failure triggers, at most
//! once per call, a teardown of the channel followed by a fresh connect,
//! login and attribute registration, after which the operation is re-issued.
//! A second authentication failure on the retried call is surfaced as
//! [`Error::Authentication`]. The retry is an explicit loop, so the depth is
//! structurally bounded regardless of how the service behaves.

pub mod http;

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::api::{DecryptRequest, EncryptRequest, EncryptResponse, LoginResponse};
use crate::attributes::{AttributeKey, AttributeRegistry};
use crate::error::Error;
use crate::policy::PolicyEquation;

/// Failure classification of a single channel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFailure {
    /// The service no longer accepts the session.
    Auth,

    /// Transport or protocol failure (connectivity, timeout, bad body).
    Transport(String),
}

impl fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => f.write_str("authentication failure"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

/// The authenticated context obtained from the key service at login.
///
/// Held exclusively by the [`SessionClient`]; application code never sees
/// it.
#[derive(Clone)]
pub struct CryptoSession {
    token: String,
    secret: Vec<u8>,
}

impl CryptoSession {
    pub(crate) fn new(token: String, secret: Vec<u8>) -> Self {
        Self { token, secret }
    }

    /// The opaque token quoted on every request.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the session carries usable secret material.
    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }
}

impl fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoSession")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One established request channel to the key service.
pub trait CryptoChannel: Send {
    /// Exchanges for a fresh session.
    fn login(&self) -> Result<LoginResponse, ChannelFailure>;

    /// Pushes the given attribute versions under the session. Idempotent.
    fn register_attributes(
        &self,
        session: &CryptoSession,
        attributes: &[AttributeKey],
    ) -> Result<(), ChannelFailure>;

    /// Encrypts opaque bytes under a policy, optionally reusing a derived
    /// key and IV.
    fn encrypt(
        &self,
        session: &CryptoSession,
        request: &EncryptRequest,
    ) -> Result<EncryptResponse, ChannelFailure>;

    /// Decrypts opaque bytes; `None` means the session's holdings do not
    /// satisfy the policy.
    fn decrypt(
        &self,
        session: &CryptoSession,
        request: &DecryptRequest,
    ) -> Result<Option<Vec<u8>>, ChannelFailure>;
}

/// Builds request channels; owns the endpoint and trust configuration.
pub trait CryptoConnector: Send + Sync {
    /// The channel type produced by this connector.
    type Channel: CryptoChannel;

    /// Establishes a fresh channel.
    fn connect(&self) -> Result<Self::Channel, Error>;
}

/// Observable resting or transient state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No channel, no session.
    Disconnected,

    /// A first session is being established.
    Connecting,

    /// A session is live.
    LoggedIn,

    /// The previous session was rejected; a replacement is being built.
    Reconnecting,
}

/// Result of a payload encryption: everything needed to build an envelope
/// and to encrypt further fields under the same derived key.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    /// The payload ciphertext.
    pub ciphertext: Vec<u8>,

    /// The initialization vector the service derived.
    pub iv: Vec<u8>,

    /// The policy equation as resolved by the service.
    pub resolved_equation: PolicyEquation,

    /// The derived symmetric key, for cheap follow-up field encryptions.
    pub symmetric_key: Vec<u8>,
}

struct Link<Ch> {
    channel: Ch,
    session: CryptoSession,
}

struct Inner<Ch> {
    phase: SessionPhase,
    link: Option<Link<Ch>>,
}

/// The session client: state machine over a [`CryptoConnector`].
pub struct SessionClient<C: CryptoConnector> {
    connector: C,
    registry: Arc<RwLock<AttributeRegistry>>,
    inner: Mutex<Inner<C::Channel>>,
}

impl<C: CryptoConnector> SessionClient<C> {
    /// Creates a client over a connector and the shared attribute registry.
    ///
    /// Nothing is connected until [`login`](Self::login) or the first
    /// operation.
    pub fn new(connector: C, registry: Arc<RwLock<AttributeRegistry>>) -> Self {
        Self {
            connector,
            registry,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Disconnected,
                link: None,
            }),
        }
    }

    /// The current session phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    /// Connects, logs in and registers all locally-held attributes.
    ///
    /// A no-op when a session is already live.
    pub fn login(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.link.is_some() {
            return Ok(());
        }

        self.establish(&mut inner, SessionPhase::Connecting)
    }

    /// Pushes the current attribute snapshot to the key service.
    pub fn register_attributes(&self) -> Result<(), Error> {
        let snapshot = self.registry.read().snapshot();
        self.with_session(|channel, session| channel.register_attributes(session, &snapshot))
    }

    /// Encrypts a payload under the given policy, deriving a fresh key and
    /// IV.
    pub fn encrypt_payload(
        &self,
        equation: &PolicyEquation,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, Error> {
        let request = EncryptRequest {
            equation: equation.to_bytes()?,
            plaintext: plaintext.to_vec(),
            reuse_key: None,
            reuse_iv: None,
        };

        let response = self.with_session(|channel, session| channel.encrypt(session, &request))?;
        if !response.missing_attributes.is_empty() {
            return Err(Error::MissingAttributes(response.missing_attributes));
        }
        if response.ciphertext.is_empty() {
            return Err(Error::EmptyCiphertext);
        }

        Ok(EncryptedPayload {
            ciphertext: response.ciphertext,
            iv: response.iv,
            resolved_equation: PolicyEquation::from_bytes(&response.resolved_equation)?,
            symmetric_key: response.symmetric_key,
        })
    }

    /// Encrypts one more value under an already-derived key and IV, without
    /// deriving fresh material.
    pub fn encrypt_field(
        &self,
        key: &[u8],
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let request = EncryptRequest {
            equation: PolicyEquation::empty().to_bytes()?,
            plaintext: plaintext.to_vec(),
            reuse_key: Some(key.to_vec()),
            reuse_iv: Some(iv.to_vec()),
        };

        let response = self.with_session(|channel, session| channel.encrypt(session, &request))?;
        if response.ciphertext.is_empty() {
            return Err(Error::EmptyCiphertext);
        }

        Ok(response.ciphertext)
    }

    /// Decrypts opaque bytes under the given policy.
    ///
    /// `None` means the item is not decryptable with this session's
    /// attribute holdings; that is a normal outcome, not an error.
    pub fn decrypt(
        &self,
        equation: &PolicyEquation,
        ciphertext: &[u8],
        iv: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        let request = DecryptRequest {
            equation: equation.to_bytes()?,
            ciphertext: ciphertext.to_vec(),
            iv: iv.to_vec(),
        };

        let plaintext =
            self.with_session(|channel, session| channel.decrypt(session, &request))?;

        Ok(plaintext.filter(|p| !p.is_empty()))
    }

    /// Runs one channel operation under the session, reconnecting and
    /// retrying exactly once on an authentication failure.
    fn with_session<T>(
        &self,
        op: impl Fn(&C::Channel, &CryptoSession) -> Result<T, ChannelFailure>,
    ) -> Result<T, Error> {
        let mut inner = self.inner.lock();
        if inner.link.is_none() {
            self.establish(&mut inner, SessionPhase::Connecting)?;
        }

        let mut retried = false;
        loop {
            let outcome = match inner.link.as_ref() {
                Some(link) => op(&link.channel, &link.session),
                None => return Err(Error::Channel("no session established".into())),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(ChannelFailure::Auth) if !retried => {
                    retried = true;
                    info!("session rejected by the key service, reconnecting");
                    self.establish(&mut inner, SessionPhase::Reconnecting)?;
                }
                Err(ChannelFailure::Auth) => {
                    inner.link = None;
                    inner.phase = SessionPhase::Disconnected;
                    return Err(Error::Authentication);
                }
                Err(ChannelFailure::Transport(msg)) => return Err(Error::Channel(msg)),
            }
        }
    }

    /// Tears down any previous link and builds a fresh one: connect, login,
    /// register the full attribute snapshot.
    fn establish(
        &self,
        inner: &mut Inner<C::Channel>,
        entry: SessionPhase,
    ) -> Result<(), Error> {
        inner.phase = entry;
        inner.link = None;

        let channel = match self.connector.connect() {
            Ok(channel) => channel,
            Err(e) => {
                inner.phase = SessionPhase::Disconnected;
                return Err(e);
            }
        };

        let login = match channel.login() {
            Ok(login) => login,
            Err(failure) => {
                inner.phase = SessionPhase::Disconnected;
                return Err(match failure {
                    ChannelFailure::Auth => {
                        Error::Login("service rejected the login exchange".into())
                    }
                    ChannelFailure::Transport(msg) => Error::Channel(msg),
                });
            }
        };

        let session = CryptoSession::new(login.session_token, login.secret);
        if !session.has_secret() {
            inner.phase = SessionPhase::Disconnected;
            return Err(Error::Login("session carries no secret material".into()));
        }

        let snapshot = self.registry.read().snapshot();
        if let Err(failure) = channel.register_attributes(&session, &snapshot) {
            inner.phase = SessionPhase::Disconnected;
            return Err(match failure {
                ChannelFailure::Auth => Error::Authentication,
                ChannelFailure::Transport(msg) => Error::Channel(msg),
            });
        }

        debug!(
            "crypto session established, {} attribute versions registered",
            snapshot.len()
        );
        inner.link = Some(Link { channel, session });
        inner.phase = SessionPhase::LoggedIn;
        Ok(())
    }
}

impl<C: CryptoConnector> fmt::Debug for SessionClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
