//! Veilgate errors.

use thiserror::Error;

/// Errors produced by the gateway, its codecs and the crypto session client.
///
/// "Not decryptable" is deliberately absent: it is a normal outcome, reported
/// as `None` by [`decrypt`](crate::client::SessionClient::decrypt) and routed
/// to the undecryptable listener set by the arrival pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// The channel to the key service could not be built or used.
    #[error("channel error: {0}")]
    Channel(String),

    /// The login exchange failed or returned no usable secret material.
    #[error("login failed: {0}")]
    Login(String),

    /// The key service rejected the session again after a reconnect.
    #[error("session rejected by the key service")]
    Authentication,

    /// A policy expression references an attribute id that is not registered.
    #[error("unknown attribute {0}")]
    UnknownAttribute(u32),

    /// A policy equation blob or expression could not be decoded.
    #[error("malformed equation: {0}")]
    MalformedEquation(String),

    /// An arriving document or envelope violates the expected format.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The input does not carry the payload-envelope prelude.
    #[error("not a payload envelope")]
    NotAnEnvelope,

    /// The key service does not know attributes required by the policy.
    #[error("attributes unknown to the key service: {0:?}")]
    MissingAttributes(Vec<u32>),

    /// The key service returned an empty ciphertext.
    #[error("empty ciphertext")]
    EmptyCiphertext,

    /// The attribute configuration source could not be parsed.
    #[error("attribute configuration: {0}")]
    Config(String),

    /// The messaging proxy rejected a publication.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Equation or envelope (de)serialization failure.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
