//! Blocking HTTP channel to the key service.
//!
//! The channel is plaintext or transport-secured depending on whether a
//! trust anchor is configured; with an anchor, TLS is pinned to it via
//! rustls. Every request carries a bounded timeout, and a timeout surfaces
//! as a transport failure, never as "not decryptable".

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Certificate, StatusCode, Url};

use crate::api::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, LoginResponse,
    RegisterAttributesRequest, WireAttribute,
};
use crate::attributes::AttributeKey;
use crate::client::{ChannelFailure, CryptoChannel, CryptoConnector, CryptoSession};
use crate::consts::DEFAULT_REQUEST_TIMEOUT;
use crate::error::Error;

const CLIENT_VERSION_HEADER: &str = "x-veilgate-client-version";

/// Connector building [`HttpChannel`]s against one endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: Url,
    trust_anchor: Option<Certificate>,
    timeout: Duration,
}

impl HttpConnector {
    /// Creates a connector for the given endpoint URL.
    pub fn new(endpoint: &str) -> Result<Self, Error> {
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let endpoint = Url::parse(&normalized)
            .map_err(|e| Error::Channel(format!("invalid endpoint `{endpoint}`: {e}")))?;

        Ok(Self {
            endpoint,
            trust_anchor: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Pins the channel to a PEM-encoded trust anchor, enabling TLS.
    pub fn with_trust_anchor_pem(mut self, pem: &[u8]) -> Result<Self, Error> {
        let certificate = Certificate::from_pem(pem)
            .map_err(|e| Error::Channel(format!("invalid trust anchor: {e}")))?;
        self.trust_anchor = Some(certificate);
        Ok(self)
    }

    /// Overrides the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CryptoConnector for HttpConnector {
    type Channel = HttpChannel;

    fn connect(&self) -> Result<HttpChannel, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CLIENT_VERSION_HEADER,
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .default_headers(headers);
        if let Some(anchor) = &self.trust_anchor {
            builder = builder.use_rustls_tls().add_root_certificate(anchor.clone());
        }

        let client = builder
            .build()
            .map_err(|e| Error::Channel(format!("could not build channel: {e}")))?;

        Ok(HttpChannel {
            client,
            base: self.endpoint.clone(),
        })
    }
}

/// One established HTTP channel.
#[derive(Debug)]
pub struct HttpChannel {
    client: Client,
    base: Url,
}

impl HttpChannel {
    fn url(&self, path: &str) -> Result<Url, ChannelFailure> {
        self.base
            .join(path)
            .map_err(|e| ChannelFailure::Transport(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> ChannelFailure {
    if e.is_timeout() {
        ChannelFailure::Transport(format!("request timed out: {e}"))
    } else {
        ChannelFailure::Transport(e.to_string())
    }
}

fn classify(result: reqwest::Result<Response>) -> Result<Response, ChannelFailure> {
    let response = result.map_err(transport)?;
    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChannelFailure::Auth),
        _ => response.error_for_status().map_err(transport),
    }
}

impl CryptoChannel for HttpChannel {
    fn login(&self) -> Result<LoginResponse, ChannelFailure> {
        let response = classify(self.client.post(self.url("v1/login")?).send())?;
        response.json().map_err(transport)
    }

    fn register_attributes(
        &self,
        session: &CryptoSession,
        attributes: &[AttributeKey],
    ) -> Result<(), ChannelFailure> {
        let body = RegisterAttributesRequest {
            attributes: attributes.iter().map(WireAttribute::from).collect(),
        };

        classify(
            self.client
                .post(self.url("v1/attributes")?)
                .bearer_auth(session.token())
                .json(&body)
                .send(),
        )?;

        Ok(())
    }

    fn encrypt(
        &self,
        session: &CryptoSession,
        request: &EncryptRequest,
    ) -> Result<EncryptResponse, ChannelFailure> {
        let response = classify(
            self.client
                .post(self.url("v1/encrypt")?)
                .bearer_auth(session.token())
                .json(request)
                .send(),
        )?;

        response.json().map_err(transport)
    }

    fn decrypt(
        &self,
        session: &CryptoSession,
        request: &DecryptRequest,
    ) -> Result<Option<Vec<u8>>, ChannelFailure> {
        let response = classify(
            self.client
                .post(self.url("v1/decrypt")?)
                .bearer_auth(session.token())
                .json(request)
                .send(),
        )?;

        let body: DecryptResponse = response.json().map_err(transport)?;
        Ok(body.plaintext)
    }
}
