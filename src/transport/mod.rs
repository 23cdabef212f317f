//! Outbound HTTP transport.
//!
//! # Responsibilities
//! - Define the capability the resilience layer consumes:
//!   `perform(request) -> response | TransportError`
//! - Provide the production implementation on top of reqwest
//!
//! # Design Decisions
//! - Non-2xx statuses are responses, not errors; classification happens in
//!   `resilience`
//! - "No connectivity" is its own error variant because it is never retried
//! - Bodies are fully buffered (`Bytes`); payloads here are small

pub mod reqwest_transport;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use thiserror::Error;
use url::Url;

pub use reqwest_transport::ReqwestTransport;

/// A fully-formed outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// A GET request with no headers.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of a header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Errors raised before a response was received.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The device has no network connectivity.
    #[error("no network connectivity")]
    Offline,

    /// The request did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// Connection to the host could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Anything else (TLS, protocol, body read).
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_offline(&self) -> bool {
        matches!(self, TransportError::Offline)
    }
}

/// The HTTP capability consumed by the retry controller and config fetches.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
