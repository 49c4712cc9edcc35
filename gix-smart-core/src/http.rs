//! The contract the HTTP collaborator must fulfil.
//!
//! Connection pooling, TLS, redirects, authentication and timeouts all live
//! behind this boundary. Implementations are expected to turn non-success
//! statuses into [`TransportError`]s; the protocol drivers treat every
//! transport failure as a server-side synchronisation failure.

use std::io::Read;

/// An error raised by the HTTP collaborator.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// Human readable description of the failure.
    pub message: String,
    /// The underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create an error from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A streaming response body.
///
/// Chunks arrive in receive order; `None` marks the end of the body. The
/// returned slice may alias an internal buffer that is reused by the next
/// call, so callers copy what they keep.
pub trait ResponseBody {
    /// The next chunk of the body, or `None` at its end.
    fn next_chunk(&mut self) -> Result<Option<&[u8]>, TransportError>;
}

/// A minimal blocking HTTP client.
///
/// Each call is independent; the drivers assume no session state beyond what
/// the smart HTTP protocol itself requires.
pub trait HttpClient {
    /// The response body type produced by this client.
    type Body: ResponseBody;

    /// Perform a GET and return the streaming response body.
    fn get(&mut self, url: &url::Url, headers: &[(String, String)]) -> Result<Self::Body, TransportError>;

    /// Perform a POST, streaming `body` out, and return the response body.
    fn post(
        &mut self,
        url: &url::Url,
        headers: &[(String, String)],
        body: &mut dyn Read,
    ) -> Result<Self::Body, TransportError>;
}

impl<C: HttpClient + ?Sized> HttpClient for &mut C {
    type Body = C::Body;

    fn get(&mut self, url: &url::Url, headers: &[(String, String)]) -> Result<Self::Body, TransportError> {
        (**self).get(url, headers)
    }

    fn post(
        &mut self,
        url: &url::Url,
        headers: &[(String, String)],
        body: &mut dyn Read,
    ) -> Result<Self::Body, TransportError> {
        (**self).post(url, headers, body)
    }
}
