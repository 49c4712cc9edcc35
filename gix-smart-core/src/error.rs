//! Error types shared by all smart-transport operations.

/// Result type alias for smart-transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The failure taxonomy surfaced by every fetch, push, or discovery
/// operation.
///
/// A single operation fails with exactly one of these; the drivers never
/// retry. Transport-level failures from the HTTP collaborator are folded
/// into [`Error::Sync`] since the server side of the exchange is what went
/// out of sync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The endpoint cannot be used for smart HTTP at all.
    #[error("invalid endpoint: {message}")]
    InvalidEndpoint {
        /// What was wrong with the endpoint.
        message: String,
    },

    /// The client capability list is unusable, e.g. it lacks an `agent`
    /// entry to derive the `User-Agent` header from.
    #[error("invalid capabilities: {message}")]
    InvalidCapabilities {
        /// What was wrong with the capability list.
        message: String,
    },

    /// A protocol frame was malformed, unexpected, or truncated.
    #[error("protocol error: {0}")]
    Smart(#[from] crate::decode::Error),

    /// Pack ingestion or a reference write failed in the object store.
    #[error("object store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server signalled a semantic failure: an `ERR` payload, the
    /// aggregated side-band error channel, or an out-of-band response body
    /// that was not pkt-line framed.
    #[error("remote: {0}")]
    Sync(String),
}

impl Error {
    /// Wrap a store failure.
    pub fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }

    /// Create a server-signalled failure from a message.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }

    /// Create a server-signalled failure from raw response bytes, trimming
    /// the trailing line break servers tend to append to error pages.
    pub fn sync_from_bytes(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        Self::Sync(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl From<crate::http::TransportError> for Error {
    fn from(err: crate::http::TransportError) -> Self {
        Self::Sync(err.to_string())
    }
}
