//! Error types for chan-sync
//!
//! The taxonomy mirrors the recovery rules of the load pipeline:
//! - Transport-level errors (no response at all) are recoverable from the
//!   post store unless the thread is an offline/downloaded one.
//! - Server errors carry the HTTP status; 404 is specially recoverable for
//!   threads via the archive-then-store fallback.
//! - Archive errors never escape the fallback resolver.
//! - Per-post parse errors are contained to the one post.

use thiserror::Error;

/// Result type alias for chan-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chan-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx response from the primary source
    #[error("server error: status {status}")]
    Server {
        /// The HTTP status code the server answered with
        status: u16,
    },

    /// Network error (request produced no response)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error while reading a response body or a local resource
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Post store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying SQLx error surfaced outside the mapped store paths
    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Site decoder could not make sense of the response body
    #[error("decode error: {0}")]
    Decode(String),

    /// Archive source failed; contained by the fallback resolver
    #[error("archive error: {0}")]
    Archive(String),

    /// A draft was structurally invalid and could not become a post
    #[error("invalid post draft: {0}")]
    InvalidDraft(String),

    /// No original post could be resolved from any source
    #[error("no original post resolvable for this descriptor")]
    NoOriginalPost,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The load was cancelled by the caller
    #[error("load cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this is a transport-level failure (no response obtained),
    /// eligible for the persisted-data fallback.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

/// Post-store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or connect to the backing database
    #[error("failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// Failed to run schema migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be decoded back into a post
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}
