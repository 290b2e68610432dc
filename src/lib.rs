//! # chan-sync
//!
//! Thread and catalog synchronization pipeline for imageboard browser clients.
//!
//! ## Design Philosophy
//!
//! chan-sync is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Resilient** - Partial failures (archive outages, single bad posts) are
//!   contained; a load pass degrades instead of failing wholesale
//! - **Cache-friendly** - Unchanged posts are detected by content hash and
//!   never re-parsed
//! - **Pluggable** - The HTTP transport, site wire decoders, post store,
//!   archive manager, filter engine, and saved-reply lookup are all traits
//!
//! ## Pipeline
//!
//! One load pass runs: fetch, accumulate drafts, merge in archive posts,
//! parse in parallel, persist, reload the authoritative set, reconcile
//! against the previously displayed posts. A 404 on a thread falls back to a
//! third-party archive; a transport failure falls back to persisted data.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chan_sync::{
//!     ChanDescriptor, ChanLoader, LoadRequest, LoaderConfig, ThreadDescriptor,
//!     BoardDescriptor, ReqwestTransport, SqlitePostStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     archives: Arc<dyn chan_sync::ArchiveManager>,
//! #     filters: Arc<dyn chan_sync::FilterEngine>,
//! #     saved: Arc<dyn chan_sync::SavedReplyStore>,
//! #     decoder: Arc<dyn chan_sync::SiteDecoder>,
//! # ) -> chan_sync::Result<()> {
//! let store = Arc::new(SqlitePostStore::new(std::path::Path::new("posts.db")).await?);
//! let loader = ChanLoader::new(
//!     LoaderConfig::default(),
//!     Arc::new(ReqwestTransport::default()),
//!     store,
//!     archives,
//!     filters,
//!     saved,
//! );
//!
//! let thread = ThreadDescriptor::new(BoardDescriptor::new("4chan", "g"), 1000);
//! let request = LoadRequest::new(ChanDescriptor::Thread(thread), decoder);
//! let url = url::Url::parse("https://a.4cdn.org/g/thread/1000.json").unwrap();
//!
//! let response = loader.execute(url, request, CancellationToken::new()).await?;
//! println!("got {} posts", response.posts.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Third-party archive seam and audit types
pub mod archive;
/// Comment markup resolution and reference extraction
pub mod comment;
/// Configuration types
pub mod config;
/// Site decoder seam
pub mod decoder;
/// Error types
pub mod error;
/// Filter rules and the filter-engine seam
pub mod filter;
/// Load orchestration (accumulator, archive fallback, parser, reconciler)
pub mod loader;
/// Saved-reply lookup seam
pub mod saved_reply;
/// Post persistence layer
pub mod store;
/// HTTP transport seam
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use archive::{ArchiveDescriptor, ArchiveFetchAttempt, ArchiveManager};
pub use comment::{CommentLink, CommentParser, ParsedComment};
pub use config::LoaderConfig;
pub use decoder::SiteDecoder;
pub use error::{Error, Result, StoreError};
pub use filter::{FilterAction, FilterEngine, FilterRule, RegexFilterEngine};
pub use loader::{ChanLoader, LoadRequest, PostAccumulator};
pub use saved_reply::{MemorySavedReplyStore, SavedReplyStore};
pub use store::{PostStore, SqlitePostStore};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
pub use types::{
    BoardDescriptor, ChanDescriptor, LoaderResponse, MediaInfo, NO_ARCHIVE_ID, Post,
    PostDescriptor, PostDraft, ThreadDescriptor,
};
