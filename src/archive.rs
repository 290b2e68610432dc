//! Third-party archive seam
//!
//! Archives are independently operated mirrors that may retain posts the
//! primary source has purged. The manager resolves which archive (if any)
//! serves a thread, fetches the archive's rendition, and keeps the
//! fetch-attempt audit trail that external backoff logic is driven from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::types::{BoardDescriptor, PostDraft, ThreadDescriptor};

/// Identifies a secondary data source for a site.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveDescriptor {
    /// Stable archive id, unique per archive
    pub archive_id: i64,
    /// Human-readable archive name
    pub name: String,
    /// Archive host
    pub domain: String,
}

/// Audit record of one archive fetch attempt.
///
/// Written unconditionally after every real archive fetch, success or error;
/// the pipeline itself never reads these back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveFetchAttempt {
    /// The archive that was contacted
    pub archive_id: i64,
    /// The thread the fetch was for
    pub thread: ThreadDescriptor,
    /// `None` on success, the error message otherwise
    pub error: Option<String>,
    /// When the attempt finished
    pub fetched_at: DateTime<Utc>,
}

impl ArchiveFetchAttempt {
    /// Record a successful fetch
    pub fn success(archive_id: i64, thread: ThreadDescriptor) -> Self {
        Self {
            archive_id,
            thread,
            error: None,
            fetched_at: Utc::now(),
        }
    }

    /// Record a failed fetch
    pub fn error(archive_id: i64, thread: ThreadDescriptor, message: impl Into<String>) -> Self {
        Self {
            archive_id,
            thread,
            error: Some(message.into()),
            fetched_at: Utc::now(),
        }
    }
}

/// Resolves and fetches third-party archives.
///
/// The archive wire format is site-specific and owned by the implementation;
/// [`fetch_thread`](ArchiveManager::fetch_thread) returns ready drafts.
#[async_trait]
pub trait ArchiveManager: Send + Sync {
    /// Resolve the archive serving `thread`, if any is known and alive.
    async fn archive_for_thread(&self, thread: &ThreadDescriptor)
    -> Result<Option<ArchiveDescriptor>>;

    /// Build the fetch URL for `thread` on `archive`, if the archive exposes one.
    fn thread_fetch_url(&self, thread: &ThreadDescriptor, archive: &ArchiveDescriptor)
    -> Option<Url>;

    /// Fetch the archive's rendition of `thread` as drafts.
    async fn fetch_thread(
        &self,
        url: &Url,
        thread: &ThreadDescriptor,
        archive: &ArchiveDescriptor,
    ) -> Result<Vec<PostDraft>>;

    /// Append a fetch attempt to the audit trail.
    async fn record_fetch_attempt(&self, attempt: ArchiveFetchAttempt) -> Result<()>;

    /// Whether `archive` mirrors full media for `board` (not just thumbnails).
    fn stores_media(&self, archive: &ArchiveDescriptor, board: &BoardDescriptor) -> bool;

    /// The archive most recently used for `thread`, if any.
    ///
    /// Consulted when a response is rebuilt from the store without a fresh
    /// archive pass, so archive-sourced rows keep resolving.
    async fn last_used_archive(&self, thread: &ThreadDescriptor) -> Option<ArchiveDescriptor>;
}
