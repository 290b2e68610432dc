//! Archive fallback resolution
//!
//! When the primary source cannot supply certain posts (a purged thread, a
//! full 404), a third-party archive may still hold them. The resolver fetches
//! the archive's rendition, keeps only the posts worth merging in, and writes
//! a fetch-attempt audit record for every real fetch. Archive trouble never
//! fails the overall load; the worst outcome is an empty contribution.

use std::sync::Arc;

use crate::archive::{ArchiveDescriptor, ArchiveFetchAttempt, ArchiveManager};
use crate::error::Result;
use crate::store::PostStore;
use crate::types::{ChanDescriptor, Post, PostDraft};

use super::LoadRequest;

/// What the archive contributed to one load pass.
#[derive(Default)]
pub(crate) struct ArchiveContribution {
    /// Drafts judged worth merging in
    pub(crate) drafts: Vec<PostDraft>,
    /// The archive they came from, when a fetch actually happened
    pub(crate) archive: Option<ArchiveDescriptor>,
}

pub(crate) struct ArchiveFallbackResolver {
    archives: Arc<dyn ArchiveManager>,
    store: Arc<dyn PostStore>,
    verbose_logs: bool,
}

impl ArchiveFallbackResolver {
    pub(crate) fn new(
        archives: Arc<dyn ArchiveManager>,
        store: Arc<dyn PostStore>,
        verbose_logs: bool,
    ) -> Self {
        Self {
            archives,
            store,
            verbose_logs,
        }
    }

    /// Fetch and filter the archive's rendition of the requested thread.
    ///
    /// Callers treat any `Err` as "contributed nothing"; this function still
    /// guarantees the audit record was written for every fetch it performed.
    pub(crate) async fn posts_from_archive_if_necessary(
        &self,
        request: &LoadRequest,
        fresh_drafts: &[PostDraft],
    ) -> Result<ArchiveContribution> {
        let ChanDescriptor::Thread(thread) = &request.descriptor else {
            // Catalogs are never loaded from archives.
            return Ok(ArchiveContribution::default());
        };

        if request.offline_thread {
            // Offline threads must not resurrect from a third-party host.
            return Ok(ArchiveContribution::default());
        }

        if request.background_poll {
            // Low-frequency polls skip archives so we do not hammer a
            // third-party host every few seconds.
            return Ok(ArchiveContribution::default());
        }

        let Some(archive) = self.archives.archive_for_thread(thread).await? else {
            if self.verbose_logs {
                tracing::debug!(thread = %thread, "no archive for thread");
            }
            return Ok(ArchiveContribution::default());
        };

        let Some(url) = self.archives.thread_fetch_url(thread, &archive) else {
            return Ok(ArchiveContribution::default());
        };

        let supports_media = self.archives.stores_media(&archive, &thread.board);

        let archive_posts = match self.archives.fetch_thread(&url, thread, &archive).await {
            Ok(posts) => {
                tracing::debug!(
                    thread = %thread,
                    archive = %archive.name,
                    count = posts.len(),
                    supports_media,
                    "fetched archive posts"
                );
                self.archives
                    .record_fetch_attempt(ArchiveFetchAttempt::success(
                        archive.archive_id,
                        thread.clone(),
                    ))
                    .await?;
                posts
            }
            Err(e) => {
                tracing::error!(
                    thread = %thread,
                    archive = %archive.name,
                    error = %e,
                    "error while fetching archive posts"
                );
                self.archives
                    .record_fetch_attempt(ArchiveFetchAttempt::error(
                        archive.archive_id,
                        thread.clone(),
                        e.to_string(),
                    ))
                    .await?;
                Vec::new()
            }
        };

        if archive_posts.is_empty() {
            return Ok(ArchiveContribution {
                drafts: Vec::new(),
                archive: Some(archive),
            });
        }

        let fresh_by_no: std::collections::HashMap<i64, &PostDraft> = fresh_drafts
            .iter()
            .map(|draft| (draft.post_no, draft))
            .collect();

        let archive_post_nos: Vec<i64> = archive_posts.iter().map(|post| post.post_no).collect();
        let cached_by_no: std::collections::HashMap<i64, Post> = self
            .store
            .thread_posts_by_nos(thread, &archive_post_nos)
            .await?
            .into_iter()
            .map(|post| (post.post_no, post))
            .collect();

        let total = archive_posts.len();
        let mut retained = Vec::new();
        for mut archive_post in archive_posts {
            if !retain_deleted_or_updated(&archive_post, &fresh_by_no, &cached_by_no, supports_media)
            {
                continue;
            }
            archive_post.archive_id = archive.archive_id;
            retained.push(archive_post);
        }

        tracing::debug!(
            thread = %thread,
            total,
            retained = retained.len(),
            "archive contributed deleted or updated posts"
        );

        Ok(ArchiveContribution {
            drafts: retained,
            archive: Some(archive),
        })
    }
}

/// Whether to keep `archive_post`.
///
/// Kept when it exists in neither the fresh set nor the stored set (a post
/// the server deleted), or when it is strictly more complete than the version
/// we already have. The live or cached version wins ties.
fn retain_deleted_or_updated(
    archive_post: &PostDraft,
    fresh_by_no: &std::collections::HashMap<i64, &PostDraft>,
    cached_by_no: &std::collections::HashMap<i64, Post>,
    supports_media: bool,
) -> bool {
    if let Some(fresh) = fresh_by_no.get(&archive_post.post_no) {
        return is_more_complete(
            archive_post,
            fresh.media.len(),
            fresh.raw_comment.len(),
            supports_media,
        );
    }

    if let Some(cached) = cached_by_no.get(&archive_post.post_no) {
        return is_more_complete(
            archive_post,
            cached.media.len(),
            cached.comment.raw.len(),
            supports_media,
        );
    }

    // Neither fresh nor cached: deleted server-side, always worth recovering.
    true
}

/// Strictly-more-complete comparison between an archive post and whichever
/// version it collided with. An archive that only mirrors thumbnails cannot
/// win on media richness.
fn is_more_complete(
    archive_post: &PostDraft,
    other_media: usize,
    other_comment_len: usize,
    supports_media: bool,
) -> bool {
    if supports_media && archive_post.media.len() > other_media {
        return true;
    }

    !archive_post.raw_comment.is_empty() && other_comment_len == 0
}
