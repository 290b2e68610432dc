//! Thread/catalog load orchestration
//!
//! One load pass is a straight sequential composition: fetch, accumulate,
//! archive-merge, parse, persist, reload, reconcile. The orchestrator owns
//! the branching between those stages: 2xx responses run the full pipeline,
//! transport errors fall back to persisted data, 404s for threads run the
//! archive fallback, and anything else fails with a typed server error.
//!
//! Submodules:
//! - [`accumulator`] - Per-fetch draft collection and the staleness skip
//! - [`archive_fallback`] - Third-party archive resolution and retention
//! - [`merge`] - Combining fresh drafts with the archive contribution
//! - [`parse`] - Bounded parallel draft parsing
//! - [`reconcile`] - Deletion detection and reply-graph construction

mod accumulator;
mod archive_fallback;
mod merge;
mod parse;
mod reconcile;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use accumulator::PostAccumulator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::{ArchiveDescriptor, ArchiveManager};
use crate::comment::CommentParser;
use crate::config::LoaderConfig;
use crate::decoder::SiteDecoder;
use crate::error::{Error, Result};
use crate::filter::FilterEngine;
use crate::saved_reply::SavedReplyStore;
use crate::store::PostStore;
use crate::transport::Transport;
use crate::types::{ChanDescriptor, LoaderResponse, NO_ARCHIVE_ID, Post, PostDraft};

use archive_fallback::{ArchiveContribution, ArchiveFallbackResolver};
use parse::{ParseContext, ParserPool};
use reconcile::{fill_in_replies, reconcile};

/// Parameters for one load pass.
pub struct LoadRequest {
    /// What to load
    pub descriptor: ChanDescriptor,
    /// Site-specific wire decoder for the primary source's payload
    pub decoder: Arc<dyn SiteDecoder>,
    /// The previously displayed post set for this descriptor
    pub cached: Vec<Post>,
    /// Whether this descriptor is a locally downloaded/offline thread
    pub offline_thread: bool,
    /// Whether this is a low-frequency background poll (skips archives)
    pub background_poll: bool,
}

impl LoadRequest {
    /// A request with no cached posts and no special flags.
    pub fn new(descriptor: ChanDescriptor, decoder: Arc<dyn SiteDecoder>) -> Self {
        Self {
            descriptor,
            decoder,
            cached: Vec::new(),
            offline_thread: false,
            background_poll: false,
        }
    }
}

/// Top-level coordinator for thread/catalog synchronization.
///
/// Owns the parser pool and every external seam. One loader serves any number
/// of sequential loads; callers are expected to avoid overlapping loads for
/// the same descriptor.
pub struct ChanLoader {
    config: LoaderConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PostStore>,
    archives: Arc<dyn ArchiveManager>,
    filter_engine: Arc<dyn FilterEngine>,
    saved_replies: Arc<dyn SavedReplyStore>,
    comment_parser: Arc<CommentParser>,
    pool: ParserPool,
}

impl ChanLoader {
    /// Wire up a loader from its external collaborators.
    pub fn new(
        config: LoaderConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PostStore>,
        archives: Arc<dyn ArchiveManager>,
        filter_engine: Arc<dyn FilterEngine>,
        saved_replies: Arc<dyn SavedReplyStore>,
    ) -> Self {
        let pool = ParserPool::new(config.parser_workers);

        Self {
            config,
            transport,
            store,
            archives,
            filter_engine,
            saved_replies,
            comment_parser: Arc::new(CommentParser::new()),
            pool,
        }
    }

    /// Number of parse workers the loader was constructed with
    pub fn parser_workers(&self) -> usize {
        self.pool.workers()
    }

    /// Run one load pass for `request` against `url`.
    ///
    /// Cancelling `cancel` aborts the in-flight network call and abandons
    /// parse batches that have not been dispatched yet.
    pub async fn execute(
        &self,
        url: Url,
        request: LoadRequest,
        cancel: CancellationToken,
    ) -> Result<LoaderResponse> {
        tracing::debug!(
            descriptor = %request.descriptor,
            url = %url,
            offline = request.offline_thread,
            background_poll = request.background_poll,
            "load started"
        );

        // Fully downloaded threads are served from the store without touching
        // the network; an empty local copy falls through to a normal load.
        if request.offline_thread && request.descriptor.is_thread() {
            if let Some(response) = self.load_from_store(&request).await? {
                return Ok(response);
            }
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            fetched = self.transport.get(&url) => fetched,
        };

        let response = match fetched {
            Ok(response) => response,
            Err(e) if e.is_transport_level() => {
                if request.offline_thread {
                    return Err(e);
                }
                // No response at all; whatever the store holds beats an error
                // screen.
                return match self.load_from_store(&request).await? {
                    Some(response) => {
                        tracing::debug!(
                            descriptor = %request.descriptor,
                            error = %e,
                            "recovered from network error with stored posts"
                        );
                        Ok(response)
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        if !response.is_success() {
            if response.status == 404
                && request.descriptor.is_thread()
                && !request.offline_thread
            {
                match self.load_from_archive_or_store(&request, &cancel).await {
                    Ok(Some(recovered)) => {
                        tracing::debug!(
                            descriptor = %request.descriptor,
                            "recovered from 404 via archive/store"
                        );
                        return Ok(recovered);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            descriptor = %request.descriptor,
                            error = %e,
                            "archive/store recovery failed"
                        );
                    }
                }
            }

            return Err(Error::Server {
                status: response.status,
            });
        }

        self.load_from_network(response.body, &request, &cancel).await
    }

    /// Full pipeline for a 2xx response body.
    async fn load_from_network(
        &self,
        body: Vec<u8>,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<LoaderResponse> {
        let accumulator = PostAccumulator::new(
            Arc::clone(&self.store),
            request.descriptor.clone(),
        );

        match &request.descriptor {
            ChanDescriptor::Thread(_) => {
                request.decoder.decode_thread(&body, &accumulator).await?
            }
            ChanDescriptor::Catalog(_) => {
                request.decoder.decode_catalog(&body, &accumulator).await?
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let fresh_drafts = accumulator.to_parse().await;

        let archive_started = Instant::now();
        let contribution = self.resolve_archive_posts(request, &fresh_drafts).await;
        let archive_duration = archive_started.elapsed();
        let archive_count = contribution.drafts.len();

        let parse_started = Instant::now();
        let merged = merge::merge_drafts(fresh_drafts, contribution.drafts);
        let internal_ids = self.internal_ids(&accumulator, &merged).await;
        let parsed = self
            .parse_drafts(merged, internal_ids, request, cancel)
            .await;
        let parse_duration = parse_started.elapsed();

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let store_started = Instant::now();
        let stored_post_nos = self
            .store
            .insert_or_update_many(&parsed, request.descriptor.is_catalog())
            .await?;
        let store_duration = store_started.elapsed();

        let reload_started = Instant::now();
        let reloaded = self
            .reload_posts(&accumulator, request, contribution.archive.as_ref())
            .await?;
        let reload_duration = reload_started.elapsed();

        tracing::debug!(
            descriptor = %request.descriptor,
            parsed = parsed.len(),
            stored = stored_post_nos.len(),
            reloaded = reloaded.len(),
            archive_posts = archive_count,
            parse_ms = parse_duration.as_millis() as u64,
            store_ms = store_duration.as_millis() as u64,
            reload_ms = reload_duration.as_millis() as u64,
            archive_ms = archive_duration.as_millis() as u64,
            "load pass stats"
        );

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let op = accumulator.op().await.ok_or(Error::NoOriginalPost)?;

        Ok(reconcile(
            op,
            request.cached.clone(),
            reloaded,
            &request.descriptor,
        ))
    }

    /// Rebuild a response purely from persisted data.
    ///
    /// Returns `None` when the store yields zero posts or no OP.
    async fn load_from_store(&self, request: &LoadRequest) -> Result<Option<LoaderResponse>> {
        let mut posts = match &request.descriptor {
            ChanDescriptor::Thread(thread) => {
                let archive_id = self
                    .archives
                    .last_used_archive(thread)
                    .await
                    .map_or(NO_ARCHIVE_ID, |archive| archive.archive_id);

                self.store.thread_posts(thread, archive_id, None).await?
            }
            ChanDescriptor::Catalog(board) => {
                self.store
                    .catalog_posts(board, NO_ARCHIVE_ID, self.config.catalog_fallback_posts)
                    .await?
            }
        };

        if posts.is_empty() {
            tracing::debug!(descriptor = %request.descriptor, "store fallback found no posts");
            return Ok(None);
        }

        let Some(op_post) = posts.iter().find(|post| post.op).cloned() else {
            tracing::error!(descriptor = %request.descriptor, "stored posts have no OP");
            return Ok(None);
        };

        if request.descriptor.is_thread() {
            fill_in_replies(&mut posts);
        }

        Ok(Some(LoaderResponse {
            op: op_post.to_draft(),
            posts,
        }))
    }

    /// 404 recovery: pull the archive's rendition, persist it, and serve the
    /// reloaded set. Returns `None` when neither the archive nor the store
    /// can produce posts with an OP.
    async fn load_from_archive_or_store(
        &self,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<LoaderResponse>> {
        let ChanDescriptor::Thread(thread) = &request.descriptor else {
            // Catalogs cannot be loaded from archives.
            return Ok(None);
        };

        let contribution = self.resolve_archive_posts(request, &[]).await;

        if !contribution.drafts.is_empty() {
            let mut internal_ids: HashSet<i64> = contribution
                .drafts
                .iter()
                .map(|draft| draft.post_no)
                .collect();
            internal_ids.extend(request.cached.iter().map(|post| post.post_no));

            let parsed = self
                .parse_drafts(contribution.drafts, internal_ids, request, cancel)
                .await;
            self.store.insert_or_update_many(&parsed, false).await?;
        }

        let archive_id = match &contribution.archive {
            Some(archive) => archive.archive_id,
            None => self
                .archives
                .last_used_archive(thread)
                .await
                .map_or(NO_ARCHIVE_ID, |archive| archive.archive_id),
        };

        let mut reloaded = self.store.thread_posts(thread, archive_id, None).await?;
        if reloaded.is_empty() {
            tracing::debug!(thread = %thread, "archive/store recovery found no posts");
            return Ok(None);
        }

        let Some(op_post) = reloaded.iter().find(|post| post.op).cloned() else {
            tracing::error!(thread = %thread, "recovered posts have no OP");
            return Ok(None);
        };

        fill_in_replies(&mut reloaded);

        Ok(Some(reconcile(
            op_post.to_draft(),
            request.cached.clone(),
            reloaded,
            &request.descriptor,
        )))
    }

    /// Archive resolution with failure containment: any error is logged and
    /// becomes an empty contribution.
    async fn resolve_archive_posts(
        &self,
        request: &LoadRequest,
        fresh_drafts: &[PostDraft],
    ) -> ArchiveContribution {
        let resolver = ArchiveFallbackResolver::new(
            Arc::clone(&self.archives),
            Arc::clone(&self.store),
            self.config.verbose_logs,
        );

        match resolver
            .posts_from_archive_if_necessary(request, fresh_drafts)
            .await
        {
            Ok(contribution) => contribution,
            Err(e) => {
                tracing::error!(
                    descriptor = %request.descriptor,
                    error = %e,
                    "error while trying to get posts from archive"
                );
                ArchiveContribution::default()
            }
        }
    }

    /// The post numbers known to exist in this fetch: everything the
    /// accumulator observed plus the archive contribution.
    async fn internal_ids(
        &self,
        accumulator: &PostAccumulator,
        merged: &[PostDraft],
    ) -> HashSet<i64> {
        let mut internal_ids: HashSet<i64> =
            accumulator.ordered_post_nos().await.into_iter().collect();
        internal_ids.extend(merged.iter().map(|draft| draft.post_no));
        internal_ids
    }

    async fn parse_drafts(
        &self,
        drafts: Vec<PostDraft>,
        internal_ids: HashSet<i64>,
        request: &LoadRequest,
        cancel: &CancellationToken,
    ) -> Vec<Post> {
        if drafts.is_empty() {
            return Vec::new();
        }

        let context = Arc::new(ParseContext {
            comment_parser: Arc::clone(&self.comment_parser),
            filter_engine: Arc::clone(&self.filter_engine),
            rules: self.filter_engine.rules_for_board(request.descriptor.board()),
            saved_replies: Arc::clone(&self.saved_replies),
            internal_ids,
        });

        self.pool
            .parse_drafts(drafts, context, self.config.posts_per_batch, cancel)
            .await
    }

    /// Read the authoritative post set back after persisting.
    async fn reload_posts(
        &self,
        accumulator: &PostAccumulator,
        request: &LoadRequest,
        archive: Option<&ArchiveDescriptor>,
    ) -> Result<Vec<Post>> {
        match &request.descriptor {
            ChanDescriptor::Thread(thread) => {
                let archive_id = match archive {
                    Some(archive) => archive.archive_id,
                    None => self
                        .archives
                        .last_used_archive(thread)
                        .await
                        .map_or(NO_ARCHIVE_ID, |archive| archive.archive_id),
                };
                let cap = accumulator.thread_cap().await;

                // Thread order is numeric; the store returns it sorted.
                self.store.thread_posts(thread, archive_id, cap).await
            }
            ChanDescriptor::Catalog(board) => {
                // Catalog order is server business order, not numeric. Fetch
                // by recency with headroom (hash-skipped OPs keep their old
                // timestamps) and reorder to the accumulator's list, which
                // also drops rows that were not part of this pass.
                let ordered = accumulator.ordered_post_nos().await;
                let count = ordered.len() + self.config.catalog_fallback_posts;

                let posts = self
                    .store
                    .catalog_posts(board, NO_ARCHIVE_ID, count)
                    .await?;

                Ok(accumulator.sort_posts_by_order(posts).await)
            }
        }
    }
}
