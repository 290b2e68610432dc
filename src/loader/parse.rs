//! Parallel draft parsing
//!
//! Drafts are partitioned into fixed-size batches and fanned out over a
//! bounded worker pool owned by the loader. Batches do not block each other;
//! the whole set is awaited together before the pipeline proceeds. One
//! failing draft never takes its batch down, the post is logged and dropped.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::comment::CommentParser;
use crate::filter::{FilterAction, FilterEngine, FilterRule, first_matching_action};
use crate::saved_reply::SavedReplyStore;
use crate::types::{Post, PostDraft};

/// Bounded task-execution context for post parsing.
///
/// Constructed once, owned by the loader, sized at construction time. There
/// is deliberately no process-wide executor; tests pass a small fixed size
/// instead of the host's parallelism.
pub(crate) struct ParserPool {
    semaphore: Arc<Semaphore>,
    workers: usize,
}

impl ParserPool {
    /// Build a pool with `workers` permits; `None` sizes it to the host's
    /// available parallelism.
    pub(crate) fn new(workers: Option<usize>) -> Self {
        let workers = workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(2)
            .max(1);

        tracing::debug!(workers, "parser pool sized");

        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Number of concurrent parse permits
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Parse `drafts` into finalized posts.
    ///
    /// Batches not yet dispatched when `cancel` fires are abandoned;
    /// dispatched work drains and its output is discarded by the caller.
    pub(crate) async fn parse_drafts(
        &self,
        drafts: Vec<PostDraft>,
        context: Arc<ParseContext>,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Vec<Post> {
        if drafts.is_empty() {
            return Vec::new();
        }

        let mut join_set: JoinSet<Option<Post>> = JoinSet::new();
        let mut dispatched = 0usize;

        for batch in drafts.chunks(batch_size.max(1)) {
            if cancel.is_cancelled() {
                tracing::debug!(
                    dispatched,
                    remaining = drafts.len() - dispatched,
                    "parse cancelled, abandoning undispatched batches"
                );
                break;
            }

            for draft in batch {
                dispatched += 1;
                let draft = draft.clone();
                let context = Arc::clone(&context);
                let semaphore = Arc::clone(&self.semaphore);
                let cancel = cancel.clone();

                join_set.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return None;
                    };
                    if cancel.is_cancelled() {
                        return None;
                    }
                    parse_one(draft, &context)
                });
            }
        }

        let mut posts = Vec::with_capacity(dispatched);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(post)) => posts.push(post),
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "parse worker panicked, post dropped"),
            }
        }

        posts
    }
}

/// Immutable per-fetch inputs shared by every parse worker.
pub(crate) struct ParseContext {
    pub(crate) comment_parser: Arc<CommentParser>,
    pub(crate) filter_engine: Arc<dyn FilterEngine>,
    pub(crate) rules: Vec<FilterRule>,
    pub(crate) saved_replies: Arc<dyn SavedReplyStore>,
    /// Post numbers known to exist in this fetch
    pub(crate) internal_ids: HashSet<i64>,
}

/// Parse a single draft; isolated so one failure cannot abort the batch.
fn parse_one(draft: PostDraft, context: &ParseContext) -> Option<Post> {
    let post_descriptor = draft.descriptor();

    let saved_reply = context.saved_replies.is_saved(&post_descriptor);

    let action = first_matching_action(context.filter_engine.as_ref(), &context.rules, &draft);
    if let Some(action) = action {
        // The one site that applies filter effects.
        match action {
            FilterAction::Highlight { color } => {
                tracing::trace!(post = %post_descriptor, color, "filter highlight")
            }
            FilterAction::Stub => tracing::trace!(post = %post_descriptor, "filter stub"),
            FilterAction::Remove => tracing::trace!(post = %post_descriptor, "filter remove"),
            FilterAction::Watch => {
                tracing::debug!(post = %post_descriptor, "filter auto-watch matched OP")
            }
        }
    }

    let comment = context
        .comment_parser
        .parse(&draft.raw_comment, &context.internal_ids);

    match draft.finalize(comment, saved_reply, action) {
        Ok(post) => Some(post),
        Err(e) => {
            tracing::warn!(post = %post_descriptor, error = %e, "failed to parse post, dropping");
            None
        }
    }
}
