//! Per-fetch post accumulation with the staleness skip
//!
//! The site decoder feeds one draft per observed post into the accumulator.
//! Every draft lands in the server-order list; only drafts whose content hash
//! differs from the stored one are queued for parsing. The hash is persisted
//! at queue time, so a crash mid-batch cannot re-queue the same unchanged
//! post twice.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::store::PostStore;
use crate::types::{ChanDescriptor, PostDraft, Post};

/// Collects draft records discovered in one fetch pass.
///
/// State is serialized behind a single lock; decoders may feed it from
/// several call sites, but accumulation is intentionally a serialization
/// point, not a contention target.
pub struct PostAccumulator {
    store: Arc<dyn PostStore>,
    descriptor: ChanDescriptor,
    state: Mutex<AccumulatorState>,
}

#[derive(Default)]
struct AccumulatorState {
    op: Option<PostDraft>,
    to_parse: Vec<PostDraft>,
    order: Vec<i64>,
    seen: HashSet<i64>,
}

impl PostAccumulator {
    /// Create an empty accumulator for one fetch pass of `descriptor`.
    pub fn new(store: Arc<dyn PostStore>, descriptor: ChanDescriptor) -> Self {
        Self {
            store,
            descriptor,
            state: Mutex::new(AccumulatorState::default()),
        }
    }

    /// The descriptor this accumulator collects for
    pub fn descriptor(&self) -> &ChanDescriptor {
        &self.descriptor
    }

    /// Record one observed post.
    ///
    /// Duplicate post numbers within a pass are dropped outright; the first
    /// observation wins. Unchanged posts (by content hash) are recorded in
    /// the order list but not queued for re-parsing.
    pub async fn add_post(&self, draft: PostDraft) -> Result<()> {
        let post_descriptor = draft.descriptor();
        let hash = draft.content_hash();

        let mut state = self.state.lock().await;

        if !state.seen.insert(draft.post_no) {
            tracing::warn!(
                post = %post_descriptor,
                "duplicate post number in one pass, dropping"
            );
            return Ok(());
        }
        state.order.push(draft.post_no);

        if draft.op && state.op.is_none() {
            state.op = Some(draft.clone());
        }

        let previous = self.store.post_hash(&post_descriptor).await?;
        if previous.as_deref() == Some(hash.as_str()) {
            // Unchanged since the last pass; ordering only.
            return Ok(());
        }

        self.store.put_post_hash(&post_descriptor, &hash).await?;
        state.to_parse.push(draft);

        Ok(())
    }

    /// The OP draft, once one has been observed
    pub async fn op(&self) -> Option<PostDraft> {
        self.state.lock().await.op.clone()
    }

    /// Drafts that need (re-)parsing this pass
    pub async fn to_parse(&self) -> Vec<PostDraft> {
        self.state.lock().await.to_parse.clone()
    }

    /// Every observed post number, in server order
    pub async fn ordered_post_nos(&self) -> Vec<i64> {
        self.state.lock().await.order.clone()
    }

    /// The sticky post cap signaled by the OP.
    ///
    /// `None` means unbounded; absent and negative caps both count as
    /// unbounded.
    pub async fn thread_cap(&self) -> Option<usize> {
        self.state
            .lock()
            .await
            .op
            .as_ref()
            .and_then(|op| op.sticky_cap)
            .and_then(|cap| if cap > 0 { Some(cap as usize) } else { None })
    }

    /// Reorder `posts` to the server order captured during this pass.
    ///
    /// Posts not observed in this pass are dropped; catalog persistence is
    /// keyed by post number but displayed in a server order unrelated to it.
    pub async fn sort_posts_by_order(&self, posts: Vec<Post>) -> Vec<Post> {
        let state = self.state.lock().await;

        let mut by_no: std::collections::HashMap<i64, Post> = posts
            .into_iter()
            .map(|post| (post.post_no, post))
            .collect();

        state
            .order
            .iter()
            .filter_map(|no| by_no.remove(no))
            .collect()
    }
}
