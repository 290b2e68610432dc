//! Saved-reply lookup seam
//!
//! Answers "did the local user write this post". Implementations are expected
//! to be in-memory lookups; the parse workers call this once per draft.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::types::PostDescriptor;

/// Lookup for posts authored by the local user.
pub trait SavedReplyStore: Send + Sync {
    /// Whether the given post identity is one of the user's own posts.
    fn is_saved(&self, post: &PostDescriptor) -> bool;
}

/// In-memory [`SavedReplyStore`].
#[derive(Debug, Default)]
pub struct MemorySavedReplyStore {
    saved: Mutex<HashSet<PostDescriptor>>,
}

impl MemorySavedReplyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a post as authored by the local user
    pub fn mark_saved(&self, post: PostDescriptor) {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(post);
    }
}

impl SavedReplyStore for MemorySavedReplyStore {
    fn is_saved(&self, post: &PostDescriptor) -> bool {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(post)
    }
}
