//! Merging fresh drafts with archive-sourced drafts
//!
//! Fresh and archive drafts may carry the same post numbers. The archive
//! version wins those collisions; the fallback resolver has already judged it
//! strictly more complete before letting it through. Archive posts matching
//! nothing fresh are recovered deletions and go at the end.

use std::collections::HashMap;

use crate::types::PostDraft;

/// Combine server drafts with the archive contribution.
///
/// Server ordering is preserved for every post the server still has; archive
/// leftovers keep the archive's own order after them.
pub(crate) fn merge_drafts(
    fresh: Vec<PostDraft>,
    archive: Vec<PostDraft>,
) -> Vec<PostDraft> {
    if archive.is_empty() {
        return fresh;
    }

    let mut by_no: HashMap<i64, usize> = archive
        .iter()
        .enumerate()
        .map(|(index, draft)| (draft.post_no, index))
        .collect();
    let mut consumed = vec![false; archive.len()];

    let mut merged = Vec::with_capacity(fresh.len() + archive.len());

    for fresh_draft in fresh {
        match by_no.remove(&fresh_draft.post_no) {
            Some(index) => {
                consumed[index] = true;
                merged.push(archive[index].clone());
            }
            None => merged.push(fresh_draft),
        }
    }

    for (index, archive_draft) in archive.into_iter().enumerate() {
        if !consumed[index] {
            merged.push(archive_draft);
        }
    }

    merged
}
