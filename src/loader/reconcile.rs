//! Cache reconciliation and reply-graph construction
//!
//! Merges the previously displayed post set with the freshly reloaded one:
//! vanished posts are flagged deleted (threads only, never un-flagged), new
//! posts are appended, and the inbound-reply relation is rebuilt from every
//! post's outbound quotes.

use std::collections::{HashMap, HashSet};

use crate::types::{ChanDescriptor, LoaderResponse, Post, PostDraft};

/// Build the final response from the cached and reloaded post sets.
pub(crate) fn reconcile(
    op: PostDraft,
    cached: Vec<Post>,
    reloaded: Vec<Post>,
    descriptor: &ChanDescriptor,
) -> LoaderResponse {
    let is_thread = descriptor.is_thread();

    let mut total_posts: Vec<Post>;

    if cached.is_empty() {
        total_posts = reloaded;
    } else {
        let cached_nos: HashSet<i64> = cached.iter().map(|post| post.post_no).collect();
        let server_nos: HashSet<i64> = reloaded.iter().map(|post| post.post_no).collect();

        let mut cached = cached;

        // A cached post missing from the server set is deleted. Only threads
        // track deletions, and a post already flagged stays flagged; the flag
        // may have come from an archive pass and the server set will never
        // contain that post again.
        if is_thread {
            for cached_post in &mut cached {
                if cached_post.deleted {
                    continue;
                }
                if !server_nos.contains(&cached_post.post_no) {
                    tracing::debug!(post_no = cached_post.post_no, "post deleted on server");
                    cached_post.deleted = true;
                }
            }
        }

        total_posts = cached;
        for server_post in reloaded {
            if !cached_nos.contains(&server_post.post_no) {
                total_posts.push(server_post);
            }
        }
    }

    if is_thread {
        // Recovered posts can merge in below the numeric tail; thread
        // responses are ascending by contract. Sorting first also keeps
        // every replies_from list ascending.
        total_posts.sort_by_key(|post| post.post_no);
        fill_in_replies(&mut total_posts);
    }

    LoaderResponse {
        op,
        posts: total_posts,
    }
}

/// Rebuild `replies_from` for every post from the outbound quote sets.
///
/// A quote to a post number that does not exist in `posts` is a reply to a
/// ghost and is silently dropped.
pub(crate) fn fill_in_replies(posts: &mut [Post]) {
    let index_by_no: HashMap<i64, usize> = posts
        .iter()
        .enumerate()
        .map(|(index, post)| (post.post_no, index))
        .collect();

    let mut replies: HashMap<i64, Vec<i64>> = HashMap::new();
    for post in posts.iter() {
        for quoted_no in &post.replies_to {
            replies
                .entry(*quoted_no)
                .or_insert_with(|| Vec::with_capacity(3))
                .push(post.post_no);
        }
    }

    for (quoted_no, from) in replies {
        if let Some(index) = index_by_no.get(&quoted_no) {
            posts[*index].replies_from = from;
        }
    }
}
