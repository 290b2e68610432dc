//! Post persistence layer
//!
//! The pipeline treats storage as an async key-oriented post store: posts are
//! upserted by identity after parsing and read back as the authoritative set
//! a response is built from. [`SqlitePostStore`] is the production
//! implementation; tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BoardDescriptor, Post, PostDescriptor, ThreadDescriptor};

mod sqlite;


pub use sqlite::SqlitePostStore;

/// Durable store for parsed posts and per-post staleness hashes.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Upsert `posts` by identity, returning the stored post numbers.
    ///
    /// In catalog mode only OP posts are written; catalogs never carry
    /// replies.
    async fn insert_or_update_many(&self, posts: &[Post], is_catalog: bool) -> Result<Vec<i64>>;

    /// All posts of `thread`, ascending by post number, capped at `cap`.
    ///
    /// `archive_id` selects which archive's rows are visible alongside
    /// primary-source rows; pass [`NO_ARCHIVE_ID`](crate::types::NO_ARCHIVE_ID)
    /// when no archive is in play.
    async fn thread_posts(
        &self,
        thread: &ThreadDescriptor,
        archive_id: i64,
        cap: Option<usize>,
    ) -> Result<Vec<Post>>;

    /// The subset of `post_nos` already stored for `thread`.
    async fn thread_posts_by_nos(
        &self,
        thread: &ThreadDescriptor,
        post_nos: &[i64],
    ) -> Result<Vec<Post>>;

    /// Up to `count` most recently updated OP posts of `board`.
    ///
    /// Catalog display order is server-determined; callers reorder the result
    /// with the accumulator's order list.
    async fn catalog_posts(
        &self,
        board: &BoardDescriptor,
        archive_id: i64,
        count: usize,
    ) -> Result<Vec<Post>>;

    /// The stored staleness hash for a post identity, if any.
    async fn post_hash(&self, post: &PostDescriptor) -> Result<Option<String>>;

    /// Store the staleness hash for a post identity.
    async fn put_post_hash(&self, post: &PostDescriptor, hash: &str) -> Result<()>;
}
