//! SQLite-backed [`PostStore`]

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{FromRow, QueryBuilder, Row};

use crate::error::{Error, Result, StoreError};
use crate::types::{BoardDescriptor, Post, PostDescriptor, ThreadDescriptor};

use super::PostStore;

/// SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999.
/// Each post row uses 25 bind variables, so max 39 posts per upsert batch.
const MAX_POSTS_PER_BATCH: usize = 36;

/// Production [`PostStore`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqlitePostStore {
    pool: SqlitePool,
}

impl SqlitePostStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Store(StoreError::ConnectionFailed(format!(
                    "Failed to create store directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Store(StoreError::ConnectionFailed(format!(
                "Failed to connect to store: {}",
                e
            )))
        })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Open an in-memory database, for tests and throwaway sessions.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // A pooled :memory: database is per-connection; pin the pool to a
        // single connection so every query sees the same database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Store(StoreError::ConnectionFailed(format!(
                    "Failed to open in-memory store: {}",
                    e
                )))
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_failed("schema_version", e))?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| migration_failed("version query", e))?;

        if current_version.unwrap_or(0) < 1 {
            self.migrate_v1().await?;
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, unixepoch())")
                .execute(&self.pool)
                .await
                .map_err(|e| migration_failed("record v1", e))?;
        }

        Ok(())
    }

    async fn migrate_v1(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                site TEXT NOT NULL,
                board TEXT NOT NULL,
                thread_no INTEGER NOT NULL,
                post_no INTEGER NOT NULL,
                is_op INTEGER NOT NULL,
                sticky INTEGER NOT NULL,
                closed INTEGER NOT NULL,
                archived INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                tripcode TEXT NOT NULL,
                poster_id TEXT NOT NULL,
                capcode TEXT NOT NULL,
                comment_raw TEXT NOT NULL,
                comment_text TEXT NOT NULL,
                comment_links TEXT NOT NULL,
                media TEXT NOT NULL,
                sticky_cap INTEGER,
                total_replies INTEGER NOT NULL,
                replies_to TEXT NOT NULL,
                filter_tag TEXT,
                saved_reply INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                archive_id INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (site, board, thread_no, post_no)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_failed("posts table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_catalog
             ON posts (site, board, is_op, updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_failed("catalog index", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS post_hashes (
                site TEXT NOT NULL,
                board TEXT NOT NULL,
                thread_no INTEGER NOT NULL,
                post_no INTEGER NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (site, board, thread_no, post_no)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| migration_failed("post_hashes table", e))?;

        Ok(())
    }
}

fn migration_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Store(StoreError::MigrationFailed(format!("{}: {}", what, e)))
}

fn query_failed(e: impl std::fmt::Display) -> Error {
    Error::Store(StoreError::QueryFailed(e.to_string()))
}

/// Post row as stored; JSON columns hold the structured fields.
#[derive(Debug, FromRow)]
struct PostRow {
    site: String,
    board: String,
    thread_no: i64,
    post_no: i64,
    is_op: bool,
    sticky: bool,
    closed: bool,
    archived: bool,
    timestamp: i64,
    name: String,
    subject: String,
    tripcode: String,
    poster_id: String,
    capcode: String,
    comment_raw: String,
    comment_text: String,
    comment_links: String,
    media: String,
    sticky_cap: Option<i32>,
    total_replies: i32,
    replies_to: String,
    filter_tag: Option<String>,
    saved_reply: bool,
    deleted: bool,
    archive_id: i64,
}

impl PostRow {
    fn into_post(self) -> Result<Post> {
        let corrupt = |field: &str, e: serde_json::Error| {
            Error::Store(StoreError::CorruptRow(format!(
                "{} of {}/{}/{}: {}",
                field, self.site, self.board, self.post_no, e
            )))
        };

        Ok(Post {
            board: BoardDescriptor::new(self.site.clone(), self.board.clone()),
            thread_no: self.thread_no,
            post_no: self.post_no,
            op: self.is_op,
            sticky: self.sticky,
            closed: self.closed,
            archived: self.archived,
            timestamp: self.timestamp,
            name: self.name.clone(),
            subject: self.subject.clone(),
            tripcode: self.tripcode.clone(),
            poster_id: self.poster_id.clone(),
            capcode: self.capcode.clone(),
            comment: crate::comment::ParsedComment {
                raw: self.comment_raw.clone(),
                text: self.comment_text.clone(),
                links: serde_json::from_str(&self.comment_links)
                    .map_err(|e| corrupt("comment_links", e))?,
            },
            media: serde_json::from_str(&self.media).map_err(|e| corrupt("media", e))?,
            sticky_cap: self.sticky_cap,
            total_replies: self.total_replies,
            replies_to: serde_json::from_str(&self.replies_to)
                .map_err(|e| corrupt("replies_to", e))?,
            replies_from: Vec::new(),
            filter_tag: match &self.filter_tag {
                Some(json) => serde_json::from_str(json).map_err(|e| corrupt("filter_tag", e))?,
                None => None,
            },
            saved_reply: self.saved_reply,
            deleted: self.deleted,
            archive_id: self.archive_id,
        })
    }
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn insert_or_update_many(&self, posts: &[Post], is_catalog: bool) -> Result<Vec<i64>> {
        let storable: Vec<&Post> = if is_catalog {
            posts.iter().filter(|post| post.op).collect()
        } else {
            posts.iter().collect()
        };

        if storable.is_empty() {
            return Ok(Vec::new());
        }

        for chunk in storable.chunks(MAX_POSTS_PER_BATCH) {
            let mut rows = Vec::with_capacity(chunk.len());
            for post in chunk {
                let comment_links = serde_json::to_string(&post.comment.links)?;
                let media = serde_json::to_string(&post.media)?;
                let replies_to = serde_json::to_string(&post.replies_to)?;
                let filter_tag = post
                    .filter_tag
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                rows.push((post, comment_links, media, replies_to, filter_tag));
            }

            let mut query_builder = QueryBuilder::new(
                "INSERT INTO posts (site, board, thread_no, post_no, is_op, sticky, closed, \
                 archived, timestamp, name, subject, tripcode, poster_id, capcode, comment_raw, \
                 comment_text, comment_links, media, sticky_cap, total_replies, replies_to, \
                 filter_tag, saved_reply, deleted, archive_id, updated_at) ",
            );

            query_builder.push_values(
                &rows,
                |mut b, (post, comment_links, media, replies_to, filter_tag)| {
                    b.push_bind(&post.board.site)
                        .push_bind(&post.board.board)
                        .push_bind(post.thread_no)
                        .push_bind(post.post_no)
                        .push_bind(post.op)
                        .push_bind(post.sticky)
                        .push_bind(post.closed)
                        .push_bind(post.archived)
                        .push_bind(post.timestamp)
                        .push_bind(&post.name)
                        .push_bind(&post.subject)
                        .push_bind(&post.tripcode)
                        .push_bind(&post.poster_id)
                        .push_bind(&post.capcode)
                        .push_bind(&post.comment.raw)
                        .push_bind(&post.comment.text)
                        .push_bind(comment_links.as_str())
                        .push_bind(media.as_str())
                        .push_bind(post.sticky_cap)
                        .push_bind(post.total_replies)
                        .push_bind(replies_to.as_str())
                        .push_bind(filter_tag.as_deref())
                        .push_bind(post.saved_reply)
                        .push_bind(post.deleted)
                        .push_bind(post.archive_id);
                    b.push("unixepoch()");
                },
            );

            query_builder.push(
                " ON CONFLICT (site, board, thread_no, post_no) DO UPDATE SET \
                 is_op = excluded.is_op, sticky = excluded.sticky, closed = excluded.closed, \
                 archived = excluded.archived, timestamp = excluded.timestamp, \
                 name = excluded.name, subject = excluded.subject, tripcode = excluded.tripcode, \
                 poster_id = excluded.poster_id, capcode = excluded.capcode, \
                 comment_raw = excluded.comment_raw, comment_text = excluded.comment_text, \
                 comment_links = excluded.comment_links, media = excluded.media, \
                 sticky_cap = excluded.sticky_cap, total_replies = excluded.total_replies, \
                 replies_to = excluded.replies_to, filter_tag = excluded.filter_tag, \
                 saved_reply = excluded.saved_reply, archive_id = excluded.archive_id, \
                 updated_at = excluded.updated_at",
            );

            query_builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(query_failed)?;
        }

        Ok(storable.iter().map(|post| post.post_no).collect())
    }

    async fn thread_posts(
        &self,
        thread: &ThreadDescriptor,
        archive_id: i64,
        cap: Option<usize>,
    ) -> Result<Vec<Post>> {
        let limit = cap.map_or(-1, |c| c as i64);

        let rows: Vec<PostRow> = sqlx::query_as(
            "SELECT * FROM posts
             WHERE site = ? AND board = ? AND thread_no = ?
               AND (archive_id = -1 OR archive_id = ?)
             ORDER BY post_no ASC
             LIMIT ?",
        )
        .bind(&thread.board.site)
        .bind(&thread.board.board)
        .bind(thread.thread_no)
        .bind(archive_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(PostRow::into_post).collect()
    }

    async fn thread_posts_by_nos(
        &self,
        thread: &ThreadDescriptor,
        post_nos: &[i64],
    ) -> Result<Vec<Post>> {
        if post_nos.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = QueryBuilder::new(
            "SELECT * FROM posts WHERE site = ",
        );
        query_builder
            .push_bind(&thread.board.site)
            .push(" AND board = ")
            .push_bind(&thread.board.board)
            .push(" AND thread_no = ")
            .push_bind(thread.thread_no)
            .push(" AND post_no IN (");

        let mut separated = query_builder.separated(", ");
        for no in post_nos {
            separated.push_bind(no);
        }
        query_builder.push(") ORDER BY post_no ASC");

        let rows: Vec<PostRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        rows.into_iter().map(PostRow::into_post).collect()
    }

    async fn catalog_posts(
        &self,
        board: &BoardDescriptor,
        archive_id: i64,
        count: usize,
    ) -> Result<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(
            "SELECT * FROM posts
             WHERE site = ? AND board = ? AND is_op = 1
               AND (archive_id = -1 OR archive_id = ?)
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(&board.site)
        .bind(&board.board)
        .bind(archive_id)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(PostRow::into_post).collect()
    }

    async fn post_hash(&self, post: &PostDescriptor) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT hash FROM post_hashes
             WHERE site = ? AND board = ? AND thread_no = ? AND post_no = ?",
        )
        .bind(&post.thread.board.site)
        .bind(&post.thread.board.board)
        .bind(post.thread.thread_no)
        .bind(post.post_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn put_post_hash(&self, post: &PostDescriptor, hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO post_hashes (site, board, thread_no, post_no, hash)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (site, board, thread_no, post_no) DO UPDATE SET hash = excluded.hash",
        )
        .bind(&post.thread.board.site)
        .bind(&post.thread.board.board)
        .bind(post.thread.thread_no)
        .bind(post.post_no)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }
}
