//! Core types for chan-sync

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::comment::ParsedComment;
use crate::error::{Error, Result};
use crate::filter::FilterAction;

/// Sentinel archive id for posts that came straight from the primary source.
pub const NO_ARCHIVE_ID: i64 = -1;

/// Identifies a board on a site
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardDescriptor {
    /// Site name, e.g. "4chan"
    pub site: String,
    /// Board code, e.g. "g"
    pub board: String,
}

impl BoardDescriptor {
    /// Create a new board descriptor
    pub fn new(site: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            board: board.into(),
        }
    }
}

impl fmt::Display for BoardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site, self.board)
    }
}

/// Identifies a single thread on a board
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadDescriptor {
    /// The board the thread lives on
    pub board: BoardDescriptor,
    /// Thread number (the OP's post number)
    pub thread_no: i64,
}

impl ThreadDescriptor {
    /// Create a new thread descriptor
    pub fn new(board: BoardDescriptor, thread_no: i64) -> Self {
        Self { board, thread_no }
    }
}

impl fmt::Display for ThreadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.board, self.thread_no)
    }
}

/// Identity key for a loadable stream: a thread or a board catalog.
///
/// Equality drives "is this the same stream"; the loader never deduplicates
/// concurrent loads itself, callers key their active-loader registry on this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChanDescriptor {
    /// A single thread
    Thread(ThreadDescriptor),
    /// A board catalog
    Catalog(BoardDescriptor),
}

impl ChanDescriptor {
    /// The board this descriptor points at
    pub fn board(&self) -> &BoardDescriptor {
        match self {
            ChanDescriptor::Thread(thread) => &thread.board,
            ChanDescriptor::Catalog(board) => board,
        }
    }

    /// The thread descriptor, if this is a thread stream
    pub fn thread(&self) -> Option<&ThreadDescriptor> {
        match self {
            ChanDescriptor::Thread(thread) => Some(thread),
            ChanDescriptor::Catalog(_) => None,
        }
    }

    /// Whether this descriptor identifies a thread
    pub fn is_thread(&self) -> bool {
        matches!(self, ChanDescriptor::Thread(_))
    }

    /// Whether this descriptor identifies a catalog
    pub fn is_catalog(&self) -> bool {
        matches!(self, ChanDescriptor::Catalog(_))
    }
}

impl fmt::Display for ChanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChanDescriptor::Thread(thread) => write!(f, "thread:{}", thread),
            ChanDescriptor::Catalog(board) => write!(f, "catalog:{}", board),
        }
    }
}

/// Identity of a single post: (site, board, thread number, post number)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostDescriptor {
    /// The thread the post belongs to
    pub thread: ThreadDescriptor,
    /// The post's own number
    pub post_no: i64,
}

impl PostDescriptor {
    /// Create a new post descriptor
    pub fn new(thread: ThreadDescriptor, post_no: i64) -> Self {
        Self { thread, post_no }
    }
}

impl fmt::Display for PostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.thread, self.post_no)
    }
}

/// File or media attachment metadata carried by a post
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Server-assigned filename (timestamp-style)
    pub server_filename: String,
    /// Filename as originally uploaded
    pub original_filename: String,
    /// Full-size media URL, if known
    pub url: Option<String>,
    /// Thumbnail URL, if known
    pub thumbnail_url: Option<String>,
    /// Size in bytes (0 when the source does not report it)
    pub file_size: i64,
    /// Whether the media is spoilered
    pub spoiler: bool,
}

/// A mutable, pre-parse post record.
///
/// One draft exists per post observed in a single fetch pass. Drafts are
/// discarded once parsed into [`Post`]s or skipped as unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostDraft {
    /// The board the post was observed on
    pub board: BoardDescriptor,
    /// Parent thread number (equals `post_no` for OPs)
    pub thread_no: i64,
    /// Post number
    pub post_no: i64,
    /// Whether this is the thread's originating post
    pub op: bool,
    /// Sticky flag (OP only)
    pub sticky: bool,
    /// Closed flag (OP only)
    pub closed: bool,
    /// Site-side archived flag (OP only)
    pub archived: bool,
    /// Unix timestamp of the post
    pub timestamp: i64,
    /// Poster name
    pub name: String,
    /// Subject line
    pub subject: String,
    /// Tripcode
    pub tripcode: String,
    /// Site-assigned poster id
    pub poster_id: String,
    /// Capcode (moderator/admin marker)
    pub capcode: String,
    /// Raw comment payload as delivered by the source
    pub raw_comment: String,
    /// Attached media descriptors
    pub media: Vec<MediaInfo>,
    /// Sticky post cap signaled by the OP; negative or absent means unbounded
    pub sticky_cap: Option<i32>,
    /// Total reply count reported by the source (OP only)
    pub total_replies: i32,
    /// Which archive this draft came from, or [`NO_ARCHIVE_ID`]
    pub archive_id: i64,
}

impl PostDraft {
    /// Create an empty draft for the given identity
    pub fn new(board: BoardDescriptor, thread_no: i64, post_no: i64) -> Self {
        Self {
            board,
            thread_no,
            post_no,
            op: false,
            sticky: false,
            closed: false,
            archived: false,
            timestamp: 0,
            name: String::new(),
            subject: String::new(),
            tripcode: String::new(),
            poster_id: String::new(),
            capcode: String::new(),
            raw_comment: String::new(),
            media: Vec::new(),
            sticky_cap: None,
            total_replies: 0,
            archive_id: NO_ARCHIVE_ID,
        }
    }

    /// This draft's post identity
    pub fn descriptor(&self) -> PostDescriptor {
        PostDescriptor::new(
            ThreadDescriptor::new(self.board.clone(), self.thread_no),
            self.post_no,
        )
    }

    /// Content fingerprint used for the staleness skip.
    ///
    /// Covers every field whose change warrants a re-parse. Post identity is
    /// deliberately excluded; the hash is already keyed by identity in the
    /// store.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw_comment.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.subject.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.tripcode.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.poster_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.capcode.as_bytes());
        hasher.update([0x1f]);
        hasher.update(
            [
                self.sticky as u8,
                self.closed as u8,
                self.archived as u8,
                self.op as u8,
            ]
            .as_slice(),
        );
        hasher.update(self.total_replies.to_le_bytes());
        hasher.update(self.sticky_cap.unwrap_or(-1).to_le_bytes());
        for media in &self.media {
            hasher.update([0x1e]);
            hasher.update(media.server_filename.as_bytes());
            hasher.update([0x1f]);
            hasher.update(media.url.as_deref().unwrap_or("").as_bytes());
            hasher.update([0x1f]);
            hasher.update(media.thumbnail_url.as_deref().unwrap_or("").as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Finalize this draft into an immutable post.
    ///
    /// `comment` is the resolved comment markup, `saved_reply` the outcome of
    /// the saved-reply lookup, `filter_tag` the first-match filter outcome.
    pub fn finalize(
        self,
        comment: ParsedComment,
        saved_reply: bool,
        filter_tag: Option<FilterAction>,
    ) -> Result<Post> {
        if self.post_no <= 0 {
            return Err(Error::InvalidDraft(format!(
                "post number must be positive, got {}",
                self.post_no
            )));
        }
        if self.thread_no <= 0 {
            return Err(Error::InvalidDraft(format!(
                "thread number must be positive, got {}",
                self.thread_no
            )));
        }
        if self.op && self.thread_no != self.post_no {
            return Err(Error::InvalidDraft(format!(
                "OP post number {} does not match thread number {}",
                self.post_no, self.thread_no
            )));
        }

        let replies_to = comment.internal_quote_targets(self.post_no);

        Ok(Post {
            board: self.board,
            thread_no: self.thread_no,
            post_no: self.post_no,
            op: self.op,
            sticky: self.sticky,
            closed: self.closed,
            archived: self.archived,
            timestamp: self.timestamp,
            name: self.name,
            subject: self.subject,
            tripcode: self.tripcode,
            poster_id: self.poster_id,
            capcode: self.capcode,
            comment,
            media: self.media,
            sticky_cap: self.sticky_cap,
            total_replies: self.total_replies,
            replies_to,
            replies_from: Vec::new(),
            filter_tag,
            saved_reply,
            deleted: false,
            archive_id: self.archive_id,
        })
    }
}

/// A finalized, parsed post.
///
/// Created by the parallel parser, persisted, then reloaded; the reloaded
/// copies are the ones a response is built from. `deleted` and `replies_from`
/// are the only fields the reconciler rewrites afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// The board the post lives on
    pub board: BoardDescriptor,
    /// Parent thread number
    pub thread_no: i64,
    /// Post number
    pub post_no: i64,
    /// Whether this is the thread's originating post
    pub op: bool,
    /// Sticky flag
    pub sticky: bool,
    /// Closed flag
    pub closed: bool,
    /// Site-side archived flag
    pub archived: bool,
    /// Unix timestamp of the post
    pub timestamp: i64,
    /// Poster name
    pub name: String,
    /// Subject line
    pub subject: String,
    /// Tripcode
    pub tripcode: String,
    /// Site-assigned poster id
    pub poster_id: String,
    /// Capcode
    pub capcode: String,
    /// Resolved comment markup and extracted references
    pub comment: ParsedComment,
    /// Attached media descriptors
    pub media: Vec<MediaInfo>,
    /// Sticky post cap (OP only)
    pub sticky_cap: Option<i32>,
    /// Total reply count reported by the source (OP only)
    pub total_replies: i32,
    /// Post numbers this post quotes, restricted to the same thread
    pub replies_to: BTreeSet<i64>,
    /// Post numbers that quote this post; rebuilt on every reconcile pass
    pub replies_from: Vec<i64>,
    /// First-match filter outcome, if any rule matched
    pub filter_tag: Option<FilterAction>,
    /// Whether the local user authored this post
    pub saved_reply: bool,
    /// Whether the post has vanished from the primary source
    pub deleted: bool,
    /// Which archive this post came from, or [`NO_ARCHIVE_ID`]
    pub archive_id: i64,
}

impl Post {
    /// This post's identity
    pub fn descriptor(&self) -> PostDescriptor {
        PostDescriptor::new(
            ThreadDescriptor::new(self.board.clone(), self.thread_no),
            self.post_no,
        )
    }

    /// Turn a reloaded post back into a draft.
    ///
    /// Used when a response has to be rebuilt purely from persisted data and
    /// the OP draft never came from the network.
    pub fn to_draft(&self) -> PostDraft {
        PostDraft {
            board: self.board.clone(),
            thread_no: self.thread_no,
            post_no: self.post_no,
            op: self.op,
            sticky: self.sticky,
            closed: self.closed,
            archived: self.archived,
            timestamp: self.timestamp,
            name: self.name.clone(),
            subject: self.subject.clone(),
            tripcode: self.tripcode.clone(),
            poster_id: self.poster_id.clone(),
            capcode: self.capcode.clone(),
            raw_comment: self.comment.raw.clone(),
            media: self.media.clone(),
            sticky_cap: self.sticky_cap,
            total_replies: self.total_replies,
            archive_id: self.archive_id,
        }
    }
}

/// The outcome of a successful load: the OP draft plus the full ordered post
/// list for the descriptor.
///
/// Thread responses are ordered strictly ascending by post number; catalog
/// responses follow the server-determined order captured by the accumulator.
#[derive(Clone, Debug)]
pub struct LoaderResponse {
    /// The originating post's draft
    pub op: PostDraft,
    /// All posts for the descriptor, deleted ones included
    pub posts: Vec<Post>,
}
