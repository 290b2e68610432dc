//! Shared fakes and wiring helpers for loader tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::archive::{ArchiveDescriptor, ArchiveFetchAttempt, ArchiveManager};
use crate::config::LoaderConfig;
use crate::decoder::SiteDecoder;
use crate::error::{Error, Result};
use crate::filter::{FilterRule, RegexFilterEngine};
use crate::loader::{ChanLoader, PostAccumulator};
use crate::saved_reply::SavedReplyStore;
use crate::store::PostStore;
use crate::transport::{Transport, TransportResponse};
use crate::types::{
    BoardDescriptor, ChanDescriptor, MediaInfo, Post, PostDescriptor, PostDraft, ThreadDescriptor,
};

pub(crate) fn test_board() -> BoardDescriptor {
    BoardDescriptor::new("testchan", "g")
}

pub(crate) fn test_thread(no: i64) -> ThreadDescriptor {
    ThreadDescriptor::new(test_board(), no)
}

pub(crate) fn test_archive() -> ArchiveDescriptor {
    ArchiveDescriptor {
        archive_id: 7,
        name: "testarchive".to_string(),
        domain: "archive.example".to_string(),
    }
}

/// In-memory [`PostStore`] keyed by post identity.
#[derive(Default)]
pub(crate) struct MemoryPostStore {
    posts: Mutex<HashMap<PostDescriptor, (Post, i64)>>,
    hashes: Mutex<HashMap<PostDescriptor, String>>,
    seq: AtomicI64,
}

impl MemoryPostStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

fn archive_visible(post: &Post, archive_id: i64) -> bool {
    post.archive_id == crate::types::NO_ARCHIVE_ID || post.archive_id == archive_id
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn insert_or_update_many(&self, posts: &[Post], is_catalog: bool) -> Result<Vec<i64>> {
        let mut stored = Vec::new();
        let mut map = self.posts.lock().await;
        for post in posts {
            if is_catalog && !post.op {
                continue;
            }
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            map.insert(post.descriptor(), (post.clone(), seq));
            stored.push(post.post_no);
        }
        Ok(stored)
    }

    async fn thread_posts(
        &self,
        thread: &ThreadDescriptor,
        archive_id: i64,
        cap: Option<usize>,
    ) -> Result<Vec<Post>> {
        let map = self.posts.lock().await;
        let mut posts: Vec<Post> = map
            .values()
            .filter(|(post, _)| {
                post.board == thread.board
                    && post.thread_no == thread.thread_no
                    && archive_visible(post, archive_id)
            })
            .map(|(post, _)| post.clone())
            .collect();
        posts.sort_by_key(|post| post.post_no);
        if let Some(cap) = cap {
            posts.truncate(cap);
        }
        Ok(posts)
    }

    async fn thread_posts_by_nos(
        &self,
        thread: &ThreadDescriptor,
        post_nos: &[i64],
    ) -> Result<Vec<Post>> {
        let map = self.posts.lock().await;
        let mut posts: Vec<Post> = post_nos
            .iter()
            .filter_map(|no| {
                map.get(&PostDescriptor::new(thread.clone(), *no))
                    .map(|(post, _)| post.clone())
            })
            .collect();
        posts.sort_by_key(|post| post.post_no);
        Ok(posts)
    }

    async fn catalog_posts(
        &self,
        board: &BoardDescriptor,
        archive_id: i64,
        count: usize,
    ) -> Result<Vec<Post>> {
        let map = self.posts.lock().await;
        let mut posts: Vec<(Post, i64)> = map
            .values()
            .filter(|(post, _)| {
                post.op && post.board == *board && archive_visible(post, archive_id)
            })
            .cloned()
            .collect();
        // Most recently updated first, like the production store.
        posts.sort_by_key(|(_, seq)| std::cmp::Reverse(*seq));
        Ok(posts.into_iter().take(count).map(|(post, _)| post).collect())
    }

    async fn post_hash(&self, post: &PostDescriptor) -> Result<Option<String>> {
        Ok(self.hashes.lock().await.get(post).cloned())
    }

    async fn put_post_hash(&self, post: &PostDescriptor, hash: &str) -> Result<()> {
        self.hashes
            .lock()
            .await
            .insert(post.clone(), hash.to_string());
        Ok(())
    }
}

/// Canned transport answers, consumed in order.
pub(crate) enum CannedResponse {
    Response(u16, Vec<u8>),
    NetworkError,
}

#[derive(Default)]
pub(crate) struct StaticTransport {
    responses: Mutex<VecDeque<CannedResponse>>,
}

impl StaticTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn push(&self, response: CannedResponse) {
        self.responses.lock().await.push_back(response);
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn get(&self, _url: &Url) -> Result<TransportResponse> {
        match self.responses.lock().await.pop_front() {
            Some(CannedResponse::Response(status, body)) => {
                Ok(TransportResponse { status, body })
            }
            Some(CannedResponse::NetworkError) | None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

/// Configurable fake archive.
pub(crate) enum ArchiveBehavior {
    NoArchive,
    Posts(Vec<PostDraft>),
    Fail(String),
}

pub(crate) struct FakeArchiveManager {
    behavior: Mutex<ArchiveBehavior>,
    pub(crate) attempts: Mutex<Vec<ArchiveFetchAttempt>>,
    last_used: Mutex<Option<ArchiveDescriptor>>,
}

impl FakeArchiveManager {
    pub(crate) fn new(behavior: ArchiveBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            attempts: Mutex::new(Vec::new()),
            last_used: Mutex::new(None),
        }
    }

    pub(crate) async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.len()
    }
}

#[async_trait]
impl ArchiveManager for FakeArchiveManager {
    async fn archive_for_thread(
        &self,
        _thread: &ThreadDescriptor,
    ) -> Result<Option<ArchiveDescriptor>> {
        match &*self.behavior.lock().await {
            ArchiveBehavior::NoArchive => Ok(None),
            _ => Ok(Some(test_archive())),
        }
    }

    fn thread_fetch_url(
        &self,
        thread: &ThreadDescriptor,
        archive: &ArchiveDescriptor,
    ) -> Option<Url> {
        Url::parse(&format!(
            "https://{}/{}/thread/{}",
            archive.domain, thread.board.board, thread.thread_no
        ))
        .ok()
    }

    async fn fetch_thread(
        &self,
        _url: &Url,
        _thread: &ThreadDescriptor,
        _archive: &ArchiveDescriptor,
    ) -> Result<Vec<PostDraft>> {
        match &*self.behavior.lock().await {
            ArchiveBehavior::NoArchive => Ok(Vec::new()),
            ArchiveBehavior::Posts(posts) => Ok(posts.clone()),
            ArchiveBehavior::Fail(message) => Err(Error::Archive(message.clone())),
        }
    }

    async fn record_fetch_attempt(&self, attempt: ArchiveFetchAttempt) -> Result<()> {
        if attempt.error.is_none() {
            *self.last_used.lock().await = Some(test_archive());
        }
        self.attempts.lock().await.push(attempt);
        Ok(())
    }

    fn stores_media(&self, _archive: &ArchiveDescriptor, _board: &BoardDescriptor) -> bool {
        true
    }

    async fn last_used_archive(&self, _thread: &ThreadDescriptor) -> Option<ArchiveDescriptor> {
        self.last_used.lock().await.clone()
    }
}

/// Saved-reply store that counts lookups; one lookup happens per parsed
/// draft, which makes the staleness skip observable from the outside.
#[derive(Default)]
pub(crate) struct CountingSavedReplyStore {
    saved: std::sync::Mutex<std::collections::HashSet<PostDescriptor>>,
    lookups: AtomicUsize,
}

impl CountingSavedReplyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_saved(&self, post: PostDescriptor) {
        self.saved.lock().unwrap().insert(post);
    }

    pub(crate) fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_lookups(&self) {
        self.lookups.store(0, Ordering::SeqCst);
    }
}

impl SavedReplyStore for CountingSavedReplyStore {
    fn is_saved(&self, post: &PostDescriptor) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.saved.lock().unwrap().contains(post)
    }
}

/// Wire format for [`TestJsonDecoder`]: `{"posts": [{"no": 100, "com": "..."}]}`.
#[derive(serde::Deserialize)]
struct TestPayload {
    posts: Vec<TestPost>,
}

#[derive(serde::Deserialize)]
struct TestPost {
    no: i64,
    #[serde(default)]
    com: String,
    #[serde(default)]
    sub: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    cap: Option<i32>,
    #[serde(default)]
    media: Vec<MediaInfo>,
}

impl TestPost {
    fn into_draft(self, board: BoardDescriptor, thread_no: i64) -> PostDraft {
        let mut draft = PostDraft::new(board, thread_no, self.no);
        draft.op = self.no == thread_no;
        draft.raw_comment = self.com;
        draft.subject = self.sub;
        draft.name = self.name;
        draft.sticky_cap = self.cap;
        draft.media = self.media;
        draft.timestamp = 1_700_000_000 + self.no;
        draft
    }
}

/// JSON decoder for tests; the identity comes from the accumulator's
/// descriptor, catalog entries are OPs in server (bump) order.
pub(crate) struct TestJsonDecoder;

#[async_trait]
impl SiteDecoder for TestJsonDecoder {
    async fn decode_thread(&self, body: &[u8], accumulator: &PostAccumulator) -> Result<()> {
        let ChanDescriptor::Thread(thread) = accumulator.descriptor().clone() else {
            return Err(Error::Decode("thread decoder got catalog descriptor".into()));
        };

        let payload: TestPayload =
            serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;

        for post in payload.posts {
            accumulator
                .add_post(post.into_draft(thread.board.clone(), thread.thread_no))
                .await?;
        }
        Ok(())
    }

    async fn decode_catalog(&self, body: &[u8], accumulator: &PostAccumulator) -> Result<()> {
        let ChanDescriptor::Catalog(board) = accumulator.descriptor().clone() else {
            return Err(Error::Decode("catalog decoder got thread descriptor".into()));
        };

        let payload: TestPayload =
            serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;

        for post in payload.posts {
            let thread_no = post.no;
            accumulator
                .add_post(post.into_draft(board.clone(), thread_no))
                .await?;
        }
        Ok(())
    }
}

/// A fully wired loader plus handles on every fake.
pub(crate) struct TestHarness {
    pub(crate) loader: ChanLoader,
    pub(crate) store: Arc<MemoryPostStore>,
    pub(crate) archives: Arc<FakeArchiveManager>,
    pub(crate) transport: Arc<StaticTransport>,
    pub(crate) saved: Arc<CountingSavedReplyStore>,
}

pub(crate) fn harness_with(
    archive_behavior: ArchiveBehavior,
    filter_rules: Vec<FilterRule>,
) -> TestHarness {
    let store = Arc::new(MemoryPostStore::new());
    let archives = Arc::new(FakeArchiveManager::new(archive_behavior));
    let transport = Arc::new(StaticTransport::new());
    let saved = Arc::new(CountingSavedReplyStore::new());

    let config = LoaderConfig {
        parser_workers: Some(2),
        ..Default::default()
    };

    let loader = ChanLoader::new(
        config,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&store) as Arc<dyn PostStore>,
        Arc::clone(&archives) as Arc<dyn ArchiveManager>,
        Arc::new(RegexFilterEngine::new(filter_rules)),
        Arc::clone(&saved) as Arc<dyn SavedReplyStore>,
    );

    TestHarness {
        loader,
        store,
        archives,
        transport,
        saved,
    }
}

pub(crate) fn harness() -> TestHarness {
    harness_with(ArchiveBehavior::NoArchive, Vec::new())
}

/// Build a parsed post the way the pipeline would, for seeding stores and
/// cached sets.
pub(crate) fn make_post(thread_no: i64, post_no: i64, raw_comment: &str) -> Post {
    let mut draft = PostDraft::new(test_board(), thread_no, post_no);
    draft.op = thread_no == post_no;
    draft.raw_comment = raw_comment.to_string();
    draft.timestamp = 1_700_000_000 + post_no;

    let parser = crate::comment::CommentParser::new();
    let comment = parser.parse(raw_comment, &std::collections::HashSet::new());
    draft.finalize(comment, false, None).unwrap()
}

/// JSON body helper: posts with just numbers and comments.
pub(crate) fn thread_body(posts: &[(i64, &str)]) -> Vec<u8> {
    let posts: Vec<serde_json::Value> = posts
        .iter()
        .map(|(no, com)| serde_json::json!({ "no": no, "com": com }))
        .collect();
    serde_json::to_vec(&serde_json::json!({ "posts": posts })).unwrap()
}
