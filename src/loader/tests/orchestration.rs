use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::filter::{FilterAction, FilterRule};
use crate::loader::LoadRequest;
use crate::loader::test_helpers::{
    ArchiveBehavior, CannedResponse, TestJsonDecoder, harness, harness_with, make_post,
    test_board, test_thread, thread_body,
};
use crate::store::PostStore;
use crate::types::{ChanDescriptor, PostDescriptor, PostDraft};

fn url() -> Url {
    Url::parse("https://testchan.example/g/thread/100.json").unwrap()
}

fn thread_request() -> LoadRequest {
    LoadRequest::new(
        ChanDescriptor::Thread(test_thread(100)),
        Arc::new(TestJsonDecoder),
    )
}

fn catalog_request() -> LoadRequest {
    LoadRequest::new(ChanDescriptor::Catalog(test_board()), Arc::new(TestJsonDecoder))
}

#[tokio::test]
async fn thread_load_builds_reply_graph_and_tolerates_ghost_quotes() {
    let h = harness();
    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[
                (100, "op"),
                (101, r##"<a href="#p100" class="quotelink">&gt;&gt;100</a> nice"##),
                (102, r##"<a href="#p999" class="quotelink">&gt;&gt;999</a> gone"##),
            ]),
        ))
        .await;

    let response = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.op.post_no, 100);

    let nos: Vec<i64> = response.posts.iter().map(|p| p.post_no).collect();
    assert_eq!(nos, vec![100, 101, 102]);

    let op = &response.posts[0];
    assert_eq!(op.replies_from, vec![101]);

    // The dangling quote neither errors nor creates a reply edge.
    let post_102 = &response.posts[2];
    assert!(post_102.replies_to.is_empty());
    assert!(post_102.replies_from.is_empty());
}

#[tokio::test]
async fn refetching_unchanged_thread_parses_zero_posts() {
    let h = harness();
    let body = thread_body(&[(100, "op"), (101, "a"), (102, "b")]);

    h.transport
        .push(CannedResponse::Response(200, body.clone()))
        .await;
    let first = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.posts.len(), 3);
    assert_eq!(h.saved.lookup_count(), 3);

    h.saved.reset_lookups();
    h.transport.push(CannedResponse::Response(200, body)).await;

    let mut second_request = thread_request();
    second_request.cached = first.posts.clone();
    let second = h
        .loader
        .execute(url(), second_request, CancellationToken::new())
        .await
        .unwrap();

    // Identical payload: the parser saw an empty batch.
    assert_eq!(h.saved.lookup_count(), 0);
    assert_eq!(second.posts.len(), 3);
}

#[tokio::test]
async fn recovers_404_from_archive_with_cached_posts() {
    // Archive returns {100, 101, 103}: 100/101 tie with the stored copies,
    // 103 is new (deleted server-side, recovered from the archive).
    let archive_posts = vec![
        archive_draft(100, "op"),
        archive_draft(101, "reply"),
        archive_draft(103, "recovered"),
    ];
    let h = harness_with(ArchiveBehavior::Posts(archive_posts), Vec::new());

    let cached = vec![make_post(100, 100, "op"), make_post(100, 101, "reply")];
    h.store
        .insert_or_update_many(&cached, false)
        .await
        .unwrap();

    h.transport
        .push(CannedResponse::Response(404, Vec::new()))
        .await;

    let mut request = thread_request();
    request.cached = cached;
    let response = h
        .loader
        .execute(url(), request, CancellationToken::new())
        .await
        .unwrap();

    let nos: Vec<i64> = response.posts.iter().map(|p| p.post_no).collect();
    assert_eq!(nos, vec![100, 101, 103]);

    let recovered = response.posts.iter().find(|p| p.post_no == 103).unwrap();
    assert_eq!(recovered.archive_id, 7);

    // The fetch attempt was audited.
    assert_eq!(h.archives.attempt_count().await, 1);
}

#[tokio::test]
async fn plain_404_fails_when_nothing_recoverable() {
    let h = harness();
    h.transport
        .push(CannedResponse::Response(404, Vec::new()))
        .await;

    let err = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Server { status: 404 }));
}

#[tokio::test]
async fn catalog_404_never_tries_the_archive() {
    let h = harness_with(
        ArchiveBehavior::Posts(vec![archive_draft(100, "op")]),
        Vec::new(),
    );
    h.transport
        .push(CannedResponse::Response(404, Vec::new()))
        .await;

    let err = h
        .loader
        .execute(url(), catalog_request(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Server { status: 404 }));
    assert_eq!(h.archives.attempt_count().await, 0);
}

#[tokio::test]
async fn offline_thread_404_fails_without_archive_attempt() {
    let h = harness_with(
        ArchiveBehavior::Posts(vec![archive_draft(103, "x")]),
        Vec::new(),
    );
    h.transport
        .push(CannedResponse::Response(404, Vec::new()))
        .await;

    let mut request = thread_request();
    request.offline_thread = true;

    let err = h
        .loader
        .execute(url(), request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Server { status: 404 }));
    assert_eq!(h.archives.attempt_count().await, 0);
}

#[tokio::test]
async fn other_server_errors_fail_immediately() {
    let h = harness();
    h.transport
        .push(CannedResponse::Response(500, Vec::new()))
        .await;

    let err = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Server { status: 500 }));
}

#[tokio::test]
async fn network_error_falls_back_to_stored_posts() {
    let h = harness();

    let stored = vec![
        make_post(100, 100, "op"),
        with_reply_to_op(make_post(100, 101, "reply")),
    ];
    h.store
        .insert_or_update_many(&stored, false)
        .await
        .unwrap();

    h.transport.push(CannedResponse::NetworkError).await;

    let response = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.op.post_no, 100);
    assert_eq!(response.posts.len(), 2);
    // The reply graph is rebuilt even on the store path.
    assert_eq!(response.posts[0].replies_from, vec![101]);
}

#[tokio::test]
async fn network_error_with_empty_store_propagates() {
    let h = harness();
    h.transport.push(CannedResponse::NetworkError).await;

    let err = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_transport_level());
}

#[tokio::test]
async fn offline_thread_is_served_from_store_without_network() {
    let h = harness();

    h.store
        .insert_or_update_many(&[make_post(100, 100, "op")], false)
        .await
        .unwrap();
    // No canned transport response: touching the network would fail.

    let mut request = thread_request();
    request.offline_thread = true;

    let response = h
        .loader
        .execute(url(), request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.posts.len(), 1);
}

#[tokio::test]
async fn offline_thread_with_empty_store_fails_on_network_error() {
    let h = harness();
    h.transport.push(CannedResponse::NetworkError).await;

    let mut request = thread_request();
    request.offline_thread = true;

    let err = h
        .loader
        .execute(url(), request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_transport_level());
}

#[tokio::test]
async fn catalog_preserves_server_bump_order() {
    let h = harness();
    // Bump order 300, 100, 200; numeric order would differ.
    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[(300, "op c"), (100, "op a"), (200, "op b")]),
        ))
        .await;

    let response = h
        .loader
        .execute(url(), catalog_request(), CancellationToken::new())
        .await
        .unwrap();

    let nos: Vec<i64> = response.posts.iter().map(|p| p.post_no).collect();
    assert_eq!(nos, vec![300, 100, 200]);
}

#[tokio::test]
async fn missing_op_is_a_fatal_error() {
    let h = harness();
    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[(101, "reply only")]),
        ))
        .await;

    let err = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoOriginalPost));
}

#[tokio::test]
async fn filter_tag_and_saved_reply_are_attached() {
    let rules = vec![FilterRule {
        id: 1,
        pattern: "buy cheap".to_string(),
        action: FilterAction::Remove,
        boards: None,
        enabled: true,
    }];
    let h = harness_with(ArchiveBehavior::NoArchive, rules);

    h.saved
        .mark_saved(PostDescriptor::new(test_thread(100), 102));

    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[(100, "op"), (101, "buy cheap meds"), (102, "my own post")]),
        ))
        .await;

    let response = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();

    let spam = response.posts.iter().find(|p| p.post_no == 101).unwrap();
    assert_eq!(spam.filter_tag, Some(FilterAction::Remove));

    let own = response.posts.iter().find(|p| p.post_no == 102).unwrap();
    assert!(own.saved_reply);
    assert_eq!(own.filter_tag, None);
}

#[tokio::test]
async fn sticky_cap_limits_reload_and_marks_overflow_deleted() {
    let h = harness();

    // First pass: three posts, no cap.
    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[(100, "op"), (101, "a"), (102, "b")]),
        ))
        .await;
    let first = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.posts.len(), 3);

    // Second pass: the OP now signals a cap of 2. The reload honors it; the
    // cached post outside the window is flagged deleted.
    let capped_body = serde_json::to_vec(&serde_json::json!({
        "posts": [
            { "no": 100, "com": "op", "cap": 2 },
            { "no": 101, "com": "a" },
        ]
    }))
    .unwrap();
    h.transport
        .push(CannedResponse::Response(200, capped_body))
        .await;

    let mut request = thread_request();
    request.cached = first.posts.clone();
    let second = h
        .loader
        .execute(url(), request, CancellationToken::new())
        .await
        .unwrap();

    let post_102 = second.posts.iter().find(|p| p.post_no == 102).unwrap();
    assert!(post_102.deleted);
}

#[tokio::test]
async fn cancelled_token_aborts_the_load() {
    let h = harness();
    h.transport
        .push(CannedResponse::Response(200, thread_body(&[(100, "op")])))
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .loader
        .execute(url(), thread_request(), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn archive_failure_does_not_fail_the_load() {
    let h = harness_with(ArchiveBehavior::Fail("archive down".to_string()), Vec::new());

    h.transport
        .push(CannedResponse::Response(
            200,
            thread_body(&[(100, "op"), (101, "a")]),
        ))
        .await;

    let response = h
        .loader
        .execute(url(), thread_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.posts.len(), 2);
    // Failure still audited.
    assert_eq!(h.archives.attempt_count().await, 1);
}

fn archive_draft(no: i64, comment: &str) -> PostDraft {
    let mut draft = PostDraft::new(test_board(), 100, no);
    draft.op = no == 100;
    draft.raw_comment = comment.to_string();
    draft
}

fn with_reply_to_op(mut post: crate::types::Post) -> crate::types::Post {
    post.replies_to.insert(100);
    post
}
