mod common;

use axum::http::StatusCode;
use chat_relay::error::GENERIC_ERROR_DETAIL;
use chat_relay::llm::Message;
use chat_relay::llm::orchestrator::DEFAULT_SYSTEM_PROMPT;
use chat_relay::markdown::render_markdown;
use chat_relay::store::{HistoryEntry, MessageStore};
use common::{Script, spawn_app, spawn_failing_app};
use serde_json::json;

#[tokio::test]
async fn test_chat_streams_reply_and_persists_both_turns() {
    let app = spawn_app([Script::Reply(vec!["Hello", " there"])]).await;

    let resp = app.server.post("/chat").json(&json!({ "message": "Hi" })).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert!(
        resp.header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(resp.text(), "Hello there");

    let history: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert_eq!(
        history,
        vec![
            HistoryEntry {
                content: "Hi".to_string(),
                is_user: true,
            },
            HistoryEntry {
                content: "<p>Hello there</p>\n".to_string(),
                is_user: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_each_exchange_adds_two_entries() {
    let app = spawn_app([
        Script::Reply(vec!["# Title\n\n", "* one\n", "* two"]),
        Script::Reply(vec!["Second"]),
    ])
    .await;

    let before: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert!(before.is_empty());

    app.server
        .post("/chat")
        .json(&json!({ "message": "First" }))
        .await
        .assert_status_ok();
    let after_one: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert_eq!(after_one.len(), 2);
    assert_eq!(
        after_one[1].content,
        render_markdown("# Title\n\n* one\n* two")
    );
    assert!(after_one[1].content.contains("<h1>Title</h1>"));

    app.server
        .post("/chat")
        .json(&json!({ "message": "Second question" }))
        .await
        .assert_status_ok();
    let after_two: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert_eq!(after_two.len(), 4);
    assert_eq!(&after_two[..2], &after_one[..]);
    assert_eq!(after_two[2].content, "Second question");
    assert!(after_two[2].is_user);
    assert!(!after_two[3].is_user);
}

#[tokio::test]
async fn test_model_sees_prior_exchange() {
    let app = spawn_app([
        Script::Reply(vec!["**Paris**"]),
        Script::Reply(vec!["About 2 million."]),
    ])
    .await;

    app.server
        .post("/chat")
        .json(&json!({ "message": "Capital of France?" }))
        .await
        .assert_status_ok();
    app.server
        .post("/chat")
        .json(&json!({ "message": "Population?" }))
        .await
        .assert_status_ok();

    let calls = app.client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].system_prompt, DEFAULT_SYSTEM_PROMPT);
    assert!(calls[0].history.is_empty());
    assert_eq!(calls[0].session_id, "default");

    // Model context keeps the raw markdown, not the stored HTML.
    assert_eq!(
        calls[1].history,
        vec![
            Message::user("Capital of France?"),
            Message::assistant("**Paris**"),
        ]
    );
    assert_eq!(calls[1].input, "Population?");
}

#[tokio::test]
async fn test_auth_failure_keeps_only_user_turn() {
    let app = spawn_app([Script::Unauthorized]).await;

    let resp = app
        .server
        .post("/chat")
        .json(&json!({ "message": "Hi" }))
        .expect_failure()
        .await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_json(&json!({ "detail": GENERIC_ERROR_DETAIL }));

    let turns = app.store.list_all().await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].content, "Hi");
    assert!(turns[0].is_user);
    assert!(app.histories.get("default").is_empty());
}

#[tokio::test]
async fn test_rate_limit_is_opaque_500() {
    let app = spawn_app([Script::RateLimited]).await;

    let resp = app
        .server
        .post("/chat")
        .json(&json!({ "message": "Hi" }))
        .expect_failure()
        .await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!resp.text().contains("Rate limit"));
    resp.assert_json(&json!({ "detail": GENERIC_ERROR_DETAIL }));

    let history: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_storage_failure_never_reaches_model() {
    let (server, client) = spawn_failing_app();

    let resp = server
        .post("/chat")
        .json(&json!({ "message": "Hi" }))
        .expect_failure()
        .await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_json(&json!({ "detail": GENERIC_ERROR_DETAIL }));
    assert!(client.calls().is_empty());

    let resp = server.get("/history").expect_failure().await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    resp.assert_json(&json!({ "detail": GENERIC_ERROR_DETAIL }));
}

#[tokio::test]
async fn test_history_reads_are_idempotent() {
    let app = spawn_app([Script::Reply(vec!["Sure."])]).await;
    app.server
        .post("/chat")
        .json(&json!({ "message": "Hello" }))
        .await
        .assert_status_ok();

    let first = app.server.get("/history").await.text();
    let second = app.server.get("/history").await.text();
    assert_eq!(first, second);

    let raw: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(raw[0], json!({ "content": "Hello", "is_user": true }));
}

#[tokio::test]
async fn test_sessions_keep_separate_context() {
    let app = spawn_app([
        Script::Reply(vec!["A"]),
        Script::Reply(vec!["B"]),
        Script::Reply(vec!["C"]),
    ])
    .await;

    app.server
        .post("/chat")
        .json(&json!({ "message": "one", "session_id": "alpha" }))
        .await
        .assert_status_ok();
    app.server
        .post("/chat")
        .json(&json!({ "message": "two", "session_id": "beta" }))
        .await
        .assert_status_ok();
    app.server
        .post("/chat")
        .json(&json!({ "message": "three", "session_id": "alpha" }))
        .await
        .assert_status_ok();

    let calls = app.client.calls();
    assert!(calls[1].history.is_empty());
    assert_eq!(calls[1].session_id, "beta");
    assert_eq!(calls[2].history.len(), 2);
    assert_eq!(calls[2].history[0], Message::user("one"));

    // The turn log is global.
    let history: Vec<HistoryEntry> = app.server.get("/history").await.json();
    assert_eq!(history.len(), 6);
}

#[tokio::test]
async fn test_blank_session_id_uses_default() {
    let app = spawn_app([]).await;
    app.server
        .post("/chat")
        .json(&json!({ "message": "x", "session_id": "  " }))
        .await
        .assert_status_ok();
    assert_eq!(app.client.calls()[0].session_id, "default");
}

#[tokio::test]
async fn test_missing_message_is_rejected() {
    let app = spawn_app([]).await;

    let resp = app
        .server
        .post("/chat")
        .json(&json!({}))
        .expect_failure()
        .await;
    assert_eq!(resp.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.client.calls().is_empty());
    assert!(app.store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_serves_chat_page() {
    let app = spawn_app([]).await;

    let resp = app.server.get("/").await;
    resp.assert_status_ok();
    assert!(
        resp.header("content-type")
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    assert!(resp.text().contains("/static/js/chat.js"));
}
