//! Streaming chat integration tests (PostgreSQL-backed, mock LLM).

#![cfg(feature = "pg-tests")]

mod support;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use support::{unique_id, TestHarness};

async fn mount_chat_stream(harness: &TestHarness, body: &'static str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&harness.llm)
        .await;
}

async fn create_conversation(harness: &TestHarness, user: &str) -> String {
    let response = harness
        .server
        .post("/chat/conversations")
        .add_header("authorization", harness.bearer(user))
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["title"], "New Conversation");
    body["id"].as_str().unwrap().to_string()
}

fn data_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|payload| *payload != "[DONE]")
        .map(|payload| serde_json::from_str(payload).expect("valid frame json"))
        .collect()
}

#[tokio::test]
async fn stream_emits_openai_frames_and_terminates() {
    let harness = TestHarness::with_database().await;
    mount_chat_stream(
        &harness,
        concat!(
            "{\"model\":\"llama3:8b\",\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ),
    )
    .await;

    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer(&unique_id("user")))
        .json(&json!({ "messages": [{"role": "user", "content": "say hello"}] }))
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "text/event-stream"
    );

    let body = response.text();
    assert!(body.ends_with("data: [DONE]\n\n"), "stream must terminate cleanly");

    let frames = data_frames(&body);
    let contents: String = frames
        .iter()
        .filter_map(|f| f["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(contents, "Hello");
    let last = frames.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(last["id"].as_str().unwrap().starts_with("chatcmpl-"));
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let harness = TestHarness::with_database().await;
    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer("someone"))
        .json(&json!({ "messages": [] }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["detail"], "Messages are required");
}

#[tokio::test]
async fn stream_persists_messages_and_auto_titles() {
    let harness = TestHarness::with_database().await;
    mount_chat_stream(
        &harness,
        concat!(
            "{\"message\":{\"content\":\"Partitioning splits around a pivot.\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ),
    )
    .await;

    let user = unique_id("user");
    let conversation = create_conversation(&harness, &user).await;
    let prompt = "Explain quicksort partitioning in two sentences, please and thanks.";

    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer(&user))
        .json(&json!({
            "messages": [{"role": "user", "content": prompt}],
            "conversation_id": conversation,
        }))
        .await;
    response.assert_status_ok();
    let body = response.text();

    // The trailer carries both saved row ids.
    let trailer = body
        .lines()
        .find_map(|line| line.strip_prefix(":message_ids "))
        .expect("message_ids trailer");
    let ids: Value = serde_json::from_str(trailer).unwrap();
    assert!(ids["user_message_id"].is_string());
    assert!(ids["assistant_message_id"].is_string());

    let detail: Value = harness
        .server
        .get(&format!("/chat/conversations/{conversation}"))
        .add_header("authorization", harness.bearer(&user))
        .await
        .json();
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], prompt);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(
        messages[1]["content"],
        "Partitioning splits around a pivot."
    );
    assert_eq!(messages[1]["model"], "llama3:8b");

    // Auto-title: 50-char cut of the first user message.
    let title = detail["conversation"]["title"].as_str().unwrap();
    assert_ne!(title, "New Conversation");
    assert!(title.chars().count() <= 50);
    assert!(prompt.starts_with(title.trim_end_matches("...")));
}

#[tokio::test]
async fn duplicate_submission_stores_one_user_row() {
    let harness = TestHarness::with_database().await;
    mount_chat_stream(
        &harness,
        concat!(
            "{\"message\":{\"content\":\"same answer\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ),
    )
    .await;

    let user = unique_id("user");
    let conversation = create_conversation(&harness, &user).await;
    let request = json!({
        "messages": [{"role": "user", "content": "double submit"}],
        "conversation_id": conversation,
    });

    for _ in 0..2 {
        harness
            .server
            .post("/chat")
            .add_header("authorization", harness.bearer(&user))
            .json(&request)
            .await
            .assert_status_ok();
    }

    let detail: Value = harness
        .server
        .get(&format!("/chat/conversations/{conversation}"))
        .add_header("authorization", harness.bearer(&user))
        .await
        .json();
    let messages = detail["messages"].as_array().unwrap();
    let users = messages.iter().filter(|m| m["role"] == "user").count();
    let assistants = messages.iter().filter(|m| m["role"] == "assistant").count();
    assert_eq!(users, 1, "rapid duplicate submissions collapse to one row");
    assert_eq!(
        assistants, 1,
        "identical assistant output dedupes to one row"
    );
}

#[tokio::test]
async fn thinking_chunks_travel_as_comments() {
    let harness = TestHarness::with_database().await;
    mount_chat_stream(
        &harness,
        concat!(
            "{\"message\":{\"content\":\"\",\"thinking\":\"working on it\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"done\"},\"done\":true}\n",
        ),
    )
    .await;

    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer(&unique_id("user")))
        .json(&json!({ "messages": [{"role": "user", "content": "think"}] }))
        .await;
    let body = response.text();
    let comment = body
        .lines()
        .find_map(|line| line.strip_prefix(":thinking "))
        .expect("thinking comment");
    let value: Value = serde_json::from_str(comment).unwrap();
    assert_eq!(value["thinking"], "working on it");
    assert!(value["messageId"].as_str().unwrap().starts_with("chatcmpl-"));
}

#[tokio::test]
async fn unknown_conversation_is_404_before_streaming() {
    let harness = TestHarness::with_database().await;
    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer("someone"))
        .json(&json!({
            "messages": [{"role": "user", "content": "hi"}],
            "conversation_id": uuid::Uuid::new_v4().to_string(),
        }))
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn unreachable_llm_backend_is_503() {
    let harness = TestHarness::with_database().await;
    // No /api/chat mock mounted: wiremock answers 404, which the client
    // surfaces as an API error before headers go out.
    let response = harness
        .server
        .post("/chat")
        .add_header("authorization", harness.bearer("someone"))
        .json(&json!({ "messages": [{"role": "user", "content": "hi"}] }))
        .await;
    assert_eq!(response.status_code(), 404);
}
