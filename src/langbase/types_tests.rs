//! Unit tests for Langbase API types.

use super::*;
use serde_json::json;

#[test]
fn test_message_constructors() {
    let msg = Message::system("You are an analyst");
    assert_eq!(msg.role, MessageRole::System);
    assert_eq!(msg.content, "You are an analyst");

    assert_eq!(Message::user("hi").role, MessageRole::User);
    assert_eq!(Message::assistant("ok").role, MessageRole::Assistant);
}

#[test]
fn test_message_role_serializes_lowercase() {
    let value = serde_json::to_value(Message::user("x")).unwrap();
    assert_eq!(value, json!({"role": "user", "content": "x"}));
}

#[test]
fn test_pipe_request_never_streams() {
    let req = PipeRequest::new("analysis", vec![Message::user("article")]);
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["name"], "analysis");
    assert_eq!(value["stream"], false);
    assert_eq!(value["messages"].as_array().unwrap().len(), 1);
}

#[test]
fn test_pipe_response_total_tokens() {
    let resp: PipeResponse = serde_json::from_value(json!({
        "success": true,
        "completion": "{}",
        "threadId": null,
        "raw": {"model": "gpt-4o-mini", "usage": {"total_tokens": 42}}
    }))
    .unwrap();
    assert_eq!(resp.total_tokens(), Some(42));

    let bare: PipeResponse = serde_json::from_value(json!({
        "success": true,
        "completion": "{}",
        "threadId": null,
        "raw": null
    }))
    .unwrap();
    assert_eq!(bare.total_tokens(), None);
}

#[test]
fn test_create_pipe_request_skips_unset_fields() {
    let req = CreatePipeRequest::new("analysis-v1")
        .with_upsert(true)
        .with_json_output(true);
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["name"], "analysis-v1");
    assert_eq!(value["upsert"], true);
    assert_eq!(value["json"], true);
    assert!(value.get("model").is_none());
    assert!(value.get("messages").is_none());
}
