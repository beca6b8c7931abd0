//! Unit tests for Langbase API types.

use super::*;

#[test]
fn test_message_constructors() {
    let msg = Message::system("You route university questions");
    assert!(matches!(msg.role, MessageRole::System));
    assert_eq!(msg.content, "You route university questions");

    let msg = Message::user("When is enrollment?");
    assert!(matches!(msg.role, MessageRole::User));

    let msg = Message::assistant("Next Monday.");
    assert!(matches!(msg.role, MessageRole::Assistant));
}

#[test]
fn test_pipe_request_serialization() {
    let req = PipeRequest::new("campus-answer-v1", vec![Message::user("hi")])
        .with_variable("tool", "Calendar events retriever");

    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["name"], "campus-answer-v1");
    assert_eq!(json["stream"], false);
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["variables"]["tool"], "Calendar events retriever");
}

#[test]
fn test_pipe_request_omits_empty_variables() {
    let req = PipeRequest::new("p", vec![]);
    let json = serde_json::to_string(&req).unwrap();
    assert!(!json.contains("variables"));
}

#[test]
fn test_pipe_response_deserialization() {
    let json = r#"{
        "success": true,
        "completion": "answer",
        "threadId": "t-1",
        "raw": {"model": "gpt-4o-mini", "usage": {"total_tokens": 12}}
    }"#;
    let resp: PipeResponse = serde_json::from_str(json).unwrap();
    assert!(resp.success);
    assert_eq!(resp.completion, "answer");
    assert_eq!(resp.thread_id.as_deref(), Some("t-1"));
    let usage = resp.raw.unwrap().usage.unwrap();
    assert_eq!(usage.total_tokens, Some(12));
    assert!(usage.prompt_tokens.is_none());
}

#[test]
fn test_create_pipe_request_builder() {
    let req = CreatePipeRequest::new("campus-guard-v1")
        .with_description("guard")
        .with_model("openai:gpt-4o-mini")
        .with_upsert(true)
        .with_json_output(false)
        .with_temperature(0.0)
        .with_max_tokens(16)
        .with_messages(vec![Message::system("classify")]);

    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["name"], "campus-guard-v1");
    assert_eq!(json["upsert"], true);
    assert_eq!(json["json"], false);
    assert_eq!(json["max_tokens"], 16);
    assert_eq!(json["messages"][0]["role"], "system");
}

#[test]
fn test_create_pipe_request_skips_unset_fields() {
    let json = serde_json::to_string(&CreatePipeRequest::new("bare")).unwrap();
    assert_eq!(json, r#"{"name":"bare"}"#);
}

#[test]
fn test_memory_retrieve_request_shape() {
    let req = MemoryRetrieveRequest::new("university-calendar", "events next week", 20);
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["query"], "events next week");
    assert_eq!(json["memory"][0]["name"], "university-calendar");
    assert_eq!(json["topK"], 20);
}

#[test]
fn test_memory_chunk_meta_is_optional() {
    let chunks: Vec<MemoryChunk> =
        serde_json::from_str(r#"[{"text": "Lecture", "similarity": 0.91}]"#).unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].meta.is_none());
    assert!((chunks[0].similarity - 0.91).abs() < 1e-9);
}
