use common::models::{ChatCompletionResponse, ChatMessage, Role};
use common::truncate::preview;
use serde_json::Value;
use sqlx::SqlitePool;

/// Everything needed to attribute a captured message.
pub struct CaptureMeta<'a> {
    pub pool: &'a SqlitePool,
    pub session_id: &'a str,
    /// Model declared by the inbound request.
    pub model: &'a str,
    /// Correlation tag of the exchange, for log lines only.
    pub tag: &'a str,
    pub preview_chars: usize,
}

/// Canonical text stored for a request message: string content as-is,
/// structured content as JSON, and the whole message as JSON when it has no
/// content at all (tool-call turns).
pub fn stored_content(msg: &ChatMessage) -> String {
    match &msg.content {
        Value::String(s) => s.clone(),
        Value::Null => {
            let mut whole = msg.extra.clone();
            whole.insert("role".to_string(), Value::String(msg.role.clone()));
            whole.insert("content".to_string(), Value::Null);
            Value::Object(whole).to_string()
        }
        structured => structured.to_string(),
    }
}

/// Append one row, logging instead of failing. Returns whether it was stored.
pub async fn persist(meta: &CaptureMeta<'_>, role: &Role, model: &str, content: &str) -> bool {
    let result = db::append_message(
        meta.pool,
        &db::NewMessage {
            session_id: meta.session_id,
            role,
            content,
            model,
        },
    )
    .await;
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!(
                "[{}] Session {} - Failed to save {} message: {}",
                meta.tag,
                meta.session_id,
                role,
                e
            );
            false
        }
    }
}

/// Persist every input message of a chat request, in order. Returns how many
/// rows were written.
pub async fn capture_request(meta: &CaptureMeta<'_>, messages: &[ChatMessage]) -> usize {
    let mut stored = 0;
    for msg in messages {
        let role = Role::from(msg.role.as_str());
        let content = stored_content(msg);
        log::debug!(
            "[{}] Session {} - {}: {}",
            meta.tag,
            meta.session_id,
            role,
            preview(&content, meta.preview_chars)
        );
        if persist(meta, &role, meta.model, &content).await {
            stored += 1;
        }
    }
    stored
}

/// Persist an assembled assistant reply.
pub async fn persist_assistant(meta: &CaptureMeta<'_>, model: &str, text: &str) -> bool {
    log::info!(
        "[{}] Session {} - Assistant response: {}",
        meta.tag,
        meta.session_id,
        preview(text, meta.preview_chars)
    );
    persist(meta, &Role::Assistant, model, text).await
}

/// Capture the assistant messages of a buffered chat-completion response.
/// Bodies that are not chat completions (errors, other endpoints) are ignored.
pub async fn capture_completion(meta: &CaptureMeta<'_>, body: &[u8]) -> usize {
    let response: ChatCompletionResponse = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            log::debug!(
                "[{}] Response is not a chat completion, nothing captured: {}",
                meta.tag,
                e
            );
            return 0;
        }
    };

    let model = if response.model.is_empty() {
        meta.model
    } else {
        response.model.as_str()
    };

    let mut stored = 0;
    for choice in &response.choices {
        let Some(content) = choice.message.content.as_deref() else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        if persist_assistant(meta, model, content).await {
            stored += 1;
        }
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_pool() -> SqlitePool {
        db::init_pool(db::MEMORY_DB).await.unwrap()
    }

    fn meta<'a>(pool: &'a SqlitePool) -> CaptureMeta<'a> {
        CaptureMeta {
            pool,
            session_id: "s1",
            model: "req-model",
            tag: "test",
            preview_chars: 40,
        }
    }

    fn message(value: Value) -> ChatMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn string_content_stored_verbatim() {
        let msg = message(json!({"role": "user", "content": "hi"}));
        assert_eq!(stored_content(&msg), "hi");
    }

    #[test]
    fn structured_content_stored_as_json() {
        let msg = message(json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}]
        }));
        let stored: Value = serde_json::from_str(&stored_content(&msg)).unwrap();
        assert_eq!(stored, json!([{"type": "text", "text": "hi"}]));
    }

    #[test]
    fn missing_content_keeps_whole_message() {
        let msg = message(json!({
            "role": "assistant",
            "tool_calls": [{"id": "call_1", "function": {"name": "read", "arguments": "{}"}}]
        }));
        let stored: Value = serde_json::from_str(&stored_content(&msg)).unwrap();
        assert_eq!(stored["role"], "assistant");
        assert!(stored["content"].is_null());
        assert_eq!(stored["tool_calls"][0]["id"], "call_1");
    }

    #[tokio::test]
    async fn request_messages_captured_in_order() {
        let pool = memory_pool().await;
        let messages = vec![
            message(json!({"role": "system", "content": "be brief"})),
            message(json!({"role": "user", "content": "hi"})),
            message(json!({"role": "tool", "content": "42", "tool_call_id": "c1"})),
        ];
        assert_eq!(capture_request(&meta(&pool), &messages).await, 3);

        let rows = db::list_messages(&pool, "s1").await.unwrap();
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.role.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("system", "be brief"), ("user", "hi"), ("tool", "42")]
        );
        assert!(rows.iter().all(|r| r.model.as_deref() == Some("req-model")));
    }

    #[tokio::test]
    async fn storage_failure_is_swallowed() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let messages = vec![message(json!({"role": "user", "content": "hi"}))];
        assert_eq!(capture_request(&meta(&pool), &messages).await, 0);
        assert!(!persist_assistant(&meta(&pool), "m", "hello").await);
    }

    #[tokio::test]
    async fn completion_choices_captured() {
        let pool = memory_pool().await;
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "resp-model",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": ""}, "finish_reason": "stop"},
                {"index": 2, "message": {"role": "assistant", "content": null}, "finish_reason": "tool_calls"}
            ]
        });
        let stored = capture_completion(&meta(&pool), body.to_string().as_bytes()).await;
        assert_eq!(stored, 1);

        let rows = db::list_messages(&pool, "s1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::Assistant);
        assert_eq!(rows[0].content, "hello");
        assert_eq!(rows[0].model.as_deref(), Some("resp-model"));
    }

    #[tokio::test]
    async fn completion_without_model_uses_request_model() {
        let pool = memory_pool().await;
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        capture_completion(&meta(&pool), body.to_string().as_bytes()).await;
        let rows = db::list_messages(&pool, "s1").await.unwrap();
        assert_eq!(rows[0].model.as_deref(), Some("req-model"));
    }

    #[tokio::test]
    async fn non_completion_body_ignored() {
        let pool = memory_pool().await;
        assert_eq!(capture_completion(&meta(&pool), b"<html>oops</html>").await, 0);
        let error = json!({"error": {"message": "rate limited", "type": "rate_limit"}});
        assert_eq!(
            capture_completion(&meta(&pool), error.to_string().as_bytes()).await,
            0
        );
        assert_eq!(db::count_messages(&pool, "s1").await.unwrap(), 0);
    }
}
