//! Webhook Handler
//!
//! Receives Telegram updates, dispatches commands, relays everything else
//! to the model and persists both sides of the exchange.
//!
//! ```text
//! POST /webhook ──► parse ──► /reset | /help ──► reply
//!                     │
//!                     └──► build conversation ──► store user turn
//!                              ──► model ──► store assistant turn ──► reply
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::conversation::ConversationBuilder;
use crate::gemini::LanguageModel;
use crate::history::{HistoryStore, Role, StorageError};
use crate::telegram::ChatPlatform;

pub const TEXT_ONLY_NOTICE: &str = "I only understand text for now.";
pub const RESET_CONFIRMATION: &str = "Conversation history cleared. Let's start fresh!";
pub const HELP_TEXT: &str = "I am an AI chat bot. Just type anything and I'll reply like a human.\n\n\
Commands:\n\
/help - show this message\n\
/reset - clear our conversation history\n";

// ===== Update types =====

/// Subset of a Telegram Update this relay cares about
#[derive(Debug, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

impl Update {
    /// New message preferred over an edit
    pub fn into_message(self) -> Option<Message> {
        self.message.or(self.edited_message)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

// ===== Errors =====

/// Failures that change the webhook status code
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "ok": false }))).into_response()
    }
}

// ===== State =====

/// Shared handler state
#[derive(Clone)]
pub struct RelayState {
    pub store: Arc<HistoryStore>,
    pub builder: ConversationBuilder,
    pub model: Arc<dyn LanguageModel>,
    pub platform: Arc<dyn ChatPlatform>,
}

impl RelayState {
    pub fn new(
        store: Arc<HistoryStore>,
        builder: ConversationBuilder,
        model: Arc<dyn LanguageModel>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self {
            store,
            builder,
            model,
            platform,
        }
    }
}

// ===== Handlers =====

fn ack() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Parse the body into an update; `Err` means a 400
fn parse_update(body: &[u8]) -> Result<Update, WebhookError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| WebhookError::BadRequest("body is not JSON"))?;

    let empty = match &value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    };
    if empty {
        return Err(WebhookError::BadRequest("empty update"));
    }

    // Well-formed JSON of an unexpected shape is acknowledged, not rejected
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Unrecognized update shape: {}", e);
        Update::default()
    }))
}

/// Telegram update callback
pub async fn handle_update(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    if !is_json(&headers) {
        return Err(WebhookError::BadRequest("content type must be application/json"));
    }

    let update = parse_update(&body)?;
    let update_id = update.update_id;

    let Some(message) = update.into_message() else {
        debug!("Ignoring non-message update {:?}", update_id);
        return Ok(ack());
    };

    let Some(chat_id) = message.chat.as_ref().map(|c| c.id) else {
        warn!("Message without chat in update {:?}", update_id);
        return Ok(ack());
    };
    let user_id = message.from.as_ref().map(|u| u.id).unwrap_or(chat_id);
    let message_id = message.message_id;

    let Some(text) = message.text else {
        state.platform.send(chat_id, TEXT_ONLY_NOTICE, None).await;
        return Ok(ack());
    };
    let text = text.trim();

    if text.starts_with("/reset") {
        state.store.clear(user_id).map_err(|e| storage_failure(user_id, e))?;
        state.platform.send(chat_id, RESET_CONFIRMATION, message_id).await;
        return Ok(ack());
    }

    if text.starts_with("/help") {
        state.platform.send(chat_id, HELP_TEXT, message_id).await;
        return Ok(ack());
    }

    let conversation = state
        .builder
        .build(&state.store, user_id)
        .map_err(|e| storage_failure(user_id, e))?;

    state
        .store
        .append(user_id, Role::User, text)
        .map_err(|e| storage_failure(user_id, e))?;

    let reply = state.model.ask(&conversation, text).await;
    if reply.is_degraded() {
        warn!("Delivering degraded reply to user {}", user_id);
    }

    state
        .store
        .append(user_id, Role::Assistant, reply.text())
        .map_err(|e| storage_failure(user_id, e))?;

    state.platform.send(chat_id, reply.text(), message_id).await;
    Ok(ack())
}

fn storage_failure(user_id: i64, e: StorageError) -> WebhookError {
    error!("History store failure for user {}: {}", user_id, e);
    WebhookError::Storage(e)
}

/// Health check handler
pub async fn health() -> &'static str {
    "OK"
}

/// Create webhook router
pub fn webhook_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/webhook", post(handle_update))
        .route("/health", get(health))
        .with_state(state)
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ChatMessage, ChatRole};
    use crate::gemini::{ModelReply, APOLOGY};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeModel {
        fail: bool,
        calls: Mutex<Vec<(Vec<ChatMessage>, String)>>,
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        async fn ask(&self, conversation: &[ChatMessage], user_text: &str) -> ModelReply {
            self.calls
                .lock()
                .push((conversation.to_vec(), user_text.to_string()));
            if self.fail {
                ModelReply::degraded("operation timed out")
            } else {
                ModelReply::Answer(format!("echo: {}", user_text))
            }
        }
    }

    #[derive(Default)]
    struct FakePlatform {
        sent: Mutex<Vec<(i64, String, Option<i64>)>>,
    }

    #[async_trait]
    impl ChatPlatform for FakePlatform {
        async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i64>) {
            self.sent.lock().push((chat_id, text.to_string(), reply_to));
        }
    }

    struct Harness {
        store: Arc<HistoryStore>,
        model: Arc<FakeModel>,
        platform: Arc<FakePlatform>,
        app: Router,
    }

    fn harness(fail: bool) -> Harness {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let model = Arc::new(FakeModel {
            fail,
            ..Default::default()
        });
        let platform = Arc::new(FakePlatform::default());
        let state = Arc::new(RelayState::new(
            store.clone(),
            ConversationBuilder::new("system prompt", 12),
            model.clone(),
            platform.clone(),
        ));
        Harness {
            store,
            model,
            platform,
            app: webhook_router(state),
        }
    }

    fn update(text: Option<&str>) -> Value {
        let mut message = json!({
            "message_id": 10,
            "chat": {"id": 500, "type": "private"},
            "from": {"id": 42, "is_bot": false, "first_name": "Ann"}
        });
        if let Some(text) = text {
            message["text"] = json!(text);
        }
        json!({"update_id": 1, "message": message})
    }

    async fn post(app: Router, content_type: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_first_message_relays_and_persists() {
        let h = harness(false);
        let (status, json) = post(h.app, "application/json", update(Some("  hello ")).to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);

        let calls = h.model.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, vec![ChatMessage::system("system prompt")]);
        assert_eq!(calls[0].1, "hello");

        let turns = h.store.read(42, 12).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].role, turns[0].text.as_str()), (Role::User, "hello"));
        assert_eq!((turns[1].role, turns[1].text.as_str()), (Role::Assistant, "echo: hello"));

        let sent = h.platform.sent.lock();
        assert_eq!(*sent, vec![(500, "echo: hello".to_string(), Some(10))]);
    }

    #[tokio::test]
    async fn test_history_is_replayed() {
        let h = harness(false);
        h.store.append(42, Role::User, "my name is Ann").unwrap();
        h.store.append(42, Role::Assistant, "hi Ann").unwrap();

        post(h.app, "application/json", update(Some("what's my name?")).to_string()).await;

        let calls = h.model.calls.lock();
        let roles: Vec<ChatRole> = calls[0].0.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]);
        assert_eq!(h.store.count(42).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_model_failure_persists_apology() {
        let h = harness(true);
        let (status, _) = post(h.app, "application/json", update(Some("hello")).to_string()).await;

        assert_eq!(status, StatusCode::OK);
        let turns = h.store.read(42, 12).unwrap();
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].text, APOLOGY);
        assert_eq!(h.platform.sent.lock()[0].1, APOLOGY);
    }

    #[tokio::test]
    async fn test_non_text_message_sends_notice_only() {
        let h = harness(false);
        let (status, json) = post(h.app, "application/json", update(None).to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert!(h.model.calls.lock().is_empty());
        assert_eq!(h.store.count(42).unwrap(), 0);
        assert_eq!(
            *h.platform.sent.lock(),
            vec![(500, TEXT_ONLY_NOTICE.to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_reset_clears_without_recording() {
        let h = harness(false);
        h.store.append(42, Role::User, "old").unwrap();
        h.store.append(42, Role::Assistant, "older reply").unwrap();

        let (status, _) = post(h.app, "application/json", update(Some("/reset")).to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.store.count(42).unwrap(), 0);
        assert!(h.model.calls.lock().is_empty());
        assert_eq!(h.platform.sent.lock()[0].1, RESET_CONFIRMATION);
        assert_eq!(h.platform.sent.lock()[0].2, Some(10));
    }

    #[tokio::test]
    async fn test_help_short_circuits() {
        let h = harness(false);
        post(h.app, "application/json", update(Some("/help")).to_string()).await;

        assert!(h.model.calls.lock().is_empty());
        assert_eq!(h.store.count(42).unwrap(), 0);
        assert_eq!(h.platform.sent.lock()[0].1, HELP_TEXT);
    }

    #[tokio::test]
    async fn test_edited_message_is_handled() {
        let h = harness(false);
        let body = json!({
            "update_id": 2,
            "edited_message": {"message_id": 3, "chat": {"id": 9}, "from": {"id": 9}, "text": "edit"}
        });
        post(h.app, "application/json", body.to_string()).await;

        assert_eq!(h.model.calls.lock()[0].1, "edit");
    }

    #[tokio::test]
    async fn test_non_message_update_is_acked() {
        let h = harness(false);
        let body = json!({"update_id": 3, "callback_query": {"id": "abc"}});
        let (status, json) = post(h.app, "application/json", body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert!(h.platform.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let h = harness(false);
        let (status, json) = post(h.app, "text/plain", update(Some("hi")).to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["ok"], false);
        assert_eq!(h.store.count(42).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_charset_parameter_is_accepted() {
        let h = harness(false);
        let (status, _) = post(
            h.app,
            "application/json; charset=utf-8",
            update(Some("hi")).to_string(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_or_empty_json_is_rejected() {
        let h = harness(false);
        let (status, _) = post(h.app.clone(), "application/json", "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for body in ["{}", "null", "[]", "false", "0", "0.0", "\"\""] {
            let (status, json) = post(h.app.clone(), "application/json", body.to_string()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
            assert_eq!(json["ok"], false);
        }
        assert!(h.platform.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_truthy_non_update_json_is_acked() {
        let h = harness(false);
        for body in ["[1]", "true", "7", "\"x\""] {
            let (status, json) = post(h.app.clone(), "application/json", body.to_string()).await;
            assert_eq!(status, StatusCode::OK, "body {}", body);
            assert_eq!(json["ok"], true);
        }
        assert!(h.model.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sender_falls_back_to_chat() {
        let h = harness(false);
        let body = json!({"update_id": 4, "message": {"message_id": 1, "chat": {"id": -100}, "text": "post"}});
        post(h.app, "application/json", body.to_string()).await;

        assert_eq!(h.store.count(-100).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(false);
        let response = h
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }
}
