//! Route handlers for the OpenAI-compatible HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use relaybot_core::bus::types::{InboundMessage, StreamChunk, StreamSink};

use crate::server::GatewayState;

/// `GET /health`.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> axum::response::Response {
    if !check_bearer(&state, &headers) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid_request_error", "Invalid API key");
    }

    if req.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", "messages is required");
    }

    let user = req.user.clone().unwrap_or_else(|| "anonymous".to_string());
    let stream = req.stream.unwrap_or(false);

    let Some(content) = req.last_user_text() else {
        return error_response(StatusCode::BAD_REQUEST, "invalid_request_error", "No user message found");
    };

    if !state.is_allowed(&user) {
        return error_response(StatusCode::FORBIDDEN, "permission_error", "User not allowed");
    }

    let request_id = format!("chatcmpl-{}", &Uuid::new_v4().simple().to_string()[..24]);
    let chat_id = format!("{user}:{}", &Uuid::new_v4().simple().to_string()[..8]);

    info!(stream, %user, %chat_id, "chat completions request");

    if stream {
        handle_streaming(state, request_id, chat_id, user, content).await.into_response()
    } else {
        handle_non_streaming(state, request_id, chat_id, user, content).await.into_response()
    }
}

fn check_bearer(state: &GatewayState, headers: &HeaderMap) -> bool {
    if state.config.api_keys.is_empty() {
        return true;
    }
    let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(token) = auth.strip_prefix("Bearer ") else {
        return false;
    };
    state.config.api_keys.iter().any(|k| k == token)
}

async fn handle_non_streaming(
    state: Arc<GatewayState>,
    request_id: String,
    chat_id: String,
    user: String,
    content: String,
) -> axum::response::Response {
    let rx = state.pending.register(chat_id.clone());
    let msg = InboundMessage::new("http", &user, &chat_id, &content);

    if let Err(e) = state.bus.publish_inbound(msg).await {
        state.pending.remove(&chat_id);
        warn!(error = %e, "failed to publish inbound message");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Failed to dispatch message");
    }

    let reply = tokio::time::timeout(Duration::from_secs(state.config.timeout), rx).await;
    let reply_content = match reply {
        Ok(Ok(content)) => content,
        Ok(Err(_)) => {
            return error_response(StatusCode::from_u16(499).unwrap(), "cancelled_error", "Request cancelled");
        }
        Err(_) => {
            state.pending.remove(&chat_id);
            return error_response(StatusCode::GATEWAY_TIMEOUT, "timeout_error", "Request timeout");
        }
    };

    let prompt_tokens = (content.len() / 4) as u32;
    let completion_tokens = (reply_content.len() / 4) as u32;

    let body = ChatCompletionResponse {
        id: request_id,
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: state.config.model_name.clone(),
        choices: vec![Choice {
            index: 0,
            message: Some(ChatMessageOut { role: "assistant".to_string(), content: Some(reply_content) }),
            delta: None,
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }),
    };

    (StatusCode::OK, Json(body)).into_response()
}

async fn handle_streaming(
    state: Arc<GatewayState>,
    request_id: String,
    chat_id: String,
    user: String,
    content: String,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamChunk>(64);
    let msg = InboundMessage::new("http", &user, &chat_id, &content).with_stream_callback(StreamSink::new(tx));

    if let Err(e) = state.bus.publish_inbound(msg).await {
        warn!(error = %e, "failed to publish inbound streaming message");
    }

    let model = state.config.model_name.clone();
    let timeout = Duration::from_secs(state.config.timeout);

    let stream = async_stream::stream! {
        loop {
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(chunk)) => {
                    let is_final = chunk.is_final;
                    let sse = chunk_to_response(&request_id, &model, chunk);
                    yield Ok(Event::default().data(serde_json::to_string(&sse).unwrap_or_default()));
                    if is_final {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let error = serde_json::json!({ "error": { "message": "Stream timeout", "type": "timeout_error" } });
                    yield Ok(Event::default().data(error.to_string()));
                    break;
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn chunk_to_response(request_id: &str, model: &str, chunk: StreamChunk) -> ChatCompletionResponse {
    let delta = if chunk.is_final {
        ChatMessageOut { role: "assistant".to_string(), content: None }
    } else {
        ChatMessageOut { role: "assistant".to_string(), content: Some(chunk.content) }
    };

    ChatCompletionResponse {
        id: request_id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: None,
            delta: Some(delta),
            finish_reason: if chunk.is_final { Some(chunk.finish_reason.unwrap_or_else(|| "stop".to_string())) } else { None },
        }],
        usage: None,
    }
}

fn error_response(status: StatusCode, error_type: &str, message: &str) -> axum::response::Response {
    let body = serde_json::json!({ "error": { "message": message, "type": error_type } });
    (status, Json(body)).into_response()
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessageIn>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// The last `role: "user"` message's text, flattening multimodal list
    /// content down to its `text` parts joined by newline.
    fn last_user_text(&self) -> Option<String> {
        let msg = self.messages.iter().rev().find(|m| m.role == "user")?;
        match &msg.content {
            Some(MessageContentIn::Text(text)) if !text.is_empty() => Some(text.clone()),
            Some(MessageContentIn::Parts(parts)) => {
                let joined = parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n");
                if joined.is_empty() { None } else { Some(joined) }
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
pub struct ChatMessageIn {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContentIn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum MessageContentIn {
    Text(String),
    Parts(Vec<ContentPartIn>),
}

#[derive(Deserialize)]
pub struct ContentPartIn {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: String,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

#[derive(Serialize)]
struct Choice {
    index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<ChatMessageOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<ChatMessageOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
}

#[derive(Serialize)]
struct ChatMessageOut {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_user_text_plain() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![
                ChatMessageIn { role: "system".into(), content: Some(MessageContentIn::Text("sys".into())) },
                ChatMessageIn { role: "user".into(), content: Some(MessageContentIn::Text("hello".into())) },
            ],
            stream: None,
            user: None,
        };
        assert_eq!(req.last_user_text(), Some("hello".to_string()));
    }

    #[test]
    fn test_last_user_text_multimodal() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessageIn {
                role: "user".into(),
                content: Some(MessageContentIn::Parts(vec![
                    ContentPartIn { part_type: "text".into(), text: Some("line one".into()) },
                    ContentPartIn { part_type: "image_url".into(), text: None },
                    ContentPartIn { part_type: "text".into(), text: Some("line two".into()) },
                ])),
            }],
            stream: None,
            user: None,
        };
        assert_eq!(req.last_user_text(), Some("line one\nline two".to_string()));
    }

    #[test]
    fn test_last_user_text_none_when_no_user_message() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![ChatMessageIn { role: "system".into(), content: Some(MessageContentIn::Text("sys".into())) }],
            stream: None,
            user: None,
        };
        assert_eq!(req.last_user_text(), None);
    }

    #[test]
    fn test_last_user_text_picks_last_of_several() {
        let req = ChatCompletionRequest {
            model: None,
            messages: vec![
                ChatMessageIn { role: "user".into(), content: Some(MessageContentIn::Text("first".into())) },
                ChatMessageIn { role: "assistant".into(), content: Some(MessageContentIn::Text("reply".into())) },
                ChatMessageIn { role: "user".into(), content: Some(MessageContentIn::Text("second".into())) },
            ],
            stream: None,
            user: None,
        };
        assert_eq!(req.last_user_text(), Some("second".to_string()));
    }
}
