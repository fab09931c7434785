//! OpenAI-compatible chat adapter (`/v1/chat/completions`)
//!
//! Sessions ride on two request headers: `X-Session-Id` and
//! `X-Session-Secret` (stored as a SHA-256 hash). The request body is the
//! standard `{messages, stream}` shape. The tool loop behind the response
//! is bounded by the router (`MAX_FUNCTION_CALLS`, one proof-producing
//! call per request).
//!
//! Streaming responses emit a `step` event per tool round, the assistant
//! content as chunk deltas, and a final `data: [DONE]` frame, with a 15 s
//! keepalive so intermediaries hold the connection open.
//!
//! The final skill result is appended to the content as a compact
//! annotated block: summary fields only, never proof bytes, with derived
//! QR image links for URL outputs.

use super::AppState;
use crate::llm::router::StepEvent;
use crate::llm::ChatMessage;
use crate::skills::Skill;
use crate::store::ChatSession;
use crate::store::ChatStore;
use crate::{ProofportError, Result};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// SSE heartbeat, to keep intermediaries from closing idle streams
const STREAM_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// The `/v1/chat/completions` endpoint
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    match chat(&state, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn chat(state: &AppState, headers: HeaderMap, body: ChatRequest) -> Result<Response> {
    let router = state.router.clone().ok_or_else(|| {
        ProofportError::dependency("no LLM provider is configured on this deployment")
    })?;

    let session_id = header(&headers, "x-session-id")?;
    let secret = header(&headers, "x-session-secret")?;
    let secret_hash = ChatStore::hash_secret(&secret);

    let mut session = match state.chats.get(&session_id).await? {
        Some(session) => {
            if session.secret_hash != secret_hash {
                return Err(ProofportError::invalid_params(
                    "session secret does not match",
                ));
            }
            session
        }
        None => ChatSession {
            secret_hash,
            history: Vec::new(),
        },
    };

    if body.messages.is_empty() {
        return Err(ProofportError::invalid_params("messages must be non-empty"));
    }
    // Client-sent system prompts are dropped; the router supplies its own
    session
        .history
        .extend(body.messages.into_iter().filter(|m| m.role != "system"));

    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let model = body.model.unwrap_or_else(|| "proofport-router".to_string());

    if body.stream {
        Ok(stream_chat(
            state.clone(),
            router,
            session,
            session_id,
            completion_id,
            model,
        ))
    } else {
        let outcome = router.run_chat(&session.history, None).await?;
        let content = annotate(&outcome.content, outcome.last_result.as_ref());
        session.history.extend(outcome.appended);
        state.chats.put(&session_id, session).await?;

        Ok(Json(json!({
            "id": completion_id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
        }))
        .into_response())
    }
}

fn stream_chat(
    state: AppState,
    router: crate::llm::SkillRouter,
    mut session: ChatSession,
    session_id: String,
    completion_id: String,
    model: String,
) -> Response {
    let (tx, rx) =
        tokio::sync::mpsc::unbounded_channel::<std::result::Result<Event, std::convert::Infallible>>();
    let (step_tx, mut step_rx) = tokio::sync::mpsc::unbounded_channel::<StepEvent>();

    // Relay step events as they happen
    let step_sink = tx.clone();
    tokio::spawn(async move {
        while let Some(step) = step_rx.recv().await {
            let frame = Event::default()
                .event("step")
                .data(serde_json::to_string(&step).unwrap_or_default());
            if step_sink.send(Ok(frame)).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let chunk = |delta: Value, finish: Option<&str>| {
            json!({
                "id": completion_id,
                "object": "chat.completion.chunk",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{ "index": 0, "delta": delta, "finish_reason": finish }],
            })
        };

        match router.run_chat(&session.history, Some(step_tx)).await {
            Ok(outcome) => {
                let content = annotate(&outcome.content, outcome.last_result.as_ref());
                session.history.extend(outcome.appended);
                if let Err(err) = state.chats.put(&session_id, session).await {
                    tracing::error!(session_id, error = %err, "chat history write failed");
                }

                let _ = tx.send(Ok(Event::default()
                    .data(chunk(json!({ "role": "assistant" }), None).to_string())));
                let _ = tx.send(Ok(Event::default()
                    .data(chunk(json!({ "content": content }), None).to_string())));
                let _ = tx.send(Ok(
                    Event::default().data(chunk(json!({}), Some("stop")).to_string())
                ));
            }
            Err(err) => {
                tracing::error!(error = %err, "chat loop failed");
                let _ = tx.send(Ok(Event::default()
                    .data(json!({ "error": { "message": err.to_string() } }).to_string())));
            }
        }
        let _ = tx.send(Ok(Event::default().data("[DONE]")));
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(STREAM_KEEPALIVE))
        .into_response()
}

fn header(headers: &HeaderMap, name: &str) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ProofportError::invalid_params(format!("the {} header is required", name))
        })
}

/// Append the annotated result block: summary fields only, QR links for
/// any URL outputs
fn annotate(content: &str, last_result: Option<&(Skill, Value)>) -> String {
    let Some((skill, summary)) = last_result else {
        return content.to_string();
    };
    let mut out = format!(
        "{}\n\n---\n**{} result**\n```json\n{}\n```",
        content,
        skill,
        serde_json::to_string_pretty(summary).unwrap_or_default()
    );
    if let Some(map) = summary.as_object() {
        for (key, value) in map {
            if key.to_lowercase().ends_with("url") {
                if let Some(url) = value.as_str() {
                    out.push_str(&format!("\n[{} QR]({})", key, qr_image_url(url)));
                }
            }
        }
    }
    out
}

/// Derived QR image URL for a link the caller may want to hand to a phone
fn qr_image_url(data: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(data.as_bytes()).collect();
    format!(
        "https://api.qrserver.com/v1/create-qr-code/?size=220x220&data={}",
        encoded
    )
}
