//! Task JSON-RPC adapter (`/a2a`)
//!
//! Methods: `message/send` (blocks until the task reaches a terminal state
//! or parks on input-required), `message/stream` (SSE of JSON-RPC
//! envelopes), `tasks/get` (optional history trim), `tasks/cancel`
//! (transition-checked), `tasks/resubscribe` (re-attach SSE, or return the
//! task directly when it is already terminal).
//!
//! A message carries parts: a `data` part names the skill and its params
//! directly; a `text` part is resolved through the LLM router.

use super::AppState;
use crate::events::TaskEvent;
use crate::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::skills::Skill;
use crate::types::{Message, Part, PaymentHeaderPayload, PaymentRecord, Task, TaskState};
use crate::{ProofportError, Result};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// How long message/send waits for the worker before reporting the task
/// as still running
const SEND_WAIT: Duration = Duration::from_secs(120);

/// SSE keep-alive interval
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

/// The `/a2a` endpoint
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => {
            return Json(JsonRpcResponse::error(Value::Null, PARSE_ERROR, "parse error"))
                .into_response()
        }
    };
    if !request.is_valid() {
        return Json(JsonRpcResponse::error(
            request.id,
            INVALID_REQUEST,
            "malformed JSON-RPC request",
        ))
        .into_response();
    }

    let id = request.id.clone();
    match request.method.as_str() {
        "message/send" => respond(
            id.clone(),
            message_send(&state, request.params, &headers).await,
        ),
        "message/stream" => message_stream(&state, id, request.params, &headers).await,
        "tasks/get" => respond(id, tasks_get(&state, request.params).await),
        "tasks/cancel" => respond(id, tasks_cancel(&state, request.params).await),
        "tasks/resubscribe" => tasks_resubscribe(&state, id, request.params).await,
        _ => Json(JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method {}", request.method),
        ))
        .into_response(),
    }
}

fn respond<T: serde::Serialize>(id: Value, result: Result<T>) -> Response {
    match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(err) => Json(JsonRpcResponse::from_service_error(id, &err)).into_response(),
    }
}

/// Resolve the skill invocation carried by a message's parts
async fn resolve_parts(state: &AppState, parts: &[Part]) -> Result<(Skill, Value)> {
    for part in parts {
        if let Part::Data { data } = part {
            let skill_name = data.get("skill").and_then(Value::as_str).ok_or_else(|| {
                ProofportError::invalid_params("data part must carry a skill field")
            })?;
            let skill = Skill::from_str(skill_name)?;
            let mut params = data.clone();
            if let Some(map) = params.as_object_mut() {
                map.remove("skill");
            }
            return Ok((skill, params));
        }
    }
    for part in parts {
        if let Part::Text { text } = part {
            let router = state.router.as_ref().ok_or_else(|| {
                ProofportError::invalid_params(
                    "no LLM provider is configured; send a data part with a skill field",
                )
            })?;
            return router.resolve(text).await;
        }
    }
    Err(ProofportError::invalid_params(
        "message carries no usable parts",
    ))
}

/// Build (but do not enqueue) a task from message/send or message/stream
/// params; callers subscribe to the event bus before submitting so the
/// worker cannot outrun them
async fn build_task(state: &AppState, params: &Value) -> Result<Task> {
    let message: Message = serde_json::from_value(
        params
            .get("message")
            .cloned()
            .ok_or_else(|| ProofportError::invalid_params("params.message is required"))?,
    )
    .map_err(|e| ProofportError::invalid_params(format!("invalid message: {}", e)))?;

    let (skill, skill_params) = resolve_parts(state, &message.parts).await?;

    let task_id = Uuid::new_v4().to_string();
    let context_id = message
        .context_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut task = Task::new(&task_id, Some(context_id.clone()), skill.as_str(), skill_params);
    task.history.push(Message {
        task_id: Some(task_id.clone()),
        context_id: Some(context_id),
        ..message
    });
    Ok(task)
}

/// Record an accompanying payment header as a pending ledger row
///
/// The upstream HTTP payment gate has already validated funds, so a parse
/// failure here is logged and the request continues.
async fn record_payment(state: &AppState, task_id: &str, headers: &HeaderMap) {
    let Some(header) = headers.get("x-payment").and_then(|v| v.to_str().ok()) else {
        return;
    };
    match PaymentHeaderPayload::from_header(header) {
        Ok(payload) => {
            let payer = payload.payer().unwrap_or("unknown").to_string();
            let record = PaymentRecord::new(
                Uuid::new_v4().to_string(),
                task_id,
                payer,
                state.config.price.clone(),
                payload.network.clone(),
            );
            if let Err(err) = state.payments.put(&record).await {
                tracing::error!(task_id, error = %err, "payment record write failed");
            } else {
                tracing::info!(task_id, payment_id = %record.id, "payment recorded");
            }
        }
        Err(err) => {
            tracing::warn!(task_id, error = %err, "unparseable payment header ignored");
        }
    }
}

async fn message_send(state: &AppState, params: Value, headers: &HeaderMap) -> Result<Task> {
    let task = build_task(state, &params).await?;
    let mut events = state.events.subscribe(&task.id).await;
    state.tasks.submit(&task).await?;
    record_payment(state, &task.id, headers).await;
    tracing::info!(task_id = %task.id, skill = %task.skill, "task submitted");

    let wait = tokio::time::timeout(SEND_WAIT, async {
        loop {
            match events.recv().await {
                Ok(TaskEvent::TaskComplete { task, .. }) => return Some(task),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await;

    match wait {
        Ok(Some(task)) => Ok(task),
        // Timed out or the bus lagged: return the current snapshot
        _ => state.tasks.get_required(&task.id).await,
    }
}

async fn message_stream(
    state: &AppState,
    rpc_id: Value,
    params: Value,
    headers: &HeaderMap,
) -> Response {
    let task = match build_task(state, &params).await {
        Ok(task) => task,
        Err(err) => return respond::<Value>(rpc_id, Err(err)),
    };
    let events = state.events.subscribe(&task.id).await;
    if let Err(err) = state.tasks.submit(&task).await {
        return respond::<Value>(rpc_id, Err(err));
    }
    record_payment(state, &task.id, headers).await;
    tracing::info!(task_id = %task.id, skill = %task.skill, "task submitted (streaming)");
    stream_events(rpc_id, events)
}

async fn tasks_get(state: &AppState, params: Value) -> Result<Task> {
    // Look up by task id, or by context id when the caller only kept the
    // correlation handle
    let id = match param_str(&params, "id") {
        Ok(id) => id,
        Err(err) => match params.get("contextId").and_then(Value::as_str) {
            Some(context_id) => state
                .tasks
                .task_for_context(context_id)
                .await?
                .ok_or_else(|| {
                    ProofportError::not_found(format!("no task for context {}", context_id))
                })?,
            None => return Err(err),
        },
    };
    let task = state.tasks.get_required(&id).await?;
    match params.get("historyLength").and_then(Value::as_u64) {
        Some(n) => Ok(task.with_history_length(n as usize)),
        None => Ok(task),
    }
}

async fn tasks_cancel(state: &AppState, params: Value) -> Result<Task> {
    let id = param_str(&params, "id")?;
    let task = state
        .tasks
        .update_status(&id, TaskState::Canceled, Some("canceled by request".into()))
        .await?;
    state
        .events
        .status_update(&id, task.status.clone(), true)
        .await;
    state.events.task_complete(&id, task.clone()).await;
    Ok(task)
}

async fn tasks_resubscribe(state: &AppState, id: Value, params: Value) -> Response {
    let task_id = match param_str(&params, "id") {
        Ok(task_id) => task_id,
        Err(err) => return respond::<Value>(id, Err(err)),
    };
    let task = match state.tasks.get_required(&task_id).await {
        Ok(task) => task,
        Err(err) => return respond::<Value>(id, Err(err)),
    };
    if task.status.state.is_terminal() {
        return respond(id, Ok(task));
    }
    let events = state.events.subscribe(&task_id).await;
    stream_events(id, events)
}

/// Open an SSE stream of JSON-RPC envelopes over an event subscription
fn stream_events(
    rpc_id: Value,
    mut events: tokio::sync::broadcast::Receiver<TaskEvent>,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<std::result::Result<Event, std::convert::Infallible>>();

    // Initial keepalive comment so intermediaries commit to the stream
    let _ = tx.send(Ok(Event::default().comment("stream open")));

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let is_final = event.is_final();
                    let envelope = JsonRpcResponse::success(
                        rpc_id.clone(),
                        serde_json::to_value(&event).unwrap_or(Value::Null),
                    );
                    let frame = match serde_json::to_string(&envelope) {
                        Ok(json) => Event::default().data(json),
                        Err(_) => continue,
                    };
                    if tx.send(Ok(frame)).is_err() {
                        // Client went away; drop the subscription
                        break;
                    }
                    if is_final {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE))
        .into_response()
}

fn param_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProofportError::invalid_params(format!("params.{} is required", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RPC_INVALID_TRANSITION, RPC_NOT_FOUND};
    use serde_json::json;

    fn parse_response(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    async fn call(state: AppState, body: Value) -> Value {
        call_with_headers(state, body, HeaderMap::new()).await
    }

    async fn call_with_headers(state: AppState, body: Value, headers: HeaderMap) -> Value {
        let response = handle(State(state), headers, body.to_string()).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        parse_response(&bytes)
    }

    fn test_state() -> AppState {
        crate::adapters::tests::test_state()
    }

    #[tokio::test]
    async fn test_parse_error_envelope() {
        let response = handle(State(test_state()), HeaderMap::new(), "not json".to_string()).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope = parse_response(&bytes);
        assert_eq!(envelope["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let envelope = call(
            test_state(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/explode"}),
        )
        .await;
        assert_eq!(envelope["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tasks_get_not_found() {
        let envelope = call(
            test_state(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/get", "params": {"id": "ghost"}}),
        )
        .await;
        assert_eq!(envelope["error"]["code"], RPC_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_invalid_transition() {
        let state = test_state();
        // Drive a task to completed through the store
        let task = Task::new("t1", None, "get_supported_circuits", json!({}));
        state.tasks.put(&task).await.unwrap();
        state
            .tasks
            .update_status("t1", TaskState::Running, None)
            .await
            .unwrap();
        state
            .tasks
            .update_status("t1", TaskState::Completed, None)
            .await
            .unwrap();

        let envelope = call(
            state,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/cancel", "params": {"id": "t1"}}),
        )
        .await;
        assert_eq!(envelope["error"]["code"], RPC_INVALID_TRANSITION);
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .to_lowercase()
            .contains("invalid status transition"));
    }

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let state = test_state();
        let task = Task::new("t1", None, "get_supported_circuits", json!({}));
        state.tasks.submit(&task).await.unwrap();

        let envelope = call(
            state.clone(),
            json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/cancel", "params": {"id": "t1"}}),
        )
        .await;
        assert_eq!(envelope["result"]["status"]["state"], "canceled");
    }

    #[tokio::test]
    async fn test_message_send_runs_task_to_completion() {
        let state = test_state();
        // A worker must be draining the queue for send to unblock
        let worker = crate::worker::TaskWorker::new(
            state.tasks.clone(),
            state.core.clone(),
            state.events.clone(),
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        let envelope = call(
            state,
            json!({
                "jsonrpc": "2.0", "id": 7, "method": "message/send",
                "params": {
                    "message": {
                        "role": "user",
                        "messageId": "m1",
                        "parts": [
                            {"kind": "data", "data": {"skill": "get_supported_circuits"}}
                        ]
                    }
                }
            }),
        )
        .await;

        assert_eq!(envelope["id"], 7);
        assert_eq!(envelope["result"]["status"]["state"], "completed");
        assert_eq!(envelope["result"]["kind"], "task");
        // The artifact carries the circuits list
        let parts = envelope["result"]["artifacts"][0]["parts"].as_array().unwrap();
        assert!(parts[0]["data"]["circuits"].is_array());

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_message_send_without_data_part_and_no_llm() {
        let envelope = call(
            test_state(),
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "message/send",
                "params": {
                    "message": {
                        "role": "user",
                        "messageId": "m1",
                        "parts": [{"kind": "text", "text": "prove I am verified"}]
                    }
                }
            }),
        )
        .await;
        assert_eq!(envelope["error"]["code"], crate::error::RPC_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_payment_header_is_recorded() {
        let state = test_state();
        let worker = crate::worker::TaskWorker::new(
            state.tasks.clone(),
            state.core.clone(),
            state.events.clone(),
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        // CBOR payment payload with a nested payer
        let payload = crate::types::PaymentHeaderPayload {
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            proof: Some(crate::types::payment::PaymentProofField {
                from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".to_string(),
            }),
            from: None,
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-payment",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, buf)
                .parse()
                .unwrap(),
        );

        let envelope = call_with_headers(
            state.clone(),
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "message/send",
                "params": {
                    "message": {
                        "role": "user",
                        "messageId": "m1",
                        "parts": [{"kind": "data", "data": {"skill": "get_supported_circuits"}}]
                    }
                }
            }),
            headers,
        )
        .await;
        let task_id = envelope["result"]["id"].as_str().unwrap().to_string();

        let pending = state.payments.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task_id);
        assert_eq!(
            pending[0].payer_address,
            "0x857b06519E91e3A54538791bDbb0E22373e36b66"
        );

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_tasks_get_by_context_id() {
        let state = test_state();
        let task = Task::new("t1", Some("ctx-7".to_string()), "get_supported_circuits", json!({}));
        state.tasks.submit(&task).await.unwrap();

        let envelope = call(
            state,
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tasks/get",
                "params": {"contextId": "ctx-7"}
            }),
        )
        .await;
        assert_eq!(envelope["result"]["id"], "t1");
    }

    #[tokio::test]
    async fn test_garbage_payment_header_is_not_fatal() {
        let state = test_state();
        let task = Task::new("t1", None, "get_supported_circuits", json!({}));
        state.tasks.put(&task).await.unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-payment", "!!not-base64!!".parse().unwrap());
        record_payment(&state, "t1", &headers).await;
        assert!(state.payments.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_length_trim() {
        let state = test_state();
        let mut task = Task::new("t1", None, "get_supported_circuits", json!({}));
        for i in 0..5 {
            task.history.push(Message {
                role: "user".into(),
                parts: vec![Part::Text { text: format!("m{}", i) }],
                message_id: format!("m{}", i),
                task_id: None,
                context_id: None,
            });
        }
        state.tasks.put(&task).await.unwrap();

        let envelope = call(
            state,
            json!({
                "jsonrpc": "2.0", "id": 1, "method": "tasks/get",
                "params": {"id": "t1", "historyLength": 2}
            }),
        )
        .await;
        assert_eq!(envelope["result"]["history"].as_array().unwrap().len(), 2);
    }
}
