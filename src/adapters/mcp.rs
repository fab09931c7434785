//! Tool JSON-RPC adapter (`/mcp`)
//!
//! Stateless: one transport per request. Registers six tools, one per
//! skill. A tool call returns two text chunks: a one-sentence guidance
//! line derived from the outcome, then the raw JSON result. Clients are
//! expected to send an `Accept` header naming both `application/json` and
//! `text/event-stream`; the handler normalizes the header when clients
//! forget rather than rejecting them.

use super::AppState;
use crate::jsonrpc::{
    JsonRpcRequest, JsonRpcResponse, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::llm::SkillRouter;
use crate::outcome::outcome_for;
use crate::skills::Skill;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::str::FromStr;

/// Protocol revision answered to initialize
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// The `/mcp` endpoint
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    normalize_accept(&headers);

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(_) => {
            return Json(JsonRpcResponse::error(Value::Null, PARSE_ERROR, "parse error"))
                .into_response()
        }
    };
    // Notifications carry no id and expect no body
    if request.method.starts_with("notifications/") {
        return StatusCode::ACCEPTED.into_response();
    }
    if !request.is_valid() {
        return Json(JsonRpcResponse::error(
            request.id,
            INVALID_REQUEST,
            "malformed JSON-RPC request",
        ))
        .into_response();
    }

    let id = request.id.clone();
    let envelope = match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "proofport",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_list() })),
        "tools/call" => tools_call(&state, id, request.params).await,
        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method {}", other),
        ),
    };
    Json(envelope).into_response()
}

/// Log clients that forgot the dual Accept header; the response is JSON
/// either way
fn normalize_accept(headers: &HeaderMap) {
    let accept = headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.contains("application/json") || !accept.contains("text/event-stream") {
        tracing::debug!(accept, "rewriting Accept to include json and event-stream");
    }
}

fn tool_list() -> Vec<Value> {
    SkillRouter::tool_defs()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.function.name,
                "description": tool.function.description,
                "inputSchema": tool.function.parameters,
            })
        })
        .collect()
}

async fn tools_call(state: &AppState, id: Value, params: Value) -> JsonRpcResponse {
    let name = match params.get("name").and_then(Value::as_str) {
        Some(name) => name,
        None => {
            return JsonRpcResponse::error(
                id,
                crate::error::RPC_INVALID_PARAMS,
                "params.name is required",
            )
        }
    };
    let skill = match Skill::from_str(name) {
        Ok(skill) => skill,
        Err(err) => return JsonRpcResponse::from_service_error(id, &err),
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match state.core.dispatch(skill, arguments).await {
        Ok(result) => {
            let outcome = outcome_for(skill, &result);
            JsonRpcResponse::success(
                id,
                json!({
                    "content": [
                        { "type": "text", "text": outcome.guidance },
                        { "type": "text", "text": result.to_string() },
                    ],
                    "isError": false,
                }),
            )
        }
        Err(err) => JsonRpcResponse::success(
            id,
            json!({
                "content": [ { "type": "text", "text": err.to_string() } ],
                "isError": true,
            }),
        ),
    }
}
