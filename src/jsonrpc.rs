//! JSON-RPC 2.0 envelopes
//!
//! Shared by the task adapter (`/a2a`) and the tool adapter (`/mcp`). SSE
//! frames carry complete response envelopes as their data payloads.

use crate::ProofportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Whether the envelope declares the supported protocol version
    pub fn is_valid(&self) -> bool {
        self.jsonrpc == "2.0" && !self.method.is_empty()
    }
}

/// A JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success response
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// An error response with attached data
    pub fn error_with_data(id: Value, code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }

    /// Map a service error into a response, carrying retry_after for rate
    /// limits
    pub fn from_service_error(id: Value, err: &ProofportError) -> Self {
        match err.retry_after() {
            Some(retry_after) => Self::error_with_data(
                id,
                err.rpc_code(),
                err.to_string(),
                serde_json::json!({ "retryAfter": retry_after }),
            ),
            None => Self::error(id, err.rpc_code(), err.to_string()),
        }
    }
}

/// JSON-RPC error code: malformed request envelope
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code: unknown method
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: parse failure
pub const PARSE_ERROR: i64 = -32700;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_validation() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tasks/get", "params": {"id": "t1"}
        }))
        .unwrap();
        assert!(req.is_valid());

        let bad: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "1.0", "id": 1, "method": "x"})).unwrap();
        assert!(!bad.is_valid());
    }

    #[test]
    fn test_error_envelope_shape() {
        let resp = JsonRpcResponse::error(json!(7), METHOD_NOT_FOUND, "no such method");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], 7);
        assert_eq!(v["error"]["code"], -32601);
        assert!(v.get("result").is_none());
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = ProofportError::RateLimited {
            retry_after_secs: 30,
        };
        let resp = JsonRpcResponse::from_service_error(json!(1), &err);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["error"]["data"]["retryAfter"], 30);
    }
}
