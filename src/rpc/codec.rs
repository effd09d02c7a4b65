//! JSON-RPC 2.0 envelope encoding and response unwrapping.
//!
//! [`RequestCodec`] owns the request id counter. Ids are handed out with a
//! pre-increment starting at 1 and are never reused for the lifetime of the
//! codec, whatever the outcome of the call they were issued for.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::RpcError;
use super::types::{JSON_RPC_VERSION, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse};

#[derive(Debug, Default)]
pub struct RequestCodec {
    last_id: AtomicU64,
}

impl RequestCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `method`/`params` in an envelope carrying the next request id.
    pub fn encode(&self, method: impl Into<String>, params: Vec<Value>) -> JsonRpcRequest {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        JsonRpcRequest {
            jsonrpc: JSON_RPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// The most recently assigned id, or 0 before the first request.
    pub fn last_id(&self) -> u64 {
        self.last_id.load(Ordering::SeqCst)
    }

    /// Unwraps a response body for the request with id `request_id`.
    ///
    /// A non-null `error` wins over any `result`. A null error with a falsy
    /// result (`null`, `0`, `false`, `""`) is a success.
    pub fn decode<T: DeserializeOwned>(request_id: u64, body: Value) -> Result<T, RpcError> {
        let Some(object) = body.as_object() else {
            return Err(RpcError::decode("response is not a JSON object"));
        };
        if !object.contains_key("id") {
            return Err(RpcError::decode("response is missing id"));
        }

        let response: JsonRpcResponse =
            serde_json::from_value(body).map_err(|e| RpcError::decode(format!("malformed response envelope: {}", e)))?;

        if let Some(error) = response.error {
            return Err(protocol_error(error));
        }

        if !id_matches(request_id, &response.id) {
            return Err(RpcError::decode(format!(
                "response id {} does not match request id {}",
                response.id, request_id
            )));
        }

        serde_json::from_value(response.result).map_err(|e| RpcError::decode(format!("unexpected result shape: {}", e)))
    }

    /// Extracts a JSON-RPC error object from a non-2xx response body.
    ///
    /// Returns `None` when the body carries no well-formed, non-null `error`.
    pub fn protocol_error_in(body: &Value) -> Option<RpcError> {
        let error = body.get("error").filter(|e| !e.is_null())?;
        serde_json::from_value::<JsonRpcErrorObject>(error.clone())
            .ok()
            .map(protocol_error)
    }
}

fn protocol_error(error: JsonRpcErrorObject) -> RpcError {
    RpcError::Protocol {
        code: error.code,
        message: error.message,
        data: error.data,
    }
}

// Nodes echo the id back verbatim, some as a string.
fn id_matches(request_id: u64, response_id: &Value) -> bool {
    match response_id {
        Value::Number(n) => n.as_u64() == Some(request_id),
        Value::String(s) => s.parse::<u64>().ok() == Some(request_id),
        _ => false,
    }
}
