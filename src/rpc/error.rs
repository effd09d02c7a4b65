//! Error types for JSON-RPC client operations.
//!
//! This module defines the [`RpcError`] enum, the single failure type every
//! [`RpcClient::call`](crate::rpc::RpcClient::call) resolves to, and
//! [`ConfigError`] for failures while building or reconfiguring a client.

use serde_json::Value;
use thiserror::Error;

/// Code reported by [`RpcError::code`] when no HTTP status or node error code exists.
pub const TRANSPORT_SENTINEL_CODE: i64 = -1;

/// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Broad classification of a failed HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// The connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// The node answered with a non-2xx status and no JSON-RPC error body.
    Status,
    /// The node answered 2xx but the body was not JSON.
    MalformedBody,
    /// Any other failure raised by the HTTP stack.
    Other,
}

/// Failure raised by a [`Transport`](crate::rpc::Transport) implementation.
///
/// `body` holds the parsed JSON body of a non-2xx response when there was one,
/// so the client can still surface a node's JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub body: Option<Value>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            body: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            status: Some(status),
            message: message.into(),
            body,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn malformed_body(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::MalformedBody, message)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_decode() {
            TransportErrorKind::MalformedBody
        } else {
            TransportErrorKind::Other
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
            body: None,
        }
    }
}

/// Errors that can occur while performing a JSON-RPC call.
///
/// The three variants are disjoint: a call resolves to exactly one of them
/// or to a value. Branch on the variant (or on the `is_*` helpers) to tell
/// a node that rejected a request apart from a node that could not be reached.
///
/// # Example
///
/// ```rust,no_run
/// use shahcoin_rpc::rpc::{RpcClient, RpcError};
///
/// # async fn example(client: RpcClient) {
/// match client.get_block_count().await {
///     Ok(height) => println!("height {height}"),
///     Err(RpcError::Protocol { code, message, .. }) => eprintln!("node refused ({code}): {message}"),
///     Err(RpcError::Transport { status, message, .. }) => eprintln!("unreachable ({status:?}): {message}"),
///     Err(RpcError::Decode(reason)) => eprintln!("bad response: {reason}"),
/// }
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The node accepted the request and answered with a JSON-RPC `error` object.
    ///
    /// `code` and `message` are the node's, verbatim.
    #[error("RPC Error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The HTTP exchange itself failed.
    ///
    /// Covers connection refusal, DNS and TLS failures, timeouts, and non-2xx
    /// responses without a parseable JSON-RPC error body. `status` is the HTTP
    /// status when the node answered at all.
    #[error("Network Error: {message}")]
    Transport {
        kind: TransportErrorKind,
        status: Option<u16>,
        message: String,
    },

    /// The response did not match the JSON-RPC envelope, or its `result` could
    /// not be deserialized into the requested type. Not retryable.
    #[error("Decode Error: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        RpcError::Protocol {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        RpcError::Decode(reason.into())
    }

    /// The node's error code, the HTTP status, or [`TRANSPORT_SENTINEL_CODE`].
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Protocol { code, .. } => *code,
            RpcError::Transport { status, .. } => status.map(i64::from).unwrap_or(TRANSPORT_SENTINEL_CODE),
            RpcError::Decode(_) => TRANSPORT_SENTINEL_CODE,
        }
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, RpcError::Protocol { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, RpcError::Decode(_))
    }

    /// Whether this failure means the node could not be reached.
    ///
    /// Only these failures mark the client disconnected and arm reconnection.
    pub fn is_connectivity_failure(&self) -> bool {
        self.is_transport()
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::MalformedBody => RpcError::Decode(err.message),
            kind => RpcError::Transport {
                kind,
                status: err.status,
                message: err.message,
            },
        }
    }
}

/// Errors raised while building a client or applying a configuration update.
///
/// Reachability is never checked here; an unreachable but well-formed
/// address only fails on the next call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The host/port/scheme combination does not form a valid URL.
    #[error("Invalid node address: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client backend could not be initialized.
    #[error("HTTP client initialization failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}
