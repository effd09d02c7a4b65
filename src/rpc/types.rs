// Copyright 2025 The Shahcoin Project
// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// JSON-RPC protocol version sent with every request.
pub const JSON_RPC_VERSION: &str = "2.0";

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Mainnet RPC port.
pub const DEFAULT_PORT: u16 = 8368;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROBE_METHOD: &str = "getblockchaininfo";

/// Where the node lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub use_tls: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            use_tls: false,
        }
    }
}

impl RpcConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.use_tls { "https" } else { "http" };
        Url::parse(&format!("{}://{}:{}/", scheme, self.host, self.port))
    }

    /// Basic-auth credentials, present only when both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// A partial [`RpcConfig`]; every `Some` field replaces the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcConfigUpdate {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
    pub use_tls: Option<bool>,
}

impl RpcConfigUpdate {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    /// Returns `config` with this update merged in.
    pub fn merged_into(&self, config: &RpcConfig) -> RpcConfig {
        let mut merged = config.clone();
        if let Some(host) = &self.host {
            merged.host = host.clone();
        }
        if let Some(port) = self.port {
            merged.port = port;
        }
        if let Some(username) = &self.username {
            merged.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            merged.password = Some(password.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            merged.timeout_ms = timeout_ms;
        }
        if let Some(use_tls) = self.use_tls {
            merged.use_tls = use_tls;
        }
        merged
    }
}

/// HTTP basic-auth pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Reconnection behaviour, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    /// Cheap idempotent method used to test reachability while reconnecting.
    pub probe_method: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            probe_method: DEFAULT_PROBE_METHOD.to_string(),
        }
    }
}

impl ClientSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Outgoing JSON-RPC 2.0 envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

/// Incoming JSON-RPC envelope.
///
/// `result` defaults to `null` when absent; `id` is mandatory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
