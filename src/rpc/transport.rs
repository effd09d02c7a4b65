// Copyright 2025 The Shahcoin Project
// SPDX-License-Identifier: BSD-3-Clause

use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use url::Url;

use super::error::TransportError;
use super::types::{Credentials, RpcConfig};

const USER_AGENT: &str = concat!("shahcoin-rpc/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Everything a transport needs to reach the node for one request.
///
/// The client swaps whole endpoints on reconfiguration, so address and
/// credentials are always read as a consistent pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: Url,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            credentials: None,
            timeout: Duration::from_millis(super::types::DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn from_config(config: &RpcConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: config.base_url()?,
            credentials: config.credentials(),
            timeout: config.timeout(),
        })
    }
}

/// Delivers one JSON-RPC envelope and returns the parsed response body.
///
/// Implementations must bound every call by `endpoint.timeout` and report a
/// non-2xx answer as [`TransportError`] with its status, attaching the body
/// when it parsed as JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, TransportError>;
}

/// [`Transport`] over HTTP POST using a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, TransportError> {
        let mut req = self
            .client
            .post(endpoint.url.clone())
            .timeout(endpoint.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(body);
        if let Some(creds) = &endpoint.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        trace!(status = status.as_u16(), bytes = text.len(); "HTTP: response received");

        if !status.is_success() {
            let parsed = serde_json::from_str::<Value>(&text).ok();
            let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            let message = if snippet.is_empty() {
                format!("HTTP {}", status)
            } else {
                format!("HTTP {}: {}", status, snippet)
            };
            return Err(TransportError::status(status.as_u16(), message, parsed));
        }

        serde_json::from_str(&text).map_err(|e| TransportError::malformed_body(format!("response is not JSON: {}", e)))
    }
}
