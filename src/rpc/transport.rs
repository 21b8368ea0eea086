//! RPC transport abstraction.
//!
//! Every external analysis service exposes named tools; a transport
//! carries one tool call and classifies its outcome into the four-way
//! error taxonomy. Clients are constructed with an injected transport
//! (tests) or an HTTP transport opened against the service's base URL.

use crate::errors::RpcError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// A transport capable of dispatching one tool call.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call_tool(&self, tool: &str, params: Value) -> Result<Value, RpcError>;
}

/// HTTP JSON transport: `POST <base_url>/tools/<tool>` with the params
/// object as the body.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Open a transport with a per-call timeout. The underlying
    /// connection pool is reused across calls; re-entry on the same
    /// transport is permitted.
    pub fn new(base_url: &str, tool_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(tool_timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn call_tool(&self, tool: &str, params: Value) -> Result<Value, RpcError> {
        let url = format!("{}/tools/{}", self.base_url, tool);

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(RpcError::NoSuchTool {
                tool: tool.to_string(),
            });
        }
        // Server-side failures are treated as transport problems and
        // retried; well-formed application errors come back as 4xx with
        // an error payload.
        if status.is_server_error() {
            return Err(RpcError::Transport {
                tool: tool.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let body: Value = response.json().await.map_err(|e| RpcError::Malformed {
            tool: tool.to_string(),
            message: e.to_string(),
        })?;

        if status.is_client_error() {
            return Err(RpcError::Application {
                tool: tool.to_string(),
                payload: body,
            });
        }
        Ok(body)
    }
}
