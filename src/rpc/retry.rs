//! Uniform retry envelope around tool calls.
//!
//! Transport errors retry with exponential backoff; application errors
//! are surfaced as data; malformed responses collapse to the safe
//! default; a nonexistent tool always propagates.

use crate::cancel::{CancelToken, sleep_cancellable};
use crate::errors::RpcError;
use crate::rpc::transport::ToolTransport;
use serde_json::Value;
use std::time::Duration;

/// Retry parameters shared by every client in a run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }
}

/// Call a tool, retrying transient failures up to the policy limit.
///
/// Non-transient errors return immediately.
pub async fn call_with_retry(
    transport: &dyn ToolTransport,
    tool: &str,
    params: Value,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Value, RpcError> {
    let mut last_err: Option<RpcError> = None;

    for attempt in 0..=policy.max_retries {
        match transport.call_tool(tool, params.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt < policy.max_retries {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        tool,
                        attempt = attempt + 1,
                        delay_s = delay.as_secs_f64(),
                        error = %e,
                        "transient RPC failure, retrying"
                    );
                    if !sleep_cancellable(delay, cancel).await {
                        return Err(e);
                    }
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(RpcError::Transport {
        tool: tool.to_string(),
        message: "retries exhausted".to_string(),
    }))
}

/// Call a tool and fold failures into the operation's safe default.
///
/// - Success: the payload.
/// - Application error: the error payload, surfaced as data.
/// - Exhausted transport retries or malformed response: the default,
///   with the failure logged.
/// - Nonexistent tool: propagated.
pub async fn call_with_default(
    transport: &dyn ToolTransport,
    tool: &str,
    params: Value,
    policy: &RetryPolicy,
    cancel: &CancelToken,
    default: Value,
) -> Result<Value, RpcError> {
    match call_with_retry(transport, tool, params, policy, cancel).await {
        Ok(value) => Ok(value),
        Err(RpcError::Application { payload, .. }) => Ok(payload),
        Err(e @ RpcError::NoSuchTool { .. }) => Err(e),
        Err(e) => {
            tracing::error!(tool, error = %e, "tool call failed, returning safe default");
            Ok(default)
        }
    }
}
