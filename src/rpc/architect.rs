//! Client for the PRD decomposer service, with a heuristic fallback.

use crate::cancel::CancelToken;
use crate::errors::RpcError;
use crate::rpc::retry::{RetryPolicy, call_with_default};
use crate::rpc::transport::ToolTransport;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::Arc;

/// Client wrapper for the decomposer service.
///
/// Every method carries the uniform retry envelope and returns the
/// operation-appropriate safe default on exhausted retries.
pub struct ArchitectClient {
    transport: Arc<dyn ToolTransport>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl ArchitectClient {
    pub fn new(transport: Arc<dyn ToolTransport>, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    /// Decompose a PRD into services, domain model, and contract stubs.
    ///
    /// Safe default: `null`, letting callers distinguish "no answer"
    /// from an empty decomposition.
    pub async fn decompose(&self, prd_text: &str) -> Result<Value, RpcError> {
        call_with_default(
            self.transport.as_ref(),
            "decompose",
            json!({"prd_text": prd_text}),
            &self.policy,
            &self.cancel,
            Value::Null,
        )
        .await
    }

    /// Retrieve the most recent service map.
    pub async fn get_service_map(&self) -> Result<Value, RpcError> {
        call_with_default(
            self.transport.as_ref(),
            "get_service_map",
            json!({}),
            &self.policy,
            &self.cancel,
            json!({}),
        )
        .await
    }

    /// Contracts associated with one service.
    pub async fn get_contracts_for_service(&self, service_name: &str) -> Result<Value, RpcError> {
        call_with_default(
            self.transport.as_ref(),
            "get_contracts_for_service",
            json!({"service_name": service_name}),
            &self.policy,
            &self.cancel,
            json!([]),
        )
        .await
    }

    /// Retrieve the most recent domain model.
    pub async fn get_domain_model(&self) -> Result<Value, RpcError> {
        call_with_default(
            self.transport.as_ref(),
            "get_domain_model",
            json!({}),
            &self.policy,
            &self.cancel,
            json!({}),
        )
        .await
    }
}

/// Heuristic PRD decomposition used when the decomposer is unreachable.
///
/// Extracts the first non-empty line as the project name, sanitises it
/// to a slug, and returns a one-service skeleton with an empty domain
/// model and a `fallback: true` marker.
pub fn decompose_prd_basic(prd_text: &str) -> Value {
    let project_name = prd_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown-project");
    let project_name: String = project_name.chars().take(80).collect();

    let slug_re = Regex::new(r"[^a-z0-9]+").expect("static regex");
    let slug = slug_re
        .replace_all(&project_name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    let slug = if slug.is_empty() {
        "service".to_string()
    } else {
        slug
    };

    json!({
        "services": [
            {
                "name": slug,
                "description": format!("Auto-generated stub from PRD ({} chars)", prd_text.len()),
                "endpoints": [],
            }
        ],
        "domain_model": {"entities": [], "relationships": []},
        "contract_stubs": [],
        "fallback": true,
    })
}

/// Decompose a PRD, trying the service first with heuristic fallback.
///
/// The fallback is used when no client is supplied, when the primary
/// call collapses to its safe default, or when the payload carries an
/// error. Successful primary responses are annotated `fallback: false`.
pub async fn decompose_with_fallback(prd_text: &str, client: Option<&ArchitectClient>) -> Value {
    if let Some(client) = client {
        match client.decompose(prd_text).await {
            Ok(Value::Null) => {
                tracing::warn!("decomposer unreachable, using heuristic fallback");
            }
            Ok(mut value) => {
                if value.get("error").is_none() {
                    tracing::info!("decomposer available, using service decomposition");
                    value["fallback"] = json!(false);
                    return value;
                }
                tracing::warn!("decomposer returned an error payload, using heuristic fallback");
            }
            Err(e) => {
                tracing::warn!(error = %e, "decomposer call failed, using heuristic fallback");
            }
        }
    }
    tracing::info!("using heuristic PRD decomposition");
    decompose_prd_basic(prd_text)
}
