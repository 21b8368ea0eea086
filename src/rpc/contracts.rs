//! Client for the contract registry service, with a filesystem fallback
//! that scans common contract directories for JSON/YAML specs.

use crate::cancel::CancelToken;
use crate::errors::RpcError;
use crate::rpc::retry::{RetryPolicy, call_with_default};
use crate::rpc::transport::ToolTransport;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Directory names searched by the filesystem fallback.
const CONTRACT_DIRS: [&str; 5] = ["contracts", "specs", "api", "openapi", "asyncapi"];

/// Directories the fallback scanner never descends into.
const SKIP_DIRS: [&str; 4] = ["node_modules", "__pycache__", ".venv", "venv"];

/// Client wrapper for the contract registry.
pub struct ContractRegistryClient {
    transport: Arc<dyn ToolTransport>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl ContractRegistryClient {
    pub fn new(transport: Arc<dyn ToolTransport>, policy: RetryPolicy, cancel: CancelToken) -> Self {
        Self {
            transport,
            policy,
            cancel,
        }
    }

    async fn call(&self, tool: &str, params: Value, default: Value) -> Result<Value, RpcError> {
        call_with_default(
            self.transport.as_ref(),
            tool,
            params,
            &self.policy,
            &self.cancel,
            default,
        )
        .await
    }

    pub async fn create_contract(&self, spec: &Value, contract_type: &str) -> Result<Value, RpcError> {
        self.call(
            "create_contract",
            json!({"spec": spec, "type": contract_type}),
            json!({}),
        )
        .await
    }

    pub async fn validate_spec(&self, spec: &Value, contract_type: &str) -> Result<Value, RpcError> {
        self.call(
            "validate_spec",
            json!({"spec": spec, "type": contract_type}),
            json!({}),
        )
        .await
    }

    pub async fn list_contracts(&self) -> Result<Value, RpcError> {
        self.call("list_contracts", json!({}), json!([])).await
    }

    pub async fn get_contract(&self, contract_id: &str) -> Result<Value, RpcError> {
        self.call(
            "get_contract",
            json!({"contract_id": contract_id}),
            json!({}),
        )
        .await
    }

    pub async fn validate_endpoint(
        &self,
        contract_id: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Value, RpcError> {
        self.call(
            "validate_endpoint",
            json!({"contract_id": contract_id, "endpoint": endpoint, "payload": payload}),
            json!({}),
        )
        .await
    }

    pub async fn generate_tests(&self, contract_id: &str) -> Result<Value, RpcError> {
        self.call(
            "generate_tests",
            json!({"contract_id": contract_id}),
            json!([]),
        )
        .await
    }

    pub async fn check_breaking_changes(
        &self,
        contract_id: &str,
        new_spec: &Value,
    ) -> Result<Value, RpcError> {
        self.call(
            "check_breaking_changes",
            json!({"contract_id": contract_id, "new_spec": new_spec}),
            json!({}),
        )
        .await
    }

    pub async fn mark_implemented(
        &self,
        contract_id: &str,
        service_name: &str,
    ) -> Result<Value, RpcError> {
        self.call(
            "mark_implemented",
            json!({"contract_id": contract_id, "service_name": service_name}),
            json!({}),
        )
        .await
    }

    pub async fn get_unimplemented_contracts(&self) -> Result<Value, RpcError> {
        self.call("get_unimplemented_contracts", json!({}), json!([]))
            .await
    }
}

/// Scan the filesystem for API contract files.
///
/// Walks `project_root` collecting JSON/YAML files that live under a
/// recognised contract directory or at the root itself, parsing JSON
/// specs where possible. Dot-directories and common vendor directories
/// are skipped. The result carries a `fallback: true` marker.
pub fn scan_contract_files(project_root: &Path) -> Value {
    let mut contracts = Vec::new();

    if project_root.is_dir() {
        let walker = WalkDir::new(project_root).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()))
        });

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            if !matches!(ext.as_str(), "json" | "yaml" | "yml") {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(project_root)
                .unwrap_or(entry.path());
            let in_contract_dir = relative
                .parent()
                .map(|parent| {
                    parent.components().any(|c| {
                        CONTRACT_DIRS.contains(&c.as_os_str().to_string_lossy().to_lowercase().as_str())
                    })
                })
                .unwrap_or(false);
            let at_root = relative.parent().map(|p| p.as_os_str().is_empty()).unwrap_or(true);
            if !in_contract_dir && !at_root {
                continue;
            }

            let spec = if ext == "json" {
                std::fs::read_to_string(entry.path())
                    .ok()
                    .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                    .unwrap_or(json!({}))
            } else {
                json!({})
            };
            let valid = spec.as_object().map(|o| !o.is_empty()).unwrap_or(false)
                || spec.as_array().map(|a| !a.is_empty()).unwrap_or(false);

            contracts.push(json!({
                "file_path": entry.path().to_string_lossy(),
                "relative_path": relative.to_string_lossy(),
                "extension": format!(".{}", ext),
                "spec": spec,
                "valid": valid,
            }));
        }
    }

    json!({
        "project_root": project_root.to_string_lossy(),
        "total_contracts": contracts.len(),
        "contracts": contracts,
        "fallback": true,
    })
}

/// List contracts, trying the registry first with filesystem fallback.
pub async fn contracts_with_fallback(
    project_root: &Path,
    client: Option<&ContractRegistryClient>,
) -> Value {
    if let Some(client) = client {
        match client.list_contracts().await {
            Ok(value) => {
                let empty_default = value == json!([]);
                let has_error = value.get("error").is_some();
                if !empty_default && !has_error {
                    tracing::info!("contract registry available, using service contract data");
                    return json!({
                        "project_root": project_root.to_string_lossy(),
                        "contracts": value,
                        "fallback": false,
                    });
                }
                tracing::warn!("contract registry unreachable or errored, scanning filesystem");
            }
            Err(e) => {
                tracing::warn!(error = %e, "contract listing failed, scanning filesystem");
            }
        }
    }
    tracing::info!("using filesystem contract scan");
    scan_contract_files(project_root)
}
