//! Client for the code-intelligence index, with a filesystem fallback
//! that builds a language-classified file inventory.

use crate::cancel::CancelToken;
use crate::errors::RpcError;
use crate::rpc::retry::{RetryPolicy, call_with_default};
use crate::rpc::transport::ToolTransport;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// File extensions mapped to language names for the fallback scanner.
const EXTENSION_LANGUAGES: [(&str, &str); 10] = [
    ("py", "python"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("go", "go"),
    ("cs", "csharp"),
    ("java", "java"),
    ("rs", "rust"),
    ("rb", "ruby"),
];

const SKIP_DIRS: [&str; 4] = ["node_modules", "__pycache__", ".venv", "venv"];

/// Client wrapper for the code-intelligence index.
pub struct CodeIntelClient {
    transport: Arc<dyn ToolTransport>,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl CodeIntelClient {
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

    pub async fn find_definition(&self, symbol: &str) -> Result<Value, RpcError> {
        self.call("find_definition", json!({"symbol": symbol}), json!({}))
            .await
    }

    pub async fn find_callers(&self, symbol: &str) -> Result<Value, RpcError> {
        self.call("find_callers", json!({"symbol": symbol}), json!([]))
            .await
    }

    pub async fn find_dependencies(&self, module: &str) -> Result<Value, RpcError> {
        self.call("find_dependencies", json!({"module": module}), json!([]))
            .await
    }

    pub async fn search_semantic(&self, query: &str) -> Result<Value, RpcError> {
        self.call("search_semantic", json!({"query": query}), json!([]))
            .await
    }

    pub async fn get_service_interface(&self, service_name: &str) -> Result<Value, RpcError> {
        self.call(
            "get_service_interface",
            json!({"service_name": service_name}),
            json!({}),
        )
        .await
    }

    pub async fn check_dead_code(&self, project_root: &str) -> Result<Value, RpcError> {
        self.call(
            "check_dead_code",
            json!({"project_root": project_root}),
            json!([]),
        )
        .await
    }

    pub async fn register_artifact(&self, artifact_path: &str, service_name: &str) -> Result<Value, RpcError> {
        self.call(
            "register_artifact",
            json!({"artifact_path": artifact_path, "service_name": service_name}),
            json!({}),
        )
        .await
    }

    /// Cross-service blast radius of a node, used by the fix-pass
    /// impact promoter. Returns the impacted-node count, or `None`
    /// when the index is unreachable (promotion is then skipped).
    pub async fn cross_service_impact(&self, node_id: &str, max_depth: u32) -> Option<u32> {
        let value = self
            .call(
                "find_cross_service_impact",
                json!({"node_id": node_id, "max_depth": max_depth}),
                Value::Null,
            )
            .await
            .ok()?;
        value
            .get("total_impacted_nodes")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
    }
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    EXTENSION_LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Build a basic codebase map by scanning the filesystem directly.
///
/// Walks `project_root`, skipping dot-directories and common vendor
/// directories, classifies files by extension into the known language
/// table, and returns the grouped inventory with a `fallback: true`
/// marker.
pub fn generate_codebase_map(project_root: &Path) -> Value {
    let mut files = Vec::new();
    let mut languages: BTreeSet<&'static str> = BTreeSet::new();

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
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let Some(language) = language_for_extension(ext) else {
                continue;
            };
            languages.insert(language);
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(json!({
                "file_path": entry.path().to_string_lossy(),
                "language": language,
                "size_bytes": size,
            }));
        }
    }

    json!({
        "project_root": project_root.to_string_lossy(),
        "files": files,
        "languages": languages.iter().collect::<Vec<_>>(),
        "total_files": files.len(),
        "fallback": true,
    })
}

/// Obtain a codebase map, trying the index first with filesystem
/// fallback. A live interface probe stands in for "the index is alive".
pub async fn codebase_map_with_fallback(
    project_root: &Path,
    client: Option<&CodeIntelClient>,
) -> Value {
    if let Some(client) = client {
        match client.get_service_interface("__healthcheck__").await {
            Ok(value) => {
                let alive = value
                    .as_object()
                    .map(|o| !o.is_empty() && !o.contains_key("error"))
                    .unwrap_or(false);
                if alive {
                    tracing::info!("code-intelligence index available, using service map");
                    let mut result = json!({
                        "project_root": project_root.to_string_lossy(),
                        "fallback": false,
                    });
                    if let (Some(dst), Some(src)) = (result.as_object_mut(), value.as_object()) {
                        for (k, v) in src {
                            dst.insert(k.clone(), v.clone());
                        }
                    }
                    return result;
                }
                tracing::warn!("code-intelligence index unreachable, scanning filesystem");
            }
            Err(e) => {
                tracing::warn!(error = %e, "code-intelligence probe failed, scanning filesystem");
            }
        }
    }
    tracing::info!("using filesystem codebase map");
    generate_codebase_map(project_root)
}
