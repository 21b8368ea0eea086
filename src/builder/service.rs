//! Service descriptors produced by PRD decomposition.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Status of a service as it moves through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    #[default]
    Pending,
    Building,
    Built,
    Deploying,
    Healthy,
    Unhealthy,
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Built => "built",
            Self::Deploying => "deploying",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One service the pipeline must build.
///
/// Created by decomposition; `output_dir` is assigned exactly once by the
/// scheduler before dispatch and never reassigned afterwards. Descriptors
/// are retained for the report and never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub service_id: String,
    pub domain: String,
    #[serde(default)]
    pub stack: BTreeMap<String, String>,
    pub port: u16,
    pub health_endpoint: String,
    #[serde(default)]
    pub estimated_loc: u32,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl ServiceDescriptor {
    pub fn new(service_id: &str, domain: &str, port: u16) -> Self {
        Self {
            service_id: service_id.to_string(),
            domain: domain.to_string(),
            stack: BTreeMap::new(),
            port,
            health_endpoint: "/health".to_string(),
            estimated_loc: 0,
            output_dir: None,
            status: ServiceStatus::Pending,
        }
    }

    /// Assign the output directory. The first assignment wins; once set
    /// the path is immutable.
    pub fn assign_output_dir(&mut self, dir: PathBuf) {
        if self.output_dir.is_none() {
            self.output_dir = Some(dir);
        }
    }

    /// Full health-check URL on localhost.
    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.health_endpoint)
    }
}

/// Build descriptors from a decomposition service map payload.
///
/// Accepts both the service-map shape (`{"services": [...]}`) and a bare
/// service array. Unknown fields in each service entry are ignored;
/// missing fields fall back to defaults. Entries without a usable name
/// are dropped.
pub fn descriptors_from_service_map(payload: &Value) -> Vec<ServiceDescriptor> {
    let services = payload
        .get("services")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array());

    let Some(services) = services else {
        tracing::warn!("service map payload has no 'services' array");
        return Vec::new();
    };

    let mut descriptors = Vec::new();
    for (index, entry) in services.iter().enumerate() {
        let name = entry
            .get("name")
            .or_else(|| entry.get("service_id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if name.is_empty() {
            tracing::warn!(index, "dropping unnamed service entry");
            continue;
        }

        let mut descriptor = ServiceDescriptor::new(
            name,
            entry
                .get("domain")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            entry
                .get("port")
                .and_then(Value::as_u64)
                .map(|p| p as u16)
                .unwrap_or(8080 + index as u16),
        );
        if let Some(endpoint) = entry.get("health_endpoint").and_then(Value::as_str) {
            descriptor.health_endpoint = endpoint.to_string();
        }
        if let Some(loc) = entry.get("estimated_loc").and_then(Value::as_u64) {
            descriptor.estimated_loc = loc as u32;
        }
        if let Some(stack) = entry.get("stack").and_then(Value::as_object) {
            for (key, value) in stack {
                if let Some(v) = value.as_str() {
                    descriptor.stack.insert(key.clone(), v.to_string());
                }
            }
        }
        descriptors.push(descriptor);
    }
    descriptors
}
