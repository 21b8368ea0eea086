//! Typed error hierarchy for the shipwright orchestrator.
//!
//! Five top-level enums cover the five subsystems:
//! - `ConfigError` — startup configuration validation failures
//! - `PipelineError` — state-machine and checkpointing failures
//! - `BuilderError` — per-builder dispatch failures
//! - `RpcError` — the four-way taxonomy of a single tool call
//! - `HealthError` — readiness polling failures

use thiserror::Error;

/// Errors detected while loading or validating configuration.
///
/// All of these are fatal at startup, before any phase runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: std::path::PathBuf },

    #[error("No 'shipwright:' section found in {path}")]
    MissingSection { path: std::path::PathBuf },

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Project root does not exist: {path}")]
    ProjectRootMissing { path: std::path::PathBuf },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors from the pipeline state machine.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("Phase {phase} timed out after {timeout_s}s")]
    PhaseTimeout { phase: String, timeout_s: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Budget exhausted: spent {spent:.2} of {ceiling:.2} USD")]
    BudgetExhausted { spent: f64, ceiling: f64 },

    #[error("Failed to write state file at {path}: {source}")]
    StateWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a single builder dispatch.
///
/// These never escape the scheduler slot that produced them; the
/// scheduler captures each into a failed `BuilderResult`.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("Failed to spawn builder process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Builder for {service_id} timed out after {timeout_s}s")]
    Timeout { service_id: String, timeout_s: u64 },

    #[error("Builder for {service_id} exited with code {exit_code}")]
    NonZeroExit { service_id: String, exit_code: i32 },

    #[error("Builder state file missing at {path}")]
    StateFileMissing { path: std::path::PathBuf },

    #[error("Builder state file unparseable at {path}: {message}")]
    StateFileInvalid {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Failed to prepare output directory {path}: {source}")]
    OutputDirFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Builder cancelled")]
    Cancelled,
}

/// The four outcomes of a single RPC tool call.
///
/// Only `Transport` is retriable. `Application` payloads are surfaced
/// as data by the retry wrapper; `Malformed` collapses to the safe
/// default; `NoSuchTool` always propagates to the caller.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error calling {tool}: {message}")]
    Transport { tool: String, message: String },

    #[error("Service returned error payload for {tool}")]
    Application {
        tool: String,
        payload: serde_json::Value,
    },

    #[error("Malformed response from {tool}: {message}")]
    Malformed { tool: String, message: String },

    #[error("No such tool: {tool}")]
    NoSuchTool { tool: String },
}

impl RpcError {
    /// Check whether this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Errors from the health poller.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Services not healthy after {waited_s}s: {}", unhealthy.join(", "))]
    Timeout { waited_s: u64, unhealthy: Vec<String> },

    #[error("Health polling cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_transport_error_is_transient() {
        let err = RpcError::Transport {
            tool: "decompose".into(),
            message: "connection refused".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn rpc_application_error_is_not_transient() {
        let err = RpcError::Application {
            tool: "decompose".into(),
            payload: serde_json::json!({"error": "bad prd"}),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn builder_timeout_carries_service_id() {
        let err = BuilderError::Timeout {
            service_id: "orders".into(),
            timeout_s: 1800,
        };
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("1800"));
    }

    #[test]
    fn health_timeout_names_unhealthy_endpoints() {
        let err = HealthError::Timeout {
            waited_s: 120,
            unhealthy: vec!["orders".into(), "billing".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("billing"));
    }

    #[test]
    fn pipeline_error_converts_from_config_error() {
        let inner = ConfigError::InvalidValue {
            field: "max_fix_passes".into(),
            message: "must be <= 20".into(),
        };
        let err: PipelineError = inner.into();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::Cancelled);
        assert_std_error(&BuilderError::Cancelled);
        assert_std_error(&RpcError::NoSuchTool { tool: "x".into() });
        assert_std_error(&HealthError::Cancelled);
    }
}
