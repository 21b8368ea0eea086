//! Builder results and state-file parsing.
//!
//! Each builder subprocess emits a state file at
//! `<output_dir>/.builder/STATE.json`; the scheduler reads its
//! `summary.success` and top-level `total_cost` fields. A missing or
//! unparseable file yields a failed result with a diagnostic error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative path of the builder-emitted state file inside an output dir.
pub const BUILDER_STATE_FILE: &str = ".builder/STATE.json";

/// Extensions counted as generated source artifacts.
const SOURCE_EXTENSIONS: [&str; 10] = [
    "py", "ts", "tsx", "js", "jsx", "go", "cs", "java", "rs", "rb",
];

/// Result of one builder invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderResult {
    pub system_id: String,
    pub service_id: String,
    pub success: bool,
    pub cost: f64,
    /// Empty iff `success` is true.
    #[serde(default)]
    pub error: String,
    pub output_dir: PathBuf,
    pub test_passed: u32,
    pub test_total: u32,
    pub convergence_ratio: f64,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
}

impl BuilderResult {
    /// A failed result with a diagnostic error message.
    pub fn failed(service_id: &str, output_dir: &Path, error: impl Into<String>) -> Self {
        Self {
            service_id: service_id.to_string(),
            output_dir: output_dir.to_path_buf(),
            success: false,
            error: error.into(),
            ..Default::default()
        }
    }
}

/// Wire shape of the builder-emitted state file.
#[derive(Debug, Deserialize)]
struct BuilderStateFile {
    #[serde(default)]
    system_id: String,
    #[serde(default)]
    total_cost: f64,
    #[serde(default)]
    summary: BuilderSummary,
}

#[derive(Debug, Default, Deserialize)]
struct BuilderSummary {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    test_passed: u32,
    #[serde(default)]
    test_total: u32,
    #[serde(default)]
    convergence_ratio: f64,
}

/// Collect generated source artifacts under an output directory.
///
/// Dot-directories (including `.builder`) are skipped so the builder's
/// own bookkeeping never counts as generated output.
pub fn collect_artifacts(output_dir: &Path) -> Vec<PathBuf> {
    let mut artifacts = Vec::new();
    for entry in WalkDir::new(output_dir)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(false)
        })
        .filter_map(Result::ok)
    {
        if entry.file_type().is_file() {
            let is_source = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if is_source {
                artifacts.push(entry.path().to_path_buf());
            }
        }
    }
    artifacts.sort();
    artifacts
}

/// Parse a builder's state file into a `BuilderResult`.
///
/// A builder succeeds iff the state file declares success AND the output
/// directory contains at least one generated source artifact. Artifacts
/// outside the service's own output directory would indicate
/// cross-contamination; `collect_artifacts` only walks the directory
/// itself, so every listed artifact is prefixed by it by construction,
/// and the scheduler re-verifies the prefix at collection time.
pub fn parse_builder_result(service_id: &str, output_dir: &Path) -> BuilderResult {
    let state_path = output_dir.join(BUILDER_STATE_FILE);

    let raw = match std::fs::read_to_string(&state_path) {
        Ok(raw) => raw,
        Err(_) => {
            tracing::warn!(service = service_id, path = %state_path.display(), "builder state file missing");
            return BuilderResult::failed(
                service_id,
                output_dir,
                format!("builder state file missing at {}", state_path.display()),
            );
        }
    };

    let state: BuilderStateFile = match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(service = service_id, error = %e, "builder state file unparseable");
            return BuilderResult::failed(
                service_id,
                output_dir,
                format!("builder state file unparseable: {}", e),
            );
        }
    };

    let artifacts = collect_artifacts(output_dir);
    let declared_success = state.summary.success;
    let has_artifacts = !artifacts.is_empty();
    let success = declared_success && has_artifacts;

    let error = if success {
        String::new()
    } else if !declared_success {
        "builder declared failure".to_string()
    } else {
        "builder declared success but produced no source artifacts".to_string()
    };

    BuilderResult {
        system_id: state.system_id,
        service_id: service_id.to_string(),
        success,
        cost: state.total_cost.max(0.0),
        error,
        output_dir: output_dir.to_path_buf(),
        test_passed: state.summary.test_passed.min(state.summary.test_total),
        test_total: state.summary.test_total,
        convergence_ratio: state.summary.convergence_ratio.clamp(0.0, 1.0),
        artifacts,
    }
}
