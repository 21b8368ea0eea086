//! Configuration loading and validation.
//!
//! Configuration lives in the `shipwright:` section of a YAML file.
//! Unknown keys are ignored for forward compatibility; path fields are
//! validated at load time so that misconfiguration is fatal before any
//! phase runs.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overall depth policy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Minimal passes, fast feedback.
    Quick,
    /// Default behaviour.
    #[default]
    Standard,
    /// Enables extra fix passes.
    Thorough,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".shipwright")
}

fn default_builder_cmd() -> String {
    "service-builder".to_string()
}

fn default_max_concurrent_builders() -> usize {
    3
}

fn default_builder_timeout_s() -> u64 {
    1800
}

fn default_max_fix_passes() -> u32 {
    5
}

fn default_fix_effectiveness_floor() -> f64 {
    0.30
}

fn default_regression_rate_ceiling() -> f64 {
    0.25
}

fn default_max_budget_usd() -> f64 {
    100.0
}

fn default_health_check_timeout_s() -> u64 {
    120
}

fn default_health_check_interval_s() -> f64 {
    3.0
}

fn default_mcp_startup_timeout_ms() -> u64 {
    30_000
}

fn default_mcp_tool_timeout_ms() -> u64 {
    60_000
}

fn default_mcp_first_start_timeout_ms() -> u64 {
    120_000
}

fn default_max_phase_retries() -> u32 {
    1
}

/// Runtime configuration for a single orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipwrightConfig {
    /// Run root where per-service output directories, state, and the
    /// audit report are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Path to the PRD document driving the run.
    #[serde(default)]
    pub prd_path: Option<PathBuf>,

    /// Existing project roots the fix-pass engine feeds fixes into.
    #[serde(default)]
    pub project_roots: Vec<PathBuf>,

    /// Command invoked as the opaque per-service builder subprocess.
    #[serde(default = "default_builder_cmd")]
    pub builder_cmd: String,

    // Builder settings
    #[serde(default = "default_max_concurrent_builders")]
    pub max_concurrent_builders: usize,
    #[serde(default = "default_builder_timeout_s")]
    pub builder_timeout_s: u64,

    // Fix pass limits
    #[serde(default = "default_max_fix_passes")]
    pub max_fix_passes: u32,
    #[serde(default = "default_fix_effectiveness_floor")]
    pub fix_effectiveness_floor: f64,
    #[serde(default = "default_regression_rate_ceiling")]
    pub regression_rate_ceiling: f64,

    // Budget
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,

    // Health polling
    #[serde(default = "default_health_check_timeout_s")]
    pub health_check_timeout_s: u64,
    #[serde(default = "default_health_check_interval_s")]
    pub health_check_interval_s: f64,

    // RPC budgets
    #[serde(default = "default_mcp_startup_timeout_ms")]
    pub mcp_startup_timeout_ms: u64,
    #[serde(default = "default_mcp_tool_timeout_ms")]
    pub mcp_tool_timeout_ms: u64,
    #[serde(default = "default_mcp_first_start_timeout_ms")]
    pub mcp_first_start_timeout_ms: u64,

    // Service endpoints (absent => filesystem fallbacks)
    #[serde(default)]
    pub architect_url: Option<String>,
    #[serde(default)]
    pub contracts_url: Option<String>,
    #[serde(default)]
    pub intel_url: Option<String>,

    /// Per-phase wall-clock limits in seconds, keyed by phase name.
    #[serde(default)]
    pub phase_timeouts: BTreeMap<String, u64>,

    /// Bounded retry-within-phase count for recoverable phase failures.
    #[serde(default = "default_max_phase_retries")]
    pub max_phase_retries: u32,

    /// Overall depth policy.
    #[serde(default)]
    pub depth: Depth,
}

impl Default for ShipwrightConfig {
    fn default() -> Self {
        // serde's field defaults are the single source of truth.
        serde_yaml::from_str("{}").expect("empty mapping deserialises to defaults")
    }
}

/// Outer shape of the config file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    shipwright: Option<ShipwrightConfig>,
}

impl ShipwrightConfig {
    /// Load configuration from the `shipwright:` section of a YAML file.
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        let file: ConfigFile = serde_yaml::from_str(&raw)?;
        let config = file.shipwright.ok_or_else(|| ConfigError::MissingSection {
            path: path.to_path_buf(),
        })?;
        config.validate()?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Validate field values and referenced paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for root in &self.project_roots {
            if !root.exists() {
                return Err(ConfigError::ProjectRootMissing { path: root.clone() });
            }
        }
        if self.max_concurrent_builders == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_builders".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.fix_effectiveness_floor) {
            return Err(ConfigError::InvalidValue {
                field: "fix_effectiveness_floor".into(),
                message: "must be within [0, 1]".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.regression_rate_ceiling) {
            return Err(ConfigError::InvalidValue {
                field: "regression_rate_ceiling".into(),
                message: "must be within [0, 1]".into(),
            });
        }
        if self.max_budget_usd <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_budget_usd".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Fix-pass bound after applying the depth policy.
    ///
    /// `thorough` runs grant two extra passes.
    pub fn effective_max_fix_passes(&self) -> u32 {
        match self.depth {
            Depth::Thorough => self.max_fix_passes + 2,
            _ => self.max_fix_passes,
        }
    }

    /// Per-builder wall clock as a `Duration`.
    pub fn builder_timeout(&self) -> Duration {
        Duration::from_secs(self.builder_timeout_s)
    }

    /// Per-tool RPC timeout as a `Duration`.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_tool_timeout_ms)
    }

    /// Health-poll interval as a `Duration`.
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_check_interval_s)
    }

    /// Wall-clock limit for a phase, if configured.
    pub fn phase_timeout(&self, phase: &str) -> Option<Duration> {
        self.phase_timeouts
            .get(phase)
            .map(|s| Duration::from_secs(*s))
    }

    /// Path of the persisted pipeline state file.
    pub fn state_path(&self) -> PathBuf {
        self.output_dir.join("pipeline_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = ShipwrightConfig::default();
        assert_eq!(config.max_concurrent_builders, 3);
        assert_eq!(config.builder_timeout_s, 1800);
        assert_eq!(config.max_fix_passes, 5);
        assert!((config.fix_effectiveness_floor - 0.30).abs() < f64::EPSILON);
        assert!((config.regression_rate_ceiling - 0.25).abs() < f64::EPSILON);
        assert!((config.max_budget_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.health_check_timeout_s, 120);
        assert!((config.health_check_interval_s - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.mcp_startup_timeout_ms, 30_000);
        assert_eq!(config.mcp_tool_timeout_ms, 60_000);
        assert_eq!(config.mcp_first_start_timeout_ms, 120_000);
        assert_eq!(config.depth, Depth::Standard);
    }

    #[test]
    fn from_yaml_reads_shipwright_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "shipwright:\n  max_fix_passes: 7\n  depth: thorough\n  builder_timeout_s: 60\n",
        )
        .unwrap();

        let config = ShipwrightConfig::from_yaml(&path).unwrap();
        assert_eq!(config.max_fix_passes, 7);
        assert_eq!(config.depth, Depth::Thorough);
        assert_eq!(config.builder_timeout_s, 60);
        // Untouched fields keep defaults
        assert_eq!(config.max_concurrent_builders, 3);
    }

    #[test]
    fn from_yaml_ignores_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "shipwright:\n  max_fix_passes: 2\n  some_future_option: true\n",
        )
        .unwrap();

        let config = ShipwrightConfig::from_yaml(&path).unwrap();
        assert_eq!(config.max_fix_passes, 2);
    }

    #[test]
    fn from_yaml_missing_section_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "other:\n  key: 1\n").unwrap();

        let err = ShipwrightConfig::from_yaml(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { .. }));
    }

    #[test]
    fn from_yaml_missing_file_fails() {
        let err = ShipwrightConfig::from_yaml(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn validate_rejects_missing_project_root() {
        let config = ShipwrightConfig {
            project_roots: vec![PathBuf::from("/nonexistent/project")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ProjectRootMissing { .. }));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = ShipwrightConfig {
            max_concurrent_builders: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_floor() {
        let config = ShipwrightConfig {
            fix_effectiveness_floor: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn thorough_depth_grants_extra_passes() {
        let mut config = ShipwrightConfig::default();
        assert_eq!(config.effective_max_fix_passes(), 5);
        config.depth = Depth::Thorough;
        assert_eq!(config.effective_max_fix_passes(), 7);
        config.depth = Depth::Quick;
        assert_eq!(config.effective_max_fix_passes(), 5);
    }

    #[test]
    fn phase_timeout_lookup() {
        let mut config = ShipwrightConfig::default();
        config.phase_timeouts.insert("integrate".into(), 600);
        assert_eq!(
            config.phase_timeout("integrate"),
            Some(Duration::from_secs(600))
        );
        assert_eq!(config.phase_timeout("decompose"), None);
    }
}
