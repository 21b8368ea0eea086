//! Pipeline state persistence with atomic writes.
//!
//! `PipelineState` is the single persisted run record. It is owned by
//! the pipeline runner; every other component receives a view plus a
//! narrow mutation interface (append a finding, record a phase cost).
//! Saves go through a temp-sibling + fsync + rename sequence so crash
//! recovery observes either the old or the new state, never a torn file.

use crate::builder::result::BuilderResult;
use crate::fixpass::engine::FixPassResult;
use crate::health::EndpointHealth;
use crate::pipeline::phase::Phase;
use crate::scoring::TrafficLight;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// Current schema version of the persisted state file.
pub const SCHEMA_VERSION: u32 = 1;

/// Defect priority, P0 most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        write!(f, "{}", s)
    }
}

/// Resolution state of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    #[default]
    Open,
    Fixed,
    WontFix,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Fixed => "FIXED",
            Self::WontFix => "WONTFIX",
        };
        write!(f, "{}", s)
    }
}

/// A single defect observation.
///
/// Findings follow the `FINDING-NNN` naming convention and track
/// resolution through fix passes. They are created by scanners, mutated
/// only by the fix-pass engine, and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub finding_id: String,
    /// `None` until the classifier has assigned a priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Which system the defect was observed against.
    #[serde(default)]
    pub system: String,
    /// Specific module or function.
    #[serde(default)]
    pub component: String,
    /// Exact reproduction or test output.
    #[serde(default)]
    pub evidence: String,
    /// Specific fix action.
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub resolution: Resolution,
    /// Which pass fixed it; 0 while unfixed.
    #[serde(default)]
    pub fix_pass_number: u32,
    /// Test identifier confirming the fix.
    #[serde(default)]
    pub fix_verification: String,
    pub created_at: DateTime<Utc>,
}

impl Default for Finding {
    fn default() -> Self {
        Self {
            finding_id: String::new(),
            priority: None,
            system: String::new(),
            component: String::new(),
            evidence: String::new(),
            recommendation: String::new(),
            resolution: Resolution::Open,
            fix_pass_number: 0,
            fix_verification: String::new(),
            created_at: Utc::now(),
        }
    }
}

impl Finding {
    pub fn is_open(&self) -> bool {
        self.resolution == Resolution::Open
    }

    pub fn has_priority(&self, priority: Priority) -> bool {
        self.priority == Some(priority)
    }
}

/// Full state of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub schema_version: u32,
    pub run_id: String,
    pub current_phase: Phase,
    pub completed_phases: Vec<Phase>,

    #[serde(default)]
    pub mcp_health: BTreeMap<String, EndpointHealth>,
    #[serde(default)]
    pub builder_results: BTreeMap<String, BuilderResult>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub fix_passes: Vec<FixPassResult>,

    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub aggregate_score: f64,
    #[serde(default)]
    pub traffic_light: TrafficLight,

    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub phase_costs: BTreeMap<String, f64>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// Create a fresh run record.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: uuid::Uuid::new_v4().to_string()[..12].to_string(),
            current_phase: Phase::Init,
            completed_phases: Vec::new(),
            mcp_health: BTreeMap::new(),
            builder_results: BTreeMap::new(),
            findings: Vec::new(),
            fix_passes: Vec::new(),
            scores: BTreeMap::new(),
            aggregate_score: 0.0,
            traffic_light: TrafficLight::Red,
            total_cost: 0.0,
            phase_costs: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    // ------------------------------------------------------------------
    // Finding management
    // ------------------------------------------------------------------

    /// Generate the next `FINDING-NNN` identifier.
    pub fn next_finding_id(&self) -> String {
        let max_num = self
            .findings
            .iter()
            .filter_map(|f| f.finding_id.strip_prefix("FINDING-"))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("FINDING-{:03}", max_num + 1)
    }

    /// Append a finding, assigning an id if it has none.
    pub fn add_finding(&mut self, mut finding: Finding) {
        if finding.finding_id.is_empty() {
            finding.finding_id = self.next_finding_id();
        }
        tracing::info!(
            id = %finding.finding_id,
            priority = ?finding.priority,
            "finding recorded"
        );
        self.findings.push(finding);
    }

    /// Open findings, in discovery order.
    pub fn open_findings(&self) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.is_open()).collect()
    }

    /// Count open findings at the given priority.
    pub fn count_open(&self, priority: Priority) -> u32 {
        self.findings
            .iter()
            .filter(|f| f.is_open() && f.has_priority(priority))
            .count() as u32
    }

    // ------------------------------------------------------------------
    // Cost accounting
    // ------------------------------------------------------------------

    /// Record cost against a phase, keeping `total_cost` equal to the
    /// sum of `phase_costs`.
    pub fn record_phase_cost(&mut self, phase: &str, delta: f64) {
        if delta <= 0.0 {
            return;
        }
        *self.phase_costs.entry(phase.to_string()).or_insert(0.0) += delta;
        self.total_cost = self.phase_costs.values().sum();
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist state atomically: write a temp sibling, fsync, rename.
    pub fn save(&mut self, path: &Path) -> std::io::Result<()> {
        self.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("pipeline_state.json");
        let tmp_path = path.with_file_name(format!("{}.tmp", file_name));

        let data = serde_json::to_vec_pretty(self)?;
        let result = (|| {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        } else {
            tracing::debug!(path = %path.display(), "state saved");
        }
        result
    }

    /// Load state from disk.
    ///
    /// Returns `None` for missing files, corrupted JSON, or an
    /// incompatible schema version. Unknown forward-compatible fields
    /// are ignored by the decoder.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "state file not found");
            return None;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read state file");
                return None;
            }
        };
        let state: PipelineState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse state file");
                return None;
            }
        };
        if state.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                found = state.schema_version,
                expected = SCHEMA_VERSION,
                "incompatible state schema version"
            );
            return None;
        }
        tracing::debug!(run_id = %state.run_id, "state loaded");
        Some(state)
    }
}
