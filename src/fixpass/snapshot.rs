//! Violation snapshots and regression detection.
//!
//! Pure functions over the normalised snapshot type; no I/O. A snapshot
//! maps each scan code to the file paths where violations were found,
//! preserving discovery order. Snapshots are taken before and after each
//! fix pass so the pass can be diffed for regressions.

use crate::pipeline::state::{Finding, Resolution};
use crate::quality::models::ScanViolation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Normalised view of violations at a moment in time.
///
/// Keys iterate in insertion order; values preserve discovery order and
/// may contain duplicates if the source did. Equality for regression
/// detection is set-based per `(scan_code, file_path)` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationSnapshot(pub IndexMap<String, Vec<String>>);

impl ViolationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat sequence of scan violations.
    ///
    /// Violations with an empty code are dropped.
    pub fn from_violations(violations: &[ScanViolation]) -> Self {
        let mut snapshot = Self::new();
        for v in violations {
            if !v.code.is_empty() {
                snapshot.record(&v.code, &v.file_path);
            }
        }
        snapshot
    }

    /// Build from `(scan_code, file_path)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut snapshot = Self::new();
        for (code, path) in pairs {
            let code = code.into();
            if !code.is_empty() {
                snapshot.record(&code, &path.into());
            }
        }
        snapshot
    }

    /// Build from an already-grouped mapping (passthrough).
    ///
    /// Taking a snapshot of a snapshot's inner map yields an equal
    /// snapshot, making the operation idempotent.
    pub fn from_grouped(grouped: IndexMap<String, Vec<String>>) -> Self {
        Self(grouped)
    }

    /// Build from open findings, keyed by their `system` with the
    /// finding id as the path slot.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut snapshot = Self::new();
        for f in findings {
            if f.resolution == Resolution::Open {
                snapshot.record(&f.system, &f.finding_id);
            }
        }
        snapshot
    }

    /// Append one observation, creating the scan-code bucket on demand.
    pub fn record(&mut self, scan_code: &str, file_path: &str) {
        self.0
            .entry(scan_code.to_string())
            .or_default()
            .push(file_path.to_string());
    }

    /// Total number of recorded paths across all scan codes.
    pub fn total_paths(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Number of distinct scan codes.
    pub fn code_count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_code(&self, scan_code: &str) -> bool {
        self.0.contains_key(scan_code)
    }
}

/// How a regressed violation relates to the before-snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionKind {
    /// The scan code did not appear in the before-snapshot at all.
    New,
    /// The scan code existed before, but this file path did not.
    Reappeared,
}

/// A `(scan_code, file_path)` pair present after a pass but absent before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub scan_code: String,
    pub file_path: String,
    pub kind: RegressionKind,
}

/// Compare snapshots and return every regressed violation.
///
/// Iteration follows the after-snapshot's input order, so the result is
/// deterministic for a given input.
pub fn detect_regressions(
    before: &ViolationSnapshot,
    after: &ViolationSnapshot,
) -> Vec<Regression> {
    let mut regressions = Vec::new();

    for (scan_code, after_paths) in &after.0 {
        let before_paths: std::collections::HashSet<&str> = before
            .0
            .get(scan_code)
            .map(|paths| paths.iter().map(String::as_str).collect())
            .unwrap_or_default();

        for file_path in after_paths {
            if !before_paths.contains(file_path.as_str()) {
                let kind = if before.contains_code(scan_code) {
                    RegressionKind::Reappeared
                } else {
                    RegressionKind::New
                };
                regressions.push(Regression {
                    scan_code: scan_code.clone(),
                    file_path: file_path.clone(),
                    kind,
                });
            }
        }
    }

    if regressions.is_empty() {
        tracing::debug!("no regressions detected");
    } else {
        tracing::warn!(count = regressions.len(), "regressions detected");
    }
    regressions
}
