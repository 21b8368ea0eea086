//! Effectiveness metrics computed after each fix pass.

use crate::fixpass::snapshot::Regression;
use crate::pipeline::state::{Finding, Resolution};
use serde::{Deserialize, Serialize};

/// Metrics describing what one fix pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixPassMetrics {
    pub fix_effectiveness: f64,
    pub regression_rate: f64,
    pub new_defect_discovery_rate: f64,
    pub score_delta: f64,
    pub fixed_count: u32,
    pub regression_count: u32,
    pub new_defect_count: u32,
    pub total_before: u32,
    pub total_after: u32,
}

fn count_open(findings: &[Finding]) -> u32 {
    findings
        .iter()
        .filter(|f| f.resolution == Resolution::Open)
        .count() as u32
}

/// Compute fix pass metrics from the before/after finding lists and the
/// regressions detected by the snapshot diff.
///
/// `fixed_count` backs out regressions so that a pass which fixed three
/// findings but reintroduced one still reports three fixes, and
/// `fix_effectiveness` is 0 when there was nothing open to fix.
pub fn compute_metrics(
    findings_before: &[Finding],
    findings_after: &[Finding],
    regressions: &[Regression],
    score_before: f64,
    score_after: f64,
) -> FixPassMetrics {
    let open_before = count_open(findings_before);
    let open_after = count_open(findings_after);

    let fixed_count =
        (open_before as i64 - open_after as i64 + regressions.len() as i64).max(0) as u32;
    let fix_effectiveness = if open_before > 0 {
        fixed_count as f64 / open_before as f64
    } else {
        0.0
    };

    let total_before = findings_before.len() as u32;
    let total_after = findings_after.len() as u32;

    let regression_rate = if total_after > 0 {
        regressions.len() as f64 / total_after as f64
    } else {
        0.0
    };

    let new_defect_count = total_after.saturating_sub(total_before);
    let new_defect_discovery_rate = if total_before > 0 {
        new_defect_count as f64 / total_before as f64
    } else {
        0.0
    };

    FixPassMetrics {
        fix_effectiveness,
        regression_rate,
        new_defect_discovery_rate,
        score_delta: score_after - score_before,
        fixed_count,
        regression_count: regressions.len() as u32,
        new_defect_count,
        total_before,
        total_after,
    }
}
