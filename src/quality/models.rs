//! Shared data models for the layered quality gate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Quality gate layer identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLayer {
    /// Per-service checks (unit tests, lint, artifact presence).
    Layer1Service,
    /// Contract compliance checks.
    Layer2Contract,
    /// System-level scans (security, logging, health, secrets).
    Layer3System,
    /// Adversarial probes.
    Layer4Adversarial,
}

impl QualityLayer {
    /// All layers in execution order.
    pub const ALL: [QualityLayer; 4] = [
        QualityLayer::Layer1Service,
        QualityLayer::Layer2Contract,
        QualityLayer::Layer3System,
        QualityLayer::Layer4Adversarial,
    ];

    /// Human-readable label for report rendering.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Layer1Service => "Layer 1 — Service",
            Self::Layer2Contract => "Layer 2 — Contract",
            Self::Layer3System => "Layer 3 — System",
            Self::Layer4Adversarial => "Layer 4 — Adversarial",
        }
    }
}

impl fmt::Display for QualityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Verdict from a quality gate layer or the overall gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    Passed,
    Failed,
    Partial,
    #[default]
    Skipped,
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Partial => "PARTIAL",
            Self::Skipped => "SKIPPED",
        };
        write!(f, "{}", s)
    }
}

/// A violation found during quality gate scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanViolation {
    /// Scan code, e.g. `SEC-001`.
    pub code: String,
    /// Severity label: `error`, `warning`, `info`, ...
    pub severity: String,
    /// Category label: `security`, `test`, `style`, ...
    pub category: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub message: String,
}

impl ScanViolation {
    pub fn new(code: &str, severity: &str, category: &str, file_path: &str) -> Self {
        Self {
            code: code.to_string(),
            severity: severity.to_string(),
            category: category.to_string(),
            file_path: file_path.to_string(),
            ..Default::default()
        }
    }

    /// Check whether this violation blocks the gate at the given severity.
    pub fn is_blocking(&self, blocking_severity: &str) -> bool {
        self.severity.eq_ignore_ascii_case(blocking_severity)
    }
}

/// A violation found during contract compliance verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContractViolation {
    pub code: String,
    pub severity: String,
    pub service: String,
    pub endpoint: String,
    pub message: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
    #[serde(default)]
    pub file_path: String,
}

/// Result from a single quality gate layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: QualityLayer,
    pub verdict: GateVerdict,
    #[serde(default)]
    pub violations: Vec<ScanViolation>,
    #[serde(default)]
    pub contract_violations: Vec<ContractViolation>,
    pub total_checks: u32,
    pub passed_checks: u32,
    pub duration_seconds: f64,
}

impl LayerResult {
    pub fn new(layer: QualityLayer) -> Self {
        Self {
            layer,
            verdict: GateVerdict::Skipped,
            violations: Vec::new(),
            contract_violations: Vec::new(),
            total_checks: 0,
            passed_checks: 0,
            duration_seconds: 0.0,
        }
    }

    /// Total violation count across both kinds.
    pub fn violation_count(&self) -> usize {
        self.violations.len() + self.contract_violations.len()
    }

    /// Derive the verdict from check counters.
    pub fn derive_verdict(&mut self) {
        self.verdict = if self.total_checks == 0 {
            GateVerdict::Skipped
        } else if self.passed_checks == self.total_checks {
            GateVerdict::Passed
        } else if self.passed_checks == 0 {
            GateVerdict::Failed
        } else {
            GateVerdict::Partial
        };
    }
}

/// Full quality gate report across all layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityGateReport {
    pub layers: BTreeMap<QualityLayer, LayerResult>,
    pub overall_verdict: GateVerdict,
    pub fix_attempts: u32,
    pub max_fix_attempts: u32,
    pub total_violations: u32,
    pub blocking_violations: u32,
}

impl QualityGateReport {
    pub fn new(max_fix_attempts: u32) -> Self {
        Self {
            max_fix_attempts,
            ..Default::default()
        }
    }

    /// Insert a layer result, replacing any previous result for the layer.
    pub fn record_layer(&mut self, result: LayerResult) {
        self.layers.insert(result.layer, result);
    }

    /// Recompute violation counters and the overall verdict.
    ///
    /// `blocking_violations <= total_violations` holds by construction:
    /// blocking counts only the subset matching `blocking_severity`.
    pub fn recount(&mut self, blocking_severity: &str) {
        let mut total = 0u32;
        let mut blocking = 0u32;
        for layer in self.layers.values() {
            total += layer.violation_count() as u32;
            blocking += layer
                .violations
                .iter()
                .filter(|v| v.is_blocking(blocking_severity))
                .count() as u32;
            blocking += layer
                .contract_violations
                .iter()
                .filter(|v| v.severity.eq_ignore_ascii_case(blocking_severity))
                .count() as u32;
        }
        self.total_violations = total;
        self.blocking_violations = blocking;

        self.overall_verdict = if self.layers.is_empty() {
            GateVerdict::Skipped
        } else if self
            .layers
            .values()
            .any(|l| l.verdict == GateVerdict::Failed)
            || blocking > 0
        {
            GateVerdict::Failed
        } else if self
            .layers
            .values()
            .any(|l| l.verdict == GateVerdict::Partial)
        {
            GateVerdict::Partial
        } else if self.layers.values().all(|l| l.verdict == GateVerdict::Skipped) {
            GateVerdict::Skipped
        } else {
            GateVerdict::Passed
        };
    }

    /// All scan violations across layers, in layer order.
    pub fn all_violations(&self) -> Vec<&ScanViolation> {
        self.layers
            .values()
            .flat_map(|l| l.violations.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_with(verdict: GateVerdict, violations: Vec<ScanViolation>) -> LayerResult {
        LayerResult {
            verdict,
            violations,
            ..LayerResult::new(QualityLayer::Layer1Service)
        }
    }

    // =========================================
    // LayerResult tests
    // =========================================

    #[test]
    fn derive_verdict_from_counters() {
        let mut layer = LayerResult::new(QualityLayer::Layer1Service);
        layer.derive_verdict();
        assert_eq!(layer.verdict, GateVerdict::Skipped);

        layer.total_checks = 4;
        layer.passed_checks = 4;
        layer.derive_verdict();
        assert_eq!(layer.verdict, GateVerdict::Passed);

        layer.passed_checks = 2;
        layer.derive_verdict();
        assert_eq!(layer.verdict, GateVerdict::Partial);

        layer.passed_checks = 0;
        layer.derive_verdict();
        assert_eq!(layer.verdict, GateVerdict::Failed);
    }

    #[test]
    fn violation_count_spans_both_kinds() {
        let mut layer = LayerResult::new(QualityLayer::Layer2Contract);
        layer
            .violations
            .push(ScanViolation::new("SEC-001", "error", "security", "a.rs"));
        layer.contract_violations.push(ContractViolation {
            code: "CON-001".into(),
            severity: "error".into(),
            service: "orders".into(),
            endpoint: "/orders".into(),
            message: "schema mismatch".into(),
            ..Default::default()
        });
        assert_eq!(layer.violation_count(), 2);
    }

    // =========================================
    // QualityGateReport tests
    // =========================================

    #[test]
    fn recount_blocking_never_exceeds_total() {
        let mut report = QualityGateReport::new(3);
        let mut layer = layer_with(
            GateVerdict::Partial,
            vec![
                ScanViolation::new("SEC-001", "error", "security", "a.rs"),
                ScanViolation::new("LOG-001", "warning", "logging", "b.rs"),
            ],
        );
        layer.total_checks = 2;
        layer.passed_checks = 1;
        report.record_layer(layer);
        report.recount("error");

        assert_eq!(report.total_violations, 2);
        assert_eq!(report.blocking_violations, 1);
        assert!(report.blocking_violations <= report.total_violations);
    }

    #[test]
    fn overall_verdict_failed_when_blocking_present() {
        let mut report = QualityGateReport::new(3);
        report.record_layer(layer_with(
            GateVerdict::Passed,
            vec![ScanViolation::new("SEC-001", "error", "security", "a.rs")],
        ));
        report.recount("error");
        assert_eq!(report.overall_verdict, GateVerdict::Failed);
    }

    #[test]
    fn overall_verdict_passed_when_clean() {
        let mut report = QualityGateReport::new(3);
        let mut layer = LayerResult::new(QualityLayer::Layer1Service);
        layer.total_checks = 5;
        layer.passed_checks = 5;
        layer.derive_verdict();
        report.record_layer(layer);
        report.recount("error");
        assert_eq!(report.overall_verdict, GateVerdict::Passed);
        assert_eq!(report.total_violations, 0);
    }

    #[test]
    fn overall_verdict_skipped_with_no_layers() {
        let mut report = QualityGateReport::new(3);
        report.recount("error");
        assert_eq!(report.overall_verdict, GateVerdict::Skipped);
    }

    #[test]
    fn layer_serialization_uses_snake_case() {
        let json = serde_json::to_string(&QualityLayer::Layer3System).unwrap();
        assert_eq!(json, "\"layer3_system\"");
        let verdict = serde_json::to_string(&GateVerdict::Partial).unwrap();
        assert_eq!(verdict, "\"partial\"");
    }
}
