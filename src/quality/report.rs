//! Markdown rendering for the layered quality gate report.

use crate::quality::models::{GateVerdict, QualityGateReport, QualityLayer, ScanViolation};
use std::collections::BTreeMap;

fn verdict_label(verdict: GateVerdict) -> &'static str {
    match verdict {
        GateVerdict::Passed => "✅ PASSED",
        GateVerdict::Failed => "❌ FAILED",
        GateVerdict::Partial => "⚠️ PARTIAL",
        GateVerdict::Skipped => "⏭️ SKIPPED",
    }
}

fn format_duration(seconds: f64) -> String {
    if seconds >= 60.0 {
        format!("{:.0}m {:.0}s", (seconds / 60.0).floor(), seconds % 60.0)
    } else {
        format!("{:.1}s", seconds)
    }
}

fn header_section(report: &QualityGateReport) -> String {
    let mut lines = vec![
        "# Quality Gate Report".to_string(),
        String::new(),
        format!("**Overall verdict:** {}", verdict_label(report.overall_verdict)),
        format!(
            "**Fix attempts:** {} / {}",
            report.fix_attempts, report.max_fix_attempts
        ),
    ];
    lines.push(String::new());
    lines.join("\n")
}

fn summary_section(report: &QualityGateReport) -> String {
    let mut lines = vec!["## Summary".to_string(), String::new()];
    lines.push(format!("- Total violations: {}", report.total_violations));
    lines.push(format!(
        "- Blocking violations: {}",
        report.blocking_violations
    ));
    lines.push(format!("- Layers run: {}", report.layers.len()));
    lines.push(String::new());
    lines.join("\n")
}

fn per_layer_section(report: &QualityGateReport) -> String {
    let mut lines = vec![
        "## Layers".to_string(),
        String::new(),
        "| Layer | Verdict | Checks | Violations | Duration |".to_string(),
        "|---|---|---|---|---|".to_string(),
    ];
    for layer_key in QualityLayer::ALL {
        if let Some(layer) = report.layers.get(&layer_key) {
            lines.push(format!(
                "| {} | {} | {}/{} | {} | {} |",
                layer_key.display_name(),
                layer.verdict,
                layer.passed_checks,
                layer.total_checks,
                layer.violation_count(),
                format_duration(layer.duration_seconds),
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn violations_section(report: &QualityGateReport) -> String {
    let mut lines = vec!["## Violations".to_string(), String::new()];

    let all: Vec<&ScanViolation> = report.all_violations();
    if all.is_empty() && report.layers.values().all(|l| l.contract_violations.is_empty()) {
        lines.push("No violations found.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    // Group by severity, most severe first.
    let mut by_severity: BTreeMap<String, Vec<&ScanViolation>> = BTreeMap::new();
    for violation in all {
        by_severity
            .entry(violation.severity.to_lowercase())
            .or_default()
            .push(violation);
    }
    for severity in ["error", "warning", "info"] {
        if let Some(violations) = by_severity.get(severity) {
            lines.push(format!("### {} ({})", severity, violations.len()));
            lines.push(String::new());
            for v in violations {
                let location = if v.line > 0 {
                    format!("{}:{}", v.file_path, v.line)
                } else {
                    v.file_path.clone()
                };
                lines.push(format!("- `{}` {} — {}", v.code, location, v.message));
            }
            lines.push(String::new());
        }
    }

    for layer in report.layers.values() {
        for cv in &layer.contract_violations {
            lines.push(format!(
                "- `{}` {} {} — {}",
                cv.code, cv.service, cv.endpoint, cv.message
            ));
        }
    }

    lines.join("\n")
}

fn recommendations_section(report: &QualityGateReport) -> String {
    let mut lines = vec!["## Recommendations".to_string(), String::new()];
    if report.blocking_violations > 0 {
        lines.push(format!(
            "- Resolve the {} blocking violation(s) before shipping.",
            report.blocking_violations
        ));
    }
    if report.overall_verdict == GateVerdict::Passed {
        lines.push("- No action required.".to_string());
    } else if report.fix_attempts >= report.max_fix_attempts {
        lines.push("- Fix attempts exhausted; remaining issues need manual follow-up.".to_string());
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Render the full quality gate report as markdown.
pub fn render_quality_gate_report(report: &QualityGateReport) -> String {
    [
        header_section(report),
        summary_section(report),
        per_layer_section(report),
        violations_section(report),
        recommendations_section(report),
    ]
    .join("\n")
}
