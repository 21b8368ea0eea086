//! The seven-section audit report.
//!
//! Renders from whatever state was checkpointed, so a failed run still
//! produces a report. Section structure is fixed: Executive Summary,
//! Methodology, Per-System Assessment, Integration Assessment, Fix Pass
//! History, Gap Analysis, Appendices.

use crate::pipeline::state::{Finding, PipelineState, Priority, Resolution};
use crate::scoring::TrafficLight;
use std::path::{Path, PathBuf};

/// Report file name under the run root.
pub const REPORT_FILENAME: &str = "SUPER_TEAM_AUDIT_REPORT.md";

fn light_emoji(light: TrafficLight) -> &'static str {
    match light {
        TrafficLight::Green => "🟢",
        TrafficLight::Yellow => "🟡",
        TrafficLight::Red => "🔴",
    }
}

fn open_count(state: &PipelineState, priority: Priority) -> usize {
    state
        .findings
        .iter()
        .filter(|f| f.is_open() && f.has_priority(priority))
        .count()
}

fn verdict_line(state: &PipelineState) -> String {
    let p0_open = open_count(state, Priority::P0);
    if p0_open == 0 && state.aggregate_score >= 65.0 {
        "**Verdict: PASSED** — the fleet meets the good-enough bar.".to_string()
    } else if p0_open > 0 {
        format!(
            "**Verdict: FAILED** — {} P0 defect(s) remain open.",
            p0_open
        )
    } else {
        format!(
            "**Verdict: FAILED** — aggregate score {:.1} below the 65-point bar.",
            state.aggregate_score
        )
    }
}

fn section_executive_summary(state: &PipelineState) -> String {
    let mut lines = vec![
        "## 1. Executive Summary".to_string(),
        String::new(),
        format!(
            "Run `{}` — phase `{}`, {} of {} phases complete.",
            state.run_id,
            state.current_phase,
            state.completed_phases.len(),
            crate::pipeline::phase::Phase::ORDER.len(),
        ),
        String::new(),
        format!(
            "{} **Aggregate score: {:.1} / 100** ({})",
            light_emoji(state.traffic_light),
            state.aggregate_score,
            state.traffic_light,
        ),
        String::new(),
        verdict_line(state),
        String::new(),
        format!(
            "- Findings: {} total, {} open",
            state.findings.len(),
            state.findings.iter().filter(|f| f.is_open()).count(),
        ),
        format!("- Fix passes executed: {}", state.fix_passes.len()),
        format!("- Total cost: ${:.2}", state.total_cost),
        String::new(),
    ];
    if !state.builder_results.is_empty() {
        let successes = state
            .builder_results
            .values()
            .filter(|r| r.success)
            .count();
        lines.push(format!(
            "- Builders: {} of {} succeeded",
            successes,
            state.builder_results.len()
        ));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn section_methodology() -> String {
    [
        "## 2. Methodology",
        "",
        "The pipeline decomposes the PRD into services, fans builders out",
        "against isolated output directories, waits for every service to",
        "report healthy, runs contract-compliance and cross-service",
        "integration checks, then drives a bounded fix-pass loop until the",
        "convergence predicate stops it. Scores combine six per-system",
        "categories with a four-part integration score into a weighted",
        "aggregate; the good-enough gate evaluates the result against fixed",
        "thresholds.",
        "",
    ]
    .join("\n")
}

fn section_per_system(state: &PipelineState) -> String {
    let mut lines = vec!["## 3. Per-System Assessment".to_string(), String::new()];

    if state.scores.is_empty() {
        lines.push("No per-system scores were computed.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    lines.push("| System | Score | Light |".to_string());
    lines.push("|---|---|---|".to_string());
    for (system, score) in &state.scores {
        let light = TrafficLight::from_score(*score);
        lines.push(format!(
            "| {} | {:.1} | {} {} |",
            system,
            score,
            light_emoji(light),
            light
        ));
    }
    lines.push(String::new());

    for (service_id, result) in &state.builder_results {
        lines.push(format!(
            "- `{}`: {} — tests {}/{}, convergence {:.2}, cost ${:.2}",
            service_id,
            if result.success { "built" } else { "failed" },
            result.test_passed,
            result.test_total,
            result.convergence_ratio,
            result.cost,
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn section_integration(state: &PipelineState) -> String {
    let mut lines = vec!["## 4. Integration Assessment".to_string(), String::new()];

    if state.mcp_health.is_empty() {
        lines.push("No service health data was recorded.".to_string());
    } else {
        lines.push("| Service | Status | Consecutive OK | Response (ms) |".to_string());
        lines.push("|---|---|---|---|".to_string());
        for (name, health) in &state.mcp_health {
            lines.push(format!(
                "| {} | {:?} | {} | {} |",
                name,
                health.status,
                health.consecutive_ok,
                health
                    .response_time_ms
                    .map(|ms| format!("{:.1}", ms))
                    .unwrap_or_else(|| "-".to_string()),
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn section_fix_pass_history(state: &PipelineState) -> String {
    let mut lines = vec!["## 5. Fix Pass History".to_string(), String::new()];

    if state.fix_passes.is_empty() {
        lines.push("No fix passes were executed.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    lines.push(
        "| Pass | Discovered | Verified | Regressions | Effectiveness | Stop reason |".to_string(),
    );
    lines.push("|---|---|---|---|---|---|".to_string());
    for pass in &state.fix_passes {
        lines.push(format!(
            "| {} | {} | {} | {} | {:.0}% | {} |",
            pass.pass_number,
            pass.violations_discovered,
            pass.fixes_verified,
            pass.regressions_found,
            pass.metrics.fix_effectiveness * 100.0,
            pass.convergence
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "continue".to_string()),
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn finding_line(finding: &Finding) -> String {
    format!(
        "- `{}` [{}] {} / {} — {} ({})",
        finding.finding_id,
        finding
            .priority
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unclassified".to_string()),
        finding.system,
        finding.component,
        finding.evidence,
        finding.resolution,
    )
}

fn section_gap_analysis(state: &PipelineState) -> String {
    let mut lines = vec!["## 6. Gap Analysis".to_string(), String::new()];

    let open: Vec<&Finding> = state.findings.iter().filter(|f| f.is_open()).collect();
    if open.is_empty() {
        lines.push("No violations found.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    for priority in [Priority::P0, Priority::P1, Priority::P2, Priority::P3] {
        let at_priority: Vec<&&Finding> = open
            .iter()
            .filter(|f| f.has_priority(priority))
            .collect();
        if at_priority.is_empty() {
            continue;
        }
        lines.push(format!("### {} ({} open)", priority, at_priority.len()));
        lines.push(String::new());
        for finding in at_priority {
            lines.push(finding_line(finding));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn section_appendices(state: &PipelineState) -> String {
    let mut lines = vec!["## 7. Appendices".to_string(), String::new()];

    lines.push("### Appendix A: Full Finding Catalog".to_string());
    lines.push(String::new());
    if state.findings.is_empty() {
        lines.push("No findings were recorded.".to_string());
    } else {
        for finding in &state.findings {
            lines.push(finding_line(finding));
        }
    }
    lines.push(String::new());

    lines.push("### Appendix B: Phase Costs".to_string());
    lines.push(String::new());
    if state.phase_costs.is_empty() {
        lines.push("No costs were recorded.".to_string());
    } else {
        for (phase, cost) in &state.phase_costs {
            lines.push(format!("- {}: ${:.2}", phase, cost));
        }
        lines.push(format!("- **total: ${:.2}**", state.total_cost));
    }
    lines.push(String::new());

    lines.push("### Appendix C: Resolution Summary".to_string());
    lines.push(String::new());
    let fixed = state
        .findings
        .iter()
        .filter(|f| f.resolution == Resolution::Fixed)
        .count();
    let wontfix = state
        .findings
        .iter()
        .filter(|f| f.resolution == Resolution::WontFix)
        .count();
    lines.push(format!(
        "- Fixed: {} · Open: {} · Won't fix: {}",
        fixed,
        state.findings.iter().filter(|f| f.is_open()).count(),
        wontfix,
    ));
    lines.push(String::new());

    lines.push("### Appendix D: Run Timeline".to_string());
    lines.push(String::new());
    lines.push(format!("- Started: {}", state.started_at.to_rfc3339()));
    lines.push(format!("- Updated: {}", state.updated_at.to_rfc3339()));
    lines.push(String::new());

    lines.join("\n")
}

/// Render the full audit report as markdown.
pub fn generate_audit_report(state: &PipelineState) -> String {
    let mut sections = vec![
        "# Super Team Audit Report".to_string(),
        String::new(),
    ];
    sections.push(section_executive_summary(state));
    sections.push(section_methodology());
    sections.push(section_per_system(state));
    sections.push(section_integration(state));
    sections.push(section_fix_pass_history(state));
    sections.push(section_gap_analysis(state));
    sections.push(section_appendices(state));
    sections.join("\n")
}

/// Render and write the report under the run root. Returns the path.
pub fn write_audit_report(state: &PipelineState, output_dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(REPORT_FILENAME);
    std::fs::write(&path, generate_audit_report(state))?;
    tracing::info!(path = %path.display(), "audit report written");
    Ok(path)
}
