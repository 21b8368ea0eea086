//! Scoring engine for verification results.
//!
//! Three tiers:
//!
//! 1. [`SystemScore`] — per-build, six weighted categories summing to 100.
//! 2. [`IntegrationScore`] — four equal quarters of 25.
//! 3. [`AggregateScore`] — weighted combination of the builds and
//!    integration, clamped to \[0, 100\].
//!
//! Plus [`Thresholds`] and [`good_enough`] for the gate predicate.

use crate::pipeline::state::{Finding, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Red / Yellow / Green verdict derived from a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrafficLight {
    Green,
    Yellow,
    #[default]
    Red,
}

impl TrafficLight {
    /// Classify a 0-100 score: >= 80 Green, >= 50 Yellow, else Red.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Green
        } else if score >= 50.0 {
            Self::Yellow
        } else {
            Self::Red
        }
    }
}

impl fmt::Display for TrafficLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
        };
        write!(f, "{}", s)
    }
}

fn clamp01(rate: f64) -> f64 {
    rate.clamp(0.0, 1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-system scoring breakdown.
///
/// Category maxima: functional 30, tests 20, contracts 20, quality 15,
/// docker/health 10, documentation 5.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemScore {
    pub system_name: String,
    pub functional_completeness: f64,
    pub test_health: f64,
    pub contract_compliance: f64,
    pub code_quality: f64,
    pub docker_health: f64,
    pub documentation: f64,
    pub total: f64,
    pub traffic_light: TrafficLight,
}

/// Inputs to [`compute_system_score`].
#[derive(Debug, Clone, Default)]
pub struct SystemInputs {
    /// Fraction of requirements passing, 0.0-1.0.
    pub requirement_pass_rate: f64,
    /// Fraction of tests passing, 0.0-1.0.
    pub test_pass_rate: f64,
    /// Fraction of contract validations passing, 0.0-1.0.
    pub contract_pass_rate: f64,
    /// Absolute count of code-quality violations.
    pub total_violations: u32,
    /// Lines of code in the generated service.
    pub total_loc: u32,
    /// Fraction of health endpoints passing, 0.0-1.0.
    pub health_check_rate: f64,
    /// Required artifacts found (Dockerfile, manifest, README, spec, health).
    pub artifacts_present: u32,
    /// Total expected artifacts.
    pub artifacts_required: u32,
}

/// Compute a per-system score across all six categories.
pub fn compute_system_score(system_name: &str, inputs: &SystemInputs) -> SystemScore {
    let functional_completeness = clamp01(inputs.requirement_pass_rate) * 30.0;
    let test_health = clamp01(inputs.test_pass_rate) * 20.0;
    let contract_compliance = clamp01(inputs.contract_pass_rate) * 20.0;

    // No code means no violations are possible, so quality is perfect.
    let violation_density = if inputs.total_loc > 0 {
        inputs.total_violations as f64 / (inputs.total_loc as f64 / 1000.0)
    } else {
        0.0
    };
    let code_quality = (15.0 - violation_density * 1.5).max(0.0);

    let docker_health = clamp01(inputs.health_check_rate) * 10.0;

    let documentation = if inputs.artifacts_required > 0 {
        inputs.artifacts_present.min(inputs.artifacts_required) as f64
            / inputs.artifacts_required as f64
            * 5.0
    } else {
        5.0
    };

    let total = (functional_completeness
        + test_health
        + contract_compliance
        + code_quality
        + docker_health
        + documentation)
        .clamp(0.0, 100.0);

    let score = SystemScore {
        system_name: system_name.to_string(),
        functional_completeness: round2(functional_completeness),
        test_health: round2(test_health),
        contract_compliance: round2(contract_compliance),
        code_quality: round2(code_quality),
        docker_health: round2(docker_health),
        documentation: round2(documentation),
        total: round2(total),
        traffic_light: TrafficLight::from_score(total),
    };
    tracing::info!(
        system = system_name,
        total = score.total,
        light = %score.traffic_light,
        "system score computed"
    );
    score
}

/// Cross-build integration scoring: four categories, each 0-25.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationScore {
    pub mcp_connectivity: f64,
    pub data_flow_integrity: f64,
    pub contract_fidelity: f64,
    pub pipeline_completion: f64,
    pub total: f64,
    pub traffic_light: TrafficLight,
}

/// Inputs to [`compute_integration_score`].
#[derive(Debug, Clone, Default)]
pub struct IntegrationInputs {
    /// Number of RPC tools responding correctly (out of 20).
    pub tools_ok: u32,
    pub flows_passing: u32,
    pub flows_total: u32,
    pub cross_build_violations: u32,
    pub phases_complete: u32,
    pub phases_total: u32,
}

/// Compute the integration score.
pub fn compute_integration_score(inputs: &IntegrationInputs) -> IntegrationScore {
    let mcp_connectivity = inputs.tools_ok.min(20) as f64 / 20.0 * 25.0;

    let data_flow_integrity = if inputs.flows_total > 0 {
        inputs.flows_passing.min(inputs.flows_total) as f64 / inputs.flows_total as f64 * 25.0
    } else {
        25.0
    };

    let contract_fidelity = (25.0 - inputs.cross_build_violations as f64 * 2.5).max(0.0);

    let pipeline_completion = if inputs.phases_total > 0 {
        inputs.phases_complete.min(inputs.phases_total) as f64 / inputs.phases_total as f64 * 25.0
    } else {
        25.0
    };

    let total = (mcp_connectivity + data_flow_integrity + contract_fidelity + pipeline_completion)
        .clamp(0.0, 100.0);

    IntegrationScore {
        mcp_connectivity: round2(mcp_connectivity),
        data_flow_integrity: round2(data_flow_integrity),
        contract_fidelity: round2(contract_fidelity),
        pipeline_completion: round2(pipeline_completion),
        total: round2(total),
        traffic_light: TrafficLight::from_score(total),
    }
}

/// Weighted aggregate of per-system and integration scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub build1: f64,
    pub build2: f64,
    pub build3: f64,
    pub integration: f64,
    pub aggregate: f64,
    pub traffic_light: TrafficLight,
}

/// Compute the weighted aggregate:
/// `0.30*b1 + 0.25*b2 + 0.25*b3 + 0.20*integration`, clamped.
pub fn compute_aggregate(build1: f64, build2: f64, build3: f64, integration: f64) -> AggregateScore {
    let aggregate =
        (build1 * 0.30 + build2 * 0.25 + build3 * 0.25 + integration * 0.20).clamp(0.0, 100.0);

    let agg = AggregateScore {
        build1: round2(build1),
        build2: round2(build2),
        build3: round2(build3),
        integration: round2(integration),
        aggregate: round2(aggregate),
        traffic_light: TrafficLight::from_score(aggregate),
    };
    tracing::info!(
        aggregate = agg.aggregate,
        light = %agg.traffic_light,
        "aggregate score computed"
    );
    agg
}

/// Minimum thresholds for the good-enough gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub per_system_minimum: f64,
    pub integration_minimum: f64,
    pub aggregate_minimum: f64,
    pub p0_remaining_max: u32,
    pub p1_remaining_max: u32,
    pub test_pass_rate_min: f64,
    pub mcp_tool_coverage_min: f64,
    pub fix_convergence_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            per_system_minimum: 60.0,
            integration_minimum: 50.0,
            aggregate_minimum: 65.0,
            p0_remaining_max: 0,
            p1_remaining_max: 3,
            test_pass_rate_min: 0.85,
            mcp_tool_coverage_min: 0.90,
            fix_convergence_min: 0.70,
        }
    }
}

/// Runtime facts evaluated against [`Thresholds`].
#[derive(Debug, Clone, Default)]
pub struct GateFacts {
    pub p0_count: u32,
    pub p1_count: u32,
    /// Overall test pass rate; callers treat zero total tests as 1.0.
    pub test_pass_rate: f64,
    pub mcp_coverage: f64,
    pub convergence: f64,
}

/// Evaluate the good-enough predicate.
///
/// Returns `(passed, failures)` where every violated threshold
/// contributes one human-readable reason string.
pub fn good_enough(
    aggregate: &AggregateScore,
    facts: &GateFacts,
    thresholds: &Thresholds,
) -> (bool, Vec<String>) {
    let mut failures = Vec::new();

    if facts.p0_count > thresholds.p0_remaining_max {
        failures.push(format!(
            "P0 defects remaining: {} (max {})",
            facts.p0_count, thresholds.p0_remaining_max
        ));
    }
    if facts.p1_count > thresholds.p1_remaining_max {
        failures.push(format!(
            "P1 defects remaining: {} (max {})",
            facts.p1_count, thresholds.p1_remaining_max
        ));
    }
    if facts.test_pass_rate < thresholds.test_pass_rate_min {
        failures.push(format!(
            "Test pass rate {:.1}% < {:.0}%",
            facts.test_pass_rate * 100.0,
            thresholds.test_pass_rate_min * 100.0
        ));
    }
    if facts.mcp_coverage < thresholds.mcp_tool_coverage_min {
        failures.push(format!(
            "MCP tool coverage {:.1}% < {:.0}%",
            facts.mcp_coverage * 100.0,
            thresholds.mcp_tool_coverage_min * 100.0
        ));
    }
    if facts.convergence < thresholds.fix_convergence_min {
        failures.push(format!(
            "Fix convergence {:.1}% < {:.0}%",
            facts.convergence * 100.0,
            thresholds.fix_convergence_min * 100.0
        ));
    }
    for (label, score) in [
        ("Build 1", aggregate.build1),
        ("Build 2", aggregate.build2),
        ("Build 3", aggregate.build3),
    ] {
        if score < thresholds.per_system_minimum {
            failures.push(format!(
                "{} score {:.1} < {:.0}",
                label, score, thresholds.per_system_minimum
            ));
        }
    }
    if aggregate.integration < thresholds.integration_minimum {
        failures.push(format!(
            "Integration score {:.1} < {:.0}",
            aggregate.integration, thresholds.integration_minimum
        ));
    }
    if aggregate.aggregate < thresholds.aggregate_minimum {
        failures.push(format!(
            "Aggregate score {:.1} < {:.0}",
            aggregate.aggregate, thresholds.aggregate_minimum
        ));
    }

    let passed = failures.is_empty();
    if passed {
        tracing::info!("good-enough gate passed");
    } else {
        tracing::warn!(violations = failures.len(), "good-enough gate failed");
    }
    (passed, failures)
}

/// Overall test pass rate across builder results.
///
/// Zero total tests is interpreted as "no evidence against", i.e. 1.0.
pub fn overall_test_pass_rate(passed: u32, total: u32) -> f64 {
    if total == 0 {
        1.0
    } else {
        clamp01(passed as f64 / total as f64)
    }
}

/// Per-system resolution ratios, grouping findings by their `system`.
///
/// A system's ratio is resolved/total, so 1.0 means every finding
/// against it was fixed.
pub fn resolution_ratios(findings: &[Finding]) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    for f in findings {
        let entry = totals.entry(f.system.clone()).or_insert((0, 0));
        entry.0 += 1;
        if f.resolution == Resolution::Fixed {
            entry.1 += 1;
        }
    }
    totals
        .into_iter()
        .map(|(system, (total, resolved))| {
            let ratio = if total > 0 {
                resolved as f64 / total as f64
            } else {
                0.0
            };
            (system, ratio)
        })
        .collect()
}
