//! Convergence scoring and the fix-loop stop predicate.
//!
//! Stop conditions are checked in a fixed order; the first match wins.
//! The pass-limit condition is the ultimate guard against an unbounded
//! loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the fix loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    // Hard stops
    AllCriticalResolved,
    PassLimit,
    BudgetExhausted,
    LowEffectiveness,
    HighRegression,
    // Soft stops
    ConvergenceThreshold,
    SoftConvergence,
}

impl StopReason {
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::AllCriticalResolved
                | Self::PassLimit
                | Self::BudgetExhausted
                | Self::LowEffectiveness
                | Self::HighRegression
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AllCriticalResolved => "all P0 and P1 issues resolved",
            Self::PassLimit => "max fix passes reached",
            Self::BudgetExhausted => "budget exhausted",
            Self::LowEffectiveness => "fix effectiveness below floor",
            Self::HighRegression => "regression rate above ceiling",
            Self::ConvergenceThreshold => "convergence threshold reached",
            Self::SoftConvergence => "soft convergence",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one convergence check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceDecision {
    pub should_stop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    pub detail: String,
    pub convergence_score: f64,
}

impl ConvergenceDecision {
    fn stop(reason: StopReason, detail: String, score: f64) -> Self {
        Self {
            should_stop: true,
            reason: Some(reason),
            detail,
            convergence_score: score,
        }
    }

    fn proceed(score: f64) -> Self {
        Self {
            should_stop: false,
            reason: None,
            detail: "convergence not yet reached".to_string(),
            convergence_score: score,
        }
    }

    pub fn is_hard_stop(&self) -> bool {
        self.reason.map(|r| r.is_hard()).unwrap_or(false)
    }

    pub fn is_soft_convergence(&self) -> bool {
        self.reason.map(|r| !r.is_hard()).unwrap_or(false)
    }
}

/// Weighted violation mass: `p0*0.4 + p1*0.3 + p2*0.1`.
pub fn weighted_total(p0: u32, p1: u32, p2: u32) -> f64 {
    p0 as f64 * 0.4 + p1 as f64 * 0.3 + p2 as f64 * 0.1
}

/// Compute the convergence score, clamped to \[0, 1\].
///
/// Equals 1.0 when `initial_weighted_total <= 0`.
pub fn compute_convergence(
    remaining_p0: u32,
    remaining_p1: u32,
    remaining_p2: u32,
    initial_weighted_total: f64,
) -> f64 {
    if initial_weighted_total <= 0.0 {
        return 1.0;
    }
    let remaining = weighted_total(remaining_p0, remaining_p1, remaining_p2);
    (1.0 - remaining / initial_weighted_total).clamp(0.0, 1.0)
}

/// Inputs to the stop predicate.
#[derive(Debug, Clone)]
pub struct ConvergenceInputs {
    pub remaining_p0: u32,
    pub remaining_p1: u32,
    pub remaining_p2: u32,
    pub initial_weighted_total: f64,
    /// Current pass number, 1-based.
    pub current_pass: u32,
    pub max_fix_passes: u32,
    pub budget_remaining: f64,
    pub fix_effectiveness: f64,
    pub regression_rate: f64,
    pub fix_effectiveness_floor: f64,
    pub regression_rate_ceiling: f64,
    pub convergence_threshold: f64,
    /// New-defect counts of prior passes, oldest first. The
    /// four-condition soft check only applies with at least two entries.
    pub recent_new_defects: Vec<u32>,
    pub aggregate_score: f64,
}

impl Default for ConvergenceInputs {
    fn default() -> Self {
        Self {
            remaining_p0: 0,
            remaining_p1: 0,
            remaining_p2: 0,
            initial_weighted_total: 0.0,
            current_pass: 1,
            max_fix_passes: 5,
            budget_remaining: 100.0,
            fix_effectiveness: 1.0,
            regression_rate: 0.0,
            fix_effectiveness_floor: 0.30,
            regression_rate_ceiling: 0.25,
            convergence_threshold: 0.85,
            recent_new_defects: Vec::new(),
            aggregate_score: 0.0,
        }
    }
}

/// Check every stop condition in order; the first match wins.
pub fn check_convergence(inputs: &ConvergenceInputs) -> ConvergenceDecision {
    let score = compute_convergence(
        inputs.remaining_p0,
        inputs.remaining_p1,
        inputs.remaining_p2,
        inputs.initial_weighted_total,
    );

    // Hard stop 1: all critical issues resolved.
    if inputs.remaining_p0 == 0 && inputs.remaining_p1 == 0 {
        return ConvergenceDecision::stop(
            StopReason::AllCriticalResolved,
            "all P0 and P1 issues resolved".to_string(),
            score,
        );
    }

    // Hard stop 2: pass limit.
    if inputs.current_pass >= inputs.max_fix_passes {
        return ConvergenceDecision::stop(
            StopReason::PassLimit,
            format!("max fix passes reached ({})", inputs.max_fix_passes),
            score,
        );
    }

    // Hard stop 3: budget exhausted.
    if inputs.budget_remaining <= 0.0 {
        return ConvergenceDecision::stop(
            StopReason::BudgetExhausted,
            "budget exhausted".to_string(),
            score,
        );
    }

    // Hard stop 4: effectiveness below floor. Pass 1 is exempt because
    // its effectiveness is computed against a possibly-empty baseline.
    if inputs.current_pass > 1 && inputs.fix_effectiveness < inputs.fix_effectiveness_floor {
        return ConvergenceDecision::stop(
            StopReason::LowEffectiveness,
            format!(
                "fix effectiveness {:.1}% below floor {:.1}%",
                inputs.fix_effectiveness * 100.0,
                inputs.fix_effectiveness_floor * 100.0
            ),
            score,
        );
    }

    // Hard stop 5: regression rate above ceiling.
    if inputs.regression_rate > inputs.regression_rate_ceiling {
        return ConvergenceDecision::stop(
            StopReason::HighRegression,
            format!(
                "regression rate {:.1}% above ceiling {:.1}%",
                inputs.regression_rate * 100.0,
                inputs.regression_rate_ceiling * 100.0
            ),
            score,
        );
    }

    // Soft stop A: convergence score threshold.
    if score >= inputs.convergence_threshold {
        return ConvergenceDecision::stop(
            StopReason::ConvergenceThreshold,
            format!(
                "convergence {:.3} >= threshold {:.2}",
                score, inputs.convergence_threshold
            ),
            score,
        );
    }

    // Soft stop B: four-condition check over the last two passes.
    if inputs.recent_new_defects.len() >= 2 {
        let last_two = &inputs.recent_new_defects[inputs.recent_new_defects.len() - 2..];
        let quiet = last_two.iter().all(|&n| n < 3);
        if inputs.remaining_p0 == 0
            && inputs.remaining_p1 <= 2
            && quiet
            && inputs.aggregate_score >= 70.0
        {
            return ConvergenceDecision::stop(
                StopReason::SoftConvergence,
                format!(
                    "P0=0, P1={}<=2, new defects <3 for last 2 passes, aggregate {:.1}>=70",
                    inputs.remaining_p1, inputs.aggregate_score
                ),
                score,
            );
        }
    }

    ConvergenceDecision::proceed(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // compute_convergence
    // =========================================

    #[test]
    fn zero_initial_weight_is_full_convergence() {
        assert!((compute_convergence(0, 0, 0, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!((compute_convergence(5, 3, 1, 0.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        // More remaining than initial: would be negative without clamping.
        let score = compute_convergence(10, 10, 10, 1.0);
        assert!((score - 0.0).abs() < f64::EPSILON);
        let score = compute_convergence(0, 0, 0, 2.5);
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_resolution_scores_proportionally() {
        // Initial {5 P0, 3 P1}: weight = 5*0.4 + 3*0.3 = 2.9
        let initial = weighted_total(5, 3, 0);
        // Remaining {2 P0, 1 P1}: weight = 1.1
        let score = compute_convergence(2, 1, 0, initial);
        assert!((score - (1.0 - 1.1 / 2.9)).abs() < 1e-9);
    }

    // =========================================
    // Stop-condition ordering
    // =========================================

    #[test]
    fn all_critical_resolved_wins_first() {
        let inputs = ConvergenceInputs {
            remaining_p0: 0,
            remaining_p1: 0,
            remaining_p2: 50,
            initial_weighted_total: 100.0,
            current_pass: 10,
            max_fix_passes: 5,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert!(decision.should_stop);
        assert_eq!(decision.reason, Some(StopReason::AllCriticalResolved));
        assert!(decision.is_hard_stop());
    }

    #[test]
    fn pass_limit_stops_the_loop() {
        let inputs = ConvergenceInputs {
            remaining_p0: 1,
            initial_weighted_total: 10.0,
            current_pass: 5,
            max_fix_passes: 5,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::PassLimit));
    }

    #[test]
    fn budget_exhaustion_is_a_hard_stop() {
        let inputs = ConvergenceInputs {
            remaining_p0: 1,
            initial_weighted_total: 10.0,
            current_pass: 2,
            budget_remaining: 0.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::BudgetExhausted));
        assert!(decision.is_hard_stop());
    }

    #[test]
    fn low_effectiveness_skipped_on_pass_one() {
        let inputs = ConvergenceInputs {
            remaining_p0: 1,
            initial_weighted_total: 10.0,
            current_pass: 1,
            fix_effectiveness: 0.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert!(!decision.should_stop);
    }

    #[test]
    fn low_effectiveness_stops_from_pass_two() {
        let inputs = ConvergenceInputs {
            remaining_p0: 1,
            initial_weighted_total: 10.0,
            current_pass: 2,
            fix_effectiveness: 0.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::LowEffectiveness));
    }

    #[test]
    fn high_regression_rate_stops() {
        let inputs = ConvergenceInputs {
            remaining_p0: 1,
            initial_weighted_total: 10.0,
            current_pass: 2,
            fix_effectiveness: 0.9,
            regression_rate: 0.30,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::HighRegression));
    }

    #[test]
    fn convergence_threshold_is_a_soft_stop() {
        // Initial weight 10.0; remaining {1 P1} = 0.3 => score 0.97.
        let inputs = ConvergenceInputs {
            remaining_p0: 0,
            remaining_p1: 1,
            initial_weighted_total: 10.0,
            current_pass: 2,
            fix_effectiveness: 0.9,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::ConvergenceThreshold));
        assert!(decision.is_soft_convergence());
    }

    #[test]
    fn four_condition_soft_convergence() {
        // Score below 0.85 so the threshold arm does not trigger:
        // remaining {2 P1} = 0.6 of initial 1.0 => 0.4.
        let inputs = ConvergenceInputs {
            remaining_p0: 0,
            remaining_p1: 2,
            initial_weighted_total: 1.0,
            current_pass: 3,
            fix_effectiveness: 0.9,
            recent_new_defects: vec![1, 0],
            aggregate_score: 82.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert_eq!(decision.reason, Some(StopReason::SoftConvergence));
    }

    #[test]
    fn four_condition_check_needs_two_prior_passes() {
        let inputs = ConvergenceInputs {
            remaining_p0: 0,
            remaining_p1: 2,
            initial_weighted_total: 1.0,
            current_pass: 2,
            fix_effectiveness: 0.9,
            recent_new_defects: vec![0],
            aggregate_score: 82.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert!(!decision.should_stop);
    }

    #[test]
    fn noisy_passes_block_soft_convergence() {
        let inputs = ConvergenceInputs {
            remaining_p0: 0,
            remaining_p1: 2,
            initial_weighted_total: 1.0,
            current_pass: 3,
            fix_effectiveness: 0.9,
            recent_new_defects: vec![0, 4],
            aggregate_score: 82.0,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert!(!decision.should_stop);
    }

    #[test]
    fn otherwise_the_loop_continues() {
        let inputs = ConvergenceInputs {
            remaining_p0: 2,
            remaining_p1: 3,
            remaining_p2: 1,
            initial_weighted_total: 5.0,
            current_pass: 2,
            fix_effectiveness: 0.5,
            regression_rate: 0.1,
            ..Default::default()
        };
        let decision = check_convergence(&inputs);
        assert!(!decision.should_stop);
        assert!(decision.reason.is_none());
        assert!(decision.convergence_score > 0.0 && decision.convergence_score < 0.85);
    }
}
