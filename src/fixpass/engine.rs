//! Fix-pass orchestration: the six-step Discover → Classify → Generate →
//! Apply → Verify → Regress cycle, and the bounded convergence loop
//! around it.

use crate::cancel::CancelToken;
use crate::config::ShipwrightConfig;
use crate::fixpass::classify::{Violation, classify};
use crate::fixpass::convergence::{
    ConvergenceDecision, ConvergenceInputs, check_convergence, weighted_total,
};
use crate::fixpass::metrics::{FixPassMetrics, compute_metrics};
use crate::fixpass::snapshot::{ViolationSnapshot, detect_regressions};
use crate::pipeline::state::{PipelineState, Priority, Resolution};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

/// One step of the fix cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FixStep {
    Discover,
    Classify,
    Generate,
    Apply,
    Verify,
    Regress,
}

/// Lifecycle status of a fix pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FixPassStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One entry of the fix-instructions payload handed to the fixer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixInstruction {
    /// Finding id, e.g. `FINDING-004`.
    pub code: String,
    pub priority: String,
    pub component: String,
    pub evidence: String,
    /// The recommended fix action.
    pub action: String,
    pub message: String,
}

/// What a fixer invocation achieved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppliedFixes {
    pub cost_usd: f64,
    /// Finding ids the fixer verified as resolved.
    #[serde(default)]
    pub resolved: Vec<String>,
}

/// The fixer collaborator invoked during the Apply step.
///
/// The default implementation shells out to the builder scoped to each
/// project root; tests inject mocks.
#[async_trait]
pub trait FixApplier: Send + Sync {
    async fn apply(
        &self,
        project_root: &Path,
        instructions: &[FixInstruction],
    ) -> anyhow::Result<AppliedFixes>;
}

/// Default fixer: feeds the instructions payload to the builder
/// subprocess scoped to the project root, then reads back the result
/// file it emits.
pub struct SubprocessFixer {
    builder_cmd: String,
    timeout: Duration,
}

impl SubprocessFixer {
    pub fn new(builder_cmd: &str, timeout: Duration) -> Self {
        Self {
            builder_cmd: builder_cmd.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl FixApplier for SubprocessFixer {
    async fn apply(
        &self,
        project_root: &Path,
        instructions: &[FixInstruction],
    ) -> anyhow::Result<AppliedFixes> {
        let payload = serde_json::to_vec(instructions)?;

        let mut child = tokio::process::Command::new(&self.builder_cmd)
            .arg("--fix")
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if !status.success() {
                    anyhow::bail!("fixer exited with {:?}", status.code());
                }
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                anyhow::bail!("fixer timed out after {}s", self.timeout.as_secs());
            }
        }

        let result_path = project_root.join(".builder/FIX_RESULT.json");
        match std::fs::read_to_string(&result_path) {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            Err(_) => Ok(AppliedFixes::default()),
        }
    }
}

/// Result of a single fix pass cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixPassResult {
    /// 1-indexed pass number.
    pub pass_number: u32,
    pub status: FixPassStatus,
    /// Completed steps in exact sequence order, for auditing.
    pub steps_completed: Vec<FixStep>,

    // Discover
    pub violations_discovered: u32,

    // Classify
    pub p0_count: u32,
    pub p1_count: u32,
    pub p2_count: u32,
    pub p3_count: u32,

    // Generate + Apply
    pub fixes_generated: u32,
    pub fixes_applied: u32,

    // Verify
    pub fixes_verified: u32,

    // Regress
    pub regressions_found: u32,

    pub metrics: FixPassMetrics,
    pub convergence: ConvergenceDecision,

    pub cost_usd: f64,
    pub duration_s: f64,

    pub snapshot_before: ViolationSnapshot,
    pub snapshot_after: ViolationSnapshot,
}

/// Execution context shared across passes.
pub struct FixPassContext<'a> {
    pub config: &'a ShipwrightConfig,
    pub applier: &'a dyn FixApplier,
    pub cancel: &'a CancelToken,
}

fn open_priority_counts(state: &PipelineState) -> (u32, u32, u32, u32) {
    (
        state.count_open(Priority::P0),
        state.count_open(Priority::P1),
        state.count_open(Priority::P2),
        state.count_open(Priority::P3),
    )
}

/// Execute one six-step fix pass.
///
/// Mutates findings in two places only: the Classify step assigns a
/// priority to findings that have none, and the Verify bookkeeping marks
/// findings the fixer resolved with this pass number.
pub async fn execute_fix_pass(
    state: &mut PipelineState,
    ctx: &FixPassContext<'_>,
    pass_number: u32,
) -> FixPassResult {
    let started = Instant::now();
    let score_before = state.aggregate_score;
    let findings_before = state.findings.clone();

    let mut result = FixPassResult {
        pass_number,
        status: FixPassStatus::InProgress,
        ..Default::default()
    };

    // --- Step 1: DISCOVER ---
    let snapshot_before = ViolationSnapshot::from_findings(&state.findings);
    result.violations_discovered = snapshot_before.total_paths() as u32;
    result.snapshot_before = snapshot_before.clone();
    result.steps_completed.push(FixStep::Discover);

    // --- Step 2: CLASSIFY ---
    for finding in state.findings.iter_mut() {
        if finding.is_open() && finding.priority.is_none() {
            let violation = Violation::new("", &finding.system, &finding.evidence);
            finding.priority = Some(classify(&violation));
        }
    }
    let (p0, p1, p2, p3) = open_priority_counts(state);
    result.p0_count = p0;
    result.p1_count = p1;
    result.p2_count = p2;
    result.p3_count = p3;
    result.steps_completed.push(FixStep::Classify);

    // --- Step 3: GENERATE ---
    let instructions: Vec<FixInstruction> = state
        .open_findings()
        .iter()
        .map(|f| FixInstruction {
            code: f.finding_id.clone(),
            priority: f
                .priority
                .map(|p| p.to_string())
                .unwrap_or_else(|| "P1".to_string()),
            component: f.component.clone(),
            evidence: f.evidence.clone(),
            action: f.recommendation.clone(),
            message: f.evidence.clone(),
        })
        .collect();
    result.fixes_generated = instructions.len() as u32;
    result.steps_completed.push(FixStep::Generate);

    // --- Step 4: APPLY ---
    let mut resolved: BTreeSet<String> = BTreeSet::new();
    let mut any_applied = false;
    if !instructions.is_empty() {
        for root in &ctx.config.project_roots {
            if ctx.cancel.is_cancelled() {
                tracing::warn!(pass = pass_number, "fix pass cancelled during apply");
                result.status = FixPassStatus::Failed;
                return result;
            }
            let applied = tokio::select! {
                applied = ctx.applier.apply(root, &instructions) => applied,
                _ = ctx.cancel.cancelled() => {
                    result.status = FixPassStatus::Failed;
                    return result;
                }
            };
            match applied {
                Ok(applied) => {
                    any_applied = true;
                    result.cost_usd += applied.cost_usd;
                    resolved.extend(applied.resolved);
                }
                Err(e) => {
                    tracing::error!(root = %root.display(), error = %e, "fixer invocation failed");
                }
            }
        }
    }
    result.fixes_applied = if any_applied {
        instructions.len() as u32
    } else {
        0
    };
    result.steps_completed.push(FixStep::Apply);

    // --- Step 5: VERIFY ---
    for finding in state.findings.iter_mut() {
        if finding.is_open() && resolved.contains(&finding.finding_id) {
            finding.resolution = Resolution::Fixed;
            finding.fix_pass_number = pass_number;
        }
    }
    result.fixes_verified = state
        .findings
        .iter()
        .filter(|f| f.resolution == Resolution::Fixed && f.fix_pass_number == pass_number)
        .count() as u32;
    result.steps_completed.push(FixStep::Verify);

    // --- Step 6: REGRESS ---
    let snapshot_after = ViolationSnapshot::from_findings(&state.findings);
    let regressions = detect_regressions(&snapshot_before, &snapshot_after);
    result.regressions_found = regressions.len() as u32;
    result.snapshot_after = snapshot_after;
    result.steps_completed.push(FixStep::Regress);

    result.metrics = compute_metrics(
        &findings_before,
        &state.findings,
        &regressions,
        score_before,
        state.aggregate_score,
    );

    if result.cost_usd > 0.0 {
        state.record_phase_cost("fix_pass", result.cost_usd);
    }

    result.duration_s = started.elapsed().as_secs_f64();
    result.status = FixPassStatus::Completed;

    tracing::info!(
        pass = pass_number,
        discovered = result.violations_discovered,
        verified = result.fixes_verified,
        regressions = result.regressions_found,
        "fix pass completed"
    );
    result
}

/// Run the bounded fix-pass convergence loop.
///
/// Executes passes until a stop condition fires or the pass limit is
/// reached, appending each result to `state.fix_passes` and invoking
/// `on_pass` (the checkpoint hook) after every iteration. With a pass
/// limit of zero no pass executes.
pub async fn run_fix_loop<F>(
    state: &mut PipelineState,
    ctx: &FixPassContext<'_>,
    mut on_pass: F,
) -> Vec<FixPassResult>
where
    F: FnMut(&mut PipelineState),
{
    let max_passes = ctx.config.effective_max_fix_passes();
    let (initial_p0, initial_p1, initial_p2, _) = open_priority_counts(state);
    let initial_weighted = weighted_total(initial_p0, initial_p1, initial_p2);

    tracing::info!(
        max_passes,
        initial_weighted,
        p0 = initial_p0,
        p1 = initial_p1,
        p2 = initial_p2,
        "starting fix loop"
    );

    let mut results: Vec<FixPassResult> = Vec::new();

    for pass_number in 1..=max_passes {
        if ctx.cancel.is_cancelled() {
            tracing::warn!("fix loop cancelled");
            break;
        }

        let mut result = execute_fix_pass(state, ctx, pass_number).await;
        if result.status == FixPassStatus::Failed {
            state.fix_passes.push(result.clone());
            results.push(result);
            on_pass(state);
            break;
        }

        let recent_new_defects: Vec<u32> = results
            .iter()
            .map(|r| r.metrics.new_defect_count)
            .chain(std::iter::once(result.metrics.new_defect_count))
            .collect();

        let decision = check_convergence(&ConvergenceInputs {
            remaining_p0: result.p0_count,
            remaining_p1: result.p1_count,
            remaining_p2: result.p2_count,
            initial_weighted_total: initial_weighted,
            current_pass: pass_number,
            max_fix_passes: max_passes,
            budget_remaining: ctx.config.max_budget_usd - state.total_cost,
            fix_effectiveness: result.metrics.fix_effectiveness,
            regression_rate: result.metrics.regression_rate,
            fix_effectiveness_floor: ctx.config.fix_effectiveness_floor,
            regression_rate_ceiling: ctx.config.regression_rate_ceiling,
            convergence_threshold: 0.85,
            recent_new_defects,
            aggregate_score: state.aggregate_score,
        });

        tracing::info!(
            pass = pass_number,
            max_passes,
            should_stop = decision.should_stop,
            reason = ?decision.reason,
            "fix loop pass checked"
        );

        result.convergence = decision.clone();
        state.fix_passes.push(result.clone());
        results.push(result);
        on_pass(state);

        if decision.should_stop {
            break;
        }
    }

    tracing::info!(passes = results.len(), "fix loop completed");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixpass::convergence::StopReason;
    use crate::pipeline::state::Finding;
    use std::sync::Mutex;

    /// Fixer that resolves a fixed fraction of the instructions it sees.
    struct FractionFixer {
        fraction: f64,
    }

    #[async_trait]
    impl FixApplier for FractionFixer {
        async fn apply(
            &self,
            _project_root: &Path,
            instructions: &[FixInstruction],
        ) -> anyhow::Result<AppliedFixes> {
            let take = ((instructions.len() as f64) * self.fraction).ceil() as usize;
            Ok(AppliedFixes {
                cost_usd: 0.5,
                resolved: instructions.iter().take(take).map(|i| i.code.clone()).collect(),
            })
        }
    }

    /// Fixer that never resolves anything.
    struct NoOpFixer;

    #[async_trait]
    impl FixApplier for NoOpFixer {
        async fn apply(
            &self,
            _project_root: &Path,
            _instructions: &[FixInstruction],
        ) -> anyhow::Result<AppliedFixes> {
            Ok(AppliedFixes::default())
        }
    }

    /// Fixer that records how many times it was invoked.
    struct CountingFixer {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl FixApplier for CountingFixer {
        async fn apply(
            &self,
            _project_root: &Path,
            _instructions: &[FixInstruction],
        ) -> anyhow::Result<AppliedFixes> {
            *self.calls.lock().unwrap() += 1;
            Ok(AppliedFixes::default())
        }
    }

    fn state_with_findings(p0: usize, p1: usize) -> PipelineState {
        let mut state = PipelineState::new();
        for _ in 0..p0 {
            state.add_finding(Finding {
                priority: Some(Priority::P0),
                system: "Build 1".into(),
                ..Default::default()
            });
        }
        for _ in 0..p1 {
            state.add_finding(Finding {
                priority: Some(Priority::P1),
                system: "Build 2".into(),
                ..Default::default()
            });
        }
        state
    }

    fn test_config() -> ShipwrightConfig {
        ShipwrightConfig {
            project_roots: vec![std::env::temp_dir()],
            ..Default::default()
        }
    }

    // =========================================
    // Single pass
    // =========================================

    #[tokio::test]
    async fn pass_completes_all_six_steps_in_order() {
        let mut state = state_with_findings(1, 1);
        let config = test_config();
        let applier = NoOpFixer;
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let result = execute_fix_pass(&mut state, &ctx, 1).await;
        assert_eq!(result.status, FixPassStatus::Completed);
        assert_eq!(
            result.steps_completed,
            vec![
                FixStep::Discover,
                FixStep::Classify,
                FixStep::Generate,
                FixStep::Apply,
                FixStep::Verify,
                FixStep::Regress,
            ]
        );
        assert_eq!(result.violations_discovered, 2);
        assert_eq!(result.p0_count, 1);
        assert_eq!(result.p1_count, 1);
        assert_eq!(result.fixes_generated, 2);
    }

    #[tokio::test]
    async fn classify_only_touches_unclassified_findings() {
        let mut state = PipelineState::new();
        state.add_finding(Finding {
            priority: Some(Priority::P3),
            system: "Build 1".into(),
            evidence: "container crash on boot".into(),
            ..Default::default()
        });
        state.add_finding(Finding {
            priority: None,
            system: "Build 1".into(),
            evidence: "container crash on boot".into(),
            ..Default::default()
        });

        let config = test_config();
        let applier = NoOpFixer;
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };
        execute_fix_pass(&mut state, &ctx, 1).await;

        // Pre-classified P3 stays; the unclassified one gets P0 from
        // the crash keyword.
        assert_eq!(state.findings[0].priority, Some(Priority::P3));
        assert_eq!(state.findings[1].priority, Some(Priority::P0));
    }

    #[tokio::test]
    async fn verify_counts_resolutions_for_this_pass() {
        let mut state = state_with_findings(0, 4);
        let config = test_config();
        let applier = FractionFixer { fraction: 0.5 };
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let result = execute_fix_pass(&mut state, &ctx, 3).await;
        assert_eq!(result.fixes_verified, 2);
        for finding in state.findings.iter().filter(|f| !f.is_open()) {
            assert_eq!(finding.fix_pass_number, 3);
        }
    }

    #[tokio::test]
    async fn fixer_cost_is_recorded_against_fix_pass_phase() {
        let mut state = state_with_findings(1, 0);
        let config = test_config();
        let applier = FractionFixer { fraction: 1.0 };
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let result = execute_fix_pass(&mut state, &ctx, 1).await;
        assert!(result.cost_usd > 0.0);
        assert!((state.total_cost - result.cost_usd).abs() < 1e-9);
    }

    // =========================================
    // Loop behaviour
    // =========================================

    #[tokio::test]
    async fn loop_converges_within_pass_limit() {
        // Scenario: {5 P0, 3 P1}, each pass resolves >= 50% of open
        // findings. Must stop within 5 passes for a critical or
        // threshold reason.
        let mut state = state_with_findings(5, 3);
        let config = test_config();
        let applier = FractionFixer { fraction: 0.5 };
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let results = run_fix_loop(&mut state, &ctx, |_| {}).await;
        assert!(!results.is_empty());
        assert!(results.len() <= 5);

        let last = results.last().unwrap();
        assert!(last.convergence.should_stop);
        assert!(matches!(
            last.convergence.reason,
            Some(StopReason::AllCriticalResolved) | Some(StopReason::ConvergenceThreshold)
        ));
    }

    #[tokio::test]
    async fn static_findings_trigger_low_effectiveness_on_pass_two() {
        // No-op fixer and static findings: pass 1 runs (floor exempt),
        // pass 2 trips the effectiveness floor.
        let mut state = state_with_findings(2, 1);
        let config = test_config();
        let applier = NoOpFixer;
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let results = run_fix_loop(&mut state, &ctx, |_| {}).await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1].convergence.reason,
            Some(StopReason::LowEffectiveness)
        );
    }

    #[tokio::test]
    async fn zero_max_passes_executes_no_pass() {
        let mut state = state_with_findings(3, 0);
        let config = ShipwrightConfig {
            max_fix_passes: 0,
            ..test_config()
        };
        let applier = CountingFixer {
            calls: Mutex::new(0),
        };
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let results = run_fix_loop(&mut state, &ctx, |_| {}).await;
        assert!(results.is_empty());
        assert_eq!(*applier.calls.lock().unwrap(), 0);
        assert!(state.fix_passes.is_empty());
    }

    #[tokio::test]
    async fn loop_never_exceeds_max_passes() {
        let mut state = state_with_findings(10, 10);
        let config = ShipwrightConfig {
            max_fix_passes: 3,
            // Floor of zero keeps the loop alive until the pass limit.
            fix_effectiveness_floor: 0.0,
            ..test_config()
        };
        let applier = NoOpFixer;
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let results = run_fix_loop(&mut state, &ctx, |_| {}).await;
        assert_eq!(results.len(), 3);
        assert_eq!(
            results.last().unwrap().convergence.reason,
            Some(StopReason::PassLimit)
        );
    }

    #[tokio::test]
    async fn checkpoint_hook_fires_once_per_pass() {
        let mut state = state_with_findings(2, 0);
        let config = test_config();
        let applier = FractionFixer { fraction: 1.0 };
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &CancelToken::never(),
        };

        let mut checkpoints = 0;
        let results = run_fix_loop(&mut state, &ctx, |_| checkpoints += 1).await;
        assert_eq!(checkpoints, results.len());
        assert_eq!(state.fix_passes.len(), results.len());
    }

    #[tokio::test]
    async fn cancelled_loop_stops_promptly() {
        let mut state = state_with_findings(5, 5);
        let config = test_config();
        let applier = NoOpFixer;
        let (handle, token) = crate::cancel::cancel_pair();
        handle.cancel();
        let ctx = FixPassContext {
            config: &config,
            applier: &applier,
            cancel: &token,
        };

        let results = run_fix_loop(&mut state, &ctx, |_| {}).await;
        assert!(results.is_empty());
    }
}
