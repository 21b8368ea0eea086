//! The pipeline state machine.
//!
//! `Pipeline` owns the persisted state and drives the phase sequence
//! `init → decompose → contracts_register → builders_run → integrate →
//! quality_gate → fix_pass → complete`, checkpointing after every
//! transition. Handler failure is retried within the phase up to a
//! bounded count, then routed to the terminal `failed` state. The audit
//! report renders on every exit path.

use crate::builder::result::BuilderResult;
use crate::builder::scheduler::{
    BuilderInvoker, BuilderScheduler, SchedulerConfig, SubprocessInvoker,
};
use crate::builder::service::{ServiceDescriptor, ServiceStatus, descriptors_from_service_map};
use crate::cancel::{CancelHandle, CancelToken, cancel_pair};
use crate::config::ShipwrightConfig;
use crate::cost::CostTracker;
use crate::errors::{HealthError, PipelineError};
use crate::fixpass::classify::promote_for_impact;
use crate::fixpass::engine::{FixApplier, FixPassContext, SubprocessFixer, run_fix_loop};
use crate::health::{HealthStatus, HttpProbe, PollOptions, Probe, poll_until_healthy};
use crate::pipeline::phase::Phase;
use crate::pipeline::state::{Finding, PipelineState, Priority};
use crate::quality::models::{LayerResult, QualityGateReport, QualityLayer};
use crate::quality::report::render_quality_gate_report;
use crate::report::audit::write_audit_report;
use crate::rpc::architect::{ArchitectClient, decompose_with_fallback};
use crate::rpc::contracts::ContractRegistryClient;
use crate::rpc::intel::CodeIntelClient;
use crate::rpc::retry::RetryPolicy;
use crate::rpc::transport::{HttpTransport, ToolTransport};
use crate::scoring::{
    GateFacts, IntegrationInputs, SystemInputs, Thresholds, compute_aggregate,
    compute_integration_score, compute_system_score, good_enough, overall_test_pass_rate,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The pipeline controller. Single-threaded owner of `PipelineState`,
/// orchestrating parallel workers underneath.
pub struct Pipeline {
    config: ShipwrightConfig,
    state: PipelineState,
    state_path: PathBuf,
    cost: CostTracker,
    cancel_handle: CancelHandle,
    cancel: CancelToken,

    invoker: Arc<dyn BuilderInvoker>,
    applier: Arc<dyn FixApplier>,
    prober: Arc<dyn Probe>,
    architect: Option<ArchitectClient>,
    contracts: Option<ContractRegistryClient>,
    intel: Option<CodeIntelClient>,

    prd_text: String,
    decomposition: Value,
    services: Vec<ServiceDescriptor>,
}

impl Pipeline {
    /// Create a pipeline, resuming from a persisted state file when one
    /// exists with a matching schema version.
    pub fn new(config: ShipwrightConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let (cancel_handle, cancel) = cancel_pair();

        let state_path = config.state_path();
        let state = match PipelineState::load(&state_path) {
            Some(state) => {
                tracing::info!(run_id = %state.run_id, phase = %state.current_phase, "resuming run");
                state
            }
            None => PipelineState::new(),
        };

        let mut cost = CostTracker::new(config.max_budget_usd);
        for (phase, spent) in &state.phase_costs {
            cost.add_phase_cost(phase, *spent);
        }

        let policy = RetryPolicy::default();
        let tool_timeout = config.tool_timeout();
        let make_transport = |url: &String| -> Arc<dyn ToolTransport> {
            Arc::new(HttpTransport::new(url, tool_timeout))
        };
        let architect = config
            .architect_url
            .as_ref()
            .map(|u| ArchitectClient::new(make_transport(u), policy.clone(), cancel.clone()));
        let contracts = config
            .contracts_url
            .as_ref()
            .map(|u| ContractRegistryClient::new(make_transport(u), policy.clone(), cancel.clone()));
        let intel = config
            .intel_url
            .as_ref()
            .map(|u| CodeIntelClient::new(make_transport(u), policy.clone(), cancel.clone()));

        let invoker: Arc<dyn BuilderInvoker> = Arc::new(SubprocessInvoker::new(&config.builder_cmd));
        let applier: Arc<dyn FixApplier> = Arc::new(SubprocessFixer::new(
            &config.builder_cmd,
            config.builder_timeout(),
        ));
        let prober: Arc<dyn Probe> = Arc::new(HttpProbe::new(std::time::Duration::from_secs(10)));

        Ok(Self {
            config,
            state,
            state_path,
            cost,
            cancel_handle,
            cancel,
            invoker,
            applier,
            prober,
            architect,
            contracts,
            intel,
            prd_text: String::new(),
            decomposition: Value::Null,
            services: Vec::new(),
        })
    }

    /// Replace the builder invoker (tests, alternative generators).
    pub fn with_invoker(mut self, invoker: Arc<dyn BuilderInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Replace the fixer collaborator.
    pub fn with_applier(mut self, applier: Arc<dyn FixApplier>) -> Self {
        self.applier = applier;
        self
    }

    /// Replace the health probe.
    pub fn with_prober(mut self, prober: Arc<dyn Probe>) -> Self {
        self.prober = prober;
        self
    }

    /// Inject a decomposer client (tests, pre-built sessions).
    pub fn with_architect(mut self, client: ArchitectClient) -> Self {
        self.architect = Some(client);
        self
    }

    /// Inject a contract registry client.
    pub fn with_contracts(mut self, client: ContractRegistryClient) -> Self {
        self.contracts = Some(client);
        self
    }

    /// Inject a code-intelligence client.
    pub fn with_intel(mut self, client: CodeIntelClient) -> Self {
        self.intel = Some(client);
        self
    }

    /// Handle for interrupt-driven cancellation.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Read access to the run state.
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Services known to this run.
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Execute the current phase and advance to the next one,
    /// checkpointing the transition.
    pub async fn advance(&mut self) -> Result<Phase, PipelineError> {
        let phase = self.state.current_phase;
        if phase.is_terminal() {
            return Ok(phase);
        }

        if self.cancel.is_cancelled() {
            return self.fail_run("Cancelled").await;
        }
        if self.cost.is_exhausted() {
            self.cancel_handle.cancel();
            let spent = self.cost.total();
            let ceiling = self.cost.ceiling();
            self.fail_run("BudgetExhausted").await?;
            return Err(PipelineError::BudgetExhausted { spent, ceiling });
        }

        tracing::info!(phase = %phase, "phase starting");
        let mut attempt = 0u32;
        loop {
            let outcome = match self.config.phase_timeout(phase.name()) {
                Some(timeout) => {
                    match tokio::time::timeout(timeout, self.execute_phase(phase)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PipelineError::PhaseTimeout {
                            phase: phase.name().to_string(),
                            timeout_s: timeout.as_secs(),
                        }),
                    }
                }
                None => self.execute_phase(phase).await,
            };

            match outcome {
                Ok(()) => break,
                Err(PipelineError::Cancelled) => {
                    return self.fail_run("Cancelled").await;
                }
                Err(e) if attempt < self.config.max_phase_retries => {
                    attempt += 1;
                    tracing::warn!(
                        phase = %phase,
                        attempt,
                        error = %e,
                        "phase failed, retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(phase = %phase, error = %e, "phase failed");
                    self.fail_run(&e.to_string()).await?;
                    return Err(e);
                }
            }
        }

        self.state.completed_phases.push(phase);
        self.state.current_phase = phase.next();
        self.checkpoint()?;
        tracing::info!(phase = %phase, next = %self.state.current_phase, "phase complete");
        Ok(self.state.current_phase)
    }

    /// Drive the pipeline to a terminal phase. The audit report renders
    /// on every exit path, including failure.
    pub async fn run(&mut self) -> Result<Phase, PipelineError> {
        let outcome = loop {
            if self.state.current_phase.is_terminal() {
                break Ok(self.state.current_phase);
            }
            if let Err(e) = self.advance().await {
                break Err(e);
            }
        };

        if let Err(e) = write_audit_report(&self.state, &self.config.output_dir) {
            tracing::error!(error = %e, "failed to write audit report");
        }
        outcome
    }

    /// Transition to the terminal failed state with a reason.
    async fn fail_run(&mut self, reason: &str) -> Result<Phase, PipelineError> {
        tracing::error!(reason, "run failed");
        self.state.add_finding(Finding {
            priority: Some(Priority::P0),
            system: "Pipeline".to_string(),
            component: self.state.current_phase.name().to_string(),
            evidence: reason.to_string(),
            ..Default::default()
        });
        self.state.current_phase = Phase::Failed;
        self.checkpoint()?;
        if reason == "Cancelled" {
            return Err(PipelineError::Cancelled);
        }
        Ok(Phase::Failed)
    }

    fn checkpoint(&mut self) -> Result<(), PipelineError> {
        self.state
            .save(&self.state_path)
            .map_err(|source| PipelineError::StateWriteFailed {
                path: self.state_path.clone(),
                source,
            })
    }

    async fn execute_phase(&mut self, phase: Phase) -> Result<(), PipelineError> {
        match phase {
            Phase::Init => self.phase_init(),
            Phase::Decompose => self.phase_decompose().await,
            Phase::ContractsRegister => self.phase_contracts_register().await,
            Phase::BuildersRun => self.phase_builders_run().await,
            Phase::Integrate => self.phase_integrate().await,
            Phase::QualityGate => self.phase_quality_gate().await,
            Phase::FixPass => self.phase_fix_pass().await,
            Phase::Complete | Phase::Failed => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Phase handlers
    // ------------------------------------------------------------------

    fn phase_init(&mut self) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            PipelineError::PhaseFailed {
                phase: "init".to_string(),
                reason: format!("cannot create run root: {}", e),
            }
        })?;

        self.prd_text = match &self.config.prd_path {
            Some(path) => {
                std::fs::read_to_string(path).map_err(|e| PipelineError::PhaseFailed {
                    phase: "init".to_string(),
                    reason: format!("cannot read PRD at {}: {}", path.display(), e),
                })?
            }
            None => String::new(),
        };
        Ok(())
    }

    async fn phase_decompose(&mut self) -> Result<(), PipelineError> {
        self.decomposition = decompose_with_fallback(&self.prd_text, self.architect.as_ref()).await;
        self.services = descriptors_from_service_map(&self.decomposition);
        if self.services.is_empty() {
            return Err(PipelineError::PhaseFailed {
                phase: "decompose".to_string(),
                reason: "decomposition produced no services".to_string(),
            });
        }

        let map_path = self.config.output_dir.join("service_map.json");
        if let Ok(raw) = serde_json::to_string_pretty(&self.decomposition) {
            let _ = std::fs::write(&map_path, raw);
        }
        tracing::info!(
            services = self.services.len(),
            fallback = self.decomposition["fallback"].as_bool().unwrap_or(false),
            "PRD decomposed"
        );
        Ok(())
    }

    async fn phase_contracts_register(&mut self) -> Result<(), PipelineError> {
        let Some(client) = &self.contracts else {
            tracing::info!("no contract registry configured, skipping registration");
            return Ok(());
        };

        let stubs = self
            .decomposition
            .get("contract_stubs")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for stub in &stubs {
            let contract_type = stub
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("openapi");
            let created = client
                .create_contract(stub, contract_type)
                .await
                .map_err(|e| PipelineError::PhaseFailed {
                    phase: "contracts_register".to_string(),
                    reason: e.to_string(),
                })?;
            if created.get("error").is_some() {
                tracing::warn!(payload = %created, "contract registration rejected");
            }
        }
        tracing::info!(count = stubs.len(), "contract stubs registered");
        Ok(())
    }

    async fn phase_builders_run(&mut self) -> Result<(), PipelineError> {
        let scheduler = BuilderScheduler::new(
            SchedulerConfig {
                max_concurrent: self.config.max_concurrent_builders,
                timeout_per_builder_s: self.config.builder_timeout_s,
            },
            self.invoker.clone(),
            self.cancel.clone(),
        );

        // Contract stubs relevant to each service travel with its
        // build request.
        let mut stubs_by_service: BTreeMap<String, Value> = BTreeMap::new();
        if let Some(stubs) = self.decomposition.get("contract_stubs").and_then(Value::as_array) {
            for stub in stubs {
                if let Some(service) = stub.get("service").and_then(Value::as_str) {
                    stubs_by_service.insert(service.to_string(), stub.clone());
                }
            }
        }

        let outcome = scheduler
            .run(
                &mut self.services,
                &self.config.output_dir,
                &self.prd_text,
                &stubs_by_service,
            )
            .await;

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        for (service_id, result) in &outcome.results {
            if result.cost > 0.0 {
                self.cost.add_phase_cost("builders_run", result.cost);
                self.state.record_phase_cost("builders_run", result.cost);
            }
            if !result.success {
                self.state.add_finding(Finding {
                    priority: None,
                    system: service_id.clone(),
                    component: "builder".to_string(),
                    evidence: result.error.clone(),
                    recommendation: "re-run the builder with failure context".to_string(),
                    ..Default::default()
                });
            }
        }
        self.state.builder_results = outcome.results.clone();

        // A single failed builder does not fail the pipeline; losing
        // every builder does.
        if outcome.total_builders > 0 && outcome.successful_builders == 0 {
            return Err(PipelineError::PhaseFailed {
                phase: "builders_run".to_string(),
                reason: "all builders failed".to_string(),
            });
        }
        Ok(())
    }

    async fn phase_integrate(&mut self) -> Result<(), PipelineError> {
        let endpoints: BTreeMap<String, String> = self
            .services
            .iter()
            .filter(|s| s.status == ServiceStatus::Built)
            .map(|s| (s.service_id.clone(), s.health_url()))
            .collect();
        if endpoints.is_empty() {
            tracing::warn!("no built services to integrate");
            return Ok(());
        }

        for service in self.services.iter_mut() {
            if service.status == ServiceStatus::Built {
                service.status = ServiceStatus::Deploying;
            }
        }

        let options = PollOptions {
            timeout: std::time::Duration::from_secs(self.config.health_check_timeout_s),
            interval: self.config.health_interval(),
            required_consecutive: 2,
        };
        match poll_until_healthy(&endpoints, self.prober.as_ref(), &options, &self.cancel).await {
            Ok(results) => {
                for service in self.services.iter_mut() {
                    if endpoints.contains_key(&service.service_id) {
                        service.status = ServiceStatus::Healthy;
                    }
                }
                self.state.mcp_health = results;
            }
            Err(HealthError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e @ HealthError::Timeout { .. }) => {
                // Unhealthy services become findings, not a dead run.
                let HealthError::Timeout { unhealthy, .. } = &e else {
                    unreachable!()
                };
                for name in unhealthy {
                    if let Some(service) =
                        self.services.iter_mut().find(|s| &s.service_id == name)
                    {
                        service.status = ServiceStatus::Unhealthy;
                    }
                    self.state.add_finding(Finding {
                        priority: Some(Priority::P0),
                        system: name.clone(),
                        component: "health".to_string(),
                        evidence: e.to_string(),
                        recommendation: "inspect container logs and the health endpoint"
                            .to_string(),
                        ..Default::default()
                    });
                }
            }
        }
        Ok(())
    }

    async fn phase_quality_gate(&mut self) -> Result<(), PipelineError> {
        self.promote_finding_priorities().await;
        self.recompute_scores();

        let mut report = QualityGateReport::new(self.config.max_fix_passes);

        let mut layer1 = LayerResult::new(QualityLayer::Layer1Service);
        layer1.total_checks = self.services.len() as u32;
        layer1.passed_checks = self
            .state
            .builder_results
            .values()
            .filter(|r| r.success)
            .count() as u32;
        layer1.derive_verdict();
        report.record_layer(layer1);

        let mut layer3 = LayerResult::new(QualityLayer::Layer3System);
        let open = self.state.open_findings().len() as u32;
        layer3.total_checks = self.state.findings.len().max(1) as u32;
        layer3.passed_checks = layer3.total_checks.saturating_sub(open);
        layer3.derive_verdict();
        report.record_layer(layer3);

        report.recount("error");
        let rendered = render_quality_gate_report(&report);
        let _ = std::fs::write(
            self.config.output_dir.join("quality_gate_report.md"),
            rendered,
        );
        Ok(())
    }

    async fn phase_fix_pass(&mut self) -> Result<(), PipelineError> {
        let ctx = FixPassContext {
            config: &self.config,
            applier: self.applier.as_ref(),
            cancel: &self.cancel,
        };
        let state_path = self.state_path.clone();
        run_fix_loop(&mut self.state, &ctx, |state| {
            if let Err(e) = state.save(&state_path) {
                tracing::error!(error = %e, "fix-pass checkpoint failed");
            }
        })
        .await;

        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        self.recompute_scores();
        let facts = self.gate_facts();
        let aggregate = compute_aggregate(
            self.state.scores.get("Build 1").copied().unwrap_or(0.0),
            self.state.scores.get("Build 2").copied().unwrap_or(0.0),
            self.state.scores.get("Build 3").copied().unwrap_or(0.0),
            self.state
                .scores
                .get("Integration")
                .copied()
                .unwrap_or(0.0),
        );
        let (passed, failures) = good_enough(&aggregate, &facts, &Thresholds::default());
        if passed {
            tracing::info!("good-enough gate passed");
        } else {
            for failure in &failures {
                tracing::warn!(%failure, "good-enough gate violation");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scoring glue
    // ------------------------------------------------------------------

    fn system_inputs_for(&self, result: &BuilderResult, service: Option<&ServiceDescriptor>) -> SystemInputs {
        let test_rate = overall_test_pass_rate(result.test_passed, result.test_total);
        let open_against: Vec<&Finding> = self
            .state
            .findings
            .iter()
            .filter(|f| f.is_open() && f.system == result.service_id)
            .collect();

        let health_rate = match self.state.mcp_health.get(&result.service_id) {
            Some(h) if h.status == HealthStatus::Healthy => 1.0,
            Some(_) => 0.0,
            None => {
                if result.success {
                    1.0
                } else {
                    0.0
                }
            }
        };

        SystemInputs {
            requirement_pass_rate: if result.success {
                result.convergence_ratio.max(test_rate)
            } else {
                0.0
            },
            test_pass_rate: if result.success { test_rate } else { 0.0 },
            contract_pass_rate: (1.0 - open_against.len() as f64 * 0.25).clamp(0.0, 1.0),
            total_violations: open_against.len() as u32,
            total_loc: service.map(|s| s.estimated_loc).unwrap_or(0),
            health_check_rate: health_rate,
            artifacts_present: result.artifacts.len().min(5) as u32,
            artifacts_required: 5,
        }
    }

    /// Recompute per-system, integration, and aggregate scores into the
    /// state. The first three per-system totals (service-id order) feed
    /// the fixed aggregate weights; missing build slots inherit the mean
    /// of the present ones so small fleets are not penalised.
    fn recompute_scores(&mut self) {
        let mut system_totals: Vec<f64> = Vec::new();
        let results: Vec<BuilderResult> = self.state.builder_results.values().cloned().collect();
        for result in &results {
            let service = self
                .services
                .iter()
                .find(|s| s.service_id == result.service_id);
            let inputs = self.system_inputs_for(result, service);
            let score = compute_system_score(&result.service_id, &inputs);
            self.state
                .scores
                .insert(result.service_id.clone(), score.total);
            system_totals.push(score.total);
        }

        let healthy = self
            .state
            .mcp_health
            .values()
            .filter(|h| h.status == HealthStatus::Healthy)
            .count() as u32;
        let polled = self.state.mcp_health.len() as u32;
        let built = self
            .state
            .builder_results
            .values()
            .filter(|r| r.success)
            .count() as u32;
        let integration_findings = self
            .state
            .findings
            .iter()
            .filter(|f| f.is_open() && f.system == "Integration")
            .count() as u32;

        let tools_ok = if polled == 0 {
            20
        } else {
            (healthy as f64 / polled as f64 * 20.0).round() as u32
        };
        let integration = compute_integration_score(&IntegrationInputs {
            tools_ok,
            flows_passing: if polled == 0 { built } else { healthy },
            flows_total: self.services.len().max(1) as u32,
            cross_build_violations: integration_findings,
            phases_complete: self.state.completed_phases.len() as u32,
            phases_total: Phase::ORDER.len() as u32,
        });
        self.state
            .scores
            .insert("Integration".to_string(), integration.total);

        let mean = if system_totals.is_empty() {
            0.0
        } else {
            system_totals.iter().sum::<f64>() / system_totals.len() as f64
        };
        let slot = |i: usize| system_totals.get(i).copied().unwrap_or(mean);
        let (b1, b2, b3) = (slot(0), slot(1), slot(2));
        self.state.scores.insert("Build 1".to_string(), b1);
        self.state.scores.insert("Build 2".to_string(), b2);
        self.state.scores.insert("Build 3".to_string(), b3);

        let aggregate = compute_aggregate(b1, b2, b3, integration.total);
        self.state.aggregate_score = aggregate.aggregate;
        self.state.traffic_light = aggregate.traffic_light;
    }

    fn gate_facts(&self) -> GateFacts {
        let (passed, total) = self
            .state
            .builder_results
            .values()
            .fold((0u32, 0u32), |(p, t), r| (p + r.test_passed, t + r.test_total));

        let healthy = self
            .state
            .mcp_health
            .values()
            .filter(|h| h.status == HealthStatus::Healthy)
            .count();
        let polled = self.state.mcp_health.len();
        let mcp_coverage = if polled == 0 {
            1.0
        } else {
            healthy as f64 / polled as f64
        };

        let convergence = self
            .state
            .fix_passes
            .last()
            .map(|p| p.convergence.convergence_score)
            .unwrap_or(1.0);

        GateFacts {
            p0_count: self.state.count_open(Priority::P0),
            p1_count: self.state.count_open(Priority::P1),
            test_pass_rate: overall_test_pass_rate(passed, total),
            mcp_coverage,
            convergence,
        }
    }

    /// Escalate open findings whose component shows a wide
    /// cross-service blast radius in the dependency graph. Skipped
    /// entirely when no intel index is configured; lookup failures are
    /// non-blocking.
    async fn promote_finding_priorities(&mut self) {
        let Some(intel) = &self.intel else {
            return;
        };
        let nodes: Vec<(usize, String)> = self
            .state
            .findings
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_open() && !f.component.is_empty())
            .map(|(i, f)| (i, f.component.clone()))
            .collect();

        for (index, node) in nodes {
            let Some(impacted) = intel.cross_service_impact(&node, 2).await else {
                continue;
            };
            if let Some(finding) = self.state.findings.get_mut(index) {
                let current = finding.priority.unwrap_or(Priority::P2);
                let promoted = promote_for_impact(current, impacted);
                if promoted != current {
                    tracing::info!(
                        id = %finding.finding_id,
                        from = %current,
                        to = %promoted,
                        impacted,
                        "finding promoted for cross-service impact"
                    );
                    finding.priority = Some(promoted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::scheduler::BuildRequest;
    use crate::errors::BuilderError;
    use crate::fixpass::engine::{AppliedFixes, FixInstruction};
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    struct OkInvoker;

    #[async_trait]
    impl BuilderInvoker for OkInvoker {
        async fn invoke(&self, request: &BuildRequest) -> Result<(), BuilderError> {
            fs::write(request.output_dir.join("main.py"), "# generated").unwrap();
            let state_dir = request.output_dir.join(".builder");
            fs::create_dir_all(&state_dir).unwrap();
            fs::write(
                state_dir.join("STATE.json"),
                r#"{"system_id": "sys", "total_cost": 0.75,
                    "summary": {"success": true, "test_passed": 10, "test_total": 10, "convergence_ratio": 1.0}}"#,
            )
            .unwrap();
            Ok(())
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl Probe for AlwaysHealthy {
        async fn get(&self, _url: &str) -> Result<(u16, f64), String> {
            Ok((200, 2.0))
        }
    }

    struct ResolveAllFixer;

    #[async_trait]
    impl FixApplier for ResolveAllFixer {
        async fn apply(
            &self,
            _project_root: &Path,
            instructions: &[FixInstruction],
        ) -> anyhow::Result<AppliedFixes> {
            Ok(AppliedFixes {
                cost_usd: 0.1,
                resolved: instructions.iter().map(|i| i.code.clone()).collect(),
            })
        }
    }

    fn test_pipeline(dir: &Path, prd: &str) -> Pipeline {
        let prd_path = dir.join("prd.md");
        fs::write(&prd_path, prd).unwrap();
        let config = ShipwrightConfig {
            output_dir: dir.join("run"),
            prd_path: Some(prd_path),
            project_roots: vec![dir.to_path_buf()],
            health_check_interval_s: 0.01,
            ..Default::default()
        };
        Pipeline::new(config)
            .unwrap()
            .with_invoker(Arc::new(OkInvoker))
            .with_prober(Arc::new(AlwaysHealthy))
            .with_applier(Arc::new(ResolveAllFixer))
    }

    #[tokio::test]
    async fn advance_walks_the_phase_order() {
        let dir = tempdir().unwrap();
        let mut pipeline = test_pipeline(dir.path(), "Order Platform\n\nBuild services.");

        assert_eq!(pipeline.state().current_phase, Phase::Init);
        let next = pipeline.advance().await.unwrap();
        assert_eq!(next, Phase::Decompose);
        assert_eq!(pipeline.state().completed_phases, vec![Phase::Init]);

        let next = pipeline.advance().await.unwrap();
        assert_eq!(next, Phase::ContractsRegister);
        assert_eq!(pipeline.services().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_written_after_each_transition() {
        let dir = tempdir().unwrap();
        let mut pipeline = test_pipeline(dir.path(), "Billing\n");
        pipeline.advance().await.unwrap();

        let loaded = PipelineState::load(&dir.path().join("run/pipeline_state.json")).unwrap();
        assert_eq!(loaded.current_phase, Phase::Decompose);
        assert_eq!(loaded.completed_phases, vec![Phase::Init]);
    }

    #[tokio::test]
    async fn full_run_reaches_complete_and_writes_report() {
        let dir = tempdir().unwrap();
        let mut pipeline = test_pipeline(dir.path(), "Order Platform\n");

        let final_phase = pipeline.run().await.unwrap();
        assert_eq!(final_phase, Phase::Complete);
        assert!(
            dir.path()
                .join("run/SUPER_TEAM_AUDIT_REPORT.md")
                .exists()
        );
        // Builder costs were accounted.
        assert!(pipeline.state().total_cost > 0.0);
        assert_eq!(pipeline.state().builder_results.len(), 1);
        assert!(pipeline.state().builder_results.values().all(|r| r.success));
    }

    #[tokio::test]
    async fn cancellation_routes_to_failed_with_report() {
        let dir = tempdir().unwrap();
        let mut pipeline = test_pipeline(dir.path(), "Order Platform\n");
        pipeline.cancel_handle().cancel();

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(pipeline.state().current_phase, Phase::Failed);
        assert!(
            dir.path()
                .join("run/SUPER_TEAM_AUDIT_REPORT.md")
                .exists()
        );
    }

    #[tokio::test]
    async fn zero_fix_passes_produces_report_without_fixes() {
        let dir = tempdir().unwrap();
        let prd_path = dir.path().join("prd.md");
        fs::write(&prd_path, "Fleet\n").unwrap();
        let config = ShipwrightConfig {
            output_dir: dir.path().join("run"),
            prd_path: Some(prd_path),
            max_fix_passes: 0,
            health_check_interval_s: 0.01,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(config)
            .unwrap()
            .with_invoker(Arc::new(OkInvoker))
            .with_prober(Arc::new(AlwaysHealthy))
            .with_applier(Arc::new(ResolveAllFixer));

        let final_phase = pipeline.run().await.unwrap();
        assert_eq!(final_phase, Phase::Complete);
        assert!(pipeline.state().fix_passes.is_empty());
        assert!(
            dir.path()
                .join("run/SUPER_TEAM_AUDIT_REPORT.md")
                .exists()
        );
    }

    #[tokio::test]
    async fn resume_picks_up_from_persisted_phase() {
        let dir = tempdir().unwrap();
        let mut pipeline = test_pipeline(dir.path(), "Order Platform\n");
        pipeline.advance().await.unwrap();
        let run_id = pipeline.state().run_id.clone();
        drop(pipeline);

        let prd_path = dir.path().join("prd.md");
        let config = ShipwrightConfig {
            output_dir: dir.path().join("run"),
            prd_path: Some(prd_path),
            ..Default::default()
        };
        let resumed = Pipeline::new(config).unwrap();
        assert_eq!(resumed.state().run_id, run_id);
        assert_eq!(resumed.state().current_phase, Phase::Decompose);
    }
}
