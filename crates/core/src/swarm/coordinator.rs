//! # Generator Coordinator
//!
//! Multi-generator strategy. Before round 1 the specification is planned
//! into a complexity tier, a collaboration strategy and a roster of
//! specialized roles. Round 1 runs the roster's phase graph wave by wave;
//! later rounds route each finding to the role whose affinity covers its
//! fix category.
//!
//! ## Merging
//!
//! Outputs are merged in invocation order. When a later role writes a
//! path an earlier role already wrote this round, with different content,
//! the later write wins and a conflict is recorded.
//!
//! ## Degradation
//!
//! A role that fails `max_generator_failures` times in a row is dropped
//! from the active set; its findings go to the general role from then on.
//! The general role is never dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::GeneratorError;
use crate::models::{ArtifactSet, Category, Finding, FixCategory};
use crate::skills::{default_affinity, GenerationRequest, Generator, GeneratorRole};

use super::events::{EngineEvent, EngineEventKind};
use super::planning::{self, phase_waves, CollaborationStrategy, Plan};
use super::strategy::{invoke, GenerationStrategy, RoundContext};

const ACTOR: &str = "coordinator";

/// Configuration for the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Force a collaboration strategy instead of the tier default
    pub strategy: Option<CollaborationStrategy>,
    /// Force a roster instead of the tier default (general is always added)
    pub roles: Option<Vec<GeneratorRole>>,
    /// Fix-category routing overrides
    pub affinity: BTreeMap<FixCategory, GeneratorRole>,
    /// Maximum generators running at once (default: 3)
    pub max_concurrent_generators: usize,
    /// Consecutive failures before a role is demoted (default: 2)
    pub max_generator_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            strategy: None,
            roles: None,
            affinity: BTreeMap::new(),
            max_concurrent_generators: 3,
            max_generator_failures: 2,
        }
    }
}

// ============================================================================
// Coordination State
// ============================================================================

/// One entry of the collaboration history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round: u32,
    pub actor: GeneratorRole,
    pub action: String,
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A path written by two roles in the same round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEvent {
    pub round: u32,
    pub path: String,
    pub previous: GeneratorRole,
    pub winner: GeneratorRole,
}

/// Finding routed to a role in the latest repair round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub file: Option<String>,
    pub category: Category,
    pub message: String,
    pub role: GeneratorRole,
}

/// Persistent state of a coordinated run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationState {
    pub plan: Option<Plan>,
    pub active: Vec<GeneratorRole>,
    pub assignments: Vec<Assignment>,
    pub failures: BTreeMap<GeneratorRole, u32>,
    pub history: Vec<HistoryEntry>,
    pub conflicts: Vec<ConflictEvent>,
}

impl CoordinationState {
    fn record(&mut self, round: u32, actor: GeneratorRole, action: &str, success: bool, detail: Option<String>) {
        self.history.push(HistoryEntry {
            round,
            actor,
            action: action.to_string(),
            success,
            detail,
            timestamp: Utc::now(),
        });
    }
}

/// Accumulates one round's outputs in invocation order
#[derive(Default)]
struct RoundMerge {
    merged: ArtifactSet,
    written_by: BTreeMap<String, GeneratorRole>,
    conflicts: Vec<ConflictEvent>,
    succeeded: usize,
    failed: Vec<String>,
}

impl RoundMerge {
    fn absorb(&mut self, round: u32, role: GeneratorRole, output: &ArtifactSet) {
        for (path, content) in output.iter() {
            if let Some(&previous) = self.written_by.get(path) {
                if previous != role && self.merged.get(path) != Some(content) {
                    self.conflicts.push(ConflictEvent {
                        round,
                        path: path.to_string(),
                        previous,
                        winner: role,
                    });
                }
            }
            self.merged.insert(path, content);
            self.written_by.insert(path.to_string(), role);
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Multi-generator `GenerationStrategy`
pub struct Coordinator {
    config: CoordinatorConfig,
    generators: BTreeMap<GeneratorRole, Arc<dyn Generator>>,
    state: CoordinationState,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            generators: BTreeMap::new(),
            state: CoordinationState::default(),
        }
    }

    /// Register the generator serving `role`
    pub fn with_generator(mut self, role: GeneratorRole, generator: Arc<dyn Generator>) -> Self {
        self.generators.insert(role, generator);
        self
    }

    /// One generator serves every role; the role travels in the request
    pub fn uniform(config: CoordinatorConfig, generator: Arc<dyn Generator>) -> Self {
        GeneratorRole::all()
            .into_iter()
            .fold(Self::new(config), |c, role| c.with_generator(role, generator.clone()))
    }

    pub fn state(&self) -> &CoordinationState {
        &self.state
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.state.plan.as_ref()
    }

    /// Generator for `role`, falling back to the general one
    fn generator_for(&self, role: GeneratorRole) -> Option<Arc<dyn Generator>> {
        self.generators
            .get(&role)
            .or_else(|| self.generators.get(&GeneratorRole::General))
            .or_else(|| self.generators.values().next())
            .cloned()
    }

    fn ensure_plan(&mut self, ctx: &RoundContext) -> Plan {
        if let Some(plan) = &self.state.plan {
            return plan.clone();
        }
        let plan = planning::plan(
            &ctx.specification,
            self.config.strategy,
            self.config.roles.as_deref(),
        );
        tracing::info!(
            tier = plan.tier.as_str(),
            strategy = plan.strategy.as_str(),
            roles = plan.roles.len(),
            "Coordination planned"
        );
        self.state.active = plan.roles.clone();
        self.state.plan = Some(plan.clone());
        plan
    }

    fn route(&self, category: FixCategory) -> GeneratorRole {
        let role = self
            .config
            .affinity
            .get(&category)
            .copied()
            .unwrap_or_else(|| default_affinity(category));
        if self.state.active.contains(&role) {
            role
        } else {
            GeneratorRole::General
        }
    }

    /// Findings per active role, in roster order. With nothing to fix the
    /// general role still gets a pass.
    fn partition(&self, findings: &[Finding]) -> Vec<(GeneratorRole, Vec<Finding>)> {
        let mut buckets: BTreeMap<GeneratorRole, Vec<Finding>> = BTreeMap::new();
        for finding in findings {
            buckets
                .entry(self.route(finding.fix_category))
                .or_default()
                .push(finding.clone());
        }
        if buckets.is_empty() {
            buckets.insert(GeneratorRole::General, Vec::new());
        }
        buckets.into_iter().collect()
    }

    /// Run `jobs` concurrently, bounded by the worker limit; results come
    /// back in job order
    async fn invoke_concurrently(
        &self,
        jobs: Vec<(GeneratorRole, GenerationRequest)>,
        ctx: &RoundContext,
    ) -> Vec<(GeneratorRole, Result<ArtifactSet, GeneratorError>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_generators.max(1)));
        let mut join_set = JoinSet::new();
        let roles: Vec<GeneratorRole> = jobs.iter().map(|(role, _)| *role).collect();

        for (idx, (role, request)) in jobs.into_iter().enumerate() {
            let Some(generator) = self.generator_for(role) else {
                continue;
            };
            let semaphore = semaphore.clone();
            let events = ctx.events.clone();
            let timeout = ctx.timeout;
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, invoke(generator.as_ref(), request, timeout, &events).await)
            });
        }

        let mut slots: Vec<Option<Result<ArtifactSet, GeneratorError>>> =
            roles.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => tracing::warn!(error = %e, "Generator task panicked"),
            }
        }

        roles
            .into_iter()
            .zip(slots)
            .map(|(role, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(GeneratorError::Unavailable(format!(
                        "no generator could run the {} role",
                        role
                    )))
                });
                (role, result)
            })
            .collect()
    }

    async fn invoke_one(
        &self,
        role: GeneratorRole,
        request: GenerationRequest,
        ctx: &RoundContext,
    ) -> Result<ArtifactSet, GeneratorError> {
        match self.generator_for(role) {
            Some(generator) => invoke(generator.as_ref(), request, ctx.timeout, &ctx.events).await,
            None => Err(GeneratorError::Unavailable(format!(
                "no generator could run the {} role",
                role
            ))),
        }
    }

    /// Record the outcome of one invocation and fold its output in
    async fn settle(
        &mut self,
        ctx: &RoundContext,
        merge: &mut RoundMerge,
        role: GeneratorRole,
        result: Result<ArtifactSet, GeneratorError>,
    ) {
        let round = ctx.round;
        match result {
            Ok(output) => {
                self.state.failures.remove(&role);
                self.state.record(
                    round,
                    role,
                    "generated",
                    true,
                    Some(format!("{} file(s)", output.len())),
                );
                let before = merge.conflicts.len();
                merge.absorb(round, role, &output);
                for conflict in &merge.conflicts[before..] {
                    tracing::warn!(
                        round,
                        path = %conflict.path,
                        previous = %conflict.previous,
                        winner = %conflict.winner,
                        "Conflicting write"
                    );
                    ctx.events
                        .emit(
                            EngineEvent::new(EngineEventKind::ConflictDetected, ACTOR)
                                .in_round(round)
                                .with_data(json!({
                                    "path": conflict.path,
                                    "previous": conflict.previous.as_str(),
                                    "winner": conflict.winner.as_str(),
                                })),
                        )
                        .await;
                }
                merge.succeeded += 1;
            }
            Err(e) => {
                self.state.record(round, role, "generated", false, Some(e.to_string()));
                merge.failed.push(format!("{}: {}", role, e));
                let failures = self.state.failures.entry(role).or_insert(0);
                *failures += 1;
                let failures = *failures;

                if role != GeneratorRole::General
                    && failures >= self.config.max_generator_failures
                    && self.state.active.contains(&role)
                {
                    self.state.active.retain(|r| *r != role);
                    self.state.record(
                        round,
                        role,
                        "demoted",
                        false,
                        Some(format!("{} consecutive failure(s)", failures)),
                    );
                    tracing::warn!(round, role = %role, failures, "Generator demoted");
                    ctx.events
                        .emit(
                            EngineEvent::new(EngineEventKind::GeneratorDemoted, ACTOR)
                                .in_round(round)
                                .with_data(json!({ "role": role.as_str(), "failures": failures })),
                        )
                        .await;
                }
            }
        }
    }

    /// Round 1: run the phase graph wave by wave
    async fn run_phases(
        &mut self,
        plan: &Plan,
        ctx: &RoundContext,
    ) -> Result<RoundMerge, GeneratorError> {
        let phases: Vec<_> = plan
            .phases
            .iter()
            .filter(|p| self.state.active.contains(&p.role))
            .cloned()
            .collect();
        let mut outputs: BTreeMap<GeneratorRole, ArtifactSet> = BTreeMap::new();
        let mut merge = RoundMerge::default();

        for (wave_idx, wave) in phase_waves(&phases).into_iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(GeneratorError::Cancelled);
            }

            let mut jobs = Vec::with_capacity(wave.len());
            for role in wave {
                let depends_on = phases
                    .iter()
                    .find(|p| p.role == role)
                    .map(|p| p.depends_on.clone())
                    .unwrap_or_default();
                ctx.events
                    .emit(
                        EngineEvent::new(EngineEventKind::PhaseStarted, ACTOR)
                            .in_round(ctx.round)
                            .with_data(json!({
                                "role": role.as_str(),
                                "wave": wave_idx + 1,
                                "depends_on": depends_on.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
                            })),
                    )
                    .await;

                let mut base = ctx.current.as_deref().cloned().unwrap_or_default();
                for dep in &depends_on {
                    if let Some(output) = outputs.get(dep) {
                        base.overlay(output);
                    }
                }
                let mut request = ctx.request(role);
                if !base.is_empty() {
                    request = request.with_artifacts(Arc::new(base));
                }
                jobs.push((role, request));
            }

            for (role, result) in self.invoke_concurrently(jobs, ctx).await {
                if let Ok(output) = &result {
                    outputs.insert(role, output.clone());
                }
                self.settle(ctx, &mut merge, role, result).await;
            }
        }
        Ok(merge)
    }

    /// Later rounds: each role gets only the findings routed to it
    async fn run_repairs(
        &mut self,
        plan: &Plan,
        ctx: &RoundContext,
    ) -> Result<RoundMerge, GeneratorError> {
        let partitions = self.partition(&ctx.findings);
        self.state.assignments = partitions
            .iter()
            .flat_map(|(role, findings)| {
                findings.iter().map(move |f| Assignment {
                    file: f.file.clone(),
                    category: f.category,
                    message: f.message.clone(),
                    role: *role,
                })
            })
            .collect();
        tracing::info!(
            round = ctx.round,
            generators = partitions.len(),
            findings = ctx.findings.len(),
            "Findings partitioned"
        );

        let mut merge = RoundMerge::default();
        if plan.strategy.chains_repairs() {
            for (role, findings) in partitions {
                if ctx.cancel.is_cancelled() {
                    return Err(GeneratorError::Cancelled);
                }
                let mut current = ctx.current.as_deref().cloned().unwrap_or_default();
                current.overlay(&merge.merged);
                let request = ctx
                    .request(role)
                    .with_findings(findings)
                    .with_artifacts(Arc::new(current));
                let result = self.invoke_one(role, request, ctx).await;
                self.settle(ctx, &mut merge, role, result).await;
            }
        } else {
            if ctx.cancel.is_cancelled() {
                return Err(GeneratorError::Cancelled);
            }
            let jobs = partitions
                .into_iter()
                .map(|(role, findings)| (role, ctx.request(role).with_findings(findings)))
                .collect();
            for (role, result) in self.invoke_concurrently(jobs, ctx).await {
                self.settle(ctx, &mut merge, role, result).await;
            }
        }
        Ok(merge)
    }
}

#[async_trait]
impl GenerationStrategy for Coordinator {
    fn name(&self) -> &str {
        ACTOR
    }

    #[tracing::instrument(skip_all, fields(round = ctx.round))]
    async fn generate_round(&mut self, ctx: RoundContext) -> Result<ArtifactSet, GeneratorError> {
        if self.generators.is_empty() {
            return Err(GeneratorError::Unavailable("no generators registered".into()));
        }
        if ctx.cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        let plan = self.ensure_plan(&ctx);

        let merge = if ctx.current.is_none() {
            self.run_phases(&plan, &ctx).await?
        } else {
            self.run_repairs(&plan, &ctx).await?
        };

        self.state.conflicts.extend(merge.conflicts.iter().cloned());
        if merge.succeeded == 0 {
            return Err(GeneratorError::Failed(format!(
                "every generator failed: {}",
                merge.failed.join("; ")
            )));
        }
        tracing::info!(
            round = ctx.round,
            files = merge.merged.len(),
            conflicts = merge.conflicts.len(),
            failed = merge.failed.len(),
            "Coordinated round generated"
        );
        Ok(merge.merged)
    }

    fn snapshot(&self) -> Option<Value> {
        serde_json::to_value(&self.state).ok()
    }

    fn restore(&mut self, state: Value) {
        match serde_json::from_value::<CoordinationState>(state) {
            Ok(state) => self.state = state,
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable coordination state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::models::{Priority, Probe, Severity};
    use crate::state::{ProjectType, Specification};
    use crate::swarm::events::EventLog;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Writes fixed files, or fails, and remembers what it was asked
    struct Scripted {
        name: String,
        files: Vec<(&'static str, &'static str)>,
        fail: bool,
        seen: Mutex<Vec<(GeneratorRole, usize, bool)>>,
    }

    impl Scripted {
        fn new(name: &str, files: Vec<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                files,
                fail: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                files: Vec::new(),
                fail: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(GeneratorRole, usize, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, request: GenerationRequest) -> Result<ArtifactSet, GeneratorError> {
            self.seen.lock().unwrap().push((
                request.role,
                request.prior_findings.len(),
                request.current_artifacts.is_some(),
            ));
            if self.fail {
                return Err(GeneratorError::Failed("scripted failure".into()));
            }
            Ok(self.files.iter().copied().collect())
        }
    }

    fn backend_spec() -> Arc<Specification> {
        let mut spec = Specification::new("notes").with_feature("Notes", "create and list notes");
        spec.project_type = ProjectType::Backend;
        Arc::new(spec)
    }

    fn context(round: u32, current: Option<ArtifactSet>, findings: Vec<Finding>) -> RoundContext {
        RoundContext {
            specification: backend_spec(),
            round,
            current: current.map(Arc::new),
            findings,
            focus: Vec::new(),
            cancel: CancellationToken::new(),
            timeout: Duration::from_secs(5),
            events: EventLog::new(),
        }
    }

    fn finding(category: Category) -> Finding {
        let issue = crate::models::Issue::new(Severity::Error, category, "broken").in_file("a.txt");
        Finding::from_issue(&issue, Priority::High, Probe::Validation)
    }

    #[tokio::test]
    async fn test_round_one_conflict_last_writer_wins() {
        let foundation = Scripted::new("f", vec![("config/app.json", "{\"a\":1}"), ("package.json", "{}")]);
        let general = Scripted::new("g", vec![("config/app.json", "{\"a\":2}"), ("index.html", "<p></p>")]);
        let mut coordinator = Coordinator::new(CoordinatorConfig::default())
            .with_generator(GeneratorRole::Foundation, foundation.clone())
            .with_generator(GeneratorRole::General, general.clone());

        let ctx = context(1, None, Vec::new());
        let events = ctx.events.clone();
        let set = coordinator.generate_round(ctx).await.unwrap();

        assert_eq!(set.get("config/app.json"), Some("{\"a\":2}"));
        assert_eq!(set.len(), 3);
        assert_eq!(coordinator.state().conflicts.len(), 1);
        assert_eq!(coordinator.state().conflicts[0].winner, GeneratorRole::General);
        assert_eq!(events.count(EngineEventKind::ConflictDetected), 1);

        // General depends on foundation and sees its output
        assert_eq!(foundation.seen(), vec![(GeneratorRole::Foundation, 0, false)]);
        assert_eq!(general.seen(), vec![(GeneratorRole::General, 0, true)]);
    }

    #[tokio::test]
    async fn test_identical_writes_are_not_conflicts() {
        let generator = Scripted::new("same", vec![("README.md", "# hi")]);
        let mut coordinator = Coordinator::uniform(CoordinatorConfig::default(), generator);
        coordinator.generate_round(context(1, None, Vec::new())).await.unwrap();
        assert!(coordinator.state().conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_findings_routed_by_affinity() {
        let foundation = Scripted::new("f", vec![("package.json", "{}")]);
        let general = Scripted::new("g", vec![("index.html", "<p></p>")]);
        let mut coordinator = Coordinator::new(CoordinatorConfig::default())
            .with_generator(GeneratorRole::Foundation, foundation.clone())
            .with_generator(GeneratorRole::General, general.clone());
        coordinator.generate_round(context(1, None, Vec::new())).await.unwrap();

        let current: ArtifactSet = [("package.json", "{}")].into_iter().collect();
        let findings = vec![
            finding(Category::Dependency),
            finding(Category::Syntax),
            finding(Category::Import),
        ];
        coordinator
            .generate_round(context(2, Some(current), findings))
            .await
            .unwrap();

        // Integration is not on a moderate roster, so imports fall to general
        assert_eq!(foundation.seen()[1], (GeneratorRole::Foundation, 1, true));
        assert_eq!(general.seen()[1], (GeneratorRole::General, 2, true));
        assert_eq!(coordinator.state().assignments.len(), 3);
    }

    #[tokio::test]
    async fn test_repeated_failures_demote() {
        let general = Scripted::new("g", vec![("index.html", "<p></p>")]);
        let mut coordinator = Coordinator::new(CoordinatorConfig::default())
            .with_generator(GeneratorRole::Foundation, Scripted::failing("f"))
            .with_generator(GeneratorRole::General, general.clone());

        coordinator.generate_round(context(1, None, Vec::new())).await.unwrap();
        assert_eq!(coordinator.state().failures.get(&GeneratorRole::Foundation), Some(&1));

        let current: ArtifactSet = [("index.html", "<p></p>")].into_iter().collect();
        let ctx = context(2, Some(current.clone()), vec![finding(Category::Dependency)]);
        let events = ctx.events.clone();
        let err = coordinator.generate_round(ctx).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Failed(_)));
        assert_eq!(events.count(EngineEventKind::GeneratorDemoted), 1);
        assert_eq!(coordinator.state().active, vec![GeneratorRole::General]);

        coordinator
            .generate_round(context(3, Some(current), vec![finding(Category::Dependency)]))
            .await
            .unwrap();
        assert_eq!(general.seen().last(), Some(&(GeneratorRole::General, 1, true)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_wave() {
        let mut coordinator =
            Coordinator::uniform(CoordinatorConfig::default(), Scripted::new("g", Vec::new()));
        let ctx = context(1, None, Vec::new());
        ctx.cancel.cancel();
        assert_eq!(
            coordinator.generate_round(ctx).await.unwrap_err(),
            GeneratorError::Cancelled
        );
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let mut coordinator =
            Coordinator::uniform(CoordinatorConfig::default(), Scripted::new("g", vec![("a.txt", "a")]));
        coordinator.generate_round(context(1, None, Vec::new())).await.unwrap();
        let snapshot = coordinator.snapshot().unwrap();

        let mut restored =
            Coordinator::uniform(CoordinatorConfig::default(), Scripted::new("g", Vec::new()));
        restored.restore(snapshot);
        assert_eq!(restored.state(), coordinator.state());
        assert!(restored.plan().is_some());
    }
}
