//! # Round Orchestrator
//!
//! Drives one project through generate → persist → verify → analyze
//! rounds until the analyzer reports success, the round budget runs out,
//! the store fails, or a stop is requested.
//!
//! ## Failure policy
//!
//! - A generator failure becomes an internal finding in that round's
//!   report; verification is skipped and the next round retries.
//! - Probe failures are already folded into their reports.
//! - A store failure ends the run `Failed` with the error attached.
//!
//! ## Cancellation
//!
//! The token is checked before every transition and around every external
//! call. Output generated in a round that is then cancelled is discarded;
//! the outcome carries the last completed report and the merged source.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{GeneratorError, StoreError};
use crate::models::{ArtifactSet, Category, Finding, Issue, Priority, Probe, RoundReport};
use crate::state::{ProjectStore, Specification};
use crate::tools::{Analyzer, BuildChecker, StaticValidator, TestExecutor};

use super::events::{EngineEvent, EngineEventKind, EventLog};
use super::pipeline::{OrchestratorState, Pipeline};
use super::strategy::{GenerationStrategy, RoundContext};

const ACTOR: &str = "orchestrator";

/// Callback invoked after each round report is persisted
pub type RoundObserver = Box<dyn Fn(&RoundReport) + Send + Sync>;

/// Everything a finished run hands back
#[derive(Debug)]
pub struct RunOutcome {
    pub terminal: OrchestratorState,
    /// Rounds whose reports were persisted during this run
    pub rounds_completed: u32,
    /// Most recent persisted report, possibly from an earlier run
    pub last_report: Option<RoundReport>,
    /// Merged source tree at the end of the run
    pub artifacts: ArtifactSet,
    /// Store failure or final-round generator failure
    pub error: Option<String>,
    pub events: Vec<EngineEvent>,
    pub summary_path: Option<PathBuf>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.terminal == OrchestratorState::Succeeded
    }
}

/// Why a round stopped before producing a report
enum Abort {
    Cancelled,
    /// Cancelled after the merge; the partial report is already saved
    Interrupted(RoundReport),
    Fatal(StoreError),
}

impl From<StoreError> for Abort {
    fn from(e: StoreError) -> Self {
        Abort::Fatal(e)
    }
}

/// Carried between rounds
#[derive(Default)]
struct Carry {
    findings: Vec<Finding>,
    focus: Vec<String>,
    last_report: Option<RoundReport>,
    finding_counts: Vec<usize>,
    rounds_completed: u32,
    error: Option<String>,
}

/// The round loop for one project
pub struct Orchestrator {
    config: EngineConfig,
    store: ProjectStore,
    strategy: Box<dyn GenerationStrategy>,
    validator: StaticValidator,
    build: BuildChecker,
    tests: TestExecutor,
    analyzer: Analyzer,
    events: EventLog,
    observer: Option<RoundObserver>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: ProjectStore,
        strategy: Box<dyn GenerationStrategy>,
    ) -> Self {
        Self {
            validator: StaticValidator::new(config.validator.clone()),
            build: BuildChecker::new(config.build.clone(), config.env.clone()),
            tests: TestExecutor::new(config.test.clone(), config.env.clone()),
            analyzer: Analyzer::new(config.success_threshold),
            events: EventLog::new(),
            observer: None,
            config,
            store,
            strategy,
        }
    }

    /// Forward every event to `tx` as it happens
    pub fn with_event_channel(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.events = EventLog::new().with_channel(tx);
        self
    }

    /// Called after each round report is persisted, before the next round
    pub fn with_round_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RoundReport) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// Run rounds until a terminal state
    #[tracing::instrument(skip_all, fields(project = %self.store.layout().name))]
    pub async fn run(mut self, spec: Arc<Specification>, cancel: CancellationToken) -> RunOutcome {
        let mut carry = Carry::default();

        let first_round = match self.resume(&mut carry) {
            Ok(first) => first,
            Err(e) => {
                tracing::error!(error = %e, "Could not read project history");
                carry.error = Some(e.to_string());
                return self.finish(OrchestratorState::Failed, carry).await;
            }
        };
        if carry.last_report.as_ref().is_some_and(|r| r.success) {
            tracing::info!(round = first_round - 1, "Project already succeeded");
            return self.finish(OrchestratorState::Succeeded, carry).await;
        }

        self.events
            .emit(EngineEvent::new(EngineEventKind::RunStarted, ACTOR).with_data(json!({
                "first_round": first_round,
                "max_rounds": self.config.max_rounds,
                "strategy": self.strategy.name(),
            })))
            .await;
        tracing::info!(
            first_round,
            max_rounds = self.config.max_rounds,
            strategy = self.strategy.name(),
            "Run started"
        );

        let mut pipeline = Pipeline::new(first_round, self.config.max_rounds);
        while !pipeline.is_complete() {
            if cancel.is_cancelled() {
                let from = pipeline.state;
                pipeline.cancel();
                self.moved(&pipeline, from).await;
                break;
            }

            let from = pipeline.state;
            pipeline.advance();
            self.moved(&pipeline, from).await;

            match self.run_round(&mut pipeline, &spec, &cancel, &carry).await {
                Ok(report) => {
                    self.record(&report, &mut carry).await;
                    let from = pipeline.state;
                    let next = pipeline.conclude(report.success);
                    if next == OrchestratorState::Failed {
                        carry.error = report.error.clone();
                    }
                    carry.findings = report.findings.clone();
                    if !report.next_iteration_focus.is_empty() {
                        carry.focus = report.next_iteration_focus.clone();
                    }
                    carry.last_report = Some(report);
                    self.moved(&pipeline, from).await;
                }
                Err(Abort::Cancelled) => {
                    tracing::info!(round = pipeline.round, "Stop requested; discarding round");
                    let from = pipeline.state;
                    pipeline.cancel();
                    self.moved(&pipeline, from).await;
                }
                Err(Abort::Interrupted(report)) => {
                    tracing::info!(round = report.round, "Stop requested after merge; round recorded as interrupted");
                    carry.findings = report.findings.clone();
                    let from = pipeline.state;
                    pipeline.cancel();
                    self.moved(&pipeline, from).await;
                }
                Err(Abort::Fatal(e)) => {
                    tracing::error!(round = pipeline.round, error = %e, "Project store failed");
                    carry.error = Some(e.to_string());
                    let from = pipeline.state;
                    pipeline.fail();
                    self.moved(&pipeline, from).await;
                }
            }
        }

        self.finish(pipeline.state, carry).await
    }

    /// Seed the carry from persisted history; returns the first round to run
    fn resume(&mut self, carry: &mut Carry) -> Result<u32, StoreError> {
        let first = self.store.next_round()?;
        if let Some(last) = self.store.last_round()? {
            let report = self.store.load_round_report(last)?;
            tracing::info!(round = last, success = report.success, "Resuming after persisted round");
            carry.findings = report.findings.clone();
            carry.focus = report.next_iteration_focus.clone();
            carry.finding_counts.push(report.findings.len());
            carry.last_report = Some(report);
        }
        if let Some(state) = self.store.load_coordination()? {
            self.strategy.restore(state);
        }
        Ok(first)
    }

    async fn run_round(
        &mut self,
        pipeline: &mut Pipeline,
        spec: &Arc<Specification>,
        cancel: &CancellationToken,
        carry: &Carry,
    ) -> Result<RoundReport, Abort> {
        let round = pipeline.round;
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::RoundStarted, ACTOR)
                    .in_round(round)
                    .with_data(json!({ "findings": carry.findings.len(), "focus": carry.focus })),
            )
            .await;

        // Generating
        let current = self.store.current_artifacts()?;
        let ctx = RoundContext {
            specification: spec.clone(),
            round,
            current: (!current.is_empty()).then(|| Arc::new(current)),
            findings: carry.findings.clone(),
            focus: carry.focus.clone(),
            cancel: cancel.clone(),
            timeout: self.config.generator_timeout(),
            events: self.events.clone(),
        };
        let generated = self.strategy.generate_round(ctx).await;
        if cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        let artifacts = match generated {
            Ok(artifacts) => artifacts,
            Err(GeneratorError::Cancelled) => return Err(Abort::Cancelled),
            Err(e) => {
                tracing::warn!(round, error = %e, "Generation failed; skipping verification");
                let report = RoundReport::internal_failure(round, e.to_string(), carry.findings.clone());
                let from = pipeline.state;
                pipeline.skip_to_analysis();
                self.moved(pipeline, from).await;
                self.store.save_round_report(&report)?;
                return Ok(report);
            }
        };

        // Persisting
        let from = pipeline.state;
        pipeline.advance();
        self.moved(pipeline, from).await;
        let merge = self.store.merge_artifacts(&artifacts)?;
        let mut store_findings = Vec::with_capacity(merge.rejected.len());
        for rejected in &merge.rejected {
            let issue = Issue::error(
                Category::Structure,
                format!("Rejected artifact path '{}': {}", rejected.path, rejected.reason),
            )
            .in_file(rejected.path.clone())
            .with_suggestion("Use a relative path inside the project root");
            store_findings.push(Finding::from_issue(&issue, Priority::High, Probe::Store));
            self.events
                .emit(
                    EngineEvent::new(EngineEventKind::PathRejected, ACTOR)
                        .in_round(round)
                        .with_data(json!({ "path": rejected.path, "reason": rejected.reason })),
                )
                .await;
        }
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::ArtifactsMerged, ACTOR)
                    .in_round(round)
                    .with_data(json!({
                        "created": merge.created,
                        "modified": merge.modified,
                        "unchanged": merge.unchanged,
                        "rejected": merge.rejected.len(),
                    })),
            )
            .await;
        if cancel.is_cancelled() {
            return Err(self.interrupted(round, carry, &store_findings));
        }

        // Verifying
        let from = pipeline.state;
        pipeline.advance();
        self.moved(pipeline, from).await;
        let merged = self.store.current_artifacts()?;
        let validation = self.validator.validate(&merged);
        let copy = self.store.materialize_verification_copy()?;
        tracing::debug!(round, files = copy.file_count(), path = %copy.path().display(), "Verification copy ready");
        let compilation = self.build.check(copy.path(), cancel).await;
        if cancel.is_cancelled() {
            return Err(self.interrupted(round, carry, &store_findings));
        }
        let test = self.tests.run(copy.path(), cancel).await;
        drop(copy);
        if cancel.is_cancelled() {
            return Err(self.interrupted(round, carry, &store_findings));
        }
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::VerificationCompleted, ACTOR)
                    .in_round(round)
                    .with_data(json!({
                        "validation_errors": validation.error_count(),
                        "build_success": compilation.success,
                        "test_success": test.success,
                    })),
            )
            .await;

        // Analyzing
        let from = pipeline.state;
        pipeline.advance();
        self.moved(pipeline, from).await;
        let report = self
            .analyzer
            .analyze(round, validation, compilation, test, store_findings);
        self.store.save_round_report(&report)?;
        Ok(report)
    }

    /// Persist a cancelled round whose artifacts are already merged
    fn interrupted(&self, round: u32, carry: &Carry, store_findings: &[Finding]) -> Abort {
        let mut findings = store_findings.to_vec();
        findings.extend(carry.findings.iter().cloned());
        let report = RoundReport::interrupted(round, findings);
        match self.store.save_round_report(&report) {
            Ok(()) => Abort::Interrupted(report),
            Err(e) => Abort::Fatal(e),
        }
    }

    /// Bookkeeping once a round report is on disk
    async fn record(&mut self, report: &RoundReport, carry: &mut Carry) {
        carry.rounds_completed += 1;
        if let Some(state) = self.strategy.snapshot() {
            if let Err(e) = self.store.save_coordination(&state) {
                tracing::warn!(error = %e, "Could not persist coordination state");
            }
        }
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::RoundCompleted, ACTOR)
                    .in_round(report.round)
                    .with_data(json!({
                        "success": report.success,
                        "findings": report.findings.len(),
                        "overall": report.scores.as_ref().map(|s| s.overall),
                    })),
            )
            .await;

        carry.finding_counts.push(report.findings.len());
        let window = self.config.stall_rounds as usize;
        if window > 0 && carry.finding_counts.len() > window {
            let latest = carry.finding_counts[carry.finding_counts.len() - 1];
            let earlier = carry.finding_counts[carry.finding_counts.len() - 1 - window];
            if !report.success && latest >= earlier {
                tracing::warn!(
                    round = report.round,
                    findings = latest,
                    rounds = window,
                    "Finding count has not dropped"
                );
                self.events
                    .emit(
                        EngineEvent::new(EngineEventKind::NoProgress, ACTOR)
                            .in_round(report.round)
                            .with_data(json!({ "findings": latest, "rounds": window })),
                    )
                    .await;
            }
        }

        if let Some(observer) = &self.observer {
            observer(report);
        }
    }

    async fn moved(&self, pipeline: &Pipeline, from: OrchestratorState) {
        if pipeline.state == from {
            return;
        }
        tracing::info!(round = pipeline.round, from = %from, to = %pipeline.state, "State changed");
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::StateChanged, ACTOR)
                    .in_round(pipeline.round)
                    .with_data(json!({ "from": from.as_str(), "to": pipeline.state.as_str() })),
            )
            .await;
    }

    async fn finish(self, terminal: OrchestratorState, carry: Carry) -> RunOutcome {
        let summary_path = match self.store.export_summary(terminal.as_str()) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "Could not export run summary");
                None
            }
        };
        let artifacts = self.store.current_artifacts().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not read merged source");
            ArtifactSet::new()
        });

        tracing::info!(
            terminal = %terminal,
            rounds = carry.rounds_completed,
            files = artifacts.len(),
            "Run finished"
        );
        self.events
            .emit(
                EngineEvent::new(EngineEventKind::RunFinished, ACTOR).with_data(json!({
                    "terminal": terminal.as_str(),
                    "rounds_completed": carry.rounds_completed,
                    "error": carry.error,
                })),
            )
            .await;

        RunOutcome {
            terminal,
            rounds_completed: carry.rounds_completed,
            last_report: carry.last_report,
            artifacts,
            error: carry.error,
            events: self.events.snapshot(),
            summary_path,
        }
    }
}
