//! # Generation Strategies
//!
//! The orchestrator does not care whether one generator or a coordinated
//! group produces a round's artifacts. Both sit behind
//! `GenerationStrategy`; the single-generator form lives here and the
//! coordinated form in `coordinator`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::GeneratorError;
use crate::models::{ArtifactSet, Finding};
use crate::skills::{GenerationRequest, Generator, GeneratorRole};
use crate::state::Specification;

use super::events::{EngineEvent, EngineEventKind, EventLog};

/// Inputs for one round of generation
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub specification: Arc<Specification>,
    pub round: u32,
    /// Merged source tree before this round; `None` on a fresh project
    pub current: Option<Arc<ArtifactSet>>,
    /// Ranked findings from the previous round
    pub findings: Vec<Finding>,
    pub focus: Vec<String>,
    pub cancel: CancellationToken,
    /// Upper bound for each generator invocation
    pub timeout: Duration,
    pub events: EventLog,
}

impl RoundContext {
    /// Request for `role` seeded from this context
    pub fn request(&self, role: GeneratorRole) -> GenerationRequest {
        let mut request = GenerationRequest::new(self.specification.clone(), self.round)
            .with_findings(self.findings.clone())
            .with_focus(self.focus.clone())
            .for_role(role);
        if let Some(current) = &self.current {
            request = request.with_artifacts(current.clone());
        }
        request
    }
}

/// Produces the artifact set for one round
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_round(&mut self, ctx: RoundContext) -> Result<ArtifactSet, GeneratorError>;

    /// State worth persisting between runs
    fn snapshot(&self) -> Option<Value> {
        None
    }

    /// Restore state written by `snapshot`
    fn restore(&mut self, _state: Value) {}
}

/// Invoke `generator` once, bounded by `timeout`, with lifecycle events
pub(crate) async fn invoke(
    generator: &dyn Generator,
    request: GenerationRequest,
    timeout: Duration,
    events: &EventLog,
) -> Result<ArtifactSet, GeneratorError> {
    let round = request.round;
    let role = request.role;
    let actor = generator.name().to_string();
    events
        .emit(
            EngineEvent::new(EngineEventKind::GeneratorStarted, &actor)
                .in_round(round)
                .with_data(json!({
                    "role": role.as_str(),
                    "findings": request.prior_findings.len(),
                })),
        )
        .await;

    let result = match tokio::time::timeout(timeout, generator.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(GeneratorError::Timeout {
            secs: timeout.as_secs(),
        }),
    };

    match &result {
        Ok(artifacts) => {
            tracing::info!(generator = %actor, round, files = artifacts.len(), "Generator completed");
            events
                .emit(
                    EngineEvent::new(EngineEventKind::GeneratorCompleted, &actor)
                        .in_round(round)
                        .with_data(json!({ "role": role.as_str(), "files": artifacts.len() })),
                )
                .await;
        }
        Err(e) => {
            tracing::warn!(generator = %actor, round, error = %e, "Generator failed");
            events
                .emit(
                    EngineEvent::new(EngineEventKind::GeneratorFailed, &actor)
                        .in_round(round)
                        .with_data(json!({ "role": role.as_str(), "error": e.to_string() })),
                )
                .await;
        }
    }
    result
}

/// One generator handles every round
pub struct SingleGenerator {
    generator: Arc<dyn Generator>,
}

impl SingleGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl GenerationStrategy for SingleGenerator {
    fn name(&self) -> &str {
        self.generator.name()
    }

    async fn generate_round(&mut self, ctx: RoundContext) -> Result<ArtifactSet, GeneratorError> {
        if ctx.cancel.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        let request = ctx.request(GeneratorRole::General);
        invoke(self.generator.as_ref(), request, ctx.timeout, &ctx.events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Generator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<ArtifactSet, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ArtifactSet::new())
        }
    }

    struct Fixed;

    #[async_trait]
    impl Generator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, request: GenerationRequest) -> Result<ArtifactSet, GeneratorError> {
            let mut set = ArtifactSet::new();
            set.insert("round.txt", request.round.to_string());
            Ok(set)
        }
    }

    fn context(timeout: Duration) -> RoundContext {
        RoundContext {
            specification: Arc::new(Specification::new("demo")),
            round: 2,
            current: None,
            findings: Vec::new(),
            focus: Vec::new(),
            cancel: CancellationToken::new(),
            timeout,
            events: EventLog::new(),
        }
    }

    #[tokio::test]
    async fn test_single_generator_round() {
        let ctx = context(Duration::from_secs(1));
        let events = ctx.events.clone();
        let mut strategy = SingleGenerator::new(Arc::new(Fixed));

        let set = tokio_test::assert_ok!(strategy.generate_round(ctx).await);
        assert_eq!(set.get("round.txt"), Some("2"));
        assert_eq!(events.count(EngineEventKind::GeneratorStarted), 1);
        assert_eq!(events.count(EngineEventKind::GeneratorCompleted), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let ctx = context(Duration::from_millis(20));
        let events = ctx.events.clone();
        let mut strategy = SingleGenerator::new(Arc::new(Slow));

        let err = tokio_test::assert_err!(strategy.generate_round(ctx).await);
        assert!(matches!(err, GeneratorError::Timeout { .. }));
        assert_eq!(events.count(EngineEventKind::GeneratorFailed), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let ctx = context(Duration::from_secs(1));
        ctx.cancel.cancel();
        let mut strategy = SingleGenerator::new(Arc::new(Fixed));
        assert_eq!(
            strategy.generate_round(ctx).await.unwrap_err(),
            GeneratorError::Cancelled
        );
    }
}
