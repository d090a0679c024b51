//! # Generator Capability
//!
//! The contract the round loop requires from whatever produces code.
//! A generator receives the specification, the current artifact set and
//! the findings routed to it, and answers with a new artifact set or a
//! typed failure. Transport and prompt wording live in the adapters that
//! implement the trait, outside the core.
//!
//! ## Roles
//!
//! Specialized generators are identified by `GeneratorRole`; see
//! `agent_definitions` for the roster and the fix-category affinity table.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::GeneratorError;
use crate::models::{ArtifactSet, Finding};
use crate::state::Specification;

pub mod agent_definitions;

pub use agent_definitions::{create_roster, default_affinity, GeneratorRole, RoleDefinition};

/// Everything a generator is told about one invocation
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub specification: Arc<Specification>,
    /// Merged source tree so far; `None` on a fresh project
    pub current_artifacts: Option<Arc<ArtifactSet>>,
    /// Findings routed to this invocation, highest priority first
    pub prior_findings: Vec<Finding>,
    pub round: u32,
    /// Focus labels from the previous analysis
    pub focus: Vec<String>,
    pub role: GeneratorRole,
}

impl GenerationRequest {
    pub fn new(specification: Arc<Specification>, round: u32) -> Self {
        Self {
            specification,
            current_artifacts: None,
            prior_findings: Vec::new(),
            round,
            focus: Vec::new(),
            role: GeneratorRole::General,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<ArtifactSet>) -> Self {
        self.current_artifacts = Some(artifacts);
        self
    }

    pub fn with_findings(mut self, findings: Vec<Finding>) -> Self {
        self.prior_findings = findings;
        self
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }

    pub fn for_role(mut self, role: GeneratorRole) -> Self {
        self.role = role;
        self
    }

    /// First round of a fresh project
    pub fn is_initial(&self) -> bool {
        self.current_artifacts.is_none() && self.prior_findings.is_empty()
    }
}

/// Opaque producer of artifact sets
#[async_trait]
pub trait Generator: Send + Sync {
    /// Name used in logs, events and collaboration history
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<ArtifactSet, GeneratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<ArtifactSet, GeneratorError> {
            let mut set = ArtifactSet::new();
            set.insert("round.txt", request.round.to_string());
            Ok(set)
        }
    }

    #[tokio::test]
    async fn test_generator_as_trait_object() {
        let generator: Arc<dyn Generator> = Arc::new(Echo);
        let spec = Arc::new(Specification::new("demo"));
        let set = generator
            .generate(GenerationRequest::new(spec, 3))
            .await
            .unwrap();
        assert_eq!(set.get("round.txt"), Some("3"));
        assert_eq!(generator.name(), "echo");
    }

    #[test]
    fn test_request_builders() {
        let spec = Arc::new(Specification::new("demo"));
        let request = GenerationRequest::new(spec, 1);
        assert!(request.is_initial());

        let request = request
            .with_artifacts(Arc::new(ArtifactSet::new()))
            .for_role(GeneratorRole::Foundation);
        assert!(!request.is_initial());
        assert_eq!(request.role, GeneratorRole::Foundation);
    }
}
