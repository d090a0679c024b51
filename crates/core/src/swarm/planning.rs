//! # Collaboration Planning
//!
//! Classifies a specification into a complexity tier and derives the
//! multi-generator plan from it: which roles take part, how they
//! collaborate, the round-1 phase graph and a recommended round budget.
//!
//! ## Tiers
//!
//! | Tier       | Strategy      | Single | Multi |
//! |------------|---------------|--------|-------|
//! | simple     | sequential    | 1      | 3     |
//! | moderate   | hybrid        | 3      | 7     |
//! | complex    | parallel      | 5      | 12    |
//! | enterprise | collaborative | 8      | 20    |

use serde::{Deserialize, Serialize};

use crate::skills::GeneratorRole;
use crate::state::Specification;

// ============================================================================
// Types
// ============================================================================

/// Coarse size of the requested system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
    Enterprise,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
            ComplexityTier::Enterprise => "enterprise",
        }
    }
}

/// How specialized generators share a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStrategy {
    /// One phase after another, each seeing all earlier output
    Sequential,
    /// Foundation, then specialists concurrently, then the general pass
    Hybrid,
    /// Foundation, then everything else concurrently
    Parallel,
    /// Hybrid round 1; later rounds chain generators so each sees the
    /// previous one's fixes
    Collaborative,
}

impl CollaborationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaborationStrategy::Sequential => "sequential",
            CollaborationStrategy::Hybrid => "hybrid",
            CollaborationStrategy::Parallel => "parallel",
            CollaborationStrategy::Collaborative => "collaborative",
        }
    }

    /// Whether repair rounds invoke generators one after another
    pub fn chains_repairs(&self) -> bool {
        matches!(
            self,
            CollaborationStrategy::Sequential | CollaborationStrategy::Collaborative
        )
    }
}

impl From<ComplexityTier> for CollaborationStrategy {
    fn from(tier: ComplexityTier) -> Self {
        match tier {
            ComplexityTier::Simple => CollaborationStrategy::Sequential,
            ComplexityTier::Moderate => CollaborationStrategy::Hybrid,
            ComplexityTier::Complex => CollaborationStrategy::Parallel,
            ComplexityTier::Enterprise => CollaborationStrategy::Collaborative,
        }
    }
}

/// One node of the round-1 phase graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub role: GeneratorRole,
    /// Roles whose output must exist before this phase starts
    pub depends_on: Vec<GeneratorRole>,
}

/// Everything the coordinator needs before round 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: ComplexityTier,
    pub features: Vec<String>,
    pub strategy: CollaborationStrategy,
    pub roles: Vec<GeneratorRole>,
    pub phases: Vec<Phase>,
    /// Recommended budget for a single-generator run
    pub single_rounds: u32,
    /// Recommended budget for a coordinated run
    pub multi_rounds: u32,
    pub reasoning: Vec<String>,
}

// ============================================================================
// Feature detection
// ============================================================================

const ENTERPRISE_FEATURES: &[&str] = &[
    "complex_deployment",
    "external_integrations",
    "comprehensive_testing",
];
const ADVANCED_FEATURES: &[&str] = &[
    "payments",
    "realtime",
    "external_integrations",
    "complex_deployment",
];

fn mentions(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

/// Feature tags implied by the specification, in a fixed order
pub fn detect_features(spec: &Specification) -> Vec<String> {
    let text = spec.feature_text();
    let description = spec.description.to_lowercase();
    let deployment = format!(
        "{} {}",
        spec.deployment.target.as_deref().unwrap_or(""),
        spec.tech_stack.other.join(" ")
    )
    .to_lowercase();

    let page_features = spec
        .features
        .iter()
        .filter(|f| mentions(&f.name.to_lowercase(), &["page", "dashboard", "login", "home"]))
        .count();

    let checks: [(&str, bool); 12] = [
        (
            "authentication",
            mentions(&text, &["auth", "login", "sign in", "sign-in", "signup", "account"])
                || spec
                    .security
                    .iter()
                    .any(|s| mentions(&s.to_lowercase(), &["authentication", "jwt", "oauth"])),
        ),
        (
            "database",
            spec.tech_stack.database.is_some()
                || mentions(&text, &["database", "storage", "persist", "save", "store"]),
        ),
        ("api_endpoints", spec.has_backend() || mentions(&text, &["api", "endpoint"])),
        (
            "external_integrations",
            !spec.integrations.is_empty()
                || mentions(&text, &["external", "integration", "third-party", "email"]),
        ),
        (
            "realtime",
            mentions(&text, &["real-time", "realtime", "websocket", "live", "instant"]),
        ),
        (
            "file_uploads",
            mentions(&text, &["upload", "image", "document", "media", "attachment"]),
        ),
        (
            "payments",
            mentions(&text, &["payment", "billing", "subscription", "checkout", "purchase"]),
        ),
        ("comprehensive_testing", spec.testing.any()),
        (
            "complex_deployment",
            spec.deployment.containerized
                || mentions(&deployment, &["docker", "container", "kubernetes"]),
        ),
        ("multiple_pages", page_features > 2),
        (
            "interactive_elements",
            mentions(&text, &["interactive", "animation", "dynamic", "form", "button", "workflow"]),
        ),
        (
            "marketing_site",
            mentions(&description, &["landing", "marketing", "promotional", "showcase"]),
        ),
    ];

    checks
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Tier from the project type and detected features
pub fn classify(spec: &Specification, features: &[String]) -> ComplexityTier {
    let has = |name: &str| features.iter().any(|f| f == name);
    let count = features.len();

    if spec.project_type.is_static() || (has("marketing_site") && count <= 2) {
        return ComplexityTier::Simple;
    }
    let enterprise = ENTERPRISE_FEATURES.iter().filter(|f| has(f)).count();
    if count >= 10 || enterprise >= 2 {
        return ComplexityTier::Enterprise;
    }
    let advanced = ADVANCED_FEATURES.iter().filter(|f| has(f)).count();
    if count >= 7 || advanced >= 2 {
        return ComplexityTier::Complex;
    }
    ComplexityTier::Moderate
}

/// Recommended round budget per tier and mode
pub fn recommended_rounds(tier: ComplexityTier, multi: bool) -> u32 {
    match (tier, multi) {
        (ComplexityTier::Simple, false) => 1,
        (ComplexityTier::Moderate, false) => 3,
        (ComplexityTier::Complex, false) => 5,
        (ComplexityTier::Enterprise, false) => 8,
        (ComplexityTier::Simple, true) => 3,
        (ComplexityTier::Moderate, true) => 7,
        (ComplexityTier::Complex, true) => 12,
        (ComplexityTier::Enterprise, true) => 20,
    }
}

/// Roles that take part at each tier
pub fn roles_for(tier: ComplexityTier, spec: &Specification) -> Vec<GeneratorRole> {
    match tier {
        ComplexityTier::Simple => vec![GeneratorRole::General],
        ComplexityTier::Moderate => vec![GeneratorRole::Foundation, GeneratorRole::General],
        ComplexityTier::Complex => {
            let mut roles = vec![GeneratorRole::Foundation, GeneratorRole::Integration];
            if spec.has_backend() {
                roles.push(GeneratorRole::Endpoints);
            }
            roles.push(GeneratorRole::General);
            roles
        }
        ComplexityTier::Enterprise => GeneratorRole::all().to_vec(),
    }
}

/// Round-1 dependency graph for `roles` (sorted, General last)
pub fn phase_graph(roles: &[GeneratorRole], strategy: CollaborationStrategy) -> Vec<Phase> {
    let mut roles = roles.to_vec();
    roles.sort();
    roles.dedup();
    let has_foundation = roles.contains(&GeneratorRole::Foundation);
    let specialists: Vec<GeneratorRole> = roles
        .iter()
        .copied()
        .filter(|r| matches!(r, GeneratorRole::Integration | GeneratorRole::Endpoints))
        .collect();

    roles
        .iter()
        .enumerate()
        .map(|(idx, &role)| {
            let depends_on = match (strategy, role) {
                (_, GeneratorRole::Foundation) => Vec::new(),
                (CollaborationStrategy::Sequential, _) => {
                    idx.checked_sub(1).map(|p| vec![roles[p]]).unwrap_or_default()
                }
                (CollaborationStrategy::Parallel, _) => {
                    if has_foundation {
                        vec![GeneratorRole::Foundation]
                    } else {
                        Vec::new()
                    }
                }
                (_, GeneratorRole::General) if !specialists.is_empty() => specialists.clone(),
                _ => {
                    if has_foundation {
                        vec![GeneratorRole::Foundation]
                    } else {
                        Vec::new()
                    }
                }
            };
            Phase { role, depends_on }
        })
        .collect()
}

/// Group phases into waves; every phase's dependencies sit in earlier waves.
/// Dependencies on roles outside the graph are ignored.
pub fn phase_waves(phases: &[Phase]) -> Vec<Vec<GeneratorRole>> {
    let present: Vec<GeneratorRole> = phases.iter().map(|p| p.role).collect();
    let mut done: Vec<GeneratorRole> = Vec::new();
    let mut waves = Vec::new();
    while done.len() < phases.len() {
        let wave: Vec<GeneratorRole> = phases
            .iter()
            .filter(|p| !done.contains(&p.role))
            .filter(|p| {
                p.depends_on
                    .iter()
                    .all(|d| done.contains(d) || !present.contains(d))
            })
            .map(|p| p.role)
            .collect();
        if wave.is_empty() {
            // Cycle: run what is left one at a time
            let rest = phases.iter().map(|p| p.role).filter(|r| !done.contains(r));
            waves.extend(rest.map(|r| vec![r]));
            break;
        }
        done.extend(&wave);
        waves.push(wave);
    }
    waves
}

/// Full plan for `spec`, honoring an explicit strategy and role list
pub fn plan(
    spec: &Specification,
    strategy_override: Option<CollaborationStrategy>,
    roles_override: Option<&[GeneratorRole]>,
) -> Plan {
    let features = detect_features(spec);
    let tier = classify(spec, &features);
    let strategy = strategy_override.unwrap_or_else(|| tier.into());
    let mut roles = match roles_override {
        Some(roles) => roles.to_vec(),
        None => roles_for(tier, spec),
    };
    if !roles.contains(&GeneratorRole::General) {
        roles.push(GeneratorRole::General);
    }
    roles.sort();
    roles.dedup();
    let phases = phase_graph(&roles, strategy);

    let mut reasoning = vec![format!(
        "Project classified as {} ({} feature tag(s) detected)",
        tier.as_str(),
        features.len()
    )];
    const KEY_FEATURES: &[&str] = &[
        "authentication",
        "database",
        "api_endpoints",
        "external_integrations",
        "payments",
    ];
    let key: Vec<&str> = KEY_FEATURES
        .iter()
        .copied()
        .filter(|k| features.iter().any(|f| f == k))
        .collect();
    if !key.is_empty() {
        reasoning.push(format!("Key features: {}", key.join(", ")));
    }
    if let (Some(frontend), Some(backend)) = (&spec.tech_stack.frontend, &spec.tech_stack.backend) {
        reasoning.push(format!("Stack: {} + {}", frontend, backend));
    }
    reasoning.push(format!(
        "Using {} collaboration with {} generator(s): {}",
        strategy.as_str(),
        roles.len(),
        roles.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    ));

    Plan {
        tier,
        features,
        strategy,
        roles,
        phases,
        single_rounds: recommended_rounds(tier, false),
        multi_rounds: recommended_rounds(tier, true),
        reasoning,
    }
}
