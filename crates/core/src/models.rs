//! # Crucible Models
//!
//! Shared data types for the round loop: the artifact set a generator
//! produces, the three probe reports, normalized findings, and the
//! per-round report persisted by the store.
//!
//! ## Lifecycle
//!
//! An `ArtifactSet` and a `RoundReport` are created once per round and
//! never mutated afterward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Artifacts
// ============================================================================

/// Relative POSIX path → file content, kept in path order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet {
    files: BTreeMap<String, String>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Apply `other` on top of this set (add-or-overwrite, never delete)
    pub fn overlay(&mut self, other: &ArtifactSet) {
        for (path, content) in other.iter() {
            self.insert(path, content);
        }
    }
}

impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let mut set = ArtifactSet::new();
        for (path, content) in iter {
            set.insert(path, content);
        }
        set
    }
}

// ============================================================================
// Issue Classification
// ============================================================================

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// What kind of problem an issue describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Syntax,
    Import,
    Structure,
    Style,
    Dependency,
    Build,
    Test,
    Environment,
    Internal,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Syntax => "syntax",
            Category::Import => "import",
            Category::Structure => "structure",
            Category::Style => "style",
            Category::Dependency => "dependency",
            Category::Build => "build",
            Category::Test => "test",
            Category::Environment => "environment",
            Category::Internal => "internal",
        }
    }

    /// Routing tag used to pick a generator for the fix
    pub fn fix_category(&self) -> FixCategory {
        match self {
            Category::Syntax => FixCategory::Syntax,
            Category::Import => FixCategory::Imports,
            Category::Structure => FixCategory::Structure,
            Category::Style => FixCategory::Style,
            Category::Dependency => FixCategory::Dependencies,
            Category::Build => FixCategory::Build,
            Category::Test => FixCategory::Tests,
            Category::Environment | Category::Internal => FixCategory::General,
        }
    }
}

/// Routing tag attached to every finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixCategory {
    Syntax,
    Imports,
    Dependencies,
    Build,
    Structure,
    Tests,
    Style,
    General,
}

impl FixCategory {
    /// Label handed to generators as next-round focus
    pub fn focus_label(&self) -> &'static str {
        match self {
            FixCategory::Syntax => "syntax_fixes",
            FixCategory::Imports => "import_resolution",
            FixCategory::Dependencies => "dependency_management",
            FixCategory::Build => "build_repair",
            FixCategory::Structure => "project_organization",
            FixCategory::Tests => "test_repair",
            FixCategory::Style | FixCategory::General => "code_quality",
        }
    }
}

/// Finding priority. Declaration order is ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Which part of the loop produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    Validation,
    Build,
    Test,
    Store,
    Generator,
}

// ============================================================================
// Probe Reports
// ============================================================================

/// One problem reported by a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: None,
            severity,
            category,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

pub type ValidationIssue = Issue;
pub type CompilationError = Issue;
pub type TestOutcome = Issue;

/// Output of the static validator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub files_checked: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }
}

/// Language toolchain a project component builds with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Node,
    Python,
    Rust,
}

/// An ecosystem rooted at a directory (`""` is the project root)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Component {
    pub ecosystem: Ecosystem,
    pub dir: String,
}

/// Coarse project classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Static,
    Single,
    Mixed,
    Container,
}

/// Detected project shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectShape {
    pub kind: ShapeKind,
    pub components: Vec<Component>,
    /// Container descriptor at the project root, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl ProjectShape {
    pub fn is_static(&self) -> bool {
        self.kind == ShapeKind::Static
    }

    pub fn has(&self, ecosystem: Ecosystem) -> bool {
        self.components.iter().any(|c| c.ecosystem == ecosystem)
    }
}

/// One external invocation made by the build checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub skipped: bool,
}

/// Output of the build checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationReport {
    pub success: bool,
    pub shape: ProjectShape,
    pub dependencies_installed: bool,
    pub steps: Vec<BuildStep>,
    pub errors: Vec<CompilationError>,
    pub warnings: Vec<CompilationError>,
    pub elapsed_ms: u64,
}

/// Where a test suite runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSurface {
    Service,
    Client,
    EndToEnd,
}

impl TestSurface {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestSurface::Service => "service",
            TestSurface::Client => "client",
            TestSurface::EndToEnd => "end_to_end",
        }
    }
}

/// Outcome of one surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl SurfaceStatus {
    pub fn executed(&self) -> bool {
        !matches!(self, SurfaceStatus::Skipped)
    }
}

/// Counts parsed from a framework summary line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCounts {
    pub run: u32,
    pub passed: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// Result of one test command against one surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceResult {
    pub surface: TestSurface,
    pub runner: String,
    /// Working directory relative to the verification root
    pub dir: String,
    pub files: Vec<String>,
    pub status: SurfaceStatus,
    pub counts: TestCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Head+tail truncated combined output
    #[serde(default)]
    pub output: String,
}

/// Output of the test executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub success: bool,
    pub environment_ready: bool,
    pub surfaces: Vec<SurfaceResult>,
    pub outcomes: Vec<TestOutcome>,
    pub elapsed_ms: u64,
}

impl TestReport {
    pub fn executed(&self) -> impl Iterator<Item = &SurfaceResult> {
        self.surfaces.iter().filter(|s| s.status.executed())
    }
}

// ============================================================================
// Findings
// ============================================================================

/// Normalized, prioritized issue routed into the next round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub priority: Priority,
    pub fix_category: FixCategory,
    pub source: Probe,
}

impl Finding {
    pub fn from_issue(issue: &Issue, priority: Priority, source: Probe) -> Self {
        Self {
            file: issue.file.clone(),
            line: issue.line,
            severity: issue.severity,
            category: issue.category,
            message: issue.message.clone(),
            suggestion: issue.suggestion.clone(),
            priority,
            fix_category: issue.category.fix_category(),
            source,
        }
    }

    /// Dedup identity: `(file, category, message)`
    pub fn key(&self) -> (Option<&str>, Category, &str) {
        (self.file.as_deref(), self.category, self.message.as_str())
    }
}

/// Per-probe scores in `0.0..=1.0`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub validation: f64,
    pub build: f64,
    pub test: f64,
    pub overall: f64,
}

/// Everything recorded about one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u32,
    #[serde(default)]
    pub validation: Option<ValidationReport>,
    #[serde(default)]
    pub compilation: Option<CompilationReport>,
    #[serde(default)]
    pub test: Option<TestReport>,
    pub findings: Vec<Finding>,
    pub success: bool,
    #[serde(default)]
    pub scores: Option<Scores>,
    #[serde(default)]
    pub next_iteration_focus: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Internal failure that cut the round short
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RoundReport {
    /// A round whose generator step failed before verification ran
    pub fn internal_failure(round: u32, error: impl Into<String>, carried: Vec<Finding>) -> Self {
        let error = error.into();
        let mut findings = vec![Finding {
            file: None,
            line: None,
            severity: Severity::Error,
            category: Category::Internal,
            message: error.clone(),
            suggestion: None,
            priority: Priority::High,
            fix_category: FixCategory::General,
            source: Probe::Generator,
        }];
        findings.extend(carried.into_iter().filter(|f| f.category != Category::Internal));
        Self {
            round,
            validation: None,
            compilation: None,
            test: None,
            findings,
            success: false,
            scores: None,
            next_iteration_focus: Vec::new(),
            recommendations: Vec::new(),
            error: Some(error),
            created_at: Utc::now(),
        }
    }

    /// A round stopped after its artifacts were merged. Keeps the
    /// round number taken and carries the known findings forward.
    pub fn interrupted(round: u32, carried: Vec<Finding>) -> Self {
        Self {
            round,
            validation: None,
            compilation: None,
            test: None,
            findings: carried,
            success: false,
            scores: None,
            next_iteration_focus: Vec::new(),
            recommendations: Vec::new(),
            error: Some("Stopped before verification finished".to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_set_overlay() {
        let mut base: ArtifactSet = [("a.txt", "one"), ("b.txt", "two")].into_iter().collect();
        let update: ArtifactSet = [("b.txt", "TWO"), ("c.txt", "three")].into_iter().collect();
        base.overlay(&update);

        assert_eq!(base.len(), 3);
        assert_eq!(base.get("a.txt"), Some("one"));
        assert_eq!(base.get("b.txt"), Some("TWO"));
    }

    #[test]
    fn test_artifact_set_serializes_as_map() {
        let set: ArtifactSet = [("src/main.py", "print(1)")].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"src/main.py":"print(1)"}"#);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn test_category_routing() {
        assert_eq!(Category::Import.fix_category(), FixCategory::Imports);
        assert_eq!(Category::Internal.fix_category(), FixCategory::General);
        assert_eq!(FixCategory::Dependencies.focus_label(), "dependency_management");
    }

    #[test]
    fn test_issue_serialization() {
        let issue = Issue::error(Category::Syntax, "Invalid JSON")
            .in_file("config/app.json")
            .at_line(3);
        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("\"severity\":\"error\""));
        assert!(json.contains("\"category\":\"syntax\""));
        assert!(!json.contains("suggestion"));
    }

    #[test]
    fn test_internal_failure_report() {
        let carried = vec![Finding::from_issue(
            &Issue::error(Category::Build, "npm install failed"),
            Priority::High,
            Probe::Build,
        )];
        let report = RoundReport::internal_failure(2, "generator timed out after 5s", carried);
        assert!(!report.success);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.findings[0].category, Category::Internal);
        assert!(report.validation.is_none());
    }
}
