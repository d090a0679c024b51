//! # Analyzer
//!
//! Folds the three probe reports of a round into one `RoundReport`:
//! per-probe scores, the success verdict, a ranked and deduplicated
//! findings list, next-round focus labels and recommendations.
//!
//! ## Ranking
//!
//! 1. `high`: validation and build errors (plus rejected artifact paths)
//! 2. `medium`: failed tests
//! 3. `low`: everything else (warnings, info)
//!
//! The sort is stable, so findings keep probe order within a priority.
//! Duplicate `(file, category, message)` tuples keep their first occurrence.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};

use crate::models::{
    Category, CompilationReport, Finding, FixCategory, Priority, Probe, RoundReport, Scores,
    Severity, SurfaceStatus, TestReport, ValidationReport,
};

/// Number of focus labels handed to the next round
pub const MAX_FOCUS: usize = 3;
const DEFAULT_FOCUS: &str = "general_improvements";

/// Turns probe reports into a round verdict
#[derive(Debug, Clone)]
pub struct Analyzer {
    threshold: f64,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl Analyzer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Analyze one fully verified round.
    ///
    /// `store_findings` carries problems the store raised while merging
    /// (rejected paths); they rank with the blocking errors.
    #[tracing::instrument(skip_all, fields(round = round))]
    pub fn analyze(
        &self,
        round: u32,
        validation: ValidationReport,
        compilation: CompilationReport,
        test: TestReport,
        store_findings: Vec<Finding>,
    ) -> RoundReport {
        let scores = score(&validation, &compilation, &test);
        let success = !validation.has_errors()
            && compilation.success
            && scores.overall >= self.threshold;

        let findings = rank(collect_findings(&validation, &compilation, &test, store_findings));
        let next_iteration_focus = focus(&findings);
        let recommendations = recommend(&validation, &compilation, &test, &findings);

        tracing::info!(
            round,
            success,
            overall = scores.overall,
            findings = findings.len(),
            "Round analyzed"
        );

        RoundReport {
            round,
            validation: Some(validation),
            compilation: Some(compilation),
            test: Some(test),
            findings,
            success,
            scores: Some(scores),
            next_iteration_focus,
            recommendations,
            error: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Scores
// ============================================================================

/// Per-probe scores and their mean
pub fn score(
    validation: &ValidationReport,
    compilation: &CompilationReport,
    test: &TestReport,
) -> Scores {
    let validation_score =
        1.0 - validation.error_count() as f64 / validation.issues.len().max(1) as f64;
    let build_score = if compilation.success { 1.0 } else { 0.5 };
    let test_score = test_score(test);
    Scores {
        validation: validation_score,
        build: build_score,
        test: test_score,
        overall: (validation_score + build_score + test_score) / 3.0,
    }
}

fn test_score(test: &TestReport) -> f64 {
    let executed: Vec<_> = test.executed().collect();
    if executed.is_empty() {
        return if test.success { 1.0 } else { 0.0 };
    }
    let (run, passed) = executed
        .iter()
        .fold((0u32, 0u32), |(r, p), s| (r + s.counts.run, p + s.counts.passed));
    if run > 0 {
        return f64::from(passed.min(run)) / f64::from(run);
    }
    // Surfaces ran but printed no parsable counts
    let passed = executed
        .iter()
        .filter(|s| s.status == SurfaceStatus::Passed)
        .count();
    passed as f64 / executed.len() as f64
}

// ============================================================================
// Findings
// ============================================================================

fn collect_findings(
    validation: &ValidationReport,
    compilation: &CompilationReport,
    test: &TestReport,
    store_findings: Vec<Finding>,
) -> Vec<Finding> {
    let blocking = |severity: Severity| {
        if severity == Severity::Error {
            Priority::High
        } else {
            Priority::Low
        }
    };

    let mut findings = store_findings;
    findings.extend(
        validation
            .issues
            .iter()
            .map(|i| Finding::from_issue(i, blocking(i.severity), Probe::Validation)),
    );
    findings.extend(
        compilation
            .errors
            .iter()
            .chain(&compilation.warnings)
            .map(|i| Finding::from_issue(i, blocking(i.severity), Probe::Build)),
    );
    findings.extend(test.outcomes.iter().map(|i| {
        let priority = if i.severity == Severity::Error {
            Priority::Medium
        } else {
            Priority::Low
        };
        Finding::from_issue(i, priority, Probe::Test)
    }));
    findings
}

/// Stable priority sort, then drop repeated `(file, category, message)`
pub fn rank(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.sort_by_key(|f| f.priority);
    let mut seen = HashSet::new();
    findings.retain(|f| {
        let (file, category, message) = f.key();
        seen.insert((file.map(str::to_string), category, message.to_string()))
    });
    findings
}

/// Up to three focus labels, most frequent fix category first.
/// Ties go to the category that appears first in ranked order.
pub fn focus(findings: &[Finding]) -> Vec<String> {
    let mut counts: BTreeMap<FixCategory, (usize, usize)> = BTreeMap::new();
    for (idx, finding) in findings.iter().enumerate() {
        let entry = counts.entry(finding.fix_category).or_insert((0, idx));
        entry.0 += 1;
    }
    let mut ordered: Vec<(FixCategory, usize, usize)> =
        counts.into_iter().map(|(c, (n, first))| (c, n, first)).collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let mut labels: Vec<String> = Vec::new();
    for (category, _, _) in ordered {
        let label = category.focus_label();
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
        if labels.len() == MAX_FOCUS {
            break;
        }
    }
    if labels.is_empty() {
        labels.push(DEFAULT_FOCUS.to_string());
    }
    labels
}

// ============================================================================
// Recommendations
// ============================================================================

fn recommend(
    validation: &ValidationReport,
    compilation: &CompilationReport,
    test: &TestReport,
    findings: &[Finding],
) -> Vec<String> {
    let mut out = Vec::new();
    let errors_in = |category: Category| {
        findings
            .iter()
            .filter(|f| f.severity == Severity::Error && f.category == category)
            .count()
    };

    let syntax = errors_in(Category::Syntax);
    if syntax > 0 {
        out.push(format!("Fix {} syntax error(s) first; they prevent execution", syntax));
    }
    let imports = errors_in(Category::Import);
    if imports > 0 {
        out.push(format!("Fix {} unresolved import(s); check file paths", imports));
    }
    if validation.error_count() > 5 {
        out.push("Consider breaking down large files with many errors".to_string());
    }
    if !compilation.dependencies_installed {
        out.push("Dependencies failed to install; check package names and versions".to_string());
    } else if errors_in(Category::Dependency) > 0 {
        out.push(format!(
            "Resolve {} dependency issue(s) in the manifests",
            errors_in(Category::Dependency)
        ));
    }
    let build = errors_in(Category::Build);
    if build > 0 {
        out.push(format!("Resolve {} build error(s)", build));
    }
    if findings.iter().any(|f| f.category == Category::Structure) {
        out.push("Add the missing manifests or entry points".to_string());
    }
    for surface in &test.surfaces {
        match surface.status {
            SurfaceStatus::Failed => {
                out.push(format!("Fix failing {} tests", surface.surface.as_str()))
            }
            SurfaceStatus::TimedOut => out.push(format!(
                "Make {} tests finish within the time limit",
                surface.surface.as_str()
            )),
            _ => {}
        }
    }
    let high = findings.iter().filter(|f| f.priority == Priority::High).count();
    if high > 10 {
        out.push("Focus on the top 5 critical findings first to make progress".to_string());
    }
    if out.is_empty() {
        out.push("Project looks healthy; consider adding more comprehensive tests".to_string());
    }
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Issue, ProjectShape, ShapeKind, SurfaceResult, TestCounts, TestSurface};
    use proptest::prelude::*;

    fn passing_build() -> CompilationReport {
        CompilationReport {
            success: true,
            shape: ProjectShape {
                kind: ShapeKind::Static,
                components: Vec::new(),
                container: None,
            },
            dependencies_installed: true,
            steps: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn no_tests(success: bool) -> TestReport {
        TestReport {
            success,
            environment_ready: true,
            surfaces: Vec::new(),
            outcomes: Vec::new(),
            elapsed_ms: 0,
        }
    }

    fn surface(status: SurfaceStatus, run: u32, passed: u32) -> SurfaceResult {
        SurfaceResult {
            surface: TestSurface::Service,
            runner: "pytest".into(),
            dir: String::new(),
            files: vec!["tests/test_app.py".into()],
            status,
            counts: TestCounts {
                run,
                passed,
                failed: run - passed,
                duration_secs: None,
            },
            command: None,
            skip_reason: None,
            output: String::new(),
        }
    }

    #[test]
    fn test_clean_round_succeeds() {
        let report = Analyzer::default().analyze(
            1,
            ValidationReport::default(),
            passing_build(),
            no_tests(true),
            Vec::new(),
        );
        assert!(report.success);
        assert_eq!(report.scores.as_ref().map(|s| s.overall), Some(1.0));
        assert_eq!(report.next_iteration_focus, vec![DEFAULT_FOCUS.to_string()]);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_validation_error_blocks_success() {
        let validation = ValidationReport {
            files_checked: 2,
            issues: vec![Issue::error(Category::Syntax, "Invalid JSON").in_file("a.json")],
        };
        let report =
            Analyzer::default().analyze(1, validation, passing_build(), no_tests(true), Vec::new());
        assert!(!report.success);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].priority, Priority::High);
        assert_eq!(report.next_iteration_focus, vec!["syntax_fixes".to_string()]);
    }

    #[test]
    fn test_threshold_applies() {
        let mut test = no_tests(false);
        test.surfaces.push(surface(SurfaceStatus::Failed, 4, 0));
        // 1.0 + 1.0 + 0.0 over three probes is below 0.7
        let report = Analyzer::new(0.7).analyze(
            1,
            ValidationReport::default(),
            passing_build(),
            test.clone(),
            Vec::new(),
        );
        assert!(!report.success);

        let report = Analyzer::new(0.6).analyze(
            1,
            ValidationReport::default(),
            passing_build(),
            test,
            Vec::new(),
        );
        assert!(report.success);
    }

    #[test]
    fn test_test_score_fraction() {
        let mut test = no_tests(false);
        test.surfaces.push(surface(SurfaceStatus::Failed, 4, 3));
        test.surfaces.push(surface(SurfaceStatus::Skipped, 0, 0));
        assert_eq!(test_score(&test), 0.75);
    }

    #[test]
    fn test_build_failure_scores_half() {
        let mut build = passing_build();
        build.success = false;
        build.errors.push(Issue::error(Category::Build, "boom"));
        let scores = score(&ValidationReport::default(), &build, &no_tests(true));
        assert_eq!(scores.build, 0.5);
    }

    #[test]
    fn test_ranking_and_dedup() {
        let validation = ValidationReport {
            files_checked: 1,
            issues: vec![
                Issue::warning(Category::Style, "long line").in_file("a.py"),
                Issue::error(Category::Import, "Unresolved local reference 'x'").in_file("a.py"),
                Issue::error(Category::Import, "Unresolved local reference 'x'").in_file("a.py"),
            ],
        };
        let mut test = no_tests(false);
        test.outcomes.push(Issue::error(Category::Test, "Test t failed"));
        test.surfaces.push(surface(SurfaceStatus::Failed, 1, 0));

        let report = Analyzer::default().analyze(1, validation, passing_build(), test, Vec::new());
        let priorities: Vec<_> = report.findings.iter().map(|f| f.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("failing service tests")));
    }

    #[test]
    fn test_focus_by_frequency() {
        let make = |category: Category| {
            Finding::from_issue(&Issue::error(category, "x"), Priority::High, Probe::Validation)
        };
        let findings = vec![
            make(Category::Syntax),
            make(Category::Import),
            make(Category::Import),
            make(Category::Build),
            make(Category::Style),
            make(Category::Environment),
        ];
        assert_eq!(
            focus(&findings),
            vec!["import_resolution", "syntax_fixes", "build_repair"]
        );
    }

    fn arb_finding() -> impl Strategy<Value = Finding> {
        (
            prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)],
            prop_oneof![Just(Category::Syntax), Just(Category::Test), Just(Category::Style)],
            prop_oneof![Just(None), Just(Some("a.py".to_string()))],
            "[ab]",
        )
            .prop_map(|(priority, category, file, message)| {
                let mut issue = Issue::error(category, message);
                issue.file = file;
                Finding::from_issue(&issue, priority, Probe::Validation)
            })
    }

    proptest! {
        #[test]
        fn prop_rank_orders_and_dedups(findings in proptest::collection::vec(arb_finding(), 0..30)) {
            let ranked = rank(findings);
            prop_assert!(ranked.windows(2).all(|w| w[0].priority <= w[1].priority));
            let mut keys = HashSet::new();
            for f in &ranked {
                prop_assert!(keys.insert(f.key()));
            }
        }
    }
}
