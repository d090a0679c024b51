//! # Test Executor
//!
//! Finds test suites in a materialized project, groups them by surface
//! and runner, and executes each group with its native framework.
//!
//! ## Surfaces
//!
//! - `service`: pytest modules, Rust integration tests, JS/TS tests under
//!   `server/`, `backend/` or `api/`
//! - `client`: remaining `*.test.*` / `*.spec.*` / `__tests__` files
//! - `end_to_end`: anything under `e2e/`, Cypress or Playwright suites
//!
//! A surface whose runner or environment is unavailable is recorded as
//! skipped with a reason instead of failing the run.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use super::terminal::{
    first_available, run_command, tail_lines, tool_available, truncate_head_tail, CommandSpec,
};
use crate::cancel::CancellationToken;
use crate::config::{EnvPolicy, TestConfig};
use crate::models::{
    Category, Issue, SurfaceResult, SurfaceStatus, TestCounts, TestOutcome, TestReport,
    TestSurface,
};

const MAX_OUTCOMES: usize = 20;
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".venv",
    "target",
    ".git",
    "dist",
    "build",
    "__pycache__",
];

static COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s+(passed|failed|passing|failing|errors?|total)").expect("valid regex")
});
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\bin\s+|Time:\s+|finished in\s+|\()([\d.]+)\s*m?s\b").expect("valid regex")
});
static CARGO_RESULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed").expect("valid regex")
});
static PYTEST_FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:FAILED|ERROR) ([^\s:]+)(?:::(\S+))?(?: - (.+))?$").expect("valid regex")
});
static CARGO_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^test (\S+) \.\.\. FAILED$").expect("valid regex"));
static JEST_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^●\s+(.+)$").expect("valid regex"));
static JEST_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^FAIL\s+(\S+)").expect("valid regex"));

// ============================================================================
// Discovery
// ============================================================================

/// Framework used to run a group of tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Runner {
    Pytest,
    Cargo,
    Npm,
    Playwright,
    Cypress,
}

impl Runner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runner::Pytest => "pytest",
            Runner::Cargo => "cargo",
            Runner::Npm => "npm",
            Runner::Playwright => "playwright",
            Runner::Cypress => "cypress",
        }
    }

    fn manifests(&self) -> &'static [&'static str] {
        match self {
            Runner::Pytest => &["pyproject.toml", "requirements.txt", "setup.py"],
            Runner::Cargo => &["Cargo.toml"],
            Runner::Npm | Runner::Playwright | Runner::Cypress => &["package.json"],
        }
    }
}

/// Tests sharing a surface, runner and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub surface: TestSurface,
    pub runner: Runner,
    pub dir: String,
    pub files: Vec<String>,
}

fn is_script(name: &str) -> bool {
    [".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Surface and runner for one relative path, if it is a test file
pub fn classify(path: &str) -> Option<(TestSurface, Runner)> {
    let lower = path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    let segments: Vec<&str> = lower.split('/').collect();
    let dirs = &segments[..segments.len() - 1];

    if is_script(name) {
        let in_cypress_specs = dirs
            .iter()
            .position(|d| *d == "cypress")
            .is_some_and(|i| dirs[i + 1..].contains(&"e2e"));
        let is_cypress = in_cypress_specs || name.contains(".cy.");
        if is_cypress {
            return Some((TestSurface::EndToEnd, Runner::Cypress));
        }
        let is_test = name.contains(".test.") || name.contains(".spec.") || dirs.contains(&"__tests__");
        let is_e2e = dirs.iter().any(|d| *d == "e2e" || d.contains("playwright"));
        if is_e2e && is_test {
            return Some((TestSurface::EndToEnd, Runner::Playwright));
        }
        if is_test {
            let service = dirs.iter().any(|d| matches!(*d, "server" | "backend" | "api"));
            let surface = if service {
                TestSurface::Service
            } else {
                TestSurface::Client
            };
            return Some((surface, Runner::Npm));
        }
        return None;
    }

    if let Some(stem) = name.strip_suffix(".py") {
        if stem == "conftest" || stem == "__init__" {
            return None;
        }
        if stem.starts_with("test_") || stem.ends_with("_test") {
            let surface = if dirs.contains(&"e2e") {
                TestSurface::EndToEnd
            } else {
                TestSurface::Service
            };
            return Some((surface, Runner::Pytest));
        }
        return None;
    }

    if name.ends_with(".rs") && dirs.last() == Some(&"tests") {
        return Some((TestSurface::Service, Runner::Cargo));
    }
    None
}

/// Nearest ancestor directory of `path` holding one of `manifests`
fn owning_dir(root: &Path, path: &str, manifests: &[&str]) -> String {
    let mut dir = path.rsplit_once('/').map_or("", |(d, _)| d);
    loop {
        if manifests.iter().any(|m| root.join(dir).join(m).is_file()) {
            return dir.to_string();
        }
        match dir.rsplit_once('/') {
            Some((parent, _)) => dir = parent,
            None if !dir.is_empty() => dir = "",
            None => return String::new(),
        }
    }
}

/// Group the test files under `root`
pub fn discover(root: &Path) -> Vec<TestGroup> {
    let mut groups: BTreeMap<(TestSurface, Runner, String), Vec<String>> = BTreeMap::new();
    // Skips .gitignore'd paths
    let files = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|e| !e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
        .build()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()));

    for entry in files {
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if let Some((surface, runner)) = classify(&rel) {
            let dir = owning_dir(root, &rel, runner.manifests());
            groups.entry((surface, runner, dir)).or_default().push(rel);
        }
    }

    let mut merged: Vec<TestGroup> = Vec::new();
    for ((surface, runner, dir), files) in groups {
        // `npm test` runs the whole package: one group per package dir,
        // labelled with its first surface
        if runner == Runner::Npm {
            if let Some(existing) = merged
                .iter_mut()
                .find(|g| g.runner == Runner::Npm && g.dir == dir)
            {
                existing.files.extend(files);
                existing.files.sort();
                continue;
            }
        }
        merged.push(TestGroup {
            surface,
            runner,
            dir,
            files,
        });
    }
    merged
}

// ============================================================================
// Executor
// ============================================================================

/// Runs discovered test suites
#[derive(Debug, Clone, Default)]
pub struct TestExecutor {
    config: TestConfig,
    env: EnvPolicy,
}

impl TestExecutor {
    pub fn new(config: TestConfig, env: EnvPolicy) -> Self {
        Self { config, env }
    }

    #[tracing::instrument(skip(self, cancel), fields(dir = %dir.display()))]
    pub async fn run(&self, dir: &Path, cancel: &CancellationToken) -> TestReport {
        let started = Instant::now();
        let environment_ready = dir.is_dir() && !cancel.is_cancelled();
        let groups = if environment_ready {
            discover(dir)
        } else {
            Vec::new()
        };

        let mut surfaces = Vec::new();
        let mut outcomes: Vec<TestOutcome> = Vec::new();
        for group in groups {
            if cancel.is_cancelled() {
                surfaces.push(skipped(&group, "run cancelled"));
                continue;
            }
            let (result, failed) = self.run_group(dir, &group).await;
            tracing::info!(
                surface = group.surface.as_str(),
                runner = group.runner.as_str(),
                status = ?result.status,
                passed = result.counts.passed,
                failed = result.counts.failed,
                "Test surface finished"
            );
            outcomes.extend(failed);
            surfaces.push(result);
        }
        outcomes.truncate(MAX_OUTCOMES);

        let executed: Vec<&SurfaceResult> =
            surfaces.iter().filter(|s| s.status.executed()).collect();
        let success = if executed.is_empty() {
            environment_ready && self.config.no_tests_is_success && !cancel.is_cancelled()
        } else {
            executed.iter().all(|s| s.status == SurfaceStatus::Passed)
        };

        TestReport {
            success,
            environment_ready,
            surfaces,
            outcomes,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn run_group(&self, root: &Path, group: &TestGroup) -> (SurfaceResult, Vec<TestOutcome>) {
        let cwd = root.join(&group.dir);
        let spec = match self.command_for(&cwd, group).await {
            Ok(spec) => spec,
            Err(reason) => return (skipped(group, &reason), Vec::new()),
        };

        let outcome = run_command(&spec, &self.env).await;
        if let Some(reason) = outcome.spawn_error {
            return (skipped(group, &reason), Vec::new());
        }

        let counts = parse_counts(&outcome.output);
        let status = if outcome.timed_out {
            SurfaceStatus::TimedOut
        } else if outcome.exit_code == Some(0) {
            SurfaceStatus::Passed
        } else if group.runner == Runner::Pytest && outcome.exit_code == Some(5) {
            return (skipped(group, "no tests collected"), Vec::new());
        } else {
            SurfaceStatus::Failed
        };

        let mut failed = Vec::new();
        match status {
            SurfaceStatus::TimedOut => failed.push(
                Issue::error(
                    Category::Test,
                    format!(
                        "{} tests timed out after {}s",
                        group.surface.as_str(),
                        self.config.surface_timeout_secs
                    ),
                )
                .with_suggestion("Look for hanging tests or servers that never exit"),
            ),
            SurfaceStatus::Failed => {
                failed = failed_tests(&outcome.output, &group.dir);
                if failed.is_empty() {
                    failed.push(Issue::error(
                        Category::Test,
                        format!(
                            "{} tests failed:\n{}",
                            group.surface.as_str(),
                            tail_lines(&outcome.output, 8)
                        ),
                    ));
                }
            }
            _ => {}
        }

        let result = SurfaceResult {
            surface: group.surface,
            runner: group.runner.as_str().to_string(),
            dir: group.dir.clone(),
            files: group.files.clone(),
            status,
            counts,
            command: Some(outcome.command),
            skip_reason: None,
            output: truncate_head_tail(&outcome.output, self.config.max_output_chars),
        };
        (result, failed)
    }

    /// Command for a group, or the reason it cannot run here
    async fn command_for(&self, cwd: &Path, group: &TestGroup) -> Result<CommandSpec, String> {
        let timeout = Duration::from_secs(self.config.surface_timeout_secs);
        match group.runner {
            Runner::Pytest => {
                let venv = cwd.join(".venv").join("bin").join("python");
                let python = if venv.is_file() {
                    venv.to_string_lossy().to_string()
                } else {
                    first_available(&["python3", "python"])
                        .ok_or("python is not installed")?
                        .to_string()
                };
                let probe = CommandSpec::new(python.as_str(), cwd, Duration::from_secs(60))
                    .args(["-m", "pytest", "--version"]);
                if !run_command(&probe, &self.env).await.success() {
                    return Err("pytest is not installed".into());
                }
                // Surfaces sharing a directory each run only their own files
                Ok(CommandSpec::new(python, cwd, timeout)
                    .args(["-m", "pytest", "-q", "--tb=short", "-p", "no:cacheprovider"])
                    .args(relative_files(group)))
            }
            Runner::Cargo => {
                if !tool_available("cargo") {
                    return Err("cargo is not installed".into());
                }
                Ok(CommandSpec::new("cargo", cwd, timeout).args(["test", "--no-fail-fast"]))
            }
            Runner::Npm => {
                node_ready(cwd)?;
                let script = test_script(cwd).ok_or("package.json declares no test script")?;
                if script.contains("no test specified") {
                    return Err("package.json declares no test script".into());
                }
                let mut spec = CommandSpec::new("npm", cwd, timeout).args(["test"]);
                if script.contains("jest") || script.contains("react-scripts") {
                    spec = spec.args(["--", "--watchAll=false"]);
                } else if script.contains("vitest") && !script.contains("--run") {
                    spec = spec.args(["--", "--run"]);
                }
                Ok(spec)
            }
            Runner::Playwright => {
                node_ready(cwd)?;
                Ok(CommandSpec::new("npx", cwd, timeout).args([
                    "--no-install",
                    "playwright",
                    "test",
                    "--reporter=line",
                ]))
            }
            Runner::Cypress => {
                node_ready(cwd)?;
                Ok(CommandSpec::new("npx", cwd, timeout).args(["--no-install", "cypress", "run"]))
            }
        }
    }
}

/// Group files relative to the group's directory
fn relative_files(group: &TestGroup) -> Vec<String> {
    let prefix = format!("{}/", group.dir);
    group
        .files
        .iter()
        .map(|f| {
            if group.dir.is_empty() {
                f.clone()
            } else {
                f.strip_prefix(&prefix).unwrap_or(f).to_string()
            }
        })
        .collect()
}

fn node_ready(cwd: &Path) -> Result<(), String> {
    if !tool_available("npm") {
        return Err("npm is not installed".into());
    }
    if !cwd.join("node_modules").is_dir() {
        return Err("dependencies are not installed".into());
    }
    Ok(())
}

fn test_script(cwd: &Path) -> Option<String> {
    let manifest = std::fs::read_to_string(cwd.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    value
        .get("scripts")?
        .get("test")?
        .as_str()
        .map(str::to_string)
}

fn skipped(group: &TestGroup, reason: &str) -> SurfaceResult {
    tracing::info!(
        surface = group.surface.as_str(),
        runner = group.runner.as_str(),
        reason,
        "Test surface skipped"
    );
    SurfaceResult {
        surface: group.surface,
        runner: group.runner.as_str().to_string(),
        dir: group.dir.clone(),
        files: group.files.clone(),
        status: SurfaceStatus::Skipped,
        counts: TestCounts::default(),
        command: None,
        skip_reason: Some(reason.to_string()),
        output: String::new(),
    }
}

// ============================================================================
// Output parsing
// ============================================================================

/// Counts from whichever framework summary appears in `output`
pub fn parse_counts(output: &str) -> TestCounts {
    let mut counts = TestCounts::default();

    // cargo prints one result line per test binary
    let cargo: Vec<_> = CARGO_RESULT.captures_iter(output).collect();
    if !cargo.is_empty() {
        for caps in cargo {
            counts.passed += caps[1].parse::<u32>().unwrap_or(0);
            counts.failed += caps[2].parse::<u32>().unwrap_or(0);
        }
        counts.run = counts.passed + counts.failed;
        counts.duration_secs = parse_duration(output);
        return counts;
    }

    // jest "Tests:", vitest "Tests", pytest "=== ... in 0.1s ===", mocha
    // "N passing", playwright "N passed (1.2s)": take the last summary line
    let summary = output.lines().rev().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        let mentions = lower.contains("passed")
            || lower.contains("failed")
            || lower.contains("passing")
            || lower.contains("failing");
        mentions
            && (lower.starts_with("tests")
                || lower.starts_with('=')
                || COUNT.is_match(line) && !lower.starts_with("test suites"))
    });
    let Some(summary) = summary else {
        return counts;
    };

    let mut total = None;
    for caps in COUNT.captures_iter(summary) {
        let n: u32 = caps[1].parse().unwrap_or(0);
        match &caps[2] {
            "passed" | "passing" => counts.passed += n,
            "failed" | "failing" | "error" | "errors" => counts.failed += n,
            "total" => total = Some(n),
            _ => {}
        }
    }
    // mocha prints passing and failing on separate lines
    if summary.contains("passing") || summary.contains("failing") {
        for line in output.lines().map(str::trim) {
            if line == summary {
                continue;
            }
            if let Some(caps) = COUNT.captures(line) {
                if line.starts_with(&caps[0]) {
                    let n: u32 = caps[1].parse().unwrap_or(0);
                    match &caps[2] {
                        "passing" => counts.passed += n,
                        "failing" => counts.failed += n,
                        _ => {}
                    }
                }
            }
        }
    }
    counts.run = total.unwrap_or(counts.passed + counts.failed);
    counts.duration_secs = parse_duration(output);
    counts
}

fn parse_duration(output: &str) -> Option<f64> {
    output.lines().rev().find_map(|line| {
        let caps = DURATION.captures(line)?;
        let value: f64 = caps[1].parse().ok()?;
        let millis = caps[0].trim_end_matches(')').trim_end().ends_with("ms");
        Some(if millis { value / 1000.0 } else { value })
    })
}

/// Names of failing tests, as findings
pub fn failed_tests(output: &str, dir: &str) -> Vec<TestOutcome> {
    let prefix = |file: &str| {
        if dir.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", dir, file)
        }
    };
    let mut outcomes = Vec::new();
    let mut jest_file: Option<String> = None;

    for line in output.lines().map(str::trim) {
        if let Some(caps) = PYTEST_FAILED.captures(line) {
            let name = caps.get(2).map_or(&caps[1], |m| m.as_str());
            let reason = caps.get(3).map_or("", |m| m.as_str());
            let message = if reason.is_empty() {
                format!("Test {} failed", name)
            } else {
                format!("Test {} failed: {}", name, reason)
            };
            outcomes.push(Issue::error(Category::Test, message).in_file(prefix(&caps[1])));
        } else if let Some(caps) = CARGO_FAILED.captures(line) {
            outcomes.push(Issue::error(Category::Test, format!("Test {} failed", &caps[1])));
        } else if let Some(caps) = JEST_FILE.captures(line) {
            jest_file = Some(prefix(&caps[1]));
        } else if let Some(caps) = JEST_FAILED.captures(line) {
            let mut issue = Issue::error(Category::Test, format!("Test {} failed", caps[1].trim()));
            if let Some(file) = &jest_file {
                issue = issue.in_file(file.as_str());
            }
            outcomes.push(issue);
        }
        if outcomes.len() >= MAX_OUTCOMES {
            break;
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("tests/test_api.py"),
            Some((TestSurface::Service, Runner::Pytest))
        );
        assert_eq!(
            classify("src/App.test.jsx"),
            Some((TestSurface::Client, Runner::Npm))
        );
        assert_eq!(
            classify("server/routes/__tests__/users.js"),
            Some((TestSurface::Service, Runner::Npm))
        );
        assert_eq!(
            classify("e2e/login.spec.ts"),
            Some((TestSurface::EndToEnd, Runner::Playwright))
        );
        assert_eq!(
            classify("cypress/e2e/home.cy.js"),
            Some((TestSurface::EndToEnd, Runner::Cypress))
        );
        assert_eq!(
            classify("cypress/e2e/checkout.js"),
            Some((TestSurface::EndToEnd, Runner::Cypress))
        );
        assert_eq!(classify("cypress/support/commands.js"), None);
        assert_eq!(classify("cypress/plugins/index.js"), None);
        assert_eq!(classify("cypress.config.js"), None);
        assert_eq!(classify("tests/smoke.rs"), Some((TestSurface::Service, Runner::Cargo)));
        assert_eq!(classify("tests/conftest.py"), None);
        assert_eq!(classify("src/index.js"), None);
    }

    #[test]
    fn test_discover_groups_by_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("backend/tests")).unwrap();
        std::fs::create_dir_all(root.join("frontend/src")).unwrap();
        std::fs::create_dir_all(root.join("frontend/node_modules/x")).unwrap();
        std::fs::write(root.join("backend/requirements.txt"), "pytest\n").unwrap();
        std::fs::write(root.join("backend/tests/test_app.py"), "").unwrap();
        std::fs::write(root.join("frontend/package.json"), "{}").unwrap();
        std::fs::write(root.join("frontend/src/App.test.js"), "").unwrap();
        std::fs::write(root.join("frontend/node_modules/x/a.test.js"), "").unwrap();

        let groups = discover(root);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].surface, TestSurface::Service);
        assert_eq!(groups[0].dir, "backend");
        assert_eq!(groups[1].surface, TestSurface::Client);
        assert_eq!(groups[1].dir, "frontend");
        assert_eq!(groups[1].files, vec!["frontend/src/App.test.js".to_string()]);
    }

    #[test]
    fn test_one_npm_group_per_package() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("server")).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("cypress/support")).unwrap();
        std::fs::write(root.join("package.json"), r#"{"scripts": {"test": "jest"}}"#).unwrap();
        std::fs::write(root.join("server/api.test.js"), "").unwrap();
        std::fs::write(root.join("src/App.test.jsx"), "").unwrap();
        std::fs::write(root.join("cypress/support/commands.js"), "").unwrap();

        let groups = discover(root);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].runner, Runner::Npm);
        assert_eq!(groups[0].surface, TestSurface::Service);
        assert_eq!(
            groups[0].files,
            vec!["server/api.test.js".to_string(), "src/App.test.jsx".to_string()]
        );
    }

    #[tokio::test]
    async fn test_shared_package_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("backend")).unwrap();
        std::fs::write(root.join("package.json"), r#"{"scripts": {"test": "jest"}}"#).unwrap();
        std::fs::write(root.join("backend/users.test.js"), "").unwrap();
        std::fs::write(root.join("App.test.js"), "").unwrap();

        let report = TestExecutor::default()
            .run(root, &CancellationToken::new())
            .await;
        assert_eq!(report.surfaces.len(), 1);
        assert_eq!(report.surfaces[0].files.len(), 2);
    }

    #[test]
    fn test_pytest_files_relative_to_group() {
        let group = TestGroup {
            surface: TestSurface::EndToEnd,
            runner: Runner::Pytest,
            dir: "backend".into(),
            files: vec!["backend/e2e/test_flow.py".into()],
        };
        assert_eq!(relative_files(&group), vec!["e2e/test_flow.py".to_string()]);
    }

    #[test]
    fn test_parse_jest() {
        let out = "Test Suites: 1 failed, 1 passed, 2 total\nTests:       1 failed, 4 passed, 5 total\nTime:        1.5 s\n";
        let counts = parse_counts(out);
        assert_eq!(counts.run, 5);
        assert_eq!(counts.passed, 4);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.duration_secs, Some(1.5));
    }

    #[test]
    fn test_parse_pytest() {
        let out = "..F\nFAILED tests/test_app.py::test_home - assert 404 == 200\n1 failed, 2 passed in 0.12s\n";
        let counts = parse_counts(out);
        assert_eq!((counts.run, counts.passed, counts.failed), (3, 2, 1));
        assert_eq!(counts.duration_secs, Some(0.12));

        let failed = failed_tests(out, "backend");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].file.as_deref(), Some("backend/tests/test_app.py"));
        assert!(failed[0].message.contains("test_home"));
    }

    #[test]
    fn test_parse_cargo_sums_binaries() {
        let out = "test a ... ok\ntest b ... FAILED\ntest result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.01s\n\
                   test result: ok. 3 passed; 0 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.02s\n";
        let counts = parse_counts(out);
        assert_eq!((counts.run, counts.passed, counts.failed), (5, 4, 1));
        let failed = failed_tests(out, "");
        assert_eq!(failed.len(), 1);
        assert!(failed[0].message.contains("b"));
    }

    #[test]
    fn test_parse_mocha() {
        let out = "  3 passing (20ms)\n  1 failing\n";
        let counts = parse_counts(out);
        assert_eq!((counts.run, counts.passed, counts.failed), (4, 3, 1));
    }

    #[test]
    fn test_parse_nothing() {
        assert_eq!(parse_counts("no summary here"), TestCounts::default());
    }

    #[test]
    fn test_jest_failure_names() {
        let out = "FAIL src/App.test.js\n  ● App › renders title\n";
        let failed = failed_tests(out, "frontend");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].file.as_deref(), Some("frontend/src/App.test.js"));
    }

    #[tokio::test]
    async fn test_no_tests_is_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let report = TestExecutor::default()
            .run(dir.path(), &CancellationToken::new())
            .await;
        assert!(report.success);
        assert!(report.environment_ready);
        assert!(report.surfaces.is_empty());

        let strict = TestExecutor::new(
            TestConfig {
                no_tests_is_success: false,
                ..TestConfig::default()
            },
            EnvPolicy::default(),
        );
        assert!(!strict.run(dir.path(), &CancellationToken::new()).await.success);
    }

    #[tokio::test]
    async fn test_missing_dependencies_skip_surface() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"test": "jest"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("App.test.js"), "test('x', () => {});").unwrap();
        let report = TestExecutor::default()
            .run(dir.path(), &CancellationToken::new())
            .await;
        assert_eq!(report.surfaces.len(), 1);
        assert_eq!(report.surfaces[0].status, SurfaceStatus::Skipped);
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_missing_directory_not_ready() {
        let report = TestExecutor::default()
            .run(Path::new("/nonexistent/crucible"), &CancellationToken::new())
            .await;
        assert!(!report.environment_ready);
        assert!(!report.success);
    }
}
