//! # Build Checker
//!
//! Installs dependencies and compiles a materialized project with the
//! toolchains its manifests imply, turning tool output into structured
//! `CompilationError`s.
//!
//! ## Shapes
//!
//! - Static: no manifest at all, nothing to build
//! - Single / Mixed: one or more of Node, Python, Rust, each rooted at the
//!   project root or a first-level directory
//! - Container: a root `Dockerfile`, built last when enabled
//!
//! Every step runs under `min(step timeout, remaining overall budget)`.
//! A missing toolchain is a warning unless `strict_tools` is set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use super::terminal::{
    first_available, run_command, tail_lines, tool_available, CommandOutcome, CommandSpec,
};
use crate::cancel::CancellationToken;
use crate::config::{BuildConfig, EnvPolicy};
use crate::models::{
    BuildStep, Category, CompilationError, CompilationReport, Component, Ecosystem, Issue,
    ProjectShape, Severity, ShapeKind,
};

static TS_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)\((\d+),(\d+)\):\s*error\s+TS(\d+):\s*(.+)$").expect("valid regex")
});
static PY_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("valid regex"));
static PY_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(SyntaxError|IndentationError|TabError|ModuleNotFoundError|ImportError):\s*(.+)$")
        .expect("valid regex")
});
static PIP_MISSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"No matching distribution found for ([^\s]+)").expect("valid regex")
});
static WEBPACK_MISSING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Module not found: Error: Can't resolve '([^']+)'").expect("valid regex")
});

const SKIP_DIRS: &[&str] = &["node_modules", ".venv", "target", ".git", "dist", "build"];

// ============================================================================
// Shape detection
// ============================================================================

fn manifest_ecosystem(name: &str) -> Option<Ecosystem> {
    match name {
        "package.json" => Some(Ecosystem::Node),
        "requirements.txt" | "pyproject.toml" | "setup.py" => Some(Ecosystem::Python),
        "Cargo.toml" => Some(Ecosystem::Rust),
        _ => None,
    }
}

/// Classify a project from its relative file paths.
///
/// Manifests count at the root or one directory down; a container
/// descriptor only at the root.
pub fn detect_shape<'a>(paths: impl IntoIterator<Item = &'a str>) -> ProjectShape {
    let mut components: Vec<Component> = Vec::new();
    let mut container = None;

    for path in paths {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        };
        if dir.contains('/') {
            continue;
        }
        if dir.is_empty() && name == "Dockerfile" {
            container = Some(path.to_string());
        }
        if let Some(ecosystem) = manifest_ecosystem(name) {
            let component = Component {
                ecosystem,
                dir: dir.to_string(),
            };
            if !components.contains(&component) {
                components.push(component);
            }
        }
    }
    components.sort();

    let kind = if container.is_some() {
        ShapeKind::Container
    } else if components.is_empty() {
        ShapeKind::Static
    } else if components.len() == 1 {
        ShapeKind::Single
    } else {
        ShapeKind::Mixed
    };
    ProjectShape {
        kind,
        components,
        container,
    }
}

/// Shape of a project already on disk
pub fn detect_shape_in(root: &Path) -> ProjectShape {
    let paths: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    detect_shape(paths.iter().map(String::as_str))
}

// ============================================================================
// Checker
// ============================================================================

/// Installs and compiles a materialized project
#[derive(Debug, Clone, Default)]
pub struct BuildChecker {
    config: BuildConfig,
    env: EnvPolicy,
}

/// Mutable state of one `check` call
struct BuildRun {
    deadline: Instant,
    steps: Vec<BuildStep>,
    errors: Vec<CompilationError>,
    warnings: Vec<CompilationError>,
    installs_ok: bool,
    budget_exhausted: bool,
}

impl BuildRun {
    fn error(&mut self, issue: Issue) {
        self.errors.push(issue);
    }

    fn warning(&mut self, mut issue: Issue) {
        issue.severity = Severity::Warning;
        self.warnings.push(issue);
    }
}

impl BuildChecker {
    pub fn new(config: BuildConfig, env: EnvPolicy) -> Self {
        Self { config, env }
    }

    /// Build the project rooted at `dir`
    #[tracing::instrument(skip(self, cancel), fields(dir = %dir.display()))]
    pub async fn check(&self, dir: &Path, cancel: &CancellationToken) -> CompilationReport {
        let started = Instant::now();
        let shape = detect_shape_in(dir);
        let mut run = BuildRun {
            deadline: started + Duration::from_secs(self.config.overall_timeout_secs),
            steps: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            installs_ok: true,
            budget_exhausted: false,
        };

        if shape.is_static() {
            tracing::info!("Static project, nothing to build");
        }

        for component in &shape.components {
            if cancel.is_cancelled() {
                break;
            }
            let root = dir.join(&component.dir);
            match component.ecosystem {
                Ecosystem::Node => self.check_node(&root, &component.dir, &mut run, cancel).await,
                Ecosystem::Python => {
                    self.check_python(&root, &component.dir, &mut run, cancel).await
                }
                Ecosystem::Rust => self.check_rust(&root, &component.dir, &mut run, cancel).await,
            }
        }

        if shape.container.is_some() && self.config.container_build && !cancel.is_cancelled() {
            self.check_container(dir, &mut run, cancel).await;
        }

        let success = run.errors.is_empty() && !cancel.is_cancelled();
        let report = CompilationReport {
            success,
            shape,
            dependencies_installed: run.installs_ok,
            steps: run.steps,
            errors: run.errors,
            warnings: run.warnings,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            success = report.success,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            steps = report.steps.len(),
            "Build check complete"
        );
        report
    }

    /// Run one step under the smaller of its own and the remaining budget.
    /// Returns `None` when the step was skipped.
    async fn step(
        &self,
        run: &mut BuildRun,
        cancel: &CancellationToken,
        name: &str,
        spec: CommandSpec,
    ) -> Option<CommandOutcome> {
        let remaining = run.deadline.saturating_duration_since(Instant::now());
        if cancel.is_cancelled() || remaining.is_zero() {
            if remaining.is_zero() && !run.budget_exhausted {
                run.budget_exhausted = true;
                run.error(Issue::error(
                    Category::Build,
                    format!(
                        "Build exceeded the overall budget of {}s",
                        self.config.overall_timeout_secs
                    ),
                ));
            }
            run.steps.push(BuildStep {
                name: name.to_string(),
                command: spec.display(),
                exit_code: None,
                duration_ms: 0,
                timed_out: false,
                skipped: true,
            });
            return None;
        }

        let mut spec = spec;
        spec.timeout = spec.timeout.min(remaining);
        let outcome = run_command(&spec, &self.env).await;
        run.steps.push(BuildStep {
            name: name.to_string(),
            command: outcome.command.clone(),
            exit_code: outcome.exit_code,
            duration_ms: outcome.duration_ms,
            timed_out: outcome.timed_out,
            skipped: false,
        });

        if outcome.timed_out {
            run.error(
                Issue::error(
                    Category::Build,
                    format!("`{}` timed out after {}s", outcome.command, spec.timeout.as_secs()),
                )
                .with_suggestion("Reduce the work this step does or trim dependencies"),
            );
        } else if let Some(reason) = &outcome.spawn_error {
            run.error(Issue::error(
                Category::Environment,
                format!("Could not start `{}`: {}", outcome.command, reason),
            ));
        }
        Some(outcome)
    }

    fn missing_tool(&self, run: &mut BuildRun, tool: &str, component: &str) {
        let issue = Issue::error(
            Category::Environment,
            format!("`{}` is not installed; {} checks skipped", tool, component),
        )
        .with_suggestion(format!("Install {} to verify this component", tool));
        if self.config.strict_tools {
            run.error(issue);
        } else {
            run.warning(issue);
        }
    }

    fn command(&self, secs: u64, cwd: &Path, program: &str) -> CommandSpec {
        CommandSpec::new(program, cwd, Duration::from_secs(secs))
    }

    // ------------------------------------------------------------------------
    // Node
    // ------------------------------------------------------------------------

    async fn check_node(
        &self,
        root: &Path,
        prefix: &str,
        run: &mut BuildRun,
        cancel: &CancellationToken,
    ) {
        if !tool_available("npm") {
            self.missing_tool(run, "npm", "Node");
            return;
        }

        let install = self
            .command(self.config.install_timeout_secs, root, "npm")
            .args(["install", "--no-audit", "--no-fund"]);
        let Some(outcome) = self.step(run, cancel, "npm install", install).await else {
            return;
        };
        if !outcome.success() {
            run.installs_ok = false;
            if !outcome.timed_out && outcome.spawn_error.is_none() {
                let parsed = parse_npm_errors(&outcome.output);
                push_or_generic(run, parsed, &outcome, Category::Dependency);
            }
            return;
        }

        let scripts = read_npm_scripts(root);

        if root.join("tsconfig.json").is_file() {
            let tsc = self
                .command(self.config.build_timeout_secs, root, "npx")
                .args(["--no-install", "tsc", "--noEmit"]);
            if let Some(outcome) = self.step(run, cancel, "typecheck", tsc).await {
                if !outcome.success() && !outcome.timed_out && outcome.spawn_error.is_none() {
                    let parsed = in_component(parse_tsc_errors(&outcome.output), prefix);
                    push_or_generic(run, parsed, &outcome, Category::Build);
                }
            }
        }

        if scripts.iter().any(|s| s == "build") {
            let build = self
                .command(self.config.build_timeout_secs, root, "npm")
                .args(["run", "build"]);
            if let Some(outcome) = self.step(run, cancel, "npm run build", build).await {
                if !outcome.success() && !outcome.timed_out && outcome.spawn_error.is_none() {
                    let parsed = in_component(parse_bundler_errors(&outcome.output), prefix);
                    push_or_generic(run, parsed, &outcome, Category::Build);
                }
            }
        }

        if self.config.run_lint && scripts.iter().any(|s| s == "lint") {
            let lint = self
                .command(self.config.lint_timeout_secs, root, "npm")
                .args(["run", "lint"]);
            let before = run.errors.len();
            if let Some(outcome) = self.step(run, cancel, "npm run lint", lint).await {
                // Lint never blocks a build, even when it times out
                for issue in run.errors.drain(before..).collect::<Vec<_>>() {
                    run.warning(issue);
                }
                if !outcome.success() && !outcome.timed_out {
                    run.warning(
                        Issue::warning(Category::Style, tail_lines(&outcome.output, 5))
                            .with_suggestion("Fix the reported lint problems"),
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Python
    // ------------------------------------------------------------------------

    async fn check_python(
        &self,
        root: &Path,
        prefix: &str,
        run: &mut BuildRun,
        cancel: &CancellationToken,
    ) {
        let Some(python) = first_available(&["python3", "python"]) else {
            self.missing_tool(run, "python3", "Python");
            return;
        };

        let requirements = root.join("requirements.txt").is_file();
        let package = root.join("pyproject.toml").is_file() || root.join("setup.py").is_file();
        if requirements || package {
            let venv = self
                .command(self.config.install_timeout_secs, root, python)
                .args(["-m", "venv", ".venv"]);
            let Some(outcome) = self.step(run, cancel, "create venv", venv).await else {
                return;
            };
            if !outcome.success() {
                run.installs_ok = false;
                if !outcome.timed_out && outcome.spawn_error.is_none() {
                    push_or_generic(run, Vec::new(), &outcome, Category::Environment);
                }
                return;
            }

            let pip = root.join(".venv").join("bin").join("pip");
            let mut install = CommandSpec::new(
                pip.to_string_lossy(),
                root,
                Duration::from_secs(self.config.install_timeout_secs),
            )
            .args(["install", "--quiet"]);
            install = if requirements {
                install.args(["-r", "requirements.txt"])
            } else {
                install.args(["."])
            };
            let Some(outcome) = self.step(run, cancel, "pip install", install).await else {
                return;
            };
            if !outcome.success() {
                run.installs_ok = false;
                if !outcome.timed_out && outcome.spawn_error.is_none() {
                    let parsed = parse_pip_errors(&outcome.output);
                    push_or_generic(run, parsed, &outcome, Category::Dependency);
                }
                return;
            }
        }

        let compile = self
            .command(self.config.build_timeout_secs, root, python)
            .args(["-m", "compileall", "-q", "-x", r"(\.venv|node_modules)", "."]);
        if let Some(outcome) = self.step(run, cancel, "compileall", compile).await {
            if !outcome.success() && !outcome.timed_out && outcome.spawn_error.is_none() {
                let parsed = in_component(parse_python_errors(&outcome.output), prefix);
                push_or_generic(run, parsed, &outcome, Category::Syntax);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Rust
    // ------------------------------------------------------------------------

    async fn check_rust(
        &self,
        root: &Path,
        prefix: &str,
        run: &mut BuildRun,
        cancel: &CancellationToken,
    ) {
        if !tool_available("cargo") {
            self.missing_tool(run, "cargo", "Rust");
            return;
        }

        let fetch = self
            .command(self.config.install_timeout_secs, root, "cargo")
            .args(["fetch"]);
        let Some(outcome) = self.step(run, cancel, "cargo fetch", fetch).await else {
            return;
        };
        if !outcome.success() {
            run.installs_ok = false;
            if !outcome.timed_out && outcome.spawn_error.is_none() {
                push_or_generic(run, Vec::new(), &outcome, Category::Dependency);
            }
            return;
        }

        let check = self
            .command(self.config.build_timeout_secs, root, "cargo")
            .args(["check", "--message-format=json", "--quiet"]);
        if let Some(outcome) = self.step(run, cancel, "cargo check", check).await {
            if outcome.timed_out || outcome.spawn_error.is_some() {
                return;
            }
            let (errors, warnings) = parse_cargo_output(&outcome.output);
            for warning in in_component(warnings, prefix) {
                run.warning(warning);
            }
            let errors = in_component(errors, prefix);
            if outcome.success() {
                run.errors.extend(errors);
            } else {
                push_or_generic(run, errors, &outcome, Category::Build);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Container
    // ------------------------------------------------------------------------

    async fn check_container(&self, root: &Path, run: &mut BuildRun, cancel: &CancellationToken) {
        if !tool_available("docker") {
            // Containers are optional even under strict_tools
            run.warning(Issue::warning(
                Category::Environment,
                "`docker` is not installed; container build skipped",
            ));
            return;
        }

        let tag = format!(
            "crucible-verify-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
        );
        let build = self
            .command(self.config.container_timeout_secs, root, "docker")
            .args(["build", "-q", "-t", tag.as_str(), "."]);
        let Some(outcome) = self.step(run, cancel, "docker build", build).await else {
            return;
        };
        if !outcome.success() && !outcome.timed_out && outcome.spawn_error.is_none() {
            let parsed = parse_docker_errors(&outcome.output);
            push_or_generic(run, parsed, &outcome, Category::Build);
        }

        // Cleanup is best-effort and not part of the report
        let remove = CommandSpec::new("docker", root, Duration::from_secs(60))
            .args(["rmi", "-f", tag.as_str()]);
        let removed = run_command(&remove, &self.env).await;
        if !removed.success() {
            tracing::debug!(tag = %tag, "Image cleanup failed");
        }
    }
}

/// Record parsed errors, or one generic error from the output tail when a
/// step failed without anything recognizable.
fn push_or_generic(
    run: &mut BuildRun,
    parsed: Vec<CompilationError>,
    outcome: &CommandOutcome,
    category: Category,
) {
    if parsed.is_empty() {
        let tail = tail_lines(&outcome.output, 8);
        let message = if tail.is_empty() {
            format!("`{}` failed with exit code {:?}", outcome.command, outcome.exit_code)
        } else {
            format!("`{}` failed:\n{}", outcome.command, tail)
        };
        run.error(Issue::error(category, message));
    } else {
        run.errors.extend(parsed);
    }
}

fn in_component(issues: Vec<CompilationError>, prefix: &str) -> Vec<CompilationError> {
    if prefix.is_empty() {
        return issues;
    }
    issues
        .into_iter()
        .map(|mut issue| {
            if let Some(file) = issue.file.take() {
                let file = file.trim_start_matches("./");
                issue.file = Some(format!("{}/{}", prefix, file));
            }
            issue
        })
        .collect()
}

fn read_npm_scripts(root: &Path) -> Vec<String> {
    std::fs::read_to_string(root.join("package.json"))
        .ok()
        .and_then(|c| serde_json::from_str::<serde_json::Value>(&c).ok())
        .and_then(|v| {
            v.get("scripts")
                .and_then(|s| s.as_object())
                .map(|s| s.keys().cloned().collect())
        })
        .unwrap_or_default()
}

// ============================================================================
// Output parsers
// ============================================================================

/// npm install failures
pub fn parse_npm_errors(output: &str) -> Vec<CompilationError> {
    let mut errors: Vec<CompilationError> = Vec::new();
    for line in output.lines().map(str::trim) {
        let lower = line.to_lowercase();
        let body = line
            .strip_prefix("npm ERR!")
            .or_else(|| line.strip_prefix("npm error"))
            .map(str::trim);

        let issue = if lower.contains("404") && lower.contains("not found") {
            Some(
                Issue::error(Category::Dependency, body.unwrap_or(line))
                    .with_suggestion("Check the package name exists in the npm registry"),
            )
        } else if lower.contains("eacces") || lower.contains("permission denied") {
            Some(Issue::error(Category::Environment, body.unwrap_or(line)))
        } else if lower.contains("eresolve") || lower.contains("could not resolve dependency") {
            Some(
                Issue::error(Category::Dependency, body.unwrap_or(line))
                    .with_suggestion("Align peer dependency versions in package.json"),
            )
        } else {
            None
        };

        if let Some(issue) = issue {
            if !errors.iter().any(|e| e.message == issue.message) {
                errors.push(issue);
            }
        }
    }
    errors
}

/// `tsc` diagnostics; codes below 2000 are syntax errors
pub fn parse_tsc_errors(output: &str) -> Vec<CompilationError> {
    output
        .lines()
        .filter_map(|line| TS_ERROR.captures(line.trim()))
        .map(|caps| {
            let code: u32 = caps[4].parse().unwrap_or(0);
            let category = if code < 2000 {
                Category::Syntax
            } else {
                Category::Build
            };
            Issue::error(category, format!("TS{}: {}", &caps[4], &caps[5]))
                .in_file(caps[1].trim())
                .at_line(caps[2].parse().unwrap_or(0))
                .with_suggestion("Fix the TypeScript error")
        })
        .collect()
}

/// Bundler output from `npm run build`
pub fn parse_bundler_errors(output: &str) -> Vec<CompilationError> {
    let mut errors = parse_tsc_errors(output);
    for line in output.lines().map(str::trim) {
        if let Some(caps) = WEBPACK_MISSING.captures(line) {
            let target = &caps[1];
            let category = if target.starts_with('.') {
                Category::Import
            } else {
                Category::Dependency
            };
            errors.push(
                Issue::error(category, format!("Cannot resolve '{}'", target))
                    .with_suggestion("Install the missing module or fix the import path"),
            );
        } else if let Some(rest) = line.strip_prefix("ERROR in ") {
            let file = rest.split_whitespace().next().unwrap_or(rest);
            errors.push(
                Issue::error(Category::Build, line)
                    .in_file(file.trim_start_matches("./"))
                    .with_suggestion("Fix the reported build error"),
            );
        }
    }
    errors
}

/// pip install failures
pub fn parse_pip_errors(output: &str) -> Vec<CompilationError> {
    let mut errors = Vec::new();
    for line in output.lines().map(str::trim) {
        if let Some(caps) = PIP_MISSING.captures(line) {
            errors.push(
                Issue::error(
                    Category::Dependency,
                    format!("No matching distribution for {}", &caps[1]),
                )
                .in_file("requirements.txt")
                .with_suggestion("Check the package name and version pin"),
            );
        } else if line.starts_with("ERROR:") && !line.contains("Could not find a version") {
            errors.push(Issue::error(Category::Dependency, line));
        }
    }
    errors
}

/// `compileall` and traceback output
pub fn parse_python_errors(output: &str) -> Vec<CompilationError> {
    let mut errors = Vec::new();
    let mut location: Option<(String, u32)> = None;
    for line in output.lines() {
        if let Some(caps) = PY_LOCATION.captures(line) {
            location = Some((caps[1].to_string(), caps[2].parse().unwrap_or(0)));
            continue;
        }
        if let Some(caps) = PY_ERROR.captures(line) {
            let category = match &caps[1] {
                "ModuleNotFoundError" | "ImportError" => Category::Dependency,
                _ => Category::Syntax,
            };
            let mut issue = Issue::error(category, format!("{}: {}", &caps[1], caps[2].trim()));
            if let Some((file, line)) = location.take() {
                issue = issue
                    .in_file(file.trim_start_matches("./"))
                    .at_line(line);
            }
            errors.push(issue);
        }
    }
    errors
}

fn parse_docker_errors(output: &str) -> Vec<CompilationError> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR") || l.contains("returned a non-zero code"))
        .take(5)
        .map(|l| Issue::error(Category::Build, l).in_file("Dockerfile"))
        .collect()
}

// --- Cargo JSON message types ---

#[derive(Debug, Deserialize)]
struct CargoMessage {
    message: Option<DiagnosticMessage>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticMessage {
    message: String,
    level: String,
    code: Option<DiagnosticCode>,
    spans: Vec<DiagnosticSpan>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct DiagnosticSpan {
    file_name: String,
    line_start: u32,
    #[serde(default)]
    is_primary: bool,
}

/// `cargo check --message-format=json`, split into errors and warnings
pub fn parse_cargo_output(output: &str) -> (Vec<CompilationError>, Vec<CompilationError>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in output.lines().filter(|l| l.starts_with('{')) {
        let Ok(msg) = serde_json::from_str::<CargoMessage>(line) else {
            continue;
        };
        let Some(message) = msg.message else {
            continue;
        };
        let text = match &message.code {
            Some(code) => format!("{}: {}", code.code, message.message),
            None => message.message.clone(),
        };
        let span = message
            .spans
            .iter()
            .find(|s| s.is_primary)
            .or(message.spans.first());
        let category = match message.code.as_ref().map(|c| c.code.as_str()) {
            Some("E0432") | Some("E0433") | Some("E0583") => Category::Import,
            _ => Category::Build,
        };
        let mut issue = Issue::new(Severity::Error, category, text);
        if let Some(span) = span {
            issue = issue.in_file(span.file_name.as_str()).at_line(span.line_start);
        }
        match message.level.as_str() {
            "error" => errors.push(issue),
            "warning" => {
                issue.severity = Severity::Warning;
                warnings.push(issue);
            }
            _ => {}
        }
    }
    (errors, warnings)
}
