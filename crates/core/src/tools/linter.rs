//! # Static Validator
//!
//! Pure, per-file structural checks over an artifact set plus a handful
//! of project-wide checks. Never touches the filesystem or runs tools.
//!
//! ## Checks
//!
//! - Path safety (same rules the store enforces on merge)
//! - Syntax validity per content type (see `syntax`)
//! - Local reference resolution (see `imports`)
//! - Style heuristics: long lines, oversized files, incomplete-work markers
//! - Project shape: expected manifests, an entry point, dependency sanity
//!
//! Files are visited in path order, so the same input always yields the
//! same report.

use serde_json::Value;
use std::collections::BTreeSet;

use super::build::detect_shape;
use super::imports::unresolved_references;
use super::syntax::{self, ContentType};
use crate::config::ValidatorConfig;
use crate::models::{
    ArtifactSet, Category, Ecosystem, Issue, Severity, ValidationIssue, ValidationReport,
};
use crate::state::store::normalize_artifact_path;

const ENTRY_POINTS: &[&str] = &[
    "index.html",
    "main.py",
    "app.py",
    "manage.py",
    "__main__.py",
    "wsgi.py",
    "asgi.py",
    "main.rs",
    "lib.rs",
    "index.js",
    "index.ts",
    "index.jsx",
    "index.tsx",
    "main.js",
    "main.ts",
    "main.jsx",
    "main.tsx",
    "server.js",
    "server.ts",
    "app.js",
    "app.ts",
    "App.js",
    "App.jsx",
    "App.tsx",
];

const INCOMPLETE_MARKERS: &[&str] = &["TODO", "FIXME", "XXX", "HACK"];

// ============================================================================
// Validator
// ============================================================================

/// Deterministic static checks over an artifact set
#[derive(Debug, Clone, Default)]
pub struct StaticValidator {
    config: ValidatorConfig,
}

impl StaticValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate every file, then the project as a whole
    pub fn validate(&self, artifacts: &ArtifactSet) -> ValidationReport {
        let files: BTreeSet<&str> = artifacts.paths().collect();
        let mut issues = Vec::new();

        for (path, content) in artifacts.iter() {
            issues.extend(self.validate_file(path, content, &files));
        }
        issues.extend(self.validate_project(artifacts));

        let report = ValidationReport {
            files_checked: artifacts.len(),
            issues,
        };
        tracing::info!(
            files = report.files_checked,
            errors = report.error_count(),
            warnings = report.warning_count(),
            "Static validation complete"
        );
        report
    }

    /// Checks for a single file
    pub fn validate_file(
        &self,
        path: &str,
        content: &str,
        files: &BTreeSet<&str>,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Err(reason) = normalize_artifact_path(path) {
            issues.push(
                Issue::error(Category::Structure, format!("Unsafe path: {}", reason))
                    .in_file(path)
                    .with_suggestion("Use a relative path inside the project"),
            );
            return issues;
        }
        if path.chars().any(char::is_whitespace) {
            issues.push(
                Issue::warning(Category::Style, "File path contains whitespace")
                    .in_file(path)
                    .with_suggestion("Rename the file without spaces"),
            );
        }

        let content_type = ContentType::detect(path);
        let fault = syntax::check(content_type, content);
        let syntax_ok = fault.is_none();
        if let Some(fault) = fault {
            let mut issue = Issue::error(Category::Syntax, fault.message)
                .in_file(path)
                .with_suggestion("Fix the syntax error so the file parses");
            issue.line = fault.line;
            issues.push(issue);
        }

        // References in an unparsable file are unreliable
        if syntax_ok {
            for unresolved in unresolved_references(content_type, path, content, files) {
                issues.push(
                    Issue::error(
                        Category::Import,
                        format!("Unresolved local reference '{}'", unresolved.target),
                    )
                    .in_file(path)
                    .at_line(unresolved.line)
                    .with_suggestion(unresolved.hint),
                );
            }
        }

        if content_type == ContentType::Html {
            issues.extend(check_html_structure(path, content));
        }

        if !self.config.is_exempt(path) && !content_type.is_data() {
            issues.extend(self.style_issues(path, content));
        }
        issues
    }

    fn style_issues(&self, path: &str, content: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let max = self.config.max_line_length;

        let long: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, l)| l.chars().count() > max)
            .map(|(i, _)| i + 1)
            .collect();
        if let Some(&first) = long.first() {
            issues.push(
                Issue::warning(
                    Category::Style,
                    format!("{} line(s) longer than {} characters", long.len(), max),
                )
                .in_file(path)
                .at_line(first as u32)
                .with_suggestion("Wrap long lines"),
            );
        }

        let line_count = content.lines().count();
        if line_count > self.config.max_file_lines {
            issues.push(
                Issue::warning(
                    Category::Style,
                    format!(
                        "File has {} lines, max is {}",
                        line_count, self.config.max_file_lines
                    ),
                )
                .in_file(path)
                .with_suggestion("Split the file into smaller modules"),
            );
        }

        for (i, line) in content.lines().enumerate() {
            if let Some(marker) = INCOMPLETE_MARKERS.iter().find(|m| contains_marker(line, m)) {
                issues.push(
                    Issue::warning(Category::Style, format!("Incomplete-work marker ({})", marker))
                        .in_file(path)
                        .at_line((i + 1) as u32)
                        .with_suggestion("Complete the implementation or remove the marker"),
                );
            }
        }
        issues
    }

    /// Checks that depend on the whole set rather than one file
    pub fn validate_project(&self, artifacts: &ArtifactSet) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if artifacts.is_empty() {
            issues.push(
                Issue::error(Category::Structure, "No files were generated")
                    .with_suggestion("Generate at least one entry point"),
            );
            return issues;
        }

        let shape = detect_shape(artifacts.paths());
        let types: Vec<(&str, ContentType)> = artifacts
            .paths()
            .map(|p| (p, ContentType::detect(p)))
            .collect();

        let has_python = types.iter().any(|(_, t)| *t == ContentType::Python);
        let has_rust = types.iter().any(|(_, t)| *t == ContentType::Rust);
        let has_module_scripts = types.iter().any(|(_, t)| {
            matches!(t, ContentType::TypeScript | ContentType::Jsx | ContentType::Tsx)
        });

        if has_python && !shape.has(Ecosystem::Python) {
            issues.push(
                Issue::warning(Category::Structure, "Python sources without a dependency manifest")
                    .with_suggestion("Add requirements.txt or pyproject.toml"),
            );
        }
        if has_rust && !shape.has(Ecosystem::Rust) {
            issues.push(
                Issue::warning(Category::Structure, "Rust sources without Cargo.toml")
                    .with_suggestion("Add a Cargo.toml manifest"),
            );
        }
        if has_module_scripts && !shape.has(Ecosystem::Node) {
            issues.push(
                Issue::warning(Category::Structure, "TypeScript/JSX sources without package.json")
                    .with_suggestion("Add a package.json declaring dependencies and scripts"),
            );
        }

        let has_entry = artifacts.paths().any(|p| {
            let name = p.rsplit('/').next().unwrap_or(p);
            ENTRY_POINTS.contains(&name)
        });
        if !has_entry {
            issues.push(
                Issue::warning(Category::Structure, "No recognizable entry point")
                    .with_suggestion("Add index.html, main.py, src/main.rs or an equivalent"),
            );
        }

        issues.extend(check_node_dependencies(artifacts, &types));
        issues.extend(check_python_requirements(artifacts));
        issues
    }
}

fn contains_marker(line: &str, marker: &str) -> bool {
    line.match_indices(marker).any(|(idx, _)| {
        let before = line[..idx].chars().next_back();
        let after = line[idx + marker.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric() || c == '_')
            && !after.is_some_and(|c| c.is_alphanumeric() || c == '_')
    })
}

/// Unbalanced block tags in HTML are reported as warnings
fn check_html_structure(path: &str, content: &str) -> Vec<ValidationIssue> {
    const BLOCK_TAGS: &[&str] = &["html", "head", "body", "div", "section", "main", "script"];
    let lower = content.to_lowercase();
    let mut issues = Vec::new();
    for tag in BLOCK_TAGS {
        let opens = lower.matches(&format!("<{}>", tag)).count()
            + lower.matches(&format!("<{} ", tag)).count();
        let closes = lower.matches(&format!("</{}>", tag)).count();
        if opens != closes {
            issues.push(
                Issue::new(
                    Severity::Warning,
                    Category::Syntax,
                    format!("Unbalanced <{}> tags ({} opened, {} closed)", tag, opens, closes),
                )
                .in_file(path),
            );
        }
    }
    issues
}

/// JSX/TSX must come with a `react` dependency in the nearest package.json
fn check_node_dependencies(
    artifacts: &ArtifactSet,
    types: &[(&str, ContentType)],
) -> Vec<ValidationIssue> {
    // Unparsable manifests stay in the list so they still shadow their
    // parents; they are reported elsewhere.
    let manifests: Vec<(&str, Option<Value>)> = artifacts
        .iter()
        .filter(|(p, _)| *p == "package.json" || p.ends_with("/package.json"))
        .map(|(p, c)| (p, serde_json::from_str(c).ok()))
        .collect();
    if manifests.is_empty() {
        return Vec::new();
    }

    let mut lacking = BTreeSet::new();
    for (file, _) in types
        .iter()
        .filter(|(_, t)| matches!(t, ContentType::Jsx | ContentType::Tsx))
    {
        let nearest = manifests
            .iter()
            .filter(|(m, _)| file.starts_with(manifest_dir(m)))
            .max_by_key(|(m, _)| m.len());
        if let Some((manifest, Some(value))) = nearest {
            if !declares_dependency(value, "react") && !declares_dependency(value, "preact") {
                lacking.insert(*manifest);
            }
        }
    }
    lacking
        .into_iter()
        .map(|manifest| {
            Issue::error(Category::Dependency, "JSX sources but no react dependency")
                .in_file(manifest)
                .with_suggestion("Add react and react-dom to dependencies")
        })
        .collect()
}

fn manifest_dir(manifest: &str) -> &str {
    manifest.strip_suffix("package.json").unwrap_or("")
}

fn declares_dependency(manifest: &Value, name: &str) -> bool {
    ["dependencies", "devDependencies", "peerDependencies"]
        .iter()
        .any(|section| manifest.get(section).and_then(|d| d.get(name)).is_some())
}

fn check_python_requirements(artifacts: &ArtifactSet) -> Vec<ValidationIssue> {
    artifacts
        .iter()
        .filter(|(p, _)| *p == "requirements.txt" || p.ends_with("/requirements.txt"))
        .filter(|(_, content)| {
            content
                .lines()
                .map(str::trim)
                .all(|l| l.is_empty() || l.starts_with('#'))
        })
        .map(|(p, _)| {
            Issue::warning(Category::Dependency, "requirements.txt lists no packages")
                .in_file(p)
                .with_suggestion("Declare the packages the code imports")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validate(files: &[(&str, &str)]) -> ValidationReport {
        let set: ArtifactSet = files.iter().copied().collect();
        StaticValidator::default().validate(&set)
    }

    #[test]
    fn test_single_syntax_error() {
        let report = validate(&[
            ("index.html", "<html><body><p>ok</p></body></html>"),
            ("config/app.json", "{\"name\": \"demo\",}"),
        ]);
        let errors: Vec<_> = report.issues.iter().filter(|i| i.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].file.as_deref(), Some("config/app.json"));
        assert_eq!(errors[0].category, Category::Syntax);
    }

    #[test]
    fn test_clean_static_site() {
        let report = validate(&[
            ("index.html", "<html><head><link rel=\"stylesheet\" href=\"style.css\"></head><body></body></html>"),
            ("style.css", "body { margin: 0; }"),
        ]);
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn test_empty_set_is_error() {
        let report = StaticValidator::default().validate(&ArtifactSet::new());
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_unresolved_import_is_error() {
        let report = validate(&[
            ("main.py", "from helpers import tool\nimport utils\n"),
            ("utils/__init__.py", ""),
            ("helpers.py", "def other():\n    pass\n"),
            ("requirements.txt", "requests\n"),
        ]);
        assert!(!report.has_errors(), "{:?}", report.issues);

        let report = validate(&[
            ("main.py", "from .missing import tool\n"),
            ("requirements.txt", "requests\n"),
        ]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == Category::Import && i.is_error()));
    }

    #[test]
    fn test_style_warnings() {
        let long = format!("x = '{}'\n", "a".repeat(150));
        let content = format!("{}# TODO: finish\ny = 1  # TODOS are fine\n", long);
        let report = validate(&[("main.py", &content), ("requirements.txt", "flask\n")]);
        assert!(!report.has_errors());
        assert_eq!(report.warning_count(), 2);
        assert!(report.issues.iter().any(|i| i.message.contains("longer than 120")));
        assert!(report.issues.iter().any(|i| i.line == Some(2)));
    }

    #[test]
    fn test_exempt_files_skip_style() {
        let long = "a".repeat(500);
        let report = validate(&[("index.html", "<html></html>"), ("vendor/lib.js", &long)]);
        assert_eq!(report.warning_count(), 0, "{:?}", report.issues);
    }

    #[test]
    fn test_unsafe_path_reported() {
        let report = validate(&[("../escape.txt", "x"), ("index.html", "<html></html>")]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == Category::Structure && i.is_error()));
    }

    #[test]
    fn test_jsx_without_react() {
        let report = validate(&[
            ("package.json", r#"{"name": "web", "dependencies": {"vite": "5"}}"#),
            ("src/main.jsx", "export const App = () => <div />;\n"),
        ]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == Category::Dependency && i.is_error()));
    }

    #[test]
    fn test_jsx_checks_nearest_manifest_only() {
        let workspace = r#"{"name": "root", "private": true, "workspaces": ["frontend"]}"#;
        let frontend = r#"{"name": "frontend", "dependencies": {"react": "18", "react-dom": "18"}}"#;
        let report = validate(&[
            ("package.json", workspace),
            ("frontend/package.json", frontend),
            ("frontend/src/App.jsx", "export default function App() {\n  return <p>Hi</p>;\n}\n"),
        ]);
        assert!(
            !report.issues.iter().any(|i| i.category == Category::Dependency),
            "{:?}",
            report.issues
        );

        let report = validate(&[
            ("package.json", r#"{"name": "root", "dependencies": {"react": "18"}}"#),
            ("frontend/package.json", r#"{"name": "frontend"}"#),
            ("frontend/src/App.jsx", "export const App = () => <div />;\n"),
        ]);
        let lacking: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.category == Category::Dependency)
            .collect();
        assert_eq!(lacking.len(), 1);
        assert_eq!(lacking[0].file.as_deref(), Some("frontend/package.json"));
    }

    #[test]
    fn test_missing_manifest_and_empty_requirements() {
        let report = validate(&[("src/App.tsx", "export {};\n")]);
        assert!(report.issues.iter().any(|i| i.message.contains("package.json")));

        let report = validate(&[("app.py", "print('hi')\n"), ("requirements.txt", "# none\n")]);
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("lists no packages")));
    }

    #[test]
    fn test_contains_marker_word_boundary() {
        assert!(contains_marker("// TODO: x", "TODO"));
        assert!(!contains_marker("let todos = TODOS;", "TODO"));
    }

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(
            files in proptest::collection::btree_map(
                "[a-c]{1,2}/[a-c]{1,3}\\.(py|js|json|md)",
                "[ -~\n]{0,60}",
                0..6,
            )
        ) {
            let set: ArtifactSet = files.into_iter().collect();
            let validator = StaticValidator::default();
            prop_assert_eq!(validator.validate(&set), validator.validate(&set));
        }
    }
}
