//! # Reference Resolution
//!
//! Heuristic check that local imports point at files present in the
//! artifact set. Third-party imports are ignored; only references that
//! are clearly local (relative paths, `mod` declarations, packages that
//! exist in the set) are resolved.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use super::syntax::ContentType;

/// An unresolved local reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub line: u32,
    pub target: String,
    pub hint: String,
}

static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)(?:^|[^\w.])(?:import|export)\s+(?:[\w*{}\s,$]+?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("valid regex")
});
static JS_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:require|import)\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex")
});
static PY_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*from\s+(\.*)([\w.]*)\s+import\s+").expect("valid regex")
});
static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)")
        .expect("valid regex")
});
static RUST_MOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\s*;")
        .expect("valid regex")
});
static HTML_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});
static HTML_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<link\b[^>]*>"#).expect("valid regex"));
static HTML_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

const SCRIPT_EXTENSIONS: &[&str] = &["", ".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".json"];
const INDEX_FILES: &[&str] = &["index.js", "index.jsx", "index.ts", "index.tsx"];

/// Resolve the local references of `path` against `files`
pub fn unresolved_references(
    content_type: ContentType,
    path: &str,
    content: &str,
    files: &BTreeSet<&str>,
) -> Vec<UnresolvedRef> {
    match content_type {
        ContentType::JavaScript | ContentType::TypeScript | ContentType::Jsx | ContentType::Tsx => {
            check_script(path, content, files)
        }
        ContentType::Python => check_python(path, content, files),
        ContentType::Rust => check_rust(path, content, files),
        ContentType::Html => check_html(path, content, files),
        _ => Vec::new(),
    }
}

fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset].matches('\n').count() as u32 + 1
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Join `rel` onto `base` POSIX-style. `None` if it climbs above the root.
fn join_posix(base: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

// ============================================================================
// JavaScript / TypeScript
// ============================================================================

fn check_script(path: &str, content: &str, files: &BTreeSet<&str>) -> Vec<UnresolvedRef> {
    let mut unresolved = Vec::new();
    let dir = parent_dir(path);
    let specifiers = JS_IMPORT
        .captures_iter(content)
        .chain(JS_REQUIRE.captures_iter(content))
        .filter_map(|c| c.get(1));

    let mut seen = BTreeSet::new();
    for m in specifiers {
        let spec = m.as_str();
        if !spec.starts_with("./") && !spec.starts_with("../") {
            continue;
        }
        if !seen.insert((m.start(), spec)) {
            continue;
        }
        let resolved = join_posix(dir, spec)
            .map(|base| script_candidates(&base).iter().any(|c| files.contains(c.as_str())))
            .unwrap_or(false);
        if !resolved {
            unresolved.push(UnresolvedRef {
                line: line_of(content, m.start()),
                target: spec.to_string(),
                hint: "Create the imported module or fix the relative path".into(),
            });
        }
    }
    unresolved.sort_by_key(|u| u.line);
    unresolved
}

fn script_candidates(base: &str) -> Vec<String> {
    let mut candidates: Vec<String> = SCRIPT_EXTENSIONS
        .iter()
        .map(|ext| format!("{}{}", base, ext))
        .collect();
    candidates.extend(INDEX_FILES.iter().map(|index| join_posix(base, index).unwrap_or_default()));
    // ESM TypeScript imports name the emitted `.js` file
    if let Some(stem) = base.strip_suffix(".js") {
        candidates.push(format!("{}.ts", stem));
        candidates.push(format!("{}.tsx", stem));
    }
    candidates
}

// ============================================================================
// Python
// ============================================================================

fn check_python(path: &str, content: &str, files: &BTreeSet<&str>) -> Vec<UnresolvedRef> {
    let mut unresolved = Vec::new();
    let dir = parent_dir(path);
    let roots = python_roots(dir);

    for caps in PY_FROM.captures_iter(content) {
        let dots = caps.get(1).map_or(0, |m| m.as_str().len());
        let module = caps.get(2).map_or("", |m| m.as_str());
        let offset = caps.get(0).map_or(0, |m| m.start());
        let ok = if dots > 0 {
            resolve_relative_python(dir, dots, module, files)
        } else {
            resolve_absolute_python(&roots, module, files)
        };
        if !ok {
            unresolved.push(UnresolvedRef {
                line: line_of(content, offset),
                target: format!("{}{}", ".".repeat(dots), module),
                hint: "Create the module or correct the import path".into(),
            });
        }
    }

    for caps in PY_IMPORT.captures_iter(content) {
        let offset = caps.get(0).map_or(0, |m| m.start());
        let list = caps.get(1).map_or("", |m| m.as_str());
        for item in list.split(',') {
            let module = item.split_whitespace().next().unwrap_or("");
            if !resolve_absolute_python(&roots, module, files) {
                unresolved.push(UnresolvedRef {
                    line: line_of(content, offset),
                    target: module.to_string(),
                    hint: "Create the module or correct the import path".into(),
                });
            }
        }
    }
    unresolved.sort_by_key(|u| u.line);
    unresolved
}

/// Import roots: the file's directory and each of its ancestors
fn python_roots(dir: &str) -> Vec<String> {
    let mut roots = vec![dir.to_string()];
    let mut current = dir;
    while !current.is_empty() {
        current = parent_dir(current);
        roots.push(current.to_string());
    }
    roots
}

fn module_exists(base: &str, files: &BTreeSet<&str>) -> bool {
    let file = format!("{}.py", base);
    let package_prefix = format!("{}/", base);
    files.contains(file.as_str())
        || files
            .range(package_prefix.as_str()..)
            .next()
            .map_or(false, |p| p.starts_with(&package_prefix) && p.ends_with(".py"))
}

fn prefixed(root: &str, module_path: &str) -> String {
    if root.is_empty() {
        module_path.to_string()
    } else {
        format!("{}/{}", root, module_path)
    }
}

/// Absolute imports are only checked when their top-level package is
/// local; everything else is assumed to be third-party.
fn resolve_absolute_python(roots: &[String], module: &str, files: &BTreeSet<&str>) -> bool {
    let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
    let Some(top) = segments.first() else {
        return true;
    };
    let local_roots: Vec<&String> = roots
        .iter()
        .filter(|root| module_exists(&prefixed(root, top), files))
        .collect();
    if local_roots.is_empty() {
        return true;
    }
    let module_path = segments.join("/");
    local_roots
        .iter()
        .any(|root| module_exists(&prefixed(root, &module_path), files))
}

fn resolve_relative_python(dir: &str, dots: usize, module: &str, files: &BTreeSet<&str>) -> bool {
    let mut base = dir.to_string();
    for _ in 1..dots {
        if base.is_empty() {
            return false;
        }
        base = parent_dir(&base).to_string();
    }
    if module.is_empty() {
        // `from . import x` names a package; its directory must hold Python files
        return dots == 1 || module_exists(&base, files);
    }
    module_exists(&prefixed(&base, &module.replace('.', "/")), files)
}

// ============================================================================
// Rust
// ============================================================================

fn check_rust(path: &str, content: &str, files: &BTreeSet<&str>) -> Vec<UnresolvedRef> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let dir = parent_dir(path);
    let module_dir = match file_name {
        "lib.rs" | "main.rs" | "mod.rs" => dir.to_string(),
        _ if dir.ends_with("/bin") || dir == "bin" => dir.to_string(),
        other => prefixed(dir, other.trim_end_matches(".rs")),
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut unresolved = Vec::new();
    for caps in RUST_MOD.captures_iter(content) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps.get(1).map_or("", |m| m.as_str());
        let line = line_of(content, whole.start() + whole.as_str().len() - whole.as_str().trim_start().len());
        let previous = (line as usize)
            .checked_sub(2)
            .and_then(|idx| lines.get(idx))
            .copied()
            .unwrap_or("");
        if previous.contains("#[path") {
            continue;
        }
        let flat = prefixed(&module_dir, &format!("{}.rs", name));
        let nested = prefixed(&module_dir, &format!("{}/mod.rs", name));
        if !files.contains(flat.as_str()) && !files.contains(nested.as_str()) {
            unresolved.push(UnresolvedRef {
                line,
                target: name.to_string(),
                hint: format!("Create {} or {}", flat, nested),
            });
        }
    }
    unresolved
}

// ============================================================================
// HTML
// ============================================================================

fn check_html(path: &str, content: &str, files: &BTreeSet<&str>) -> Vec<UnresolvedRef> {
    let dir = parent_dir(path);
    let mut refs: Vec<(usize, &str)> = HTML_SCRIPT
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str())))
        .collect();
    for tag in HTML_LINK.find_iter(content) {
        if !tag.as_str().to_lowercase().contains("stylesheet") {
            continue;
        }
        if let Some(href) = HTML_HREF.captures(tag.as_str()).and_then(|c| c.get(1)) {
            refs.push((tag.start() + href.start(), href.as_str()));
        }
    }
    refs.sort();

    let mut unresolved = Vec::new();
    for (offset, reference) in refs {
        if !is_local_reference(reference) {
            continue;
        }
        let clean = reference
            .split(['?', '#'])
            .next()
            .unwrap_or(reference);
        let candidates: Vec<String> = if let Some(abs) = clean.strip_prefix('/') {
            vec![abs.to_string(), format!("public/{}", abs)]
        } else {
            join_posix(dir, clean).into_iter().collect()
        };
        if !candidates.iter().any(|c| files.contains(c.as_str())) {
            unresolved.push(UnresolvedRef {
                line: line_of(content, offset),
                target: reference.to_string(),
                hint: "Add the referenced asset or fix the path".into(),
            });
        }
    }
    unresolved
}

fn is_local_reference(reference: &str) -> bool {
    let lower = reference.to_lowercase();
    !(lower.contains("://")
        || lower.starts_with("//")
        || lower.starts_with("data:")
        || lower.starts_with('#')
        || lower.starts_with("mailto:")
        || reference.contains('%')
        || reference.contains("{{"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set<'a>(paths: &[&'a str]) -> BTreeSet<&'a str> {
        paths.iter().copied().collect()
    }

    #[test]
    fn test_script_relative_imports() {
        let files = set(&["src/App.jsx", "src/components/Nav.tsx", "src/utils/index.js"]);
        let content = "import React from 'react';\nimport Nav from './components/Nav';\nimport { x } from './utils';\nconst y = require('./missing');\n";
        let unresolved = unresolved_references(ContentType::Jsx, "src/App.jsx", content, &files);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].target, "./missing");
        assert_eq!(unresolved[0].line, 4);
    }

    #[test]
    fn test_script_import_above_root() {
        let files = set(&["main.js"]);
        let unresolved =
            unresolved_references(ContentType::JavaScript, "main.js", "import '../x.js';", &files);
        assert_eq!(unresolved.len(), 1);
    }

    #[test]
    fn test_esm_typescript_js_suffix() {
        let files = set(&["src/index.ts", "src/db.ts"]);
        let unresolved = unresolved_references(
            ContentType::TypeScript,
            "src/index.ts",
            "import { pool } from './db.js';\n",
            &files,
        );
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_python_imports() {
        let files = set(&[
            "backend/app/__init__.py",
            "backend/app/main.py",
            "backend/app/models.py",
            "backend/app/routes/__init__.py",
        ]);
        let content = "import os\nfrom fastapi import FastAPI\nfrom app.models import User\nfrom app.routes import api\nfrom app.schemas import Out\nfrom .models import User\nfrom .missing import y\n";
        let unresolved =
            unresolved_references(ContentType::Python, "backend/app/main.py", content, &files);
        let targets: Vec<&str> = unresolved.iter().map(|u| u.target.as_str()).collect();
        assert_eq!(targets, vec!["app.schemas", ".missing"]);
    }

    #[test]
    fn test_rust_mod_declarations() {
        let files = set(&["src/main.rs", "src/config.rs", "src/store/mod.rs"]);
        let content = "mod config;\npub mod store;\nmod absent;\nmod inline {}\n";
        let unresolved = unresolved_references(ContentType::Rust, "src/main.rs", content, &files);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].target, "absent");
        assert_eq!(unresolved[0].line, 3);
    }

    #[test]
    fn test_rust_nested_module_dir() {
        let files = set(&["src/lib.rs", "src/store.rs", "src/store/io.rs"]);
        let unresolved =
            unresolved_references(ContentType::Rust, "src/store.rs", "mod io;\n", &files);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_html_references() {
        let files = set(&["index.html", "css/site.css", "src/main.tsx"]);
        let content = r#"<link rel="stylesheet" href="css/site.css">
<link rel="icon" href="/favicon.ico">
<script type="module" src="/src/main.tsx"></script>
<script src="https://cdn.example.com/lib.js"></script>
<script src="js/app.js"></script>"#;
        let unresolved = unresolved_references(ContentType::Html, "index.html", content, &files);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].target, "js/app.js");
        assert_eq!(unresolved[0].line, 5);
    }
}
