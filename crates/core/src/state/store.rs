//! # Project Store
//!
//! Owns the on-disk layout of one project:
//!
//! ```text
//! <base>/<name>/
//!   source/    authoritative tree, mutated only by merge_artifacts
//!   verify/    ephemeral copies, one per verification pass
//!   reports/   write-once JSON documents, one set per round
//! ```
//!
//! ## Safety
//!
//! Every incoming path is validated before it touches the filesystem.
//! Paths that escape `source/` are skipped and reported back to the
//! caller, never written.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use super::io::{read_optional, write_atomic, write_new};
use crate::error::{PathError, StoreError};
use crate::models::{ArtifactSet, RoundReport};

const SOURCE_DIR: &str = "source";
const VERIFY_DIR: &str = "verify";
const REPORTS_DIR: &str = "reports";
const COORDINATION_FILE: &str = "coordination.json";
const SUMMARY_FILE: &str = "summary.md";

/// The three ownership roots of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayout {
    pub name: String,
    pub root: PathBuf,
    pub source: PathBuf,
    pub verify: PathBuf,
    pub reports: PathBuf,
}

impl ProjectLayout {
    fn at(root: PathBuf, name: String) -> Self {
        Self {
            source: root.join(SOURCE_DIR),
            verify: root.join(VERIFY_DIR),
            reports: root.join(REPORTS_DIR),
            name,
            root,
        }
    }
}

/// A path refused by `merge_artifacts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedPath {
    pub path: String,
    pub reason: String,
}

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub created: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub rejected: Vec<RejectedPath>,
}

/// Per-round statistics read back from persisted reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub success: bool,
    pub overall_score: Option<f64>,
    pub findings: usize,
    pub errors: usize,
    pub error: Option<String>,
}

/// Isolated copy of `source/` for one verification pass.
///
/// The directory is deleted when the guard drops, on success or failure.
#[derive(Debug)]
pub struct VerificationCopy {
    dir: TempDir,
    files: usize,
}

impl VerificationCopy {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file_count(&self) -> usize {
        self.files
    }
}

/// On-disk state of one project
#[derive(Debug, Clone)]
pub struct ProjectStore {
    layout: ProjectLayout,
}

impl ProjectStore {
    /// Create (or reopen) the layout for `name` under `base`
    pub fn create(base: &Path, name: &str) -> Result<Self, StoreError> {
        let clean = sanitize_name(name).ok_or_else(|| StoreError::InvalidName(name.into()))?;
        let layout = ProjectLayout::at(base.join(&clean), clean);
        for dir in [&layout.source, &layout.verify, &layout.reports] {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        tracing::info!(project = %layout.name, root = %layout.root.display(), "Project store ready");
        Ok(Self { layout })
    }

    /// Open an existing project root
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::InvalidName(root.display().to_string()))?;
        let layout = ProjectLayout::at(root.to_path_buf(), name);
        if !layout.source.is_dir() {
            return Err(StoreError::io(
                &layout.source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a project root"),
            ));
        }
        for dir in [&layout.verify, &layout.reports] {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    // ========================================================================
    // Source tree
    // ========================================================================

    /// Add-or-overwrite every file of `set` into `source/`.
    ///
    /// Unsafe paths are skipped and listed in the outcome. Any I/O failure
    /// aborts the merge.
    pub fn merge_artifacts(&self, set: &ArtifactSet) -> Result<MergeOutcome, StoreError> {
        let mut outcome = MergeOutcome::default();
        let source_root = canonical(&self.layout.source)?;

        for (path, content) in set.iter() {
            let relative = match normalize_artifact_path(path) {
                Ok(relative) => relative,
                Err(reason) => {
                    tracing::warn!(path = %path, reason = %reason, "Rejected artifact path");
                    outcome.rejected.push(RejectedPath {
                        path: path.to_string(),
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };

            let target = self.layout.source.join(&relative);
            if let Err(reason) = check_containment(&source_root, &target) {
                tracing::warn!(path = %path, reason = %reason, "Rejected artifact path");
                outcome.rejected.push(RejectedPath {
                    path: path.to_string(),
                    reason: reason.to_string(),
                });
                continue;
            }

            match read_optional(&target)? {
                Some(existing) if existing == content => outcome.unchanged += 1,
                Some(_) => {
                    write_atomic(&target, content.as_bytes())?;
                    outcome.modified += 1;
                }
                None => {
                    write_atomic(&target, content.as_bytes())?;
                    outcome.created += 1;
                }
            }
        }

        tracing::info!(
            created = outcome.created,
            modified = outcome.modified,
            unchanged = outcome.unchanged,
            rejected = outcome.rejected.len(),
            "Merged artifacts"
        );
        Ok(outcome)
    }

    /// Full read of `source/`
    pub fn current_artifacts(&self) -> Result<ArtifactSet, StoreError> {
        read_tree(&self.layout.source, &[])
    }

    /// Fresh copy of `source/` under `verify/`, removed when the guard drops
    pub fn materialize_verification_copy(&self) -> Result<VerificationCopy, StoreError> {
        fs::create_dir_all(&self.layout.verify).map_err(|e| StoreError::io(&self.layout.verify, e))?;
        let dir = tempfile::Builder::new()
            .prefix("pass-")
            .tempdir_in(&self.layout.verify)
            .map_err(|e| StoreError::io(&self.layout.verify, e))?;

        let mut files = 0;
        for entry in WalkDir::new(&self.layout.source) {
            let entry = entry.map_err(|e| {
                StoreError::io(&self.layout.source, std::io::Error::other(e.to_string()))
            })?;
            let Ok(relative) = entry.path().strip_prefix(&self.layout.source) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let target = dir.path().join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(|e| StoreError::io(&target, e))?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
                }
                fs::copy(entry.path(), &target).map_err(|e| StoreError::io(&target, e))?;
                files += 1;
            }
        }

        tracing::debug!(path = %dir.path().display(), files, "Materialized verification copy");
        Ok(VerificationCopy { dir, files })
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Persist the probe documents and the round document for `report.round`.
    ///
    /// The round document is written last and never overwritten; its
    /// presence marks the round as complete.
    pub fn save_round_report(&self, report: &RoundReport) -> Result<(), StoreError> {
        let n = report.round;
        let round_name = report_name("round", n);
        if self.layout.reports.join(&round_name).exists() {
            return Err(StoreError::ReportExists { name: round_name });
        }

        if let Some(validation) = &report.validation {
            self.write_document(&report_name("validation", n), validation)?;
        }
        if let Some(compilation) = &report.compilation {
            self.write_document(&report_name("compilation", n), compilation)?;
        }
        if let Some(test) = &report.test {
            self.write_document(&report_name("test", n), test)?;
        }

        let bytes = to_json(&round_name, report)?;
        if !write_new(&self.layout.reports.join(&round_name), &bytes)? {
            return Err(StoreError::ReportExists { name: round_name });
        }
        tracing::debug!(round = n, "Saved round report");
        Ok(())
    }

    pub fn load_round_report(&self, round: u32) -> Result<RoundReport, StoreError> {
        let name = report_name("round", round);
        let content = read_optional(&self.layout.reports.join(&name))?
            .ok_or_else(|| StoreError::ReportMissing { name: name.clone() })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Deserialize { name, source })
    }

    /// Highest round with a persisted round document
    pub fn last_round(&self) -> Result<Option<u32>, StoreError> {
        Ok(self
            .report_names()?
            .iter()
            .filter_map(|name| parse_round_file(name))
            .max())
    }

    fn report_names(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.layout.reports) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.layout.reports, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.layout.reports, e))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    /// Index of the next round to run.
    ///
    /// Probe documents count too, so a round whose save was cut short
    /// never hands its number out again.
    pub fn next_round(&self) -> Result<u32, StoreError> {
        let mut last = self.last_round()?;
        for name in self.report_names()? {
            last = last.max(parse_probe_file(&name));
        }
        Ok(last.map_or(1, |n| n + 1))
    }

    /// Statistics for every persisted round, oldest first
    pub fn round_history(&self) -> Result<Vec<RoundSummary>, StoreError> {
        let Some(last) = self.last_round()? else {
            return Ok(Vec::new());
        };
        let mut history = Vec::new();
        for round in 1..=last {
            match self.load_round_report(round) {
                Ok(report) => history.push(RoundSummary {
                    round,
                    success: report.success,
                    overall_score: report.scores.as_ref().map(|s| s.overall),
                    findings: report.findings.len(),
                    errors: report.error_count(),
                    error: report.error.clone(),
                }),
                Err(StoreError::ReportMissing { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(history)
    }

    /// Overwrite the coordinator's mutable state document
    pub fn save_coordination(&self, state: &serde_json::Value) -> Result<(), StoreError> {
        let bytes = to_json(COORDINATION_FILE, state)?;
        write_atomic(&self.layout.reports.join(COORDINATION_FILE), &bytes)
    }

    pub fn load_coordination(&self) -> Result<Option<serde_json::Value>, StoreError> {
        let Some(content) = read_optional(&self.layout.reports.join(COORDINATION_FILE))? else {
            return Ok(None);
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Deserialize {
                name: COORDINATION_FILE.to_string(),
                source,
            })
    }

    /// Render the round history to `reports/summary.md`
    pub fn export_summary(&self, terminal: &str) -> Result<PathBuf, StoreError> {
        let history = self.round_history()?;
        let mut md = format!("# Run summary: {}\n\n", self.layout.name);
        md.push_str(&format!("Terminal state: **{}**\n\n", terminal));
        md.push_str(&format!("Rounds recorded: {}\n\n", history.len()));
        md.push_str("| Round | Success | Overall | Findings | Errors | Note |\n");
        md.push_str("|------:|:-------:|--------:|---------:|-------:|------|\n");
        for row in &history {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                row.round,
                if row.success { "yes" } else { "no" },
                row.overall_score
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or_else(|| "-".into()),
                row.findings,
                row.errors,
                row.error.as_deref().unwrap_or(""),
            ));
        }

        let path = self.layout.reports.join(SUMMARY_FILE);
        write_atomic(&path, md.as_bytes())?;
        Ok(path)
    }

    /// Tear the layout down, optionally keeping `reports/`
    pub fn cleanup(self, keep_reports: bool) -> Result<(), StoreError> {
        if keep_reports {
            for dir in [&self.layout.source, &self.layout.verify] {
                remove_dir_if_present(dir)?;
            }
        } else {
            remove_dir_if_present(&self.layout.root)?;
        }
        tracing::info!(project = %self.layout.name, keep_reports, "Project cleaned up");
        Ok(())
    }

    fn write_document<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let bytes = to_json(name, value)?;
        if !write_new(&self.layout.reports.join(name), &bytes)? {
            return Err(StoreError::ReportExists {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Read every UTF-8 file under `root` into an artifact set.
///
/// Directories named in `skip` are not descended into; non-UTF-8 files
/// are ignored.
pub fn read_tree(root: &Path, skip: &[&str]) -> Result<ArtifactSet, StoreError> {
    let mut set = ArtifactSet::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !e.file_name().to_str().is_some_and(|n| skip.contains(&n))
        });
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StoreError::io(path, std::io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_posix(root, entry.path()) else {
            continue;
        };
        let bytes = fs::read(entry.path()).map_err(|e| StoreError::io(entry.path(), e))?;
        match String::from_utf8(bytes) {
            Ok(text) => set.insert(relative, text),
            Err(_) => tracing::debug!(path = %relative, "Skipping non-UTF-8 file"),
        }
    }
    Ok(set)
}

// ============================================================================
// Path rules
// ============================================================================

/// Validate an artifact path and normalize it to `a/b/c` form.
///
/// Rejects empty, absolute, backslash, NUL and `..` paths. `.` and empty
/// segments are dropped.
pub fn normalize_artifact_path(path: &str) -> Result<String, PathError> {
    if path.contains('\0') {
        return Err(PathError::NulByte);
    }
    if path.contains('\\') {
        return Err(PathError::Backslash);
    }
    if path.starts_with('/') || has_drive_prefix(path) {
        return Err(PathError::Absolute);
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::ParentTraversal),
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Refuse targets whose existing ancestors or self are symlinks leading out
fn check_containment(root: &Path, target: &Path) -> Result<(), PathError> {
    if let Ok(meta) = fs::symlink_metadata(target) {
        if meta.file_type().is_symlink() {
            return Err(PathError::EscapesRoot);
        }
    }
    let mut probe = target.parent();
    while let Some(dir) = probe {
        if dir.exists() {
            let resolved = dir.canonicalize().map_err(|_| PathError::EscapesRoot)?;
            return if resolved.starts_with(root) {
                Ok(())
            } else {
                Err(PathError::EscapesRoot)
            };
        }
        probe = dir.parent();
    }
    Err(PathError::EscapesRoot)
}

fn canonical(path: &Path) -> Result<PathBuf, StoreError> {
    path.canonicalize().map_err(|e| StoreError::io(path, e))
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Lowercase, keep `[a-z0-9_-]`, collapse the rest to `-`
fn sanitize_name(name: &str) -> Option<String> {
    let mut clean = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            clean.push(c);
        } else if !clean.ends_with('-') {
            clean.push('-');
        }
    }
    let clean = clean.trim_matches('-').to_string();
    (!clean.is_empty()).then(|| format!("project-{}", clean))
}

fn report_name(kind: &str, round: u32) -> String {
    format!("{}_{}.json", kind, round)
}

fn parse_round_file(name: &str) -> Option<u32> {
    name.strip_prefix("round_")?.strip_suffix(".json")?.parse().ok()
}

fn parse_probe_file(name: &str) -> Option<u32> {
    let (kind, rest) = name.split_once('_')?;
    if !matches!(kind, "validation" | "compilation" | "test") {
        return None;
    }
    rest.strip_suffix(".json")?.parse().ok()
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        name: name.to_string(),
        source,
    })
}

fn remove_dir_if_present(dir: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Finding, Issue, Priority, Probe, ValidationReport};
    use chrono::Utc;
    use proptest::prelude::*;

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let base = tempfile::tempdir().unwrap();
        let store = ProjectStore::create(base.path(), "Demo App").unwrap();
        (base, store)
    }

    fn sample_report(round: u32) -> RoundReport {
        let issue = Issue::error(Category::Syntax, "Invalid JSON: expected value")
            .in_file("config/app.json")
            .at_line(1);
        RoundReport {
            round,
            validation: Some(ValidationReport {
                files_checked: 1,
                issues: vec![issue.clone()],
            }),
            compilation: None,
            test: None,
            findings: vec![Finding::from_issue(&issue, Priority::High, Probe::Validation)],
            success: false,
            scores: None,
            next_iteration_focus: vec!["syntax_fixes".into()],
            recommendations: vec![],
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_layout() {
        let (_base, store) = store();
        let layout = store.layout();
        assert_eq!(layout.name, "project-demo-app");
        assert!(layout.source.is_dir());
        assert!(layout.verify.is_dir());
        assert!(layout.reports.is_dir());
    }

    #[test]
    fn test_create_rejects_empty_name() {
        let base = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectStore::create(base.path(), "  !!! "),
            Err(StoreError::InvalidName(_))
        ));
    }

    #[test]
    fn test_merge_counts_created_and_modified() {
        let (_base, store) = store();
        let first: ArtifactSet = [("index.html", "<p>a</p>"), ("css/site.css", "p{}")]
            .into_iter()
            .collect();
        let outcome = store.merge_artifacts(&first).unwrap();
        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.modified, 0);

        let second: ArtifactSet = [("index.html", "<p>b</p>"), ("css/site.css", "p{}")]
            .into_iter()
            .collect();
        let outcome = store.merge_artifacts(&second).unwrap();
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.modified, 1);
        assert_eq!(outcome.unchanged, 1);
    }

    #[test]
    fn test_merge_rejects_escaping_paths() {
        let (_base, store) = store();
        let set: ArtifactSet = [
            ("../outside.txt", "x"),
            ("/etc/passwd", "x"),
            ("a/../../b", "x"),
            ("ok.txt", "fine"),
        ]
        .into_iter()
        .collect();
        let outcome = store.merge_artifacts(&set).unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.rejected.len(), 3);
        assert!(!store.layout().root.join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_merge_rejects_symlink_escape() {
        let (base, store) = store();
        let outside = base.path().join("elsewhere");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, store.layout().source.join("link")).unwrap();

        let set: ArtifactSet = [("link/evil.txt", "x")].into_iter().collect();
        let outcome = store.merge_artifacts(&set).unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert!(!outside.join("evil.txt").exists());
    }

    #[test]
    fn test_current_artifacts_reads_back() {
        let (_base, store) = store();
        let set: ArtifactSet = [("src/app.py", "print('hi')\n"), ("README.md", "# hi")]
            .into_iter()
            .collect();
        store.merge_artifacts(&set).unwrap();
        assert_eq!(store.current_artifacts().unwrap(), set);
    }

    #[test]
    fn test_verification_copy_is_discarded() {
        let (_base, store) = store();
        let set: ArtifactSet = [("a/b.txt", "content")].into_iter().collect();
        store.merge_artifacts(&set).unwrap();

        let copy_path;
        {
            let copy = store.materialize_verification_copy().unwrap();
            copy_path = copy.path().to_path_buf();
            assert_eq!(copy.file_count(), 1);
            assert_eq!(fs::read_to_string(copy_path.join("a/b.txt")).unwrap(), "content");
            fs::write(copy_path.join("scratch.txt"), "probe output").unwrap();
        }
        assert!(!copy_path.exists());
        assert!(!store.layout().source.join("scratch.txt").exists());
    }

    #[test]
    fn test_round_report_round_trip() {
        let (_base, store) = store();
        let report = sample_report(1);
        store.save_round_report(&report).unwrap();

        assert_eq!(store.load_round_report(1).unwrap(), report);
        assert!(store.layout().reports.join("validation_1.json").exists());
        assert!(!store.layout().reports.join("compilation_1.json").exists());
    }

    #[test]
    fn test_round_report_is_write_once() {
        let (_base, store) = store();
        store.save_round_report(&sample_report(1)).unwrap();
        assert!(matches!(
            store.save_round_report(&sample_report(1)),
            Err(StoreError::ReportExists { .. })
        ));
    }

    #[test]
    fn test_probe_documents_are_write_once() {
        let (_base, store) = store();
        let reports = &store.layout().reports;
        fs::write(reports.join("validation_1.json"), "{}").unwrap();

        assert!(matches!(
            store.save_round_report(&sample_report(1)),
            Err(StoreError::ReportExists { name }) if name == "validation_1.json"
        ));
        assert_eq!(fs::read_to_string(reports.join("validation_1.json")).unwrap(), "{}");
        assert!(!reports.join("round_1.json").exists());
    }

    #[test]
    fn test_partial_round_is_not_reused() {
        let (_base, store) = store();
        store.save_round_report(&sample_report(1)).unwrap();
        fs::write(store.layout().reports.join("compilation_2.json"), "{}").unwrap();

        assert_eq!(store.last_round().unwrap(), Some(1));
        assert_eq!(store.next_round().unwrap(), 3);
    }

    #[test]
    fn test_load_missing_report() {
        let (_base, store) = store();
        assert!(matches!(
            store.load_round_report(4),
            Err(StoreError::ReportMissing { .. })
        ));
    }

    #[test]
    fn test_next_round_and_history() {
        let (_base, store) = store();
        assert_eq!(store.next_round().unwrap(), 1);
        store.save_round_report(&sample_report(1)).unwrap();
        store.save_round_report(&sample_report(2)).unwrap();
        assert_eq!(store.next_round().unwrap(), 3);

        let history = store.round_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].errors, 1);

        let summary = store.export_summary("failed").unwrap();
        let text = fs::read_to_string(summary).unwrap();
        assert!(text.contains("Terminal state: **failed**"));
        assert!(text.contains("| 2 | no |"));
    }

    #[test]
    fn test_cleanup_keeps_reports() {
        let (_base, store) = store();
        store
            .merge_artifacts(&[("x.txt", "x")].into_iter().collect())
            .unwrap();
        store.save_round_report(&sample_report(1)).unwrap();
        let layout = store.layout().clone();

        store.cleanup(true).unwrap();
        assert!(!layout.source.exists());
        assert!(layout.reports.join("round_1.json").exists());
    }

    #[test]
    fn test_normalize_artifact_path() {
        assert_eq!(normalize_artifact_path("./src//main.rs").unwrap(), "src/main.rs");
        assert_eq!(normalize_artifact_path(""), Err(PathError::Empty));
        assert_eq!(normalize_artifact_path("./"), Err(PathError::Empty));
        assert_eq!(normalize_artifact_path("C:/x"), Err(PathError::Absolute));
        assert_eq!(normalize_artifact_path("a\\b"), Err(PathError::Backslash));
        assert_eq!(normalize_artifact_path("a/../b"), Err(PathError::ParentTraversal));
    }

    proptest! {
        #[test]
        fn prop_merge_never_deletes(
            first in proptest::collection::btree_map("[a-d]{1,3}(/[a-d]{1,3})?\\.txt", "[a-z]{0,8}", 1..6),
            second in proptest::collection::btree_map("[a-d]{1,3}(/[a-d]{1,3})?\\.txt", "[a-z]{0,8}", 0..6),
        ) {
            let (_base, store) = store();
            let first: ArtifactSet = first.into_iter().collect();
            let second: ArtifactSet = second.into_iter().collect();
            let first_outcome = store.merge_artifacts(&first).unwrap();
            store.merge_artifacts(&second).unwrap();

            // Leaves end in .txt and directories never do, so paths cannot collide.
            prop_assert!(first_outcome.rejected.is_empty());
            let current = store.current_artifacts().unwrap();
            for path in first.paths() {
                prop_assert!(current.contains(path));
            }
            for (path, content) in second.iter() {
                prop_assert_eq!(current.get(path), Some(content));
            }
        }

        #[test]
        fn prop_parent_segments_always_rejected(prefix in "[a-z]{0,4}", suffix in "[a-z]{1,4}") {
            let path = if prefix.is_empty() {
                format!("../{}", suffix)
            } else {
                format!("{}/../{}", prefix, suffix)
            };
            prop_assert_eq!(normalize_artifact_path(&path), Err(PathError::ParentTraversal));
        }
    }
}
