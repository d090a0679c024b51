//! # Terminal Command Runner
//!
//! Runs external verification tools as subprocesses with a hard timeout,
//! a scrubbed environment and combined output capture.
//!
//! ## Philosophy
//!
//! Probes never execute raw shell strings. Every invocation is a program
//! plus argument vector, checked against an allow-list before spawn.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::config::EnvPolicy;

/// Programs probes may launch
const ALLOWED_PROGRAMS: &[&str] = &[
    "npm", "npx", "node", "python3", "python", "pip", "pip3", "cargo", "docker",
];

/// Blocked argument patterns (security), matched anywhere in the
/// arguments. Rejected even for allowed programs.
const BLOCKED_PATTERNS: &[&str] = &[
    // Shell chaining and substitution
    ";", "&&", "||", "`", "$(", // Destructive file operations
    "rm -rf",
];

/// Blocked commands, matched against whole arguments so file names such
/// as `test_curl_client.py` pass
const BLOCKED_WORDS: &[&str] = &[
    // Privilege escalation
    "sudo", "doas", // Destructive file operations
    "rmdir", // Network fetch outside package managers
    "curl", "wget",
];

/// One subprocess invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Extra variables on top of the policy
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: &Path, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.to_path_buf(),
            timeout,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Printable form for reports and logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What happened when a command ran
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr
    pub output: String,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Set when the process could not be started
    pub spawn_error: Option<String>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.spawn_error.is_none()
    }
}

/// Validate that a command is allowed.
///
/// The program is judged by file name only: its directory is the project
/// root, which may contain anything. Blocked patterns apply to arguments.
pub fn validate_command(program: &str, args: &[String]) -> Result<(), String> {
    let joined = args.join(" ");
    for blocked in BLOCKED_PATTERNS {
        if joined.contains(blocked) {
            return Err(format!(
                "Command contains blocked pattern '{}'. This operation is not permitted.",
                blocked.trim()
            ));
        }
    }
    if let Some(word) = args.iter().find(|a| BLOCKED_WORDS.contains(&a.as_str())) {
        return Err(format!(
            "Command contains blocked pattern '{}'. This operation is not permitted.",
            word
        ));
    }

    let name = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    let name = name.strip_suffix(".exe").unwrap_or(name);
    if !ALLOWED_PROGRAMS.contains(&name) {
        return Err(format!(
            "Program '{}' is not allowed. Allowed: {:?}",
            program, ALLOWED_PROGRAMS
        ));
    }
    Ok(())
}

/// Whether `program` can be found on PATH (or exists, if given as a path)
pub fn tool_available(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).is_file();
    }
    which::which(program).is_ok()
}

/// First available program from `candidates`
pub fn first_available<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|p| tool_available(p))
}

/// Environment for a child: allow-listed parent variables, then fixed
/// overrides, then the spec's own variables
pub fn build_env(policy: &EnvPolicy, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = policy
        .allow
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.clone(), v)))
        .collect();
    env.extend(policy.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.extend(extra.iter().cloned());
    env
}

/// Run a command to completion or until its timeout.
///
/// Never fails: spawn errors and timeouts are recorded in the outcome.
#[tracing::instrument(skip(spec, policy), fields(command = %spec.display()))]
pub async fn run_command(spec: &CommandSpec, policy: &EnvPolicy) -> CommandOutcome {
    let started = Instant::now();
    let mut outcome = CommandOutcome {
        command: spec.display(),
        exit_code: None,
        output: String::new(),
        timed_out: false,
        duration_ms: 0,
        spawn_error: None,
    };

    if let Err(reason) = validate_command(&spec.program, &spec.args) {
        tracing::warn!(%reason, "Refused to run command");
        outcome.spawn_error = Some(reason);
        return outcome;
    }

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .env_clear()
        .envs(build_env(policy, &spec.env))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to spawn command");
            outcome.spawn_error = Some(e.to_string());
            return outcome;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let completed = tokio::time::timeout(spec.timeout, async {
        tokio::join!(child.wait(), read_all(stdout), read_all(stderr))
    })
    .await;

    match completed {
        Ok((status, out, err)) => {
            outcome.exit_code = status.ok().and_then(|s| s.code());
            outcome.output = combine(&out, &err);
        }
        Err(_) => {
            outcome.timed_out = true;
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            tracing::warn!(timeout_secs = spec.timeout.as_secs(), "Command timed out");
        }
    }

    outcome.duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        exit_code = ?outcome.exit_code,
        duration_ms = outcome.duration_ms,
        "Command finished"
    );
    outcome
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buf).await;
    }
    buf
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).to_string();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(stderr));
    }
    text
}

/// Bound `text` to roughly `max_chars`, keeping the head and the tail
pub fn truncate_head_tail(text: &str, max_chars: usize) -> String {
    const MARKER: &str = "\n... [output truncated] ...\n";
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let keep = (max_chars / 2).saturating_sub(MARKER.len() / 2);
    let head: String = text.chars().take(keep).collect();
    let tail: String = text.chars().skip(total - keep).collect();
    format!("{}{}{}", head, MARKER, tail)
}

/// Last `lines` non-empty lines of `text`, for error messages
pub fn tail_lines(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}
