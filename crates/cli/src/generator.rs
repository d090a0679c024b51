//! Generator adapters
//!
//! Two transports for the `Generator` contract, sharing one JSON wire
//! format:
//!
//! - `CommandGenerator` writes the request to a child process's stdin and
//!   reads the response from its stdout.
//! - `HttpGenerator` POSTs the request to an endpoint.
//!
//! A response is either `{"files": {"path": "content", ...}}`, a bare
//! `{"path": "content"}` map, or `{"error": "message"}`.

use async_trait::async_trait;
use crucible_core::models::{ArtifactSet, Finding};
use crucible_core::skills::{GenerationRequest, Generator, GeneratorRole};
use crucible_core::state::Specification;
use crucible_core::tools::terminal::tail_lines;
use crucible_core::GeneratorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Request body sent to an external generator
#[derive(Debug, Serialize)]
pub struct WireRequest<'a> {
    pub specification: &'a Specification,
    pub round: u32,
    pub role: GeneratorRole,
    pub focus: &'a [String],
    pub findings: &'a [Finding],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<&'a ArtifactSet>,
}

impl<'a> From<&'a GenerationRequest> for WireRequest<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            specification: &request.specification,
            round: request.round,
            role: request.role,
            focus: &request.focus,
            findings: &request.prior_findings,
            files: request.current_artifacts.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FailureBody {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Failure(FailureBody),
    Wrapped { files: BTreeMap<String, String> },
    Bare(BTreeMap<String, String>),
}

/// Decode a generator response body
pub fn parse_response(body: &str) -> Result<ArtifactSet, GeneratorError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(GeneratorError::InvalidOutput("empty response".into()));
    }
    match serde_json::from_str::<WireResponse>(body) {
        Ok(WireResponse::Failure(body)) => Err(GeneratorError::Failed(body.error)),
        Ok(WireResponse::Wrapped { files }) | Ok(WireResponse::Bare(files)) => {
            Ok(files.into_iter().collect())
        }
        Err(_) => Err(GeneratorError::InvalidOutput(format!(
            "expected a JSON file map, got: {}",
            body.chars().take(120).collect::<String>()
        ))),
    }
}

fn encode(request: &GenerationRequest) -> Result<Vec<u8>, GeneratorError> {
    serde_json::to_vec(&WireRequest::from(request))
        .map_err(|e| GeneratorError::Failed(format!("failed to encode request: {}", e)))
}

// ============================================================================
// External command
// ============================================================================

/// Runs a local program once per invocation
pub struct CommandGenerator {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Split `command_line` on whitespace into program and arguments
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            name: format!("command:{}", program),
            program,
            args: parts.collect(),
        })
    }

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{}", program),
            program,
            args,
        }
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ArtifactSet, GeneratorError> {
        let payload = encode(&request)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CRUCIBLE_ROUND", request.round.to_string())
            .env("CRUCIBLE_ROLE", request.role.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GeneratorError::Unavailable(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading its input is judged by its exit status
            if let Err(e) = stdin.write_all(&payload).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(GeneratorError::Failed(format!("failed to write request: {}", e)));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GeneratorError::Failed(format!("failed to read response: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GeneratorError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail_lines(&stderr, 10)
            )));
        }
        parse_response(&String::from_utf8_lossy(&output.stdout))
    }
}

// ============================================================================
// HTTP endpoint
// ============================================================================

/// POSTs each invocation to a generation endpoint
pub struct HttpGenerator {
    name: String,
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            name: format!("http:{}", url),
            url,
            token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ArtifactSet, GeneratorError> {
        let mut call = self.client.post(&self.url).json(&WireRequest::from(&request));
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }

        let response = call.send().await.map_err(|e| {
            if e.is_connect() {
                GeneratorError::Unavailable(e.to_string())
            } else {
                GeneratorError::Failed(e.to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeneratorError::Failed(format!("failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(GeneratorError::Failed(format!(
                "{} returned {}: {}",
                self.url,
                status,
                tail_lines(&body, 10)
            )));
        }
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_wrapped_and_bare() {
        let set = parse_response(r#"{"files": {"index.html": "<p></p>"}}"#).unwrap();
        assert_eq!(set.get("index.html"), Some("<p></p>"));

        let set = parse_response(r#"{"a.txt": "a", "b/c.txt": "c"}"#).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_parse_failure_and_garbage() {
        assert_eq!(
            parse_response(r#"{"error": "quota exceeded"}"#).unwrap_err(),
            GeneratorError::Failed("quota exceeded".into())
        );
        assert!(matches!(
            parse_response("not json"),
            Err(GeneratorError::InvalidOutput(_))
        ));
        assert!(matches!(parse_response("  "), Err(GeneratorError::InvalidOutput(_))));
    }

    #[test]
    fn test_wire_request_omits_missing_files() {
        let request = GenerationRequest::new(Arc::new(Specification::new("demo")), 1);
        let json = serde_json::to_value(WireRequest::from(&request)).unwrap();
        assert_eq!(json["round"], 1);
        assert_eq!(json["role"], "general");
        assert!(json.get("files").is_none());
    }

    #[test]
    fn test_parse_command_line() {
        let generator = CommandGenerator::parse("python3 gen.py --fast").unwrap();
        assert_eq!(generator.program, "python3");
        assert_eq!(generator.args, vec!["gen.py", "--fast"]);
        assert!(CommandGenerator::parse("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_round_trip() {
        let generator = CommandGenerator::new(
            "sh",
            vec![
                "-c".into(),
                r#"cat > /dev/null; echo '{"files": {"round.txt": "ok"}}'"#.into(),
            ],
        );
        let request = GenerationRequest::new(Arc::new(Specification::new("demo")), 1);
        let set = generator.generate(request).await.unwrap();
        assert_eq!(set.get("round.txt"), Some("ok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator_nonzero_exit() {
        let generator = CommandGenerator::new("sh", vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        let request = GenerationRequest::new(Arc::new(Specification::new("demo")), 1);
        let err = generator.generate(request).await.unwrap_err();
        match err {
            GeneratorError::Failed(message) => assert!(message.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let generator = CommandGenerator::new("crucible-no-such-generator", Vec::new());
        let request = GenerationRequest::new(Arc::new(Specification::new("demo")), 1);
        assert!(matches!(
            generator.generate(request).await,
            Err(GeneratorError::Unavailable(_))
        ));
    }
}
