//! External client adapters.
//!
//! Four interfaces isolate the core from its collaborators: the LLM
//! backend, the parser/linter service, the headless runner batch system,
//! and its artifact object store. Each trait is object-safe and
//! `Send + Sync` so pipeline tasks can share one handle, and each has an
//! HTTP implementation plus in-test fakes.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

pub mod linter;
pub mod llm;
pub mod runner;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by external-client adapters.
///
/// All variants are retriable at the stage level; persistent failures
/// fail the lab.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Upstream responded with an error status.
    #[error("upstream returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized, truncated response body.
        body: String,
    },
    /// Response did not match the expected schema.
    #[error("response parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Linter wire types
// ---------------------------------------------------------------------------

/// One topology lint finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintIssue {
    /// Human-readable description of the problem.
    pub message: String,
    /// Offending line, when the linter can locate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Per-command result from a CLI lint pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCheck {
    /// The command that was checked.
    pub command: String,
    /// Whether the command parsed cleanly.
    pub ok: bool,
    /// Parser message for commands that did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Options forwarded to the CLI linter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CliLintOptions {
    /// Lint in configuration mode rather than exec mode.
    #[serde(default)]
    pub config_mode: bool,
}

// ---------------------------------------------------------------------------
// Runner wire types
// ---------------------------------------------------------------------------

/// Terminality of a runner execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Still executing.
    Running,
    /// Finished; the summary artifact is available.
    Succeeded,
    /// The execution itself failed (infrastructure, not lab steps).
    Failed,
}

/// Step statistics reported by the runner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Steps that passed.
    #[serde(default)]
    pub steps_passed: u32,
    /// Total steps executed.
    #[serde(default)]
    pub steps_total: u32,
}

/// Status of a runner execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatus {
    /// Execution state.
    pub state: ExecutionState,
    /// Step statistics, when the runner reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Language-model backend interface.
///
/// Implementations must be safe for concurrent use; callers retry
/// transient errors at the stage level.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the given instruction and conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, status, or schema failure.
    async fn generate(
        &self,
        system_instruction: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, ClientError>;
}

/// Parser/linter service interface. Side-effect-free and retriable.
#[async_trait]
pub trait LinterClient: Send + Sync {
    /// Lint a topology description.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, status, or schema failure.
    async fn lint_topology(&self, topology: &str) -> Result<Vec<LintIssue>, ClientError>;

    /// Lint a command sequence for the given device platform.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, status, or schema failure.
    async fn lint_cli(
        &self,
        device_type: &str,
        commands: &[String],
        options: CliLintOptions,
    ) -> Result<Vec<CommandCheck>, ClientError>;
}

/// Headless runner batch interface.
#[async_trait]
pub trait RunnerClient: Send + Sync {
    /// Submit a batch execution referencing an uploaded payload.
    /// Returns the execution id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, status, or schema failure.
    async fn submit(&self, payload_path: &str) -> Result<String, ClientError>;

    /// Fetch the current status of an execution.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport, status, or schema failure.
    async fn status(&self, execution_id: &str) -> Result<ExecutionStatus, ClientError>;
}

/// Artifact object-store interface shared between the core and the runner.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a blob at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or status failure.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ClientError>;

    /// Fetch the blob at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or status failure, including
    /// a 404 for absent blobs.
    async fn get(&self, path: &str) -> Result<Vec<u8>, ClientError>;
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by all adapters)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ClientError::Request` on transport failure,
/// `ClientError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ClientError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact credential-shaped substrings, and truncate.
///
/// Upstream error bodies can echo request headers; tokens must never
/// reach logs or lab error fields.
fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-[A-Za-z0-9_\-]{20,}",
        r"Bearer [A-Za-z0-9_\-\.]{16,}",
        r"ghp_[A-Za-z0-9]{20,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
