//! Pipeline orchestration.
//!
//! One driver task per lab runs the stages in order, with the Planner's
//! multi-turn dialog folded into its pipeline slot and an RCA-driven
//! rewind loop after failed validations:
//!
//! - [`driver`]:    stage sequencing, timeouts, rewinds
//! - [`planner`]:   interactive exercise-spec dialog
//! - [`designer`]:  topology + device-config synthesis with lint loop
//! - [`author`]:    lab-guide authoring with lint loop
//! - [`validator`]: headless runner submission and polling
//! - [`rca`]:       root-cause classification of failed validations
//! - [`extract`]:   lenient JSON extraction from LLM prose

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::clients::{CliLintOptions, CommandCheck, LintIssue, LinterClient, LlmClient};
use crate::registry::RegistryError;
use crate::types::{ChatMessage, StageName};

pub mod author;
pub mod designer;
pub mod driver;
pub mod extract;
pub mod planner;
pub mod rca;
pub mod validator;

/// Fixed pause between retries of a failed external call.
const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// Errors that terminate a lab's pipeline.
///
/// The driver is the single failure boundary: every variant becomes
/// `status=failed` with `error` populated, never a panic.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external collaborator kept failing after stage-level retries.
    #[error("{stage}: external call failed after retries: {detail}")]
    External {
        /// Stage whose call failed.
        stage: StageName,
        /// Last error observed.
        detail: String,
    },
    /// LLM output never matched the expected artifact schema.
    #[error("{stage}: could not parse a valid artifact from model output")]
    BadArtifact {
        /// Stage whose output was unusable.
        stage: StageName,
    },
    /// Lint findings persisted after retries and strict lint is on.
    #[error("{stage}: lint errors persisted after retries: {detail}")]
    LintFailed {
        /// Stage whose output failed lint.
        stage: StageName,
        /// Joined lint findings.
        detail: String,
    },
    /// A timeout expired; `scope` names the exhausted budget.
    #[error("timeout: {scope} budget exceeded")]
    Timeout {
        /// The scope whose budget ran out (e.g. "pipeline").
        scope: String,
    },
    /// The instructor never answered the Planner's question.
    #[error("user did not respond in time (reply timeout exceeded)")]
    UserReplyTimeout,
    /// The Planner dialog hit its turn bound without a complete spec.
    #[error("planner produced no complete exercise spec within {0} turns")]
    PlannerTurnsExhausted(u32),
    /// RCA output was unusable or classified the cause as UNKNOWN.
    #[error("root-cause analysis inconclusive: {0}")]
    RcaUnresolved(String),
    /// The pipeline's message channel closed underneath it.
    #[error("pipeline cancelled")]
    Cancelled,
    /// The lab vanished from the registry mid-run.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Deadline `budget` from now, saturating instead of overflowing.
pub(crate) fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget).unwrap_or(now)
}

/// Run `fut` under the tighter of the stage budget and the pipeline
/// deadline; a timeout names whichever bound actually expired.
pub(crate) async fn bounded<T>(
    label: &str,
    budget: Duration,
    pipeline_deadline: Instant,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    bounded_at(label, deadline_after(budget), pipeline_deadline, fut).await
}

/// [`bounded`] with a precomputed stage deadline.
pub(crate) async fn bounded_at<T>(
    label: &str,
    stage_deadline: Instant,
    pipeline_deadline: Instant,
    fut: impl std::future::Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    let (deadline, scope) = if pipeline_deadline <= stage_deadline {
        (pipeline_deadline, "pipeline")
    } else {
        (stage_deadline, label)
    };
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            scope: scope.to_owned(),
        }),
    }
}

/// Call the LLM, retrying transient errors up to `retries` times.
pub(crate) async fn generate_with_retry(
    llm: &dyn LlmClient,
    stage: StageName,
    system_instruction: &str,
    conversation: &[ChatMessage],
    retries: u32,
) -> Result<String, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match llm.generate(system_instruction, conversation).await {
            Ok(text) => return Ok(text),
            Err(e) if attempt < retries => {
                warn!(stage = %stage, attempt, error = %e, "LLM call failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Lint a topology, retrying transient linter errors.
pub(crate) async fn lint_topology_with_retry(
    linter: &dyn LinterClient,
    stage: StageName,
    topology: &str,
    retries: u32,
) -> Result<Vec<LintIssue>, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match linter.lint_topology(topology).await {
            Ok(issues) => return Ok(issues),
            Err(e) if attempt < retries => {
                warn!(stage = %stage, attempt, error = %e, "topology lint failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Lint a command sequence, retrying transient linter errors.
pub(crate) async fn lint_cli_with_retry(
    linter: &dyn LinterClient,
    stage: StageName,
    device_type: &str,
    commands: &[String],
    options: CliLintOptions,
    retries: u32,
) -> Result<Vec<CommandCheck>, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match linter.lint_cli(device_type, commands, options).await {
            Ok(results) => return Ok(results),
            Err(e) if attempt < retries => {
                warn!(stage = %stage, attempt, error = %e, "cli lint failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage,
                    detail: e.to_string(),
                })
            }
        }
    }
}
