//! Validator stage: headless execution of the drafted lab.
//!
//! Converts the design and guide into the runner's payload schema,
//! uploads it to the artifact store (a well-known pending path the
//! runner watches, plus an execution-scoped archive), submits a batch
//! execution, polls until terminal, and reads back the summary artifact.
//!
//! Missing inputs never fail the pipeline: validation is recorded as
//! skipped and the lab still completes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clients::{ArtifactStore, ExecutionState, RunnerClient};
use crate::config::Limits;
use crate::pipeline::PipelineError;
use crate::types::{DesignOutput, LabGuide, StageName, StepKind, ValidationResult};

/// Runner verdict string for a fully passing run.
const RUNNER_PASS: &str = "PASS";

/// Top-level payload handed to the headless runner.
#[derive(Debug, Serialize)]
struct RunnerPayload<'a> {
    exercise_id: String,
    artifact_prefix: String,
    run_id: &'a str,
    lab_id: &'a str,
    topology: &'a str,
    devices: BTreeMap<&'a str, RunnerDevice<'a>>,
    options: RunnerOptions,
}

/// Per-device slice of the runner payload.
#[derive(Debug, Serialize)]
struct RunnerDevice<'a> {
    platform: &'a str,
    initial: &'a [String],
    steps: Vec<RunnerStep<'a>>,
}

/// One executable step: a command or a verification.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RunnerStep<'a> {
    /// Command typed into the device.
    Cmd {
        /// Command text.
        command: &'a str,
        /// Step description carried for reporting.
        description: &'a str,
    },
    /// Verification command whose output is checked.
    Verify {
        /// Command text.
        command: &'a str,
        /// Step description carried for reporting.
        description: &'a str,
    },
}

/// Execution options sub-object.
#[derive(Debug, Serialize)]
struct RunnerOptions {
    stop_on_fail: bool,
}

/// Summary artifact written by the runner on completion.
#[derive(Debug, Deserialize)]
struct RunnerSummary {
    status: String,
    #[serde(default)]
    steps_passed: u32,
    #[serde(default)]
    steps_total: u32,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    artifacts: Vec<String>,
}

/// Run one validation pass.
///
/// `retry_count` scopes the run id so re-validations after RCA rewinds
/// archive under distinct paths.
///
/// # Errors
///
/// Fails on persistent artifact-store or runner errors. Missing inputs
/// are not an error: the result comes back with `skipped=true`.
pub async fn run(
    runner: &dyn RunnerClient,
    artifacts: &dyn ArtifactStore,
    lab_id: &str,
    retry_count: u32,
    design: Option<&DesignOutput>,
    guide: Option<&LabGuide>,
    limits: &Limits,
) -> Result<ValidationResult, PipelineError> {
    let (Some(design), Some(guide)) = (design, guide) else {
        warn!(lab_id = %lab_id, "validation inputs missing, skipping run");
        return Ok(ValidationResult {
            success: false,
            skipped: true,
            error_summary: Some(
                "validation skipped: design output or lab guide missing".to_owned(),
            ),
            ..ValidationResult::default()
        });
    };

    let run_id = format!("{lab_id}-r{retry_count}");
    let pending_path = format!("pending/{run_id}.json");
    let archive_path = format!("runs/{run_id}/payload.json");
    let summary_path = format!("runs/{run_id}/summary.json");

    let payload = build_payload(lab_id, &run_id, design, guide);
    let bytes = serde_json::to_vec(&payload).map_err(|e| PipelineError::External {
        stage: StageName::Validator,
        detail: format!("payload serialization: {e}"),
    })?;

    put_with_retry(artifacts, &pending_path, bytes.clone(), limits.max_stage_retries).await?;
    put_with_retry(artifacts, &archive_path, bytes, limits.max_stage_retries).await?;

    let execution_id = submit_with_retry(runner, &pending_path, limits.max_stage_retries).await?;
    info!(lab_id = %lab_id, run_id = %run_id, execution_id = %execution_id, "validation submitted");

    let terminal = poll_until_terminal(runner, &execution_id, limits).await?;

    match terminal.0 {
        ExecutionState::Succeeded => {
            let raw = get_with_retry(artifacts, &summary_path, limits.max_stage_retries).await?;
            let summary: RunnerSummary =
                serde_json::from_slice(&raw).map_err(|e| PipelineError::External {
                    stage: StageName::Validator,
                    detail: format!("summary artifact parse: {e}"),
                })?;

            let success = summary.status == RUNNER_PASS;
            let error_summary = if success {
                None
            } else if summary.errors.is_empty() {
                Some("validation reported FAIL".to_owned())
            } else {
                Some(summary.errors.join("; "))
            };
            let artifacts = if summary.artifacts.is_empty() {
                vec![archive_path, summary_path]
            } else {
                summary.artifacts
            };

            Ok(ValidationResult {
                success,
                steps_passed: summary.steps_passed,
                steps_total: summary.steps_total,
                error_summary,
                artifacts,
                skipped: false,
            })
        }
        ExecutionState::Failed => {
            let stats = terminal.1.unwrap_or_default();
            Ok(ValidationResult {
                success: false,
                steps_passed: stats.steps_passed,
                steps_total: stats.steps_total,
                error_summary: Some("runner execution failed".to_owned()),
                artifacts: vec![archive_path],
                skipped: false,
            })
        }
        ExecutionState::Running => unreachable!("poll loop only returns terminal states"),
    }
}

/// Poll the runner at the configured interval until a terminal state.
async fn poll_until_terminal(
    runner: &dyn RunnerClient,
    execution_id: &str,
    limits: &Limits,
) -> Result<(ExecutionState, Option<crate::clients::RunStats>), PipelineError> {
    let mut consecutive_errors: u32 = 0;
    loop {
        match runner.status(execution_id).await {
            Ok(status) if status.state == ExecutionState::Running => {
                consecutive_errors = 0;
                tokio::time::sleep(limits.poll_interval).await;
            }
            Ok(status) => return Ok((status.state, status.stats)),
            Err(e) if consecutive_errors < limits.max_stage_retries => {
                warn!(execution_id = %execution_id, error = %e, "status poll failed, retrying");
                consecutive_errors = consecutive_errors.saturating_add(1);
                tokio::time::sleep(limits.poll_interval).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage: StageName::Validator,
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Convert design and guide into the runner's payload schema.
///
/// Only cmd and verify steps are executable; notes and output samples
/// stay in the guide.
fn build_payload<'a>(
    lab_id: &'a str,
    run_id: &'a str,
    design: &'a DesignOutput,
    guide: &'a LabGuide,
) -> RunnerPayload<'a> {
    let mut devices = BTreeMap::new();
    for section in &guide.devices {
        let steps = section
            .steps
            .iter()
            .filter_map(|step| match step.kind {
                StepKind::Cmd => Some(RunnerStep::Cmd {
                    command: &step.value,
                    description: &step.description,
                }),
                StepKind::Verify => Some(RunnerStep::Verify {
                    command: &step.value,
                    description: &step.description,
                }),
                StepKind::Note | StepKind::Output => None,
            })
            .collect();

        devices.insert(
            section.name.as_str(),
            RunnerDevice {
                platform: &section.platform,
                initial: design
                    .initial_configs
                    .get(&section.name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                steps,
            },
        );
    }

    RunnerPayload {
        exercise_id: slug(&guide.title),
        artifact_prefix: format!("runs/{run_id}"),
        run_id,
        lab_id,
        topology: &design.topology_yaml,
        devices,
        options: RunnerOptions { stop_on_fail: false },
    }
}

/// Lowercase slug: alphanumeric runs joined by single dashes.
fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "exercise".to_owned()
    } else {
        out
    }
}

async fn put_with_retry(
    artifacts: &dyn ArtifactStore,
    path: &str,
    bytes: Vec<u8>,
    retries: u32,
) -> Result<(), PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match artifacts.put(path, bytes.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                warn!(path = %path, error = %e, "artifact put failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(super::RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage: StageName::Validator,
                    detail: e.to_string(),
                })
            }
        }
    }
}

async fn get_with_retry(
    artifacts: &dyn ArtifactStore,
    path: &str,
    retries: u32,
) -> Result<Vec<u8>, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match artifacts.get(path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < retries => {
                warn!(path = %path, error = %e, "artifact get failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(super::RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage: StageName::Validator,
                    detail: e.to_string(),
                })
            }
        }
    }
}

async fn submit_with_retry(
    runner: &dyn RunnerClient,
    payload_path: &str,
    retries: u32,
) -> Result<String, PipelineError> {
    let mut attempt: u32 = 0;
    loop {
        match runner.submit(payload_path).await {
            Ok(id) => return Ok(id),
            Err(e) if attempt < retries => {
                warn!(path = %payload_path, error = %e, "submit failed, retrying");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(super::RETRY_BACKOFF).await;
            }
            Err(e) => {
                return Err(PipelineError::External {
                    stage: StageName::Validator,
                    detail: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, ExecutionStatus, RunStats};
    use crate::types::{DeviceSection, GuideStep};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory artifact store.
    #[derive(Default)]
    struct MemoryStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
            self.blobs.lock().expect("lock").insert(path.to_owned(), bytes);
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>, ClientError> {
            self.blobs
                .lock()
                .expect("lock")
                .get(path)
                .cloned()
                .ok_or(ClientError::HttpStatus {
                    status: 404,
                    body: String::new(),
                })
        }
    }

    /// Reports `running` a fixed number of polls, then the given state.
    struct FakeRunner {
        polls_until_terminal: usize,
        terminal: ExecutionState,
        polls: AtomicUsize,
        submitted: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(polls_until_terminal: usize, terminal: ExecutionState) -> Self {
            Self {
                polls_until_terminal,
                terminal,
                polls: AtomicUsize::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RunnerClient for FakeRunner {
        async fn submit(&self, payload_path: &str) -> Result<String, ClientError> {
            self.submitted
                .lock()
                .expect("lock")
                .push(payload_path.to_owned());
            Ok("exec-1".to_owned())
        }

        async fn status(&self, _execution_id: &str) -> Result<ExecutionStatus, ClientError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            if poll < self.polls_until_terminal {
                Ok(ExecutionStatus {
                    state: ExecutionState::Running,
                    stats: None,
                })
            } else {
                Ok(ExecutionStatus {
                    state: self.terminal,
                    stats: Some(RunStats {
                        steps_passed: 3,
                        steps_total: 10,
                    }),
                })
            }
        }
    }

    fn design() -> DesignOutput {
        DesignOutput {
            topology_yaml: "nodes:\n  - r1".to_owned(),
            initial_configs: BTreeMap::from([("r1".to_owned(), vec!["hostname r1".to_owned()])]),
            target_configs: BTreeMap::new(),
            platforms: BTreeMap::from([("r1".to_owned(), "iosv".to_owned())]),
            lint_findings: None,
        }
    }

    fn guide() -> LabGuide {
        LabGuide {
            title: "Static Routing Lab".to_owned(),
            estimated_minutes: 30,
            objectives: vec![],
            prerequisites: vec![],
            devices: vec![DeviceSection {
                name: "r1".to_owned(),
                platform: "iosv".to_owned(),
                role: None,
                interfaces: None,
                steps: vec![
                    GuideStep {
                        kind: StepKind::Cmd,
                        value: "configure terminal".to_owned(),
                        description: "enter config mode".to_owned(),
                    },
                    GuideStep {
                        kind: StepKind::Note,
                        value: "not executable".to_owned(),
                        description: String::new(),
                    },
                    GuideStep {
                        kind: StepKind::Verify,
                        value: "show ip route".to_owned(),
                        description: "check".to_owned(),
                    },
                ],
            }],
            troubleshooting: vec![],
            lint_findings: None,
        }
    }

    fn store_summary(store: &MemoryStore, run_id: &str, body: serde_json::Value) {
        store.blobs.lock().expect("lock").insert(
            format!("runs/{run_id}/summary.json"),
            serde_json::to_vec(&body).expect("serialize"),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn passing_run_reports_success() {
        let store = MemoryStore::default();
        let runner = FakeRunner::new(2, ExecutionState::Succeeded);
        store_summary(
            &store,
            "lab-1-r0",
            serde_json::json!({"status": "PASS", "steps_passed": 10, "steps_total": 10}),
        );

        let result = run(
            &runner,
            &store,
            "lab-1",
            0,
            Some(&design()),
            Some(&guide()),
            &Limits::default(),
        )
        .await
        .expect("validate");

        assert!(result.success);
        assert!(!result.skipped);
        assert_eq!(result.steps_passed, 10);
        assert_eq!(result.steps_total, 10);
        assert!(result.error_summary.is_none());

        // Payload landed at both the pending path and the archive path.
        let blobs = store.blobs.lock().expect("lock");
        assert!(blobs.contains_key("pending/lab-1-r0.json"));
        assert!(blobs.contains_key("runs/lab-1-r0/payload.json"));

        let payload: serde_json::Value =
            serde_json::from_slice(&blobs["pending/lab-1-r0.json"]).expect("parse");
        assert_eq!(payload["lab_id"], "lab-1");
        assert_eq!(payload["run_id"], "lab-1-r0");
        assert_eq!(payload["exercise_id"], "static-routing-lab");
        assert_eq!(payload["devices"]["r1"]["platform"], "iosv");
        assert_eq!(payload["devices"]["r1"]["initial"][0], "hostname r1");
        // Note step filtered out: cmd + verify only.
        assert_eq!(
            payload["devices"]["r1"]["steps"]
                .as_array()
                .expect("steps")
                .len(),
            2
        );
        assert_eq!(payload["devices"]["r1"]["steps"][1]["type"], "verify");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_run_reports_errors() {
        let store = MemoryStore::default();
        let runner = FakeRunner::new(1, ExecutionState::Succeeded);
        store_summary(
            &store,
            "lab-1-r1",
            serde_json::json!({
                "status": "FAIL",
                "steps_passed": 3,
                "steps_total": 10,
                "errors": ["r2 unreachable from r1"],
            }),
        );

        let result = run(
            &runner,
            &store,
            "lab-1",
            1,
            Some(&design()),
            Some(&guide()),
            &Limits::default(),
        )
        .await
        .expect("validate");

        assert!(!result.success);
        assert_eq!(result.steps_passed, 3);
        assert_eq!(result.error_summary.as_deref(), Some("r2 unreachable from r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn runner_infrastructure_failure_is_not_a_pipeline_error() {
        let store = MemoryStore::default();
        let runner = FakeRunner::new(0, ExecutionState::Failed);

        let result = run(
            &runner,
            &store,
            "lab-1",
            0,
            Some(&design()),
            Some(&guide()),
            &Limits::default(),
        )
        .await
        .expect("validate");

        assert!(!result.success);
        assert!(!result.skipped);
        assert_eq!(result.error_summary.as_deref(), Some("runner execution failed"));
    }

    #[tokio::test]
    async fn missing_inputs_skip_gracefully() {
        let store = MemoryStore::default();
        let runner = FakeRunner::new(0, ExecutionState::Succeeded);

        let result = run(
            &runner,
            &store,
            "lab-1",
            0,
            None,
            Some(&guide()),
            &Limits::default(),
        )
        .await
        .expect("validate");

        assert!(result.skipped);
        assert!(!result.success);
        // Nothing was uploaded or submitted.
        assert!(store.blobs.lock().expect("lock").is_empty());
        assert!(runner.submitted.lock().expect("lock").is_empty());
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slug("Static Routing Lab"), "static-routing-lab");
        assert_eq!(slug("OSPF: Area 0 (intro)"), "ospf-area-0-intro");
        assert_eq!(slug("!!!"), "exercise");
    }
}
