//! Shared fakes and builders for integration tests.
//!
//! The fakes implement the external-client traits so whole pipelines run
//! without any network: a stage-routing scripted LLM, a clean linter, an
//! in-memory artifact store, and a runner whose verdicts are scripted
//! per submission.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use labforge::clients::{
    ArtifactStore, ClientError, CliLintOptions, CommandCheck, ExecutionState, ExecutionStatus,
    LintIssue, LinterClient, LlmClient, RunnerClient,
};
use labforge::config::Limits;
use labforge::pipeline::driver::Orchestrator;
use labforge::registry::LabRegistry;
use labforge::types::{ChatMessage, LabSnapshot, LabStatus};

/// Exercise spec the scripted planner usually emits.
pub const SPEC_JSON: &str = r#"{
    "title": "Static Routing Basics",
    "objectives": ["configure static routes", "verify reachability"],
    "constraints": {"device_count": 2, "time_minutes": 30},
    "level": "CCNA",
    "prerequisites": ["IP addressing"]
}"#;

/// Design artifact the scripted designer usually emits.
pub const DESIGN_JSON: &str = r#"{
    "topology_yaml": "nodes:\n  - r1\n  - r2\nlinks:\n  - [r1, r2]",
    "initial_configs": {"r1": ["hostname r1"], "r2": ["hostname r2"]},
    "target_configs": {
        "r1": ["ip route 192.168.2.0 255.255.255.0 10.0.0.2"],
        "r2": ["ip route 192.168.1.0 255.255.255.0 10.0.0.1"]
    },
    "platforms": {"r1": "iosv", "r2": "iosv"}
}"#;

/// Guide artifact the scripted author usually emits.
pub const GUIDE_JSON: &str = r#"{
    "title": "Static Routing Lab",
    "estimated_minutes": 30,
    "devices": [
        {
            "name": "r1",
            "platform": "iosv",
            "steps": [
                {"type": "cmd", "value": "configure terminal", "description": "enter config mode"},
                {"type": "cmd", "value": "ip route 192.168.2.0 255.255.255.0 10.0.0.2", "description": "add the static route"},
                {"type": "verify", "value": "show ip route", "description": "confirm the route"}
            ]
        },
        {
            "name": "r2",
            "platform": "iosv",
            "steps": [
                {"type": "cmd", "value": "configure terminal", "description": "enter config mode"},
                {"type": "verify", "value": "show ip route", "description": "confirm the route"}
            ]
        }
    ]
}"#;

/// RCA plan blaming the Author.
pub const RCA_AUTHOR_JSON: &str = r#"{
    "analysis": "the guide never configures the return route",
    "root_cause_type": "INSTRUCTION",
    "target_agent": "author",
    "patch_instructions": "Add the r2 static route step to the guide."
}"#;

/// RCA plan blaming the Designer.
pub const RCA_DESIGNER_JSON: &str = r#"{
    "analysis": "the topology lacks a link between r1 and r2",
    "root_cause_type": "DESIGN",
    "target_agent": "designer",
    "patch_instructions": "Connect r1 and r2 directly."
}"#;

/// Scripted LLM that routes responses by stage.
///
/// Responses pop in order; the last one repeats. An empty script is a
/// hard error so tests fail loudly on unexpected calls.
#[derive(Default)]
pub struct StageLlm {
    planner: Mutex<VecDeque<String>>,
    designer: Mutex<VecDeque<String>>,
    author: Mutex<VecDeque<String>>,
    rca: Mutex<VecDeque<String>>,
    /// Optional artificial latency applied to Designer calls.
    pub designer_delay: Option<Duration>,
}

impl StageLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planner(self, responses: &[&str]) -> Self {
        *self.planner.lock().expect("lock") =
            responses.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn designer(self, responses: &[&str]) -> Self {
        *self.designer.lock().expect("lock") =
            responses.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn author(self, responses: &[&str]) -> Self {
        *self.author.lock().expect("lock") =
            responses.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn rca(self, responses: &[&str]) -> Self {
        *self.rca.lock().expect("lock") = responses.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// All stages scripted for a clean dry-run pipeline.
    pub fn happy_path() -> Self {
        Self::new()
            .planner(&[SPEC_JSON])
            .designer(&[DESIGN_JSON])
            .author(&[GUIDE_JSON])
    }

    fn next(queue: &Mutex<VecDeque<String>>) -> Result<String, ClientError> {
        let mut queue = queue.lock().expect("lock");
        if queue.len() > 1 {
            return queue.pop_front().ok_or_else(unscripted);
        }
        queue.front().cloned().ok_or_else(unscripted)
    }
}

fn unscripted() -> ClientError {
    ClientError::Parse("no scripted response for this stage".to_owned())
}

#[async_trait]
impl LlmClient for StageLlm {
    async fn generate(
        &self,
        system_instruction: &str,
        _conversation: &[ChatMessage],
    ) -> Result<String, ClientError> {
        if system_instruction.contains("You are the Planner") {
            Self::next(&self.planner)
        } else if system_instruction.contains("You are the Designer") {
            if let Some(delay) = self.designer_delay {
                tokio::time::sleep(delay).await;
            }
            Self::next(&self.designer)
        } else if system_instruction.contains("You are the Author") {
            Self::next(&self.author)
        } else {
            Self::next(&self.rca)
        }
    }
}

/// Linter that accepts everything.
pub struct CleanLinter;

#[async_trait]
impl LinterClient for CleanLinter {
    async fn lint_topology(&self, _topology: &str) -> Result<Vec<LintIssue>, ClientError> {
        Ok(vec![])
    }

    async fn lint_cli(
        &self,
        _device_type: &str,
        commands: &[String],
        _options: CliLintOptions,
    ) -> Result<Vec<CommandCheck>, ClientError> {
        Ok(commands
            .iter()
            .map(|c| CommandCheck {
                command: c.clone(),
                ok: true,
                message: None,
            })
            .collect())
    }
}

/// In-memory artifact store shared with the scripted runner.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn contains(&self, path: &str) -> bool {
        self.blobs.lock().expect("lock").contains_key(path)
    }
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

/// One scripted validation outcome.
#[derive(Clone, Copy)]
pub struct Verdict {
    pub pass: bool,
    pub steps_passed: u32,
    pub steps_total: u32,
}

impl Verdict {
    pub fn pass(steps: u32) -> Self {
        Self {
            pass: true,
            steps_passed: steps,
            steps_total: steps,
        }
    }

    pub fn fail(passed: u32, total: u32) -> Self {
        Self {
            pass: false,
            steps_passed: passed,
            steps_total: total,
        }
    }
}

/// Runner whose executions succeed instantly with scripted verdicts.
///
/// On submit it writes the corresponding summary artifact into the
/// shared store, the way the real runner publishes results.
pub struct ScriptedRunner {
    verdicts: Mutex<VecDeque<Verdict>>,
    store: Arc<MemoryStore>,
}

impl ScriptedRunner {
    pub fn new(store: Arc<MemoryStore>, verdicts: &[Verdict]) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.iter().copied().collect()),
            store,
        }
    }
}

#[async_trait]
impl RunnerClient for ScriptedRunner {
    async fn submit(&self, payload_path: &str) -> Result<String, ClientError> {
        let verdict = {
            let mut verdicts = self.verdicts.lock().expect("lock");
            if verdicts.len() > 1 {
                verdicts.pop_front()
            } else {
                verdicts.front().copied()
            }
        }
        .ok_or_else(|| ClientError::Parse("no scripted verdict".to_owned()))?;

        // pending/{run_id}.json -> runs/{run_id}/summary.json
        let run_id = payload_path
            .trim_start_matches("pending/")
            .trim_end_matches(".json")
            .to_owned();
        let summary = serde_json::json!({
            "status": if verdict.pass { "PASS" } else { "FAIL" },
            "steps_passed": verdict.steps_passed,
            "steps_total": verdict.steps_total,
            "errors": if verdict.pass { vec![] } else { vec!["verification failed".to_owned()] },
        });
        self.store
            .put(
                &format!("runs/{run_id}/summary.json"),
                serde_json::to_vec(&summary).expect("serialize"),
            )
            .await?;

        Ok(format!("exec-{run_id}"))
    }

    async fn status(&self, _execution_id: &str) -> Result<ExecutionStatus, ClientError> {
        Ok(ExecutionStatus {
            state: ExecutionState::Succeeded,
            stats: None,
        })
    }
}

/// Wire an orchestrator over the given fakes.
pub fn orchestrator(
    llm: Arc<dyn LlmClient>,
    runner: Arc<dyn RunnerClient>,
    store: Arc<MemoryStore>,
    limits: Limits,
) -> Arc<Orchestrator> {
    let registry = Arc::new(LabRegistry::new(limits.pending_queue_capacity));
    Arc::new(Orchestrator::new(
        registry,
        llm,
        Arc::new(CleanLinter),
        runner,
        store,
        limits,
    ))
}

/// Orchestrator with a happy-path LLM and an always-passing runner.
pub fn happy_orchestrator() -> Arc<Orchestrator> {
    let store = Arc::new(MemoryStore::default());
    let runner = Arc::new(ScriptedRunner::new(Arc::clone(&store), &[Verdict::pass(10)]));
    orchestrator(Arc::new(StageLlm::happy_path()), runner, store, Limits::default())
}

/// Poll until the lab reaches a terminal state.
///
/// The generous iteration count matters under `start_paused`: each poll
/// sleep advances the virtual clock by only 25 ms, and timeout scenarios
/// need minutes of virtual time to elapse.
pub async fn wait_terminal(registry: &LabRegistry, lab_id: &str) -> LabSnapshot {
    for _ in 0..20_000 {
        let snapshot = registry.snapshot(lab_id).await.expect("snapshot");
        if snapshot.status.is_terminal() {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("lab {lab_id} never reached a terminal state");
}

/// Poll until the lab reports the given status.
pub async fn wait_status(registry: &LabRegistry, lab_id: &str, status: LabStatus) -> LabSnapshot {
    for _ in 0..20_000 {
        let snapshot = registry.snapshot(lab_id).await.expect("snapshot");
        if snapshot.status == status {
            return snapshot;
        }
        if snapshot.status.is_terminal() {
            panic!(
                "lab {lab_id} terminated as {} while waiting for {status}",
                snapshot.status
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("lab {lab_id} never reached {status}");
}
