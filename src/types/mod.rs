//! Core types for the lab orchestration runtime.
//!
//! A [`Lab`] is the single unit of work: one instructor prompt driven
//! through the Planner -> Designer -> Author -> Validator pipeline, with
//! an RCA triage pass on validation failure. Everything here is plain
//! data; mutation rules live in the registry and the pipeline driver.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lab lifecycle status. Labels are serialized verbatim in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    /// Planner is composing or refining the exercise spec.
    PlannerRunning,
    /// Planner asked a clarifying question; waiting on the instructor.
    AwaitingUserInput,
    /// Planner produced a complete exercise spec.
    PlannerComplete,
    /// Designer is synthesizing topology and device configs.
    DesignerRunning,
    /// Designer output accepted.
    DesignerComplete,
    /// Author is writing the student-facing guide.
    AuthorRunning,
    /// Author output accepted.
    AuthorComplete,
    /// Validation run submitted or polling.
    ValidatorRunning,
    /// Validation run reached a terminal state (pass or fail).
    ValidatorComplete,
    /// Root-cause analysis in progress after a failed validation.
    RcaRunning,
    /// Root-cause analysis produced a patch plan.
    RcaComplete,
    /// Terminal: the lab was delivered (possibly with a failed validation).
    Completed,
    /// Terminal: unrecoverable error; `Lab::error` is populated.
    Failed,
}

impl LabStatus {
    /// Whether the lab can still accept instructor chat messages.
    pub fn accepts_messages(self) -> bool {
        matches!(self, Self::PlannerRunning | Self::AwaitingUserInput)
    }

    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for LabStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::PlannerRunning => "planner_running",
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::PlannerComplete => "planner_complete",
            Self::DesignerRunning => "designer_running",
            Self::DesignerComplete => "designer_complete",
            Self::AuthorRunning => "author_running",
            Self::AuthorComplete => "author_complete",
            Self::ValidatorRunning => "validator_running",
            Self::ValidatorComplete => "validator_complete",
            Self::RcaRunning => "rca_running",
            Self::RcaComplete => "rca_complete",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Pipeline stage names, ordered by position in the pipeline.
///
/// The derived ordering is used by the driver to decide which stages to
/// re-run after an RCA rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    /// Interactive exercise-spec refinement.
    Planner,
    /// Topology and device-config synthesis.
    Designer,
    /// Student-facing guide authoring.
    Author,
    /// Headless validation run.
    Validator,
    /// Root-cause analysis of a failed validation.
    Rca,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Planner => "planner",
            Self::Designer => "designer",
            Self::Author => "author",
            Self::Validator => "validator",
            Self::Rca => "rca",
        };
        f.write_str(label)
    }
}

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructor message.
    User,
    /// Planner (LLM) message.
    Assistant,
}

/// One message in a lab's planner conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// When the message was appended to the conversation.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a user message stamped now.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build an assistant message stamped now.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Immutable per-lab options fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabOptions {
    /// Skip the Validator stage entirely.
    #[serde(default)]
    pub dry_run: bool,
    /// Allow the RCA retry loop on validation failure.
    #[serde(default)]
    pub enable_rca: bool,
}

// ── Stage artifacts ──

/// Resource constraints inside an exercise spec.
///
/// The Planner LLM fills what it knows; both fields are optional so a bare
/// `{}` still parses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecConstraints {
    /// Number of devices in the topology.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_count: Option<u32>,
    /// Target completion time in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_minutes: Option<u32>,
}

/// Structured lab requirements produced by the Planner.
///
/// All five fields must be present in the LLM's JSON for the dialog to
/// conclude; a response missing any of them is treated as a clarifying
/// question instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseSpec {
    /// Short lab title.
    pub title: String,
    /// Learning objectives.
    pub objectives: Vec<String>,
    /// Device-count and time constraints.
    pub constraints: SpecConstraints,
    /// Difficulty level (e.g. "CCNA").
    pub level: String,
    /// Assumed prior knowledge.
    pub prerequisites: Vec<String>,
}

/// Topology plus per-device configs produced by the Designer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignOutput {
    /// Textual topology description.
    pub topology_yaml: String,
    /// Device name -> initial command sequence.
    pub initial_configs: BTreeMap<String, Vec<String>>,
    /// Device name -> target command sequence.
    pub target_configs: BTreeMap<String, Vec<String>>,
    /// Device name -> platform tag (e.g. "iosv").
    pub platforms: BTreeMap<String, String>,
    /// Unresolved lint findings carried on best-effort output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_findings: Option<Vec<String>>,
}

/// Kind of a single lab-guide step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// A command the student types.
    Cmd,
    /// A verification command whose output is checked.
    Verify,
    /// Explanatory note.
    Note,
    /// Expected output sample.
    Output,
}

/// One ordered step inside a device section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideStep {
    /// Step kind.
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Command text, note body, or expected output.
    pub value: String,
    /// Short explanation shown to the student.
    #[serde(default)]
    pub description: String,
}

/// Per-device section of the lab guide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Device name as it appears in the topology.
    pub name: String,
    /// Platform tag.
    pub platform: String,
    /// Optional role description (e.g. "edge router").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Optional interface -> address table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<BTreeMap<String, String>>,
    /// Ordered steps for this device.
    pub steps: Vec<GuideStep>,
}

/// Student-facing lab guide produced by the Author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabGuide {
    /// Guide title.
    pub title: String,
    /// Estimated completion time in minutes.
    pub estimated_minutes: u32,
    /// Restated objectives, if the Author includes them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
    /// Restated prerequisites.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,
    /// Per-device instruction sections.
    pub devices: Vec<DeviceSection>,
    /// Troubleshooting tips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
    /// Unresolved lint findings carried on best-effort output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_findings: Option<Vec<String>>,
}

/// Outcome of a headless validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the runner reported PASS.
    pub success: bool,
    /// Steps that passed.
    pub steps_passed: u32,
    /// Total steps executed.
    pub steps_total: u32,
    /// Short failure summary from the runner, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    /// Artifact-store paths produced by the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// True when validation was skipped for missing inputs. Never an error.
    #[serde(default)]
    pub skipped: bool,
}

/// RCA root-cause classification. Labels match the RCA prompt contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RootCauseType {
    /// Topology or config defect; rewind to the Designer.
    Design,
    /// Guide instruction defect; rewind to the Author.
    Instruction,
    /// The exercise spec itself is unachievable; rewind to the Planner.
    Objectives,
    /// Could not classify. Treated as terminal by the driver.
    Unknown,
}

/// Stage the RCA recommends rewinding to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RcaTarget {
    /// Re-run from the Designer.
    Designer,
    /// Re-run from the Author.
    Author,
    /// Re-run from the Planner dialog.
    Planner,
}

impl RcaTarget {
    /// The pipeline stage this target maps to.
    pub fn stage(self) -> StageName {
        match self {
            Self::Designer => StageName::Designer,
            Self::Author => StageName::Author,
            Self::Planner => StageName::Planner,
        }
    }
}

/// RCA output: classification plus concrete patch instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPlan {
    /// Short textual analysis of the failure.
    pub analysis: String,
    /// Root-cause classification.
    pub root_cause_type: RootCauseType,
    /// Stage to rewind to.
    pub target_agent: RcaTarget,
    /// Concrete instructions handed to the re-run stage.
    pub patch_instructions: String,
}

/// Per-stage artifacts, populated incrementally as the pipeline advances.
///
/// An RCA rewind to stage X clears X's entry and everything downstream
/// before the re-run, so each entry always reflects the latest execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Planner output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise_spec: Option<ExerciseSpec>,
    /// Designer output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_output: Option<DesignOutput>,
    /// Author output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_lab_guide: Option<LabGuide>,
    /// Validator output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ValidationResult>,
    /// RCA output (latest iteration).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_plan: Option<PatchPlan>,
}

impl Progress {
    /// Discard the given stage's artifact and everything downstream of it.
    ///
    /// The latest `patch_plan` survives rewinds: it documents why the
    /// re-run is happening.
    pub fn discard_from(&mut self, stage: StageName) {
        if stage <= StageName::Planner {
            self.exercise_spec = None;
        }
        if stage <= StageName::Designer {
            self.design_output = None;
        }
        if stage <= StageName::Author {
            self.draft_lab_guide = None;
        }
        if stage <= StageName::Validator {
            self.validation_result = None;
        }
    }
}

// ── Lab ──

/// The single unit of work: one instructor prompt and everything the
/// pipeline derives from it.
///
/// `lab_id`, `prompt`, and `options` are immutable after creation. All
/// other fields are mutated only through the registry's per-lab lock.
#[derive(Debug, Clone)]
pub struct Lab {
    /// Opaque unique identifier.
    pub lab_id: String,
    /// Original instructor prompt.
    pub prompt: String,
    /// Creation-time options.
    pub options: LabOptions,
    /// Current lifecycle status.
    pub status: LabStatus,
    /// Stage currently executing, if any.
    pub current_stage: Option<StageName>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp. Strictly increases with every mutation.
    pub updated_at: DateTime<Utc>,
    /// Ordered planner conversation.
    pub conversation: Vec<ChatMessage>,
    /// True while the Planner is blocked on an instructor reply.
    pub awaiting_user_input: bool,
    /// Per-stage artifacts.
    pub progress: Progress,
    /// Terminal failure description.
    pub error: Option<String>,
    /// RCA iterations consumed.
    pub retry_count: u32,
}

impl Lab {
    /// Install a fresh lab in its initial state, with the instructor's
    /// prompt seeded as the first conversation message.
    pub fn new(lab_id: String, prompt: String, options: LabOptions) -> Self {
        let now = Utc::now();
        Self {
            lab_id,
            prompt: prompt.clone(),
            options,
            status: LabStatus::PlannerRunning,
            current_stage: Some(StageName::Planner),
            created_at: now,
            updated_at: now,
            conversation: vec![ChatMessage {
                role: ChatRole::User,
                content: prompt,
                timestamp: now,
            }],
            awaiting_user_input: false,
            progress: Progress::default(),
            error: None,
            retry_count: 0,
        }
    }

    /// Display title for list views: the exercise-spec title when the
    /// Planner has produced one, else the prompt truncated to 60 chars.
    pub fn title(&self) -> String {
        if let Some(spec) = &self.progress.exercise_spec {
            return spec.title.clone();
        }
        truncate_chars(&self.prompt, 60)
    }
}

/// Truncate to `max` chars on a char boundary, appending an ellipsis.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

// ── API views ──

/// Conversation view embedded in a lab snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    /// Ordered messages.
    pub messages: Vec<ChatMessage>,
    /// Whether the Planner is waiting on the instructor.
    pub awaiting_user_input: bool,
}

/// Stable copy of a lab's public fields, safe to serialize without locks.
///
/// The pending-message queue is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSnapshot {
    /// Lab identifier.
    pub lab_id: String,
    /// Lifecycle status.
    pub status: LabStatus,
    /// Stage currently executing (`null` when none).
    pub current_agent: Option<StageName>,
    /// Conversation and its waiting flag.
    pub conversation: ConversationView,
    /// Per-stage artifacts.
    pub progress: Progress,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Original instructor prompt.
    pub prompt: String,
    /// Terminal failure description, if failed.
    pub error: Option<String>,
    /// RCA iterations consumed.
    pub retry_count: u32,
}

impl From<&Lab> for LabSnapshot {
    fn from(lab: &Lab) -> Self {
        Self {
            lab_id: lab.lab_id.clone(),
            status: lab.status,
            current_agent: lab.current_stage,
            conversation: ConversationView {
                messages: lab.conversation.clone(),
                awaiting_user_input: lab.awaiting_user_input,
            },
            progress: lab.progress.clone(),
            created_at: lab.created_at,
            updated_at: lab.updated_at,
            prompt: lab.prompt.clone(),
            error: lab.error.clone(),
            retry_count: lab.retry_count,
        }
    }
}

/// One row in the lab list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSummary {
    /// Lab identifier.
    pub lab_id: String,
    /// Display title.
    pub title: String,
    /// Lifecycle status.
    pub status: LabStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
