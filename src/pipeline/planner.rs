//! Interactive Planner controller.
//!
//! Conducts the multi-turn dialog that refines an instructor prompt into
//! a complete exercise spec. The driver knows nothing about turns: this
//! controller only returns once it has a spec, fails, or times out.
//!
//! Each turn sends the full conversation to the LLM. A response carrying
//! a parseable spec ends the dialog; anything else is treated as a
//! clarifying question and the controller blocks on the pending-message
//! queue until the instructor answers or a deadline fires.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clients::LlmClient;
use crate::config::Limits;
use crate::pipeline::{bounded_at, deadline_after, extract, generate_with_retry, PipelineError};
use crate::registry::LabRegistry;
use crate::types::{ChatMessage, ExerciseSpec, LabStatus, PatchPlan, StageName};

/// System instruction for the Planner dialog.
///
/// The model is free to wrap the final JSON in prose; extraction scans
/// for a balanced object, so no fencing rules are imposed.
const PLANNER_INSTRUCTION: &str = "\
You are the Planner for a networking lab generator. An instructor wants a
hands-on lab exercise and you must pin down its requirements.

Ask one clarifying question at a time until you know enough: the topic,
the number and kind of devices, the target difficulty level, the time
budget, and any prerequisites worth assuming.

Once you have enough information, stop asking questions and respond with
a single JSON object containing exactly these fields and nothing else:

{
  \"title\": \"short lab title\",
  \"objectives\": [\"one objective per entry\"],
  \"constraints\": { \"device_count\": 2, \"time_minutes\": 30 },
  \"level\": \"difficulty level, e.g. CCNA\",
  \"prerequisites\": [\"assumed prior knowledge\"]
}

Do not emit partial JSON while you still have questions.";

/// Run the Planner dialog for one lab until it yields an exercise spec.
///
/// On success the lab is left in `planner_complete` with
/// `progress.exercise_spec` populated. `patch` carries RCA corrections
/// when the dialog is re-entered after a rewind; it is appended to the
/// conversation as an instructor-side message so role alternation holds.
///
/// # Errors
///
/// Fails on turn exhaustion, reply/dialog/pipeline timeouts, persistent
/// LLM errors, or a cancelled message channel.
pub async fn run_dialog(
    registry: &LabRegistry,
    llm: &dyn LlmClient,
    lab_id: &str,
    inbox: &mut mpsc::Receiver<String>,
    limits: &Limits,
    pipeline_deadline: Instant,
    patch: Option<&PatchPlan>,
) -> Result<(), PipelineError> {
    let planner_deadline = deadline_after(limits.planner_timeout).min(pipeline_deadline);

    if let Some(plan) = patch {
        let correction = format!(
            "The generated lab failed validation. Revise the exercise spec, \
             applying these corrections:\n{}",
            plan.patch_instructions
        );
        registry
            .mutate(lab_id, |lab| {
                lab.conversation.push(ChatMessage::user(correction));
            })
            .await?;
    }

    for turn in 0..limits.max_planner_turns {
        let conversation = registry
            .read(lab_id, |lab| lab.conversation.clone())
            .await?;

        let response = bounded_at(
            "planner dialog",
            planner_deadline,
            pipeline_deadline,
            generate_with_retry(
                llm,
                StageName::Planner,
                PLANNER_INSTRUCTION,
                &conversation,
                limits.max_stage_retries,
            ),
        )
        .await?;

        if let Some(spec) = extract::first_json::<ExerciseSpec>(&response) {
            registry
                .mutate(lab_id, |lab| {
                    lab.conversation.push(ChatMessage::assistant(response.clone()));
                    lab.progress.exercise_spec = Some(spec);
                    lab.status = LabStatus::PlannerComplete;
                    lab.awaiting_user_input = false;
                })
                .await?;
            info!(lab_id = %lab_id, turn, "planner produced a complete exercise spec");
            return Ok(());
        }

        debug!(lab_id = %lab_id, turn, "planner asked a clarifying question");
        registry
            .mutate(lab_id, |lab| {
                lab.conversation.push(ChatMessage::assistant(response.clone()));
                lab.status = LabStatus::AwaitingUserInput;
                lab.awaiting_user_input = true;
            })
            .await?;

        let message = wait_for_reply(inbox, limits, planner_deadline, pipeline_deadline).await?;

        registry
            .mutate(lab_id, |lab| {
                lab.conversation.push(ChatMessage::user(message));
                lab.status = LabStatus::PlannerRunning;
                lab.awaiting_user_input = false;
            })
            .await?;
    }

    Err(PipelineError::PlannerTurnsExhausted(limits.max_planner_turns))
}

/// Block until the instructor answers, bounded by the reply timeout and
/// both enclosing deadlines.
async fn wait_for_reply(
    inbox: &mut mpsc::Receiver<String>,
    limits: &Limits,
    planner_deadline: Instant,
    pipeline_deadline: Instant,
) -> Result<String, PipelineError> {
    let reply_deadline = deadline_after(limits.user_reply_timeout);
    let effective = reply_deadline.min(planner_deadline).min(pipeline_deadline);

    match tokio::time::timeout_at(effective, inbox.recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(PipelineError::Cancelled),
        Err(_) if effective == reply_deadline => Err(PipelineError::UserReplyTimeout),
        Err(_) => {
            let scope = if pipeline_deadline <= planner_deadline {
                "pipeline"
            } else {
                "planner dialog"
            };
            Err(PipelineError::Timeout {
                scope: scope.to_owned(),
            })
        }
    }
}
