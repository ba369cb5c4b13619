//! RCA stage: root-cause classification of a failed validation.
//!
//! Stateless across iterations: it consumes only the progress artifacts
//! plus the validation result, and returns a patch plan. The driver owns
//! the iteration count and decides whether to rewind.

use serde::Serialize;
use tracing::info;

use crate::clients::LlmClient;
use crate::config::Limits;
use crate::pipeline::{extract, generate_with_retry, PipelineError};
use crate::types::{
    ChatMessage, DesignOutput, ExerciseSpec, LabGuide, PatchPlan, StageName, ValidationResult,
};

/// System instruction for the RCA call.
const RCA_INSTRUCTION: &str = "\
You are the failure analyst for a networking lab generator. A generated
lab was executed headlessly and failed validation. You receive the
exercise spec, the design, the lab guide, and the validation result.

Classify the root cause and respond with a single JSON object with
exactly these four fields:

{
  \"analysis\": \"short explanation of what went wrong\",
  \"root_cause_type\": \"DESIGN | INSTRUCTION | OBJECTIVES | UNKNOWN\",
  \"target_agent\": \"designer | author | planner\",
  \"patch_instructions\": \"concrete corrections for the target agent\"
}

Use DESIGN with target designer when the topology or device configs are
wrong, INSTRUCTION with target author when the guide's steps are wrong,
OBJECTIVES with target planner when the exercise spec itself is
unachievable. Use UNKNOWN only when the evidence supports none of them.";

/// Context bundle serialized into the RCA prompt.
#[derive(Debug, Serialize)]
struct RcaContext<'a> {
    exercise_spec: Option<&'a ExerciseSpec>,
    design_output: Option<&'a DesignOutput>,
    draft_lab_guide: Option<&'a LabGuide>,
    validation_result: &'a ValidationResult,
}

/// Classify a failed validation into a patch plan.
///
/// # Errors
///
/// Fails on persistent LLM errors; an unparseable response is reported
/// as [`PipelineError::RcaUnresolved`] so the driver fails the lab.
pub async fn run(
    llm: &dyn LlmClient,
    spec: Option<&ExerciseSpec>,
    design: Option<&DesignOutput>,
    guide: Option<&LabGuide>,
    validation: &ValidationResult,
    limits: &Limits,
) -> Result<PatchPlan, PipelineError> {
    let context = RcaContext {
        exercise_spec: spec,
        design_output: design,
        draft_lab_guide: guide,
        validation_result: validation,
    };
    let context_json = serde_json::to_string_pretty(&context)
        .unwrap_or_else(|_| "(unserializable context)".to_owned());

    let response = generate_with_retry(
        llm,
        StageName::Rca,
        RCA_INSTRUCTION,
        &[ChatMessage::user(format!("## Failure context\n{context_json}"))],
        limits.max_stage_retries,
    )
    .await?;

    let plan = extract::first_json::<PatchPlan>(&response).ok_or_else(|| {
        PipelineError::RcaUnresolved("analysis response carried no valid patch plan".to_owned())
    })?;

    info!(
        root_cause = ?plan.root_cause_type,
        target = %plan.target_agent.stage(),
        "root-cause analysis complete"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientError;
    use crate::types::{RcaTarget, RootCauseType};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedLlm {
        response: String,
        inputs: Mutex<Vec<String>>,
    }

    impl FixedLlm {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_owned(),
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn generate(
            &self,
            _system_instruction: &str,
            conversation: &[ChatMessage],
        ) -> Result<String, ClientError> {
            self.inputs.lock().expect("lock").push(
                conversation
                    .first()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            );
            Ok(self.response.clone())
        }
    }

    fn failed_validation() -> ValidationResult {
        ValidationResult {
            success: false,
            steps_passed: 3,
            steps_total: 10,
            error_summary: Some("r2 unreachable from r1".to_owned()),
            artifacts: vec![],
            skipped: false,
        }
    }

    #[tokio::test]
    async fn parses_patch_plan_from_prose_wrapped_json() {
        let llm = FixedLlm::new(
            r#"Looking at the failure, the steps are wrong.

{"analysis": "guide omits the return route", "root_cause_type": "INSTRUCTION",
 "target_agent": "author", "patch_instructions": "Add the r2 return route step."}"#,
        );

        let plan = run(&llm, None, None, None, &failed_validation(), &Limits::default())
            .await
            .expect("rca");
        assert_eq!(plan.root_cause_type, RootCauseType::Instruction);
        assert_eq!(plan.target_agent, RcaTarget::Author);
        assert!(plan.patch_instructions.contains("return route"));
    }

    #[tokio::test]
    async fn validation_result_reaches_the_prompt() {
        let llm = FixedLlm::new(
            r#"{"analysis": "a", "root_cause_type": "DESIGN",
 "target_agent": "designer", "patch_instructions": "p"}"#,
        );
        run(&llm, None, None, None, &failed_validation(), &Limits::default())
            .await
            .expect("rca");
        let inputs = llm.inputs.lock().expect("lock");
        assert!(inputs[0].contains("r2 unreachable from r1"));
    }

    #[tokio::test]
    async fn unparseable_response_is_unresolved() {
        let llm = FixedLlm::new("It is a mystery.");
        let err = run(&llm, None, None, None, &failed_validation(), &Limits::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, PipelineError::RcaUnresolved(_)));
    }

    #[tokio::test]
    async fn wrong_enum_label_is_unresolved() {
        let llm = FixedLlm::new(
            r#"{"analysis": "a", "root_cause_type": "COSMIC_RAYS",
 "target_agent": "designer", "patch_instructions": "p"}"#,
        );
        let err = run(&llm, None, None, None, &failed_validation(), &Limits::default())
            .await
            .expect_err("should fail");
        assert!(matches!(err, PipelineError::RcaUnresolved(_)));
    }
}
