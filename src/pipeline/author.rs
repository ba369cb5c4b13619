//! Author stage: student-facing lab-guide writing.
//!
//! Mirrors the Designer's shape: LLM call, artifact parse, lint loop
//! over each device section's command stream, best-effort or strict on
//! exhausted retries.

use tracing::{info, warn};

use crate::clients::{CliLintOptions, LinterClient, LlmClient};
use crate::config::Limits;
use crate::pipeline::{extract, generate_with_retry, lint_cli_with_retry, PipelineError};
use crate::types::{
    ChatMessage, DesignOutput, ExerciseSpec, LabGuide, PatchPlan, StageName, StepKind,
};

/// System instruction for the Author call.
const AUTHOR_INSTRUCTION: &str = "\
You are the Author for a networking lab generator. You receive an
exercise spec plus the lab's design (topology and device configs) and
write the student-facing lab guide.

Respond with a single JSON object with this shape:

{
  \"title\": \"guide title\",
  \"estimated_minutes\": 30,
  \"objectives\": [\"optional restated objectives\"],
  \"prerequisites\": [\"optional restated prerequisites\"],
  \"devices\": [
    {
      \"name\": \"r1\",
      \"platform\": \"iosv\",
      \"role\": \"optional role\",
      \"interfaces\": { \"GigabitEthernet0/0\": \"10.0.0.1/30\" },
      \"steps\": [
        { \"type\": \"cmd\", \"value\": \"configure terminal\", \"description\": \"enter config mode\" },
        { \"type\": \"verify\", \"value\": \"show ip route\", \"description\": \"confirm the static route\" },
        { \"type\": \"note\", \"value\": \"plain guidance text\", \"description\": \"\" },
        { \"type\": \"output\", \"value\": \"expected output sample\", \"description\": \"\" }
      ]
    }
  ],
  \"troubleshooting\": [\"optional tips\"]
}

Steps must follow the design's target configs; students type only what
the steps contain. Include verification steps for every objective.";

/// Run the Author once: LLM call, lint loop, typed artifact out.
///
/// # Errors
///
/// Fails on persistent external errors, unparseable output after
/// retries, or (under strict lint) findings that survive the retry
/// budget.
pub async fn run(
    llm: &dyn LlmClient,
    linter: &dyn LinterClient,
    spec: &ExerciseSpec,
    design: &DesignOutput,
    patch: Option<&PatchPlan>,
    limits: &Limits,
) -> Result<LabGuide, PipelineError> {
    let spec_json = serde_json::to_string_pretty(spec)
        .unwrap_or_else(|_| "(unserializable exercise spec)".to_owned());
    let design_json = serde_json::to_string_pretty(design)
        .unwrap_or_else(|_| "(unserializable design)".to_owned());
    let mut feedback: Option<String> = None;

    for attempt in 0..=limits.max_stage_retries {
        let input = compose_input(&spec_json, &design_json, patch, feedback.as_deref());
        let response = generate_with_retry(
            llm,
            StageName::Author,
            AUTHOR_INSTRUCTION,
            &[ChatMessage::user(input)],
            limits.max_stage_retries,
        )
        .await?;

        let Some(mut guide) = extract::first_json::<LabGuide>(&response) else {
            if attempt < limits.max_stage_retries {
                warn!(attempt, "author output was not a valid artifact, retrying");
                feedback = Some(
                    "Your previous reply did not contain a valid JSON object \
                     matching the required schema. Reply with the JSON object only."
                        .to_owned(),
                );
                continue;
            }
            return Err(PipelineError::BadArtifact {
                stage: StageName::Author,
            });
        };

        let findings = lint_guide(linter, &guide, limits).await?;
        if findings.is_empty() {
            info!(attempt, devices = guide.devices.len(), "lab guide accepted");
            return Ok(guide);
        }

        if attempt < limits.max_stage_retries {
            warn!(attempt, findings = findings.len(), "guide has lint errors, retrying");
            feedback = Some(format!(
                "The linter rejected commands in your previous guide. Fix these \
                 findings and reply with the corrected JSON object:\n{}",
                findings.join("\n")
            ));
            continue;
        }

        if limits.strict_lint {
            return Err(PipelineError::LintFailed {
                stage: StageName::Author,
                detail: findings.join("; "),
            });
        }

        warn!(findings = findings.len(), "guide kept with unresolved lint findings");
        guide.lint_findings = Some(findings);
        return Ok(guide);
    }

    Err(PipelineError::BadArtifact {
        stage: StageName::Author,
    })
}

/// Assemble the user-side input for one Author invocation.
fn compose_input(
    spec_json: &str,
    design_json: &str,
    patch: Option<&PatchPlan>,
    feedback: Option<&str>,
) -> String {
    let mut input = format!("## Exercise spec\n{spec_json}\n\n## Design\n{design_json}");
    if let Some(plan) = patch {
        input.push_str(&format!(
            "\n\n## Corrections from failure analysis\n{}",
            plan.patch_instructions
        ));
    }
    if let Some(feedback) = feedback {
        input.push_str(&format!("\n\n## Reviewer feedback\n{feedback}"));
    }
    input
}

/// Lint every device section's command stream (cmd and verify steps).
async fn lint_guide(
    linter: &dyn LinterClient,
    guide: &LabGuide,
    limits: &Limits,
) -> Result<Vec<String>, PipelineError> {
    let mut findings = Vec::new();

    for section in &guide.devices {
        let commands: Vec<String> = section
            .steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::Cmd | StepKind::Verify))
            .map(|s| s.value.clone())
            .collect();
        if commands.is_empty() {
            continue;
        }

        let checks = lint_cli_with_retry(
            linter,
            StageName::Author,
            &section.platform,
            &commands,
            CliLintOptions { config_mode: false },
            limits.max_stage_retries,
        )
        .await?;
        for check in checks.into_iter().filter(|c| !c.ok) {
            let message = check.message.unwrap_or_else(|| "rejected".to_owned());
            findings.push(format!("{}: `{}`: {message}", section.name, check.command));
        }
    }

    Ok(findings)
}
