//! Designer stage: topology and per-device config synthesis.
//!
//! Thin adapter around the LLM plus the external linter. The LLM output
//! is linted (topology description and every device's initial command
//! sequence); lint findings are fed back into a re-invocation until the
//! retry budget runs out, at which point the stage either proceeds with
//! best-effort output or fails, per configuration.

use tracing::{info, warn};

use crate::clients::{CliLintOptions, LinterClient, LlmClient};
use crate::config::Limits;
use crate::pipeline::{
    extract, generate_with_retry, lint_cli_with_retry, lint_topology_with_retry, PipelineError,
};
use crate::types::{ChatMessage, DesignOutput, ExerciseSpec, PatchPlan, StageName};

/// System instruction for the Designer call.
const DESIGNER_INSTRUCTION: &str = "\
You are the Designer for a networking lab generator. You receive a
structured exercise spec and produce the lab's topology and device
configurations.

Respond with a single JSON object with exactly these fields:

{
  \"topology_yaml\": \"YAML topology description as one string\",
  \"initial_configs\": { \"device\": [\"one CLI command per entry\"] },
  \"target_configs\": { \"device\": [\"one CLI command per entry\"] },
  \"platforms\": { \"device\": \"platform tag, e.g. iosv\" }
}

Initial configs bring devices to the lab's starting point; target
configs represent the finished state the student works toward. Every
device in the topology must appear in all three maps.";

/// Fallback platform tag for devices the Designer left untagged.
const DEFAULT_PLATFORM: &str = "ios";

/// Run the Designer once: LLM call, lint loop, typed artifact out.
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
    patch: Option<&PatchPlan>,
    limits: &Limits,
) -> Result<DesignOutput, PipelineError> {
    let spec_json = serde_json::to_string_pretty(spec)
        .unwrap_or_else(|_| "(unserializable exercise spec)".to_owned());
    let mut feedback: Option<String> = None;

    for attempt in 0..=limits.max_stage_retries {
        let input = compose_input(&spec_json, patch, feedback.as_deref());
        let response = generate_with_retry(
            llm,
            StageName::Designer,
            DESIGNER_INSTRUCTION,
            &[ChatMessage::user(input)],
            limits.max_stage_retries,
        )
        .await?;

        let Some(mut output) = extract::first_json::<DesignOutput>(&response) else {
            if attempt < limits.max_stage_retries {
                warn!(attempt, "designer output was not a valid artifact, retrying");
                feedback = Some(
                    "Your previous reply did not contain a valid JSON object \
                     matching the required schema. Reply with the JSON object only."
                        .to_owned(),
                );
                continue;
            }
            return Err(PipelineError::BadArtifact {
                stage: StageName::Designer,
            });
        };

        let findings = lint_design(linter, &output, limits).await?;
        if findings.is_empty() {
            info!(attempt, devices = output.platforms.len(), "design accepted");
            return Ok(output);
        }

        if attempt < limits.max_stage_retries {
            warn!(attempt, findings = findings.len(), "design has lint errors, retrying");
            feedback = Some(format!(
                "The linter rejected parts of your previous design. Fix these \
                 findings and reply with the corrected JSON object:\n{}",
                findings.join("\n")
            ));
            continue;
        }

        if limits.strict_lint {
            return Err(PipelineError::LintFailed {
                stage: StageName::Designer,
                detail: findings.join("; "),
            });
        }

        warn!(findings = findings.len(), "design kept with unresolved lint findings");
        output.lint_findings = Some(findings);
        return Ok(output);
    }

    // Loop always returns within the final attempt.
    Err(PipelineError::BadArtifact {
        stage: StageName::Designer,
    })
}

/// Assemble the user-side input for one Designer invocation.
fn compose_input(spec_json: &str, patch: Option<&PatchPlan>, feedback: Option<&str>) -> String {
    let mut input = format!("## Exercise spec\n{spec_json}");
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

/// Lint the topology and every device's initial command sequence,
/// collecting human-readable findings.
async fn lint_design(
    linter: &dyn LinterClient,
    output: &DesignOutput,
    limits: &Limits,
) -> Result<Vec<String>, PipelineError> {
    let mut findings = Vec::new();

    let issues = lint_topology_with_retry(
        linter,
        StageName::Designer,
        &output.topology_yaml,
        limits.max_stage_retries,
    )
    .await?;
    for issue in issues {
        match issue.line {
            Some(line) => findings.push(format!("topology line {line}: {}", issue.message)),
            None => findings.push(format!("topology: {}", issue.message)),
        }
    }

    for (device, commands) in &output.initial_configs {
        let platform = output
            .platforms
            .get(device)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PLATFORM);
        let checks = lint_cli_with_retry(
            linter,
            StageName::Designer,
            platform,
            commands,
            CliLintOptions { config_mode: true },
            limits.max_stage_retries,
        )
        .await?;
        for check in checks.into_iter().filter(|c| !c.ok) {
            let message = check.message.unwrap_or_else(|| "rejected".to_owned());
            findings.push(format!("{device}: `{}`: {message}", check.command));
        }
    }

    Ok(findings)
}
