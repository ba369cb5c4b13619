//! Pipeline driver: one task per lab, stages in order, RCA rewinds.
//!
//! The [`Orchestrator`] wires the registry and the external clients
//! together. `launch` installs a lab and spawns its driver task; the
//! task is the lab's single failure boundary, so every error lands in
//! `status=failed` with `error` populated and nothing ever reaches an
//! HTTP handler.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::clients::{ArtifactStore, LinterClient, LlmClient, RunnerClient};
use crate::config::Limits;
use crate::pipeline::{author, bounded, deadline_after, designer, planner, rca, validator};
use crate::pipeline::PipelineError;
use crate::registry::LabRegistry;
use crate::types::{LabOptions, LabStatus, RootCauseType, StageName};

/// Drives labs through the pipeline. One instance serves every lab;
/// each lab gets its own spawned task.
pub struct Orchestrator {
    registry: Arc<LabRegistry>,
    llm: Arc<dyn LlmClient>,
    linter: Arc<dyn LinterClient>,
    runner: Arc<dyn RunnerClient>,
    artifacts: Arc<dyn ArtifactStore>,
    limits: Limits,
}

impl Orchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        registry: Arc<LabRegistry>,
        llm: Arc<dyn LlmClient>,
        linter: Arc<dyn LinterClient>,
        runner: Arc<dyn RunnerClient>,
        artifacts: Arc<dyn ArtifactStore>,
        limits: Limits,
    ) -> Self {
        Self {
            registry,
            llm,
            linter,
            runner,
            artifacts,
            limits,
        }
    }

    /// The registry this orchestrator serves.
    pub fn registry(&self) -> &Arc<LabRegistry> {
        &self.registry
    }

    /// Install a lab and spawn its driver task. Returns immediately with
    /// the new lab id.
    pub async fn launch(self: &Arc<Self>, prompt: String, options: LabOptions) -> String {
        let (lab_id, inbox) = self.registry.create(prompt, options).await;
        let this = Arc::clone(self);
        let id = lab_id.clone();
        tokio::spawn(async move {
            this.drive(id, inbox).await;
        });
        lab_id
    }

    /// Run the pipeline to a terminal state, absorbing every failure.
    async fn drive(&self, lab_id: String, mut inbox: mpsc::Receiver<String>) {
        info!(lab_id = %lab_id, "pipeline started");
        if let Err(e) = self.run_pipeline(&lab_id, &mut inbox).await {
            warn!(lab_id = %lab_id, error = %e, "pipeline failed");
            let result = self
                .registry
                .mutate(&lab_id, |lab| {
                    lab.status = LabStatus::Failed;
                    lab.current_stage = None;
                    lab.awaiting_user_input = false;
                    lab.error = Some(e.to_string());
                })
                .await;
            if let Err(e) = result {
                warn!(lab_id = %lab_id, error = %e, "could not record failure");
            }
        }
    }

    async fn run_pipeline(
        &self,
        lab_id: &str,
        inbox: &mut mpsc::Receiver<String>,
    ) -> Result<(), PipelineError> {
        let pipeline_deadline = deadline_after(self.limits.pipeline_timeout);
        let options = self.registry.read(lab_id, |lab| lab.options).await?;
        let mut entry = StageName::Planner;
        let mut rewound = false;

        loop {
            if entry <= StageName::Planner {
                self.run_planner(lab_id, inbox, pipeline_deadline, rewound)
                    .await?;
            }

            if entry <= StageName::Designer {
                self.run_designer(lab_id, pipeline_deadline, rewound).await?;
            }

            self.run_author(lab_id, pipeline_deadline, rewound).await?;

            if options.dry_run {
                return self.complete(lab_id).await;
            }

            let retry_count = self.registry.read(lab_id, |lab| lab.retry_count).await?;
            let result = self
                .run_validator(lab_id, retry_count, pipeline_deadline)
                .await?;

            if result.success
                || result.skipped
                || !options.enable_rca
                || retry_count >= self.limits.max_rca_retries
            {
                // Exhausted retries still deliver the lab; the failing
                // validation stays visible in progress.
                return self.complete(lab_id).await;
            }

            entry = self.run_rca(lab_id, pipeline_deadline).await?;
            rewound = true;
        }
    }

    async fn run_planner(
        &self,
        lab_id: &str,
        inbox: &mut mpsc::Receiver<String>,
        pipeline_deadline: tokio::time::Instant,
        rewound: bool,
    ) -> Result<(), PipelineError> {
        self.transition(lab_id, LabStatus::PlannerRunning, StageName::Planner)
            .await?;
        let patch = if rewound {
            self.registry
                .read(lab_id, |lab| lab.progress.patch_plan.clone())
                .await?
                .filter(|p| p.target_agent.stage() == StageName::Planner)
        } else {
            None
        };
        planner::run_dialog(
            &self.registry,
            self.llm.as_ref(),
            lab_id,
            inbox,
            &self.limits,
            pipeline_deadline,
            patch.as_ref(),
        )
        .await
    }

    async fn run_designer(
        &self,
        lab_id: &str,
        pipeline_deadline: tokio::time::Instant,
        rewound: bool,
    ) -> Result<(), PipelineError> {
        self.transition(lab_id, LabStatus::DesignerRunning, StageName::Designer)
            .await?;
        let (spec, patch) = self
            .registry
            .read(lab_id, |lab| {
                (
                    lab.progress.exercise_spec.clone(),
                    lab.progress.patch_plan.clone(),
                )
            })
            .await?;
        let spec = spec.ok_or(PipelineError::BadArtifact {
            stage: StageName::Designer,
        })?;
        let patch = patch.filter(|p| rewound && p.target_agent.stage() == StageName::Designer);

        let output = bounded(
            "designer stage",
            self.limits.stage_timeout,
            pipeline_deadline,
            designer::run(
                self.llm.as_ref(),
                self.linter.as_ref(),
                &spec,
                patch.as_ref(),
                &self.limits,
            ),
        )
        .await?;

        self.registry
            .mutate(lab_id, |lab| {
                lab.progress.design_output = Some(output);
                lab.status = LabStatus::DesignerComplete;
            })
            .await?;
        Ok(())
    }

    async fn run_author(
        &self,
        lab_id: &str,
        pipeline_deadline: tokio::time::Instant,
        rewound: bool,
    ) -> Result<(), PipelineError> {
        self.transition(lab_id, LabStatus::AuthorRunning, StageName::Author)
            .await?;
        let (spec, design, patch) = self
            .registry
            .read(lab_id, |lab| {
                (
                    lab.progress.exercise_spec.clone(),
                    lab.progress.design_output.clone(),
                    lab.progress.patch_plan.clone(),
                )
            })
            .await?;
        let spec = spec.ok_or(PipelineError::BadArtifact {
            stage: StageName::Author,
        })?;
        let design = design.ok_or(PipelineError::BadArtifact {
            stage: StageName::Author,
        })?;
        let patch = patch.filter(|p| rewound && p.target_agent.stage() == StageName::Author);

        let guide = bounded(
            "author stage",
            self.limits.stage_timeout,
            pipeline_deadline,
            author::run(
                self.llm.as_ref(),
                self.linter.as_ref(),
                &spec,
                &design,
                patch.as_ref(),
                &self.limits,
            ),
        )
        .await?;

        self.registry
            .mutate(lab_id, |lab| {
                lab.progress.draft_lab_guide = Some(guide);
                lab.status = LabStatus::AuthorComplete;
            })
            .await?;
        Ok(())
    }

    async fn run_validator(
        &self,
        lab_id: &str,
        retry_count: u32,
        pipeline_deadline: tokio::time::Instant,
    ) -> Result<crate::types::ValidationResult, PipelineError> {
        self.transition(lab_id, LabStatus::ValidatorRunning, StageName::Validator)
            .await?;
        let (design, guide) = self
            .registry
            .read(lab_id, |lab| {
                (
                    lab.progress.design_output.clone(),
                    lab.progress.draft_lab_guide.clone(),
                )
            })
            .await?;

        let result = bounded(
            "validator",
            self.limits.validator_timeout,
            pipeline_deadline,
            validator::run(
                self.runner.as_ref(),
                self.artifacts.as_ref(),
                lab_id,
                retry_count,
                design.as_ref(),
                guide.as_ref(),
                &self.limits,
            ),
        )
        .await?;

        let recorded = result.clone();
        self.registry
            .mutate(lab_id, |lab| {
                lab.progress.validation_result = Some(recorded);
                lab.status = LabStatus::ValidatorComplete;
            })
            .await?;
        Ok(result)
    }

    /// Run RCA and prepare the rewind. Returns the stage to re-enter at.
    async fn run_rca(
        &self,
        lab_id: &str,
        pipeline_deadline: tokio::time::Instant,
    ) -> Result<StageName, PipelineError> {
        self.transition(lab_id, LabStatus::RcaRunning, StageName::Rca)
            .await?;
        let (spec, design, guide, validation) = self
            .registry
            .read(lab_id, |lab| {
                (
                    lab.progress.exercise_spec.clone(),
                    lab.progress.design_output.clone(),
                    lab.progress.draft_lab_guide.clone(),
                    lab.progress.validation_result.clone(),
                )
            })
            .await?;
        let validation = validation.ok_or_else(|| {
            PipelineError::RcaUnresolved("no validation result to analyze".to_owned())
        })?;

        let plan = bounded(
            "rca stage",
            self.limits.stage_timeout,
            pipeline_deadline,
            rca::run(
                self.llm.as_ref(),
                spec.as_ref(),
                design.as_ref(),
                guide.as_ref(),
                &validation,
                &self.limits,
            ),
        )
        .await?;

        if plan.root_cause_type == RootCauseType::Unknown {
            return Err(PipelineError::RcaUnresolved(
                "root cause classified UNKNOWN".to_owned(),
            ));
        }

        let target = plan.target_agent.stage();
        self.registry
            .mutate(lab_id, |lab| {
                lab.status = LabStatus::RcaComplete;
                lab.retry_count = lab.retry_count.saturating_add(1);
                lab.progress.patch_plan = Some(plan);
                lab.progress.discard_from(target);
            })
            .await?;
        info!(lab_id = %lab_id, target = %target, "rewinding pipeline");
        Ok(target)
    }

    async fn transition(
        &self,
        lab_id: &str,
        status: LabStatus,
        stage: StageName,
    ) -> Result<(), PipelineError> {
        self.registry
            .mutate(lab_id, |lab| {
                lab.status = status;
                lab.current_stage = Some(stage);
            })
            .await?;
        info!(lab_id = %lab_id, status = %status, "transition");
        Ok(())
    }

    async fn complete(&self, lab_id: &str) -> Result<(), PipelineError> {
        self.registry
            .mutate(lab_id, |lab| {
                lab.status = LabStatus::Completed;
                lab.current_stage = None;
            })
            .await?;
        info!(lab_id = %lab_id, "lab completed");
        Ok(())
    }
}
