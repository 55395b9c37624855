//! Pipeline Orchestrator
//!
//! Drives one run through the fixed stage sequence:
//! - Validates input before any stage executes
//! - Marks each stage transition and checkpoints state after every stage
//! - Converts the first stage failure into a failed run

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Instant;
use tracing::{error, info, warn};

use super::stages::{default_stages, PipelineContext, PipelineStage};
use super::state::PipelineRunState;
use crate::config::PipelineConfig;
use crate::coordination::JobGuard;
use crate::domain::{
    AgentConfig, RiskProfile, RunStatus, RunnerInput, RunnerOutput, MAX_LOOKBACK_HOURS,
};
use crate::error::{AugurError, Result};
use crate::persistence::CheckpointService;

/// Unique run id: `run-<epoch millis>-<9 random lowercase alphanumerics>`
pub fn generate_run_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("run-{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Reject malformed input. Nothing is executed or persisted for invalid input.
pub fn validate_input(input: &RunnerInput) -> Result<(&AgentConfig, RiskProfile)> {
    if input.agent_id.trim().is_empty() {
        return Err(AugurError::Validation("agent_id is required".to_string()));
    }
    if input.agent_slug.trim().is_empty() {
        return Err(AugurError::Validation("agent_slug is required".to_string()));
    }
    let config = input
        .config
        .as_ref()
        .ok_or_else(|| AugurError::Validation("config is required".to_string()))?;
    if config.instruments.is_empty() {
        return Err(AugurError::Validation(
            "config.instruments must not be empty".to_string(),
        ));
    }
    let risk = RiskProfile::try_from(config.risk_profile.as_str())
        .map_err(|e| AugurError::Validation(format!("config.risk_profile: {}", e)))?;
    if let Some(hours) = config.lookback_hours {
        if hours <= 0 {
            return Err(AugurError::Validation(
                "config.lookback_hours must be positive".to_string(),
            ));
        }
        if hours > MAX_LOOKBACK_HOURS {
            return Err(AugurError::Validation(format!(
                "config.lookback_hours must not exceed {}",
                MAX_LOOKBACK_HOURS
            )));
        }
    }
    Ok((config, risk))
}

pub struct PipelineOrchestrator {
    ctx: PipelineContext,
    stages: Vec<Box<dyn PipelineStage>>,
    checkpoints: CheckpointService,
    defaults: PipelineConfig,
    guard: JobGuard,
}

impl PipelineOrchestrator {
    pub fn new(ctx: PipelineContext, checkpoints: CheckpointService, defaults: PipelineConfig) -> Self {
        Self {
            ctx,
            stages: default_stages(),
            checkpoints,
            defaults,
            guard: JobGuard::new("pipeline"),
        }
    }

    /// Execute one run. Never returns an error: failures are reported in the output.
    pub async fn run_pipeline(&self, input: RunnerInput) -> RunnerOutput {
        let started = Instant::now();
        let run_id = generate_run_id();

        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Pipeline run for {} skipped: another run in flight", input.agent_slug);
            return RunnerOutput {
                run_id,
                status: RunStatus::Skipped,
                datapoint: None,
                recommendations: Vec::new(),
                error: Some("pipeline run already in progress".to_string()),
                total_duration_ms: elapsed_ms(started),
                metrics: serde_json::json!({}),
            };
        };

        let (config, risk) = match validate_input(&input) {
            Ok(v) => v,
            Err(e) => {
                warn!("Rejected pipeline input for '{}': {}", input.agent_slug, e);
                return RunnerOutput {
                    run_id,
                    status: RunStatus::Failed,
                    datapoint: None,
                    recommendations: Vec::new(),
                    error: Some(e.to_string()),
                    total_duration_ms: elapsed_ms(started),
                    metrics: serde_json::json!({}),
                };
            }
        };

        let mut state = PipelineRunState::new(
            run_id,
            input.agent_id.clone(),
            input.agent_slug.clone(),
            config.instruments.clone(),
            risk,
            config
                .thresholds
                .clone()
                .unwrap_or_else(|| self.defaults.thresholds.clone()),
            config.lookback_hours.unwrap_or(self.defaults.lookback_hours),
            Utc::now(),
        );

        for stage in &self.stages {
            state.mark_stage_complete(stage.stage(), Utc::now());

            if let Err(e) = stage.run(&self.ctx, &mut state).await {
                error!(run_id = %state.run_id, stage = stage.name(), "Stage failed: {}", e);
                state.fail(failure_message(e));
                self.checkpoint(&state).await;
                break;
            }

            self.checkpoint(&state).await;
        }

        let error = match state.status {
            RunStatus::Failed => state.errors.last().cloned(),
            _ => None,
        };
        let output = RunnerOutput {
            run_id: state.run_id.clone(),
            status: state.status,
            recommendations: std::mem::take(&mut state.recommendations),
            datapoint: state.datapoint.take(),
            error,
            total_duration_ms: elapsed_ms(started),
            metrics: serde_json::to_value(&state.metrics).unwrap_or_default(),
        };

        info!(
            run_id = %output.run_id,
            status = %output.status,
            duration_ms = output.total_duration_ms,
            "Pipeline run finished"
        );
        output
    }

    /// Persist state; a failed write is logged and the run carries on
    async fn checkpoint(&self, state: &PipelineRunState) {
        if let Err(e) = self.checkpoints.create_checkpoint(state).await {
            warn!(run_id = %state.run_id, "Checkpoint write failed: {}", e);
        }
    }

    /// Checkpointed state of a run, for inspection or a manual retry
    pub async fn load_run_state(&self, run_id: &str) -> Result<Option<PipelineRunState>> {
        let mut state = PipelineRunState::awaiting_restore(run_id);
        let restored = self.checkpoints.restore_checkpoint(&mut state).await?;
        Ok(restored.map(|_| state))
    }
}

/// The message surfaced in `RunnerOutput.error`
fn failure_message(e: AugurError) -> String {
    match e {
        AugurError::Stage { message, .. } => message,
        other => other.to_string(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
