//! Pipeline run state
//!
//! One `PipelineRunState` exists per run id. Stages merge their outputs into it
//! and it is checkpointed after every stage under the run id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{
    Datapoint, EnrichedClaimBundle, EvaluatorVerdict, PreFilterThresholds, Recommendation,
    RiskProfile, RunStatus, SpecialistAnalysis, TriageResult,
};
use crate::persistence::Checkpointable;

/// Fixed, linear stage sequence of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    PollData,
    GroupClaims,
    Triage,
    ProcessBundles,
    Evaluate,
    Package,
    StoreResults,
    Complete,
}

impl Stage {
    pub const SEQUENCE: [Stage; 9] = [
        Stage::Init,
        Stage::PollData,
        Stage::GroupClaims,
        Stage::Triage,
        Stage::ProcessBundles,
        Stage::Evaluate,
        Stage::Package,
        Stage::StoreResults,
        Stage::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::PollData => "poll_data",
            Stage::GroupClaims => "group_claims",
            Stage::Triage => "triage",
            Stage::ProcessBundles => "process_bundles",
            Stage::Evaluate => "evaluate",
            Stage::Package => "package",
            Stage::StoreResults => "store_results",
            Stage::Complete => "complete",
        }
    }

    /// Position in the sequence
    pub fn index(&self) -> usize {
        Stage::SEQUENCE
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Milliseconds spent in each finished stage
    pub stage_durations: BTreeMap<String, i64>,
    pub bundles_total: usize,
    pub bundles_proceeded: usize,
    pub analyses: usize,
    pub recommendations: usize,
    pub predictions_opened: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunState {
    pub run_id: String,
    pub agent_id: String,
    pub agent_slug: String,
    pub instruments: Vec<String>,
    pub risk_profile: RiskProfile,
    pub thresholds: PreFilterThresholds,
    pub lookback_hours: i64,
    pub current_stage: Stage,
    pub stage_times: BTreeMap<String, DateTime<Utc>>,
    pub metrics: RunMetrics,
    pub errors: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub datapoint: Option<Datapoint>,
    pub bundles: Vec<EnrichedClaimBundle>,
    pub triage: Vec<TriageResult>,
    pub analyses: Vec<SpecialistAnalysis>,
    pub verdicts: Vec<EvaluatorVerdict>,
    pub recommendations: Vec<Recommendation>,
}

impl PipelineRunState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: String,
        agent_id: String,
        agent_slug: String,
        instruments: Vec<String>,
        risk_profile: RiskProfile,
        thresholds: PreFilterThresholds,
        lookback_hours: i64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            agent_id,
            agent_slug,
            instruments,
            risk_profile,
            thresholds,
            lookback_hours,
            current_stage: Stage::Init,
            stage_times: BTreeMap::new(),
            metrics: RunMetrics::default(),
            errors: Vec::new(),
            status: RunStatus::Running,
            started_at,
            datapoint: None,
            bundles: Vec::new(),
            triage: Vec::new(),
            analyses: Vec::new(),
            verdicts: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Record the transition into `stage`.
    ///
    /// Re-marking a stage that already has a timestamp is a no-op; durations of
    /// earlier stages are never overwritten by later marks.
    pub fn mark_stage_complete(&mut self, stage: Stage, now: DateTime<Utc>) {
        if self.stage_times.contains_key(stage.as_str()) {
            return;
        }

        let prev = self.current_stage;
        if prev != stage {
            if let Some(prev_started) = self.stage_times.get(prev.as_str()) {
                let elapsed = (now - *prev_started).num_milliseconds().max(0);
                self.metrics
                    .stage_durations
                    .insert(prev.as_str().to_string(), elapsed);
            }
        }

        self.stage_times.insert(stage.as_str().to_string(), now);
        self.current_stage = stage;
    }

    /// Placeholder that a checkpoint for `run_id` is restored into
    pub(crate) fn awaiting_restore(run_id: &str) -> Self {
        Self::new(
            run_id.to_string(),
            String::new(),
            String::new(),
            Vec::new(),
            RiskProfile::Moderate,
            PreFilterThresholds::default(),
            0,
            Utc::now(),
        )
    }

    pub fn fail(&mut self, message: String) {
        self.errors.push(message);
        self.status = RunStatus::Failed;
        self.recommendations.clear();
    }
}

impl Checkpointable for PipelineRunState {
    fn checkpoint_type(&self) -> &str {
        "pipeline_run"
    }

    fn thread_id(&self) -> &str {
        &self.run_id
    }

    fn to_checkpoint(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn from_checkpoint(&mut self, data: &serde_json::Value) -> Result<(), String> {
        let restored: PipelineRunState =
            serde_json::from_value(data.clone()).map_err(|e| e.to_string())?;
        if restored.run_id != self.run_id {
            return Err(format!(
                "checkpoint belongs to {} not {}",
                restored.run_id, self.run_id
            ));
        }
        *self = restored;
        Ok(())
    }

    fn version(&self) -> i32 {
        self.current_stage.index() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state() -> PipelineRunState {
        PipelineRunState::new(
            "run-1-abc".into(),
            "agent".into(),
            "agent-slug".into(),
            vec!["AAPL".into()],
            RiskProfile::Moderate,
            PreFilterThresholds::default(),
            24,
            Utc::now(),
        )
    }

    #[test]
    fn test_mark_stage_records_previous_duration() {
        let t0 = Utc::now();
        let mut s = state();
        s.mark_stage_complete(Stage::Init, t0);
        s.mark_stage_complete(Stage::PollData, t0 + Duration::milliseconds(120));
        s.mark_stage_complete(Stage::GroupClaims, t0 + Duration::milliseconds(200));

        assert_eq!(s.current_stage, Stage::GroupClaims);
        assert_eq!(s.stage_times.len(), 3);
        assert_eq!(s.metrics.stage_durations["init"], 120);
        assert_eq!(s.metrics.stage_durations["poll_data"], 80);
    }

    #[test]
    fn test_mark_stage_is_idempotent() {
        let t0 = Utc::now();
        let mut s = state();
        s.mark_stage_complete(Stage::Init, t0);
        s.mark_stage_complete(Stage::PollData, t0 + Duration::milliseconds(50));
        s.mark_stage_complete(Stage::PollData, t0 + Duration::milliseconds(900));

        assert_eq!(s.stage_times.len(), 2);
        assert_eq!(
            s.stage_times["poll_data"],
            t0 + Duration::milliseconds(50)
        );
        assert_eq!(s.metrics.stage_durations.len(), 1);
        assert_eq!(s.metrics.stage_durations["init"], 50);
    }

    #[test]
    fn test_checkpoint_round_trip_keeps_run() {
        let mut s = state();
        s.mark_stage_complete(Stage::Init, Utc::now());
        let data = s.to_checkpoint();

        let mut restored = state();
        restored.from_checkpoint(&data).unwrap();
        assert_eq!(restored.current_stage, Stage::Init);

        let mut other = state();
        other.run_id = "run-2-def".into();
        assert!(other.from_checkpoint(&data).is_err());
    }

    #[test]
    fn test_stage_sequence_order() {
        assert_eq!(Stage::Init.index(), 0);
        assert_eq!(Stage::Complete.index(), 8);
        assert_eq!(Stage::SEQUENCE[3].as_str(), "triage");
    }
}
