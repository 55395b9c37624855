//! Pipeline stage handlers
//!
//! Each handler reads and extends the shared [`PipelineRunState`]. Returning an
//! error aborts the run.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::claims_diff::{ClaimDiffEngine, PRICE_TYPES};
use super::state::{PipelineRunState, Stage};
use super::traits::{AnalysisCapability, DataTool, HistoricalClaimsLookup};
use crate::domain::{
    Datapoint, Direction, Magnitude, Prediction, PredictionStatus, Recommendation,
    RecommendationAction, Urgency,
};
use crate::error::{AugurError, Result};
use crate::persistence::{PredictionRepository, RunRepository, TargetRepository};

/// Collaborators shared by every stage of a run
pub struct PipelineContext {
    pub engine: ClaimDiffEngine,
    pub tools: Vec<Arc<dyn DataTool>>,
    pub history: Arc<dyn HistoricalClaimsLookup>,
    pub analyst: Arc<dyn AnalysisCapability>,
    pub runs: Arc<dyn RunRepository>,
    pub targets: Arc<dyn TargetRepository>,
    pub predictions: Arc<dyn PredictionRepository>,
    pub prediction_timeframe_hours: i64,
    pub expiry_grace_hours: i64,
    pub stop_loss_pct: Decimal,
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn stage(&self) -> Stage;

    fn name(&self) -> &'static str {
        self.stage().as_str()
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()>;
}

/// The fixed stage sequence, in execution order
pub fn default_stages() -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(InitStage),
        Box::new(PollDataStage),
        Box::new(GroupClaimsStage),
        Box::new(TriageStage),
        Box::new(ProcessBundlesStage),
        Box::new(EvaluateStage),
        Box::new(PackageStage),
        Box::new(StoreResultsStage),
        Box::new(CompleteStage),
    ]
}

pub struct InitStage;

#[async_trait]
impl PipelineStage for InitStage {
    fn stage(&self) -> Stage {
        Stage::Init
    }

    async fn run(&self, _ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        info!(
            run_id = %state.run_id,
            agent = %state.agent_slug,
            instruments = state.instruments.len(),
            risk = %state.risk_profile,
            "Starting pipeline run"
        );
        Ok(())
    }
}

pub struct PollDataStage;

#[async_trait]
impl PipelineStage for PollDataStage {
    fn stage(&self) -> Stage {
        Stage::PollData
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        let mut sources = Vec::new();
        for tool in &ctx.tools {
            let produced = tool.execute(&state.instruments).await.map_err(|e| {
                AugurError::stage(self.name(), format!("tool {} failed: {}", tool.name(), e))
            })?;
            debug!("Tool {} produced {} sources", tool.name(), produced.len());
            sources.extend(produced);
        }

        let datapoint = Datapoint::from_sources(&state.agent_id, sources, Utc::now());
        debug!(
            "Datapoint {} holds {} claims",
            datapoint.id,
            datapoint.all_claims.len()
        );
        state.datapoint = Some(datapoint);
        Ok(())
    }
}

pub struct GroupClaimsStage;

#[async_trait]
impl PipelineStage for GroupClaimsStage {
    fn stage(&self) -> Stage {
        Stage::GroupClaims
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        let datapoint = state
            .datapoint
            .as_ref()
            .ok_or_else(|| AugurError::stage(self.name(), "no datapoint collected"))?;

        let mut enriched = Vec::new();
        for bundle in ctx.engine.group_claims(datapoint) {
            let historical = ctx
                .history
                .historical_claims(&bundle.instrument, state.lookback_hours)
                .await?;
            let bundle = ctx.engine.enrich(bundle, historical, &state.thresholds);
            debug!(
                "{}: proceed={} ({})",
                bundle.instrument(),
                bundle.should_proceed,
                bundle.proceed_reason
            );
            enriched.push(bundle);
        }

        state.metrics.bundles_total = enriched.len();
        state.metrics.bundles_proceeded = enriched.iter().filter(|b| b.should_proceed).count();
        state.bundles = enriched;
        Ok(())
    }
}

pub struct TriageStage;

#[async_trait]
impl PipelineStage for TriageStage {
    fn stage(&self) -> Stage {
        Stage::Triage
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        let mut triage = Vec::with_capacity(state.bundles.len());
        for bundle in &state.bundles {
            let urgency = Urgency::from_significance(bundle.claims_diff.significance_score);
            let specialist_teams = if bundle.should_proceed {
                ctx.analyst.select_specialists(bundle, urgency).await?
            } else {
                Vec::new()
            };
            triage.push(crate::domain::TriageResult {
                instrument: bundle.instrument().to_string(),
                urgency,
                specialist_teams,
            });
        }
        state.triage = triage;
        Ok(())
    }
}

pub struct ProcessBundlesStage;

#[async_trait]
impl PipelineStage for ProcessBundlesStage {
    fn stage(&self) -> Stage {
        Stage::ProcessBundles
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        let mut analyses = Vec::new();
        for (bundle, triage) in state.bundles.iter().zip(&state.triage) {
            if !bundle.should_proceed {
                continue;
            }
            for team in &triage.specialist_teams {
                analyses.push(ctx.analyst.analyze(bundle, team).await?);
            }
        }
        state.metrics.analyses = analyses.len();
        state.analyses = analyses;
        Ok(())
    }
}

pub struct EvaluateStage;

#[async_trait]
impl PipelineStage for EvaluateStage {
    fn stage(&self) -> Stage {
        Stage::Evaluate
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        let mut verdicts = Vec::with_capacity(state.analyses.len());
        for analysis in &state.analyses {
            let bundle = state
                .bundles
                .iter()
                .find(|b| b.instrument() == analysis.instrument)
                .ok_or_else(|| {
                    AugurError::stage(
                        self.name(),
                        format!("analysis for unknown instrument {}", analysis.instrument),
                    )
                })?;
            verdicts.push(ctx.analyst.evaluate(bundle, analysis).await?);
        }
        state.verdicts = verdicts;
        Ok(())
    }
}

pub struct PackageStage;

#[async_trait]
impl PipelineStage for PackageStage {
    fn stage(&self) -> Stage {
        Stage::Package
    }

    async fn run(&self, _ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        state.recommendations = package_recommendations(state);
        state.metrics.recommendations = state.recommendations.len();
        Ok(())
    }
}

/// Turn passing analyses into at most one recommendation per instrument.
///
/// Passing analyses that disagree on direction cancel out. Recommendations
/// below the risk profile's confidence floor are dropped and the rest are
/// capped at the profile's per-run limit, strongest first.
fn package_recommendations(state: &PipelineRunState) -> Vec<Recommendation> {
    let min_confidence = state.risk_profile.min_confidence();
    let mut per_instrument: Vec<(String, Vec<(Direction, f64, String)>)> = Vec::new();

    for (analysis, verdict) in state.analyses.iter().zip(&state.verdicts) {
        if !verdict.passed || analysis.direction == Direction::Flat {
            continue;
        }
        let adjusted = (analysis.confidence * verdict.confidence_adjustment).clamp(0.0, 1.0);
        let note = format!(
            "{}: {} ({})",
            analysis.specialist, analysis.rationale, verdict.challenge
        );
        match per_instrument
            .iter_mut()
            .find(|(instrument, _)| *instrument == analysis.instrument)
        {
            Some((_, views)) => views.push((analysis.direction, adjusted, note)),
            None => per_instrument.push((
                analysis.instrument.clone(),
                vec![(analysis.direction, adjusted, note)],
            )),
        }
    }

    let urgency_of: HashMap<&str, Urgency> = state
        .triage
        .iter()
        .map(|t| (t.instrument.as_str(), t.urgency))
        .collect();

    let mut recommendations: Vec<Recommendation> = per_instrument
        .into_iter()
        .filter_map(|(instrument, views)| {
            let direction = views[0].0;
            if views.iter().any(|(d, _, _)| *d != direction) {
                debug!("{}: specialists disagree, no recommendation", instrument);
                return None;
            }
            let confidence = views.iter().map(|(_, c, _)| *c).fold(0.0, f64::max);
            if confidence < min_confidence {
                return None;
            }
            let action = match direction {
                Direction::Up => RecommendationAction::Buy,
                Direction::Down => RecommendationAction::Sell,
                Direction::Flat => RecommendationAction::Hold,
            };
            let rationale = views
                .into_iter()
                .map(|(_, _, note)| note)
                .collect::<Vec<_>>()
                .join("; ");
            Some(Recommendation {
                urgency: urgency_of
                    .get(instrument.as_str())
                    .copied()
                    .unwrap_or(Urgency::Low),
                instrument,
                action,
                confidence,
                rationale,
            })
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.urgency.cmp(&a.urgency))
    });
    recommendations.truncate(state.risk_profile.max_recommendations());
    recommendations
}

pub struct StoreResultsStage;

impl StoreResultsStage {
    /// Entry price: the run's own price claim, else the target's cached price
    fn entry_price(state: &PipelineRunState, instrument: &str) -> Option<Decimal> {
        state
            .datapoint
            .as_ref()?
            .all_claims
            .iter()
            .filter(|c| c.instrument == instrument && PRICE_TYPES.contains(&c.claim_type.as_str()))
            .filter_map(|c| c.value.as_f64())
            .last()
            .and_then(Decimal::from_f64)
    }

    async fn open_prediction(
        ctx: &PipelineContext,
        state: &PipelineRunState,
        rec: &Recommendation,
    ) -> Result<bool> {
        let Some(target) = ctx.targets.find_target_by_symbol(&rec.instrument).await? else {
            debug!("{} is not a tracked target, no prediction opened", rec.instrument);
            return Ok(false);
        };
        let Some(entry) = Self::entry_price(state, &rec.instrument).or(target.current_price)
        else {
            debug!("{} has no entry price, no prediction opened", rec.instrument);
            return Ok(false);
        };

        let direction = rec.action.direction();
        let magnitude = Magnitude::from_confidence(rec.confidence);
        let (target_price, stop_loss) = match direction {
            Direction::Down => (
                entry * (Decimal::ONE - magnitude.expected_move()),
                entry * (Decimal::ONE + ctx.stop_loss_pct),
            ),
            _ => (
                entry * (Decimal::ONE + magnitude.expected_move()),
                entry * (Decimal::ONE - ctx.stop_loss_pct),
            ),
        };

        let predicted_at = Utc::now();
        let prediction = Prediction {
            id: Uuid::new_v4(),
            target_id: target.id,
            direction,
            confidence: rec.confidence,
            magnitude,
            timeframe_hours: ctx.prediction_timeframe_hours,
            predicted_at,
            expires_at: predicted_at
                + Duration::hours(ctx.prediction_timeframe_hours + ctx.expiry_grace_hours),
            entry_price: Some(entry),
            target_price: Some(target_price),
            stop_loss: Some(stop_loss),
            status: PredictionStatus::Active,
            outcome_value: None,
            outcome_captured_at: None,
            metadata: serde_json::json!({
                "run_id": state.run_id,
                "agent_id": state.agent_id,
                "urgency": rec.urgency,
                "rationale": rec.rationale,
            }),
        };
        ctx.predictions.insert_prediction(&prediction).await?;
        Ok(true)
    }
}

#[async_trait]
impl PipelineStage for StoreResultsStage {
    fn stage(&self) -> Stage {
        Stage::StoreResults
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        if let Some(datapoint) = &state.datapoint {
            ctx.runs.save_datapoint(datapoint).await?;
        }
        ctx.runs
            .save_recommendations(&state.run_id, &state.agent_id, &state.recommendations)
            .await?;

        let mut opened = 0;
        for rec in &state.recommendations {
            if rec.action == RecommendationAction::Hold {
                continue;
            }
            match Self::open_prediction(ctx, state, rec).await {
                Ok(true) => opened += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to open prediction for {}: {}", rec.instrument, e),
            }
        }
        state.metrics.predictions_opened = opened;
        Ok(())
    }
}

pub struct CompleteStage;

#[async_trait]
impl PipelineStage for CompleteStage {
    fn stage(&self) -> Stage {
        Stage::Complete
    }

    async fn run(&self, _ctx: &PipelineContext, state: &mut PipelineRunState) -> Result<()> {
        state.status = crate::domain::RunStatus::Completed;
        info!(
            run_id = %state.run_id,
            recommendations = state.recommendations.len(),
            predictions = state.metrics.predictions_opened,
            "Pipeline run complete"
        );
        Ok(())
    }
}
