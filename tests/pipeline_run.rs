use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use augur::adapters::InMemoryStore;
use augur::config::PipelineConfig;
use augur::domain::{
    AgentConfig, Claim, Direction, PredictionStatus, RecommendationAction, RunStatus, RunnerInput,
    Source, Target, TargetDomain,
};
use augur::error::{AugurError, Result};
use augur::persistence::CheckpointService;
use augur::pipeline::{
    ClaimDiffEngine, DataTool, PipelineContext, PipelineOrchestrator, RuleBasedAnalyst, Stage,
};
use rust_decimal_macros::dec;

/// Replays one scripted price per call for every requested instrument
struct ScriptedPriceTool {
    prices: Mutex<VecDeque<f64>>,
}

impl ScriptedPriceTool {
    fn new(prices: &[f64]) -> Self {
        Self {
            prices: Mutex::new(prices.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl DataTool for ScriptedPriceTool {
    fn name(&self) -> &str {
        "scripted_prices"
    }

    async fn execute(&self, instruments: &[String]) -> Result<Vec<Source>> {
        let price = self
            .prices
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| AugurError::MarketDataUnavailable("script exhausted".into()))?;
        let now = Utc::now();
        let claims = instruments
            .iter()
            .map(|i| Claim::new("price", i.as_str(), price, now).with_unit("USD"))
            .collect();
        Ok(vec![Source {
            tool: self.name().to_string(),
            claims,
            fetched_at: now,
            published_at: None,
        }])
    }
}

struct FailingTool;

#[async_trait]
impl DataTool for FailingTool {
    fn name(&self) -> &str {
        "broken_feed"
    }

    async fn execute(&self, _instruments: &[String]) -> Result<Vec<Source>> {
        Err(AugurError::MarketDataUnavailable("upstream returned 503".into()))
    }
}

fn orchestrator(store: &Arc<InMemoryStore>, tool: Arc<dyn DataTool>) -> PipelineOrchestrator {
    let defaults = PipelineConfig::default();
    let ctx = PipelineContext {
        engine: ClaimDiffEngine::new(defaults.weights.clone()),
        tools: vec![tool],
        history: store.clone(),
        analyst: Arc::new(RuleBasedAnalyst::default()),
        runs: store.clone(),
        targets: store.clone(),
        predictions: store.clone(),
        prediction_timeframe_hours: 24,
        expiry_grace_hours: 24,
        stop_loss_pct: dec!(0.02),
    };
    PipelineOrchestrator::new(ctx, CheckpointService::new(store.clone()), defaults)
}

fn input(instruments: &[&str]) -> RunnerInput {
    RunnerInput {
        agent_id: "agent-7".into(),
        agent_slug: "momentum".into(),
        config: Some(AgentConfig {
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            risk_profile: "moderate".into(),
            thresholds: None,
            lookback_hours: Some(6),
        }),
    }
}

#[tokio::test]
async fn price_breakout_opens_a_prediction() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_target(Target::new("AAPL", TargetDomain::Stocks)).await;
    let pipeline = orchestrator(&store, Arc::new(ScriptedPriceTool::new(&[100.0, 105.0])));

    // First run only establishes history.
    let first = pipeline.run_pipeline(input(&["AAPL"])).await;
    assert_eq!(first.status, RunStatus::Completed);
    assert!(first.recommendations.is_empty());
    assert!(first.datapoint.is_some());

    let second = pipeline.run_pipeline(input(&["AAPL"])).await;
    assert_eq!(second.status, RunStatus::Completed, "error: {:?}", second.error);
    assert!(second.error.is_none());
    assert_eq!(second.recommendations.len(), 1);
    let rec = &second.recommendations[0];
    assert_eq!(rec.instrument, "AAPL");
    assert_eq!(rec.action, RecommendationAction::Buy);
    assert!(rec.confidence >= 0.6);
    assert_eq!(second.metrics["predictions_opened"], 1);

    let predictions = store.predictions().await;
    assert_eq!(predictions.len(), 1);
    let prediction = &predictions[0];
    assert_eq!(prediction.direction, Direction::Up);
    assert_eq!(prediction.status, PredictionStatus::Active);
    assert_eq!(prediction.entry_price, Some(dec!(105)));
    assert_eq!(prediction.stop_loss, Some(dec!(102.90)));
    assert_eq!(prediction.metadata["run_id"], second.run_id.as_str());

    assert_eq!(store.datapoints().await.len(), 2);
    let stored = store.stored_recommendations().await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].run_id, second.run_id);
}

#[tokio::test]
async fn untracked_instrument_gets_no_prediction() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = orchestrator(&store, Arc::new(ScriptedPriceTool::new(&[50.0, 40.0])));

    pipeline.run_pipeline(input(&["XYZ"])).await;
    let output = pipeline.run_pipeline(input(&["XYZ"])).await;

    assert_eq!(output.status, RunStatus::Completed);
    assert_eq!(output.recommendations.len(), 1);
    assert_eq!(output.recommendations[0].action, RecommendationAction::Sell);
    assert!(store.predictions().await.is_empty());
}

#[tokio::test]
async fn invalid_input_runs_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = orchestrator(&store, Arc::new(ScriptedPriceTool::new(&[100.0])));

    let mut bad = input(&["AAPL"]);
    bad.config = None;
    let output = pipeline.run_pipeline(bad).await;

    assert_eq!(output.status, RunStatus::Failed);
    assert!(output.error.unwrap().contains("config"));
    assert!(output.datapoint.is_none());
    assert!(store.datapoints().await.is_empty());
    assert!(pipeline.load_run_state(&output.run_id).await.unwrap().is_none());
}

#[tokio::test]
async fn tool_failure_fails_run_and_checkpoints() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = orchestrator(&store, Arc::new(FailingTool));

    let output = pipeline.run_pipeline(input(&["AAPL"])).await;

    assert_eq!(output.status, RunStatus::Failed);
    assert!(output.recommendations.is_empty());
    let error = output.error.expect("failed run carries an error");
    assert!(error.contains("broken_feed"), "unexpected error: {error}");
    assert!(store.datapoints().await.is_empty());

    let state = pipeline
        .load_run_state(&output.run_id)
        .await
        .unwrap()
        .expect("failed run is checkpointed");
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.current_stage, Stage::PollData);
    assert_eq!(state.errors.last(), Some(&error));
    assert_eq!(state.instruments, vec!["AAPL".to_string()]);
}

#[tokio::test]
async fn completed_run_checkpoint_records_every_stage() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = orchestrator(&store, Arc::new(ScriptedPriceTool::new(&[100.0])));

    let output = pipeline.run_pipeline(input(&["AAPL", "MSFT"])).await;
    let state = pipeline
        .load_run_state(&output.run_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.current_stage, Stage::Complete);
    assert_eq!(state.stage_times.len(), 9);
    assert_eq!(state.metrics.bundles_total, 2);
    assert_eq!(state.agent_slug, "momentum");
}
