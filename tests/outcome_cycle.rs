use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use augur::adapters::{InMemoryStore, PriceSource};
use augur::config::{BaselineConfig, ReconcilerConfig};
use augur::domain::{
    Direction, Magnitude, Prediction, PredictionStatus, Target, TargetDomain, TargetSnapshot,
};
use augur::error::Result;
use augur::outcomes::{BaselineFallbackGenerator, OutcomeReconciler};
use augur::persistence::{PredictionRepository, SnapshotRepository};
use augur::services::{TelemetryEmitter, TelemetryEvent};

struct FixedPrices(HashMap<&'static str, Decimal>);

#[async_trait]
impl PriceSource for FixedPrices {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn fetch_price(&self, _domain: TargetDomain, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.0.get(symbol).copied())
    }
}

#[derive(Default)]
struct RecordingTelemetry(Mutex<Vec<TelemetryEvent>>);

impl RecordingTelemetry {
    fn event_types(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl TelemetryEmitter for RecordingTelemetry {
    async fn push(&self, event: TelemetryEvent) {
        self.0.lock().unwrap().push(event);
    }
}

fn prediction(target_id: Uuid, hours_ago: i64, entry: Decimal, baseline: bool) -> Prediction {
    let predicted_at = Utc::now() - Duration::hours(hours_ago);
    Prediction {
        id: Uuid::new_v4(),
        target_id,
        direction: Direction::Flat,
        confidence: 0.5,
        magnitude: Magnitude::Small,
        timeframe_hours: 24,
        predicted_at,
        expires_at: predicted_at + Duration::hours(48),
        entry_price: Some(entry),
        target_price: Some(entry),
        stop_loss: None,
        status: PredictionStatus::Active,
        outcome_value: None,
        outcome_captured_at: None,
        metadata: if baseline {
            serde_json::json!({ "baseline": true })
        } else {
            serde_json::json!({})
        },
    }
}

#[tokio::test]
async fn reconcile_then_backfill_then_flag() {
    let store = Arc::new(InMemoryStore::new());
    let telemetry = Arc::new(RecordingTelemetry::default());

    let aapl = Target::new("AAPL", TargetDomain::Stocks);
    let msft = Target::new("MSFT", TargetDomain::Stocks);
    let tsla = Target::new("TSLA", TargetDomain::Stocks);
    for target in [&aapl, &msft, &tsla] {
        store.insert_target(target.clone()).await;
    }

    // Yesterday's TSLA baseline has matured; MSFT already has a fresh prediction today.
    let matured = prediction(tsla.id, 25, dec!(200), true);
    store.insert_prediction(&matured).await.unwrap();
    store
        .insert_snapshot(&TargetSnapshot {
            target_id: tsla.id,
            value: dec!(200),
            captured_at: matured.predicted_at,
            source: "seed".into(),
        })
        .await
        .unwrap();
    store
        .insert_prediction(&prediction(msft.id, 0, dec!(410), false))
        .await
        .unwrap();

    let prices = Arc::new(FixedPrices(HashMap::from([
        ("AAPL", dec!(190)),
        ("MSFT", dec!(412)),
        ("TSLA", dec!(210)),
    ])));
    let reconciler = OutcomeReconciler::new(
        store.clone(),
        prices,
        telemetry.clone(),
        ReconcilerConfig {
            interval_secs: 60,
            fetch_delay_ms: 0,
        },
    );

    let summary = reconciler.run_once().await;
    assert_eq!(summary.snapshots_captured, 3);
    assert_eq!(summary.predictions_resolved, 1);
    assert_eq!(summary.errors, 0);

    let resolved = store.get_prediction(matured.id).await.unwrap().unwrap();
    assert_eq!(resolved.status, PredictionStatus::Resolved);
    assert_eq!(resolved.outcome_value, Some(dec!(5.00)));
    assert!(resolved.outcome_captured_at.is_some());

    let latest = store.latest_snapshot(aapl.id).await.unwrap().unwrap();
    assert_eq!(latest.value, dec!(190));
    assert_eq!(latest.source, "fixed");

    // Baselines for today: AAPL and TSLA are uncovered, MSFT is covered.
    let generator = BaselineFallbackGenerator::new(
        store.clone(),
        telemetry.clone(),
        BaselineConfig::default(),
    );
    let today = Utc::now().date_naive();
    let baselines = generator.create_baseline_predictions(today, None).await;
    assert_eq!(baselines.created, 2);
    assert_eq!(baselines.skipped, 0);
    assert_eq!(baselines.targets, vec!["AAPL".to_string(), "TSLA".to_string()]);

    let aapl_baseline = store
        .predictions()
        .await
        .into_iter()
        .find(|p| p.target_id == aapl.id)
        .expect("AAPL baseline created");
    assert!(aapl_baseline.is_baseline());
    assert_eq!(aapl_baseline.direction, Direction::Flat);
    assert_eq!(aapl_baseline.entry_price, Some(dec!(190)));

    // Running the sweep again for the same day changes nothing.
    let rerun = generator.create_baseline_predictions(today, None).await;
    assert_eq!(rerun.created, 0);

    // The resolved TSLA baseline moved 5%, well past the threshold.
    let flagged = generator
        .flag_missed_opportunities(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(flagged, 1);
    let tsla_after = store.get_prediction(matured.id).await.unwrap().unwrap();
    assert_eq!(tsla_after.metadata["missed_opportunity"], true);
    assert_eq!(tsla_after.metadata["baseline"], true);

    let again = generator
        .flag_missed_opportunities(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(again, 0);

    assert_eq!(
        telemetry.event_types(),
        vec![
            "snapshots_captured".to_string(),
            "predictions_resolved".to_string(),
            "baselines_created".to_string(),
        ]
    );
}

#[tokio::test]
async fn manual_resolution_overrides_the_feed() {
    let store = Arc::new(InMemoryStore::new());
    let target = Target::new("ETH", TargetDomain::Crypto);
    store.insert_target(target.clone()).await;
    let open = prediction(target.id, 2, dec!(3000), false);
    store.insert_prediction(&open).await.unwrap();

    let reconciler = OutcomeReconciler::new(
        store.clone(),
        Arc::new(FixedPrices(HashMap::new())),
        Arc::new(RecordingTelemetry::default()),
        ReconcilerConfig::default(),
    );

    let outcome = reconciler.resolve_manually(open.id, dec!(-1.234)).await.unwrap();
    assert_eq!(outcome, dec!(-1.23));

    let stored = store.get_prediction(open.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PredictionStatus::Resolved);
    assert_eq!(stored.outcome_value, Some(dec!(-1.23)));

    // Already resolved predictions cannot be resolved twice.
    assert!(reconciler.resolve_manually(open.id, dec!(2)).await.is_err());
}
