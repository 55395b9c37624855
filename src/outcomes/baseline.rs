//! Baseline fallback predictions
//!
//! After each session, every active target that received no prediction gets a
//! neutral one so its outcome is still scored. Baselines carry
//! `metadata.baseline = true` so analytics can tell them apart.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BaselineConfig;
use crate::coordination::JobGuard;
use crate::domain::{Direction, Magnitude, Prediction, PredictionStatus, Target};
use crate::error::Result;
use crate::persistence::{PredictionRepository, SnapshotRepository, TargetRepository};
use crate::services::{TelemetryEmitter, TelemetryEvent};

const TELEMETRY_SOURCE: &str = "baseline_generator";
const BASELINE_CONFIDENCE: f64 = 0.5;
const BASELINE_TIMEFRAME_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaselineSummary {
    pub created: usize,
    /// Targets without a usable price
    pub skipped: usize,
    pub errors: usize,
    /// Symbols that received a baseline
    pub targets: Vec<String>,
}

/// Session close on the first weekday after `date`
pub fn next_session_close(date: NaiveDate, close_hour_utc: u32) -> Option<DateTime<Utc>> {
    let mut day = date.succ_opt()?;
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day = day.succ_opt()?;
    }
    let naive = day.and_hms_opt(close_hour_utc, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

pub struct BaselineFallbackGenerator {
    targets: Arc<dyn TargetRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    predictions: Arc<dyn PredictionRepository>,
    telemetry: Arc<dyn TelemetryEmitter>,
    config: BaselineConfig,
    guard: JobGuard,
}

impl BaselineFallbackGenerator {
    pub fn new<S>(store: Arc<S>, telemetry: Arc<dyn TelemetryEmitter>, config: BaselineConfig) -> Self
    where
        S: TargetRepository + SnapshotRepository + PredictionRepository + 'static,
    {
        Self {
            targets: store.clone(),
            snapshots: store.clone(),
            predictions: store,
            telemetry,
            config,
            guard: JobGuard::new(TELEMETRY_SOURCE),
        }
    }

    /// Create neutral predictions for every uncovered target on `date`.
    ///
    /// A target counts as covered if it has any prediction made during `date`.
    /// Baselines backfilled for a past date are stamped at the end of that day
    /// and expire at the session close following the sweep, not following `date`.
    /// Returns an empty summary if a sweep is already running.
    pub async fn create_baseline_predictions(
        &self,
        date: NaiveDate,
        universe_id: Option<Uuid>,
    ) -> BaselineSummary {
        let Some(_permit) = self.guard.try_acquire() else {
            return BaselineSummary::default();
        };

        let mut summary = BaselineSummary::default();

        let now = Utc::now();
        let (Some(window_start), Some(expires_at)) = (
            start_of_day(date),
            next_session_close(date.max(now.date_naive()), self.config.session_close_hour_utc),
        ) else {
            warn!("Cannot derive a session window for {}", date);
            summary.errors += 1;
            return summary;
        };
        let window_end = window_start + Duration::days(1);
        let predicted_at = now.min(window_end - Duration::seconds(1));

        let targets = match self.targets.list_active_targets(universe_id).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Listing targets for baseline sweep failed: {}", e);
                summary.errors += 1;
                return summary;
            }
        };

        for target in &targets {
            match self
                .baseline_for(target, date, window_start, window_end, expires_at, predicted_at)
                .await
            {
                Ok(BaselineOutcome::Created) => {
                    summary.created += 1;
                    summary.targets.push(target.symbol.clone());
                }
                Ok(BaselineOutcome::Covered) => {}
                Ok(BaselineOutcome::NoPrice) => summary.skipped += 1,
                Err(e) => {
                    warn!("Baseline for {} failed: {}", target.symbol, e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            "Baseline sweep for {}: created={}, skipped={}, errors={}",
            date, summary.created, summary.skipped, summary.errors
        );
        if summary.created > 0 {
            self.telemetry
                .push(TelemetryEvent::new(
                    TELEMETRY_SOURCE,
                    "baselines_created",
                    serde_json::json!({
                        "date": date,
                        "created": summary.created,
                        "skipped": summary.skipped,
                        "errors": summary.errors,
                    }),
                ))
                .await;
        }
        summary
    }

    async fn baseline_for(
        &self,
        target: &Target,
        date: NaiveDate,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        predicted_at: DateTime<Utc>,
    ) -> Result<BaselineOutcome> {
        if self
            .predictions
            .has_prediction_between(target.id, window_start, window_end)
            .await?
        {
            debug!("{} already has a prediction for {}", target.symbol, date);
            return Ok(BaselineOutcome::Covered);
        }

        let price = match self.snapshots.latest_snapshot(target.id).await? {
            Some(snapshot) => Some(snapshot.value),
            None => target.current_price,
        };
        let Some(price) = price.filter(|p| !p.is_zero()) else {
            debug!("{} has no known price, skipping baseline", target.symbol);
            return Ok(BaselineOutcome::NoPrice);
        };

        let prediction = Prediction {
            id: Uuid::new_v4(),
            target_id: target.id,
            direction: Direction::Flat,
            confidence: BASELINE_CONFIDENCE,
            magnitude: Magnitude::Small,
            timeframe_hours: BASELINE_TIMEFRAME_HOURS,
            predicted_at,
            expires_at,
            entry_price: Some(price),
            target_price: Some(price),
            stop_loss: Some(price * (Decimal::ONE - self.config.stop_loss_pct)),
            status: PredictionStatus::Active,
            outcome_value: None,
            outcome_captured_at: None,
            metadata: serde_json::json!({
                "baseline": true,
                "reason": "no_explicit_prediction",
                "baseline_date": date,
            }),
        };
        self.predictions.insert_prediction(&prediction).await?;
        Ok(BaselineOutcome::Created)
    }

    /// Flag resolved baselines since `since` whose absolute outcome exceeded
    /// the missed-opportunity threshold. Returns how many were newly flagged.
    pub async fn flag_missed_opportunities(&self, since: DateTime<Utc>) -> Result<usize> {
        let baselines = self.predictions.list_resolved_baselines(since).await?;
        let threshold = self.config.missed_opportunity_pct;

        let mut flagged = 0;
        for prediction in baselines {
            let Some(outcome) = prediction.outcome_value else {
                continue;
            };
            let already = prediction
                .metadata
                .get("missed_opportunity")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if already || outcome.abs() <= threshold {
                continue;
            }

            match self
                .predictions
                .merge_prediction_metadata(
                    prediction.id,
                    serde_json::json!({ "missed_opportunity": true }),
                )
                .await
            {
                Ok(()) => flagged += 1,
                Err(e) => warn!("Flagging {} failed: {}", prediction.id, e),
            }
        }

        if flagged > 0 {
            info!("Flagged {} missed opportunities since {}", flagged, since);
        }
        Ok(flagged)
    }
}

enum BaselineOutcome {
    Created,
    Covered,
    NoPrice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::domain::{TargetDomain, TargetSnapshot};
    use crate::services::telemetry::MockTelemetryEmitter;
    use async_trait::async_trait;
    use chrono::Timelike;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    /// Telemetry sink that parks the sweep that reports first until released
    struct GatedTelemetry {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TelemetryEmitter for GatedTelemetry {
        async fn push(&self, _event: TelemetryEvent) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    fn generator(store: Arc<InMemoryStore>) -> BaselineFallbackGenerator {
        let mut telemetry = MockTelemetryEmitter::new();
        telemetry.expect_push().returning(|_| ());
        BaselineFallbackGenerator::new(store, Arc::new(telemetry), BaselineConfig::default())
    }

    async fn target_with_price(store: &InMemoryStore, symbol: &str, price: Option<Decimal>) -> Target {
        let target = Target::new(symbol, TargetDomain::Stocks);
        store.insert_target(target.clone()).await;
        if let Some(value) = price {
            store
                .insert_snapshot(&TargetSnapshot {
                    target_id: target.id,
                    value,
                    captured_at: Utc::now() - Duration::minutes(5),
                    source: "seed".into(),
                })
                .await
                .unwrap();
        }
        target
    }

    #[test]
    fn test_next_session_close_skips_weekend() {
        // 2026-10-16 is a Friday
        let friday = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let close = next_session_close(friday, 21).unwrap();
        assert_eq!(close.date_naive(), NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(close.hour(), 21);

        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let close = next_session_close(tuesday, 21).unwrap();
        assert_eq!(close.date_naive(), NaiveDate::from_ymd_opt(2026, 10, 21).unwrap());
    }

    #[tokio::test]
    async fn test_creates_neutral_baseline() {
        let store = Arc::new(InMemoryStore::new());
        let target = target_with_price(&store, "AAPL", Some(dec!(180))).await;

        let today = Utc::now().date_naive();
        let summary = generator(store.clone())
            .create_baseline_predictions(today, None)
            .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.targets, vec!["AAPL".to_string()]);
        let predictions = store.predictions().await;
        let p = &predictions[0];
        assert_eq!(p.target_id, target.id);
        assert_eq!(p.direction, Direction::Flat);
        assert_eq!(p.magnitude, Magnitude::Small);
        assert_eq!(p.confidence, 0.5);
        assert_eq!(p.entry_price, Some(dec!(180)));
        assert_eq!(p.target_price, Some(dec!(180)));
        assert_eq!(p.stop_loss, Some(dec!(176.40)));
        assert!(p.is_baseline());
        assert_eq!(p.metadata["reason"], "no_explicit_prediction");
        assert_eq!(p.expires_at, next_session_close(today, 21).unwrap());
    }

    #[tokio::test]
    async fn test_zero_or_missing_price_is_skipped_not_error() {
        let store = Arc::new(InMemoryStore::new());
        target_with_price(&store, "ZERO", Some(Decimal::ZERO)).await;
        target_with_price(&store, "NONE", None).await;

        let summary = generator(store.clone())
            .create_baseline_predictions(Utc::now().date_naive(), None)
            .await;

        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors, 0);
    }

    #[tokio::test]
    async fn test_covered_targets_and_reruns_are_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        target_with_price(&store, "AAPL", Some(dec!(180))).await;
        let gen = generator(store.clone());
        let today = Utc::now().date_naive();

        assert_eq!(gen.create_baseline_predictions(today, None).await.created, 1);
        let rerun = gen.create_baseline_predictions(today, None).await;
        assert_eq!(rerun.created, 0);
        assert_eq!(rerun.skipped, 0);
        assert_eq!(store.predictions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_for_past_date() {
        let store = Arc::new(InMemoryStore::new());
        let target = target_with_price(&store, "AAPL", Some(dec!(180))).await;
        let gen = generator(store.clone());
        let now = Utc::now();
        let past = now.date_naive() - Duration::days(10);

        // A prediction made today does not cover a day ten days back.
        let mut explicit = Prediction {
            id: Uuid::new_v4(),
            target_id: target.id,
            direction: Direction::Up,
            confidence: 0.8,
            magnitude: Magnitude::Medium,
            timeframe_hours: 24,
            predicted_at: now,
            expires_at: now + Duration::hours(48),
            entry_price: Some(dec!(180)),
            target_price: Some(dec!(185)),
            stop_loss: None,
            status: PredictionStatus::Active,
            outcome_value: None,
            outcome_captured_at: None,
            metadata: serde_json::json!({}),
        };
        store.insert_prediction(&explicit).await.unwrap();

        let summary = gen.create_baseline_predictions(past, None).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors, 0);

        let baseline = store
            .predictions()
            .await
            .into_iter()
            .find(|p| p.is_baseline())
            .unwrap();
        assert_eq!(baseline.predicted_at.date_naive(), past);
        assert!(baseline.expires_at > now);
        assert_eq!(baseline.expires_at, next_session_close(now.date_naive(), 21).unwrap());
        assert_eq!(baseline.metadata["baseline_date"], serde_json::json!(past));

        // The backfilled baseline now covers that day.
        let rerun = gen.create_baseline_predictions(past, None).await;
        assert_eq!(rerun.created, 0);

        // A prediction inside the past day also counts as coverage.
        explicit.id = Uuid::new_v4();
        explicit.predicted_at = start_of_day(past - Duration::days(1)).unwrap() + Duration::hours(15);
        store.insert_prediction(&explicit).await.unwrap();
        let covered = gen
            .create_baseline_predictions(past - Duration::days(1), None)
            .await;
        assert_eq!(covered.created, 0);
        assert_eq!(store.predictions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_sweep_while_another_runs_returns_empty_summary() {
        let store = Arc::new(InMemoryStore::new());
        target_with_price(&store, "AAPL", Some(dec!(180))).await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gen = BaselineFallbackGenerator::new(
            store.clone(),
            Arc::new(GatedTelemetry {
                entered: entered.clone(),
                release: release.clone(),
            }),
            BaselineConfig::default(),
        );
        let today = Utc::now().date_naive();

        let (first, second) = tokio::join!(gen.create_baseline_predictions(today, None), async {
            entered.notified().await;
            let summary = gen.create_baseline_predictions(today, None).await;
            release.notify_one();
            summary
        });

        assert_eq!(second, BaselineSummary::default());
        assert_eq!(first.created, 1);
        assert_eq!(first.targets, vec!["AAPL".to_string()]);
        assert_eq!(store.predictions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_universe_filter() {
        let store = Arc::new(InMemoryStore::new());
        let universe = Uuid::new_v4();
        let mut inside = Target::new("IN", TargetDomain::Crypto);
        inside.universe_id = Some(universe);
        inside.current_price = Some(dec!(2));
        store.insert_target(inside).await;
        target_with_price(&store, "OUT", Some(dec!(3))).await;

        let summary = generator(store.clone())
            .create_baseline_predictions(Utc::now().date_naive(), Some(universe))
            .await;
        assert_eq!(summary.targets, vec!["IN".to_string()]);
    }

    #[tokio::test]
    async fn test_flag_missed_opportunities() {
        let store = Arc::new(InMemoryStore::new());
        target_with_price(&store, "AAPL", Some(dec!(100))).await;
        target_with_price(&store, "MSFT", Some(dec!(100))).await;
        let gen = generator(store.clone());
        let since = Utc::now() - Duration::hours(1);
        gen.create_baseline_predictions(Utc::now().date_naive(), None).await;

        let predictions = store.predictions().await;
        store
            .resolve_prediction(predictions[0].id, dec!(-0.8), Utc::now())
            .await
            .unwrap();
        store
            .resolve_prediction(predictions[1].id, dec!(0.5), Utc::now())
            .await
            .unwrap();

        assert_eq!(gen.flag_missed_opportunities(since).await.unwrap(), 1);
        let flagged = store.get_prediction(predictions[0].id).await.unwrap().unwrap();
        assert_eq!(flagged.metadata["missed_opportunity"], true);
        assert_eq!(flagged.metadata["baseline"], true);

        // Already flagged predictions are not counted again
        assert_eq!(gen.flag_missed_opportunities(since).await.unwrap(), 0);
    }
}
