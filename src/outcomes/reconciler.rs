//! Outcome Reconciler
//!
//! Periodic job with three independent phases:
//! - Capture a price snapshot for every active target
//! - Resolve matured predictions against observed prices
//! - Expire predictions that outlived their window without usable data

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::PriceSource;
use crate::config::ReconcilerConfig;
use crate::coordination::{JobGuard, ShutdownListener};
use crate::domain::{Prediction, PredictionStatus, TargetSnapshot};
use crate::error::{AugurError, Result};
use crate::persistence::{
    PositionRepository, PredictionRepository, SnapshotRepository, TargetRepository,
};
use crate::services::{TelemetryEmitter, TelemetryEvent};

const TELEMETRY_SOURCE: &str = "outcome_reconciler";

/// Counts from one reconciliation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub snapshots_captured: usize,
    pub predictions_resolved: usize,
    pub predictions_expired: usize,
    pub errors: usize,
}

/// Percent move from `start` to `end`, rounded half away from zero to 2 places
pub fn outcome_percent(start: Decimal, end: Decimal) -> Option<Decimal> {
    if start.is_zero() {
        return None;
    }
    let pct = (end - start) / start * Decimal::ONE_HUNDRED;
    Some(pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

pub struct OutcomeReconciler {
    targets: Arc<dyn TargetRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    predictions: Arc<dyn PredictionRepository>,
    positions: Arc<dyn PositionRepository>,
    prices: Arc<dyn PriceSource>,
    telemetry: Arc<dyn TelemetryEmitter>,
    config: ReconcilerConfig,
    guard: JobGuard,
}

impl OutcomeReconciler {
    pub fn new<S>(
        store: Arc<S>,
        prices: Arc<dyn PriceSource>,
        telemetry: Arc<dyn TelemetryEmitter>,
        config: ReconcilerConfig,
    ) -> Self
    where
        S: TargetRepository
            + SnapshotRepository
            + PredictionRepository
            + PositionRepository
            + 'static,
    {
        Self {
            targets: store.clone(),
            snapshots: store.clone(),
            predictions: store.clone(),
            positions: store,
            prices,
            telemetry,
            config,
            guard: JobGuard::new(TELEMETRY_SOURCE),
        }
    }

    /// Run cycles on a fixed interval until shutdown is requested
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        info!(
            "Starting outcome reconciler (interval: {}s, fetch delay: {}ms)",
            self.config.interval_secs, self.config.fetch_delay_ms
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Both branches may be ready at once.
                    if shutdown.is_triggered() {
                        info!("Outcome reconciler stopping");
                        break;
                    }
                    let summary = self.run_once().await;
                    info!(
                        "Reconciliation: captured={}, resolved={}, expired={}, errors={}",
                        summary.snapshots_captured,
                        summary.predictions_resolved,
                        summary.predictions_expired,
                        summary.errors
                    );
                }
                _ = shutdown.triggered() => {
                    info!("Outcome reconciler stopping");
                    break;
                }
            }
        }
    }

    /// One full cycle. Returns an all-zero summary if a cycle is already running.
    pub async fn run_once(&self) -> ReconciliationSummary {
        let Some(_permit) = self.guard.try_acquire() else {
            return ReconciliationSummary::default();
        };

        let mut summary = ReconciliationSummary::default();

        let (captured, errors) = self.capture_snapshots().await;
        summary.snapshots_captured = captured;
        summary.errors += errors;

        let now = Utc::now();
        let (resolved, errors) = self.resolve_matured(now).await;
        summary.predictions_resolved = resolved;
        summary.errors += errors;

        match self.predictions.expire_predictions(now).await {
            Ok(expired) => summary.predictions_expired = expired as usize,
            Err(e) => {
                warn!("Expiring stale predictions failed: {}", e);
                summary.errors += 1;
            }
        }

        self.emit(&summary).await;
        summary
    }

    async fn emit(&self, summary: &ReconciliationSummary) {
        let events = [
            ("snapshots_captured", summary.snapshots_captured),
            ("predictions_resolved", summary.predictions_resolved),
            ("predictions_expired", summary.predictions_expired),
        ];
        for (event_type, count) in events {
            if count > 0 {
                self.telemetry
                    .push(TelemetryEvent::new(
                        TELEMETRY_SOURCE,
                        event_type,
                        serde_json::json!({ "count": count, "errors": summary.errors }),
                    ))
                    .await;
            }
        }
    }

    /// Phase A. Calls to the price source are spaced by the configured delay.
    async fn capture_snapshots(&self) -> (usize, usize) {
        let targets = match self.targets.list_active_targets(None).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Listing active targets failed: {}", e);
                return (0, 1);
            }
        };

        let delay = Duration::from_millis(self.config.fetch_delay_ms);
        let mut captured = 0;
        let mut errors = 0;

        for (i, target) in targets.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let price = match self.prices.fetch_price(target.domain, &target.symbol).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    debug!("No price for {}, skipping snapshot", target.symbol);
                    continue;
                }
                Err(e) => {
                    warn!("Price fetch for {} failed: {}", target.symbol, e);
                    errors += 1;
                    continue;
                }
            };

            let captured_at = Utc::now();
            let snapshot = TargetSnapshot {
                target_id: target.id,
                value: price,
                captured_at,
                source: self.prices.name().to_string(),
            };
            let stored = async {
                self.snapshots.insert_snapshot(&snapshot).await?;
                self.targets
                    .update_current_price(target.id, price, captured_at)
                    .await
            };
            match stored.await {
                Ok(()) => captured += 1,
                Err(e) => {
                    warn!("Storing snapshot for {} failed: {}", target.symbol, e);
                    errors += 1;
                }
            }
        }

        (captured, errors)
    }

    /// Phase B
    async fn resolve_matured(&self, now: DateTime<Utc>) -> (usize, usize) {
        let active = match self.predictions.list_active_predictions().await {
            Ok(active) => active,
            Err(e) => {
                warn!("Listing active predictions failed: {}", e);
                return (0, 1);
            }
        };

        let mut resolved = 0;
        let mut errors = 0;
        for prediction in active.iter().filter(|p| p.is_mature(now)) {
            match self.resolve_one(prediction, now).await {
                Ok(Some(outcome)) => {
                    debug!("Resolved {} with outcome {}%", prediction.id, outcome);
                    resolved += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Resolving prediction {} failed: {}", prediction.id, e);
                    errors += 1;
                }
            }
        }
        (resolved, errors)
    }

    /// Resolve one prediction from stored prices.
    ///
    /// `Ok(None)` means no usable price data, or the prediction stopped being
    /// active in the meantime.
    async fn resolve_one(
        &self,
        prediction: &Prediction,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>> {
        if !prediction.status.can_transition_to(PredictionStatus::Resolved) {
            return Ok(None);
        }
        let Some(start) = self
            .snapshots
            .closest_snapshot(prediction.target_id, prediction.predicted_at)
            .await?
        else {
            debug!("{}: no snapshot near prediction time", prediction.id);
            return Ok(None);
        };

        let cached = self
            .targets
            .get_target(prediction.target_id)
            .await?
            .and_then(|t| t.current_price);
        let end = match cached {
            Some(price) => price,
            None => match self.snapshots.latest_snapshot(prediction.target_id).await? {
                Some(snapshot) => snapshot.value,
                None => {
                    debug!("{}: no current price", prediction.id);
                    return Ok(None);
                }
            },
        };

        let Some(outcome) = outcome_percent(start.value, end) else {
            debug!("{}: start price is zero, skipping", prediction.id);
            return Ok(None);
        };

        if !self
            .predictions
            .resolve_prediction(prediction.id, outcome, now)
            .await?
        {
            return Ok(None);
        }

        self.close_positions(prediction.id, end, now).await;
        Ok(Some(outcome))
    }

    /// Close linked positions at the exit price. Failures never undo the resolution.
    async fn close_positions(&self, prediction_id: Uuid, exit_price: Decimal, at: DateTime<Utc>) {
        let positions = match self.positions.open_positions_for_prediction(prediction_id).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Loading positions for {} failed: {}", prediction_id, e);
                return;
            }
        };

        let mut total_pnl = Decimal::ZERO;
        for position in positions {
            let pnl = position.pnl_at(exit_price);
            match self
                .positions
                .close_position(position.id, exit_price, pnl, at)
                .await
            {
                Ok(()) => total_pnl += pnl,
                Err(e) => warn!("Closing position {} failed: {}", position.id, e),
            }
        }

        if !total_pnl.is_zero() {
            info!("Prediction {} closed positions, realized P&L {}", prediction_id, total_pnl);
        }
    }

    async fn load_active(&self, id: Uuid) -> Result<Prediction> {
        let prediction = self
            .predictions
            .get_prediction(id)
            .await?
            .ok_or_else(|| AugurError::NotFound(format!("prediction {}", id)))?;
        if !prediction.status.can_transition_to(PredictionStatus::Resolved) {
            return Err(AugurError::InvalidStateTransition {
                from: prediction.status.to_string(),
                to: PredictionStatus::Resolved.to_string(),
            });
        }
        Ok(prediction)
    }

    /// Resolve an active prediction now, whether or not it has matured
    pub async fn capture_outcome_manually(&self, id: Uuid) -> Result<Decimal> {
        let prediction = self.load_active(id).await?;
        match self.resolve_one(&prediction, Utc::now()).await? {
            Some(outcome) => {
                info!("Manually captured outcome {}% for {}", outcome, id);
                Ok(outcome)
            }
            None => Err(AugurError::MarketDataUnavailable(format!(
                "no usable price data for prediction {}",
                id
            ))),
        }
    }

    /// Record an operator-supplied outcome (percent) for an active prediction
    pub async fn resolve_manually(&self, id: Uuid, outcome: Decimal) -> Result<Decimal> {
        let prediction = self.load_active(id).await?;
        let outcome = outcome.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        if !self
            .predictions
            .resolve_prediction(prediction.id, outcome, Utc::now())
            .await?
        {
            return Err(AugurError::InvalidStateTransition {
                from: "non-active".to_string(),
                to: PredictionStatus::Resolved.to_string(),
            });
        }

        info!("Manually resolved {} with outcome {}%", id, outcome);
        Ok(outcome)
    }
}
