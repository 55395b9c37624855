//! In-memory storage adapter for dry runs and tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    Claim, Datapoint, Position, Prediction, PredictionStatus, Recommendation, Target,
    TargetSnapshot,
};
use crate::error::Result;
use crate::persistence::{
    CheckpointStore, PositionRepository, PredictionRepository, RunRepository, SnapshotRepository,
    TargetRepository,
};
use crate::pipeline::{lookback_cutoff, HistoricalClaimsLookup};

/// Recommendations recorded for one run
#[derive(Debug, Clone)]
pub struct StoredRecommendations {
    pub run_id: String,
    pub agent_id: String,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Default)]
pub struct InMemoryStore {
    targets: RwLock<HashMap<Uuid, Target>>,
    snapshots: RwLock<Vec<TargetSnapshot>>,
    predictions: RwLock<HashMap<Uuid, Prediction>>,
    positions: RwLock<HashMap<Uuid, Position>>,
    datapoints: RwLock<Vec<Datapoint>>,
    recommendations: RwLock<Vec<StoredRecommendations>>,
    checkpoints: DashMap<String, serde_json::Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_target(&self, target: Target) {
        self.targets.write().await.insert(target.id, target);
    }

    pub async fn insert_position(&self, position: Position) {
        self.positions.write().await.insert(position.id, position);
    }

    pub async fn snapshots_for(&self, target_id: Uuid) -> Vec<TargetSnapshot> {
        self.snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.target_id == target_id)
            .cloned()
            .collect()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn predictions(&self) -> Vec<Prediction> {
        let mut all: Vec<Prediction> = self.predictions.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.predicted_at);
        all
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn datapoints(&self) -> Vec<Datapoint> {
        self.datapoints.read().await.clone()
    }

    pub async fn stored_recommendations(&self) -> Vec<StoredRecommendations> {
        self.recommendations.read().await.clone()
    }
}

#[async_trait]
impl TargetRepository for InMemoryStore {
    async fn list_active_targets(&self, universe_id: Option<Uuid>) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = self
            .targets
            .read()
            .await
            .values()
            .filter(|t| t.is_active && !t.is_archived)
            .filter(|t| universe_id.is_none() || t.universe_id == universe_id)
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(targets)
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        Ok(self.targets.read().await.get(&id).cloned())
    }

    async fn find_target_by_symbol(&self, symbol: &str) -> Result<Option<Target>> {
        Ok(self
            .targets
            .read()
            .await
            .values()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
            .cloned())
    }

    async fn update_current_price(
        &self,
        target_id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(target) = self.targets.write().await.get_mut(&target_id) {
            target.current_price = Some(price);
            target.price_updated_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryStore {
    async fn insert_snapshot(&self, snapshot: &TargetSnapshot) -> Result<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self, target_id: Uuid) -> Result<Option<TargetSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.target_id == target_id)
            .max_by_key(|s| s.captured_at)
            .cloned())
    }

    async fn closest_snapshot(
        &self,
        target_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TargetSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.target_id == target_id)
            .min_by_key(|s| (s.captured_at - at).num_milliseconds().abs())
            .cloned())
    }
}

#[async_trait]
impl PredictionRepository for InMemoryStore {
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        self.predictions
            .write()
            .await
            .insert(prediction.id, prediction.clone());
        Ok(())
    }

    async fn get_prediction(&self, id: Uuid) -> Result<Option<Prediction>> {
        Ok(self.predictions.read().await.get(&id).cloned())
    }

    async fn list_active_predictions(&self) -> Result<Vec<Prediction>> {
        let mut active: Vec<Prediction> = self
            .predictions
            .read()
            .await
            .values()
            .filter(|p| p.status == PredictionStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|p| p.predicted_at);
        Ok(active)
    }

    async fn has_prediction_between(
        &self,
        target_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .predictions
            .read()
            .await
            .values()
            .any(|p| p.target_id == target_id && p.predicted_at >= from && p.predicted_at < to))
    }

    async fn resolve_prediction(
        &self,
        id: Uuid,
        outcome_value: Decimal,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut predictions = self.predictions.write().await;
        match predictions.get_mut(&id) {
            Some(p) if p.status.can_transition_to(PredictionStatus::Resolved) => {
                p.status = PredictionStatus::Resolved;
                p.outcome_value = Some(outcome_value);
                p.outcome_captured_at = Some(captured_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_predictions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut expired = 0;
        for p in self.predictions.write().await.values_mut() {
            if p.status.can_transition_to(PredictionStatus::Expired) && p.expires_at < cutoff {
                p.status = PredictionStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn list_resolved_baselines(&self, since: DateTime<Utc>) -> Result<Vec<Prediction>> {
        Ok(self
            .predictions
            .read()
            .await
            .values()
            .filter(|p| p.status == PredictionStatus::Resolved && p.is_baseline())
            .filter(|p| p.outcome_captured_at.map(|t| t >= since).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn merge_prediction_metadata(&self, id: Uuid, patch: serde_json::Value) -> Result<()> {
        if let Some(p) = self.predictions.write().await.get_mut(&id) {
            if !p.metadata.is_object() {
                p.metadata = serde_json::json!({});
            }
            if let (Some(target), Some(source)) = (p.metadata.as_object_mut(), patch.as_object()) {
                for (k, v) in source {
                    target.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PositionRepository for InMemoryStore {
    async fn open_positions_for_prediction(&self, prediction_id: Uuid) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.prediction_id == prediction_id && p.is_open)
            .cloned()
            .collect())
    }

    async fn close_position(
        &self,
        position_id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        _closed_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(p) = self.positions.write().await.get_mut(&position_id) {
            p.exit_price = Some(exit_price);
            p.realized_pnl = Some(realized_pnl);
            p.is_open = false;
        }
        Ok(())
    }
}

#[async_trait]
impl RunRepository for InMemoryStore {
    async fn save_datapoint(&self, datapoint: &Datapoint) -> Result<()> {
        self.datapoints.write().await.push(datapoint.clone());
        Ok(())
    }

    async fn save_recommendations(
        &self,
        run_id: &str,
        agent_id: &str,
        recommendations: &[Recommendation],
    ) -> Result<()> {
        self.recommendations.write().await.push(StoredRecommendations {
            run_id: run_id.to_string(),
            agent_id: agent_id.to_string(),
            recommendations: recommendations.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl HistoricalClaimsLookup for InMemoryStore {
    async fn historical_claims(&self, instrument: &str, lookback_hours: i64) -> Result<Vec<Claim>> {
        let cutoff = lookback_cutoff(Utc::now(), lookback_hours)?;
        Ok(self
            .datapoints
            .read()
            .await
            .iter()
            .flat_map(|dp| dp.all_claims.iter())
            .filter(|c| c.instrument == instrument && c.timestamp >= cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn put(&self, thread_id: &str, state: serde_json::Value) -> Result<()> {
        self.checkpoints.insert(thread_id.to_string(), state);
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.checkpoints.get(thread_id).map(|v| v.value().clone()))
    }
}
