//! Storage contracts for targets, predictions, snapshots and pipeline output

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Datapoint, Position, Prediction, Recommendation, Target, TargetSnapshot};
use crate::error::Result;

#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Active, non-archived targets, optionally limited to one universe
    async fn list_active_targets(&self, universe_id: Option<Uuid>) -> Result<Vec<Target>>;

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>>;

    async fn find_target_by_symbol(&self, symbol: &str) -> Result<Option<Target>>;

    /// Update the cached current price (last write wins)
    async fn update_current_price(
        &self,
        target_id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Append a snapshot; snapshots are never updated
    async fn insert_snapshot(&self, snapshot: &TargetSnapshot) -> Result<()>;

    async fn latest_snapshot(&self, target_id: Uuid) -> Result<Option<TargetSnapshot>>;

    /// Snapshot whose capture time is nearest to `at`, on either side
    async fn closest_snapshot(
        &self,
        target_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TargetSnapshot>>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<()>;

    async fn get_prediction(&self, id: Uuid) -> Result<Option<Prediction>>;

    async fn list_active_predictions(&self) -> Result<Vec<Prediction>>;

    /// Whether any prediction for the target was made in `[from, to)`
    async fn has_prediction_between(
        &self,
        target_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool>;

    /// Move an active prediction to resolved. Returns false if it was no longer active.
    async fn resolve_prediction(
        &self,
        id: Uuid,
        outcome_value: Decimal,
        captured_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Expire every active prediction with `expires_at` strictly before `cutoff`
    async fn expire_predictions(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn list_resolved_baselines(&self, since: DateTime<Utc>) -> Result<Vec<Prediction>>;

    /// Shallow-merge keys into the prediction's metadata object
    async fn merge_prediction_metadata(&self, id: Uuid, patch: serde_json::Value) -> Result<()>;
}

#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn open_positions_for_prediction(&self, prediction_id: Uuid) -> Result<Vec<Position>>;

    async fn close_position(
        &self,
        position_id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn save_datapoint(&self, datapoint: &Datapoint) -> Result<()>;

    async fn save_recommendations(
        &self,
        run_id: &str,
        agent_id: &str,
        recommendations: &[Recommendation],
    ) -> Result<()>;
}

/// Durable per-run state keyed by thread id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, thread_id: &str, state: serde_json::Value) -> Result<()>;

    async fn get(&self, thread_id: &str) -> Result<Option<serde_json::Value>>;
}
