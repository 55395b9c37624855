use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    Claim, Datapoint, Direction, Magnitude, Position, PositionSide, Prediction, PredictionStatus,
    Recommendation, Target, TargetDomain, TargetSnapshot,
};
use crate::error::{AugurError, Result};
use crate::persistence::{
    CheckpointStore, PositionRepository, PredictionRepository, RunRepository, SnapshotRepository,
    TargetRepository,
};
use crate::pipeline::{lookback_cutoff, HistoricalClaimsLookup};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_enum<T>(value: &str, parse: impl Fn(&str) -> std::result::Result<T, String>) -> Result<T> {
    parse(value).map_err(AugurError::Internal)
}

fn row_to_target(r: &PgRow) -> Result<Target> {
    let domain: String = r.get("domain");
    Ok(Target {
        id: r.get("id"),
        symbol: r.get("symbol"),
        name: r.get("name"),
        domain: parse_enum(&domain, |s| TargetDomain::try_from(s))?,
        universe_id: r.get("universe_id"),
        current_price: r.get("current_price"),
        price_updated_at: r.get("price_updated_at"),
        is_active: r.get("is_active"),
        is_archived: r.get("is_archived"),
    })
}

fn row_to_snapshot(r: &PgRow) -> TargetSnapshot {
    TargetSnapshot {
        target_id: r.get("target_id"),
        value: r.get("value"),
        captured_at: r.get("captured_at"),
        source: r.get("source"),
    }
}

fn row_to_prediction(r: &PgRow) -> Result<Prediction> {
    let direction: String = r.get("direction");
    let magnitude: String = r.get("magnitude");
    let status: String = r.get("status");
    let metadata: Option<serde_json::Value> = r.get("metadata");

    Ok(Prediction {
        id: r.get("id"),
        target_id: r.get("target_id"),
        direction: parse_enum(&direction, |s| Direction::try_from(s))?,
        confidence: r.get("confidence"),
        magnitude: parse_enum(&magnitude, |s| Magnitude::try_from(s))?,
        timeframe_hours: r.get("timeframe_hours"),
        predicted_at: r.get("predicted_at"),
        expires_at: r.get("expires_at"),
        entry_price: r.get("entry_price"),
        target_price: r.get("target_price"),
        stop_loss: r.get("stop_loss"),
        status: parse_enum(&status, |s| PredictionStatus::try_from(s))?,
        outcome_value: r.get("outcome_value"),
        outcome_captured_at: r.get("outcome_captured_at"),
        metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
    })
}

const PREDICTION_COLUMNS: &str = "id, target_id, direction, confidence, magnitude, timeframe_hours, \
     predicted_at, expires_at, entry_price, target_price, stop_loss, status, outcome_value, \
     outcome_captured_at, metadata";

// ==================== Targets ====================

#[async_trait]
impl TargetRepository for PostgresStore {
    async fn list_active_targets(&self, universe_id: Option<Uuid>) -> Result<Vec<Target>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, name, domain, universe_id, current_price, price_updated_at,
                   is_active, is_archived
            FROM targets
            WHERE is_active = TRUE AND is_archived = FALSE
              AND ($1::uuid IS NULL OR universe_id = $1)
            ORDER BY symbol ASC
            "#,
        )
        .bind(universe_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_target).collect()
    }

    async fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, name, domain, universe_id, current_price, price_updated_at,
                   is_active, is_archived
            FROM targets WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_target).transpose()
    }

    async fn find_target_by_symbol(&self, symbol: &str) -> Result<Option<Target>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, name, domain, universe_id, current_price, price_updated_at,
                   is_active, is_archived
            FROM targets WHERE UPPER(symbol) = UPPER($1)
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_target).transpose()
    }

    #[instrument(skip(self))]
    async fn update_current_price(
        &self,
        target_id: Uuid,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE targets
            SET current_price = $2, price_updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(target_id)
        .bind(price)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ==================== Snapshots ====================

#[async_trait]
impl SnapshotRepository for PostgresStore {
    #[instrument(skip(self, snapshot), fields(target_id = %snapshot.target_id))]
    async fn insert_snapshot(&self, snapshot: &TargetSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO target_snapshots (target_id, value, captured_at, source)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(snapshot.target_id)
        .bind(snapshot.value)
        .bind(snapshot.captured_at)
        .bind(&snapshot.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_snapshot(&self, target_id: Uuid) -> Result<Option<TargetSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT target_id, value, captured_at, source
            FROM target_snapshots
            WHERE target_id = $1
            ORDER BY captured_at DESC
            LIMIT 1
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_snapshot))
    }

    async fn closest_snapshot(
        &self,
        target_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<TargetSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT target_id, value, captured_at, source
            FROM target_snapshots
            WHERE target_id = $1
            ORDER BY ABS(EXTRACT(EPOCH FROM (captured_at - $2))) ASC
            LIMIT 1
            "#,
        )
        .bind(target_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_snapshot))
    }
}

// ==================== Predictions ====================

#[async_trait]
impl PredictionRepository for PostgresStore {
    #[instrument(skip(self, prediction), fields(id = %prediction.id))]
    async fn insert_prediction(&self, prediction: &Prediction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO predictions (
                id, target_id, direction, confidence, magnitude, timeframe_hours,
                predicted_at, expires_at, entry_price, target_price, stop_loss,
                status, outcome_value, outcome_captured_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(prediction.id)
        .bind(prediction.target_id)
        .bind(prediction.direction.as_str())
        .bind(prediction.confidence)
        .bind(prediction.magnitude.as_str())
        .bind(prediction.timeframe_hours)
        .bind(prediction.predicted_at)
        .bind(prediction.expires_at)
        .bind(prediction.entry_price)
        .bind(prediction.target_price)
        .bind(prediction.stop_loss)
        .bind(prediction.status.as_str())
        .bind(prediction.outcome_value)
        .bind(prediction.outcome_captured_at)
        .bind(&prediction.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_prediction(&self, id: Uuid) -> Result<Option<Prediction>> {
        let sql = format!("SELECT {} FROM predictions WHERE id = $1", PREDICTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_prediction).transpose()
    }

    async fn list_active_predictions(&self) -> Result<Vec<Prediction>> {
        let sql = format!(
            "SELECT {} FROM predictions WHERE status = 'active' ORDER BY predicted_at ASC",
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_prediction).collect()
    }

    async fn has_prediction_between(
        &self,
        target_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM predictions
                WHERE target_id = $1 AND predicted_at >= $2 AND predicted_at < $3
            ) AS found
            "#,
        )
        .bind(target_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("found"))
    }

    #[instrument(skip(self))]
    async fn resolve_prediction(
        &self,
        id: Uuid,
        outcome_value: Decimal,
        captured_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE predictions
            SET status = 'resolved', outcome_value = $2, outcome_captured_at = $3
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(outcome_value)
        .bind(captured_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_predictions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE predictions
            SET status = 'expired'
            WHERE status = 'active' AND expires_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        debug!("Expired {} predictions", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn list_resolved_baselines(&self, since: DateTime<Utc>) -> Result<Vec<Prediction>> {
        let sql = format!(
            "SELECT {} FROM predictions \
             WHERE status = 'resolved' AND (metadata->>'baseline')::boolean IS TRUE \
               AND outcome_captured_at >= $1 \
             ORDER BY outcome_captured_at ASC",
            PREDICTION_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_prediction).collect()
    }

    async fn merge_prediction_metadata(&self, id: Uuid, patch: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE predictions
            SET metadata = COALESCE(metadata, '{}'::jsonb) || $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&patch)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ==================== Positions ====================

#[async_trait]
impl PositionRepository for PostgresStore {
    async fn open_positions_for_prediction(&self, prediction_id: Uuid) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, prediction_id, target_id, side, quantity, entry_price,
                   exit_price, realized_pnl, is_open
            FROM positions
            WHERE prediction_id = $1 AND is_open = TRUE
            "#,
        )
        .bind(prediction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let side: String = r.get("side");
                Ok(Position {
                    id: r.get("id"),
                    prediction_id: r.get("prediction_id"),
                    target_id: r.get("target_id"),
                    side: parse_enum(&side, |s| PositionSide::try_from(s))?,
                    quantity: r.get("quantity"),
                    entry_price: r.get("entry_price"),
                    exit_price: r.get("exit_price"),
                    realized_pnl: r.get("realized_pnl"),
                    is_open: r.get("is_open"),
                })
            })
            .collect()
    }

    async fn close_position(
        &self,
        position_id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions
            SET is_open = FALSE, exit_price = $2, realized_pnl = $3, closed_at = $4
            WHERE id = $1 AND is_open = TRUE
            "#,
        )
        .bind(position_id)
        .bind(exit_price)
        .bind(realized_pnl)
        .bind(closed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ==================== Runs ====================

#[async_trait]
impl RunRepository for PostgresStore {
    async fn save_datapoint(&self, datapoint: &Datapoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO datapoints (id, agent_id, timestamp, instruments, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&datapoint.id)
        .bind(&datapoint.agent_id)
        .bind(datapoint.timestamp)
        .bind(&datapoint.instruments)
        .bind(serde_json::to_value(datapoint)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_recommendations(
        &self,
        run_id: &str,
        agent_id: &str,
        recommendations: &[Recommendation],
    ) -> Result<()> {
        if recommendations.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for rec in recommendations {
            sqlx::query(
                r#"
                INSERT INTO recommendations (run_id, agent_id, instrument, action, confidence, urgency, rationale)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(run_id)
            .bind(agent_id)
            .bind(&rec.instrument)
            .bind(rec.action.as_str())
            .bind(rec.confidence)
            .bind(rec.urgency.as_str())
            .bind(&rec.rationale)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} recommendations for {}", recommendations.len(), run_id);
        Ok(())
    }
}

#[async_trait]
impl HistoricalClaimsLookup for PostgresStore {
    async fn historical_claims(&self, instrument: &str, lookback_hours: i64) -> Result<Vec<Claim>> {
        let cutoff = lookback_cutoff(Utc::now(), lookback_hours)?;
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM datapoints
            WHERE timestamp >= $1 AND $2 = ANY(instruments)
            ORDER BY timestamp ASC
            "#,
        )
        .bind(cutoff)
        .bind(instrument)
        .fetch_all(&self.pool)
        .await?;

        let mut claims = Vec::new();
        for row in rows {
            let payload: serde_json::Value = row.get("payload");
            let datapoint: Datapoint = serde_json::from_value(payload)?;
            claims.extend(
                datapoint
                    .all_claims
                    .into_iter()
                    .filter(|c| c.instrument == instrument && c.timestamp >= cutoff),
            );
        }

        Ok(claims)
    }
}

// ==================== Checkpoints ====================

#[async_trait]
impl CheckpointStore for PostgresStore {
    async fn put(&self, thread_id: &str, state: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_checkpoints (thread_id, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (thread_id) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = NOW()
            "#,
        )
        .bind(thread_id)
        .bind(&state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT state FROM pipeline_checkpoints WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("state")))
    }
}
