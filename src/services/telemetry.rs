//! Best-effort job telemetry
//!
//! Emitters never fail the caller: anything that goes wrong while recording
//! an event is logged and dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use tracing::{debug, info, warn};

/// One structured event emitted by a background job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Emitting component, e.g. `outcome_reconciler`
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(source: &str, event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            source: source.to_string(),
            event_type: event_type.to_string(),
            payload,
            emitted_at: Utc::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryEmitter: Send + Sync {
    async fn push(&self, event: TelemetryEvent);
}

/// Writes events to the log stream only
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetryEmitter for TracingTelemetry {
    async fn push(&self, event: TelemetryEvent) {
        info!(
            source = %event.source,
            event_type = %event.event_type,
            payload = %event.payload,
            "telemetry"
        );
    }
}

/// Append-only `telemetry_events` table
pub struct PgEventTelemetry {
    pool: PgPool,
}

impl PgEventTelemetry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append(&self, event: &TelemetryEvent) -> crate::error::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telemetry_events (source, event_type, payload, emitted_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.source)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.emitted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TelemetryEmitter for PgEventTelemetry {
    async fn push(&self, event: TelemetryEvent) {
        match self.append(&event).await {
            Ok(()) => debug!("Recorded {}/{}", event.source, event.event_type),
            Err(e) => warn!(
                "Dropping telemetry event {}/{}: {}",
                event.source, event.event_type, e
            ),
        }
    }
}
