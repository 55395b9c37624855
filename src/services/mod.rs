pub mod telemetry;

pub use telemetry::{PgEventTelemetry, TelemetryEmitter, TelemetryEvent, TracingTelemetry};
