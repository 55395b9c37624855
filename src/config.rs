use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::domain::{PreFilterThresholds, SignificanceWeights, TargetDomain, MAX_LOOKBACK_HOURS};

/// Upper bound for prediction timeframes and expiry grace (ten years)
const MAX_HORIZON_HOURS: i64 = 24 * 3660;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub price_source: PriceSourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// How far back historical claims are looked up
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    #[serde(default)]
    pub thresholds: PreFilterThresholds,
    #[serde(default)]
    pub weights: SignificanceWeights,
    /// Horizon of predictions opened from recommendations
    #[serde(default = "default_timeframe_hours")]
    pub prediction_timeframe_hours: i64,
    /// Extra time after maturity before an unresolved prediction expires
    #[serde(default = "default_timeframe_hours")]
    pub expiry_grace_hours: i64,
}

fn default_lookback_hours() -> i64 {
    24
}

fn default_timeframe_hours() -> i64 {
    24
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_hours: default_lookback_hours(),
            thresholds: PreFilterThresholds::default(),
            weights: SignificanceWeights::default(),
            prediction_timeframe_hours: default_timeframe_hours(),
            expiry_grace_hours: default_timeframe_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between reconciliation cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Pause between consecutive price fetches
    #[serde(default = "default_fetch_delay_ms")]
    pub fetch_delay_ms: u64,
}

fn default_interval_secs() -> u64 {
    900
}

fn default_fetch_delay_ms() -> u64 {
    15_000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_delay_ms: default_fetch_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaselineConfig {
    /// Hour (UTC) at which baseline predictions expire on the next session
    #[serde(default = "default_session_close_hour")]
    pub session_close_hour_utc: u32,
    /// Stop distance below entry (0.02 = 2%)
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Absolute outcome (in percent) above which a baseline counts as a missed opportunity
    #[serde(default = "default_missed_opportunity_pct")]
    pub missed_opportunity_pct: Decimal,
}

fn default_session_close_hour() -> u32 {
    21
}

fn default_stop_loss_pct() -> Decimal {
    dec!(0.02)
}

fn default_missed_opportunity_pct() -> Decimal {
    dec!(0.5)
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            session_close_hour_utc: default_session_close_hour(),
            stop_loss_pct: default_stop_loss_pct(),
            missed_opportunity_pct: default_missed_opportunity_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceSourceConfig {
    /// URL template per domain; `{symbol}` is replaced with the target symbol
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for PriceSourceConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PriceSourceConfig {
    pub fn endpoint_for(&self, domain: TargetDomain) -> Option<&str> {
        self.endpoints.get(domain.as_str()).map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AUGUR_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // AUGUR_DATABASE__URL, AUGUR_RECONCILER__INTERVAL_SECS, ...
            .add_source(
                Environment::with_prefix("AUGUR")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Configuration with every default applied, for local runs without config files
    pub fn default_config(database_url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: database_url.to_string(),
                max_connections: default_max_connections(),
            },
            pipeline: PipelineConfig::default(),
            reconciler: ReconcilerConfig::default(),
            baseline: BaselineConfig::default(),
            price_source: PriceSourceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values, reporting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url must be set".to_string());
        }

        let p = &self.pipeline;
        if p.lookback_hours <= 0 || p.lookback_hours > MAX_LOOKBACK_HOURS {
            errors.push(format!(
                "pipeline.lookback_hours must be within 1..={}",
                MAX_LOOKBACK_HOURS
            ));
        }
        if p.prediction_timeframe_hours <= 0 || p.prediction_timeframe_hours > MAX_HORIZON_HOURS {
            errors.push(format!(
                "pipeline.prediction_timeframe_hours must be within 1..={}",
                MAX_HORIZON_HOURS
            ));
        }
        if p.expiry_grace_hours < 0 || p.expiry_grace_hours > MAX_HORIZON_HOURS {
            errors.push(format!(
                "pipeline.expiry_grace_hours must be within 0..={}",
                MAX_HORIZON_HOURS
            ));
        }
        if !(0.0..=1.0).contains(&p.thresholds.min_significance_score) {
            errors.push("pipeline.thresholds.min_significance_score must be within [0, 1]".to_string());
        }
        if p.thresholds.min_price_change_percent < 0.0 || p.thresholds.min_sentiment_shift < 0.0 {
            errors.push("pipeline.thresholds must not be negative".to_string());
        }
        for custom in &p.thresholds.custom {
            if custom.key.trim().is_empty() {
                errors.push("pipeline.thresholds.custom entries need a key".to_string());
            }
        }
        let w = &p.weights;
        for (name, value) in [
            ("new_claims", w.new_claims),
            ("price_change", w.price_change),
            ("volume_change", w.volume_change),
            ("sentiment_shift", w.sentiment_shift),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("pipeline.weights.{} must be within [0, 1]", name));
            }
        }

        if self.reconciler.interval_secs == 0 {
            errors.push("reconciler.interval_secs must be positive".to_string());
        }

        if self.baseline.session_close_hour_utc > 23 {
            errors.push("baseline.session_close_hour_utc must be 0-23".to_string());
        }
        if self.baseline.stop_loss_pct <= Decimal::ZERO || self.baseline.stop_loss_pct >= Decimal::ONE {
            errors.push("baseline.stop_loss_pct must be between 0 and 1".to_string());
        }
        if self.baseline.missed_opportunity_pct < Decimal::ZERO {
            errors.push("baseline.missed_opportunity_pct must not be negative".to_string());
        }

        for (domain, template) in &self.price_source.endpoints {
            if TargetDomain::try_from(domain.as_str()).is_err() {
                errors.push(format!("price_source.endpoints has unknown domain '{}'", domain));
            }
            if !template.contains("{symbol}") {
                errors.push(format!(
                    "price_source.endpoints.{} must contain a {{symbol}} placeholder",
                    domain
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
