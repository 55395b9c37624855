use augur::adapters::{HttpPriceSource, PostgresStore, PriceClaimTool, PriceSource};
use augur::cli::{Cli, Commands};
use augur::config::{AppConfig, LoggingConfig};
use augur::coordination::{Shutdown, ShutdownListener};
use augur::domain::{RunStatus, RunnerInput};
use augur::error::{AugurError, Result};
use augur::outcomes::{BaselineFallbackGenerator, BaselineSummary, OutcomeReconciler};
use augur::persistence::CheckpointService;
use augur::pipeline::{ClaimDiffEngine, PipelineContext, PipelineOrchestrator, RuleBasedAnalyst};
use augur::services::{PgEventTelemetry, TelemetryEmitter};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc, Weekday};
use clap::{CommandFactory, Parser};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = load_config(&cli.config)?;

    match command {
        Commands::Migrate => {
            init_logging_simple();
            let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
            println!("Migrations applied");
        }
        Commands::Run { input } => {
            init_logging(&config.logging);
            let app = App::connect(&config).await?;
            let raw = tokio::fs::read_to_string(&input).await?;
            let input: RunnerInput = serde_json::from_str(&raw)?;

            let output = app.orchestrator().run_pipeline(input).await;
            println!("{}", serde_json::to_string_pretty(&output)?);
            if output.status == RunStatus::Failed {
                return Err(AugurError::Internal(
                    output.error.unwrap_or_else(|| "pipeline run failed".to_string()),
                ));
            }
        }
        Commands::Reconcile { once } => {
            init_logging(&config.logging);
            let app = App::connect(&config).await?;
            let reconciler = app.reconciler()?;
            if once {
                let summary = reconciler.run_once().await;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let shutdown = Shutdown::new();
                let listener = shutdown.subscribe();
                tokio::spawn(forward_shutdown_signal(shutdown));
                reconciler.run(listener).await;
            }
        }
        Commands::Baseline { date, universe } => {
            init_logging(&config.logging);
            let app = App::connect(&config).await?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let summary = app
                .baseline()
                .create_baseline_predictions(date, universe)
                .await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::FlagMissed { since } => {
            init_logging(&config.logging);
            let app = App::connect(&config).await?;
            let since = since.unwrap_or_else(|| Utc::now() - ChronoDuration::days(7));
            let flagged = app.baseline().flag_missed_opportunities(since).await?;
            println!("Flagged {} missed opportunities since {}", flagged, since);
        }
        Commands::Capture { id } => {
            init_logging_simple();
            let app = App::connect(&config).await?;
            let outcome = app.reconciler()?.capture_outcome_manually(id).await?;
            println!("Prediction {} resolved at {}% (captured from market)", id, outcome);
        }
        Commands::Resolve { id, outcome } => {
            init_logging_simple();
            let app = App::connect(&config).await?;
            let outcome = app.reconciler()?.resolve_manually(id, outcome).await?;
            println!("Prediction {} resolved at {}%", id, outcome);
        }
        Commands::Checkpoint { run_id } => {
            init_logging_simple();
            let app = App::connect(&config).await?;
            match app.orchestrator().load_run_state(&run_id).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => println!("No checkpoint for {}", run_id),
            }
        }
        Commands::Daemon => {
            init_logging(&config.logging);
            let app = App::connect(&config).await?;
            run_daemon(&app, &config).await?;
        }
    }

    Ok(())
}

fn load_config(dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    if let Err(problems) = config.validate() {
        return Err(AugurError::Validation(format!(
            "invalid configuration: {}",
            problems.join("; ")
        )));
    }
    Ok(config)
}

/// Shared collaborators for every command that touches the database
struct App {
    config: AppConfig,
    store: Arc<PostgresStore>,
    telemetry: Arc<dyn TelemetryEmitter>,
}

impl App {
    async fn connect(config: &AppConfig) -> Result<Self> {
        let store = Arc::new(
            PostgresStore::new(&config.database.url, config.database.max_connections).await?,
        );
        let telemetry: Arc<dyn TelemetryEmitter> =
            Arc::new(PgEventTelemetry::new(store.pool().clone()));
        Ok(Self {
            config: config.clone(),
            store,
            telemetry,
        })
    }

    fn prices(&self) -> Result<Arc<dyn PriceSource>> {
        Ok(Arc::new(HttpPriceSource::new(self.config.price_source.clone())?))
    }

    fn orchestrator(&self) -> PipelineOrchestrator {
        let pipeline = &self.config.pipeline;
        let mut tools: Vec<Arc<dyn augur::pipeline::DataTool>> = Vec::new();
        match self.prices() {
            Ok(prices) => tools.push(Arc::new(PriceClaimTool::new(prices, self.store.clone()))),
            Err(e) => warn!("Price feed unavailable, pipeline runs without it: {}", e),
        }

        let ctx = PipelineContext {
            engine: ClaimDiffEngine::new(pipeline.weights.clone()),
            tools,
            history: self.store.clone(),
            analyst: Arc::new(RuleBasedAnalyst::default()),
            runs: self.store.clone(),
            targets: self.store.clone(),
            predictions: self.store.clone(),
            prediction_timeframe_hours: pipeline.prediction_timeframe_hours,
            expiry_grace_hours: pipeline.expiry_grace_hours,
            stop_loss_pct: self.config.baseline.stop_loss_pct,
        };
        PipelineOrchestrator::new(
            ctx,
            CheckpointService::new(self.store.clone()),
            pipeline.clone(),
        )
    }

    fn reconciler(&self) -> Result<OutcomeReconciler> {
        Ok(OutcomeReconciler::new(
            self.store.clone(),
            self.prices()?,
            self.telemetry.clone(),
            self.config.reconciler.clone(),
        ))
    }

    fn baseline(&self) -> BaselineFallbackGenerator {
        BaselineFallbackGenerator::new(
            self.store.clone(),
            self.telemetry.clone(),
            self.config.baseline.clone(),
        )
    }
}

/// Reconciler loop plus a once-per-weekday baseline sweep after the session close
async fn run_daemon(app: &App, config: &AppConfig) -> Result<()> {
    let shutdown = Shutdown::new();

    let reconciler = app.reconciler()?;
    let reconciler_listener = shutdown.subscribe();
    let reconciler_task = tokio::spawn(async move {
        reconciler.run(reconciler_listener).await;
    });

    let baseline = app.baseline();
    let close_hour = config.baseline.session_close_hour_utc;
    let baseline_task = tokio::spawn(baseline_sweep(baseline, close_hour, shutdown.subscribe()));

    info!("Daemon started");
    shutdown_signal().await;
    shutdown.request_shutdown("signal received");

    for (name, task) in [("reconciler", reconciler_task), ("baseline", baseline_task)] {
        match tokio::time::timeout(Duration::from_secs(30), task).await {
            Ok(Ok(())) => info!("{} stopped", name),
            Ok(Err(e)) => error!("{} task panicked: {}", name, e),
            Err(_) => warn!("{} did not stop within 30s", name),
        }
    }

    info!("Daemon stopped");
    Ok(())
}

async fn baseline_sweep(
    generator: BaselineFallbackGenerator,
    close_hour_utc: u32,
    mut shutdown: ShutdownListener,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(600));
    let mut last_swept = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if shutdown.is_triggered() {
                    info!("Baseline sweep shutting down");
                    break;
                }
                let now = Utc::now();
                let today = now.date_naive();
                if !sweep_due(now, close_hour_utc, last_swept) {
                    continue;
                }

                let summary = generator.create_baseline_predictions(today, None).await;
                info!(
                    created = summary.created,
                    skipped = summary.skipped,
                    errors = summary.errors,
                    "Baseline sweep for {} finished",
                    today
                );
                if let Err(e) = generator
                    .flag_missed_opportunities(now - ChronoDuration::days(1))
                    .await
                {
                    warn!("Missed-opportunity flagging failed: {}", e);
                }
                if summary.errors > 0 {
                    warn!("Baseline sweep for {} had {} errors, retrying next tick", today, summary.errors);
                }
                last_swept = record_sweep(last_swept, today, &summary);
            }
            _ = shutdown.triggered() => {
                info!("Baseline sweep shutting down");
                break;
            }
        }
    }
}

/// Weekdays only, once the session has closed, at most once per day
fn sweep_due(now: DateTime<Utc>, close_hour_utc: u32, last_swept: Option<NaiveDate>) -> bool {
    let today = now.date_naive();
    let weekend = matches!(today.weekday(), Weekday::Sat | Weekday::Sun);
    !weekend && now.hour() >= close_hour_utc && last_swept != Some(today)
}

/// A sweep with errors leaves the day open so the next tick retries it
fn record_sweep(
    last_swept: Option<NaiveDate>,
    today: NaiveDate,
    summary: &BaselineSummary,
) -> Option<NaiveDate> {
    if summary.errors == 0 {
        Some(today)
    } else {
        last_swept
    }
}

async fn forward_shutdown_signal(shutdown: Shutdown) {
    shutdown_signal().await;
    shutdown.request_shutdown("signal received");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},augur=debug,sqlx=warn", logging.level)));

    let log_dir = std::env::var("AUGUR_LOG_DIR").ok();

    // tracing_appender::rolling::daily panics if it cannot create the file, so check first.
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let marker = Path::new(dir).join(".augur_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&marker) {
            Ok(_) => {
                let _ = std::fs::remove_file(&marker);
                let appender = tracing_appender::rolling::daily(dir, "augur.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                // Lives for the whole process.
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
                None
            }
        }
    });

    let console_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/augur.log", dir);
    }
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sweep_due_after_close_on_weekdays_only() {
        // 2026-10-16 is a Friday
        let friday_close = Utc.with_ymd_and_hms(2026, 10, 16, 21, 5, 0).unwrap();
        let friday = friday_close.date_naive();
        assert!(sweep_due(friday_close, 21, None));
        assert!(!sweep_due(friday_close, 22, None));
        assert!(!sweep_due(friday_close, 21, Some(friday)));

        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 23, 0, 0).unwrap();
        assert!(!sweep_due(saturday, 21, Some(friday)));
    }

    #[test]
    fn test_failed_sweep_is_retried() {
        let yesterday = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();

        let failed = BaselineSummary {
            errors: 2,
            created: 3,
            ..Default::default()
        };
        let last = record_sweep(Some(yesterday), today, &failed);
        assert_eq!(last, Some(yesterday));
        let retry_at = Utc.with_ymd_and_hms(2026, 10, 16, 21, 15, 0).unwrap();
        assert!(sweep_due(retry_at, 21, last));

        let clean = BaselineSummary::default();
        let last = record_sweep(last, today, &clean);
        assert_eq!(last, Some(today));
        assert!(!sweep_due(retry_at, 21, last));
    }
}
