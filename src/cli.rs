use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "augur")]
#[command(version)]
#[command(about = "Prediction pipeline and outcome tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, default_value = "config")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply database migrations
    Migrate,
    /// Execute one pipeline run from a JSON input file
    Run {
        /// Path to a RunnerInput JSON document
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Run the outcome reconciler
    Reconcile {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Create neutral baseline predictions for uncovered targets
    Baseline {
        /// Trading date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Restrict to one universe
        #[arg(long)]
        universe: Option<Uuid>,
    },
    /// Flag resolved baselines whose outcome exceeded the missed-opportunity threshold
    FlagMissed {
        /// Only consider predictions resolved after this instant (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Resolve an active prediction now at the current market price and close its positions
    Capture {
        /// Prediction id
        id: Uuid,
    },
    /// Resolve an active prediction with an explicit outcome percent
    Resolve {
        /// Prediction id
        id: Uuid,
        /// Outcome in percent, e.g. -3.25
        #[arg(allow_hyphen_values = true)]
        outcome: Decimal,
    },
    /// Print the checkpointed state of a pipeline run
    Checkpoint {
        /// Run id (run-<millis>-<suffix>)
        run_id: String,
    },
    /// Run the reconciler loop and the daily baseline sweep until interrupted
    Daemon,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_accepts_negative_outcome() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["augur", "resolve", &id.to_string(), "-3.25"]).unwrap();
        match cli.command {
            Some(Commands::Resolve { id: parsed, outcome }) => {
                assert_eq!(parsed, id);
                assert_eq!(outcome, dec!(-3.25));
            }
            _ => panic!("expected resolve command"),
        }
    }

    #[test]
    fn test_baseline_date_parses() {
        let cli = Cli::try_parse_from(["augur", "--config", "/etc/augur", "baseline", "--date", "2024-03-15"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/augur"));
        match cli.command {
            Some(Commands::Baseline { date, universe }) => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 15));
                assert!(universe.is_none());
            }
            _ => panic!("expected baseline command"),
        }
    }
}
