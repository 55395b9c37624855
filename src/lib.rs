pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod outcomes;
pub mod persistence;
pub mod pipeline;
pub mod services;

pub use adapters::{HttpPriceSource, InMemoryStore, PostgresStore, PriceClaimTool, PriceSource};
pub use config::AppConfig;
pub use coordination::{JobGuard, Shutdown, ShutdownListener};
pub use error::{AugurError, Result};
pub use outcomes::{BaselineFallbackGenerator, OutcomeReconciler};
pub use persistence::{CheckpointService, Checkpointable};
pub use pipeline::{PipelineOrchestrator, RuleBasedAnalyst};
