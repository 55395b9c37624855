//! Prediction pipeline
//!
//! - `claims_diff`: grouping, diffing and significance scoring of claims
//! - `state`: per-run state and stage bookkeeping
//! - `stages` / `orchestrator`: the linear stage machine and its driver
//! - `analyst`: deterministic analysis capability

pub mod analyst;
pub mod claims_diff;
pub mod orchestrator;
pub mod stages;
pub mod state;
pub mod traits;

pub use analyst::RuleBasedAnalyst;
pub use claims_diff::ClaimDiffEngine;
pub use orchestrator::{generate_run_id, validate_input, PipelineOrchestrator};
pub use stages::{default_stages, PipelineContext, PipelineStage};
pub use state::{PipelineRunState, RunMetrics, Stage};
pub use traits::{lookback_cutoff, AnalysisCapability, DataTool, HistoricalClaimsLookup};
