//! Persistence Layer
//!
//! This module provides the storage contracts used by the pipeline and the
//! outcome jobs:
//! - Repositories for targets, snapshots, predictions, positions and run output
//! - Checkpoint service for per-run state snapshots

pub mod checkpoint;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointService, Checkpointable};
pub use traits::{
    CheckpointStore, PositionRepository, PredictionRepository, RunRepository,
    SnapshotRepository, TargetRepository,
};
