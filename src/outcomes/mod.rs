//! Outcome tracking
//!
//! Background jobs that close the loop on predictions:
//! - Reconciler captures prices, resolves matured predictions and expires stale ones
//! - Baseline generator fills coverage gaps with neutral predictions

pub mod baseline;
pub mod reconciler;

pub use baseline::{next_session_close, BaselineFallbackGenerator, BaselineSummary};
pub use reconciler::{outcome_percent, OutcomeReconciler, ReconciliationSummary};
