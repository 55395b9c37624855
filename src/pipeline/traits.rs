//! Collaborator seams consumed by the pipeline stages

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    Claim, EnrichedClaimBundle, EvaluatorVerdict, Source, SpecialistAnalysis, Urgency,
};
use crate::error::{AugurError, Result};

/// A registered data-collection tool feeding `poll_data`
#[async_trait]
pub trait DataTool: Send + Sync {
    /// Stable tool name, recorded on every source it produces
    fn name(&self) -> &str;

    async fn execute(&self, instruments: &[String]) -> Result<Vec<Source>>;
}

/// Lookup of previously observed claims for an instrument
#[async_trait]
pub trait HistoricalClaimsLookup: Send + Sync {
    async fn historical_claims(&self, instrument: &str, lookback_hours: i64) -> Result<Vec<Claim>>;
}

/// Oldest timestamp a history lookup of `lookback_hours` reaches back to
pub fn lookback_cutoff(now: DateTime<Utc>, lookback_hours: i64) -> Result<DateTime<Utc>> {
    Duration::try_hours(lookback_hours)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            AugurError::Validation(format!(
                "lookback of {} hours is out of range",
                lookback_hours
            ))
        })
}

/// Triage, specialist and evaluator analysis.
///
/// Implementations may call out to language models; the pipeline only relies
/// on the shapes returned here.
#[async_trait]
pub trait AnalysisCapability: Send + Sync {
    /// Pick the specialist teams that should look at a bundle
    async fn select_specialists(
        &self,
        bundle: &EnrichedClaimBundle,
        urgency: Urgency,
    ) -> Result<Vec<String>>;

    /// Run one specialist team over a bundle
    async fn analyze(
        &self,
        bundle: &EnrichedClaimBundle,
        specialist: &str,
    ) -> Result<SpecialistAnalysis>;

    /// Challenge a proposed analysis
    async fn evaluate(
        &self,
        bundle: &EnrichedClaimBundle,
        analysis: &SpecialistAnalysis,
    ) -> Result<EvaluatorVerdict>;
}
