//! Deterministic analysis capability.
//!
//! Reads the same signals the pre-filter uses and turns them into specialist
//! opinions, so the pipeline produces recommendations without a model backend.

use async_trait::async_trait;

use super::claims_diff::{
    resolve_price_change, resolve_sentiment_shift, ALWAYS_PROCEED_TYPES, PRICE_TYPES,
    SENTIMENT_TYPES,
};
use super::traits::AnalysisCapability;
use crate::domain::{
    Direction, EnrichedClaimBundle, EvaluatorVerdict, SpecialistAnalysis, Urgency,
};
use crate::error::{AugurError, Result};

pub const TECHNICAL: &str = "technical";
pub const SENTIMENT: &str = "sentiment";
pub const FUNDAMENTAL: &str = "fundamental";

/// Price moves smaller than this (percent) read as flat
const FLAT_PRICE_BAND: f64 = 0.5;
const FLAT_SENTIMENT_BAND: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct RuleBasedAnalyst {
    /// Analyses below this confidence are rejected by the evaluator
    min_confidence: f64,
}

impl Default for RuleBasedAnalyst {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
        }
    }
}

impl RuleBasedAnalyst {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

fn has_type(bundle: &EnrichedClaimBundle, types: &[&str]) -> bool {
    bundle
        .bundle
        .current_claims
        .iter()
        .any(|c| types.contains(&c.claim_type.as_str()))
}

fn mean_claim_confidence(bundle: &EnrichedClaimBundle) -> f64 {
    let claims = &bundle.bundle.current_claims;
    if claims.is_empty() {
        return 1.0;
    }
    claims.iter().map(|c| c.confidence).sum::<f64>() / claims.len() as f64
}

fn current_sentiment(bundle: &EnrichedClaimBundle) -> Option<f64> {
    bundle
        .bundle
        .current_claims
        .iter()
        .filter(|c| SENTIMENT_TYPES.contains(&c.claim_type.as_str()))
        .find_map(|c| c.value.as_f64())
}

fn direction_of(value: f64, band: f64) -> Direction {
    if value > band {
        Direction::Up
    } else if value < -band {
        Direction::Down
    } else {
        Direction::Flat
    }
}

#[async_trait]
impl AnalysisCapability for RuleBasedAnalyst {
    async fn select_specialists(
        &self,
        bundle: &EnrichedClaimBundle,
        urgency: Urgency,
    ) -> Result<Vec<String>> {
        let mut teams = Vec::new();
        if has_type(bundle, &PRICE_TYPES) || has_type(bundle, &["change_percent", "volume"]) {
            teams.push(TECHNICAL.to_string());
        }
        if has_type(bundle, &SENTIMENT_TYPES) {
            teams.push(SENTIMENT.to_string());
        }
        if has_type(bundle, &ALWAYS_PROCEED_TYPES) {
            teams.push(FUNDAMENTAL.to_string());
        }
        // Low-urgency bundles get a single opinion.
        if urgency == Urgency::Low {
            teams.truncate(1);
        }
        if teams.is_empty() {
            teams.push(TECHNICAL.to_string());
        }
        Ok(teams)
    }

    async fn analyze(
        &self,
        bundle: &EnrichedClaimBundle,
        specialist: &str,
    ) -> Result<SpecialistAnalysis> {
        let quality = mean_claim_confidence(bundle);

        let (direction, confidence, rationale) = match specialist {
            TECHNICAL => {
                let pct = resolve_price_change(bundle);
                let confidence = 0.5 + (pct.abs() / 10.0).min(0.4);
                (
                    direction_of(pct, FLAT_PRICE_BAND),
                    confidence,
                    format!("Price moved {:.2}%", pct),
                )
            }
            SENTIMENT => {
                let shift = resolve_sentiment_shift(&bundle.claims_diff);
                let signal = if shift != 0.0 {
                    shift
                } else {
                    current_sentiment(bundle).unwrap_or(0.0)
                };
                let confidence = 0.5 + (signal.abs() * 0.5).min(0.4);
                (
                    direction_of(signal, FLAT_SENTIMENT_BAND),
                    confidence,
                    format!("Sentiment signal {:.2}", signal),
                )
            }
            FUNDAMENTAL => {
                let impact = bundle
                    .claims_diff
                    .new_claims
                    .iter()
                    .filter(|c| ALWAYS_PROCEED_TYPES.contains(&c.claim_type.as_str()))
                    .find_map(|c| c.metadata_f64("impact"))
                    .unwrap_or(0.0);
                let confidence = 0.55 + (impact.abs() * 0.3).min(0.3);
                (
                    direction_of(impact, 0.0),
                    confidence,
                    format!("New event with impact {:.2}", impact),
                )
            }
            other => {
                return Err(AugurError::Validation(format!(
                    "unknown specialist team: {}",
                    other
                )))
            }
        };

        Ok(SpecialistAnalysis {
            instrument: bundle.instrument().to_string(),
            specialist: specialist.to_string(),
            direction,
            confidence: (confidence * quality).clamp(0.0, 1.0),
            rationale,
        })
    }

    async fn evaluate(
        &self,
        bundle: &EnrichedClaimBundle,
        analysis: &SpecialistAnalysis,
    ) -> Result<EvaluatorVerdict> {
        let price_direction = direction_of(resolve_price_change(bundle), FLAT_PRICE_BAND);
        let contradicted = analysis.specialist != TECHNICAL
            && price_direction != Direction::Flat
            && analysis.direction != Direction::Flat
            && price_direction != analysis.direction;

        let (passed, confidence_adjustment, challenge) = if analysis.direction == Direction::Flat {
            (false, 1.0, "No directional view".to_string())
        } else if analysis.confidence < self.min_confidence {
            (
                false,
                1.0,
                format!(
                    "Confidence {:.2} below {:.2}",
                    analysis.confidence, self.min_confidence
                ),
            )
        } else if contradicted {
            (
                false,
                0.5,
                format!("Price moved {} against the {} view", price_direction, analysis.direction),
            )
        } else if bundle.claims_diff.significance_score < 0.3 {
            (true, 0.9, "Weak overall change, confidence trimmed".to_string())
        } else {
            (true, 1.0, "Consistent with observed claims".to_string())
        };

        Ok(EvaluatorVerdict {
            instrument: analysis.instrument.clone(),
            specialist: analysis.specialist.clone(),
            passed,
            confidence_adjustment,
            challenge,
        })
    }
}
