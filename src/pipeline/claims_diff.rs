//! Claim Diff Engine
//!
//! Pure computation that decides which instruments deserve specialist analysis:
//! - Group a datapoint's claims into per-instrument bundles
//! - Diff current claims against history keyed by (type, instrument)
//! - Score the change and apply pre-filter thresholds

use std::collections::HashMap;

use crate::domain::{
    ChangedClaim, Claim, ClaimBundle, ClaimValue, ClaimsDiff, Datapoint, EnrichedClaimBundle,
    PreFilterThresholds, SignificanceWeights,
};

/// Relative tolerance below which two numbers are considered equal (0.01%)
const NUMERIC_TOLERANCE: f64 = 0.0001;

pub(crate) const PRICE_TYPES: [&str; 2] = ["price", "close"];
pub(crate) const SENTIMENT_TYPES: [&str; 2] = ["sentiment", "sentiment_score"];
pub(crate) const ALWAYS_PROCEED_TYPES: [&str; 3] = ["event", "news", "filing"];

#[derive(Debug, Clone, Default)]
pub struct ClaimDiffEngine {
    weights: SignificanceWeights,
}

impl ClaimDiffEngine {
    pub fn new(weights: SignificanceWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SignificanceWeights {
        &self.weights
    }

    /// Partition a datapoint's claims by instrument, preserving insertion order
    pub fn group_claims(&self, datapoint: &Datapoint) -> Vec<ClaimBundle> {
        let mut bundles: Vec<ClaimBundle> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for claim in &datapoint.all_claims {
            let slot = *index.entry(claim.instrument.as_str()).or_insert_with(|| {
                bundles.push(ClaimBundle {
                    instrument: claim.instrument.clone(),
                    current_claims: Vec::new(),
                    sources: Vec::new(),
                });
                bundles.len() - 1
            });
            bundles[slot].current_claims.push(claim.clone());
        }

        for source in &datapoint.sources {
            for claim in &source.claims {
                if let Some(&slot) = index.get(claim.instrument.as_str()) {
                    let tools = &mut bundles[slot].sources;
                    if !tools.contains(&source.tool) {
                        tools.push(source.tool.clone());
                    }
                }
            }
        }

        bundles
    }

    /// Diff current claims against historical ones
    pub fn calculate_claims_diff(&self, current: &[Claim], historical: &[Claim]) -> ClaimsDiff {
        // Most recent historical claim per key; on equal timestamps the later one in input order wins
        let mut latest: HashMap<(&str, &str), &Claim> = HashMap::new();
        for claim in historical {
            let replace = latest
                .get(&claim.key())
                .map_or(true, |existing| existing.timestamp <= claim.timestamp);
            if replace {
                latest.insert(claim.key(), claim);
            }
        }

        let mut diff = ClaimsDiff::default();
        let mut seen: Vec<(&str, &str)> = Vec::new();

        for claim in current {
            let key = claim.key();
            seen.push(key);
            match latest.get(&key) {
                None => diff.new_claims.push(claim.clone()),
                Some(previous) if value_changed(&claim.value, &previous.value) => {
                    diff.changed_claims.push(ChangedClaim {
                        claim: claim.clone(),
                        previous_value: previous.value.clone(),
                        change_percent: change_percent(&claim.value, &previous.value),
                    });
                }
                Some(_) => {}
            }
        }

        // Iterate the input rather than the map so removed claims keep a stable order
        let mut removed_keys: Vec<(&str, &str)> = Vec::new();
        for claim in historical {
            let key = claim.key();
            if seen.contains(&key) || removed_keys.contains(&key) {
                continue;
            }
            removed_keys.push(key);
            if let Some(latest_claim) = latest.get(&key) {
                diff.removed_claims.push((*latest_claim).clone());
            }
        }

        diff.significance_score = self.significance_score(&diff);
        diff
    }

    /// Composite [0,1] measure of how much changed
    pub fn significance_score(&self, diff: &ClaimsDiff) -> f64 {
        let mut score = 0.0;

        if !diff.new_claims.is_empty() {
            score += (diff.new_claims.len() as f64 * 0.1).min(self.weights.new_claims);
        }

        for changed in &diff.changed_claims {
            let Some(pct) = changed.change_percent else {
                continue;
            };
            let pct = pct.abs();
            let claim_type = changed.claim.claim_type.as_str();

            if PRICE_TYPES.contains(&claim_type) {
                score += (pct * 0.05).min(self.weights.price_change);
            } else if claim_type == "volume" {
                score += (pct * 0.02).min(self.weights.volume_change);
            } else if SENTIMENT_TYPES.contains(&claim_type) {
                score += (pct * 0.1).min(self.weights.sentiment_shift);
            }
        }

        score.clamp(0.0, 1.0)
    }

    /// Diff a bundle against its history and classify it
    pub fn enrich(
        &self,
        bundle: ClaimBundle,
        historical_claims: Vec<Claim>,
        thresholds: &PreFilterThresholds,
    ) -> EnrichedClaimBundle {
        let claims_diff = self.calculate_claims_diff(&bundle.current_claims, &historical_claims);
        let enriched = EnrichedClaimBundle {
            bundle,
            historical_claims,
            claims_diff,
            should_proceed: false,
            proceed_reason: String::new(),
        };
        self.should_proceed_to_specialists(enriched, thresholds)
    }

    /// Decide whether a bundle warrants specialist analysis.
    ///
    /// Each trigger is independent; every one that fires appends a reason.
    pub fn should_proceed_to_specialists(
        &self,
        mut bundle: EnrichedClaimBundle,
        thresholds: &PreFilterThresholds,
    ) -> EnrichedClaimBundle {
        let diff = &bundle.claims_diff;
        let mut reasons: Vec<String> = Vec::new();

        let significance = diff.significance_score;
        if significance >= thresholds.min_significance_score {
            reasons.push(format!(
                "Significance score {:.2} >= {:.2}",
                significance, thresholds.min_significance_score
            ));
        }

        let price_change = resolve_price_change(&bundle);
        if price_change.abs() >= thresholds.min_price_change_percent {
            reasons.push(format!(
                "Price change {:.2}% >= {:.2}%",
                price_change, thresholds.min_price_change_percent
            ));
        }

        let sentiment_shift = resolve_sentiment_shift(diff);
        if sentiment_shift.abs() >= thresholds.min_sentiment_shift {
            reasons.push(format!(
                "Sentiment shift {:.2} >= {:.2}",
                sentiment_shift, thresholds.min_sentiment_shift
            ));
        }

        for claim in &diff.new_claims {
            if ALWAYS_PROCEED_TYPES.contains(&claim.claim_type.as_str()) {
                reasons.push(format!("New {} claim", claim.claim_type));
            }
        }

        for custom in &thresholds.custom {
            if let Some(value) = custom_value(&bundle.bundle.current_claims, &custom.key) {
                if value.abs() >= custom.threshold {
                    reasons.push(format!(
                        "Custom threshold {}: {:.2} >= {:.2}",
                        custom.key,
                        value.abs(),
                        custom.threshold
                    ));
                }
            }
        }

        bundle.should_proceed = !reasons.is_empty();
        bundle.proceed_reason = if reasons.is_empty() {
            format!(
                "No thresholds met (sig={:.2}, price={:.2}%, sentiment={:.2})",
                significance, price_change, sentiment_shift
            )
        } else {
            reasons.join("; ")
        };
        bundle
    }
}

/// Whether a current value differs from its historical counterpart
pub fn value_changed(current: &ClaimValue, historical: &ClaimValue) -> bool {
    match (current, historical) {
        (ClaimValue::Number(cur), ClaimValue::Number(hist)) => {
            let delta = (cur - hist).abs();
            if *hist == 0.0 {
                delta > 0.0
            } else {
                delta / hist.abs() > NUMERIC_TOLERANCE
            }
        }
        _ if current.kind() != historical.kind() => true,
        _ => current != historical,
    }
}

/// Percent change, only for numeric pairs with a non-zero base
pub fn change_percent(current: &ClaimValue, historical: &ClaimValue) -> Option<f64> {
    let cur = current.as_f64()?;
    let hist = historical.as_f64()?;
    if hist == 0.0 {
        return None;
    }
    Some((cur - hist) / hist.abs() * 100.0)
}

/// Signed price move in percent as seen by the pre-filter
pub(crate) fn resolve_price_change(bundle: &EnrichedClaimBundle) -> f64 {
    let changed = &bundle.claims_diff.changed_claims;

    let from_price = changed
        .iter()
        .filter(|c| PRICE_TYPES.contains(&c.claim.claim_type.as_str()))
        .find_map(|c| c.change_percent);
    if let Some(pct) = from_price {
        return pct;
    }

    let from_changed_pct = changed
        .iter()
        .filter(|c| c.claim.claim_type == "change_percent")
        .find_map(|c| c.claim.value.as_f64());
    if let Some(pct) = from_changed_pct {
        return pct;
    }

    bundle
        .bundle
        .current_claims
        .iter()
        .filter(|c| c.claim_type == "change_percent")
        .find_map(|c| c.value.as_f64())
        .unwrap_or(0.0)
}

pub(crate) fn resolve_sentiment_shift(diff: &ClaimsDiff) -> f64 {
    diff.changed_claims
        .iter()
        .filter(|c| SENTIMENT_TYPES.contains(&c.claim.claim_type.as_str()))
        .find_map(|c| Some(c.claim.value.as_f64()? - c.previous_value.as_f64()?))
        .unwrap_or(0.0)
}

fn custom_value(claims: &[Claim], key: &str) -> Option<f64> {
    claims.iter().find_map(|claim| {
        if claim.claim_type == key {
            claim.value.as_f64()
        } else if claim.has_metadata_key(key) {
            claim.metadata_f64(key)
        } else {
            None
        }
    })
}
