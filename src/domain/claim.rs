use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl ClaimValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ClaimValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Runtime kind, used to decide whether two values are comparable
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimValue::Number(_) => "number",
            ClaimValue::Text(_) => "string",
            ClaimValue::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for ClaimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimValue::Number(n) => write!(f, "{}", n),
            ClaimValue::Text(s) => write!(f, "{}", s),
            ClaimValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for ClaimValue {
    fn from(v: f64) -> Self {
        ClaimValue::Number(v)
    }
}

impl From<&str> for ClaimValue {
    fn from(v: &str) -> Self {
        ClaimValue::Text(v.to_string())
    }
}

impl From<bool> for ClaimValue {
    fn from(v: bool) -> Self {
        ClaimValue::Bool(v)
    }
}

/// A single typed, timestamped observation about an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub instrument: String,
    pub value: ClaimValue,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Claim {
    pub fn new(
        claim_type: impl Into<String>,
        instrument: impl Into<String>,
        value: impl Into<ClaimValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            claim_type: claim_type.into(),
            instrument: instrument.into(),
            value: value.into(),
            confidence: 1.0,
            timestamp,
            unit: None,
            metadata: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    /// Identity used when diffing against history
    pub fn key(&self) -> (&str, &str) {
        (self.claim_type.as_str(), self.instrument.as_str())
    }

    /// Numeric metadata entry, if present
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.as_ref()?.get(key)?.as_f64()
    }

    pub fn has_metadata_key(&self, key: &str) -> bool {
        self.metadata
            .as_ref()
            .map(|m| m.contains_key(key))
            .unwrap_or(false)
    }
}

/// Output of one data-collection tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub tool: String,
    pub claims: Vec<Claim>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Immutable snapshot of everything gathered in one poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datapoint {
    pub id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<Source>,
    pub all_claims: Vec<Claim>,
    pub instruments: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Datapoint {
    /// Build a datapoint from tool sources, flattening their claims in order
    pub fn from_sources(agent_id: &str, sources: Vec<Source>, timestamp: DateTime<Utc>) -> Self {
        let all_claims: Vec<Claim> = sources.iter().flat_map(|s| s.claims.clone()).collect();

        let mut instruments: Vec<String> = Vec::new();
        for claim in &all_claims {
            if !instruments.contains(&claim.instrument) {
                instruments.push(claim.instrument.clone());
            }
        }

        let metadata = serde_json::json!({
            "source_count": sources.len(),
            "claim_count": all_claims.len(),
        });

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            timestamp,
            sources,
            all_claims,
            instruments,
            metadata,
        }
    }
}

/// All current claims for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimBundle {
    pub instrument: String,
    pub current_claims: Vec<Claim>,
    /// Distinct tool names that contributed claims for this instrument
    pub sources: Vec<String>,
}

/// A claim whose value moved relative to history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedClaim {
    pub claim: Claim,
    pub previous_value: ClaimValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsDiff {
    pub new_claims: Vec<Claim>,
    pub changed_claims: Vec<ChangedClaim>,
    pub removed_claims: Vec<Claim>,
    pub significance_score: f64,
}

impl ClaimsDiff {
    pub fn is_empty(&self) -> bool {
        self.new_claims.is_empty() && self.changed_claims.is_empty() && self.removed_claims.is_empty()
    }
}

/// Bundle plus history and the pre-filter decision for this run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedClaimBundle {
    #[serde(flatten)]
    pub bundle: ClaimBundle,
    pub historical_claims: Vec<Claim>,
    pub claims_diff: ClaimsDiff,
    pub should_proceed: bool,
    pub proceed_reason: String,
}

impl EnrichedClaimBundle {
    pub fn instrument(&self) -> &str {
        &self.bundle.instrument
    }
}

/// Extra threshold keyed by claim type or metadata key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomThreshold {
    pub key: String,
    pub threshold: f64,
}

/// Pre-filter gates applied before specialist analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreFilterThresholds {
    pub min_price_change_percent: f64,
    pub min_sentiment_shift: f64,
    pub min_significance_score: f64,
    #[serde(default)]
    pub custom: Vec<CustomThreshold>,
}

impl Default for PreFilterThresholds {
    fn default() -> Self {
        Self {
            min_price_change_percent: 2.0,
            min_sentiment_shift: 0.3,
            min_significance_score: 0.5,
            custom: Vec::new(),
        }
    }
}

/// Caps applied to each contribution of the significance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceWeights {
    pub new_claims: f64,
    pub price_change: f64,
    pub volume_change: f64,
    pub sentiment_shift: f64,
}

impl Default for SignificanceWeights {
    fn default() -> Self {
        Self {
            new_claims: 0.3,
            price_change: 0.4,
            volume_change: 0.2,
            sentiment_shift: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_value_untagged_serde() {
        let v: ClaimValue = serde_json::from_str("178.5").unwrap();
        assert_eq!(v, ClaimValue::Number(178.5));
        let v: ClaimValue = serde_json::from_str("\"bullish\"").unwrap();
        assert_eq!(v, ClaimValue::Text("bullish".into()));
        let v: ClaimValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ClaimValue::Bool(true));
    }

    #[test]
    fn test_claim_type_field_name() {
        let claim = Claim::new("price", "AAPL", 178.5, Utc::now());
        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(json["type"], "price");
        assert!(json.get("unit").is_none());
    }

    #[test]
    fn test_datapoint_instruments_in_first_seen_order() {
        let now = Utc::now();
        let sources = vec![
            Source {
                tool: "quotes".into(),
                claims: vec![
                    Claim::new("price", "MSFT", 410.0, now),
                    Claim::new("price", "AAPL", 178.5, now),
                ],
                fetched_at: now,
                published_at: None,
            },
            Source {
                tool: "news".into(),
                claims: vec![Claim::new("news", "MSFT", "earnings beat", now)],
                fetched_at: now,
                published_at: None,
            },
        ];

        let dp = Datapoint::from_sources("agent-1", sources, now);
        assert_eq!(dp.instruments, vec!["MSFT", "AAPL"]);
        assert_eq!(dp.all_claims.len(), 3);
        assert_eq!(dp.metadata["claim_count"], 3);
    }
}
