use serde::{Deserialize, Serialize};
use std::fmt;

use super::claim::{Datapoint, PreFilterThresholds};
use super::prediction::Direction;

/// Risk appetite of an agent; gates which recommendations are packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservative",
            RiskProfile::Moderate => "moderate",
            RiskProfile::Aggressive => "aggressive",
        }
    }

    /// Minimum post-evaluation confidence for a recommendation
    pub fn min_confidence(&self) -> f64 {
        match self {
            RiskProfile::Conservative => 0.7,
            RiskProfile::Moderate => 0.6,
            RiskProfile::Aggressive => 0.5,
        }
    }

    pub fn max_recommendations(&self) -> usize {
        match self {
            RiskProfile::Conservative => 3,
            RiskProfile::Moderate => 5,
            RiskProfile::Aggressive => 10,
        }
    }
}

impl TryFrom<&str> for RiskProfile {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RiskProfile::Conservative),
            "moderate" => Ok(RiskProfile::Moderate),
            "aggressive" => Ok(RiskProfile::Aggressive),
            other => Err(format!("unknown risk profile: {}", other)),
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Longest history window a run may ask for (one year)
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 366;

/// Per-agent run configuration as submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub instruments: Vec<String>,
    /// Kept as text so an unknown profile is a validation failure, not a parse failure
    pub risk_profile: String,
    #[serde(default)]
    pub thresholds: Option<PreFilterThresholds>,
    #[serde(default)]
    pub lookback_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerInput {
    pub agent_id: String,
    pub agent_slug: String,
    #[serde(default)]
    pub config: Option<AgentConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    /// Another run of the same orchestrator was already in flight
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Urgency tier derived from a bundle's significance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }

    pub fn from_significance(score: f64) -> Self {
        if score >= 0.8 {
            Urgency::Critical
        } else if score >= 0.6 {
            Urgency::High
        } else if score >= 0.4 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub instrument: String,
    pub urgency: Urgency,
    pub specialist_teams: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistAnalysis {
    pub instrument: String,
    pub specialist: String,
    pub direction: Direction,
    pub confidence: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorVerdict {
    pub instrument: String,
    pub specialist: String,
    pub passed: bool,
    /// Multiplier applied to the analysis confidence
    pub confidence_adjustment: f64,
    pub challenge: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationAction {
    Buy,
    Sell,
    Hold,
}

impl RecommendationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::Buy => "buy",
            RecommendationAction::Sell => "sell",
            RecommendationAction::Hold => "hold",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            RecommendationAction::Buy => Direction::Up,
            RecommendationAction::Sell => Direction::Down,
            RecommendationAction::Hold => Direction::Flat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub instrument: String,
    pub action: RecommendationAction,
    pub confidence: f64,
    pub urgency: Urgency,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerOutput {
    pub run_id: String,
    pub status: RunStatus,
    pub datapoint: Option<Datapoint>,
    pub recommendations: Vec<Recommendation>,
    pub error: Option<String>,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub metrics: serde_json::Value,
}
