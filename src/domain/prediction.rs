use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Predicted price direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

impl TryFrom<&str> for Direction {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "up" | "bullish" => Ok(Direction::Up),
            "down" | "bearish" => Ok(Direction::Down),
            "flat" | "neutral" => Ok(Direction::Flat),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Expected size of the move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Magnitude {
    Small,
    Medium,
    Large,
}

impl Magnitude {
    pub fn as_str(&self) -> &'static str {
        match self {
            Magnitude::Small => "small",
            Magnitude::Medium => "medium",
            Magnitude::Large => "large",
        }
    }

    /// Expected move as a fraction of entry price
    pub fn expected_move(&self) -> Decimal {
        match self {
            Magnitude::Small => Decimal::new(1, 2),
            Magnitude::Medium => Decimal::new(3, 2),
            Magnitude::Large => Decimal::new(5, 2),
        }
    }

    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Magnitude::Large
        } else if confidence >= 0.65 {
            Magnitude::Medium
        } else {
            Magnitude::Small
        }
    }
}

impl TryFrom<&str> for Magnitude {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "small" => Ok(Magnitude::Small),
            "medium" => Ok(Magnitude::Medium),
            "large" => Ok(Magnitude::Large),
            other => Err(format!("unknown magnitude: {}", other)),
        }
    }
}

/// Prediction lifecycle. Resolved and Expired are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Active,
    Resolved,
    Expired,
}

impl PredictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Active => "active",
            PredictionStatus::Resolved => "resolved",
            PredictionStatus::Expired => "expired",
        }
    }

    pub fn can_transition_to(&self, target: PredictionStatus) -> bool {
        matches!(
            (self, target),
            (PredictionStatus::Active, PredictionStatus::Resolved)
                | (PredictionStatus::Active, PredictionStatus::Expired)
        )
    }
}

impl TryFrom<&str> for PredictionStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(PredictionStatus::Active),
            "resolved" => Ok(PredictionStatus::Resolved),
            "expired" => Ok(PredictionStatus::Expired),
            other => Err(format!("unknown prediction status: {}", other)),
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-boxed directional prediction on a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub target_id: Uuid,
    pub direction: Direction,
    pub confidence: f64,
    pub magnitude: Magnitude,
    pub timeframe_hours: i64,
    pub predicted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub entry_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub status: PredictionStatus,
    pub outcome_value: Option<Decimal>,
    pub outcome_captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Prediction {
    /// Time at which the prediction window closes
    pub fn matures_at(&self) -> DateTime<Utc> {
        self.predicted_at + Duration::hours(self.timeframe_hours)
    }

    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        self.matures_at() <= now
    }

    pub fn is_baseline(&self) -> bool {
        self.metadata
            .get("baseline")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Market domain; selects which price source serves a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDomain {
    Stocks,
    Crypto,
    Polymarket,
    Elections,
}

impl TargetDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetDomain::Stocks => "stocks",
            TargetDomain::Crypto => "crypto",
            TargetDomain::Polymarket => "polymarket",
            TargetDomain::Elections => "elections",
        }
    }
}

impl TryFrom<&str> for TargetDomain {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "stocks" => Ok(TargetDomain::Stocks),
            "crypto" => Ok(TargetDomain::Crypto),
            "polymarket" => Ok(TargetDomain::Polymarket),
            "elections" => Ok(TargetDomain::Elections),
            other => Err(format!("unknown target domain: {}", other)),
        }
    }
}

impl fmt::Display for TargetDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    pub domain: TargetDomain,
    pub universe_id: Option<Uuid>,
    pub current_price: Option<Decimal>,
    pub price_updated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_archived: bool,
}

impl Target {
    pub fn new(symbol: impl Into<String>, domain: TargetDomain) -> Self {
        let symbol = symbol.into();
        Self {
            id: Uuid::new_v4(),
            name: symbol.clone(),
            symbol,
            domain,
            universe_id: None,
            current_price: None,
            price_updated_at: None,
            is_active: true,
            is_archived: false,
        }
    }
}

/// Append-only observed value of a target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target_id: Uuid,
    pub value: Decimal,
    pub captured_at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl TryFrom<&str> for PositionSide {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            other => Err(format!("unknown position side: {}", other)),
        }
    }
}

/// Paper position opened from a prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub prediction_id: Uuid,
    pub target_id: Uuid,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub is_open: bool,
}

impl Position {
    /// Realised P&L if the position were closed at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        let gross = (exit_price - self.entry_price) * self.quantity;
        match self.side {
            PositionSide::Long => gross,
            PositionSide::Short => -gross,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_transitions_are_terminal() {
        assert!(PredictionStatus::Active.can_transition_to(PredictionStatus::Resolved));
        assert!(PredictionStatus::Active.can_transition_to(PredictionStatus::Expired));
        assert!(!PredictionStatus::Resolved.can_transition_to(PredictionStatus::Expired));
        assert!(!PredictionStatus::Expired.can_transition_to(PredictionStatus::Resolved));
        assert!(!PredictionStatus::Resolved.can_transition_to(PredictionStatus::Active));
    }

    #[test]
    fn test_short_position_pnl() {
        let pos = Position {
            id: Uuid::new_v4(),
            prediction_id: Uuid::new_v4(),
            target_id: Uuid::new_v4(),
            side: PositionSide::Short,
            quantity: dec!(10),
            entry_price: dec!(100),
            exit_price: None,
            realized_pnl: None,
            is_open: true,
        };
        assert_eq!(pos.pnl_at(dec!(97)), dec!(30));
        assert_eq!(pos.pnl_at(dec!(103)), dec!(-30));
    }

    #[test]
    fn test_magnitude_from_confidence() {
        assert_eq!(Magnitude::from_confidence(0.9), Magnitude::Large);
        assert_eq!(Magnitude::from_confidence(0.7), Magnitude::Medium);
        assert_eq!(Magnitude::from_confidence(0.5), Magnitude::Small);
    }
}
