//! Round data model and money units.
//!
//! Amounts are carried internally as integer cents and multipliers as
//! integer hundredths (100 = 1.00x), so truncation to two decimals is
//! integer division and the crash comparison is exact. Wire types expose
//! plain two-decimal numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Currency amount in hundredths of the major unit.
pub type Cents = u64;

pub mod money {
    use super::Cents;
    use crate::errors::EngineError;

    pub fn to_major(cents: Cents) -> f64 {
        cents as f64 / 100.0
    }

    /// Parse a wire amount into cents. Rejects non-positive values and
    /// anything with sub-cent precision.
    pub fn from_major(value: f64) -> Result<Cents, EngineError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::InvalidAmount(value));
        }
        let scaled = value * 100.0;
        let cents = scaled.round();
        if (scaled - cents).abs() > 1e-6 {
            return Err(EngineError::InvalidAmount(value));
        }
        Ok(cents as Cents)
    }
}

/// Serialize cents as a two-decimal number.
pub mod serde_cents {
    use super::money;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cents: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(money::to_major(*cents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = f64::deserialize(deserializer)?;
        money::from_major(value).map_err(serde::de::Error::custom)
    }
}

/// Serialize multiplier hundredths as a two-decimal factor.
pub mod serde_hundredths {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hundredths: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*hundredths as f64 / 100.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Ok((value * 100.0).round() as u64)
    }
}

/// Round lifecycle phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Pending,
    Betting,
    Running,
    Crashed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "pending"),
            RoundStatus::Betting => write!(f, "betting"),
            RoundStatus::Running => write!(f, "running"),
            RoundStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// A stake placed during the betting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub player_id: String,
    pub session_id: String,
    #[serde(with = "serde_cents")]
    pub amount: Cents,
    pub placed_at: DateTime<Utc>,
}

/// A payout locked in while the round was running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cashout {
    pub player_id: String,
    #[serde(with = "serde_cents")]
    pub bet_amount: Cents,
    #[serde(with = "serde_hundredths")]
    pub multiplier: u64,
    #[serde(with = "serde_cents")]
    pub win_amount: Cents,
    pub cashed_out_at: DateTime<Utc>,
}

/// The live round, exclusively owned by the engine.
///
/// `crash_point` is fixed at generation and never exposed before the crash
/// transition. `current_multiplier` is monotonically non-decreasing while
/// the round is running.
#[derive(Debug)]
pub struct Round {
    pub id: String,
    pub server_seed: [u8; 32],
    pub server_seed_hash: [u8; 32],
    pub client_seed: String,
    pub nonce: u64,
    pub crash_point: u64,
    pub status: RoundStatus,
    pub current_multiplier: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub started_at: Option<Instant>,
    pub bets: HashMap<String, Bet>,
    pub cashouts: HashMap<String, Cashout>,
}

impl Round {
    /// Bets with no matching cashout.
    pub fn losers(&self) -> Vec<Bet> {
        let mut losers: Vec<Bet> = self
            .bets
            .values()
            .filter(|bet| !self.cashouts.contains_key(&bet.player_id))
            .cloned()
            .collect();
        losers.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        losers
    }
}

/// Immutable record of a completed round, handed to observers and history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round_id: String,
    #[serde(with = "serde_hundredths")]
    pub crash_point: u64,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
    pub crashed_at: DateTime<Utc>,
    pub bets: Vec<Bet>,
    pub cashouts: Vec<Cashout>,
    pub losers: Vec<Bet>,
}

/// Read-only view of the current round for newly-joining observers.
/// Never contains the crash point or the unrevealed server seed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub status: RoundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<String>,
    pub multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed_hash: Option<String>,
    pub bet_count: usize,
    pub cashout_count: usize,
    pub chain_commitment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_major_accepts_two_decimals() {
        assert_eq!(money::from_major(10.00).unwrap(), 1000);
        assert_eq!(money::from_major(0.01).unwrap(), 1);
        assert_eq!(money::from_major(24.70).unwrap(), 2470);
    }

    #[test]
    fn test_from_major_rejects_bad_amounts() {
        assert!(money::from_major(0.0).is_err());
        assert!(money::from_major(-5.0).is_err());
        assert!(money::from_major(1.001).is_err());
        assert!(money::from_major(f64::NAN).is_err());
        assert!(money::from_major(f64::INFINITY).is_err());
    }

    #[test]
    fn test_cents_round_trip_through_wire() {
        let bet = Bet {
            player_id: "p1".to_string(),
            session_id: "s1".to_string(),
            amount: 1234,
            placed_at: Utc::now(),
        };
        let json = serde_json::to_value(&bet).unwrap();
        assert_eq!(json["amount"], serde_json::json!(12.34));
        let back: Bet = serde_json::from_value(json).unwrap();
        assert_eq!(back.amount, 1234);
    }
}
