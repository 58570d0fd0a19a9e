//! Fundamental data types shared across the entire workspace.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod session;

pub use session::SessionClock;

/// Alias for price values. Futures prices on the target exchange are quoted
/// in whole currency steps, so plain floating point is sufficient.
pub type Price = f64;
/// Alias for integer lot counts held at the broker.
pub type Lots = i64;
/// Alias used for human-readable security codes (e.g., `Si-3.18`).
pub type SecurityCode = String;

/// A single OHLCV sample reduced to what the pipeline consumes.
///
/// Timestamps are exchange-local wall-clock times, which is what the session
/// calendar operates on. Candle sequences are expected to be strictly
/// increasing in time per security; consumers discard anything else.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candle {
    pub security: SecurityCode,
    pub timestamp: NaiveDateTime,
    pub close: Price,
    pub volume: f64,
}

/// Desired normalized exposure for one security at a point in time.
///
/// `position` is a ratio (typically within [-1, 1] before leverage is
/// applied), not a lot count; the execution engine converts it using the
/// portfolio notional and the base price it captured on the first advice.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Advice {
    pub security: SecurityCode,
    pub timestamp: NaiveDateTime,
    pub price: Price,
    pub position: f64,
}

impl Advice {
    /// Copy of this advice with a different position.
    #[must_use]
    pub fn with_position(&self, position: f64) -> Self {
        Self {
            security: self.security.clone(),
            timestamp: self.timestamp,
            price: self.price,
            position,
        }
    }
}

/// Constraint on the sign of positions a strategy may request.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Both,
    LongOnly,
    ShortOnly,
}

/// Per-security strategy parameters, immutable for the life of a run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,
    pub security: SecurityCode,
    #[serde(default = "default_lever")]
    pub lever: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_target_volatility")]
    pub target_volatility: f64,
    #[serde(default)]
    pub direction: Direction,
}

impl StrategyConfig {
    /// Convenience constructor with default leverage, weight and volatility.
    pub fn new(name: impl Into<String>, security: impl Into<SecurityCode>) -> Self {
        Self {
            name: name.into(),
            security: security.into(),
            lever: default_lever(),
            weight: default_weight(),
            target_volatility: default_target_volatility(),
            direction: Direction::default(),
        }
    }
}

fn default_lever() -> f64 {
    1.0
}

fn default_weight() -> f64 {
    1.0
}

fn default_target_volatility() -> f64 {
    0.006
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn advice() -> Advice {
        Advice {
            security: "Si".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2018, 3, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            price: 61_500.0,
            position: 0.5,
        }
    }

    #[test]
    fn with_position_preserves_everything_else() {
        let original = advice();
        let adjusted = original.with_position(-1.0);
        assert_eq!(adjusted.security, original.security);
        assert_eq!(adjusted.timestamp, original.timestamp);
        assert_eq!(adjusted.price, original.price);
        assert_eq!(adjusted.position, -1.0);
    }

    #[test]
    fn strategy_config_defaults_match_documented_values() {
        let config = StrategyConfig::new("dual", "Si");
        assert_eq!(config.lever, 1.0);
        assert_eq!(config.weight, 1.0);
        assert_eq!(config.target_volatility, 0.006);
        assert_eq!(config.direction, Direction::Both);
    }

    #[test]
    fn direction_deserializes_from_snake_case() {
        let direction: Direction = serde_json::from_str("\"long_only\"").unwrap();
        assert_eq!(direction, Direction::LongOnly);
    }
}
