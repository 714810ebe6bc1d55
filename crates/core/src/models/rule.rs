//! Trading rule model

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Direction of a rule (buy to accumulate, sell to distribute)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(Error::InvalidData(format!("unknown trade action: {}", other))),
        }
    }
}

/// Lifecycle state of a rule.
///
/// PROCESSED is the per-cycle terminal state of periodic rules; the
/// daily status update re-arms it to ACTIVE when the schedule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleStatus {
    Active,
    Processed,
    Completed,
    Paused,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "ACTIVE",
            RuleStatus::Processed => "PROCESSED",
            RuleStatus::Completed => "COMPLETED",
            RuleStatus::Paused => "PAUSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(RuleStatus::Active),
            "PROCESSED" => Ok(RuleStatus::Processed),
            "COMPLETED" => Ok(RuleStatus::Completed),
            "PAUSED" => Ok(RuleStatus::Paused),
            other => Err(Error::InvalidData(format!("unknown rule status: {}", other))),
        }
    }
}

/// Trigger condition of a rule. The stored `limit_value` column is
/// overloaded by `limit_type`; this union carries the decoded meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "limit_type", content = "limit_value", rename_all = "snake_case")]
pub enum RuleLimit {
    /// Absolute limit price: buy at or below, sell at or above
    Price(f64),
    /// Percent off the position's average price
    Percent(f64),
    /// Percent off the historical high (buy only)
    HighPercent(f64),
    /// Calendar buy on a weekday, Monday = 0
    Weekly(u32),
    /// Calendar buy on a day of month, 1-31
    Monthly(u32),
}

impl RuleLimit {
    /// Decode from the stored `(limit_type, limit_value)` column pair
    pub fn from_parts(limit_type: &str, limit_value: f64) -> Result<Self> {
        match limit_type {
            "price" => Ok(RuleLimit::Price(limit_value)),
            "percent" => Ok(RuleLimit::Percent(limit_value)),
            "high_percent" => Ok(RuleLimit::HighPercent(limit_value)),
            "weekly" => {
                let weekday = limit_value as u32;
                if limit_value.fract() != 0.0 || weekday > 6 {
                    return Err(Error::InvalidData(format!(
                        "weekly limit_value must be a weekday 0-6, got {}",
                        limit_value
                    )));
                }
                Ok(RuleLimit::Weekly(weekday))
            }
            "monthly" => {
                let day = limit_value as u32;
                if limit_value.fract() != 0.0 || !(1..=31).contains(&day) {
                    return Err(Error::InvalidData(format!(
                        "monthly limit_value must be a day 1-31, got {}",
                        limit_value
                    )));
                }
                Ok(RuleLimit::Monthly(day))
            }
            other => Err(Error::InvalidData(format!("unknown limit_type: {}", other))),
        }
    }

    /// Encode back to the stored `(limit_type, limit_value)` pair
    pub fn to_parts(&self) -> (&'static str, f64) {
        match self {
            RuleLimit::Price(v) => ("price", *v),
            RuleLimit::Percent(v) => ("percent", *v),
            RuleLimit::HighPercent(v) => ("high_percent", *v),
            RuleLimit::Weekly(d) => ("weekly", *d as f64),
            RuleLimit::Monthly(d) => ("monthly", *d as f64),
        }
    }

    /// Calendar-driven rules fire on a date, not a price
    pub fn is_periodic(&self) -> bool {
        matches!(self, RuleLimit::Weekly(_) | RuleLimit::Monthly(_))
    }
}

/// A per-symbol trading rule, exclusively owned by one account.
///
/// `user_id` and `hash_value` are denormalized from the owning account
/// when rules are loaded, so the session runner can address the broker
/// without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRule {
    pub id: i64,
    pub account_id: String,
    pub user_id: String,
    pub hash_value: String,
    pub symbol: String,
    /// Korean listings carry a display name next to the numeric code
    pub stock_name: Option<String>,
    pub trade_action: TradeAction,
    pub limit: RuleLimit,
    /// Desired share count once the rule completes
    pub target_amount: i64,
    /// Max notional this rule may move per day, in account currency
    pub daily_money: f64,
    pub cash_only: bool,
    pub status: RuleStatus,
    pub current_holding: f64,
    pub average_price: f64,
    pub last_price: f64,
    pub high_price: f64,
}

impl TradingRule {
    pub fn is_periodic(&self) -> bool {
        self.limit.is_periodic()
    }

    /// Display label: stock name for KR listings, symbol otherwise
    pub fn display_name(&self) -> &str {
        self.stock_name.as_deref().unwrap_or(&self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_decode_price_like() {
        assert_eq!(
            RuleLimit::from_parts("price", 150.0).unwrap(),
            RuleLimit::Price(150.0)
        );
        assert_eq!(
            RuleLimit::from_parts("percent", 5.0).unwrap(),
            RuleLimit::Percent(5.0)
        );
        assert_eq!(
            RuleLimit::from_parts("high_percent", 20.0).unwrap(),
            RuleLimit::HighPercent(20.0)
        );
    }

    #[test]
    fn test_limit_decode_calendar() {
        assert_eq!(
            RuleLimit::from_parts("weekly", 4.0).unwrap(),
            RuleLimit::Weekly(4)
        );
        assert_eq!(
            RuleLimit::from_parts("monthly", 25.0).unwrap(),
            RuleLimit::Monthly(25)
        );
        assert!(RuleLimit::from_parts("weekly", 7.0).is_err());
        assert!(RuleLimit::from_parts("monthly", 0.0).is_err());
        assert!(RuleLimit::from_parts("monthly", 32.0).is_err());
        assert!(RuleLimit::from_parts("weekly", 2.5).is_err());
    }

    #[test]
    fn test_limit_roundtrip() {
        for limit in [
            RuleLimit::Price(99.5),
            RuleLimit::Percent(10.0),
            RuleLimit::HighPercent(15.0),
            RuleLimit::Weekly(0),
            RuleLimit::Monthly(31),
        ] {
            let (kind, value) = limit.to_parts();
            assert_eq!(RuleLimit::from_parts(kind, value).unwrap(), limit);
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(RuleStatus::parse("ACTIVE").unwrap(), RuleStatus::Active);
        assert_eq!(RuleStatus::parse("PROCESSED").unwrap(), RuleStatus::Processed);
        assert!(RuleStatus::parse("active").is_err());
    }
}
