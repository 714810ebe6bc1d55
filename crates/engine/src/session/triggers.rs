//! Rule trigger evaluation

use chrono::{DateTime, Datelike};
use chrono_tz::Tz;

use autotrader_core::{RuleLimit, TradeAction, TradingRule};

/// Does the calendar condition of a periodic rule match `now`?
/// Weekdays count from Monday = 0.
pub fn date_matches(limit: &RuleLimit, now: &DateTime<Tz>) -> bool {
    match limit {
        RuleLimit::Weekly(weekday) => now.weekday().num_days_from_monday() == *weekday,
        RuleLimit::Monthly(day) => now.day() == *day,
        _ => false,
    }
}

/// Evaluate a rule against the live price (and the market-local date
/// for periodic rules). Returns the action to take, if any.
pub fn evaluate_trigger(
    rule: &TradingRule,
    last_price: f64,
    now: &DateTime<Tz>,
) -> Option<TradeAction> {
    match rule.limit {
        RuleLimit::Price(limit) => match rule.trade_action {
            TradeAction::Buy if last_price <= limit => Some(TradeAction::Buy),
            TradeAction::Sell if last_price >= limit => Some(TradeAction::Sell),
            _ => None,
        },
        RuleLimit::Percent(pct) => {
            if rule.average_price > 0.0 {
                let avg = rule.average_price;
                match rule.trade_action {
                    TradeAction::Buy if last_price <= avg * (1.0 - pct / 100.0) => {
                        Some(TradeAction::Buy)
                    }
                    TradeAction::Sell if last_price >= avg * (1.0 + pct / 100.0) => {
                        Some(TradeAction::Sell)
                    }
                    _ => None,
                }
            } else if rule.trade_action == TradeAction::Buy {
                // No position yet: seed the accumulation
                Some(TradeAction::Buy)
            } else {
                None
            }
        }
        RuleLimit::HighPercent(pct) => {
            if rule.trade_action == TradeAction::Buy
                && rule.high_price > 0.0
                && last_price <= rule.high_price * (1.0 - pct / 100.0)
            {
                Some(TradeAction::Buy)
            } else {
                None
            }
        }
        RuleLimit::Weekly(_) | RuleLimit::Monthly(_) => {
            if rule.trade_action == TradeAction::Buy && date_matches(&rule.limit, now) {
                Some(TradeAction::Buy)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_rule;
    use chrono::TimeZone;

    /// 2024-03-04 10:00 KST, a Monday
    fn monday() -> DateTime<Tz> {
        chrono_tz::Asia::Seoul
            .with_ymd_and_hms(2024, 3, 4, 10, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_price_limit_buy_and_sell() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::Price(100.0);

        assert_eq!(evaluate_trigger(&rule, 99.0, &monday()), Some(TradeAction::Buy));
        assert_eq!(evaluate_trigger(&rule, 100.0, &monday()), Some(TradeAction::Buy));
        assert_eq!(evaluate_trigger(&rule, 101.0, &monday()), None);

        rule.trade_action = TradeAction::Sell;
        assert_eq!(evaluate_trigger(&rule, 101.0, &monday()), Some(TradeAction::Sell));
        assert_eq!(evaluate_trigger(&rule, 99.0, &monday()), None);
    }

    #[test]
    fn test_percent_off_average() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::Percent(10.0);
        rule.average_price = 100.0;

        assert_eq!(evaluate_trigger(&rule, 90.0, &monday()), Some(TradeAction::Buy));
        assert_eq!(evaluate_trigger(&rule, 90.1, &monday()), None);

        rule.trade_action = TradeAction::Sell;
        assert_eq!(evaluate_trigger(&rule, 110.0, &monday()), Some(TradeAction::Sell));
        assert_eq!(evaluate_trigger(&rule, 109.9, &monday()), None);
    }

    #[test]
    fn test_percent_with_no_average_seeds_buy() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::Percent(10.0);
        rule.average_price = 0.0;

        // Any price starts the accumulation
        assert_eq!(evaluate_trigger(&rule, 500.0, &monday()), Some(TradeAction::Buy));

        // But never a sell
        rule.trade_action = TradeAction::Sell;
        assert_eq!(evaluate_trigger(&rule, 500.0, &monday()), None);
    }

    #[test]
    fn test_high_percent_buy_only() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::HighPercent(20.0);
        rule.high_price = 200.0;

        assert_eq!(evaluate_trigger(&rule, 160.0, &monday()), Some(TradeAction::Buy));
        assert_eq!(evaluate_trigger(&rule, 161.0, &monday()), None);

        // Without a recorded high there is nothing to measure from
        rule.high_price = 0.0;
        assert_eq!(evaluate_trigger(&rule, 1.0, &monday()), None);
    }

    #[test]
    fn test_weekly_fires_on_weekday() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::Weekly(0);
        assert_eq!(evaluate_trigger(&rule, 100.0, &monday()), Some(TradeAction::Buy));

        rule.limit = RuleLimit::Weekly(1);
        assert_eq!(evaluate_trigger(&rule, 100.0, &monday()), None);
    }

    #[test]
    fn test_monthly_fires_on_day() {
        let mut rule = test_rule(1, "AAPL");
        rule.limit = RuleLimit::Monthly(4);
        assert_eq!(evaluate_trigger(&rule, 100.0, &monday()), Some(TradeAction::Buy));

        rule.limit = RuleLimit::Monthly(5);
        assert_eq!(evaluate_trigger(&rule, 100.0, &monday()), None);
    }
}
