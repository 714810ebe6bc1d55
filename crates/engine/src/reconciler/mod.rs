//! Split/merge reconciler
//!
//! After the integrity check passes, quantity mismatches that carried
//! a split signature are absorbed into the rule numerics. A forward
//! split (ratio ~0.5) doubles the share count, so the target (a share
//! count) must double and the historical high (a price) must halve.

use std::collections::HashMap;
use tracing::info;

use autotrader_core::{DetailedPositions, PositionDetail, Result, TradingRule};
use autotrader_persistence::RuleStore;

/// Below this, book and broker quantities are considered equal
const QTY_EPSILON: f64 = 1e-3;

/// Correction to apply to one rule after a corporate action
#[derive(Debug, Clone, PartialEq)]
pub struct SplitAdjustment {
    pub rule_id: i64,
    pub ratio: f64,
    pub new_average_price: f64,
    pub new_high_price: f64,
    pub new_target_amount: i64,
    pub new_holding: f64,
}

/// Detect whether a rule's book needs a split/merge correction.
/// Returns `None` when quantities agree or either average price is
/// zero (nothing to scale by).
pub fn detect_adjustment(rule: &TradingRule, broker: &PositionDetail) -> Option<SplitAdjustment> {
    if rule.average_price <= 0.0 || broker.average_price <= 0.0 {
        return None;
    }
    if (broker.quantity - rule.current_holding).abs() <= QTY_EPSILON {
        return None;
    }

    let ratio = broker.average_price / rule.average_price;
    Some(SplitAdjustment {
        rule_id: rule.id,
        ratio,
        new_average_price: broker.average_price,
        new_high_price: rule.high_price * ratio,
        new_target_amount: (rule.target_amount as f64 / ratio).floor() as i64,
        new_holding: broker.quantity,
    })
}

/// Reconcile every given rule against the broker's detailed positions
/// and persist the corrections. Returns how many rules were adjusted.
pub async fn reconcile(
    store: &dyn RuleStore,
    rules: &[TradingRule],
    broker_positions: &HashMap<String, DetailedPositions>,
) -> Result<usize> {
    let mut adjusted = 0;

    for rule in rules {
        let detail = broker_positions
            .get(&rule.hash_value)
            .and_then(|positions| positions.get(&rule.symbol));
        let detail = match detail {
            Some(detail) => detail,
            None => continue,
        };

        if let Some(adjustment) = detect_adjustment(rule, detail) {
            info!(
                "Split adjustment for {} (rule {}): ratio {:.4}, target {} -> {}, holding {} -> {}",
                rule.symbol,
                rule.id,
                adjustment.ratio,
                rule.target_amount,
                adjustment.new_target_amount,
                rule.current_holding,
                adjustment.new_holding,
            );
            store
                .update_split_adjustment(
                    adjustment.rule_id,
                    adjustment.new_average_price,
                    adjustment.new_high_price,
                    adjustment.new_target_amount,
                    adjustment.new_holding,
                )
                .await?;
            adjusted += 1;
        }
    }

    Ok(adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{detail, test_rule};

    fn rule_with_book(holding: f64, avg: f64, target: i64, high: f64) -> TradingRule {
        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = holding;
        rule.average_price = avg;
        rule.target_amount = target;
        rule.high_price = high;
        rule
    }

    #[test]
    fn test_forward_split_adjustment() {
        // Book: 100 @ 100 avg; broker after split: 200 @ 69
        let rule = rule_with_book(100.0, 100.0, 100, 120.0);
        let adjustment = detect_adjustment(&rule, &detail(200.0, 69.0, 69.0)).unwrap();

        assert!((adjustment.ratio - 0.69).abs() < 1e-9);
        assert_eq!(adjustment.new_average_price, 69.0);
        assert_eq!(adjustment.new_target_amount, (100.0f64 / 0.69).floor() as i64);
        assert!((adjustment.new_high_price - 82.8).abs() < 1e-9);
        assert_eq!(adjustment.new_holding, 200.0);
    }

    #[test]
    fn test_no_adjustment_when_quantities_agree() {
        let rule = rule_with_book(100.0, 100.0, 100, 120.0);
        assert!(detect_adjustment(&rule, &detail(100.0, 105.0, 110.0)).is_none());
    }

    #[test]
    fn test_no_adjustment_without_average_prices() {
        let rule = rule_with_book(100.0, 0.0, 100, 120.0);
        assert!(detect_adjustment(&rule, &detail(200.0, 50.0, 50.0)).is_none());

        let rule = rule_with_book(100.0, 100.0, 100, 120.0);
        assert!(detect_adjustment(&rule, &detail(200.0, 0.0, 50.0)).is_none());
    }

    #[test]
    fn test_round_trip_within_floor_error() {
        // Applying ratio r then 1/r returns (target, high) to the
        // original within one unit of floor error
        for ratio in [0.5, 0.69, 2.0, 3.0] {
            let original = rule_with_book(100.0, 100.0, 10, 200.0);
            let forward = detect_adjustment(
                &original,
                &detail(100.0 / ratio, 100.0 * ratio, 100.0 * ratio),
            )
            .unwrap();

            let mut split = original.clone();
            split.current_holding = 100.0 / ratio;
            split.average_price = forward.new_average_price;
            split.target_amount = forward.new_target_amount;
            split.high_price = forward.new_high_price;

            let back = detect_adjustment(&split, &detail(100.0, 100.0, 100.0)).unwrap();

            assert!((back.new_high_price - 200.0).abs() < 1e-6);
            assert!((back.new_target_amount - 10).abs() <= 1);
        }
    }
}
