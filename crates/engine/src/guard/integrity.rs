//! Pre-session state integrity check
//!
//! Compares each active rule's booked holding against the broker's
//! before any order goes out. The book must either match the broker
//! or disagree in a way that carries a split signature; anything else
//! means a human traded outside the system (or data is corrupt) and
//! the session must not run.

use std::collections::HashMap;
use tracing::warn;

use autotrader_core::{DetailedPositions, Error, Result, TradingRule};

/// Quantity differences below this are float noise, not mismatches
const QTY_EPSILON: f64 = 1e-3;

/// Price-ratio band that reads as normal volatility. A mismatch whose
/// broker-price/book-average ratio falls inside this band cannot be a
/// corporate action.
const SPLIT_RATIO_LOW: f64 = 0.7;
const SPLIT_RATIO_HIGH: f64 = 1.3;

/// Classification of one rule's book-vs-broker comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityCase {
    /// Quantities agree within epsilon
    Match,
    /// Book is flat, broker holds shares: unmanaged position, safe
    NewPosition,
    /// Quantity mismatch with a price ratio outside the volatility
    /// band: assumed corporate action, the reconciler will absorb it
    SplitSignature,
    /// Book holds shares the broker does not
    PhantomDb,
    /// Broker holds shares but reports price 0
    BrokerPriceZero,
    /// Book holds shares but has no average price
    DbAvgZero,
    /// Quantity mismatch at an unchanged price: someone traded by hand
    ManualTrade,
}

impl IntegrityCase {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            IntegrityCase::PhantomDb
                | IntegrityCase::BrokerPriceZero
                | IntegrityCase::DbAvgZero
                | IntegrityCase::ManualTrade
        )
    }
}

/// Classify one (book, broker) position pair. Total over all inputs.
pub fn classify_position(
    db_qty: f64,
    db_avg_price: f64,
    broker_qty: f64,
    broker_last_price: f64,
) -> IntegrityCase {
    if (broker_qty - db_qty).abs() < QTY_EPSILON {
        return IntegrityCase::Match;
    }

    if db_qty > 0.0 && broker_qty == 0.0 {
        return IntegrityCase::PhantomDb;
    }

    if db_qty == 0.0 && broker_qty > 0.0 {
        return IntegrityCase::NewPosition;
    }

    if broker_qty > 0.0 && broker_last_price == 0.0 {
        return IntegrityCase::BrokerPriceZero;
    }

    if db_avg_price == 0.0 {
        return IntegrityCase::DbAvgZero;
    }

    let ratio = broker_last_price / db_avg_price;
    if (SPLIT_RATIO_LOW..=SPLIT_RATIO_HIGH).contains(&ratio) {
        IntegrityCase::ManualTrade
    } else {
        IntegrityCase::SplitSignature
    }
}

/// Check every given rule against the broker's detailed positions
/// (account hash -> symbol -> detail). Failures aggregate: one bad
/// rule fails the whole batch.
pub fn check_integrity(
    rules: &[TradingRule],
    broker_positions: &HashMap<String, DetailedPositions>,
) -> Result<()> {
    let mut failures = Vec::new();

    for rule in rules {
        let positions = match broker_positions.get(&rule.hash_value) {
            Some(positions) => positions,
            None => {
                failures.push(format!(
                    "{} (rule {}): no broker positions for account hash",
                    rule.symbol, rule.id
                ));
                continue;
            }
        };

        let (broker_qty, broker_avg, broker_last) = match positions.get(&rule.symbol) {
            Some(detail) => (detail.quantity, detail.average_price, detail.last_price),
            None => (0.0, 0.0, 0.0),
        };

        let case = classify_position(
            rule.current_holding,
            rule.average_price,
            broker_qty,
            broker_last,
        );

        match case {
            IntegrityCase::Match | IntegrityCase::NewPosition => {}
            IntegrityCase::SplitSignature => {
                warn!(
                    "{}: split signature (DB:{} avg {:.2}, broker:{} avg {:.2})",
                    rule.symbol, rule.current_holding, rule.average_price, broker_qty, broker_avg
                );
            }
            IntegrityCase::PhantomDb => {
                failures.push(format!(
                    "{} (rule {}): Phantom Position - DB:{} vs Broker:0",
                    rule.symbol, rule.id, rule.current_holding
                ));
            }
            IntegrityCase::BrokerPriceZero => {
                failures.push(format!(
                    "{} (rule {}): Invalid Broker Price 0 with quantity {}",
                    rule.symbol, rule.id, broker_qty
                ));
            }
            IntegrityCase::DbAvgZero => {
                failures.push(format!(
                    "{} (rule {}): DB Avg Price 0 with quantity mismatch DB:{} vs Broker:{}",
                    rule.symbol, rule.id, rule.current_holding, broker_qty
                ));
            }
            IntegrityCase::ManualTrade => {
                failures.push(format!(
                    "{} (rule {}): Quantity Mismatch without Split Signature \
                     (DB:{} vs Broker:{}) - Likely Manual Trade",
                    rule.symbol, rule.id, rule.current_holding, broker_qty
                ));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Integrity(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{detail, test_rule};
    use autotrader_core::PositionDetail;

    fn positions_for(
        hash: &str,
        entries: &[(&str, PositionDetail)],
    ) -> HashMap<String, DetailedPositions> {
        let mut details = DetailedPositions::new();
        for (symbol, entry) in entries {
            details.insert(symbol.to_string(), *entry);
        }
        HashMap::from([(hash.to_string(), details)])
    }

    fn base_rule() -> TradingRule {
        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = 100.0;
        rule.average_price = 150.0;
        rule
    }

    #[test]
    fn test_perfect_match_passes() {
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[("AAPL", detail(100.0, 150.0, 155.0))]);
        assert!(check_integrity(&rules, &positions).is_ok());
    }

    #[test]
    fn test_phantom_position_fails() {
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[]);
        let err = check_integrity(&rules, &positions).unwrap_err();
        assert!(err.to_string().contains("Phantom Position"));
        assert!(err.to_string().contains("DB:100"));
    }

    #[test]
    fn test_manual_sell_detected() {
        // Someone sold 50 shares by hand; price is unchanged so no
        // split can explain it
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[("AAPL", detail(50.0, 150.0, 150.0))]);
        let err = check_integrity(&rules, &positions).unwrap_err();
        assert!(err.to_string().contains("Likely Manual Trade"));
    }

    #[test]
    fn test_forward_split_passes() {
        // 2-for-1: quantity doubled, price halved
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[("AAPL", detail(200.0, 75.0, 75.0))]);
        assert!(check_integrity(&rules, &positions).is_ok());
    }

    #[test]
    fn test_reverse_split_passes() {
        // 1-for-2: quantity halved, price doubled
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[("AAPL", detail(50.0, 300.0, 300.0))]);
        assert!(check_integrity(&rules, &positions).is_ok());
    }

    #[test]
    fn test_new_position_passes() {
        let mut rule = base_rule();
        rule.current_holding = 0.0;
        let positions = positions_for("hash123", &[("AAPL", detail(10.0, 150.0, 150.0))]);
        assert!(check_integrity(&[rule], &positions).is_ok());
    }

    #[test]
    fn test_one_bad_rule_fails_the_batch() {
        let good = base_rule();
        let mut bad = base_rule();
        bad.id = 2;
        bad.symbol = "TSLA".to_string();

        let positions = positions_for(
            "hash123",
            &[
                ("AAPL", detail(100.0, 150.0, 150.0)),
                ("TSLA", detail(50.0, 150.0, 150.0)),
            ],
        );
        let err = check_integrity(&[good, bad], &positions).unwrap_err();
        assert!(err.to_string().contains("TSLA"));
    }

    #[test]
    fn test_broker_price_zero_fails_on_mismatch() {
        let rules = vec![base_rule()];
        let positions = positions_for("hash123", &[("AAPL", detail(101.0, 150.0, 0.0))]);
        let err = check_integrity(&rules, &positions).unwrap_err();
        assert!(err.to_string().contains("Invalid Broker Price"));
    }

    #[test]
    fn test_db_avg_zero_fails_on_mismatch() {
        let mut rule = base_rule();
        rule.average_price = 0.0;
        let positions = positions_for("hash123", &[("AAPL", detail(101.0, 150.0, 150.0))]);
        let err = check_integrity(&[rule], &positions).unwrap_err();
        assert!(err.to_string().contains("DB Avg Price 0"));
    }

    #[test]
    fn test_missing_hash_fails() {
        let rules = vec![base_rule()];
        let positions = positions_for("other_hash", &[]);
        let err = check_integrity(&rules, &positions).unwrap_err();
        assert!(err.to_string().contains("no broker positions"));
    }

    #[test]
    fn test_quantity_epsilon() {
        // 0.0009 difference is float noise; 0.0011 is a mismatch
        assert_eq!(
            classify_position(100.0, 150.0, 100.0009, 150.0),
            IntegrityCase::Match
        );
        assert_eq!(
            classify_position(100.0, 150.0, 100.0011, 150.0),
            IntegrityCase::ManualTrade
        );
    }

    #[test]
    fn test_ratio_band_boundaries() {
        // Band endpoints are inclusive failures; just outside passes
        assert_eq!(
            classify_position(100.0, 100.0, 200.0, 69.0),
            IntegrityCase::SplitSignature
        );
        assert_eq!(
            classify_position(100.0, 100.0, 200.0, 70.0),
            IntegrityCase::ManualTrade
        );
        assert_eq!(
            classify_position(100.0, 100.0, 200.0, 130.0),
            IntegrityCase::ManualTrade
        );
        assert_eq!(
            classify_position(100.0, 100.0, 200.0, 131.0),
            IntegrityCase::SplitSignature
        );
    }
}
