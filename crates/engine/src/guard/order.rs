//! Per-order validation

use autotrader_core::{Error, Market, Result};

// HARDCODED LIMITS - DO NOT CHANGE WITHOUT CODE REVIEW
// Protects against fat-finger size errors (10x or 100x intended size)
const MAX_ORDER_AMOUNT_USD: f64 = 100_000.0;
const MAX_ORDER_AMOUNT_KRW: f64 = 100_000_000.0;

// Protects against data errors (price coming in as 0 or near 0)
const MIN_PRICE_USD: f64 = 0.50;
const MIN_PRICE_KRW: f64 = 50.0;

fn limits(market: Market) -> (f64, f64) {
    match market {
        Market::Us => (MAX_ORDER_AMOUNT_USD, MIN_PRICE_USD),
        Market::Kr => (MAX_ORDER_AMOUNT_KRW, MIN_PRICE_KRW),
    }
}

/// Validate buy order parameters: quantity, price floor, hard
/// notional cap, and strict solvency against current cash.
pub fn validate_buy(
    market: Market,
    symbol: &str,
    price: f64,
    quantity: i64,
    current_cash: f64,
) -> Result<()> {
    if quantity <= 0 {
        return Err(Error::Safety(format!(
            "{}: invalid quantity {}",
            symbol, quantity
        )));
    }
    if price <= 0.0 {
        return Err(Error::Safety(format!("{}: invalid price {}", symbol, price)));
    }

    let total_amount = price * quantity as f64;
    let (max_limit, min_price) = limits(market);

    if total_amount > max_limit {
        return Err(Error::Safety(format!(
            "FATAL: {} buy amount {:.2} exceeds hard limit {:.2}",
            symbol, total_amount, max_limit
        )));
    }

    if price < min_price {
        return Err(Error::Safety(format!(
            "{}: price {} is below minimum threshold {}",
            symbol, price, min_price
        )));
    }

    // Strict solvency check, no epsilon: a logic bug that ignored the
    // balance must be caught here, not absorbed by tolerance
    if current_cash > 0.0 && total_amount > current_cash {
        return Err(Error::Safety(format!(
            "DANGER: {} buy amount {:.2} exceeds available cash {:.2}",
            symbol, total_amount, current_cash
        )));
    }

    Ok(())
}

/// Validate sell order parameters; the holding check prevents naked
/// shorts when the holding is known.
pub fn validate_sell(
    market: Market,
    symbol: &str,
    price: f64,
    quantity: i64,
    current_holding: Option<f64>,
) -> Result<()> {
    if quantity <= 0 {
        return Err(Error::Safety(format!(
            "{}: invalid quantity {}",
            symbol, quantity
        )));
    }
    if price <= 0.0 {
        return Err(Error::Safety(format!("{}: invalid price {}", symbol, price)));
    }

    let total_amount = price * quantity as f64;
    let (max_limit, min_price) = limits(market);

    if total_amount > max_limit {
        return Err(Error::Safety(format!(
            "FATAL: {} sell amount {:.2} exceeds hard limit {:.2}",
            symbol, total_amount, max_limit
        )));
    }

    if price < min_price {
        return Err(Error::Safety(format!(
            "{}: price {} is below minimum threshold {}",
            symbol, price, min_price
        )));
    }

    if let Some(holding) = current_holding {
        if quantity as f64 > holding {
            return Err(Error::Safety(format!(
                "DANGER: {} sell quantity {} exceeds current holding {}",
                symbol, quantity, holding
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_buy_passes() {
        assert!(validate_buy(Market::Us, "AAPL", 150.0, 10, 2000.0).is_ok());
    }

    #[test]
    fn test_buy_rejects_bad_quantity_and_price() {
        assert!(validate_buy(Market::Us, "AAPL", 150.0, 0, 2000.0).is_err());
        assert!(validate_buy(Market::Us, "AAPL", 150.0, -5, 2000.0).is_err());
        assert!(validate_buy(Market::Us, "AAPL", 0.0, 10, 2000.0).is_err());
        assert!(validate_buy(Market::Us, "AAPL", -1.0, 10, 2000.0).is_err());
    }

    #[test]
    fn test_buy_fat_finger_block() {
        // 1000 shares at $200 = $200,000, twice the US hard limit
        let err = validate_buy(Market::Us, "AAPL", 200.0, 1000, 500_000.0).unwrap_err();
        assert!(err.to_string().contains("exceeds hard limit"));

        // Just under the limit passes
        assert!(validate_buy(Market::Us, "AAPL", 200.0, 499, 500_000.0).is_ok());
    }

    #[test]
    fn test_buy_min_price_per_market() {
        assert!(validate_buy(Market::Us, "PENNY", 0.49, 10, 1000.0).is_err());
        assert!(validate_buy(Market::Us, "PENNY", 0.50, 10, 1000.0).is_ok());
        assert!(validate_buy(Market::Kr, "005930", 49.0, 10, 100_000.0).is_err());
        assert!(validate_buy(Market::Kr, "005930", 50.0, 10, 100_000.0).is_ok());
    }

    #[test]
    fn test_buy_strict_solvency() {
        // 10 x 100 = 1000 > 999.99 cash: blocked, no epsilon
        let err = validate_buy(Market::Us, "AAPL", 100.0, 10, 999.99).unwrap_err();
        assert!(err.to_string().contains("exceeds available cash"));

        // Exactly 100% of cash is allowed
        assert!(validate_buy(Market::Us, "AAPL", 100.0, 10, 1000.0).is_ok());

        // Unknown cash (reported as 0) skips the solvency check
        assert!(validate_buy(Market::Us, "AAPL", 100.0, 10, 0.0).is_ok());
    }

    #[test]
    fn test_kr_hard_limit() {
        let err = validate_buy(Market::Kr, "005930", 70_000.0, 2000, 0.0).unwrap_err();
        assert!(err.to_string().contains("exceeds hard limit"));
    }

    #[test]
    fn test_valid_sell_passes() {
        assert!(validate_sell(Market::Us, "AAPL", 150.0, 10, Some(20.0)).is_ok());
    }

    #[test]
    fn test_sell_no_naked_short() {
        let err = validate_sell(Market::Us, "AAPL", 150.0, 30, Some(20.0)).unwrap_err();
        assert!(err.to_string().contains("exceeds current holding"));

        // Unknown holding skips the check
        assert!(validate_sell(Market::Us, "AAPL", 150.0, 30, None).is_ok());
    }

    #[test]
    fn test_sell_shares_guard_checks() {
        assert!(validate_sell(Market::Us, "AAPL", 150.0, 0, Some(20.0)).is_err());
        assert!(validate_sell(Market::Us, "AAPL", 0.0, 10, Some(20.0)).is_err());
        assert!(validate_sell(Market::Us, "AAPL", 0.4, 10, Some(20.0)).is_err());
        assert!(validate_sell(Market::Us, "AAPL", 300.0, 400, Some(500.0)).is_err());
    }
}
