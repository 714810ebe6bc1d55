//! Trade history and daily snapshot operations

use chrono::NaiveDate;
use sqlx::MySqlPool;

use autotrader_core::{DetailedPositions, Error, Result, TradeAction};

/// Notional already moved by this rule today
pub async fn get_trade_today(pool: &MySqlPool, rule_id: i64) -> Result<f64> {
    let row: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT SUM(used_money) AS total_money
        FROM trade_history
        WHERE trading_rule_id = ? AND DATE(trade_date) = CURRENT_DATE()
        "#,
    )
    .bind(rule_id)
    .fetch_one(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(row.0.unwrap_or(0.0))
}

/// Append one executed order to the trade history
#[allow(clippy::too_many_arguments)]
pub async fn record_trade(
    pool: &MySqlPool,
    account_id: &str,
    rule_id: i64,
    order_id: &str,
    symbol: &str,
    quantity: i64,
    price: f64,
    action: TradeAction,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trade_history
        (account_id, trading_rule_id, order_id, symbol, quantity, price, trade_type, used_money)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(account_id)
    .bind(rule_id)
    .bind(order_id)
    .bind(symbol)
    .bind(quantity)
    .bind(price)
    .bind(action.as_str())
    .bind(quantity as f64 * price)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

async fn upsert_record(
    pool: &MySqlPool,
    date: NaiveDate,
    account_id: &str,
    symbol: &str,
    amount: f64,
    quantity: Option<f64>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO daily_records (record_date, account_id, symbol, amount, quantity)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE amount = VALUES(amount), quantity = VALUES(quantity)
        "#,
    )
    .bind(date)
    .bind(account_id)
    .bind(symbol)
    .bind(amount)
    .bind(quantity)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Snapshot one account for the day: synthetic "cash" and "total"
/// rows plus one row per held symbol. Upserts, so re-running a
/// snapshot for the same date overwrites rather than duplicates.
pub async fn add_daily_result(
    pool: &MySqlPool,
    date: NaiveDate,
    account_id: &str,
    cash_balance: f64,
    total_value: f64,
    holdings: &DetailedPositions,
) -> Result<()> {
    upsert_record(pool, date, account_id, "cash", cash_balance, None).await?;
    upsert_record(pool, date, account_id, "total", total_value, None).await?;

    for (symbol, detail) in holdings {
        let value = detail.quantity * detail.last_price;
        upsert_record(pool, date, account_id, symbol, value, Some(detail.quantity)).await?;
    }

    Ok(())
}
