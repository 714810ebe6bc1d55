//! Trading rule persistence operations

use sqlx::MySqlPool;

use autotrader_core::{Error, Result, RuleLimit, RuleStatus, TradeAction, TradingRule};

/// Raw rule row joined with its owning account
#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: i64,
    account_id: String,
    user_id: String,
    hash_value: Option<String>,
    symbol: String,
    stock_name: Option<String>,
    trade_action: String,
    limit_type: String,
    limit_value: f64,
    target_amount: i64,
    daily_money: f64,
    cash_only: bool,
    status: String,
    current_holding: f64,
    average_price: f64,
    last_price: f64,
    high_price: f64,
}

impl RuleRow {
    fn into_rule(self) -> Result<TradingRule> {
        Ok(TradingRule {
            id: self.id,
            account_id: self.account_id,
            user_id: self.user_id,
            hash_value: self.hash_value.unwrap_or_default(),
            symbol: self.symbol,
            stock_name: self.stock_name,
            trade_action: TradeAction::parse(&self.trade_action)?,
            limit: RuleLimit::from_parts(&self.limit_type, self.limit_value)?,
            target_amount: self.target_amount,
            daily_money: self.daily_money,
            cash_only: self.cash_only,
            status: RuleStatus::parse(&self.status)?,
            current_holding: self.current_holding,
            average_price: self.average_price,
            last_price: self.last_price,
            high_price: self.high_price,
        })
    }
}

const RULE_COLUMNS: &str = r#"
    r.id, r.account_id, a.user_id, a.hash_value, r.symbol, r.stock_name,
    r.trade_action, r.limit_type, r.limit_value, r.target_amount,
    r.daily_money, r.cash_only, r.status, r.current_holding,
    r.average_price, r.last_price, r.high_price
"#;

async fn fetch_rules(pool: &MySqlPool, sql: &str) -> Result<Vec<TradingRule>> {
    let rows: Vec<RuleRow> = sqlx::query_as(sql)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    rows.into_iter().map(RuleRow::into_rule).collect()
}

pub async fn get_active_trading_rules(pool: &MySqlPool) -> Result<Vec<TradingRule>> {
    let sql = format!(
        r#"
        SELECT {RULE_COLUMNS}
        FROM trading_rules r
        JOIN accounts a ON r.account_id = a.id
        WHERE r.status = 'ACTIVE'
        ORDER BY a.user_id, r.trade_action
        "#
    );
    fetch_rules(pool, &sql).await
}

pub async fn get_all_trading_rules(pool: &MySqlPool) -> Result<Vec<TradingRule>> {
    let sql = format!(
        r#"
        SELECT {RULE_COLUMNS}
        FROM trading_rules r
        JOIN accounts a ON r.account_id = a.id
        "#
    );
    fetch_rules(pool, &sql).await
}

pub async fn get_periodic_rules(pool: &MySqlPool) -> Result<Vec<TradingRule>> {
    let sql = format!(
        r#"
        SELECT {RULE_COLUMNS}
        FROM trading_rules r
        JOIN accounts a ON r.account_id = a.id
        WHERE r.limit_type IN ('weekly', 'monthly')
          AND r.status IN ('ACTIVE', 'PROCESSED')
        "#
    );
    fetch_rules(pool, &sql).await
}

pub async fn update_rule_status(pool: &MySqlPool, rule_id: i64, status: RuleStatus) -> Result<()> {
    sqlx::query("UPDATE trading_rules SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(rule_id)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// End-of-day refresh of observed market fields
pub async fn update_current_price_quantity(
    pool: &MySqlPool,
    rule_id: i64,
    last_price: f64,
    current_holding: f64,
    average_price: f64,
    high_price: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE trading_rules
        SET last_price = ?, current_holding = ?, average_price = ?, high_price = ?
        WHERE id = ?
        "#,
    )
    .bind(last_price)
    .bind(current_holding)
    .bind(average_price)
    .bind(high_price)
    .bind(rule_id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Split/merge correction of the rule's numerics
pub async fn update_split_adjustment(
    pool: &MySqlPool,
    rule_id: i64,
    average_price: f64,
    high_price: f64,
    target_amount: i64,
    current_holding: f64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE trading_rules
        SET average_price = ?, high_price = ?, target_amount = ?, current_holding = ?
        WHERE id = ?
        "#,
    )
    .bind(average_price)
    .bind(high_price)
    .bind(target_amount)
    .bind(current_holding)
    .bind(rule_id)
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(e.to_string()))?;

    Ok(())
}
