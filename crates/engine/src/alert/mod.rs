//! Operator notifications
//!
//! The session reports trade confirmations and fatal conditions
//! through this trait. Delivery (email, chat) is an external concern;
//! the in-repo implementation writes to the log.

use async_trait::async_trait;
use tracing::{error, info};

use autotrader_core::TradingRule;

#[async_trait]
pub trait Alerter: Send + Sync {
    /// Transactional notification (order confirmations)
    async fn notify(&self, message: &str);

    /// Session-fatal condition; sent before the process exits
    async fn fatal(&self, context: &str, message: &str);
}

/// Alerter that writes to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn notify(&self, message: &str) {
        info!("ALERT: {}", message);
    }

    async fn fatal(&self, context: &str, message: &str) {
        error!("FATAL ALERT [{}]: {}", context, message);
    }
}

/// Confirmation body for a filled buy order
pub fn buy_alert_message(
    rule: &TradingRule,
    quantity: i64,
    price: f64,
    previous_holding: f64,
    now: &str,
) -> String {
    let (_, limit_value) = rule.limit.to_parts();
    format!(
        "[BUY ORDER]\n\
         Account: {} ({})\n\
         Symbol: {}\n\
         Purchase Price: {:.2}\n\
         Quantity: {}\n\
         Total Cost: {:.2}\n\
         Condition:\n\
         - {:.2} <= Limit ({:.2})\n\
         - Target Quantity: {}\n\
         - Updated Quantity: {} -> {}\n\
         - Daily Money Limit: {:.2}\n\
         Order At {}",
        rule.account_id,
        rule.user_id,
        rule.display_name(),
        price,
        quantity,
        quantity as f64 * price,
        price,
        limit_value,
        rule.target_amount,
        previous_holding,
        previous_holding + quantity as f64,
        rule.daily_money,
        now,
    )
}

/// Confirmation body for a filled sell order
pub fn sell_alert_message(
    rule: &TradingRule,
    quantity: i64,
    price: f64,
    previous_holding: f64,
    now: &str,
) -> String {
    let (_, limit_value) = rule.limit.to_parts();
    format!(
        "[SELL ORDER]\n\
         Account: {} ({})\n\
         Symbol: {}\n\
         Sell Price: {:.2}\n\
         Quantity: {}\n\
         Total Sale: {:.2}\n\
         Condition:\n\
         - {:.2} >= Limit ({:.2})\n\
         - Target Quantity: {}\n\
         - Updated Quantity: {} -> {}\n\
         - Daily Money Limit: {:.2}\n\
         Order At {}",
        rule.account_id,
        rule.user_id,
        rule.display_name(),
        price,
        quantity,
        quantity as f64 * price,
        price,
        limit_value,
        rule.target_amount,
        previous_holding,
        previous_holding - quantity as f64,
        rule.daily_money,
        now,
    )
}
