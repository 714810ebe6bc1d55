//! MySQL rule store

mod accounts;
mod connection;
mod history;
mod rules;

pub use connection::Database;

use async_trait::async_trait;
use chrono::NaiveDate;

use autotrader_core::{Account, DetailedPositions, Result, RuleStatus, TradeAction, TradingRule};

use crate::store::RuleStore;

#[async_trait]
impl RuleStore for Database {
    async fn get_users(&self) -> Result<Vec<String>> {
        accounts::get_users(self.pool()).await
    }

    async fn get_user_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        accounts::get_user_accounts(self.pool(), user_id).await
    }

    async fn get_hash_value(&self, user_id: &str) -> Result<Vec<String>> {
        accounts::get_hash_value(self.pool(), user_id).await
    }

    async fn update_account_hash(
        &self,
        account_number: &str,
        hash_value: &str,
        user_id: &str,
    ) -> Result<()> {
        accounts::update_account_hash(self.pool(), account_number, hash_value, user_id).await
    }

    async fn get_active_trading_rules(&self) -> Result<Vec<TradingRule>> {
        rules::get_active_trading_rules(self.pool()).await
    }

    async fn get_all_trading_rules(&self) -> Result<Vec<TradingRule>> {
        rules::get_all_trading_rules(self.pool()).await
    }

    async fn get_periodic_rules(&self) -> Result<Vec<TradingRule>> {
        rules::get_periodic_rules(self.pool()).await
    }

    async fn update_rule_status(&self, rule_id: i64, status: RuleStatus) -> Result<()> {
        rules::update_rule_status(self.pool(), rule_id, status).await
    }

    async fn update_current_price_quantity(
        &self,
        rule_id: i64,
        last_price: f64,
        current_holding: f64,
        average_price: f64,
        high_price: f64,
    ) -> Result<()> {
        rules::update_current_price_quantity(
            self.pool(),
            rule_id,
            last_price,
            current_holding,
            average_price,
            high_price,
        )
        .await
    }

    async fn update_split_adjustment(
        &self,
        rule_id: i64,
        average_price: f64,
        high_price: f64,
        target_amount: i64,
        current_holding: f64,
    ) -> Result<()> {
        rules::update_split_adjustment(
            self.pool(),
            rule_id,
            average_price,
            high_price,
            target_amount,
            current_holding,
        )
        .await
    }

    async fn get_trade_today(&self, rule_id: i64) -> Result<f64> {
        history::get_trade_today(self.pool(), rule_id).await
    }

    async fn record_trade(
        &self,
        account_id: &str,
        rule_id: i64,
        order_id: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
        action: TradeAction,
    ) -> Result<()> {
        history::record_trade(
            self.pool(),
            account_id,
            rule_id,
            order_id,
            symbol,
            quantity,
            price,
            action,
        )
        .await
    }

    async fn add_daily_result(
        &self,
        date: NaiveDate,
        account_id: &str,
        cash_balance: f64,
        total_value: f64,
        holdings: &DetailedPositions,
    ) -> Result<()> {
        history::add_daily_result(self.pool(), date, account_id, cash_balance, total_value, holdings)
            .await
    }

    async fn update_account_cash_balance(&self, account_id: &str, cash_balance: f64) -> Result<()> {
        accounts::update_account_cash_balance(self.pool(), account_id, cash_balance).await
    }

    async fn update_account_total_value(&self, account_id: &str, total_value: f64) -> Result<()> {
        accounts::update_account_total_value(self.pool(), account_id, total_value).await
    }
}
