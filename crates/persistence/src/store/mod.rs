//! Rule store interface
//!
//! The store owns all persistent state: accounts, trading rules, the
//! trade history, and daily snapshots. The trading core only ever
//! talks to this trait; the MySQL implementation lives in
//! [`crate::mysql`].

use async_trait::async_trait;
use chrono::NaiveDate;

use autotrader_core::{Account, DetailedPositions, Result, RuleStatus, TradeAction, TradingRule};

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Distinct user ids across all accounts
    async fn get_users(&self) -> Result<Vec<String>>;

    async fn get_user_accounts(&self, user_id: &str) -> Result<Vec<Account>>;

    /// All account hashes registered for a user
    async fn get_hash_value(&self, user_id: &str) -> Result<Vec<String>>;

    /// Refresh the broker-assigned hash for an account
    async fn update_account_hash(
        &self,
        account_number: &str,
        hash_value: &str,
        user_id: &str,
    ) -> Result<()>;

    /// Rules with status ACTIVE, joined with their owning account
    async fn get_active_trading_rules(&self) -> Result<Vec<TradingRule>>;

    /// Every rule regardless of status
    async fn get_all_trading_rules(&self) -> Result<Vec<TradingRule>>;

    /// Weekly/monthly rules in ACTIVE or PROCESSED state
    async fn get_periodic_rules(&self) -> Result<Vec<TradingRule>>;

    async fn update_rule_status(&self, rule_id: i64, status: RuleStatus) -> Result<()>;

    /// End-of-day refresh of a rule's observed market fields
    async fn update_current_price_quantity(
        &self,
        rule_id: i64,
        last_price: f64,
        current_holding: f64,
        average_price: f64,
        high_price: f64,
    ) -> Result<()>;

    /// Corporate-action correction of a rule's numerics
    async fn update_split_adjustment(
        &self,
        rule_id: i64,
        average_price: f64,
        high_price: f64,
        target_amount: i64,
        current_holding: f64,
    ) -> Result<()>;

    /// Notional already moved by this rule today
    async fn get_trade_today(&self, rule_id: i64) -> Result<f64>;

    #[allow(clippy::too_many_arguments)]
    async fn record_trade(
        &self,
        account_id: &str,
        rule_id: i64,
        order_id: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
        action: TradeAction,
    ) -> Result<()>;

    /// Upsert the daily snapshot for one account: synthetic "cash" and
    /// "total" rows plus one row per held symbol
    async fn add_daily_result(
        &self,
        date: NaiveDate,
        account_id: &str,
        cash_balance: f64,
        total_value: f64,
        holdings: &DetailedPositions,
    ) -> Result<()>;

    async fn update_account_cash_balance(&self, account_id: &str, cash_balance: f64) -> Result<()>;

    async fn update_account_total_value(&self, account_id: &str, total_value: f64) -> Result<()>;
}
