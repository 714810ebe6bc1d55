//! Shared fixtures and mock collaborators for engine tests

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use autotrader_core::{
    Account, DetailedPositions, Error, Market, Order, PositionDetail, Positions, Result,
    RuleLimit, RuleStatus, TradeAction, TradingRule,
};
use autotrader_networking::{Broker, BrokerFactory};
use autotrader_persistence::RuleStore;

use crate::alert::Alerter;

pub fn detail(quantity: f64, average_price: f64, last_price: f64) -> PositionDetail {
    PositionDetail {
        quantity,
        average_price,
        last_price,
    }
}

/// Baseline ACTIVE buy rule at hash "hash123" for user "test_user"
pub fn test_rule(id: i64, symbol: &str) -> TradingRule {
    TradingRule {
        id,
        account_id: "test_user_0".to_string(),
        user_id: "test_user".to_string(),
        hash_value: "hash123".to_string(),
        symbol: symbol.to_string(),
        stock_name: None,
        trade_action: TradeAction::Buy,
        limit: RuleLimit::Price(100.0),
        target_amount: 10,
        daily_money: 1000.0,
        cash_only: true,
        status: RuleStatus::Active,
        current_holding: 0.0,
        average_price: 0.0,
        last_price: 0.0,
        high_price: 0.0,
    }
}

pub fn test_account(id: &str, user_id: &str, hash: &str) -> Account {
    Account {
        id: id.to_string(),
        user_id: user_id.to_string(),
        account_number: format!("num-{}", id),
        description: None,
        hash_value: Some(hash.to_string()),
        contribution: None,
        account_type: None,
        cash_balance: 0.0,
        total_value: 0.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub kind: &'static str,
    pub hash: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: f64,
}

/// Scriptable broker double
pub struct MockBroker {
    pub user: String,
    pub market: Market,
    pub hashs: HashMap<String, String>,
    /// Answers for successive `market_open` calls; exhausted -> false
    pub open_sequence: Mutex<VecDeque<bool>>,
    pub prices: Mutex<HashMap<String, f64>>,
    pub cash: Mutex<f64>,
    /// Cash level after a successful sweep liquidation
    pub post_sweep_cash: Option<f64>,
    pub positions: Mutex<HashMap<String, Positions>>,
    pub detailed: Mutex<HashMap<String, DetailedPositions>>,
    pub total_value: f64,
    pub placed: Mutex<Vec<PlacedOrder>>,
    pub reject_orders: bool,
}

impl MockBroker {
    pub fn new(user: &str, hash: &str) -> Self {
        Self {
            user: user.to_string(),
            market: Market::Us,
            hashs: HashMap::from([(format!("num-{}", hash), hash.to_string())]),
            open_sequence: Mutex::new(VecDeque::new()),
            prices: Mutex::new(HashMap::new()),
            cash: Mutex::new(0.0),
            post_sweep_cash: None,
            positions: Mutex::new(HashMap::from([(hash.to_string(), Positions::new())])),
            detailed: Mutex::new(HashMap::from([(hash.to_string(), DetailedPositions::new())])),
            total_value: 0.0,
            placed: Mutex::new(Vec::new()),
            reject_orders: false,
        }
    }

    pub fn set_open_sequence(&self, opens: &[bool]) {
        *self.open_sequence.lock().unwrap() = opens.iter().copied().collect();
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn set_cash(&self, cash: f64) {
        *self.cash.lock().unwrap() = cash;
    }

    pub fn set_detail(&self, hash: &str, symbol: &str, entry: PositionDetail) {
        self.detailed
            .lock()
            .unwrap()
            .entry(hash.to_string())
            .or_default()
            .insert(symbol.to_string(), entry);
        self.positions
            .lock()
            .unwrap()
            .entry(hash.to_string())
            .or_default()
            .insert(symbol.to_string(), entry.quantity);
    }

    fn order(&self, kind: &'static str, hash: &str, symbol: &str, quantity: i64, price: f64) -> Order {
        self.placed.lock().unwrap().push(PlacedOrder {
            kind,
            hash: hash.to_string(),
            symbol: symbol.to_string(),
            quantity,
            price,
        });
        if self.reject_orders {
            Order::failed()
        } else {
            Order::success(format!("ORD-{}", self.placed.lock().unwrap().len()))
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn user_id(&self) -> &str {
        &self.user
    }

    fn market(&self) -> Market {
        self.market
    }

    async fn get_hashs(&self) -> Result<HashMap<String, String>> {
        Ok(self.hashs.clone())
    }

    async fn market_open(&self) -> bool {
        self.open_sequence.lock().unwrap().pop_front().unwrap_or(false)
    }

    async fn get_positions(&self, hash: &str) -> Result<Positions> {
        Ok(self.positions.lock().unwrap().get(hash).cloned().unwrap_or_default())
    }

    async fn get_positions_result(&self, hash: &str) -> Result<DetailedPositions> {
        Ok(self.detailed.lock().unwrap().get(hash).cloned().unwrap_or_default())
    }

    async fn get_cash(&self, _hash: &str) -> Result<f64> {
        Ok(*self.cash.lock().unwrap())
    }

    async fn get_account_result(&self, _hash: &str) -> Result<(f64, f64)> {
        Ok((*self.cash.lock().unwrap(), self.total_value))
    }

    async fn get_last_price(&self, symbol: &str) -> Result<f64> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::NetworkError(format!("no quote for {}", symbol)))
    }

    async fn place_limit_buy(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        Ok(self.order("limit_buy", hash, symbol, quantity, price))
    }

    async fn place_limit_sell(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        Ok(self.order("limit_sell", hash, symbol, quantity, price))
    }

    async fn place_market_sell(&self, hash: &str, symbol: &str, quantity: i64) -> Result<Order> {
        Ok(self.order("market_sell", hash, symbol, quantity, 0.0))
    }

    async fn sell_sweep_etfs_for_cash(
        &self,
        hash: &str,
        shortfall: f64,
        _positions: &Positions,
    ) -> Result<Option<Order>> {
        match self.post_sweep_cash {
            Some(cash) => {
                *self.cash.lock().unwrap() = cash;
                Ok(Some(self.order("sweep_sell", hash, "BIL", 0, shortfall)))
            }
            None => Ok(None),
        }
    }
}

/// Factory that hands the same mock broker to every user
pub struct MockBrokerFactory {
    pub broker: Arc<MockBroker>,
}

impl BrokerFactory for MockBrokerFactory {
    fn create(&self, _user_id: &str) -> Result<Arc<dyn Broker>> {
        Ok(self.broker.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTrade {
    pub account_id: String,
    pub rule_id: i64,
    pub order_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub price: f64,
    pub action: TradeAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub date: NaiveDate,
    pub account_id: String,
    pub symbol: String,
    pub amount: f64,
    pub quantity: Option<f64>,
}

/// In-memory rule store double
#[derive(Default)]
pub struct MockStore {
    pub users: Vec<String>,
    pub accounts: Mutex<Vec<Account>>,
    pub rules: Mutex<Vec<TradingRule>>,
    pub trade_today: Mutex<HashMap<i64, f64>>,
    pub recorded: Mutex<Vec<RecordedTrade>>,
    pub status_updates: Mutex<Vec<(i64, RuleStatus)>>,
    pub split_adjustments: Mutex<Vec<i64>>,
    pub snapshots: Mutex<Vec<SnapshotRow>>,
    pub cash_updates: Mutex<Vec<(String, f64)>>,
    pub total_updates: Mutex<Vec<(String, f64)>>,
    pub hash_updates: Mutex<Vec<(String, String)>>,
    pub price_updates: Mutex<Vec<(i64, f64, f64, f64, f64)>>,
}

impl MockStore {
    pub fn with_rules(users: Vec<String>, accounts: Vec<Account>, rules: Vec<TradingRule>) -> Self {
        Self {
            users,
            accounts: Mutex::new(accounts),
            rules: Mutex::new(rules),
            ..Default::default()
        }
    }

    pub fn rule_status(&self, rule_id: i64) -> Option<RuleStatus> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.status)
    }
}

#[async_trait]
impl RuleStore for MockStore {
    async fn get_users(&self) -> Result<Vec<String>> {
        Ok(self.users.clone())
    }

    async fn get_user_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_hash_value(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| a.hash_value.clone())
            .collect())
    }

    async fn update_account_hash(
        &self,
        account_number: &str,
        hash_value: &str,
        _user_id: &str,
    ) -> Result<()> {
        self.hash_updates
            .lock()
            .unwrap()
            .push((account_number.to_string(), hash_value.to_string()));
        Ok(())
    }

    async fn get_active_trading_rules(&self) -> Result<Vec<TradingRule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status == RuleStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_all_trading_rules(&self) -> Result<Vec<TradingRule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn get_periodic_rules(&self) -> Result<Vec<TradingRule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.is_periodic()
                    && matches!(r.status, RuleStatus::Active | RuleStatus::Processed)
            })
            .cloned()
            .collect())
    }

    async fn update_rule_status(&self, rule_id: i64, status: RuleStatus) -> Result<()> {
        self.status_updates.lock().unwrap().push((rule_id, status));
        if let Some(rule) = self.rules.lock().unwrap().iter_mut().find(|r| r.id == rule_id) {
            rule.status = status;
        }
        Ok(())
    }

    async fn update_current_price_quantity(
        &self,
        rule_id: i64,
        last_price: f64,
        current_holding: f64,
        average_price: f64,
        high_price: f64,
    ) -> Result<()> {
        self.price_updates.lock().unwrap().push((
            rule_id,
            last_price,
            current_holding,
            average_price,
            high_price,
        ));
        Ok(())
    }

    async fn update_split_adjustment(
        &self,
        rule_id: i64,
        average_price: f64,
        high_price: f64,
        target_amount: i64,
        current_holding: f64,
    ) -> Result<()> {
        self.split_adjustments.lock().unwrap().push(rule_id);
        if let Some(rule) = self.rules.lock().unwrap().iter_mut().find(|r| r.id == rule_id) {
            rule.average_price = average_price;
            rule.high_price = high_price;
            rule.target_amount = target_amount;
            rule.current_holding = current_holding;
        }
        Ok(())
    }

    async fn get_trade_today(&self, rule_id: i64) -> Result<f64> {
        Ok(self.trade_today.lock().unwrap().get(&rule_id).copied().unwrap_or(0.0))
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
        self.recorded.lock().unwrap().push(RecordedTrade {
            account_id: account_id.to_string(),
            rule_id,
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            quantity,
            price,
            action,
        });
        *self.trade_today.lock().unwrap().entry(rule_id).or_insert(0.0) +=
            quantity as f64 * price;
        Ok(())
    }

    async fn add_daily_result(
        &self,
        date: NaiveDate,
        account_id: &str,
        cash_balance: f64,
        total_value: f64,
        holdings: &DetailedPositions,
    ) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.push(SnapshotRow {
            date,
            account_id: account_id.to_string(),
            symbol: "cash".to_string(),
            amount: cash_balance,
            quantity: None,
        });
        snapshots.push(SnapshotRow {
            date,
            account_id: account_id.to_string(),
            symbol: "total".to_string(),
            amount: total_value,
            quantity: None,
        });
        for (symbol, detail) in holdings {
            snapshots.push(SnapshotRow {
                date,
                account_id: account_id.to_string(),
                symbol: symbol.clone(),
                amount: detail.quantity * detail.last_price,
                quantity: Some(detail.quantity),
            });
        }
        Ok(())
    }

    async fn update_account_cash_balance(&self, account_id: &str, cash_balance: f64) -> Result<()> {
        self.cash_updates
            .lock()
            .unwrap()
            .push((account_id.to_string(), cash_balance));
        Ok(())
    }

    async fn update_account_total_value(&self, account_id: &str, total_value: f64) -> Result<()> {
        self.total_updates
            .lock()
            .unwrap()
            .push((account_id.to_string(), total_value));
        Ok(())
    }
}

/// Alerter double capturing every message
#[derive(Default)]
pub struct MockAlerter {
    pub notices: Mutex<Vec<String>>,
    pub fatals: Mutex<Vec<String>>,
}

#[async_trait]
impl Alerter for MockAlerter {
    async fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }

    async fn fatal(&self, context: &str, message: &str) {
        self.fatals
            .lock()
            .unwrap()
            .push(format!("{}: {}", context, message));
    }
}
