//! Daily session runner
//!
//! Drives one market for one trading day: bootstrap brokers, run the
//! per-user pre-flight (fail-closed), poll rules while the market is
//! open, then write the end-of-day snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use autotrader_core::{
    Clock, DetailedPositions, Error, Positions, Result, RuleStatus, TradeAction, TradingRule,
};
use autotrader_networking::broker::SWEEP_ETFS;
use autotrader_networking::{Broker, BrokerFactory};
use autotrader_persistence::RuleStore;

use crate::alert::{buy_alert_message, sell_alert_message, Alerter};
use crate::calculator::{buy_decision, sell_decision};
use crate::config::SessionConfig;
use crate::guard::{check_integrity, validate_buy, validate_sell};
use crate::reconciler::reconcile;
use crate::session::positions::PositionBook;
use crate::session::triggers::{date_matches, evaluate_trigger};

/// Consecutive failed passes before the store is considered
/// unreachable and the session aborts
const MAX_PASS_FAILURES: u32 = 3;

pub struct SessionRunner {
    config: SessionConfig,
    store: Arc<dyn RuleStore>,
    broker_factory: Arc<dyn BrokerFactory>,
    alerter: Arc<dyn Alerter>,
    clock: Arc<dyn Clock>,
    brokers: HashMap<String, Arc<dyn Broker>>,
    book: PositionBook,
    shutdown: Arc<AtomicBool>,
}

impl SessionRunner {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn RuleStore>,
        broker_factory: Arc<dyn BrokerFactory>,
        alerter: Arc<dyn Alerter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            broker_factory,
            alerter,
            clock,
            brokers: HashMap::new(),
            book: PositionBook::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at every pass boundary; set it from a signal
    /// handler to end the session cleanly
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run one full trading day. Any error returned here is fatal for
    /// the session and has already been reported through the alerter.
    pub async fn run(&mut self) -> Result<()> {
        match self.run_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.alerter.fatal("trading session", &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<()> {
        info!("Starting {} trading session", self.config.market);

        let users = self.bootstrap().await?;
        if users.is_empty() {
            warn!("No users configured; nothing to trade");
            return Ok(());
        }

        for user in &users {
            self.preflight(user).await?;
        }

        self.poll_loop().await?;
        self.eod_snapshot().await?;

        info!("{} trading session complete", self.config.market);
        Ok(())
    }

    /// Load users and build one broker per user
    async fn bootstrap(&mut self) -> Result<Vec<String>> {
        let users = self.store.get_users().await?;
        info!("Session bootstrap: {} user(s)", users.len());

        for user in &users {
            let broker = self.broker_factory.create(user)?;
            self.brokers.insert(user.clone(), broker);
        }
        Ok(users)
    }

    /// Per-user pre-flight: sync account hashes, snapshot positions,
    /// verify state integrity (fail-closed), reconcile splits, then
    /// cache plain quantities for the poll loop.
    async fn preflight(&mut self, user: &str) -> Result<()> {
        info!("Pre-flight for user {}", user);
        let broker = self
            .brokers
            .get(user)
            .cloned()
            .ok_or_else(|| Error::Unknown(format!("no broker for user {}", user)))?;

        let hashs = broker.get_hashs().await?;
        for (account_number, hash) in &hashs {
            self.store
                .update_account_hash(account_number, hash, user)
                .await?;
        }

        for hash in hashs.values() {
            let details = self.fetch_detailed_with_retry(&broker, hash).await?;
            self.book.set_detailed(hash, details);
        }

        let rules: Vec<TradingRule> = self
            .store
            .get_active_trading_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.user_id == user)
            .collect();

        check_integrity(&rules, self.book.detailed())?;

        let adjusted = reconcile(self.store.as_ref(), &rules, self.book.detailed()).await?;
        if adjusted > 0 {
            info!("Applied {} split adjustment(s) for user {}", adjusted, user);
        }

        for hash in hashs.values() {
            let positions = self.fetch_plain_with_retry(&broker, hash).await?;
            self.book.set_plain(hash, positions);
        }

        Ok(())
    }

    async fn fetch_detailed_with_retry(
        &self,
        broker: &Arc<dyn Broker>,
        hash: &str,
    ) -> Result<DetailedPositions> {
        let policy = self.config.position_fetch_retry;
        let mut last_err = None;

        for attempt in 1..=policy.max_attempts {
            match broker.get_positions_result(hash).await {
                Ok(details) => return Ok(details),
                Err(e) => {
                    warn!(
                        "Detailed position fetch attempt {}/{} failed: {}",
                        attempt, policy.max_attempts, e
                    );
                    last_err = Some(e);
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Unknown("position fetch failed".to_string())))
    }

    async fn fetch_plain_with_retry(
        &self,
        broker: &Arc<dyn Broker>,
        hash: &str,
    ) -> Result<Positions> {
        let policy = self.config.position_fetch_retry;
        let mut last_err = None;

        for attempt in 1..=policy.max_attempts {
            match broker.get_positions(hash).await {
                Ok(positions) => return Ok(positions),
                Err(e) => {
                    warn!(
                        "Position fetch attempt {}/{} failed: {}",
                        attempt, policy.max_attempts, e
                    );
                    last_err = Some(e);
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Unknown("position fetch failed".to_string())))
    }

    /// Poll rules every pass while the market is open. A clean close
    /// or a shutdown request ends the loop; repeated pass failures
    /// mean the store is unreachable and abort the session.
    async fn poll_loop(&mut self) -> Result<()> {
        let mut pass_failures = 0u32;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested; ending session at pass boundary");
                break;
            }

            let broker = match self.brokers.values().next() {
                Some(broker) => broker.clone(),
                None => break,
            };
            if !broker.market_open().await {
                info!("Market closed; ending poll loop");
                break;
            }

            match self.run_pass().await {
                Ok(()) => {
                    pass_failures = 0;
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    // A guard block in hard-fail mode aborts at once;
                    // everything else gets a few retries
                    if matches!(e, Error::Safety(_)) {
                        return Err(e);
                    }
                    pass_failures += 1;
                    error!(
                        "Trading pass failed ({}/{}): {}",
                        pass_failures, MAX_PASS_FAILURES, e
                    );
                    if pass_failures >= MAX_PASS_FAILURES {
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        Ok(())
    }

    /// One pass: re-arm periodic rules, then evaluate every active rule
    async fn run_pass(&mut self) -> Result<()> {
        self.rearm_periodic_rules().await?;

        let rules = self.store.get_active_trading_rules().await?;
        for rule in &rules {
            self.process_rule(rule).await?;
        }
        Ok(())
    }

    /// Flip PROCESSED periodic rules back to ACTIVE when their
    /// calendar condition matches today (in the market's local time)
    async fn rearm_periodic_rules(&self) -> Result<()> {
        let now = self.clock.now_in(self.config.market.timezone());

        for rule in self.store.get_periodic_rules().await? {
            if rule.status == RuleStatus::Processed && date_matches(&rule.limit, &now) {
                info!("Re-arming periodic rule {} ({})", rule.id, rule.symbol);
                self.store
                    .update_rule_status(rule.id, RuleStatus::Active)
                    .await?;
            }
        }
        Ok(())
    }

    /// Evaluate one rule. Transient problems (quote failure, broker
    /// rejection) skip the rule and return Ok; store failures and
    /// hard guard blocks propagate.
    async fn process_rule(&mut self, rule: &TradingRule) -> Result<()> {
        let broker = match self.brokers.get(&rule.user_id) {
            Some(broker) => broker.clone(),
            None => {
                error!(
                    "Rule {} ({}) belongs to unknown user {}; skipping",
                    rule.id, rule.symbol, rule.user_id
                );
                return Ok(());
            }
        };

        if !self.book.has_hash(&rule.hash_value) {
            error!(
                "Rule {} ({}) references an account hash missing from the session cache; skipping",
                rule.id, rule.symbol
            );
            return Ok(());
        }

        let last_price = match broker.get_last_price(&rule.symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!("Quote failed for {}; skipping this pass: {}", rule.symbol, e);
                return Ok(());
            }
        };
        debug!("Current price for {}: {}", rule.symbol, last_price);

        let now = self.clock.now_in(self.config.market.timezone());
        match evaluate_trigger(rule, last_price, &now) {
            Some(TradeAction::Buy) => {
                info!("Buy condition met for {} at {}", rule.symbol, last_price);
                self.buy_stock(&broker, rule, last_price).await
            }
            Some(TradeAction::Sell) => {
                info!("Sell condition met for {} at {}", rule.symbol, last_price);
                self.sell_stock(&broker, rule, last_price).await
            }
            None => Ok(()),
        }
    }

    async fn buy_stock(
        &mut self,
        broker: &Arc<dyn Broker>,
        rule: &TradingRule,
        last_price: f64,
    ) -> Result<()> {
        let holding = self.book.quantity(&rule.hash_value, &rule.symbol);
        let today_used = self.store.get_trade_today(rule.id).await?;

        let mut cash = match broker.get_cash(&rule.hash_value).await {
            Ok(cash) => cash,
            Err(e) => {
                warn!("Cash query failed for {}; skipping: {}", rule.symbol, e);
                return Ok(());
            }
        };

        let mut decision = buy_decision(
            rule.target_amount,
            holding,
            rule.daily_money,
            today_used,
            last_price,
            cash,
            rule.cash_only,
        );

        if decision.limit_reason == "Need Cash" {
            info!(
                "Insufficient cash for {}; selling sweep ETFs to cover {:.2}",
                rule.symbol, decision.shortfall
            );
            let positions = self
                .book
                .plain(&rule.hash_value)
                .cloned()
                .unwrap_or_default();
            match broker
                .sell_sweep_etfs_for_cash(&rule.hash_value, decision.shortfall, &positions)
                .await
            {
                Ok(Some(order)) if order.is_success => info!("Sweep ETF sold to raise cash"),
                Ok(_) => warn!("No sweep ETF available to cover the shortfall"),
                Err(e) => warn!("Sweep ETF sale failed for {}: {}", rule.symbol, e),
            }

            cash = match broker.get_cash(&rule.hash_value).await {
                Ok(cash) => cash,
                Err(e) => {
                    warn!("Cash re-query failed for {}; skipping: {}", rule.symbol, e);
                    return Ok(());
                }
            };
            // One retry only: clamp to whatever cash is available now
            decision = buy_decision(
                rule.target_amount,
                holding,
                rule.daily_money,
                today_used,
                last_price,
                cash,
                true,
            );
        }

        if decision.quantity <= 0 {
            debug!(
                "No shares to buy for rule {} ({}): {}",
                rule.id, rule.symbol, decision.limit_reason
            );
            return Ok(());
        }

        if let Err(e) = validate_buy(
            self.config.market,
            &rule.symbol,
            last_price,
            decision.quantity,
            cash,
        ) {
            error!("Safety guard blocked buy for {}: {}", rule.symbol, e);
            if self.config.hard_fail_on_guard_block {
                return Err(e);
            }
            return Ok(());
        }

        let order = match broker
            .place_limit_buy(&rule.hash_value, &rule.symbol, decision.quantity, last_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("Error during buy order for {}: {}", rule.symbol, e);
                return Ok(());
            }
        };
        if !order.is_success {
            error!("Failed to place buy order for {}", rule.symbol);
            return Ok(());
        }

        self.book
            .apply_fill(&rule.hash_value, &rule.symbol, decision.quantity as f64);
        self.store
            .record_trade(
                &rule.account_id,
                rule.id,
                order.id(),
                &rule.symbol,
                decision.quantity,
                last_price,
                TradeAction::Buy,
            )
            .await?;

        let now = self
            .clock
            .now_in(self.config.market.timezone())
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        self.alerter
            .notify(&buy_alert_message(rule, decision.quantity, last_price, holding, &now))
            .await;
        info!(
            "Buy order placed for {}: {} shares at {} (order {})",
            rule.symbol,
            decision.quantity,
            last_price,
            order.id()
        );

        if holding + decision.quantity as f64 >= rule.target_amount as f64 {
            let status = if rule.is_periodic() {
                RuleStatus::Processed
            } else {
                RuleStatus::Completed
            };
            info!(
                "Rule {} reached its target; status -> {}",
                rule.id,
                status.as_str()
            );
            self.store.update_rule_status(rule.id, status).await?;
        }

        Ok(())
    }

    async fn sell_stock(
        &mut self,
        broker: &Arc<dyn Broker>,
        rule: &TradingRule,
        last_price: f64,
    ) -> Result<()> {
        let holding = self.book.quantity(&rule.hash_value, &rule.symbol);
        let today_used = self.store.get_trade_today(rule.id).await?;

        let decision = sell_decision(
            rule.target_amount,
            holding,
            rule.daily_money,
            today_used,
            last_price,
        );

        if decision.quantity <= 0 {
            debug!(
                "No shares to sell for rule {} ({}): {}",
                rule.id, rule.symbol, decision.limit_reason
            );
            return Ok(());
        }

        if let Err(e) = validate_sell(
            self.config.market,
            &rule.symbol,
            last_price,
            decision.quantity,
            Some(holding),
        ) {
            error!("Safety guard blocked sell for {}: {}", rule.symbol, e);
            if self.config.hard_fail_on_guard_block {
                return Err(e);
            }
            return Ok(());
        }

        let order = match broker
            .place_limit_sell(&rule.hash_value, &rule.symbol, decision.quantity, last_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("Error during sell order for {}: {}", rule.symbol, e);
                return Ok(());
            }
        };
        if !order.is_success {
            error!("Failed to place sell order for {}", rule.symbol);
            return Ok(());
        }

        self.book
            .apply_fill(&rule.hash_value, &rule.symbol, -(decision.quantity as f64));
        self.store
            .record_trade(
                &rule.account_id,
                rule.id,
                order.id(),
                &rule.symbol,
                decision.quantity,
                last_price,
                TradeAction::Sell,
            )
            .await?;

        let now = self
            .clock
            .now_in(self.config.market.timezone())
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        self.alerter
            .notify(&sell_alert_message(rule, decision.quantity, last_price, holding, &now))
            .await;
        info!(
            "Sell order placed for {}: {} shares at {} (order {})",
            rule.symbol,
            decision.quantity,
            last_price,
            order.id()
        );

        if holding - decision.quantity as f64 <= rule.target_amount as f64 {
            info!("Rule {} reached its target; status -> COMPLETED", rule.id);
            self.store
                .update_rule_status(rule.id, RuleStatus::Completed)
                .await?;
        }

        Ok(())
    }

    /// End-of-day: refetch detailed positions, snapshot every account
    /// ("cash", "total", one row per held symbol), refresh account
    /// balances (US cash gets the sweep-ETF value added back), then
    /// refresh every rule's observed market fields.
    async fn eod_snapshot(&mut self) -> Result<()> {
        info!("Market closed; writing end-of-day snapshot");
        let today = self
            .clock
            .now_in(self.config.market.timezone())
            .date_naive();

        for (user, broker) in &self.brokers {
            let hashes = self.store.get_hash_value(user).await?;
            for hash in &hashes {
                match broker.get_positions_result(hash).await {
                    Ok(details) => self.book.set_detailed(hash, details),
                    Err(e) => warn!("EOD position fetch failed for hash {}: {}", hash, e),
                }
            }

            for account in self.store.get_user_accounts(user).await? {
                let hash = match &account.hash_value {
                    Some(hash) => hash.clone(),
                    None => {
                        warn!("Account {} has no hash value; skipping snapshot", account.id);
                        continue;
                    }
                };

                let (cash, total) = match broker.get_account_result(&hash).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("EOD account fetch failed for {}: {}", account.id, e);
                        continue;
                    }
                };

                let holdings = self
                    .book
                    .detailed_for(&hash)
                    .cloned()
                    .unwrap_or_default();
                self.store
                    .add_daily_result(today, &account.id, cash, total, &holdings)
                    .await?;

                // Sweep ETFs are cash equivalents: fold their value
                // back into the recorded cash balance (US only)
                let mut cash_balance = cash;
                if self.config.market == autotrader_core::Market::Us {
                    for etf in SWEEP_ETFS {
                        if let Some(detail) = holdings.get(etf) {
                            cash_balance += detail.quantity * detail.last_price;
                        }
                    }
                }
                self.store
                    .update_account_cash_balance(&account.id, cash_balance)
                    .await?;
                self.store
                    .update_account_total_value(&account.id, total)
                    .await?;
            }
        }

        for rule in self.store.get_all_trading_rules().await? {
            let detail = self
                .book
                .detailed_for(&rule.hash_value)
                .and_then(|positions| positions.get(&rule.symbol));

            match detail {
                Some(detail) => {
                    let high_price = if detail.average_price > 0.0 {
                        rule.high_price.max(detail.last_price)
                    } else {
                        rule.high_price
                    };
                    self.store
                        .update_current_price_quantity(
                            rule.id,
                            detail.last_price,
                            detail.quantity,
                            detail.average_price,
                            high_price,
                        )
                        .await?;
                }
                None => {
                    warn!(
                        "No position data for rule {} ({}); skipping EOD update",
                        rule.id, rule.symbol
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::testutil::{
        detail, test_account, test_rule, MockAlerter, MockBroker, MockBrokerFactory, MockStore,
    };
    use autotrader_core::{FixedClock, Market, RuleLimit};
    use chrono::NaiveDate;
    use std::time::Duration;

    /// 2024-03-04 10:00 Pacific, a Monday during US market hours
    fn monday_clock() -> Arc<FixedClock> {
        let utc = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap()
            .and_utc();
        Arc::new(FixedClock::new(utc))
    }

    fn runner_with(
        broker: Arc<MockBroker>,
        store: Arc<MockStore>,
        alerter: Arc<MockAlerter>,
    ) -> SessionRunner {
        let mut config = SessionConfig::new(Market::Us);
        config.poll_interval = Duration::from_millis(0);
        config.error_backoff = Duration::from_millis(0);
        config.position_fetch_retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(0),
        };
        SessionRunner::new(
            config,
            store,
            Arc::new(MockBrokerFactory { broker }),
            alerter,
            monday_clock(),
        )
    }

    fn single_user_store(rules: Vec<TradingRule>) -> Arc<MockStore> {
        Arc::new(MockStore::with_rules(
            vec!["test_user".to_string()],
            vec![test_account("test_user_0", "test_user", "hash123")],
            rules,
        ))
    }

    #[tokio::test]
    async fn test_buy_flow_completes_rule() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        broker.set_price("AAPL", 95.0);
        broker.set_cash(2000.0);

        let store = single_user_store(vec![test_rule(1, "AAPL")]);
        let alerter = Arc::new(MockAlerter::default());
        let mut runner = runner_with(broker.clone(), store.clone(), alerter.clone());

        runner.run().await.unwrap();

        let placed = broker.placed.lock().unwrap().clone();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].kind, "limit_buy");
        assert_eq!(placed[0].quantity, 10);
        assert_eq!(placed[0].price, 95.0);

        let recorded = store.recorded.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].quantity, 10);
        assert_eq!(recorded[0].action, TradeAction::Buy);
        assert!(!recorded[0].order_id.is_empty());

        assert_eq!(store.rule_status(1), Some(RuleStatus::Completed));
        assert!(alerter.notices.lock().unwrap()[0].contains("[BUY ORDER]"));
        assert!(alerter.fatals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_daily_budget_clips_buy() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        broker.set_price("AAPL", 100.0);
        broker.set_cash(5000.0);

        let mut rule = test_rule(1, "AAPL");
        rule.daily_money = 500.0;
        let store = single_user_store(vec![rule]);
        store.trade_today.lock().unwrap().insert(1, 150.0);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        // Remaining budget 350 at price 100 -> 3 shares, rule stays open
        let placed = broker.placed.lock().unwrap().clone();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].quantity, 3);
        assert_eq!(store.rule_status(1), Some(RuleStatus::Active));
    }

    #[tokio::test]
    async fn test_buy_with_sweep_shortfall_recovery() {
        let mut broker = MockBroker::new("test_user", "hash123");
        broker.post_sweep_cash = Some(1000.0);
        let broker = Arc::new(broker);
        broker.set_open_sequence(&[true, false]);
        broker.set_price("AAPL", 100.0);
        broker.set_cash(250.0);
        broker.set_detail("hash123", "BIL", detail(50.0, 100.0, 100.0));

        let mut rule = test_rule(1, "AAPL");
        rule.cash_only = false;
        rule.daily_money = 2000.0;
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let placed = broker.placed.lock().unwrap().clone();
        let buys: Vec<_> = placed.iter().filter(|o| o.kind == "limit_buy").collect();
        let sweeps: Vec<_> = placed.iter().filter(|o| o.kind == "sweep_sell").collect();

        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].price, 750.0); // the shortfall
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].quantity, 10);
        assert_eq!(store.rule_status(1), Some(RuleStatus::Completed));
    }

    #[tokio::test]
    async fn test_sell_flow_completes_rule() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        broker.set_price("AAPL", 110.0);
        broker.set_cash(0.0);
        broker.set_detail("hash123", "AAPL", detail(10.0, 100.0, 110.0));

        let mut rule = test_rule(1, "AAPL");
        rule.trade_action = TradeAction::Sell;
        rule.limit = RuleLimit::Price(105.0);
        rule.target_amount = 5;
        rule.daily_money = 2000.0;
        rule.current_holding = 10.0;
        rule.average_price = 100.0;
        let store = single_user_store(vec![rule]);
        let alerter = Arc::new(MockAlerter::default());

        let mut runner = runner_with(broker.clone(), store.clone(), alerter.clone());
        runner.run().await.unwrap();

        let placed = broker.placed.lock().unwrap().clone();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].kind, "limit_sell");
        assert_eq!(placed[0].quantity, 5);

        assert_eq!(store.rule_status(1), Some(RuleStatus::Completed));
        assert!(alerter.notices.lock().unwrap()[0].contains("[SELL ORDER]"));
    }

    #[tokio::test]
    async fn test_periodic_rule_rearms_and_processes() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        broker.set_price("SCHD", 50.0);
        broker.set_cash(1000.0);

        // Weekly buy on Mondays, already PROCESSED from last cycle
        let mut rule = test_rule(1, "SCHD");
        rule.limit = RuleLimit::Weekly(0);
        rule.status = RuleStatus::Processed;
        rule.target_amount = 2;
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let updates = store.status_updates.lock().unwrap().clone();
        assert_eq!(updates[0], (1, RuleStatus::Active));
        // Target reached again -> back to PROCESSED, not COMPLETED
        assert_eq!(updates[1], (1, RuleStatus::Processed));

        let placed = broker.placed.lock().unwrap().clone();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_integrity_failure_is_fatal() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        // Book says 100 shares, broker says 50 at an unchanged price:
        // manual trade, the session must not start
        broker.set_detail("hash123", "AAPL", detail(50.0, 150.0, 150.0));

        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = 100.0;
        rule.average_price = 150.0;
        let store = single_user_store(vec![rule]);
        let alerter = Arc::new(MockAlerter::default());

        let mut runner = runner_with(broker.clone(), store.clone(), alerter.clone());
        let err = runner.run().await.unwrap_err();

        assert!(err.to_string().contains("Manual Trade"));
        assert!(!alerter.fatals.lock().unwrap().is_empty());
        assert!(broker.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_is_reconciled_in_preflight() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[false]);
        // 2-for-1 split: 100 @ 100 became 200 @ 50
        broker.set_detail("hash123", "AAPL", detail(200.0, 50.0, 50.0));

        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = 100.0;
        rule.average_price = 100.0;
        rule.target_amount = 100;
        rule.high_price = 140.0;
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        assert_eq!(store.split_adjustments.lock().unwrap().clone(), vec![1]);
        let adjusted = store.rules.lock().unwrap()[0].clone();
        assert_eq!(adjusted.average_price, 50.0);
        assert_eq!(adjusted.current_holding, 200.0);
        assert_eq!(adjusted.target_amount, 200);
        assert!((adjusted.high_price - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_guard_block_skips_order_by_default() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        // Below the $0.50 US minimum: the calculator is fine with it
        // but the guard must block
        broker.set_price("PNNY", 0.40);
        broker.set_cash(2000.0);

        let mut rule = test_rule(1, "PNNY");
        rule.limit = RuleLimit::Price(1.0);
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        assert!(broker.placed.lock().unwrap().is_empty());
        assert!(store.recorded.lock().unwrap().is_empty());
        assert_eq!(store.rule_status(1), Some(RuleStatus::Active));
    }

    #[tokio::test]
    async fn test_guard_block_hard_fail_flag() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        broker.set_price("PNNY", 0.40);
        broker.set_cash(2000.0);

        let mut rule = test_rule(1, "PNNY");
        rule.limit = RuleLimit::Price(1.0);
        let store = single_user_store(vec![rule]);
        let alerter = Arc::new(MockAlerter::default());

        let mut runner = runner_with(broker.clone(), store.clone(), alerter.clone());
        runner.config.hard_fail_on_guard_block = true;

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, Error::Safety(_)));
        assert!(!alerter.fatals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quote_failure_skips_rule() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, false]);
        // No price configured for AAPL: every quote fails
        broker.set_cash(2000.0);

        let store = single_user_store(vec![test_rule(1, "AAPL")]);
        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        assert!(broker.placed.lock().unwrap().is_empty());
        assert_eq!(store.rule_status(1), Some(RuleStatus::Active));
    }

    #[tokio::test]
    async fn test_eod_snapshot_rows_and_sweep_cash() {
        let mut broker = MockBroker::new("test_user", "hash123");
        broker.total_value = 2500.0;
        let broker = Arc::new(broker);
        broker.set_open_sequence(&[false]);
        broker.set_cash(500.0);
        broker.set_detail("hash123", "BIL", detail(10.0, 100.0, 100.0));

        let store = single_user_store(vec![]);
        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let snapshots = store.snapshots.lock().unwrap().clone();
        let expected_date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert!(snapshots
            .iter()
            .any(|row| row.symbol == "cash" && row.amount == 500.0 && row.date == expected_date));
        assert!(snapshots.iter().any(|row| row.symbol == "total" && row.amount == 2500.0));
        assert!(snapshots
            .iter()
            .any(|row| row.symbol == "BIL" && row.amount == 1000.0 && row.quantity == Some(10.0)));

        // Sweep ETF value folds back into the recorded cash balance
        let cash_updates = store.cash_updates.lock().unwrap().clone();
        assert_eq!(cash_updates, vec![("test_user_0".to_string(), 1500.0)]);
        let total_updates = store.total_updates.lock().unwrap().clone();
        assert_eq!(total_updates, vec![("test_user_0".to_string(), 2500.0)]);
    }

    #[tokio::test]
    async fn test_eod_updates_rule_fields_and_high() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[false]);
        broker.set_cash(0.0);
        broker.set_detail("hash123", "AAPL", detail(10.0, 100.0, 130.0));

        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = 10.0;
        rule.average_price = 100.0;
        rule.high_price = 120.0;
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let updates = store.price_updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        // (rule_id, last, holding, avg, high = max(120, 130))
        assert_eq!(updates[0], (1, 130.0, 10.0, 100.0, 130.0));
    }

    #[tokio::test]
    async fn test_eod_high_not_written_without_average() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[false]);
        broker.set_cash(0.0);
        broker.set_detail("hash123", "AAPL", detail(10.0, 0.0, 130.0));

        let mut rule = test_rule(1, "AAPL");
        rule.current_holding = 10.0;
        rule.high_price = 120.0;
        let store = single_user_store(vec![rule]);

        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let updates = store.price_updates.lock().unwrap().clone();
        // Zero average: the cached high is carried through unchanged
        assert_eq!(updates[0].4, 120.0);
    }

    #[tokio::test]
    async fn test_preflight_syncs_account_hashes() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[false]);

        let store = single_user_store(vec![]);
        let mut runner = runner_with(broker, store.clone(), Arc::new(MockAlerter::default()));
        runner.run().await.unwrap();

        let hash_updates = store.hash_updates.lock().unwrap().clone();
        assert_eq!(hash_updates, vec![("num-hash123".to_string(), "hash123".to_string())]);
    }

    #[tokio::test]
    async fn test_shutdown_requested_ends_before_trading() {
        let broker = Arc::new(MockBroker::new("test_user", "hash123"));
        broker.set_open_sequence(&[true, true, true]);
        broker.set_price("AAPL", 95.0);
        broker.set_cash(2000.0);

        let store = single_user_store(vec![test_rule(1, "AAPL")]);
        let mut runner = runner_with(broker.clone(), store.clone(), Arc::new(MockAlerter::default()));
        runner.shutdown_handle().store(true, Ordering::Relaxed);

        runner.run().await.unwrap();

        // Stopped at the pass boundary: no pass ran, but the EOD
        // snapshot was still written
        assert!(broker.placed.lock().unwrap().is_empty());
        assert!(!store.snapshots.lock().unwrap().is_empty());
    }
}
