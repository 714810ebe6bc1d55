//! Unified brokerage access
//!
//! One `Broker` per (user, market). Each implementation owns its
//! cached credentials and market-calendar state; sessions hold them in
//! a user -> broker map built through a `BrokerFactory`.

mod korea;
mod schwab;

pub use korea::{KoreaAuthConfig, KoreaBroker, KoreaBrokerFactory};
pub use schwab::{SchwabBroker, SchwabBrokerFactory};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use autotrader_core::{DetailedPositions, Market, Order, Positions, Result};

/// Timeout applied to every broker HTTP call
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Short-duration treasury ETFs treated as cash equivalents, in
/// liquidation preference order
pub const SWEEP_ETFS: [&str; 2] = ["BIL", "SGOV"];

/// Per-user access to one brokerage
#[async_trait]
pub trait Broker: Send + Sync {
    fn user_id(&self) -> &str;

    fn market(&self) -> Market;

    /// account_number -> opaque account hash required by all other calls
    async fn get_hashs(&self) -> Result<HashMap<String, String>>;

    /// Whether the market is currently in its regular session.
    /// Calendar lookups are cached per day; lookup errors degrade to a
    /// local-time fallback rather than propagating.
    async fn market_open(&self) -> bool;

    /// symbol -> held quantity
    async fn get_positions(&self, hash: &str) -> Result<Positions>;

    /// symbol -> quantity, average price, last price
    async fn get_positions_result(&self, hash: &str) -> Result<DetailedPositions>;

    /// Cash available for trading
    async fn get_cash(&self, hash: &str) -> Result<f64>;

    /// (cash, total liquidation value)
    async fn get_account_result(&self, hash: &str) -> Result<(f64, f64)>;

    async fn get_last_price(&self, symbol: &str) -> Result<f64>;

    async fn place_limit_buy(&self, hash: &str, symbol: &str, quantity: i64, price: f64)
        -> Result<Order>;

    async fn place_limit_sell(&self, hash: &str, symbol: &str, quantity: i64, price: f64)
        -> Result<Order>;

    async fn place_market_sell(&self, hash: &str, symbol: &str, quantity: i64) -> Result<Order>;

    /// Liquidate sweep ETFs to free up `shortfall` of cash. Returns
    /// `None` when the account holds none (always for KR accounts).
    async fn sell_sweep_etfs_for_cash(
        &self,
        hash: &str,
        shortfall: f64,
        positions: &Positions,
    ) -> Result<Option<Order>>;
}

/// Builds one broker per user for the session's market
pub trait BrokerFactory: Send + Sync {
    fn create(&self, user_id: &str) -> Result<Arc<dyn Broker>>;
}
