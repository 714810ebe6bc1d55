//! Schwab broker adapter (US market)
//!
//! Bearer-token REST client. The access token is produced out-of-band
//! by the OAuth refresh job and read from a per-user token file; this
//! adapter caches it for the lifetime of the session.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument, warn};

use autotrader_core::{
    Clock, DetailedPositions, Error, Market, Order, PositionDetail, Positions, Result,
};

use super::{Broker, BrokerFactory, REQUEST_TIMEOUT_SECS, SWEEP_ETFS};

const TRADER_BASE: &str = "https://api.schwabapi.com/trader/v1";
const MARKET_DATA_BASE: &str = "https://api.schwabapi.com/marketdata/v1";

/// Fallback regular session in Pacific time, used when the
/// market-hours endpoint is unreachable
const FALLBACK_OPEN: (u32, u32) = (6, 30);
const FALLBACK_CLOSE: (u32, u32) = (13, 0);

/// Cached answer from the market-hours endpoint, valid for one date
struct HoursCache {
    date: NaiveDate,
    /// Regular-session window in Pacific time; `None` means the
    /// market does not open today (holiday)
    window: Option<(DateTime<Tz>, DateTime<Tz>)>,
}

/// Broker adapter for one Schwab user
pub struct SchwabBroker {
    user_id: String,
    http: Client,
    token_path: PathBuf,
    token: RwLock<Option<String>>,
    hours: RwLock<Option<HoursCache>>,
    clock: Arc<dyn Clock>,
}

impl SchwabBroker {
    pub fn new(user_id: &str, token_path: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        Ok(Self {
            user_id: user_id.to_string(),
            http,
            token_path,
            token: RwLock::new(None),
            hours: RwLock::new(None),
            clock,
        })
    }

    /// Load and cache the bearer token from the user's token file
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let raw = tokio::fs::read_to_string(&self.token_path)
            .await
            .map_err(|e| {
                Error::AuthenticationError(format!(
                    "cannot read token file {}: {}",
                    self.token_path.display(),
                    e
                ))
            })?;
        let parsed: Value = serde_json::from_str(&raw)?;
        let token = parsed["token"]["access_token"]
            .as_str()
            .or_else(|| parsed["access_token"].as_str())
            .ok_or_else(|| {
                Error::AuthenticationError(format!(
                    "no access_token in {}",
                    self.token_path.display()
                ))
            })?
            .to_string();

        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.token().await?))
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );
        Ok(headers)
    }

    fn check_auth_error(response: &Response) -> Option<Error> {
        match response.status().as_u16() {
            401 => Some(Error::TokenExpired),
            403 => Some(Error::AuthenticationError("Access forbidden".to_string())),
            _ => None,
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .headers(self.default_headers().await?)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let response = response.error_for_status().map_err(|e| {
            error!("Request failed: {}", e);
            Error::ApiError(e.to_string())
        })?;

        let body: Value = response.json().await.map_err(|e| {
            error!("Failed to parse response: {}", e);
            Error::InvalidData(e.to_string())
        })?;
        Ok(body)
    }

    /// Fetch the account body, optionally with the positions field
    async fn get_account(&self, hash: &str, with_positions: bool) -> Result<Value> {
        let url = if with_positions {
            format!("{}/accounts/{}?fields=positions", TRADER_BASE, hash)
        } else {
            format!("{}/accounts/{}", TRADER_BASE, hash)
        };
        self.get_json(&url).await
    }

    /// Fetch today's regular-session window from the market-hours
    /// endpoint and cache it for the rest of the day
    async fn refresh_hours(&self, today: NaiveDate) {
        let url = format!("{}/markets/equity", MARKET_DATA_BASE);
        let window = match self.get_json(&url).await {
            Ok(body) => {
                let equity = &body["equity"]["EQ"];
                if !equity["isOpen"].as_bool().unwrap_or(false) {
                    None
                } else {
                    let session = &equity["sessionHours"]["regularMarket"][0];
                    let parse = |v: &Value| {
                        v.as_str()
                            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                            .map(|dt| dt.with_timezone(&Market::Us.timezone()))
                    };
                    match (parse(&session["start"]), parse(&session["end"])) {
                        (Some(start), Some(end)) => Some((start, end)),
                        _ => {
                            warn!("Market hours response missing session window");
                            None
                        }
                    }
                }
            }
            Err(e) => {
                // Fall back to the default session so a transient
                // calendar outage does not silence the whole day
                error!("Error updating market hours: {}", e);
                let tz = Market::Us.timezone();
                let at = |(h, m): (u32, u32)| {
                    today
                        .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
                        .and_local_timezone(tz)
                        .single()
                };
                match (at(FALLBACK_OPEN), at(FALLBACK_CLOSE)) {
                    (Some(start), Some(end)) => Some((start, end)),
                    _ => None,
                }
            }
        };

        *self.hours.write().await = Some(HoursCache { date: today, window });
    }

    async fn place_order(&self, hash: &str, body: Value) -> Result<Order> {
        let url = format!("{}/accounts/{}/orders", TRADER_BASE, hash);

        let response = self
            .http
            .post(&url)
            .headers(self.default_headers().await?)
            .json(&body)
            .send()
            .await?;

        if let Some(err) = Self::check_auth_error(&response) {
            return Err(err);
        }

        let status = response.status();
        if status.is_success() {
            // Schwab confirms with 201 and the order URL in Location
            let order_id = response
                .headers()
                .get("Location")
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| loc.rsplit('/').next())
                .map(str::to_string);
            Ok(Order {
                is_success: true,
                order_id,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("Order rejected: HTTP {} - {}", status, body);
            Ok(Order::failed())
        }
    }

    fn limit_order_body(symbol: &str, quantity: i64, price: f64, instruction: &str) -> Value {
        serde_json::json!({
            "orderType": "LIMIT",
            "session": "SEAMLESS",
            "duration": "DAY",
            "orderStrategyType": "SINGLE",
            "price": format!("{:.2}", price),
            "orderLegCollection": [{
                "instruction": instruction,
                "quantity": quantity,
                "instrument": {"symbol": symbol, "assetType": "EQUITY"}
            }]
        })
    }

    fn market_order_body(symbol: &str, quantity: i64, instruction: &str) -> Value {
        serde_json::json!({
            "orderType": "MARKET",
            "session": "NORMAL",
            "duration": "DAY",
            "orderStrategyType": "SINGLE",
            "orderLegCollection": [{
                "instruction": instruction,
                "quantity": quantity,
                "instrument": {"symbol": symbol, "assetType": "EQUITY"}
            }]
        })
    }
}

#[async_trait]
impl Broker for SchwabBroker {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn market(&self) -> Market {
        Market::Us
    }

    #[instrument(skip(self))]
    async fn get_hashs(&self) -> Result<HashMap<String, String>> {
        let url = format!("{}/accounts/accountNumbers", TRADER_BASE);
        let body = self.get_json(&url).await?;

        let list = body
            .as_array()
            .ok_or_else(|| Error::InvalidData("accountNumbers is not a list".to_string()))?;

        let mut accounts = HashMap::new();
        for entry in list {
            let number = entry["accountNumber"].as_str();
            let hash = entry["hashValue"].as_str();
            if let (Some(number), Some(hash)) = (number, hash) {
                accounts.insert(number.to_string(), hash.to_string());
            }
        }
        debug!("Fetched {} account hashes", accounts.len());
        Ok(accounts)
    }

    async fn market_open(&self) -> bool {
        let now = self.clock.now_in(Market::Us.timezone());

        // Weekend: never open, skip the API round-trip
        if now.weekday().num_days_from_monday() >= 5 {
            debug!("Market is closed (weekend)");
            return false;
        }

        let today = now.date_naive();
        let stale = match self.hours.read().await.as_ref() {
            Some(cache) => cache.date != today,
            None => true,
        };
        if stale {
            self.refresh_hours(today).await;
        }

        match self.hours.read().await.as_ref().and_then(|c| c.window) {
            Some((start, end)) => start <= now && now < end,
            None => false,
        }
    }

    #[instrument(skip(self, hash))]
    async fn get_positions(&self, hash: &str) -> Result<Positions> {
        let body = self.get_account(hash, true).await?;

        let mut positions = Positions::new();
        if let Some(list) = body["securitiesAccount"]["positions"].as_array() {
            for position in list {
                if let Some(symbol) = position["instrument"]["symbol"].as_str() {
                    let quantity = position["longQuantity"].as_f64().unwrap_or(0.0);
                    positions.insert(symbol.to_string(), quantity);
                }
            }
        }
        Ok(positions)
    }

    #[instrument(skip(self, hash))]
    async fn get_positions_result(&self, hash: &str) -> Result<DetailedPositions> {
        let body = self.get_account(hash, true).await?;

        let mut positions = DetailedPositions::new();
        if let Some(list) = body["securitiesAccount"]["positions"].as_array() {
            for position in list {
                let symbol = match position["instrument"]["symbol"].as_str() {
                    Some(s) => s.to_string(),
                    None => continue,
                };
                let quantity = position["longQuantity"].as_f64().unwrap_or(0.0);
                let average_price = position["averagePrice"].as_f64().unwrap_or(0.0);
                let market_value = position["marketValue"].as_f64().unwrap_or(0.0);
                let last_price = if quantity != 0.0 {
                    market_value / quantity
                } else {
                    0.0
                };

                positions.insert(
                    symbol,
                    PositionDetail {
                        quantity,
                        average_price,
                        last_price,
                    },
                );
            }
        }
        Ok(positions)
    }

    #[instrument(skip(self, hash))]
    async fn get_cash(&self, hash: &str) -> Result<f64> {
        let body = self.get_account(hash, false).await?;
        body["securitiesAccount"]["currentBalances"]["cashAvailableForTrading"]
            .as_f64()
            .ok_or_else(|| Error::InvalidData("no cashAvailableForTrading in account".to_string()))
    }

    #[instrument(skip(self, hash))]
    async fn get_account_result(&self, hash: &str) -> Result<(f64, f64)> {
        let body = self.get_account(hash, false).await?;
        let balances = &body["securitiesAccount"]["currentBalances"];
        let cash = balances["cashAvailableForTrading"]
            .as_f64()
            .ok_or_else(|| Error::InvalidData("no cashAvailableForTrading in account".to_string()))?;
        let total = balances["liquidationValue"]
            .as_f64()
            .ok_or_else(|| Error::InvalidData("no liquidationValue in account".to_string()))?;
        Ok((cash, total))
    }

    #[instrument(skip(self))]
    async fn get_last_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/quotes?symbols={}", MARKET_DATA_BASE, symbol);
        let body = self.get_json(&url).await?;

        body[symbol]["quote"]["lastPrice"]
            .as_f64()
            .ok_or_else(|| Error::InvalidData(format!("no quote for {}", symbol)))
    }

    #[instrument(skip(self, hash))]
    async fn place_limit_buy(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        debug!("Placing limit buy: {} x{} @ ${:.2}", symbol, quantity, price);
        self.place_order(hash, Self::limit_order_body(symbol, quantity, price, "BUY"))
            .await
    }

    #[instrument(skip(self, hash))]
    async fn place_limit_sell(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        debug!("Placing limit sell: {} x{} @ ${:.2}", symbol, quantity, price);
        self.place_order(hash, Self::limit_order_body(symbol, quantity, price, "SELL"))
            .await
    }

    #[instrument(skip(self, hash))]
    async fn place_market_sell(&self, hash: &str, symbol: &str, quantity: i64) -> Result<Order> {
        debug!("Placing market sell: {} x{}", symbol, quantity);
        self.place_order(hash, Self::market_order_body(symbol, quantity, "SELL"))
            .await
    }

    async fn sell_sweep_etfs_for_cash(
        &self,
        hash: &str,
        shortfall: f64,
        positions: &Positions,
    ) -> Result<Option<Order>> {
        for etf in SWEEP_ETFS {
            let held = positions.get(etf).copied().unwrap_or(0.0);
            if held <= 0.0 {
                continue;
            }

            let last_price = self.get_last_price(etf).await?;
            if last_price <= 0.0 {
                continue;
            }

            let wanted = (shortfall / last_price).ceil() as i64;
            let quantity = wanted.min(held.floor() as i64);
            if quantity > 0 {
                debug!(
                    "Liquidating {} x{} to cover ${:.2} shortfall",
                    etf, quantity, shortfall
                );
                return self.place_market_sell(hash, etf, quantity).await.map(Some);
            }
        }
        Ok(None)
    }
}

/// Creates one `SchwabBroker` per user; token files live under
/// `token_dir/schwab_token_{user_id}.json`
pub struct SchwabBrokerFactory {
    token_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl SchwabBrokerFactory {
    pub fn new(token_dir: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Self {
        Self {
            token_dir: token_dir.as_ref().to_path_buf(),
            clock,
        }
    }
}

impl BrokerFactory for SchwabBrokerFactory {
    fn create(&self, user_id: &str) -> Result<Arc<dyn Broker>> {
        let token_path = self.token_dir.join(format!("schwab_token_{}.json", user_id));
        let broker = SchwabBroker::new(user_id, token_path, self.clock.clone())?;
        Ok(Arc::new(broker))
    }
}
