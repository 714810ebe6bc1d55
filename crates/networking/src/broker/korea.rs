//! Korea Investment broker adapter (KR market)
//!
//! Appkey/appsecret REST client against the KIS open API. KR accounts
//! are addressed by account number directly; the "hash" required by
//! the broker interface is the account number itself.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
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

use super::{Broker, BrokerFactory, REQUEST_TIMEOUT_SECS};

const KR_BASE: &str = "https://openapi.koreainvestment.com:9443";

/// KIS rate-limits aggressively; pace every call
const PACE_DELAY_MS: u64 = 200;

/// Pagination guard for the continuation loop on balance inquiries
const MAX_BALANCE_PAGES: u32 = 10;

/// Regular session bounds in KST
const SESSION_OPEN: (u32, u32) = (9, 0);
const SESSION_CLOSE: (u32, u32) = (15, 30);

/// Per-user credentials for the KIS API
#[derive(Debug, Clone, serde::Deserialize)]
pub struct KoreaAuthConfig {
    pub app_key: String,
    pub app_secret: String,
    pub product_code: String,
    /// Account numbers owned by this user; KR has no separate hash
    pub account_numbers: Vec<String>,
}

/// Broker adapter for one Korea Investment user
pub struct KoreaBroker {
    user_id: String,
    http: Client,
    config: KoreaAuthConfig,
    token_path: PathBuf,
    token: RwLock<Option<String>>,
    /// Holiday-calendar answer, cached per date
    today_open: RwLock<Option<(NaiveDate, bool)>>,
    clock: Arc<dyn Clock>,
}

impl KoreaBroker {
    pub fn new(
        user_id: &str,
        config: KoreaAuthConfig,
        token_path: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::NetworkError(e.to_string()))?;

        Ok(Self {
            user_id: user_id.to_string(),
            http,
            config,
            token_path,
            token: RwLock::new(None),
            today_open: RwLock::new(None),
            clock,
        })
    }

    async fn pace(&self) {
        tokio::time::sleep(Duration::from_millis(PACE_DELAY_MS)).await;
    }

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
        let token = parsed["authorization"]
            .as_str()
            .ok_or_else(|| {
                Error::AuthenticationError(format!(
                    "no authorization in {}",
                    self.token_path.display()
                ))
            })?
            .to_string();

        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn base_headers(&self, tr_id: &str, include_custtype: bool) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.token().await?))
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );
        headers.insert(
            "appkey",
            HeaderValue::from_str(&self.config.app_key)
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );
        headers.insert(
            "appsecret",
            HeaderValue::from_str(&self.config.app_secret)
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );
        headers.insert(
            "tr_id",
            HeaderValue::from_str(tr_id).map_err(|e| Error::InvalidData(e.to_string()))?,
        );
        if include_custtype {
            headers.insert("custtype", HeaderValue::from_static("P"));
        }
        Ok(headers)
    }

    /// Check `rt_cd` and return the response body, or a typed error
    /// carrying the KIS message code
    fn check_body(body: Value) -> Result<Value> {
        if body["rt_cd"].as_str() == Some("0") {
            Ok(body)
        } else {
            let code = body["msg_cd"].as_str().unwrap_or("?");
            let msg = body["msg1"].as_str().unwrap_or("").trim().to_string();
            Err(Error::ApiError(format!("KIS {}: {}", code, msg)))
        }
    }

    /// One page of the balance inquiry; returns (output1 rows, next
    /// continuation keys)
    async fn balance_page(
        &self,
        account: &str,
        fk_key: &str,
        nk_key: &str,
        tr_cont: &str,
    ) -> Result<(Vec<Value>, String, String, bool)> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/trading/inquire-balance", KR_BASE);
        let mut headers = self.base_headers("TTTC8434R", true).await?;
        headers.insert(
            "tr_cont",
            HeaderValue::from_str(tr_cont).map_err(|e| Error::InvalidData(e.to_string()))?,
        );

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&[
                ("CANO", account),
                ("ACNT_PRDT_CD", self.config.product_code.as_str()),
                ("AFHR_FLPR_YN", "N"),
                ("OFL_YN", ""),
                ("INQR_DVSN", "01"),
                ("UNPR_DVSN", "01"),
                ("FUND_STTL_ICLD_YN", "N"),
                ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                ("PRCS_DVSN", "00"),
                ("CTX_AREA_FK100", fk_key),
                ("CTX_AREA_NK100", nk_key),
            ])
            .send()
            .await?;

        let has_more = matches!(
            response.headers().get("tr_cont").and_then(|v| v.to_str().ok()),
            Some("M") | Some("F")
        );

        let body = Self::check_body(response.json::<Value>().await?)?;
        let next_nk = body["ctx_area_nk100"].as_str().unwrap_or("").trim().to_string();
        let next_fk = body["ctx_area_fk100"].as_str().unwrap_or("").trim().to_string();
        let rows = body["output1"].as_array().cloned().unwrap_or_default();

        Ok((rows, next_fk, next_nk, has_more))
    }

    /// Walk all pages of the balance inquiry
    async fn balance_rows(&self, account: &str) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        let (mut fk_key, mut nk_key, mut prev_nk) = (String::new(), String::new(), String::new());
        let mut tr_cont = String::new();

        for _ in 0..MAX_BALANCE_PAGES {
            let (page, next_fk, next_nk, has_more) =
                self.balance_page(account, &fk_key, &nk_key, &tr_cont).await?;
            rows.extend(page);

            if !has_more || next_nk.is_empty() || next_nk == prev_nk {
                break;
            }
            prev_nk = nk_key;
            fk_key = next_fk;
            nk_key = next_nk;
            tr_cont = "N".to_string();
        }
        Ok(rows)
    }

    /// Holiday calendar: does the exchange open today?
    async fn today_open_check(&self, date: NaiveDate) -> Result<bool> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/quotations/chk-holiday", KR_BASE);
        let formatted = date.format("%Y%m%d").to_string();
        let headers = self.base_headers("CTCA0903R", false).await?;

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&[
                ("BASS_DT", formatted.as_str()),
                ("CTX_AREA_NK", ""),
                ("CTX_AREA_FK", ""),
            ])
            .send()
            .await?;

        let body = Self::check_body(response.json::<Value>().await?)?;
        let open = body["output"]
            .as_array()
            .and_then(|days| {
                days.iter()
                    .find(|d| d["bass_dt"].as_str() == Some(formatted.as_str()))
            })
            .map(|d| d["opnd_yn"].as_str() == Some("Y"))
            // Date missing from the calendar response: assume open
            .unwrap_or(true);
        Ok(open)
    }

    /// Order bodies must be signed with a hashkey from the API
    async fn hashkey(&self, data: &Value) -> Result<String> {
        let url = format!("{}/uapi/hashkey", KR_BASE);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "appkey",
            HeaderValue::from_str(&self.config.app_key)
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );
        headers.insert(
            "appsecret",
            HeaderValue::from_str(&self.config.app_secret)
                .map_err(|e| Error::AuthenticationError(e.to_string()))?,
        );

        let response = self.http.post(&url).headers(headers).json(data).send().await?;
        let body: Value = response.json().await?;
        body["HASH"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::ApiError("hashkey endpoint returned no HASH".to_string()))
    }

    fn order_data(&self, account: &str, symbol: &str, quantity: i64, price: f64, dvsn: &str) -> Value {
        serde_json::json!({
            "CANO": account,
            "ACNT_PRDT_CD": self.config.product_code,
            "PDNO": symbol,
            "ORD_DVSN": dvsn,
            "ORD_QTY": quantity.to_string(),
            "ORD_UNPR": format!("{:.0}", price),
        })
    }

    async fn place_order(&self, tr_id: &str, data: Value) -> Result<Order> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/trading/order-cash", KR_BASE);
        let mut headers = self.base_headers(tr_id, true).await?;
        headers.insert(
            "hashkey",
            HeaderValue::from_str(&self.hashkey(&data).await?)
                .map_err(|e| Error::InvalidData(e.to_string()))?,
        );

        let response = self.http.post(&url).headers(headers).json(&data).send().await?;
        let body: Value = response.json().await?;

        if body["rt_cd"].as_str() == Some("0") {
            let order_id = body["output"]["ODNO"].as_str().map(str::to_string);
            Ok(Order {
                is_success: true,
                order_id,
            })
        } else {
            let code = body["msg_cd"].as_str().unwrap_or("?");
            let msg = body["msg1"].as_str().unwrap_or("").trim();
            error!("Order rejected: KIS {} - {}", code, msg);
            Ok(Order::failed())
        }
    }

    fn parse_f64(value: &Value) -> f64 {
        match value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

#[async_trait]
impl Broker for KoreaBroker {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn market(&self) -> Market {
        Market::Kr
    }

    async fn get_hashs(&self) -> Result<HashMap<String, String>> {
        // The account number doubles as the hash for KR accounts
        Ok(self
            .config
            .account_numbers
            .iter()
            .map(|n| (n.clone(), n.clone()))
            .collect())
    }

    async fn market_open(&self) -> bool {
        let now = self.clock.now_in(Market::Kr.timezone());

        if now.weekday().num_days_from_monday() >= 5 {
            debug!("Market is closed (weekend)");
            return false;
        }

        let time = now.time();
        let open = NaiveTime::from_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0).unwrap();
        let close = NaiveTime::from_hms_opt(SESSION_CLOSE.0, SESSION_CLOSE.1, 0).unwrap();
        if time < open || time >= close {
            debug!("Market is closed (outside 09:00-15:30 KST)");
            return false;
        }

        // Weekday session time still needs holiday confirmation
        let today = now.date_naive();
        if let Some((date, open)) = *self.today_open.read().await {
            if date == today {
                return open;
            }
        }

        match self.today_open_check(today).await {
            Ok(open) => {
                *self.today_open.write().await = Some((today, open));
                open
            }
            Err(e) => {
                warn!("Holiday check failed, treating market as closed: {}", e);
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_positions(&self, hash: &str) -> Result<Positions> {
        let rows = self.balance_rows(hash).await?;

        let mut positions = Positions::new();
        for stock in rows {
            let quantity = Self::parse_f64(&stock["hldg_qty"]);
            if quantity > 0.0 {
                if let Some(code) = stock["pdno"].as_str() {
                    positions.insert(code.to_string(), quantity);
                }
            }
        }
        Ok(positions)
    }

    #[instrument(skip(self))]
    async fn get_positions_result(&self, hash: &str) -> Result<DetailedPositions> {
        let rows = self.balance_rows(hash).await?;

        let mut positions = DetailedPositions::new();
        for stock in rows {
            let quantity = Self::parse_f64(&stock["hldg_qty"]);
            if quantity <= 0.0 {
                continue;
            }
            let code = match stock["pdno"].as_str() {
                Some(c) => c.to_string(),
                None => continue,
            };
            positions.insert(
                code,
                PositionDetail {
                    quantity,
                    average_price: Self::parse_f64(&stock["pchs_avg_pric"]),
                    last_price: Self::parse_f64(&stock["prpr"]),
                },
            );
        }
        Ok(positions)
    }

    #[instrument(skip(self))]
    async fn get_cash(&self, hash: &str) -> Result<f64> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/trading/inquire-psbl-order", KR_BASE);
        let headers = self.base_headers("TTTC8908R", true).await?;

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&[
                ("CANO", hash),
                ("ACNT_PRDT_CD", self.config.product_code.as_str()),
                ("PDNO", ""),
                ("ORD_UNPR", ""),
                ("ORD_DVSN", "01"),
                ("CMA_EVLU_AMT_ICLD_YN", "N"),
                ("OVRS_ICLD_YN", "N"),
            ])
            .send()
            .await?;

        let body = Self::check_body(response.json::<Value>().await?)?;
        Ok(Self::parse_f64(&body["output"]["nrcvb_buy_amt"]))
    }

    #[instrument(skip(self))]
    async fn get_account_result(&self, hash: &str) -> Result<(f64, f64)> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/trading/inquire-balance", KR_BASE);
        let headers = self.base_headers("TTTC8434R", true).await?;

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&[
                ("CANO", hash),
                ("ACNT_PRDT_CD", self.config.product_code.as_str()),
                ("AFHR_FLPR_YN", "N"),
                ("OFL_YN", ""),
                ("INQR_DVSN", "02"),
                ("UNPR_DVSN", "01"),
                ("FUND_STTL_ICLD_YN", "N"),
                ("FNCG_AMT_AUTO_RDPT_YN", "N"),
                ("PRCS_DVSN", "01"),
                ("CTX_AREA_FK100", ""),
                ("CTX_AREA_NK100", ""),
            ])
            .send()
            .await?;

        let body = Self::check_body(response.json::<Value>().await?)?;
        let total = body["output2"]
            .as_array()
            .and_then(|rows| rows.first())
            .map(|row| Self::parse_f64(&row["tot_evlu_amt"]))
            .ok_or_else(|| Error::InvalidData("no output2 in balance response".to_string()))?;

        let cash = self.get_cash(hash).await?;
        Ok((cash, total))
    }

    #[instrument(skip(self))]
    async fn get_last_price(&self, symbol: &str) -> Result<f64> {
        self.pace().await;

        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-price", KR_BASE);
        let headers = self.base_headers("FHKST01010100", false).await?;

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .query(&[("FID_COND_MRKT_DIV_CODE", "J"), ("FID_INPUT_ISCD", symbol)])
            .send()
            .await?;

        let body = Self::check_body(response.json::<Value>().await?)?;
        let price = Self::parse_f64(&body["output"]["stck_prpr"]);
        if price <= 0.0 {
            return Err(Error::InvalidData(format!("no quote for {}", symbol)));
        }
        Ok(price)
    }

    #[instrument(skip(self))]
    async fn place_limit_buy(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        debug!("Placing limit buy: {} x{} @ {:.0} KRW", symbol, quantity, price);
        let data = self.order_data(hash, symbol, quantity, price, "00");
        self.place_order("TTTC0012U", data).await
    }

    #[instrument(skip(self))]
    async fn place_limit_sell(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        debug!("Placing limit sell: {} x{} @ {:.0} KRW", symbol, quantity, price);
        let data = self.order_data(hash, symbol, quantity, price, "00");
        self.place_order("TTTC0011U", data).await
    }

    #[instrument(skip(self))]
    async fn place_market_sell(&self, hash: &str, symbol: &str, quantity: i64) -> Result<Order> {
        debug!("Placing market sell: {} x{}", symbol, quantity);
        let data = self.order_data(hash, symbol, quantity, 0.0, "01");
        self.place_order("TTTC0011U", data).await
    }

    async fn sell_sweep_etfs_for_cash(
        &self,
        _hash: &str,
        _shortfall: f64,
        _positions: &Positions,
    ) -> Result<Option<Order>> {
        // KR accounts hold no US sweep ETFs
        Ok(None)
    }
}

/// Creates one `KoreaBroker` per user from preloaded credentials;
/// token files live under `token_dir/kr_token_{user_id}.json`
pub struct KoreaBrokerFactory {
    configs: HashMap<String, KoreaAuthConfig>,
    token_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl KoreaBrokerFactory {
    pub fn new(
        configs: HashMap<String, KoreaAuthConfig>,
        token_dir: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            configs,
            token_dir: token_dir.as_ref().to_path_buf(),
            clock,
        }
    }
}

impl BrokerFactory for KoreaBrokerFactory {
    fn create(&self, user_id: &str) -> Result<Arc<dyn Broker>> {
        let config = self
            .configs
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::ConfigError(format!("no KR credentials for user {}", user_id)))?;
        let token_path = self.token_dir.join(format!("kr_token_{}.json", user_id));
        let broker = KoreaBroker::new(user_id, config, token_path, self.clock.clone())?;
        Ok(Arc::new(broker))
    }
}
