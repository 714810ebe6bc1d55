//! JSONL shadow log of broker calls
//!
//! Every call through a `RecordingBroker` is mirrored as one JSON line
//! `{ts, method, args, result, error}` through a bounded channel to a
//! background writer. Recording never blocks trading: when the channel
//! is full the entry is dropped and an error is logged.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use autotrader_core::{DetailedPositions, Market, Order, Positions, Result};

use crate::broker::{Broker, BrokerFactory};

/// Bounded queue depth; beyond this, entries are dropped
const QUEUE_CAPACITY: usize = 10_000;

/// One recorded broker call
#[derive(Debug, Serialize)]
struct Entry {
    ts: f64,
    method: String,
    args: Value,
    result: Value,
    error: Option<String>,
}

/// Handle to the background JSONL writer
pub struct JsonlRecorder {
    tx: mpsc::Sender<Entry>,
}

impl JsonlRecorder {
    /// Start the writer task appending to `path`. The task ends when
    /// every recorder handle has been dropped; await the returned
    /// handle to be sure the queue drained.
    pub fn spawn(path: PathBuf) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let task = tokio::spawn(write_loop(rx, path));
        (Self { tx }, task)
    }

    /// Enqueue one entry, stamped at call time
    fn record(&self, method: &str, args: Value, result: Value, error: Option<String>) {
        let entry = Entry {
            ts: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            method: method.to_string(),
            args,
            result,
            error,
        };
        if self.tx.try_send(entry).is_err() {
            error!("Recorder queue full! Dropping log entry.");
        }
    }
}

async fn write_loop(mut rx: mpsc::Receiver<Entry>, path: PathBuf) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            error!("FATAL: cannot create record directory, logging stopped: {}", e);
            return;
        }
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            error!("FATAL: cannot open record file, logging stopped: {}", e);
            return;
        }
    };

    // Session metadata on first use of the file
    let fresh = file.metadata().await.map(|m| m.len() == 0).unwrap_or(false);
    if fresh {
        let meta = json!({
            "meta": {
                "created_at": chrono::Utc::now().to_rfc3339(),
                "type": "session_start",
            }
        });
        if let Err(e) = file.write_all(format!("{}\n", meta).as_bytes()).await {
            warn!("Record file write error: {}", e);
        }
    }

    while let Some(entry) = rx.recv().await {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("Unserializable record entry: {}", e);
                continue;
            }
        };
        if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
            warn!("Record file write error: {}", e);
            continue;
        }
        if let Err(e) = file.flush().await {
            warn!("Record file flush error: {}", e);
        }
    }
}

/// Decorator that shadows every broker call into the recorder before
/// passing the outcome through unchanged
pub struct RecordingBroker {
    inner: Arc<dyn Broker>,
    recorder: Arc<JsonlRecorder>,
}

impl RecordingBroker {
    pub fn new(inner: Arc<dyn Broker>, recorder: Arc<JsonlRecorder>) -> Self {
        Self { inner, recorder }
    }

    fn log<T: Serialize>(&self, method: &str, args: Value, result: &Result<T>) {
        let (value, error) = match result {
            Ok(v) => (serde_json::to_value(v).unwrap_or(Value::Null), None),
            Err(e) => (Value::Null, Some(e.to_string())),
        };
        self.recorder.record(method, args, value, error);
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn user_id(&self) -> &str {
        self.inner.user_id()
    }

    fn market(&self) -> Market {
        self.inner.market()
    }

    async fn get_hashs(&self) -> Result<HashMap<String, String>> {
        let result = self.inner.get_hashs().await;
        self.log("get_hashs", json!([]), &result);
        result
    }

    async fn market_open(&self) -> bool {
        let open = self.inner.market_open().await;
        self.recorder.record("market_open", json!([]), json!(open), None);
        open
    }

    async fn get_positions(&self, hash: &str) -> Result<Positions> {
        let result = self.inner.get_positions(hash).await;
        self.log("get_positions", json!([hash]), &result);
        result
    }

    async fn get_positions_result(&self, hash: &str) -> Result<DetailedPositions> {
        let result = self.inner.get_positions_result(hash).await;
        self.log("get_positions_result", json!([hash]), &result);
        result
    }

    async fn get_cash(&self, hash: &str) -> Result<f64> {
        let result = self.inner.get_cash(hash).await;
        self.log("get_cash", json!([hash]), &result);
        result
    }

    async fn get_account_result(&self, hash: &str) -> Result<(f64, f64)> {
        let result = self.inner.get_account_result(hash).await;
        self.log("get_account_result", json!([hash]), &result);
        result
    }

    async fn get_last_price(&self, symbol: &str) -> Result<f64> {
        let result = self.inner.get_last_price(symbol).await;
        self.log("get_last_price", json!([symbol]), &result);
        result
    }

    async fn place_limit_buy(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        let result = self.inner.place_limit_buy(hash, symbol, quantity, price).await;
        self.log("place_limit_buy", json!([hash, symbol, quantity, price]), &result);
        result
    }

    async fn place_limit_sell(
        &self,
        hash: &str,
        symbol: &str,
        quantity: i64,
        price: f64,
    ) -> Result<Order> {
        let result = self.inner.place_limit_sell(hash, symbol, quantity, price).await;
        self.log("place_limit_sell", json!([hash, symbol, quantity, price]), &result);
        result
    }

    async fn place_market_sell(&self, hash: &str, symbol: &str, quantity: i64) -> Result<Order> {
        let result = self.inner.place_market_sell(hash, symbol, quantity).await;
        self.log("place_market_sell", json!([hash, symbol, quantity]), &result);
        result
    }

    async fn sell_sweep_etfs_for_cash(
        &self,
        hash: &str,
        shortfall: f64,
        positions: &Positions,
    ) -> Result<Option<Order>> {
        let result = self
            .inner
            .sell_sweep_etfs_for_cash(hash, shortfall, positions)
            .await;
        self.log("sell_sweep_etfs_for_cash", json!([hash, shortfall]), &result);
        result
    }
}

/// Factory wrapper that records every broker it hands out
pub struct RecordingBrokerFactory {
    inner: Arc<dyn BrokerFactory>,
    recorder: Arc<JsonlRecorder>,
}

impl RecordingBrokerFactory {
    pub fn new(inner: Arc<dyn BrokerFactory>, recorder: Arc<JsonlRecorder>) -> Self {
        Self { inner, recorder }
    }
}

impl BrokerFactory for RecordingBrokerFactory {
    fn create(&self, user_id: &str) -> Result<Arc<dyn Broker>> {
        let broker = self.inner.create(user_id)?;
        Ok(Arc::new(RecordingBroker::new(broker, self.recorder.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_call_shape() {
        let entry = Entry {
            ts: 1700000000.25,
            method: "place_limit_buy".to_string(),
            args: json!(["hash123", "AAPL", 3, 150.0]),
            result: serde_json::to_value(Order::success("ORD-1")).unwrap(),
            error: None,
        };

        let line = serde_json::to_string(&entry).unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["method"], "place_limit_buy");
        assert_eq!(parsed["args"][1], "AAPL");
        assert_eq!(parsed["result"]["is_success"], true);
        assert!(parsed["error"].is_null());
    }

    #[tokio::test]
    async fn test_writer_appends_entries_and_meta() {
        let path = std::env::temp_dir().join(format!(
            "autotrader_recorder_test_{}.jsonl",
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&path).await;

        let (recorder, task) = JsonlRecorder::spawn(path.clone());
        recorder.record("get_cash", json!(["h1"]), json!(1234.5), None);
        recorder.record("get_last_price", json!(["TSLA"]), Value::Null, Some("timeout".into()));
        drop(recorder);
        task.await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let meta: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(meta["meta"]["type"], "session_start");

        let second: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(second["error"], "timeout");

        let _ = tokio::fs::remove_file(&path).await;
    }
}
