//! `autotrader` - rule-driven daily trading session
//!
//! One invocation runs one market for one trading day and exits 0 on
//! a clean close, 1 on any fatal condition.

mod config;

use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use autotrader_core::{Clock, Market, SystemClock};
use autotrader_engine::{LogAlerter, SessionConfig, SessionRunner};
use autotrader_networking::{
    BrokerFactory, JsonlRecorder, KoreaAuthConfig, KoreaBrokerFactory, SchwabBrokerFactory,
};
use autotrader_networking::recorder::RecordingBrokerFactory;
use autotrader_persistence::Database;

use crate::config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "autotrader", about = "Rule-driven equity trading daemon")]
struct Args {
    /// Market to trade this session (us or kr)
    #[arg(long, default_value = "us", value_parser = parse_market)]
    market: Market,

    /// Disable the JSONL shadow log of broker calls
    #[arg(long)]
    no_record: bool,
}

fn parse_market(s: &str) -> Result<Market, String> {
    s.parse().map_err(|e: autotrader_core::Error| e.to_string())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("Session failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = CliConfig::from_env(args.market)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!("Connecting to rule store");
    let store = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("rule store unreachable")?,
    );

    let factory = broker_factory(args.market, &config, clock.clone())?;
    let (factory, recorder_task) = if args.no_record {
        info!("Broker call recording disabled");
        (factory, None)
    } else {
        let date = clock.now_in(args.market.timezone()).format("%Y%m%d");
        let path = config
            .record_dir
            .join(format!("{}_{}.jsonl", args.market, date));
        info!("Recording broker calls to {}", path.display());
        let (recorder, task) = JsonlRecorder::spawn(path);
        let recording: Arc<dyn BrokerFactory> =
            Arc::new(RecordingBrokerFactory::new(factory, Arc::new(recorder)));
        (recording, Some(task))
    };

    let mut session_config = SessionConfig::new(args.market);
    session_config.hard_fail_on_guard_block = config.hard_fail_on_guard_block;

    let mut runner = SessionRunner::new(
        session_config,
        store,
        factory,
        Arc::new(LogAlerter),
        clock,
    );

    spawn_signal_listener(runner.shutdown_handle());

    let outcome = runner.run().await;

    // Let the recorder drain its queue before exiting
    drop(runner);
    if let Some(task) = recorder_task {
        let _ = task.await;
    }

    outcome.map_err(anyhow::Error::from)?;
    Ok(())
}

fn broker_factory(
    market: Market,
    config: &CliConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn BrokerFactory>> {
    match market {
        Market::Us => Ok(Arc::new(SchwabBrokerFactory::new(&config.token_dir, clock))),
        Market::Kr => {
            let raw = std::fs::read_to_string(&config.kr_credentials_path).with_context(|| {
                format!(
                    "cannot read KR credentials file {}",
                    config.kr_credentials_path.display()
                )
            })?;
            let credentials: HashMap<String, KoreaAuthConfig> =
                serde_json::from_str(&raw).context("invalid KR credentials file")?;
            Ok(Arc::new(KoreaBrokerFactory::new(
                credentials,
                &config.token_dir,
                clock,
            )))
        }
    }
}

fn spawn_signal_listener(shutdown: Arc<std::sync::atomic::AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("Cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.store(true, Ordering::Relaxed);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Signal received; will stop at the next pass boundary");
        shutdown.store(true, Ordering::Relaxed);
    });
}
