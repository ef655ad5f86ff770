//! gaitwatch entry point.
//!
//! Reads newline-delimited JSON inputs (device events and operator
//! commands) from stdin, feeds them through a session driver and logs a
//! status line periodically. An optional first argument names a config
//! file; otherwise the platform config path is used.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use gaitwatch_session::{DeviceSession, SessionConfig, SessionDriver, SessionInput};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting gaitwatch");

    let config = load_config()?;
    let session = DeviceSession::new(config)?;

    // Stand-in for the chart: counts live deliveries.
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    let subscription = session.subscribe(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    let driver = SessionDriver::spawn(session);
    let tx = driver.sender();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    let mut line_no: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!(lines = line_no, "end of input");
                    break;
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SessionInput>(&line) {
                    Ok(input) => {
                        if tx.send(input).await.is_err() {
                            tracing::warn!("session driver stopped early");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(line = line_no, error = %e, "skipping unparseable line");
                    }
                }
            }
            _ = status.tick() => log_status(&driver.session(), &delivered).await,
        }
    }

    // Everything read so far is applied before the final status line.
    drop(tx);
    let session = driver.finish().await;
    log_status(&session, &delivered).await;
    subscription.unsubscribe();
    Ok(())
}

fn load_config() -> anyhow::Result<SessionConfig> {
    if let Some(path) = std::env::args().nth(1) {
        let config = SessionConfig::load(Path::new(&path))
            .with_context(|| format!("loading config from {path}"))?;
        tracing::info!(path = %path, "configuration loaded");
        return Ok(config);
    }

    match SessionConfig::load_or_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            Ok(SessionConfig::default())
        }
    }
}

async fn log_status(session: &Mutex<DeviceSession>, delivered: &AtomicU64) {
    let session = session.lock().await;

    let devices = session
        .status_map()
        .iter()
        .map(|(id, status)| format!("{id}={status}"))
        .collect::<Vec<_>>()
        .join(" ");
    let stats = session.memory_stats();
    let counters = session.counters();

    tracing::info!(
        devices = %devices,
        rate = %session.combined_rate(),
        samples = stats.total_samples,
        memory_bytes = stats.total_memory_bytes,
        budget_bytes = stats.max_memory_bytes,
        accepted = counters.accepted,
        duplicates = counters.duplicates,
        gated = counters.gated,
        invalid = counters.invalid,
        delivered = delivered.load(Ordering::Relaxed),
        "status"
    );
}
