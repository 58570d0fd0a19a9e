//! Live strategy runner: per-security advice consumption over a shared
//! execution dispatcher, with cooperative shutdown.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use helm_advisor::AdvisorService;
use helm_broker::{Broker, CandleSource};
use helm_config::AppConfig;
use helm_core::{Candle, SecurityCode};
use helm_execution::{AmountPolicy, ExecutionEngine, ExecutionHandle, ExecutionSettings};

use crate::report::format_table;

/// Cooperative shutdown shared by every consumption loop.
#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    /// Fresh signal wired to Ctrl-C.
    pub fn new() -> Self {
        let signal = Self::manual();
        let clone = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                clone.trigger();
            }
        });
        signal
    }

    /// Signal without the Ctrl-C hook, for tests and embedding.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Complete once the signal fires (immediately if it already has).
    pub async fn wait(&self) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.triggered() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

const POSITION_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// One security's advice stream, however it was produced.
pub type AdviceFeed = (SecurityCode, tokio::sync::mpsc::Receiver<helm_core::Advice>);

/// Run the strategy with an in-process advisor: subscribe to candles per
/// security, warm each pipeline on stored history, and consume the
/// resulting advice streams.
pub async fn run_live(
    config: &AppConfig,
    advisor: Arc<AdvisorService>,
    candle_source: Arc<dyn CandleSource>,
    warmups: HashMap<SecurityCode, Vec<Candle>>,
    broker: Arc<dyn Broker>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let securities = advisor.securities();
    let mut feeds = Vec::with_capacity(securities.len());
    for security in securities {
        let candles = candle_source
            .stream(&security)
            .await
            .with_context(|| format!("failed to subscribe to candles for {security}"))?;
        let warmup = warmups.get(&security).cloned().unwrap_or_default();
        let advices = advisor
            .advices(&security, &warmup, candles)
            .with_context(|| format!("failed to build advisor for {security}"))?;
        feeds.push((security, advices));
    }
    run_with_feeds(config, feeds, broker, shutdown).await
}

/// Run the strategy over pre-assembled advice feeds (local pipeline or the
/// long-poll transport of a split deployment) until every feed ends or the
/// shutdown signal fires.
///
/// One task per security pulls advice in producer order and forwards it to
/// the execution dispatcher; a background task summarizes position books
/// periodically. Consumption loops end silently on shutdown and log any
/// other termination cause before exiting their own loop only.
pub async fn run_with_feeds(
    config: &AppConfig,
    feeds: Vec<AdviceFeed>,
    broker: Arc<dyn Broker>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    if feeds.is_empty() {
        return Err(anyhow!("no strategies configured"));
    }
    let securities: Vec<SecurityCode> = feeds.iter().map(|(security, _)| security.clone()).collect();
    info!(securities = ?securities, "starting strategy");

    let engine = ExecutionEngine::connect(
        broker,
        config.portfolio.name.clone(),
        securities,
        amount_policy(config),
        execution_settings(config),
    )
    .await
    .context("strategy start failed")?;

    let monitor = spawn_position_monitor(engine.handle(), shutdown.clone());

    let mut workers = Vec::with_capacity(feeds.len());
    for (security, advices) in feeds {
        workers.push(spawn_advice_worker(
            security,
            advices,
            engine.handle(),
            shutdown.clone(),
        ));
    }
    info!("strategy started");

    for worker in workers {
        let _ = worker.await;
    }

    shutdown.trigger();
    let _ = monitor.await;

    if let Ok(records) = engine.handle().snapshot().await {
        info!("final positions:\n{}", position_table(&records));
    }
    engine.shutdown().await;
    info!("strategy stopped");
    Ok(())
}

fn spawn_advice_worker(
    security: SecurityCode,
    mut advices: tokio::sync::mpsc::Receiver<helm_core::Advice>,
    handle: ExecutionHandle,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                advice = advices.recv() => match advice {
                    Some(advice) => {
                        if handle.submit_advice(advice).await.is_err() {
                            warn!(security = %security, "execution dispatcher gone");
                            break;
                        }
                    }
                    None => {
                        debug!(security = %security, "advice stream completed");
                        break;
                    }
                },
            }
        }
        info!(security = %security, "advice consumption stopped");
    })
}

fn spawn_position_monitor(handle: ExecutionHandle, shutdown: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = sleep(POSITION_SUMMARY_INTERVAL) => {}
            }
            let Ok(records) = handle.snapshot().await else {
                break;
            };
            let drifted = records.iter().filter(|record| !record.in_sync()).count();
            if drifted > 0 {
                warn!(drifted, "position summary contains drifted securities");
            }
            debug!("positions:\n{}", position_table(&records));
        }
    })
}

fn position_table(records: &[helm_execution::PositionRecord]) -> String {
    format_table(
        &["Security", "Tracked", "Broker", "Status"],
        records.iter().map(|record| {
            vec![
                record.security.clone(),
                record.tracked.to_string(),
                record
                    .confirmed
                    .map_or_else(|| "?".to_string(), |lots| lots.to_string()),
                if record.in_sync() { "+" } else { "!" }.to_string(),
            ]
        }),
    )
}

fn amount_policy(config: &AppConfig) -> AmountPolicy {
    AmountPolicy {
        fixed: config.portfolio.amount,
        reduction: config.portfolio.amount_reduction,
        max: config.portfolio.max_amount,
        weight: config.portfolio.weight,
    }
}

fn execution_settings(config: &AppConfig) -> ExecutionSettings {
    ExecutionSettings {
        slippage: config.execution.slippage,
        stale_after: chrono::Duration::seconds(config.execution.stale_after_secs as i64),
        min_order_interval: Duration::from_secs(config.execution.min_order_interval_secs),
        verify_delay: Duration::from_secs(config.execution.verify_delay_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_signal_wakes_existing_waiters() {
        let signal = ShutdownSignal::manual();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };
        signal.trigger();
        waiter.await.unwrap();
        assert!(signal.triggered());
    }

    #[tokio::test]
    async fn wait_returns_immediately_after_trigger() {
        let signal = ShutdownSignal::manual();
        signal.trigger();
        signal.wait().await;
    }
}
