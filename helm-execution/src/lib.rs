//! Execution & reconciliation engine.
//!
//! The broker session is not safe for concurrent use, so all mutable state
//! (position books, base prices, order pacing) lives inside one dispatcher
//! task per portfolio. Everything else talks to it through a cloneable
//! [`ExecutionHandle`]; see [`dispatcher`] for the message set and the
//! per-advice algorithm.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::info;

use helm_broker::{Broker, BrokerError, BrokerResult};
use helm_core::{Advice, Lots, SecurityCode};

mod dispatcher;

use dispatcher::{Command, Dispatcher};

pub use dispatcher::PositionRecord;

/// Result alias for engine operations after startup.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Failures surfaced by the engine once it is running.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The dispatcher task has stopped; no further commands are accepted.
    #[error("execution dispatcher stopped")]
    Stopped,
}

/// Tunables of the per-advice algorithm.
#[derive(Clone, Debug)]
pub struct ExecutionSettings {
    /// Fixed limit-price offset relative to the advice price.
    pub slippage: f64,
    /// Advices older than this against wall clock never trade.
    pub stale_after: ChronoDuration,
    /// Minimum pause between orders for one security; broker-side position
    /// confirmation may lag behind a just-filled order.
    pub min_order_interval: Duration,
    /// Delay before the deferred post-order reconciliation probe.
    pub verify_delay: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            slippage: 0.001,
            stale_after: ChronoDuration::minutes(9),
            min_order_interval: Duration::from_secs(60),
            verify_delay: Duration::from_secs(30),
        }
    }
}

/// How much of the broker-reported notional the strategy may use.
///
/// Zero values leave a knob disabled; `weight` only applies inside (0, 1).
#[derive(Clone, Copy, Debug)]
pub struct AmountPolicy {
    /// Overrides the broker-reported amount when positive.
    pub fixed: f64,
    /// Subtracted from the amount when positive.
    pub reduction: f64,
    /// Caps the amount when positive.
    pub max: f64,
    /// Fraction of the amount given to this strategy set.
    pub weight: f64,
}

impl Default for AmountPolicy {
    fn default() -> Self {
        Self {
            fixed: 0.0,
            reduction: 0.0,
            max: 0.0,
            weight: 1.0,
        }
    }
}

impl AmountPolicy {
    /// Resolve the notional actually handed to the engine.
    #[must_use]
    pub fn available(&self, broker_amount: f64) -> f64 {
        let mut amount = if self.fixed > 0.0 {
            self.fixed
        } else {
            broker_amount
        };
        if self.reduction > 0.0 {
            amount = (amount - self.reduction).max(0.0);
        }
        if self.max > 0.0 {
            amount = amount.min(self.max);
        }
        if self.weight > 0.0 && self.weight < 1.0 {
            amount *= self.weight;
        }
        amount
    }
}

const COMMAND_BUFFER: usize = 512;

/// Cloneable front door to the dispatcher.
#[derive(Clone)]
pub struct ExecutionHandle {
    tx: mpsc::Sender<Command>,
}

impl ExecutionHandle {
    /// Queue an advice for the per-advice algorithm. FIFO per portfolio.
    pub async fn submit_advice(&self, advice: Advice) -> ExecutionResult<()> {
        self.tx
            .send(Command::Advice { advice })
            .await
            .map_err(|_| ExecutionError::Stopped)
    }

    /// Read-only view of every position book, with a fresh broker
    /// confirmation per security.
    pub async fn snapshot(&self) -> ExecutionResult<Vec<PositionRecord>> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| ExecutionError::Stopped)?;
        response.await.map_err(|_| ExecutionError::Stopped)
    }
}

/// Owns the dispatcher task for one portfolio.
pub struct ExecutionEngine {
    handle: ExecutionHandle,
    worker: JoinHandle<()>,
}

impl ExecutionEngine {
    /// Connect to the broker and seed the engine.
    ///
    /// Resolves the portfolio notional (a missing portfolio aborts startup)
    /// and queries the confirmed position of every tracked security; those
    /// confirmations become the initial tracked positions. Only then does
    /// the dispatcher start accepting advice.
    pub async fn connect(
        broker: Arc<dyn Broker>,
        portfolio: impl Into<String>,
        securities: Vec<SecurityCode>,
        policy: AmountPolicy,
        settings: ExecutionSettings,
    ) -> BrokerResult<Self> {
        let portfolio = portfolio.into();
        let broker_amount = broker.amount(&portfolio).await?;
        let amount = policy.available(broker_amount);
        if amount <= 0.0 {
            return Err(BrokerError::Other(format!(
                "portfolio '{portfolio}' has no available amount"
            )));
        }
        info!(portfolio = %portfolio, broker_amount, amount, "portfolio initialized");

        let mut seeds: Vec<(SecurityCode, Lots)> = Vec::with_capacity(securities.len());
        for security in securities {
            let position = broker.position(&portfolio, &security).await?;
            info!(portfolio = %portfolio, security = %security, position, "tracked position seeded");
            seeds.push((security, position));
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (verify_tx, verify_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(broker, portfolio, amount, settings, seeds, verify_tx);
        let worker = tokio::spawn(dispatcher.run(rx, verify_rx));
        Ok(Self {
            handle: ExecutionHandle { tx },
            worker,
        })
    }

    #[must_use]
    pub fn handle(&self) -> ExecutionHandle {
        self.handle.clone()
    }

    /// Drop the engine's own handle and wait for the dispatcher to drain.
    /// Outstanding clones of the handle keep it alive.
    pub async fn shutdown(self) {
        let Self { handle, worker } = self;
        drop(handle);
        let _ = worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_policy_mirrors_the_configured_knobs() {
        let policy = AmountPolicy::default();
        assert_eq!(policy.available(1_000.0), 1_000.0);

        let fixed = AmountPolicy {
            fixed: 500.0,
            ..AmountPolicy::default()
        };
        assert_eq!(fixed.available(1_000.0), 500.0);

        let shaped = AmountPolicy {
            reduction: 200.0,
            max: 700.0,
            weight: 0.5,
            ..AmountPolicy::default()
        };
        assert_eq!(shaped.available(1_000.0), 350.0);

        let drained = AmountPolicy {
            reduction: 2_000.0,
            ..AmountPolicy::default()
        };
        assert_eq!(drained.available(1_000.0), 0.0);
    }
}
