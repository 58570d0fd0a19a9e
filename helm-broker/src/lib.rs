//! Gateway-agnostic traits used by the rest of the workspace.
//!
//! Concrete terminal bindings live outside this workspace; everything here
//! is the seam they implement plus the in-process implementations used by
//! tests and dry runs.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;

use helm_core::{Advice, Candle, Lots, Price, SecurityCode};

pub mod paper;
pub mod rest;

pub use paper::PaperBroker;
pub use rest::{advice_feed, candle_publisher, AdviceFeedSettings, RestAdviceClient};

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Identifier assigned to a submitted order by the gateway.
pub type OrderId = String;

/// Common error type returned by gateway implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The trading gateway is unreachable; fatal for the current operation
    /// but safe to retry on the next advice cycle.
    #[error("gateway connection error: {0}")]
    Connection(String),
    /// The requested portfolio does not exist; fatal for strategy startup.
    #[error("portfolio not found: {0}")]
    PortfolioNotFound(String),
    /// The gateway refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// Wraps payload (de)serialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// Desired order placement parameters.
///
/// `volume` is signed with the symmetric convention: positive buys,
/// negative sells. `price` is the limit price, already slippage-adjusted.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderRequest {
    pub portfolio: String,
    pub security: SecurityCode,
    pub volume: Lots,
    pub price: Price,
}

/// Execution interface of the trading gateway.
///
/// The gateway session behind an implementation is generally not safe for
/// concurrent use; the execution engine serializes all calls through its
/// dispatcher.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Confirmed net position in integer lots.
    async fn position(&self, portfolio: &str, security: &str) -> BrokerResult<Lots>;

    /// Notional amount available to the portfolio.
    async fn amount(&self, portfolio: &str) -> BrokerResult<f64>;

    /// Submit a limit order; returns the gateway-assigned order id.
    async fn submit_order(&self, request: OrderRequest) -> BrokerResult<OrderId>;
}

/// Live candle subscription. Dropping the receiver unsubscribes.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Subscribe to the candle stream for one security, FIFO in producer
    /// order.
    async fn stream(&self, security: &str) -> BrokerResult<mpsc::Receiver<Candle>>;
}

/// Long-poll contract for the split advisor/trader deployment.
#[async_trait]
pub trait AdviceTransport: Send + Sync {
    /// Securities the advisor side is configured for.
    async fn securities(&self) -> BrokerResult<Vec<SecurityCode>>;

    /// Forward candles to the advisor process.
    async fn publish_candles(&self, candles: &[Candle]) -> BrokerResult<()>;

    /// Wait up to `timeout` for an advice newer than `since`.
    async fn next_advice(
        &self,
        security: &str,
        since: NaiveDateTime,
        timeout: Duration,
    ) -> BrokerResult<Option<Advice>>;
}
