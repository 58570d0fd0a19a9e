//! Historical candle loading with provider fallback and retry.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use helm_core::{Candle, SecurityCode};

mod csv_provider;
mod replay;

pub use csv_provider::CsvCandleProvider;
pub use replay::ReplaySource;

/// Result alias for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Failures surfaced while fetching historical candles.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Network-level failure talking to a provider.
    #[error("transport error: {0}")]
    Transport(String),
    /// The provider responded with something unparsable.
    #[error("malformed payload: {0}")]
    Parse(String),
    /// The provider responded but had no candles for the range.
    #[error("no historical data for '{0}'")]
    Unavailable(SecurityCode),
    /// Every provider failed in every retry round.
    #[error("historical data exhausted after {rounds} round(s): {last}")]
    Exhausted { rounds: u32, last: String },
}

/// One upstream source of historical candles.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Human-friendly name used for logging.
    fn name(&self) -> &str;

    /// Fetch candles for an inclusive date range, chronological order not
    /// guaranteed by every provider.
    async fn load(
        &self,
        security: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> HistoryResult<Vec<Candle>>;
}

/// Retry policy for [`HistoryService`].
#[derive(Clone, Copy, Debug)]
pub struct HistorySettings {
    /// Full passes over the provider list before giving up.
    pub retry_rounds: u32,
    /// Pause after the first failed round; doubles each round.
    pub initial_backoff: Duration,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retry_rounds: 3,
            initial_backoff: Duration::from_secs(20),
        }
    }
}

/// Tries providers in priority order with exponential backoff between
/// failed rounds.
pub struct HistoryService {
    providers: Vec<Box<dyn CandleProvider>>,
    settings: HistorySettings,
}

impl HistoryService {
    pub fn new(providers: Vec<Box<dyn CandleProvider>>, settings: HistorySettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    /// Load and normalize candles for the range.
    ///
    /// Each round walks every provider in order; a provider returning no
    /// candles counts as a failure so the next one gets a chance. After a
    /// fully failed round the service sleeps and doubles the backoff,
    /// propagating [`HistoryError::Exhausted`] once the configured rounds
    /// are spent.
    pub async fn load_range(
        &self,
        security: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> HistoryResult<Vec<Candle>> {
        let mut backoff = self.settings.initial_backoff;
        let mut last_error = format!("no providers configured for '{security}'");

        for round in 1..=self.settings.retry_rounds.max(1) {
            for provider in &self.providers {
                match provider.load(security, from, to).await {
                    Ok(candles) if !candles.is_empty() => {
                        info!(
                            provider = provider.name(),
                            security,
                            count = candles.len(),
                            "historical candles loaded"
                        );
                        return Ok(normalize(candles, chrono::Local::now().date_naive()));
                    }
                    Ok(_) => {
                        let err = HistoryError::Unavailable(security.to_string());
                        warn!(provider = provider.name(), security, error = %err, "provider returned nothing");
                        last_error = err.to_string();
                    }
                    Err(err) => {
                        warn!(provider = provider.name(), security, error = %err, "provider failed");
                        last_error = err.to_string();
                    }
                }
            }
            if round < self.settings.retry_rounds {
                sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(HistoryError::Exhausted {
            rounds: self.settings.retry_rounds,
            last: last_error,
        })
    }
}

/// Sort, deduplicate to strictly increasing timestamps, and drop a trailing
/// candle dated `today` since it may still be forming.
#[must_use]
pub fn normalize(mut candles: Vec<Candle>, today: NaiveDate) -> Vec<Candle> {
    candles.sort_by_key(|candle| candle.timestamp);
    candles.dedup_by_key(|candle| candle.timestamp);
    if candles
        .last()
        .map_or(false, |candle| candle.timestamp.date() == today)
    {
        candles.pop();
    }
    candles
}
