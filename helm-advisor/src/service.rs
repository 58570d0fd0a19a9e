//! Turns configured strategies into live advice streams.

use tokio::sync::mpsc;
use tracing::{debug, info};

use helm_core::{Advice, Candle, SecurityCode, SessionClock, StrategyConfig};

use crate::{AdvisorError, AdvisorRegistry, AdvisorResult};

const ADVICE_BUFFER: usize = 256;

/// Owns the strategy configs and builds one advice stream per security.
pub struct AdvisorService {
    clock: SessionClock,
    registry: AdvisorRegistry,
    configs: Vec<StrategyConfig>,
}

impl AdvisorService {
    pub fn new(clock: SessionClock, registry: AdvisorRegistry, configs: Vec<StrategyConfig>) -> Self {
        Self {
            clock,
            registry,
            configs,
        }
    }

    /// Securities with a configured strategy, in configuration order.
    pub fn securities(&self) -> Vec<SecurityCode> {
        self.configs
            .iter()
            .map(|config| config.security.clone())
            .collect()
    }

    fn config(&self, security: &str) -> AdvisorResult<&StrategyConfig> {
        self.configs
            .iter()
            .find(|config| config.security == security)
            .ok_or_else(|| AdvisorError::MissingStrategy(security.to_string()))
    }

    /// Replay stored history through a fresh advisor, returning every advice
    /// it produced. This is the offline path behind reports and backtests.
    pub fn replay(&self, security: &str, candles: &[Candle]) -> AdvisorResult<Vec<Advice>> {
        let config = self.config(security)?;
        let mut advisor = self.registry.build(&self.clock, config)?;
        Ok(candles
            .iter()
            .filter_map(|candle| advisor.on_candle(candle))
            .collect())
    }

    /// Live advice stream: warm the advisor on stored history, then keep
    /// transforming incoming candles until the source closes. Producer order
    /// is preserved; warm-up advices are not re-emitted.
    pub fn advices(
        &self,
        security: &str,
        warmup: &[Candle],
        mut candles: mpsc::Receiver<Candle>,
    ) -> AdvisorResult<mpsc::Receiver<Advice>> {
        let config = self.config(security)?;
        let mut advisor = self.registry.build(&self.clock, config)?;

        let mut last_advice = None;
        for candle in warmup {
            if let Some(advice) = advisor.on_candle(candle) {
                last_advice = Some(advice);
            }
        }
        info!(security, advice = ?last_advice, "advisor warmed up");

        let security = security.to_string();
        let (tx, rx) = mpsc::channel(ADVICE_BUFFER);
        tokio::spawn(async move {
            while let Some(candle) = candles.recv().await {
                if let Some(advice) = advisor.on_candle(&candle) {
                    if tx.send(advice).await.is_err() {
                        break;
                    }
                }
            }
            debug!(security = %security, "candle stream closed; advice stream ends");
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn candle(day: u32, hour: u32, close: f64) -> Candle {
        Candle {
            security: "Si".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2018, 3, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            close,
            volume: 1.0,
        }
    }

    fn service() -> AdvisorService {
        AdvisorService::new(
            SessionClock::default(),
            AdvisorRegistry::default(),
            vec![StrategyConfig::new("breakout", "Si")],
        )
    }

    #[test]
    fn replay_skips_warm_up_candles() {
        let candles: Vec<Candle> = (1..=5).map(|day| candle(day, 10, 100.0)).collect();
        let advices = service().replay("Si", &candles).unwrap();
        assert_eq!(advices.len(), candles.len() - 1);
    }

    #[test]
    fn unknown_security_is_an_error() {
        assert!(matches!(
            service().replay("Eu", &[]),
            Err(AdvisorError::MissingStrategy(_))
        ));
    }

    #[tokio::test]
    async fn live_stream_continues_from_warmed_state() {
        let warmup: Vec<Candle> = (1..=5).map(|day| candle(day, 10, 100.0)).collect();
        let (candle_tx, candle_rx) = mpsc::channel(8);
        let mut advices = service().advices("Si", &warmup, candle_rx).unwrap();

        candle_tx.send(candle(6, 10, 100.0)).await.unwrap();
        let advice = advices.recv().await.unwrap();
        assert_eq!(advice.security, "Si");
        // Warmed past the two-candle warm-up, so the very first live candle
        // already yields advice.
        drop(candle_tx);
        assert!(advices.recv().await.is_none());
    }
}
