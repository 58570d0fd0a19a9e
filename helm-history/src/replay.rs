//! Streams stored candles through the live [`CandleSource`] interface.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use helm_broker::{BrokerResult, CandleSource};
use helm_core::{Candle, SecurityCode};

const STREAM_BUFFER: usize = 256;

/// Candle source backed by pre-loaded history.
///
/// Each subscription replays the stored sequence in order and then closes,
/// which is exactly what offline runs and integration tests want.
#[derive(Default)]
pub struct ReplaySource {
    candles: Mutex<HashMap<SecurityCode, Vec<Candle>>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, security: impl Into<SecurityCode>, candles: Vec<Candle>) {
        self.candles
            .lock()
            .unwrap()
            .insert(security.into(), candles);
    }
}

#[async_trait]
impl CandleSource for ReplaySource {
    async fn stream(&self, security: &str) -> BrokerResult<mpsc::Receiver<Candle>> {
        let candles = self
            .candles
            .lock()
            .unwrap()
            .get(security)
            .cloned()
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            for candle in candles {
                if tx.send(candle).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
