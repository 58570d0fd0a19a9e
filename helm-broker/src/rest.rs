//! HTTP client side of the advisor/trader split deployment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use helm_core::{Advice, Candle, SecurityCode};

use crate::{AdviceTransport, BrokerError, BrokerResult};

/// Long-poll client over the advisor service's REST surface.
pub struct RestAdviceClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestAdviceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{base}/{path}")
    }
}

#[async_trait]
impl AdviceTransport for RestAdviceClient {
    async fn securities(&self) -> BrokerResult<Vec<SecurityCode>> {
        let response = self
            .client
            .get(self.endpoint("api/advisors"))
            .send()
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?
            .error_for_status()
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        response
            .json()
            .await
            .map_err(|err| BrokerError::Serialization(err.to_string()))
    }

    async fn publish_candles(&self, candles: &[Candle]) -> BrokerResult<()> {
        self.client
            .post(self.endpoint("api/candles"))
            .json(candles)
            .send()
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?
            .error_for_status()
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        Ok(())
    }

    async fn next_advice(
        &self,
        security: &str,
        since: NaiveDateTime,
        timeout: Duration,
    ) -> BrokerResult<Option<Advice>> {
        let response = self
            .client
            .get(self.endpoint(&format!("api/advisors/{security}")))
            .query(&[
                ("since", since.format("%Y-%m-%dT%H:%M:%S").to_string()),
                ("timeout", timeout.as_secs().to_string()),
            ])
            .send()
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?
            .error_for_status()
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        response
            .json()
            .await
            .map_err(|err| BrokerError::Serialization(err.to_string()))
    }
}

/// Knobs for [`advice_feed`].
#[derive(Clone, Copy, Debug)]
pub struct AdviceFeedSettings {
    /// Server-side wait bound passed to the long poll.
    pub poll_timeout: Duration,
    /// Pause after a transport error before polling again.
    pub error_backoff: Duration,
}

impl Default for AdviceFeedSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(90),
            error_backoff: Duration::from_secs(180),
        }
    }
}

/// Drive a long-poll transport into an advice stream.
///
/// Repeated or older advices are dropped by tracking the last seen
/// timestamp in the `since` cursor. Transport errors log and back off; the
/// loop ends when the receiver is dropped.
pub fn advice_feed(
    transport: Arc<dyn AdviceTransport>,
    security: SecurityCode,
    settings: AdviceFeedSettings,
) -> mpsc::Receiver<Advice> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut since = NaiveDateTime::MIN;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                polled = transport.next_advice(&security, since, settings.poll_timeout) => {
                    match polled {
                        Ok(Some(advice)) if advice.timestamp > since => {
                            since = advice.timestamp;
                            if tx.send(advice).await.is_err() {
                                break;
                            }
                        }
                        Ok(Some(advice)) => {
                            debug!(security = %security, ts = %advice.timestamp, "dropping stale advice");
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(security = %security, error = %err, "advice poll failed");
                            tokio::select! {
                                _ = tx.closed() => break,
                                _ = sleep(settings.error_backoff) => {}
                            }
                        }
                    }
                }
            }
        }
        debug!(security = %security, "advice feed stopped");
    });
    rx
}

/// Forward live candles to the advisor process.
///
/// Candles accumulate until a fresh one arrives (stored history replayed at
/// startup stays local); each fresh candle flushes the whole pending batch.
/// A failed publish keeps the batch for the next attempt. Ends when the
/// candle stream closes.
pub fn candle_publisher(
    transport: Arc<dyn AdviceTransport>,
    mut candles: mpsc::Receiver<Candle>,
    freshness: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<Candle> = Vec::new();
        while let Some(candle) = candles.recv().await {
            pending.push(candle);
            let threshold = chrono::Local::now().naive_local() - freshness;
            let fresh = pending
                .last()
                .map_or(false, |candle| candle.timestamp > threshold);
            if fresh {
                match transport.publish_candles(&pending).await {
                    Ok(()) => pending.clear(),
                    Err(err) => {
                        warn!(error = %err, "candle publish failed; batch kept for retry");
                    }
                }
            }
        }
        debug!("candle stream closed; publisher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use super::*;

    struct ScriptedTransport {
        responses: Mutex<Vec<BrokerResult<Option<Advice>>>>,
        published: Mutex<Vec<Vec<Candle>>>,
        failing_publishes: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<BrokerResult<Option<Advice>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                published: Mutex::new(Vec::new()),
                failing_publishes: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AdviceTransport for ScriptedTransport {
        async fn securities(&self) -> BrokerResult<Vec<SecurityCode>> {
            Ok(vec!["Si".to_string()])
        }

        async fn publish_candles(&self, candles: &[Candle]) -> BrokerResult<()> {
            {
                let mut failing = self.failing_publishes.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(BrokerError::Connection("advisor unreachable".into()));
                }
            }
            self.published.lock().unwrap().push(candles.to_vec());
            Ok(())
        }

        async fn next_advice(
            &self,
            _security: &str,
            _since: NaiveDateTime,
            _timeout: Duration,
        ) -> BrokerResult<Option<Advice>> {
            let next = {
                let mut responses = self.responses.lock().unwrap();
                if responses.is_empty() {
                    None
                } else {
                    Some(responses.remove(0))
                }
            };
            match next {
                Some(result) => result,
                None => {
                    // Park forever once the script runs out.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn advice(day: u32, position: f64) -> Advice {
        Advice {
            security: "Si".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2018, 3, day)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            price: 61_500.0,
            position,
        }
    }

    #[tokio::test]
    async fn feed_deduplicates_by_since_cursor() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(Some(advice(1, 0.5))),
            Ok(Some(advice(1, 0.5))), // same timestamp: dropped
            Ok(None),
            Ok(Some(advice(2, -0.5))),
        ]));
        let mut feed = advice_feed(
            transport,
            "Si".to_string(),
            AdviceFeedSettings {
                poll_timeout: Duration::from_millis(10),
                error_backoff: Duration::from_millis(10),
            },
        );
        assert_eq!(feed.recv().await.unwrap().position, 0.5);
        assert_eq!(feed.recv().await.unwrap().position, -0.5);
    }

    #[tokio::test]
    async fn feed_survives_transport_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(BrokerError::Connection("gateway down".to_string())),
            Ok(Some(advice(1, 1.0))),
        ]));
        let mut feed = advice_feed(
            transport,
            "Si".to_string(),
            AdviceFeedSettings {
                poll_timeout: Duration::from_millis(10),
                error_backoff: Duration::from_millis(1),
            },
        );
        assert_eq!(feed.recv().await.unwrap().position, 1.0);
    }

    fn candle(timestamp: chrono::NaiveDateTime, close: f64) -> Candle {
        Candle {
            security: "Si".to_string(),
            timestamp,
            close,
            volume: 1.0,
        }
    }

    #[tokio::test]
    async fn publisher_batches_until_a_fresh_candle_arrives() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let (tx, rx) = mpsc::channel(8);
        let publisher = candle_publisher(
            transport.clone(),
            rx,
            chrono::Duration::minutes(5),
        );

        let now = chrono::Local::now().naive_local();
        // Replayed history stays local; only a fresh candle flushes.
        tx.send(candle(now - chrono::Duration::hours(2), 100.0))
            .await
            .unwrap();
        tx.send(candle(now, 101.0)).await.unwrap();
        drop(tx);
        publisher.await.unwrap();

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 2);
    }

    #[tokio::test]
    async fn publisher_keeps_the_batch_after_failed_posts() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        *transport.failing_publishes.lock().unwrap() = 2;
        let (tx, rx) = mpsc::channel(8);
        let publisher = candle_publisher(
            transport.clone(),
            rx,
            chrono::Duration::minutes(5),
        );

        let now = chrono::Local::now().naive_local();
        // First two flush attempts fail; the third carries everything.
        tx.send(candle(now, 100.0)).await.unwrap();
        tx.send(candle(now, 101.0)).await.unwrap();
        tx.send(candle(now, 102.0)).await.unwrap();
        drop(tx);
        publisher.await.unwrap();

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].len(), 3);
    }
}
