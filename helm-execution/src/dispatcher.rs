//! Single-writer dispatcher owning all broker-session state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use helm_broker::{Broker, OrderRequest};
use helm_core::{Advice, Lots, Price, SecurityCode};

use crate::ExecutionSettings;

/// Messages processed one at a time by the dispatcher.
pub(crate) enum Command {
    /// Run the per-advice algorithm.
    Advice { advice: Advice },
    /// Read-only position summary for monitoring.
    Snapshot {
        reply: oneshot::Sender<Vec<PositionRecord>>,
    },
}

/// Monitoring view of one security's book.
#[derive(Clone, Debug, Serialize)]
pub struct PositionRecord {
    pub security: SecurityCode,
    pub tracked: Lots,
    /// Broker-confirmed position at snapshot time; `None` when the query
    /// failed.
    pub confirmed: Option<Lots>,
}

impl PositionRecord {
    /// True when tracked and confirmed positions are known to agree.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.confirmed == Some(self.tracked)
    }
}

struct PositionBook {
    tracked: Lots,
    base_price: Option<Price>,
    last_order_at: Option<Instant>,
}

pub(crate) struct Dispatcher {
    broker: Arc<dyn Broker>,
    portfolio: String,
    amount: f64,
    settings: ExecutionSettings,
    books: HashMap<SecurityCode, PositionBook>,
    verify_tx: mpsc::Sender<SecurityCode>,
}

impl Dispatcher {
    pub(crate) fn new(
        broker: Arc<dyn Broker>,
        portfolio: String,
        amount: f64,
        settings: ExecutionSettings,
        seeds: Vec<(SecurityCode, Lots)>,
        verify_tx: mpsc::Sender<SecurityCode>,
    ) -> Self {
        let books = seeds
            .into_iter()
            .map(|(security, tracked)| {
                (
                    security,
                    PositionBook {
                        tracked,
                        base_price: None,
                        last_order_at: None,
                    },
                )
            })
            .collect();
        Self {
            broker,
            portfolio,
            amount,
            settings,
            books,
            verify_tx,
        }
    }

    /// Process commands one at a time until every handle is dropped.
    /// Deferred verification probes arrive on their own channel so they
    /// cannot keep the dispatcher alive.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut verify_rx: mpsc::Receiver<SecurityCode>,
    ) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Advice { advice }) => self.handle_advice(advice).await,
                    Some(Command::Snapshot { reply }) => {
                        let _ = reply.send(self.snapshot().await);
                    }
                    None => break,
                },
                Some(security) = verify_rx.recv() => self.handle_verify(&security).await,
            }
        }
        debug!(portfolio = %self.portfolio, "dispatcher stopped");
    }

    async fn handle_advice(&mut self, advice: Advice) {
        let Some(book) = self.books.get_mut(&advice.security) else {
            warn!(security = %advice.security, "advice for an untracked security");
            return;
        };

        let base_price = match book.base_price {
            Some(price) => price,
            None => {
                info!(security = %advice.security, price = advice.price, "base price captured");
                book.base_price = Some(advice.price);
                advice.price
            }
        };

        // Backfilled advice must never trade.
        let now = chrono::Local::now().naive_local();
        if advice.timestamp < now - self.settings.stale_after {
            debug!(security = %advice.security, ts = %advice.timestamp, "skip advice: stale");
            return;
        }

        let target = self.amount / base_price * advice.position;
        let volume = target.round() as Lots - book.tracked;
        if volume == 0 {
            return;
        }
        info!(
            security = %advice.security,
            position = advice.position,
            price = advice.price,
            target,
            volume,
            "new advice"
        );

        if let Some(last) = book.last_order_at {
            if last.elapsed() < self.settings.min_order_interval {
                info!(security = %advice.security, "skip advice: previous order still settling");
                return;
            }
        }

        let confirmed = match self.broker.position(&self.portfolio, &advice.security).await {
            Ok(position) => position,
            Err(err) => {
                warn!(security = %advice.security, error = %err, "position query failed");
                return;
            }
        };
        if confirmed != book.tracked {
            warn!(
                portfolio = %self.portfolio,
                security = %advice.security,
                tracked = book.tracked,
                confirmed,
                "position drift: order skipped until positions realign"
            );
            return;
        }

        let price = limit_price(advice.price, volume, self.settings.slippage);
        let request = OrderRequest {
            portfolio: self.portfolio.clone(),
            security: advice.security.clone(),
            volume,
            price,
        };
        match self.broker.submit_order(request).await {
            Ok(order_id) => {
                info!(
                    security = %advice.security,
                    order_id = %order_id,
                    volume,
                    price,
                    "order registered"
                );
                book.tracked += volume;
                book.last_order_at = Some(Instant::now());
                self.schedule_verify(advice.security.clone());
            }
            Err(err) => {
                // Tracked state stays as-is; the next advice recomputes the
                // delta and may retry.
                error!(security = %advice.security, error = %err, "order submission failed");
            }
        }
    }

    fn schedule_verify(&self, security: SecurityCode) {
        let tx = self.verify_tx.clone();
        let delay = self.settings.verify_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(security).await;
        });
    }

    async fn handle_verify(&mut self, security: &str) {
        let Some(book) = self.books.get(security) else {
            return;
        };
        match self.broker.position(&self.portfolio, security).await {
            Ok(confirmed) if confirmed == book.tracked => {
                debug!(security = %security, confirmed, "position confirmed");
            }
            Ok(confirmed) => {
                warn!(
                    portfolio = %self.portfolio,
                    security = %security,
                    tracked = book.tracked,
                    confirmed,
                    "position still diverges after order"
                );
            }
            Err(err) => {
                warn!(security = %security, error = %err, "deferred position check failed");
            }
        }
    }

    async fn snapshot(&self) -> Vec<PositionRecord> {
        let mut records = Vec::with_capacity(self.books.len());
        for (security, book) in &self.books {
            let confirmed = match self.broker.position(&self.portfolio, security).await {
                Ok(position) => Some(position),
                Err(err) => {
                    warn!(security = %security, error = %err, "snapshot position query failed");
                    None
                }
            };
            records.push(PositionRecord {
                security: security.clone(),
                tracked: book.tracked,
                confirmed,
            });
        }
        records.sort_by(|a, b| a.security.cmp(&b.security));
        records
    }
}

/// Limit price with the slippage offset applied toward the fill side and
/// rounded to the nearest integer step, half away from zero.
fn limit_price(price: Price, volume: Lots, slippage: f64) -> Price {
    let adjusted = if volume > 0 {
        price * (1.0 + slippage)
    } else {
        price * (1.0 - slippage)
    };
    adjusted.round()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buys_pay_up_and_sells_give_way() {
        assert_eq!(limit_price(61_500.0, 1, 0.001), 61_562.0);
        assert_eq!(limit_price(61_500.0, -1, 0.001), 61_439.0);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(limit_price(500.0, 1, 0.001), 501.0); // 500.5 rounds up
        assert_eq!(limit_price(500.0, -1, 0.001), 500.0); // 499.5 rounds to 500
    }
}
