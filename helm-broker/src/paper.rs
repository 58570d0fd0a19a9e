//! In-process broker used by tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use helm_core::Lots;

use crate::{Broker, BrokerError, BrokerResult, OrderId, OrderRequest};

/// Honest position ledger with perfect fills.
///
/// Orders apply to the confirmed position immediately, so tracked and
/// broker positions only diverge when a test (or an operator poking a dry
/// run) moves the ledger directly via [`PaperBroker::set_position`].
pub struct PaperBroker {
    amounts: HashMap<String, f64>,
    positions: Mutex<HashMap<(String, String), Lots>>,
    orders: Mutex<Vec<OrderRequest>>,
    fail_submissions: AtomicBool,
    next_order_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(portfolio: impl Into<String>, amount: f64) -> Self {
        let mut amounts = HashMap::new();
        amounts.insert(portfolio.into(), amount);
        Self {
            amounts,
            positions: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            fail_submissions: AtomicBool::new(false),
            next_order_id: AtomicU64::new(1),
        }
    }

    /// Overwrite the confirmed position, bypassing order flow.
    pub fn set_position(&self, portfolio: &str, security: &str, lots: Lots) {
        let mut positions = self.positions.lock().unwrap();
        positions.insert((portfolio.to_string(), security.to_string()), lots);
    }

    /// Make every subsequent submission fail with a rejection.
    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Orders accepted so far, oldest first.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders
            .lock()
            .unwrap()
            .clone()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn position(&self, portfolio: &str, security: &str) -> BrokerResult<Lots> {
        let positions = self.positions.lock().unwrap();
        Ok(positions
            .get(&(portfolio.to_string(), security.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn amount(&self, portfolio: &str) -> BrokerResult<f64> {
        self.amounts
            .get(portfolio)
            .copied()
            .ok_or_else(|| BrokerError::PortfolioNotFound(portfolio.to_string()))
    }

    async fn submit_order(&self, request: OrderRequest) -> BrokerResult<OrderId> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(BrokerError::Rejected("paper broker told to fail".into()));
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        info!(
            portfolio = %request.portfolio,
            security = %request.security,
            volume = request.volume,
            price = request.price,
            "paper order accepted"
        );
        {
            let mut positions = self.positions.lock().unwrap();
            *positions
                .entry((request.portfolio.clone(), request.security.clone()))
                .or_insert(0) += request.volume;
        }
        self.orders
            .lock()
            .unwrap()
            .push(request);
        Ok(format!("paper-{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn orders_move_the_confirmed_position() {
        let broker = PaperBroker::new("SPBFUT00", 1_000_000.0);
        broker
            .submit_order(OrderRequest {
                portfolio: "SPBFUT00".to_string(),
                security: "SiH8".to_string(),
                volume: 3,
                price: 61_500.0,
            })
            .await
            .unwrap();
        assert_eq!(broker.position("SPBFUT00", "SiH8").await.unwrap(), 3);
        assert_eq!(broker.orders().len(), 1);
    }

    #[tokio::test]
    async fn missing_portfolio_is_reported() {
        let broker = PaperBroker::new("SPBFUT00", 1_000_000.0);
        assert!(matches!(
            broker.amount("OTHER").await,
            Err(BrokerError::PortfolioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn submissions_can_be_failed() {
        let broker = PaperBroker::new("SPBFUT00", 1_000_000.0);
        broker.fail_submissions(true);
        let result = broker
            .submit_order(OrderRequest {
                portfolio: "SPBFUT00".to_string(),
                security: "SiH8".to_string(),
                volume: 1,
                price: 61_500.0,
            })
            .await;
        assert!(matches!(result, Err(BrokerError::Rejected(_))));
        assert_eq!(broker.position("SPBFUT00", "SiH8").await.unwrap(), 0);
    }
}
