//! End-to-end dispatcher behavior against the paper broker.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio::time::Duration;

use helm_broker::PaperBroker;
use helm_core::Advice;
use helm_execution::{AmountPolicy, ExecutionEngine, ExecutionSettings};

const PORTFOLIO: &str = "SPBFUT00";
const SECURITY: &str = "SiH8";

fn fresh_advice(price: f64, position: f64) -> Advice {
    Advice {
        security: SECURITY.to_string(),
        timestamp: chrono::Local::now().naive_local(),
        price,
        position,
    }
}

fn fast_settings() -> ExecutionSettings {
    ExecutionSettings {
        slippage: 0.0,
        stale_after: ChronoDuration::minutes(9),
        min_order_interval: Duration::ZERO,
        verify_delay: Duration::from_millis(1),
    }
}

async fn engine_with(
    broker: &Arc<PaperBroker>,
    settings: ExecutionSettings,
) -> ExecutionEngine {
    ExecutionEngine::connect(
        broker.clone(),
        PORTFOLIO,
        vec![SECURITY.to_string()],
        AmountPolicy::default(),
        settings,
    )
    .await
    .expect("engine should connect")
}

#[tokio::test]
async fn drift_blocks_orders_until_positions_realign() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    broker.set_position(PORTFOLIO, SECURITY, 5);
    let engine = engine_with(&broker, fast_settings()).await;
    let handle = engine.handle();

    // Tracked was seeded at 5; the broker then drifts to 3.
    broker.set_position(PORTFOLIO, SECURITY, 3);

    // amount 700 / base 100 * 1.0 = 7 target lots, delta 2 - but drift.
    handle.submit_advice(fresh_advice(100.0, 1.0)).await.unwrap();
    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 5);
    assert!(broker.orders().is_empty());

    // Positions realign; the same advice now trades the delta.
    broker.set_position(PORTFOLIO, SECURITY, 5);
    handle.submit_advice(fresh_advice(100.0, 1.0)).await.unwrap();
    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 7);
    let orders = broker.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].volume, 2);

    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn stale_advice_never_trades() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let engine = engine_with(&broker, fast_settings()).await;
    let handle = engine.handle();

    let mut advice = fresh_advice(100.0, 1.0);
    advice.timestamp = advice.timestamp - ChronoDuration::minutes(10);
    handle.submit_advice(advice).await.unwrap();

    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 0);
    assert!(broker.orders().is_empty());
    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn order_pacing_skips_rapid_advices() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let settings = ExecutionSettings {
        min_order_interval: Duration::from_secs(60),
        ..fast_settings()
    };
    let engine = engine_with(&broker, settings).await;
    let handle = engine.handle();

    handle.submit_advice(fresh_advice(100.0, 1.0)).await.unwrap();
    // Position confirmation may lag; a second delta right away is skipped.
    handle.submit_advice(fresh_advice(100.0, -1.0)).await.unwrap();

    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 7);
    assert_eq!(broker.orders().len(), 1);
    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn submission_failure_leaves_tracked_state_untouched() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let engine = engine_with(&broker, fast_settings()).await;
    let handle = engine.handle();

    broker.fail_submissions(true);
    handle.submit_advice(fresh_advice(100.0, 1.0)).await.unwrap();
    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 0);
    assert!(broker.orders().is_empty());

    // The next advice cycle recomputes the delta and succeeds.
    broker.fail_submissions(false);
    handle.submit_advice(fresh_advice(100.0, 1.0)).await.unwrap();
    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 7);
    assert_eq!(broker.orders().len(), 1);
    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn flat_target_is_a_no_op() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let engine = engine_with(&broker, fast_settings()).await;
    let handle = engine.handle();

    handle.submit_advice(fresh_advice(100.0, 0.0)).await.unwrap();
    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 0);
    assert!(broker.orders().is_empty());
    assert!(records[0].in_sync());
    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn base_price_is_captured_from_the_first_advice() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let engine = engine_with(&broker, fast_settings()).await;
    let handle = engine.handle();

    // First advice pins the base price at 100 even though it trades nothing.
    handle.submit_advice(fresh_advice(100.0, 0.0)).await.unwrap();
    // Later prices scale the target off the original base: 700/100*1 = 7.
    handle.submit_advice(fresh_advice(140.0, 1.0)).await.unwrap();

    let records = handle.snapshot().await.unwrap();
    assert_eq!(records[0].tracked, 7);
    drop(handle);
    engine.shutdown().await;
}

#[tokio::test]
async fn missing_portfolio_aborts_startup() {
    let broker = Arc::new(PaperBroker::new(PORTFOLIO, 700.0));
    let result = ExecutionEngine::connect(
        broker.clone(),
        "UNKNOWN",
        vec![SECURITY.to_string()],
        AmountPolicy::default(),
        fast_settings(),
    )
    .await;
    assert!(result.is_err());
}
