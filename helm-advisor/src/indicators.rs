//! Rolling indicators backing the slow-moving pipeline stages.

use std::collections::VecDeque;

use chrono::NaiveDateTime;

use helm_core::{Candle, SessionClock};

/// Clamped linear interpolation of `x` from `[x_min, x_max]` onto
/// `[y_min, y_max]`.
#[must_use]
pub fn interpolate_linear(x: f64, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> f64 {
    let x = x.clamp(x_min, x_max);
    (y_max - y_min) * (x - x_min) / (x_max - x_min) + y_min
}

/// Fixed-capacity price window with cheap high/low queries.
#[derive(Debug)]
pub struct RollingWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    #[must_use]
    pub fn high(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    #[must_use]
    pub fn low(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Detects rebalance events: the main-session trading date advanced, or the
/// time of day crossed an intraday checkpoint since the previous candle.
#[derive(Debug)]
pub struct RebalanceClock {
    clock: SessionClock,
    last: Option<NaiveDateTime>,
    due: bool,
}

impl RebalanceClock {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            clock,
            last: None,
            due: false,
        }
    }

    pub fn update(&mut self, ts: NaiveDateTime) {
        self.due = self.last.map_or(false, |last| {
            self.clock.is_new_day(last, ts) || self.clock.crossed_checkpoint(last, ts)
        });
        self.last = Some(ts);
    }

    #[must_use]
    pub fn is_due(&self) -> bool {
        self.due
    }
}

const VOLATILITY_PERIOD: usize = 100;

/// Estimates the realized daily-equivalent volatility from intraday log
/// returns and turns it into a position scaling ratio.
#[derive(Debug)]
pub struct RealizedVolatility {
    clock: SessionClock,
    target: f64,
    returns: VecDeque<f64>,
    ratio: f64,
    last: Option<(NaiveDateTime, f64)>,
}

impl RealizedVolatility {
    pub fn new(clock: SessionClock, target: f64) -> Self {
        Self {
            clock,
            target,
            returns: VecDeque::with_capacity(2 * VOLATILITY_PERIOD),
            ratio: 1.0,
            last: None,
        }
    }

    /// Accumulate a log return, but only across same-session consecutive
    /// candles; overnight and evening steps are not intraday volatility.
    pub fn update(&mut self, candle: &Candle) {
        if let Some((last_ts, last_close)) = self.last {
            if self.clock.is_main_session(candle.timestamp)
                && !self.clock.is_new_day(last_ts, candle.timestamp)
            {
                self.returns.push_back((candle.close / last_close).ln());
                while self.returns.len() >= 2 * VOLATILITY_PERIOD {
                    self.returns.pop_front();
                }
            }
        }
        self.last = Some((candle.timestamp, candle.close));
    }

    /// Target-vs-realized ratio, capped at 1 so quiet markets never lever
    /// the position up. Holds the previous value until enough samples exist.
    pub fn value(&mut self) -> f64 {
        if self.returns.len() >= VOLATILITY_PERIOD {
            let window: Vec<f64> = self
                .returns
                .iter()
                .copied()
                .skip(self.returns.len() - VOLATILITY_PERIOD)
                .collect();
            let realized = (VOLATILITY_PERIOD as f64).sqrt() * stdev(&window);
            self.ratio = (self.target / realized).min(1.0);
        }
        self.ratio
    }
}

fn stdev(values: &[f64]) -> f64 {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for &x in values {
        n += 1;
        let delta = x - mean;
        mean += delta / n as f64;
        m2 += delta * (x - mean);
    }
    if n == 0 {
        return f64::NAN;
    }
    (m2 / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn interpolation_clamps_outside_the_range() {
        assert_eq!(interpolate_linear(0.0, 0.025, 0.05, 0.0, 0.66), 0.0);
        assert_eq!(interpolate_linear(0.1, 0.025, 0.05, 0.0, 0.66), 0.66);
        let mid = interpolate_linear(0.0375, 0.025, 0.05, 0.0, 0.66);
        assert!((mid - 0.33).abs() < 1e-12);
    }

    #[test]
    fn rolling_window_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for value in [1.0, 5.0, 2.0, 4.0] {
            window.push(value);
        }
        assert_eq!(window.high(), Some(5.0));
        assert_eq!(window.low(), Some(2.0));
        window.push(3.0);
        // The 5.0 sample has aged out.
        assert_eq!(window.high(), Some(4.0));
    }

    #[test]
    fn rebalance_fires_on_new_day_and_checkpoints() {
        let mut clock = RebalanceClock::new(SessionClock::default());
        clock.update(at(1, 10, 0));
        assert!(!clock.is_due());
        clock.update(at(1, 12, 35)); // crossed 12:30
        assert!(clock.is_due());
        clock.update(at(1, 13, 0));
        assert!(!clock.is_due());
        clock.update(at(2, 10, 0)); // new trading day
        assert!(clock.is_due());
    }

    #[test]
    fn volatility_ratio_never_levers_up() {
        let clock = SessionClock::default();
        let mut vol = RealizedVolatility::new(clock, 0.006);
        let mut price = 60_000.0;
        // Large alternating returns push realized vol far above target.
        for index in 0..=VOLATILITY_PERIOD {
            let candle = Candle {
                security: "Si".to_string(),
                timestamp: at(1, 10, 0) + chrono::Duration::minutes(index as i64),
                close: price,
                volume: 1.0,
            };
            vol.update(&candle);
            price *= if index % 2 == 0 { 1.01 } else { 0.99 };
        }
        let ratio = vol.value();
        assert!(ratio < 1.0);
        assert!(ratio > 0.0);
    }

    #[test]
    fn volatility_holds_initial_ratio_until_warm() {
        let clock = SessionClock::default();
        let mut vol = RealizedVolatility::new(clock, 0.006);
        assert_eq!(vol.value(), 1.0);
    }
}
