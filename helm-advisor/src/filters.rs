//! Base signals and the stacked position filters.

use helm_core::{Advice, Candle, Direction, SessionClock};

use crate::indicators::{interpolate_linear, RealizedVolatility, RebalanceClock, RollingWindow};
use crate::{Filter, Signal};

/// Price channel breakout over the closing prices of recent trading days.
///
/// The window collects one close per session day; at rebalance events the
/// ratio snaps to +/-1 on a breakout, or is clamped toward zero when the
/// close falls on the wrong side of the channel midpoint.
pub struct ChannelBreakout {
    clock: SessionClock,
    rebalance: RebalanceClock,
    window: RollingWindow,
    ratio: f64,
    last: Option<Candle>,
}

impl ChannelBreakout {
    pub fn new(clock: SessionClock, period: usize) -> Self {
        Self {
            rebalance: RebalanceClock::new(clock.clone()),
            clock,
            window: RollingWindow::new(period),
            ratio: 0.0,
            last: None,
        }
    }
}

impl Signal for ChannelBreakout {
    fn on_candle(&mut self, candle: &Candle) -> Option<Advice> {
        let Some(last) = self.last.clone() else {
            self.last = Some(candle.clone());
            return None;
        };
        // Stale or duplicate samples must not advance any state.
        if candle.timestamp <= last.timestamp {
            return None;
        }
        if !self.clock.is_main_session(candle.timestamp) {
            self.last = Some(candle.clone());
            return None;
        }

        if self.clock.is_new_day(last.timestamp, candle.timestamp) {
            self.window.push(candle.close);
        }
        self.rebalance.update(candle.timestamp);

        if self.rebalance.is_due() && !self.window.is_empty() {
            if let (Some(high), Some(low)) = (self.window.high(), self.window.low()) {
                let mid = low + 0.5 * (high - low);
                if candle.close >= high {
                    self.ratio = 1.0;
                } else if candle.close <= low {
                    self.ratio = -1.0;
                } else if candle.close > mid {
                    self.ratio = self.ratio.max(0.0);
                } else if candle.close < mid {
                    self.ratio = self.ratio.min(0.0);
                }
            }
        }

        self.last = Some(candle.clone());
        Some(Advice {
            security: candle.security.clone(),
            timestamp: candle.timestamp,
            price: candle.close,
            position: self.ratio,
        })
    }
}

/// Averages the positions of several constituent signals.
///
/// Every constituent sees every candle; the composite emits nothing until
/// all of them are warm.
pub struct Composite {
    signals: Vec<Box<dyn Signal>>,
}

impl Composite {
    pub fn new(signals: Vec<Box<dyn Signal>>) -> Self {
        Self { signals }
    }
}

impl Signal for Composite {
    fn on_candle(&mut self, candle: &Candle) -> Option<Advice> {
        let advices: Vec<Option<Advice>> = self
            .signals
            .iter_mut()
            .map(|signal| signal.on_candle(candle))
            .collect();
        let mut sum = 0.0;
        for advice in &advices {
            sum += advice.as_ref()?.position;
        }
        Some(Advice {
            security: candle.security.clone(),
            timestamp: candle.timestamp,
            price: candle.close,
            position: sum / self.signals.len() as f64,
        })
    }
}

const TREND_PERIOD: usize = 60;

/// Scales the position by how strongly the market has been trending,
/// measured as the log range of closes sampled at rebalance events.
pub struct TrendControl {
    rebalance: RebalanceClock,
    window: RollingWindow,
    ratio: f64,
}

impl TrendControl {
    pub fn new(clock: SessionClock) -> Self {
        Self {
            rebalance: RebalanceClock::new(clock),
            window: RollingWindow::new(TREND_PERIOD),
            ratio: 1.0,
        }
    }
}

impl Filter for TrendControl {
    fn apply(&mut self, candle: &Candle, advice: Advice) -> Advice {
        self.rebalance.update(candle.timestamp);
        if self.rebalance.is_due() {
            self.window.push(candle.close);
            if let (Some(high), Some(low)) = (self.window.high(), self.window.low()) {
                self.ratio = 0.34 + interpolate_linear((high / low).ln(), 0.025, 0.05, 0.0, 0.66);
            }
        }
        let position = advice.position * self.ratio;
        advice.with_position(position)
    }
}

/// Scales the position down when realized volatility exceeds the target.
pub struct VolatilityControl {
    rebalance: RebalanceClock,
    volatility: RealizedVolatility,
    ratio: f64,
}

impl VolatilityControl {
    pub fn new(clock: SessionClock, target_volatility: f64) -> Self {
        Self {
            rebalance: RebalanceClock::new(clock.clone()),
            volatility: RealizedVolatility::new(clock, target_volatility),
            ratio: 1.0,
        }
    }
}

impl Filter for VolatilityControl {
    fn apply(&mut self, candle: &Candle, advice: Advice) -> Advice {
        self.volatility.update(candle);
        self.rebalance.update(candle.timestamp);
        if self.rebalance.is_due() {
            self.ratio = self.volatility.value();
        }
        let position = advice.position * self.ratio;
        advice.with_position(position)
    }
}

/// Clamps the position sign for long-only or short-only strategies.
pub struct DirectionFilter {
    direction: Direction,
}

impl DirectionFilter {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }
}

impl Filter for DirectionFilter {
    fn apply(&mut self, _candle: &Candle, advice: Advice) -> Advice {
        let position = match self.direction {
            Direction::Both => advice.position,
            Direction::LongOnly => advice.position.max(0.0),
            Direction::ShortOnly => advice.position.min(0.0),
        };
        advice.with_position(position)
    }
}

/// Bounds the step-to-step change of the output ratio.
pub struct SlewLimiter {
    max_step: f64,
    ratio: f64,
}

impl SlewLimiter {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step,
            ratio: 0.0,
        }
    }
}

impl Filter for SlewLimiter {
    fn apply(&mut self, _candle: &Candle, advice: Advice) -> Advice {
        self.ratio = (self.ratio - self.max_step)
            .max((self.ratio + self.max_step).min(advice.position));
        advice.with_position(self.ratio)
    }
}

/// Static leverage times portfolio weight, applied on every candle.
pub struct LeverFilter {
    factor: f64,
}

impl LeverFilter {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Filter for LeverFilter {
    fn apply(&mut self, _candle: &Candle, advice: Advice) -> Advice {
        let position = advice.position * self.factor;
        advice.with_position(position)
    }
}
