//! Signal pipeline: candle in, desired normalized position out.
//!
//! An [`Advisor`] owns one base [`Signal`] and an ordered stack of
//! [`Filter`]s. The base decides warm-up and session gating and may withhold
//! advice (`None`); filters transform the position and always run once the
//! base has emitted. State is per security and not safe for concurrent use;
//! each security gets its own advisor driven by a single task.

use std::collections::HashMap;

use thiserror::Error;

use helm_core::{Advice, Candle, Direction, SecurityCode, SessionClock, StrategyConfig};

pub mod filters;
pub mod indicators;
mod service;

pub use service::AdvisorService;

use filters::{
    ChannelBreakout, Composite, DirectionFilter, LeverFilter, SlewLimiter, TrendControl,
    VolatilityControl,
};

/// Result alias for advisor construction.
pub type AdvisorResult<T> = Result<T, AdvisorError>;

/// Failures surfaced while building or running advisors.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// The configured strategy name is not registered.
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    /// No strategy is configured for the requested security.
    #[error("no strategy configured for security '{0}'")]
    MissingStrategy(SecurityCode),
}

/// A stateful base signal: candle in, advice out, `None` during warm-up.
pub trait Signal: Send {
    fn on_candle(&mut self, candle: &Candle) -> Option<Advice>;
}

/// A stateful position transformer stacked on top of a base signal.
pub trait Filter: Send {
    fn apply(&mut self, candle: &Candle, advice: Advice) -> Advice;
}

/// One security's full pipeline, built once per run.
pub struct Advisor {
    signal: Box<dyn Signal>,
    filters: Vec<Box<dyn Filter>>,
}

impl Advisor {
    pub fn new(signal: Box<dyn Signal>, filters: Vec<Box<dyn Filter>>) -> Self {
        Self { signal, filters }
    }

    /// Feed one candle through the pipeline. Candles must arrive in strictly
    /// increasing timestamp order; anything else is ignored by the base.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<Advice> {
        let advice = self.signal.on_candle(candle)?;
        Some(
            self.filters
                .iter_mut()
                .fold(advice, |advice, filter| filter.apply(candle, advice)),
        )
    }
}

const BREAKOUT_PERIOD: usize = 20;
const SLEW_MAX_STEP: f64 = 0.5;

type SignalBuilder = fn(&SessionClock, &StrategyConfig) -> Box<dyn Signal>;

/// Maps strategy names (case-insensitive) to base-signal builders and
/// assembles the fixed filter stack around them.
pub struct AdvisorRegistry {
    builders: HashMap<String, SignalBuilder>,
}

impl AdvisorRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, builder: SignalBuilder) {
        self.builders.insert(name.to_lowercase(), builder);
    }

    /// Build the advisor for one strategy config: base signal, then trend
    /// control, volatility control, the optional direction clamp, the slew
    /// limiter and finally leverage/weight scaling.
    pub fn build(&self, clock: &SessionClock, config: &StrategyConfig) -> AdvisorResult<Advisor> {
        let builder = self
            .builders
            .get(&config.name.to_lowercase())
            .ok_or_else(|| AdvisorError::UnknownStrategy(config.name.clone()))?;
        let signal = builder(clock, config);

        let mut stack: Vec<Box<dyn Filter>> = vec![
            Box::new(TrendControl::new(clock.clone())),
            Box::new(VolatilityControl::new(
                clock.clone(),
                config.target_volatility,
            )),
        ];
        if config.direction != Direction::Both {
            stack.push(Box::new(DirectionFilter::new(config.direction)));
        }
        stack.push(Box::new(SlewLimiter::new(SLEW_MAX_STEP)));
        stack.push(Box::new(LeverFilter::new(config.lever * config.weight)));

        Ok(Advisor::new(signal, stack))
    }
}

impl Default for AdvisorRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register("breakout", |clock, _config| {
            Box::new(ChannelBreakout::new(clock.clone(), BREAKOUT_PERIOD))
        });
        registry.register("dual", |clock, _config| {
            Box::new(Composite::new(vec![Box::new(ChannelBreakout::new(
                clock.clone(),
                BREAKOUT_PERIOD,
            ))]))
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn candle(day: u32, hour: u32, minute: u32, close: f64) -> Candle {
        Candle {
            security: "Si".to_string(),
            timestamp: ts(day, hour, minute),
            close,
            volume: 1.0,
        }
    }

    fn breakout() -> Advisor {
        Advisor::new(
            Box::new(ChannelBreakout::new(SessionClock::default(), 20)),
            Vec::new(),
        )
    }

    #[test]
    fn first_candle_is_warm_up() {
        let mut advisor = breakout();
        assert!(advisor.on_candle(&candle(1, 10, 0, 100.0)).is_none());
        assert!(advisor.on_candle(&candle(1, 10, 5, 100.0)).is_some());
    }

    #[test]
    fn non_increasing_candles_never_advance_state() {
        let mut advisor = breakout();
        advisor.on_candle(&candle(1, 10, 0, 100.0));
        advisor.on_candle(&candle(1, 10, 5, 100.0));
        // Replay of the same timestamp and an older one both vanish.
        assert!(advisor.on_candle(&candle(1, 10, 5, 999.0)).is_none());
        assert!(advisor.on_candle(&candle(1, 9, 0, 999.0)).is_none());
        let next = advisor.on_candle(&candle(1, 10, 10, 100.0)).unwrap();
        assert_eq!(next.position, 0.0);
    }

    #[test]
    fn evening_candles_emit_nothing_but_update_last_seen() {
        let mut advisor = breakout();
        advisor.on_candle(&candle(1, 10, 0, 100.0));
        assert!(advisor.on_candle(&candle(1, 20, 0, 100.0)).is_none());
        // The next morning candle is a new day relative to the evening one.
        assert!(advisor.on_candle(&candle(2, 10, 0, 100.0)).is_some());
    }

    #[test]
    fn breakout_goes_long_above_channel_high() {
        let mut advisor = breakout();
        advisor.on_candle(&candle(1, 10, 0, 100.0));
        // Build a channel across several days; prices stay around 100.
        for day in 2..=5 {
            advisor.on_candle(&candle(day, 10, 0, 100.0));
        }
        // Rebalance checkpoint crossing with a close above the channel high.
        let advice = advisor.on_candle(&candle(5, 12, 35, 110.0)).unwrap();
        assert_eq!(advice.position, 1.0);
        // Below the channel low flips short.
        advisor.on_candle(&candle(6, 10, 0, 90.0));
        let advice = advisor.on_candle(&candle(6, 12, 35, 80.0)).unwrap();
        assert_eq!(advice.position, -1.0);
    }

    #[test]
    fn slew_limiter_bounds_every_step() {
        let mut advisor = breakout();
        let mut filters: Vec<Box<dyn Filter>> = vec![Box::new(SlewLimiter::new(0.5))];
        advisor.on_candle(&candle(1, 10, 0, 100.0));
        for day in 2..=5 {
            advisor.on_candle(&candle(day, 10, 0, 100.0));
        }
        let mut previous = 0.0;
        let mut exercised = 0;
        for (minute, close) in [(35, 120.0), (40, 120.0), (45, 60.0), (50, 60.0)] {
            if let Some(advice) = advisor.on_candle(&candle(5, 12, minute, close)) {
                let advice = filters[0].apply(&candle(5, 12, minute, close), advice);
                assert!((advice.position - previous).abs() <= 0.5 + 1e-12);
                previous = advice.position;
                exercised += 1;
            }
        }
        assert_eq!(exercised, 4);
    }

    #[test]
    fn direction_clamp_and_lever_scaling() {
        let config = StrategyConfig {
            direction: Direction::LongOnly,
            lever: 2.0,
            weight: 0.5,
            ..StrategyConfig::new("breakout", "Si")
        };
        let registry = AdvisorRegistry::default();
        let mut advisor = registry.build(&SessionClock::default(), &config).unwrap();
        advisor.on_candle(&candle(1, 10, 0, 100.0));
        for day in 2..=5 {
            advisor.on_candle(&candle(day, 10, 0, 100.0));
        }
        // A breakdown would go short, but long-only clamps to flat.
        advisor.on_candle(&candle(6, 10, 0, 90.0));
        let advice = advisor.on_candle(&candle(6, 12, 35, 80.0)).unwrap();
        assert_eq!(advice.position, 0.0);
    }

    #[test]
    fn composite_averages_and_waits_for_all_constituents() {
        let clock = SessionClock::default();
        let mut composite = Composite::new(vec![
            Box::new(ChannelBreakout::new(clock.clone(), 20)),
            Box::new(ChannelBreakout::new(clock.clone(), 20)),
        ]);
        assert!(composite.on_candle(&candle(1, 10, 0, 100.0)).is_none());
        let advice = composite.on_candle(&candle(1, 10, 5, 100.0)).unwrap();
        assert_eq!(advice.position, 0.0);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let registry = AdvisorRegistry::default();
        let config = StrategyConfig::new("momentum", "Si");
        assert!(matches!(
            registry.build(&SessionClock::default(), &config),
            Err(AdvisorError::UnknownStrategy(_))
        ));
    }
}
