//! Pure return-statistics engine.
//!
//! Everything here is a function over advice or HPR slices with no side
//! effects, shared by historical backtests and the live status display.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use helm_core::{session, Advice, SessionClock};

mod summary;

pub use summary::{drawdown_info, DrawdownInfo, Summary};

/// One holding-period return: a multiplicative factor for a single trading
/// session (1.0 = flat).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct HprRecord {
    pub date: NaiveDate,
    pub value: f64,
}

impl HprRecord {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Convert an advice sequence into one HPR per trading session.
///
/// Each consecutive advice pair contributes the step multiplier
/// `(r.price/l.price - 1) * l.position - slippage * |r.position - l.position| + 1`:
/// return is earned on the position held going into the interval while
/// transaction cost is charged on the position change. Steps are grouped into
/// sessions by [`SessionClock::closes_session`] and multiplied out; the
/// record is dated by the session's closing step.
pub fn to_hprs(clock: &SessionClock, advices: &[Advice], slippage: f64) -> Vec<HprRecord> {
    let mut records = Vec::new();
    let mut session_steps: Vec<(NaiveDateTime, f64)> = Vec::new();

    for pair in advices.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        let step = (right.price / left.price - 1.0) * left.position
            - slippage * (right.position - left.position).abs()
            + 1.0;
        if let Some(&(last_ts, _)) = session_steps.last() {
            if clock.closes_session(last_ts, right.timestamp) {
                flush_session(&mut session_steps, &mut records);
            }
        }
        session_steps.push((right.timestamp, step));
    }
    flush_session(&mut session_steps, &mut records);
    records
}

fn flush_session(steps: &mut Vec<(NaiveDateTime, f64)>, records: &mut Vec<HprRecord>) {
    if let Some(&(last_ts, _)) = steps.last() {
        let value = steps.iter().map(|(_, step)| step).product();
        records.push(HprRecord::new(last_ts.date(), value));
        steps.clear();
    }
}

/// Flatten the position ahead of a data gap that skipped a trading day.
///
/// When the step between consecutive advices satisfies `gap` (by default
/// [`session::spans_missed_session`]), the earlier advice's position is
/// forced to zero so the uncontrolled price jump is not attributed to an
/// open position.
pub fn zero_missed_session_gaps<F>(advices: &[Advice], gap: F) -> Vec<Advice>
where
    F: Fn(NaiveDateTime, NaiveDateTime) -> bool,
{
    let mut result = Vec::with_capacity(advices.len());
    for pair in advices.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if gap(left.timestamp, right.timestamp) {
            result.push(left.with_position(0.0));
        } else {
            result.push(left.clone());
        }
    }
    if let Some(last) = advices.last() {
        result.push(last.clone());
    }
    result
}

/// Keep only records whose dates strictly increase.
///
/// Used when concatenating per-contract HPR series that overlap at roll
/// boundaries.
pub fn strictly_increasing(records: impl IntoIterator<Item = HprRecord>) -> Vec<HprRecord> {
    let mut result = Vec::new();
    let mut last: Option<NaiveDate> = None;
    for record in records {
        if last.map_or(true, |date| date < record.date) {
            last = Some(record.date);
            result.push(record);
        }
    }
    result
}

/// Compounded return over the whole series.
#[must_use]
pub fn total_hpr(records: &[HprRecord]) -> f64 {
    records.iter().map(|record| record.value).product()
}

/// Re-bucket records by a calendar period, multiplying within each bucket.
pub fn by_period<F>(records: &[HprRecord], period: F) -> Vec<HprRecord>
where
    F: Fn(NaiveDate) -> NaiveDate,
{
    let mut buckets: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        *buckets.entry(period(record.date)).or_insert(1.0) *= record.value;
    }
    buckets
        .into_iter()
        .map(|(date, value)| HprRecord::new(date, value))
        .collect()
}

/// Scale every record's excess return by a leverage factor.
#[must_use]
pub fn with_lever(records: &[HprRecord], lever: f64) -> Vec<HprRecord> {
    records
        .iter()
        .map(|record| HprRecord::new(record.date, 1.0 + lever * (record.value - 1.0)))
        .collect()
}

/// Standard deviation of log multipliers (population form).
#[must_use]
pub fn stdev(records: &[HprRecord]) -> f64 {
    let mut n = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for record in records {
        let x = record.value.ln();
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

/// Average of the worst 5% of multipliers.
///
/// Undefined (NaN) until the sample holds at least 21 records.
#[must_use]
pub fn avar(records: &[HprRecord]) -> f64 {
    if records.len() < 21 {
        return f64::NAN;
    }
    let mut values: Vec<f64> = records.iter().map(|record| record.value).collect();
    values.sort_by(f64::total_cmp);
    let take = ((values.len() - 1) as f64 * 0.05) as usize;
    values.iter().take(take).sum::<f64>() / take as f64
}

/// Risk predicate capping the log-return standard deviation.
pub fn limit_stdev(threshold: f64) -> impl Fn(&[HprRecord]) -> bool {
    move |records| stdev(records) <= threshold
}

/// Greedy leverage search.
///
/// `max_lever = 1 / (1 - min(value))` is the leverage at which the worst
/// observed session would wipe the equity. Candidate levers are scanned
/// upward in 0.1% increments of `max_lever`; the scan stops at the first
/// candidate that fails the risk predicate or reduces total compounded
/// return, and the last accepted lever is returned. The scan assumes the
/// return-vs-lever curve is unimodal, which may not hold for every input;
/// it can then return a sub-optimal lever.
pub fn optimal_lever<F>(records: &[HprRecord], risk_limit: F) -> f64
where
    F: Fn(&[HprRecord]) -> bool,
{
    let Some(min) = records
        .iter()
        .map(|record| record.value)
        .min_by(f64::total_cmp)
    else {
        return 0.0;
    };
    if min >= 1.0 {
        // No losing session: the scan bound is undefined.
        return 0.0;
    }
    let max_lever = 1.0 / (1.0 - min);

    const STEP: f64 = 0.001;
    let mut best_hpr = 1.0;
    let mut best_lever = 0.0;
    let mut ratio = STEP;
    while ratio <= 1.0 {
        let lever = max_lever * ratio;
        let levered = with_lever(records, lever);
        if !risk_limit(&levered) {
            break;
        }
        let hpr = total_hpr(&levered);
        if hpr < best_hpr {
            break;
        }
        best_hpr = hpr;
        best_lever = lever;
        ratio += STEP;
    }
    best_lever
}

/// Blend several weighted HPR series over their overlapping date range.
///
/// Per day, contributions are `weight * (value - 1)` summed across series;
/// a series missing that day contributes zero. Days absent from every
/// series are skipped entirely.
pub fn combine_weighted(series: &[Vec<HprRecord>], weights: &[f64]) -> Vec<HprRecord> {
    let start = series
        .iter()
        .filter_map(|records| records.first())
        .map(|record| record.date)
        .max();
    let finish = series
        .iter()
        .filter_map(|records| records.last())
        .map(|record| record.date)
        .min();
    let (Some(start), Some(finish)) = (start, finish) else {
        return Vec::new();
    };

    let maps: Vec<BTreeMap<NaiveDate, f64>> = series
        .iter()
        .map(|records| {
            records
                .iter()
                .map(|record| (record.date, record.value))
                .collect()
        })
        .collect();

    let mut result = Vec::new();
    let mut day = start;
    while day <= finish {
        let values: Vec<Option<f64>> = maps.iter().map(|map| map.get(&day).copied()).collect();
        if values.iter().any(Option::is_some) {
            let total: f64 = values
                .iter()
                .zip(weights)
                .map(|(value, weight)| value.map_or(0.0, |value| (value - 1.0) * weight))
                .sum();
            result.push(HprRecord::new(day, total + 1.0));
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    result
}

/// Default gap predicate for [`zero_missed_session_gaps`].
#[must_use]
pub fn missed_session_gap(left: NaiveDateTime, right: NaiveDateTime) -> bool {
    session::spans_missed_session(left, right)
}
