//! Exchange session calendar.
//!
//! Candle timestamps are exchange-local, so session membership is a pure
//! time-of-day question. The defaults describe the derivatives market this
//! was built for (main session until 19:00, clearing breaks at 12:30 and
//! 16:30), but both boundaries are configurable per deployment.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Session boundaries used by the signal pipeline and the statistics engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionClock {
    /// Candles at or after this time of day belong to the evening session.
    pub main_session_end: NaiveTime,
    /// Intraday checkpoints whose crossing triggers a rebalance event.
    pub rebalance_times: Vec<NaiveTime>,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self {
            main_session_end: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN),
            rebalance_times: vec![
                NaiveTime::from_hms_opt(12, 30, 0).unwrap_or(NaiveTime::MIN),
                NaiveTime::from_hms_opt(16, 30, 0).unwrap_or(NaiveTime::MIN),
            ],
        }
    }
}

impl SessionClock {
    /// True when the timestamp falls inside the main trading session.
    #[must_use]
    pub fn is_main_session(&self, ts: NaiveDateTime) -> bool {
        ts.time() < self.main_session_end
    }

    /// True when the calendar date advanced between two timestamps.
    #[must_use]
    pub fn is_new_day(&self, left: NaiveDateTime, right: NaiveDateTime) -> bool {
        left.date() < right.date()
    }

    /// True when the step from `left` to `right` closes a trading session:
    /// the left side was inside the main session and the right side either
    /// left it or belongs to a later calendar date.
    #[must_use]
    pub fn closes_session(&self, left: NaiveDateTime, right: NaiveDateTime) -> bool {
        self.is_main_session(left)
            && (!self.is_main_session(right) || self.is_new_day(left, right))
    }

    /// True when the time of day crossed one of the rebalance checkpoints
    /// between two consecutive candles.
    #[must_use]
    pub fn crossed_checkpoint(&self, left: NaiveDateTime, right: NaiveDateTime) -> bool {
        self.rebalance_times
            .iter()
            .any(|checkpoint| left.time() < *checkpoint && *checkpoint <= right.time())
    }
}

/// Saturday or Sunday.
#[must_use]
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// True when the open interval between two advice timestamps contains at
/// least one non-weekend day with no local trading, i.e. other markets moved
/// while this one was closed.
#[must_use]
pub fn spans_missed_session(left: NaiveDateTime, right: NaiveDateTime) -> bool {
    let end = right.date();
    let mut day = match left.date().succ_opt() {
        Some(day) => day,
        None => return false,
    };
    while day < end {
        if !is_weekend(day) {
            return true;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => return false,
        };
    }
    false
}

/// Last calendar day of the month containing `date`.
#[must_use]
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = (date.year(), date.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// Last calendar day of the year containing `date`.
#[must_use]
pub fn last_day_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date)
}
