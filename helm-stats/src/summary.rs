//! Aggregated performance summary and drawdown analysis.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use helm_core::session;

use crate::{avar, by_period, stdev, total_hpr, HprRecord};

/// Equity drawdown profile derived from a daily HPR series.
///
/// Drawdowns are expressed as multipliers: 0.9 means the equity sits 10%
/// below its high-water mark.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct DrawdownInfo {
    pub peak_date: NaiveDate,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    pub current_drawdown_days: i64,
    pub longest_drawdown_days: i64,
}

/// Walk the log-equity curve against its running high-water mark.
///
/// Returns `None` for an empty series.
pub fn drawdown_info(records: &[HprRecord]) -> Option<DrawdownInfo> {
    let first = records.first()?;
    let mut equity = 0.0;
    let mut high_water = 0.0;
    let mut peak_date = first.date;
    let mut max_drawdown = 0.0_f64;
    let mut current_days = 0;
    let mut longest_days = 0;

    for record in records {
        equity += record.value.ln();
        if equity > high_water {
            high_water = equity;
            peak_date = record.date;
        }
        max_drawdown = max_drawdown.min(equity - high_water);
        current_days = (record.date - peak_date).num_days();
        longest_days = longest_days.max(current_days);
    }

    Some(DrawdownInfo {
        peak_date,
        max_drawdown: max_drawdown.exp(),
        current_drawdown: (equity - high_water).exp(),
        current_drawdown_days: current_days,
        longest_drawdown_days: longest_days,
    })
}

/// Full performance summary over a daily HPR series.
#[derive(Clone, Debug)]
pub struct Summary {
    /// Total return normalized to a 22-session trading month.
    pub month_hpr: f64,
    pub stdev: f64,
    pub avar: f64,
    pub day_hprs: Vec<HprRecord>,
    pub month_hprs: Vec<HprRecord>,
    pub year_geometric: Vec<HprRecord>,
    /// Yearly series where gains above flat are banked as they occur instead
    /// of staying compounded.
    pub year_harvested: Vec<HprRecord>,
    pub drawdown: Option<DrawdownInfo>,
}

impl Summary {
    pub fn compute(day_hprs: Vec<HprRecord>) -> Self {
        let month_hpr = if day_hprs.is_empty() {
            f64::NAN
        } else {
            total_hpr(&day_hprs).powf(22.0 / day_hprs.len() as f64)
        };
        let month_hprs = by_period(&day_hprs, session::last_day_of_month);
        let year_geometric = by_period(&day_hprs, session::last_day_of_year);
        let year_harvested = harvested_by_year(&month_hprs);
        Self {
            month_hpr,
            stdev: stdev(&day_hprs),
            avar: avar(&day_hprs),
            drawdown: drawdown_info(&day_hprs),
            day_hprs,
            month_hprs,
            year_geometric,
            year_harvested,
        }
    }
}

// Gains are banked whenever the running factor climbs above flat; the
// factor itself resets to 1 and keeps compounding the remainder.
fn harvested_by_year(month_hprs: &[HprRecord]) -> Vec<HprRecord> {
    let mut result: Vec<HprRecord> = Vec::new();
    let mut current: Option<NaiveDate> = None;
    let mut banked = 0.0;
    let mut running = 1.0;
    for record in month_hprs {
        let year_end = session::last_day_of_year(record.date);
        if current != Some(year_end) {
            if let Some(date) = current {
                result.push(HprRecord::new(date, banked + running));
            }
            current = Some(year_end);
            banked = 0.0;
            running = 1.0;
        }
        running *= record.value;
        if running > 1.0 {
            banked += running - 1.0;
            running = 1.0;
        }
    }
    if let Some(date) = current {
        result.push(HprRecord::new(date, banked + running));
    }
    result
}
