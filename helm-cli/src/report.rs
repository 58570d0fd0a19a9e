//! Tabular performance reports over replayed history.

use anyhow::{Context, Result};

use helm_advisor::AdvisorService;
use helm_config::AppConfig;
use helm_history::HistoryService;
use helm_stats::{
    combine_weighted, limit_stdev, missed_session_gap, optimal_lever, strictly_increasing,
    to_hprs, with_lever, zero_missed_session_gaps, HprRecord, Summary,
};

/// Replay every configured strategy and print per-security and combined
/// performance.
///
/// With `optimize_lever` the leverage optimizer picks each security's lever
/// under the configured stdev cap (the full report); without it the
/// configured levers are taken as-is (the monitoring view).
pub async fn run_report(
    config: &AppConfig,
    advisor: &AdvisorService,
    history: &HistoryService,
    optimize_lever: bool,
) -> Result<()> {
    let clock = config.session.clock();
    let today = chrono::Local::now().date_naive();

    let mut rows = Vec::new();
    let mut series = Vec::new();
    let mut weights = Vec::new();
    for strategy in &config.strategies {
        let candles = history
            .load_range(&strategy.security, config.history.start_date, today)
            .await
            .with_context(|| format!("failed to load history for {}", strategy.security))?;
        let mut advices = advisor.replay(&strategy.security, &candles)?;
        if config.session.holiday_correction {
            advices = zero_missed_session_gaps(&advices, missed_session_gap);
        }
        let last_position = advices.last().map_or(0.0, |advice| advice.position);

        let mut hprs = strictly_increasing(to_hprs(&clock, &advices, config.report.slippage));
        let lever = if optimize_lever {
            let lever = optimal_lever(&hprs, limit_stdev(config.report.stdev_limit));
            hprs = with_lever(&hprs, lever);
            lever
        } else {
            strategy.lever
        };
        let summary = Summary::compute(hprs.clone());

        rows.push(summary_row(strategy, lever, last_position, &summary));
        series.push(hprs);
        weights.push(strategy.weight);
    }

    println!(
        "{}",
        format_table(
            &[
                "Name", "Sec", "W", "Lev", "Pos", "Month", "LastDay", "High", "DD", "MaxDD",
            ],
            rows,
        )
    );

    let combined = combine_weighted(&series, &weights);
    print_summary(&Summary::compute(combined));
    Ok(())
}

fn summary_row(
    strategy: &helm_core::StrategyConfig,
    lever: f64,
    position: f64,
    summary: &Summary,
) -> Vec<String> {
    let (high, dd, max_dd) = summary.drawdown.as_ref().map_or_else(
        || ("-".to_string(), "-".to_string(), "-".to_string()),
        |dd| {
            (
                dd.peak_date.to_string(),
                pct(dd.current_drawdown),
                pct(dd.max_drawdown),
            )
        },
    );
    vec![
        strategy.name.clone(),
        strategy.security.clone(),
        format!("{:.2}", strategy.weight),
        format!("{lever:.1}"),
        format!("{position:.2}"),
        pct(summary.month_hpr),
        summary.day_hprs.last().map_or("-".to_string(), |record| {
            pct(record.value)
        }),
        high,
        dd,
        max_dd,
    ]
}

/// Textual rundown of one HPR summary: headline numbers, recent series and
/// the drawdown profile.
pub fn print_summary(summary: &Summary) {
    println!(
        "Normalized monthly return: {}",
        pct(summary.month_hpr)
    );
    println!("Daily log-return stdev: {:.2}%", summary.stdev * 100.0);
    if summary.avar.is_nan() {
        println!("Average loss among worst 5% of days: n/a (needs 21+ days)");
    } else {
        println!(
            "Average loss among worst 5% of days: {}",
            pct(summary.avar)
        );
    }

    let recent_start = summary.day_hprs.len().saturating_sub(21);
    print_hprs("Recent days", &summary.day_hprs[recent_start..]);
    print_hprs("Months", &summary.month_hprs);
    print_hprs("Years (geometric)", &summary.year_geometric);
    print_hprs("Years (harvested)", &summary.year_harvested);

    if let Some(dd) = &summary.drawdown {
        println!("Longest drawdown: {} days", dd.longest_drawdown_days);
        println!("Max drawdown: {}", pct(dd.max_drawdown));
        println!(
            "Current drawdown: {} ({} days since {})",
            pct(dd.current_drawdown),
            dd.current_drawdown_days,
            dd.peak_date
        );
    }
}

fn print_hprs(title: &str, records: &[HprRecord]) {
    println!("{title}:");
    println!(
        "{}",
        format_table(
            &["Date", "PnL"],
            records
                .iter()
                .rev()
                .map(|record| vec![record.date.to_string(), pct(record.value)]),
        )
    );
}

fn pct(value: f64) -> String {
    format!("{:+.1}%", (value - 1.0) * 100.0)
}

/// Fixed-width table with left-aligned columns and a header row.
pub fn format_table(
    headers: &[&str],
    rows: impl IntoIterator<Item = Vec<String>>,
) -> String {
    let rows: Vec<Vec<String>> = rows.into_iter().collect();
    let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
    for row in &rows {
        for (index, cell) in row.iter().enumerate() {
            if index < widths.len() {
                widths[index] = widths[index].max(cell.len());
            }
        }
    }
    let mut output = String::new();
    let render = |cells: Vec<String>, output: &mut String| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        output.push_str(line.join("  ").trim_end());
        output.push('\n');
    };
    render(
        headers.iter().map(|header| header.to_string()).collect(),
        &mut output,
    );
    for row in rows {
        render(row, &mut output);
    }
    output
}
