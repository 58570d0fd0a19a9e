//! CSV-over-HTTP candle provider for the public archive endpoints.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use helm_core::Candle;

use crate::{CandleProvider, HistoryError, HistoryResult};

/// Downloads candle exports served as CSV text.
///
/// The URL template supports `{security}`, `{from}` and `{to}` placeholders;
/// dates are substituted as `dd.mm.yyyy`. Rows are expected in the common
/// export layout `ticker,period,date,time,open,high,low,close,volume` with
/// `yyyymmdd`/`hhmmss` date and time fields; rows that do not parse are
/// skipped.
pub struct CsvCandleProvider {
    name: String,
    client: reqwest::Client,
    url_template: String,
}

impl CsvCandleProvider {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            url_template: url_template.into(),
        }
    }

    fn url(&self, security: &str, from: NaiveDate, to: NaiveDate) -> String {
        self.url_template
            .replace("{security}", security)
            .replace("{from}", &from.format("%d.%m.%Y").to_string())
            .replace("{to}", &to.format("%d.%m.%Y").to_string())
    }
}

#[async_trait]
impl CandleProvider for CsvCandleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        security: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> HistoryResult<Vec<Candle>> {
        let url = self.url(security, from, to);
        debug!(provider = %self.name, %url, "requesting candle export");
        let text = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| HistoryError::Transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| HistoryError::Transport(err.to_string()))?
            .text()
            .await
            .map_err(|err| HistoryError::Transport(err.to_string()))?;
        parse_candles(security, &text)
    }
}

pub(crate) fn parse_candles(security: &str, text: &str) -> HistoryResult<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut candles = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| HistoryError::Parse(err.to_string()))?;
        if let Some(candle) = parse_record(security, &record) {
            candles.push(candle);
        }
    }
    Ok(candles)
}

fn parse_record(security: &str, record: &csv::StringRecord) -> Option<Candle> {
    if record.len() < 9 {
        return None;
    }
    let date = NaiveDate::parse_from_str(record.get(2)?.trim(), "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(record.get(3)?.trim(), "%H%M%S").ok()?;
    let close = record.get(7)?.trim().parse::<f64>().ok()?;
    let volume = record.get(8)?.trim().parse::<f64>().ok()?;
    Some(Candle {
        security: security.to_string(),
        timestamp: date.and_time(time),
        close,
        volume,
    })
}
