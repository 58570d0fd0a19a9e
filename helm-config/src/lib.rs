//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveTime;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use helm_core::{SessionClock, StrategyConfig};

/// Root application configuration deserialized from layered sources.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortfolioConfig {
    #[serde(default)]
    pub name: String,
    /// Overrides the broker-reported notional when positive.
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub amount_reduction: f64,
    #[serde(default)]
    pub max_amount: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            amount: 0.0,
            amount_reduction: 0.0,
            max_amount: 0.0,
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_min_order_interval_secs")]
    pub min_order_interval_secs: u64,
    #[serde(default = "default_verify_delay_secs")]
    pub verify_delay_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage: default_slippage(),
            stale_after_secs: default_stale_after_secs(),
            min_order_interval_secs: default_min_order_interval_secs(),
            verify_delay_secs: default_verify_delay_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_main_session_end")]
    pub main_session_end: NaiveTime,
    #[serde(default = "default_rebalance_times")]
    pub rebalance_times: Vec<NaiveTime>,
    /// Zero positions ahead of data gaps spanning a missed trading day.
    #[serde(default = "default_holiday_correction")]
    pub holiday_correction: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            main_session_end: default_main_session_end(),
            rebalance_times: default_rebalance_times(),
            holiday_correction: default_holiday_correction(),
        }
    }
}

impl SessionConfig {
    pub fn clock(&self) -> SessionClock {
        SessionClock {
            main_session_end: self.main_session_end,
            rebalance_times: self.rebalance_times.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorMode {
    /// Run the signal pipeline inside this process.
    Local,
    /// Long-poll a separate advisor process.
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorConfig {
    #[serde(default = "default_advisor_mode")]
    pub mode: AdvisorMode,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            mode: default_advisor_mode(),
            url: String::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            error_backoff_secs: default_poll_backoff_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryProviderConfig {
    pub name: String,
    pub url_template: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Providers in priority order.
    #[serde(default)]
    pub providers: Vec<HistoryProviderConfig>,
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_history_start")]
    pub start_date: chrono::NaiveDate,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            retry_rounds: default_retry_rounds(),
            initial_backoff_secs: default_initial_backoff_secs(),
            start_date: default_history_start(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_slippage")]
    pub slippage: f64,
    /// Daily log-return stdev cap used by the leverage optimizer.
    #[serde(default = "default_stdev_limit")]
    pub stdev_limit: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            slippage: default_report_slippage(),
            stdev_limit: default_stdev_limit(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_slippage() -> f64 {
    0.001
}

fn default_stale_after_secs() -> u64 {
    540
}

fn default_min_order_interval_secs() -> u64 {
    60
}

fn default_verify_delay_secs() -> u64 {
    30
}

fn default_main_session_end() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_rebalance_times() -> Vec<NaiveTime> {
    vec![
        NaiveTime::from_hms_opt(12, 30, 0).unwrap_or(NaiveTime::MIN),
        NaiveTime::from_hms_opt(16, 30, 0).unwrap_or(NaiveTime::MIN),
    ]
}

fn default_holiday_correction() -> bool {
    true
}

fn default_advisor_mode() -> AdvisorMode {
    AdvisorMode::Local
}

fn default_poll_timeout_secs() -> u64 {
    90
}

fn default_poll_backoff_secs() -> u64 {
    180
}

fn default_retry_rounds() -> u32 {
    3
}

fn default_initial_backoff_secs() -> u64 {
    20
}

fn default_history_start() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2009, 1, 1).unwrap_or(chrono::NaiveDate::MIN)
}

fn default_report_slippage() -> f64 {
    0.0002
}

fn default_stdev_limit() -> f64 {
    0.045
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `HELM__`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }
    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));
    builder = builder.add_source(
        Environment::with_prefix("HELM")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

/// Parse a complete configuration from a TOML string. Used by tests and by
/// deployments that inline their config.
pub fn parse_config(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_level = "debug"

[portfolio]
name = "SPBFUT00"
weight = 0.75

[execution]
slippage = 0.0005

[session]
main_session_end = "18:45:00"
rebalance_times = ["12:30:00", "16:30:00"]

[advisor]
mode = "rest"
url = "http://127.0.0.1:8085"

[[history.providers]]
name = "archive"
url_template = "https://example.net/export?code={security}&df={from}&dt={to}"

[[strategies]]
name = "dual"
security = "Si-3.18"
weight = 0.75

[[strategies]]
name = "dual"
security = "Eu-3.18"
weight = 0.25
direction = "long_only"
"#;

    #[test]
    fn sample_config_round_trips() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.portfolio.name, "SPBFUT00");
        assert_eq!(config.portfolio.weight, 0.75);
        assert_eq!(config.execution.slippage, 0.0005);
        // Untouched knobs keep their documented defaults.
        assert_eq!(config.execution.min_order_interval_secs, 60);
        assert_eq!(config.advisor.mode, AdvisorMode::Rest);
        assert_eq!(config.history.providers.len(), 1);
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(
            config.session.clock().main_session_end,
            NaiveTime::from_hms_opt(18, 45, 0).unwrap()
        );
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.strategies.is_empty());
        assert_eq!(config.execution.stale_after_secs, 540);
        assert_eq!(config.report.stdev_limit, 0.045);
        assert!(config.session.holiday_correction);
    }
}
