//! Command definitions and the wiring between config and components.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tracing::info;

use helm_advisor::{AdvisorRegistry, AdvisorService};
use helm_broker::{advice_feed, AdviceFeedSettings, AdviceTransport, PaperBroker, RestAdviceClient};
use helm_config::{load_config, AdvisorMode, AppConfig};
use helm_history::{CsvCandleProvider, HistoryService, HistorySettings, ReplaySource};

use crate::live::{run_live, run_with_feeds, AdviceFeed, ShutdownSignal};
use crate::report::run_report;
use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Helm systematic futures trading")]
pub struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default")]
    env: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay history and run the strategy against the paper broker
    DryRun,
    /// Full performance report with leverage optimization
    Report,
    /// Current positions and performance at configured leverage
    Monitor,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(Some(&cli.env)).context("failed to load configuration")?;
    let filter = match cli.verbose {
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    init_tracing(&filter, config.log_path.as_deref())?;

    match cli.command {
        Commands::DryRun => dry_run(&config).await,
        Commands::Report => {
            let advisor = build_advisor(&config);
            let history = build_history(&config);
            run_report(&config, &advisor, &history, true).await
        }
        Commands::Monitor => {
            let advisor = build_advisor(&config);
            let history = build_history(&config);
            run_report(&config, &advisor, &history, false).await
        }
    }
}

/// Signal pipeline service from the configured strategies.
pub fn build_advisor(config: &AppConfig) -> AdvisorService {
    AdvisorService::new(
        config.session.clock(),
        AdvisorRegistry::default(),
        config.strategies.clone(),
    )
}

/// Historical data service from the configured provider list.
pub fn build_history(config: &AppConfig) -> HistoryService {
    let providers = config
        .history
        .providers
        .iter()
        .map(|provider| {
            Box::new(CsvCandleProvider::new(
                provider.name.clone(),
                provider.url_template.clone(),
            )) as Box<dyn helm_history::CandleProvider>
        })
        .collect();
    HistoryService::new(
        providers,
        HistorySettings {
            retry_rounds: config.history.retry_rounds,
            initial_backoff: Duration::from_secs(config.history.initial_backoff_secs),
        },
    )
}

const DRY_RUN_AMOUNT: f64 = 1_000_000.0;

/// Replay stored history through the full live path with the paper broker.
///
/// Advice comes either from the in-process pipeline fed by a replayed
/// candle stream, or from the long-poll transport when the advisor runs in
/// a separate process. Historical timestamps would all fail the freshness
/// check, so it is effectively disabled for the run.
async fn dry_run(config: &AppConfig) -> Result<()> {
    let mut config = config.clone();
    // A century: replayed timestamps must never count as stale.
    config.execution.stale_after_secs = 3_600 * 24 * 365 * 100;

    let amount = if config.portfolio.amount > 0.0 {
        config.portfolio.amount
    } else {
        DRY_RUN_AMOUNT
    };
    let broker = Arc::new(PaperBroker::new(config.portfolio.name.clone(), amount));
    info!(amount, "dry run against the paper broker");

    match config.advisor.mode {
        AdvisorMode::Local => {
            let advisor = Arc::new(build_advisor(&config));
            let history = build_history(&config);
            let today = chrono::Local::now().date_naive();
            let replay = Arc::new(ReplaySource::new());
            let mut warmups = HashMap::new();
            for strategy in &config.strategies {
                let candles = history
                    .load_range(&strategy.security, config.history.start_date, today)
                    .await
                    .with_context(|| {
                        format!("failed to load history for {}", strategy.security)
                    })?;
                replay.insert(strategy.security.clone(), candles);
                warmups.insert(strategy.security.clone(), Vec::new());
            }
            run_live(
                &config,
                advisor,
                replay,
                warmups,
                broker,
                ShutdownSignal::new(),
            )
            .await
        }
        AdvisorMode::Rest => {
            let transport: Arc<dyn AdviceTransport> =
                Arc::new(RestAdviceClient::new(config.advisor.url.clone()));
            let securities = transport
                .securities()
                .await
                .context("failed to list advisors over the transport")?;
            let settings = AdviceFeedSettings {
                poll_timeout: Duration::from_secs(config.advisor.poll_timeout_secs),
                error_backoff: Duration::from_secs(config.advisor.error_backoff_secs),
            };
            let feeds: Vec<AdviceFeed> = securities
                .into_iter()
                .map(|security| {
                    let feed = advice_feed(transport.clone(), security.clone(), settings);
                    (security, feed)
                })
                .collect();
            run_with_feeds(&config, feeds, broker, ShutdownSignal::new()).await
        }
    }
}
