pub mod cli;
pub mod core;
pub mod providers;

use crate::core::aggregator::MultiSourceQuoteAggregator;
use crate::core::config::AppConfig;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Default history window for the heatmap, in Yahoo range syntax.
pub const DEFAULT_HEATMAP_RANGE: &str = "5y";

pub enum AppCommand {
    Returns,
    Quote { tickers: Vec<String> },
    Heatmap { ticker: String, range: String },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("atlas starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Returns => {
            let aggregator = build_aggregator(&config)?;
            cli::returns::run(&config.portfolios, &aggregator).await
        }
        AppCommand::Quote { tickers } => {
            let aggregator = build_aggregator(&config)?;
            cli::quote::run(&tickers, &aggregator).await
        }
        AppCommand::Heatmap { ticker, range } => {
            let provider = providers::history_provider(&config)?;
            cli::heatmap::run(&ticker, &range, &provider).await
        }
    }
}

pub fn build_aggregator(config: &AppConfig) -> Result<MultiSourceQuoteAggregator> {
    let registry = providers::build_registry(config)?;
    Ok(MultiSourceQuoteAggregator::new(
        Arc::new(registry),
        config.aggregation.clone(),
    ))
}
