//! This module contains the core analysis pipeline logic.

use crate::fall_from_high::{FallEngine, FallReport};
use crate::klines::{PriceHistorySource, YahooChartClient};
use crate::presentation::{self, ChartSpec, FallTable};
use crate::storage_utils::AppConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Everything one run hands to the renderers.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub generated_at_ms: i64,
    pub report: FallReport,
    pub table: FallTable,
    pub chart: ChartSpec,
}

impl Dashboard {
    pub fn from_report(report: FallReport, chart_height: u32, generated_at_ms: i64) -> Self {
        let (table, chart) = presentation::render(&report.records, chart_height);
        Self {
            generated_at_ms,
            report,
            table,
            chart,
        }
    }
}

/// Runs the full pipeline against the live chart API:
/// 1. Fetches a year of daily closes for every watchlist entry.
/// 2. Computes fall metrics, turning bad instruments into warnings.
/// 3. Builds the table and chart descriptions.
pub async fn run_analysis_pipeline(config: &AppConfig) -> Result<Dashboard> {
    let client = Client::builder()
        .user_agent(config.fetch.user_agent.clone())
        .timeout(Duration::from_secs(config.fetch.timeout_secs))
        .pool_max_idle_per_host(config.fetch.concurrency)
        .build()
        .context("building HTTP client")?;

    let engine = FallEngine::new(YahooChartClient::new(client, &config.fetch), &config.fetch);
    Ok(build_dashboard(&engine, config).await)
}

pub async fn build_dashboard<S: PriceHistorySource>(
    engine: &FallEngine<S>,
    config: &AppConfig,
) -> Dashboard {
    tracing::info!(instruments = config.watchlist.len(), "Running fall analysis");
    let report = engine.compute(&config.watchlist).await;
    Dashboard::from_report(
        report,
        config.chart.height,
        chrono::Utc::now().timestamp_millis(),
    )
}
