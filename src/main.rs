mod analysis;
mod cache;
mod chart;
mod cli;
mod errors;
mod export;
mod forecast;
mod indicators;
mod market_data;
mod models;
mod news;
mod raster;
mod report_table;
mod storage_utils;
mod tui;

use anyhow::Context;
use clap::Parser;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::analysis::{Analysis, Services};
use crate::cache::SeriesCache;
use crate::cli::{Cli, Command};
use crate::market_data::{YahooProvider, normalize_ticker};
use crate::news::NewsClient;
use crate::storage_utils::{AppConfig, AsyncStorageManager};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Logs go to a file while the alternate screen is up, to stderr otherwise.
fn init_tracing(storage: &AsyncStorageManager, interactive: bool) -> anyhow::Result<()> {
    if interactive {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(storage.base_dir.join("dashboard.log"))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let provider = YahooProvider::new(&config.provider)?;
    let news = NewsClient::new(&config.news, config.news_api_key())?;
    Ok(Services {
        provider: Arc::new(provider),
        news: Arc::new(news),
    })
}

fn build_cache(config: &AppConfig) -> SeriesCache {
    SeriesCache::new(config.cache.ttl_secs.map(Duration::from_secs))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let interactive = matches!(cli.command, None | Some(Command::Tui));
    init_tracing(&storage, interactive)?;

    let config = storage.load_config().await?;
    let services = build_services(&config)?;
    info!(base_url = %config.provider.base_url, "Starting ticker-dashboard");

    match cli.command {
        None | Some(Command::Tui) => {
            let cache = build_cache(&config);
            if let Err(e) = tui::run_tui(config, storage, services, cache).await {
                error!(error = %e, "Dashboard exited with an error");
                return Err(e);
            }
        }
        Some(Command::Show {
            ticker,
            period,
            indicators,
            rows,
        }) => {
            let ticker = normalize_ticker(&ticker)?;
            let period = period.unwrap_or(config.default_period);
            let selection = indicators.unwrap_or_else(|| config.default_indicators.clone());
            let mut cache = build_cache(&config);

            let series = analysis::load_series(services.provider.as_ref(), &mut cache, &ticker, period)
                .await
                .context("could not load data")?;
            let extras = analysis::fetch_extras(&services, &ticker).await;
            let analysis = Analysis::compute(series, &selection);
            println!("{}", report_table::render_report(&analysis, &extras, rows));
        }
        Some(Command::Export {
            ticker,
            period,
            indicators,
            format,
            out,
        }) => {
            let ticker = normalize_ticker(&ticker)?;
            let period = period.unwrap_or(config.default_period);
            let selection = indicators.unwrap_or_else(|| config.default_indicators.clone());
            let mut cache = build_cache(&config);

            let series = analysis::load_series(services.provider.as_ref(), &mut cache, &ticker, period)
                .await
                .context("could not load data")?;
            if series.is_empty() {
                println!("No data for {} over {}.", ticker, period);
                return Ok(());
            }
            let analysis = Analysis::compute(series, &selection);
            let dir = out.unwrap_or_else(|| storage.export_dir(&config));
            let path = export::write_export(
                &storage,
                &dir,
                &analysis.series,
                &analysis.frame,
                format,
                (config.chart.width, config.chart.height),
            )
            .await?;
            println!("Saved {}", path.display());
        }
        Some(Command::News { ticker }) => {
            let ticker = normalize_ticker(&ticker)?;
            match services.news.headlines(&ticker).await {
                Some(articles) if !articles.is_empty() => {
                    println!("\n{}", report_table::news_table(&articles));
                }
                _ => println!("No news available right now."),
            }
        }
    }

    Ok(())
}
