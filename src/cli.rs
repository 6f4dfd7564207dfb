use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::export::ExportFormat;
use crate::models::{IndicatorSelection, Period};

#[derive(Parser, Debug)]
#[command(
    name = "ticker-dashboard",
    version,
    about = "Candlestick charts and technical indicators for exchange-listed equities"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive dashboard (default)
    Tui,
    /// Print the latest bars, indicators, fundamentals and news for a ticker
    Show {
        ticker: String,
        #[arg(short, long)]
        period: Option<Period>,
        /// Comma separated: sma,rsi,macd,bollinger
        #[arg(short, long, value_parser = IndicatorSelection::parse_list)]
        indicators: Option<IndicatorSelection>,
        /// Number of most recent bars to print
        #[arg(short, long, default_value_t = 15)]
        rows: usize,
    },
    /// Write the series (CSV) or the chart (PNG) to disk
    Export {
        ticker: String,
        #[arg(short, long)]
        period: Option<Period>,
        #[arg(short, long, value_parser = IndicatorSelection::parse_list)]
        indicators: Option<IndicatorSelection>,
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output directory (defaults to the configured export dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Latest headlines for a ticker
    News { ticker: String },
}
