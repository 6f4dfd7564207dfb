//! Serializes the displayed series to CSV or PNG bytes.
//!
//! Exporters only borrow the [`Series`]; nothing here can change what is on screen.

use clap::ValueEnum;
use std::path::PathBuf;
use tracing::info;

use crate::chart::ChartModel;
use crate::errors::ExportError;
use crate::indicators::IndicatorFrame;
use crate::models::Series;
use crate::raster;
use crate::storage_utils::AsyncStorageManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Png,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Png => "png",
        }
    }
}

/// Header row plus one row per bar; undefined indicator points are empty cells.
pub fn to_csv(series: &Series, frame: &IndicatorFrame) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Date", "Open", "High", "Low", "Close", "Volume"];
    header.extend(frame.columns().iter().map(|c| c.name));
    writer.write_record(&header)?;

    for (i, bar) in series.bars().iter().enumerate() {
        let mut record = vec![
            bar.date.format("%Y-%m-%d").to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ];
        for column in frame.columns() {
            record.push(
                column
                    .values
                    .get(i)
                    .copied()
                    .flatten()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

pub fn to_png(
    series: &Series,
    frame: &IndicatorFrame,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ExportError> {
    let model = ChartModel::build(series, frame);
    raster::encode_png(&model, width, height)
}

pub fn file_name(series: &Series, format: ExportFormat) -> String {
    let stem: String = series
        .ticker()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}.{}", stem, series.period(), format.extension())
}

/// Encodes and writes an export, returning the final path.
pub async fn write_export(
    storage: &AsyncStorageManager,
    dir: &std::path::Path,
    series: &Series,
    frame: &IndicatorFrame,
    format: ExportFormat,
    size: (u32, u32),
) -> anyhow::Result<PathBuf> {
    if series.is_empty() {
        return Err(ExportError::EmptySeries(series.ticker().to_string()).into());
    }
    let bytes = match format {
        ExportFormat::Csv => to_csv(series, frame)?,
        ExportFormat::Png => to_png(series, frame, size.0, size.1)?,
    };
    let target = dir.join(file_name(series, format));
    let path = storage
        .save_bytes(&target.to_string_lossy(), &bytes)
        .await?;
    info!(path = %path.display(), bytes = bytes.len(), "Export written");
    Ok(path)
}
