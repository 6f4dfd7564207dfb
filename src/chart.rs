//! Renderer-neutral chart description.
//!
//! The candlestick owns the primary price axis: its range comes from bar lows and
//! highs only, so price-unit overlays (moving average, Bollinger bands) are drawn
//! inside it and clipped instead of stretching it. Indicators on a different scale
//! get their own secondary axis.

use chrono::NaiveDate;

use crate::indicators::{
    COL_BB_MIDDLE, COL_BB_UPPER, COL_MACD, COL_RSI, COL_SIGNAL, IndicatorFrame,
};
use crate::models::{Indicator, Series};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceColor {
    Blue,
    Green,
    Orange,
    Purple,
    Red,
    Yellow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisId {
    Price,
    Rsi,
    Macd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineTrace {
    pub name: &'static str,
    pub axis: AxisId,
    pub color: TraceColor,
    pub points: Vec<Option<f64>>,
}

/// An independently scaled value axis below the price panel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryAxis {
    pub id: AxisId,
    pub title: &'static str,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartModel {
    pub title: String,
    pub dates: Vec<NaiveDate>,
    pub candles: Vec<Candle>,
    pub overlays: Vec<LineTrace>,
    pub price_range: (f64, f64),
    pub secondary_axes: Vec<SecondaryAxis>,
}

impl ChartModel {
    pub fn build(series: &Series, frame: &IndicatorFrame) -> Self {
        let candles: Vec<Candle> = series
            .bars()
            .iter()
            .map(|b| Candle {
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
            })
            .collect();

        let overlays: Vec<LineTrace> = frame
            .columns()
            .iter()
            .map(|col| {
                let (axis, color, name) = trace_style(col.indicator, col.name);
                LineTrace {
                    name,
                    axis,
                    color,
                    points: col.values.clone(),
                }
            })
            .collect();

        let mut secondary_axes = Vec::new();
        if frame.column(COL_RSI).is_some() {
            secondary_axes.push(SecondaryAxis {
                id: AxisId::Rsi,
                title: "RSI",
                min: 0.0,
                max: 100.0,
            });
        }
        if frame.column(COL_MACD).is_some() {
            let (min, max) = padded_range(
                overlays
                    .iter()
                    .filter(|t| t.axis == AxisId::Macd)
                    .flat_map(|t| t.points.iter().flatten().copied()),
            )
            .unwrap_or((-1.0, 1.0));
            secondary_axes.push(SecondaryAxis {
                id: AxisId::Macd,
                title: "MACD",
                min,
                max,
            });
        }

        let price_range = padded_range(candles.iter().flat_map(|c| [c.low, c.high]))
            .unwrap_or((0.0, 1.0));

        Self {
            title: format!("{} · {}", series.ticker(), series.period()),
            dates: series.bars().iter().map(|b| b.date).collect(),
            candles,
            overlays,
            price_range,
            secondary_axes,
        }
    }

    /// Number of traces including the candlestick.
    pub fn trace_count(&self) -> usize {
        1 + self.overlays.len()
    }

    pub fn traces_on(&self, axis: AxisId) -> impl Iterator<Item = &LineTrace> {
        self.overlays.iter().filter(move |t| t.axis == axis)
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

fn trace_style(indicator: Indicator, column: &'static str) -> (AxisId, TraceColor, &'static str) {
    match indicator {
        Indicator::MovingAverage => (AxisId::Price, TraceColor::Blue, "Moving Average"),
        Indicator::Rsi => (AxisId::Rsi, TraceColor::Green, "RSI"),
        Indicator::Macd if column == COL_SIGNAL => (AxisId::Macd, TraceColor::Purple, "Signal"),
        Indicator::Macd => (AxisId::Macd, TraceColor::Orange, "MACD"),
        Indicator::Bollinger => match column {
            COL_BB_UPPER => (AxisId::Price, TraceColor::Red, "Upper Band"),
            COL_BB_MIDDLE => (AxisId::Price, TraceColor::Yellow, "Middle Band"),
            _ => (AxisId::Price, TraceColor::Red, "Lower Band"),
        },
    }
}

/// Min/max with 5% headroom; a flat range is widened so it never collapses.
fn padded_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
    let span = max - min;
    let pad = if span > 0.0 {
        span * 0.05
    } else {
        (max.abs() * 0.01).max(0.5)
    };
    Some((min - pad, max + pad))
}
