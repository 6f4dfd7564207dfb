//! Core data types shared by the loader, the indicator engine and the renderers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ParseError;

/// One trading day.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Daily bars for one ticker over one period, ascending by date with no duplicate dates.
///
/// Built once per query and never mutated afterwards; the bars are only reachable
/// through a shared slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    ticker: String,
    period: Period,
    bars: Vec<Bar>,
}

impl Series {
    /// Sorts the bars by date and collapses duplicate dates, keeping the last row seen.
    pub fn new(ticker: impl Into<String>, period: Period, mut bars: Vec<Bar>) -> Self {
        // stable sort keeps provider order among equal dates
        bars.sort_by_key(|b| b.date);
        let mut compacted: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match compacted.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => compacted.push(bar),
            }
        }
        Self {
            ticker: ticker.into(),
            period,
            bars: compacted,
        }
    }

    pub fn empty(ticker: impl Into<String>, period: Period) -> Self {
        Self::new(ticker, period, Vec::new())
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }
}

/// Trailing lookback window accepted by the market-data provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    OneDay,
    #[default]
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::OneDay,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::SixMonths,
        Period::OneYear,
        Period::TwoYears,
        Period::FiveYears,
    ];

    /// Token understood by the provider's `range` parameter.
    pub fn token(self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
        }
    }

    pub fn next(self) -> Period {
        let idx = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn previous(self) -> Period {
        let idx = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Period {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.token() == wanted)
            .ok_or_else(|| ParseError::Period(s.to_string()))
    }
}

/// The fixed menu of indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    MovingAverage,
    Rsi,
    Macd,
    Bollinger,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::MovingAverage,
        Indicator::Rsi,
        Indicator::Macd,
        Indicator::Bollinger,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Indicator::MovingAverage => "Moving Average (14)",
            Indicator::Rsi => "RSI (14)",
            Indicator::Macd => "MACD (12, 26, 9)",
            Indicator::Bollinger => "Bollinger Bands (20, 2)",
        }
    }
}

impl FromStr for Indicator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sma" | "ma" | "moving_average" => Ok(Indicator::MovingAverage),
            "rsi" => Ok(Indicator::Rsi),
            "macd" => Ok(Indicator::Macd),
            "bollinger" | "bb" | "bbands" => Ok(Indicator::Bollinger),
            other => Err(ParseError::Indicator(other.to_string())),
        }
    }
}

/// Set of selected indicators, kept in menu order regardless of toggle order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Indicator>", into = "Vec<Indicator>")]
pub struct IndicatorSelection(Vec<Indicator>);

impl From<Vec<Indicator>> for IndicatorSelection {
    fn from(items: Vec<Indicator>) -> Self {
        Self::from_indicators(items)
    }
}

impl From<IndicatorSelection> for Vec<Indicator> {
    fn from(selection: IndicatorSelection) -> Self {
        selection.0
    }
}

impl IndicatorSelection {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn all() -> Self {
        Self(Indicator::ALL.to_vec())
    }

    pub fn from_indicators<I: IntoIterator<Item = Indicator>>(items: I) -> Self {
        let mut selection = Self::none();
        for item in items {
            selection.insert(item);
        }
        selection
    }

    /// Parses a comma separated list such as `sma,rsi`. An empty string selects nothing.
    pub fn parse_list(list: &str) -> Result<Self, ParseError> {
        let items = list
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Indicator>, _>>()?;
        Ok(Self::from_indicators(items))
    }

    pub fn contains(&self, indicator: Indicator) -> bool {
        self.0.contains(&indicator)
    }

    pub fn insert(&mut self, indicator: Indicator) {
        if !self.contains(indicator) {
            self.0.push(indicator);
            self.0.sort_by_key(|i| Indicator::ALL.iter().position(|a| a == i));
        }
    }

    pub fn toggle(&mut self, indicator: Indicator) {
        if self.contains(indicator) {
            self.0.retain(|i| *i != indicator);
        } else {
            self.insert(indicator);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Indicator> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
