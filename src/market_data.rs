//! Daily bar and fundamentals retrieval from the Yahoo Finance HTTP API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{ParseError, ProviderError};
use crate::models::{Bar, Period, Series};
use crate::storage_utils::ProviderConfig;

const USER_AGENT: &str = concat!("ticker-dashboard/", env!("CARGO_PKG_VERSION"));

static TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9^][A-Z0-9.\-^=]{0,19}$").expect("static regex"));

/// Upper-cases and validates a user-entered ticker such as `petr4.sa` or `^bvsp`.
pub fn normalize_ticker(input: &str) -> Result<String, ParseError> {
    let ticker = input.trim().to_ascii_uppercase();
    if TICKER_RE.is_match(&ticker) {
        Ok(ticker)
    } else {
        Err(ParseError::Ticker(input.to_string()))
    }
}

/// Headline valuation figures. `None` renders as `N/A`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fundamentals {
    pub trailing_pe: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_revenue: Option<f64>,
    pub net_income: Option<f64>,
}

impl Fundamentals {
    /// Label/value pairs in display order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("P/E", fmt_plain(self.trailing_pe)),
            ("Dividend Yield", fmt_percent(self.dividend_yield)),
            ("Market Cap", fmt_large(self.market_cap)),
            ("Revenue", fmt_large(self.total_revenue)),
            ("Net Income", fmt_large(self.net_income)),
        ]
    }
}

fn fmt_plain(v: Option<f64>) -> String {
    v.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v))
}

fn fmt_percent(v: Option<f64>) -> String {
    v.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}%", v * 100.0))
}

fn fmt_large(v: Option<f64>) -> String {
    let Some(v) = v else {
        return "N/A".to_string();
    };
    let abs = v.abs();
    if abs >= 1e12 {
        format!("{:.2}T", v / 1e12)
    } else if abs >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else {
        format!("{:.0}", v)
    }
}

/// Source of daily bars and fundamentals.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Daily bars for `ticker` over `period`. Unknown symbols yield an empty series.
    async fn fetch_series(&self, ticker: &str, period: Period) -> Result<Series, ProviderError>;

    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Fundamentals, ProviderError>;
}

// --- Wire format ---

/// A provider cell that may be a number, a numeric string, or null.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Lenient(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Lenient;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, a numeric string, or null")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v as f64)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Lenient(Some(v as f64)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(Lenient(None))
        } else {
            v.trim().parse::<f64>().map(|f| Lenient(Some(f))).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Lenient(None))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(Lenient(None))
    }
}

impl<'de> Deserialize<'de> for Lenient {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor)
    }
}

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

impl ApiErrorBody {
    fn is_not_found(&self) -> bool {
        self.code.eq_ignore_ascii_case("Not Found")
    }
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug, Default)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<Lenient>,
    #[serde(default)]
    high: Vec<Lenient>,
    #[serde(default)]
    low: Vec<Lenient>,
    #[serde(default)]
    close: Vec<Lenient>,
    #[serde(default)]
    volume: Vec<Lenient>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SummaryEnvelope {
    quote_summary: SummaryBody,
}

#[derive(Deserialize, Debug)]
struct SummaryBody {
    #[serde(default)]
    result: Option<Vec<SummaryResult>>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    #[serde(default)]
    summary_detail: SummaryDetail,
    #[serde(default)]
    default_key_statistics: KeyStatistics,
    #[serde(default)]
    financial_data: FinancialData,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    #[serde(default, rename = "trailingPE")]
    trailing_pe: RawValue,
    #[serde(default)]
    dividend_yield: RawValue,
    #[serde(default)]
    market_cap: RawValue,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct KeyStatistics {
    #[serde(default)]
    net_income_to_common: RawValue,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    #[serde(default)]
    total_revenue: RawValue,
}

/// Yahoo wraps figures as `{"raw": 1.0, "fmt": "1.00"}`; an empty object means unknown.
#[derive(Deserialize, Debug, Default)]
struct RawValue {
    #[serde(default)]
    raw: Lenient,
}

impl RawValue {
    fn get(&self) -> Option<f64> {
        self.raw.0.filter(|v| v.is_finite())
    }
}

// --- Filtering ---

/// One provider row before validation; any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawBar {
    /// `None` for non-trading rows: a missing or non-finite field, or zero volume.
    pub fn into_bar(self) -> Option<Bar> {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        let volume = finite(self.volume).filter(|v| *v >= 0.0)?.round() as u64;
        // fractional volumes below one share count as no trading
        if volume == 0 {
            return None;
        }
        Some(Bar {
            date: self.date,
            open: finite(self.open)?,
            high: finite(self.high)?,
            low: finite(self.low)?,
            close: finite(self.close)?,
            volume,
        })
    }
}

/// Drops non-trading rows and builds the ordered series.
pub fn filter_trading_rows(ticker: &str, period: Period, rows: Vec<RawBar>) -> Series {
    let total = rows.len();
    let bars: Vec<Bar> = rows.into_iter().filter_map(RawBar::into_bar).collect();
    debug!(ticker, total, kept = bars.len(), "Filtered provider rows");
    Series::new(ticker, period, bars)
}

fn raw_rows(result: &ChartResult) -> Vec<RawBar> {
    let Some(quote) = result.indicators.quote.first() else {
        return Vec::new();
    };
    let cell = |col: &[Lenient], i: usize| col.get(i).and_then(|c| c.0);

    result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let local = DateTime::from_timestamp(ts.checked_add(result.meta.gmtoffset)?, 0)?;
            Some(RawBar {
                date: local.date_naive(),
                open: cell(&quote.open, i),
                high: cell(&quote.high, i),
                low: cell(&quote.low, i),
                close: cell(&quote.close, i),
                volume: cell(&quote.volume, i),
            })
        })
        .collect()
}

fn encode_ticker(ticker: &str) -> String {
    ticker.replace('^', "%5E").replace('=', "%3D")
}

// --- Provider ---

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    async fn fetch_series(&self, ticker: &str, period: Period) -> Result<Series, ProviderError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, encode_ticker(ticker));
        let query = [("range", period.token()), ("interval", "1d")];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            info!(ticker, %period, "Provider does not know this symbol");
            return Ok(Series::empty(ticker, period));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = response.json::<ChartEnvelope>().await?;
        if let Some(err) = envelope.chart.error {
            if err.is_not_found() {
                return Ok(Series::empty(ticker, period));
            }
            return Err(ProviderError::Payload(format!(
                "{}: {}",
                err.code,
                err.description.unwrap_or_default()
            )));
        }

        let rows = envelope
            .chart
            .result
            .as_deref()
            .and_then(<[ChartResult]>::first)
            .map(raw_rows)
            .unwrap_or_default();

        let series = filter_trading_rows(ticker, period, rows);
        info!(ticker, %period, bars = series.len(), "Loaded daily bars");
        Ok(series)
    }

    async fn fetch_fundamentals(&self, ticker: &str) -> Result<Fundamentals, ProviderError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}",
            self.base_url,
            encode_ticker(ticker)
        );
        let query = [(
            "modules",
            "summaryDetail,defaultKeyStatistics,financialData",
        )];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope = response.json::<SummaryEnvelope>().await?;
        if let Some(err) = envelope.quote_summary.error {
            return Err(ProviderError::Payload(err.code));
        }
        let result = envelope
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .unwrap_or_default();

        Ok(Fundamentals {
            trailing_pe: result.summary_detail.trailing_pe.get(),
            dividend_yield: result.summary_detail.dividend_yield.get(),
            market_cap: result.summary_detail.market_cap.get(),
            total_revenue: result.financial_data.total_revenue.get(),
            net_income: result.default_key_statistics.net_income_to_common.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> YahooProvider {
        YahooProvider::new(&ProviderConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn chart_body() -> serde_json::Value {
        // 2024-03-01..05 at 13:00 UTC, B3 offset -3h
        json!({
            "chart": {
                "result": [{
                    "meta": { "symbol": "PETR4.SA", "gmtoffset": -10800 },
                    "timestamp": [1709298000, 1709557200, 1709643600, 1709730000],
                    "indicators": { "quote": [{
                        "open":   [36.1, 36.5, null, 37.0],
                        "high":   [36.9, 37.2, 37.0, 37.4],
                        "low":    [35.8, 36.1, 36.3, 36.8],
                        "close":  [36.4, 37.0, 36.9, 37.1],
                        "volume": [1000, 0, 500, 700]
                    }]}
                }],
                "error": null
            }
        })
    }

    #[tokio::test]
    async fn fetch_series_drops_zero_volume_and_missing_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/PETR4.SA"))
            .and(query_param("range", "1mo"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
            .mount(&server)
            .await;

        let series = provider(&server)
            .fetch_series("PETR4.SA", Period::OneMonth)
            .await
            .unwrap();

        let dates: Vec<String> = series.bars().iter().map(|b| b.date.to_string()).collect();
        assert_eq!(dates, vec!["2024-03-01", "2024-03-06"]);
        assert_eq!(series.bars()[1].volume, 700);
    }

    #[tokio::test]
    async fn loading_twice_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chart_body()))
            .mount(&server)
            .await;
        let provider = provider(&server);

        let first = provider.fetch_series("PETR4.SA", Period::OneMonth).await.unwrap();
        let second = provider.fetch_series("PETR4.SA", Period::OneMonth).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_symbol_yields_empty_series() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ9.SA"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "chart": {
                    "result": null,
                    "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
                }
            })))
            .mount(&server)
            .await;

        let series = provider(&server)
            .fetch_series("ZZZZ9.SA", Period::SixMonths)
            .await
            .unwrap();

        assert!(series.is_empty());
        assert_eq!(series.ticker(), "ZZZZ9.SA");
    }

    #[tokio::test]
    async fn result_without_timestamps_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": { "result": [{ "meta": {}, "indicators": { "quote": [{}] } }], "error": null }
            })))
            .mount(&server)
            .await;

        let series = provider(&server).fetch_series("VALE3.SA", Period::OneYear).await.unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .fetch_series("PETR4.SA", Period::OneMonth)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn fundamentals_read_raw_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v10/finance/quoteSummary/PETR4.SA"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quoteSummary": {
                    "result": [{
                        "summaryDetail": {
                            "trailingPE": { "raw": 4.5, "fmt": "4.50" },
                            "dividendYield": { "raw": 0.15, "fmt": "15.00%" },
                            "marketCap": {}
                        },
                        "financialData": { "totalRevenue": { "raw": 5.1e11 } },
                        "defaultKeyStatistics": { "netIncomeToCommon": { "raw": 1.2e11 } }
                    }],
                    "error": null
                }
            })))
            .mount(&server)
            .await;

        let f = provider(&server).fetch_fundamentals("PETR4.SA").await.unwrap();

        assert_eq!(f.trailing_pe, Some(4.5));
        assert_eq!(f.market_cap, None);
        let rows = f.rows();
        assert_eq!(rows[1], ("Dividend Yield", "15.00%".to_string()));
        assert_eq!(rows[2], ("Market Cap", "N/A".to_string()));
        assert_eq!(rows[3], ("Revenue", "510.00B".to_string()));
    }

    #[test]
    fn lenient_cells_accept_strings_and_nulls() {
        let cells: Vec<Lenient> = serde_json::from_str(r#"[1, 2.5, "3.25", "", null]"#).unwrap();
        let values: Vec<Option<f64>> = cells.into_iter().map(|c| c.0).collect();
        assert_eq!(values, vec![Some(1.0), Some(2.5), Some(3.25), None, None]);
    }

    #[test]
    fn tickers_are_normalized() {
        assert_eq!(normalize_ticker(" petr4.sa ").unwrap(), "PETR4.SA");
        assert_eq!(normalize_ticker("^bvsp").unwrap(), "^BVSP");
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("PETR4 SA").is_err());
        assert!(normalize_ticker("../etc").is_err());
    }

    #[test]
    fn sub_share_volume_is_not_a_trading_day() {
        let row = |volume| RawBar {
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            open: Some(10.0),
            high: Some(11.0),
            low: Some(9.0),
            close: Some(10.5),
            volume: Some(volume),
        };
        assert_eq!(row(0.4).into_bar(), None);
        assert_eq!(row(0.6).into_bar().map(|b| b.volume), Some(1));
    }

    #[test]
    fn overflowing_timestamps_are_skipped() {
        let result: ChartResult = serde_json::from_value(json!({
            "meta": { "gmtoffset": 3600 },
            "timestamp": [i64::MAX, 1709298000],
            "indicators": { "quote": [{
                "open": [1.0, 2.0], "high": [1.0, 2.0], "low": [1.0, 2.0],
                "close": [1.0, 2.0], "volume": [10, 20]
            }]}
        }))
        .unwrap();

        let rows = raw_rows(&result);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    fn raw_bar() -> impl Strategy<Value = RawBar> {
        let field = prop_oneof![
            3 => (1.0f64..100.0).prop_map(Some),
            1 => Just(None),
        ];
        let volume = prop_oneof![
            2 => (1u32..1_000_000).prop_map(|v| Some(v as f64)),
            1 => Just(Some(0.0)),
            1 => (0.0f64..0.5).prop_map(Some),
            1 => Just(None),
        ];
        (0u32..60, field.clone(), field.clone(), field.clone(), field, volume).prop_map(
            |(day, open, high, low, close, volume)| RawBar {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(day as u64),
                open,
                high,
                low,
                close,
                volume,
            },
        )
    }

    proptest! {
        #[test]
        fn filtering_keeps_exactly_complete_traded_rows(rows in proptest::collection::vec(raw_bar(), 0..40)) {
            // one row per date so dedup does not interfere with the count
            let mut seen = std::collections::HashSet::new();
            let rows: Vec<RawBar> = rows.into_iter().filter(|r| seen.insert(r.date)).collect();

            let expected = rows
                .iter()
                .filter(|r| {
                    r.open.is_some() && r.high.is_some() && r.low.is_some() && r.close.is_some()
                        && r.volume.is_some_and(|v| v.round() >= 1.0)
                })
                .count();

            let series = filter_trading_rows("TEST", Period::OneMonth, rows);

            prop_assert_eq!(series.len(), expected);
            prop_assert!(series.bars().iter().all(|b| b.volume > 0));
            prop_assert!(series.bars().windows(2).all(|w| w[0].date < w[1].date));
        }
    }
}
