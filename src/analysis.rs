//! The load → indicators → chart pipeline shared by the TUI and the one-shot commands.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::SeriesCache;
use crate::chart::ChartModel;
use crate::errors::ProviderError;
use crate::forecast::{self, TrendForecast};
use crate::indicators::IndicatorFrame;
use crate::market_data::{Fundamentals, MarketDataProvider};
use crate::models::{IndicatorSelection, Period, Series};
use crate::news::{Article, NewsClient};

/// External collaborators, shared with spawned load tasks.
#[derive(Clone)]
pub struct Services {
    pub provider: Arc<dyn MarketDataProvider>,
    pub news: Arc<NewsClient>,
}

/// Side panels that are refetched on every load and never cached.
#[derive(Debug, Clone, Default)]
pub struct Extras {
    pub fundamentals: Fundamentals,
    pub news: Option<Vec<Article>>,
}

/// Everything derived from one series and one indicator selection.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub series: Arc<Series>,
    pub frame: IndicatorFrame,
    pub chart: ChartModel,
    pub forecast: Option<TrendForecast>,
}

impl Analysis {
    pub fn compute(series: Arc<Series>, selection: &IndicatorSelection) -> Self {
        let frame = IndicatorFrame::compute(&series, selection);
        let chart = ChartModel::build(&series, &frame);
        let forecast = forecast::next_day_trend(&series);
        debug!(
            ticker = series.ticker(),
            bars = series.len(),
            traces = chart.trace_count(),
            "Analysis computed"
        );
        Self {
            series,
            frame,
            chart,
            forecast,
        }
    }
}

/// Cached series for (ticker, period), fetching and storing it on a miss.
///
/// Provider errors are returned as-is and never cached.
pub async fn load_series(
    provider: &dyn MarketDataProvider,
    cache: &mut SeriesCache,
    ticker: &str,
    period: Period,
) -> Result<Arc<Series>, ProviderError> {
    if let Some(series) = cache.get(ticker, period) {
        return Ok(series);
    }
    let series = provider.fetch_series(ticker, period).await?;
    Ok(cache.insert(series))
}

/// Fundamentals and headlines in parallel; failures degrade to `N/A` / no news.
pub async fn fetch_extras(services: &Services, ticker: &str) -> Extras {
    let (fundamentals, news) = futures::join!(
        services.provider.fetch_fundamentals(ticker),
        services.news.headlines(ticker)
    );
    let fundamentals = fundamentals.unwrap_or_else(|e| {
        warn!(ticker, error = %e, "Fundamentals unavailable");
        Fundamentals::default()
    });
    Extras { fundamentals, news }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Bar;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed close series for every ticker except `ZZZZ9.SA`.
    pub(crate) struct StubProvider {
        pub calls: AtomicUsize,
        pub closes: Vec<f64>,
    }

    impl StubProvider {
        pub(crate) fn new(closes: Vec<f64>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                closes,
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        async fn fetch_series(&self, ticker: &str, period: Period) -> Result<Series, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ticker == "ZZZZ9.SA" {
                return Ok(Series::empty(ticker, period));
            }
            if ticker == "DOWN" {
                return Err(ProviderError::Api {
                    status: 500,
                    message: "down".into(),
                });
            }
            let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let bars = self
                .closes
                .iter()
                .enumerate()
                .map(|(i, &c)| Bar {
                    date: start + chrono::Days::new(i as u64),
                    open: c,
                    high: c + 1.0,
                    low: c - 1.0,
                    close: c,
                    volume: 1_000,
                })
                .collect();
            Ok(Series::new(ticker, period, bars))
        }

        async fn fetch_fundamentals(&self, _ticker: &str) -> Result<Fundamentals, ProviderError> {
            Err(ProviderError::Payload("no fundamentals in tests".into()))
        }
    }

    #[tokio::test]
    async fn second_load_is_served_from_cache() {
        let provider = StubProvider::new((10..40).map(f64::from).collect());
        let mut cache = SeriesCache::new(None);

        let a = load_series(&provider, &mut cache, "PETR4.SA", Period::OneMonth).await.unwrap();
        let b = load_series(&provider, &mut cache, "PETR4.SA", Period::OneMonth).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));

        cache.clear();
        load_series(&provider, &mut cache, "PETR4.SA", Period::OneMonth).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_ticker_is_an_empty_series_not_an_error() {
        let provider = StubProvider::new(vec![]);
        let mut cache = SeriesCache::new(None);

        let series = load_series(&provider, &mut cache, "ZZZZ9.SA", Period::SixMonths).await.unwrap();

        assert!(series.is_empty());
        let analysis = Analysis::compute(series, &IndicatorSelection::all());
        assert!(analysis.chart.is_empty());
        assert!(analysis.forecast.is_none());
    }

    #[tokio::test]
    async fn provider_errors_are_not_cached() {
        let provider = StubProvider::new(vec![]);
        let mut cache = SeriesCache::new(None);

        assert!(load_series(&provider, &mut cache, "DOWN", Period::OneMonth).await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn fundamentals_failure_degrades_to_defaults() {
        let services = Services {
            provider: Arc::new(StubProvider::new(vec![])),
            news: Arc::new(
                NewsClient::new(&crate::storage_utils::NewsConfig::default(), None).unwrap(),
            ),
        };
        let extras = fetch_extras(&services, "PETR4.SA").await;
        assert_eq!(extras.fundamentals, Fundamentals::default());
        assert!(extras.news.is_none());
    }

    #[test]
    fn reselecting_indicators_reuses_the_series() {
        let closes: Vec<f64> = (10..30).map(f64::from).collect();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: start + chrono::Days::new(i as u64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1,
            })
            .collect();
        let series = Arc::new(Series::new("X", Period::OneMonth, bars));

        let bare = Analysis::compute(Arc::clone(&series), &IndicatorSelection::none());
        let with_sma = Analysis::compute(Arc::clone(&series), &IndicatorSelection::parse_list("sma").unwrap());

        assert!(Arc::ptr_eq(&bare.series, &with_sma.series));
        assert_eq!(bare.chart.trace_count(), 1);
        assert_eq!(with_sma.frame.latest("SMA"), Some(22.5));
    }
}
