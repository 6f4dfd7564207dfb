//! Memoization of loaded series keyed by (ticker, period).
//!
//! Loading is idempotent, so a miss only costs a provider round trip. Entries
//! are dropped by [`SeriesCache::clear`] or, when a TTL is configured, on the
//! first lookup after they expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::models::{Period, Series};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    ticker: String,
    period: Period,
}

impl CacheKey {
    pub fn new(ticker: &str, period: Period) -> Self {
        Self {
            ticker: ticker.trim().to_ascii_uppercase(),
            period,
        }
    }
}

struct CachedSeries {
    series: Arc<Series>,
    stored_at: Instant,
}

pub struct SeriesCache {
    entries: HashMap<CacheKey, CachedSeries>,
    ttl: Option<Duration>,
}

impl SeriesCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&mut self, ticker: &str, period: Period) -> Option<Arc<Series>> {
        self.get_at(&CacheKey::new(ticker, period), Instant::now())
    }

    /// Stores a loaded series (empty ones included) and hands back the shared copy.
    pub fn insert(&mut self, series: Series) -> Arc<Series> {
        self.insert_at(series, Instant::now())
    }

    pub fn clear(&mut self) {
        debug!(entries = self.entries.len(), "Clearing series cache");
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<Arc<Series>> {
        let expired = match (self.entries.get(key), self.ttl) {
            (None, _) => return None,
            (Some(entry), Some(ttl)) => now.saturating_duration_since(entry.stored_at) >= ttl,
            (Some(_), None) => false,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| Arc::clone(&e.series))
    }

    fn insert_at(&mut self, series: Series, now: Instant) -> Arc<Series> {
        let key = CacheKey::new(series.ticker(), series.period());
        let series = Arc::new(series);
        self.entries.insert(
            key,
            CachedSeries {
                series: Arc::clone(&series),
                stored_at: now,
            },
        );
        series
    }
}
