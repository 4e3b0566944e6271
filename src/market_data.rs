use crate::cache::MarketDataCache;
use crate::calendar::TradingCalendar;
use crate::models::MarketData;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use std::sync::Arc;

pub const DATE_FORMAT: &str = "%Y%m%d";

/// Daily-bar source consumed by the engine. Dates are `YYYYMMDD` strings,
/// `adjust_mode` is passed through to the backing source (`qfq` for
/// forward-adjusted prices).
pub trait MarketDataProvider: Send + Sync {
    fn get_daily_data(
        &self,
        symbol: &str,
        start_date: &str,
        end_date: &str,
        adjust_mode: &str,
    ) -> Result<Vec<MarketData>>;
}

pub fn parse_compact_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .with_context(|| format!("invalid date '{}', expected YYYYMMDD", raw))
}

pub fn format_compact_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date.with_day(1).unwrap_or(date);
    let end = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .map(|next_month| next_month - Duration::days(1))
    .unwrap_or(date);
    (start, end)
}

/// Cache-backed bar lookup. Reads go through a prioritized tier chain:
/// the preloaded backtest range, then the month bucket, then a direct
/// fetch widened to the full month (cached for later lookups), then a
/// two-week fetch around the date as the last resort. A total miss is a
/// `None`, not an error; the caller decides how to degrade.
#[derive(Clone)]
pub struct DataService {
    provider: Arc<dyn MarketDataProvider>,
    cache: MarketDataCache,
}

impl DataService {
    pub fn new(provider: Arc<dyn MarketDataProvider>, cache: MarketDataCache) -> Self {
        Self { provider, cache }
    }

    pub fn cache(&self) -> &MarketDataCache {
        &self.cache
    }

    /// Fetches and caches bars for every symbol over the full range, with
    /// month buckets stored alongside the exact range to raise later hit
    /// rates. Individual fetch failures are logged and skipped.
    pub fn preload(&self, symbols: &[String], start: NaiveDate, end: NaiveDate) {
        let start_str = format_compact_date(start);
        let end_str = format_compact_date(end);

        for symbol in symbols {
            if self.cache.get(symbol, &start_str, &end_str).is_some() {
                continue;
            }

            match self
                .provider
                .get_daily_data(symbol, &start_str, &end_str, "qfq")
            {
                Ok(data) if !data.is_empty() => {
                    debug!(
                        "Preloaded {} bars for {} ({} to {})",
                        data.len(),
                        symbol,
                        start_str,
                        end_str
                    );
                    self.store_by_months(symbol, &data);
                    self.cache.set(symbol, &start_str, &end_str, data);
                }
                Ok(_) => {
                    warn!("No bars for {} in {} to {}", symbol, start_str, end_str);
                }
                Err(err) => {
                    warn!("Preload failed for {}: {:#}", symbol, err);
                }
            }
        }
    }

    /// Buckets bars by calendar month and caches each bucket under its
    /// full-month range key.
    fn store_by_months(&self, symbol: &str, data: &[MarketData]) {
        use std::collections::HashMap;

        let mut monthly: HashMap<(i32, u32), Vec<MarketData>> = HashMap::new();
        for bar in data {
            let day = bar.date.date_naive();
            monthly
                .entry((day.year(), day.month()))
                .or_default()
                .push(bar.clone());
        }

        for ((year, month), bars) in monthly {
            let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
                continue;
            };
            let (month_start, month_end) = month_bounds(first);
            let start_str = format_compact_date(month_start);
            let end_str = format_compact_date(month_end);
            if self.cache.get(symbol, &start_str, &end_str).is_none() {
                self.cache.set(symbol, &start_str, &end_str, bars);
            }
        }
    }

    /// Resolves the bar for one symbol on one date through the tier chain.
    /// `range_start`/`range_end` identify the preloaded backtest range.
    pub fn bar_for_date(
        &self,
        symbol: &str,
        date: NaiveDate,
        range_start: NaiveDate,
        range_end: NaiveDate,
    ) -> Option<MarketData> {
        // Tier 1: the preloaded exact backtest range.
        let range_start_str = format_compact_date(range_start);
        let range_end_str = format_compact_date(range_end);
        if let Some(data) = self.cache.get(symbol, &range_start_str, &range_end_str) {
            if let Some(bar) = find_bar_for_date(&data, date) {
                return Some(bar);
            }
        }

        // Tier 2: the month bucket.
        let (month_start, month_end) = month_bounds(date);
        let month_start_str = format_compact_date(month_start);
        let month_end_str = format_compact_date(month_end);
        if let Some(data) = self.cache.get(symbol, &month_start_str, &month_end_str) {
            if let Some(bar) = find_bar_for_date(&data, date) {
                return Some(bar);
            }
        }

        // Tier 3: direct fetch widened to the month, written back to the
        // month tier so the rest of the month hits the cache.
        match self
            .provider
            .get_daily_data(symbol, &month_start_str, &month_end_str, "qfq")
        {
            Ok(data) if !data.is_empty() => {
                debug!(
                    "Direct month fetch for {} covering {}",
                    symbol, month_start_str
                );
                let bar = find_bar_for_date(&data, date);
                self.cache.set(symbol, &month_start_str, &month_end_str, data);
                if bar.is_some() {
                    return bar;
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Month fetch failed for {}: {:#}", symbol, err);
            }
        }

        // Tier 4: a two-week window around the date.
        let week_start = date - Duration::days(7);
        let week_end = date + Duration::days(7);
        let week_start_str = format_compact_date(week_start);
        let week_end_str = format_compact_date(week_end);
        match self
            .provider
            .get_daily_data(symbol, &week_start_str, &week_end_str, "qfq")
        {
            Ok(data) if !data.is_empty() => {
                let bar = find_bar_for_date(&data, date);
                self.cache.set(symbol, &week_start_str, &week_end_str, data);
                bar
            }
            Ok(_) => None,
            Err(err) => {
                warn!("Week fetch failed for {}: {:#}", symbol, err);
                None
            }
        }
    }
}

/// Exact date match first, otherwise the nearest bar by calendar distance.
pub fn find_bar_for_date(data: &[MarketData], target: NaiveDate) -> Option<MarketData> {
    for bar in data {
        if bar.date.date_naive() == target {
            return Some(bar.clone());
        }
    }

    let mut closest: Option<&MarketData> = None;
    let mut min_diff = i64::MAX;
    for bar in data {
        let diff = (bar.date.date_naive() - target).num_days().abs();
        if diff < min_diff {
            min_diff = diff;
            closest = Some(bar);
        }
    }
    closest.cloned()
}

/// Deterministic bar generator for demos and tests: a smooth yearly cycle
/// plus a symbol-seeded wobble, emitting bars only on trading days.
pub struct SyntheticDataProvider {
    calendar: TradingCalendar,
}

impl SyntheticDataProvider {
    pub fn new() -> Self {
        Self {
            calendar: TradingCalendar::new(),
        }
    }

    fn base_price(symbol: &str) -> f64 {
        let seed: u64 = symbol.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u64)
        });
        10.0 + (seed % 90) as f64
    }

    fn bar_for(symbol: &str, date: NaiveDate) -> MarketData {
        let base = Self::base_price(symbol);
        let epoch = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(date);
        let days = (date - epoch).num_days() as f64;

        let trend = (days / 250.0 * std::f64::consts::TAU).sin() * 0.25;
        let wobble = ((days * 0.7).sin() + (days * 0.13).cos()) * 0.015;
        let close = base * (1.0 + trend + wobble);
        let open = close * (1.0 - 0.004);
        let high = close * 1.01;
        let low = open * 0.99;
        let volume = 2_000_000 + ((days as i64 * 7919) % 1_000_000);

        let timestamp: DateTime<Utc> = Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
        MarketData {
            symbol: symbol.to_string(),
            date: timestamp,
            open,
            high,
            low,
            close,
            volume,
            amount: close * volume as f64,
            adj_close: close,
        }
    }
}

impl Default for SyntheticDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataProvider for SyntheticDataProvider {
    fn get_daily_data(
        &self,
        symbol: &str,
        start_date: &str,
        end_date: &str,
        _adjust_mode: &str,
    ) -> Result<Vec<MarketData>> {
        let start = parse_compact_date(start_date)?;
        let end = parse_compact_date(end_date)?;

        let bars = self
            .calendar
            .trading_days_in_range(start, end)
            .into_iter()
            .map(|day| Self::bar_for(symbol, day))
            .collect();
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: SyntheticDataProvider,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: SyntheticDataProvider::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MarketDataProvider for CountingProvider {
        fn get_daily_data(
            &self,
            symbol: &str,
            start_date: &str,
            end_date: &str,
            adjust_mode: &str,
        ) -> Result<Vec<MarketData>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .get_daily_data(symbol, start_date, end_date, adjust_mode)
        }
    }

    struct FailingProvider;

    impl MarketDataProvider for FailingProvider {
        fn get_daily_data(&self, _: &str, _: &str, _: &str, _: &str) -> Result<Vec<MarketData>> {
            anyhow::bail!("upstream unavailable")
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_synthetic_provider_is_deterministic() {
        let provider = SyntheticDataProvider::new();
        let a = provider
            .get_daily_data("600000", "20240301", "20240329", "qfq")
            .unwrap();
        let b = provider
            .get_daily_data("600000", "20240301", "20240329", "qfq")
            .unwrap();

        assert!(!a.is_empty());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.date, y.date);
            assert!((x.close - y.close).abs() < 1e-12);
        }
    }

    #[test]
    fn test_preload_populates_range_and_month_buckets() {
        let provider = Arc::new(CountingProvider::new());
        let service = DataService::new(provider.clone(), MarketDataCache::new());
        let symbols = vec!["600000".to_string()];

        service.preload(&symbols, date(2024, 3, 1), date(2024, 4, 30));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let cache = service.cache();
        assert!(cache.get("600000", "20240301", "20240430").is_some());
        assert!(cache.get("600000", "20240301", "20240331").is_some());
        assert!(cache.get("600000", "20240401", "20240430").is_some());
    }

    #[test]
    fn test_lookup_hits_preloaded_tier_without_fetching() {
        let provider = Arc::new(CountingProvider::new());
        let service = DataService::new(provider.clone(), MarketDataCache::new());
        let symbols = vec!["600000".to_string()];
        let start = date(2024, 3, 1);
        let end = date(2024, 3, 29);

        service.preload(&symbols, start, end);
        let calls_after_preload = provider.calls.load(Ordering::SeqCst);

        let bar = service.bar_for_date("600000", date(2024, 3, 11), start, end);
        assert!(bar.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls_after_preload);
    }

    #[test]
    fn test_lookup_falls_back_to_month_fetch_and_writes_back() {
        let provider = Arc::new(CountingProvider::new());
        let service = DataService::new(provider.clone(), MarketDataCache::new());
        let start = date(2024, 3, 1);
        let end = date(2024, 3, 29);

        // Nothing preloaded: first lookup fetches the month and caches it.
        let bar = service.bar_for_date("600000", date(2024, 3, 11), start, end);
        assert!(bar.is_some());
        let after_first = provider.calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 1);

        // Second lookup in the same month is served from the month bucket.
        let bar = service.bar_for_date("600000", date(2024, 3, 12), start, end);
        assert!(bar.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_lookup_total_miss_returns_none() {
        let service = DataService::new(Arc::new(FailingProvider), MarketDataCache::new());
        let bar = service.bar_for_date("600000", date(2024, 3, 11), date(2024, 3, 1), date(2024, 3, 29));
        assert!(bar.is_none());
    }

    #[test]
    fn test_find_bar_prefers_exact_then_nearest() {
        let provider = SyntheticDataProvider::new();
        let data = provider
            .get_daily_data("600000", "20240301", "20240329", "qfq")
            .unwrap();

        let exact = find_bar_for_date(&data, date(2024, 3, 11)).unwrap();
        assert_eq!(exact.date.date_naive(), date(2024, 3, 11));

        // 2024-03-09 is a Saturday; the nearest trading day wins.
        let nearest = find_bar_for_date(&data, date(2024, 3, 9)).unwrap();
        assert_eq!(nearest.date.date_naive(), date(2024, 3, 8));
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(
            month_bounds(date(2024, 2, 15)),
            (date(2024, 2, 1), date(2024, 2, 29))
        );
        assert_eq!(
            month_bounds(date(2024, 12, 31)),
            (date(2024, 12, 1), date(2024, 12, 31))
        );
    }
}
