use crate::models::MarketData;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<MarketData>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
    pub last_cleanup: DateTime<Utc>,
}

/// Exact-range bar cache. Keys hash (symbol, start, end), every entry
/// expires, reads on an expired entry evict it and count a miss. Safe for
/// concurrent use from many simulation tasks.
#[derive(Clone)]
pub struct MarketDataCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_entry_age: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    last_cleanup: Arc<Mutex<DateTime<Utc>>>,
}

impl MarketDataCache {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CACHE_TTL, MAX_ENTRY_AGE)
    }

    pub fn with_settings(default_ttl: Duration, max_entry_age: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
            max_entry_age,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            last_cleanup: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Stable key for an exact (symbol, start, end) range. Dates are the
    /// interface-format `YYYYMMDD` strings.
    pub fn cache_key(symbol: &str, start_date: &str, end_date: &str) -> String {
        let digest = fnv1a64(format!("{}_{}_{}", symbol, start_date, end_date).as_bytes());
        format!("daily_{:016x}", digest)
    }

    pub fn get(&self, symbol: &str, start_date: &str, end_date: &str) -> Option<Vec<MarketData>> {
        let key = Self::cache_key(symbol, start_date, end_date);

        let mut expired = false;
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
            expired = true;
        }

        if expired {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, symbol: &str, start_date: &str, end_date: &str, data: Vec<MarketData>) {
        self.set_with_ttl(symbol, start_date, end_date, data, self.default_ttl);
    }

    pub fn set_with_ttl(
        &self,
        symbol: &str,
        start_date: &str,
        end_date: &str,
        data: Vec<MarketData>,
        ttl: Duration,
    ) {
        let key = Self::cache_key(symbol, start_date, end_date);
        let effective_ttl = ttl.min(self.max_entry_age);
        let now = Utc::now();
        let entry = CacheEntry {
            data,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(effective_ttl).unwrap_or(chrono::Duration::zero()),
        };
        self.entries.insert(key, entry);
    }

    pub fn delete(&self, symbol: &str, start_date: &str, end_date: &str) {
        let key = Self::cache_key(symbol, start_date, end_date);
        self.entries.remove(&key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Deletes every expired entry, returning how many were removed. The
    /// background sweep calls this on an interval; reads evict lazily in
    /// between.
    pub fn remove_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Cache sweep removed {} expired entries", removed);
        }
        if let Ok(mut last) = self.last_cleanup.lock() {
            *last = Utc::now();
        }
        removed
    }

    pub fn spawn_cleanup_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.remove_expired();
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let last_cleanup = self
            .last_cleanup
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|_| Utc::now());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            last_cleanup,
        }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bars(symbol: &str, count: usize) -> Vec<MarketData> {
        (0..count)
            .map(|i| MarketData {
                symbol: symbol.to_string(),
                date: Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                open: 10.0,
                high: 10.5,
                low: 9.5,
                close: 10.0 + i as f64 * 0.1,
                volume: 1_000_000,
                amount: 10_000_000.0,
                adj_close: 10.0 + i as f64 * 0.1,
            })
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let cache = MarketDataCache::new();
        let bars = sample_bars("600000", 3);
        cache.set("600000", "20240101", "20240103", bars.clone());

        let fetched = cache.get("600000", "20240101", "20240103");
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().len(), bars.len());

        assert!(cache.get("600000", "20240101", "20240104").is_none());
    }

    #[test]
    fn test_expired_entry_is_evicted_on_get() {
        let cache = MarketDataCache::new();
        cache.set_with_ttl(
            "600000",
            "20240101",
            "20240103",
            sample_bars("600000", 3),
            Duration::ZERO,
        );
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get("600000", "20240101", "20240103").is_none());
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_capped_at_max_age() {
        let cache = MarketDataCache::new();
        cache.set_with_ttl(
            "600000",
            "20240101",
            "20240103",
            sample_bars("600000", 3),
            Duration::from_secs(48 * 60 * 60),
        );

        let key = MarketDataCache::cache_key("600000", "20240101", "20240103");
        let entry = cache.entries.get(&key).unwrap();
        let age = entry.expires_at - entry.created_at;
        assert!(age <= chrono::Duration::from_std(MAX_ENTRY_AGE).unwrap());
    }

    #[test]
    fn test_stats_and_hit_rate() {
        let cache = MarketDataCache::new();
        cache.set("600000", "20240101", "20240103", sample_bars("600000", 3));

        cache.get("600000", "20240101", "20240103");
        cache.get("600000", "20240101", "20240103");
        cache.get("000001", "20240101", "20240103");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((cache.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = MarketDataCache::new();
        cache.set("600000", "20240101", "20240103", sample_bars("600000", 3));
        cache.set("000001", "20240101", "20240103", sample_bars("000001", 3));
        assert_eq!(cache.stats().entries, 2);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let cache = MarketDataCache::new();
        cache.set_with_ttl(
            "600000",
            "20240101",
            "20240103",
            sample_bars("600000", 3),
            Duration::ZERO,
        );
        cache.set("000001", "20240101", "20240103", sample_bars("000001", 3));
        std::thread::sleep(Duration::from_millis(5));

        let removed = cache.remove_expired();
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = MarketDataCache::cache_key("600000", "20240101", "20240131");
        let b = MarketDataCache::cache_key("600000", "20240101", "20240131");
        let c = MarketDataCache::cache_key("600001", "20240101", "20240131");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("daily_"));
    }
}
