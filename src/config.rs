use crate::cache::{CLEANUP_INTERVAL, DEFAULT_CACHE_TTL};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_INITIAL_CASH: f64 = 100_000.0;
const DEFAULT_COMMISSION_RATE: f64 = 0.0003;

/// Runtime settings read from the environment. Every key is optional and
/// falls back to a documented default; present but malformed values are
/// rejected instead of silently ignored.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub initial_cash: f64,
    pub commission_rate: f64,
    pub cache_ttl: Duration,
    pub cache_cleanup_interval: Duration,
    pub benchmark_symbol: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            initial_cash: DEFAULT_INITIAL_CASH,
            commission_rate: DEFAULT_COMMISSION_RATE,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_cleanup_interval: CLEANUP_INTERVAL,
            benchmark_symbol: None,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_cash = optional_setting_f64(
            settings,
            "BACKTEST_INITIAL_CASH",
            DEFAULT_INITIAL_CASH,
            Some(1.0),
            None,
        )?;
        let commission_rate = optional_setting_f64(
            settings,
            "BACKTEST_COMMISSION_RATE",
            DEFAULT_COMMISSION_RATE,
            Some(0.0),
            Some(0.1),
        )?;
        let cache_ttl_minutes = optional_setting_u64(
            settings,
            "CACHE_TTL_MINUTES",
            DEFAULT_CACHE_TTL.as_secs() / 60,
            1,
        )?;
        let cache_cleanup_minutes = optional_setting_u64(
            settings,
            "CACHE_CLEANUP_MINUTES",
            CLEANUP_INTERVAL.as_secs() / 60,
            1,
        )?;
        let benchmark_symbol = settings
            .get("BACKTEST_BENCHMARK")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            initial_cash,
            commission_rate,
            cache_ttl: Duration::from_secs(cache_ttl_minutes * 60),
            cache_cleanup_interval: Duration::from_secs(cache_cleanup_minutes * 60),
            benchmark_symbol,
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn optional_setting_u64(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
) -> Result<u64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}
