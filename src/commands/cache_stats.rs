use crate::market_data::{parse_compact_date, DataService};
use anyhow::Result;
use log::info;

/// Preloads a few symbols, reads them back through the tiered lookup and
/// prints the resulting cache counters.
pub fn run(data: &DataService, symbols: &[String], start_date: &str, end_date: &str) -> Result<()> {
    let start = parse_compact_date(start_date)?;
    let end = parse_compact_date(end_date)?;

    data.preload(symbols, start, end);
    for symbol in symbols {
        let first = data.bar_for_date(symbol, start, start, end);
        let last = data.bar_for_date(symbol, end, start, end);
        info!(
            "{}: first bar {} last bar {}",
            symbol,
            first.map_or_else(|| "-".to_string(), |bar| format!("{:.2}", bar.close)),
            last.map_or_else(|| "-".to_string(), |bar| format!("{:.2}", bar.close)),
        );
    }

    let stats = data.cache().stats();
    info!(
        "Cache entries {} hits {} misses {} evictions {} hit rate {:.1}%",
        stats.entries,
        stats.hits,
        stats.misses,
        stats.evictions,
        data.cache().hit_rate() * 100.0
    );
    Ok(())
}
