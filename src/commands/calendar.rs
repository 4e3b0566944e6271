use crate::calendar::TradingCalendar;
use crate::market_data::parse_compact_date;
use anyhow::Result;
use log::{debug, info};

/// Prints how many trading days fall inside a date range. The full list
/// lands at debug level.
pub fn run(start_date: &str, end_date: &str) -> Result<()> {
    let start = parse_compact_date(start_date)?;
    let end = parse_compact_date(end_date)?;
    let calendar = TradingCalendar::new();
    let days = calendar.trading_days_in_range(start, end);

    info!("{} trading days between {} and {}", days.len(), start, end);
    if let (Some(first), Some(last)) = (days.first(), days.last()) {
        info!("First {} last {}", first, last);
    }
    for day in &days {
        debug!("{}", day);
    }
    info!("Next trading day after {} is {}", end, calendar.next_trading_day(end));
    Ok(())
}
