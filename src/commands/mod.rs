pub mod cache_stats;
pub mod calendar;
pub mod demo;
pub mod optimize;
