pub mod cache;
pub mod calendar;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod portfolio;
pub mod strategy;
pub mod strategy_utils;
pub mod validator;
