use crate::engine::{BacktestEngine, COMBINED_CURVE_KEY};
use crate::models::{BacktestSpec, BacktestStatus};
use anyhow::{bail, Result};
use log::info;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs one backtest end to end against whatever provider the engine was
/// built with and logs the per-strategy performance.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    engine: &BacktestEngine,
    strategy_ids: &[String],
    symbols: &[String],
    start_date: &str,
    end_date: &str,
    initial_cash: f64,
    commission: f64,
    benchmark: Option<String>,
) -> Result<()> {
    let mut strategies = Vec::with_capacity(strategy_ids.len());
    for strategy_id in strategy_ids {
        strategies.push(engine.executor().get_strategy(strategy_id)?);
    }

    let backtest = engine.create_backtest(BacktestSpec {
        id: None,
        name: format!("demo {} - {}", start_date, end_date),
        strategy_ids: strategy_ids.to_vec(),
        symbols: symbols.to_vec(),
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
        initial_cash,
        commission,
        slippage: 0.0,
        benchmark,
    })?;
    info!(
        "Created backtest {} with {} strategies over {} symbols",
        backtest.id,
        strategies.len(),
        symbols.len()
    );

    engine.start_backtest(&backtest.id, strategies)?;

    let final_status = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let progress = engine.get_progress(&backtest.id)?;
        info!("{:>5.1}% {}", progress.progress, progress.message);
        if progress.status.is_terminal() {
            break progress;
        }
    };
    if final_status.status != BacktestStatus::Completed {
        bail!(
            "Backtest finished as {}: {}",
            final_status.status.as_str(),
            final_status.error.unwrap_or(final_status.message)
        );
    }

    let results = engine.get_results(&backtest.id)?;
    info!("Executed {} trades", results.trades.len());
    for strategy_id in &results.strategies {
        let Some(perf) = results.performance.get(strategy_id) else {
            continue;
        };
        info!(
            "{}: return {:.2}% annual {:.2}% drawdown {:.2}% sharpe {:.2} win rate {:.1}% ({} trades)",
            strategy_id,
            perf.total_return * 100.0,
            perf.annual_return * 100.0,
            perf.max_drawdown * 100.0,
            perf.sharpe_ratio,
            perf.win_rate * 100.0,
            perf.total_trades
        );
    }
    if let Some(combined) = &results.combined_metrics {
        info!(
            "combined: return {:.2}% sharpe {:.2} ({} trades)",
            combined.total_return * 100.0,
            combined.sharpe_ratio,
            combined.total_trades
        );
    }
    if let Some(last) = results
        .equity_curves
        .get(COMBINED_CURVE_KEY)
        .and_then(|curve| curve.last())
    {
        info!(
            "Final equity {:.2} (cash {:.2}, holdings {:.2})",
            last.portfolio_value, last.cash, last.holdings
        );
    }
    Ok(())
}
