use crate::engine::BacktestEngine;
use crate::models::{OptimizationAlgorithm, OptimizationConfig, OptimizationStatus};
use crate::optimizer::ParameterOptimizer;
use crate::strategy::StrategyParams;
use anyhow::{bail, Result};
use log::info;
use std::collections::HashMap;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const REPORT_TOP_N: usize = 5;

/// Sweeps the auto-detected parameter space of one registered strategy and
/// logs the ranked outcome.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    engine: &BacktestEngine,
    optimizer: &ParameterOptimizer,
    strategy_id: &str,
    algorithm: OptimizationAlgorithm,
    target_metric: &str,
    symbols: &[String],
    start_date: &str,
    end_date: &str,
    initial_cash: f64,
    commission: f64,
    max_combinations: usize,
    population_size: usize,
    generations: usize,
) -> Result<()> {
    info!(
        "Received optimize command for strategy_id={} (auto parameter detection)",
        strategy_id
    );
    let strategy = engine.executor().get_strategy(strategy_id)?;
    let parameter_ranges =
        StrategyParams::from_map(&strategy.kind, &strategy.parameters).optimizable_ranges();
    if parameter_ranges.is_empty() {
        bail!(
            "Strategy kind '{}' has no optimizable parameters",
            strategy.kind
        );
    }
    let mut names: Vec<&String> = parameter_ranges.keys().collect();
    names.sort();
    info!(
        "Optimizing '{}' over {:?} using {} targeting {}",
        strategy.name,
        names,
        algorithm.as_str(),
        target_metric
    );

    let optimization_id = optimizer.start_optimization(OptimizationConfig {
        strategy_id: strategy_id.to_string(),
        strategy_kind: strategy.kind.clone(),
        parameter_ranges,
        target_metric: target_metric.to_string(),
        algorithm,
        max_combinations,
        population_size,
        generations,
        mutation_rate: 0.1,
        crossover_rate: 0.8,
        elitism_rate: 0.1,
        symbols: symbols.to_vec(),
        start_date: start_date.to_string(),
        end_date: end_date.to_string(),
        initial_cash,
        commission,
    })?;

    let mut last_completed = 0;
    let final_progress = loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let progress = optimizer.get_progress(&optimization_id)?;
        if progress.completed_combinations != last_completed {
            last_completed = progress.completed_combinations;
            info!(
                "Evaluated {}/{} combinations, best score {:.4}",
                progress.completed_combinations, progress.total_combinations, progress.best_score
            );
        }
        if progress.status != OptimizationStatus::Running {
            break progress;
        }
    };
    if final_progress.status != OptimizationStatus::Completed {
        bail!(
            "Optimization finished as {}: {}",
            final_progress.status.as_str(),
            final_progress.error.unwrap_or_default()
        );
    }

    let report = optimizer.get_report(&optimization_id)?;
    info!(
        "Best score {:.4} with {}",
        report.best_score,
        format_parameters(&report.best_parameters)
    );
    if let (Some(best), Some(original)) = (&report.best_performance, &report.original_performance) {
        info!(
            "Best return {:.2}% sharpe {:.2} vs original return {:.2}% sharpe {:.2}",
            best.total_return * 100.0,
            best.sharpe_ratio,
            original.total_return * 100.0,
            original.sharpe_ratio
        );
    }
    for (rank, result) in report.results.iter().take(REPORT_TOP_N).enumerate() {
        info!(
            "#{} score {:.4} return {:.2}% {}",
            rank + 1,
            result.score,
            result.performance.total_return * 100.0,
            format_parameters(&result.parameters)
        );
    }
    Ok(())
}

fn format_parameters(parameters: &HashMap<String, f64>) -> String {
    let mut pairs: Vec<(&String, &f64)> = parameters.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(" ")
}
