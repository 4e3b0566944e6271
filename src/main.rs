use anyhow::Result;
use backtest_core::{
    cache::{MarketDataCache, MAX_ENTRY_AGE},
    commands::{cache_stats, calendar, demo, optimize},
    config::RuntimeSettings,
    engine::BacktestEngine,
    market_data::{DataService, SyntheticDataProvider},
    models::OptimizationAlgorithm,
    optimizer::ParameterOptimizer,
    strategy::{default_strategies, RuleStrategyExecutor},
};
use clap::{Parser, Subcommand};
use log::info;
use std::str::FromStr;
use std::sync::Arc;

const DEFAULT_START_DATE: &str = "20240102";
const DEFAULT_END_DATE: &str = "20240628";
const DEFAULT_SYMBOLS: &[&str] = &["600000", "000001", "600519"];

#[derive(Parser)]
#[command(name = "backtest-core")]
#[command(about = "A concurrent backtest and parameter optimization engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest against the synthetic data provider
    Demo {
        /// Strategy ids to simulate (defaults to every built-in strategy)
        #[arg(long = "strategy", value_name = "ID")]
        strategies: Vec<String>,
        /// Symbols to trade (defaults to a small built-in set)
        #[arg(long = "symbol", value_name = "SYMBOL")]
        symbols: Vec<String>,
        /// Simulation window start (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_START_DATE)]
        start: String,
        /// Simulation window end (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_END_DATE)]
        end: String,
        /// Starting cash per strategy
        #[arg(long)]
        cash: Option<f64>,
        /// Commission rate per fill
        #[arg(long)]
        commission: Option<f64>,
        /// Benchmark symbol for alpha and beta attribution
        #[arg(long)]
        benchmark: Option<String>,
    },
    /// Sweep a strategy's parameter space and rank the results
    Optimize {
        /// Strategy id to optimize
        strategy_id: String,
        /// Search algorithm: grid or genetic
        #[arg(long, default_value = "grid")]
        algorithm: String,
        /// Metric to maximize (total_return, sharpe_ratio, win_rate, profit_factor)
        #[arg(long = "metric", default_value = "sharpe_ratio")]
        target_metric: String,
        /// Symbols to trade (defaults to a small built-in set)
        #[arg(long = "symbol", value_name = "SYMBOL")]
        symbols: Vec<String>,
        /// Evaluation window start (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_START_DATE)]
        start: String,
        /// Evaluation window end (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_END_DATE)]
        end: String,
        /// Starting cash per evaluation
        #[arg(long)]
        cash: Option<f64>,
        /// Commission rate per fill
        #[arg(long)]
        commission: Option<f64>,
        /// Grid search cap on evaluated combinations
        #[arg(long, default_value_t = 1000)]
        max_combinations: usize,
        /// Genetic algorithm population size
        #[arg(long, default_value_t = 20)]
        population_size: usize,
        /// Genetic algorithm generation count
        #[arg(long, default_value_t = 10)]
        generations: usize,
    },
    /// Inspect the trading calendar for a date range
    Calendar {
        /// Range start (YYYYMMDD)
        #[arg(default_value = "20240101")]
        start: String,
        /// Range end (YYYYMMDD)
        #[arg(default_value = "20241231")]
        end: String,
    },
    /// Exercise the market data cache and print its counters
    CacheStats {
        /// Symbols to preload (defaults to a small built-in set)
        #[arg(long = "symbol", value_name = "SYMBOL")]
        symbols: Vec<String>,
        /// Range start (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_START_DATE)]
        start: String,
        /// Range end (YYYYMMDD)
        #[arg(long, default_value = DEFAULT_END_DATE)]
        end: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = RuntimeSettings::from_env()?;
    let cache = MarketDataCache::with_settings(settings.cache_ttl, MAX_ENTRY_AGE);
    let _sweeper = cache.spawn_cleanup_task(settings.cache_cleanup_interval);
    let data = DataService::new(Arc::new(SyntheticDataProvider::new()), cache);
    let executor = RuleStrategyExecutor::with_default_strategies()?;
    info!(
        "Starting backtest-core with {} built-in strategies. Simulated fills are not financial advice.",
        executor.strategy_ids().len()
    );
    let engine = BacktestEngine::new(data, Arc::new(executor));
    let optimizer = ParameterOptimizer::new(engine.clone());

    match command {
        Commands::Demo {
            strategies,
            symbols,
            start,
            end,
            cash,
            commission,
            benchmark,
        } => {
            demo::run(
                &engine,
                &resolve_strategy_ids(strategies),
                &resolve_symbols(symbols),
                &start,
                &end,
                cash.unwrap_or(settings.initial_cash),
                commission.unwrap_or(settings.commission_rate),
                benchmark.or_else(|| settings.benchmark_symbol.clone()),
            )
            .await?;
        }
        Commands::Optimize {
            strategy_id,
            algorithm,
            target_metric,
            symbols,
            start,
            end,
            cash,
            commission,
            max_combinations,
            population_size,
            generations,
        } => {
            let algorithm = OptimizationAlgorithm::from_str(&algorithm)?;
            optimize::run(
                &engine,
                &optimizer,
                &strategy_id,
                algorithm,
                &target_metric,
                &resolve_symbols(symbols),
                &start,
                &end,
                cash.unwrap_or(settings.initial_cash),
                commission.unwrap_or(settings.commission_rate),
                max_combinations,
                population_size,
                generations,
            )
            .await?;
        }
        Commands::Calendar { start, end } => {
            calendar::run(&start, &end)?;
        }
        Commands::CacheStats {
            symbols,
            start,
            end,
        } => {
            cache_stats::run(engine.data(), &resolve_symbols(symbols), &start, &end)?;
        }
    }

    Ok(())
}

fn resolve_strategy_ids(strategies: Vec<String>) -> Vec<String> {
    if strategies.is_empty() {
        default_strategies()
            .into_iter()
            .map(|info| info.id)
            .collect()
    } else {
        strategies
    }
}

fn resolve_symbols(symbols: Vec<String>) -> Vec<String> {
    if symbols.is_empty() {
        DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
    } else {
        symbols
    }
}
