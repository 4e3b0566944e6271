use crate::calendar::TradingCalendar;
use crate::error::{EngineError, Result};
use crate::market_data::{parse_compact_date, DataService};
use crate::models::{
    Backtest, BacktestProgress, BacktestResult, BacktestResults, BacktestSpec, BacktestStatus,
    EquityPoint, MarketData, Portfolio, StrategyInfo, Trade,
};
use crate::performance::PerformanceCalculator;
use crate::portfolio::PortfolioSimulator;
use crate::strategy::StrategyExecutor;
use crate::validator::TradeValidator;
use chrono::{NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Key under which the averaged multi-strategy curve is stored next to the
/// per-strategy curves.
pub const COMBINED_CURVE_KEY: &str = "combined";

const MIN_TIMEOUT_MINUTES: i64 = 10;
const MAX_TIMEOUT_MINUTES: i64 = 240;
const PROGRESS_LOG_STEP: f64 = 10.0;
/// Small pause between simulated days so a long run stays cancellable and
/// does not monopolize a worker thread.
const INTER_DAY_DELAY: Duration = Duration::from_millis(1);
const NAME_SUFFIX_LIMIT: u32 = 1000;

/// Inputs for a synchronous single-strategy run, used by the optimizer to
/// score parameter combinations without registering a full backtest.
#[derive(Debug, Clone)]
pub struct QuickBacktestParams {
    pub strategy_id: String,
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_cash: f64,
    pub commission: f64,
}

/// Everything a simulated day needs that stays fixed for the whole run.
struct SimulationContext<'a> {
    backtest_id: &'a str,
    symbols: &'a [String],
    strategies: &'a [StrategyInfo],
    range_start: NaiveDate,
    range_end: NaiveDate,
    initial_cash: f64,
    benchmark: Option<&'a str>,
    simulator: PortfolioSimulator,
}

/// Mutable per-run accumulators, keyed by strategy id. Every strategy gets
/// the full initial cash and trades as if it were backtested alone.
struct SimulationState {
    portfolios: HashMap<String, Portfolio>,
    trades: HashMap<String, Vec<Trade>>,
    curves: HashMap<String, Vec<EquityPoint>>,
    returns: HashMap<String, Vec<f64>>,
    benchmark_returns: Vec<f64>,
    benchmark_start_close: Option<f64>,
    benchmark_last_close: Option<f64>,
    benchmark_last_value: f64,
}

impl SimulationState {
    fn new(strategies: &[StrategyInfo], initial_cash: f64) -> Self {
        let mut portfolios = HashMap::new();
        for strategy in strategies {
            portfolios.insert(
                strategy.id.clone(),
                PortfolioSimulator::new_portfolio(initial_cash),
            );
        }
        Self {
            portfolios,
            trades: HashMap::new(),
            curves: HashMap::new(),
            returns: HashMap::new(),
            benchmark_returns: Vec::new(),
            benchmark_start_close: None,
            benchmark_last_close: None,
            benchmark_last_value: initial_cash,
        }
    }
}

struct EngineInner {
    backtests: DashMap<String, Backtest>,
    progress: DashMap<String, BacktestProgress>,
    results: DashMap<String, HashMap<String, BacktestResult>>,
    equity: DashMap<String, HashMap<String, Vec<EquityPoint>>>,
    trades: DashMap<String, Vec<Trade>>,
    running: DashMap<String, Arc<AtomicBool>>,
    data: DataService,
    executor: Arc<dyn StrategyExecutor>,
    calendar: TradingCalendar,
}

/// Owns backtest records and runs their simulations on detached tasks.
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct BacktestEngine {
    inner: Arc<EngineInner>,
}

impl BacktestEngine {
    pub fn new(data: DataService, executor: Arc<dyn StrategyExecutor>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backtests: DashMap::new(),
                progress: DashMap::new(),
                results: DashMap::new(),
                equity: DashMap::new(),
                trades: DashMap::new(),
                running: DashMap::new(),
                data,
                executor,
                calendar: TradingCalendar::new(),
            }),
        }
    }

    pub fn data(&self) -> &DataService {
        &self.inner.data
    }

    pub fn executor(&self) -> Arc<dyn StrategyExecutor> {
        Arc::clone(&self.inner.executor)
    }

    /// Registers a new backtest in `Pending` state. The caller may supply an
    /// id; otherwise one is generated. Duplicate display names get a
    /// ` (n)` suffix so listings stay unambiguous.
    pub fn create_backtest(&self, spec: BacktestSpec) -> Result<Backtest> {
        parse_compact_date(&spec.start_date)
            .map_err(|err| EngineError::InvalidState(format!("bad start date: {err}")))?;
        parse_compact_date(&spec.end_date)
            .map_err(|err| EngineError::InvalidState(format!("bad end date: {err}")))?;

        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let name = self.unique_name(&spec.name);

        let backtest = Backtest {
            id: id.clone(),
            name,
            strategy_ids: spec.strategy_ids,
            symbols: spec.symbols,
            start_date: spec.start_date,
            end_date: spec.end_date,
            initial_cash: spec.initial_cash,
            commission: spec.commission,
            slippage: spec.slippage,
            benchmark: spec.benchmark,
            status: BacktestStatus::Pending,
            progress: 0.0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        match self.inner.backtests.entry(id) {
            Entry::Occupied(occupied) => Err(EngineError::InvalidState(format!(
                "backtest {} already exists",
                occupied.key()
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(backtest.clone());
                info!("Created backtest {} ({})", backtest.id, backtest.name);
                Ok(backtest)
            }
        }
    }

    fn unique_name(&self, original: &str) -> String {
        if !self.name_exists(original) {
            return original.to_string();
        }
        for counter in 2..=NAME_SUFFIX_LIMIT {
            let candidate = format!("{} ({})", original, counter);
            if !self.name_exists(&candidate) {
                return candidate;
            }
        }
        format!("{} ({})", original, Utc::now().timestamp())
    }

    fn name_exists(&self, name: &str) -> bool {
        self.inner
            .backtests
            .iter()
            .any(|entry| entry.value().name == name)
    }

    /// Moves a pending backtest to `Running` and spawns its simulation as a
    /// detached task. `strategies` must carry one definition per configured
    /// strategy id. Returns immediately; progress is polled separately.
    pub fn start_backtest(&self, backtest_id: &str, strategies: Vec<StrategyInfo>) -> Result<()> {
        let (backtest, deadline) = {
            let mut entry = self
                .inner
                .backtests
                .get_mut(backtest_id)
                .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))?;

            if entry.status != BacktestStatus::Pending {
                return Err(EngineError::InvalidState(format!(
                    "backtest {} cannot start from status {}",
                    backtest_id,
                    entry.status.as_str()
                )));
            }
            if strategies.is_empty() {
                return Err(EngineError::InvalidState(
                    "at least one strategy is required".to_string(),
                ));
            }
            if strategies.len() != entry.strategy_ids.len() {
                return Err(EngineError::InvalidState(format!(
                    "backtest {} configures {} strategies but {} were provided",
                    backtest_id,
                    entry.strategy_ids.len(),
                    strategies.len()
                )));
            }

            let start = parse_compact_date(&entry.start_date)
                .map_err(|err| EngineError::InvalidState(format!("bad start date: {err}")))?;
            let end = parse_compact_date(&entry.end_date)
                .map_err(|err| EngineError::InvalidState(format!("bad end date: {err}")))?;

            entry.status = BacktestStatus::Running;
            entry.progress = 0.0;
            entry.started_at = Some(Utc::now());

            let calendar_days = (end - start).num_days().max(0);
            let timeout_minutes = (calendar_days / 3 * strategies.len() as i64)
                .clamp(MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES);
            info!(
                "Backtest {} allowed {} minutes ({} calendar days, {} strategies)",
                backtest_id,
                timeout_minutes,
                calendar_days,
                strategies.len()
            );
            let deadline = Instant::now() + Duration::from_secs(timeout_minutes as u64 * 60);

            (entry.clone(), deadline)
        };

        self.inner.progress.insert(
            backtest_id.to_string(),
            BacktestProgress {
                backtest_id: backtest_id.to_string(),
                status: BacktestStatus::Running,
                progress: 0.0,
                message: format!("Preparing backtest environment ({} strategies)", strategies.len()),
                error: None,
            },
        );

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .running
            .insert(backtest_id.to_string(), Arc::clone(&cancel));

        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine.run_simulation(backtest, strategies, cancel, deadline).await;
        });

        // A panic inside the simulation must not leave the record stuck in
        // `Running`, so a watcher task converts it to a failure.
        let engine = self.clone();
        let watched_id = backtest_id.to_string();
        tokio::spawn(async move {
            if let Err(join_error) = task.await {
                if join_error.is_panic() {
                    error!("Backtest {} task panicked: {}", watched_id, join_error);
                    engine.mark_terminal(
                        &watched_id,
                        BacktestStatus::Failed,
                        "Simulation panicked",
                    );
                }
            }
            engine.inner.running.remove(&watched_id);
        });

        Ok(())
    }

    async fn run_simulation(
        self,
        backtest: Backtest,
        strategies: Vec<StrategyInfo>,
        cancel: Arc<AtomicBool>,
        deadline: Instant,
    ) {
        info!(
            "Backtest {} running {} strategies over {:?}",
            backtest.id,
            strategies.len(),
            backtest.symbols
        );
        match self.simulate(&backtest, &strategies, &cancel, deadline).await {
            Ok(()) => info!("Backtest {} completed", backtest.id),
            Err(EngineError::Cancelled(_)) => {
                info!("Backtest {} cancelled mid-run", backtest.id);
                self.mark_terminal(&backtest.id, BacktestStatus::Cancelled, "Backtest cancelled");
            }
            Err(EngineError::Timeout(_)) => {
                error!("Backtest {} timed out", backtest.id);
                self.mark_terminal(&backtest.id, BacktestStatus::Failed, "Backtest timed out");
            }
            Err(err) => {
                error!("Backtest {} failed: {}", backtest.id, err);
                self.mark_terminal(&backtest.id, BacktestStatus::Failed, &err.to_string());
            }
        }
    }

    async fn simulate(
        &self,
        backtest: &Backtest,
        strategies: &[StrategyInfo],
        cancel: &AtomicBool,
        deadline: Instant,
    ) -> Result<()> {
        let start = parse_compact_date(&backtest.start_date)?;
        let end = parse_compact_date(&backtest.end_date)?;

        let mut preload_symbols = backtest.symbols.clone();
        if let Some(benchmark) = &backtest.benchmark {
            if !preload_symbols.contains(benchmark) {
                preload_symbols.push(benchmark.clone());
            }
        }
        self.inner.data.preload(&preload_symbols, start, end);

        let trading_days = self.inner.calendar.trading_days_in_range(start, end);
        let total = trading_days.len();
        info!(
            "Backtest {} covers {} trading days between {} and {}",
            backtest.id, total, backtest.start_date, backtest.end_date
        );

        self.inner.executor.begin_run(&backtest.strategy_ids);

        let ctx = SimulationContext {
            backtest_id: &backtest.id,
            symbols: &backtest.symbols,
            strategies,
            range_start: start,
            range_end: end,
            initial_cash: backtest.initial_cash,
            benchmark: backtest.benchmark.as_deref(),
            simulator: PortfolioSimulator::new(backtest.commission),
        };
        let mut state = SimulationState::new(strategies, backtest.initial_cash);

        let mut last_logged = -PROGRESS_LOG_STEP;
        for (day_index, date) in trading_days.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled(backtest.id.clone()));
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout(format!(
                    "backtest {} exceeded its deadline",
                    backtest.id
                )));
            }

            let progress = day_index as f64 / total as f64 * 100.0;
            if progress - last_logged >= PROGRESS_LOG_STEP || day_index + 1 == total {
                info!("Backtest {} at {:.0}% ({})", backtest.id, progress, date);
                last_logged = progress;
            }
            self.update_progress(
                &backtest.id,
                progress,
                &format!("Running backtest... {}", date.format("%Y-%m-%d")),
            );

            self.simulate_day(&ctx, &mut state, *date);

            tokio::time::sleep(INTER_DAY_DELAY).await;
        }

        self.finalize(backtest, strategies, state);
        Ok(())
    }

    /// One trading day: revalue so signals see current prices, execute each
    /// strategy on each symbol's bar, then revalue again and record the
    /// equity point and daily return.
    fn simulate_day(
        &self,
        ctx: &SimulationContext<'_>,
        state: &mut SimulationState,
        date: NaiveDate,
    ) {
        let mut day_bars: HashMap<String, MarketData> = HashMap::new();
        for symbol in ctx.symbols {
            match self
                .inner
                .data
                .bar_for_date(symbol, date, ctx.range_start, ctx.range_end)
            {
                Some(bar) => {
                    day_bars.insert(symbol.clone(), bar);
                }
                None => debug!("No bar for {} on {}, symbol skipped today", symbol, date),
            }
        }

        for strategy in ctx.strategies {
            if let Some(portfolio) = state.portfolios.get_mut(&strategy.id) {
                ctx.simulator
                    .revalue(portfolio, |symbol| day_bars.get(symbol).map(|bar| bar.close));
            }
        }

        for symbol in ctx.symbols {
            let Some(bar) = day_bars.get(symbol) else {
                continue;
            };
            for strategy in ctx.strategies {
                let signal = match self.inner.executor.execute_strategy(&strategy.id, bar) {
                    Ok(signal) => signal,
                    Err(err) => {
                        warn!(
                            "Strategy {} failed on {} for {}: {:#}",
                            strategy.id, date, symbol, err
                        );
                        continue;
                    }
                };

                let Some(portfolio) = state.portfolios.get_mut(&strategy.id) else {
                    continue;
                };
                if let Some(trade) =
                    ctx.simulator
                        .execute_signal(portfolio, &signal, bar, ctx.backtest_id, &strategy.id)
                {
                    debug!(
                        "{} {} x{} at {:.2} for strategy {}",
                        trade.side.as_str(),
                        trade.symbol,
                        trade.quantity,
                        trade.price,
                        strategy.id
                    );
                    state
                        .trades
                        .entry(strategy.id.clone())
                        .or_default()
                        .push(trade);
                }
            }
        }

        let benchmark_value = self.benchmark_value_for_day(ctx, state, date);

        for strategy in ctx.strategies {
            let Some(portfolio) = state.portfolios.get_mut(&strategy.id) else {
                continue;
            };
            ctx.simulator
                .revalue(portfolio, |symbol| day_bars.get(symbol).map(|bar| bar.close));
            let total_value = portfolio.total_value;
            let cash = portfolio.cash;

            let curve = state.curves.entry(strategy.id.clone()).or_default();
            if let Some(previous) = curve.last() {
                if previous.portfolio_value > 0.0 {
                    let daily_return =
                        (total_value - previous.portfolio_value) / previous.portfolio_value;
                    state
                        .returns
                        .entry(strategy.id.clone())
                        .or_default()
                        .push(daily_return);
                }
            }
            curve.push(EquityPoint {
                date: date.format("%Y-%m-%d").to_string(),
                portfolio_value: total_value,
                benchmark_value,
                cash,
                holdings: total_value - cash,
            });
        }
    }

    /// Tracks a buy-and-hold position in the benchmark symbol worth the
    /// initial cash. Days without a usable close carry the last value.
    fn benchmark_value_for_day(
        &self,
        ctx: &SimulationContext<'_>,
        state: &mut SimulationState,
        date: NaiveDate,
    ) -> f64 {
        let Some(symbol) = ctx.benchmark else {
            return 0.0;
        };

        if let Some(bar) = self
            .inner
            .data
            .bar_for_date(symbol, date, ctx.range_start, ctx.range_end)
        {
            if bar.close > 0.0 {
                if let Some(previous) = state.benchmark_last_close {
                    if previous > 0.0 {
                        state.benchmark_returns.push((bar.close - previous) / previous);
                    }
                }
                let start_close = *state.benchmark_start_close.get_or_insert(bar.close);
                state.benchmark_last_close = Some(bar.close);
                state.benchmark_last_value = ctx.initial_cash * bar.close / start_close;
            }
        }
        state.benchmark_last_value
    }

    fn finalize(&self, backtest: &Backtest, strategies: &[StrategyInfo], state: SimulationState) {
        let SimulationState {
            trades,
            mut curves,
            returns,
            benchmark_returns,
            ..
        } = state;

        let mut performance = HashMap::new();
        let mut all_trades = Vec::new();
        for strategy in strategies {
            let strategy_returns = returns.get(&strategy.id).cloned().unwrap_or_default();
            let mut result = PerformanceCalculator::calculate(&strategy_returns, &benchmark_returns);
            let strategy_trades = trades.get(&strategy.id).cloned().unwrap_or_default();
            result.total_trades = strategy_trades.len() as i32;
            info!(
                "Strategy {} finished backtest {}: total return {:.4}, sharpe {:.4}, {} trades",
                strategy.id, backtest.id, result.total_return, result.sharpe_ratio, result.total_trades
            );
            all_trades.extend(strategy_trades);
            performance.insert(strategy.id.clone(), result);
        }

        let combined = {
            let ordered: Vec<&[EquityPoint]> = strategies
                .iter()
                .filter_map(|s| curves.get(&s.id).map(|curve| curve.as_slice()))
                .collect();
            combine_equity_curves(&ordered)
        };
        if !combined.is_empty() {
            curves.insert(COMBINED_CURVE_KEY.to_string(), combined);
        }

        self.inner
            .trades
            .insert(backtest.id.clone(), all_trades);
        self.inner
            .results
            .insert(backtest.id.clone(), performance);
        self.inner.equity.insert(backtest.id.clone(), curves);

        self.mark_terminal(&backtest.id, BacktestStatus::Completed, "Backtest completed");
    }

    /// Synchronous single-strategy run sharing the daily simulation with the
    /// full engine, minus progress tracking, pacing and persistence. Used
    /// for parameter evaluation where thousands of runs are scored.
    pub fn run_quick_backtest(
        &self,
        params: &QuickBacktestParams,
        cancel: &AtomicBool,
    ) -> Result<BacktestResult> {
        let info = self.inner.executor.get_strategy(&params.strategy_id)?;

        self.inner
            .data
            .preload(params.symbols.as_slice(), params.start, params.end);
        let trading_days = self
            .inner
            .calendar
            .trading_days_in_range(params.start, params.end);

        let strategy_ids = vec![params.strategy_id.clone()];
        self.inner.executor.begin_run(&strategy_ids);

        let strategies = vec![info];
        let ctx = SimulationContext {
            backtest_id: &params.strategy_id,
            symbols: params.symbols.as_slice(),
            strategies: &strategies,
            range_start: params.start,
            range_end: params.end,
            initial_cash: params.initial_cash,
            benchmark: None,
            simulator: PortfolioSimulator::new(params.commission),
        };
        let mut state = SimulationState::new(&strategies, params.initial_cash);

        for date in &trading_days {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled(format!(
                    "evaluation of {}",
                    params.strategy_id
                )));
            }
            self.simulate_day(&ctx, &mut state, *date);
        }

        let strategy_returns = state
            .returns
            .remove(&params.strategy_id)
            .unwrap_or_default();
        let mut result = PerformanceCalculator::calculate(&strategy_returns, &[]);
        result.total_trades = state
            .trades
            .get(&params.strategy_id)
            .map(|trades| trades.len())
            .unwrap_or(0) as i32;
        Ok(result)
    }

    /// Requests cancellation of a running backtest. The record flips to
    /// `Cancelled` immediately; the simulation task notices the flag at its
    /// next day boundary and exits without touching the record again.
    pub fn cancel_backtest(&self, backtest_id: &str) -> Result<()> {
        {
            let backtest = self
                .inner
                .backtests
                .get(backtest_id)
                .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))?;
            if backtest.status != BacktestStatus::Running {
                return Err(EngineError::InvalidState(format!(
                    "backtest {} cannot be cancelled from status {}",
                    backtest_id,
                    backtest.status.as_str()
                )));
            }
        }

        if let Some(flag) = self.inner.running.get(backtest_id) {
            flag.store(true, Ordering::Relaxed);
        }
        self.mark_terminal(backtest_id, BacktestStatus::Cancelled, "Backtest cancelled");
        info!("Backtest {} cancelled", backtest_id);
        Ok(())
    }

    pub fn get_progress(&self, backtest_id: &str) -> Result<BacktestProgress> {
        let backtest = self
            .inner
            .backtests
            .get(backtest_id)
            .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))?
            .value()
            .clone();

        if let Some(progress) = self.inner.progress.get(backtest_id) {
            return Ok(progress.value().clone());
        }

        // No live entry yet, derive one from the stored status.
        let mut progress = BacktestProgress {
            backtest_id: backtest_id.to_string(),
            status: backtest.status.clone(),
            progress: backtest.progress,
            message: String::new(),
            error: None,
        };
        match backtest.status {
            BacktestStatus::Pending => progress.message = "Waiting to start".to_string(),
            BacktestStatus::Running => progress.message = "Running...".to_string(),
            BacktestStatus::Completed => {
                progress.message = "Completed".to_string();
                progress.progress = 100.0;
            }
            BacktestStatus::Failed => {
                progress.message = "Execution failed".to_string();
                progress.error = backtest.error_message.clone();
            }
            BacktestStatus::Cancelled => progress.message = "Cancelled".to_string(),
        }
        Ok(progress)
    }

    /// Full results for a completed backtest. Trades are sanity-checked on
    /// the way out; findings are logged and never block delivery. If no
    /// stored curves exist the curves are rebuilt from trade snapshots,
    /// which remain the system of record.
    pub fn get_results(&self, backtest_id: &str) -> Result<BacktestResults> {
        let backtest = self
            .inner
            .backtests
            .get(backtest_id)
            .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))?
            .value()
            .clone();
        if backtest.status != BacktestStatus::Completed {
            return Err(EngineError::InvalidState(format!(
                "backtest {} is {}, results are only available once completed",
                backtest_id,
                backtest.status.as_str()
            )));
        }

        let performance = self
            .inner
            .results
            .get(backtest_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "results missing for completed backtest {}",
                    backtest_id
                ))
            })?;
        let trades = self
            .inner
            .trades
            .get(backtest_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        TradeValidator::validate(&trades, backtest_id);

        let mut equity_curves = self
            .inner
            .equity
            .get(backtest_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if equity_curves.is_empty() && !trades.is_empty() {
            for strategy_id in &backtest.strategy_ids {
                let strategy_trades: Vec<Trade> = trades
                    .iter()
                    .filter(|trade| &trade.strategy_id == strategy_id)
                    .cloned()
                    .collect();
                if !strategy_trades.is_empty() {
                    equity_curves.insert(
                        strategy_id.clone(),
                        equity_curve_from_trades(&backtest, &strategy_trades),
                    );
                }
            }
        }

        let combined_metrics = if performance.len() > 1 {
            let ordered: Vec<BacktestResult> = backtest
                .strategy_ids
                .iter()
                .filter_map(|id| performance.get(id).cloned())
                .collect();
            PerformanceCalculator::combine(&ordered)
        } else {
            None
        };

        Ok(BacktestResults {
            backtest_id: backtest_id.to_string(),
            performance,
            equity_curves,
            trades,
            strategies: backtest.strategy_ids.clone(),
            combined_metrics,
        })
    }

    /// Removes a backtest and everything stored under it. A running
    /// simulation is signalled to stop first.
    pub fn delete_backtest(&self, backtest_id: &str) -> Result<()> {
        let status = {
            let backtest = self
                .inner
                .backtests
                .get(backtest_id)
                .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))?;
            backtest.status.clone()
        };

        if status == BacktestStatus::Running {
            if let Some(flag) = self.inner.running.get(backtest_id) {
                flag.store(true, Ordering::Relaxed);
            }
        }

        self.inner.backtests.remove(backtest_id);
        self.inner.progress.remove(backtest_id);
        self.inner.results.remove(backtest_id);
        self.inner.equity.remove(backtest_id);
        self.inner.trades.remove(backtest_id);
        self.inner.running.remove(backtest_id);
        info!("Deleted backtest {}", backtest_id);
        Ok(())
    }

    pub fn get_backtest(&self, backtest_id: &str) -> Result<Backtest> {
        self.inner
            .backtests
            .get(backtest_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("backtest {}", backtest_id)))
    }

    /// Backtests matching the optional strategy and status filters, newest
    /// first.
    pub fn list_backtests(
        &self,
        strategy_id: Option<&str>,
        status: Option<&BacktestStatus>,
    ) -> Vec<Backtest> {
        let mut matching: Vec<Backtest> = self
            .inner
            .backtests
            .iter()
            .filter(|entry| {
                let backtest = entry.value();
                strategy_id.map_or(true, |id| backtest.strategy_ids.iter().any(|s| s == id))
                    && status.map_or(true, |wanted| backtest.status == *wanted)
            })
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching
    }

    fn update_progress(&self, backtest_id: &str, progress: f64, message: &str) {
        if let Some(mut entry) = self.inner.progress.get_mut(backtest_id) {
            entry.progress = progress;
            entry.message = message.to_string();
        }
        if let Some(mut backtest) = self.inner.backtests.get_mut(backtest_id) {
            backtest.progress = progress;
        }
    }

    /// Moves a backtest into a terminal status. A record that is already
    /// terminal is left untouched, so a late-finishing task can never
    /// overwrite a cancellation.
    fn mark_terminal(&self, backtest_id: &str, status: BacktestStatus, message: &str) {
        {
            let Some(mut backtest) = self.inner.backtests.get_mut(backtest_id) else {
                return;
            };
            if backtest.status.is_terminal() {
                debug!(
                    "Backtest {} already {}, ignoring transition to {}",
                    backtest_id,
                    backtest.status.as_str(),
                    status.as_str()
                );
                return;
            }
            backtest.status = status.clone();
            backtest.completed_at = Some(Utc::now());
            if status == BacktestStatus::Completed {
                backtest.progress = 100.0;
            }
            if status == BacktestStatus::Failed {
                backtest.error_message = Some(message.to_string());
            }
        }

        if let Some(mut progress) = self.inner.progress.get_mut(backtest_id) {
            progress.status = status.clone();
            progress.message = message.to_string();
            if status == BacktestStatus::Completed {
                progress.progress = 100.0;
            }
            if status == BacktestStatus::Failed {
                progress.error = Some(message.to_string());
            }
        }
    }
}

/// Element-wise average of the per-strategy curves. Shorter curves simply
/// stop contributing, so the divisor is the number of curves present at
/// each index.
fn combine_equity_curves(curves: &[&[EquityPoint]]) -> Vec<EquityPoint> {
    let max_len = curves.iter().map(|curve| curve.len()).max().unwrap_or(0);
    let mut combined = Vec::with_capacity(max_len);

    for i in 0..max_len {
        let mut portfolio_value = 0.0;
        let mut benchmark_value = 0.0;
        let mut cash = 0.0;
        let mut holdings = 0.0;
        let mut date = String::new();
        let mut count = 0usize;
        for curve in curves {
            if let Some(point) = curve.get(i) {
                portfolio_value += point.portfolio_value;
                benchmark_value += point.benchmark_value;
                cash += point.cash;
                holdings += point.holdings;
                date = point.date.clone();
                count += 1;
            }
        }
        if count > 0 {
            let n = count as f64;
            combined.push(EquityPoint {
                date,
                portfolio_value: portfolio_value / n,
                benchmark_value: benchmark_value / n,
                cash: cash / n,
                holdings: holdings / n,
            });
        }
    }
    combined
}

/// Rebuilds an equity curve from the cash and holdings snapshots each trade
/// carries. Coarse (one point per trade) but derived from real fills. The
/// curve opens at the initial cash; a trade-free log closes with a second
/// point at the end date so the curve still spans the window.
pub fn equity_curve_from_trades(backtest: &Backtest, trades: &[Trade]) -> Vec<EquityPoint> {
    let display_date = |raw: &str| {
        parse_compact_date(raw)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| raw.to_string())
    };
    let flat_point = |date: String| EquityPoint {
        date,
        portfolio_value: backtest.initial_cash,
        benchmark_value: 0.0,
        cash: backtest.initial_cash,
        holdings: 0.0,
    };

    let mut curve = vec![flat_point(display_date(&backtest.start_date))];
    if trades.is_empty() {
        curve.push(flat_point(display_date(&backtest.end_date)));
        return curve;
    }

    let mut sorted: Vec<&Trade> = trades.iter().collect();
    sorted.sort_by_key(|trade| trade.executed_at);
    curve.extend(sorted.iter().map(|trade| EquityPoint {
        date: trade.executed_at.format("%Y-%m-%d").to_string(),
        portfolio_value: trade.total_assets,
        benchmark_value: 0.0,
        cash: trade.cash_balance,
        holdings: trade.holding_assets,
    }));
    curve
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MarketDataCache;
    use crate::market_data::SyntheticDataProvider;
    use crate::models::{SignalAction, StrategySignal, TradeSide};
    use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
    use anyhow::anyhow;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Emits a buy on one call number and a sell on another, per strategy,
    /// so trade timing in tests is exact.
    struct ScriptedExecutor {
        strategies: DashMap<String, StrategyInfo>,
        calls: Mutex<HashMap<String, usize>>,
        buy_on: usize,
        sell_on: usize,
    }

    impl ScriptedExecutor {
        fn new(buy_on: usize, sell_on: usize) -> Self {
            Self {
                strategies: DashMap::new(),
                calls: Mutex::new(HashMap::new()),
                buy_on,
                sell_on,
            }
        }
    }

    impl StrategyExecutor for ScriptedExecutor {
        fn get_strategy(&self, strategy_id: &str) -> anyhow::Result<StrategyInfo> {
            self.strategies
                .get(strategy_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| anyhow!("Strategy not found: {}", strategy_id))
        }

        fn register_strategy(&self, info: StrategyInfo) -> anyhow::Result<()> {
            self.strategies.insert(info.id.clone(), info);
            Ok(())
        }

        fn remove_strategy(&self, strategy_id: &str) {
            self.strategies.remove(strategy_id);
        }

        fn execute_strategy(
            &self,
            strategy_id: &str,
            _data: &MarketData,
        ) -> anyhow::Result<StrategySignal> {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(strategy_id.to_string()).or_insert(0);
            *count += 1;
            Ok(if *count == self.buy_on {
                buy_signal(0.9)
            } else if *count == self.sell_on {
                sell_signal(0.9)
            } else {
                hold_signal()
            })
        }
    }

    fn test_engine(executor: Arc<dyn StrategyExecutor>) -> BacktestEngine {
        let data = DataService::new(Arc::new(SyntheticDataProvider::new()), MarketDataCache::new());
        BacktestEngine::new(data, executor)
    }

    fn spec(name: &str) -> BacktestSpec {
        BacktestSpec {
            id: None,
            name: name.to_string(),
            strategy_ids: vec!["s1".to_string()],
            symbols: vec!["600519".to_string()],
            start_date: "20240304".to_string(),
            end_date: "20240315".to_string(),
            initial_cash: 100_000.0,
            commission: 0.0003,
            slippage: 0.0,
            benchmark: None,
        }
    }

    fn strategy_info(id: &str) -> StrategyInfo {
        StrategyInfo {
            id: id.to_string(),
            name: id.to_string(),
            kind: "scripted".to_string(),
            parameters: HashMap::new(),
        }
    }

    #[test]
    fn test_create_backtest_deduplicates_names() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));

        let first = engine.create_backtest(spec("demo")).unwrap();
        let second = engine.create_backtest(spec("demo")).unwrap();
        let third = engine.create_backtest(spec("demo")).unwrap();

        assert_eq!(first.name, "demo");
        assert_eq!(second.name, "demo (2)");
        assert_eq!(third.name, "demo (3)");
        assert_eq!(first.status, BacktestStatus::Pending);
    }

    #[test]
    fn test_create_backtest_rejects_duplicate_id() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));

        let mut with_id = spec("a");
        with_id.id = Some("fixed".to_string());
        engine.create_backtest(with_id.clone()).unwrap();

        with_id.name = "b".to_string();
        let err = engine.create_backtest(with_id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_create_backtest_rejects_bad_dates() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let mut bad = spec("bad");
        bad.start_date = "2024-03-04".to_string();
        assert!(engine.create_backtest(bad).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_backtest_requires_matching_strategies() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("counts")).unwrap();

        let err = engine.start_backtest(&backtest.id, vec![]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let err = engine
            .start_backtest(
                &backtest.id,
                vec![strategy_info("s1"), strategy_info("s2")],
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // Still pending after the rejected attempts.
        assert_eq!(
            engine.get_backtest(&backtest.id).unwrap().status,
            BacktestStatus::Pending
        );
    }

    #[test]
    fn test_start_backtest_requires_pending_status() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("done")).unwrap();
        engine
            .inner
            .backtests
            .get_mut(&backtest.id)
            .unwrap()
            .status = BacktestStatus::Completed;

        // start_backtest only spawns after validation passes, so no runtime
        // is needed for the rejection path.
        let err = engine
            .start_backtest(&backtest.id, vec![strategy_info("s1")])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[test]
    fn test_cancel_requires_running_status() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("idle")).unwrap();

        let err = engine.cancel_backtest(&backtest.id).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(matches!(
            engine.cancel_backtest("missing").unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_results_require_completion() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("pending")).unwrap();

        assert!(matches!(
            engine.get_results(&backtest.id).unwrap_err(),
            EngineError::InvalidState(_)
        ));
        assert!(matches!(
            engine.get_results("missing").unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_terminal_status_is_never_overwritten() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("protected")).unwrap();
        engine
            .inner
            .backtests
            .get_mut(&backtest.id)
            .unwrap()
            .status = BacktestStatus::Running;

        engine.mark_terminal(&backtest.id, BacktestStatus::Cancelled, "Backtest cancelled");
        engine.mark_terminal(&backtest.id, BacktestStatus::Failed, "too late");

        let stored = engine.get_backtest(&backtest.id).unwrap();
        assert_eq!(stored.status, BacktestStatus::Cancelled);
        assert!(stored.error_message.is_none());
    }

    #[test]
    fn test_progress_defaults_by_status() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("fresh")).unwrap();

        let progress = engine.get_progress(&backtest.id).unwrap();
        assert_eq!(progress.message, "Waiting to start");
        assert_eq!(progress.progress, 0.0);

        engine
            .inner
            .backtests
            .get_mut(&backtest.id)
            .unwrap()
            .status = BacktestStatus::Completed;
        let progress = engine.get_progress(&backtest.id).unwrap();
        assert_eq!(progress.message, "Completed");
        assert_eq!(progress.progress, 100.0);
    }

    #[test]
    fn test_delete_backtest_clears_all_state() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("gone")).unwrap();

        engine.delete_backtest(&backtest.id).unwrap();
        assert!(matches!(
            engine.get_backtest(&backtest.id).unwrap_err(),
            EngineError::NotFound(_)
        ));
        assert!(matches!(
            engine.delete_backtest(&backtest.id).unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_list_backtests_filters_and_orders() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        engine.create_backtest(spec("one")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let two = engine.create_backtest(spec("two")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut other = spec("three");
        other.strategy_ids = vec!["s2".to_string()];
        engine.create_backtest(other).unwrap();

        let all = engine.list_backtests(None, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "three");
        assert_eq!(all[2].name, "one");

        let for_s1 = engine.list_backtests(Some("s1"), None);
        assert_eq!(for_s1.len(), 2);
        assert!(for_s1.iter().all(|b| b.strategy_ids == vec!["s1".to_string()]));

        engine.inner.backtests.get_mut(&two.id).unwrap().status = BacktestStatus::Cancelled;
        let cancelled = engine.list_backtests(None, Some(&BacktestStatus::Cancelled));
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, two.id);
        assert!(engine
            .list_backtests(Some("s2"), Some(&BacktestStatus::Cancelled))
            .is_empty());
    }

    #[test]
    fn test_quick_backtest_executes_scripted_trades() {
        let executor = Arc::new(ScriptedExecutor::new(1, 5));
        executor.register_strategy(strategy_info("s1")).unwrap();
        let engine = test_engine(executor);

        let params = QuickBacktestParams {
            strategy_id: "s1".to_string(),
            symbols: vec!["600519".to_string()],
            // 2024-03-04 through 2024-03-15 is ten straight trading days.
            start: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            initial_cash: 100_000.0,
            commission: 0.0003,
        };
        let cancel = AtomicBool::new(false);
        let result = engine.run_quick_backtest(&params, &cancel).unwrap();

        assert_eq!(result.total_trades, 2);
    }

    #[test]
    fn test_quick_backtest_honours_cancellation() {
        let executor = Arc::new(ScriptedExecutor::new(1, 5));
        executor.register_strategy(strategy_info("s1")).unwrap();
        let engine = test_engine(executor);

        let params = QuickBacktestParams {
            strategy_id: "s1".to_string(),
            symbols: vec!["600519".to_string()],
            start: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            initial_cash: 100_000.0,
            commission: 0.0003,
        };
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            engine.run_quick_backtest(&params, &cancel).unwrap_err(),
            EngineError::Cancelled(_)
        ));
    }

    #[test]
    fn test_combine_equity_curves_averages_and_handles_short_curves() {
        let point = |date: &str, value: f64| EquityPoint {
            date: date.to_string(),
            portfolio_value: value,
            benchmark_value: 0.0,
            cash: value / 2.0,
            holdings: value / 2.0,
        };
        let a = vec![point("2024-01-02", 100.0), point("2024-01-03", 110.0)];
        let b = vec![point("2024-01-02", 200.0)];

        let combined = combine_equity_curves(&[a.as_slice(), b.as_slice()]);
        assert_eq!(combined.len(), 2);
        assert!((combined[0].portfolio_value - 150.0).abs() < 1e-9);
        // Only one curve reaches the second day, so it passes through.
        assert!((combined[1].portfolio_value - 110.0).abs() < 1e-9);
        assert_eq!(combined[1].date, "2024-01-03");
    }

    #[test]
    fn test_equity_curve_from_trades_reconstructs_snapshots() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let mut request = spec("curve");
        request.initial_cash = 1_000_000.0;
        request.start_date = "20240101".to_string();
        request.end_date = "20241231".to_string();
        let backtest = engine.create_backtest(request).unwrap();

        let buy = Trade {
            id: "t1".to_string(),
            backtest_id: backtest.id.clone(),
            strategy_id: "s1".to_string(),
            symbol: "600519".to_string(),
            side: TradeSide::Buy,
            quantity: 1000,
            price: 10.0,
            commission: 30.0,
            pnl: 0.0,
            holding_assets: 10_000.0,
            cash_balance: 989_970.0,
            total_assets: 999_970.0,
            executed_at: Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap(),
        };

        let curve = equity_curve_from_trades(&backtest, &[buy]);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].date, "2024-01-01");
        assert!((curve[0].portfolio_value - 1_000_000.0).abs() < 1e-9);
        assert!((curve[0].cash - 1_000_000.0).abs() < 1e-9);
        assert_eq!(curve[0].holdings, 0.0);
        assert_eq!(curve[1].date, "2024-06-01");
        assert!((curve[1].portfolio_value - 999_970.0).abs() < 1e-9);
        assert!((curve[1].cash - 989_970.0).abs() < 1e-9);
        assert!((curve[1].holdings - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_curve_from_trades_spans_empty_log() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("empty curve")).unwrap();

        let curve = equity_curve_from_trades(&backtest, &[]);
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].date, "2024-03-04");
        assert_eq!(curve[1].date, "2024-03-15");
        assert!((curve[0].portfolio_value - 100_000.0).abs() < 1e-9);
        assert!((curve[1].portfolio_value - 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_equity_curve_from_trades_sorts_by_time() {
        let engine = test_engine(Arc::new(ScriptedExecutor::new(1, 5)));
        let backtest = engine.create_backtest(spec("sorted curve")).unwrap();
        let trade = |day: u32, total: f64| Trade {
            id: format!("t{}", day),
            backtest_id: backtest.id.clone(),
            strategy_id: "s1".to_string(),
            symbol: "600519".to_string(),
            side: TradeSide::Buy,
            quantity: 100,
            price: 10.0,
            commission: 1.0,
            pnl: 0.0,
            holding_assets: total / 2.0,
            cash_balance: total / 2.0,
            total_assets: total,
            executed_at: Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap(),
        };

        let curve = equity_curve_from_trades(&backtest, &[trade(8, 105.0), trade(5, 102.0)]);
        assert_eq!(curve.len(), 3);
        assert_eq!(curve[1].date, "2024-03-05");
        assert!((curve[1].portfolio_value - 102.0).abs() < 1e-9);
        assert_eq!(curve[2].date, "2024-03-08");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backtest_runs_to_completion() {
        let executor = Arc::new(ScriptedExecutor::new(1, 5));
        executor.register_strategy(strategy_info("s1")).unwrap();
        let engine = test_engine(executor);

        let backtest = engine.create_backtest(spec("full run")).unwrap();
        engine
            .start_backtest(&backtest.id, vec![strategy_info("s1")])
            .unwrap();

        let mut waited = 0u64;
        loop {
            let status = engine.get_backtest(&backtest.id).unwrap().status;
            if status.is_terminal() {
                assert_eq!(status, BacktestStatus::Completed);
                break;
            }
            assert!(waited < 10_000, "backtest did not finish in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 20;
        }

        let results = engine.get_results(&backtest.id).unwrap();
        assert_eq!(results.trades.len(), 2);
        assert_eq!(results.trades[0].side, TradeSide::Buy);
        assert_eq!(results.trades[1].side, TradeSide::Sell);
        assert_eq!(results.performance.get("s1").unwrap().total_trades, 2);
        // Ten trading days means ten equity points.
        assert_eq!(results.equity_curves.get("s1").unwrap().len(), 10);
        assert!(results.combined_metrics.is_none());

        let progress = engine.get_progress(&backtest.id).unwrap();
        assert_eq!(progress.status, BacktestStatus::Completed);
        assert_eq!(progress.progress, 100.0);
    }

    #[test]
    fn test_signal_action_exit_produces_no_trade() {
        struct ExitExecutor {
            strategies: DashMap<String, StrategyInfo>,
        }
        impl StrategyExecutor for ExitExecutor {
            fn get_strategy(&self, strategy_id: &str) -> anyhow::Result<StrategyInfo> {
                self.strategies
                    .get(strategy_id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| anyhow!("Strategy not found: {}", strategy_id))
            }
            fn register_strategy(&self, info: StrategyInfo) -> anyhow::Result<()> {
                self.strategies.insert(info.id.clone(), info);
                Ok(())
            }
            fn remove_strategy(&self, strategy_id: &str) {
                self.strategies.remove(strategy_id);
            }
            fn execute_strategy(
                &self,
                _strategy_id: &str,
                _data: &MarketData,
            ) -> anyhow::Result<StrategySignal> {
                Ok(StrategySignal {
                    action: SignalAction::Exit,
                    confidence: 1.0,
                })
            }
        }

        let executor = Arc::new(ExitExecutor {
            strategies: DashMap::new(),
        });
        executor.register_strategy(strategy_info("s1")).unwrap();
        let engine = test_engine(executor);

        let params = QuickBacktestParams {
            strategy_id: "s1".to_string(),
            symbols: vec!["600519".to_string()],
            start: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            initial_cash: 100_000.0,
            commission: 0.0003,
        };
        let cancel = AtomicBool::new(false);
        let result = engine.run_quick_backtest(&params, &cancel).unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.total_return, 0.0);
    }
}
