use crate::engine::{BacktestEngine, QuickBacktestParams};
use crate::error::{EngineError, Result};
use crate::market_data::parse_compact_date;
use crate::models::{
    BacktestResult, EvaluationOutcome, EvaluationTask, OptimizationAlgorithm, OptimizationConfig,
    OptimizationProgress, OptimizationReport, OptimizationRunResult, OptimizationStatus,
    ParameterRange, StrategyInfo,
};
use chrono::{DateTime, NaiveDate, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

const MIN_TIMEOUT_MINUTES: i64 = 10;
const MAX_TIMEOUT_MINUTES: i64 = 240;
/// Ranked evaluations kept in the final report.
const MAX_STORED_RESULTS: usize = 100;
const TOURNAMENT_SIZE: usize = 3;

pub(crate) fn parameter_signature(parameters: &HashMap<String, f64>) -> String {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    format!("{:?}", sorted)
}

/// Score used to rank candidates. Named metrics map straight onto the
/// backtest result; anything else falls back to a composite that rewards
/// risk-adjusted return and shallow drawdowns.
fn score_result(result: &BacktestResult, target_metric: &str) -> f64 {
    let score = match target_metric {
        "total_return" => result.total_return,
        "sharpe_ratio" => result.sharpe_ratio,
        "win_rate" => result.win_rate,
        "profit_factor" => result.profit_factor,
        _ => {
            // max_drawdown is negative, so shallow drawdowns push the term
            // towards 0.2 and deep ones towards zero.
            0.5 * result.sharpe_ratio
                + 0.3 * result.total_return
                + 0.2 * (1.0 + result.max_drawdown)
        }
    };
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

/// Number of grid points in a range, tolerant of float rounding on the
/// division.
fn steps_in_range(range: &ParameterRange) -> usize {
    ((range.max - range.min) / range.step + 1e-9).floor() as usize + 1
}

fn values_for_range(range: &ParameterRange) -> Vec<f64> {
    (0..steps_in_range(range))
        .map(|i| range.min + i as f64 * range.step)
        .collect()
}

fn grid_total(ranges: &HashMap<String, ParameterRange>) -> usize {
    ranges.values().fold(1usize, |total, range| {
        total.saturating_mul(steps_in_range(range).max(1))
    })
}

/// Cartesian product of the parameter grids in sorted-name order, with the
/// first name varying slowest. Stops once `max_combinations` is reached.
fn grid_combinations(
    ranges: &HashMap<String, ParameterRange>,
    max_combinations: usize,
) -> Vec<HashMap<String, f64>> {
    let mut names: Vec<&String> = ranges.keys().collect();
    names.sort();

    let grids: Vec<(String, Vec<f64>)> = names
        .into_iter()
        .map(|name| (name.clone(), values_for_range(&ranges[name])))
        .collect();

    let mut combinations = Vec::new();
    let mut indices = vec![0usize; grids.len()];
    loop {
        let mut combination = HashMap::with_capacity(grids.len());
        for (slot, (name, values)) in grids.iter().enumerate() {
            combination.insert(name.clone(), values[indices[slot]]);
        }
        combinations.push(combination);
        if combinations.len() >= max_combinations {
            break;
        }

        let mut slot = grids.len();
        let mut advanced = false;
        while slot > 0 {
            slot -= 1;
            indices[slot] += 1;
            if indices[slot] < grids[slot].1.len() {
                advanced = true;
                break;
            }
            indices[slot] = 0;
        }
        if !advanced {
            break;
        }
    }
    combinations
}

fn random_individual(
    names: &[String],
    ranges: &HashMap<String, ParameterRange>,
) -> HashMap<String, f64> {
    let mut individual = HashMap::with_capacity(names.len());
    for name in names {
        if let Some(range) = ranges.get(name) {
            individual.insert(
                name.clone(),
                range.min + fastrand::f64() * (range.max - range.min),
            );
        }
    }
    individual
}

fn tournament_pick(ranked: &[OptimizationRunResult]) -> &HashMap<String, f64> {
    let mut best = &ranked[fastrand::usize(..ranked.len())];
    for _ in 1..TOURNAMENT_SIZE {
        let contender = &ranked[fastrand::usize(..ranked.len())];
        if contender.score > best.score {
            best = contender;
        }
    }
    &best.parameters
}

fn crossover(
    parent_a: &HashMap<String, f64>,
    parent_b: &HashMap<String, f64>,
    names: &[String],
    crossover_rate: f64,
) -> HashMap<String, f64> {
    let mut child = HashMap::with_capacity(names.len());
    for name in names {
        let source = if fastrand::f64() < crossover_rate {
            parent_a
        } else {
            parent_b
        };
        if let Some(value) = source.get(name).or_else(|| parent_a.get(name)) {
            child.insert(name.clone(), *value);
        }
    }
    child
}

fn mutate(
    individual: &mut HashMap<String, f64>,
    names: &[String],
    ranges: &HashMap<String, ParameterRange>,
    mutation_rate: f64,
) {
    for name in names {
        if fastrand::f64() >= mutation_rate {
            continue;
        }
        if let Some(range) = ranges.get(name) {
            individual.insert(
                name.clone(),
                range.min + fastrand::f64() * (range.max - range.min),
            );
        }
    }
}

fn estimate_end_time(
    started_at: DateTime<Utc>,
    completed: usize,
    total: usize,
) -> Option<DateTime<Utc>> {
    if completed == 0 || total == 0 {
        return None;
    }
    let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as f64;
    let remaining_ms = elapsed_ms / completed as f64 * (total - completed) as f64;
    Some(Utc::now() + chrono::Duration::milliseconds(remaining_ms as i64))
}

struct OptimizerInner {
    engine: BacktestEngine,
    configs: DashMap<String, OptimizationConfig>,
    progress: DashMap<String, OptimizationProgress>,
    reports: DashMap<String, OptimizationReport>,
    running: DashMap<String, Arc<AtomicBool>>,
}

/// Searches a strategy's parameter space by scoring each candidate with a
/// quick backtest. Grid search fans evaluations out over a worker pool;
/// the genetic algorithm evaluates each generation in parallel.
#[derive(Clone)]
pub struct ParameterOptimizer {
    inner: Arc<OptimizerInner>,
}

impl ParameterOptimizer {
    pub fn new(engine: BacktestEngine) -> Self {
        Self {
            inner: Arc::new(OptimizerInner {
                engine,
                configs: DashMap::new(),
                progress: DashMap::new(),
                reports: DashMap::new(),
                running: DashMap::new(),
            }),
        }
    }

    /// Validates the config, registers a `Running` progress record and
    /// spawns the search on a detached thread. Returns the optimization id
    /// immediately.
    pub fn start_optimization(&self, config: OptimizationConfig) -> Result<String> {
        if config.parameter_ranges.is_empty() {
            return Err(EngineError::InvalidState(
                "no parameters to optimize".to_string(),
            ));
        }
        for (name, range) in &config.parameter_ranges {
            if !(range.step > 0.0) {
                return Err(EngineError::InvalidState(format!(
                    "parameter {} must have a positive step",
                    name
                )));
            }
            if range.min > range.max {
                return Err(EngineError::InvalidState(format!(
                    "parameter {} has min above max",
                    name
                )));
            }
        }
        if config.max_combinations == 0 {
            return Err(EngineError::InvalidState(
                "max combinations must be positive".to_string(),
            ));
        }
        if config.algorithm == OptimizationAlgorithm::Genetic
            && (config.population_size < 2 || config.generations == 0)
        {
            return Err(EngineError::InvalidState(
                "genetic search needs a population of at least 2 and at least one generation"
                    .to_string(),
            ));
        }
        parse_compact_date(&config.start_date)
            .map_err(|err| EngineError::InvalidState(format!("bad start date: {err}")))?;
        parse_compact_date(&config.end_date)
            .map_err(|err| EngineError::InvalidState(format!("bad end date: {err}")))?;
        self.inner
            .engine
            .executor()
            .get_strategy(&config.strategy_id)
            .map_err(|_| EngineError::NotFound(format!("strategy {}", config.strategy_id)))?;

        let total_combinations = match config.algorithm {
            OptimizationAlgorithm::GridSearch => {
                grid_total(&config.parameter_ranges).min(config.max_combinations)
            }
            OptimizationAlgorithm::Genetic => config.population_size * config.generations,
        };
        let timeout_minutes =
            (total_combinations as i64 / 10).clamp(MIN_TIMEOUT_MINUTES, MAX_TIMEOUT_MINUTES);
        let deadline = Instant::now() + Duration::from_secs(timeout_minutes as u64 * 60);

        let optimization_id = Uuid::new_v4().to_string();
        self.inner.progress.insert(
            optimization_id.clone(),
            OptimizationProgress {
                optimization_id: optimization_id.clone(),
                strategy_id: config.strategy_id.clone(),
                status: OptimizationStatus::Running,
                progress: 0.0,
                completed_combinations: 0,
                total_combinations,
                current_parameters: HashMap::new(),
                best_parameters: HashMap::new(),
                best_score: f64::NEG_INFINITY,
                started_at: Utc::now(),
                estimated_end_time: None,
                error: None,
            },
        );
        self.inner
            .configs
            .insert(optimization_id.clone(), config.clone());

        let cancel = Arc::new(AtomicBool::new(false));
        self.inner
            .running
            .insert(optimization_id.clone(), Arc::clone(&cancel));

        info!(
            "Optimization {} started: {} over {} combinations for strategy {} (timeout {} minutes)",
            optimization_id,
            config.algorithm.as_str(),
            total_combinations,
            config.strategy_id,
            timeout_minutes
        );

        let optimizer = self.clone();
        let id = optimization_id.clone();
        thread::spawn(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                optimizer.run(&id, &config, &cancel, deadline)
            }));
            match outcome {
                Ok(result) => optimizer.complete(&id, result),
                Err(_) => {
                    error!("Optimization {} task panicked", id);
                    optimizer.mark_terminal(
                        &id,
                        OptimizationStatus::Failed,
                        Some("Optimization panicked".to_string()),
                    );
                }
            }
            optimizer.inner.running.remove(&id);
        });

        Ok(optimization_id)
    }

    pub fn get_progress(&self, optimization_id: &str) -> Result<OptimizationProgress> {
        self.inner
            .progress
            .get(optimization_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("optimization {}", optimization_id)))
    }

    /// Final report, only once the optimization has completed.
    pub fn get_report(&self, optimization_id: &str) -> Result<OptimizationReport> {
        let status = self
            .inner
            .progress
            .get(optimization_id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| EngineError::NotFound(format!("optimization {}", optimization_id)))?;
        if status != OptimizationStatus::Completed {
            return Err(EngineError::InvalidState(format!(
                "optimization {} is {}, results are only available once completed",
                optimization_id,
                status.as_str()
            )));
        }

        self.inner
            .reports
            .get(optimization_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "report missing for completed optimization {}",
                    optimization_id
                ))
            })
    }

    /// Requests cancellation of a running optimization. The record flips to
    /// `Cancelled` immediately; in-flight evaluations stop at their next
    /// cancellation check.
    pub fn cancel_optimization(&self, optimization_id: &str) -> Result<()> {
        {
            let progress = self
                .inner
                .progress
                .get(optimization_id)
                .ok_or_else(|| EngineError::NotFound(format!("optimization {}", optimization_id)))?;
            if progress.status != OptimizationStatus::Running {
                return Err(EngineError::InvalidState(format!(
                    "optimization {} cannot be cancelled from status {}",
                    optimization_id,
                    progress.status.as_str()
                )));
            }
        }

        if let Some(flag) = self.inner.running.get(optimization_id) {
            flag.store(true, Ordering::Relaxed);
        }
        self.mark_terminal(optimization_id, OptimizationStatus::Cancelled, None);
        info!("Optimization {} cancelled", optimization_id);
        Ok(())
    }

    fn run(
        &self,
        optimization_id: &str,
        config: &OptimizationConfig,
        cancel: &Arc<AtomicBool>,
        deadline: Instant,
    ) -> Result<OptimizationReport> {
        match config.algorithm {
            OptimizationAlgorithm::GridSearch => {
                self.run_grid_search(optimization_id, config, cancel, deadline)
            }
            OptimizationAlgorithm::Genetic => {
                self.run_genetic(optimization_id, config, cancel, deadline)
            }
        }
    }

    fn complete(&self, optimization_id: &str, outcome: Result<OptimizationReport>) {
        match outcome {
            Ok(report) => {
                info!(
                    "Optimization {} completed with best score {:.4}",
                    optimization_id, report.best_score
                );
                self.inner
                    .reports
                    .insert(optimization_id.to_string(), report);
                self.mark_terminal(optimization_id, OptimizationStatus::Completed, None);
            }
            Err(EngineError::Cancelled(_)) => {
                info!("Optimization {} stopped after cancellation", optimization_id);
                self.mark_terminal(optimization_id, OptimizationStatus::Cancelled, None);
            }
            Err(EngineError::Timeout(_)) => {
                error!("Optimization {} timed out", optimization_id);
                self.mark_terminal(
                    optimization_id,
                    OptimizationStatus::Failed,
                    Some("Optimization timed out".to_string()),
                );
            }
            Err(err) => {
                error!("Optimization {} failed: {}", optimization_id, err);
                self.mark_terminal(
                    optimization_id,
                    OptimizationStatus::Failed,
                    Some(err.to_string()),
                );
            }
        }
    }

    /// A record that already left `Running` is never touched again.
    fn mark_terminal(
        &self,
        optimization_id: &str,
        status: OptimizationStatus,
        error: Option<String>,
    ) {
        if let Some(mut entry) = self.inner.progress.get_mut(optimization_id) {
            if entry.status != OptimizationStatus::Running {
                return;
            }
            entry.status = status;
            if entry.status == OptimizationStatus::Completed {
                entry.progress = 100.0;
            }
            entry.error = error;
        }
    }

    fn note_evaluation(
        &self,
        optimization_id: &str,
        completed: usize,
        total: usize,
        run: Option<&OptimizationRunResult>,
    ) {
        if let Some(mut entry) = self.inner.progress.get_mut(optimization_id) {
            // Parallel evaluations report out of order, so the counter only
            // moves forward.
            entry.completed_combinations = entry.completed_combinations.max(completed);
            entry.total_combinations = total;
            if total > 0 {
                entry.progress = entry.completed_combinations as f64 / total as f64 * 100.0;
            }
            if let Some(run) = run {
                entry.current_parameters = run.parameters.clone();
                if run.score > entry.best_score {
                    entry.best_score = run.score;
                    entry.best_parameters = run.parameters.clone();
                }
            }
            entry.estimated_end_time =
                estimate_end_time(entry.started_at, entry.completed_combinations, total);
        }
    }

    fn set_total(&self, optimization_id: &str, total: usize) {
        if let Some(mut entry) = self.inner.progress.get_mut(optimization_id) {
            entry.total_combinations = total;
        }
    }

    /// Scores one parameter set by registering it as a throwaway strategy
    /// and running a quick backtest against it. The registration is removed
    /// whether the run succeeds or not.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_candidate(
        engine: &BacktestEngine,
        config: &OptimizationConfig,
        optimization_id: &str,
        index: usize,
        parameters: &HashMap<String, f64>,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &AtomicBool,
    ) -> Result<OptimizationRunResult> {
        let temp_id = format!("opt_{}_{}", optimization_id, index);
        let executor = engine.executor();
        executor.register_strategy(StrategyInfo {
            id: temp_id.clone(),
            name: format!("{} candidate {}", config.strategy_id, index),
            kind: config.strategy_kind.clone(),
            parameters: parameters.clone(),
        })?;

        let quick = QuickBacktestParams {
            strategy_id: temp_id.clone(),
            symbols: config.symbols.clone(),
            start,
            end,
            initial_cash: config.initial_cash,
            commission: config.commission,
        };
        let outcome = engine.run_quick_backtest(&quick, cancel);
        executor.remove_strategy(&temp_id);

        let performance = outcome?;
        let score = score_result(&performance, &config.target_metric);
        Ok(OptimizationRunResult {
            parameters: parameters.clone(),
            performance,
            score,
        })
    }

    /// Runs the original parameters through the same evaluation so the
    /// report can show what the search actually gained.
    fn evaluate_baseline(
        &self,
        config: &OptimizationConfig,
        optimization_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &AtomicBool,
    ) -> Result<Option<BacktestResult>> {
        let quick = QuickBacktestParams {
            strategy_id: config.strategy_id.clone(),
            symbols: config.symbols.clone(),
            start,
            end,
            initial_cash: config.initial_cash,
            commission: config.commission,
        };
        match self.inner.engine.run_quick_backtest(&quick, cancel) {
            Ok(result) => Ok(Some(result)),
            Err(EngineError::Cancelled(_)) => {
                Err(EngineError::Cancelled(optimization_id.to_string()))
            }
            Err(err) => {
                warn!(
                    "Baseline evaluation failed for optimization {}: {}",
                    optimization_id, err
                );
                Ok(None)
            }
        }
    }

    fn run_grid_search(
        &self,
        optimization_id: &str,
        config: &OptimizationConfig,
        cancel: &Arc<AtomicBool>,
        deadline: Instant,
    ) -> Result<OptimizationReport> {
        let start = parse_compact_date(&config.start_date)?;
        let end = parse_compact_date(&config.end_date)?;

        let combinations = grid_combinations(&config.parameter_ranges, config.max_combinations);
        let total = combinations.len();
        self.set_total(optimization_id, total);
        info!(
            "Optimization {} evaluating {} grid combinations",
            optimization_id, total
        );

        let original_parameters = self
            .inner
            .engine
            .executor()
            .get_strategy(&config.strategy_id)
            .map(|info| info.parameters)
            .unwrap_or_default();
        let original_performance =
            self.evaluate_baseline(config, optimization_id, start, end, cancel)?;

        let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
        info!("Using {} worker threads", num_workers);

        let (tx, rx): (Sender<EvaluationTask>, Receiver<EvaluationTask>) = bounded(total);
        let (result_tx, result_rx): (Sender<EvaluationOutcome>, Receiver<EvaluationOutcome>) =
            bounded(total);

        let mut handles = Vec::new();
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let engine = self.inner.engine.clone();
            let config = config.clone();
            let cancel = Arc::clone(cancel);
            let optimization_id = optimization_id.to_string();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let started = Instant::now();
                    let outcome = match Self::evaluate_candidate(
                        &engine,
                        &config,
                        &optimization_id,
                        task.index,
                        &task.parameters,
                        start,
                        end,
                        &cancel,
                    ) {
                        Ok(run) => {
                            debug!(
                                "Worker finished combination {} in {:.2}s with score {:.4}",
                                task.index,
                                started.elapsed().as_secs_f64(),
                                run.score
                            );
                            EvaluationOutcome {
                                index: task.index,
                                result: Some(run),
                                error: None,
                            }
                        }
                        Err(err) => EvaluationOutcome {
                            index: task.index,
                            result: None,
                            error: Some(err.to_string()),
                        },
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        for (index, parameters) in combinations.into_iter().enumerate() {
            if tx.send(EvaluationTask { index, parameters }).is_err() {
                break;
            }
        }
        drop(tx);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut results = Vec::new();
        let mut completed = 0usize;
        let mut failures = 0usize;
        let mut timed_out = false;

        while completed < total {
            if Instant::now() >= deadline {
                cancel.store(true, Ordering::Relaxed);
                timed_out = true;
                break;
            }
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(outcome) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match outcome.result {
                        Some(run) => {
                            self.note_evaluation(optimization_id, completed, total, Some(&run));
                            results.push(run);
                        }
                        None => {
                            failures += 1;
                            if let Some(err) = outcome.error {
                                warn!("Combination {} failed: {}", outcome.index, err);
                            }
                            self.note_evaluation(optimization_id, completed, total, None);
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if timed_out {
            pb.finish_with_message("Evaluation timed out");
        } else if failures > 0 {
            warn!("Grid search completed with {} failed evaluations", failures);
            pb.finish_with_message("Evaluation completed with errors");
        } else {
            pb.finish_with_message("Evaluation completed");
        }

        for handle in handles {
            handle.join().unwrap();
        }

        if timed_out {
            return Err(EngineError::Timeout(format!(
                "optimization {}",
                optimization_id
            )));
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled(optimization_id.to_string()));
        }

        Self::build_report(
            optimization_id,
            config,
            results,
            original_parameters,
            original_performance,
        )
    }

    fn run_genetic(
        &self,
        optimization_id: &str,
        config: &OptimizationConfig,
        cancel: &Arc<AtomicBool>,
        deadline: Instant,
    ) -> Result<OptimizationReport> {
        let start = parse_compact_date(&config.start_date)?;
        let end = parse_compact_date(&config.end_date)?;

        let population_size = config.population_size.max(2);
        let generations = config.generations.max(1);
        let total = population_size * generations;
        self.set_total(optimization_id, total);
        info!(
            "Optimization {} running {} generations of {} individuals",
            optimization_id, generations, population_size
        );

        let original_parameters = self
            .inner
            .engine
            .executor()
            .get_strategy(&config.strategy_id)
            .map(|info| info.parameters)
            .unwrap_or_default();
        let original_performance =
            self.evaluate_baseline(config, optimization_id, start, end, cancel)?;

        let mut names: Vec<String> = config.parameter_ranges.keys().cloned().collect();
        names.sort();

        let mut population: Vec<HashMap<String, f64>> = (0..population_size)
            .map(|_| random_individual(&names, &config.parameter_ranges))
            .collect();

        let mut archive: Vec<OptimizationRunResult> = Vec::new();
        let evaluated = AtomicUsize::new(0);
        let engine = &self.inner.engine;

        for generation in 0..generations {
            if cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled(optimization_id.to_string()));
            }
            if Instant::now() >= deadline {
                cancel.store(true, Ordering::Relaxed);
                return Err(EngineError::Timeout(format!(
                    "optimization {}",
                    optimization_id
                )));
            }

            let scored: Vec<Option<OptimizationRunResult>> = population
                .par_iter()
                .enumerate()
                .map(|(i, individual)| {
                    if cancel.load(Ordering::Relaxed) {
                        return None;
                    }
                    let index = generation * population_size + i;
                    match Self::evaluate_candidate(
                        engine,
                        config,
                        optimization_id,
                        index,
                        individual,
                        start,
                        end,
                        cancel,
                    ) {
                        Ok(run) => {
                            let done = evaluated.fetch_add(1, Ordering::Relaxed) + 1;
                            self.note_evaluation(optimization_id, done, total, Some(&run));
                            Some(run)
                        }
                        Err(err) => {
                            let done = evaluated.fetch_add(1, Ordering::Relaxed) + 1;
                            warn!(
                                "Individual {} of generation {} failed: {}",
                                i, generation, err
                            );
                            self.note_evaluation(optimization_id, done, total, None);
                            None
                        }
                    }
                })
                .collect();

            let mut generation_results: Vec<OptimizationRunResult> =
                scored.into_iter().flatten().collect();
            if generation_results.is_empty() {
                if cancel.load(Ordering::Relaxed) {
                    return Err(EngineError::Cancelled(optimization_id.to_string()));
                }
                return Err(EngineError::Internal(format!(
                    "generation {} produced no valid individuals",
                    generation
                )));
            }
            generation_results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            info!(
                "Optimization {} generation {}/{}: best score {:.4}",
                optimization_id,
                generation + 1,
                generations,
                generation_results[0].score
            );

            archive.extend(generation_results.iter().cloned());

            if generation + 1 < generations {
                population = next_generation(&generation_results, &names, config);
            }
        }

        Self::build_report(
            optimization_id,
            config,
            archive,
            original_parameters,
            original_performance,
        )
    }

    fn build_report(
        optimization_id: &str,
        config: &OptimizationConfig,
        results: Vec<OptimizationRunResult>,
        original_parameters: HashMap<String, f64>,
        original_performance: Option<BacktestResult>,
    ) -> Result<OptimizationReport> {
        let mut ranked = results;
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = HashSet::new();
        ranked.retain(|run| seen.insert(parameter_signature(&run.parameters)));
        ranked.truncate(MAX_STORED_RESULTS);

        let Some(best) = ranked.first() else {
            return Err(EngineError::Internal(format!(
                "optimization {} produced no successful evaluations",
                optimization_id
            )));
        };
        let best_parameters = best.parameters.clone();
        let best_score = best.score;
        let best_performance = Some(best.performance.clone());

        Ok(OptimizationReport {
            optimization_id: optimization_id.to_string(),
            strategy_id: config.strategy_id.clone(),
            best_parameters,
            best_score,
            best_performance,
            original_parameters,
            original_performance,
            results: ranked,
        })
    }
}

/// Elites survive unchanged; the remainder are bred by tournament
/// selection, per-parameter crossover and range-bounded mutation.
fn next_generation(
    ranked: &[OptimizationRunResult],
    names: &[String],
    config: &OptimizationConfig,
) -> Vec<HashMap<String, f64>> {
    let population_size = config.population_size.max(2);
    let elite_count = (ranked.len() as f64 * config.elitism_rate) as usize;

    let mut next = Vec::with_capacity(population_size);
    for elite in ranked.iter().take(elite_count) {
        next.push(elite.parameters.clone());
    }
    while next.len() < population_size {
        let parent_a = tournament_pick(ranked);
        let parent_b = tournament_pick(ranked);
        let mut child = crossover(parent_a, parent_b, names, config.crossover_rate);
        mutate(&mut child, names, &config.parameter_ranges, config.mutation_rate);
        next.push(child);
    }
    next
}
