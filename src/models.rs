use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: f64,
    #[serde(default)]
    pub adj_close: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BacktestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestStatus::Pending => "pending",
            BacktestStatus::Running => "running",
            BacktestStatus::Completed => "completed",
            BacktestStatus::Failed => "failed",
            BacktestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BacktestStatus::Completed | BacktestStatus::Failed | BacktestStatus::Cancelled
        )
    }
}

/// A backtest's identity and lifecycle state. Date strings use `YYYYMMDD`
/// at the interface and are parsed when the simulation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backtest {
    pub id: String,
    pub name: String,
    pub strategy_ids: Vec<String>,
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: f64,
    pub commission: f64,
    pub slippage: f64,
    pub benchmark: Option<String>,
    pub status: BacktestStatus,
    pub progress: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Creation request for a backtest. The id is optional; a missing id is
/// generated, a duplicate one rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub strategy_ids: Vec<String>,
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub slippage: f64,
    #[serde(default)]
    pub benchmark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Immutable record of one fill. The holding/cash/total snapshots are
/// taken from the valuation pass that applied the trade, so the trade log
/// alone can reconstruct the equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub backtest_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub pnl: f64,
    pub holding_assets: f64,
    pub cash_balance: f64,
    pub total_assets: f64,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub date: String,
    pub portfolio_value: f64,
    pub benchmark_value: f64,
    pub cash: f64,
    pub holdings: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub total_return: f64,
    pub annual_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: i32,
    pub avg_trade_return: f64,
    pub benchmark_return: f64,
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestProgress {
    pub backtest_id: String,
    pub status: BacktestStatus,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full payload returned for a completed backtest. Equity curves are keyed
/// by strategy id; multi-strategy runs add a `combined` curve averaging the
/// per-strategy values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResults {
    pub backtest_id: String,
    pub performance: HashMap<String, BacktestResult>,
    pub equity_curves: HashMap<String, Vec<EquityPoint>>,
    pub trades: Vec<Trade>,
    pub strategies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_metrics: Option<BacktestResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub action: SignalAction,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Exit,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
            SignalAction::Exit => "exit",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            "exit" => Ok(SignalAction::Exit),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

/// Strategy descriptor handed to `start_backtest`. The parameter map is the
/// generic form; executors parse it into the typed variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAlgorithm {
    GridSearch,
    Genetic,
}

impl OptimizationAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationAlgorithm::GridSearch => "grid_search",
            OptimizationAlgorithm::Genetic => "genetic",
        }
    }
}

impl FromStr for OptimizationAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grid_search" | "grid" => Ok(OptimizationAlgorithm::GridSearch),
            "genetic" | "ga" => Ok(OptimizationAlgorithm::Genetic),
            other => Err(anyhow!("Unknown optimization algorithm '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationConfig {
    pub strategy_id: String,
    pub strategy_kind: String,
    pub parameter_ranges: HashMap<String, ParameterRange>,
    pub target_metric: String,
    pub algorithm: OptimizationAlgorithm,
    #[serde(default = "default_max_combinations")]
    pub max_combinations: usize,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    #[serde(default = "default_elitism_rate")]
    pub elitism_rate: f64,
    pub symbols: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub initial_cash: f64,
    #[serde(default)]
    pub commission: f64,
}

fn default_max_combinations() -> usize {
    1000
}

fn default_population_size() -> usize {
    20
}

fn default_generations() -> usize {
    10
}

fn default_mutation_rate() -> f64 {
    0.1
}

fn default_crossover_rate() -> f64 {
    0.8
}

fn default_elitism_rate() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::Running => "running",
            OptimizationStatus::Completed => "completed",
            OptimizationStatus::Failed => "failed",
            OptimizationStatus::Cancelled => "cancelled",
        }
    }
}

/// One evaluated parameter combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRunResult {
    pub parameters: HashMap<String, f64>,
    pub performance: BacktestResult,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationProgress {
    pub optimization_id: String,
    pub strategy_id: String,
    pub status: OptimizationStatus,
    pub progress: f64,
    pub completed_combinations: usize,
    pub total_combinations: usize,
    pub current_parameters: HashMap<String, f64>,
    pub best_parameters: HashMap<String, f64>,
    pub best_score: f64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final ranked outcome of an optimization, including the baseline the
/// candidates are measured against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub optimization_id: String,
    pub strategy_id: String,
    pub best_parameters: HashMap<String, f64>,
    pub best_score: f64,
    pub best_performance: Option<BacktestResult>,
    pub original_parameters: HashMap<String, f64>,
    pub original_performance: Option<BacktestResult>,
    pub results: Vec<OptimizationRunResult>,
}

// Worker communication structures
#[derive(Debug, Clone)]
pub struct EvaluationTask {
    pub index: usize,
    pub parameters: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub index: usize,
    pub result: Option<OptimizationRunResult>,
    pub error: Option<String>,
}
