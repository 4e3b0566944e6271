use crate::models::{MarketData, ParameterRange, StrategyInfo, StrategySignal};
use anyhow::{anyhow, bail, Result};
use dashmap::DashMap;
use std::collections::HashMap;

/// A deterministic trading rule evaluated against the bar history seen so
/// far. The last element of `history` is the current bar.
pub trait SignalRule: Send + Sync {
    fn kind(&self) -> &str;
    fn min_history(&self) -> usize;
    fn evaluate(&self, history: &[MarketData]) -> StrategySignal;
}

#[path = "strategies/ma_crossover.rs"]
pub mod ma_crossover;

pub use ma_crossover::MaCrossoverRule;

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RsiRule;

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MacdRule;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaType {
    Sma,
    Ema,
    Wma,
}

impl MaType {
    /// Parameter maps are numeric, so the average type travels as a code.
    pub fn from_code(code: f64) -> Self {
        match code.round() as i64 {
            1 => MaType::Ema,
            2 => MaType::Wma,
            _ => MaType::Sma,
        }
    }

    pub fn code(&self) -> f64 {
        match self {
            MaType::Sma => 0.0,
            MaType::Ema => 1.0,
            MaType::Wma => 2.0,
        }
    }
}

/// Typed view of a strategy's parameter map. Known kinds get named fields
/// with defaults and range validation; anything else falls back to the raw
/// map.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyParams {
    MaCrossover {
        short_period: usize,
        long_period: usize,
        ma_type: MaType,
        threshold: f64,
    },
    Rsi {
        period: usize,
        overbought: f64,
        oversold: f64,
    },
    Macd {
        fast_period: usize,
        slow_period: usize,
        signal_period: usize,
        buy_threshold: f64,
        sell_threshold: f64,
    },
    Bollinger {
        period: usize,
        std_dev: f64,
    },
    Custom(HashMap<String, f64>),
}

impl StrategyParams {
    pub fn from_map(kind: &str, parameters: &HashMap<String, f64>) -> Self {
        use crate::param_utils::{get_param_f64, get_param_usize};

        match kind {
            "ma_crossover" => StrategyParams::MaCrossover {
                short_period: get_param_usize(parameters, "short_period", 5),
                long_period: get_param_usize(parameters, "long_period", 20),
                ma_type: MaType::from_code(get_param_f64(parameters, "ma_type", 0.0)),
                threshold: get_param_f64(parameters, "threshold", 0.01),
            },
            "rsi" => StrategyParams::Rsi {
                period: get_param_usize(parameters, "period", 14),
                overbought: get_param_f64(parameters, "overbought", 70.0),
                oversold: get_param_f64(parameters, "oversold", 30.0),
            },
            "macd" => StrategyParams::Macd {
                fast_period: get_param_usize(parameters, "fast_period", 12),
                slow_period: get_param_usize(parameters, "slow_period", 26),
                signal_period: get_param_usize(parameters, "signal_period", 9),
                buy_threshold: get_param_f64(parameters, "buy_threshold", 0.0),
                sell_threshold: get_param_f64(parameters, "sell_threshold", 0.0),
            },
            "bollinger" => StrategyParams::Bollinger {
                period: get_param_usize(parameters, "period", 20),
                std_dev: get_param_f64(parameters, "std_dev", 2.0),
            },
            _ => StrategyParams::Custom(parameters.clone()),
        }
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        match self {
            StrategyParams::MaCrossover {
                short_period,
                long_period,
                ma_type,
                threshold,
            } => {
                map.insert("short_period".to_string(), *short_period as f64);
                map.insert("long_period".to_string(), *long_period as f64);
                map.insert("ma_type".to_string(), ma_type.code());
                map.insert("threshold".to_string(), *threshold);
            }
            StrategyParams::Rsi {
                period,
                overbought,
                oversold,
            } => {
                map.insert("period".to_string(), *period as f64);
                map.insert("overbought".to_string(), *overbought);
                map.insert("oversold".to_string(), *oversold);
            }
            StrategyParams::Macd {
                fast_period,
                slow_period,
                signal_period,
                buy_threshold,
                sell_threshold,
            } => {
                map.insert("fast_period".to_string(), *fast_period as f64);
                map.insert("slow_period".to_string(), *slow_period as f64);
                map.insert("signal_period".to_string(), *signal_period as f64);
                map.insert("buy_threshold".to_string(), *buy_threshold);
                map.insert("sell_threshold".to_string(), *sell_threshold);
            }
            StrategyParams::Bollinger { period, std_dev } => {
                map.insert("period".to_string(), *period as f64);
                map.insert("std_dev".to_string(), *std_dev);
            }
            StrategyParams::Custom(parameters) => {
                map = parameters.clone();
            }
        }
        map
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StrategyParams::MaCrossover {
                short_period,
                long_period,
                threshold,
                ..
            } => {
                if !(1..=50).contains(short_period) {
                    bail!("Short MA period must be between 1 and 50");
                }
                if !(1..=200).contains(long_period) {
                    bail!("Long MA period must be between 1 and 200");
                }
                if short_period >= long_period {
                    bail!("Short MA period must be less than long MA period");
                }
                if !(0.0..=0.1).contains(threshold) {
                    bail!("Breakout threshold must be between 0 and 0.1");
                }
            }
            StrategyParams::Rsi {
                period,
                overbought,
                oversold,
            } => {
                if !(1..=50).contains(period) {
                    bail!("RSI period must be between 1 and 50");
                }
                if !(50.0..=100.0).contains(overbought) {
                    bail!("RSI overbought level must be between 50 and 100");
                }
                if !(0.0..=50.0).contains(oversold) {
                    bail!("RSI oversold level must be between 0 and 50");
                }
                if oversold >= overbought {
                    bail!("RSI oversold level must be less than overbought level");
                }
            }
            StrategyParams::Macd {
                fast_period,
                slow_period,
                signal_period,
                buy_threshold,
                sell_threshold,
            } => {
                if !(1..=50).contains(fast_period) {
                    bail!("MACD fast period must be between 1 and 50");
                }
                if !(1..=100).contains(slow_period) {
                    bail!("MACD slow period must be between 1 and 100");
                }
                if fast_period >= slow_period {
                    bail!("MACD fast period must be less than slow period");
                }
                if !(1..=50).contains(signal_period) {
                    bail!("MACD signal period must be between 1 and 50");
                }
                if !(-1.0..=1.0).contains(buy_threshold) {
                    bail!("MACD buy threshold must be between -1 and 1");
                }
                if !(-1.0..=1.0).contains(sell_threshold) {
                    bail!("MACD sell threshold must be between -1 and 1");
                }
            }
            StrategyParams::Bollinger { period, std_dev } => {
                if !(1..=50).contains(period) {
                    bail!("Bollinger period must be between 1 and 50");
                }
                if !(0.5..=5.0).contains(std_dev) {
                    bail!("Bollinger standard deviation multiplier must be between 0.5 and 5");
                }
            }
            StrategyParams::Custom(_) => {}
        }
        Ok(())
    }

    /// Search space the optimizer sweeps for this strategy kind. Bounds stay
    /// inside what `validate` accepts at every grid point, including the
    /// cross-field constraints (short < long, oversold < overbought).
    /// Categorical codes such as `ma_type` are not swept. Custom strategies
    /// expose nothing.
    pub fn optimizable_ranges(&self) -> HashMap<String, ParameterRange> {
        let mut ranges = HashMap::new();
        match self {
            StrategyParams::MaCrossover { .. } => {
                ranges.insert("short_period".to_string(), range(2.0, 10.0, 2.0));
                ranges.insert("long_period".to_string(), range(20.0, 60.0, 10.0));
                ranges.insert("threshold".to_string(), range(0.0, 0.04, 0.01));
            }
            StrategyParams::Rsi { .. } => {
                ranges.insert("period".to_string(), range(6.0, 24.0, 2.0));
                ranges.insert("overbought".to_string(), range(60.0, 85.0, 5.0));
                ranges.insert("oversold".to_string(), range(15.0, 40.0, 5.0));
            }
            StrategyParams::Macd { .. } => {
                ranges.insert("fast_period".to_string(), range(6.0, 16.0, 2.0));
                ranges.insert("slow_period".to_string(), range(18.0, 34.0, 4.0));
                ranges.insert("signal_period".to_string(), range(5.0, 13.0, 2.0));
            }
            StrategyParams::Bollinger { .. } => {
                ranges.insert("period".to_string(), range(10.0, 30.0, 5.0));
                ranges.insert("std_dev".to_string(), range(1.0, 3.0, 0.5));
            }
            StrategyParams::Custom(_) => {}
        }
        ranges
    }
}

fn range(min: f64, max: f64, step: f64) -> ParameterRange {
    ParameterRange { min, max, step }
}

pub fn create_rule(kind: &str, parameters: &HashMap<String, f64>) -> Result<Box<dyn SignalRule>> {
    match kind {
        "ma_crossover" => Ok(Box::new(MaCrossoverRule::new(parameters))),
        "rsi" => Ok(Box::new(RsiRule::new(parameters))),
        "macd" => Ok(Box::new(MacdRule::new(parameters))),
        "bollinger" => Ok(Box::new(BollingerRule::new(parameters))),
        other => Err(anyhow!("Unknown strategy kind: {}", other)),
    }
}

/// Signal source the engine drives during a simulation. Implementations
/// must be safe to call from concurrent backtests.
pub trait StrategyExecutor: Send + Sync {
    fn get_strategy(&self, strategy_id: &str) -> Result<StrategyInfo>;
    fn register_strategy(&self, info: StrategyInfo) -> Result<()>;
    fn remove_strategy(&self, strategy_id: &str);
    fn execute_strategy(&self, strategy_id: &str, data: &MarketData) -> Result<StrategySignal>;
    /// Called when a simulation starts so stateful executors can drop any
    /// bar history accumulated by earlier runs of the same strategies.
    fn begin_run(&self, _strategy_ids: &[String]) {}
}

struct RegisteredStrategy {
    info: StrategyInfo,
    rule: Option<Box<dyn SignalRule>>,
}

/// In-memory executor backed by the built-in rules. Bar history accumulates
/// per strategy and symbol as the engine streams bars in, which keeps the
/// signals deterministic for a given price series.
pub struct RuleStrategyExecutor {
    strategies: DashMap<String, RegisteredStrategy>,
    history: DashMap<(String, String), Vec<MarketData>>,
}

impl RuleStrategyExecutor {
    pub fn new() -> Self {
        Self {
            strategies: DashMap::new(),
            history: DashMap::new(),
        }
    }

    pub fn with_default_strategies() -> Result<Self> {
        let executor = Self::new();
        for info in default_strategies() {
            executor.register_strategy(info)?;
        }
        Ok(executor)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for RuleStrategyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyExecutor for RuleStrategyExecutor {
    fn get_strategy(&self, strategy_id: &str) -> Result<StrategyInfo> {
        self.strategies
            .get(strategy_id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| anyhow!("Strategy not found: {}", strategy_id))
    }

    fn register_strategy(&self, info: StrategyInfo) -> Result<()> {
        if self.strategies.contains_key(&info.id) {
            bail!("Strategy already exists: {}", info.id);
        }

        StrategyParams::from_map(&info.kind, &info.parameters).validate()?;
        let rule = create_rule(&info.kind, &info.parameters).ok();
        self.strategies
            .insert(info.id.clone(), RegisteredStrategy { info, rule });
        Ok(())
    }

    fn remove_strategy(&self, strategy_id: &str) {
        self.strategies.remove(strategy_id);
        self.history.retain(|(id, _), _| id != strategy_id);
    }

    fn execute_strategy(&self, strategy_id: &str, data: &MarketData) -> Result<StrategySignal> {
        let entry = self
            .strategies
            .get(strategy_id)
            .ok_or_else(|| anyhow!("Strategy not found: {}", strategy_id))?;
        let rule = entry
            .rule
            .as_ref()
            .ok_or_else(|| anyhow!("No signal rule for strategy kind: {}", entry.info.kind))?;

        let key = (strategy_id.to_string(), data.symbol.clone());
        let mut series = self.history.entry(key).or_default();
        match series.last_mut() {
            Some(last) if last.date == data.date => *last = data.clone(),
            _ => series.push(data.clone()),
        }

        Ok(rule.evaluate(&series))
    }

    fn begin_run(&self, strategy_ids: &[String]) {
        self.history
            .retain(|(id, _), _| !strategy_ids.iter().any(|s| s == id));
    }
}

/// The stock rule strategies every fresh executor ships with.
pub fn default_strategies() -> Vec<StrategyInfo> {
    let macd = StrategyParams::Macd {
        fast_period: 12,
        slow_period: 26,
        signal_period: 9,
        buy_threshold: 0.0,
        sell_threshold: 0.0,
    };
    let ma = StrategyParams::MaCrossover {
        short_period: 5,
        long_period: 20,
        ma_type: MaType::Sma,
        threshold: 0.01,
    };
    let rsi = StrategyParams::Rsi {
        period: 14,
        overbought: 70.0,
        oversold: 30.0,
    };
    let bollinger = StrategyParams::Bollinger {
        period: 20,
        std_dev: 2.0,
    };

    vec![
        StrategyInfo {
            id: "macd_strategy".to_string(),
            name: "MACD Crossover".to_string(),
            kind: "macd".to_string(),
            parameters: macd.to_map(),
        },
        StrategyInfo {
            id: "ma_crossover".to_string(),
            name: "Dual Moving Average".to_string(),
            kind: "ma_crossover".to_string(),
            parameters: ma.to_map(),
        },
        StrategyInfo {
            id: "rsi_strategy".to_string(),
            name: "RSI Reversal".to_string(),
            kind: "rsi".to_string(),
            parameters: rsi.to_map(),
        },
        StrategyInfo {
            id: "bollinger_strategy".to_string(),
            name: "Bollinger Bands".to_string(),
            kind: "bollinger".to_string(),
            parameters: bollinger.to_map(),
        },
    ]
}
