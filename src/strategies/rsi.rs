use crate::indicators;
use crate::models::{MarketData, StrategySignal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
use std::collections::HashMap;

/// Mean-reversion on RSI: buy when oversold, sell when overbought.
pub struct RsiRule {
    period: usize,
    overbought: f64,
    oversold: f64,
}

impl RsiRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let period = get_param_usize(parameters, "period", 14);
        let overbought = get_param_f64(parameters, "overbought", 70.0);
        let oversold = get_param_f64(parameters, "oversold", 30.0);
        Self {
            period,
            overbought,
            oversold,
        }
    }
}

impl super::SignalRule for RsiRule {
    fn kind(&self) -> &str {
        "rsi"
    }

    fn min_history(&self) -> usize {
        self.period + 1
    }

    fn evaluate(&self, history: &[MarketData]) -> StrategySignal {
        if history.len() < self.min_history() {
            return hold_signal();
        }

        let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let rsi_values = indicators::calculate_rsi(&closes, self.period);
        let current_rsi = match rsi_values.last() {
            Some(&value) => value,
            None => return hold_signal(),
        };

        if current_rsi < self.oversold {
            let confidence =
                ((self.oversold - current_rsi) / self.oversold + 0.5).min(1.0);
            return buy_signal(confidence);
        }

        if current_rsi > self.overbought {
            let confidence =
                ((current_rsi - self.overbought) / (100.0 - self.overbought) + 0.5).min(1.0);
            return sell_signal(confidence);
        }

        hold_signal()
    }
}
