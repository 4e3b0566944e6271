use crate::indicators;
use crate::models::{MarketData, StrategySignal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy::MaType;
use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
use std::collections::HashMap;

/// Dual moving average crossover: buy when the short average breaks above
/// the long average by more than the threshold, sell on the opposite break.
pub struct MaCrossoverRule {
    short_period: usize,
    long_period: usize,
    ma_type: MaType,
    threshold: f64,
}

impl MaCrossoverRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let short_period = get_param_usize(parameters, "short_period", 5);
        let long_period = get_param_usize(parameters, "long_period", 20);
        let ma_type = MaType::from_code(get_param_f64(parameters, "ma_type", 0.0));
        let threshold = get_param_f64(parameters, "threshold", 0.01);
        Self {
            short_period,
            long_period,
            ma_type,
            threshold,
        }
    }

    fn average(&self, prices: &[f64], period: usize) -> Vec<f64> {
        match self.ma_type {
            MaType::Sma => indicators::calculate_sma(prices, period),
            MaType::Ema => indicators::calculate_ema(prices, period),
            MaType::Wma => indicators::calculate_wma(prices, period),
        }
    }
}

impl super::SignalRule for MaCrossoverRule {
    fn kind(&self) -> &str {
        "ma_crossover"
    }

    fn min_history(&self) -> usize {
        self.long_period + 1
    }

    fn evaluate(&self, history: &[MarketData]) -> StrategySignal {
        if history.len() < self.min_history() {
            return hold_signal();
        }

        let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let short = self.average(&closes, self.short_period);
        let long = self.average(&closes, self.long_period);

        let i = closes.len() - 1;
        let (cur_short, prev_short) = (short[i], short[i - 1]);
        let (cur_long, prev_long) = (long[i], long[i - 1]);
        if cur_long.abs() < f64::EPSILON {
            return hold_signal();
        }

        // Bullish: short average breaks above the long average by the
        // threshold margin.
        if prev_short <= prev_long && cur_short > cur_long * (1.0 + self.threshold) {
            let confidence = ((cur_short - cur_long).abs() / cur_long.abs() * 10.0 + 0.5).min(1.0);
            return buy_signal(confidence);
        }

        // Bearish: short average breaks below the long average.
        if prev_short >= prev_long && cur_short < cur_long * (1.0 - self.threshold) {
            let confidence = ((cur_long - cur_short).abs() / cur_long.abs() * 10.0 + 0.5).min(1.0);
            return sell_signal(confidence);
        }

        hold_signal()
    }
}
