use crate::indicators;
use crate::models::{MarketData, StrategySignal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
use std::collections::HashMap;

/// MACD line crossing the signal line, with configurable histogram
/// thresholds to filter weak crosses.
pub struct MacdRule {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    buy_threshold: f64,
    sell_threshold: f64,
}

impl MacdRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let fast_period = get_param_usize(parameters, "fast_period", 12);
        let slow_period = get_param_usize(parameters, "slow_period", 26);
        let signal_period = get_param_usize(parameters, "signal_period", 9);
        let buy_threshold = get_param_f64(parameters, "buy_threshold", 0.0);
        let sell_threshold = get_param_f64(parameters, "sell_threshold", 0.0);
        Self {
            fast_period,
            slow_period,
            signal_period,
            buy_threshold,
            sell_threshold,
        }
    }
}

impl super::SignalRule for MacdRule {
    fn kind(&self) -> &str {
        "macd"
    }

    fn min_history(&self) -> usize {
        self.slow_period + self.signal_period
    }

    fn evaluate(&self, history: &[MarketData]) -> StrategySignal {
        if history.len() < self.min_history() {
            return hold_signal();
        }

        let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let (_, _, histogram) = indicators::calculate_macd(
            &closes,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );

        if histogram.len() < 2 {
            return hold_signal();
        }
        let current = histogram[histogram.len() - 1];
        let previous = histogram[histogram.len() - 2];
        let scale = closes[closes.len() - 1].abs().max(f64::EPSILON);

        // Bullish: histogram crosses above the buy threshold.
        if previous <= self.buy_threshold && current > self.buy_threshold {
            let confidence = ((current - self.buy_threshold) / scale * 100.0 + 0.5).min(1.0);
            return buy_signal(confidence);
        }

        // Bearish: histogram crosses below the sell threshold.
        if previous >= self.sell_threshold && current < self.sell_threshold {
            let confidence = ((self.sell_threshold - current) / scale * 100.0 + 0.5).min(1.0);
            return sell_signal(confidence);
        }

        hold_signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;
    use crate::strategy::SignalRule;
    use chrono::{TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<MarketData> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| MarketData {
                symbol: "600000".to_string(),
                date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000,
                amount: close * 1_000_000.0,
                adj_close: close,
            })
            .collect()
    }

    fn fast_params() -> HashMap<String, f64> {
        let mut params = HashMap::new();
        params.insert("fast_period".to_string(), 3.0);
        params.insert("slow_period".to_string(), 6.0);
        params.insert("signal_period".to_string(), 3.0);
        params
    }

    #[test]
    fn test_decline_then_rally_crosses_up() {
        let rule = MacdRule::new(&fast_params());

        // A long slide drives the histogram negative; the rally that
        // follows pulls it back through zero.
        let mut closes: Vec<f64> = (0..15).map(|i| 30.0 - i as f64).collect();
        let mut action = SignalAction::Hold;
        for i in 0..8 {
            closes.push(16.0 + (i as f64) * 1.5);
            let signal = rule.evaluate(&bars_from_closes(&closes));
            if signal.action != SignalAction::Hold {
                action = signal.action;
                break;
            }
        }
        assert_eq!(action, SignalAction::Buy);
    }

    #[test]
    fn test_rally_then_decline_crosses_down() {
        let rule = MacdRule::new(&fast_params());

        let mut closes: Vec<f64> = (0..15).map(|i| 10.0 + i as f64).collect();
        let mut action = SignalAction::Hold;
        for i in 0..8 {
            closes.push(24.0 - (i as f64) * 1.5);
            let signal = rule.evaluate(&bars_from_closes(&closes));
            if signal.action != SignalAction::Hold {
                action = signal.action;
                break;
            }
        }
        assert_eq!(action, SignalAction::Sell);
    }

    #[test]
    fn test_too_little_history_holds() {
        let rule = MacdRule::new(&HashMap::new());
        let closes = vec![10.0; 5];
        assert_eq!(
            rule.evaluate(&bars_from_closes(&closes)).action,
            SignalAction::Hold
        );
    }
}
