use crate::indicators;
use crate::models::{MarketData, StrategySignal};
use crate::param_utils::{get_param_f64, get_param_usize};
use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
use std::collections::HashMap;

/// Mean reversion against Bollinger bands: buy at the lower band, sell at
/// the upper band.
pub struct BollingerRule {
    period: usize,
    std_dev: f64,
}

impl BollingerRule {
    pub fn new(parameters: &HashMap<String, f64>) -> Self {
        let period = get_param_usize(parameters, "period", 20);
        let std_dev = get_param_f64(parameters, "std_dev", 2.0);
        Self { period, std_dev }
    }
}

impl super::SignalRule for BollingerRule {
    fn kind(&self) -> &str {
        "bollinger"
    }

    fn min_history(&self) -> usize {
        self.period
    }

    fn evaluate(&self, history: &[MarketData]) -> StrategySignal {
        if history.len() < self.min_history() {
            return hold_signal();
        }

        let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let (upper, _, lower) =
            indicators::calculate_bollinger_bands(&closes, self.period, self.std_dev);
        let (Some(&upper_band), Some(&lower_band)) = (upper.last(), lower.last()) else {
            return hold_signal();
        };

        let band_width = upper_band - lower_band;
        if band_width <= f64::EPSILON {
            return hold_signal();
        }

        let close = closes[closes.len() - 1];
        if close < lower_band {
            let confidence = ((lower_band - close) / band_width + 0.5).min(1.0);
            return buy_signal(confidence);
        }
        if close > upper_band {
            let confidence = ((close - upper_band) / band_width + 0.5).min(1.0);
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

    fn tight_params() -> HashMap<String, f64> {
        let mut params = HashMap::new();
        params.insert("period".to_string(), 5.0);
        params.insert("std_dev".to_string(), 1.0);
        params
    }

    #[test]
    fn test_plunge_below_lower_band_buys() {
        let rule = BollingerRule::new(&tight_params());
        let closes = vec![10.0, 10.1, 9.9, 10.0, 10.1, 8.0];
        let signal = rule.evaluate(&bars_from_closes(&closes));
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence > 0.5);
    }

    #[test]
    fn test_spike_above_upper_band_sells() {
        let rule = BollingerRule::new(&tight_params());
        let closes = vec![10.0, 10.1, 9.9, 10.0, 10.1, 12.5];
        assert_eq!(
            rule.evaluate(&bars_from_closes(&closes)).action,
            SignalAction::Sell
        );
    }

    #[test]
    fn test_zero_width_bands_hold() {
        let rule = BollingerRule::new(&tight_params());
        let closes = vec![10.0; 8];
        assert_eq!(
            rule.evaluate(&bars_from_closes(&closes)).action,
            SignalAction::Hold
        );
    }
}
