use std::collections::BTreeMap;

use log::{error, warn};

use crate::models::{Trade, TradeSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub symbol: String,
    pub message: String,
}

/// Post-hoc consistency checker over a finished backtest's trade log.
/// Findings are logged and handed back for inspection; they never block
/// result delivery.
pub struct TradeValidator;

impl TradeValidator {
    pub fn validate(trades: &[Trade], backtest_id: &str) -> Vec<Finding> {
        if trades.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<&Trade> = trades.iter().collect();
        sorted.sort_by_key(|t| t.executed_at);

        let mut by_symbol: BTreeMap<&str, Vec<&Trade>> = BTreeMap::new();
        for trade in &sorted {
            by_symbol.entry(trade.symbol.as_str()).or_default().push(trade);
        }

        let mut findings = Vec::new();

        // The strict check only holds when nothing else is on the book:
        // with a single symbol and exactly one buy then one sell, the sell
        // must shrink holding assets. Other symbols' price moves can
        // legitimately raise holdings between trades, so multi-symbol and
        // multi-trade logs are exempt.
        if by_symbol.len() == 1 {
            if let Some((symbol, group)) = by_symbol.iter().next() {
                if group.len() == 2
                    && group[0].side == TradeSide::Buy
                    && group[1].side == TradeSide::Sell
                    && group[1].holding_assets >= group[0].holding_assets
                {
                    findings.push(Finding {
                        severity: Severity::Error,
                        symbol: symbol.to_string(),
                        message: format!(
                            "holding assets did not decrease after selling {} ({:.2} -> {:.2})",
                            symbol, group[0].holding_assets, group[1].holding_assets
                        ),
                    });
                }
            }
        }

        // Holdings jumping more than 50% across a sell points at a
        // valuation bug upstream.
        for pair in sorted.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            if cur.side == TradeSide::Sell && cur.holding_assets > prev.holding_assets * 1.5 {
                findings.push(Finding {
                    severity: Severity::Warning,
                    symbol: cur.symbol.clone(),
                    message: format!(
                        "holding assets jumped more than 50% right after a sell of {} ({:.2} -> {:.2})",
                        cur.symbol, prev.holding_assets, cur.holding_assets
                    ),
                });
            }
        }

        for finding in &findings {
            match finding.severity {
                Severity::Error => {
                    error!("Trade validation for backtest {}: {}", backtest_id, finding.message)
                }
                Severity::Warning => {
                    warn!("Trade validation for backtest {}: {}", backtest_id, finding.message)
                }
            }
        }

        findings
    }
}
