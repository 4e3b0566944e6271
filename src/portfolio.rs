use crate::models::{
    MarketData, Portfolio, Position, SignalAction, StrategySignal, Trade, TradeSide,
};
use chrono::Utc;
use log::debug;
use std::collections::HashMap;

/// Cash fraction a single buy may commit.
pub const MAX_CASH_FRACTION_PER_TRADE: f64 = 0.2;
/// Smallest order the engine will place, in currency units.
pub const MIN_TICKET_AMOUNT: f64 = 1000.0;

/// Applies signals to a portfolio and marks positions to market. One
/// instance per backtest; the commission rate is fixed for the run.
pub struct PortfolioSimulator {
    commission_rate: f64,
}

impl PortfolioSimulator {
    pub fn new(commission_rate: f64) -> Self {
        Self { commission_rate }
    }

    pub fn new_portfolio(initial_cash: f64) -> Portfolio {
        Portfolio {
            cash: initial_cash,
            positions: HashMap::new(),
            total_value: initial_cash,
        }
    }

    /// Turns an actionable signal into a trade against the portfolio.
    /// Returns `None` when the signal does not produce a fill: hold/exit
    /// signals, buys below the minimum ticket, buys the cash cannot cover,
    /// and sells without a position.
    pub fn execute_signal(
        &self,
        portfolio: &mut Portfolio,
        signal: &StrategySignal,
        bar: &MarketData,
        backtest_id: &str,
        strategy_id: &str,
    ) -> Option<Trade> {
        let price = bar.close;
        if price <= 0.0 {
            return None;
        }
        let symbol = bar.symbol.as_str();

        match signal.action {
            SignalAction::Buy => {
                let max_investment = portfolio.cash * MAX_CASH_FRACTION_PER_TRADE;
                if max_investment < MIN_TICKET_AMOUNT {
                    return None;
                }

                let quantity = (max_investment / price) as i64;
                if quantity <= 0 {
                    return None;
                }

                let cost = quantity as f64 * price;
                let commission = cost * self.commission_rate;
                let total_cost = cost + commission;
                if total_cost > portfolio.cash {
                    return None;
                }

                portfolio.cash -= total_cost;
                match portfolio.positions.get_mut(symbol) {
                    Some(position) => {
                        let total_quantity = position.quantity + quantity;
                        let basis = position.avg_price * position.quantity as f64 + cost;
                        position.avg_price = basis / total_quantity as f64;
                        position.quantity = total_quantity;
                        position.market_value = total_quantity as f64 * price;
                        position.unrealized_pnl = position.market_value - basis;
                        position.updated_at = bar.date;
                    }
                    None => {
                        portfolio.positions.insert(
                            symbol.to_string(),
                            Position {
                                symbol: symbol.to_string(),
                                quantity,
                                avg_price: price,
                                market_value: cost,
                                unrealized_pnl: 0.0,
                                updated_at: bar.date,
                            },
                        );
                    }
                }

                Some(self.build_trade(
                    portfolio,
                    bar,
                    backtest_id,
                    strategy_id,
                    TradeSide::Buy,
                    quantity,
                    commission,
                    0.0,
                ))
            }
            SignalAction::Sell => {
                let position = match portfolio.positions.get(symbol) {
                    Some(p) if p.quantity > 0 => p.clone(),
                    _ => return None,
                };

                let quantity = position.quantity;
                let revenue = quantity as f64 * price;
                let commission = revenue * self.commission_rate;
                let net_revenue = revenue - commission;
                let pnl = net_revenue - position.avg_price * quantity as f64;

                portfolio.cash += net_revenue;
                portfolio.positions.remove(symbol);

                Some(self.build_trade(
                    portfolio,
                    bar,
                    backtest_id,
                    strategy_id,
                    TradeSide::Sell,
                    quantity,
                    commission,
                    pnl,
                ))
            }
            SignalAction::Hold | SignalAction::Exit => None,
        }
    }

    /// Marks every open position to the price the resolver reports. When a
    /// symbol has no price for the day the prior market value stands, so a
    /// patchy data feed degrades valuations instead of zeroing them.
    pub fn revalue<F>(&self, portfolio: &mut Portfolio, mut price_for: F)
    where
        F: FnMut(&str) -> Option<f64>,
    {
        for position in portfolio.positions.values_mut() {
            match price_for(&position.symbol) {
                Some(price) if price > 0.0 => {
                    position.market_value = position.quantity as f64 * price;
                    position.unrealized_pnl =
                        position.market_value - position.avg_price * position.quantity as f64;
                    position.updated_at = Utc::now();
                }
                _ => {
                    debug!(
                        "No price for {}, keeping market value {:.2}",
                        position.symbol, position.market_value
                    );
                }
            }
        }

        portfolio.total_value = portfolio.cash + holding_assets(portfolio);
    }

    #[allow(clippy::too_many_arguments)]
    fn build_trade(
        &self,
        portfolio: &Portfolio,
        bar: &MarketData,
        backtest_id: &str,
        strategy_id: &str,
        side: TradeSide,
        quantity: i64,
        commission: f64,
        pnl: f64,
    ) -> Trade {
        // Snapshot fields come from the position state this trade just
        // produced, not from a later valuation pass.
        let holding = holding_assets(portfolio);
        Trade {
            id: format!(
                "{}_{}_{}",
                backtest_id,
                bar.symbol,
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ),
            backtest_id: backtest_id.to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: bar.symbol.clone(),
            side,
            quantity,
            price: bar.close,
            commission,
            pnl,
            holding_assets: holding,
            cash_balance: portfolio.cash,
            total_assets: portfolio.cash + holding,
            executed_at: bar.date,
        }
    }
}

/// Mark-to-market total of all open positions.
pub fn holding_assets(portfolio: &Portfolio) -> f64 {
    portfolio.positions.values().map(|p| p.market_value).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy_utils::{buy_signal, hold_signal, sell_signal};
    use chrono::TimeZone;

    fn bar(symbol: &str, close: f64) -> MarketData {
        MarketData {
            symbol: symbol.to_string(),
            date: Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap(),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000_000,
            amount: close * 1_000_000.0,
            adj_close: close,
        }
    }

    #[test]
    fn test_buy_commits_a_fifth_of_cash() {
        let sim = PortfolioSimulator::new(0.0003);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);

        let trade = sim
            .execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 10.0), "bt", "s1")
            .unwrap();

        // 20% of 100k at 10.0 buys 2000 shares.
        assert_eq!(trade.quantity, 2000);
        assert_eq!(trade.side, TradeSide::Buy);
        let cost = 2000.0 * 10.0;
        let commission = cost * 0.0003;
        assert!((trade.commission - commission).abs() < 1e-9);
        assert!((portfolio.cash - (100_000.0 - cost - commission)).abs() < 1e-9);

        let position = portfolio.positions.get("600000").unwrap();
        assert_eq!(position.quantity, 2000);
        assert!((position.avg_price - 10.0).abs() < 1e-9);

        // Snapshot fields reflect the post-trade book.
        assert!((trade.holding_assets - cost).abs() < 1e-9);
        assert!((trade.cash_balance - portfolio.cash).abs() < 1e-9);
        assert!((trade.total_assets - (portfolio.cash + cost)).abs() < 1e-9);
    }

    #[test]
    fn test_buy_below_minimum_ticket_is_skipped() {
        let sim = PortfolioSimulator::new(0.0003);
        let mut portfolio = PortfolioSimulator::new_portfolio(4000.0);

        // 20% of 4000 is 800, under the 1000 minimum.
        let trade = sim.execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 10.0), "bt", "s1");
        assert!(trade.is_none());
        assert!((portfolio.cash - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn test_second_buy_averages_cost_basis() {
        let sim = PortfolioSimulator::new(0.0);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);

        sim.execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 10.0), "bt", "s1")
            .unwrap();
        sim.execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 20.0), "bt", "s1")
            .unwrap();

        let position = portfolio.positions.get("600000").unwrap();
        // 2000 @ 10 then 800 @ 20: avg = (20000 + 16000) / 2800.
        assert_eq!(position.quantity, 2800);
        assert!((position.avg_price - 36_000.0 / 2800.0).abs() < 1e-9);
    }

    #[test]
    fn test_sell_closes_full_position_and_realizes_pnl() {
        let sim = PortfolioSimulator::new(0.001);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);

        let buy = sim
            .execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 10.0), "bt", "s1")
            .unwrap();
        let sell = sim
            .execute_signal(&mut portfolio, &sell_signal(0.9), &bar("600000", 12.0), "bt", "s1")
            .unwrap();

        assert_eq!(sell.quantity, buy.quantity);
        assert!(portfolio.positions.is_empty());

        let revenue = buy.quantity as f64 * 12.0;
        let sell_commission = revenue * 0.001;
        let expected_pnl = revenue - sell_commission - 10.0 * buy.quantity as f64;
        assert!((sell.pnl - expected_pnl).abs() < 1e-9);

        // Nothing held after the sell.
        assert!((sell.holding_assets - 0.0).abs() < 1e-9);
        assert!(sell.holding_assets < buy.holding_assets);
    }

    #[test]
    fn test_sell_without_position_is_skipped() {
        let sim = PortfolioSimulator::new(0.0003);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);
        assert!(sim
            .execute_signal(&mut portfolio, &sell_signal(0.9), &bar("600000", 10.0), "bt", "s1")
            .is_none());
    }

    #[test]
    fn test_hold_and_exit_do_not_trade() {
        let sim = PortfolioSimulator::new(0.0003);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);
        assert!(sim
            .execute_signal(&mut portfolio, &hold_signal(), &bar("600000", 10.0), "bt", "s1")
            .is_none());

        let exit = StrategySignal {
            action: SignalAction::Exit,
            confidence: 1.0,
        };
        assert!(sim
            .execute_signal(&mut portfolio, &exit, &bar("600000", 10.0), "bt", "s1")
            .is_none());
    }

    #[test]
    fn test_revalue_keeps_prior_value_on_missing_price() {
        let sim = PortfolioSimulator::new(0.0);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);
        sim.execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", 10.0), "bt", "s1")
            .unwrap();

        sim.revalue(&mut portfolio, |_| Some(11.0));
        let marked = portfolio.positions.get("600000").unwrap().market_value;
        assert!((marked - 2000.0 * 11.0).abs() < 1e-9);

        // Price feed goes dark: market value must not change.
        sim.revalue(&mut portfolio, |_| None);
        let held = portfolio.positions.get("600000").unwrap().market_value;
        assert!((held - marked).abs() < 1e-9);
        assert!((portfolio.total_value - (portfolio.cash + marked)).abs() < 1e-9);
    }

    #[test]
    fn test_buys_only_cash_strictly_decreases() {
        let sim = PortfolioSimulator::new(0.0003);
        let mut portfolio = PortfolioSimulator::new_portfolio(100_000.0);

        let mut previous_cash = portfolio.cash;
        for price in [10.0, 11.0, 12.0, 13.0] {
            if sim
                .execute_signal(&mut portfolio, &buy_signal(0.9), &bar("600000", price), "bt", "s1")
                .is_some()
            {
                assert!(portfolio.cash < previous_cash);
                previous_cash = portfolio.cash;
            }
        }
    }
}
