use crate::models::BacktestResult;
use statrs::statistics::Statistics;

/// 3% annual risk-free rate expressed per trading day.
pub const DAILY_RISK_FREE_RATE: f64 = 0.03 / 252.0;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Turns a daily return series into the standard result metrics. Every
/// metric degrades to zero on empty or degenerate input instead of
/// erroring; a backtest with no usable returns still produces a result.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(returns: &[f64], benchmark_returns: &[f64]) -> BacktestResult {
        if returns.is_empty() {
            return BacktestResult::default();
        }

        let mut result = BacktestResult {
            total_return: Self::total_return(returns),
            annual_return: Self::annual_return(returns),
            max_drawdown: Self::max_drawdown(returns),
            sharpe_ratio: Self::sharpe_ratio(returns),
            sortino_ratio: Self::sortino_ratio(returns),
            win_rate: Self::win_rate(returns),
            profit_factor: Self::profit_factor(returns),
            avg_trade_return: Self::average(returns),
            ..BacktestResult::default()
        };

        if !benchmark_returns.is_empty() {
            result.benchmark_return = Self::total_return(benchmark_returns);
            result.beta = Self::beta(returns, benchmark_returns);
            result.alpha = Self::alpha(returns, benchmark_returns, result.beta);
        }

        result
    }

    /// Averages every rate metric across strategies; trade counts add up.
    pub fn combine(results: &[BacktestResult]) -> Option<BacktestResult> {
        if results.is_empty() {
            return None;
        }

        let mut combined = BacktestResult::default();
        for result in results {
            combined.total_return += result.total_return;
            combined.annual_return += result.annual_return;
            combined.max_drawdown += result.max_drawdown;
            combined.sharpe_ratio += result.sharpe_ratio;
            combined.sortino_ratio += result.sortino_ratio;
            combined.win_rate += result.win_rate;
            combined.profit_factor += result.profit_factor;
            combined.avg_trade_return += result.avg_trade_return;
            combined.benchmark_return += result.benchmark_return;
            combined.alpha += result.alpha;
            combined.beta += result.beta;
            combined.total_trades += result.total_trades;
        }

        let count = results.len() as f64;
        combined.total_return /= count;
        combined.annual_return /= count;
        combined.max_drawdown /= count;
        combined.sharpe_ratio /= count;
        combined.sortino_ratio /= count;
        combined.win_rate /= count;
        combined.profit_factor /= count;
        combined.avg_trade_return /= count;
        combined.benchmark_return /= count;
        combined.alpha /= count;
        combined.beta /= count;

        Some(combined)
    }

    fn total_return(returns: &[f64]) -> f64 {
        returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
    }

    fn annual_return(returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }

        let total = Self::total_return(returns);
        let years = returns.len() as f64 / TRADING_DAYS_PER_YEAR;
        if years <= 0.0 || 1.0 + total <= 0.0 {
            return 0.0;
        }

        (1.0 + total).powf(1.0 / years) - 1.0
    }

    /// Deepest peak-to-trough decline of the compounded curve, as a
    /// negative fraction.
    fn max_drawdown(returns: &[f64]) -> f64 {
        let mut peak = 1.0;
        let mut current = 1.0;
        let mut max_drawdown = 0.0;

        for r in returns {
            current *= 1.0 + r;
            if current > peak {
                peak = current;
            }
            let drawdown = (peak - current) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }

        -max_drawdown
    }

    fn sharpe_ratio(returns: &[f64]) -> f64 {
        let std_dev = returns.population_std_dev();
        if std_dev == 0.0 || !std_dev.is_finite() {
            return 0.0;
        }

        (Self::average(returns) - DAILY_RISK_FREE_RATE) / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    }

    fn sortino_ratio(returns: &[f64]) -> f64 {
        let downside = Self::downside_std_dev(returns);
        if downside == 0.0 {
            return 0.0;
        }

        (Self::average(returns) - DAILY_RISK_FREE_RATE) / downside * TRADING_DAYS_PER_YEAR.sqrt()
    }

    /// Deviation below the risk-free rate, averaged over the days that
    /// actually fell short of it.
    fn downside_std_dev(returns: &[f64]) -> f64 {
        let mut sum_squared = 0.0;
        let mut count = 0usize;
        for r in returns {
            if *r < DAILY_RISK_FREE_RATE {
                let diff = r - DAILY_RISK_FREE_RATE;
                sum_squared += diff * diff;
                count += 1;
            }
        }

        if count == 0 {
            return 0.0;
        }
        (sum_squared / count as f64).sqrt()
    }

    fn win_rate(returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let wins = returns.iter().filter(|r| **r > 0.0).count();
        wins as f64 / returns.len() as f64
    }

    /// Gross gains over gross losses of the daily series; zero when the
    /// series never loses (rather than infinity).
    fn profit_factor(returns: &[f64]) -> f64 {
        let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let losses: f64 = returns.iter().filter(|r| **r < 0.0).sum();
        if losses == 0.0 {
            return 0.0;
        }
        gains / losses.abs()
    }

    fn average(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn alpha(returns: &[f64], benchmark_returns: &[f64], beta: f64) -> f64 {
        if returns.is_empty() || benchmark_returns.is_empty() {
            return 0.0;
        }

        let portfolio_return = Self::total_return(returns);
        let benchmark_return = Self::total_return(benchmark_returns);
        portfolio_return - (DAILY_RISK_FREE_RATE + beta * (benchmark_return - DAILY_RISK_FREE_RATE))
    }

    /// Covariance-over-variance beta, truncated to the shorter series.
    fn beta(returns: &[f64], benchmark_returns: &[f64]) -> f64 {
        let n = returns.len().min(benchmark_returns.len());
        if n == 0 {
            return 0.0;
        }

        let portfolio = &returns[..n];
        let benchmark = &benchmark_returns[..n];
        let portfolio_avg = Self::average(portfolio);
        let benchmark_avg = Self::average(benchmark);

        let mut covariance = 0.0;
        let mut benchmark_variance = 0.0;
        for i in 0..n {
            let portfolio_diff = portfolio[i] - portfolio_avg;
            let benchmark_diff = benchmark[i] - benchmark_avg;
            covariance += portfolio_diff * benchmark_diff;
            benchmark_variance += benchmark_diff * benchmark_diff;
        }

        if benchmark_variance == 0.0 {
            return 0.0;
        }
        covariance / benchmark_variance
    }
}
