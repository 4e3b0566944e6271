pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 {
        return vec![prices[0]; prices.len()];
    }
    if period == 1 {
        return prices.to_vec();
    }
    if prices.len() < period {
        return vec![prices[0]; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::new();
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// Linearly weighted moving average; the most recent price carries the
/// largest weight.
pub fn calculate_wma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period <= 1 || prices.len() < period {
        return prices.to_vec();
    }

    let weight_sum = (period * (period + 1)) as f64 / 2.0;
    let mut wma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        wma_values.push(prices[0]);
    }

    for i in (period - 1)..prices.len() {
        let window_start = i + 1 - period;
        let mut weighted = 0.0;
        for (offset, price) in prices[window_start..=i].iter().enumerate() {
            weighted += price * (offset + 1) as f64;
        }
        wma_values.push(weighted / weight_sum);
    }

    wma_values
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let mut macd_line = Vec::new();
    for i in 0..prices.len() {
        macd_line.push(fast_ema[i] - slow_ema[i]);
    }

    let signal_line = calculate_ema(&macd_line, signal_period);

    let mut histogram = Vec::new();
    for i in 0..macd_line.len() {
        histogram.push(macd_line[i] - signal_line[i]);
    }

    (macd_line, signal_line, histogram)
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 || prices.len() < period + 1 {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

/// Returns `(upper, middle, lower)`. The upper and lower bands start at
/// index `period - 1` of the price series; the middle band covers the
/// full series.
pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if period == 0 || prices.len() < period {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let middle = calculate_sma(prices, period);
    let mut upper = Vec::new();
    let mut lower = Vec::new();

    let start = period - 1;
    for i in start..prices.len() {
        let window_start = i + 1 - period;
        let slice = &prices[window_start..=i];
        let mean = middle[i];
        let variance = slice.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
        let standard_deviation = variance.sqrt();

        upper.push(mean + (std_dev * standard_deviation));
        lower.push(mean - (std_dev * standard_deviation));
    }

    (upper, middle, lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_basic() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&prices, 3);
        assert_eq!(sma.len(), 5);
        assert!((sma[2] - 2.0).abs() < 1e-9);
        assert!((sma[4] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_wma_weights_recent_prices() {
        let prices = vec![1.0, 2.0, 3.0];
        let wma = calculate_wma(&prices, 3);
        // (1*1 + 2*2 + 3*3) / 6
        assert!((wma[2] - 14.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let prices: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let rsi = calculate_rsi(&prices, 14);
        assert!((rsi[19] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_bands_symmetry() {
        let prices = vec![10.0, 11.0, 12.0, 11.0, 10.0, 11.0, 12.0, 11.0, 10.0, 11.0];
        let (upper, middle, lower) = calculate_bollinger_bands(&prices, 5, 2.0);
        assert_eq!(upper.len(), prices.len() - 4);
        let i = upper.len() - 1;
        let mid = middle[prices.len() - 1];
        assert!((upper[i] - mid - (mid - lower[i])).abs() < 1e-9);
    }
}
