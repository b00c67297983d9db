use super::ema::ema_series;

/// MACD (Moving Average Convergence/Divergence) series.
///
/// MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal),
/// Histogram = MACD − Signal. All three are aligned so that element 0
/// belongs to input position `slow + signal - 2`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

impl MacdSeries {
    pub fn lookback(slow: usize, signal: usize) -> usize {
        slow + signal - 2
    }
}

/// Requires `fast < slow` and non-zero periods; the caller validates.
pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let slow_ema = ema_series(closes, slow);
    if slow_ema.is_empty() {
        return MacdSeries::default();
    }
    let fast_ema = ema_series(closes, fast);
    // Fast EMA starts earlier; drop its head so both begin at `slow - 1`.
    let skip = slow - fast;
    let line: Vec<f64> = fast_ema[skip..]
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();

    let sig = ema_series(&line, signal);
    if sig.is_empty() {
        return MacdSeries::default();
    }
    let macd = line[signal - 1..].to_vec();
    let hist = macd.iter().zip(&sig).map(|(m, s)| m - s).collect();
    MacdSeries {
        macd,
        signal: sig,
        hist,
    }
}
