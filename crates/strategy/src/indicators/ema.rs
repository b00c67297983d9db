/// Exponential Moving Average, seeded with the SMA of the first `period`
/// values. Returns `values.len() - period + 1` values, the first belonging
/// to input position `period - 1`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_with_sma() {
        let out = ema_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 2.0).abs() < 1e-12);
        // k = 0.5: 4 * 0.5 + 2 * 0.5
        assert!((out[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ema_empty_when_short() {
        assert!(ema_series(&[1.0, 2.0], 3).is_empty());
        assert!(ema_series(&[1.0, 2.0], 0).is_empty());
    }
}
