//! Built-in indicator library.
//!
//! Every indicator returns compact output arrays plus the input position of
//! their first element, the shape [`IndicatorProvider`] promises.

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use std::collections::BTreeMap;

use common::{Error, IndicatorOutput, IndicatorParams, IndicatorProvider, Result};

use self::macd::{macd_series, MacdSeries};

pub const KINDS: &[&str] = &["sma", "ema", "rsi", "macd"];

/// Stateless provider for `sma`, `ema`, `rsi` and `macd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinIndicators;

impl IndicatorProvider for BuiltinIndicators {
    fn compute(&self, kind: &str, params: &IndicatorParams, input: &[f64]) -> Result<IndicatorOutput> {
        match kind {
            "sma" => {
                let period = param_usize(params, "period", 20, 1)?;
                Ok(single(period - 1, sma::sma_series(input, period)))
            }
            "ema" => {
                let period = param_usize(params, "period", 20, 1)?;
                Ok(single(period - 1, ema::ema_series(input, period)))
            }
            "rsi" => {
                let period = param_usize(params, "period", 14, 2)?;
                Ok(single(period, rsi::rsi_series(input, period)))
            }
            "macd" => {
                let fast = param_usize(params, "fast", 12, 1)?;
                let slow = param_usize(params, "slow", 26, 2)?;
                let signal = param_usize(params, "signal", 9, 1)?;
                if fast >= slow {
                    return Err(Error::Config(format!(
                        "macd fast period ({fast}) must be less than slow period ({slow})"
                    )));
                }
                let MacdSeries { macd, signal: sig, hist } = macd_series(input, fast, slow, signal);
                let count = macd.len();
                let mut outputs = BTreeMap::new();
                outputs.insert("outMACD".to_string(), macd);
                outputs.insert("outMACDSignal".to_string(), sig);
                outputs.insert("outMACDHist".to_string(), hist);
                Ok(aligned(MacdSeries::lookback(slow, signal), count, outputs))
            }
            other => Err(Error::UnknownIndicator(other.to_string())),
        }
    }

    fn supports(&self, kind: &str) -> bool {
        KINDS.contains(&kind)
    }
}

fn single(lookback: usize, values: Vec<f64>) -> IndicatorOutput {
    let count = values.len();
    let mut outputs = BTreeMap::new();
    outputs.insert("outReal".to_string(), values);
    aligned(lookback, count, outputs)
}

fn aligned(lookback: usize, count: usize, outputs: BTreeMap<String, Vec<f64>>) -> IndicatorOutput {
    IndicatorOutput {
        begin_index: if count == 0 { 0 } else { lookback },
        element_count: count,
        outputs,
    }
}

fn param_usize(params: &IndicatorParams, key: &str, default: usize, min: usize) -> Result<usize> {
    let value = match params.get(key) {
        None => default,
        Some(v) if v.fract() == 0.0 && *v >= 0.0 => *v as usize,
        Some(v) => {
            return Err(Error::Config(format!(
                "indicator parameter '{key}' must be a whole number, got {v}"
            )))
        }
    };
    if value < min {
        return Err(Error::Config(format!(
            "indicator parameter '{key}' must be >= {min}, got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> IndicatorParams {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn outputs_are_aligned_to_lookback() {
        let input: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64).sin()).collect();
        let ind = BuiltinIndicators;

        let rsi = ind.compute("rsi", &params(&[("period", 14.0)]), &input).unwrap();
        assert_eq!(rsi.begin_index, 14);
        assert_eq!(rsi.begin_index + rsi.element_count, input.len());

        let sma = ind.compute("sma", &params(&[("period", 5.0)]), &input).unwrap();
        assert_eq!(sma.begin_index, 4);
        assert_eq!(sma.outputs["outReal"].len(), sma.element_count);

        let macd = ind
            .compute("macd", &params(&[("fast", 3.0), ("slow", 6.0), ("signal", 3.0)]), &input)
            .unwrap();
        assert_eq!(macd.begin_index, 7);
        assert_eq!(macd.begin_index + macd.element_count, input.len());
        assert_eq!(macd.outputs.len(), 3);
    }

    #[test]
    fn short_input_gives_empty_output() {
        let out = BuiltinIndicators
            .compute("ema", &params(&[("period", 10.0)]), &[1.0, 2.0])
            .unwrap();
        assert_eq!(out.element_count, 0);
        assert_eq!(out.begin_index, 0);
    }

    #[test]
    fn invalid_parameters_are_configuration_errors() {
        let ind = BuiltinIndicators;
        assert!(ind.compute("rsi", &params(&[("period", 1.0)]), &[]).is_err());
        assert!(ind.compute("sma", &params(&[("period", 2.5)]), &[]).is_err());
        assert!(ind
            .compute("macd", &params(&[("fast", 26.0), ("slow", 12.0)]), &[])
            .unwrap_err()
            .is_configuration());
        assert!(matches!(
            ind.compute("vortex", &params(&[]), &[]),
            Err(Error::UnknownIndicator(_))
        ));
        assert!(ind.supports("macd") && !ind.supports("vortex"));
    }

    #[test]
    fn deterministic_for_identical_input() {
        let input: Vec<f64> = (0..30).map(|i| (i * 7 % 11) as f64).collect();
        let p = params(&[("period", 4.0)]);
        let a = BuiltinIndicators.compute("rsi", &p, &input).unwrap();
        let b = BuiltinIndicators.compute("rsi", &p, &input).unwrap();
        assert_eq!(a, b);
    }
}
