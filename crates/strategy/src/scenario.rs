//! Multi-candle pattern matching.
//!
//! A [`Scenario`] is an ordered list of condition sets, oldest first. It
//! matches at terminal position `j` when set `i` holds at
//! `j - depth + 1 + i` for every `i`.

use tracing::{debug, trace};

use common::{Condition, Error, MatchRecord, Result, ScenarioMatch};

use crate::resolver::{DataSet, Unresolved};

/// How far back a scan looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanWindow {
    /// Every candle (backtest).
    Full,
    /// Only the most recent `n` candles, but never fewer than the depth.
    Candles(usize),
}

/// Outcome of one condition at one position.
enum Evaluation {
    Matched(MatchRecord),
    Failed,
    Unresolved(Unresolved),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub sets: Vec<Vec<Condition>>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, sets: Vec<Vec<Condition>>) -> Result<Self> {
        let name = name.into();
        if sets.is_empty() {
            return Err(Error::Config(format!("pattern '{name}' has no condition sets")));
        }
        Ok(Self { name, sets })
    }

    pub fn depth(&self) -> usize {
        self.sets.len()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.sets.iter().flatten()
    }

    /// Fail if any referenced field exists in neither the candle series nor
    /// any supplied indicator's outputs.
    pub fn check_compatible(&self, data: &DataSet<'_>) -> Result<()> {
        for operand in self.conditions().flat_map(Condition::fields) {
            if !data.provides(operand) {
                return Err(Error::PatternIncompatible {
                    pattern: self.name.clone(),
                    field: operand.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Scan `data` and return every match, oldest first.
    pub fn test(&self, data: &DataSet<'_>, window: ScanWindow) -> Result<Vec<ScenarioMatch>> {
        self.test_with(data, window, |_| Ok(()))
    }

    /// Like [`Scenario::test`], calling `on_match` for each match as soon as
    /// it is found. An error from `on_match` ends the scan.
    pub fn test_with<F>(
        &self,
        data: &DataSet<'_>,
        window: ScanWindow,
        mut on_match: F,
    ) -> Result<Vec<ScenarioMatch>>
    where
        F: FnMut(&ScenarioMatch) -> Result<()>,
    {
        self.check_compatible(data)?;

        let depth = self.depth();
        let end = data.candles.len();
        let start = match window {
            ScanWindow::Full => depth,
            ScanWindow::Candles(n) => depth.max(end.saturating_sub(n)),
        };

        let mut matches = Vec::new();
        for j in start..end {
            if let Some(sets) = self.match_at(data, j) {
                let found = ScenarioMatch {
                    pattern: self.name.clone(),
                    index: j,
                    time: data.candles.time(j),
                    sets,
                };
                on_match(&found)?;
                matches.push(found);
            }
        }

        debug!(pattern = %self.name, start, end, matches = matches.len(), "Scenario scanned");
        Ok(matches)
    }

    fn match_at(&self, data: &DataSet<'_>, j: usize) -> Option<Vec<Vec<MatchRecord>>> {
        let first = j + 1 - self.depth();
        self.sets
            .iter()
            .enumerate()
            .map(|(offset, set)| self.match_set(data, set, first + offset))
            .collect()
    }

    /// Records for every condition in `set` at `index`, or `None` as soon as
    /// one fails or cannot be resolved.
    fn match_set(
        &self,
        data: &DataSet<'_>,
        set: &[Condition],
        index: usize,
    ) -> Option<Vec<MatchRecord>> {
        let mut records = Vec::with_capacity(set.len());
        for condition in set {
            match evaluate(data, condition, index) {
                Evaluation::Matched(record) => records.push(record),
                Evaluation::Failed => return None,
                Evaluation::Unresolved(why) => {
                    trace!(pattern = %self.name, index, condition = %condition, reason = %why, "Operand unresolved");
                    return None;
                }
            }
        }
        Some(records)
    }
}

fn evaluate(data: &DataSet<'_>, condition: &Condition, index: usize) -> Evaluation {
    let (a, b) = match data.resolve_condition(condition, index) {
        Ok(pair) => pair,
        Err(why) => return Evaluation::Unresolved(why),
    };
    if !condition.operator.holds(a.value, b.value) {
        return Evaluation::Failed;
    }
    Evaluation::Matched(MatchRecord {
        index,
        operand_a: condition.left.to_string(),
        operand_a_value: a.value,
        operator: condition.operator,
        operand_b: condition.right.to_string(),
        operand_b_value: b.value,
        indicator_offset: a.offset.or(b.offset),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use common::{Candle, CandleSeries, IndicatorOutput, IndicatorResult, RawOperand};

    use super::*;

    fn series(closes: &[f64]) -> CandleSeries {
        CandleSeries::from_candles(closes.iter().enumerate().map(|(i, &c)| Candle {
            open_time: 1_000 * i as i64,
            close_time: 1_000 * i as i64 + 999,
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1.0,
            trade_count: None,
            vwap: None,
        }))
    }

    fn rsi(begin: usize, values: Vec<f64>) -> IndicatorResult {
        let n = values.len();
        let mut outputs = BTreeMap::new();
        outputs.insert("outReal".to_string(), values);
        IndicatorResult::new(
            "rsi",
            IndicatorOutput {
                begin_index: begin,
                element_count: n,
                outputs,
            },
        )
    }

    fn cond(a: &str, op: &str, b: &str) -> Condition {
        Condition::parse(a, op, &RawOperand::from(b)).unwrap()
    }

    fn crossing_30() -> Scenario {
        Scenario::new(
            "rsi-cross-30",
            vec![
                vec![cond("outReal", "<=", "30")],
                vec![cond("outReal", ">=", "30")],
            ],
        )
        .unwrap()
    }

    // 28 -> 32 crosses 30; that is output position 2 of an indicator
    // anchored at candle 1, i.e. candle position 3.
    #[test]
    fn rsi_crossing_matches_once() {
        let candles = series(&[10.0, 9.0, 8.0, 11.0]);
        let inds = [rsi(1, vec![25.0, 28.0, 32.0])];
        let data = DataSet::new(&candles, &inds);

        let matches = crossing_30().test(&data, ScanWindow::Full).unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.index, 3);
        assert_eq!(m.time, Some(3_000));
        assert_eq!(m.sets[0][0].index, 2);
        assert_eq!(m.sets[0][0].operand_a_value, 28.0);
        assert_eq!(m.sets[1][0].operand_a_value, 32.0);
        assert_eq!(m.sets[1][0].operand_b_value, 30.0);
        let offset = m.sets[1][0].indicator_offset.unwrap();
        assert_eq!(m.index - offset, 2);
    }

    #[test]
    fn scan_window_limits_how_far_back_matches_are_found() {
        let candles = series(&[10.0, 9.0, 8.0, 11.0]);
        let inds = [rsi(1, vec![25.0, 28.0, 32.0])];
        let data = DataSet::new(&candles, &inds);
        let scenario = crossing_30();

        assert_eq!(scenario.test(&data, ScanWindow::Candles(1)).unwrap().len(), 1);
        assert!(scenario.test(&data, ScanWindow::Candles(0)).unwrap().is_empty());

        let early = Scenario::new("early", vec![vec![cond("close", "==", "9")]]).unwrap();
        assert_eq!(early.test(&data, ScanWindow::Full).unwrap()[0].index, 1);
        assert!(early.test(&data, ScanWindow::Candles(2)).unwrap().is_empty());
    }

    #[test]
    fn every_match_spans_exactly_depth_positions() {
        let closes: Vec<f64> = (0..40).map(|i| (i % 5) as f64).collect();
        let candles = series(&closes);
        let data = DataSet::new(&candles, &[]);
        let scenario = Scenario::new(
            "rise",
            vec![
                vec![cond("close", "==", "1")],
                vec![cond("close", "==", "2")],
                vec![cond("close", "==", "3"), cond("close", ">", "2")],
            ],
        )
        .unwrap();

        let matches = scenario.test(&data, ScanWindow::Full).unwrap();
        assert_eq!(matches.len(), 8);
        for m in &matches {
            assert_eq!(m.depth(), 3);
            for (i, set) in m.sets.iter().enumerate() {
                assert!(set.iter().all(|r| r.index == m.index - 2 + i));
            }
            assert_eq!(m.sets[2].len(), 2);
        }
    }

    #[test]
    fn rescanning_is_idempotent() {
        let candles = series(&[10.0, 9.0, 8.0, 11.0, 7.0, 12.0]);
        let data = DataSet::new(&candles, &[]);
        let scenario = Scenario::new(
            "dip-and-rip",
            vec![vec![cond("close", "<", "9")], vec![cond("close", ">=", "10%")]],
        )
        .unwrap();
        let first = scenario.test(&data, ScanWindow::Full).unwrap();
        let second = scenario.test(&data, ScanWindow::Full).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.iter().map(|m| m.index).collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn unknown_indicator_fails_before_scanning() {
        let candles = series(&[10.0, 9.0, 8.0, 11.0]);
        let inds = [rsi(1, vec![25.0, 28.0, 32.0])];
        let data = DataSet::new(&candles, &inds);
        let scenario = Scenario::new("sma-check", vec![vec![cond("sma.outReal", ">", "1")]]).unwrap();

        let mut called = false;
        let err = scenario
            .test_with(&data, ScanWindow::Full, |_| {
                called = true;
                Ok(())
            })
            .unwrap_err();
        assert!(!called);
        assert!(matches!(
            err,
            Error::PatternIncompatible { ref field, .. } if field == "sma.outReal"
        ));
        assert!(err.is_configuration());
    }

    #[test]
    fn on_match_runs_per_match_and_can_abort() {
        let candles = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let data = DataSet::new(&candles, &[]);
        let scenario = Scenario::new("up", vec![vec![cond("close", ">", "0")]]).unwrap();

        let mut seen = Vec::new();
        scenario
            .test_with(&data, ScanWindow::Full, |m| {
                seen.push(m.index);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4]);

        let err = scenario.test_with(&data, ScanWindow::Full, |_| Err(Error::Other("stop".into())));
        assert!(err.is_err());
    }

    #[test]
    fn short_series_yields_nothing() {
        let candles = series(&[1.0]);
        let data = DataSet::new(&candles, &[]);
        let scenario = Scenario::new("deep", vec![vec![cond("close", ">", "0")]; 3]).unwrap();
        assert!(scenario.test(&data, ScanWindow::Candles(50)).unwrap().is_empty());
    }
}
