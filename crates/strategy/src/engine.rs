//! Strategy execution: indicators, scenario actions, and chaining into
//! child strategies on match.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use common::{Chart, Error, IndicatorProvider, Result, StrategyRun};

use crate::analysis::{run_analyses, Analysis};
use crate::resolver::DataSet;
use crate::scenario::{Scenario, ScanWindow};

/// A scenario plus the strategy to run whenever it matches.
#[derive(Debug, Clone)]
pub struct Action {
    pub scenario: Scenario,
    pub chain: Option<Arc<Strategy>>,
}

/// Indicators and scenario actions evaluated against one chart.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: String,
    pub chart: String,
    pub analyses: Vec<Analysis>,
    pub actions: Vec<Action>,
}

/// How much history a run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunWindow {
    /// Whole series.
    Backtest,
    /// Only candles inside this duration, converted per chart.
    Recent(std::time::Duration),
}

/// Charts readable during one run, by name.
#[derive(Debug, Default)]
pub struct ChartView<'a> {
    charts: HashMap<&'a str, &'a Chart>,
}

impl<'a> ChartView<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chart: &'a Chart) {
        self.charts.insert(chart.name.as_str(), chart);
    }

    pub fn get(&self, name: &str) -> Result<&'a Chart> {
        self.charts
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("chart '{name}' is not available to this run")))
    }
}

/// Everything a strategy run reads.
pub struct ExecutionContext<'a> {
    pub charts: &'a ChartView<'a>,
    pub indicators: &'a dyn IndicatorProvider,
    pub window: RunWindow,
}

impl Strategy {
    /// Names of the charts this strategy and its chained strategies read.
    pub fn charts(&self) -> Vec<String> {
        let mut names = vec![self.chart.clone()];
        for child in self.actions.iter().filter_map(|a| a.chain.as_ref()) {
            for name in child.charts() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Run indicators, then every action in declaration order.
    ///
    /// Returns this strategy's run first, followed by the runs of chained
    /// strategies in the order their triggering matches were found.
    /// Configuration errors abort the run; any other failure of one action
    /// is logged and leaves that action with no matches.
    pub fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<StrategyRun>> {
        let chart = ctx.charts.get(&self.chart)?;
        let indicators = run_analyses(&self.analyses, &chart.series, ctx.indicators)?;
        let data = DataSet::new(&chart.series, &indicators);
        let window = match ctx.window {
            RunWindow::Backtest => ScanWindow::Full,
            RunWindow::Recent(d) => ScanWindow::Candles(chart.candles_in(d)),
        };

        let mut own = StrategyRun {
            strategy: self.name.clone(),
            chart: self.chart.clone(),
            actions: Vec::with_capacity(self.actions.len()),
        };
        let mut chained = Vec::new();

        for action in &self.actions {
            let outcome = action.scenario.test_with(&data, window, |_| match &action.chain {
                Some(child) => {
                    chained.extend(child.execute(ctx)?);
                    Ok(())
                }
                None => Ok(()),
            });
            match outcome {
                Ok(matches) => {
                    if !matches.is_empty() {
                        info!(
                            strategy = %self.name,
                            pattern = %action.scenario.name,
                            matches = matches.len(),
                            "Scenario matched"
                        );
                    }
                    own.actions.push(matches);
                }
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => {
                    error!(strategy = %self.name, pattern = %action.scenario.name, error = %e, "Action failed");
                    own.actions.push(Vec::new());
                }
            }
        }

        let mut runs = Vec::with_capacity(1 + chained.len());
        runs.push(own);
        runs.extend(chained);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{Candle, CandleField, CandleSeries, Condition, IndicatorOutput, IndicatorParams, RawOperand};

    use super::*;
    use crate::analysis::AnalysisInput;
    use crate::indicators::BuiltinIndicators;

    fn chart(name: &str, closes: &[f64]) -> Chart {
        let series = CandleSeries::from_candles(closes.iter().enumerate().map(|(i, &c)| Candle {
            open_time: i as i64 * 60_000,
            close_time: i as i64 * 60_000 + 59_999,
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1.0,
            trade_count: None,
            vwap: None,
        }));
        Chart::new(name, "TEST", Duration::from_secs(60)).with_series(series)
    }

    fn cond(a: &str, op: &str, b: &str) -> Condition {
        Condition::parse(a, op, &RawOperand::from(b)).unwrap()
    }

    fn action(name: &str, sets: Vec<Vec<Condition>>, chain: Option<Arc<Strategy>>) -> Action {
        Action {
            scenario: Scenario::new(name, sets).unwrap(),
            chain,
        }
    }

    /// Fails every computation with a non-configuration error.
    struct BrokenProvider;

    impl IndicatorProvider for BrokenProvider {
        fn compute(&self, _: &str, _: &IndicatorParams, _: &[f64]) -> Result<IndicatorOutput> {
            Err(Error::Other("library offline".into()))
        }
    }

    #[test]
    fn one_result_list_per_action() {
        let c = chart("c", &[1.0, 2.0, 3.0, 2.0, 5.0]);
        let mut view = ChartView::new();
        view.insert(&c);
        let ctx = ExecutionContext {
            charts: &view,
            indicators: &BuiltinIndicators,
            window: RunWindow::Backtest,
        };
        let strategy = Strategy {
            name: "s".into(),
            chart: "c".into(),
            analyses: vec![],
            actions: vec![
                action("up", vec![vec![cond("close", ">", "2")]], None),
                action("never", vec![vec![cond("close", ">", "99")]], None),
            ],
        };

        let runs = strategy.execute(&ctx).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].actions.len(), 2);
        assert_eq!(runs[0].actions[0].len(), 2);
        assert!(runs[0].actions[1].is_empty());
    }

    #[test]
    fn matches_chain_into_child_strategy() {
        let parent_chart = chart("parent", &[1.0, 5.0, 1.0, 5.0]);
        let child_chart = chart("child", &[10.0, 20.0]);
        let mut view = ChartView::new();
        view.insert(&parent_chart);
        view.insert(&child_chart);
        let ctx = ExecutionContext {
            charts: &view,
            indicators: &BuiltinIndicators,
            window: RunWindow::Backtest,
        };

        let child = Arc::new(Strategy {
            name: "confirm".into(),
            chart: "child".into(),
            analyses: vec![],
            actions: vec![action("above-15", vec![vec![cond("close", ">", "15")]], None)],
        });
        let parent = Strategy {
            name: "spike".into(),
            chart: "parent".into(),
            analyses: vec![],
            actions: vec![action("spike", vec![vec![cond("close", "==", "5")]], Some(child))],
        };

        assert_eq!(parent.charts(), vec!["parent".to_string(), "child".to_string()]);
        let runs = parent.execute(&ctx).unwrap();
        // Two parent matches, each triggering one child run.
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].match_count(), 2);
        assert!(runs[1..].iter().all(|r| r.strategy == "confirm" && r.match_count() == 1));
    }

    #[test]
    fn incompatible_pattern_propagates() {
        let c = chart("c", &[1.0, 2.0, 3.0]);
        let mut view = ChartView::new();
        view.insert(&c);
        let ctx = ExecutionContext {
            charts: &view,
            indicators: &BuiltinIndicators,
            window: RunWindow::Recent(Duration::from_secs(600)),
        };
        let strategy = Strategy {
            name: "s".into(),
            chart: "c".into(),
            analyses: vec![],
            actions: vec![action("bad", vec![vec![cond("sma.outReal", ">", "1")]], None)],
        };
        assert!(matches!(
            strategy.execute(&ctx),
            Err(Error::PatternIncompatible { .. })
        ));
    }

    #[test]
    fn failing_child_does_not_abort_sibling_actions() {
        let c = chart("c", &[1.0, 2.0, 3.0]);
        let mut view = ChartView::new();
        view.insert(&c);
        let ctx = ExecutionContext {
            charts: &view,
            indicators: &BrokenProvider,
            window: RunWindow::Backtest,
        };
        let child = Arc::new(Strategy {
            name: "needs-indicators".into(),
            chart: "c".into(),
            analyses: vec![Analysis::new("rsi", "rsi", AnalysisInput::Candle(CandleField::Close))],
            actions: vec![],
        });
        let strategy = Strategy {
            name: "s".into(),
            chart: "c".into(),
            analyses: vec![],
            actions: vec![
                action("first", vec![vec![cond("close", ">", "1")]], Some(child)),
                action("second", vec![vec![cond("close", ">", "1")]], None),
            ],
        };

        let runs = strategy.execute(&ctx).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].actions[0].is_empty());
        assert_eq!(runs[0].actions[1].len(), 2);
    }
}
