use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use common::{
    CandleField, Chart, Condition, Error, IndicatorProvider, Operand, Result, Subscription,
    AGGREGATE_SCALARS,
};

use crate::analysis::{Analysis, AnalysisInput};
use crate::config::{
    ActionConfig, AnalysisConfig, ConditionTuple, PlaybookFile, StrategyConfig, SubscriptionConfig,
    TimeframeConfig,
};
use crate::engine::{Action, Strategy};
use crate::resolver::CANDLE_SOURCE;
use crate::scenario::Scenario;

/// A validated timeframe declaration, ready to be scheduled.
#[derive(Debug, Clone)]
pub struct TimeframeDecl {
    pub name: String,
    pub interval: Duration,
    pub window: Duration,
    pub strategies: Vec<Arc<Strategy>>,
    pub active: bool,
    pub keepalive: bool,
    pub backtest: bool,
}

/// Everything declared in a playbook file, validated and linked.
#[derive(Debug, Clone)]
pub struct Registry {
    pub charts: Vec<Chart>,
    pub strategies: BTreeMap<String, Arc<Strategy>>,
    pub timeframes: Vec<TimeframeDecl>,
    pub subscriptions: Vec<Subscription>,
}

impl Registry {
    /// Validate and link the whole file. Nothing is returned unless every
    /// declaration is sound.
    pub fn from_config(file: &PlaybookFile, indicators: &dyn IndicatorProvider) -> Result<Self> {
        let mut charts = Vec::with_capacity(file.charts.len());
        for cfg in &file.charts {
            unique(charts.iter().map(|c: &Chart| c.name.as_str()), &cfg.name, "chart")?;
            let interval = cfg.interval.to_duration()?;
            let mut chart = Chart::new(&cfg.name, &cfg.symbol, interval);
            if let Some(poll) = &cfg.poll {
                chart.poll = poll.to_duration()?;
            }
            charts.push(chart);
        }

        let mut configs: HashMap<&str, &StrategyConfig> = HashMap::new();
        for cfg in &file.strategies {
            if configs.insert(cfg.name.as_str(), cfg).is_some() {
                return Err(Error::Config(format!("duplicate strategy '{}'", cfg.name)));
            }
            if !charts.iter().any(|c| c.name == cfg.chart) {
                return Err(Error::Config(format!(
                    "strategy '{}' uses unknown chart '{}'",
                    cfg.name, cfg.chart
                )));
            }
        }

        let mut builder = StrategyBuilder {
            configs: &configs,
            indicators,
            built: BTreeMap::new(),
            visiting: HashSet::new(),
        };
        for cfg in &file.strategies {
            builder.build(&cfg.name)?;
        }
        let strategies = builder.built;
        for strategy in strategies.values() {
            info!(name = %strategy.name, chart = %strategy.chart, actions = strategy.actions.len(), "Registered strategy");
        }

        let mut timeframes: Vec<TimeframeDecl> = Vec::with_capacity(file.timeframes.len());
        for cfg in &file.timeframes {
            unique(timeframes.iter().map(|t| t.name.as_str()), &cfg.name, "timeframe")?;
            timeframes.push(build_timeframe(cfg, &strategies)?);
        }

        let mut subscriptions: Vec<Subscription> = Vec::with_capacity(file.subscriptions.len());
        for cfg in &file.subscriptions {
            unique(subscriptions.iter().map(|s| s.name.as_str()), &cfg.name, "subscription")?;
            subscriptions.push(build_subscription(cfg, &timeframes)?);
        }

        Ok(Self {
            charts,
            strategies,
            timeframes,
            subscriptions,
        })
    }
}

fn unique<'a>(mut existing: impl Iterator<Item = &'a str>, name: &str, what: &str) -> Result<()> {
    if existing.any(|n| n == name) {
        return Err(Error::Config(format!("duplicate {what} '{name}'")));
    }
    Ok(())
}

/// Builds strategies children-first so that chained strategies can be shared
/// by reference. A strategy reached again while still being built is a cycle.
struct StrategyBuilder<'a> {
    configs: &'a HashMap<&'a str, &'a StrategyConfig>,
    indicators: &'a dyn IndicatorProvider,
    built: BTreeMap<String, Arc<Strategy>>,
    visiting: HashSet<String>,
}

impl StrategyBuilder<'_> {
    fn build(&mut self, name: &str) -> Result<Arc<Strategy>> {
        if let Some(done) = self.built.get(name) {
            return Ok(done.clone());
        }
        let cfg = *self
            .configs
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown strategy '{name}'")))?;
        if !self.visiting.insert(name.to_string()) {
            return Err(Error::ChainCycle {
                strategy: name.to_string(),
            });
        }

        let analyses = build_analyses(cfg, self.indicators)?;
        let mut actions = Vec::with_capacity(cfg.actions.len());
        for action in &cfg.actions {
            let scenario = build_scenario(action, &analyses)?;
            let chain = match &action.chain {
                Some(child) => Some(self.build(child)?),
                None => None,
            };
            actions.push(Action { scenario, chain });
        }

        self.visiting.remove(name);
        let strategy = Arc::new(Strategy {
            name: cfg.name.clone(),
            chart: cfg.chart.clone(),
            analyses,
            actions,
        });
        self.built.insert(cfg.name.clone(), strategy.clone());
        Ok(strategy)
    }
}

fn build_analyses(cfg: &StrategyConfig, indicators: &dyn IndicatorProvider) -> Result<Vec<Analysis>> {
    let mut analyses: Vec<Analysis> = Vec::with_capacity(cfg.analyses.len());
    for a in &cfg.analyses {
        if a.name == CANDLE_SOURCE || a.name.contains('.') {
            return Err(Error::Config(format!(
                "strategy '{}': '{}' is not a valid analysis name",
                cfg.name, a.name
            )));
        }
        if analyses.iter().any(|x| x.name == a.name) {
            return Err(Error::Config(format!(
                "strategy '{}' declares analysis '{}' twice",
                cfg.name, a.name
            )));
        }
        if !indicators.supports(&a.kind) {
            return Err(Error::UnknownIndicator(a.kind.clone()));
        }
        let input = AnalysisInput::parse(&a.input)?;
        if let AnalysisInput::Analysis { name, .. } = &input {
            if !analyses.iter().any(|x| &x.name == name) {
                return Err(Error::MissingAnalysis {
                    analysis: a.name.clone(),
                    input: a.input.clone(),
                });
            }
        }
        let mut analysis = Analysis::new(&a.name, &a.kind, input);
        for (key, value) in &a.params {
            analysis = analysis.param(key.clone(), param_f64(a, key, value)?);
        }
        analyses.push(analysis);
    }
    Ok(analyses)
}

fn param_f64(analysis: &AnalysisConfig, key: &str, value: &toml::Value) -> Result<f64> {
    value
        .as_float()
        .or_else(|| value.as_integer().map(|v| v as f64))
        .ok_or_else(|| {
            Error::Config(format!(
                "analysis '{}': parameter '{key}' must be a number",
                analysis.name
            ))
        })
}

fn parse_condition((left, op, right): &ConditionTuple) -> Result<Condition> {
    Condition::parse(left, op, right)
}

fn build_scenario(action: &ActionConfig, analyses: &[Analysis]) -> Result<Scenario> {
    let mut sets = Vec::with_capacity(action.conditions.len());
    for set in &action.conditions {
        if set.is_empty() {
            return Err(Error::Config(format!(
                "pattern '{}' has an empty condition set",
                action.pattern
            )));
        }
        let set = set.iter().map(parse_condition).collect::<Result<Vec<_>>>()?;
        for operand in set.iter().flat_map(Condition::fields) {
            if !declared(operand, analyses) {
                return Err(Error::PatternIncompatible {
                    pattern: action.pattern.clone(),
                    field: operand.to_string(),
                });
            }
        }
        sets.push(set);
    }
    Scenario::new(&action.pattern, sets)
}

/// Prefixed operands must name the candle series or a declared analysis.
/// Bare names are only checked against data at scan time.
fn declared(operand: &Operand, analyses: &[Analysis]) -> bool {
    match operand {
        Operand::Field {
            source: Some(source),
            field,
        } if source == CANDLE_SOURCE => CandleField::from_str(field).is_ok(),
        Operand::Field {
            source: Some(source),
            ..
        } => analyses.iter().any(|a| &a.name == source),
        _ => true,
    }
}

fn build_timeframe(
    cfg: &TimeframeConfig,
    strategies: &BTreeMap<String, Arc<Strategy>>,
) -> Result<TimeframeDecl> {
    let interval = cfg.interval.to_duration()?;
    if interval.is_zero() {
        return Err(Error::Config(format!(
            "timeframe '{}' has a zero interval",
            cfg.name
        )));
    }
    let window = match &cfg.window {
        Some(w) => w.to_duration()?,
        None => interval,
    };
    let strategies = cfg
        .strategies
        .iter()
        .map(|name| {
            strategies.get(name).cloned().ok_or_else(|| {
                Error::Config(format!(
                    "timeframe '{}' uses unknown strategy '{name}'",
                    cfg.name
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TimeframeDecl {
        name: cfg.name.clone(),
        interval,
        window,
        strategies,
        active: cfg.active,
        keepalive: cfg.keepalive,
        backtest: cfg.backtest,
    })
}

fn build_subscription(cfg: &SubscriptionConfig, timeframes: &[TimeframeDecl]) -> Result<Subscription> {
    if cfg.timeframes.is_empty() {
        return Err(Error::Config(format!(
            "subscription '{}' watches no timeframes",
            cfg.name
        )));
    }
    for tf in &cfg.timeframes {
        if !timeframes.iter().any(|t| &t.name == tf) {
            return Err(Error::Config(format!(
                "subscription '{}' watches unknown timeframe '{tf}'",
                cfg.name
            )));
        }
    }

    let conditions = cfg
        .conditions
        .iter()
        .map(parse_condition)
        .collect::<Result<Vec<_>>>()?;
    for c in &conditions {
        let scalar = matches!(&c.left, Operand::Field { source: None, field } if AGGREGATE_SCALARS.contains(&field.as_str()));
        if !scalar || !matches!(c.right, Operand::Literal(_)) {
            return Err(Error::Config(format!(
                "subscription '{}': condition '{c}' must compare one of {AGGREGATE_SCALARS:?} with a number",
                cfg.name
            )));
        }
    }

    Ok(Subscription {
        name: cfg.name.clone(),
        timeframes: cfg.timeframes.clone(),
        conditions,
        match_mode: cfg.match_mode,
        playbook: cfg.playbook.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::BuiltinIndicators;

    const BASE: &str = r#"
        [[chart]]
        name = "btc"
        symbol = "BTCUSDT"
        interval = "1m"
        poll = "30s"

        [[strategy]]
        name = "entry"
        chart = "btc"

        [[strategy.analysis]]
        name = "rsi"
        kind = "rsi"
        params = { period = 14 }

        [[strategy.analysis]]
        name = "rsi_smooth"
        kind = "sma"
        input = "rsi.outReal"
        params = { period = 3 }

        [[strategy.action]]
        pattern = "oversold"
        conditions = [[["rsi_smooth.outReal", "<", 30]]]
        chain = "confirm"

        [[strategy]]
        name = "confirm"
        chart = "btc"

        [[strategy.action]]
        pattern = "green"
        conditions = [[["close", ">", "candle.open"]]]

        [[timeframe]]
        name = "minute"
        interval = "1m"
        window = "10m"
        strategies = ["entry"]

        [[subscription]]
        name = "alert"
        timeframes = ["minute"]
        conditions = [["new", ">", 0]]
        match = "new"
    "#;

    fn load(extra: &str) -> Result<Registry> {
        let file: PlaybookFile = format!("{BASE}\n{extra}").parse()?;
        Registry::from_config(&file, &BuiltinIndicators)
    }

    #[test]
    fn builds_linked_graph() {
        let registry = load("").unwrap();
        assert_eq!(registry.charts[0].poll, Duration::from_secs(30));

        let entry = &registry.strategies["entry"];
        let child = entry.actions[0].chain.as_ref().unwrap();
        assert!(Arc::ptr_eq(child, &registry.strategies["confirm"]));
        assert_eq!(entry.analyses[1].params["period"], 3.0);

        let tf = &registry.timeframes[0];
        assert_eq!(tf.window, Duration::from_secs(600));
        assert!(tf.active);
        assert_eq!(registry.subscriptions[0].conditions.len(), 1);
    }

    #[test]
    fn chain_cycles_are_rejected() {
        let file: PlaybookFile = r#"
            [[chart]]
            name = "btc"
            symbol = "BTCUSDT"
            interval = "1m"

            [[strategy]]
            name = "a"
            chart = "btc"
            [[strategy.action]]
            pattern = "p"
            conditions = [[["close", ">", 1]]]
            chain = "b"

            [[strategy]]
            name = "b"
            chart = "btc"
            [[strategy.action]]
            pattern = "q"
            conditions = [[["close", ">", 1]]]
            chain = "a"
        "#
        .parse()
        .unwrap();
        let err = Registry::from_config(&file, &BuiltinIndicators).unwrap_err();
        assert!(matches!(err, Error::ChainCycle { .. }));
    }

    #[test]
    fn undeclared_prefix_fails_at_build_time() {
        let err = load(
            r#"
            [[strategy]]
            name = "broken"
            chart = "btc"
            [[strategy.action]]
            pattern = "sma-check"
            conditions = [[["sma.outReal", ">", 1]]]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::PatternIncompatible { ref field, .. } if field == "sma.outReal"));
    }

    #[test]
    fn declaration_errors() {
        let bad_operator = load(
            r#"
            [[strategy]]
            name = "x"
            chart = "btc"
            [[strategy.action]]
            pattern = "p"
            conditions = [[["close", "=>", 1]]]
            "#,
        );
        assert!(matches!(bad_operator, Err(Error::InvalidOperator(_))));

        let forward_reference = load(
            r#"
            [[strategy]]
            name = "x"
            chart = "btc"
            [[strategy.analysis]]
            name = "signal"
            kind = "ema"
            input = "macd.outMACD"
            [[strategy.analysis]]
            name = "macd"
            kind = "macd"
            "#,
        );
        assert!(matches!(forward_reference, Err(Error::MissingAnalysis { .. })));

        let unknown_kind = load(
            r#"
            [[strategy]]
            name = "x"
            chart = "btc"
            [[strategy.analysis]]
            name = "v"
            kind = "vortex"
            "#,
        );
        assert!(matches!(unknown_kind, Err(Error::UnknownIndicator(_))));

        let unknown_timeframe = load(
            r#"
            [[subscription]]
            name = "orphan"
            timeframes = ["weekly"]
            "#,
        );
        assert!(unknown_timeframe.unwrap_err().is_configuration());

        let non_scalar = load(
            r#"
            [[subscription]]
            name = "peek"
            timeframes = ["minute"]
            conditions = [["close", ">", 1]]
            "#,
        );
        assert!(non_scalar.is_err());

        let duplicate = load(
            r#"
            [[strategy]]
            name = "confirm"
            chart = "btc"
            "#,
        );
        assert!(duplicate.is_err());
    }
}
