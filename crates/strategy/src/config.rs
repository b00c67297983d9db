use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{parse_duration, Error, MatchMode, RawOperand, Result};

/// Top-level playbook file (TOML).
///
/// Example `config/playbook.toml`:
/// ```toml
/// [[chart]]
/// name = "btc-1h"
/// symbol = "BTCUSDT"
/// interval = "1h"
/// poll = "5m"
///
/// [[strategy]]
/// name = "rsi-oversold"
/// chart = "btc-1h"
///
/// [[strategy.analysis]]
/// name = "rsi"
/// kind = "rsi"
/// input = "close"
/// params = { period = 14 }
///
/// [[strategy.action]]
/// pattern = "rsi-cross-30"
/// conditions = [
///     [["rsi.outReal", "<=", 30]],
///     [["rsi.outReal", ">=", 30]],
/// ]
///
/// [[timeframe]]
/// name = "hourly"
/// interval = "1h"
/// window = "4h"
/// strategies = ["rsi-oversold"]
/// keepalive = true
///
/// [[subscription]]
/// name = "oversold-alert"
/// timeframes = ["hourly"]
/// conditions = [["total", ">=", 1]]
/// match = "new"
/// playbook = "telegram"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlaybookFile {
    #[serde(rename = "chart", default)]
    pub charts: Vec<ChartConfig>,
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(rename = "timeframe", default)]
    pub timeframes: Vec<TimeframeConfig>,
    #[serde(rename = "subscription", default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// A duration written as `"5m"`-style text or a bare millisecond count.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DurationValue {
    Millis(u64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            DurationValue::Millis(ms) => Ok(Duration::from_millis(*ms)),
            DurationValue::Text(s) => parse_duration(s),
        }
    }
}

/// `[operandA, operator, operandB]` as written in the file.
pub type ConditionTuple = (String, String, RawOperand);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartConfig {
    pub name: String,
    /// Exchange symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Duration of one candle.
    pub interval: DurationValue,
    /// Refresh threshold; defaults to `interval`.
    #[serde(default)]
    pub poll: Option<DurationValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: String,
    pub chart: String,
    #[serde(rename = "analysis", default)]
    pub analyses: Vec<AnalysisConfig>,
    #[serde(rename = "action", default)]
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Identity within the strategy; operands reference it as `<name>.<field>`.
    pub name: String,
    /// Indicator kind understood by the provider ("rsi", "macd", ...).
    pub kind: String,
    /// `"close"`, `"candle.high"` or `"<earlier analysis>.<field>"`.
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,
}

fn default_input() -> String {
    "close".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionConfig {
    pub pattern: String,
    /// One condition set per candle position, oldest first.
    pub conditions: Vec<Vec<ConditionTuple>>,
    /// Strategy to execute for every match.
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeframeConfig {
    pub name: String,
    pub interval: DurationValue,
    /// How far back matches are relevant; defaults to `interval`.
    #[serde(default)]
    pub window: Option<DurationValue>,
    pub strategies: Vec<String>,
    /// Arm the timer at startup.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Tick once immediately at startup.
    #[serde(default)]
    pub keepalive: bool,
    /// Scan whole series instead of the window.
    #[serde(default)]
    pub backtest: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    pub name: String,
    pub timeframes: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<ConditionTuple>,
    #[serde(rename = "match", default)]
    pub match_mode: MatchMode,
    #[serde(default)]
    pub playbook: Option<String>,
}

impl FromStr for PlaybookFile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("invalid playbook file: {e}")))
    }
}

impl PlaybookFile {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read playbook file '{}': {e}", path.display()))
        })?;
        content.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[chart]]
        name = "btc-1h"
        symbol = "BTCUSDT"
        interval = "1h"

        [[strategy]]
        name = "rsi-oversold"
        chart = "btc-1h"

        [[strategy.analysis]]
        name = "rsi"
        kind = "rsi"
        params = { period = 14 }

        [[strategy.action]]
        pattern = "rsi-cross-30"
        conditions = [
            [["rsi.outReal", "<=", 30]],
            [["rsi.outReal", ">=", "30"], ["close", ">", "2%"]],
        ]

        [[timeframe]]
        name = "hourly"
        interval = 3600000
        window = "4h"
        strategies = ["rsi-oversold"]

        [[subscription]]
        name = "alert"
        timeframes = ["hourly"]
        conditions = [["total", ">=", 1]]
        match = "new"
    "#;

    #[test]
    fn parses_full_file() {
        let file: PlaybookFile = SAMPLE.parse().unwrap();
        assert_eq!(file.charts.len(), 1);
        assert!(file.charts[0].poll.is_none());

        let strategy = &file.strategies[0];
        assert_eq!(strategy.analyses[0].input, "close");
        assert_eq!(strategy.actions[0].conditions.len(), 2);
        assert_eq!(strategy.actions[0].conditions[0][0].2, RawOperand::Number(30.0));
        assert_eq!(strategy.actions[0].conditions[1][1].2, RawOperand::from("2%"));

        let tf = &file.timeframes[0];
        assert_eq!(tf.interval.to_duration().unwrap(), Duration::from_secs(3600));
        assert_eq!(tf.window.as_ref().unwrap().to_duration().unwrap(), Duration::from_secs(4 * 3600));
        assert!(tf.active && !tf.keepalive && !tf.backtest);

        assert_eq!(file.subscriptions[0].match_mode, MatchMode::New);
        assert!(file.subscriptions[0].playbook.is_none());
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let err = "[[chart]]\nname = 1".parse::<PlaybookFile>().unwrap_err();
        assert!(err.is_configuration());
    }
}
