use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Condition, Operator};

/// One satisfied condition expression at one candle position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub index: usize,
    pub operand_a: String,
    pub operand_a_value: f64,
    pub operator: Operator,
    pub operand_b: String,
    pub operand_b_value: f64,
    /// Alignment anchor of the indicator that supplied a value, if any.
    pub indicator_offset: Option<usize>,
}

/// A full pattern match ending at candle position `index`.
///
/// `sets[i]` holds the records of the i-th condition set, evaluated at
/// `index - depth + 1 + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMatch {
    pub pattern: String,
    pub index: usize,
    /// Open time (ms) of the candle at `index`.
    pub time: Option<i64>,
    pub sets: Vec<Vec<MatchRecord>>,
}

impl ScenarioMatch {
    pub fn depth(&self) -> usize {
        self.sets.len()
    }
}

/// Results of one strategy execution: one match list per declared action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub strategy: String,
    pub chart: String,
    pub actions: Vec<Vec<ScenarioMatch>>,
}

impl StrategyRun {
    pub fn match_count(&self) -> usize {
        self.actions.iter().map(Vec::len).sum()
    }

    pub fn matches(&self) -> impl Iterator<Item = &ScenarioMatch> {
        self.actions.iter().flatten()
    }

    /// Fold another run of the same strategy into this one, skipping
    /// matches already present.
    pub fn absorb(&mut self, other: StrategyRun) {
        if self.actions.len() < other.actions.len() {
            self.actions.resize(other.actions.len(), Vec::new());
        }
        for (mine, theirs) in self.actions.iter_mut().zip(other.actions) {
            for m in theirs {
                if !mine.iter().any(|x| x.pattern == m.pattern && x.index == m.index) {
                    mine.push(m);
                }
            }
        }
    }
}

/// Emitted after a timeframe tick in which at least one strategy matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeResult {
    pub timeframe: String,
    pub run_id: Uuid,
    pub finished_at: DateTime<Utc>,
}

/// When a subscription may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Only when the firing timeframe produced signals not seen before.
    New,
    #[default]
    Any,
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMode::New => write!(f, "new"),
            MatchMode::Any => write!(f, "any"),
        }
    }
}

/// Scalars a subscription condition may compare.
pub const AGGREGATE_SCALARS: &[&str] = &["high", "low", "total", "new"];

/// A consumer-facing trigger over aggregated timeframe results.
///
/// Conditions compare the scalars `high`, `low`, `total` and `new` with
/// literals.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub name: String,
    pub timeframes: Vec<String>,
    pub conditions: Vec<Condition>,
    pub match_mode: MatchMode,
    /// Named playbook to run when the subscription fires.
    pub playbook: Option<String>,
}

/// Commands sent to the scheduler via its command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    Activate(String),
    Deactivate(String),
    Tick(String),
    Shutdown,
}
