use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of a timeframe's latest tick, as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub timeframe: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Match count per strategy, in declaration order of first appearance.
    pub strategies: BTreeMap<String, usize>,
    /// Number of `ScenarioMatch` across all strategies.
    pub match_count: usize,
    /// Sorted, de-duplicated open times of every match's terminal candle.
    pub signal_times: Vec<i64>,
    /// Strategies that failed during the tick.
    pub failed: Vec<String>,
}

/// Latest snapshot per timeframe, shared between the scheduler (writer) and
/// the dispatcher, API and bot (readers).
#[derive(Debug, Clone, Default)]
pub struct ResultsBoard {
    inner: Arc<RwLock<HashMap<String, TimeframeSnapshot>>>,
}

impl ResultsBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, snapshot: TimeframeSnapshot) {
        self.inner
            .write()
            .await
            .insert(snapshot.timeframe.clone(), snapshot);
    }

    pub async fn get(&self, timeframe: &str) -> Option<TimeframeSnapshot> {
        self.inner.read().await.get(timeframe).cloned()
    }

    /// All snapshots, ordered by timeframe name.
    pub async fn all(&self) -> Vec<TimeframeSnapshot> {
        let mut all: Vec<_> = self.inner.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.timeframe.cmp(&b.timeframe));
        all
    }
}
