use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{CandleSeries, Chart, ChartSync, Error, Result};

/// Recorded chart history played back as if it were live.
///
/// Each refresh reveals the next `step` candles of the chart's recording.
/// Nothing is fetched from the network.
#[derive(Debug)]
pub struct ReplaySource {
    /// Full recording per chart name.
    histories: HashMap<String, CandleSeries>,
    /// Candles revealed so far, per chart name.
    cursors: Arc<RwLock<HashMap<String, usize>>>,
    step: usize,
}

impl ReplaySource {
    pub fn new(histories: HashMap<String, CandleSeries>, step: usize) -> Self {
        let step = step.max(1);
        info!(charts = histories.len(), step, "ReplaySource initialized");
        Self {
            histories,
            cursors: Arc::new(RwLock::new(HashMap::new())),
            step,
        }
    }

    /// Load a JSON object mapping chart names to parallel-array series.
    pub fn load(path: impl AsRef<Path>, step: usize) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw, step)
    }

    pub fn from_json(raw: &str, step: usize) -> Result<Self> {
        let mut histories: HashMap<String, CandleSeries> = serde_json::from_str(raw)?;
        for (name, series) in histories.iter_mut() {
            series
                .validate()
                .map_err(|e| Error::Config(format!("replay history for '{name}': {e}")))?;
        }
        Ok(Self::new(histories, step))
    }

    /// Candles of `chart` not yet revealed.
    pub async fn remaining(&self, chart: &str) -> usize {
        let total = self.histories.get(chart).map_or(0, CandleSeries::len);
        let revealed = self.cursors.read().await.get(chart).copied().unwrap_or(0);
        total.saturating_sub(revealed)
    }
}

#[async_trait]
impl ChartSync for ReplaySource {
    async fn sync_chart(&self, chart: &mut Chart) -> Result<()> {
        let history = self.histories.get(&chart.name).ok_or_else(|| Error::DataUnavailable {
            reason: format!("no replay history for chart '{}'", chart.name),
        })?;

        let mut cursors = self.cursors.write().await;
        let cursor = cursors.entry(chart.name.clone()).or_insert(0);
        let next = (*cursor + self.step).min(history.len());
        if next == *cursor {
            debug!(chart = %chart.name, "Replay exhausted");
            return Ok(());
        }
        let appended = chart.series.merge(history.slice(*cursor, next));
        debug!(chart = %chart.name, from = *cursor, to = next, appended, "Replay advanced");
        *cursor = next;
        Ok(())
    }
}
