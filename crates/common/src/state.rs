use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;

/// Previously seen signal timestamps, per timeframe.
///
/// `timeframe[i]` lists the timestamps seen for `timeframe_index[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalState {
    pub timeframe_index: Vec<String>,
    pub timeframe: Vec<Vec<i64>>,
}

impl SignalState {
    pub fn seen(&self, timeframe: &str) -> &[i64] {
        self.timeframe_index
            .iter()
            .position(|t| t == timeframe)
            .and_then(|i| self.timeframe.get(i))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn record(&mut self, timeframe: &str, times: Vec<i64>) {
        match self.timeframe_index.iter().position(|t| t == timeframe) {
            Some(i) if i < self.timeframe.len() => self.timeframe[i] = times,
            _ => {
                self.timeframe_index.push(timeframe.to_string());
                self.timeframe.push(times);
            }
        }
    }

    /// Merge `current` into what has been seen for `timeframe`. Timestamps
    /// older than the oldest current one can no longer reappear and are
    /// dropped.
    pub fn advance(&mut self, timeframe: &str, current: &[i64]) {
        let Some(&oldest) = current.iter().min() else {
            return;
        };
        let mut merged: Vec<i64> = self
            .seen(timeframe)
            .iter()
            .chain(current)
            .copied()
            .filter(|&t| t >= oldest)
            .collect();
        merged.sort_unstable();
        merged.dedup();
        self.record(timeframe, merged);
    }

    /// Timestamps in `current` that this state has not seen for `timeframe`.
    pub fn unseen(&self, timeframe: &str, current: &[i64]) -> Vec<i64> {
        let seen: HashSet<i64> = self.seen(timeframe).iter().copied().collect();
        current.iter().copied().filter(|t| !seen.contains(t)).collect()
    }
}

/// Persistence for dedupe snapshots, keyed by subscription name.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self, key: &str) -> Result<Option<SignalState>>;

    async fn save_state(&self, key: &str, state: &SignalState) -> Result<()>;
}

/// Process-local store. Snapshots do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<String, SignalState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self, key: &str) -> Result<Option<SignalState>> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn save_state(&self, key: &str, state: &SignalState) -> Result<()> {
        self.states.write().await.insert(key.to_string(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_counts_only_new_timestamps() {
        let mut state = SignalState::default();
        state.record("15m", vec![1, 2]);
        assert_eq!(state.unseen("15m", &[1, 2, 3]), vec![3]);
        assert_eq!(state.unseen("1h", &[1, 2]), vec![1, 2]);

        state.record("15m", vec![1, 2, 3]);
        assert!(state.unseen("15m", &[1, 2, 3]).is_empty());
        assert_eq!(state.timeframe_index.len(), 1);
    }

    #[test]
    fn advance_keeps_signals_that_may_reappear() {
        let mut state = SignalState::default();
        state.advance("1h", &[10, 20, 30]);
        // A tick that lost its matches changes nothing.
        state.advance("1h", &[]);
        assert_eq!(state.seen("1h"), &[10, 20, 30]);

        state.advance("1h", &[20, 40]);
        assert_eq!(state.seen("1h"), &[20, 30, 40]);
        assert_eq!(state.unseen("1h", &[30, 40, 50]), vec![50]);
    }

    #[test]
    fn serialises_in_camel_case() {
        let mut state = SignalState::default();
        state.record("1h", vec![42]);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"timeframeIndex":["1h"],"timeframe":[[42]]}"#);
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStateStore::new();
        assert!(store.load_state("sub").await.unwrap().is_none());
        let mut state = SignalState::default();
        state.record("1h", vec![7]);
        store.save_state("sub", &state).await.unwrap();
        assert_eq!(store.load_state("sub").await.unwrap(), Some(state));
    }
}
