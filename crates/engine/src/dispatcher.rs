use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{
    Error, MatchMode, PlaybookRegistry, Result, ResultsBoard, SignalState, StateStore,
    Subscription, TimeframeResult,
};

use crate::subscription::Aggregate;

/// Direct callback invoked when a subscription fires.
pub type Callback = Arc<dyn Fn(&Subscription) -> Result<()> + Send + Sync>;

struct Registered {
    subscription: Subscription,
    callback: Option<Callback>,
    /// Run id of the tick that last fired this subscription.
    last_fired: Option<Uuid>,
}

/// Turns result-ready events into subscription callbacks.
///
/// This is the ONLY component that invokes playbooks.
pub struct Dispatcher {
    subscriptions: Vec<Registered>,
    playbooks: PlaybookRegistry,
    store: Arc<dyn StateStore>,
    board: ResultsBoard,
    /// Dedupe snapshots, loaded on first use and saved by [`Dispatcher::flush`].
    states: HashMap<String, SignalState>,
}

impl Dispatcher {
    pub fn new(board: ResultsBoard, store: Arc<dyn StateStore>, playbooks: PlaybookRegistry) -> Self {
        Self {
            subscriptions: Vec::new(),
            playbooks,
            store,
            board,
            states: HashMap::new(),
        }
    }

    /// Register a subscription, optionally with a direct callback. Fails if
    /// it names a playbook that is not registered.
    pub fn register(&mut self, subscription: Subscription, callback: Option<Callback>) -> Result<()> {
        if let Some(name) = &subscription.playbook {
            if !self.playbooks.contains(name) {
                return Err(Error::Config(format!(
                    "subscription '{}' uses unknown playbook '{name}'",
                    subscription.name
                )));
            }
        }
        if self.subscriptions.iter().any(|r| r.subscription.name == subscription.name) {
            return Err(Error::Config(format!(
                "duplicate subscription '{}'",
                subscription.name
            )));
        }
        info!(name = %subscription.name, timeframes = ?subscription.timeframes, mode = %subscription.match_mode, "Registered subscription");
        self.subscriptions.push(Registered {
            subscription,
            callback,
            last_fired: None,
        });
        Ok(())
    }

    /// Evaluate every subscription watching the firing timeframe and invoke
    /// the callbacks of those that match.
    ///
    /// Returns the number of subscriptions fired. If any callback failed,
    /// all subscriptions are still evaluated and the failures are returned
    /// together as [`Error::Callbacks`].
    pub async fn despatch(&mut self, event: &TimeframeResult) -> Result<usize> {
        let Some(fired_snapshot) = self.board.get(&event.timeframe).await else {
            warn!(timeframe = %event.timeframe, "No results published for timeframe");
            return Ok(0);
        };
        if fired_snapshot.run_id != event.run_id {
            debug!(timeframe = %event.timeframe, "Event is older than the published results");
        }

        let mut fired = 0;
        let mut failures = Vec::new();

        for i in 0..self.subscriptions.len() {
            let sub = &self.subscriptions[i].subscription;
            if !sub.timeframes.contains(&event.timeframe) {
                continue;
            }
            let name = sub.name.clone();

            let state = match self.state(&name).await {
                Ok(state) => state,
                Err(e) => {
                    error!(subscription = %name, error = %e, "Failed to load dedupe state");
                    failures.push((name, e.to_string()));
                    continue;
                }
            };
            let new = state
                .unseen(&event.timeframe, &fired_snapshot.signal_times)
                .len();
            state.advance(&event.timeframe, &fired_snapshot.signal_times);

            let sub = &self.subscriptions[i].subscription;
            if sub.match_mode == MatchMode::New && new == 0 {
                debug!(subscription = %name, timeframe = %event.timeframe, "No new signals");
                continue;
            }

            let mut snapshots = Vec::with_capacity(sub.timeframes.len());
            for tf in &sub.timeframes {
                snapshots.push(self.board.get(tf).await);
            }
            let aggregate = Aggregate::collect(snapshots.iter().map(Option::as_ref), new);
            if !aggregate.satisfies(&sub.conditions) {
                debug!(subscription = %name, ?aggregate, "Conditions not met");
                continue;
            }

            if self.subscriptions[i].last_fired == Some(fired_snapshot.run_id) {
                debug!(subscription = %name, "Already fired for this tick");
                continue;
            }
            self.subscriptions[i].last_fired = Some(fired_snapshot.run_id);

            fired += 1;
            info!(
                subscription = %name,
                timeframe = %event.timeframe,
                new = aggregate.new,
                total = aggregate.total,
                "Subscription fired"
            );
            if let Err(e) = self.invoke(i).await {
                error!(subscription = %name, error = %e, "Subscription callback failed");
                failures.push((name, e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(fired)
        } else {
            Err(Error::Callbacks { fired, failures })
        }
    }

    async fn state(&mut self, name: &str) -> Result<&mut SignalState> {
        if !self.states.contains_key(name) {
            let loaded = self.store.load_state(name).await?.unwrap_or_default();
            self.states.insert(name.to_string(), loaded);
        }
        self.states
            .get_mut(name)
            .ok_or_else(|| Error::Other(format!("dedupe state for '{name}' vanished")))
    }

    /// Run the direct callback and the named playbook. Both run even if the
    /// first fails.
    async fn invoke(&self, i: usize) -> Result<()> {
        let registered = &self.subscriptions[i];
        let sub = &registered.subscription;
        let mut reasons = Vec::new();

        if let Some(callback) = &registered.callback {
            if let Err(e) = callback(sub) {
                reasons.push(e.to_string());
            }
        }
        if let Some(name) = &sub.playbook {
            match self.playbooks.get(name) {
                Some(playbook) => {
                    if let Err(e) = playbook.run(sub).await {
                        reasons.push(e.to_string());
                    }
                }
                None => reasons.push(format!("playbook '{name}' is not registered")),
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(Error::Playbook {
                name: sub.playbook.clone().unwrap_or_else(|| sub.name.clone()),
                reason: reasons.join("; "),
            })
        }
    }

    /// Persist every loaded dedupe snapshot. Attempts all of them and returns
    /// the first error.
    pub async fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for (key, state) in &self.states {
            if let Err(e) = self.store.save_state(key, state).await {
                error!(subscription = %key, error = %e, "Failed to save dedupe state");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(states = self.states.len(), "Dedupe state flushed");
                Ok(())
            }
        }
    }

    /// Run the dispatch loop until `shutdown` flips or the result channel
    /// closes, then flush. Call from `tokio::spawn`.
    pub async fn run(
        mut self,
        mut results_rx: broadcast::Receiver<TimeframeResult>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(subscriptions = self.subscriptions.len(), "Dispatcher running");
        loop {
            tokio::select! {
                received = results_rx.recv() => match received {
                    Ok(event) => match self.despatch(&event).await {
                        Ok(0) => {}
                        Ok(n) => debug!(timeframe = %event.timeframe, fired = n, "Despatched"),
                        Err(e) => error!(timeframe = %event.timeframe, error = %e, "Despatch finished with failures"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Dispatcher lagged, dropped result events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Result channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        if let Err(e) = self.flush().await {
            error!(error = %e, "Dedupe state not saved on shutdown");
        }
    }
}
