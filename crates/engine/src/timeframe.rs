//! One scheduled execution unit: a set of strategies run together on an
//! interval, with their results aggregated per tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLockReadGuard;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::{
    Chart, ChartBook, ChartSync, Error, IndicatorProvider, Result, StrategyRun, TimeframeResult,
    TimeframeSnapshot,
};
use strategy::{ChartView, ExecutionContext, RunWindow, Strategy, TimeframeDecl};

/// Collaborators a tick needs.
pub struct TickContext<'a> {
    pub charts: &'a ChartBook,
    pub sync: &'a dyn ChartSync,
    pub indicators: &'a dyn IndicatorProvider,
}

/// What a completed tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Present when at least one strategy matched.
    pub event: Option<TimeframeResult>,
    pub snapshot: TimeframeSnapshot,
}

/// Clears the in-flight flag when a tick ends, including when its future is
/// dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct Timeframe {
    pub name: String,
    pub interval: Duration,
    pub window: Duration,
    pub strategies: Vec<Arc<Strategy>>,
    /// Timer armed.
    pub active: bool,
    pub keepalive: bool,
    pub backtest: bool,
    results: Vec<StrategyRun>,
    result_index: HashMap<String, usize>,
    last_start: Option<Instant>,
    in_flight: Arc<AtomicBool>,
}

impl Timeframe {
    pub fn from_decl(decl: TimeframeDecl) -> Self {
        Self {
            name: decl.name,
            interval: decl.interval,
            window: decl.window,
            strategies: decl.strategies,
            active: decl.active,
            keepalive: decl.keepalive,
            backtest: decl.backtest,
            results: Vec::new(),
            result_index: HashMap::new(),
            last_start: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Results of the latest tick, one entry per strategy that ran (chained
    /// strategies included), in order of first appearance.
    pub fn results(&self) -> &[StrategyRun] {
        &self.results
    }

    pub fn result_for(&self, strategy: &str) -> Option<&StrategyRun> {
        self.result_index.get(strategy).map(|&i| &self.results[i])
    }

    pub fn is_ticking(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// When the latest tick started.
    pub fn last_start(&self) -> Option<Instant> {
        self.last_start
    }

    /// Time left before the next tick is allowed.
    pub fn remaining(&self) -> Option<Duration> {
        let last = self.last_start?;
        let elapsed = last.elapsed();
        (elapsed < self.interval).then(|| self.interval - elapsed)
    }

    fn run_window(&self) -> RunWindow {
        if self.backtest {
            RunWindow::Backtest
        } else {
            RunWindow::Recent(self.window)
        }
    }

    /// Run every strategy once.
    ///
    /// Fails with [`Error::TooSoon`] if the previous tick started less than
    /// `interval` ago and with [`Error::TickInFlight`] while another tick is
    /// running. A failing strategy is logged and recorded in the snapshot;
    /// its siblings still run.
    pub async fn tick(&mut self, ctx: &TickContext<'_>) -> Result<TickOutcome> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::TickInFlight {
                timeframe: self.name.clone(),
            });
        }
        let _guard = InFlight(self.in_flight.clone());

        if let Some(remaining) = self.remaining() {
            return Err(Error::TooSoon {
                timeframe: self.name.clone(),
                remaining,
            });
        }

        self.last_start = Some(Instant::now());
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.results.clear();
        self.result_index.clear();
        let mut failed = Vec::new();

        debug!(timeframe = %self.name, %run_id, strategies = self.strategies.len(), "Tick started");

        let strategies = self.strategies.clone();
        for strategy in &strategies {
            match self.run_strategy(strategy, ctx).await {
                Ok(runs) => runs.into_iter().for_each(|run| self.record(run)),
                Err(e) => {
                    error!(timeframe = %self.name, strategy = %strategy.name, error = %e, "Strategy failed");
                    failed.push(strategy.name.clone());
                }
            }
        }

        let finished_at = Utc::now();
        let snapshot = self.snapshot(run_id, started_at, finished_at, failed);
        let event = (snapshot.match_count > 0).then(|| TimeframeResult {
            timeframe: self.name.clone(),
            run_id,
            finished_at,
        });

        info!(
            timeframe = %self.name,
            %run_id,
            matches = snapshot.match_count,
            failed = snapshot.failed.len(),
            "Tick finished"
        );
        Ok(TickOutcome { event, snapshot })
    }

    async fn run_strategy(
        &self,
        strategy: &Strategy,
        ctx: &TickContext<'_>,
    ) -> Result<Vec<StrategyRun>> {
        let names = strategy.charts();

        for name in &names {
            let shared = ctx.charts.get(name)?;
            let mut chart = shared.write().await;
            if !chart.is_stale(Utc::now()) {
                continue;
            }
            match ctx.sync.sync_chart(&mut chart).await {
                Ok(()) => {
                    chart.last_sync = Some(Utc::now());
                    debug!(chart = %name, candles = chart.series.len(), "Chart refreshed");
                }
                Err(e) => {
                    warn!(timeframe = %self.name, chart = %name, error = %e, "Chart refresh failed, using cached candles");
                }
            }
        }

        let mut guards: Vec<RwLockReadGuard<'_, Chart>> = Vec::with_capacity(names.len());
        for name in &names {
            guards.push(ctx.charts.get(name)?.read().await);
        }
        let mut view = ChartView::new();
        for guard in &guards {
            view.insert(guard);
        }

        let exec = ExecutionContext {
            charts: &view,
            indicators: ctx.indicators,
            window: self.run_window(),
        };
        strategy.execute(&exec).map_err(|e| Error::StrategyExecution {
            strategy: strategy.name.clone(),
            reason: e.to_string(),
        })
    }

    fn record(&mut self, run: StrategyRun) {
        match self.result_index.get(&run.strategy) {
            Some(&i) => self.results[i].absorb(run),
            None => {
                self.result_index.insert(run.strategy.clone(), self.results.len());
                self.results.push(run);
            }
        }
    }

    fn snapshot(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        finished_at: chrono::DateTime<Utc>,
        failed: Vec<String>,
    ) -> TimeframeSnapshot {
        let strategies: BTreeMap<String, usize> = self
            .results
            .iter()
            .map(|r| (r.strategy.clone(), r.match_count()))
            .collect();
        let mut signal_times: Vec<i64> = self
            .results
            .iter()
            .flat_map(StrategyRun::matches)
            .filter_map(|m| m.time)
            .collect();
        signal_times.sort_unstable();
        signal_times.dedup();

        TimeframeSnapshot {
            timeframe: self.name.clone(),
            run_id,
            started_at,
            finished_at,
            match_count: strategies.values().sum(),
            strategies,
            signal_times,
            failed,
        }
    }
}
