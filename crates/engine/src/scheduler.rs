use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use common::{
    ChartBook, ChartSync, Error, IndicatorProvider, ResultsBoard, SchedulerCommand, TimeframeResult,
};

use crate::timeframe::{TickContext, Timeframe};

/// Cloneable handle passed to other crates (Telegram, API, dispatcher).
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    results_tx: broadcast::Sender<TimeframeResult>,
    board: ResultsBoard,
    timeframes: Arc<[String]>,
}

impl SchedulerHandle {
    pub async fn send(&self, cmd: SchedulerCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!("Scheduler is gone, command dropped");
        }
    }

    /// Subscribe to result-ready events.
    pub fn subscribe_results(&self) -> broadcast::Receiver<TimeframeResult> {
        self.results_tx.subscribe()
    }

    pub fn board(&self) -> &ResultsBoard {
        &self.board
    }

    /// Declared timeframe names, in declaration order.
    pub fn timeframes(&self) -> &[String] {
        &self.timeframes
    }
}

/// Drives every timeframe from one task, so ticks never overlap.
pub struct Scheduler {
    timeframes: Vec<Timeframe>,
    /// Next timer-driven tick per timeframe; `None` when disarmed.
    due: Vec<Option<Instant>>,
    charts: ChartBook,
    sync: Arc<dyn ChartSync>,
    indicators: Arc<dyn IndicatorProvider>,
    board: ResultsBoard,
    results_tx: broadcast::Sender<TimeframeResult>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    pub fn new(
        timeframes: Vec<Timeframe>,
        charts: ChartBook,
        sync: Arc<dyn ChartSync>,
        indicators: Arc<dyn IndicatorProvider>,
    ) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (results_tx, _) = broadcast::channel(256);
        let board = ResultsBoard::new();

        let handle = SchedulerHandle {
            command_tx,
            results_tx: results_tx.clone(),
            board: board.clone(),
            timeframes: timeframes.iter().map(|t| t.name.clone()).collect(),
        };

        let now = Instant::now();
        let due = timeframes
            .iter()
            .map(|t| {
                if t.keepalive {
                    Some(now)
                } else if t.active {
                    Some(now + t.interval)
                } else {
                    None
                }
            })
            .collect();

        let scheduler = Scheduler {
            timeframes,
            due,
            charts,
            sync,
            indicators,
            board,
            results_tx,
            command_rx,
        };

        (scheduler, handle)
    }

    /// Run until `Shutdown` arrives or every handle is dropped.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(timeframes = self.timeframes.len(), "Scheduler running");

        loop {
            let wake = self.due.iter().flatten().min().copied();
            tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::Activate(name)) => {
                        if let Some(i) = self.find(&name) {
                            if !self.timeframes[i].active {
                                self.timeframes[i].active = true;
                                self.due[i] = Some(Instant::now() + self.timeframes[i].interval);
                                info!(timeframe = %name, "Timeframe activated");
                            }
                        }
                    }
                    Some(SchedulerCommand::Deactivate(name)) => {
                        if let Some(i) = self.find(&name) {
                            self.timeframes[i].active = false;
                            self.due[i] = None;
                            info!(timeframe = %name, "Timeframe deactivated");
                        }
                    }
                    Some(SchedulerCommand::Tick(name)) => {
                        if let Some(i) = self.find(&name) {
                            self.tick(i).await;
                        }
                    }
                    Some(SchedulerCommand::Shutdown) => {
                        info!("Scheduler shutting down");
                        break;
                    }
                    None => {
                        warn!("Scheduler command channel closed, shutting down");
                        break;
                    }
                },
                _ = sleep_or_park(wake) => {
                    let now = Instant::now();
                    for i in 0..self.timeframes.len() {
                        if self.due[i].is_some_and(|at| at <= now) {
                            self.tick(i).await;
                            self.due[i] = self.next_due(i);
                        }
                    }
                }
            }
        }
    }

    /// One interval after the timeframe's latest tick started, so a tick
    /// delayed by a sibling still repeats on its own cadence.
    fn next_due(&self, i: usize) -> Option<Instant> {
        let tf = &self.timeframes[i];
        let from = tf.last_start().unwrap_or_else(Instant::now);
        tf.active.then(|| from + tf.interval)
    }

    fn find(&self, name: &str) -> Option<usize> {
        let found = self.timeframes.iter().position(|t| t.name == name);
        if found.is_none() {
            warn!(timeframe = %name, "Unknown timeframe");
        }
        found
    }

    async fn tick(&mut self, i: usize) {
        let ctx = TickContext {
            charts: &self.charts,
            sync: self.sync.as_ref(),
            indicators: self.indicators.as_ref(),
        };
        let timeframe = &mut self.timeframes[i];
        match timeframe.tick(&ctx).await {
            Ok(outcome) => {
                self.board.publish(outcome.snapshot).await;
                if let Some(event) = outcome.event {
                    if self.results_tx.send(event).is_err() {
                        debug!("No result subscribers");
                    }
                }
            }
            Err(e @ Error::TooSoon { .. }) => warn!(error = %e, "Tick skipped"),
            Err(e @ Error::TickInFlight { .. }) => warn!(error = %e, "Tick skipped"),
            Err(e) => error!(timeframe = %self.timeframes[i].name, error = %e, "Tick failed"),
        }
    }
}

async fn sleep_or_park(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{Candle, CandleSeries, Chart, Condition, RawOperand, Result};
    use strategy::{Action, BuiltinIndicators, Scenario, Strategy, TimeframeDecl};

    use super::*;

    struct NoSync;

    #[async_trait]
    impl ChartSync for NoSync {
        async fn sync_chart(&self, _chart: &mut Chart) -> Result<()> {
            Ok(())
        }
    }

    /// Sleeps while refreshing the chart named `slow`.
    struct SlowSync;

    #[async_trait]
    impl ChartSync for SlowSync {
        async fn sync_chart(&self, chart: &mut Chart) -> Result<()> {
            if chart.name == "slow" {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(())
        }
    }

    fn minute_chart(name: &str) -> Chart {
        let series = CandleSeries::from_candles((0..5).map(|i| Candle {
            open_time: i * 60_000,
            close_time: i * 60_000 + 59_999,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: i as f64,
            volume: 1.0,
            trade_count: None,
            vwap: None,
        }));
        Chart::new(name, "BTCUSDT", Duration::from_secs(60)).with_series(series)
    }

    fn timeframe(name: &str, chart: &str, interval: Duration, active: bool, keepalive: bool) -> Timeframe {
        let strategy = Arc::new(Strategy {
            name: format!("{name}-up"),
            chart: chart.into(),
            analyses: vec![],
            actions: vec![Action {
                scenario: Scenario::new(
                    "above-2",
                    vec![vec![Condition::parse("close", ">", &RawOperand::Number(2.0)).unwrap()]],
                )
                .unwrap(),
                chain: None,
            }],
        });
        Timeframe::from_decl(TimeframeDecl {
            name: name.into(),
            interval,
            window: Duration::from_secs(600),
            strategies: vec![strategy],
            active,
            keepalive,
            backtest: false,
        })
    }

    fn scheduler(active: bool, keepalive: bool) -> (Scheduler, SchedulerHandle) {
        let mut charts = ChartBook::default();
        charts.insert(minute_chart("btc"));
        let tf = timeframe("minute", "btc", Duration::from_secs(60), active, keepalive);
        Scheduler::new(vec![tf], charts, Arc::new(NoSync), Arc::new(BuiltinIndicators))
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_ticks_immediately_then_on_interval() {
        let (scheduler, handle) = scheduler(true, true);
        let mut results = handle.subscribe_results();
        let task = tokio::spawn(scheduler.run());

        let first = results.recv().await.unwrap();
        let second = results.recv().await.unwrap();
        assert_eq!(first.timeframe, "minute");
        assert_ne!(first.run_id, second.run_id);

        let snapshot = handle.board().get("minute").await.unwrap();
        assert_eq!(snapshot.run_id, second.run_id);
        assert_eq!(snapshot.match_count, 2);

        handle.send(SchedulerCommand::Shutdown).await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_timeframes_only_tick_on_command() {
        let (scheduler, handle) = scheduler(false, false);
        let mut results = handle.subscribe_results();
        let task = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(results.try_recv().is_err());
        assert!(handle.board().get("minute").await.is_none());

        handle.send(SchedulerCommand::Tick("minute".into())).await;
        let event = results.recv().await.unwrap();
        assert_eq!(event.timeframe, "minute");

        // A second manual tick inside the interval is refused.
        handle.send(SchedulerCommand::Tick("minute".into())).await;
        handle.send(SchedulerCommand::Activate("minute".into())).await;
        let next = results.recv().await.unwrap();
        assert_ne!(next.run_id, event.run_id);

        handle.send(SchedulerCommand::Deactivate("minute".into())).await;
        handle.send(SchedulerCommand::Shutdown).await;
        task.await.unwrap();
        assert_eq!(handle.timeframes(), &["minute".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_tick_keeps_its_own_cadence() {
        let mut charts = ChartBook::default();
        charts.insert(minute_chart("slow"));
        charts.insert(minute_chart("btc"));
        let timeframes = vec![
            timeframe("daily", "slow", Duration::from_secs(100_000), true, true),
            timeframe("minute", "btc", Duration::from_secs(60), true, true),
        ];
        let (scheduler, handle) =
            Scheduler::new(timeframes, charts, Arc::new(SlowSync), Arc::new(BuiltinIndicators));
        let mut results = handle.subscribe_results();
        let task = tokio::spawn(scheduler.run());

        // "minute" first runs at 10s, behind the slow refresh, then at 70s and 130s.
        tokio::time::sleep(Duration::from_secs(135)).await;
        handle.send(SchedulerCommand::Shutdown).await;
        task.await.unwrap();

        let mut minute_ticks = 0;
        while let Ok(event) = results.try_recv() {
            if event.timeframe == "minute" {
                minute_ticks += 1;
            }
        }
        assert_eq!(minute_ticks, 3);
    }
}
