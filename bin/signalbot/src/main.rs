use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{ChartBook, ChartSync, Config, DataSource, PlaybookRegistry, SchedulerCommand};
use engine::{BinanceKlines, Dispatcher, Scheduler, SqliteStateStore, Timeframe};
use replay::ReplaySource;
use strategy::{BuiltinIndicators, PlaybookFile, Registry};
use telegram_ctrl::{start_bot, BotDeps, TelegramPlaybook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(playbook = %cfg.playbook_path, "SignalBot starting");

    // ── Declarations ──────────────────────────────────────────────────────────
    let file = PlaybookFile::load(&cfg.playbook_path)
        .with_context(|| format!("loading {}", cfg.playbook_path))?;
    let registry = Registry::from_config(&file, &BuiltinIndicators)
        .context("validating playbook declarations")?;
    info!(
        charts = registry.charts.len(),
        strategies = registry.strategies.len(),
        timeframes = registry.timeframes.len(),
        subscriptions = registry.subscriptions.len(),
        "Playbook loaded"
    );

    let mut charts = ChartBook::default();
    for chart in registry.charts.iter().cloned() {
        charts.insert(chart);
    }

    // ── Chart data source (injected based on DATA_SOURCE) ─────────────────────
    let sync: Arc<dyn ChartSync> = match &cfg.data_source {
        DataSource::Live => {
            info!("Live data, using Binance klines");
            Arc::new(BinanceKlines::new()?)
        }
        DataSource::Replay { path, step } => {
            info!(%path, step, "Replay data");
            Arc::new(ReplaySource::load(path, *step).with_context(|| format!("loading {path}"))?)
        }
    };

    // ── Database ──────────────────────────────────────────────────────────────
    let store = SqliteStateStore::connect(&cfg.database_url)
        .await
        .context("opening dedupe database")?;
    info!("Database ready");

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let timeframes = registry
        .timeframes
        .iter()
        .cloned()
        .map(Timeframe::from_decl)
        .collect();
    let (scheduler, handle) =
        Scheduler::new(timeframes, charts, sync, Arc::new(BuiltinIndicators));

    // ── Playbooks ─────────────────────────────────────────────────────────────
    let mut playbooks = PlaybookRegistry::new();
    if let Some(token) = &cfg.telegram_token {
        playbooks.register(
            "telegram",
            Arc::new(TelegramPlaybook::new(
                token.clone(),
                &cfg.telegram_chat_ids,
                handle.board().clone(),
            )),
        );
    }

    // ── Dispatcher ────────────────────────────────────────────────────────────
    let mut dispatcher = Dispatcher::new(handle.board().clone(), Arc::new(store), playbooks);
    for subscription in registry.subscriptions.iter().cloned() {
        dispatcher
            .register(subscription, None)
            .context("registering subscriptions")?;
    }

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let results_rx = handle.subscribe_results();
    let scheduler_task = tokio::spawn(scheduler.run());
    let dispatcher_task = tokio::spawn(dispatcher.run(results_rx, shutdown_rx));

    if let Some(token) = cfg.telegram_token.clone() {
        let deps = BotDeps {
            scheduler: handle.clone(),
            allowed_chat_ids: Arc::new(cfg.telegram_chat_ids.clone()),
        };
        tokio::spawn(start_bot(token, deps));
    }

    let api_state = api::AppState {
        scheduler: handle.clone(),
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Dashboard API stopped");
        }
    });

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    handle.send(SchedulerCommand::Shutdown).await;
    let _ = shutdown_tx.send(true);
    scheduler_task.await?;
    dispatcher_task.await?;
    info!("Dedupe state flushed. Exiting.");
    Ok(())
}
