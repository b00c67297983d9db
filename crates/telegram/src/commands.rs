use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tracing::{info, warn};

use common::{Error, SchedulerCommand, TimeframeSnapshot};
use engine::SchedulerHandle;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub scheduler: SchedulerHandle,
    /// Chats allowed to control the bot. Alerts go to the same chats.
    pub allowed_chat_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "SignalBot commands:")]
pub enum Command {
    #[command(description = "Show the latest result of every timeframe")]
    Status,
    #[command(description = "Tick a timeframe now: /tick <name>")]
    Tick(String),
    #[command(description = "Start a timeframe's timer: /activate <name>")]
    Activate(String),
    #[command(description = "Stop a timeframe's timer: /deactivate <name>")]
    Deactivate(String),
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Tick(name)].endpoint(handle_tick))
        .branch(case![Command::Activate(name)].endpoint(handle_activate))
        .branch(case![Command::Deactivate(name)].endpoint(handle_deactivate));

    Update::filter_message()
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from chats not in the allowed list.
async fn auth_filter(msg: Message, deps: Arc<BotDeps>) -> bool {
    let chat_id = msg.chat.id.0;
    let allowed = deps.allowed_chat_ids.contains(&chat_id);
    if !allowed {
        warn!(chat_id, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let snapshots = deps.scheduler.board().all().await;
    let text = format_status(deps.scheduler.timeframes(), &snapshots);
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_tick(bot: Bot, msg: Message, name: String, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = command_for(&deps, name, SchedulerCommand::Tick, "Tick requested for")
        .await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_activate(bot: Bot, msg: Message, name: String, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = command_for(&deps, name, SchedulerCommand::Activate, "Activated").await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_deactivate(bot: Bot, msg: Message, name: String, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = command_for(&deps, name, SchedulerCommand::Deactivate, "Deactivated").await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Send `make(name)` to the scheduler if `name` is a declared timeframe.
async fn command_for(
    deps: &BotDeps,
    name: String,
    make: fn(String) -> SchedulerCommand,
    done: &str,
) -> String {
    let name = name.trim().to_string();
    if !deps.scheduler.timeframes().iter().any(|t| *t == name) {
        return format!(
            "Unknown timeframe '{name}'. Known: {}",
            deps.scheduler.timeframes().join(", ")
        );
    }
    deps.scheduler.send(make(name.clone())).await;
    format!("{done} {name}.")
}

/// One line per declared timeframe, in declaration order.
pub fn format_status(timeframes: &[String], snapshots: &[TimeframeSnapshot]) -> String {
    let mut text = String::from("SignalBot Status");
    for name in timeframes {
        match snapshots.iter().find(|s| &s.timeframe == name) {
            Some(s) => {
                text.push_str(&format!(
                    "\n{name}: {} match(es) at {}",
                    s.match_count,
                    s.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                if !s.failed.is_empty() {
                    text.push_str(&format!(" (failed: {})", s.failed.join(", ")));
                }
            }
            None => text.push_str(&format!("\n{name}: not ticked yet")),
        }
    }
    text
}

/// Send a proactive alert to all configured chat IDs.
///
/// Every chat is attempted. Returns the number of chats reached, or a
/// playbook error naming each chat that could not be reached.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) -> common::Result<usize> {
    let mut failures = Vec::new();
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
            failures.push(format!("chat {}: {e}", chat_id.0));
        }
    }
    if failures.is_empty() {
        Ok(chat_ids.len())
    } else {
        Err(Error::Playbook {
            name: "telegram".into(),
            reason: failures.join("; "),
        })
    }
}
