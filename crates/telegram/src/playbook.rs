use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::info;

use common::{Playbook, ResultsBoard, Result, Subscription, TimeframeSnapshot};

use crate::commands::send_alert;

/// Sends a message to the configured chats when a subscription fires.
pub struct TelegramPlaybook {
    bot: Bot,
    chat_ids: Vec<ChatId>,
    board: ResultsBoard,
}

impl TelegramPlaybook {
    pub fn new(token: impl Into<String>, chat_ids: &[i64], board: ResultsBoard) -> Self {
        Self::with_bot(Bot::new(token), chat_ids, board)
    }

    pub fn with_bot(bot: Bot, chat_ids: &[i64], board: ResultsBoard) -> Self {
        Self {
            bot,
            chat_ids: chat_ids.iter().map(|&id| ChatId(id)).collect(),
            board,
        }
    }
}

#[async_trait]
impl Playbook for TelegramPlaybook {
    async fn run(&self, subscription: &Subscription) -> Result<()> {
        let mut snapshots = Vec::with_capacity(subscription.timeframes.len());
        for tf in &subscription.timeframes {
            if let Some(s) = self.board.get(tf).await {
                snapshots.push(s);
            }
        }
        let text = alert_text(subscription, &snapshots);
        let chats = send_alert(&self.bot, &self.chat_ids, &text).await?;
        info!(subscription = %subscription.name, chats, "Telegram alert sent");
        Ok(())
    }
}

fn alert_text(subscription: &Subscription, snapshots: &[TimeframeSnapshot]) -> String {
    let mut text = format!("🔔 {} fired ({} mode)", subscription.name, subscription.match_mode);
    for s in snapshots {
        text.push_str(&format!("\n{}: {} match(es)", s.timeframe, s.match_count));
        for (strategy, count) in s.strategies.iter().filter(|(_, &c)| c > 0) {
            text.push_str(&format!("\n  {strategy}: {count}"));
        }
    }
    text
}
