pub mod commands;
pub mod playbook;

pub use commands::{start_bot, BotDeps};
pub use playbook::TelegramPlaybook;
