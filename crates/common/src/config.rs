use std::time::Duration;

use crate::{Error, Result};

/// Where chart data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Binance public klines.
    Live,
    /// Recorded history revealed a few candles per refresh.
    Replay { path: String, step: usize },
}

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Playbook file path
    pub playbook_path: String,

    // Database (dedupe snapshots)
    pub database_url: String,

    // Chart data
    pub data_source: DataSource,

    // Telegram (optional as a pair)
    pub telegram_token: Option<String>,
    pub telegram_chat_ids: Vec<i64>,

    // Dashboard
    pub dashboard_token: String,
    pub dashboard_port: u16,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let data_source = match optional_env("DATA_SOURCE")
            .unwrap_or_else(|| "live".to_string())
            .to_lowercase()
            .as_str()
        {
            "live" => DataSource::Live,
            "replay" => DataSource::Replay {
                path: required_env("REPLAY_PATH"),
                step: optional_env("REPLAY_STEP")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            },
            other => panic!("ERROR: DATA_SOURCE must be 'live' or 'replay', got: '{other}'"),
        };

        let telegram_token = optional_env("TELEGRAM_TOKEN").filter(|t| !t.is_empty());
        let telegram_chat_ids = match &telegram_token {
            Some(_) => required_env("TELEGRAM_CHAT_IDS")
                .split(',')
                .map(|s| {
                    s.trim().parse::<i64>().unwrap_or_else(|_| {
                        panic!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{}'", s.trim())
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        Config {
            playbook_path: optional_env("PLAYBOOK_PATH")
                .unwrap_or_else(|| "config/playbook.toml".to_string()),
            database_url: required_env("DATABASE_URL"),
            data_source,
            telegram_token,
            telegram_chat_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse `250ms`, `30s`, `5m`, `4h`, `1d`, `1w` or a bare millisecond count.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("malformed duration '{s}'")))?;
    let ms = match unit.trim() {
        "" | "ms" => n,
        "s" => n * 1_000,
        "m" => n * 60_000,
        "h" => n * 3_600_000,
        "d" => n * 86_400_000,
        "w" => n * 7 * 86_400_000,
        other => {
            return Err(Error::Config(format!(
                "unknown duration unit '{other}' in '{s}'"
            )))
        }
    };
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("5y").is_err());
        assert!(parse_duration("m").is_err());
    }
}
