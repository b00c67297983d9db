use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pattern '{pattern}' references '{field}', which no candle field or indicator output provides")]
    PatternIncompatible { pattern: String, field: String },

    #[error("Invalid comparison operator: '{0}'")]
    InvalidOperator(String),

    #[error("Analysis '{analysis}' reads '{input}': no result found for provided analysis, ensure it executes before this one")]
    MissingAnalysis { analysis: String, input: String },

    #[error("Strategy '{strategy}' chains back into itself")]
    ChainCycle { strategy: String },

    #[error("Unknown indicator kind: '{0}'")]
    UnknownIndicator(String),

    #[error("Timeframe '{timeframe}' ticked too soon ({remaining:?} remaining)")]
    TooSoon { timeframe: String, remaining: Duration },

    #[error("Timeframe '{timeframe}' already has a tick in flight")]
    TickInFlight { timeframe: String },

    #[error("Data unavailable: {reason}")]
    DataUnavailable { reason: String },

    #[error("Playbook '{name}' failed: {reason}")]
    Playbook { name: String, reason: String },

    #[error("{} of {fired} subscription callbacks failed", failures.len())]
    Callbacks {
        fired: usize,
        failures: Vec<(String, String)>,
    },

    #[error("Strategy '{strategy}' failed: {reason}")]
    StrategyExecution { strategy: String, reason: String },

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Structural errors: the declaration itself is wrong, so no partial
    /// result computed from it is meaningful.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::PatternIncompatible { .. }
                | Error::InvalidOperator(_)
                | Error::MissingAnalysis { .. }
                | Error::ChainCycle { .. }
                | Error::UnknownIndicator(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
