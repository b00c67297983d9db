use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use common::{Result, SignalState, StateStore};

/// Dedupe snapshots in SQLite, one JSON row per subscription.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    db: SqlitePool,
}

impl SqliteStateStore {
    /// Open (creating if needed) the database at `url` and ensure the table.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::new(db).await
    }

    pub async fn new(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signal_state (
                key   TEXT PRIMARY KEY,
                state TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;
        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_state(&self, key: &str) -> Result<Option<SignalState>> {
        let row = sqlx::query("SELECT state FROM signal_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("state")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_state(&self, key: &str, state: &SignalState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO signal_state (key, state)
            VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET state = excluded.state
            "#,
        )
        .bind(key)
        .bind(&json)
        .execute(&self.db)
        .await?;
        debug!(key, "Dedupe state saved");
        Ok(())
    }
}
