//! PostgreSQL implementation of the audit mirror.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::EngineConfig;
use crate::domain::history::{GameHistory, GameHistoryArchive};
use crate::domain::wallet::LedgerEntry;
use crate::error::EngineError;

/// PostgreSQL-backed audit mirror using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a mirror over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool from the configured database URL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if the pool cannot be
    /// established.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Creates the mirror tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), EngineError> {
        for ddl in [
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id BIGSERIAL PRIMARY KEY,
                entry_id UUID NOT NULL UNIQUE,
                user_id UUID NOT NULL,
                tier TEXT NOT NULL,
                amount BIGINT NOT NULL,
                reason TEXT NOT NULL,
                meta JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_ledger_entries_user
                ON ledger_entries (user_id, created_at)",
            "CREATE TABLE IF NOT EXISTS game_history (
                id BIGSERIAL PRIMARY KEY,
                game_number BIGINT NOT NULL UNIQUE,
                lobby_id UUID NOT NULL,
                tier TEXT NOT NULL,
                record JSONB NOT NULL,
                resolved_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS game_history_archives (
                id BIGSERIAL PRIMARY KEY,
                range_start BIGINT NOT NULL,
                range_end BIGINT NOT NULL,
                game_count BIGINT NOT NULL,
                payload JSONB NOT NULL,
                archived_at TIMESTAMPTZ NOT NULL
            )",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    /// Appends one wallet mutation to the durable ledger log.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<i64, EngineError> {
        let meta = serde_json::Value::Object(entry.meta.clone());
        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO ledger_entries (entry_id, user_id, tier, amount, reason, meta, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.user_id.as_uuid())
        .bind(entry.tier.as_str())
        .bind(entry.amount)
        .bind(entry.reason.as_str())
        .bind(meta)
        .bind(entry.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(row)
    }

    /// Saves a resolved game as a full JSON record keyed by game number.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn save_game_history(&self, record: &GameHistory) -> Result<i64, EngineError> {
        let game_number = i64::try_from(record.game_number)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let payload = serde_json::to_value(record)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO game_history (game_number, lobby_id, tier, record, resolved_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(game_number)
        .bind(*record.lobby_id.as_uuid())
        .bind(record.tier.as_str())
        .bind(payload)
        .bind(record.resolved_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(row)
    }

    /// Saves one compacted archive batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn save_archive_batch(
        &self,
        archive: &GameHistoryArchive,
    ) -> Result<i64, EngineError> {
        let range_start = i64::try_from(archive.range_start)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let range_end = i64::try_from(archive.range_end)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let count = i64::try_from(archive.count)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO game_history_archives (range_start, range_end, game_count, payload, archived_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(range_start)
        .bind(range_end)
        .bind(count)
        .bind(&archive.payload)
        .bind(archive.archived_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(row)
    }

    /// Deletes hot game rows that were compacted into an archive batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn delete_games_in_range(
        &self,
        range_start: u64,
        range_end: u64,
    ) -> Result<u64, EngineError> {
        let start = i64::try_from(range_start)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        let end = i64::try_from(range_end)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        let result = sqlx::query("DELETE FROM game_history WHERE game_number BETWEEN $1 AND $2")
            .bind(start)
            .bind(end)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
