//! History archiver: permanent game records and cold-storage compaction.
//!
//! [`HistoryService::record`] assigns the next `game_number` and builds
//! the denormalized [`GameHistory`] row inside one locked section, so
//! concurrent resolutions serialize and numbers stay gapless. Whenever
//! the hot row count exceeds the configured ceiling, the oldest batch is
//! bundled into a [`GameHistoryArchive`] and removed from hot storage.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::domain::history::{ArchiveInfo, GameHistory, GameHistoryArchive};
use crate::domain::ids::LobbyId;
use crate::domain::lobby::{LobbyStatus, TierLobby};
use crate::domain::round::LobbyRound;
use crate::error::EngineError;
use crate::persistence::postgres::PostgresPersistence;

#[derive(Debug, Default)]
struct HistoryStore {
    /// Hot rows, ordered by ascending `game_number`.
    hot: Vec<GameHistory>,
    /// Compacted batches, ordered by ascending range.
    archives: Vec<GameHistoryArchive>,
}

impl HistoryStore {
    fn next_game_number(&self) -> u64 {
        let hot_max = self.hot.last().map_or(0, |g| g.game_number);
        let archived_max = self.archives.last().map_or(0, |a| a.range_end);
        hot_max.max(archived_max) + 1
    }
}

/// Archiver for resolved lobbies.
#[derive(Debug)]
pub struct HistoryService {
    store: Mutex<HistoryStore>,
    hot_ceiling: usize,
    batch_size: usize,
    persistence: Option<Arc<PostgresPersistence>>,
}

impl HistoryService {
    /// Creates an archiver with the configured ceiling and batch size.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            store: Mutex::new(HistoryStore::default()),
            hot_ceiling: config.history_hot_ceiling,
            batch_size: config.archive_batch_size.max(1),
            persistence: None,
        }
    }

    /// Attaches a PostgreSQL audit mirror.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<PostgresPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Snapshots a resolved lobby into a permanent history record and
    /// returns its game number.
    ///
    /// Number assignment and row creation happen under one lock, so
    /// concurrent resolutions can neither collide nor leave gaps.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if the lobby is not `Resolved`.
    pub async fn record(&self, lobby: &TierLobby, round: &LobbyRound) -> Result<u64, EngineError> {
        if lobby.status != LobbyStatus::Resolved {
            return Err(EngineError::Internal(format!(
                "lobby {} snapshot requested while {:?}",
                lobby.id, lobby.status
            )));
        }

        let (record, compacted) = {
            let mut store = self.store.lock().await;
            let game_number = store.next_game_number();
            let record = GameHistory::from_resolved(game_number, lobby, round);
            store.hot.push(record.clone());
            let compacted = compact(&mut store, self.hot_ceiling, self.batch_size);
            (record, compacted)
        };

        tracing::info!(
            game_number = record.game_number,
            lobby_id = %record.lobby_id,
            tier = %record.tier,
            winning_segment = record.round.winning_segment,
            "game recorded"
        );

        self.mirror_record(&record).await;
        for archive in &compacted {
            tracing::info!(
                range_start = archive.range_start,
                range_end = archive.range_end,
                count = archive.count,
                "history batch archived"
            );
            self.mirror_archive(archive).await;
        }

        Ok(record.game_number)
    }

    /// Returns the most recent hot rows, newest first, bounded by `limit`.
    pub async fn recent(&self, limit: usize) -> Vec<GameHistory> {
        let store = self.store.lock().await;
        store.hot.iter().rev().take(limit).cloned().collect()
    }

    /// Returns the hot record for a lobby, if it has not been archived.
    pub async fn for_lobby(&self, lobby_id: LobbyId) -> Option<GameHistory> {
        let store = self.store.lock().await;
        store.hot.iter().find(|g| g.lobby_id == lobby_id).cloned()
    }

    /// Number of rows currently in hot storage.
    pub async fn hot_count(&self) -> usize {
        self.store.lock().await.hot.len()
    }

    /// Highest game number ever assigned, across hot and archives.
    pub async fn max_game_number(&self) -> u64 {
        self.store.lock().await.next_game_number() - 1
    }

    /// Range metadata of every archive batch, oldest first. Payloads are
    /// write-only cold storage and are not exposed.
    pub async fn list_archives(&self) -> Vec<ArchiveInfo> {
        let store = self.store.lock().await;
        store.archives.iter().map(ArchiveInfo::from).collect()
    }

    async fn mirror_record(&self, record: &GameHistory) {
        if let Some(persistence) = &self.persistence
            && let Err(err) = persistence.save_game_history(record).await
        {
            tracing::warn!(game_number = record.game_number, %err, "history mirror write failed");
        }
    }

    async fn mirror_archive(&self, archive: &GameHistoryArchive) {
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.save_archive_batch(archive).await {
                tracing::warn!(
                    range_start = archive.range_start,
                    %err,
                    "archive mirror write failed"
                );
            }
            if let Err(err) = persistence
                .delete_games_in_range(archive.range_start, archive.range_end)
                .await
            {
                tracing::warn!(
                    range_start = archive.range_start,
                    %err,
                    "hot mirror cleanup failed"
                );
            }
        }
    }
}

/// Bundles the oldest rows into archive batches until the hot count is
/// back under the ceiling. Returns the batches created.
fn compact(
    store: &mut HistoryStore,
    hot_ceiling: usize,
    batch_size: usize,
) -> Vec<GameHistoryArchive> {
    let mut created = Vec::new();
    while store.hot.len() > hot_ceiling {
        let take = batch_size.min(store.hot.len());
        let batch: Vec<GameHistory> = store.hot.drain(..take).collect();
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            break;
        };
        let archive = GameHistoryArchive {
            range_start: first.game_number,
            range_end: last.game_number,
            count: batch.len() as u64,
            payload: serde_json::to_value(&batch).unwrap_or(serde_json::Value::Null),
            archived_at: Utc::now(),
        };
        store.archives.push(archive.clone());
        created.push(archive);
    }
    created
}
