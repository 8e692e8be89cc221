//! Permanent game history and cold-storage archive records.
//!
//! A [`GameHistory`] row is a denormalized, immutable snapshot of a
//! resolved lobby, numbered with a strictly increasing `game_number`.
//! When the hot table outgrows its ceiling, the oldest rows are bundled
//! into a [`GameHistoryArchive`] batch and removed from hot storage, so
//! hot reads stay bounded regardless of total games played.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntryId, LobbyId, UserId};
use super::lobby::TierLobby;
use super::round::LobbyRound;
use super::tier::Tier;

/// One player's row in a history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameHistoryPlayer {
    /// Seat owner at resolution time.
    pub user_id: UserId,
    /// Locked lucky number.
    pub lucky_number: u8,
    /// Ledger entry of the entry-fee debit.
    pub debit_entry_id: EntryId,
    /// `true` if `lucky_number` equals the round's winning number.
    pub is_winner: bool,
}

/// Permanent denormalized record of one resolved lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameHistory {
    /// Monotonically increasing, gapless game number across hot and
    /// archived storage.
    pub game_number: u64,
    /// The resolved lobby.
    pub lobby_id: LobbyId,
    /// Lobby tier.
    pub tier: Tier,
    /// Full round copy, including the audit seed.
    pub round: LobbyRound,
    /// All active players at resolution time.
    pub players: Vec<GameHistoryPlayer>,
    /// Resolution timestamp.
    pub resolved_at: DateTime<Utc>,
}

impl GameHistory {
    /// Builds a history record from a resolved lobby.
    ///
    /// Copies every round, lobby, and player field at resolution time;
    /// the lobby rows can be dropped afterwards without losing anything.
    #[must_use]
    pub fn from_resolved(game_number: u64, lobby: &TierLobby, round: &LobbyRound) -> Self {
        let players = lobby
            .active_players()
            .map(|p| GameHistoryPlayer {
                user_id: p.user_id,
                lucky_number: p.lucky_number,
                debit_entry_id: p.debit_entry_id,
                is_winner: p.lucky_number == round.winning_number,
            })
            .collect();

        Self {
            game_number,
            lobby_id: lobby.id,
            tier: lobby.tier,
            round: round.clone(),
            players,
            resolved_at: round.resolved_at.unwrap_or_else(Utc::now),
        }
    }
}

/// A compacted batch of old history rows.
///
/// Created only by compaction, never mutated afterwards. The payload is
/// the serialized batch (rows with their players); it has no read-back
/// API and exists as permanent audit cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameHistoryArchive {
    /// Lowest game number in the batch.
    pub range_start: u64,
    /// Highest game number in the batch.
    pub range_end: u64,
    /// Number of rows in the batch.
    pub count: u64,
    /// Serialized batch payload.
    pub payload: serde_json::Value,
    /// Compaction timestamp.
    pub archived_at: DateTime<Utc>,
}

/// Range metadata of an archive batch, exposed without the payload.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    /// Lowest game number in the batch.
    pub range_start: u64,
    /// Highest game number in the batch.
    pub range_end: u64,
    /// Number of rows in the batch.
    pub count: u64,
    /// Compaction timestamp.
    pub archived_at: DateTime<Utc>,
}

impl From<&GameHistoryArchive> for ArchiveInfo {
    fn from(archive: &GameHistoryArchive) -> Self {
        Self {
            range_start: archive.range_start,
            range_end: archive.range_end,
            count: archive.count,
            archived_at: archive.archived_at,
        }
    }
}
