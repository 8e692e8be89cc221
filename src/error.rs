//! Engine error types.
//!
//! [`EngineError`] is the central error type for the engine. Each variant
//! carries a stable numeric code so the surrounding transport layer (out
//! of scope here) can map failures to user-facing messages without
//! string-matching.

use crate::domain::ids::{LobbyId, UserId};
use crate::domain::tier::Tier;

/// Engine-wide error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category            |
/// |-----------|---------------------|
/// | 1000–1999 | Validation          |
/// | 2000–2999 | Not Found / State   |
/// | 3000–3999 | Server / Storage    |
/// | 4000–4999 | Gameplay            |
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request validation failed before any mutation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown or malformed tier string.
    #[error("invalid tier: {0}")]
    InvalidTier(String),

    /// Lobby with the given ID was not found.
    #[error("lobby not found: {0}")]
    LobbyNotFound(LobbyId),

    /// The user holds no active seat in the lobby.
    #[error("user {user_id} has no active seat in lobby {lobby_id}")]
    SeatNotFound {
        /// Lobby that was addressed.
        lobby_id: LobbyId,
        /// User without a seat.
        user_id: UserId,
    },

    /// A mutating action was attempted outside the lifecycle state that
    /// permits it.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Wallet balance is too low for the requested debit. The wallet and
    /// ledger are untouched when this is returned.
    #[error("insufficient balance: {requested} {tier} ticket(s) requested, {available} available")]
    InsufficientBalance {
        /// Tier of the requested debit.
        tier: Tier,
        /// Amount that was requested.
        requested: u64,
        /// Balance at the time of the check.
        available: u64,
    },

    /// Every standing lobby for the tier is full and the provisioning
    /// ceiling has been reached. Transient; the caller may retry.
    #[error("all lobbies full for tier {0}")]
    LobbyFull(Tier),

    /// Durable-mirror (PostgreSQL) failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the stable numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidInput(_) => 1001,
            Self::InvalidTier(_) => 1002,
            Self::LobbyNotFound(_) => 2001,
            Self::SeatNotFound { .. } => 2002,
            Self::StateConflict(_) => 2003,
            Self::Internal(_) => 3000,
            Self::Persistence(_) => 3001,
            Self::InsufficientBalance { .. } => 4001,
            Self::LobbyFull(_) => 4002,
        }
    }

    /// Returns `true` for conditions the caller may simply retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LobbyFull(_) | Self::Persistence(_))
    }
}
