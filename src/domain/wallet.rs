//! Ticket wallets and the append-only ledger.
//!
//! A [`Wallet`] holds one non-negative ticket balance per [`Tier`]. Every
//! mutation appends exactly one [`LedgerEntry`] with a signed amount, so
//! the sum of entries for a `(user, tier)` pair always equals the stored
//! balance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EntryId, UserId};
use super::tier::Tier;

/// Why a ledger entry was written.
///
/// Known reasons are typed; anything reason-specific beyond that goes
/// into the entry's open `meta` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    /// Entry fee debit for joining a lobby.
    LobbyEntry,
    /// Compensating credit after a failed seat insertion or a cancelled
    /// lobby.
    LobbyRefund,
    /// Reward grant from the out-of-scope reward feature.
    Reward,
    /// Credit from the out-of-scope ad-watch feature.
    AdBonus,
    /// Credit from the out-of-scope free-game feature.
    FreeGame,
    /// Manual adjustment by an operator.
    Admin,
}

impl LedgerReason {
    /// Stable string form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LobbyEntry => "lobby_entry",
            Self::LobbyRefund => "lobby_refund",
            Self::Reward => "reward",
            Self::AdBonus => "ad_bonus",
            Self::FreeGame => "free_game",
            Self::Admin => "admin",
        }
    }
}

/// One signed, reasoned, timestamped wallet mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry identifier; referenced by lobby seats and refunds.
    pub id: EntryId,
    /// Wallet owner.
    pub user_id: UserId,
    /// Tier whose balance changed.
    pub tier: Tier,
    /// Signed ticket delta. Positive for credits, negative for debits.
    pub amount: i64,
    /// Typed mutation reason.
    pub reason: LedgerReason,
    /// Open key-value extension map (e.g. the lobby id a debit paid for).
    pub meta: serde_json::Map<String, serde_json::Value>,
    /// Server-side creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A user's per-tier ticket balances.
///
/// Created lazily on first access. Tiers added to the game after a wallet
/// was stored are backfilled to 0 on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet owner.
    pub user_id: UserId,
    /// Non-negative ticket count per tier.
    pub balances: HashMap<Tier, u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last balance mutation.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates an empty wallet with every tier at 0.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        let mut wallet = Self {
            user_id,
            balances: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        wallet.backfill_tiers();
        wallet
    }

    /// Ensures every known tier has a balance entry, defaulting to 0.
    ///
    /// Migration safety: wallets stored before a tier existed gain it on
    /// first read.
    pub fn backfill_tiers(&mut self) {
        for tier in Tier::ALL {
            self.balances.entry(tier).or_insert(0);
        }
    }

    /// Returns the balance for the given tier.
    #[must_use]
    pub fn balance(&self, tier: Tier) -> u64 {
        self.balances.get(&tier).copied().unwrap_or(0)
    }

    /// Returns the total ticket count across all tiers.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.balances.values().sum()
    }
}
