//! Ticket tiers and their gameplay settings.
//!
//! A [`Tier`] is one of eight ordered ticket rarities. Each tier owns an
//! independent pool of lobbies and a fixed [`TierSettings`] table that
//! drives matchmaking capacity, countdown lengths, and spin physics.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One of eight ordered ticket rarities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Lowest rarity, widest lobbies.
    Bronze,
    /// Second rarity.
    Silver,
    /// Third rarity.
    Gold,
    /// Fourth rarity.
    Platinum,
    /// Fifth rarity.
    Emerald,
    /// Sixth rarity.
    Sapphire,
    /// Seventh rarity.
    Ruby,
    /// Highest rarity, smallest lobbies.
    Diamond,
}

/// Per-tier gameplay configuration.
///
/// Static table compiled into the binary; global engine knobs live in
/// [`crate::config::EngineConfig`] instead.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierSettings {
    /// Active players required before the countdown starts.
    pub min_players: u32,
    /// Hard seat capacity per lobby.
    pub max_players: u32,
    /// Normal countdown length once `min_players` is reached.
    pub countdown_secs: u32,
    /// Shortened countdown used when the lobby is exactly full.
    pub full_countdown_secs: u32,
    /// Tier-constant component of the spin force.
    pub spin_force_base: u32,
    /// Wheel animation duration in milliseconds.
    pub spin_duration_ms: u64,
    /// A `Waiting` lobby older than this is cancelled and refunded.
    pub wait_timeout_ms: u64,
    /// Number of concurrently `Waiting` lobbies to keep provisioned.
    pub standing_lobbies: usize,
}

impl Tier {
    /// All tiers in ascending rarity order.
    pub const ALL: [Self; 8] = [
        Self::Bronze,
        Self::Silver,
        Self::Gold,
        Self::Platinum,
        Self::Emerald,
        Self::Sapphire,
        Self::Ruby,
        Self::Diamond,
    ];

    /// Returns the gameplay settings for this tier.
    #[must_use]
    pub const fn settings(self) -> TierSettings {
        match self {
            Self::Bronze => TierSettings {
                min_players: 3,
                max_players: 20,
                countdown_secs: 15,
                full_countdown_secs: 3,
                spin_force_base: 40,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 600_000,
                standing_lobbies: 2,
            },
            Self::Silver => TierSettings {
                min_players: 3,
                max_players: 16,
                countdown_secs: 15,
                full_countdown_secs: 3,
                spin_force_base: 45,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 600_000,
                standing_lobbies: 2,
            },
            Self::Gold => TierSettings {
                min_players: 3,
                max_players: 12,
                countdown_secs: 15,
                full_countdown_secs: 3,
                spin_force_base: 50,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 900_000,
                standing_lobbies: 2,
            },
            Self::Platinum => TierSettings {
                min_players: 3,
                max_players: 10,
                countdown_secs: 20,
                full_countdown_secs: 3,
                spin_force_base: 55,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 900_000,
                standing_lobbies: 2,
            },
            Self::Emerald => TierSettings {
                min_players: 2,
                max_players: 8,
                countdown_secs: 20,
                full_countdown_secs: 3,
                spin_force_base: 60,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 1_200_000,
                standing_lobbies: 1,
            },
            Self::Sapphire => TierSettings {
                min_players: 2,
                max_players: 8,
                countdown_secs: 20,
                full_countdown_secs: 3,
                spin_force_base: 65,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 1_200_000,
                standing_lobbies: 1,
            },
            Self::Ruby => TierSettings {
                min_players: 2,
                max_players: 6,
                countdown_secs: 30,
                full_countdown_secs: 3,
                spin_force_base: 70,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 1_800_000,
                standing_lobbies: 1,
            },
            Self::Diamond => TierSettings {
                min_players: 2,
                max_players: 4,
                countdown_secs: 30,
                full_countdown_secs: 3,
                spin_force_base: 80,
                spin_duration_ms: 5_500,
                wait_timeout_ms: 1_800_000,
                standing_lobbies: 1,
            },
        }
    }

    /// Returns the canonical uppercase name (e.g. `"BRONZE"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "BRONZE",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
            Self::Emerald => "EMERALD",
            Self::Sapphire => "SAPPHIRE",
            Self::Ruby => "RUBY",
            Self::Diamond => "DIAMOND",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRONZE" => Ok(Self::Bronze),
            "SILVER" => Ok(Self::Silver),
            "GOLD" => Ok(Self::Gold),
            "PLATINUM" => Ok(Self::Platinum),
            "EMERALD" => Ok(Self::Emerald),
            "SAPPHIRE" => Ok(Self::Sapphire),
            "RUBY" => Ok(Self::Ruby),
            "DIAMOND" => Ok(Self::Diamond),
            other => Err(EngineError::InvalidTier(other.to_string())),
        }
    }
}
