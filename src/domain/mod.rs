//! Domain layer: core types, lobby registry, and event system.
//!
//! This module contains the engine's domain model: identity newtypes,
//! tiers, wallets and the ledger, lobbies with their lifecycle state
//! machine, deterministic spin math, history records, chat, the event
//! bus for broadcasting state changes, and the lobby registry for
//! concurrent lobby storage.

pub mod chat;
pub mod event_bus;
pub mod history;
pub mod ids;
pub mod lobby;
pub mod lobby_registry;
pub mod round;
pub mod spin;
pub mod tier;
pub mod wallet;

pub use chat::ChatMessage;
pub use event_bus::{EventBus, LobbyEvent};
pub use history::{GameHistory, GameHistoryArchive, GameHistoryPlayer};
pub use ids::{EntryId, LobbyId, UserId};
pub use lobby::{LobbyPlayer, LobbySnapshot, LobbyStatus, TierLobby};
pub use lobby_registry::LobbyRegistry;
pub use round::LobbyRound;
pub use tier::{Tier, TierSettings};
pub use wallet::{LedgerEntry, LedgerReason, Wallet};
