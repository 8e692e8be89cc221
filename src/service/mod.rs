//! Service layer: business logic orchestration.
//!
//! [`LobbyService`] runs matchmaking and the lobby lifecycle,
//! [`WalletLedger`] owns every ticket mutation, [`HistoryService`]
//! archives resolved games, and [`Scheduler`] drives the periodic
//! maintenance sweep.

pub mod history_service;
pub mod lobby_service;
pub mod scheduler;
pub mod wallet_ledger;

pub use history_service::HistoryService;
pub use lobby_service::{AdminLobbyFilter, AdminLobbyView, LobbyService, MaintenanceReport};
pub use scheduler::Scheduler;
pub use wallet_ledger::WalletLedger;
