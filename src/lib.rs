//! # wheelhouse
//!
//! Tier lobby matchmaking and spin-resolution engine for a ticket-staked
//! wheel game. Players spend per-tier tickets to take a seat in a lobby,
//! pick a lucky number, and a deterministic wheel spin resolves the
//! round; every resolved game becomes a numbered, permanent history
//! record. No real money is involved anywhere.
//!
//! ## Architecture
//!
//! ```text
//! Callers (transport layer, out of scope)
//!     │
//!     ├── LobbyService (service/)  ── matchmaking + lifecycle
//!     ├── WalletLedger (service/)  ── per-tier ticket balances
//!     ├── HistoryService (service/) ── gapless game archive
//!     ├── Scheduler (service/)     ── periodic maintenance ticks
//!     │
//!     ├── EventBus (domain/)       ── broadcast of state changes
//!     ├── LobbyRegistry (domain/)  ── concurrent lobby storage
//!     │
//!     └── PostgreSQL audit mirror (persistence/, optional)
//! ```
//!
//! The in-memory registry and ledger are the live source of truth; the
//! persistence layer is a best-effort durable mirror for audit.

pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
