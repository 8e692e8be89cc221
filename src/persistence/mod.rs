//! Durable audit mirror.
//!
//! The in-memory services are the live source of truth; this layer
//! mirrors ledger entries and resolved games into PostgreSQL best-effort
//! so audits survive restarts. Mirror failures are logged by the callers
//! and never fail the originating operation.

pub mod postgres;

pub use postgres::PostgresPersistence;
