//! wheelhouse engine entry point.
//!
//! Wires the services together, provisions the standing lobbies, and
//! runs the maintenance scheduler until shutdown.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use wheelhouse::config::EngineConfig;
use wheelhouse::domain::{EventBus, LobbyRegistry};
use wheelhouse::persistence::PostgresPersistence;
use wheelhouse::service::{HistoryService, LobbyService, Scheduler, WalletLedger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Arc::new(EngineConfig::from_env());
    tracing::info!(
        tick_interval_ms = config.tick_interval_ms,
        persistence_enabled = config.persistence_enabled,
        "starting wheelhouse engine"
    );

    // Optional durable audit mirror
    let persistence = if config.persistence_enabled {
        let mirror = PostgresPersistence::connect(&config).await?;
        mirror.ensure_schema().await?;
        tracing::info!("postgresql audit mirror connected");
        Some(Arc::new(mirror))
    } else {
        None
    };

    // Build domain layer
    let registry = Arc::new(LobbyRegistry::new());
    let event_bus = EventBus::new(config.event_bus_capacity);

    // Build service layer
    let mut ledger = WalletLedger::new(event_bus.clone());
    let mut history = HistoryService::new(&config);
    if let Some(mirror) = &persistence {
        ledger = ledger.with_persistence(Arc::clone(mirror));
        history = history.with_persistence(Arc::clone(mirror));
    }
    let lobby_service = Arc::new(LobbyService::new(
        registry,
        Arc::new(ledger),
        Arc::new(history),
        event_bus,
        Arc::clone(&config),
    ));

    // Provision standing lobbies and start the maintenance ticker
    let provisioned = lobby_service.initialize_all_lobbies().await?;
    tracing::info!(provisioned, "engine ready");

    let scheduler = Scheduler::new(Arc::clone(&lobby_service), config.tick_interval_ms).spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    scheduler.abort();

    Ok(())
}
