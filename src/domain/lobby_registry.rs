//! Concurrent lobby storage with per-lobby fine-grained locking.
//!
//! [`LobbyRegistry`] stores all lobbies in a `HashMap` where each entry
//! is individually protected by a [`tokio::sync::RwLock`]. Transitions on
//! different lobbies never block each other; all mutations of one
//! lobby's row graph (lobby + seats + round + chat) serialize on its
//! lock. There is no global lock beyond the brief outer map access.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::ids::LobbyId;
use super::lobby::TierLobby;
use super::tier::Tier;
use crate::error::EngineError;

/// Central store for all lobbies, hot and terminal.
#[derive(Debug, Default)]
pub struct LobbyRegistry {
    lobbies: RwLock<HashMap<LobbyId, Arc<RwLock<TierLobby>>>>,
}

impl LobbyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a freshly provisioned lobby.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if a lobby with the same ID
    /// already exists (should never happen with UUID v4).
    pub async fn insert(&self, lobby: TierLobby) -> Result<LobbyId, EngineError> {
        let lobby_id = lobby.id;
        let mut map = self.lobbies.write().await;
        if map.contains_key(&lobby_id) {
            return Err(EngineError::Internal(format!(
                "lobby {lobby_id} already exists"
            )));
        }
        map.insert(lobby_id, Arc::new(RwLock::new(lobby)));
        Ok(lobby_id)
    }

    /// Returns the lobby entry behind its per-lobby lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LobbyNotFound`] if no lobby with the given
    /// ID exists.
    pub async fn get(&self, lobby_id: LobbyId) -> Result<Arc<RwLock<TierLobby>>, EngineError> {
        let map = self.lobbies.read().await;
        map.get(&lobby_id)
            .cloned()
            .ok_or(EngineError::LobbyNotFound(lobby_id))
    }

    /// Returns handles to every lobby of the given tier.
    pub async fn for_tier(&self, tier: Tier) -> Vec<Arc<RwLock<TierLobby>>> {
        let map = self.lobbies.read().await;
        let mut handles = Vec::new();
        for entry in map.values() {
            if entry.read().await.tier == tier {
                handles.push(Arc::clone(entry));
            }
        }
        handles
    }

    /// Returns handles to every lobby.
    pub async fn all(&self) -> Vec<Arc<RwLock<TierLobby>>> {
        let map = self.lobbies.read().await;
        map.values().map(Arc::clone).collect()
    }

    /// Removes the given lobbies from the registry.
    ///
    /// Used by maintenance to drop terminal lobbies after their
    /// retention window; the history archive is their permanent record.
    pub async fn remove_many(&self, lobby_ids: &[LobbyId]) -> usize {
        let mut map = self.lobbies.write().await;
        let before = map.len();
        for id in lobby_ids {
            map.remove(id);
        }
        before - map.len()
    }

    /// Returns the number of stored lobbies.
    pub async fn len(&self) -> usize {
        self.lobbies.read().await.len()
    }

    /// Returns `true` if the registry contains no lobbies.
    pub async fn is_empty(&self) -> bool {
        self.lobbies.read().await.is_empty()
    }
}
