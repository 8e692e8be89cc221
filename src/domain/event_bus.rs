//! Broadcast channel for domain events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Every state
//! mutation publishes a [`LobbyEvent`] through the bus so an out-of-scope
//! push layer can subscribe; the engine itself never depends on anyone
//! listening.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::ids::{EntryId, LobbyId, UserId};
use super::tier::Tier;
use super::wallet::LedgerReason;

/// Domain event emitted after every state mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LobbyEvent {
    /// A seat was created.
    PlayerJoined {
        /// Lobby joined.
        lobby_id: LobbyId,
        /// Seat owner.
        user_id: UserId,
        /// Active seats after the join.
        active_players: u32,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A seated player changed their lucky number (still `Waiting`).
    LuckyNumberChosen {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Seat owner.
        user_id: UserId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The countdown fired; numbers are locked.
    CountdownStarted {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Σ active lucky numbers.
        spin_force_total: u32,
        /// Declared spin start instant.
        game_starts_at: DateTime<Utc>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The wheel started spinning along the declared timeline.
    SpinStarted {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Declared spin end instant.
        spin_completed_at: DateTime<Utc>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The spin completed and the outcome is final.
    LobbyResolved {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Winning segment, 1-indexed.
        winning_segment: u32,
        /// Lucky number painted on the winning segment.
        winning_number: u8,
        /// Permanent history record number.
        game_number: u64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A `Waiting` lobby was cancelled and its seats refunded.
    LobbyCancelled {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Seats that were refunded.
        refunded_seats: u32,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A chat message was appended.
    ChatPosted {
        /// Lobby affected.
        lobby_id: LobbyId,
        /// Author.
        user_id: UserId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A wallet balance changed.
    WalletMutated {
        /// Wallet owner.
        user_id: UserId,
        /// Tier whose balance changed.
        tier: Tier,
        /// Signed ticket delta.
        amount: i64,
        /// Why the ledger entry was written.
        reason: LedgerReason,
        /// Ledger entry identifier.
        entry_id: EntryId,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl LobbyEvent {
    /// Returns the event type string used in serialized form.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => "player_joined",
            Self::LuckyNumberChosen { .. } => "lucky_number_chosen",
            Self::CountdownStarted { .. } => "countdown_started",
            Self::SpinStarted { .. } => "spin_started",
            Self::LobbyResolved { .. } => "lobby_resolved",
            Self::LobbyCancelled { .. } => "lobby_cancelled",
            Self::ChatPosted { .. } => "chat_posted",
            Self::WalletMutated { .. } => "wallet_mutated",
        }
    }
}

/// Broadcast bus for [`LobbyEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest events are dropped for
/// lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LobbyEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event. With no
    /// active receivers the event is silently dropped.
    pub fn publish(&self, event: LobbyEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_event() -> LobbyEvent {
        LobbyEvent::PlayerJoined {
            lobby_id: LobbyId::new(),
            user_id: UserId::new(),
            active_players: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(make_event()), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(make_event()), 1);

        let received = rx.recv().await;
        let Ok(received) = received else {
            panic!("expected event");
        };
        assert_eq!(received.event_type_str(), "player_joined");
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.receiver_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(make_event()).ok();
        let Some(json) = json else {
            panic!("serialization failed");
        };
        assert_eq!(
            json.get("event_type").and_then(|v| v.as_str()),
            Some("player_joined")
        );
    }
}
