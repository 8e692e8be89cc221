//! Per-lobby chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{LobbyId, UserId};

/// One line in a lobby's append-only chat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Lobby the message was posted in.
    pub lobby_id: LobbyId,
    /// Author; must hold an active seat at post time.
    pub user_id: UserId,
    /// Message text.
    pub text: String,
    /// Server-side receive timestamp.
    pub sent_at: DateTime<Utc>,
}
