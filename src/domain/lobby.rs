//! Tier lobbies: seats, lifecycle, and time-guarded transitions.
//!
//! A [`TierLobby`] moves through `Waiting → Countdown → Spinning →
//! Resolved`, with `Cancelled` as an extra terminal reachable from
//! `Waiting` only. All time-driven transitions are pure functions of the
//! lobby's own stored timestamps plus a caller-supplied `now`, so the
//! periodic scheduler and on-demand reads can both apply them and
//! re-applying them is always a no-op.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;
use super::ids::{EntryId, LobbyId, UserId};
use super::round::LobbyRound;
use super::tier::{Tier, TierSettings};
use crate::error::EngineError;

/// Lobby lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyStatus {
    /// Accepting joins and lucky-number changes.
    Waiting,
    /// Countdown running; seats and numbers are locked.
    Countdown,
    /// Wheel spinning along the declared timeline.
    Spinning,
    /// Outcome final; history snapshot exists.
    Resolved,
    /// Cancelled before the countdown ever fired; seats refunded.
    Cancelled,
}

impl LobbyStatus {
    /// Returns `true` once the lobby can never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Cancelled)
    }
}

/// A time-driven transition applied by [`TierLobby::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyTransition {
    /// `Countdown → Spinning`; the round was computed.
    SpinStarted,
    /// `Spinning → Resolved`; the outcome is final.
    Resolved,
}

/// A user's seat in a lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyPlayer {
    /// Seat owner.
    pub user_id: UserId,
    /// Chosen lucky number in `[2, 9]`. Immutable once the lobby leaves
    /// `Waiting`.
    pub lucky_number: u8,
    /// Tier of the ticket that paid for the seat.
    pub ticket_tier_used: Tier,
    /// Ledger entry of the entry-fee debit.
    pub debit_entry_id: EntryId,
    /// `false` once the seat has been released (refund path).
    pub is_active: bool,
    /// Seat creation timestamp.
    pub joined_at: DateTime<Utc>,
}

/// One matchmaking room for a tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLobby {
    /// Lobby identifier.
    pub id: LobbyId,
    /// Tier this lobby belongs to.
    pub tier: Tier,
    /// Current lifecycle state.
    pub status: LobbyStatus,
    /// All seats ever created, active and released.
    pub players: Vec<LobbyPlayer>,
    /// Σ active lucky numbers, fixed when the countdown starts.
    pub spin_force_total: u32,
    /// The spin round; exists from `Spinning` onward.
    pub round: Option<LobbyRound>,
    /// Append-only chat log.
    pub chat: Vec<ChatMessage>,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the countdown fires.
    pub countdown_starts_at: Option<DateTime<Utc>>,
    /// Instant the spin begins; outcome is seeded against this.
    pub game_starts_at: Option<DateTime<Utc>>,
    /// Set on `Resolved`.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set on `Cancelled`.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TierLobby {
    /// Creates a fresh `Waiting` lobby for the given tier.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        Self {
            id: LobbyId::new(),
            tier,
            status: LobbyStatus::Waiting,
            players: Vec::new(),
            spin_force_total: 0,
            round: None,
            chat: Vec::new(),
            created_at: Utc::now(),
            countdown_starts_at: None,
            game_starts_at: None,
            resolved_at: None,
            cancelled_at: None,
        }
    }

    /// Gameplay settings of this lobby's tier.
    #[must_use]
    pub const fn settings(&self) -> TierSettings {
        self.tier.settings()
    }

    /// Iterator over active seats.
    pub fn active_players(&self) -> impl Iterator<Item = &LobbyPlayer> {
        self.players.iter().filter(|p| p.is_active)
    }

    /// Number of active seats.
    #[must_use]
    pub fn active_count(&self) -> u32 {
        u32::try_from(self.active_players().count()).unwrap_or(u32::MAX)
    }

    /// Returns `true` while another seat fits.
    #[must_use]
    pub fn has_room(&self) -> bool {
        self.active_count() < self.settings().max_players
    }

    /// The user's active seat, if any.
    #[must_use]
    pub fn seat(&self, user_id: UserId) -> Option<&LobbyPlayer> {
        self.players
            .iter()
            .find(|p| p.is_active && p.user_id == user_id)
    }

    fn seat_mut(&mut self, user_id: UserId) -> Option<&mut LobbyPlayer> {
        self.players
            .iter_mut()
            .find(|p| p.is_active && p.user_id == user_id)
    }

    /// Inserts a seat for a user who already paid the entry fee.
    ///
    /// # Errors
    ///
    /// - [`EngineError::StateConflict`] if the lobby left `Waiting` or
    ///   the user already holds an active seat here.
    /// - [`EngineError::LobbyFull`] if the lobby is at capacity. A join
    ///   against a full `Waiting` lobby never creates a seat.
    pub fn insert_seat(
        &mut self,
        user_id: UserId,
        lucky_number: u8,
        debit_entry_id: EntryId,
    ) -> Result<(), EngineError> {
        if self.status != LobbyStatus::Waiting {
            return Err(EngineError::StateConflict(format!(
                "lobby {} is {:?}, joins are only accepted while WAITING",
                self.id, self.status
            )));
        }
        if !self.has_room() {
            return Err(EngineError::LobbyFull(self.tier));
        }
        if self.seat(user_id).is_some() {
            return Err(EngineError::StateConflict(format!(
                "user {user_id} already holds an active seat in lobby {}",
                self.id
            )));
        }
        self.players.push(LobbyPlayer {
            user_id,
            lucky_number,
            ticket_tier_used: self.tier,
            debit_entry_id,
            is_active: true,
            joined_at: Utc::now(),
        });
        Ok(())
    }

    /// Updates the lucky number of an existing active seat.
    ///
    /// # Errors
    ///
    /// - [`EngineError::StateConflict`] once the lobby has left
    ///   `Waiting`; numbers are locked from the countdown onward.
    /// - [`EngineError::SeatNotFound`] if the user holds no active seat.
    pub fn choose_lucky_number(
        &mut self,
        user_id: UserId,
        lucky_number: u8,
    ) -> Result<(), EngineError> {
        if self.status != LobbyStatus::Waiting {
            return Err(EngineError::StateConflict(format!(
                "lucky numbers are locked once lobby {} leaves WAITING",
                self.id
            )));
        }
        let lobby_id = self.id;
        let seat = self
            .seat_mut(user_id)
            .ok_or(EngineError::SeatNotFound { lobby_id, user_id })?;
        seat.lucky_number = lucky_number;
        Ok(())
    }

    /// Starts the countdown if the lobby is `Waiting` with enough active
    /// players. Returns `true` if the transition fired.
    ///
    /// Fixes `spin_force_total` and locks every lucky number. A lobby at
    /// exactly `max_players` uses the shortened countdown (fast start
    /// when full).
    pub fn maybe_start_countdown(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != LobbyStatus::Waiting {
            return false;
        }
        let settings = self.settings();
        let active = self.active_count();
        if active < settings.min_players {
            return false;
        }
        let countdown_secs = if active >= settings.max_players {
            settings.full_countdown_secs
        } else {
            settings.countdown_secs
        };
        self.spin_force_total = self.active_players().map(|p| u32::from(p.lucky_number)).sum();
        self.status = LobbyStatus::Countdown;
        self.countdown_starts_at = Some(now);
        self.game_starts_at = Some(now + Duration::seconds(i64::from(countdown_secs)));
        true
    }

    /// Cancels a `Waiting` lobby. Returns `true` if the transition fired.
    ///
    /// The caller is responsible for refunding active seats; this method
    /// only flips the state and releases them.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != LobbyStatus::Waiting {
            return false;
        }
        self.status = LobbyStatus::Cancelled;
        self.cancelled_at = Some(now);
        for player in &mut self.players {
            player.is_active = false;
        }
        true
    }

    /// Applies every time-driven transition whose stored timestamp has
    /// arrived, in order. Idempotent: terminal lobbies and lobbies whose
    /// next timestamp is still in the future are untouched.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Vec<LobbyTransition> {
        let mut applied = Vec::new();

        if self.status == LobbyStatus::Countdown
            && let Some(starts_at) = self.game_starts_at
            && now >= starts_at
        {
            // The spin timeline is declared against the scheduled start,
            // not against when someone happened to observe it.
            let settings = self.settings();
            self.round = Some(LobbyRound::compute(
                self.id,
                settings.spin_force_base,
                self.spin_force_total,
                starts_at,
                settings.spin_duration_ms,
            ));
            self.status = LobbyStatus::Spinning;
            applied.push(LobbyTransition::SpinStarted);
        }

        if self.status == LobbyStatus::Spinning
            && let Some(round) = self.round.as_mut()
            && now >= round.spin_completed_at
        {
            round.resolved_at = Some(now);
            self.resolved_at = Some(now);
            self.status = LobbyStatus::Resolved;
            applied.push(LobbyTransition::Resolved);
        }

        applied
    }

    /// Age of a still-`Waiting` lobby, used for the wait timeout.
    #[must_use]
    pub fn waiting_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// One seat as seen by a specific viewer.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerView {
    /// Seat owner.
    pub user_id: UserId,
    /// `None` while the lobby is `Waiting` and the seat is not the
    /// viewer's own; numbers are revealed when the countdown starts.
    pub lucky_number: Option<u8>,
    /// Seat creation timestamp.
    pub joined_at: DateTime<Utc>,
}

/// Viewer-scoped lobby snapshot, fully advanced by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct LobbySnapshot {
    /// Lobby identifier.
    pub lobby_id: LobbyId,
    /// Lobby tier.
    pub tier: Tier,
    /// Lifecycle state at snapshot time.
    pub status: LobbyStatus,
    /// Players required to start the countdown.
    pub min_players: u32,
    /// Seat capacity.
    pub max_players: u32,
    /// Active seats, viewer-scoped.
    pub players: Vec<PlayerView>,
    /// Σ active lucky numbers; `None` until the countdown fires.
    pub spin_force_total: Option<u32>,
    /// Set once the countdown has started.
    pub countdown_starts_at: Option<DateTime<Utc>>,
    /// Spin start instant.
    pub game_starts_at: Option<DateTime<Utc>>,
    /// Full round timeline, present from `Spinning` onward.
    pub round: Option<LobbyRound>,
    /// The viewer's own lucky number, if seated.
    pub viewer_lucky_number: Option<u8>,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
}

impl TierLobby {
    /// Builds a viewer-scoped snapshot.
    ///
    /// Other players' lucky numbers are hidden while the lobby is
    /// `Waiting`; the viewer's own is always visible.
    #[must_use]
    pub fn snapshot_for(&self, viewer: Option<UserId>) -> LobbySnapshot {
        let waiting = self.status == LobbyStatus::Waiting;
        let settings = self.settings();
        let players = self
            .active_players()
            .map(|p| PlayerView {
                user_id: p.user_id,
                lucky_number: if waiting && viewer != Some(p.user_id) {
                    None
                } else {
                    Some(p.lucky_number)
                },
                joined_at: p.joined_at,
            })
            .collect();

        LobbySnapshot {
            lobby_id: self.id,
            tier: self.tier,
            status: self.status,
            min_players: settings.min_players,
            max_players: settings.max_players,
            players,
            spin_force_total: if waiting { None } else { Some(self.spin_force_total) },
            countdown_starts_at: self.countdown_starts_at,
            game_starts_at: self.game_starts_at,
            round: self.round.clone(),
            viewer_lucky_number: viewer.and_then(|v| self.seat(v)).map(|p| p.lucky_number),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn seat(lobby: &mut TierLobby, lucky: u8) -> UserId {
        let user = UserId::new();
        let result = lobby.insert_seat(user, lucky, EntryId::new());
        assert!(result.is_ok());
        user
    }

    #[test]
    fn insert_seat_rejects_duplicates() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        let user = seat(&mut lobby, 4);
        let result = lobby.insert_seat(user, 5, EntryId::new());
        assert!(matches!(result, Err(EngineError::StateConflict(_))));
        assert_eq!(lobby.active_count(), 1);
    }

    #[test]
    fn insert_seat_rejects_when_full() {
        let mut lobby = TierLobby::new(Tier::Diamond);
        let max = lobby.settings().max_players;
        for _ in 0..max {
            seat(&mut lobby, 5);
        }
        let result = lobby.insert_seat(UserId::new(), 5, EntryId::new());
        assert!(matches!(result, Err(EngineError::LobbyFull(Tier::Diamond))));
        assert_eq!(lobby.active_count(), max);
    }

    #[test]
    fn countdown_fires_at_min_players_with_summed_force() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        seat(&mut lobby, 4);
        seat(&mut lobby, 7);
        assert!(!lobby.maybe_start_countdown(Utc::now()));

        seat(&mut lobby, 9);
        let now = Utc::now();
        assert!(lobby.maybe_start_countdown(now));
        assert_eq!(lobby.status, LobbyStatus::Countdown);
        assert_eq!(lobby.spin_force_total, 20);
        assert_eq!(lobby.countdown_starts_at, Some(now));

        let game_starts = lobby.game_starts_at.unwrap_or(now);
        let countdown = game_starts - now;
        assert_eq!(
            countdown.num_seconds(),
            i64::from(lobby.settings().countdown_secs)
        );
    }

    #[test]
    fn full_lobby_uses_shortened_countdown() {
        let mut lobby = TierLobby::new(Tier::Diamond);
        for _ in 0..lobby.settings().max_players {
            seat(&mut lobby, 5);
        }
        let now = Utc::now();
        assert!(lobby.maybe_start_countdown(now));
        let game_starts = lobby.game_starts_at.unwrap_or(now);
        assert_eq!(
            (game_starts - now).num_seconds(),
            i64::from(lobby.settings().full_countdown_secs)
        );
    }

    #[test]
    fn joins_rejected_once_countdown_started() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        for lucky in [4, 7, 9] {
            seat(&mut lobby, lucky);
        }
        assert!(lobby.maybe_start_countdown(Utc::now()));

        let result = lobby.insert_seat(UserId::new(), 6, EntryId::new());
        assert!(matches!(result, Err(EngineError::StateConflict(_))));
    }

    #[test]
    fn lucky_numbers_locked_after_countdown() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        let user = seat(&mut lobby, 4);
        seat(&mut lobby, 7);
        seat(&mut lobby, 9);

        assert!(lobby.choose_lucky_number(user, 8).is_ok());
        assert!(lobby.maybe_start_countdown(Utc::now()));

        let result = lobby.choose_lucky_number(user, 3);
        assert!(matches!(result, Err(EngineError::StateConflict(_))));
    }

    #[test]
    fn advance_runs_spin_and_resolution_when_due() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        for lucky in [4, 7, 9] {
            seat(&mut lobby, lucky);
        }
        let now = Utc::now();
        assert!(lobby.maybe_start_countdown(now));

        // Nothing due yet.
        assert!(lobby.advance(now).is_empty());
        assert_eq!(lobby.status, LobbyStatus::Countdown);

        // Far enough in the future that both transitions are due.
        let later = now + Duration::seconds(120);
        let applied = lobby.advance(later);
        assert_eq!(
            applied,
            vec![LobbyTransition::SpinStarted, LobbyTransition::Resolved]
        );
        assert_eq!(lobby.status, LobbyStatus::Resolved);

        let Some(round) = lobby.round.as_ref() else {
            panic!("round missing after spin");
        };
        assert_eq!(round.spin_force_total, 20);
        assert_eq!(round.spin_started_at, lobby.game_starts_at.unwrap_or(now));
        assert!(round.resolved_at.is_some());
    }

    #[test]
    fn advance_on_resolved_lobby_is_noop() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        for lucky in [4, 7, 9] {
            seat(&mut lobby, lucky);
        }
        let now = Utc::now();
        lobby.maybe_start_countdown(now);
        let later = now + Duration::seconds(120);
        lobby.advance(later);
        assert_eq!(lobby.status, LobbyStatus::Resolved);

        let resolved_at = lobby.resolved_at;
        let seed = lobby.round.as_ref().map(|r| r.seed.clone());
        assert!(lobby.advance(later + Duration::seconds(60)).is_empty());
        assert_eq!(lobby.resolved_at, resolved_at);
        assert_eq!(lobby.round.as_ref().map(|r| r.seed.clone()), seed);
    }

    #[test]
    fn cancel_only_from_waiting() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        let user = seat(&mut lobby, 4);
        assert!(lobby.cancel(Utc::now()));
        assert_eq!(lobby.status, LobbyStatus::Cancelled);
        assert_eq!(lobby.active_count(), 0);
        assert!(lobby.seat(user).is_none());

        // Terminal; cannot cancel again or advance.
        assert!(!lobby.cancel(Utc::now()));
        assert!(lobby.advance(Utc::now()).is_empty());
    }

    #[test]
    fn snapshot_hides_other_numbers_while_waiting() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        let me = seat(&mut lobby, 4);
        let other = seat(&mut lobby, 7);

        let snap = lobby.snapshot_for(Some(me));
        assert_eq!(snap.viewer_lucky_number, Some(4));
        for view in &snap.players {
            if view.user_id == me {
                assert_eq!(view.lucky_number, Some(4));
            } else {
                assert_eq!(view.user_id, other);
                assert_eq!(view.lucky_number, None);
            }
        }
        assert!(snap.spin_force_total.is_none());
    }

    #[test]
    fn snapshot_reveals_numbers_after_countdown() {
        let mut lobby = TierLobby::new(Tier::Bronze);
        let me = seat(&mut lobby, 4);
        seat(&mut lobby, 7);
        seat(&mut lobby, 9);
        lobby.maybe_start_countdown(Utc::now());

        let snap = lobby.snapshot_for(Some(me));
        assert!(snap.players.iter().all(|p| p.lucky_number.is_some()));
        assert_eq!(snap.spin_force_total, Some(20));
    }
}
