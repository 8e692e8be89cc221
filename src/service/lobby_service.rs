//! Lobby service: matchmaking, lifecycle advancement, chat, and admin
//! views.
//!
//! Orchestration layer over the [`LobbyRegistry`], [`WalletLedger`], and
//! [`HistoryService`]. Every mutation follows the same pattern: acquire
//! the lobby's write lock, apply the domain transition, build the
//! snapshot, release the lock, then emit events.
//!
//! Time-driven progression is pull-based *and* pushed: every read and
//! mutation opportunistically advances the lobby it touches, while
//! [`run_maintenance_at`](LobbyService::run_maintenance_at) (driven by
//! the scheduler) sweeps all lobbies so an idle lobby still progresses.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::domain::chat::ChatMessage;
use crate::domain::event_bus::{EventBus, LobbyEvent};
use crate::domain::ids::{EntryId, LobbyId, UserId};
use crate::domain::lobby::{
    LobbyPlayer, LobbySnapshot, LobbyStatus, LobbyTransition, TierLobby,
};
use crate::domain::lobby_registry::LobbyRegistry;
use crate::domain::round::LobbyRound;
use crate::domain::spin::{LUCKY_NUMBER_MAX, LUCKY_NUMBER_MIN};
use crate::domain::tier::Tier;
use crate::domain::wallet::LedgerReason;
use crate::error::EngineError;
use crate::service::history_service::HistoryService;
use crate::service::wallet_ledger::WalletLedger;

/// Filters for the admin lobby listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminLobbyFilter {
    /// Restrict to one tier.
    pub tier: Option<Tier>,
    /// Restrict to one lifecycle state.
    pub status: Option<LobbyStatus>,
}

/// Unfiltered lobby view for the admin dashboard: full seats including
/// debit entry ids, hidden from ordinary viewers.
#[derive(Debug, Clone, Serialize)]
pub struct AdminLobbyView {
    /// Lobby identifier.
    pub lobby_id: LobbyId,
    /// Lobby tier.
    pub tier: Tier,
    /// Lifecycle state.
    pub status: LobbyStatus,
    /// All seats ever created, with ledger references.
    pub players: Vec<LobbyPlayer>,
    /// Σ active lucky numbers, 0 until the countdown fires.
    pub spin_force_total: u32,
    /// The spin round, if one exists.
    pub round: Option<LobbyRound>,
    /// Provisioning timestamp.
    pub created_at: DateTime<Utc>,
    /// Countdown start, if fired.
    pub countdown_starts_at: Option<DateTime<Utc>>,
    /// Spin start, if scheduled.
    pub game_starts_at: Option<DateTime<Utc>>,
    /// Resolution timestamp.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Cancellation timestamp.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Number of chat messages posted.
    pub chat_messages: usize,
}

impl AdminLobbyView {
    fn from_lobby(lobby: &TierLobby) -> Self {
        Self {
            lobby_id: lobby.id,
            tier: lobby.tier,
            status: lobby.status,
            players: lobby.players.clone(),
            spin_force_total: lobby.spin_force_total,
            round: lobby.round.clone(),
            created_at: lobby.created_at,
            countdown_starts_at: lobby.countdown_starts_at,
            game_starts_at: lobby.game_starts_at,
            resolved_at: lobby.resolved_at,
            cancelled_at: lobby.cancelled_at,
            chat_messages: lobby.chat.len(),
        }
    }
}

/// Counters from one maintenance sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaintenanceReport {
    /// Lobbies that applied at least one time-driven transition.
    pub advanced: usize,
    /// `Waiting` lobbies cancelled and refunded by the wait timeout.
    pub cancelled: usize,
    /// Standing lobbies newly provisioned.
    pub provisioned: usize,
    /// Terminal lobbies dropped after their retention window.
    pub pruned: usize,
}

impl MaintenanceReport {
    /// Returns `true` if the sweep changed anything.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.advanced == 0 && self.cancelled == 0 && self.provisioned == 0 && self.pruned == 0
    }
}

struct WaitingCandidate {
    handle: Arc<RwLock<TierLobby>>,
    active_count: u32,
    created_at: DateTime<Utc>,
}

/// Matchmaking and lifecycle orchestrator.
#[derive(Debug, Clone)]
pub struct LobbyService {
    registry: Arc<LobbyRegistry>,
    ledger: Arc<WalletLedger>,
    history: Arc<HistoryService>,
    event_bus: EventBus,
    config: Arc<EngineConfig>,
}

impl LobbyService {
    /// Creates a new `LobbyService`.
    #[must_use]
    pub fn new(
        registry: Arc<LobbyRegistry>,
        ledger: Arc<WalletLedger>,
        history: Arc<HistoryService>,
        event_bus: EventBus,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            ledger,
            history,
            event_bus,
            config,
        }
    }

    /// Returns a reference to the lobby registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<LobbyRegistry> {
        &self.registry
    }

    /// Returns a reference to the wallet ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    /// Returns a reference to the history archiver.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryService> {
        &self.history
    }

    /// Returns a reference to the event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Provisions the configured standing-lobby count for every tier.
    ///
    /// Idempotent startup call; returns the number of lobbies created.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] on a registry insertion clash.
    pub async fn initialize_all_lobbies(&self) -> Result<usize, EngineError> {
        let mut created = 0;
        for tier in Tier::ALL {
            created += self.ensure_standing_lobbies(tier).await?;
        }
        if created > 0 {
            tracing::info!(created, "standing lobbies provisioned");
        }
        Ok(created)
    }

    /// Seats a player in a `Waiting` lobby of the given tier.
    ///
    /// Lobby selection prefers the most-populated `Waiting` lobby with
    /// room, ties broken by age; a new lobby is created only while the
    /// tier is below its standing-lobby count. If the caller already
    /// holds an active seat in a `Waiting` lobby of this tier, the call
    /// behaves as [`choose_lucky_number`](Self::choose_lucky_number) and
    /// charges nothing. Otherwise exactly one ticket of the tier is
    /// debited before the seat is created; if seat creation then fails,
    /// a compensating refund is issued and the original error re-raised.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] if `lucky_number` is outside `[2, 9]`.
    /// - [`EngineError::InsufficientBalance`] if the user has no ticket.
    /// - [`EngineError::LobbyFull`] if every candidate is full and the
    ///   provisioning ceiling is reached (transient).
    /// - [`EngineError::StateConflict`] if the chosen lobby left
    ///   `Waiting` while the join was in flight.
    pub async fn join_lobby(
        &self,
        tier: Tier,
        user_id: UserId,
        lucky_number: u8,
    ) -> Result<LobbySnapshot, EngineError> {
        validate_lucky_number(lucky_number)?;
        let now = Utc::now();
        self.ensure_standing_lobbies(tier).await?;
        self.advance_tier(tier, now).await?;

        let candidates = self.waiting_candidates(tier).await;

        // An existing active seat in a Waiting lobby of this tier turns
        // the join into a lucky-number change with no new charge.
        for candidate in &candidates {
            let seated = candidate.handle.read().await.seat(user_id).is_some();
            if seated {
                return self
                    .choose_on(&candidate.handle, user_id, lucky_number)
                    .await;
            }
        }

        let settings = tier.settings();
        let target = if let Some(candidate) =
            candidates.iter().find(|c| c.active_count < settings.max_players)
        {
            Arc::clone(&candidate.handle)
        } else if candidates.len() < settings.standing_lobbies {
            self.provision_lobby(tier).await?
        } else {
            // Every candidate is full and the ceiling is reached. The
            // oldest lobby is expected to transition imminently and free
            // a tier slot; surface a transient condition instead of
            // charging for a seat that cannot exist.
            return Err(EngineError::LobbyFull(tier));
        };

        self.join_target(&target, tier, user_id, lucky_number, now)
            .await
    }

    /// Debit-then-insert against one specific lobby, with compensation.
    async fn join_target(
        &self,
        handle: &Arc<RwLock<TierLobby>>,
        tier: Tier,
        user_id: UserId,
        lucky_number: u8,
        now: DateTime<Utc>,
    ) -> Result<LobbySnapshot, EngineError> {
        let lobby_id = {
            // Cheap precheck so the common full/transitioned case fails
            // before any money moves; the insert below re-checks under
            // the write lock and is authoritative.
            let lobby = handle.read().await;
            if lobby.status != LobbyStatus::Waiting {
                return Err(EngineError::StateConflict(format!(
                    "lobby {} is {:?}, joins are only accepted while WAITING",
                    lobby.id, lobby.status
                )));
            }
            if !lobby.has_room() {
                return Err(EngineError::LobbyFull(tier));
            }
            lobby.id
        };

        let mut meta = serde_json::Map::new();
        meta.insert(
            "lobby_id".to_string(),
            serde_json::Value::String(lobby_id.to_string()),
        );
        let debit = self
            .ledger
            .consume_tickets(user_id, tier, 1, LedgerReason::LobbyEntry, meta)
            .await?;

        let mut lobby = handle.write().await;
        if let Err(err) = lobby.insert_seat(user_id, lucky_number, debit.id) {
            drop(lobby);
            self.refund_debit(user_id, tier, debit.id, lobby_id).await;
            return Err(err);
        }
        let active_players = lobby.active_count();
        let countdown_started = lobby.maybe_start_countdown(now);
        let spin_force_total = lobby.spin_force_total;
        let game_starts_at = lobby.game_starts_at;
        let snapshot = lobby.snapshot_for(Some(user_id));
        drop(lobby);

        tracing::info!(%lobby_id, %user_id, %tier, active_players, "player joined lobby");
        let _ = self.event_bus.publish(LobbyEvent::PlayerJoined {
            lobby_id,
            user_id,
            active_players,
            timestamp: now,
        });
        if countdown_started {
            tracing::info!(%lobby_id, spin_force_total, "countdown started");
            let _ = self.event_bus.publish(LobbyEvent::CountdownStarted {
                lobby_id,
                spin_force_total,
                game_starts_at: game_starts_at.unwrap_or(now),
                timestamp: now,
            });
        }
        Ok(snapshot)
    }

    /// Issues the compensating credit after a failed seat insertion.
    async fn refund_debit(&self, user_id: UserId, tier: Tier, debit_id: EntryId, lobby_id: LobbyId) {
        let mut meta = serde_json::Map::new();
        meta.insert(
            "lobby_id".to_string(),
            serde_json::Value::String(lobby_id.to_string()),
        );
        meta.insert(
            "refund_of".to_string(),
            serde_json::Value::String(debit_id.to_string()),
        );
        match self
            .ledger
            .add_tickets(user_id, tier, 1, LedgerReason::LobbyRefund, meta)
            .await
        {
            Ok(entry) => {
                tracing::info!(%lobby_id, %user_id, refund_entry = %entry.id, "entry ticket refunded");
            }
            Err(err) => {
                tracing::error!(%lobby_id, %user_id, %err, "compensating refund failed");
            }
        }
    }

    /// Updates the caller's lucky number in a `Waiting` lobby.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] if `lucky_number` is outside `[2, 9]`.
    /// - [`EngineError::LobbyNotFound`] for an unknown lobby.
    /// - [`EngineError::StateConflict`] once the lobby left `Waiting`.
    /// - [`EngineError::SeatNotFound`] if the caller is not seated.
    pub async fn choose_lucky_number(
        &self,
        lobby_id: LobbyId,
        user_id: UserId,
        lucky_number: u8,
    ) -> Result<LobbySnapshot, EngineError> {
        validate_lucky_number(lucky_number)?;
        let handle = self.registry.get(lobby_id).await?;
        self.advance_handle(&handle, Utc::now()).await?;
        self.choose_on(&handle, user_id, lucky_number).await
    }

    async fn choose_on(
        &self,
        handle: &Arc<RwLock<TierLobby>>,
        user_id: UserId,
        lucky_number: u8,
    ) -> Result<LobbySnapshot, EngineError> {
        let mut lobby = handle.write().await;
        lobby.choose_lucky_number(user_id, lucky_number)?;
        let lobby_id = lobby.id;
        let snapshot = lobby.snapshot_for(Some(user_id));
        drop(lobby);

        let _ = self.event_bus.publish(LobbyEvent::LuckyNumberChosen {
            lobby_id,
            user_id,
            timestamp: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Returns the fully advanced, viewer-scoped state of one lobby.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LobbyNotFound`] for an unknown lobby.
    pub async fn get_lobby_state(
        &self,
        lobby_id: LobbyId,
        viewer: UserId,
    ) -> Result<LobbySnapshot, EngineError> {
        let handle = self.registry.get(lobby_id).await?;
        self.advance_handle(&handle, Utc::now()).await?;
        let lobby = handle.read().await;
        Ok(lobby.snapshot_for(Some(viewer)))
    }

    /// Returns the viewer's current lobby for a tier, or the join
    /// candidate if they are not seated anywhere.
    ///
    /// This is a pure lookup over stored state, never a cached pointer:
    /// a non-terminal lobby holding the viewer's seat wins, otherwise
    /// the best `Waiting` candidate under the join ordering.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if provisioning failed to leave
    /// a `Waiting` lobby behind.
    pub async fn get_active_lobby_state(
        &self,
        tier: Tier,
        viewer: UserId,
    ) -> Result<LobbySnapshot, EngineError> {
        let now = Utc::now();
        self.advance_tier(tier, now).await?;

        for handle in self.registry.for_tier(tier).await {
            let lobby = handle.read().await;
            if !lobby.status.is_terminal() && lobby.seat(viewer).is_some() {
                return Ok(lobby.snapshot_for(Some(viewer)));
            }
        }

        self.ensure_standing_lobbies(tier).await?;
        let candidates = self.waiting_candidates(tier).await;
        let Some(candidate) = candidates.first() else {
            return Err(EngineError::Internal(format!(
                "no waiting lobby for tier {tier} after provisioning"
            )));
        };
        let lobby = candidate.handle.read().await;
        Ok(lobby.snapshot_for(Some(viewer)))
    }

    /// Applies all due time-driven transitions to one lobby and returns
    /// its resulting status. A no-op on terminal lobbies.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LobbyNotFound`] for an unknown lobby.
    pub async fn advance_lobby_at(
        &self,
        lobby_id: LobbyId,
        now: DateTime<Utc>,
    ) -> Result<LobbyStatus, EngineError> {
        let handle = self.registry.get(lobby_id).await?;
        self.advance_handle(&handle, now).await?;
        let status = handle.read().await.status;
        Ok(status)
    }

    /// Appends a chat message; requires an active seat in the lobby.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] for empty or oversized text.
    /// - [`EngineError::LobbyNotFound`] for an unknown lobby.
    /// - [`EngineError::SeatNotFound`] if the author is not seated.
    pub async fn post_chat_message(
        &self,
        lobby_id: LobbyId,
        user_id: UserId,
        text: &str,
    ) -> Result<ChatMessage, EngineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput(
                "chat message must not be empty".to_string(),
            ));
        }
        if trimmed.len() > 500 {
            return Err(EngineError::InvalidInput(
                "chat message exceeds 500 characters".to_string(),
            ));
        }

        let handle = self.registry.get(lobby_id).await?;
        let mut lobby = handle.write().await;
        if lobby.seat(user_id).is_none() {
            return Err(EngineError::SeatNotFound { lobby_id, user_id });
        }
        let message = ChatMessage {
            lobby_id,
            user_id,
            text: trimmed.to_string(),
            sent_at: Utc::now(),
        };
        lobby.chat.push(message.clone());
        drop(lobby);

        let _ = self.event_bus.publish(LobbyEvent::ChatPosted {
            lobby_id,
            user_id,
            timestamp: message.sent_at,
        });
        Ok(message)
    }

    /// Returns the most recent chat messages in chronological order,
    /// bounded by `limit` and the configured fetch cap.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LobbyNotFound`] for an unknown lobby.
    pub async fn fetch_chat_messages(
        &self,
        lobby_id: LobbyId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, EngineError> {
        let handle = self.registry.get(lobby_id).await?;
        let lobby = handle.read().await;
        let cap = limit.min(self.config.chat_fetch_limit);
        let skip = lobby.chat.len().saturating_sub(cap);
        Ok(lobby.chat.iter().skip(skip).cloned().collect())
    }

    /// Unfiltered lobby listing for the admin dashboard.
    pub async fn list_lobbies_for_admin(&self, filter: AdminLobbyFilter) -> Vec<AdminLobbyView> {
        let mut views = Vec::new();
        for handle in self.registry.all().await {
            let lobby = handle.read().await;
            if filter.tier.is_some_and(|t| lobby.tier != t) {
                continue;
            }
            if filter.status.is_some_and(|s| lobby.status != s) {
                continue;
            }
            views.push(AdminLobbyView::from_lobby(&lobby));
        }
        views.sort_by_key(|v| v.created_at);
        views
    }

    /// Full admin view of one lobby.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LobbyNotFound`] for an unknown lobby.
    pub async fn get_lobby_for_admin(
        &self,
        lobby_id: LobbyId,
    ) -> Result<AdminLobbyView, EngineError> {
        let handle = self.registry.get(lobby_id).await?;
        let lobby = handle.read().await;
        Ok(AdminLobbyView::from_lobby(&lobby))
    }

    /// One full maintenance sweep at the given instant: advance every
    /// lobby, cancel-and-refund stale `Waiting` lobbies, self-heal the
    /// standing-lobby counts, and drop terminal lobbies past retention.
    ///
    /// # Errors
    ///
    /// Returns the first advancement or provisioning error encountered.
    pub async fn run_maintenance_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<MaintenanceReport, EngineError> {
        let mut report = MaintenanceReport::default();

        for handle in self.registry.all().await {
            let events = self.advance_handle(&handle, now).await?;
            if !events.is_empty() {
                report.advanced += 1;
            }
            if self.cancel_if_stale(&handle, now).await {
                report.cancelled += 1;
            }
        }

        for tier in Tier::ALL {
            report.provisioned += self.ensure_standing_lobbies(tier).await?;
        }

        report.pruned = self.prune_terminal(now).await;
        Ok(report)
    }

    /// Maintenance sweep against the wall clock.
    ///
    /// # Errors
    ///
    /// See [`run_maintenance_at`](Self::run_maintenance_at).
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, EngineError> {
        self.run_maintenance_at(Utc::now()).await
    }

    /// Cancels a `Waiting` lobby stuck past its tier's wait timeout and
    /// refunds every active seat. Lobbies with no seats are left alone;
    /// an empty lobby costs nobody anything.
    async fn cancel_if_stale(&self, handle: &Arc<RwLock<TierLobby>>, now: DateTime<Utc>) -> bool {
        let cancelled = {
            let mut lobby = handle.write().await;
            let timeout = Duration::milliseconds(
                i64::try_from(lobby.settings().wait_timeout_ms).unwrap_or(i64::MAX),
            );
            if lobby.status != LobbyStatus::Waiting
                || lobby.active_count() == 0
                || lobby.waiting_age(now) <= timeout
            {
                None
            } else {
                let seats: Vec<(UserId, EntryId)> = lobby
                    .active_players()
                    .map(|p| (p.user_id, p.debit_entry_id))
                    .collect();
                lobby.cancel(now);
                Some((lobby.id, lobby.tier, seats))
            }
        };

        let Some((lobby_id, tier, seats)) = cancelled else {
            return false;
        };
        let refunded = u32::try_from(seats.len()).unwrap_or(u32::MAX);
        for (user_id, debit_id) in seats {
            self.refund_debit(user_id, tier, debit_id, lobby_id).await;
        }
        tracing::info!(%lobby_id, %tier, refunded, "stale waiting lobby cancelled");
        let _ = self.event_bus.publish(LobbyEvent::LobbyCancelled {
            lobby_id,
            refunded_seats: refunded,
            timestamp: now,
        });
        true
    }

    /// Drops terminal lobbies whose retention window has passed.
    async fn prune_terminal(&self, now: DateTime<Utc>) -> usize {
        let retention = Duration::seconds(
            i64::try_from(self.config.terminal_retention_secs).unwrap_or(i64::MAX),
        );
        let mut stale = Vec::new();
        for handle in self.registry.all().await {
            let lobby = handle.read().await;
            if !lobby.status.is_terminal() {
                continue;
            }
            let ended_at = lobby.resolved_at.or(lobby.cancelled_at);
            if ended_at.is_some_and(|t| now - t > retention) {
                stale.push(lobby.id);
            }
        }
        self.registry.remove_many(&stale).await
    }

    /// Creates `Waiting` lobbies for the tier until its standing count
    /// is met. Self-healing: callable from startup, joins, and the
    /// scheduler alike.
    async fn ensure_standing_lobbies(&self, tier: Tier) -> Result<usize, EngineError> {
        let standing = self.waiting_candidates(tier).await.len();
        let wanted = tier.settings().standing_lobbies;
        let mut created = 0;
        while standing + created < wanted {
            self.provision_lobby(tier).await?;
            created += 1;
        }
        Ok(created)
    }

    async fn provision_lobby(&self, tier: Tier) -> Result<Arc<RwLock<TierLobby>>, EngineError> {
        let lobby = TierLobby::new(tier);
        let lobby_id = self.registry.insert(lobby).await?;
        tracing::debug!(%lobby_id, %tier, "lobby provisioned");
        self.registry.get(lobby_id).await
    }

    /// `Waiting` lobbies of the tier in join-preference order: active
    /// player count descending, then creation time ascending.
    async fn waiting_candidates(&self, tier: Tier) -> Vec<WaitingCandidate> {
        let mut candidates = Vec::new();
        for handle in self.registry.for_tier(tier).await {
            let lobby = handle.read().await;
            if lobby.status != LobbyStatus::Waiting {
                continue;
            }
            candidates.push(WaitingCandidate {
                active_count: lobby.active_count(),
                created_at: lobby.created_at,
                handle: Arc::clone(&handle),
            });
        }
        candidates.sort_by(|a, b| {
            b.active_count
                .cmp(&a.active_count)
                .then(a.created_at.cmp(&b.created_at))
        });
        candidates
    }

    async fn advance_tier(&self, tier: Tier, now: DateTime<Utc>) -> Result<(), EngineError> {
        for handle in self.registry.for_tier(tier).await {
            self.advance_handle(&handle, now).await?;
        }
        Ok(())
    }

    /// Applies due transitions under the lobby's write lock; the history
    /// snapshot is taken in the same locked section as the resolving
    /// transition, so a resolved lobby is archived exactly once.
    async fn advance_handle(
        &self,
        handle: &Arc<RwLock<TierLobby>>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LobbyEvent>, EngineError> {
        let mut lobby = handle.write().await;
        let transitions = lobby.advance(now);
        if transitions.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::with_capacity(transitions.len());
        for transition in transitions {
            match transition {
                LobbyTransition::SpinStarted => {
                    let Some(round) = lobby.round.as_ref() else {
                        return Err(EngineError::Internal(format!(
                            "lobby {} spinning without a round",
                            lobby.id
                        )));
                    };
                    tracing::info!(
                        lobby_id = %lobby.id,
                        spin_force_final = round.spin_force_final,
                        winning_segment = round.winning_segment,
                        "spin started"
                    );
                    events.push(LobbyEvent::SpinStarted {
                        lobby_id: lobby.id,
                        spin_completed_at: round.spin_completed_at,
                        timestamp: now,
                    });
                }
                LobbyTransition::Resolved => {
                    let Some(round) = lobby.round.clone() else {
                        return Err(EngineError::Internal(format!(
                            "lobby {} resolved without a round",
                            lobby.id
                        )));
                    };
                    let game_number = self.history.record(&lobby, &round).await?;
                    events.push(LobbyEvent::LobbyResolved {
                        lobby_id: lobby.id,
                        winning_segment: round.winning_segment,
                        winning_number: round.winning_number,
                        game_number,
                        timestamp: now,
                    });
                }
            }
        }
        drop(lobby);

        for event in &events {
            let _ = self.event_bus.publish(event.clone());
        }
        Ok(events)
    }
}

fn validate_lucky_number(lucky_number: u8) -> Result<(), EngineError> {
    if !(LUCKY_NUMBER_MIN..=LUCKY_NUMBER_MAX).contains(&lucky_number) {
        return Err(EngineError::InvalidInput(format!(
            "lucky number {lucky_number} outside [{LUCKY_NUMBER_MIN}, {LUCKY_NUMBER_MAX}]"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_service() -> LobbyService {
        let config = Arc::new(EngineConfig::default());
        let event_bus = EventBus::new(config.event_bus_capacity);
        let registry = Arc::new(LobbyRegistry::new());
        let ledger = Arc::new(WalletLedger::new(event_bus.clone()));
        let history = Arc::new(HistoryService::new(&config));
        LobbyService::new(registry, ledger, history, event_bus, config)
    }

    async fn fund(service: &LobbyService, user: UserId, tier: Tier, amount: u64) {
        let result = service
            .ledger()
            .add_tickets(user, tier, amount, LedgerReason::Reward, serde_json::Map::new())
            .await;
        assert!(result.is_ok());
    }

    async fn funded_user(service: &LobbyService, tier: Tier) -> UserId {
        let user = UserId::new();
        fund(service, user, tier, 10).await;
        user
    }

    async fn join(service: &LobbyService, tier: Tier, lucky: u8) -> (UserId, LobbySnapshot) {
        let user = funded_user(service, tier).await;
        let result = service.join_lobby(tier, user, lucky).await;
        let Ok(snapshot) = result else {
            panic!("join failed: {result:?}");
        };
        (user, snapshot)
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let service = make_service();
        let first = service.initialize_all_lobbies().await;
        let expected: usize = Tier::ALL
            .iter()
            .map(|t| t.settings().standing_lobbies)
            .sum();
        assert_eq!(first.ok(), Some(expected));

        let second = service.initialize_all_lobbies().await;
        assert_eq!(second.ok(), Some(0));
        assert_eq!(service.registry().len().await, expected);
    }

    #[tokio::test]
    async fn three_joins_trigger_countdown_with_summed_force() {
        let service = make_service();
        let (_, first) = join(&service, Tier::Bronze, 4).await;
        let (_, second) = join(&service, Tier::Bronze, 7).await;
        assert_eq!(second.lobby_id, first.lobby_id);
        assert_eq!(second.status, LobbyStatus::Waiting);

        let (_, third) = join(&service, Tier::Bronze, 9).await;
        assert_eq!(third.lobby_id, first.lobby_id);
        assert_eq!(third.status, LobbyStatus::Countdown);
        assert_eq!(third.spin_force_total, Some(20));
        assert!(third.game_starts_at.is_some());
    }

    #[tokio::test]
    async fn late_join_routes_to_sibling_lobby() {
        let service = make_service();
        let (_, first) = join(&service, Tier::Bronze, 4).await;
        let _ = join(&service, Tier::Bronze, 7).await;
        let _ = join(&service, Tier::Bronze, 9).await;

        // The countdown lobby left WAITING; the next join must land in
        // a different lobby.
        let (_, fourth) = join(&service, Tier::Bronze, 5).await;
        assert_ne!(fourth.lobby_id, first.lobby_id);
        assert_eq!(fourth.status, LobbyStatus::Waiting);
    }

    #[tokio::test]
    async fn join_without_tickets_is_rejected_without_side_effects() {
        let service = make_service();
        let _ = service.initialize_all_lobbies().await;
        let user = UserId::new();

        let result = service.join_lobby(Tier::Bronze, user, 5).await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 0);
        assert!(service.ledger().entries_for(user, None).await.is_empty());

        for view in service.list_lobbies_for_admin(AdminLobbyFilter::default()).await {
            assert!(view.players.iter().all(|p| p.user_id != user));
        }
    }

    #[tokio::test]
    async fn join_debits_exactly_one_ticket() {
        let service = make_service();
        let user = UserId::new();
        fund(&service, user, Tier::Gold, 2).await;

        let result = service.join_lobby(Tier::Gold, user, 3).await;
        assert!(result.is_ok());
        assert_eq!(service.ledger().balance(user, Tier::Gold).await, 1);

        let entries = service.ledger().entries_for(user, Some(Tier::Gold)).await;
        let debit = entries.iter().find(|e| e.amount < 0);
        assert_eq!(debit.map(|e| e.amount), Some(-1));
        assert_eq!(debit.map(|e| e.reason), Some(LedgerReason::LobbyEntry));
    }

    #[tokio::test]
    async fn rejoin_changes_lucky_number_without_new_charge() {
        let service = make_service();
        let user = UserId::new();
        fund(&service, user, Tier::Bronze, 5).await;

        let first = service.join_lobby(Tier::Bronze, user, 4).await;
        let Ok(first) = first else {
            panic!("join failed");
        };
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 4);

        let second = service.join_lobby(Tier::Bronze, user, 8).await;
        let Ok(second) = second else {
            panic!("rejoin failed");
        };
        assert_eq!(second.lobby_id, first.lobby_id);
        assert_eq!(second.viewer_lucky_number, Some(8));
        // No second debit.
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 4);
    }

    #[tokio::test]
    async fn invalid_lucky_number_rejected_before_any_mutation() {
        let service = make_service();
        let user = UserId::new();
        fund(&service, user, Tier::Bronze, 1).await;

        for bad in [0, 1, 10, 255] {
            let result = service.join_lobby(Tier::Bronze, user, bad).await;
            assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        }
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 1);
    }

    #[tokio::test]
    async fn failed_seat_insert_refunds_the_debit() {
        let service = make_service();
        let user = UserId::new();
        fund(&service, user, Tier::Bronze, 3).await;

        // Seat the user directly so the insert inside join_target hits
        // the duplicate-seat constraint after the debit commits.
        let _ = service.initialize_all_lobbies().await;
        let candidates = service.waiting_candidates(Tier::Bronze).await;
        let Some(target) = candidates.first() else {
            panic!("no waiting lobby");
        };
        {
            let mut lobby = target.handle.write().await;
            let seeded = lobby.insert_seat(user, 5, EntryId::new());
            assert!(seeded.is_ok());
        }

        let result = service
            .join_target(&target.handle, Tier::Bronze, user, 6, Utc::now())
            .await;
        assert!(matches!(result, Err(EngineError::StateConflict(_))));

        // Net balance unchanged: the debit and an equal-and-opposite
        // refund are both on the ledger.
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 3);
        let entries = service.ledger().entries_for(user, Some(Tier::Bronze)).await;
        let debit = entries.iter().find(|e| e.reason == LedgerReason::LobbyEntry);
        let refund = entries.iter().find(|e| e.reason == LedgerReason::LobbyRefund);
        let (Some(debit), Some(refund)) = (debit, refund) else {
            panic!("expected debit and refund entries");
        };
        assert_eq!(debit.amount, -1);
        assert_eq!(refund.amount, 1);
        assert_eq!(
            refund.meta.get("refund_of").and_then(|v| v.as_str()),
            Some(debit.id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn advance_resolves_and_archives_exactly_once() {
        let service = make_service();
        let (_, snap) = join(&service, Tier::Bronze, 4).await;
        let _ = join(&service, Tier::Bronze, 7).await;
        let _ = join(&service, Tier::Bronze, 9).await;
        let lobby_id = snap.lobby_id;

        let later = Utc::now() + Duration::seconds(120);
        let status = service.advance_lobby_at(lobby_id, later).await;
        assert_eq!(status.ok(), Some(LobbyStatus::Resolved));
        assert_eq!(service.history().hot_count().await, 1);

        let game = service.history().for_lobby(lobby_id).await;
        let Some(game) = game else {
            panic!("history record missing");
        };
        assert_eq!(game.game_number, 1);
        assert_eq!(game.players.len(), 3);

        // Idempotent: advancing a resolved lobby records nothing new.
        let again = service
            .advance_lobby_at(lobby_id, later + Duration::seconds(60))
            .await;
        assert_eq!(again.ok(), Some(LobbyStatus::Resolved));
        assert_eq!(service.history().hot_count().await, 1);
        assert_eq!(service.history().max_game_number().await, 1);
    }

    #[tokio::test]
    async fn get_lobby_state_advances_lazily() {
        let service = make_service();
        let (viewer, snap) = join(&service, Tier::Bronze, 4).await;
        let _ = join(&service, Tier::Bronze, 7).await;
        let _ = join(&service, Tier::Bronze, 9).await;

        // A read after the countdown and spin windows have both passed
        // observes the final state without any scheduler involvement.
        let later = Utc::now() + Duration::seconds(120);
        let status = service.advance_lobby_at(snap.lobby_id, later).await;
        assert_eq!(status.ok(), Some(LobbyStatus::Resolved));

        let state = service.get_lobby_state(snap.lobby_id, viewer).await;
        let Ok(state) = state else {
            panic!("state read failed");
        };
        assert_eq!(state.status, LobbyStatus::Resolved);
        let Some(round) = state.round else {
            panic!("round missing from snapshot");
        };
        assert!(round.resolved_at.is_some());
        assert!(round.winning_segment >= 1);
    }

    #[tokio::test]
    async fn active_lobby_prefers_viewers_seat() {
        let service = make_service();
        let (viewer, snap) = join(&service, Tier::Bronze, 4).await;

        let state = service.get_active_lobby_state(Tier::Bronze, viewer).await;
        let Ok(state) = state else {
            panic!("lookup failed");
        };
        assert_eq!(state.lobby_id, snap.lobby_id);
        assert_eq!(state.viewer_lucky_number, Some(4));

        // A stranger gets the join candidate, not an error.
        let stranger = UserId::new();
        let state = service.get_active_lobby_state(Tier::Bronze, stranger).await;
        let Ok(state) = state else {
            panic!("lookup failed");
        };
        assert_eq!(state.status, LobbyStatus::Waiting);
        assert!(state.viewer_lucky_number.is_none());
    }

    #[tokio::test]
    async fn waiting_snapshot_hides_other_players_numbers() {
        let service = make_service();
        let (first, _) = join(&service, Tier::Bronze, 4).await;
        let (_, snap) = join(&service, Tier::Bronze, 7).await;

        let hidden = snap
            .players
            .iter()
            .find(|p| p.user_id == first)
            .and_then(|p| p.lucky_number);
        assert_eq!(hidden, None);
        assert_eq!(snap.viewer_lucky_number, Some(7));
    }

    #[tokio::test]
    async fn chat_requires_an_active_seat() {
        let service = make_service();
        let (user, snap) = join(&service, Tier::Bronze, 4).await;

        let posted = service
            .post_chat_message(snap.lobby_id, user, "good luck all")
            .await;
        assert!(posted.is_ok());

        let stranger = UserId::new();
        let result = service
            .post_chat_message(snap.lobby_id, stranger, "hi")
            .await;
        assert!(matches!(result, Err(EngineError::SeatNotFound { .. })));

        let messages = service.fetch_chat_messages(snap.lobby_id, 10).await;
        let Ok(messages) = messages else {
            panic!("fetch failed");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "good luck all");
    }

    #[tokio::test]
    async fn chat_fetch_returns_most_recent_in_order() {
        let service = make_service();
        let (user, snap) = join(&service, Tier::Bronze, 4).await;
        for i in 0..5 {
            let posted = service
                .post_chat_message(snap.lobby_id, user, &format!("msg {i}"))
                .await;
            assert!(posted.is_ok());
        }

        let messages = service.fetch_chat_messages(snap.lobby_id, 3).await;
        let Ok(messages) = messages else {
            panic!("fetch failed");
        };
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn admin_views_expose_debit_entry_ids() {
        let service = make_service();
        let (user, snap) = join(&service, Tier::Bronze, 4).await;

        let view = service.get_lobby_for_admin(snap.lobby_id).await;
        let Ok(view) = view else {
            panic!("admin view failed");
        };
        let seat = view.players.iter().find(|p| p.user_id == user);
        let Some(seat) = seat else {
            panic!("seat missing from admin view");
        };

        let entries = service.ledger().entries_for(user, Some(Tier::Bronze)).await;
        assert!(entries.iter().any(|e| e.id == seat.debit_entry_id));

        let filtered = service
            .list_lobbies_for_admin(AdminLobbyFilter {
                tier: Some(Tier::Bronze),
                status: Some(LobbyStatus::Waiting),
            })
            .await;
        assert!(filtered.iter().any(|v| v.lobby_id == snap.lobby_id));
    }

    #[tokio::test]
    async fn maintenance_cancels_stale_waiting_lobby_and_refunds() {
        let service = make_service();
        let (user, snap) = join(&service, Tier::Bronze, 4).await;
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 9);

        let timeout = Tier::Bronze.settings().wait_timeout_ms;
        let past_timeout =
            Utc::now() + Duration::milliseconds(i64::try_from(timeout).unwrap_or(i64::MAX) + 1_000);
        let report = service.run_maintenance_at(past_timeout).await;
        let Ok(report) = report else {
            panic!("maintenance failed");
        };
        assert_eq!(report.cancelled, 1);

        let view = service.get_lobby_for_admin(snap.lobby_id).await;
        assert_eq!(view.ok().map(|v| v.status), Some(LobbyStatus::Cancelled));
        assert_eq!(service.ledger().balance(user, Tier::Bronze).await, 10);
    }

    #[tokio::test]
    async fn maintenance_leaves_empty_lobbies_alone() {
        let service = make_service();
        let _ = service.initialize_all_lobbies().await;
        let before = service.registry().len().await;

        let far_future = Utc::now() + Duration::days(7);
        let report = service.run_maintenance_at(far_future).await;
        let Ok(report) = report else {
            panic!("maintenance failed");
        };
        assert_eq!(report.cancelled, 0);
        assert_eq!(service.registry().len().await, before);
    }

    #[tokio::test]
    async fn maintenance_prunes_terminal_lobbies_after_retention() {
        let service = make_service();
        let (_, snap) = join(&service, Tier::Bronze, 4).await;
        let _ = join(&service, Tier::Bronze, 7).await;
        let _ = join(&service, Tier::Bronze, 9).await;

        let resolve_at = Utc::now() + Duration::seconds(120);
        let status = service.advance_lobby_at(snap.lobby_id, resolve_at).await;
        assert_eq!(status.ok(), Some(LobbyStatus::Resolved));

        let retention = service.config.terminal_retention_secs;
        let past_retention =
            resolve_at + Duration::seconds(i64::try_from(retention).unwrap_or(i64::MAX) + 10);
        let report = service.run_maintenance_at(past_retention).await;
        let Ok(report) = report else {
            panic!("maintenance failed");
        };
        assert!(report.pruned >= 1);
        assert!(matches!(
            service.get_lobby_for_admin(snap.lobby_id).await,
            Err(EngineError::LobbyNotFound(_))
        ));
        // The permanent record survives the prune.
        assert!(service.history().for_lobby(snap.lobby_id).await.is_some());
    }

    #[tokio::test]
    async fn resolved_lobby_emits_event_with_game_number() {
        let service = make_service();
        let mut rx = service.event_bus().subscribe();
        let (_, snap) = join(&service, Tier::Bronze, 4).await;
        let _ = join(&service, Tier::Bronze, 7).await;
        let _ = join(&service, Tier::Bronze, 9).await;

        let later = Utc::now() + Duration::seconds(120);
        let status = service.advance_lobby_at(snap.lobby_id, later).await;
        assert_eq!(status.ok(), Some(LobbyStatus::Resolved));

        let mut saw_resolved = false;
        while let Ok(event) = rx.try_recv() {
            if let LobbyEvent::LobbyResolved {
                lobby_id,
                game_number,
                ..
            } = event
            {
                assert_eq!(lobby_id, snap.lobby_id);
                assert_eq!(game_number, 1);
                saw_resolved = true;
            }
        }
        assert!(saw_resolved);
    }
}
