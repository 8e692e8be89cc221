//! Ticket wallet service: atomic balance mutations plus the ledger log.
//!
//! Every mutation validates its inputs, applies the balance change, and
//! appends exactly one [`LedgerEntry`] while holding the wallet's write
//! lock, so no interleaving can observe a balance that disagrees with
//! the ledger. Debits are conditional decrements under that same lock:
//! two concurrent consumes can never overdraw a wallet.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::event_bus::{EventBus, LobbyEvent};
use crate::domain::ids::{EntryId, UserId};
use crate::domain::tier::Tier;
use crate::domain::wallet::{LedgerEntry, LedgerReason, Wallet};
use crate::error::EngineError;
use crate::persistence::postgres::PostgresPersistence;

/// Wallet ledger service.
///
/// Wallets are created lazily on first access and live forever. The
/// entry log is append-only; when a PostgreSQL mirror is attached,
/// entries are also written there best-effort for durable audit.
#[derive(Debug)]
pub struct WalletLedger {
    wallets: RwLock<HashMap<UserId, Arc<RwLock<Wallet>>>>,
    entries: RwLock<Vec<LedgerEntry>>,
    event_bus: EventBus,
    persistence: Option<Arc<PostgresPersistence>>,
}

impl WalletLedger {
    /// Creates a ledger with no durable mirror.
    #[must_use]
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
            entries: RwLock::new(Vec::new()),
            event_bus,
            persistence: None,
        }
    }

    /// Attaches a PostgreSQL audit mirror.
    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<PostgresPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    async fn wallet_handle(&self, user_id: UserId) -> Arc<RwLock<Wallet>> {
        {
            let map = self.wallets.read().await;
            if let Some(handle) = map.get(&user_id) {
                return Arc::clone(handle);
            }
        }
        let mut map = self.wallets.write().await;
        Arc::clone(
            map.entry(user_id)
                .or_insert_with(|| Arc::new(RwLock::new(Wallet::new(user_id)))),
        )
    }

    /// Returns a copy of the user's wallet, creating it lazily.
    ///
    /// Tiers missing from a stored wallet are backfilled to 0 first.
    pub async fn get_wallet(&self, user_id: UserId) -> Wallet {
        let handle = self.wallet_handle(user_id).await;
        let mut wallet = handle.write().await;
        wallet.backfill_tiers();
        wallet.clone()
    }

    /// Returns the user's balance for one tier.
    pub async fn balance(&self, user_id: UserId, tier: Tier) -> u64 {
        let handle = self.wallet_handle(user_id).await;
        handle.read().await.balance(tier)
    }

    /// Returns the user's total ticket count across all tiers.
    pub async fn total_tickets(&self, user_id: UserId) -> u64 {
        let handle = self.wallet_handle(user_id).await;
        handle.read().await.total()
    }

    /// Credits `amount` tickets of `tier` to the user.
    ///
    /// Never fails on balance grounds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if `amount` is zero or does
    /// not fit the signed ledger representation.
    pub async fn add_tickets(
        &self,
        user_id: UserId,
        tier: Tier,
        amount: u64,
        reason: LedgerReason,
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<LedgerEntry, EngineError> {
        let signed = validate_amount(amount)?;
        let handle = self.wallet_handle(user_id).await;
        let mut wallet = handle.write().await;

        let balance = wallet.balances.entry(tier).or_insert(0);
        *balance = balance.saturating_add(amount);
        wallet.updated_at = Utc::now();

        let entry = self
            .append_entry(user_id, tier, signed, reason, meta)
            .await;
        drop(wallet);

        tracing::debug!(%user_id, %tier, amount, ?reason, "tickets credited");
        self.mirror_and_publish(&entry).await;
        Ok(entry)
    }

    /// Debits `amount` tickets of `tier` from the user.
    ///
    /// The balance check and decrement happen under the wallet's write
    /// lock; on failure the wallet and ledger are untouched.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] if `amount` is zero or oversized.
    /// - [`EngineError::InsufficientBalance`] if `balance < amount`.
    pub async fn consume_tickets(
        &self,
        user_id: UserId,
        tier: Tier,
        amount: u64,
        reason: LedgerReason,
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> Result<LedgerEntry, EngineError> {
        let signed = validate_amount(amount)?;
        let handle = self.wallet_handle(user_id).await;
        let mut wallet = handle.write().await;

        let available = wallet.balance(tier);
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                tier,
                requested: amount,
                available,
            });
        }
        wallet.balances.insert(tier, available - amount);
        wallet.updated_at = Utc::now();

        let entry = self
            .append_entry(user_id, tier, -signed, reason, meta)
            .await;
        drop(wallet);

        tracing::debug!(%user_id, %tier, amount, ?reason, "tickets consumed");
        self.mirror_and_publish(&entry).await;
        Ok(entry)
    }

    /// Returns all ledger entries for a user, optionally filtered by tier,
    /// in append order.
    pub async fn entries_for(&self, user_id: UserId, tier: Option<Tier>) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.user_id == user_id && tier.is_none_or(|t| e.tier == t))
            .cloned()
            .collect()
    }

    // Must be called while holding the wallet write lock so the entry
    // log can never disagree with an observed balance.
    async fn append_entry(
        &self,
        user_id: UserId,
        tier: Tier,
        amount: i64,
        reason: LedgerReason,
        meta: serde_json::Map<String, serde_json::Value>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: EntryId::new(),
            user_id,
            tier,
            amount,
            reason,
            meta,
            created_at: Utc::now(),
        };
        self.entries.write().await.push(entry.clone());
        entry
    }

    async fn mirror_and_publish(&self, entry: &LedgerEntry) {
        if let Some(persistence) = &self.persistence
            && let Err(err) = persistence.append_ledger_entry(entry).await
        {
            // The in-memory ledger is the source of truth; a mirror
            // failure must not fail the wallet operation.
            tracing::warn!(entry_id = %entry.id, %err, "ledger mirror write failed");
        }
        let _ = self.event_bus.publish(LobbyEvent::WalletMutated {
            user_id: entry.user_id,
            tier: entry.tier,
            amount: entry.amount,
            reason: entry.reason,
            entry_id: entry.id,
            timestamp: entry.created_at,
        });
    }
}

fn validate_amount(amount: u64) -> Result<i64, EngineError> {
    if amount == 0 {
        return Err(EngineError::InvalidInput(
            "ticket amount must be positive".to_string(),
        ));
    }
    i64::try_from(amount)
        .map_err(|_| EngineError::InvalidInput(format!("ticket amount {amount} is out of range")))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_ledger() -> WalletLedger {
        WalletLedger::new(EventBus::new(64))
    }

    fn meta() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[tokio::test]
    async fn wallet_created_lazily_with_zero_balances() {
        let ledger = make_ledger();
        let user = UserId::new();
        let wallet = ledger.get_wallet(user).await;
        assert_eq!(wallet.user_id, user);
        assert_eq!(wallet.total(), 0);
        assert_eq!(wallet.balances.len(), Tier::ALL.len());
    }

    #[tokio::test]
    async fn add_then_consume_round_trips() {
        let ledger = make_ledger();
        let user = UserId::new();

        let credit = ledger
            .add_tickets(user, Tier::Bronze, 3, LedgerReason::Reward, meta())
            .await;
        assert!(credit.is_ok());
        assert_eq!(ledger.balance(user, Tier::Bronze).await, 3);

        let debit = ledger
            .consume_tickets(user, Tier::Bronze, 2, LedgerReason::LobbyEntry, meta())
            .await;
        assert!(debit.is_ok());
        assert_eq!(ledger.balance(user, Tier::Bronze).await, 1);
        assert_eq!(ledger.total_tickets(user).await, 1);
    }

    #[tokio::test]
    async fn consume_with_insufficient_balance_leaves_wallet_untouched() {
        let ledger = make_ledger();
        let user = UserId::new();

        let result = ledger
            .consume_tickets(user, Tier::Bronze, 1, LedgerReason::LobbyEntry, meta())
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientBalance {
                requested: 1,
                available: 0,
                ..
            })
        ));
        assert_eq!(ledger.balance(user, Tier::Bronze).await, 0);
        assert!(ledger.entries_for(user, None).await.is_empty());
    }

    #[tokio::test]
    async fn ledger_entries_sum_to_balance() {
        let ledger = make_ledger();
        let user = UserId::new();

        let _ = ledger
            .add_tickets(user, Tier::Gold, 5, LedgerReason::Reward, meta())
            .await;
        let _ = ledger
            .consume_tickets(user, Tier::Gold, 2, LedgerReason::LobbyEntry, meta())
            .await;
        let _ = ledger
            .add_tickets(user, Tier::Gold, 1, LedgerReason::LobbyRefund, meta())
            .await;

        let sum: i64 = ledger
            .entries_for(user, Some(Tier::Gold))
            .await
            .iter()
            .map(|e| e.amount)
            .sum();
        let balance = ledger.balance(user, Tier::Gold).await;
        assert_eq!(sum, 4);
        assert_eq!(i64::try_from(balance).ok(), Some(sum));
    }

    #[tokio::test]
    async fn zero_amount_rejected_before_mutation() {
        let ledger = make_ledger();
        let user = UserId::new();
        let result = ledger
            .add_tickets(user, Tier::Bronze, 0, LedgerReason::Reward, meta())
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert!(ledger.entries_for(user, None).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_consumes_never_overdraw() {
        let ledger = Arc::new(make_ledger());
        let user = UserId::new();
        let _ = ledger
            .add_tickets(user, Tier::Bronze, 1, LedgerReason::Reward, meta())
            .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .consume_tickets(user, Tier::Bronze, 1, LedgerReason::LobbyEntry, meta())
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if matches!(handle.await, Ok(Ok(_))) {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(ledger.balance(user, Tier::Bronze).await, 0);
    }

    #[tokio::test]
    async fn mutations_publish_wallet_events() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let ledger = WalletLedger::new(bus);
        let user = UserId::new();

        let _ = ledger
            .add_tickets(user, Tier::Bronze, 1, LedgerReason::Reward, meta())
            .await;
        let event = rx.recv().await;
        let Ok(event) = event else {
            panic!("expected event");
        };
        assert_eq!(event.event_type_str(), "wallet_mutated");
    }
}
