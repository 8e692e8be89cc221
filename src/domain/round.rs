//! Spin round records.
//!
//! A [`LobbyRound`] is created exactly once, when its lobby enters
//! `Spinning`, and is immutable after `spin_completed_at` has passed
//! (only `resolved_at` is stamped afterwards). It stores the complete
//! server-authoritative timeline a client needs to replay the spin.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::LobbyId;
use super::spin::{self, SpinOutcome, SpinSeed};

/// Spin computation and timeline for one lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyRound {
    /// Tier-configured base component of the spin force.
    pub spin_force_base: u32,
    /// Sum of all active players' lucky numbers.
    pub spin_force_total: u32,
    /// `spin_force_base + spin_force_total`.
    pub spin_force_final: u32,
    /// Hex-encoded SHA-256 seed, recorded for audit.
    pub seed: String,
    /// Number of wheel segments (always 20).
    pub segment_count: u32,
    /// Winning segment, 1-indexed.
    pub winning_segment: u32,
    /// Lucky number painted on the winning segment.
    pub winning_number: u8,
    /// Wheel angle when the spin starts.
    pub rotation_start: f64,
    /// Wheel angle when the spin stops.
    pub rotation_end: f64,
    /// Total degrees travelled.
    pub spin_total_degrees: f64,
    /// Declared spin start instant.
    pub spin_started_at: DateTime<Utc>,
    /// Declared spin end instant; the outcome is observable from here.
    pub spin_completed_at: DateTime<Utc>,
    /// Stamped when the lobby transitions to `Resolved`.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LobbyRound {
    /// Computes the round for a lobby entering `Spinning`.
    ///
    /// Derives the seed from `(lobby_id, spin_force_final, started_at)`
    /// and resolves the full outcome before any snapshot can expose it.
    #[must_use]
    pub fn compute(
        lobby_id: LobbyId,
        spin_force_base: u32,
        spin_force_total: u32,
        started_at: DateTime<Utc>,
        spin_duration_ms: u64,
    ) -> Self {
        let spin_force_final = spin_force_base + spin_force_total;
        let seed: SpinSeed = spin::derive_seed(lobby_id, spin_force_final, started_at);
        let outcome: SpinOutcome = spin::resolve_spin(&seed, spin_force_final);

        let duration = Duration::milliseconds(i64::try_from(spin_duration_ms).unwrap_or(i64::MAX));

        Self {
            spin_force_base,
            spin_force_total,
            spin_force_final,
            seed: spin::seed_hex(&seed),
            segment_count: spin::SEGMENT_COUNT,
            winning_segment: outcome.winning_segment,
            winning_number: outcome.winning_number,
            rotation_start: outcome.rotation_start,
            rotation_end: outcome.rotation_end,
            spin_total_degrees: outcome.total_degrees,
            spin_started_at: started_at,
            spin_completed_at: started_at + duration,
            resolved_at: None,
        }
    }

    /// Wheel angle at `now` under the public ease-out-cubic replay curve.
    ///
    /// Every observer interpolating with this function converges on the
    /// identical final angle at `spin_completed_at` regardless of latency
    /// or frame rate. This is the client contract, exposed here for
    /// verification; the engine itself never animates.
    #[must_use]
    pub fn replay_rotation(&self, now: DateTime<Utc>) -> f64 {
        let window = (self.spin_completed_at - self.spin_started_at).num_milliseconds();
        if window <= 0 {
            return self.rotation_end;
        }
        let elapsed = (now - self.spin_started_at).num_milliseconds();
        #[allow(clippy::cast_precision_loss)]
        let t = elapsed as f64 / window as f64;
        self.rotation_start + (self.rotation_end - self.rotation_start) * spin::ease_out_cubic(t)
    }
}
