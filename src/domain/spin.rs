//! Deterministic spin outcome computation.
//!
//! The outcome of a spin is a pure function of a SHA-256 seed and the
//! aggregate spin force. It is computed exactly once, server-side, when a
//! lobby enters `Spinning`; clients only ever replay the declared
//! rotation timeline. No client-side physics can influence the result.
//!
//! Wheel geometry: 20 equal segments laid out clockwise, segment 1
//! starting at the fixed pointer position (top of the wheel) on the
//! unrotated wheel. Rotating the wheel clockwise by `r` degrees puts the
//! wheel-coordinate angle `(360 - r) mod 360` under the pointer.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::ids::LobbyId;

/// Number of equally-sized wheel segments.
pub const SEGMENT_COUNT: u32 = 20;

/// Angular width of one segment in degrees.
pub const SEGMENT_DEGREES: f64 = 360.0 / SEGMENT_COUNT as f64;

/// Full rotations every spin performs regardless of force.
pub const MIN_FULL_ROTATIONS: u32 = 4;

/// Spin force required per additional full rotation beyond the minimum.
pub const FORCE_PER_EXTRA_ROTATION: u32 = 25;

/// Step used when searching forward for the winning stop angle.
const SEARCH_STEP_DEGREES: f64 = 0.5;

/// Inclusive lower bound of the lucky number range.
pub const LUCKY_NUMBER_MIN: u8 = 2;

/// Inclusive upper bound of the lucky number range.
pub const LUCKY_NUMBER_MAX: u8 = 9;

/// Seed bytes for one spin.
pub type SpinSeed = [u8; 32];

/// Everything the seed determines about a spin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinOutcome {
    /// Winning segment, 1-indexed in `[1, SEGMENT_COUNT]`.
    pub winning_segment: u32,
    /// Lucky number painted on the winning segment.
    pub winning_number: u8,
    /// Seed-derived cosmetic starting angle in `[0, 360)`.
    pub rotation_start: f64,
    /// Final wheel angle; the pointer maps to `winning_segment` here.
    pub rotation_end: f64,
    /// `rotation_end - rotation_start`.
    pub total_degrees: f64,
    /// Number of complete rotations the wheel performs.
    pub full_rotations: u32,
}

/// Derives the spin seed from the lobby id, the final spin force, and the
/// spin start timestamp.
///
/// The timestamp makes seeds unpredictable ahead of the countdown firing
/// while keeping the outcome reproducible from the recorded inputs.
#[must_use]
pub fn derive_seed(lobby_id: LobbyId, spin_force_final: u32, at: DateTime<Utc>) -> SpinSeed {
    let mut hasher = Sha256::new();
    hasher.update(lobby_id.as_uuid().as_bytes());
    hasher.update(spin_force_final.to_be_bytes());
    hasher.update(at.timestamp_millis().to_be_bytes());
    hasher.finalize().into()
}

/// Hex encoding of a seed for audit records.
#[must_use]
pub fn seed_hex(seed: &SpinSeed) -> String {
    seed.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Lucky number painted on the given 1-indexed segment.
///
/// Segments are painted cyclically with the lucky range `[2, 9]`, so all
/// eight numbers appear on the 20-segment wheel.
#[must_use]
pub const fn segment_number(segment: u32) -> u8 {
    LUCKY_NUMBER_MIN + ((segment - 1) % 8) as u8
}

/// Returns the 1-indexed segment under the fixed pointer when the wheel
/// has been rotated clockwise by `rotation` degrees.
#[must_use]
pub fn segment_at_pointer(rotation: f64) -> u32 {
    let wheel_angle = (360.0 - rotation.rem_euclid(360.0)).rem_euclid(360.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = (wheel_angle / SEGMENT_DEGREES) as u32 % SEGMENT_COUNT;
    index + 1
}

/// Ease-out-cubic easing. The publicly-known replay curve: every client
/// interpolates rotation with this exact function so all observers agree
/// on the wheel angle at every instant.
#[must_use]
pub fn ease_out_cubic(t: f64) -> f64 {
    let clamped = t.clamp(0.0, 1.0);
    1.0 - (1.0 - clamped).powi(3)
}

/// Computes the full spin outcome from a seed and the final spin force.
///
/// Pure: identical inputs always produce the identical outcome.
#[must_use]
pub fn resolve_spin(seed: &SpinSeed, spin_force_final: u32) -> SpinOutcome {
    let winning_segment =
        u32::from_be_bytes([seed[0], seed[1], seed[2], seed[3]]) % SEGMENT_COUNT + 1;
    let rotation_start = f64::from(u32::from_be_bytes([seed[4], seed[5], seed[6], seed[7]]) % 360);

    let full_rotations = MIN_FULL_ROTATIONS + spin_force_final / FORCE_PER_EXTRA_ROTATION;
    let baseline = rotation_start + f64::from(full_rotations) * 360.0;

    // Smallest forward offset that parks the pointer on the winning
    // segment. The step divides the segment width evenly, so the search
    // always terminates within one further revolution.
    let mut rotation_end = baseline;
    while segment_at_pointer(rotation_end) != winning_segment {
        rotation_end += SEARCH_STEP_DEGREES;
    }

    SpinOutcome {
        winning_segment,
        winning_number: segment_number(winning_segment),
        rotation_start,
        rotation_end,
        total_degrees: rotation_end - rotation_start,
        full_rotations,
    }
}
