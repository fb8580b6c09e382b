//! Shared numeric helpers for indicator values.
//!
//! Scale-corrected vegetation indices are reported with 4 decimal places.
//! Rounding goes through `Decimal` so that values such as
//! `5000.0 * 0.0001 = 0.5000000000000001` come out as exactly `0.5`.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Round an f64 to 4 decimal places (half away from zero).
///
/// Non-finite inputs are returned unchanged; they cannot be represented as a
/// `Decimal` and callers treat them as "no data" anyway.
pub(crate) fn round_4dp(v: f64) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_4dp received non-finite value {}", v);
        return v;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(v)
}

/// Round an optional f64 to 4 decimal places, passing `None` through.
pub(crate) fn opt_round_4dp(v: Option<f64>) -> Option<f64> {
    v.map(round_4dp)
}
