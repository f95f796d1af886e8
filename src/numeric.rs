//! Normalization of broker-supplied numeric fields.
//!
//! The gateway reports "no data" in several ways: an absent field, `0`, a
//! negative sentinel such as `-1`, NaN, or the API's unset double
//! (`f64::MAX`). Callers should see `None` for all of these, not a literal
//! zero.

/// The API's marker for an unset double field.
pub const UNSET_DOUBLE: f64 = f64::MAX;

/// Returns `value` when it is a usable positive number, otherwise `default`.
///
/// Unset, zero, negative, non-finite and [`UNSET_DOUBLE`] inputs all map to
/// `default`.
pub fn positive_or(value: Option<f64>, default: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 && v != UNSET_DOUBLE => Some(v),
        _ => default,
    }
}

/// Like [`positive_or`] but keeps negative values.
///
/// For signed quantities such as profit and loss, where a negative number is
/// real data and only unset/non-finite values mean "unknown".
pub fn finite_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() && v != UNSET_DOUBLE => v,
        _ => default,
    }
}
