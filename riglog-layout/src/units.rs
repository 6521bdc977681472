//! Conversion between real-world meters and workspace coordinates.
//!
//! The interactive surface and the export pages both go through these two
//! functions so their output agrees exactly.

/// Workspace units per meter.
pub const WORKSPACE_UNITS_PER_METER: f64 = 50.0;

/// Replace non-finite input with zero.
#[inline(always)]
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[inline(always)]
pub fn to_real_units(units: f64) -> f64 {
    finite_or_zero(units) / WORKSPACE_UNITS_PER_METER
}

#[inline(always)]
pub fn to_workspace_units(meters: f64) -> f64 {
    finite_or_zero(meters) * WORKSPACE_UNITS_PER_METER
}
