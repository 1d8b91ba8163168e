//! Numerical stability utilities.
//!
//! Provides safe implementations of the scalar transforms used throughout the
//! EM engine: the logit / logistic pair that maps proportions in `(0, 1)` to
//! the latent normal scale, the Fisher z pair that maps correlations to the
//! real line, and the per-coordinate parameter transform used by the
//! convergence test and the SEM ratios.
//!
//! # Provided items
//! - [`UNIT_EDGE`]: clamp distance used for covariates and observed latent
//!   proportions sitting on 0 or 1 (default 1e-4).
//! - [`Y_EDGE_MARGIN`]: distance from 0/1 below which a regular unit's
//!   tomography line is treated as a point (default 0.01).
//! - [`logit`], [`safe_logistic`]: map `(0, 1) ↔ ℝ`.
//! - [`fisher_z`], [`inverse_fisher_z`]: map `(−1, 1) ↔ ℝ`.
//! - [`CoordKind`], [`transform_coordinate`], [`untransform_coordinate`]:
//!   the bijective parameter transform, one coordinate at a time.
//!
//! # Rationale
//! The moment equations always operate in natural parameters. The
//! transformed space only exists so that differences between consecutive
//! iterates are measured on an unbounded, roughly additive scale.

/// Distance from 0 and 1 used when clamping covariates and observed latent
/// proportions (`X ≥ 1 → 1 − UNIT_EDGE`, `X ≤ 0 → UNIT_EDGE`).
pub const UNIT_EDGE: f64 = 1e-4;

/// A regular unit whose `Y` lies within this distance of 0 or 1 skips line
/// integration; both latent coordinates are set to `logit(Y)`.
pub const Y_EDGE_MARGIN: f64 = 0.01;

/// Kind of a natural-parameter coordinate, which decides its transform.
///
/// - `Mean`: identity.
/// - `Variance`: natural log forward, exponential inverse.
/// - `Correlation`: Fisher z forward, hyperbolic tangent inverse.
/// - `Coefficient`: identity (regression slopes are already unconstrained).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordKind {
    Mean,
    Variance,
    Correlation,
    Coefficient,
}

/// Clamp a proportion into `[UNIT_EDGE, 1 − UNIT_EDGE]`.
///
/// Values at or beyond the boundaries are pulled inside so that [`logit`]
/// stays finite. Interior values are returned unchanged.
pub fn clamp_unit(p: f64) -> f64 {
    if p >= 1.0 - UNIT_EDGE {
        1.0 - UNIT_EDGE
    } else if p <= UNIT_EDGE {
        UNIT_EDGE
    } else {
        p
    }
}

/// Log-odds `ln(p / (1 − p))` for `p ∈ (0, 1)`.
///
/// Written as `ln p − ln1p(−p)` to keep precision when `p` is close to 0.
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Numerically stable logistic `1 / (1 + exp(−x))`.
///
/// Branches on the sign of `x` so that `exp` is only ever evaluated at a
/// non-positive argument.
pub fn safe_logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Fisher z transform `0.5 · ln((1 + r) / (1 − r))` for `r ∈ (−1, 1)`.
pub fn fisher_z(r: f64) -> f64 {
    0.5 * ((1.0 + r) / (1.0 - r)).ln()
}

/// Inverse Fisher z transform `(e^{2z} − 1) / (e^{2z} + 1)`.
///
/// Evaluated as `tanh(z)`, which is the same function without overflow for
/// large `|z|`.
pub fn inverse_fisher_z(z: f64) -> f64 {
    z.tanh()
}

/// Map one natural-parameter coordinate to the unconstrained scale.
pub fn transform_coordinate(kind: CoordKind, value: f64) -> f64 {
    match kind {
        CoordKind::Mean | CoordKind::Coefficient => value,
        CoordKind::Variance => value.ln(),
        CoordKind::Correlation => fisher_z(value),
    }
}

/// Inverse of [`transform_coordinate`].
pub fn untransform_coordinate(kind: CoordKind, value: f64) -> f64 {
    match kind {
        CoordKind::Mean | CoordKind::Coefficient => value,
        CoordKind::Variance => value.exp(),
        CoordKind::Correlation => inverse_fisher_z(value),
    }
}

/// Derivative `dθ/dφ` of the inverse transform at the natural value `value`.
///
/// Used by the delta method when standard errors computed on the transformed
/// scale are mapped back to natural parameters.
pub fn untransform_derivative(kind: CoordKind, value: f64) -> f64 {
    match kind {
        CoordKind::Mean | CoordKind::Coefficient => 1.0,
        CoordKind::Variance => value,
        CoordKind::Correlation => 1.0 - value * value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Agreement of the stable logit/logistic pair with naive formulas.
    // - Fisher z round trips and the closed form of the inverse.
    // - Exact inversion of the per-coordinate transform for every kind.
    //
    // They intentionally DO NOT cover:
    // - Whole-vector transforms; those live with `Theta` in `model::core::params`.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Check `logit` and `safe_logistic` against naive formulas and each other.
    //
    // Given
    // -----
    // - A grid of proportions inside (0, 1) and reals on both sides of 0.
    //
    // Expect
    // ------
    // - `logit(p)` equals `ln(p / (1 − p))`; `safe_logistic(logit(p)) == p`.
    fn logit_and_logistic_are_inverse() {
        for &p in &[1e-4_f64, 0.01, 0.2, 0.5, 0.73, 0.99, 1.0 - 1e-4] {
            let naive = (p / (1.0 - p)).ln();
            assert_relative_eq!(logit(p), naive, epsilon = 1e-12, max_relative = 1e-12);
            assert_relative_eq!(safe_logistic(logit(p)), p, epsilon = 1e-12);
        }
        assert_relative_eq!(safe_logistic(-800.0), 0.0, epsilon = 1e-300);
        assert_relative_eq!(safe_logistic(800.0), 1.0);
    }

    #[test]
    // Purpose
    // -------
    // Verify the Fisher z pair matches the documented closed forms.
    //
    // Given
    // -----
    // - Correlations spread over (−1, 1).
    //
    // Expect
    // ------
    // - `inverse_fisher_z(z) == (e^{2z} − 1) / (e^{2z} + 1)` and the pair
    //   round-trips.
    fn fisher_z_round_trip_matches_closed_form() {
        for &r in &[-0.999, -0.5, 0.0, 0.3, 0.95] {
            let z = fisher_z(r);
            let e2z = (2.0 * z).exp();
            assert_relative_eq!(inverse_fisher_z(z), (e2z - 1.0) / (e2z + 1.0), epsilon = 1e-12);
            assert_relative_eq!(inverse_fisher_z(z), r, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure every coordinate kind is exactly inverted by its untransform.
    //
    // Given
    // -----
    // - One admissible value per kind.
    //
    // Expect
    // ------
    // - `untransform(transform(v)) == v` up to rounding.
    fn coordinate_transform_round_trips() {
        let cases = [
            (CoordKind::Mean, -1.7),
            (CoordKind::Variance, 0.042),
            (CoordKind::Correlation, -0.61),
            (CoordKind::Coefficient, 3.25),
        ];
        for (kind, v) in cases {
            let back = untransform_coordinate(kind, transform_coordinate(kind, v));
            assert_relative_eq!(back, v, epsilon = 1e-12, max_relative = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Confirm edge clamping only touches values on or beyond the boundary band.
    //
    // Given
    // -----
    // - 0, 1, and an interior proportion.
    //
    // Expect
    // ------
    // - 0 → UNIT_EDGE, 1 → 1 − UNIT_EDGE, interior unchanged.
    fn clamp_unit_pulls_boundaries_inside() {
        assert_eq!(clamp_unit(0.0), UNIT_EDGE);
        assert_eq!(clamp_unit(1.0), 1.0 - UNIT_EDGE);
        assert_eq!(clamp_unit(-3.0), UNIT_EDGE);
        assert_eq!(clamp_unit(0.37), 0.37);
    }
}
