//! tomography — line geometry, logit-normal densities, and line integrals.
//!
//! Purpose
//! -------
//! Provide the pure numerical building blocks a regular unit needs in the
//! E-step: the feasible segment of `W1` implied by `(X, Y)`, the logit-normal
//! density along that segment, its log normalizing constant, and posterior
//! expectations of the latent moments.
//!
//! Key behaviors
//! -------------
//! - [`LineSegment::new`] computes `W1 ∈ [max(0, (Y − (1 − X))/X), min(1, Y/X)]`
//!   and maps `W1 ↦ W2 = (Y − X·W1)/(1 − X)`.
//! - [`BivariateNormal`] evaluates `ln φ₂` through the factorization
//!   `ln φ(a; m1, sd1) + ln φ(b; m2 + slope·(a − m1), sd2|1)` on top of
//!   `statrs::distribution::Normal`.
//! - [`integrate_line`] runs the fixed rule of `model::core::quadrature`
//!   once and returns every moment the E-step consumes together with the
//!   log mass. Weights are summed on the log scale relative to the largest
//!   node.
//! - [`regular_log_likelihood`], [`x1_log_likelihood`],
//!   [`x0_log_likelihood`] and [`survey_log_likelihood`] give each unit
//!   kind's log-likelihood contribution.
//!
//! Invariants & assumptions
//! ------------------------
//! - `X ∈ (0, 1)` (clamped at data load) and `Y` strictly inside the edge
//!   band; edge units never reach this module.
//! - Nodes whose `(W1, W2)` falls outside the open unit square contribute
//!   zero.
//!
//! Conventions
//! -----------
//! - The density integrated along the line is the density of `(W1, Y)`
//!   up to the factor `1/(1 − X)`; the regular-unit log-likelihood adds
//!   `−ln(1 − X)` to `ln_mass`.
//!
//! Testing notes
//! -------------
//! - Unit tests compare the rule with a brute-force midpoint sum, check the
//!   tomography identity for posterior natural-scale means, and check the
//!   closed forms of the homogeneous and survey densities.
use crate::{
    model::errors::{EcoError, EcoResult},
    optimization::numerical_stability::transformations::logit,
};
use nalgebra::{Matrix2, Vector2};
use statrs::distribution::{Continuous, Normal};

use super::quadrature::line_nodes;

/// `W2` on the tomography line at `W1`.
pub fn w2_from_w1(x: f64, y: f64, w1: f64) -> f64 {
    (y - x * w1) / (1.0 - x)
}

/// `W1` on the tomography line at `W2`.
pub fn w1_from_w2(x: f64, y: f64, w2: f64) -> f64 {
    (y - (1.0 - x) * w2) / x
}

/// Feasible `W1` interval for one regular unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub x: f64,
    pub y: f64,
    pub lower: f64,
    pub upper: f64,
}

impl LineSegment {
    pub fn new(x: f64, y: f64) -> Self {
        let lower = ((y - (1.0 - x)) / x).max(0.0);
        let upper = (y / x).min(1.0);
        LineSegment { x, y, lower, upper }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Bivariate normal over `(W1*, W2*)` in factorized form.
#[derive(Debug, Clone)]
pub struct BivariateNormal {
    m1: f64,
    m2: f64,
    sd1: f64,
    sd2: f64,
    slope: f64,
    csd: f64,
    std: Normal,
}

impl BivariateNormal {
    /// Errors
    /// ------
    /// - [`EcoError::SingularModel`] when a marginal or conditional standard
    ///   deviation is not finite and positive.
    pub fn new(mean: &Vector2<f64>, sigma: &Matrix2<f64>) -> EcoResult<Self> {
        let s11 = sigma[(0, 0)];
        let s22 = sigma[(1, 1)];
        let s12 = sigma[(0, 1)];
        let cond_var = s22 - s12 * s12 / s11;
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if !ok(s11) || !ok(s22) || !ok(cond_var) {
            return Err(EcoError::SingularModel {
                context: "bivariate normal needs positive variances",
            });
        }
        let std = Normal::new(0.0, 1.0)
            .map_err(|_| EcoError::SingularModel { context: "standard normal construction" })?;
        Ok(BivariateNormal {
            m1: mean[0],
            m2: mean[1],
            sd1: s11.sqrt(),
            sd2: s22.sqrt(),
            slope: s12 / s11,
            csd: cond_var.sqrt(),
            std,
        })
    }

    pub fn ln_pdf(&self, a: f64, b: f64) -> f64 {
        let za = (a - self.m1) / self.sd1;
        let zb = (b - self.m2 - self.slope * (a - self.m1)) / self.csd;
        self.std.ln_pdf(za) - self.sd1.ln() + self.std.ln_pdf(zb) - self.csd.ln()
    }

    /// Log density of the first coordinate alone.
    pub fn ln_pdf_first(&self, a: f64) -> f64 {
        self.std.ln_pdf((a - self.m1) / self.sd1) - self.sd1.ln()
    }

    /// Log density of the second coordinate alone.
    pub fn ln_pdf_second(&self, b: f64) -> f64 {
        self.std.ln_pdf((b - self.m2) / self.sd2) - self.sd2.ln()
    }
}

/// Posterior moments of one regular unit, all from a single pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMoments {
    /// `ln ∫ f(W1, W2(W1)) dW1`.
    pub ln_mass: f64,
    /// `E[W1*], E[W2*], E[W1*²], E[W2*²], E[W1*·W2*]`.
    pub w_star: [f64; 5],
    /// `E[W1], E[W2]` on the natural scale.
    pub w: [f64; 2],
}

/// One usable quadrature node on the line.
#[derive(Debug, Clone, Copy)]
struct LinePoint {
    w1: f64,
    w2: f64,
    a: f64,
    b: f64,
    /// Log of density times Jacobian times quadrature weight.
    ln_weight: f64,
}

/// Every node whose `(W1, W2)` lies in the open unit square.
fn line_points(seg: &LineSegment, bvn: &BivariateNormal) -> Vec<LinePoint> {
    let width = seg.width();
    if width <= 0.0 {
        return Vec::new();
    }
    line_nodes()
        .iter()
        .filter_map(|node| {
            let w1 = seg.lower + width * node.u;
            let w2 = w2_from_w1(seg.x, seg.y, w1);
            if !(w1 > 0.0 && w1 < 1.0 && w2 > 0.0 && w2 < 1.0) {
                return None;
            }
            let (a, b) = (logit(w1), logit(w2));
            let ln_jac = (w1 * (1.0 - w1) * w2 * (1.0 - w2)).ln();
            let ln_weight = bvn.ln_pdf(a, b) - ln_jac + (width * node.weight).ln();
            Some(LinePoint { w1, w2, a, b, ln_weight })
        })
        .collect()
}

/// Every E-step moment of a regular unit in one pass.
///
/// Node weights are accumulated relative to the largest one, so a line far
/// out in the tails of the density keeps finite moments and a finite
/// `ln_mass`.
///
/// Errors
/// ------
/// - [`EcoError::DegenerateIntegral`] when no node carries a finite weight
///   or a moment comes out non-finite.
pub fn integrate_line(
    seg: &LineSegment, bvn: &BivariateNormal, unit: usize,
) -> EcoResult<LineMoments> {
    let points = line_points(seg, bvn);
    let peak = points.iter().map(|p| p.ln_weight).fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() {
        return Err(EcoError::DegenerateIntegral { unit, ln_mass: peak });
    }

    let mut total = 0.0;
    let mut s = [0.0; 7];
    for p in &points {
        let d = (p.ln_weight - peak).exp();
        total += d;
        s[0] += d * p.a;
        s[1] += d * p.b;
        s[2] += d * p.a * p.a;
        s[3] += d * p.b * p.b;
        s[4] += d * p.a * p.b;
        s[5] += d * p.w1;
        s[6] += d * p.w2;
    }
    let ln_mass = peak + total.ln();
    let inv = 1.0 / total;
    let moments = LineMoments {
        ln_mass,
        w_star: [s[0] * inv, s[1] * inv, s[2] * inv, s[3] * inv, s[4] * inv],
        w: [s[5] * inv, s[6] * inv],
    };
    let finite = ln_mass.is_finite()
        && moments.w_star.iter().chain(moments.w.iter()).all(|v| v.is_finite());
    if !finite {
        return Err(EcoError::DegenerateIntegral { unit, ln_mass });
    }
    Ok(moments)
}

/// Log-likelihood of a regular unit's observed `Y` given its log mass.
pub fn regular_log_likelihood(x: f64, ln_mass: f64) -> f64 {
    ln_mass - (1.0 - x).ln()
}

/// Log density of an observed `W1` under the logit-normal marginal.
pub fn x1_log_likelihood(bvn: &BivariateNormal, w1: f64) -> f64 {
    bvn.ln_pdf_first(logit(w1)) - (w1 * (1.0 - w1)).ln()
}

/// Log density of an observed `W2` under the logit-normal marginal.
pub fn x0_log_likelihood(bvn: &BivariateNormal, w2: f64) -> f64 {
    bvn.ln_pdf_second(logit(w2)) - (w2 * (1.0 - w2)).ln()
}

/// Log density of an observed pair `(W1, W2)` under the logit-normal.
pub fn survey_log_likelihood(bvn: &BivariateNormal, w1: f64, w2: f64) -> f64 {
    bvn.ln_pdf(logit(w1), logit(w2)) - (w1 * (1.0 - w1) * w2 * (1.0 - w2)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Segment bounds for interior and clipped cases.
    // - The factorized bivariate density against the closed form.
    // - Line moments against a brute-force midpoint sum.
    // - Tail-of-density lines that would underflow a linear-scale sum.
    // - The tomography identity for natural-scale posterior means.
    //
    // They intentionally DO NOT cover:
    // - Edge-policy units (handled in `em::expectation`).
    // -------------------------------------------------------------------------

    fn bvn(m1: f64, m2: f64, s11: f64, s22: f64, rho: f64) -> BivariateNormal {
        let s12 = rho * (s11 * s22).sqrt();
        BivariateNormal::new(&Vector2::new(m1, m2), &Matrix2::new(s11, s12, s12, s22)).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Segment bounds clip to [0, 1].
    //
    // Given
    // -----
    // - (X, Y) = (0.3, 0.4) and (0.8, 0.9).
    //
    // Expect
    // ------
    // - [0, 1] for the first; [(0.9 − 0.2)/0.8, 1] for the second.
    fn segment_bounds_clip_to_unit_interval() {
        let a = LineSegment::new(0.3, 0.4);
        assert_eq!((a.lower, a.upper), (0.0, 1.0));

        let b = LineSegment::new(0.8, 0.9);
        assert_relative_eq!(b.lower, 0.7 / 0.8, epsilon = 1e-15);
        assert_eq!(b.upper, 1.0);
    }

    #[test]
    // Purpose
    // -------
    // The factorized log density equals the textbook bivariate normal.
    //
    // Given
    // -----
    // - μ = (0.3, −0.2), s11 = 1.4, s22 = 0.6, ρ = −0.45, a point (0.9, 0.1).
    //
    // Expect
    // ------
    // - Agreement to 1e-12.
    fn bivariate_density_matches_closed_form() {
        let (m1, m2, s11, s22, rho) = (0.3, -0.2, 1.4, 0.6, -0.45);
        let d = bvn(m1, m2, s11, s22, rho);
        let (a, b) = (0.9, 0.1);
        let s12 = rho * (s11 * s22).sqrt();
        let det = s11 * s22 - s12 * s12;
        let (d1, d2) = (a - m1, b - m2);
        let q = (s22 * d1 * d1 - 2.0 * s12 * d1 * d2 + s11 * d2 * d2) / det;
        let expected = -(2.0 * PI).ln() - 0.5 * det.ln() - 0.5 * q;

        assert_relative_eq!(d.ln_pdf(a, b), expected, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // The fixed rule agrees with a fine midpoint sum over W1.
    //
    // Given
    // -----
    // - Unit (0.6, 0.5), μ = (0.2, −0.3), s11 = 1, s22 = 2, ρ = 0.3.
    //
    // Expect
    // ------
    // - Mass and E[W1*] within 1e-6 relative of 200 000 midpoint nodes.
    fn line_moments_match_brute_force() {
        let seg = LineSegment::new(0.6, 0.5);
        let d = bvn(0.2, -0.3, 1.0, 2.0, 0.3);
        let n = 200_000;
        let h = seg.width() / n as f64;
        let (mut mass, mut m1) = (0.0, 0.0);
        for k in 0..n {
            let w1 = seg.lower + (k as f64 + 0.5) * h;
            let w2 = w2_from_w1(seg.x, seg.y, w1);
            if w2 <= 0.0 || w2 >= 1.0 {
                continue;
            }
            let (a, b) = (logit(w1), logit(w2));
            let f = d.ln_pdf(a, b).exp() / (w1 * (1.0 - w1) * w2 * (1.0 - w2)) * h;
            mass += f;
            m1 += f * a;
        }

        let moments = integrate_line(&seg, &d, 0).unwrap();

        assert_relative_eq!(moments.ln_mass, mass.ln(), epsilon = 1e-6);
        assert_relative_eq!(moments.w_star[0], m1 / mass, max_relative = 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // A tight density centred far from the line still yields a well-defined
    // posterior instead of underflowing.
    //
    // Given
    // -----
    // - Unit (0.5, 0.5), μ = (6, 6), s11 = s22 = 0.05, ρ = 0. Every node's
    //   density is below the smallest normal f64.
    //
    // Expect
    // ------
    // - Finite moments, symmetric about the line's midpoint: E[W1*] ≈ 0 and
    //   E[W1] ≈ E[W2] ≈ 0.5.
    // - A finite log mass far below ln(f64::MIN_POSITIVE).
    fn concentrated_density_far_from_line_stays_finite() {
        let seg = LineSegment::new(0.5, 0.5);
        let d = bvn(6.0, 6.0, 0.05, 0.05, 0.0);
        assert!(d.ln_pdf(0.0, 0.0) < f64::MIN_POSITIVE.ln());

        let m = integrate_line(&seg, &d, 3).unwrap();

        assert!(m.w_star.iter().chain(m.w.iter()).all(|v| v.is_finite()));
        assert_relative_eq!(m.w_star[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(m.w_star[0], -m.w_star[1], epsilon = 1e-9);
        assert!(m.w_star[2] > 0.0 && m.w_star[2] < 0.05);
        assert_relative_eq!(m.w[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(m.w[1], 0.5, epsilon = 1e-9);
        assert!(m.ln_mass.is_finite());
        assert!(m.ln_mass < -700.0);
    }

    #[test]
    // Purpose
    // -------
    // A segment with no usable node is reported, not divided by.
    //
    // Given
    // -----
    // - A zero-width segment built by hand.
    //
    // Expect
    // ------
    // - `DegenerateIntegral` carrying the unit index.
    fn empty_segment_is_degenerate() {
        let seg = LineSegment { x: 0.5, y: 0.5, lower: 0.4, upper: 0.4 };

        let err = integrate_line(&seg, &bvn(0.0, 0.0, 1.0, 1.0, 0.0), 7).unwrap_err();

        assert!(matches!(err, EcoError::DegenerateIntegral { unit: 7, .. }));
    }

    #[test]
    // Purpose
    // -------
    // Posterior natural-scale means lie on the tomography line and second
    // moments respect Jensen's inequality.
    //
    // Given
    // -----
    // - Unit (0.3, 0.4) under the standard bivariate normal.
    //
    // Expect
    // ------
    // - X·E[W1] + (1 − X)·E[W2] = Y; E[W*²] ≥ E[W*]².
    fn posterior_means_satisfy_tomography_identity() {
        let seg = LineSegment::new(0.3, 0.4);
        let m = integrate_line(&seg, &bvn(0.0, 0.0, 1.0, 1.0, 0.0), 0).unwrap();

        assert_relative_eq!(0.3 * m.w[0] + 0.7 * m.w[1], 0.4, epsilon = 1e-12);
        assert_relative_eq!(m.w[0], w1_from_w2(0.3, 0.4, m.w[1]), epsilon = 1e-12);
        assert!(m.w_star[2] >= m.w_star[0] * m.w_star[0]);
        assert!(m.w_star[3] >= m.w_star[1] * m.w_star[1]);
    }

    #[test]
    // Purpose
    // -------
    // The survey density includes the logit Jacobian.
    //
    // Given
    // -----
    // - (W1, W2) = (0.6, 0.3) under the standard bivariate normal.
    //
    // Expect
    // ------
    // - ln φ₂(logit W1, logit W2) − ln(W1(1−W1)W2(1−W2)).
    fn survey_log_likelihood_includes_jacobian() {
        let d = bvn(0.0, 0.0, 1.0, 1.0, 0.0);
        let (a, b) = (logit(0.6), logit(0.3));
        let expected =
            -(2.0 * PI).ln() - 0.5 * (a * a + b * b) - (0.6_f64 * 0.4 * 0.3 * 0.7).ln();

        assert_relative_eq!(survey_log_likelihood(&d, 0.6, 0.3), expected, epsilon = 1e-12);
    }
}
