//! Per-unit E-step: expected latent moments for each data regime.
//!
//! A regular unit integrates along its tomography line unless `Y` sits in the
//! edge band, in which case both latent logits are set to `logit(Y)`.
//! Homogeneous units use the closed-form conditional mean of the unobserved
//! logit. Survey units return products of their observed logits.
use crate::{
    model::{
        core::{
            data::Unit,
            tomography::{
                integrate_line, regular_log_likelihood, survey_log_likelihood, w1_from_w2,
                x0_log_likelihood, x1_log_likelihood, BivariateNormal, LineSegment,
            },
        },
        errors::EcoResult,
    },
    optimization::numerical_stability::transformations::{
        clamp_unit, logit, safe_logistic, Y_EDGE_MARGIN,
    },
};
use nalgebra::{Matrix2, Vector2};

/// Maximum allowed gap between `E[W1]` and the tomography-line value implied
/// by `E[W2]` before a diagnostic is raised.
pub const TOMOGRAPHY_TOLERANCE: f64 = 0.01;

/// Non-fatal consistency flags raised for one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitDiagnostics {
    pub tomography_mismatch: bool,
    pub jensen_violation: bool,
}

/// Expected moments of one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitMoments {
    /// `E[W1*], E[W2*], E[W1*²], E[W2*²], E[W1*·W2*]`.
    pub w_star: [f64; 5],
    /// Posterior means on the natural scale, `E[W1], E[W2]`.
    pub w: [f64; 2],
    /// Log-likelihood contribution; `None` unless requested.
    pub log_likelihood: Option<f64>,
    pub diagnostics: UnitDiagnostics,
}

impl UnitMoments {
    fn from_point(a: f64, b: f64, w: [f64; 2], log_likelihood: Option<f64>) -> Self {
        UnitMoments {
            w_star: [a, b, a * a, b * b, a * b],
            w,
            log_likelihood,
            diagnostics: UnitDiagnostics::default(),
        }
    }
}

/// Whether a regular unit's `Y` falls in the edge band.
pub fn is_edge(y: f64) -> bool {
    y <= Y_EDGE_MARGIN || y >= 1.0 - Y_EDGE_MARGIN
}

/// Expected moments of unit `index` given its mean and the latent
/// covariance.
///
/// Errors
/// ------
/// - `SingularModel` when `sigma` has no valid factorization.
/// - `DegenerateIntegral` when a regular unit's line integral has no usable
///   node or non-finite moments.
pub fn unit_expectation(
    index: usize, unit: &Unit, mean: &Vector2<f64>, sigma: &Matrix2<f64>, with_ll: bool,
) -> EcoResult<UnitMoments> {
    match *unit {
        Unit::Regular { y, .. } if is_edge(y) => {
            let l = logit(clamp_unit(y));
            Ok(UnitMoments::from_point(l, l, [y, y], with_ll.then_some(0.0)))
        }
        Unit::Regular { x, y } => {
            let bvn = BivariateNormal::new(mean, sigma)?;
            let seg = LineSegment::new(x, y);
            let line = integrate_line(&seg, &bvn, index)?;
            let ws = line.w_star;
            let diagnostics = UnitDiagnostics {
                tomography_mismatch: (line.w[0] - w1_from_w2(x, y, line.w[1])).abs()
                    > TOMOGRAPHY_TOLERANCE,
                jensen_violation: ws[2] < ws[0] * ws[0] || ws[3] < ws[1] * ws[1],
            };
            Ok(UnitMoments {
                w_star: ws,
                w: line.w,
                log_likelihood: with_ll.then(|| regular_log_likelihood(x, line.ln_mass)),
                diagnostics,
            })
        }
        Unit::HomogeneousX1 { w1 } => {
            let a = logit(w1);
            let b = mean[1] + sigma[(0, 1)] / sigma[(0, 0)] * (a - mean[0]);
            let ll = if with_ll {
                Some(x1_log_likelihood(&BivariateNormal::new(mean, sigma)?, w1))
            } else {
                None
            };
            Ok(UnitMoments::from_point(a, b, [w1, safe_logistic(b)], ll))
        }
        Unit::HomogeneousX0 { w2 } => {
            let b = logit(w2);
            let a = mean[0] + sigma[(0, 1)] / sigma[(1, 1)] * (b - mean[1]);
            let ll = if with_ll {
                Some(x0_log_likelihood(&BivariateNormal::new(mean, sigma)?, w2))
            } else {
                None
            };
            Ok(UnitMoments::from_point(a, b, [safe_logistic(a), w2], ll))
        }
        Unit::Survey { w1, w2, .. } => {
            let ll = if with_ll {
                Some(survey_log_likelihood(&BivariateNormal::new(mean, sigma)?, w1, w2))
            } else {
                None
            };
            Ok(UnitMoments::from_point(logit(w1), logit(w2), [w1, w2], ll))
        }
    }
}
