//! mstep — closed-form parameter updates from sufficient statistics.
//!
//! Purpose
//! -------
//! Map the output of one E-step to the next parameter vector. The update is
//! a pure function: it reads the current [`ModelState`] and returns a new
//! [`Theta`]; the caller rebuilds the state from it.
//!
//! Key behaviors
//! -------------
//! - CAR: `mu = (S0, S1)`; free correlation uses the moment formulas
//!   `sigma11 = S2 − 2·S0·mu1 + mu1²`,
//!   `sigma12 = S4 − S0·mu2 − S1·mu1 + mu1·mu2`,
//!   `rho = sigma12 / sqrt(sigma11·sigma22)`; fixed correlation solves
//!   `sigma11 = (I11 − rho·I12·sqrt(I11/I22)) / (1 − rho²)` and its mirror.
//! - NCAR: means and variances as above, covariate correlations from
//!   `E[W·logit X]`; the covariate moments `(mu3, sig3)` are never updated.
//! - NCAR regression layout: residual moments give the intercepts and
//!   conditional variances; slopes follow from a weighted least-squares step
//!   accumulated unit by unit.
//! - An optional linear hypothesis moves the means onto the constraint
//!   surface using the current covariance as the metric, before any variance
//!   is computed.
//!
//! Invariants & assumptions
//! ------------------------
//! - The returned vector passes `Theta::validate`; an update that leaves the
//!   parameter space is reported as [`EcoError::SingularModel`].
//!
//! Testing notes
//! -------------
//! - Unit tests feed hand-built statistics and compare against the closed
//!   forms.
use crate::{
    em::{
        expectation::UnitMoments,
        sufficient::{EStepOutput, LatentMoments, SufficientStats},
    },
    model::{
        core::{
            options::{EMOptions, LinearHypothesis},
            params::{CarTheta, NcarRegressionTheta, NcarTheta, Theta},
            state::{checked_inverse2, covariance_2x2, ModelState},
        },
        errors::{EcoError, EcoResult},
    },
};
use nalgebra::{Matrix2, Vector2};

/// One M-step, dispatched on the layout of the current parameters.
///
/// Errors
/// ------
/// - [`EcoError::SingularModel`] on a degenerate denominator, a
///   non-invertible system, or an update outside the parameter space.
pub fn m_step(state: &ModelState, estep: &EStepOutput, options: &EMOptions) -> EcoResult<Theta> {
    let hypothesis = options.hypothesis.as_ref();
    match (&state.theta, &estep.stats) {
        (Theta::Car(t), SufficientStats::Car(s)) => {
            m_step_car(t, s, &state.sigma, options.fixed_rho, hypothesis)
        }
        (Theta::Ncar(t), SufficientStats::Ncar { moments, w1_x, w2_x, x_mean, .. }) => {
            let marginal = state
                .sigma3
                .map(|s3| Matrix2::new(s3[(0, 0)], s3[(0, 1)], s3[(1, 0)], s3[(1, 1)]))
                .unwrap_or(state.sigma);
            m_step_ncar(t, moments, [*w1_x, *w2_x], *x_mean, &marginal, hypothesis)
        }
        (Theta::NcarFixedRho(t), SufficientStats::Ncar { residual: Some(r), .. }) => {
            let offsets = &state.covariate_offsets;
            m_step_ncar_regression(t, r, &estep.units, offsets, &state.sigma, hypothesis)
        }
        _ => Err(EcoError::SingularModel {
            context: "sufficient statistics do not match the parameter layout",
        }),
    }
}

/// Move `(S0, S1)` onto `c'·mu = target` in the metric of `sigma`:
/// `mu = S − Σc·(c'S − target) / (c'Σc)`.
pub fn apply_hypothesis(
    mean: [f64; 2], sigma: &Matrix2<f64>, hypothesis: &LinearHypothesis,
) -> EcoResult<[f64; 2]> {
    let c = Vector2::new(hypothesis.coefficients[0], hypothesis.coefficients[1]);
    let s = Vector2::new(mean[0], mean[1]);
    let sc = sigma * c;
    let denom = c.dot(&sc);
    if !denom.is_finite() || denom <= 0.0 {
        return Err(EcoError::SingularModel { context: "hypothesis metric c'Σc is not positive" });
    }
    let mu = s - sc * ((c.dot(&s) - hypothesis.target) / denom);
    Ok([mu[0], mu[1]])
}

fn constrained_means(
    s: [f64; 2], sigma: &Matrix2<f64>, hypothesis: Option<&LinearHypothesis>,
) -> EcoResult<[f64; 2]> {
    match hypothesis {
        Some(h) => apply_hypothesis(s, sigma, h),
        None => Ok(s),
    }
}

/// Variances holding the correlation at `rho`, from centered moments.
fn fixed_rho_variances(i11: f64, i22: f64, i12: f64, rho: f64) -> (f64, f64) {
    let denom = 1.0 - rho * rho;
    let s11 = (i11 - rho * i12 * (i11 / i22).sqrt()) / denom;
    let s22 = (i22 - rho * i12 * (i22 / i11).sqrt()) / denom;
    (s11, s22)
}

fn finish(template: &Theta, values: &[f64]) -> EcoResult<Theta> {
    template
        .with_values(values)
        .map_err(|_| EcoError::SingularModel { context: "M-step update left the parameter space" })
}

pub fn m_step_car(
    t: &CarTheta, s: &LatentMoments, sigma: &Matrix2<f64>, fixed_rho: bool,
    hypothesis: Option<&LinearHypothesis>,
) -> EcoResult<Theta> {
    let [mu1, mu2] = constrained_means([s.w1, s.w2], sigma, hypothesis)?;
    let (i11, i22, i12) = s.centered_at(mu1, mu2);
    let (s11, s22, rho) = if fixed_rho {
        let (s11, s22) = fixed_rho_variances(i11, i22, i12, t.rho);
        (s11, s22, t.rho)
    } else {
        (i11, i22, i12 / (i11 * i22).sqrt())
    };
    finish(&Theta::Car(*t), &[mu1, mu2, s11, s22, rho])
}

pub fn m_step_ncar(
    t: &NcarTheta, s: &LatentMoments, cross: [f64; 2], x_mean: f64, marginal: &Matrix2<f64>,
    hypothesis: Option<&LinearHypothesis>,
) -> EcoResult<Theta> {
    let [mu1, mu2] = constrained_means([s.w1, s.w2], marginal, hypothesis)?;
    let (sig1, sig2, c12) = s.centered_at(mu1, mu2);
    let c13 = cross[0] - t.mu3 * s.w1 - mu1 * x_mean + mu1 * t.mu3;
    let c23 = cross[1] - t.mu3 * s.w2 - mu2 * x_mean + mu2 * t.mu3;
    let r12 = c12 / (sig1 * sig2).sqrt();
    let r13 = c13 / (sig1 * t.sig3).sqrt();
    let r23 = c23 / (sig2 * t.sig3).sqrt();
    finish(&Theta::Ncar(*t), &[t.mu3, mu1, mu2, t.sig3, sig1, sig2, r13, r23, r12])
}

pub fn m_step_ncar_regression(
    t: &NcarRegressionTheta, r: &LatentMoments, units: &[UnitMoments], offsets: &[f64],
    sigma: &Matrix2<f64>, hypothesis: Option<&LinearHypothesis>,
) -> EcoResult<Theta> {
    let [mu1, mu2] = constrained_means([r.w1, r.w2], sigma, hypothesis)?;
    let (i11, i22, i12) = r.centered_at(mu1, mu2);
    let (c1, c2) = fixed_rho_variances(i11, i22, i12, t.r12_3);

    let cond = covariance_2x2(c1, c2, t.r12_3);
    let cond_inv = checked_inverse2(&cond).map_err(|_| EcoError::SingularModel {
        context: "conditional covariance left the parameter space",
    })?;
    let mu = Vector2::new(mu1, mu2);
    let mut denom = Matrix2::<f64>::zeros();
    let mut numer = Vector2::<f64>::zeros();
    for (m, &d) in units.iter().zip(offsets.iter()) {
        let z = Matrix2::from_diagonal_element(d);
        let w = Vector2::new(m.w_star[0], m.w_star[1]);
        denom += z * cond_inv * z;
        numer += z * cond_inv * (w - mu);
    }
    let beta = denom
        .try_inverse()
        .ok_or(EcoError::SingularModel { context: "covariate offsets are all zero" })?
        * numer;

    finish(&Theta::NcarFixedRho(*t), &[t.mu3, mu1, mu2, t.sig3, c1, c2, beta[0], beta[1], t.r12_3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::em::expectation::UnitDiagnostics;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - CAR free and fixed-correlation formulas.
    // - The hypothesis correction pinning a mean and holding a contrast.
    // - NCAR covariate correlations.
    // - The regression-layout slopes against the per-coordinate least-squares
    //   closed form.
    // -------------------------------------------------------------------------

    fn stats() -> LatentMoments {
        LatentMoments { w1: 0.4, w2: -0.3, w1_sq: 1.36, w2_sq: 0.79, w1_w2: 0.18 }
    }

    fn car(rho: f64) -> CarTheta {
        CarTheta { mu1: 0.0, mu2: 0.0, sigma11: 1.0, sigma22: 1.0, rho }
    }

    #[test]
    // Purpose
    // -------
    // The free CAR update reproduces the moment formulas.
    //
    // Given
    // -----
    // - S = (0.4, −0.3, 1.36, 0.79, 0.18).
    //
    // Expect
    // ------
    // - mu = (0.4, −0.3), sigma11 = 1.2, sigma22 = 0.7,
    //   rho = 0.3 / sqrt(0.84).
    fn car_free_update_matches_moment_formulas() {
        let theta = m_step_car(&car(0.0), &stats(), &Matrix2::identity(), false, None).unwrap();

        let v = theta.to_array();
        assert_relative_eq!(v[0], 0.4);
        assert_relative_eq!(v[1], -0.3);
        assert_relative_eq!(v[2], 1.2, epsilon = 1e-12);
        assert_relative_eq!(v[3], 0.7, epsilon = 1e-12);
        assert_relative_eq!(v[4], 0.3 / 0.84_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Fixed correlation keeps rho and solves the variance equations.
    //
    // Given
    // -----
    // - rho = 0.5 and the same statistics.
    //
    // Expect
    // ------
    // - rho unchanged; sigma11 = (1.2 − 0.5·0.3·sqrt(1.2/0.7)) / 0.75.
    fn car_fixed_rho_update_holds_correlation() {
        let theta = m_step_car(&car(0.5), &stats(), &Matrix2::identity(), true, None).unwrap();

        let v = theta.to_array();
        assert_eq!(v[4], 0.5);
        assert_relative_eq!(
            v[2],
            (1.2 - 0.5 * 0.3 * (1.2_f64 / 0.7).sqrt()) / 0.75,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            v[3],
            (0.7 - 0.5 * 0.3 * (0.7_f64 / 1.2).sqrt()) / 0.75,
            epsilon = 1e-12
        );
    }

    #[test]
    // Purpose
    // -------
    // The hypothesis correction lands exactly on the constraint.
    //
    // Given
    // -----
    // - mu1 = 1 (pin) and mu1 − mu2 = 0 (contrast) with a correlated metric.
    //
    // Expect
    // ------
    // - mu1 == 1 and mu2 shifted by Σ21/Σ11·(S0 − 1); contrast holds.
    fn hypothesis_lands_on_constraint() {
        let sigma = Matrix2::new(1.0, 0.5, 0.5, 2.0);
        let pin = LinearHypothesis::new([1.0, 0.0], 1.0).unwrap();
        let [m1, m2] = apply_hypothesis([0.4, -0.3], &sigma, &pin).unwrap();
        assert_relative_eq!(m1, 1.0, epsilon = 1e-15);
        assert_relative_eq!(m2, -0.3 - 0.5 * (0.4 - 1.0), epsilon = 1e-15);

        let contrast = LinearHypothesis::new([1.0, -1.0], 0.0).unwrap();
        let [m1, m2] = apply_hypothesis([0.4, -0.3], &sigma, &contrast).unwrap();
        assert_relative_eq!(m1 - m2, 0.0, epsilon = 1e-15);
    }

    #[test]
    // Purpose
    // -------
    // NCAR covariate correlations follow `(E[W·L] − mu3·E[W]) / sqrt(var·sig3)`
    // when the covariate mean equals mu3.
    //
    // Given
    // -----
    // - mu3 = 0.2, sig3 = 2, E[W1*·L] = 0.5.
    //
    // Expect
    // ------
    // - r13 = (0.5 − 0.2·0.4) / sqrt(1.2·2); constants unchanged.
    fn ncar_update_derives_covariate_correlation() {
        let t = NcarTheta {
            mu3: 0.2,
            mu1: 0.0,
            mu2: 0.0,
            sig3: 2.0,
            sig1: 1.0,
            sig2: 1.0,
            r13: 0.0,
            r23: 0.0,
            r12: 0.0,
        };
        let theta =
            m_step_ncar(&t, &stats(), [0.5, -0.1], 0.2, &Matrix2::identity(), None).unwrap();

        let v = theta.to_array();
        assert_eq!((v[0], v[3]), (0.2, 2.0));
        assert_relative_eq!(v[6], (0.5 - 0.2 * 0.4) / (1.2_f64 * 2.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(v[7], (-0.1 + 0.2 * 0.3) / (0.7_f64 * 2.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // With a common residual covariance the weighted least-squares slopes
    // reduce to per-coordinate regressions through the intercept.
    //
    // Given
    // -----
    // - Three units with offsets (−1, 0.5, 0.5) and known E[W*].
    //
    // Expect
    // ------
    // - beta_k = Σ d_i (E[W_k*]_i − mu_k) / Σ d_i².
    fn regression_slopes_match_least_squares() {
        let point = |a: f64, b: f64| UnitMoments {
            w_star: [a, b, a * a + 0.5, b * b + 0.5, a * b],
            w: [0.5, 0.5],
            log_likelihood: None,
            diagnostics: UnitDiagnostics::default(),
        };
        let units = vec![point(-0.5, 0.9), point(0.6, -0.2), point(0.4, -0.1)];
        let offsets = vec![-1.0, 0.5, 0.5];
        let r = LatentMoments { w1: 0.1, w2: 0.2, w1_sq: 1.0, w2_sq: 1.1, w1_w2: 0.05 };
        let t = NcarRegressionTheta {
            mu3: 0.0,
            mu1: 0.0,
            mu2: 0.0,
            sig3: 1.0,
            sig1_3: 1.0,
            sig2_3: 1.0,
            beta1: 0.0,
            beta2: 0.0,
            r12_3: 0.3,
        };

        let theta =
            m_step_ncar_regression(&t, &r, &units, &offsets, &Matrix2::identity(), None).unwrap();

        let v = theta.to_array();
        let sdd = 1.0 + 0.25 + 0.25;
        let b1 = (-1.0 * (-0.5 - 0.1) + 0.5 * (0.6 - 0.1) + 0.5 * (0.4 - 0.1)) / sdd;
        let b2 = (-1.0 * (0.9 - 0.2) + 0.5 * (-0.2 - 0.2) + 0.5 * (-0.1 - 0.2)) / sdd;
        assert_relative_eq!(v[6], b1, epsilon = 1e-12);
        assert_relative_eq!(v[7], b2, epsilon = 1e-12);
        assert_eq!(v[8], 0.3);
    }
}
