//! inference::variance — SEM-corrected covariance of the fitted parameters.
//!
//! Purpose
//! -------
//! Turn a fit that ran the supplemented-EM pass into an asymptotic covariance
//! matrix and standard errors. The complete-data information comes from the
//! final sufficient statistics; the sensitivity matrix `R` inflates its
//! inverse to account for the missing information:
//! `V = Vc + Vc·R·(I − R)⁻¹`, `Vc = Ic⁻¹`.
//!
//! Key behaviors
//! -------------
//! - [`complete_data_log_likelihood`] evaluates the per-unit complete-data
//!   Gaussian log-likelihood of `(W1*, W2*)` (CAR) or
//!   `(W1*, W2*, logit X)` (NCAR) from the sufficient statistics, up to the
//!   additive `2π` constant.
//! - [`complete_data_gradient`] is its analytic gradient on the transformed
//!   scale; [`complete_information`] differentiates that gradient once more
//!   with `finitediff` central differences, symmetrises, and scales by the
//!   number of units.
//! - [`sem_covariance`] assembles `V` with `nalgebra`, then maps standard
//!   errors back to the natural scale by the delta method.
//!
//! Invariants & assumptions
//! ------------------------
//! - All matrices are indexed by the free coordinates listed in the
//!   sensitivity matrix, in layout order.
//! - `Ic` is evaluated at the fitted parameters and the statistics of the
//!   last E-step, where the M-step makes the free gradient vanish.
//!
//! Conventions
//! -----------
//! - Covariances are on the transformed scale (`ln` variances, Fisher-z
//!   correlations); only the natural-scale standard errors are mapped back.
//! - Inference failures are [`InferenceError`]s, lifted into
//!   [`EcoError`] at the public boundary.
use crate::{
    em::{driver::FitOutcome, sufficient::SufficientStats},
    inference::errors::{InferenceError, InferenceResult},
    model::{
        core::{data::EcoData, params::Theta},
        errors::{EcoError, EcoResult},
    },
    optimization::numerical_stability::transformations::untransform_derivative,
};
use finitediff::FiniteDiff;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// SEM-corrected covariance over the free coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SemCovariance {
    /// Layout indices the rows and columns refer to.
    pub free: Vec<usize>,
    /// Covariance on the transformed scale.
    pub covariance: Array2<f64>,
    pub std_errors_transformed: Array1<f64>,
    /// Delta-method standard errors of the natural parameters.
    pub std_errors: Array1<f64>,
}

/// Mean and covariance of the complete-data vector.
struct JointNormal {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
}

/// Per-unit complete-data log-likelihood at `theta`, without the `2π` term.
///
/// `ℓc = −½·[ln det Σ + tr(Σ⁻¹·M)]` with `M` the second moments of the
/// complete data about the model mean.
///
/// Errors
/// ------
/// - [`InferenceError::DimensionMismatch`] when `stats` belongs to another
///   flavor.
/// - [`InferenceError::SingularMatrix`] when the joint covariance is not
///   positive definite.
pub fn complete_data_log_likelihood(
    theta: &Theta, stats: &SufficientStats,
) -> InferenceResult<f64> {
    let joint = joint_normal(theta);
    let (first, second) = observed_moments(stats);
    check_dim(joint.mean.len(), first.len())?;
    let chol = joint
        .cov
        .clone()
        .cholesky()
        .ok_or(InferenceError::SingularMatrix { context: "complete-data covariance" })?;
    let ln_det = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
    let inv = chol.inverse();
    let centered = centered_moments(&first, &second, &joint.mean);
    Ok(-0.5 * (ln_det + (inv * centered).trace()))
}

/// Gradient of [`complete_data_log_likelihood`] with respect to every
/// transformed layout coordinate.
///
/// For each coordinate `k` with mean derivative `dm` and covariance derivative
/// `dΣ`: `∂ℓc = dm'·Σ⁻¹·(S − m) + Σ_ij G_ij·dΣ_ij`, where
/// `G = −½·(Σ⁻¹ − Σ⁻¹·M·Σ⁻¹)`.
pub fn complete_data_gradient(
    theta: &Theta, stats: &SufficientStats,
) -> InferenceResult<Array1<f64>> {
    let joint = joint_normal(theta);
    let (first, second) = observed_moments(stats);
    check_dim(joint.mean.len(), first.len())?;
    let inv = joint
        .cov
        .clone()
        .try_inverse()
        .ok_or(InferenceError::SingularMatrix { context: "complete-data covariance" })?;
    let centered = centered_moments(&first, &second, &joint.mean);
    let g = (&inv * &centered * &inv - &inv) * 0.5;
    let score = &inv * (&first - &joint.mean);

    let grad = joint_derivatives(theta)
        .iter()
        .map(|(dm, dcov)| dm.dot(&score) + g.component_mul(dcov).sum())
        .collect::<Vec<f64>>();
    Ok(Array1::from(grad))
}

/// Complete-data information `Ic = −n·∇²ℓc` over the `free` transformed
/// coordinates.
///
/// Errors
/// ------
/// - [`InferenceError::InvalidHessian`] when a finite-difference entry is
///   not finite.
pub fn complete_information(
    theta: &Theta, stats: &SufficientStats, free: &[usize], n: usize,
) -> InferenceResult<Array2<f64>> {
    complete_data_gradient(theta, stats)?;
    let phi0 = theta.transform();
    let x0: Array1<f64> = free.iter().map(|&j| phi0[j]).collect();
    let grad = |x: &Array1<f64>| -> Array1<f64> {
        let mut phi = phi0.clone();
        for (k, &j) in free.iter().enumerate() {
            phi[j] = x[k];
        }
        match theta.from_transformed(&phi).ok().and_then(|t| complete_data_gradient(&t, stats).ok())
        {
            Some(g) => free.iter().map(|&j| g[j]).collect(),
            None => Array1::from_elem(free.len(), f64::NAN),
        }
    };

    let mut hess = x0.central_hessian(&grad);
    for ((row, col), &value) in hess.indexed_iter() {
        if !value.is_finite() {
            return Err(InferenceError::InvalidHessian { row, col, value });
        }
    }
    symmetrize(&mut hess);
    Ok(hess * -(n as f64))
}

/// SEM-corrected covariance and standard errors for a fit that ran the SEM
/// pass.
///
/// Errors
/// ------
/// - [`EcoError::SemNotRun`] when `outcome` carries no sensitivity matrix.
/// - [`EcoError::Inference`] for shape mismatches, singular `Ic` or
///   `I − R`, and non-positive corrected variances.
pub fn sem_covariance(outcome: &FitOutcome, data: &EcoData) -> EcoResult<SemCovariance> {
    let sensitivity = outcome.sensitivity.as_ref().ok_or(EcoError::SemNotRun)?;
    let free = sensitivity.free.clone();
    let k = free.len();
    let r = &sensitivity.matrix;
    if r.nrows() != k || r.ncols() != k {
        return Err(InferenceError::DimensionMismatch { expected: k, actual: r.nrows() }.into());
    }

    let info = complete_information(&outcome.theta, &outcome.stats, &free, data.len())?;
    let vc = to_dmatrix(&info)
        .try_inverse()
        .ok_or(InferenceError::SingularMatrix { context: "complete-data information" })?;
    let r = to_dmatrix(r);
    let rate = (DMatrix::<f64>::identity(k, k) - &r)
        .try_inverse()
        .ok_or(InferenceError::SingularMatrix { context: "I − R" })?;
    let v = &vc + &vc * r * rate;
    let covariance = Array2::from_shape_fn((k, k), |(i, j)| 0.5 * (v[(i, j)] + v[(j, i)]));

    let mut std_errors_transformed = Array1::zeros(k);
    for i in 0..k {
        let var = covariance[[i, i]];
        if !var.is_finite() || var <= 0.0 {
            return Err(InferenceError::InvalidVariance { index: free[i], value: var }.into());
        }
        std_errors_transformed[i] = var.sqrt();
    }

    let values = outcome.theta.to_array();
    let kinds = outcome.theta.coordinate_kinds();
    let std_errors = free
        .iter()
        .zip(std_errors_transformed.iter())
        .map(|(&j, se)| se * untransform_derivative(kinds[j], values[j]).abs())
        .collect();

    Ok(SemCovariance { free, covariance, std_errors_transformed, std_errors })
}

// ---- Helper methods ----

fn check_dim(expected: usize, actual: usize) -> InferenceResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(InferenceError::DimensionMismatch { expected, actual })
    }
}

/// First and raw second moments of the complete data, ordered
/// `(W1*, W2*[, logit X])`.
fn observed_moments(stats: &SufficientStats) -> (DVector<f64>, DMatrix<f64>) {
    match *stats {
        SufficientStats::Car(m) => (
            DVector::from_vec(vec![m.w1, m.w2]),
            DMatrix::from_row_slice(2, 2, &[m.w1_sq, m.w1_w2, m.w1_w2, m.w2_sq]),
        ),
        SufficientStats::Ncar { moments: m, w1_x, w2_x, x_mean, x_sq, .. } => (
            DVector::from_vec(vec![m.w1, m.w2, x_mean]),
            DMatrix::from_row_slice(
                3,
                3,
                &[m.w1_sq, m.w1_w2, w1_x, m.w1_w2, m.w2_sq, w2_x, w1_x, w2_x, x_sq],
            ),
        ),
    }
}

/// `E[(Z − m)(Z − m)']` from first and raw second moments.
fn centered_moments(
    first: &DVector<f64>, second: &DMatrix<f64>, mean: &DVector<f64>,
) -> DMatrix<f64> {
    second - first * mean.transpose() - mean * first.transpose() + mean * mean.transpose()
}

fn joint_normal(theta: &Theta) -> JointNormal {
    match *theta {
        Theta::Car(t) => {
            let s12 = t.rho * (t.sigma11 * t.sigma22).sqrt();
            JointNormal {
                mean: DVector::from_vec(vec![t.mu1, t.mu2]),
                cov: DMatrix::from_row_slice(2, 2, &[t.sigma11, s12, s12, t.sigma22]),
            }
        }
        Theta::Ncar(t) => {
            let c12 = t.r12 * (t.sig1 * t.sig2).sqrt();
            let c13 = t.r13 * (t.sig1 * t.sig3).sqrt();
            let c23 = t.r23 * (t.sig2 * t.sig3).sqrt();
            JointNormal {
                mean: DVector::from_vec(vec![t.mu1, t.mu2, t.mu3]),
                cov: DMatrix::from_row_slice(
                    3,
                    3,
                    &[t.sig1, c12, c13, c12, t.sig2, c23, c13, c23, t.sig3],
                ),
            }
        }
        Theta::NcarFixedRho(t) => {
            let s3 = t.sig3;
            let c12 = t.r12_3 * (t.sig1_3 * t.sig2_3).sqrt();
            let s11 = t.sig1_3 + t.beta1 * t.beta1 * s3;
            let s22 = t.sig2_3 + t.beta2 * t.beta2 * s3;
            let s12 = c12 + t.beta1 * t.beta2 * s3;
            let (s13, s23) = (t.beta1 * s3, t.beta2 * s3);
            JointNormal {
                mean: DVector::from_vec(vec![t.mu1, t.mu2, t.mu3]),
                cov: DMatrix::from_row_slice(3, 3, &[s11, s12, s13, s12, s22, s23, s13, s23, s3]),
            }
        }
    }
}

/// Symmetric matrix of dimension `d` with the listed upper entries.
fn sym(d: usize, entries: &[(usize, usize, f64)]) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(d, d);
    for &(i, j, v) in entries {
        m[(i, j)] = v;
        m[(j, i)] = v;
    }
    m
}

fn unit_vector(d: usize, axis: usize) -> DVector<f64> {
    let mut v = DVector::zeros(d);
    v[axis] = 1.0;
    v
}

/// Derivatives `(dm, dΣ)` of the joint mean and covariance with respect to
/// each transformed layout coordinate.
fn joint_derivatives(theta: &Theta) -> Vec<(DVector<f64>, DMatrix<f64>)> {
    let zero_mean = |d: usize| -> DVector<f64> { DVector::zeros(d) };
    match *theta {
        Theta::Car(t) => {
            let s12 = t.rho * (t.sigma11 * t.sigma22).sqrt();
            let dz = (1.0 - t.rho * t.rho) * (t.sigma11 * t.sigma22).sqrt();
            vec![
                (unit_vector(2, 0), DMatrix::zeros(2, 2)),
                (unit_vector(2, 1), DMatrix::zeros(2, 2)),
                (zero_mean(2), sym(2, &[(0, 0, t.sigma11), (0, 1, 0.5 * s12)])),
                (zero_mean(2), sym(2, &[(1, 1, t.sigma22), (0, 1, 0.5 * s12)])),
                (zero_mean(2), sym(2, &[(0, 1, dz)])),
            ]
        }
        Theta::Ncar(t) => {
            let var = [t.sig1, t.sig2, t.sig3];
            let cov = |a: usize, b: usize, r: f64| r * (var[a] * var[b]).sqrt();
            let (c12, c13, c23) = (cov(0, 1, t.r12), cov(0, 2, t.r13), cov(1, 2, t.r23));
            let dz = |a: usize, b: usize, r: f64| (1.0 - r * r) * (var[a] * var[b]).sqrt();
            vec![
                (unit_vector(3, 2), DMatrix::zeros(3, 3)),
                (unit_vector(3, 0), DMatrix::zeros(3, 3)),
                (unit_vector(3, 1), DMatrix::zeros(3, 3)),
                (zero_mean(3), sym(3, &[(2, 2, t.sig3), (0, 2, 0.5 * c13), (1, 2, 0.5 * c23)])),
                (zero_mean(3), sym(3, &[(0, 0, t.sig1), (0, 1, 0.5 * c12), (0, 2, 0.5 * c13)])),
                (zero_mean(3), sym(3, &[(1, 1, t.sig2), (0, 1, 0.5 * c12), (1, 2, 0.5 * c23)])),
                (zero_mean(3), sym(3, &[(0, 2, dz(0, 2, t.r13))])),
                (zero_mean(3), sym(3, &[(1, 2, dz(1, 2, t.r23))])),
                (zero_mean(3), sym(3, &[(0, 1, dz(0, 1, t.r12))])),
            ]
        }
        Theta::NcarFixedRho(t) => {
            let (s3, b1, b2) = (t.sig3, t.beta1, t.beta2);
            let c12 = t.r12_3 * (t.sig1_3 * t.sig2_3).sqrt();
            let dz = (1.0 - t.r12_3 * t.r12_3) * (t.sig1_3 * t.sig2_3).sqrt();
            vec![
                (unit_vector(3, 2), DMatrix::zeros(3, 3)),
                (unit_vector(3, 0), DMatrix::zeros(3, 3)),
                (unit_vector(3, 1), DMatrix::zeros(3, 3)),
                (
                    zero_mean(3),
                    sym(
                        3,
                        &[
                            (0, 0, b1 * b1 * s3),
                            (1, 1, b2 * b2 * s3),
                            (0, 1, b1 * b2 * s3),
                            (0, 2, b1 * s3),
                            (1, 2, b2 * s3),
                            (2, 2, s3),
                        ],
                    ),
                ),
                (zero_mean(3), sym(3, &[(0, 0, t.sig1_3), (0, 1, 0.5 * c12)])),
                (zero_mean(3), sym(3, &[(1, 1, t.sig2_3), (0, 1, 0.5 * c12)])),
                (zero_mean(3), sym(3, &[(0, 0, 2.0 * b1 * s3), (0, 1, b2 * s3), (0, 2, s3)])),
                (zero_mean(3), sym(3, &[(1, 1, 2.0 * b2 * s3), (0, 1, b1 * s3), (1, 2, s3)])),
                (zero_mean(3), sym(3, &[(0, 1, dz)])),
            ]
        }
    }
}

fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = avg;
            m[[j, i]] = avg;
        }
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        em::{
            driver::{FitStatus, SensitivityMatrix},
            mstep::m_step_car,
            sufficient::{DiagnosticCounts, LatentMoments},
        },
        model::core::options::ModelFlavor,
    };
    use approx::assert_relative_eq;
    use nalgebra::Matrix2;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Analytic gradient against finite differences of the log-likelihood,
    //   for every layout.
    // - The mean block of the information, which is exactly n·Σ⁻¹.
    // - The SEM inflation `Vc·R·(I − R)⁻¹` and the `SemNotRun` guard.
    // -------------------------------------------------------------------------

    fn car_stats() -> LatentMoments {
        LatentMoments { w1: 0.4, w2: -0.3, w1_sq: 1.36, w2_sq: 0.79, w1_w2: 0.18 }
    }

    fn ncar_stats() -> SufficientStats {
        SufficientStats::Ncar {
            moments: car_stats(),
            w1_x: 0.35,
            w2_x: -0.2,
            x_mean: 0.1,
            x_sq: 1.6,
            residual: None,
        }
    }

    fn car_optimum() -> Theta {
        let start = Theta::from_slice(ModelFlavor::Car, false, &[0.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
        let Theta::Car(t) = start else { unreachable!() };
        m_step_car(&t, &car_stats(), &Matrix2::identity(), false, None).unwrap()
    }

    fn outcome(sensitivity: Option<SensitivityMatrix>) -> FitOutcome {
        let stats = SufficientStats::Car(car_stats());
        FitOutcome {
            theta: car_optimum(),
            stats,
            sufficient: stats.to_vec(None),
            posteriors: Vec::new(),
            iterations: 1,
            status: FitStatus::Converged,
            history: Vec::new(),
            sensitivity,
            log_likelihood: 0.0,
            diagnostics: DiagnosticCounts::default(),
        }
    }

    fn data() -> EcoData {
        EcoData::new(&[0.3, 0.6, 0.2, 0.8], &[0.4, 0.5, 0.2, 0.9]).unwrap()
    }

    #[test]
    // Purpose
    // -------
    // The analytic gradient agrees with central differences of ℓc.
    //
    // Given
    // -----
    // - One parameter vector per layout away from the optimum.
    //
    // Expect
    // ------
    // - Agreement to 1e-5 in every transformed coordinate.
    fn gradient_matches_finite_differences() {
        let cases = [
            (
                Theta::from_slice(ModelFlavor::Car, false, &[0.1, -0.2, 0.9, 1.4, 0.3]).unwrap(),
                SufficientStats::Car(car_stats()),
            ),
            (
                Theta::from_slice(
                    ModelFlavor::Ncar,
                    false,
                    &[0.2, 0.1, -0.2, 1.5, 0.9, 1.4, 0.3, -0.2, 0.25],
                )
                .unwrap(),
                ncar_stats(),
            ),
            (
                Theta::from_slice(
                    ModelFlavor::Ncar,
                    true,
                    &[0.2, 0.1, -0.2, 1.5, 0.9, 1.4, 0.4, -0.3, 0.25],
                )
                .unwrap(),
                ncar_stats(),
            ),
        ];
        for (theta, stats) in cases {
            let phi = theta.transform();
            let f = |p: &Array1<f64>| {
                let t = theta.from_transformed(p).unwrap();
                complete_data_log_likelihood(&t, &stats).unwrap()
            };
            let numeric = phi.central_diff(&f);

            let analytic = complete_data_gradient(&theta, &stats).unwrap();

            for (a, b) in analytic.iter().zip(numeric.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // At the M-step solution the free gradient vanishes and the mean block of
    // the information equals n·Σ⁻¹.
    //
    // Given
    // -----
    // - The CAR optimum of fixed statistics and n = 4.
    //
    // Expect
    // ------
    // - Gradient ≈ 0; Ic[0..2, 0..2] ≈ 4·Σ⁻¹.
    fn information_mean_block_is_scaled_precision() {
        let theta = car_optimum();
        let stats = SufficientStats::Car(car_stats());
        let grad = complete_data_gradient(&theta, &stats).unwrap();
        assert!(grad.iter().all(|g| g.abs() < 1e-10));

        let info = complete_information(&theta, &stats, &[0, 1, 2, 3, 4], 4).unwrap();

        let Theta::Car(t) = theta else { unreachable!() };
        let sigma = Matrix2::new(
            t.sigma11,
            t.rho * (t.sigma11 * t.sigma22).sqrt(),
            t.rho * (t.sigma11 * t.sigma22).sqrt(),
            t.sigma22,
        );
        let precision = sigma.try_inverse().unwrap() * 4.0;
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(info[[i, j]], precision[(i, j)], max_relative = 1e-5);
            }
        }
        assert_eq!(info, info.t());
    }

    #[test]
    // Purpose
    // -------
    // R = 0 leaves Vc unchanged; R = ½·I doubles it.
    //
    // Given
    // -----
    // - The CAR optimum with hand-set sensitivity matrices.
    //
    // Expect
    // ------
    // - Covariances in ratio 2 element-wise; natural SE of mu1 equals the
    //   transformed SE.
    fn sem_inflation_scales_complete_data_covariance() {
        let free = vec![0, 1, 2, 3, 4];
        let zero = SensitivityMatrix {
            free: free.clone(),
            matrix: Array2::zeros((5, 5)),
            rows_done: 5,
            rounds: 2,
        };
        let half = SensitivityMatrix { matrix: Array2::eye(5) * 0.5, ..zero.clone() };

        let base = sem_covariance(&outcome(Some(zero)), &data()).unwrap();
        let inflated = sem_covariance(&outcome(Some(half)), &data()).unwrap();

        for (a, b) in inflated.covariance.iter().zip(base.covariance.iter()) {
            assert_relative_eq!(*a, 2.0 * b, epsilon = 1e-12, max_relative = 1e-9);
        }
        assert_eq!(base.std_errors[0], base.std_errors_transformed[0]);
        assert!(base.std_errors.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    // Purpose
    // -------
    // A fit without the SEM pass has no corrected covariance.
    //
    // Given
    // -----
    // - An outcome with `sensitivity = None`.
    //
    // Expect
    // ------
    // - `EcoError::SemNotRun`.
    fn sem_covariance_requires_sensitivity() {
        assert!(matches!(sem_covariance(&outcome(None), &data()), Err(EcoError::SemNotRun)));
    }
}
