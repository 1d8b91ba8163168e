//! Model state derived from a parameter vector.
//!
//! Purpose
//! -------
//! Turn a natural-space [`Theta`] into everything the E-step needs: the 2x2
//! covariance of the latent logits given the covariate, the 3x3 joint
//! covariance under NCAR, and each unit's mean vector.
//!
//! Key behaviors
//! -------------
//! - [`ModelState::from_theta`] is a pure rebuild. The EM driver and every
//!   SEM trial point construct their own state, so nothing is shared or
//!   mutated in place between fits.
//! - Under CAR every unit shares `(mu1, mu2)`. Under NCAR a unit's mean moves
//!   linearly with `logit(X_i) − mu3`; units without a covariate sit at
//!   `mu3`.
//! - Positive definiteness is checked with a Cholesky factorization; failure
//!   surfaces as [`EcoError::SingularModel`].
//!
//! Conventions
//! -----------
//! - NCAR covariance reconstruction uses `cov_ij = r_ij·sqrt(var_i·var_j)`.
//!   The regression layout uses
//!   `Σ3_11 = c1 + b1²·s3`, `Σ3_12 = r·sqrt(c1·c2) + b1·b2·s3`,
//!   `Σ3_13 = b1·s3` (and symmetric entries).
//! - The collapsed 2x2 covariance is the Schur complement
//!   `Σ_ij = Σ3_ij − Σ3_i3·Σ3_j3 / Σ3_33`.
use crate::model::{
    core::{
        data::EcoData,
        params::{CarTheta, NcarRegressionTheta, NcarTheta, Theta},
    },
    errors::{EcoError, EcoResult},
};
use nalgebra::{Matrix2, Matrix3, Vector2};

/// Covariances and unit means implied by one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub theta: Theta,
    /// Covariance of `(W1*, W2*)` given the covariate.
    pub sigma: Matrix2<f64>,
    /// Joint covariance of `(W1*, W2*, logit X)`; NCAR only.
    pub sigma3: Option<Matrix3<f64>>,
    /// `logit(X_i) − mu3` per unit; zero under CAR and for units without a
    /// covariate.
    pub covariate_offsets: Vec<f64>,
    /// Mean of `(W1*, W2*)` per unit.
    pub unit_means: Vec<Vector2<f64>>,
}

impl ModelState {
    /// Build the state for `theta` over the units of `data`.
    ///
    /// Errors
    /// ------
    /// - [`EcoError::SingularModel`] when a covariance is not positive
    ///   definite.
    pub fn from_theta(theta: Theta, data: &EcoData) -> EcoResult<ModelState> {
        match theta {
            Theta::Car(t) => Self::car_state(theta, &t, data),
            Theta::Ncar(t) => Self::ncar_state(theta, &t, data),
            Theta::NcarFixedRho(t) => Self::ncar_regression_state(theta, &t, data),
        }
    }

    fn car_state(theta: Theta, t: &CarTheta, data: &EcoData) -> EcoResult<ModelState> {
        let sigma = covariance_2x2(t.sigma11, t.sigma22, t.rho);
        check_positive_definite2(&sigma)?;
        let mean = Vector2::new(t.mu1, t.mu2);
        Ok(ModelState {
            theta,
            sigma,
            sigma3: None,
            covariate_offsets: vec![0.0; data.len()],
            unit_means: vec![mean; data.len()],
        })
    }

    fn ncar_state(theta: Theta, t: &NcarTheta, data: &EcoData) -> EcoResult<ModelState> {
        let c12 = t.r12 * (t.sig1 * t.sig2).sqrt();
        let c13 = t.r13 * (t.sig1 * t.sig3).sqrt();
        let c23 = t.r23 * (t.sig2 * t.sig3).sqrt();
        let sigma3 = Matrix3::new(t.sig1, c12, c13, c12, t.sig2, c23, c13, c23, t.sig3);
        Self::from_joint(theta, sigma3, t.mu3, [t.mu1, t.mu2], data)
    }

    fn ncar_regression_state(
        theta: Theta, t: &NcarRegressionTheta, data: &EcoData,
    ) -> EcoResult<ModelState> {
        let sigma3 = regression_joint_covariance(t);
        Self::from_joint(theta, sigma3, t.mu3, [t.mu1, t.mu2], data)
    }

    fn from_joint(
        theta: Theta, sigma3: Matrix3<f64>, mu3: f64, means: [f64; 2], data: &EcoData,
    ) -> EcoResult<ModelState> {
        if sigma3.cholesky().is_none() {
            return Err(EcoError::SingularModel {
                context: "joint covariance of latent logits and covariate is not positive definite",
            });
        }
        let sigma = schur_collapse(&sigma3);
        check_positive_definite2(&sigma)?;

        let slope = Vector2::new(sigma3[(0, 2)], sigma3[(1, 2)]) / sigma3[(2, 2)];
        let base = Vector2::new(means[0], means[1]);
        let covariate_offsets: Vec<f64> = data
            .units()
            .iter()
            .map(|u| u.logit_covariate().map_or(0.0, |lx| lx - mu3))
            .collect();
        let unit_means = covariate_offsets.iter().map(|&d| base + slope * d).collect();

        Ok(ModelState {
            theta,
            sigma,
            sigma3: Some(sigma3),
            covariate_offsets,
            unit_means,
        })
    }
}

/// `[[s11, rho·sqrt(s11·s22)], [·, s22]]`.
pub fn covariance_2x2(s11: f64, s22: f64, rho: f64) -> Matrix2<f64> {
    let s12 = rho * (s11 * s22).sqrt();
    Matrix2::new(s11, s12, s12, s22)
}

/// Joint covariance of the regression layout.
pub fn regression_joint_covariance(t: &NcarRegressionTheta) -> Matrix3<f64> {
    let c12 = t.r12_3 * (t.sig1_3 * t.sig2_3).sqrt();
    let s11 = t.sig1_3 + t.beta1 * t.beta1 * t.sig3;
    let s22 = t.sig2_3 + t.beta2 * t.beta2 * t.sig3;
    let s12 = c12 + t.beta1 * t.beta2 * t.sig3;
    let s13 = t.beta1 * t.sig3;
    let s23 = t.beta2 * t.sig3;
    Matrix3::new(s11, s12, s13, s12, s22, s23, s13, s23, t.sig3)
}

/// Covariance of the first two coordinates given the third.
pub fn schur_collapse(sigma3: &Matrix3<f64>) -> Matrix2<f64> {
    let s33 = sigma3[(2, 2)];
    let s11 = sigma3[(0, 0)] - sigma3[(0, 2)] * sigma3[(0, 2)] / s33;
    let s22 = sigma3[(1, 1)] - sigma3[(1, 2)] * sigma3[(1, 2)] / s33;
    let s12 = sigma3[(0, 1)] - sigma3[(0, 2)] * sigma3[(1, 2)] / s33;
    Matrix2::new(s11, s12, s12, s22)
}

/// Reject a 2x2 covariance with non-finite entries or no Cholesky factor.
pub fn check_positive_definite2(sigma: &Matrix2<f64>) -> EcoResult<()> {
    if sigma.iter().any(|v| !v.is_finite()) || sigma.cholesky().is_none() {
        return Err(EcoError::SingularModel {
            context: "latent covariance is not positive definite",
        });
    }
    Ok(())
}

/// Inverse of a 2x2 covariance after a positive-definiteness check.
pub fn checked_inverse2(sigma: &Matrix2<f64>) -> EcoResult<Matrix2<f64>> {
    check_positive_definite2(sigma)?;
    sigma
        .try_inverse()
        .ok_or(EcoError::SingularModel { context: "latent covariance is not invertible" })
}
