//! Parameter vectors for the CAR and NCAR models.
//!
//! This module provides the **natural-space** parameter container [`Theta`],
//! a tagged variant over the three layouts the EM engine works with, and the
//! **bijective transform** to an unconstrained vector used by the convergence
//! test and the SEM sensitivity ratios.
//!
//! ## Layouts
//! - CAR (5): `(mu1, mu2, sigma11, sigma22, rho)`.
//! - NCAR (9): `(mu3, mu1, mu2, sig3, sig1, sig2, r13, r23, r12)`; index 0/3
//!   hold the mean and variance of `logit(X)`.
//! - NCAR with fixed correlation (9):
//!   `(mu3, mu1, mu2, sig3, sig1|3, sig2|3, beta1, beta2, r12|3)`; the latent
//!   pair is regressed on `logit(X) − mu3` with slopes `beta` and residual
//!   covariance built from the conditional variances and `r12|3`.
//!
//! ## Mapping conventions
//! - Means and regression slopes map identically.
//! - Variances map through `ln` / `exp`.
//! - Correlations map through Fisher z / `tanh`.
//!
//! ## Invariants validated by constructors
//! - All entries finite.
//! - Variances strictly positive.
//! - Correlations strictly inside (−1, 1).
//!
//! Joint positive definiteness of the 3x3 NCAR covariance is checked when the
//! model state is built (`model::core::state`).
use crate::{
    model::{
        core::options::{LinearHypothesis, ModelFlavor},
        errors::{ParamError, ParamResult},
    },
    optimization::numerical_stability::transformations::{
        transform_coordinate, untransform_coordinate, CoordKind,
    },
};
use ndarray::Array1;

const CAR_KINDS: [CoordKind; 5] = [
    CoordKind::Mean,
    CoordKind::Mean,
    CoordKind::Variance,
    CoordKind::Variance,
    CoordKind::Correlation,
];

const NCAR_KINDS: [CoordKind; 9] = [
    CoordKind::Mean,
    CoordKind::Mean,
    CoordKind::Mean,
    CoordKind::Variance,
    CoordKind::Variance,
    CoordKind::Variance,
    CoordKind::Correlation,
    CoordKind::Correlation,
    CoordKind::Correlation,
];

const NCAR_REGRESSION_KINDS: [CoordKind; 9] = [
    CoordKind::Mean,
    CoordKind::Mean,
    CoordKind::Mean,
    CoordKind::Variance,
    CoordKind::Variance,
    CoordKind::Variance,
    CoordKind::Coefficient,
    CoordKind::Coefficient,
    CoordKind::Correlation,
];

/// CAR parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarTheta {
    pub mu1: f64,
    pub mu2: f64,
    pub sigma11: f64,
    pub sigma22: f64,
    pub rho: f64,
}

/// NCAR parameters with a free latent correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NcarTheta {
    pub mu3: f64,
    pub mu1: f64,
    pub mu2: f64,
    pub sig3: f64,
    pub sig1: f64,
    pub sig2: f64,
    pub r13: f64,
    pub r23: f64,
    pub r12: f64,
}

/// NCAR parameters in regression form, used when the latent correlation is
/// held fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NcarRegressionTheta {
    pub mu3: f64,
    pub mu1: f64,
    pub mu2: f64,
    pub sig3: f64,
    /// Conditional variance of `W1*` given `logit(X)`.
    pub sig1_3: f64,
    /// Conditional variance of `W2*` given `logit(X)`.
    pub sig2_3: f64,
    pub beta1: f64,
    pub beta2: f64,
    /// Conditional correlation of the latent pair given `logit(X)`.
    pub r12_3: f64,
}

/// Natural-space parameter vector, tagged by model layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Theta {
    Car(CarTheta),
    Ncar(NcarTheta),
    NcarFixedRho(NcarRegressionTheta),
}

impl Theta {
    /// Build a parameter vector from its natural layout.
    ///
    /// Parameters
    /// ----------
    /// - `flavor`: [`ModelFlavor`]
    /// - `fixed_rho`: `bool`
    ///   Under NCAR, selects the regression layout.
    /// - `values`: `&[f64]`
    ///   Five values for CAR. Nine values for NCAR, or five
    ///   `(mu1, mu2, sig1, sig2, r12)` which are expanded with zero covariate
    ///   correlations (or zero slopes) and placeholder covariate moments
    ///   `(0, 1)`; the fit overwrites the covariate moments from the data.
    ///
    /// Errors
    /// ------
    /// - [`ParamError::ThetaLengthMismatch`] on any other length.
    /// - Domain errors from validation.
    pub fn from_slice(flavor: ModelFlavor, fixed_rho: bool, values: &[f64]) -> ParamResult<Theta> {
        let theta = match flavor {
            ModelFlavor::Car => {
                if values.len() != 5 {
                    return Err(ParamError::ThetaLengthMismatch {
                        expected: 5,
                        actual: values.len(),
                    });
                }
                Theta::Car(CarTheta {
                    mu1: values[0],
                    mu2: values[1],
                    sigma11: values[2],
                    sigma22: values[3],
                    rho: values[4],
                })
            }
            ModelFlavor::Ncar => {
                let full: [f64; 9] = match values.len() {
                    9 => {
                        let mut full = [0.0; 9];
                        full.copy_from_slice(values);
                        full
                    }
                    5 => {
                        let v = values;
                        [0.0, v[0], v[1], 1.0, v[2], v[3], 0.0, 0.0, v[4]]
                    }
                    actual => return Err(ParamError::ThetaLengthMismatch { expected: 9, actual }),
                };
                if fixed_rho {
                    Theta::NcarFixedRho(NcarRegressionTheta::from_array(&full))
                } else {
                    Theta::Ncar(NcarTheta::from_array(&full))
                }
            }
        };
        theta.validate()?;
        Ok(theta)
    }

    /// Rebuild a parameter vector of the same layout as `self` from natural
    /// values, validating the result.
    pub fn with_values(&self, values: &[f64]) -> ParamResult<Theta> {
        if values.len() != self.len() {
            return Err(ParamError::ThetaLengthMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        let theta = match self {
            Theta::Car(_) => Theta::Car(CarTheta {
                mu1: values[0],
                mu2: values[1],
                sigma11: values[2],
                sigma22: values[3],
                rho: values[4],
            }),
            Theta::Ncar(_) => {
                let mut full = [0.0; 9];
                full.copy_from_slice(values);
                Theta::Ncar(NcarTheta::from_array(&full))
            }
            Theta::NcarFixedRho(_) => {
                let mut full = [0.0; 9];
                full.copy_from_slice(values);
                Theta::NcarFixedRho(NcarRegressionTheta::from_array(&full))
            }
        };
        theta.validate()?;
        Ok(theta)
    }

    /// Natural values in layout order.
    pub fn to_array(&self) -> Array1<f64> {
        match self {
            Theta::Car(t) => Array1::from(vec![t.mu1, t.mu2, t.sigma11, t.sigma22, t.rho]),
            Theta::Ncar(t) => Array1::from(t.to_array().to_vec()),
            Theta::NcarFixedRho(t) => Array1::from(t.to_array().to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Theta::Car(_) => 5,
            Theta::Ncar(_) | Theta::NcarFixedRho(_) => 9,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn flavor(&self) -> ModelFlavor {
        match self {
            Theta::Car(_) => ModelFlavor::Car,
            Theta::Ncar(_) | Theta::NcarFixedRho(_) => ModelFlavor::Ncar,
        }
    }

    pub fn flavor_name(&self) -> &'static str {
        match self {
            Theta::Car(_) => "CAR",
            Theta::Ncar(_) => "NCAR",
            Theta::NcarFixedRho(_) => "NCAR (fixed rho)",
        }
    }

    pub fn coordinate_kinds(&self) -> &'static [CoordKind] {
        match self {
            Theta::Car(_) => &CAR_KINDS,
            Theta::Ncar(_) => &NCAR_KINDS,
            Theta::NcarFixedRho(_) => &NCAR_REGRESSION_KINDS,
        }
    }

    /// Positions of `(mu1, mu2)` in the layout.
    pub fn mean_indices(&self) -> [usize; 2] {
        match self {
            Theta::Car(_) => [0, 1],
            Theta::Ncar(_) | Theta::NcarFixedRho(_) => [1, 2],
        }
    }

    /// Map to the unconstrained scale.
    pub fn transform(&self) -> Array1<f64> {
        let kinds = self.coordinate_kinds();
        let mut out = self.to_array();
        out.iter_mut().zip(kinds.iter()).for_each(|(v, &k)| *v = transform_coordinate(k, *v));
        out
    }

    /// Inverse of [`Theta::transform`], producing the layout of `self`.
    pub fn from_transformed(&self, phi: &Array1<f64>) -> ParamResult<Theta> {
        let kinds = self.coordinate_kinds();
        if phi.len() != kinds.len() {
            return Err(ParamError::ThetaLengthMismatch {
                expected: kinds.len(),
                actual: phi.len(),
            });
        }
        let values: Vec<f64> =
            phi.iter().zip(kinds.iter()).map(|(&v, &k)| untransform_coordinate(k, v)).collect();
        self.with_values(&values)
    }

    /// Overwrite the covariate moments `(mu3, sig3)`; CAR is returned as is.
    pub fn with_covariate_moments(&self, mu3: f64, sig3: f64) -> ParamResult<Theta> {
        let theta = match *self {
            Theta::Car(t) => Theta::Car(t),
            Theta::Ncar(t) => Theta::Ncar(NcarTheta { mu3, sig3, ..t }),
            Theta::NcarFixedRho(t) => Theta::NcarFixedRho(NcarRegressionTheta { mu3, sig3, ..t }),
        };
        theta.validate()?;
        Ok(theta)
    }

    /// Which coordinates vary during the fit.
    ///
    /// - CAR: all, except `rho` under fixed correlation.
    /// - NCAR: never `mu3`, `sig3`; not `r12|3` under fixed correlation.
    /// - A single-coefficient hypothesis pins the mean it names.
    pub fn free_mask(&self, fixed_rho: bool, hypothesis: Option<&LinearHypothesis>) -> Vec<bool> {
        let mut mask = match self {
            Theta::Car(_) => vec![true, true, true, true, !fixed_rho],
            Theta::Ncar(_) => vec![false, true, true, false, true, true, true, true, true],
            Theta::NcarFixedRho(_) => {
                vec![false, true, true, false, true, true, true, true, false]
            }
        };
        if let Some(pinned) = hypothesis.and_then(LinearHypothesis::pinned_mean) {
            mask[self.mean_indices()[pinned]] = false;
        }
        mask
    }

    /// Domain checks: finite entries, positive variances, correlations in
    /// (−1, 1).
    pub fn validate(&self) -> ParamResult<()> {
        let values = self.to_array();
        for (index, (&value, &kind)) in values.iter().zip(self.coordinate_kinds()).enumerate() {
            if !value.is_finite() {
                return Err(ParamError::NonFiniteParam { index, value });
            }
            match kind {
                CoordKind::Variance if value <= 0.0 => {
                    return Err(ParamError::NonPositiveVariance { index, value });
                }
                CoordKind::Correlation if value <= -1.0 || value >= 1.0 => {
                    return Err(ParamError::CorrelationOutOfRange { index, value });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl NcarTheta {
    fn from_array(v: &[f64; 9]) -> Self {
        NcarTheta {
            mu3: v[0],
            mu1: v[1],
            mu2: v[2],
            sig3: v[3],
            sig1: v[4],
            sig2: v[5],
            r13: v[6],
            r23: v[7],
            r12: v[8],
        }
    }

    fn to_array(&self) -> [f64; 9] {
        [
            self.mu3, self.mu1, self.mu2, self.sig3, self.sig1, self.sig2, self.r13, self.r23,
            self.r12,
        ]
    }
}

impl NcarRegressionTheta {
    fn from_array(v: &[f64; 9]) -> Self {
        NcarRegressionTheta {
            mu3: v[0],
            mu1: v[1],
            mu2: v[2],
            sig3: v[3],
            sig1_3: v[4],
            sig2_3: v[5],
            beta1: v[6],
            beta2: v[7],
            r12_3: v[8],
        }
    }

    fn to_array(&self) -> [f64; 9] {
        [
            self.mu3,
            self.mu1,
            self.mu2,
            self.sig3,
            self.sig1_3,
            self.sig2_3,
            self.beta1,
            self.beta2,
            self.r12_3,
        ]
    }
}
