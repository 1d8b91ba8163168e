//! EM options — configuration for one ecological-inference fit.
//!
//! Purpose
//! -------
//! Collect the knobs of an EM / SEM fit in one validated place: the model
//! flavor, the fixed-correlation restriction, convergence tolerances, an
//! optional linear hypothesis on the means, log-likelihood tracking, and the
//! optimum used by a supplemented-EM second pass.
//!
//! Key behaviors
//! -------------
//! - [`Tolerances`] validates the convergence tolerance and iteration cap.
//! - [`LinearHypothesis`] describes one equality constraint
//!   `c1·mu1 + c2·mu2 = target`.
//! - [`EMOptions`] bundles everything and rejects invalid combinations (more
//!   than one hypothesis, degenerate coefficients, an SEM optimum of the
//!   wrong flavor) before any iteration starts.
//!
//! Invariants & assumptions
//! ------------------------
//! - `tolerance` is finite and strictly positive; `max_iter >= 1`.
//! - At most one hypothesis is ever stored.
//!
//! Conventions
//! -----------
//! - Options are plain data; builders consume and return `Self`.
//!
//! Testing notes
//! -------------
//! - Unit tests check each rejection path and the defaults.
use crate::model::{
    core::params::Theta,
    errors::{EcoError, EcoResult},
};

/// Model variant.
///
/// - `Car`: five parameters `(mu1, mu2, sigma11, sigma22, rho)`; the
///   covariate is treated as fixed.
/// - `Ncar`: nine parameters; the logit of the covariate is jointly normal
///   with the latent pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFlavor {
    Car,
    Ncar,
}

impl ModelFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            ModelFlavor::Car => "CAR",
            ModelFlavor::Ncar => "NCAR",
        }
    }
}

/// Convergence tolerance and iteration cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Tolerances {
    /// Validated constructor.
    ///
    /// Errors
    /// ------
    /// - [`EcoError::InvalidTolerance`] when `tolerance` is not finite or not
    ///   strictly positive.
    /// - [`EcoError::InvalidMaxIter`] when `max_iter == 0`.
    pub fn new(tolerance: f64, max_iter: usize) -> EcoResult<Self> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(EcoError::InvalidTolerance { value: tolerance });
        }
        if max_iter == 0 {
            return Err(EcoError::InvalidMaxIter { value: max_iter });
        }
        Ok(Tolerances { tolerance, max_iter })
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances { tolerance: 1e-6, max_iter: 1000 }
    }
}

/// One linear equality constraint on the latent means,
/// `coefficients[0]·mu1 + coefficients[1]·mu2 = target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearHypothesis {
    pub coefficients: [f64; 2],
    pub target: f64,
}

impl LinearHypothesis {
    pub fn new(coefficients: [f64; 2], target: f64) -> EcoResult<Self> {
        let finite = coefficients.iter().all(|c| c.is_finite()) && target.is_finite();
        if !finite || coefficients.iter().all(|&c| c == 0.0) {
            return Err(EcoError::DegenerateHypothesis);
        }
        Ok(LinearHypothesis { coefficients, target })
    }

    /// Index of the mean pinned by a single-coefficient hypothesis.
    ///
    /// Returns `Some(0)` for `(c, 0)`, `Some(1)` for `(0, c)`, `None` when
    /// both coefficients are non-zero.
    pub fn pinned_mean(&self) -> Option<usize> {
        match (self.coefficients[0] != 0.0, self.coefficients[1] != 0.0) {
            (true, false) => Some(0),
            (false, true) => Some(1),
            _ => None,
        }
    }
}

/// `EMOptions` — validated configuration for an EM fit.
///
/// Purpose
/// -------
/// Bundle every setting the fit driver needs so invalid combinations are
/// rejected at construction time rather than mid-fit.
///
/// Fields
/// ------
/// - `flavor`: [`ModelFlavor`]
/// - `fixed_rho`: `bool`
///   Hold the latent correlation at its starting value.
/// - `tolerances`: [`Tolerances`]
/// - `hypothesis`: `Option<LinearHypothesis>`
///   At most one linear constraint on the means.
/// - `track_log_likelihood`: `bool`
///   Sum per-unit log-likelihoods during every E-step after the first.
/// - `sem_optimum`: `Option<Theta>`
///   Converged optimum of a first run; when present the fit runs the SEM
///   second pass and stops once every sensitivity row is done.
#[derive(Debug, Clone, PartialEq)]
pub struct EMOptions {
    pub flavor: ModelFlavor,
    pub fixed_rho: bool,
    pub tolerances: Tolerances,
    pub hypothesis: Option<LinearHypothesis>,
    pub track_log_likelihood: bool,
    pub sem_optimum: Option<Theta>,
}

impl EMOptions {
    pub fn new(flavor: ModelFlavor, fixed_rho: bool, tolerances: Tolerances) -> Self {
        EMOptions {
            flavor,
            fixed_rho,
            tolerances,
            hypothesis: None,
            track_log_likelihood: true,
            sem_optimum: None,
        }
    }

    /// Attach linear hypotheses on the means.
    ///
    /// Errors
    /// ------
    /// - [`EcoError::TooManyHypotheses`] when more than one is supplied.
    pub fn with_hypotheses(mut self, hypotheses: Vec<LinearHypothesis>) -> EcoResult<Self> {
        if hypotheses.len() > 1 {
            return Err(EcoError::TooManyHypotheses { count: hypotheses.len() });
        }
        self.hypothesis = hypotheses.into_iter().next();
        Ok(self)
    }

    pub fn with_log_likelihood(mut self, track: bool) -> Self {
        self.track_log_likelihood = track;
        self
    }

    /// Request the supplemented-EM second pass around `optimum`.
    ///
    /// Errors
    /// ------
    /// - [`EcoError::FlavorMismatch`] when `optimum` belongs to another model
    ///   flavor or correlation mode.
    pub fn with_sem(mut self, optimum: Theta) -> EcoResult<Self> {
        check_theta_flavor(self.flavor, self.fixed_rho, &optimum)?;
        self.sem_optimum = Some(optimum);
        Ok(self)
    }

    pub fn runs_sem(&self) -> bool {
        self.sem_optimum.is_some()
    }
}

/// Reject a parameter vector that does not match the configured flavor.
pub fn check_theta_flavor(flavor: ModelFlavor, fixed_rho: bool, theta: &Theta) -> EcoResult<()> {
    let matches = match (flavor, theta) {
        (ModelFlavor::Car, Theta::Car(_)) => true,
        (ModelFlavor::Ncar, Theta::Ncar(_)) => !fixed_rho,
        (ModelFlavor::Ncar, Theta::NcarFixedRho(_)) => fixed_rho,
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(EcoError::FlavorMismatch { expected: flavor.name(), actual: theta.flavor_name() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Tolerance / iteration-cap validation and defaults.
    // - Hypothesis validation and the pinned-mean rule.
    // - Rejection of multiple hypotheses and mismatched SEM optima.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // `Tolerances::new` rejects non-positive or non-finite tolerances and a
    // zero cap; the default is (1e-6, 1000).
    //
    // Given
    // -----
    // - Invalid and valid inputs.
    //
    // Expect
    // ------
    // - Matching error variants; defaults as documented.
    fn tolerances_validate_inputs() {
        assert!(matches!(Tolerances::new(0.0, 10), Err(EcoError::InvalidTolerance { .. })));
        assert!(matches!(Tolerances::new(f64::NAN, 10), Err(EcoError::InvalidTolerance { .. })));
        assert!(matches!(Tolerances::new(1e-6, 0), Err(EcoError::InvalidMaxIter { value: 0 })));
        let tols = Tolerances::default();
        assert_eq!(tols.tolerance, 1e-6);
        assert_eq!(tols.max_iter, 1000);
    }

    #[test]
    // Purpose
    // -------
    // More than one hypothesis is a fatal configuration error.
    //
    // Given
    // -----
    // - Two valid hypotheses.
    //
    // Expect
    // ------
    // - `TooManyHypotheses { count: 2 }`.
    fn with_hypotheses_rejects_more_than_one() {
        let h1 = LinearHypothesis::new([1.0, 0.0], 0.0).unwrap();
        let h2 = LinearHypothesis::new([0.0, 1.0], 0.0).unwrap();
        let opts = EMOptions::new(ModelFlavor::Car, false, Tolerances::default());

        let err = opts.with_hypotheses(vec![h1, h2]).unwrap_err();

        assert_eq!(err, EcoError::TooManyHypotheses { count: 2 });
    }

    #[test]
    // Purpose
    // -------
    // All-zero coefficients are degenerate; single-coefficient hypotheses pin
    // the mean they name.
    //
    // Given
    // -----
    // - Coefficients (0, 0), (2, 0), (0, −1), (1, −1).
    //
    // Expect
    // ------
    // - Error for (0, 0); pinned indices Some(0), Some(1), None.
    fn hypothesis_pins_single_mean() {
        assert_eq!(LinearHypothesis::new([0.0, 0.0], 1.0), Err(EcoError::DegenerateHypothesis));
        assert_eq!(LinearHypothesis::new([2.0, 0.0], 1.0).unwrap().pinned_mean(), Some(0));
        assert_eq!(LinearHypothesis::new([0.0, -1.0], 1.0).unwrap().pinned_mean(), Some(1));
        assert_eq!(LinearHypothesis::new([1.0, -1.0], 0.0).unwrap().pinned_mean(), None);
    }

    #[test]
    // Purpose
    // -------
    // An SEM optimum must match the configured flavor and correlation mode.
    //
    // Given
    // -----
    // - NCAR options with a CAR optimum.
    //
    // Expect
    // ------
    // - `FlavorMismatch`.
    fn with_sem_rejects_wrong_flavor() {
        let car = Theta::from_slice(ModelFlavor::Car, false, &[0.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
        let opts = EMOptions::new(ModelFlavor::Ncar, false, Tolerances::default());

        assert!(matches!(opts.with_sem(car), Err(EcoError::FlavorMismatch { .. })));
    }
}
