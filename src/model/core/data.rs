//! Observation containers for 2x2 ecological inference.
//!
//! Purpose
//! -------
//! Hold the observational units of one fit as a tagged variant per
//! data-availability regime, and centralize validation and edge clamping of
//! the raw input arrays so the EM engine can rely on clean values.
//!
//! Key behaviors
//! -------------
//! - [`Unit`] distinguishes regular aggregate rows, homogeneous-X1 and
//!   homogeneous-X0 rows, and survey rows, each carrying only the fields it
//!   needs.
//! - [`EcoData`] validates input arrays (lengths, finiteness, unit interval),
//!   clamps boundary values, and keeps units in the fixed order regular,
//!   X1-homogeneous, X0-homogeneous, survey regardless of the order the
//!   builders are called in.
//!
//! Invariants & assumptions
//! ------------------------
//! - Covariates of regular units lie in `[UNIT_EDGE, 1 − UNIT_EDGE]`.
//! - Observed latent proportions (homogeneous and survey) lie in
//!   `[UNIT_EDGE, 1 − UNIT_EDGE]`, so their logits are finite.
//! - The target marginal `Y` of a regular unit is kept as given (in [0, 1]);
//!   boundary values are handled by the E-step edge policy.
//!
//! Conventions
//! -----------
//! - Indexing into [`EcoData::units`] is 0-based and matches the order of
//!   per-unit outputs in a fit outcome.
//! - A homogeneous-X1 unit stands for a table with `X = 1`; its covariate is
//!   reported as `1 − UNIT_EDGE`. Homogeneous-X0 units report `UNIT_EDGE`.
//!
//! Testing notes
//! -------------
//! - Unit tests cover clamping, ordering across builder calls, and each
//!   validation failure.
use crate::{
    model::errors::{EcoError, EcoResult},
    optimization::numerical_stability::transformations::{clamp_unit, logit, UNIT_EDGE},
};

/// One observational unit, tagged by which quantities were observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unit {
    /// Aggregate row: covariate share `x` and target share `y`.
    Regular { x: f64, y: f64 },
    /// Table where every individual has `X = 1`; `W1` is observed.
    HomogeneousX1 { w1: f64 },
    /// Table where every individual has `X = 0`; `W2` is observed.
    HomogeneousX0 { w2: f64 },
    /// Survey row with both latent proportions observed, optionally with the
    /// covariate share.
    Survey { w1: f64, w2: f64, x: Option<f64> },
}

impl Unit {
    /// Covariate share carried by the unit, if any.
    pub fn covariate(&self) -> Option<f64> {
        match *self {
            Unit::Regular { x, .. } => Some(x),
            Unit::HomogeneousX1 { .. } => Some(1.0 - UNIT_EDGE),
            Unit::HomogeneousX0 { .. } => Some(UNIT_EDGE),
            Unit::Survey { x, .. } => x,
        }
    }

    /// `logit` of the covariate share, if any.
    pub fn logit_covariate(&self) -> Option<f64> {
        self.covariate().map(logit)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, Unit::Regular { .. })
    }
}

/// Counts of units per data-availability regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSizes {
    pub regular: usize,
    pub homogeneous_x1: usize,
    pub homogeneous_x0: usize,
    pub survey: usize,
}

impl GroupSizes {
    pub fn total(&self) -> usize {
        self.regular + self.homogeneous_x1 + self.homogeneous_x0 + self.survey
    }
}

/// `EcoData` — validated observational units for one fit.
///
/// Purpose
/// -------
/// Own the full set of units, packed in the canonical order
/// (regular, X1-homogeneous, X0-homogeneous, survey), after validation and
/// clamping.
///
/// Parameters
/// ----------
/// Constructed via [`EcoData::new`] from the regular subgroup, then extended
/// with [`EcoData::with_homogeneous_x1`], [`EcoData::with_homogeneous_x0`]
/// and [`EcoData::with_survey`].
///
/// Fields
/// ------
/// - `units`: `Vec<Unit>`
///   Units in canonical order.
/// - `sizes`: [`GroupSizes`]
///   Number of units per regime; `sizes.total() == units.len()`.
///
/// Notes
/// -----
/// - A regular subgroup may be empty (survey-only fits are allowed); a fit on
///   data with no units at all is rejected by the model with
///   [`EcoError::EmptyData`].
#[derive(Debug, Clone, PartialEq)]
pub struct EcoData {
    units: Vec<Unit>,
    sizes: GroupSizes,
}

impl EcoData {
    /// Build the regular subgroup from paired covariate / target shares.
    ///
    /// Errors
    /// ------
    /// - [`EcoError::LengthMismatch`] when `x` and `y` differ in length.
    /// - [`EcoError::NonFiniteData`] / [`EcoError::OutOfUnitInterval`] on any
    ///   invalid entry.
    ///
    /// Examples
    /// --------
    /// ```rust
    /// # use rust_ecoinference::model::core::data::EcoData;
    /// let data = EcoData::new(&[0.3, 1.0], &[0.4, 0.5]).unwrap();
    /// assert_eq!(data.sizes().regular, 2);
    /// ```
    pub fn new(x: &[f64], y: &[f64]) -> EcoResult<Self> {
        if x.len() != y.len() {
            return Err(EcoError::LengthMismatch {
                what: "regular y",
                expected: x.len(),
                actual: y.len(),
            });
        }
        check_proportions("regular x", x)?;
        check_proportions("regular y", y)?;

        let units: Vec<Unit> = x
            .iter()
            .zip(y.iter())
            .map(|(&x, &y)| Unit::Regular { x: clamp_unit(x), y })
            .collect();
        let sizes = GroupSizes { regular: units.len(), ..GroupSizes::default() };
        Ok(EcoData { units, sizes })
    }

    /// Append X1-homogeneous units with observed `W1` values.
    pub fn with_homogeneous_x1(mut self, w1: &[f64]) -> EcoResult<Self> {
        check_proportions("homogeneous x1 w1", w1)?;
        let at = self.sizes.regular + self.sizes.homogeneous_x1;
        let new_units = w1.iter().map(|&w| Unit::HomogeneousX1 { w1: clamp_unit(w) });
        self.units.splice(at..at, new_units);
        self.sizes.homogeneous_x1 += w1.len();
        Ok(self)
    }

    /// Append X0-homogeneous units with observed `W2` values.
    pub fn with_homogeneous_x0(mut self, w2: &[f64]) -> EcoResult<Self> {
        check_proportions("homogeneous x0 w2", w2)?;
        let at = self.sizes.regular + self.sizes.homogeneous_x1 + self.sizes.homogeneous_x0;
        let new_units = w2.iter().map(|&w| Unit::HomogeneousX0 { w2: clamp_unit(w) });
        self.units.splice(at..at, new_units);
        self.sizes.homogeneous_x0 += w2.len();
        Ok(self)
    }

    /// Append survey units with both latent shares observed.
    ///
    /// `x`, when present, must pair up with `w1`/`w2` and supplies the
    /// covariate share used by the NCAR model.
    pub fn with_survey(mut self, w1: &[f64], w2: &[f64], x: Option<&[f64]>) -> EcoResult<Self> {
        if w1.len() != w2.len() {
            return Err(EcoError::LengthMismatch {
                what: "survey w2",
                expected: w1.len(),
                actual: w2.len(),
            });
        }
        check_proportions("survey w1", w1)?;
        check_proportions("survey w2", w2)?;
        if let Some(x) = x {
            if x.len() != w1.len() {
                return Err(EcoError::LengthMismatch {
                    what: "survey x",
                    expected: w1.len(),
                    actual: x.len(),
                });
            }
            check_proportions("survey x", x)?;
        }

        for i in 0..w1.len() {
            self.units.push(Unit::Survey {
                w1: clamp_unit(w1[i]),
                w2: clamp_unit(w2[i]),
                x: x.map(|x| clamp_unit(x[i])),
            });
        }
        self.sizes.survey += w1.len();
        Ok(self)
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn sizes(&self) -> GroupSizes {
        self.sizes
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Sample mean and variance (divisor `n`) of `logit(X)` over units that
    /// carry a covariate. `None` when fewer than two such units exist.
    pub fn logit_covariate_moments(&self) -> Option<(f64, f64)> {
        let values: Vec<f64> = self.units.iter().filter_map(Unit::logit_covariate).collect();
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some((mean, var))
    }
}

fn check_proportions(what: &'static str, values: &[f64]) -> EcoResult<()> {
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(EcoError::NonFiniteData { what, index, value });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(EcoError::OutOfUnitInterval { what, index, value });
        }
    }
    Ok(())
}
