//! sufficient — population sufficient statistics for one E-step.
//!
//! Purpose
//! -------
//! Run the per-unit E-step over every unit and reduce the results into the
//! population averages consumed by the M-step, plus the optional
//! log-likelihood and diagnostic counts.
//!
//! Key behaviors
//! -------------
//! - Units are evaluated in parallel with `rayon`; the reduction runs
//!   afterwards, sequentially and left to right over unit index, so the
//!   result does not depend on scheduling.
//! - CAR keeps five averages. NCAR adds `E[W1*·logit X]`, `E[W2*·logit X]`
//!   and the covariate moments. Under the NCAR regression layout a second
//!   pass computes moments of the residuals `W* − beta·(logit X − mu3)` using
//!   the current slopes.
//! - Diagnostics are logged with `log::warn!` and counted, never fatal.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every average divides by the total number of units.
//! - The state's `unit_means` and `covariate_offsets` are indexed like
//!   `data.units()`.
//!
//! Testing notes
//! -------------
//! - Unit tests check that each average equals the mean of per-unit
//!   contributions and that the residual pass matches its closed form.
use crate::{
    em::expectation::{unit_expectation, UnitMoments},
    model::{
        core::{data::EcoData, params::Theta, state::ModelState},
        errors::{EcoError, EcoResult},
    },
};
use log::warn;
use ndarray::Array1;
use rayon::prelude::*;

/// Population averages of the five latent logit moments.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatentMoments {
    pub w1: f64,
    pub w2: f64,
    pub w1_sq: f64,
    pub w2_sq: f64,
    pub w1_w2: f64,
}

impl LatentMoments {
    pub fn to_array(&self) -> [f64; 5] {
        [self.w1, self.w2, self.w1_sq, self.w2_sq, self.w1_w2]
    }

    fn from_sums(s: [f64; 5], n: f64) -> Self {
        LatentMoments {
            w1: s[0] / n,
            w2: s[1] / n,
            w1_sq: s[2] / n,
            w2_sq: s[3] / n,
            w1_w2: s[4] / n,
        }
    }

    /// Second moments about `(m1, m2)`: `(I11, I22, I12)`.
    pub fn centered_at(&self, m1: f64, m2: f64) -> (f64, f64, f64) {
        let i11 = self.w1_sq - 2.0 * self.w1 * m1 + m1 * m1;
        let i22 = self.w2_sq - 2.0 * self.w2 * m2 + m2 * m2;
        let i12 = self.w1_w2 - self.w1 * m2 - self.w2 * m1 + m1 * m2;
        (i11, i22, i12)
    }
}

/// Sufficient statistics, tagged by model flavor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SufficientStats {
    Car(LatentMoments),
    Ncar {
        moments: LatentMoments,
        /// `E[W1*·logit X]`.
        w1_x: f64,
        /// `E[W2*·logit X]`.
        w2_x: f64,
        /// Mean of `logit X` over all units.
        x_mean: f64,
        /// Mean of `(logit X)²` over all units.
        x_sq: f64,
        /// Moments of the regression residuals; regression layout only.
        residual: Option<LatentMoments>,
    },
}

impl SufficientStats {
    pub fn moments(&self) -> &LatentMoments {
        match self {
            SufficientStats::Car(m) => m,
            SufficientStats::Ncar { moments, .. } => moments,
        }
    }

    /// Flat vector: five moments, the two NCAR cross-moments when present,
    /// then the log-likelihood slot (NaN when not tracked).
    pub fn to_vec(&self, log_likelihood: Option<f64>) -> Array1<f64> {
        let mut out = self.moments().to_array().to_vec();
        if let SufficientStats::Ncar { w1_x, w2_x, .. } = self {
            out.push(*w1_x);
            out.push(*w2_x);
        }
        out.push(log_likelihood.unwrap_or(f64::NAN));
        Array1::from(out)
    }
}

/// Counts of non-fatal per-unit diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounts {
    pub tomography_mismatches: usize,
    pub jensen_violations: usize,
}

impl std::ops::AddAssign for DiagnosticCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.tomography_mismatches += rhs.tomography_mismatches;
        self.jensen_violations += rhs.jensen_violations;
    }
}

/// Everything one E-step produces.
#[derive(Debug, Clone, PartialEq)]
pub struct EStepOutput {
    pub stats: SufficientStats,
    pub units: Vec<UnitMoments>,
    pub log_likelihood: Option<f64>,
    pub diagnostics: DiagnosticCounts,
}

/// Run the E-step for every unit and aggregate.
///
/// Parameters
/// ----------
/// - `state`: current [`ModelState`].
/// - `data`: the units being fitted.
/// - `with_ll`: sum per-unit log-likelihood contributions.
///
/// Errors
/// ------
/// - [`EcoError::EmptyData`] for an empty unit set.
/// - Per-unit errors (`SingularModel`, `DegenerateIntegral`) propagate.
pub fn e_step(state: &ModelState, data: &EcoData, with_ll: bool) -> EcoResult<EStepOutput> {
    if data.is_empty() {
        return Err(EcoError::EmptyData);
    }
    let units: Vec<UnitMoments> = data
        .units()
        .par_iter()
        .enumerate()
        .map(|(i, unit)| unit_expectation(i, unit, &state.unit_means[i], &state.sigma, with_ll))
        .collect::<EcoResult<Vec<_>>>()?;

    let n = units.len() as f64;
    let mut sums = [0.0; 5];
    let mut diagnostics = DiagnosticCounts::default();
    let mut log_likelihood = with_ll.then_some(0.0);
    for (i, m) in units.iter().enumerate() {
        for (s, v) in sums.iter_mut().zip(m.w_star.iter()) {
            *s += v;
        }
        if m.diagnostics.tomography_mismatch {
            warn!("unit {}: E[W1] is off the tomography line ({:?})", i, m.w);
            diagnostics.tomography_mismatches += 1;
        }
        if m.diagnostics.jensen_violation {
            warn!("unit {}: second moments violate Jensen's inequality ({:?})", i, m.w_star);
            diagnostics.jensen_violations += 1;
        }
        if let (Some(total), Some(ll)) = (log_likelihood.as_mut(), m.log_likelihood) {
            *total += ll;
        }
    }
    let moments = LatentMoments::from_sums(sums, n);

    let stats = match state.theta {
        Theta::Car(_) => SufficientStats::Car(moments),
        Theta::Ncar(t) => ncar_stats(moments, &units, &state.covariate_offsets, t.mu3, None),
        Theta::NcarFixedRho(t) => ncar_stats(
            moments,
            &units,
            &state.covariate_offsets,
            t.mu3,
            Some([t.beta1, t.beta2]),
        ),
    };

    Ok(EStepOutput { stats, units, log_likelihood, diagnostics })
}

fn ncar_stats(
    moments: LatentMoments, units: &[UnitMoments], offsets: &[f64], mu3: f64,
    beta: Option<[f64; 2]>,
) -> SufficientStats {
    let n = units.len() as f64;
    let (mut w1_x, mut w2_x, mut x_sum, mut x_sq) = (0.0, 0.0, 0.0, 0.0);
    for (m, &d) in units.iter().zip(offsets.iter()) {
        let lx = mu3 + d;
        w1_x += m.w_star[0] * lx;
        w2_x += m.w_star[1] * lx;
        x_sum += lx;
        x_sq += lx * lx;
    }

    let residual = beta.map(|[b1, b2]| {
        let mut r = [0.0; 5];
        for (m, &d) in units.iter().zip(offsets.iter()) {
            let [a, b, aa, bb, ab] = m.w_star;
            r[0] += a - b1 * d;
            r[1] += b - b2 * d;
            r[2] += aa - 2.0 * b1 * d * a + b1 * b1 * d * d;
            r[3] += bb - 2.0 * b2 * d * b + b2 * b2 * d * d;
            r[4] += ab - b2 * d * a - b1 * d * b + b1 * b2 * d * d;
        }
        LatentMoments::from_sums(r, n)
    });

    SufficientStats::Ncar {
        moments,
        w1_x: w1_x / n,
        w2_x: w2_x / n,
        x_mean: x_sum / n,
        x_sq: x_sq / n,
        residual,
    }
}
