//! driver — the EM / SEM fit loop and its outcome.
//!
//! Purpose
//! -------
//! Own the model state for one fit, alternate E- and M-steps until the
//! convergence predicate holds or the iteration cap is hit, optionally run
//! the supplemented-EM rounds, and package the final estimates.
//!
//! Key behaviors
//! -------------
//! - Setup validates the starting vector against the configured flavor and,
//!   for NCAR, overwrites `(mu3, sig3)` with the sample moments of
//!   `logit(X)`.
//! - Each iteration snapshots the transformed parameters, runs one E-step
//!   (log-likelihood from the second iteration on, when tracking), one
//!   M-step, rebuilds the [`ModelState`], and either tests
//!   [`close_enough`] or runs one SEM round and tests whether every row is
//!   done.
//! - A final E-step at the fitted parameters yields the posterior means of
//!   every unit and the log-likelihood of the regular subset.
//! - Cancellation is checked once per iteration; a cancelled fit still
//!   returns an outcome built from the most recent iterate.
//!
//! Invariants & assumptions
//! ------------------------
//! - `results` is only written after the loop and the final pass succeed.
//! - The SEM pass works on fresh trial states and never touches the main
//!   state.
//!
//! Downstream usage
//! ----------------
//! - `inference::variance::sem_covariance` consumes a [`FitOutcome`] that
//!   carries a [`SensitivityMatrix`].
use crate::{
    em::{
        convergence::close_enough,
        mstep::m_step,
        sem::SemState,
        sufficient::{e_step, DiagnosticCounts, SufficientStats},
    },
    model::{
        core::{
            data::EcoData,
            options::{check_theta_flavor, EMOptions},
            params::Theta,
            state::ModelState,
        },
        errors::{EcoError, EcoResult},
    },
};
use log::{debug, info};
use ndarray::{Array1, Array2};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Shared flag for cooperative cancellation of a running fit.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the iteration loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    MaxIterationsExceeded,
    Cancelled,
}

/// One entry of the per-iteration trace.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Parameters after this iteration's M-step, transformed scale.
    pub theta_t: Array1<f64>,
    /// Log-likelihood of the parameters this iteration started from.
    pub log_likelihood: Option<f64>,
}

/// Posterior means of one unit at the fitted parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitPosterior {
    /// `E[W1], E[W2]`.
    pub w: [f64; 2],
    /// `E[W1*], E[W2*]`.
    pub w_star: [f64; 2],
}

/// The SEM rate matrix with the layout indices its rows and columns refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityMatrix {
    pub free: Vec<usize>,
    pub matrix: Array2<f64>,
    pub rows_done: usize,
    pub rounds: usize,
}

/// Result of [`EcoModel::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Fitted parameters, natural scale.
    pub theta: Theta,
    pub stats: SufficientStats,
    /// Flat sufficient statistics with the final log-likelihood in the last
    /// slot.
    pub sufficient: Array1<f64>,
    /// One entry per unit in fit order; regular units come first.
    pub posteriors: Vec<UnitPosterior>,
    pub iterations: usize,
    pub status: FitStatus,
    pub history: Vec<IterationRecord>,
    pub sensitivity: Option<SensitivityMatrix>,
    /// Log-likelihood of the regular units at `theta`.
    pub log_likelihood: f64,
    pub diagnostics: DiagnosticCounts,
}

impl FitOutcome {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// EM estimator for the CAR / NCAR ecological-inference model.
///
/// Holds the options and cancellation token of a fit; after
/// [`EcoModel::fit`] returns `Ok`, `results` carries the [`FitOutcome`].
#[derive(Debug, Clone)]
pub struct EcoModel {
    pub options: EMOptions,
    pub cancel: CancellationToken,
    pub results: Option<FitOutcome>,
}

impl EcoModel {
    pub fn new(options: EMOptions) -> Self {
        EcoModel { options, cancel: CancellationToken::new(), results: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run EM (and SEM when configured) from `theta0` and cache the outcome.
    ///
    /// ## Steps
    /// 1. Validate the data and the starting vector; fix the NCAR covariate
    ///    moments.
    /// 2. Iterate E-step / M-step up to `max_iter` times, checking for
    ///    cancellation first each time.
    /// 3. Stop on the plain convergence test or, with SEM, once every
    ///    sensitivity row is done.
    /// 4. Run one more E-step at the final parameters for the posteriors and
    ///    the regular-subset log-likelihood.
    ///
    /// ## Errors
    /// - [`EcoError::EmptyData`], [`EcoError::FlavorMismatch`].
    /// - [`EcoError::SingularModel`] / [`EcoError::DegenerateIntegral`] when
    ///   the iteration leaves the valid parameter space.
    ///
    /// ## Notes
    /// - Hitting the cap or cancelling is not an error; see
    ///   [`FitOutcome::status`].
    pub fn fit(&mut self, theta0: Theta, data: &EcoData) -> EcoResult<()> {
        if data.is_empty() {
            return Err(EcoError::EmptyData);
        }
        let options = &self.options;
        check_theta_flavor(options.flavor, options.fixed_rho, &theta0)?;
        let theta0 = with_data_covariate_moments(theta0, data)?;
        let mut state = ModelState::from_theta(theta0, data)?;

        let mut sem = match options.sem_optimum {
            Some(optimum) => {
                let optimum = with_data_covariate_moments(optimum, data)?;
                let mask = optimum.free_mask(options.fixed_rho, options.hypothesis.as_ref());
                Some(SemState::new(optimum, &mask))
            }
            None => None,
        };
        info!(
            "EM fit: {} model, {} units ({:?}), SEM {}",
            theta0.flavor_name(),
            data.len(),
            data.sizes(),
            if sem.is_some() { "on" } else { "off" }
        );

        let tol = options.tolerances.tolerance;
        let mut history = Vec::new();
        let mut diagnostics = DiagnosticCounts::default();
        let mut last_stats = None;
        let mut status = FitStatus::MaxIterationsExceeded;
        let mut iterations = 0;

        for iteration in 1..=options.tolerances.max_iter {
            if self.cancel.is_cancelled() {
                info!("EM fit cancelled before iteration {}", iteration);
                status = FitStatus::Cancelled;
                break;
            }
            let previous = state.theta;
            let previous_t = previous.transform();
            let track = options.track_log_likelihood && iteration > 1;

            let estep = e_step(&state, data, track)?;
            diagnostics += estep.diagnostics;
            let next = m_step(&state, &estep, options)?;
            state = ModelState::from_theta(next, data)?;
            let next_t = next.transform();

            let converged = match sem.as_mut() {
                Some(sem) => {
                    sem.round(&previous, data, options);
                    sem.all_done()
                }
                None => close_enough(&next_t, &previous_t, tol),
            };
            debug!(
                "EM iteration {}: theta_t = {:?}, log-likelihood = {:?}",
                iteration, next_t, estep.log_likelihood
            );
            history.push(IterationRecord {
                iteration,
                theta_t: next_t,
                log_likelihood: estep.log_likelihood,
            });
            last_stats = Some(estep.stats);
            iterations = iteration;
            if converged {
                status = FitStatus::Converged;
                break;
            }
        }

        let final_pass = e_step(&state, data, true)?;
        diagnostics += final_pass.diagnostics;
        let posteriors: Vec<UnitPosterior> = final_pass
            .units
            .iter()
            .map(|m| UnitPosterior { w: m.w, w_star: [m.w_star[0], m.w_star[1]] })
            .collect();
        let log_likelihood: f64 = data
            .units()
            .iter()
            .zip(final_pass.units.iter())
            .filter(|(unit, _)| unit.is_regular())
            .filter_map(|(_, m)| m.log_likelihood)
            .sum();
        let stats = last_stats.unwrap_or(final_pass.stats);
        let sensitivity = sem.map(|sem| SensitivityMatrix {
            rows_done: sem.rows_done(),
            rounds: sem.rounds,
            free: sem.free,
            matrix: sem.rows,
        });

        info!(
            "EM fit finished: {:?} after {} iterations, log-likelihood {:.6}",
            status, iterations, log_likelihood
        );
        self.results = Some(FitOutcome {
            theta: state.theta,
            stats,
            sufficient: stats.to_vec(Some(log_likelihood)),
            posteriors,
            iterations,
            status,
            history,
            sensitivity,
            log_likelihood,
            diagnostics,
        });
        Ok(())
    }

    /// The cached outcome of the last successful fit.
    pub fn outcome(&self) -> EcoResult<&FitOutcome> {
        self.results.as_ref().ok_or(EcoError::ModelNotFitted)
    }
}

/// Fix the NCAR covariate moments at their sample values; CAR passes through.
fn with_data_covariate_moments(theta: Theta, data: &EcoData) -> EcoResult<Theta> {
    if let Theta::Car(_) = theta {
        return Ok(theta);
    }
    let (mu3, sig3) = data.logit_covariate_moments().ok_or(EcoError::SingularModel {
        context: "fewer than two units carry a covariate",
    })?;
    Ok(theta.with_covariate_moments(mu3, sig3)?)
}
