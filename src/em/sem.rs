//! Supplemented EM: numerical estimation of the EM rate matrix.
//!
//! Each free coordinate owns one row of the sensitivity matrix `R`. A round
//! perturbs the converged optimum in one coordinate towards the current EM
//! iterate, runs a single E-step and M-step from that trial on a fresh
//! [`ModelState`], and divides the resulting displacement of every free
//! coordinate by the size of the perturbation, all on the transformed scale.
//!
//! Rows stop being recomputed once two consecutive evaluations agree within
//! `sqrt(tolerance)`. The fit driver replaces its ordinary convergence test
//! with [`SemState::all_done`] while this pass runs.
//!
//! A trial point mixes one coordinate of the EM iterate into the optimum, so
//! it can fall outside the parameter space, for example with a joint
//! covariance that is not positive definite. Such a row is skipped for the round
//! with a `warn!` and retried on the next one; it never aborts the fit.
//!
//! Rows are evaluated in parallel. Each round reads the row statuses fixed at
//! its start, so the result does not depend on the order rows finish in.
use crate::{
    em::{
        convergence::{close_enough, RowStatus},
        mstep::m_step,
        sufficient::e_step,
    },
    model::{
        core::{data::EcoData, options::EMOptions, params::Theta, state::ModelState},
        errors::EcoResult,
    },
};
use log::{trace, warn};
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Row-wise state of the supplemented-EM pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SemState {
    /// Layout indices of the free coordinates; row/column `k` of `rows`
    /// refers to `free[k]`.
    pub free: Vec<usize>,
    pub optimum: Theta,
    optimum_t: Array1<f64>,
    pub rows: Array2<f64>,
    pub status: Vec<RowStatus>,
    /// Whether a row holds the result of at least one successful trial.
    evaluated: Vec<bool>,
    /// Completed rounds.
    pub rounds: usize,
}

/// What one row produced in a round.
enum RowUpdate {
    Keep(RowStatus),
    Computed(Array1<f64>, RowStatus),
}

impl SemState {
    pub fn new(optimum: Theta, free_mask: &[bool]) -> Self {
        let free: Vec<usize> =
            free_mask.iter().enumerate().filter_map(|(i, &f)| f.then_some(i)).collect();
        let k = free.len();
        SemState {
            free,
            optimum_t: optimum.transform(),
            optimum,
            rows: Array2::zeros((k, k)),
            status: vec![RowStatus::Active; k],
            evaluated: vec![false; k],
            rounds: 0,
        }
    }

    pub fn all_done(&self) -> bool {
        self.status.iter().all(RowStatus::is_done)
    }

    pub fn rows_done(&self) -> usize {
        self.status.iter().filter(|s| s.is_done()).count()
    }

    /// One SEM sub-iteration around `iterate`, the EM value preceding the
    /// current M-step.
    ///
    /// Rows already done are copied forward. A row whose trial coincides
    /// with the optimum in its own coordinate is frozen. A row whose trial
    /// fails keeps its previous values and stays active.
    pub fn round(&mut self, iterate: &Theta, data: &EcoData, options: &EMOptions) {
        let tol = options.tolerances.tolerance.sqrt();
        let snapshot = self.status.clone();
        let iterate_values = iterate.to_array();
        let opt_values = self.optimum.to_array().to_vec();
        let round = self.rounds + 1;

        let updates: Vec<RowUpdate> = (0..self.free.len())
            .into_par_iter()
            .map(|row| {
                if snapshot[row].is_done() {
                    return RowUpdate::Keep(RowStatus::Done);
                }
                let coord = self.free[row];
                let mut trial_values = opt_values.clone();
                trial_values[coord] = iterate_values[coord];
                match self.trial_row(&trial_values, coord, data, options) {
                    Ok(Some(new)) => {
                        let old = self.rows.row(row).to_owned();
                        let status = if self.evaluated[row] && close_enough(&new, &old, tol) {
                            RowStatus::Done
                        } else {
                            RowStatus::Active
                        };
                        trace!("SEM row {} round {}: {:?} ({:?})", coord, round, new, status);
                        RowUpdate::Computed(new, status)
                    }
                    Ok(None) => {
                        warn!("SEM row {}: trial coincides with the optimum, row frozen", coord);
                        RowUpdate::Keep(RowStatus::Done)
                    }
                    Err(err) => {
                        warn!("SEM row {} round {}: trial skipped ({})", coord, round, err);
                        RowUpdate::Keep(RowStatus::Active)
                    }
                }
            })
            .collect();

        for (row, update) in updates.into_iter().enumerate() {
            match update {
                RowUpdate::Keep(status) => self.status[row] = status,
                RowUpdate::Computed(values, status) => {
                    self.rows.row_mut(row).assign(&values);
                    self.evaluated[row] = true;
                    self.status[row] = status;
                }
            }
        }
        self.rounds = round;
    }

    /// One EM step from the trial point; `None` when it does not move
    /// coordinate `coord` away from the optimum on the transformed scale.
    fn trial_row(
        &self, trial_values: &[f64], coord: usize, data: &EcoData, options: &EMOptions,
    ) -> EcoResult<Option<Array1<f64>>> {
        let trial = self.optimum.with_values(trial_values)?;
        let step = trial.transform()[coord] - self.optimum_t[coord];
        if step == 0.0 || !step.is_finite() {
            return Ok(None);
        }
        let state = ModelState::from_theta(trial, data)?;
        let estep = e_step(&state, data, false)?;
        let out_t = m_step(&state, &estep, options)?.transform();
        Ok(Some(Array1::from_iter(
            self.free.iter().map(|&j| (out_t[j] - self.optimum_t[j]) / step),
        )))
    }
}
