//! em — expectation-maximization engine for the ecological-inference model.
//!
//! Purpose
//! -------
//! Fit the CAR / NCAR model by EM and, on request, estimate the EM rate
//! matrix by supplemented EM. Everything here is built on the domain types
//! of [`crate::model`].
//!
//! Key behaviors
//! -------------
//! - [`expectation`]: per-unit posterior moments for each data regime.
//! - [`sufficient`]: parallel E-step over all units and the population
//!   averages it reduces to.
//! - [`mstep`]: closed-form updates, including the linear-hypothesis
//!   correction.
//! - [`convergence`]: the coordinate-wise stopping test.
//! - [`sem`]: sensitivity rows of the supplemented-EM pass.
//! - [`driver`]: [`EcoModel::fit`], the loop tying the pieces together, and
//!   the [`FitOutcome`] it produces.
//!
//! Invariants & assumptions
//! ------------------------
//! - Steps are pure functions of a [`crate::model::ModelState`] and the
//!   data; only the driver owns and replaces the state.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests; full fits are exercised in
//!   `tests/integration_em_pipeline.rs`.
pub mod convergence;
pub mod driver;
pub mod expectation;
pub mod mstep;
pub mod sem;
pub mod sufficient;

pub use self::{
    convergence::{close_enough, RowStatus},
    driver::{
        CancellationToken, EcoModel, FitOutcome, FitStatus, IterationRecord, SensitivityMatrix,
        UnitPosterior,
    },
    mstep::m_step,
    sufficient::{e_step, DiagnosticCounts, EStepOutput, LatentMoments, SufficientStats},
};

pub mod prelude {
    pub use super::driver::{CancellationToken, EcoModel, FitOutcome, FitStatus};
}
