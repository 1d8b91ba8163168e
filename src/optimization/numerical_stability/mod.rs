//! numerical_stability — scalar transforms and shared numeric constants.
//!
//! Purpose
//! -------
//! Collect the numerically stable scalar transforms used by the EM engine and
//! the coordinate-wise parameter transform that gives the convergence test
//! and the SEM ratios an unbounded scale to work on.
//!
//! Key behaviors
//! -------------
//! - Provide `logit` / `safe_logistic` for moving between proportions and the
//!   latent normal scale.
//! - Provide the Fisher z pair for correlations and the log / exp pair for
//!   variances, exposed through [`transform_coordinate`] and
//!   [`untransform_coordinate`] keyed on [`CoordKind`].
//! - Centralize edge constants (`UNIT_EDGE`, `Y_EDGE_MARGIN`) so data
//!   packing and the E-step agree on where the boundaries are.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs are finite. Domain checks (variances > 0, correlations inside
//!   (−1, 1)) are enforced by `Theta::validate` in `model::core::params`
//!   before any transform is applied.
//!
//! Conventions
//! -----------
//! - This module never logs, performs I/O, or touches global state.
//!
//! Testing notes
//! -------------
//! - Unit tests in [`transformations`] cover naive-formula agreement, round
//!   trips for every coordinate kind, and boundary clamping.

pub mod transformations;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::transformations::{
    clamp_unit, fisher_z, inverse_fisher_z, logit, safe_logistic, transform_coordinate,
    untransform_coordinate, untransform_derivative, CoordKind, UNIT_EDGE, Y_EDGE_MARGIN,
};

pub mod prelude {
    pub use super::transformations::{
        clamp_unit, logit, safe_logistic, transform_coordinate, untransform_coordinate,
        CoordKind,
    };
}
