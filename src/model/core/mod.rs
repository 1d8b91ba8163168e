//! core — observational units, parameters, model state, and line integrals.
//!
//! Purpose
//! -------
//! Collect the building blocks of the 2x2 ecological-inference model that the
//! EM engine composes: validated data containers, fit options, the tagged
//! parameter vector and its transform, the model state derived from it, and
//! the tomography-line numerics used by the E-step.
//!
//! Key behaviors
//! -------------
//! - [`data`]: [`EcoData`] and the [`Unit`] sum type over the four
//!   data-availability regimes.
//! - [`options`]: [`EMOptions`], [`Tolerances`], [`LinearHypothesis`],
//!   [`ModelFlavor`].
//! - [`params`]: [`Theta`] with its CAR / NCAR layouts and transform.
//! - [`state`]: [`ModelState`], the covariances and unit means implied by a
//!   parameter vector.
//! - [`tomography`] and [`quadrature`]: segment bounds, logit-normal
//!   densities, normalizing constants and posterior moments.
//!
//! Invariants & assumptions
//! ------------------------
//! - Everything here is a pure function of its inputs; nothing logs or holds
//!   global mutable state apart from the lazily built quadrature table.
//!
//! Conventions
//! -----------
//! - Latent logits are written `W1*`, `W2*`; the covariate logit is
//!   `logit(X)`.
//! - Errors are reported through `EcoResult` / `ParamResult`.
pub mod data;
pub mod options;
pub mod params;
pub mod quadrature;
pub mod state;
pub mod tomography;

pub use self::{
    data::{EcoData, GroupSizes, Unit},
    options::{EMOptions, LinearHypothesis, ModelFlavor, Tolerances},
    params::{CarTheta, NcarRegressionTheta, NcarTheta, Theta},
    state::ModelState,
};
