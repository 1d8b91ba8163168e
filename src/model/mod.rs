//! model — the bivariate logit-normal ecological-inference model.
//!
//! Purpose
//! -------
//! Provide the domain layer of the crate: observational units, parameter
//! vectors for the CAR and NCAR variants, fit options, the model state those
//! parameters imply, and the shared error types. The EM engine in
//! [`crate::em`] is built on top of these types.
//!
//! Key behaviors
//! -------------
//! - Re-export the everyday types from [`core`] and [`errors`] directly and
//!   through [`prelude`].
//!
//! Conventions
//! -----------
//! - Errors surface as [`EcoError`] / [`ParamError`] through the
//!   `EcoResult` / `ParamResult` aliases.
pub mod core;
pub mod errors;

pub use self::{
    core::{
        EMOptions, EcoData, GroupSizes, LinearHypothesis, ModelFlavor, ModelState, Theta,
        Tolerances, Unit,
    },
    errors::{EcoError, EcoResult, ParamError, ParamResult},
};

pub mod prelude {
    pub use super::core::{
        EMOptions, EcoData, LinearHypothesis, ModelFlavor, Theta, Tolerances, Unit,
    };
    pub use super::errors::{EcoError, EcoResult, ParamError, ParamResult};
}
