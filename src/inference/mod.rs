//! inference — standard errors for fitted ecological-inference models.
//!
//! Purpose
//! -------
//! Post-estimation uncertainty on top of a fit that ran the supplemented-EM
//! pass: the complete-data information from the final sufficient statistics,
//! its SEM inflation, and delta-method standard errors on the natural scale.
//!
//! Key behaviors
//! -------------
//! - [`InferenceError`] / [`InferenceResult`] report shape mismatches,
//!   non-finite Hessians, singular systems and invalid variances.
//! - [`sem_covariance`] returns a [`SemCovariance`] over the free
//!   coordinates of the fit.
//!
//! Conventions
//! -----------
//! - Covariances live on the transformed scale used by the convergence test;
//!   only standard errors are mapped back to natural parameters.
pub mod errors;
pub mod variance;

pub use self::{
    errors::{InferenceError, InferenceResult},
    variance::{
        complete_data_gradient, complete_data_log_likelihood, complete_information,
        sem_covariance, SemCovariance,
    },
};
