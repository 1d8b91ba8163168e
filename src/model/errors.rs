//! Unified error handling for the ecological-inference model.
//!
//! This module defines `EcoError`, the central error type returned by data
//! packing, option validation, the EM engine, and post-fit accessors, and
//! `ParamError`, the narrower type raised while building or checking a
//! parameter vector. Aliases `EcoResult<T>` and `ParamResult<T>` standardize
//! return types across the crate.
use crate::inference::errors::InferenceError;

/// Unified error type for the EM engine and its inputs.
///
/// Groups configuration failures (raised before any iteration starts),
/// numerical degeneracies (raised mid-fit instead of propagating NaNs), and
/// post-fit state errors.
#[derive(Debug, Clone, PartialEq)]
pub enum EcoError {
    // ---- Data errors ----
    /// No observational units at all.
    EmptyData,

    /// Two arrays that must pair up have different lengths.
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A NaN or infinite value in an input array.
    NonFiniteData {
        what: &'static str,
        index: usize,
        value: f64,
    },

    /// A proportion outside [0, 1].
    OutOfUnitInterval {
        what: &'static str,
        index: usize,
        value: f64,
    },

    // ---- Option errors ----
    /// Convergence tolerance must be finite and strictly positive.
    InvalidTolerance {
        value: f64,
    },

    /// Iteration cap must be at least one.
    InvalidMaxIter {
        value: usize,
    },

    /// At most one linear hypothesis can be imposed on the means.
    TooManyHypotheses {
        count: usize,
    },

    /// Hypothesis with an all-zero or non-finite coefficient vector.
    DegenerateHypothesis,

    /// Parameter vector and options disagree on the model flavor.
    FlavorMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    // ---- Numerical errors ----
    /// A covariance lost positive definiteness or a moment formula divided by
    /// (near) zero.
    SingularModel {
        context: &'static str,
    },

    /// A regular unit's line integral has no usable node or produced
    /// non-finite moments.
    DegenerateIntegral {
        unit: usize,
        ln_mass: f64,
    },

    // ---- Model state errors ----
    /// Post-fit accessor called before `fit`.
    ModelNotFitted,

    /// SEM covariance requested from a fit that did not run the SEM pass.
    SemNotRun,

    // ---- Nested errors ----
    InvalidParam(ParamError),

    Inference(InferenceError),
}

pub type EcoResult<T> = Result<T, EcoError>;

impl std::error::Error for EcoError {}

impl From<ParamError> for EcoError {
    fn from(err: ParamError) -> Self {
        EcoError::InvalidParam(err)
    }
}

impl From<InferenceError> for EcoError {
    fn from(err: InferenceError) -> Self {
        EcoError::Inference(err)
    }
}

impl std::fmt::Display for EcoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Data errors ----
            EcoError::EmptyData => write!(f, "Data contains no observational units."),
            EcoError::LengthMismatch { what, expected, actual } => write!(
                f,
                "Length mismatch in {}: expected {}, got {}.",
                what, expected, actual
            ),
            EcoError::NonFiniteData { what, index, value } => {
                write!(f, "Non-finite value in {} at index {}: {}.", what, index, value)
            }
            EcoError::OutOfUnitInterval { what, index, value } => {
                write!(f, "Value in {} at index {} is outside [0, 1]: {}.", what, index, value)
            }

            // ---- Option errors ----
            EcoError::InvalidTolerance { value } => {
                write!(f, "Tolerance must be finite and positive, got {}.", value)
            }
            EcoError::InvalidMaxIter { value } => {
                write!(f, "Maximum iterations must be at least 1, got {}.", value)
            }
            EcoError::TooManyHypotheses { count } => {
                write!(f, "At most one linear hypothesis is supported, got {}.", count)
            }
            EcoError::DegenerateHypothesis => {
                write!(f, "Linear hypothesis coefficients must be finite and not all zero.")
            }
            EcoError::FlavorMismatch { expected, actual } => {
                write!(f, "Model flavor mismatch: expected {}, got {}.", expected, actual)
            }

            // ---- Numerical errors ----
            EcoError::SingularModel { context } => {
                write!(f, "Singular model: {}.", context)
            }
            EcoError::DegenerateIntegral { unit, ln_mass } => write!(
                f,
                "Line integral of unit {} is degenerate (log mass {}).",
                unit, ln_mass
            ),

            // ---- Model state errors ----
            EcoError::ModelNotFitted => write!(f, "Model has not been fitted yet."),
            EcoError::SemNotRun => {
                write!(f, "Sensitivity matrix unavailable: the fit did not run the SEM pass.")
            }

            // ---- Nested errors ----
            EcoError::InvalidParam(err) => write!(f, "{}", err),
            EcoError::Inference(err) => write!(f, "{}", err),
        }
    }
}

/// Errors raised while constructing or validating a parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamError {
    /// Parameter slice has the wrong length for the requested flavor.
    ThetaLengthMismatch {
        expected: usize,
        actual: usize,
    },

    /// A parameter is NaN or infinite.
    NonFiniteParam {
        index: usize,
        value: f64,
    },

    /// A variance is zero or negative.
    NonPositiveVariance {
        index: usize,
        value: f64,
    },

    /// A correlation is outside the open interval (-1, 1).
    CorrelationOutOfRange {
        index: usize,
        value: f64,
    },
}

pub type ParamResult<T> = Result<T, ParamError>;

impl std::error::Error for ParamError {}

impl std::fmt::Display for ParamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamError::ThetaLengthMismatch { expected, actual } => {
                write!(
                    f,
                    "Parameter vector length mismatch: expected {}, got {}.",
                    expected, actual
                )
            }
            ParamError::NonFiniteParam { index, value } => {
                write!(f, "Parameter {} is not finite: {}.", index, value)
            }
            ParamError::NonPositiveVariance { index, value } => {
                write!(f, "Variance parameter {} must be positive, got {}.", index, value)
            }
            ParamError::CorrelationOutOfRange { index, value } => {
                write!(f, "Correlation parameter {} must lie in (-1, 1), got {}.", index, value)
            }
        }
    }
}
