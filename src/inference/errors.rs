//! Unified error handling for post-fit inference routines.
//!
//! This module defines `InferenceError`, the error type used by the SEM
//! covariance correction: finite-difference information matrices, matrix
//! inversions, and the delta-method mapping back to natural parameters. An
//! alias `InferenceResult<T>` standardizes the return type across inference
//! code.

/// Unified error type for inference routines.
///
/// Covers dimension disagreements between the sensitivity matrix and the free
/// parameter set, numerically invalid information matrices, and singular
/// systems encountered while forming the corrected covariance.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    // ---- Shape ----
    /// Sensitivity matrix and free-parameter list disagree in size.
    DimensionMismatch {
        expected: usize,
        actual: usize,
    },

    // ---- Information matrix ----
    /// Finite-difference Hessian contains NaN or infinite entries.
    InvalidHessian {
        row: usize,
        col: usize,
        value: f64,
    },

    /// A matrix that must be inverted is singular.
    SingularMatrix {
        context: &'static str,
    },

    /// A corrected variance came out negative or non-finite.
    InvalidVariance {
        index: usize,
        value: f64,
    },
}

pub type InferenceResult<T> = Result<T, InferenceError>;

impl std::error::Error for InferenceError {}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Shape ----
            InferenceError::DimensionMismatch { expected, actual } => write!(
                f,
                "Inference Error: Dimension mismatch (expected {}, got {})",
                expected, actual
            ),

            // ---- Information matrix ----
            InferenceError::InvalidHessian { row, col, value } => write!(
                f,
                "Inference Error: Non-finite Hessian entry at ({}, {}): {}",
                row, col, value
            ),
            InferenceError::SingularMatrix { context } => {
                write!(f, "Inference Error: Singular matrix in {}", context)
            }
            InferenceError::InvalidVariance { index, value } => write!(
                f,
                "Inference Error: Invalid corrected variance at index {} ({})",
                index, value
            ),
        }
    }
}
