//! optimization — numerical helpers shared by the EM engine.
//!
//! Purpose
//! -------
//! Host the numerically stable transforms that the E-step, the M-step, the
//! convergence test, and the SEM pass all rely on. The EM engine itself lives
//! in [`crate::em`]; this module only supplies scalar building blocks.
//!
//! Conventions
//! -----------
//! - Downstream code imports through `optimization::prelude::*` or directly
//!   from [`numerical_stability`].

pub mod numerical_stability;

pub mod prelude {
    pub use super::numerical_stability::prelude::*;
}
