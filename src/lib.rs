//! rust_ecoinference — EM and supplemented-EM estimation for 2x2 ecological
//! inference.
//!
//! Purpose
//! -------
//! Recover the joint distribution of two binary variables from marginal
//! tables by fitting a bivariate logit-normal latent model. Units may be
//! ordinary aggregates, homogeneous in the covariate, or surveyed directly.
//! The covariate is either treated as fixed (CAR) or as jointly normal with
//! the latent pair (NCAR).
//!
//! Key behaviors
//! -------------
//! - [`model`]: validated data, options, parameter vectors and model state.
//! - [`em`]: the E-step, closed-form M-step, convergence test, SEM rounds and
//!   the fit driver.
//! - [`inference`]: SEM-corrected covariance and standard errors.
//! - [`optimization`]: logit, Fisher z and the coordinate transform shared by
//!   the other modules.
//!
//! Invariants & assumptions
//! ------------------------
//! - Library code never panics on bad input; failures surface as
//!   [`model::EcoError`] through `EcoResult`.
//! - Per-unit work runs on the `rayon` pool; reductions are sequential in
//!   unit order so results do not depend on scheduling.
//!
//! Conventions
//! -----------
//! - Logging goes through the `log` facade: `debug!` per iteration, `info!`
//!   at fit start and end, `warn!` for per-unit diagnostics.
//!
//! Downstream usage
//! ----------------
//! ```no_run
//! use rust_ecoinference::prelude::*;
//!
//! # fn main() -> EcoResult<()> {
//! let data = EcoData::new(&[0.3, 0.6, 0.2, 0.8], &[0.4, 0.5, 0.2, 0.9])?;
//! let options = EMOptions::new(ModelFlavor::Car, false, Tolerances::new(1e-6, 500)?);
//! let theta0 = Theta::from_slice(ModelFlavor::Car, false, &[0.0, 0.0, 1.0, 1.0, 0.0])?;
//! let mut model = EcoModel::new(options);
//! model.fit(theta0, &data)?;
//! println!("{:?}", model.outcome()?.theta);
//! # Ok(())
//! # }
//! ```
pub mod em;
pub mod inference;
pub mod model;
pub mod optimization;

pub mod prelude {
    pub use crate::em::prelude::*;
    pub use crate::inference::{sem_covariance, SemCovariance};
    pub use crate::model::prelude::*;
}
