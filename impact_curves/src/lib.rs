//! Response curves for climate impact projections
//!
//! Turns estimated regression coefficients (CSVV files) and time-varying
//! covariates into per-region response curves, and evolves those curves as
//! regions adapt.
//!
//! Key pieces:
//! - `csvv`: coefficient file parser (legacy and current layouts)
//! - `pvals`: lazily sampled, lockable random values for Monte Carlo draws
//! - `generator`: coefficients plus covariates to a `ResponseCurve`
//! - `adapting`: year-by-year adaptation of a region's curve
//!
//! A batch threads one `PvalStore` through every call that needs a draw, so
//! a second pass over the locked store reuses the first pass's draws exactly.

pub mod adapting;
pub mod csvv;
pub mod curve;
pub mod error;
pub mod generator;
pub mod pvals;
pub mod stats;

use std::collections::HashMap;

pub use adapting::{blend, AdaptationRule, AdaptingCurve, AdaptiveModel};
pub use csvv::{CsvvData, CsvvFormat};
pub use curve::ResponseCurve;
pub use error::{AdaptationError, CsvvError, CurveError, PvalError};
pub use generator::{CurveGenerator, CurveShape, DrawScope};
pub use pvals::{PvalRecord, PvalStore};

/// Covariate values by name (e.g. `loggdppc`, `climtas`)
pub type Covariates = HashMap<String, f64>;
