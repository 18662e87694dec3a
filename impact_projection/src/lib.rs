//! Batch projection of climate impacts
//!
//! Ties the response-curve machinery of `impact_curves` to input data and
//! output files:
//! - `config`: TOML run configuration
//! - `weather` / `covariates`: per-region inputs by year
//! - `projection`: one pass over every region and year
//! - `batch`: Monte Carlo batches with the historical-climate pass
//! - `parallel`: batches across a rayon pool
//! - `output`: `impacts.csv`, `pvals.json` and the run summary

pub mod batch;
pub mod config;
pub mod covariates;
pub mod error;
pub mod output;
pub mod parallel;
pub mod projection;
pub mod weather;

pub use batch::{run_batch, run_projection, BatchInputs};
pub use config::ProjectionConfig;
pub use error::ProjectionError;
pub use output::{BatchSummary, ImpactRow, RunSummary};
pub use projection::{project, Aggregate, Calculation, ImpactRecord};
