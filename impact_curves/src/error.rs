//! Error types for coefficient parsing, draws, curve construction and adaptation.
//!
//! Each stage has its own enum so callers can match on the condition that
//! stopped a region or a model.

use thiserror::Error;

/// Failures while reading a CSVV coefficient file.
#[derive(Debug, Error)]
pub enum CsvvError {
    #[error("CSVV input is empty or truncated: {reason}")]
    Incomplete { reason: String },

    #[error("numeric row on line {line} appears before any section marker")]
    Ordering { line: usize },

    #[error("malformed CSVV: {0}")]
    Malformed(String),

    #[error("invalid number '{value}' on line {line}")]
    InvalidNumber { line: usize, value: String },

    #[error("I/O error reading CSVV: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error reading CSVV: {0}")]
    Csv(#[from] csv::Error),
}

/// Failures in the pseudo-random value store.
#[derive(Debug, Error)]
pub enum PvalError {
    #[error("draw '{draw}' has no value for key '{key}' and the store is locked")]
    UnknownKeyAfterLock { draw: String, key: String },

    #[error("draw '{draw}' replayed all {captured} captured seeds for key '{key}'")]
    SeedsExhausted {
        draw: String,
        key: String,
        captured: usize,
    },

    #[error("I/O error on pval record: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pval record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while turning coefficients and covariates into a curve.
#[derive(Debug, Error)]
pub enum CurveError {
    #[error("covariate '{name}' is not provided")]
    UnknownCovariate { name: String },

    #[error("curve shape expects {expected} coefficients, model supplies {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("invalid curve shape: {0}")]
    InvalidShape(String),

    #[error(transparent)]
    Pval(#[from] PvalError),

    #[error(transparent)]
    Csvv(#[from] CsvvError),
}

/// Failures in the per-region adaptation state machine.
#[derive(Debug, Error)]
pub enum AdaptationError {
    #[error("region '{region}' updated for year {requested} after year {last}")]
    OutOfOrder {
        region: String,
        last: i32,
        requested: i32,
    },

    #[error("region '{region}' jumped from year {last} to {requested}")]
    SkippedYears {
        region: String,
        last: i32,
        requested: i32,
    },

    #[error(transparent)]
    Curve(#[from] CurveError),
}
