//! Errors raised while loading inputs and running projection batches.

use std::path::{Path, PathBuf};

use impact_curves::{AdaptationError, CsvvError, CurveError, PvalError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("required input file not found: {}", path.display())]
    MissingDependencyFile { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no weather for region '{region}' in {year}")]
    MissingWeather { region: String, year: i32 },

    #[error("no economic data for region '{region}' up to {year}")]
    MissingEconomics { region: String, year: i32 },

    #[error("impact for region '{region}' in {year} is not finite")]
    NonFinite { region: String, year: i32 },

    #[error("region '{region}'{}: {source}", in_year(.year))]
    Region {
        region: String,
        year: Option<i32>,
        #[source]
        source: Box<ProjectionError>,
    },

    #[error("{}: {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: Box<ProjectionError>,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Csvv(#[from] CsvvError),

    #[error(transparent)]
    Pval(#[from] PvalError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Adaptation(#[from] AdaptationError),
}

impl ProjectionError {
    /// Attach the region and year being projected, unless already named
    pub(crate) fn in_region(self, region: &str, year: Option<i32>) -> Self {
        match self {
            located @ (ProjectionError::MissingWeather { .. }
            | ProjectionError::MissingEconomics { .. }
            | ProjectionError::NonFinite { .. }
            | ProjectionError::Region { .. }) => located,
            other => ProjectionError::Region {
                region: region.to_string(),
                year,
                source: Box::new(other),
            },
        }
    }

    /// Attach the input file being read, unless it is already the subject
    pub(crate) fn in_file(self, path: &Path) -> Self {
        match self {
            located @ (ProjectionError::MissingDependencyFile { .. }
            | ProjectionError::Input { .. }) => located,
            other => ProjectionError::Input {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}

fn in_year(year: &Option<i32>) -> String {
    year.map(|year| format!(" in {year}")).unwrap_or_default()
}

/// Error if `path` does not exist
pub(crate) fn require_file(path: &Path) -> Result<(), ProjectionError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ProjectionError::MissingDependencyFile {
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_context_names_region_and_year() {
        let inner = ProjectionError::Curve(CurveError::UnknownCovariate {
            name: "loggdppc".to_string(),
        });
        let message = inner.in_region("A", Some(2011)).to_string();
        assert_eq!(message, "region 'A' in 2011: covariate 'loggdppc' is not provided");

        let baseline = ProjectionError::Config("x".to_string()).in_region("B", None);
        assert_eq!(baseline.to_string(), "region 'B': invalid configuration: x");
    }

    #[test]
    fn located_errors_are_not_wrapped_twice() {
        let missing = ProjectionError::MissingWeather {
            region: "A".to_string(),
            year: 2011,
        };
        assert!(matches!(
            missing.in_region("A", Some(2011)),
            ProjectionError::MissingWeather { .. }
        ));

        let absent = ProjectionError::MissingDependencyFile {
            path: PathBuf::from("absent.csv"),
        };
        assert!(matches!(
            absent.in_file(Path::new("absent.csv")),
            ProjectionError::MissingDependencyFile { .. }
        ));
    }

    #[test]
    fn file_context_names_the_path() {
        let inner = ProjectionError::Csvv(CsvvError::Malformed(
            "missing section 'covarnames'".to_string(),
        ));
        let message = inner.in_file(Path::new("models/bad.csvv")).to_string();
        assert!(message.starts_with("models/bad.csvv: "), "{message}");
        assert!(message.contains("covarnames"));
    }
}
