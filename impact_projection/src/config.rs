//! Run configuration loaded from TOML
//!
//! Example:
//!
//! ```toml
//! [run]
//! name = "mortality-demo"
//! num_batches = 4
//! base_seed = 42
//! mode = "montecarlo"        # or "median", or { constant = 0.25 }
//!
//! [model]
//! csvv = "data/mortality.csvv"
//! curve = { kind = "zero_intercept_polynomial", coefficients = ["tas", "tas2"] }
//!
//! [adaptation]
//! kind = "full"
//! gamma_csvv = "data/gamma.csvv"
//! gamma_curve = { kind = "polynomial", coefficients = ["gamma"] }
//! grid = { start = -20.0, end = 40.0, step = 1.0 }
//!
//! [data]
//! weather = "data/weather.csv"
//! historical_years = [1981, 2010]
//! economics = "data/economics.csv"
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use std::fs;
use std::path::{Path, PathBuf};

use impact_curves::{AdaptationRule, CurveShape, DrawScope, PvalStore};
use log::warn;
use serde::Deserialize;

use crate::error::{require_file, ProjectionError};
use crate::projection::Aggregate;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionConfig {
    pub run: RunSettings,
    pub model: ModelSettings,
    #[serde(default)]
    pub adaptation: AdaptationSettings,
    pub data: DataSettings,
    #[serde(default)]
    pub calculation: CalculationSettings,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunSettings {
    pub name: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_num_batches")]
    pub num_batches: usize,
    #[serde(default)]
    pub base_seed: u64,
    #[serde(default)]
    pub mode: RunMode,
    pub threads: Option<usize>,
    #[serde(default = "default_true")]
    pub histclim: bool,
    /// Recorded `pvals.json` to replay instead of drawing
    pub replay: Option<PathBuf>,
}

/// Which coefficients a batch uses
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// A fresh multivariate-normal draw per batch
    #[default]
    MonteCarlo,
    /// Point estimates
    Median,
    /// Every coefficient at the given quantile of its marginal distribution
    Constant(f64),
}

impl RunMode {
    /// Empty pval store for `batch`
    pub fn store(&self, base_seed: u64, batch: usize) -> PvalStore {
        match self {
            RunMode::MonteCarlo => PvalStore::on_demand(base_seed.wrapping_add(batch as u64)),
            RunMode::Median => PvalStore::median(),
            RunMode::Constant(quantile) => PvalStore::constant(*quantile),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model_name")]
    pub name: String,
    pub csvv: PathBuf,
    /// Coefficient window `[start, end)` applied after parsing
    pub slice: Option<(usize, usize)>,
    pub curve: CurveSettings,
    #[serde(default)]
    pub draw_scope: DrawScopeSetting,
    /// Second model whose curve multiplies the first
    pub interaction: Option<InteractionSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionSettings {
    pub csvv: PathBuf,
    pub slice: Option<(usize, usize)>,
    pub curve: CurveSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurveSettings {
    Polynomial {
        coefficients: Vec<String>,
    },
    ZeroInterceptPolynomial {
        coefficients: Vec<String>,
    },
    Step {
        edges: Vec<f64>,
        coefficients: Vec<String>,
    },
    CubicSpline {
        knots: Vec<f64>,
        coefficients: Vec<String>,
    },
}

impl CurveSettings {
    pub fn to_shape(&self) -> CurveShape {
        match self {
            CurveSettings::Polynomial { coefficients } => CurveShape::Polynomial {
                coefficients: coefficients.clone(),
            },
            CurveSettings::ZeroInterceptPolynomial { coefficients } => {
                CurveShape::ZeroInterceptPolynomial {
                    coefficients: coefficients.clone(),
                }
            }
            CurveSettings::Step {
                edges,
                coefficients,
            } => CurveShape::Step {
                edges: edges.clone(),
                coefficients: coefficients.clone(),
            },
            CurveSettings::CubicSpline {
                knots,
                coefficients,
            } => CurveShape::CubicSpline {
                knots: knots.clone(),
                coefficients: coefficients.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawScopeSetting {
    #[default]
    Batch,
    Region,
}

impl DrawScopeSetting {
    pub fn to_scope(self) -> DrawScope {
        match self {
            DrawScopeSetting::Batch => DrawScope::Batch,
            DrawScopeSetting::Region => DrawScope::Region,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptationKind {
    #[default]
    None,
    Dumb,
    Full,
    Comatose,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdaptationSettings {
    #[serde(default)]
    pub kind: AdaptationKind,
    pub gamma_csvv: Option<PathBuf>,
    pub gamma_slice: Option<(usize, usize)>,
    pub gamma_curve: Option<CurveSettings>,
    pub grid: Option<GridSettings>,
    /// Covariates held at baseline under comatose adaptation
    #[serde(default)]
    pub frozen: Vec<String>,
}

impl AdaptationSettings {
    pub fn to_rule(&self) -> AdaptationRule {
        match self.kind {
            AdaptationKind::None => AdaptationRule::NoAdaptation,
            AdaptationKind::Dumb => AdaptationRule::Immediate,
            AdaptationKind::Full => AdaptationRule::Full,
            AdaptationKind::Comatose => AdaptationRule::Comatose {
                frozen: self.frozen.clone(),
            },
        }
    }

    pub fn blends(&self) -> bool {
        matches!(self.kind, AdaptationKind::Full | AdaptationKind::Comatose)
    }
}

/// Evenly spaced evaluation points, both ends included
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GridSettings {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl GridSettings {
    pub fn points(&self) -> Result<Vec<f64>, ProjectionError> {
        if !(self.step > 0.0) || !(self.end > self.start) {
            return Err(ProjectionError::Config(format!(
                "grid needs start < end and a positive step, got {}..{} by {}",
                self.start, self.end, self.step
            )));
        }
        let count = ((self.end - self.start) / self.step).round() as usize + 1;
        Ok((0..count)
            .map(|i| self.start + i as f64 * self.step)
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    pub weather: PathBuf,
    pub historical_years: (i32, i32),
    /// Defaults to every weather year after the historical window
    pub projection_years: Option<(i32, i32)>,
    pub economics: Option<PathBuf>,
    #[serde(default = "default_income_window")]
    pub income_window: usize,
    #[serde(default = "default_climate_window")]
    pub climate_window: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalculationSettings {
    #[serde(default)]
    pub aggregate: Aggregate,
    /// Subtract each region's mean impact over these years
    pub rebase_years: Option<(i32, i32)>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_num_batches() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "model".to_string()
}

fn default_income_window() -> usize {
    15
}

fn default_climate_window() -> usize {
    30
}

impl ProjectionConfig {
    /// Load and validate a TOML config
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ProjectionError> {
        let path = path.as_ref();
        require_file(path)?;
        let text = fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_toml(&text, base_dir)
    }

    /// Parse and validate TOML text, resolving paths against `base_dir`
    pub fn from_toml(text: &str, base_dir: PathBuf) -> Result<Self, ProjectionError> {
        let mut config: ProjectionConfig = toml::from_str(text)?;
        config.base_dir = base_dir;
        config.validate()?;
        Ok(config)
    }

    /// `path` as given if absolute, otherwise under the config's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Directory holding every batch of this run
    pub fn run_dir(&self) -> PathBuf {
        self.resolve(&self.run.output_dir).join(&self.run.name)
    }

    fn validate(&self) -> Result<(), ProjectionError> {
        if self.run.name.trim().is_empty() {
            return Err(ProjectionError::Config("run name is empty".to_string()));
        }
        if self.run.num_batches == 0 {
            return Err(ProjectionError::Config(
                "num_batches must be at least 1".to_string(),
            ));
        }
        if let RunMode::Constant(quantile) = self.run.mode {
            if !(quantile > 0.0 && quantile < 1.0) {
                return Err(ProjectionError::Config(format!(
                    "constant quantile {quantile} is outside (0, 1)"
                )));
            }
        }
        if self.run.mode != RunMode::MonteCarlo && self.run.num_batches > 1 {
            warn!(
                "{:?} mode gives identical batches; {} batches requested",
                self.run.mode, self.run.num_batches
            );
        }

        let (first, last) = self.data.historical_years;
        if first > last {
            return Err(ProjectionError::Config(format!(
                "historical_years {first}-{last} are reversed"
            )));
        }
        if let Some((first, last)) = self.data.projection_years {
            if first > last {
                return Err(ProjectionError::Config(format!(
                    "projection_years {first}-{last} are reversed"
                )));
            }
        }

        if let Some((first, last)) = self.calculation.rebase_years {
            if first > last {
                return Err(ProjectionError::Config(format!(
                    "rebase_years {first}-{last} are reversed"
                )));
            }
            let (start, end) = self
                .data
                .projection_years
                .unwrap_or((self.data.historical_years.1.saturating_add(1), i32::MAX));
            if last < start || first > end {
                return Err(ProjectionError::Config(format!(
                    "rebase_years {first}-{last} fall outside the projected years"
                )));
            }
        }

        if self.adaptation.blends() {
            if self.adaptation.gamma_csvv.is_none() || self.adaptation.gamma_curve.is_none() {
                return Err(ProjectionError::Config(
                    "blended adaptation needs gamma_csvv and gamma_curve".to_string(),
                ));
            }
            match &self.adaptation.grid {
                Some(grid) => {
                    grid.points()?;
                }
                None => {
                    return Err(ProjectionError::Config(
                        "blended adaptation needs a grid".to_string(),
                    ))
                }
            }
        }
        if self.adaptation.kind == AdaptationKind::Comatose && self.adaptation.frozen.is_empty() {
            warn!("comatose adaptation with no frozen covariates behaves as full adaptation");
        }
        Ok(())
    }
}
