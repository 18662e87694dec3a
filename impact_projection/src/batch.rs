//! Monte Carlo batches
//!
//! A batch is one draw of the coefficients:
//! 1. a fresh pval store (seeded from `base_seed + batch`, or a replayed record)
//! 2. the projection pass over observed/projected weather
//! 3. the store is locked
//! 4. the historical-climate pass, which reuses every draw of step 2
//! 5. outputs written to `batch<N>/` via a staging directory
//!
//! A batch whose directory already exists is skipped, so an interrupted run
//! can simply be started again.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use impact_curves::{AdaptiveModel, CsvvData, CsvvError, CurveGenerator, PvalRecord, PvalStore};
use log::{error, info, warn};

use crate::config::{ProjectionConfig, RunMode};
use crate::covariates::{
    CombinedCovariator, EconomicCovariator, EconomicTable, MeanClimateCovariator,
};
use crate::error::{require_file, ProjectionError};
use crate::output::{BatchMetadata, BatchOutput, BatchSummary, RunSummary};
use crate::parallel::{log_progress_reporter, ParallelRunner};
use crate::projection::{project, Calculation};
use crate::weather::{CsvWeatherBundle, HistoricalWeatherBundle, WeatherBundle};

/// Draw name of the historical-climate year shuffle
const HISTCLIM_DRAW: &str = "histclim";

/// Inputs read once and shared read-only by every batch
#[derive(Debug)]
pub struct BatchInputs {
    pub csvv: Arc<CsvvData>,
    pub interaction: Option<Arc<CsvvData>>,
    pub gamma: Option<Arc<CsvvData>>,
    pub weather: CsvWeatherBundle,
    pub economics: Option<Arc<EconomicTable>>,
    /// Annual mean weather per region over the historical years
    pub climate_baseline: Arc<BTreeMap<String, Vec<f64>>>,
    /// Projection years, increasing
    pub years: Vec<i32>,
    pub grid: Vec<f64>,
    pub replay: Option<PvalRecord>,
}

impl BatchInputs {
    pub fn load(config: &ProjectionConfig) -> Result<Self, ProjectionError> {
        let csvv = load_csvv(&config.resolve(&config.model.csvv), config.model.slice)?;
        let interaction = match &config.model.interaction {
            Some(settings) => Some(load_csvv(&config.resolve(&settings.csvv), settings.slice)?),
            None => None,
        };
        let gamma = match (&config.adaptation.gamma_csvv, config.adaptation.blends()) {
            (Some(path), true) => Some(load_csvv(
                &config.resolve(path),
                config.adaptation.gamma_slice,
            )?),
            _ => None,
        };

        let weather_path = config.resolve(&config.data.weather);
        let weather =
            CsvWeatherBundle::from_path(&weather_path).map_err(|e| e.in_file(&weather_path))?;
        let economics = match &config.data.economics {
            Some(path) => {
                let path = config.resolve(path);
                let table = EconomicTable::from_path(&path).map_err(|e| e.in_file(&path))?;
                Some(Arc::new(table))
            }
            None => None,
        };
        let climate_baseline = Arc::new(weather.baseline_means(config.data.historical_years));

        let years = projection_years(config, &weather)?;
        let grid = match (&config.adaptation.grid, config.adaptation.blends()) {
            (Some(grid), true) => grid.points()?,
            _ => Vec::new(),
        };

        let replay = match &config.run.replay {
            Some(path) => {
                let path = config.resolve(path);
                require_file(&path)?;
                let record = read_record(&path).map_err(|e| e.in_file(&path))?;
                if config.run.num_batches > 1 {
                    warn!("replaying {} in every batch", path.display());
                }
                Some(record)
            }
            None => None,
        };

        info!(
            "Loaded inputs: {} regions, years {}-{}",
            weather.regions().len(),
            years.first().copied().unwrap_or_default(),
            years.last().copied().unwrap_or_default()
        );

        Ok(BatchInputs {
            csvv,
            interaction,
            gamma,
            weather,
            economics,
            climate_baseline,
            years,
            grid,
            replay,
        })
    }

    /// Fresh adaptive model; generator caches are per pass
    pub fn model(&self, config: &ProjectionConfig) -> Result<AdaptiveModel, ProjectionError> {
        let name = &config.model.name;
        let scope = config.model.draw_scope.to_scope();

        let mut target = CurveGenerator::csvv(
            name,
            self.csvv.clone(),
            config.model.curve.to_shape(),
            scope,
        )?;
        if let (Some(settings), Some(csvv)) = (&config.model.interaction, &self.interaction) {
            let interaction = CurveGenerator::csvv(
                &format!("{name}-interaction"),
                csvv.clone(),
                settings.curve.to_shape(),
                scope,
            )?;
            target = CurveGenerator::product(target, interaction);
        }

        let rate = match (&self.gamma, &config.adaptation.gamma_curve) {
            (Some(csvv), Some(curve)) => Some(CurveGenerator::csvv(
                &format!("{name}-gamma"),
                csvv.clone(),
                curve.to_shape(),
                scope,
            )?),
            _ => None,
        };

        Ok(AdaptiveModel::new(
            config.adaptation.to_rule(),
            target,
            rate,
            self.grid.clone(),
        )?)
    }

    /// Fresh covariate providers; their running means are per pass
    pub fn covariator(&self, config: &ProjectionConfig) -> CombinedCovariator {
        let mut combined = CombinedCovariator::default();
        if let Some(table) = &self.economics {
            combined.push(Box::new(EconomicCovariator::new(
                table.clone(),
                config.data.income_window,
                config.data.historical_years.1,
            )));
        }
        combined.push(Box::new(MeanClimateCovariator::new(
            self.climate_baseline.clone(),
            config.data.climate_window,
        )));
        combined
    }

    fn store(&self, config: &ProjectionConfig, batch: usize) -> PvalStore {
        match &self.replay {
            Some(record) => PvalStore::replay(record.clone()),
            None => config.run.mode.store(config.run.base_seed, batch),
        }
    }
}

fn load_csvv(path: &Path, slice: Option<(usize, usize)>) -> Result<Arc<CsvvData>, ProjectionError> {
    require_file(path)?;
    let read = || -> Result<CsvvData, CsvvError> {
        let csvv = CsvvData::from_path(path)?;
        match slice {
            Some((start, end)) => csvv.subset(start, end),
            None => Ok(csvv),
        }
    };
    let csvv = read().map_err(|e| ProjectionError::from(e).in_file(path))?;
    info!(
        "Loaded {} ({} coefficients)",
        path.display(),
        csvv.coefficient_count()
    );
    Ok(Arc::new(csvv))
}

fn read_record(path: &Path) -> Result<PvalRecord, ProjectionError> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Every year from the first to the last projected one
///
/// Years inside the range that the weather lacks stay in the list, so the
/// affected region fails with `MissingWeather` instead of adapting across a
/// gap.
fn projection_years(
    config: &ProjectionConfig,
    weather: &CsvWeatherBundle,
) -> Result<Vec<i32>, ProjectionError> {
    let historical_end = config.data.historical_years.1;
    let available: Vec<i32> = weather
        .years()
        .into_iter()
        .filter(|&year| match config.data.projection_years {
            Some((first, last)) => (first..=last).contains(&year),
            None => year > historical_end,
        })
        .collect();
    match (available.first(), available.last()) {
        (Some(&first), Some(&last)) => {
            if last - first + 1 != available.len() as i32 {
                warn!("weather skips years between {first} and {last}");
            }
            Ok((first..=last).collect())
        }
        _ => Err(ProjectionError::Config(
            "weather has no years to project".to_string(),
        )),
    }
}

fn describe_mode(mode: RunMode) -> String {
    match mode {
        RunMode::MonteCarlo => "montecarlo".to_string(),
        RunMode::Median => "median".to_string(),
        RunMode::Constant(quantile) => format!("constant {quantile}"),
    }
}

/// Run one batch end to end
pub fn run_batch(
    config: &ProjectionConfig,
    inputs: &BatchInputs,
    batch: usize,
) -> Result<BatchSummary, ProjectionError> {
    let dir = config.run_dir().join(format!("batch{batch}"));
    if dir.exists() {
        info!("batch {batch}: {} exists, skipping", dir.display());
        return Ok(BatchSummary::Skipped { batch });
    }

    let mut pvals = inputs.store(config, batch);
    let histclim_seed = if config.run.histclim {
        Some(pvals.next_seed(HISTCLIM_DRAW, "years")?)
    } else {
        None
    };
    let calculation = Calculation {
        aggregate: config.calculation.aggregate,
        rebase_years: config.calculation.rebase_years,
    };

    let mut model = inputs.model(config)?;
    let mut covariator = inputs.covariator(config);
    let projected = project(
        &mut model,
        &mut covariator,
        &inputs.weather,
        &inputs.years,
        &calculation,
        &mut pvals,
    )?;

    pvals.lock();

    let histclim = match histclim_seed {
        Some(seed) => {
            let weather = HistoricalWeatherBundle::new(
                &inputs.weather,
                config.data.historical_years,
                &inputs.years,
                seed,
            )?;
            let mut model = inputs.model(config)?;
            let mut covariator = inputs.covariator(config);
            Some(project(
                &mut model,
                &mut covariator,
                &weather,
                &inputs.years,
                &calculation,
                &mut pvals,
            )?)
        }
        None => None,
    };

    let metadata = BatchMetadata {
        run: config.run.name.clone(),
        batch,
        mode: describe_mode(config.run.mode),
        seed: match (config.run.mode, &inputs.replay) {
            (RunMode::MonteCarlo, None) => Some(config.run.base_seed.wrapping_add(batch as u64)),
            _ => None,
        },
        adaptation: format!("{:?}", config.adaptation.kind).to_lowercase(),
        regions: inputs.weather.regions().len(),
        timestamp: Utc::now().to_rfc3339(),
    };
    let output = BatchOutput::from_passes(metadata, projected, histclim, pvals.serialize());
    let rows = output.rows.len();
    output.write_all(&dir)?;

    info!("batch {batch}: wrote {rows} rows");
    Ok(BatchSummary::Completed { batch, rows })
}

/// Run every batch of `config` in parallel and write `summary.json`
///
/// A failing or panicking batch is recorded in the summary; the others
/// still run.
pub fn run_projection(config: &ProjectionConfig) -> Result<RunSummary, ProjectionError> {
    let started = Utc::now().to_rfc3339();
    let inputs = BatchInputs::load(config)?;
    let run_dir = config.run_dir();
    fs::create_dir_all(&run_dir)?;

    info!(
        "Running {} batches of '{}' into {}",
        config.run.num_batches,
        config.run.name,
        run_dir.display()
    );

    let mut runner = ParallelRunner::new(config.run.num_batches, |batch| {
        run_batch(config, &inputs, batch)
    })
    .progress(log_progress_reporter((config.run.num_batches / 10).max(1)));
    if let Some(threads) = config.run.threads {
        runner = runner.num_threads(threads);
    }

    let batches = runner
        .run()?
        .into_iter()
        .enumerate()
        .map(|(batch, result)| match result {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                error!("batch {batch} failed: {e}");
                BatchSummary::Failed {
                    batch,
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                error!("batch {batch} panicked: {panic}");
                BatchSummary::Failed {
                    batch,
                    error: panic,
                }
            }
        })
        .collect();

    let summary = RunSummary::new(&config.run.name, started, batches);
    summary.write_json(run_dir.join("summary.json"))?;
    info!(
        "Finished '{}': {} completed, {} skipped, {} failed",
        summary.name, summary.completed, summary.skipped, summary.failed
    );
    Ok(summary)
}
