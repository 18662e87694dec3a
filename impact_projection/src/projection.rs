//! Region-by-region projection of impacts
//!
//! For each region the adaptive model's state is created from baseline
//! covariates, then advanced one year at a time. A year's impact is the
//! current curve applied to each of that year's weather values, summed or
//! averaged.

use impact_curves::{AdaptiveModel, PvalStore};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::covariates::Covariator;
use crate::error::ProjectionError;
use crate::weather::WeatherBundle;

/// How a year's per-value impacts reduce to one number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    #[default]
    Sum,
    Mean,
}

impl Aggregate {
    pub fn apply(self, values: impl Iterator<Item = f64>) -> f64 {
        let (total, count) = values.fold((0.0, 0usize), |(total, count), v| (total + v, count + 1));
        match self {
            Aggregate::Sum => total,
            Aggregate::Mean if count == 0 => f64::NAN,
            Aggregate::Mean => total / count as f64,
        }
    }
}

/// Impact of one region in one year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub region: String,
    pub year: i32,
    pub impact: f64,
}

/// Settings shared by every pass of a batch
#[derive(Debug, Clone, Default)]
pub struct Calculation {
    pub aggregate: Aggregate,
    pub rebase_years: Option<(i32, i32)>,
}

/// Project every region of `weather` over `years`
///
/// Regions are processed one after another; each region's years are applied
/// in increasing order. Records come out grouped by region, years ascending.
pub fn project(
    model: &mut AdaptiveModel,
    covariator: &mut dyn Covariator,
    weather: &dyn WeatherBundle,
    years: &[i32],
    calculation: &Calculation,
    pvals: &mut PvalStore,
) -> Result<Vec<ImpactRecord>, ProjectionError> {
    let mut records = Vec::new();
    for region in weather.regions() {
        let mut region_records = project_region(
            model, covariator, weather, &region, years, calculation, pvals,
        )?;
        if let Some(window) = calculation.rebase_years {
            rebase(&mut region_records, window);
        }
        records.extend(region_records);
    }
    Ok(records)
}

fn project_region(
    model: &mut AdaptiveModel,
    covariator: &mut dyn Covariator,
    weather: &dyn WeatherBundle,
    region: &str,
    years: &[i32],
    calculation: &Calculation,
    pvals: &mut PvalStore,
) -> Result<Vec<ImpactRecord>, ProjectionError> {
    let baseline = covariator
        .get_baseline(region)
        .map_err(|e| e.in_region(region, None))?;
    let mut state = model
        .create(region, &baseline, pvals)
        .map_err(|e| ProjectionError::from(e).in_region(region, None))?;

    let mut records = Vec::with_capacity(years.len());
    for &year in years {
        let mut step = || -> Result<f64, ProjectionError> {
            let values = weather.require(region, year)?;
            let covariates = covariator.get_update(region, year, values)?;
            model.update(&mut state, year, &covariates, pvals)?;
            Ok(calculation
                .aggregate
                .apply(values.iter().map(|&x| state.evaluate(x))))
        };
        let impact = step().map_err(|e| e.in_region(region, Some(year)))?;
        if !impact.is_finite() {
            return Err(ProjectionError::NonFinite {
                region: region.to_string(),
                year,
            });
        }
        records.push(ImpactRecord {
            region: region.to_string(),
            year,
            impact,
        });
    }

    debug!("{region}: projected {} years", records.len());
    Ok(records)
}

/// Subtract the mean impact over `window` from every record
///
/// `records` belong to one region. A window with no records leaves them
/// unchanged.
pub fn rebase(records: &mut [ImpactRecord], window: (i32, i32)) {
    let inside: Vec<f64> = records
        .iter()
        .filter(|record| (window.0..=window.1).contains(&record.year))
        .map(|record| record.impact)
        .collect();
    if inside.is_empty() {
        if let Some(record) = records.first() {
            warn!(
                "{}: no years inside rebase window {}-{}",
                record.region, window.0, window.1
            );
        }
        return;
    }

    let mean = inside.iter().sum::<f64>() / inside.len() as f64;
    for record in records.iter_mut() {
        record.impact -= mean;
    }
}
