//! Covariate providers
//!
//! A `Covariator` reports the covariates a region's curve is generated from:
//! once for the baseline, then once per projection year. Providers that keep
//! running means hold per-region state, so a fresh provider is built for
//! every pass.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use impact_curves::Covariates;
use log::info;
use serde::Deserialize;

use crate::error::{require_file, ProjectionError};

/// Source of covariates by region and year
pub trait Covariator {
    /// Covariates describing the region's historical state
    fn get_baseline(&mut self, region: &str) -> Result<Covariates, ProjectionError>;

    /// Covariates for `year`, given that year's weather
    ///
    /// Called with increasing years per region.
    fn get_update(
        &mut self,
        region: &str,
        year: i32,
        weather: &[f64],
    ) -> Result<Covariates, ProjectionError>;
}

#[derive(Debug, Deserialize)]
struct EconomicsRow {
    region: String,
    year: i32,
    gdppc: f64,
    popop: f64,
}

/// GDP per capita and population density by region and year
#[derive(Debug, Clone, Default)]
pub struct EconomicTable {
    rows: HashMap<String, BTreeMap<i32, (f64, f64)>>,
}

impl EconomicTable {
    /// Read a CSV with header `region,year,gdppc,popop`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ProjectionError> {
        let path = path.as_ref();
        require_file(path)?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut table = EconomicTable::default();
        for row in reader.deserialize() {
            let row: EconomicsRow = row?;
            table.insert(&row.region, row.year, row.gdppc, row.popop);
        }

        info!(
            "Loaded economics for {} regions from {}",
            table.rows.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn insert(&mut self, region: &str, year: i32, gdppc: f64, popop: f64) {
        self.rows
            .entry(region.to_string())
            .or_default()
            .insert(year, (gdppc, popop));
    }

    /// Rows of `region` in the `window` years ending at `year`
    fn trailing(&self, region: &str, year: i32, window: usize) -> Vec<(f64, f64)> {
        let start = year - window as i32 + 1;
        self.rows
            .get(region)
            .map(|by_year| by_year.range(start..=year).map(|(_, row)| *row).collect())
            .unwrap_or_default()
    }
}

/// `loggdppc` and `logpopop` from an economic table
///
/// `loggdppc` is the log of mean GDP per capita over the trailing income
/// window; `logpopop` is the log of the latest population density in that
/// window.
#[derive(Debug, Clone)]
pub struct EconomicCovariator {
    table: Arc<EconomicTable>,
    window: usize,
    baseline_year: i32,
}

impl EconomicCovariator {
    pub fn new(table: Arc<EconomicTable>, window: usize, baseline_year: i32) -> Self {
        EconomicCovariator {
            table,
            window: window.max(1),
            baseline_year,
        }
    }

    fn covariates(&self, region: &str, year: i32) -> Result<Covariates, ProjectionError> {
        let rows = self.table.trailing(region, year, self.window);
        let Some(&(_, popop)) = rows.last() else {
            return Err(ProjectionError::MissingEconomics {
                region: region.to_string(),
                year,
            });
        };
        let gdppc = rows.iter().map(|(gdppc, _)| gdppc).sum::<f64>() / rows.len() as f64;

        Ok(Covariates::from([
            ("loggdppc".to_string(), gdppc.ln()),
            ("logpopop".to_string(), popop.ln()),
        ]))
    }
}

impl Covariator for EconomicCovariator {
    fn get_baseline(&mut self, region: &str) -> Result<Covariates, ProjectionError> {
        self.covariates(region, self.baseline_year)
    }

    fn get_update(
        &mut self,
        region: &str,
        year: i32,
        _weather: &[f64],
    ) -> Result<Covariates, ProjectionError> {
        self.covariates(region, year)
    }
}

/// `climtas`: running mean of annual mean weather over the climate window
///
/// Each region's window starts from its baseline years and slides forward
/// as projection years arrive.
#[derive(Debug, Clone)]
pub struct MeanClimateCovariator {
    baseline: Arc<BTreeMap<String, Vec<f64>>>,
    window: usize,
    history: HashMap<String, VecDeque<f64>>,
}

impl MeanClimateCovariator {
    /// `baseline` holds each region's annual means over the historical years
    pub fn new(baseline: Arc<BTreeMap<String, Vec<f64>>>, window: usize) -> Self {
        MeanClimateCovariator {
            baseline,
            window: window.max(1),
            history: HashMap::new(),
        }
    }

    /// Last `window` baseline means of `region`; empty without baseline data
    fn seeded(&self, region: &str) -> VecDeque<f64> {
        let means = self.baseline.get(region).map(Vec::as_slice).unwrap_or_default();
        let skip = means.len().saturating_sub(self.window);
        means[skip..].iter().copied().collect()
    }

    /// `climtas` if any year is in the window
    fn climtas(history: &VecDeque<f64>) -> Covariates {
        if history.is_empty() {
            return Covariates::new();
        }
        let mean = history.iter().sum::<f64>() / history.len() as f64;
        Covariates::from([("climtas".to_string(), mean)])
    }
}

impl Covariator for MeanClimateCovariator {
    fn get_baseline(&mut self, region: &str) -> Result<Covariates, ProjectionError> {
        let history = self.seeded(region);
        let covariates = Self::climtas(&history);
        self.history.insert(region.to_string(), history);
        Ok(covariates)
    }

    fn get_update(
        &mut self,
        region: &str,
        _year: i32,
        weather: &[f64],
    ) -> Result<Covariates, ProjectionError> {
        if !self.history.contains_key(region) {
            let history = self.seeded(region);
            self.history.insert(region.to_string(), history);
        }
        let history = self.history.entry(region.to_string()).or_default();

        if !weather.is_empty() {
            history.push_back(weather.iter().sum::<f64>() / weather.len() as f64);
            while history.len() > self.window {
                history.pop_front();
            }
        }
        Ok(Self::climtas(history))
    }
}

/// Several providers merged; later providers win on a name clash
#[derive(Default)]
pub struct CombinedCovariator {
    parts: Vec<Box<dyn Covariator>>,
}

impl CombinedCovariator {
    pub fn new(parts: Vec<Box<dyn Covariator>>) -> Self {
        CombinedCovariator { parts }
    }

    pub fn push(&mut self, part: Box<dyn Covariator>) {
        self.parts.push(part);
    }
}

impl Covariator for CombinedCovariator {
    fn get_baseline(&mut self, region: &str) -> Result<Covariates, ProjectionError> {
        let mut merged = Covariates::new();
        for part in &mut self.parts {
            merged.extend(part.get_baseline(region)?);
        }
        Ok(merged)
    }

    fn get_update(
        &mut self,
        region: &str,
        year: i32,
        weather: &[f64],
    ) -> Result<Covariates, ProjectionError> {
        let mut merged = Covariates::new();
        for part in &mut self.parts {
            merged.extend(part.get_update(region, year, weather)?);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn table() -> Arc<EconomicTable> {
        let mut table = EconomicTable::default();
        for year in 2000..=2010 {
            table.insert("A", year, 1000.0 * (year - 1999) as f64, 50.0);
        }
        Arc::new(table)
    }

    #[test]
    fn economics_use_trailing_mean_income() {
        let mut covariator = EconomicCovariator::new(table(), 3, 2005);

        let baseline = covariator.get_baseline("A").unwrap();
        // Mean of 4000, 5000, 6000
        assert_relative_eq!(baseline["loggdppc"], 5000.0_f64.ln());
        assert_relative_eq!(baseline["logpopop"], 50.0_f64.ln());

        let update = covariator.get_update("A", 2010, &[]).unwrap();
        assert_relative_eq!(update["loggdppc"], 10000.0_f64.ln());
    }

    #[test]
    fn economics_window_truncates_at_first_year() {
        let mut covariator = EconomicCovariator::new(table(), 15, 2001);
        let baseline = covariator.get_baseline("A").unwrap();
        assert_relative_eq!(baseline["loggdppc"], 1500.0_f64.ln());
    }

    #[test]
    fn economics_missing_region_is_reported() {
        let mut covariator = EconomicCovariator::new(table(), 3, 2005);
        assert!(matches!(
            covariator.get_baseline("B"),
            Err(ProjectionError::MissingEconomics { .. })
        ));
    }

    #[test]
    fn economic_table_reads_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "region,year,gdppc,popop").unwrap();
        writeln!(file, "A,2000,1000,20").unwrap();
        writeln!(file, "A,2001,3000,30").unwrap();
        file.flush().unwrap();

        let table = Arc::new(EconomicTable::from_path(file.path()).unwrap());
        let mut covariator = EconomicCovariator::new(table, 2, 2001);
        let baseline = covariator.get_baseline("A").unwrap();
        assert_relative_eq!(baseline["loggdppc"], 2000.0_f64.ln());
        assert_relative_eq!(baseline["logpopop"], 30.0_f64.ln());
    }

    #[test]
    fn climate_mean_slides_forward() {
        let baseline = Arc::new(BTreeMap::from([(
            "A".to_string(),
            vec![10.0, 12.0, 14.0, 16.0],
        )]));
        let mut covariator = MeanClimateCovariator::new(baseline, 3);

        // Last three baseline years
        assert_relative_eq!(covariator.get_baseline("A").unwrap()["climtas"], 14.0);

        let update = covariator.get_update("A", 2020, &[20.0, 22.0]).unwrap();
        // Window is now 14, 16, 21
        assert_relative_eq!(update["climtas"], 17.0);

        let update = covariator.get_update("A", 2021, &[24.0]).unwrap();
        assert_relative_eq!(update["climtas"], (16.0 + 21.0 + 24.0) / 3.0);
    }

    #[test]
    fn climate_baseline_resets_region_state() {
        let baseline = Arc::new(BTreeMap::from([("A".to_string(), vec![10.0, 20.0])]));
        let mut covariator = MeanClimateCovariator::new(baseline, 2);

        covariator.get_baseline("A").unwrap();
        covariator.get_update("A", 2020, &[40.0]).unwrap();
        assert_relative_eq!(covariator.get_baseline("A").unwrap()["climtas"], 15.0);
    }

    #[test]
    fn climate_without_baseline_starts_from_projected_weather() {
        let mut covariator = MeanClimateCovariator::new(Arc::new(BTreeMap::new()), 30);
        assert!(covariator.get_baseline("A").unwrap().is_empty());

        let update = covariator.get_update("A", 2020, &[18.0, 20.0]).unwrap();
        assert_relative_eq!(update["climtas"], 19.0);
    }

    #[test]
    fn combined_merges_providers() {
        let baseline = Arc::new(BTreeMap::from([("A".to_string(), vec![15.0])]));
        let mut combined = CombinedCovariator::new(vec![
            Box::new(EconomicCovariator::new(table(), 1, 2000)),
            Box::new(MeanClimateCovariator::new(baseline, 30)),
        ]);

        let covariates = combined.get_baseline("A").unwrap();
        assert_eq!(covariates.len(), 3);
        assert_relative_eq!(covariates["loggdppc"], 1000.0_f64.ln());
        assert_relative_eq!(covariates["climtas"], 15.0);
    }

    #[test]
    fn combined_later_provider_wins() {
        let low = Arc::new(BTreeMap::from([("A".to_string(), vec![1.0])]));
        let high = Arc::new(BTreeMap::from([("A".to_string(), vec![2.0])]));
        let mut combined = CombinedCovariator::default();
        combined.push(Box::new(MeanClimateCovariator::new(low, 1)));
        combined.push(Box::new(MeanClimateCovariator::new(high, 1)));

        assert_eq!(combined.get_baseline("A").unwrap()["climtas"], 2.0);
    }
}
