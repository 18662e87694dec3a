//! Weather inputs: per-region, per-year arrays of one weather variable
//!
//! A bundle is restartable: every pass over it sees the same regions and
//! years in the same order. `HistoricalWeatherBundle` serves the
//! historical-climate counterfactual by mapping each projection year onto a
//! shuffled baseline year.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use crate::error::{require_file, ProjectionError};

/// Source of weather values by region and year
pub trait WeatherBundle {
    /// Regions in a stable order
    fn regions(&self) -> Vec<String>;

    /// Years with data, increasing
    fn years(&self) -> Vec<i32>;

    /// Values for `region` in `year` (e.g. daily temperatures)
    fn weather(&self, region: &str, year: i32) -> Option<&[f64]>;

    /// Like `weather`, but missing data is an error
    fn require(&self, region: &str, year: i32) -> Result<&[f64], ProjectionError> {
        self.weather(region, year)
            .ok_or_else(|| ProjectionError::MissingWeather {
                region: region.to_string(),
                year,
            })
    }
}

#[derive(Debug, Deserialize)]
struct WeatherRow {
    region: String,
    year: i32,
    value: f64,
}

/// Weather loaded from a long-format CSV with header `region,year,value`
///
/// Rows for the same region and year accumulate in file order.
#[derive(Debug, Clone, Default)]
pub struct CsvWeatherBundle {
    values: BTreeMap<String, BTreeMap<i32, Vec<f64>>>,
}

impl CsvWeatherBundle {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ProjectionError> {
        let path = path.as_ref();
        require_file(path)?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut bundle = CsvWeatherBundle::default();
        for row in reader.deserialize() {
            let row: WeatherRow = row?;
            bundle.push(&row.region, row.year, row.value);
        }

        info!(
            "Loaded weather for {} regions from {}",
            bundle.values.len(),
            path.display()
        );
        Ok(bundle)
    }

    /// Append one value for `region` in `year`
    pub fn push(&mut self, region: &str, year: i32, value: f64) {
        self.values
            .entry(region.to_string())
            .or_default()
            .entry(year)
            .or_default()
            .push(value);
    }

    /// Mean of each region's yearly means over `years`, skipping missing years
    pub fn baseline_means(&self, years: (i32, i32)) -> BTreeMap<String, Vec<f64>> {
        self.values
            .iter()
            .map(|(region, by_year)| {
                let means = by_year
                    .range(years.0..=years.1)
                    .filter(|(_, values)| !values.is_empty())
                    .map(|(_, values)| values.iter().sum::<f64>() / values.len() as f64)
                    .collect();
                (region.clone(), means)
            })
            .collect()
    }
}

impl WeatherBundle for CsvWeatherBundle {
    fn regions(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self
            .values
            .values()
            .flat_map(|by_year| by_year.keys().copied())
            .collect();
        years.sort_unstable();
        years.dedup();
        years
    }

    fn weather(&self, region: &str, year: i32) -> Option<&[f64]> {
        self.values
            .get(region)
            .and_then(|by_year| by_year.get(&year))
            .map(Vec::as_slice)
    }
}

/// Counterfactual weather: each projection year draws a baseline year
///
/// Baseline years are shuffled, used in that order, and reshuffled when
/// exhausted, so every baseline year appears once before any repeats.
pub struct HistoricalWeatherBundle<'a> {
    inner: &'a dyn WeatherBundle,
    mapping: BTreeMap<i32, i32>,
}

impl<'a> HistoricalWeatherBundle<'a> {
    /// Map `years` onto `baseline` years of `inner` using `seed`
    pub fn new(
        inner: &'a dyn WeatherBundle,
        baseline: (i32, i32),
        years: &[i32],
        seed: u64,
    ) -> Result<Self, ProjectionError> {
        let pool: Vec<i32> = inner
            .years()
            .into_iter()
            .filter(|year| (baseline.0..=baseline.1).contains(year))
            .collect();
        if pool.is_empty() {
            return Err(ProjectionError::Config(format!(
                "no weather years inside the historical window {}-{}",
                baseline.0, baseline.1
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<i32> = Vec::new();
        let mut mapping = BTreeMap::new();
        for &year in years {
            if order.is_empty() {
                order = pool.clone();
                order.shuffle(&mut rng);
            }
            if let Some(historical) = order.pop() {
                mapping.insert(year, historical);
            }
        }

        debug!(
            "historical climate maps {} years onto {} baseline years",
            mapping.len(),
            pool.len()
        );
        Ok(HistoricalWeatherBundle { inner, mapping })
    }

    /// Baseline year standing in for `year`
    pub fn source_year(&self, year: i32) -> Option<i32> {
        self.mapping.get(&year).copied()
    }
}

impl WeatherBundle for HistoricalWeatherBundle<'_> {
    fn regions(&self) -> Vec<String> {
        self.inner.regions()
    }

    fn years(&self) -> Vec<i32> {
        self.mapping.keys().copied().collect()
    }

    fn weather(&self, region: &str, year: i32) -> Option<&[f64]> {
        self.inner.weather(region, self.source_year(year)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bundle() -> CsvWeatherBundle {
        let mut bundle = CsvWeatherBundle::default();
        for year in 1981..=1990 {
            bundle.push("USA.1", year, year as f64);
            bundle.push("USA.1", year, year as f64 + 1.0);
        }
        for year in 2020..=2030 {
            bundle.push("USA.1", year, 30.0);
        }
        bundle
    }

    #[test]
    fn csv_bundle_groups_rows_by_region_and_year() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "region,year,value").unwrap();
        writeln!(file, "A,2020,1.5").unwrap();
        writeln!(file, "A,2020,2.5").unwrap();
        writeln!(file, "B, 2021, 3.0").unwrap();
        file.flush().unwrap();

        let bundle = CsvWeatherBundle::from_path(file.path()).unwrap();
        assert_eq!(bundle.regions(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(bundle.years(), vec![2020, 2021]);
        assert_eq!(bundle.weather("A", 2020), Some(&[1.5, 2.5][..]));
        assert_eq!(bundle.weather("B", 2021), Some(&[3.0][..]));
        assert!(bundle.weather("B", 2020).is_none());
    }

    #[test]
    fn missing_file_is_a_dependency_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = CsvWeatherBundle::from_path(dir.path().join("absent.csv"));
        assert!(matches!(
            result,
            Err(ProjectionError::MissingDependencyFile { .. })
        ));
    }

    #[test]
    fn require_reports_region_and_year() {
        let bundle = bundle();
        match bundle.require("USA.1", 1900) {
            Err(ProjectionError::MissingWeather { region, year }) => {
                assert_eq!(region, "USA.1");
                assert_eq!(year, 1900);
            }
            other => panic!("expected MissingWeather, got {other:?}"),
        }
    }

    #[test]
    fn baseline_means_average_each_year() {
        let means = bundle().baseline_means((1981, 1983));
        assert_eq!(means["USA.1"], vec![1981.5, 1982.5, 1983.5]);
    }

    #[test]
    fn historical_years_come_from_the_baseline_window() {
        let inner = bundle();
        let years: Vec<i32> = (2020..=2030).collect();
        let historical = HistoricalWeatherBundle::new(&inner, (1981, 1990), &years, 7).unwrap();

        assert_eq!(historical.years(), years);
        for &year in &years {
            let source = historical.source_year(year).unwrap();
            assert!((1981..=1990).contains(&source));
            assert_eq!(
                historical.weather("USA.1", year),
                inner.weather("USA.1", source)
            );
        }
    }

    #[test]
    fn every_baseline_year_is_used_before_any_repeat() {
        let inner = bundle();
        let years: Vec<i32> = (2020..=2029).collect();
        let historical = HistoricalWeatherBundle::new(&inner, (1981, 1990), &years, 11).unwrap();

        let mut sources: Vec<i32> = years
            .iter()
            .map(|&year| historical.source_year(year).unwrap())
            .collect();
        sources.sort_unstable();
        assert_eq!(sources, (1981..=1990).collect::<Vec<_>>());
    }

    #[test]
    fn same_seed_gives_same_mapping() {
        let inner = bundle();
        let years: Vec<i32> = (2020..=2030).collect();
        let a = HistoricalWeatherBundle::new(&inner, (1981, 1990), &years, 3).unwrap();
        let b = HistoricalWeatherBundle::new(&inner, (1981, 1990), &years, 3).unwrap();
        assert_eq!(a.mapping, b.mapping);
    }

    #[test]
    fn empty_baseline_window_is_rejected() {
        let inner = bundle();
        let result = HistoricalWeatherBundle::new(&inner, (1900, 1910), &[2020], 1);
        assert!(matches!(result, Err(ProjectionError::Config(_))));
    }
}
