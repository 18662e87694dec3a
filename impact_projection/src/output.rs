//! Batch and run outputs
//!
//! Each batch directory holds:
//! - `impacts.csv`: `region,year,impact,histclim`
//! - `pvals.json`: every draw the batch made, replayable
//! - `metadata.json`: run name, batch number, mode, timestamp
//!
//! A batch is written into a sibling `.partial` directory and renamed into
//! place once complete, so an existing batch directory is always whole.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use impact_curves::PvalRecord;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ProjectionError;
use crate::projection::ImpactRecord;

/// One row of `impacts.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRow {
    pub region: String,
    pub year: i32,
    pub impact: f64,
    /// Same region and year under historical climate
    pub histclim: Option<f64>,
}

/// Metadata for reproducing a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub run: String,
    pub batch: usize,
    pub mode: String,
    pub seed: Option<u64>,
    pub adaptation: String,
    pub regions: usize,
    pub timestamp: String,
}

/// Everything a finished batch writes
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub metadata: BatchMetadata,
    pub rows: Vec<ImpactRow>,
    pub pvals: PvalRecord,
}

impl BatchOutput {
    /// Join the projection pass with the optional historical-climate pass
    pub fn from_passes(
        metadata: BatchMetadata,
        projected: Vec<ImpactRecord>,
        histclim: Option<Vec<ImpactRecord>>,
        pvals: PvalRecord,
    ) -> Self {
        let counterfactual: HashMap<(String, i32), f64> = histclim
            .unwrap_or_default()
            .into_iter()
            .map(|record| ((record.region, record.year), record.impact))
            .collect();

        let rows = projected
            .into_iter()
            .map(|record| {
                let histclim = counterfactual
                    .get(&(record.region.clone(), record.year))
                    .copied();
                ImpactRow {
                    region: record.region,
                    year: record.year,
                    impact: record.impact,
                    histclim,
                }
            })
            .collect();

        BatchOutput {
            metadata,
            rows,
            pvals,
        }
    }

    /// Write impact rows to CSV
    pub fn write_impacts_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectionError> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record(["region", "year", "impact", "histclim"])?;
        for row in &self.rows {
            wtr.write_record(&[
                row.region.clone(),
                row.year.to_string(),
                row.impact.to_string(),
                row.histclim.map(|v| v.to_string()).unwrap_or_default(),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Write the draw record as JSON
    pub fn write_pvals_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectionError> {
        let json = serde_json::to_string_pretty(&self.pvals)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn write_metadata_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectionError> {
        let json = serde_json::to_string_pretty(&self.metadata)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Write all outputs into `dir`, which must not exist yet
    pub fn write_all<P: AsRef<Path>>(&self, dir: P) -> Result<(), ProjectionError> {
        let dir = dir.as_ref();
        let partial = partial_dir(dir);
        if partial.exists() {
            fs::remove_dir_all(&partial)?;
        }
        fs::create_dir_all(&partial)?;

        self.write_impacts_csv(partial.join("impacts.csv"))?;
        self.write_pvals_json(partial.join("pvals.json"))?;
        self.write_metadata_json(partial.join("metadata.json"))?;

        fs::rename(&partial, dir)?;
        debug!("wrote {} rows to {}", self.rows.len(), dir.display());
        Ok(())
    }
}

/// Staging directory beside `dir`
pub fn partial_dir(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dir.with_file_name(name)
}

/// Read back an `impacts.csv`
pub fn read_impacts_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ImpactRow>, ProjectionError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Outcome of one batch in the run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchSummary {
    Completed { batch: usize, rows: usize },
    Skipped { batch: usize },
    Failed { batch: usize, error: String },
}

/// `summary.json` at the top of a run directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub started: String,
    pub finished: String,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub batches: Vec<BatchSummary>,
}

impl RunSummary {
    pub fn new(name: &str, started: String, batches: Vec<BatchSummary>) -> Self {
        let count = |f: fn(&BatchSummary) -> bool| batches.iter().filter(|b| f(b)).count();
        RunSummary {
            name: name.to_string(),
            started,
            finished: chrono::Utc::now().to_rfc3339(),
            completed: count(|b| matches!(b, BatchSummary::Completed { .. })),
            skipped: count(|b| matches!(b, BatchSummary::Skipped { .. })),
            failed: count(|b| matches!(b, BatchSummary::Failed { .. })),
            batches,
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProjectionError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impact_curves::PvalStore;

    fn metadata() -> BatchMetadata {
        BatchMetadata {
            run: "test".to_string(),
            batch: 0,
            mode: "median".to_string(),
            seed: None,
            adaptation: "none".to_string(),
            regions: 1,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn record(region: &str, year: i32, impact: f64) -> ImpactRecord {
        ImpactRecord {
            region: region.to_string(),
            year,
            impact,
        }
    }

    #[test]
    fn histclim_joins_on_region_and_year() {
        let output = BatchOutput::from_passes(
            metadata(),
            vec![record("A", 2020, 1.0), record("A", 2021, 2.0)],
            Some(vec![record("A", 2021, 0.5)]),
            PvalStore::median().serialize(),
        );

        assert_eq!(output.rows[0].histclim, None);
        assert_eq!(output.rows[1].histclim, Some(0.5));
    }

    #[test]
    fn write_all_creates_complete_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("batch0");
        let output = BatchOutput::from_passes(
            metadata(),
            vec![record("A", 2020, 1.25)],
            Some(vec![record("A", 2020, 0.75)]),
            PvalStore::median().serialize(),
        );

        output.write_all(&dir).unwrap();

        assert!(dir.join("impacts.csv").exists());
        assert!(dir.join("pvals.json").exists());
        assert!(dir.join("metadata.json").exists());
        assert!(!partial_dir(&dir).exists());

        let rows = read_impacts_csv(dir.join("impacts.csv")).unwrap();
        assert_eq!(rows, output.rows);
    }

    #[test]
    fn missing_histclim_is_an_empty_field() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("impacts.csv");
        let output = BatchOutput::from_passes(
            metadata(),
            vec![record("A", 2020, 1.0)],
            None,
            PvalStore::median().serialize(),
        );

        output.write_impacts_csv(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "region,year,impact,histclim\nA,2020,1,\n");
    }

    #[test]
    fn partial_dir_is_a_sibling() {
        assert_eq!(
            partial_dir(Path::new("/runs/demo/batch3")),
            PathBuf::from("/runs/demo/batch3.partial")
        );
    }

    #[test]
    fn summary_counts_outcomes() {
        let summary = RunSummary::new(
            "demo",
            chrono::Utc::now().to_rfc3339(),
            vec![
                BatchSummary::Completed { batch: 0, rows: 10 },
                BatchSummary::Skipped { batch: 1 },
                BatchSummary::Failed {
                    batch: 2,
                    error: "boom".to_string(),
                },
            ],
        );
        assert_eq!(
            (summary.completed, summary.skipped, summary.failed),
            (1, 1, 1)
        );

        let json = serde_json::to_string(&summary.batches[1]).unwrap();
        assert_eq!(json, r#"{"status":"skipped","batch":1}"#);
    }
}
