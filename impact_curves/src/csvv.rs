//! CSVV coefficient files
//!
//! A CSVV file carries the point estimates (`gamma`) of an estimated response
//! function together with their covariance, in one of two layouts:
//!
//! - Current: an optional `---` ... `...` metadata header followed by the
//!   sections `observations`, `prednames`, `covarnames`, `gamma` and the
//!   covariance blocks. The covariance blocks may be labelled (`gammavcv`,
//!   `residvcv`) or simply follow the gamma row.
//! - Legacy: tag rows `NN`, `L`, `K`, `gamma`, `gammavcv`, `residvcv`, each
//!   followed by numeric rows up to the next tag. Term names are optional
//!   (`prednames` / `covarnames` tags).
//!
//! Every gamma entry belongs to one curve coefficient (its predname) and is
//! multiplied by one covariate (its covarname, `1` for the intercept).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{CsvvError, CurveError};
use crate::pvals::PvalStore;
use crate::stats;

const CURRENT_MARKERS: [&str; 6] = [
    "observations",
    "prednames",
    "covarnames",
    "gamma",
    "gammavcv",
    "residvcv",
];

const LEGACY_TAGS: [&str; 8] = [
    "NN",
    "L",
    "K",
    "gamma",
    "gammavcv",
    "residvcv",
    "prednames",
    "covarnames",
];

const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Physical layout the data was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvvFormat {
    Legacy,
    Current,
}

/// Parsed coefficients and covariance of one estimated model
///
/// Immutable once parsed; shared read-only by every region and draw.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvvData {
    pub format: CsvvFormat,
    /// Header entries of the current format (`oneline`, `version`, ...)
    pub metadata: BTreeMap<String, String>,
    pub observations: Option<f64>,
    /// Curve coefficient each gamma entry contributes to
    pub prednames: Vec<String>,
    /// Covariate each gamma entry is multiplied by
    pub covarnames: Vec<String>,
    pub gamma: Vec<f64>,
    pub gammavcv: Option<Vec<Vec<f64>>>,
    pub residvcv: Option<Vec<Vec<f64>>>,
}

struct Row {
    line: usize,
    fields: Vec<String>,
}

impl Row {
    fn is_numeric(&self) -> bool {
        self.fields[0].parse::<f64>().is_ok()
    }

    fn numbers(&self) -> Result<Vec<f64>, CsvvError> {
        self.fields
            .iter()
            .map(|field| {
                field.parse::<f64>().map_err(|_| CsvvError::InvalidNumber {
                    line: self.line,
                    value: field.clone(),
                })
            })
            .collect()
    }
}

impl CsvvData {
    /// Read and parse a CSVV file, detecting its format
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CsvvError> {
        let file = File::open(path)?;
        Self::parse(file)
    }

    /// Parse CSVV content from any reader, detecting its format
    pub fn parse<R: Read>(mut reader: R) -> Result<Self, CsvvError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;

        let (metadata, body, offset) = split_header(&text)?;
        let rows = read_rows(body.as_bytes(), offset)?;

        let format = if metadata.is_some() {
            CsvvFormat::Current
        } else {
            let Some(first) = rows.first() else {
                return Err(CsvvError::Incomplete {
                    reason: "no content".to_string(),
                });
            };
            match first.fields[0].as_str() {
                "observations" | "prednames" | "covarnames" => CsvvFormat::Current,
                "NN" | "L" | "K" => CsvvFormat::Legacy,
                "gamma" => {
                    let has_counts = rows.iter().any(|row| {
                        row.fields.len() == 1 && matches!(row.fields[0].as_str(), "L" | "K")
                    });
                    if has_counts {
                        CsvvFormat::Legacy
                    } else {
                        CsvvFormat::Current
                    }
                }
                _ if first.is_numeric() => return Err(CsvvError::Ordering { line: first.line }),
                other => {
                    return Err(CsvvError::Malformed(format!(
                        "unrecognized first line '{other}'"
                    )))
                }
            }
        };

        let data = match format {
            CsvvFormat::Current => parse_current(rows, metadata.unwrap_or_default())?,
            CsvvFormat::Legacy => parse_legacy(rows)?,
        };
        data.validate()?;
        Ok(data)
    }

    /// Keep only gamma entries `index0..index1`
    ///
    /// Files that bundle several age groups carry one window of gamma entries
    /// per group; the gamma covariance is cut to the same window.
    pub fn subset(&self, index0: usize, index1: usize) -> Result<Self, CsvvError> {
        if index0 >= index1 || index1 > self.gamma.len() {
            return Err(CsvvError::Malformed(format!(
                "slice {index0}..{index1} is outside {} gamma entries",
                self.gamma.len()
            )));
        }

        let gammavcv = self.gammavcv.as_ref().map(|vcv| {
            vcv[index0..index1]
                .iter()
                .map(|row| row[index0..index1].to_vec())
                .collect()
        });

        Ok(CsvvData {
            format: self.format,
            metadata: self.metadata.clone(),
            observations: self.observations,
            prednames: self.prednames[index0..index1].to_vec(),
            covarnames: self.covarnames[index0..index1].to_vec(),
            gamma: self.gamma[index0..index1].to_vec(),
            gammavcv,
            residvcv: self.residvcv.clone(),
        })
    }

    /// Distinct curve coefficients, in order of first appearance
    pub fn coefficient_names(&self) -> Vec<&str> {
        unique(&self.prednames)
    }

    /// Distinct covariates, in order of first appearance
    pub fn predictor_names(&self) -> Vec<&str> {
        unique(&self.covarnames)
    }

    pub fn coefficient_count(&self) -> usize {
        self.coefficient_names().len()
    }

    pub fn predictor_count(&self) -> usize {
        self.predictor_names().len()
    }

    /// Gamma vector for one Monte Carlo draw
    ///
    /// - Constant store at the median: the point estimate.
    /// - Constant store at quantile q: each entry moved to its marginal quantile.
    /// - On-demand store: a multivariate normal draw seeded by the store under
    ///   `(draw, key)`, so the same draw is reproduced on replay.
    pub fn draw_gamma(
        &self,
        pvals: &mut PvalStore,
        draw: &str,
        key: &str,
    ) -> Result<Vec<f64>, CurveError> {
        if let Some(quantile) = pvals.constant_quantile() {
            if quantile == crate::pvals::MEDIAN {
                return Ok(self.gamma.clone());
            }
            let vcv = self.require_gammavcv()?;
            let z = stats::normal_quantile(quantile);
            return Ok(self
                .gamma
                .iter()
                .enumerate()
                .map(|(i, g)| g + vcv[i][i].max(0.0).sqrt() * z)
                .collect());
        }

        let vcv = self.require_gammavcv()?;
        let factor = stats::covariance(vcv)
            .and_then(|sigma| stats::cholesky(&sigma))
            .ok_or_else(|| {
                CsvvError::Malformed("gamma covariance is not positive semi-definite".to_string())
            })?;
        let seed = pvals.get_seed(draw, key)?;
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(stats::multivariate_normal(&self.gamma, &factor, &mut rng))
    }

    fn require_gammavcv(&self) -> Result<&Vec<Vec<f64>>, CsvvError> {
        self.gammavcv.as_ref().ok_or_else(|| {
            CsvvError::Malformed("gamma covariance is required for sampled coefficients".to_string())
        })
    }

    fn validate(&self) -> Result<(), CsvvError> {
        let n = self.gamma.len();
        if n == 0 {
            return Err(CsvvError::Malformed("gamma is empty".to_string()));
        }
        if self.prednames.len() != n || self.covarnames.len() != n {
            return Err(CsvvError::Malformed(format!(
                "{} prednames and {} covarnames for {} gamma entries",
                self.prednames.len(),
                self.covarnames.len(),
                n
            )));
        }
        if let Some(vcv) = &self.gammavcv {
            check_square(vcv, Some(n), "gammavcv")?;
        }
        if let Some(vcv) = &self.residvcv {
            check_square(vcv, None, "residvcv")?;
        }
        Ok(())
    }
}

fn unique(names: &[String]) -> Vec<&str> {
    let mut seen = Vec::new();
    for name in names {
        if !seen.contains(&name.as_str()) {
            seen.push(name.as_str());
        }
    }
    seen
}

fn check_square(matrix: &[Vec<f64>], size: Option<usize>, name: &str) -> Result<(), CsvvError> {
    let n = size.unwrap_or(matrix.len());
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        return Err(CsvvError::Malformed(format!(
            "{name} must be a {n}x{n} matrix"
        )));
    }
    for i in 0..n {
        for j in 0..i {
            if (matrix[i][j] - matrix[j][i]).abs() > SYMMETRY_TOLERANCE {
                warn!("{name} is not symmetric at ({i}, {j})");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Split off a `---` ... `...` metadata header
///
/// Returns the header entries (if any), the remaining text and the number of
/// lines consumed, so row line numbers still refer to the whole file.
fn split_header(text: &str) -> Result<(Option<BTreeMap<String, String>>, &str, usize), CsvvError> {
    let mut lines = text.split_inclusive('\n');
    let mut consumed = 0;
    let mut position = 0;

    let opened = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => {
                consumed += 1;
                position += line.len();
            }
            Some(line) if line.trim() == "---" => {
                consumed += 1;
                position += line.len();
                break true;
            }
            _ => break false,
        }
    };
    if !opened {
        return Ok((None, text, 0));
    }

    let mut metadata = BTreeMap::new();
    for line in lines {
        consumed += 1;
        position += line.len();
        let line = line.trim();
        if line == "..." {
            return Ok((Some(metadata), &text[position..], consumed));
        }
        if let Some((key, value)) = line.split_once(':') {
            metadata.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Err(CsvvError::Incomplete {
        reason: "metadata header is not closed by '...'".to_string(),
    })
}

fn read_rows<R: Read>(reader: R, offset: usize) -> Result<Vec<Row>, CsvvError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = offset + record.position().map_or(0, |p| p.line() as usize);
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        while fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        if !fields.is_empty() {
            rows.push(Row { line, fields });
        }
    }
    Ok(rows)
}

/// Split rows into named blocks, one per section marker
fn into_blocks(
    rows: impl Iterator<Item = Row>,
    markers: &[&str],
) -> Result<BTreeMap<String, Vec<Row>>, CsvvError> {
    let mut blocks: BTreeMap<String, Vec<Row>> = BTreeMap::new();
    let mut section: Option<String> = None;

    for row in rows {
        if markers.contains(&row.fields[0].as_str()) {
            let name = row.fields[0].clone();
            if blocks.contains_key(&name) {
                return Err(CsvvError::Malformed(format!(
                    "section '{name}' appears twice"
                )));
            }
            blocks.insert(name.clone(), Vec::new());
            section = Some(name);
            continue;
        }

        match &section {
            Some(name) => blocks.entry(name.clone()).or_default().push(row),
            None => return Err(CsvvError::Ordering { line: row.line }),
        }
    }

    Ok(blocks)
}

/// Remove a section; `Ok(None)` if absent, `Incomplete` if present but empty
fn take_block(
    blocks: &mut BTreeMap<String, Vec<Row>>,
    name: &str,
) -> Result<Option<Vec<Row>>, CsvvError> {
    match blocks.remove(name) {
        Some(rows) if rows.is_empty() => Err(CsvvError::Incomplete {
            reason: format!("section '{name}' has no rows"),
        }),
        other => Ok(other),
    }
}

fn required(block: Option<Vec<Row>>, name: &str) -> Result<Vec<Row>, CsvvError> {
    block.ok_or_else(|| CsvvError::Malformed(format!("missing section '{name}'")))
}

fn matrix(rows: &[Row]) -> Result<Vec<Vec<f64>>, CsvvError> {
    rows.iter().map(Row::numbers).collect()
}

fn single_row(rows: Vec<Row>, name: &str) -> Result<Row, CsvvError> {
    let count = rows.len();
    let mut rows = rows.into_iter();
    match (rows.next(), count) {
        (Some(row), 1) => Ok(row),
        _ => Err(CsvvError::Malformed(format!(
            "section '{name}' must be a single row, found {count}"
        ))),
    }
}

fn parse_current(
    rows: Vec<Row>,
    metadata: BTreeMap<String, String>,
) -> Result<CsvvData, CsvvError> {
    let mut blocks = into_blocks(rows.into_iter(), &CURRENT_MARKERS)?;

    let observations = match take_block(&mut blocks, "observations")? {
        Some(rows) => Some(rows[0].numbers()?[0]),
        None => None,
    };
    let prednames = single_row(
        required(take_block(&mut blocks, "prednames")?, "prednames")?,
        "prednames",
    )?
    .fields;
    let covarnames = single_row(
        required(take_block(&mut blocks, "covarnames")?, "covarnames")?,
        "covarnames",
    )?
    .fields;

    let gamma_rows = required(take_block(&mut blocks, "gamma")?, "gamma")?;
    let gamma = gamma_rows[0].numbers()?;
    let trailing = matrix(&gamma_rows[1..])?;

    let mut gammavcv = take_block(&mut blocks, "gammavcv")?
        .map(|rows| matrix(&rows))
        .transpose()?;
    let mut residvcv = take_block(&mut blocks, "residvcv")?
        .map(|rows| matrix(&rows))
        .transpose()?;

    if !trailing.is_empty() {
        if gammavcv.is_some() {
            return Err(CsvvError::Malformed(format!(
                "{} unlabelled rows follow gamma alongside a labelled gammavcv",
                trailing.len()
            )));
        }
        let n = gamma.len();
        if trailing.len() < n {
            return Err(CsvvError::Incomplete {
                reason: format!("gamma covariance has {} of {} rows", trailing.len(), n),
            });
        }
        let mut trailing = trailing;
        let rest = trailing.split_off(n);
        gammavcv = Some(trailing);
        if !rest.is_empty() {
            if residvcv.is_some() {
                return Err(CsvvError::Malformed(
                    "residual covariance given twice".to_string(),
                ));
            }
            residvcv = Some(rest);
        }
    }

    Ok(CsvvData {
        format: CsvvFormat::Current,
        metadata,
        observations,
        prednames,
        covarnames,
        gamma,
        gammavcv,
        residvcv,
    })
}

fn legacy_count(blocks: &mut BTreeMap<String, Vec<Row>>, tag: &str) -> Result<usize, CsvvError> {
    let rows = required(take_block(blocks, tag)?, tag)?;
    let value = rows[0].numbers()?[0];
    if value < 1.0 || value.fract() != 0.0 {
        return Err(CsvvError::Malformed(format!(
            "{tag} must be a positive integer, found {value}"
        )));
    }
    Ok(value as usize)
}

fn parse_legacy(rows: Vec<Row>) -> Result<CsvvData, CsvvError> {
    let mut blocks = into_blocks(rows.into_iter(), &LEGACY_TAGS)?;

    let observations = match take_block(&mut blocks, "NN")? {
        Some(rows) => Some(rows[0].numbers()?[0]),
        None => None,
    };
    let l = legacy_count(&mut blocks, "L")?;
    let k = legacy_count(&mut blocks, "K")?;

    // Only the first gamma row is used
    let gamma = required(take_block(&mut blocks, "gamma")?, "gamma")?[0].numbers()?;
    if gamma.len() != l * k {
        return Err(CsvvError::Malformed(format!(
            "gamma has {} entries, expected L x K = {}",
            gamma.len(),
            l * k
        )));
    }

    let gammavcv = matrix(&required(take_block(&mut blocks, "gammavcv")?, "gammavcv")?)?;
    let residvcv = take_block(&mut blocks, "residvcv")?
        .map(|rows| matrix(&rows))
        .transpose()?;

    let prednames = match take_block(&mut blocks, "prednames")? {
        Some(rows) => {
            let names = single_row(rows, "prednames")?.fields;
            expand_names(names, l, k, true, "prednames")?
        }
        None => (0..l)
            .flat_map(|i| std::iter::repeat(format!("beta{}", i + 1)).take(k))
            .collect(),
    };
    let covarnames = match take_block(&mut blocks, "covarnames")? {
        Some(rows) => {
            let names = single_row(rows, "covarnames")?.fields;
            expand_names(names, l, k, false, "covarnames")?
        }
        None => (0..l)
            .flat_map(|_| {
                (0..k).map(|j| {
                    if j == 0 {
                        "1".to_string()
                    } else {
                        format!("cov{j}")
                    }
                })
            })
            .collect(),
    };

    Ok(CsvvData {
        format: CsvvFormat::Legacy,
        metadata: BTreeMap::new(),
        observations,
        prednames,
        covarnames,
        gamma,
        gammavcv: Some(gammavcv),
        residvcv,
    })
}

/// Expand per-coefficient (L) or per-covariate (K) names to one per gamma entry
fn expand_names(
    names: Vec<String>,
    l: usize,
    k: usize,
    per_coefficient: bool,
    tag: &str,
) -> Result<Vec<String>, CsvvError> {
    if names.len() == l * k {
        return Ok(names);
    }
    if per_coefficient && names.len() == l {
        return Ok(names
            .iter()
            .flat_map(|name| std::iter::repeat(name.clone()).take(k))
            .collect());
    }
    if !per_coefficient && names.len() == k {
        return Ok((0..l).flat_map(|_| names.iter().cloned()).collect());
    }
    Err(CsvvError::Malformed(format!(
        "{tag} has {} names for L = {l}, K = {k}",
        names.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CURRENT: &str = "\
---
oneline: Mortality, age 65+
version: MORTALITY-2024
...
observations
 8000
prednames
tas,tas,tas2,tas2
covarnames
1,loggdppc,1,loggdppc
gamma
0.5,-0.02,0.01,-0.001
gammavcv
0.01,0,0,0
0,0.0004,0,0
0,0,0.0001,0
0,0,0,0.000001
residvcv
2.5
";

    const LEGACY: &str = "\
NN
8000
L
2
K
2
prednames
tas,tas2
covarnames
1,loggdppc
gamma
0.5,-0.02,0.01,-0.001
gammavcv
0.01,0,0,0
0,0.0004,0,0
0,0,0.0001,0
0,0,0,0.000001
residvcv
2.5
";

    #[test]
    fn both_formats_read_the_same_model() {
        let current = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        let legacy = CsvvData::parse(LEGACY.as_bytes()).unwrap();

        assert_eq!(current.format, CsvvFormat::Current);
        assert_eq!(legacy.format, CsvvFormat::Legacy);
        assert_eq!(current.prednames, legacy.prednames);
        assert_eq!(current.covarnames, legacy.covarnames);
        assert_eq!(current.gamma, legacy.gamma);
        assert_eq!(current.gammavcv, legacy.gammavcv);
        assert_eq!(current.residvcv, legacy.residvcv);
        assert_eq!(current.observations, legacy.observations);
    }

    #[test]
    fn metadata_keeps_commas() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        assert_eq!(data.metadata["oneline"], "Mortality, age 65+");
        assert_eq!(data.metadata["version"], "MORTALITY-2024");
    }

    #[test]
    fn names_and_counts() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        assert_eq!(data.coefficient_names(), vec!["tas", "tas2"]);
        assert_eq!(data.predictor_names(), vec!["1", "loggdppc"]);
        assert_eq!(data.coefficient_count() * data.predictor_count(), data.gamma.len());
    }

    #[test]
    fn unlabelled_covariance_blocks() {
        let text = "prednames\ntas,tas2\ncovarnames\n1,1\ngamma\n1.0,2.0\n0.1,0.0\n0.0,0.2\n3.0\n";
        let data = CsvvData::parse(text.as_bytes()).unwrap();
        assert_eq!(data.gammavcv, Some(vec![vec![0.1, 0.0], vec![0.0, 0.2]]));
        assert_eq!(data.residvcv, Some(vec![vec![3.0]]));
    }

    #[test]
    fn covariance_is_optional_in_current_format() {
        let text = "prednames\ntas\ncovarnames\n1\ngamma\n0.01\n";
        let data = CsvvData::parse(text.as_bytes()).unwrap();
        assert_eq!(data.gamma, vec![0.01]);
        assert!(data.gammavcv.is_none());
    }

    #[test]
    fn legacy_default_names() {
        let text = "L\n2\nK\n1\ngamma\n0.3,0.4\n9,9\ngammavcv\n1,0\n0,1\n";
        let data = CsvvData::parse(text.as_bytes()).unwrap();
        assert_eq!(data.prednames, vec!["beta1", "beta2"]);
        assert_eq!(data.covarnames, vec!["1", "1"]);
        // Only the first gamma row is used
        assert_eq!(data.gamma, vec![0.3, 0.4]);
    }

    #[test]
    fn empty_input_is_incomplete() {
        assert!(matches!(
            CsvvData::parse("".as_bytes()),
            Err(CsvvError::Incomplete { .. })
        ));
        assert!(matches!(
            CsvvData::parse("\n\n".as_bytes()),
            Err(CsvvError::Incomplete { .. })
        ));
    }

    #[test]
    fn truncated_section_is_incomplete() {
        let text = "prednames\ntas\ncovarnames\n1\ngamma\n";
        assert!(matches!(
            CsvvData::parse(text.as_bytes()),
            Err(CsvvError::Incomplete { .. })
        ));

        let unterminated = "---\noneline: x\nprednames\n";
        assert!(matches!(
            CsvvData::parse(unterminated.as_bytes()),
            Err(CsvvError::Incomplete { .. })
        ));
    }

    #[test]
    fn numeric_row_before_section_is_ordering_error() {
        let text = "0.5,0.2\nprednames\ntas\n";
        assert!(matches!(
            CsvvData::parse(text.as_bytes()),
            Err(CsvvError::Ordering { line: 1 })
        ));

        let after_header = "---\nversion: 1\n...\n0.5\nprednames\ntas\n";
        assert!(matches!(
            CsvvData::parse(after_header.as_bytes()),
            Err(CsvvError::Ordering { line: 4 })
        ));
    }

    #[test]
    fn missing_section_is_malformed() {
        let text = "prednames\ntas\ngamma\n0.1\n";
        assert!(matches!(
            CsvvData::parse(text.as_bytes()),
            Err(CsvvError::Malformed(_))
        ));
    }

    #[test]
    fn length_mismatch_is_malformed() {
        let text = "prednames\ntas,tas2\ncovarnames\n1\ngamma\n0.1,0.2\n";
        assert!(matches!(
            CsvvData::parse(text.as_bytes()),
            Err(CsvvError::Malformed(_))
        ));

        let legacy = "L\n2\nK\n2\ngamma\n0.1,0.2\ngammavcv\n1,0\n0,1\n";
        assert!(matches!(
            CsvvData::parse(legacy.as_bytes()),
            Err(CsvvError::Malformed(_))
        ));
    }

    #[test]
    fn bad_number_reports_line() {
        let text = "prednames\ntas\ncovarnames\n1\ngamma\nabc\n";
        match CsvvData::parse(text.as_bytes()) {
            Err(CsvvError::InvalidNumber { line, value }) => {
                assert_eq!(line, 6);
                assert_eq!(value, "abc");
            }
            other => panic!("expected InvalidNumber, got {other:?}"),
        }
    }

    #[test]
    fn subset_windows_gamma_and_covariance() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        let window = data.subset(2, 4).unwrap();

        assert_eq!(window.prednames, vec!["tas2", "tas2"]);
        assert_eq!(window.gamma, vec![0.01, -0.001]);
        assert_eq!(
            window.gammavcv,
            Some(vec![vec![0.0001, 0.0], vec![0.0, 0.000001]])
        );
        assert!(data.subset(3, 3).is_err());
        assert!(data.subset(0, 5).is_err());
    }

    #[test]
    fn median_draw_is_point_estimate() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        let mut pvals = PvalStore::median();
        assert_eq!(data.draw_gamma(&mut pvals, "mortality", "gamma").unwrap(), data.gamma);
    }

    #[test]
    fn constant_quantile_shifts_by_marginal_sd() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        let mut pvals = PvalStore::constant(0.975);
        let drawn = data.draw_gamma(&mut pvals, "mortality", "gamma").unwrap();

        // sd of the first entry is 0.1
        assert_relative_eq!(drawn[0], 0.5 + 0.1 * 1.959964, epsilon = 1e-6);
        assert!(drawn[1] > data.gamma[1]);
    }

    #[test]
    fn on_demand_draw_replays_after_lock() {
        let data = CsvvData::parse(CURRENT.as_bytes()).unwrap();
        let mut pvals = PvalStore::on_demand(11);

        let first = data.draw_gamma(&mut pvals, "mortality", "gamma").unwrap();
        assert_ne!(first, data.gamma);

        pvals.lock();
        let replay = data.draw_gamma(&mut pvals, "mortality", "gamma").unwrap();
        assert_eq!(first, replay);
    }

    #[test]
    fn sampled_draw_needs_covariance() {
        let text = "prednames\ntas\ncovarnames\n1\ngamma\n0.01\n";
        let data = CsvvData::parse(text.as_bytes()).unwrap();
        let mut pvals = PvalStore::on_demand(1);
        assert!(data.draw_gamma(&mut pvals, "m", "gamma").is_err());
    }
}
