//! Curve generators: coefficients plus covariates to response curves
//!
//! Each curve coefficient is the dot product of its gamma entries with their
//! covariates. The shape decides how those coefficient values become a curve.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::csvv::CsvvData;
use crate::curve::ResponseCurve;
use crate::error::CurveError;
use crate::pvals::PvalStore;
use crate::Covariates;

/// Covariate name of the intercept term, always 1
pub const INTERCEPT: &str = "1";

/// How coefficient values map onto a curve
#[derive(Debug, Clone, PartialEq)]
pub enum CurveShape {
    /// `coefficients[i]` multiplies xⁱ
    Polynomial { coefficients: Vec<String> },
    /// `coefficients[i]` multiplies xⁱ⁺¹
    ZeroInterceptPolynomial { coefficients: Vec<String> },
    /// One coefficient per bin between consecutive edges
    Step {
        edges: Vec<f64>,
        coefficients: Vec<String>,
    },
    /// Linear coefficient then one per spline term; n knots take n - 1
    CubicSpline {
        knots: Vec<f64>,
        coefficients: Vec<String>,
    },
}

impl CurveShape {
    pub fn coefficients(&self) -> &[String] {
        match self {
            CurveShape::Polynomial { coefficients }
            | CurveShape::ZeroInterceptPolynomial { coefficients }
            | CurveShape::Step { coefficients, .. }
            | CurveShape::CubicSpline { coefficients, .. } => coefficients,
        }
    }

    fn validate(&self) -> Result<(), CurveError> {
        let count = self.coefficients().len();
        if count == 0 {
            return Err(CurveError::InvalidShape("no coefficients".to_string()));
        }

        let (points, what) = match self {
            CurveShape::Step { edges, .. } => (edges, "edges"),
            CurveShape::CubicSpline { knots, .. } => (knots, "knots"),
            _ => return Ok(()),
        };
        if points.len() != count + 1 {
            return Err(CurveError::InvalidShape(format!(
                "{} {what} for {count} coefficients",
                points.len()
            )));
        }
        if points.len() < 3 && what == "knots" {
            return Err(CurveError::InvalidShape(
                "a cubic spline needs at least 3 knots".to_string(),
            ));
        }
        if points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CurveError::InvalidShape(format!(
                "{what} must be strictly increasing"
            )));
        }
        Ok(())
    }

    fn build(&self, values: Vec<f64>) -> ResponseCurve {
        match self {
            CurveShape::Polynomial { .. } => ResponseCurve::Polynomial {
                coefficients: values,
            },
            CurveShape::ZeroInterceptPolynomial { .. } => ResponseCurve::ZeroInterceptPolynomial {
                coefficients: values,
            },
            CurveShape::Step { edges, .. } => ResponseCurve::Step {
                edges: edges.clone(),
                values,
            },
            CurveShape::CubicSpline { knots, .. } => ResponseCurve::CubicSpline {
                knots: knots.clone(),
                coefficients: values,
            },
        }
    }
}

/// Which regions share one Monte Carlo draw of gamma
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawScope {
    /// One draw for every region of the batch
    #[default]
    Batch,
    /// An independent draw per region
    Region,
}

/// Generator driven by one CSVV model
#[derive(Debug)]
pub struct CsvvCurveGenerator {
    /// Draw name in the pval store
    name: String,
    csvv: Arc<CsvvData>,
    shape: CurveShape,
    scope: DrawScope,
    /// Gamma entries feeding each shape coefficient
    terms: Vec<Vec<usize>>,
    /// Drawn gamma vectors by draw key
    gammas: HashMap<String, Vec<f64>>,
}

/// Produces a region's response curve from its covariates
#[derive(Debug)]
pub enum CurveGenerator {
    Csvv(CsvvCurveGenerator),
    /// Pointwise product of two generators' curves (interaction terms)
    Product(Box<CurveGenerator>, Box<CurveGenerator>),
}

impl CurveGenerator {
    /// Generator over `csvv`, checking the shape against the model's coefficients
    pub fn csvv(
        name: &str,
        csvv: Arc<CsvvData>,
        shape: CurveShape,
        scope: DrawScope,
    ) -> Result<Self, CurveError> {
        shape.validate()?;

        let model_coefficients = csvv.coefficient_names();
        if shape.coefficients().len() != model_coefficients.len() {
            return Err(CurveError::ArityMismatch {
                expected: shape.coefficients().len(),
                actual: model_coefficients.len(),
            });
        }

        let terms = shape
            .coefficients()
            .iter()
            .map(|coefficient| {
                let indices: Vec<usize> = csvv
                    .prednames
                    .iter()
                    .enumerate()
                    .filter(|(_, predname)| *predname == coefficient)
                    .map(|(i, _)| i)
                    .collect();
                if indices.is_empty() {
                    Err(CurveError::InvalidShape(format!(
                        "coefficient '{coefficient}' is not in model '{name}'"
                    )))
                } else {
                    Ok(indices)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CurveGenerator::Csvv(CsvvCurveGenerator {
            name: name.to_string(),
            csvv,
            shape,
            scope,
            terms,
            gammas: HashMap::new(),
        }))
    }

    pub fn product(left: CurveGenerator, right: CurveGenerator) -> Self {
        CurveGenerator::Product(Box::new(left), Box::new(right))
    }

    /// Curve for `region` under `covariates`
    ///
    /// Under a sampling store the gamma draw is made once per draw key and
    /// reused for every later curve of that key.
    pub fn get_curve(
        &mut self,
        region: &str,
        covariates: &Covariates,
        pvals: &mut PvalStore,
    ) -> Result<ResponseCurve, CurveError> {
        match self {
            CurveGenerator::Csvv(generator) => generator.get_curve(region, covariates, pvals),
            CurveGenerator::Product(left, right) => {
                let left = left.get_curve(region, covariates, pvals)?;
                let right = right.get_curve(region, covariates, pvals)?;
                Ok(ResponseCurve::Product(Box::new(left), Box::new(right)))
            }
        }
    }
}

impl CsvvCurveGenerator {
    fn get_curve(
        &mut self,
        region: &str,
        covariates: &Covariates,
        pvals: &mut PvalStore,
    ) -> Result<ResponseCurve, CurveError> {
        let key = match self.scope {
            DrawScope::Batch => "gamma".to_string(),
            DrawScope::Region => region.to_string(),
        };

        if !self.gammas.contains_key(&key) {
            let gamma = self.csvv.draw_gamma(pvals, &self.name, &key)?;
            debug!("{}: drew gamma for key '{key}'", self.name);
            self.gammas.insert(key.clone(), gamma);
        }
        let gamma = &self.gammas[&key];

        let values = self
            .terms
            .iter()
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| Ok(gamma[i] * covariate(&self.csvv.covarnames[i], covariates)?))
                    .sum::<Result<f64, CurveError>>()
            })
            .collect::<Result<Vec<f64>, CurveError>>()?;

        Ok(self.shape.build(values))
    }
}

fn covariate(name: &str, covariates: &Covariates) -> Result<f64, CurveError> {
    if name == INTERCEPT {
        return Ok(1.0);
    }
    covariates
        .get(name)
        .copied()
        .ok_or_else(|| CurveError::UnknownCovariate {
            name: name.to_string(),
        })
}
