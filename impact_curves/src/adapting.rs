//! Adapting curves: a region's response evolving year by year
//!
//! A region starts from the curve of its baseline covariates. Each year a
//! target curve is generated from that year's covariates and the current
//! curve moves toward it according to the adaptation rule. Under full
//! adaptation a second ("gamma") curve sets the pointwise rate: where
//! gamma(x) < 0 the value decays toward the target by exp(gamma(x)) per year,
//! elsewhere it is left alone.

use log::debug;

use crate::curve::ResponseCurve;
use crate::error::{AdaptationError, CurveError};
use crate::generator::CurveGenerator;
use crate::pvals::PvalStore;
use crate::Covariates;

/// How the current curve follows the target
#[derive(Debug, Clone, PartialEq)]
pub enum AdaptationRule {
    /// The baseline curve is used for every year
    NoAdaptation,
    /// The target replaces the current curve each year ("dumb" adaptation)
    Immediate,
    /// Exponential blend toward the target at the gamma curve's rate
    Full,
    /// Full blend, with the listed covariates held at their baseline values
    Comatose { frozen: Vec<String> },
}

impl AdaptationRule {
    fn needs_rate(&self) -> bool {
        matches!(self, AdaptationRule::Full | AdaptationRule::Comatose { .. })
    }
}

/// Per-region state: the current curve and the last year applied
#[derive(Debug, Clone)]
pub struct AdaptingCurve {
    region: String,
    curve: ResponseCurve,
    baseline: Covariates,
    last_year: Option<i32>,
}

impl AdaptingCurve {
    pub fn curve(&self) -> &ResponseCurve {
        &self.curve
    }

    pub fn last_year(&self) -> Option<i32> {
        self.last_year
    }

    /// Evaluate the current curve
    pub fn evaluate(&self, x: f64) -> f64 {
        self.curve.evaluate(x)
    }
}

/// Generators and rule shared by every region of a model
#[derive(Debug)]
pub struct AdaptiveModel {
    rule: AdaptationRule,
    target: CurveGenerator,
    rate: Option<CurveGenerator>,
    grid: Vec<f64>,
}

impl AdaptiveModel {
    /// Model adapting `target` under `rule`
    ///
    /// Blending rules need the rate generator and a strictly increasing
    /// evaluation grid; the blended curve is a step curve over that grid.
    pub fn new(
        rule: AdaptationRule,
        target: CurveGenerator,
        rate: Option<CurveGenerator>,
        grid: Vec<f64>,
    ) -> Result<Self, CurveError> {
        if rule.needs_rate() {
            if rate.is_none() {
                return Err(CurveError::InvalidShape(
                    "blended adaptation needs a gamma curve".to_string(),
                ));
            }
            if grid.is_empty() || grid.windows(2).any(|w| w[0] >= w[1]) {
                return Err(CurveError::InvalidShape(
                    "adaptation grid must be non-empty and strictly increasing".to_string(),
                ));
            }
        }

        Ok(AdaptiveModel {
            rule,
            target,
            rate,
            grid,
        })
    }

    /// Initial state of `region` from its baseline covariates
    pub fn create(
        &mut self,
        region: &str,
        baseline: &Covariates,
        pvals: &mut PvalStore,
    ) -> Result<AdaptingCurve, AdaptationError> {
        let curve = self.target.get_curve(region, baseline, pvals)?;
        debug!("{region}: baseline curve created");

        Ok(AdaptingCurve {
            region: region.to_string(),
            curve,
            baseline: baseline.clone(),
            last_year: None,
        })
    }

    /// Advance `state` to `year`
    ///
    /// After the first update, each year must follow the last one applied.
    pub fn update(
        &mut self,
        state: &mut AdaptingCurve,
        year: i32,
        covariates: &Covariates,
        pvals: &mut PvalStore,
    ) -> Result<(), AdaptationError> {
        if let Some(last) = state.last_year {
            if year <= last {
                return Err(AdaptationError::OutOfOrder {
                    region: state.region.clone(),
                    last,
                    requested: year,
                });
            }
            if year != last + 1 {
                return Err(AdaptationError::SkippedYears {
                    region: state.region.clone(),
                    last,
                    requested: year,
                });
            }
        }

        let region = state.region.as_str();
        let next = match &self.rule {
            AdaptationRule::NoAdaptation => None,
            AdaptationRule::Immediate => Some(self.target.get_curve(region, covariates, pvals)?),
            AdaptationRule::Full => Some(self.blend_toward(state, covariates, pvals)?),
            AdaptationRule::Comatose { frozen } => {
                let pinned = pin(covariates, &state.baseline, frozen);
                Some(self.blend_toward(state, &pinned, pvals)?)
            }
        };

        if let Some(curve) = next {
            state.curve = curve;
        }
        state.last_year = Some(year);
        Ok(())
    }

    fn blend_toward(
        &mut self,
        state: &AdaptingCurve,
        covariates: &Covariates,
        pvals: &mut PvalStore,
    ) -> Result<ResponseCurve, CurveError> {
        let region = state.region.as_str();
        let target = self.target.get_curve(region, covariates, pvals)?;
        let rate = self
            .rate
            .as_mut()
            .ok_or_else(|| CurveError::InvalidShape("missing gamma curve".to_string()))?
            .get_curve(region, covariates, pvals)?;
        blend(&state.curve, &target, &rate, &self.grid)
    }
}

/// `covariates` with every `frozen` name reset to its baseline value
fn pin(covariates: &Covariates, baseline: &Covariates, frozen: &[String]) -> Covariates {
    let mut pinned = covariates.clone();
    for name in frozen {
        if let Some(value) = baseline.get(name) {
            pinned.insert(name.clone(), *value);
        }
    }
    pinned
}

/// One year of adaptation, evaluated on `grid`
///
/// At each grid point x with gamma(x) < 0 the new value is
/// `current(x)·e^γ + target(x)·(1 − e^γ)`; where gamma(x) ≥ 0 the current
/// value is kept.
pub fn blend(
    current: &ResponseCurve,
    target: &ResponseCurve,
    gamma: &ResponseCurve,
    grid: &[f64],
) -> Result<ResponseCurve, CurveError> {
    let values = grid
        .iter()
        .map(|&x| {
            let now = current.evaluate(x);
            let rate = gamma.evaluate(x);
            if rate >= 0.0 {
                now
            } else {
                let keep = rate.exp();
                now * keep + target.evaluate(x) * (1.0 - keep)
            }
        })
        .collect();

    ResponseCurve::step_on_grid(grid, values)
}
