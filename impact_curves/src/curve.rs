//! Response curves: impact as a function of one weather variable

use crate::error::CurveError;

/// A concrete response curve
///
/// Curves are plain values: the generator that builds one, or the adapting
/// curve evolving it, owns it outright.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseCurve {
    /// y = c₀ + c₁x + c₂x² + ...
    Polynomial { coefficients: Vec<f64> },
    /// y = c₁x + c₂x² + ... (no intercept; `coefficients[0]` multiplies x)
    ZeroInterceptPolynomial { coefficients: Vec<f64> },
    /// `values[i]` on `[edges[i], edges[i + 1])`, the last bin closed above
    Step { edges: Vec<f64>, values: Vec<f64> },
    /// Restricted (natural) cubic spline: a linear term plus one term per
    /// interior knot, linear beyond the outer knots
    CubicSpline {
        knots: Vec<f64>,
        coefficients: Vec<f64>,
    },
    /// Pointwise product of two curves
    Product(Box<ResponseCurve>, Box<ResponseCurve>),
}

impl ResponseCurve {
    /// Step curve taking `values[i]` around `grid[i]`
    ///
    /// Bin edges sit halfway between grid points and the outer bins are
    /// unbounded, so every grid point evaluates to exactly its value.
    pub fn step_on_grid(grid: &[f64], values: Vec<f64>) -> Result<Self, CurveError> {
        if grid.is_empty() || grid.len() != values.len() {
            return Err(CurveError::InvalidShape(format!(
                "{} values for a grid of {} points",
                values.len(),
                grid.len()
            )));
        }
        if grid.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CurveError::InvalidShape(
                "grid must be strictly increasing".to_string(),
            ));
        }

        let mut edges = Vec::with_capacity(grid.len() + 1);
        edges.push(f64::NEG_INFINITY);
        edges.extend(grid.windows(2).map(|w| 0.5 * (w[0] + w[1])));
        edges.push(f64::INFINITY);

        Ok(ResponseCurve::Step { edges, values })
    }

    /// Evaluate at `x`; NaN outside a step curve's domain
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            ResponseCurve::Polynomial { coefficients } => horner(coefficients, x),
            ResponseCurve::ZeroInterceptPolynomial { coefficients } => x * horner(coefficients, x),
            ResponseCurve::Step { values, .. } => match self.segment(x) {
                Some(bin) => values[bin],
                None => f64::NAN,
            },
            ResponseCurve::CubicSpline {
                knots,
                coefficients,
            } => {
                let linear = coefficients.first().copied().unwrap_or(0.0) * x;
                let terms: f64 = coefficients
                    .iter()
                    .skip(1)
                    .enumerate()
                    .map(|(k, c)| c * spline_term(knots, k, x))
                    .sum();
                linear + terms
            }
            ResponseCurve::Product(left, right) => left.evaluate(x) * right.evaluate(x),
        }
    }

    /// Evaluate at every point of `xs`
    pub fn sample(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x)).collect()
    }

    /// Range of x the curve is defined on
    pub fn domain(&self) -> (f64, f64) {
        match self {
            ResponseCurve::Step { edges, .. } => (edges[0], edges[edges.len() - 1]),
            ResponseCurve::Product(left, right) => {
                let (l0, l1) = left.domain();
                let (r0, r1) = right.domain();
                (l0.max(r0), l1.min(r1))
            }
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }

    /// The bin (step) or knot interval (spline) responsible for `x`
    ///
    /// For a step curve this is the index of the value used at `x`. For a
    /// spline it is the index of the last knot at or below `x`, `None` below
    /// the first knot. Other curves have no segments.
    pub fn segment(&self, x: f64) -> Option<usize> {
        match self {
            ResponseCurve::Step { edges, .. } => {
                let last = edges.len() - 1;
                if x.is_nan() || x < edges[0] || x > edges[last] {
                    return None;
                }
                if x == edges[last] {
                    return Some(last - 1);
                }
                // First edge strictly above x, minus one
                Some(edges.partition_point(|edge| *edge <= x) - 1)
            }
            ResponseCurve::CubicSpline { knots, .. } => {
                if x.is_nan() || knots.is_empty() || x < knots[0] {
                    return None;
                }
                Some(knots.partition_point(|knot| *knot <= x) - 1)
            }
            _ => None,
        }
    }
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

fn cube_plus(v: f64) -> f64 {
    if v > 0.0 {
        v * v * v
    } else {
        0.0
    }
}

/// k-th restricted cubic spline basis term over `knots`
fn spline_term(knots: &[f64], k: usize, x: f64) -> f64 {
    let n = knots.len();
    let t_k = knots[k];
    let t_penult = knots[n - 2];
    let t_last = knots[n - 1];
    let span = t_last - t_penult;

    cube_plus(x - t_k) - cube_plus(x - t_penult) * (t_last - t_k) / span
        + cube_plus(x - t_last) * (t_penult - t_k) / span
}
