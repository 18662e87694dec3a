//! Small numerical helpers for coefficient draws
//!
//! Covariance matrices are factored with nalgebra; the CSVV keeps them as
//! plain rows and converts on demand.

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Diagonal jitter tried, relative to the largest variance, when a
/// covariance is only positive semi-definite.
const JITTER: [f64; 4] = [1e-12, 1e-10, 1e-8, 1e-6];

/// Square matrix from row-major rows; `None` if the rows are ragged
pub fn covariance(rows: &[Vec<f64>]) -> Option<DMatrix<f64>> {
    let n = rows.len();
    if rows.iter().any(|row| row.len() != n) {
        return None;
    }
    Some(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
}

/// Lower-triangular Cholesky factor L with Σ ≈ L Lᵀ
///
/// Regression covariances are often singular (a duplicated or unused term),
/// so a failed factorisation is retried with growing diagonal jitter.
/// Returns `None` if no jitter level makes the matrix positive definite.
pub fn cholesky(sigma: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = Cholesky::new(sigma.clone()) {
        return Some(chol.l());
    }

    let n = sigma.nrows();
    let scale = sigma.diagonal().amax().max(1.0);
    JITTER.iter().find_map(|eps| {
        let jittered = sigma + DMatrix::identity(n, n) * (eps * scale);
        Cholesky::new(jittered).map(|chol| chol.l())
    })
}

/// Draw one vector from N(mean, Σ) given the Cholesky factor of Σ
pub fn multivariate_normal<R: Rng>(mean: &[f64], factor: &DMatrix<f64>, rng: &mut R) -> Vec<f64> {
    let z = DVector::from_fn(mean.len(), |_, _| StandardNormal.sample(rng));
    let draw = DVector::from_column_slice(mean) + factor * z;
    draw.iter().copied().collect()
}

/// Inverse of the standard normal CDF (Acklam's rational approximation)
///
/// Relative error is below 1.2e-9 across (0, 1). The median maps to exactly 0.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p == 0.5 {
        return 0.0;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rebuilt(l: &DMatrix<f64>) -> DMatrix<f64> {
        l * l.transpose()
    }

    #[test]
    fn cholesky_reconstructs_matrix() {
        let sigma = covariance(&[
            vec![4.0, 2.0, 0.4],
            vec![2.0, 3.0, 0.3],
            vec![0.4, 0.3, 1.0],
        ])
        .unwrap();
        let l = cholesky(&sigma).unwrap();

        assert_eq!(l[(0, 1)], 0.0);
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rebuilt(&l)[(i, j)], sigma[(i, j)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn cholesky_accepts_semidefinite() {
        // Second variable is an exact copy of the first
        let sigma = covariance(&[vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let l = cholesky(&sigma).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(rebuilt(&l)[(i, j)], 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn cholesky_rejects_negative_variance() {
        let sigma = covariance(&[vec![-1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(cholesky(&sigma).is_none());
    }

    #[test]
    fn covariance_rejects_non_square() {
        assert!(covariance(&[vec![1.0, 0.0]]).is_none());
    }

    #[test]
    fn zero_covariance_draw_is_mean() {
        let mean = vec![0.5, -1.0];
        let factor = cholesky(&DMatrix::zeros(2, 2)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let draw = multivariate_normal(&mean, &factor, &mut rng);
        for (d, m) in draw.iter().zip(&mean) {
            assert_relative_eq!(d, m, epsilon = 1e-4);
        }
    }

    #[test]
    fn draws_match_covariance() {
        let mean = vec![1.0, 2.0];
        let sigma = covariance(&[vec![1.0, 0.6], vec![0.6, 2.0]]).unwrap();
        let factor = cholesky(&sigma).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let n = 20_000;
        let draws: Vec<Vec<f64>> = (0..n)
            .map(|_| multivariate_normal(&mean, &factor, &mut rng))
            .collect();

        let m0 = draws.iter().map(|d| d[0]).sum::<f64>() / n as f64;
        let m1 = draws.iter().map(|d| d[1]).sum::<f64>() / n as f64;
        let cov = draws
            .iter()
            .map(|d| (d[0] - m0) * (d[1] - m1))
            .sum::<f64>()
            / n as f64;

        assert!((m0 - 1.0).abs() < 0.05);
        assert!((m1 - 2.0).abs() < 0.05);
        assert!((cov - 0.6).abs() < 0.06);
    }

    #[test]
    fn normal_quantile_known_values() {
        assert_eq!(normal_quantile(0.5), 0.0);
        assert_relative_eq!(normal_quantile(0.975), 1.959964, epsilon = 1e-6);
        assert_relative_eq!(normal_quantile(0.025), -1.959964, epsilon = 1e-6);
        assert_relative_eq!(normal_quantile(0.001), -3.090232, epsilon = 1e-6);
        assert!(normal_quantile(0.0).is_infinite());
    }
}
