//! Ridge regression with leave-one-out alpha selection
//!
//! Solves `(XᵀX + αI)β = Xᵀy` on centred data so the intercept is not
//! penalised. `RidgeCv` picks α by the closed-form leave-one-out error
//! `e_i / (1 - h_ii)` of each candidate.

use crate::error::ForecastError;
use crate::Result;

/// `n` values log-spaced between `10^start` and `10^end`.
pub fn logspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![10f64.powf(start)],
        _ => (0..n)
            .map(|i| 10f64.powf(start + (end - start) * i as f64 / (n - 1) as f64))
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RidgeFit {
    pub alpha: f64,
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl RidgeFit {
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(b, v)| b * v)
                .sum::<f64>()
    }
}

/// Lower-triangular Cholesky factor of a symmetric positive definite matrix.
fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - sum;
                if d <= 0.0 || !d.is_finite() {
                    return Err(ForecastError::Numerical(
                        "matrix is not positive definite".to_string(),
                    ));
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    Ok(l)
}

/// Solve `L Lᵀ x = b`.
fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = l.len();
    let mut z = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * z[k]).sum();
        z[i] = (b[i] - sum) / l[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (z[i] - sum) / l[i][i];
    }
    x
}

/// Centred design shared by every alpha candidate.
struct Centred {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    x_mean: Vec<f64>,
    y_mean: f64,
    gram: Vec<Vec<f64>>,
    xty: Vec<f64>,
}

impl Centred {
    fn new<R: AsRef<[f64]>>(x: &[R], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(ForecastError::Numerical(format!(
                "design has {} rows but {} targets",
                n,
                y.len()
            )));
        }
        let p = x[0].as_ref().len();
        if x.iter().any(|row| row.as_ref().len() != p) {
            return Err(ForecastError::Numerical("ragged design matrix".to_string()));
        }
        if x.iter().flat_map(|r| r.as_ref()).chain(y).any(|v| !v.is_finite()) {
            return Err(ForecastError::Numerical("non-finite value in design".to_string()));
        }

        let mut x_mean = vec![0.0; p];
        for row in x {
            for (m, v) in x_mean.iter_mut().zip(row.as_ref()) {
                *m += v / n as f64;
            }
        }
        let y_mean = y.iter().sum::<f64>() / n as f64;

        let xc: Vec<Vec<f64>> = x
            .iter()
            .map(|row| row.as_ref().iter().zip(&x_mean).map(|(v, m)| v - m).collect())
            .collect();
        let yc: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        let mut gram = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        for (row, target) in xc.iter().zip(&yc) {
            for i in 0..p {
                xty[i] += row[i] * target;
                for j in 0..=i {
                    gram[i][j] += row[i] * row[j];
                }
            }
        }
        for i in 0..p {
            for j in 0..i {
                gram[j][i] = gram[i][j];
            }
        }

        Ok(Self {
            x: xc,
            y: yc,
            x_mean,
            y_mean,
            gram,
            xty,
        })
    }

    fn factor(&self, alpha: f64) -> Result<Vec<Vec<f64>>> {
        let mut a = self.gram.clone();
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += alpha;
        }
        cholesky(&a)
    }

    fn fit_with(&self, alpha: f64, l: &[Vec<f64>]) -> RidgeFit {
        let coefficients = cholesky_solve(l, &self.xty);
        let intercept = self.y_mean
            - coefficients
                .iter()
                .zip(&self.x_mean)
                .map(|(b, m)| b * m)
                .sum::<f64>();
        RidgeFit {
            alpha,
            intercept,
            coefficients,
        }
    }

    /// Mean squared leave-one-out error for a factored alpha.
    fn loo_mse(&self, l: &[Vec<f64>], beta: &[f64]) -> f64 {
        let n = self.x.len() as f64;
        let mut total = 0.0;
        for (row, target) in self.x.iter().zip(&self.y) {
            let fitted: f64 = row.iter().zip(beta).map(|(v, b)| v * b).sum();
            let solved = cholesky_solve(l, row);
            let leverage = row.iter().zip(&solved).map(|(v, s)| v * s).sum::<f64>() + 1.0 / n;
            let denom = (1.0 - leverage).max(1e-12);
            let loo = (target - fitted) / denom;
            total += loo * loo;
        }
        total / n
    }
}

/// Fit ridge regression with a fixed alpha.
pub fn fit_ridge<R: AsRef<[f64]>>(x: &[R], y: &[f64], alpha: f64) -> Result<RidgeFit> {
    let centred = Centred::new(x, y)?;
    let l = centred.factor(alpha)?;
    Ok(centred.fit_with(alpha, &l))
}

/// Ridge regression with alpha chosen by efficient leave-one-out
#[derive(Debug, Clone)]
pub struct RidgeCv {
    pub alphas: Vec<f64>,
}

impl Default for RidgeCv {
    fn default() -> Self {
        Self {
            alphas: logspace(-3.0, 3.0, 20),
        }
    }
}

impl RidgeCv {
    pub fn new(alphas: Vec<f64>) -> Self {
        Self { alphas }
    }

    /// Returns the fit with the lowest leave-one-out MSE and that MSE.
    pub fn fit<R: AsRef<[f64]>>(&self, x: &[R], y: &[f64]) -> Result<(RidgeFit, f64)> {
        let centred = Centred::new(x, y)?;
        let mut best: Option<(RidgeFit, f64)> = None;

        for &alpha in &self.alphas {
            let l = centred.factor(alpha)?;
            let fit = centred.fit_with(alpha, &l);
            let mse = centred.loo_mse(&l, &fit.coefficients);
            if best.as_ref().map_or(true, |(_, b)| mse < *b) {
                best = Some((fit, mse));
            }
        }

        best.ok_or_else(|| ForecastError::Numerical("no alpha candidates".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logspace_endpoints() {
        let grid = logspace(-3.0, 3.0, 20);
        assert_eq!(grid.len(), 20);
        assert!((grid[0] - 1e-3).abs() < 1e-15);
        assert!((grid[19] - 1e3).abs() < 1e-9);
        assert!(grid.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_small_alpha_recovers_linear_relation() {
        let x: Vec<[f64; 2]> = (0..30).map(|i| [i as f64, ((i * 7) % 5) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 1.5 + 2.0 * r[0] - 0.5 * r[1]).collect();

        let fit = fit_ridge(&x, &y, 1e-8).unwrap();
        assert!((fit.intercept - 1.5).abs() < 1e-4);
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-6);
        assert!((fit.coefficients[1] + 0.5).abs() < 1e-4);
        assert!((fit.predict(&[10.0, 2.0]) - 20.5).abs() < 1e-4);
    }

    #[test]
    fn test_large_alpha_shrinks_towards_mean() {
        let x: Vec<[f64; 1]> = (0..20).map(|i| [i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let fit = fit_ridge(&x, &y, 1e9).unwrap();
        assert!(fit.coefficients[0].abs() < 1e-3);
        assert!((fit.intercept - 9.5).abs() < 1e-2);
    }

    #[test]
    fn test_cv_prefers_small_alpha_for_noiseless_data() {
        let x: Vec<[f64; 1]> = (0..25).map(|i| [i as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] + 1.0).collect();
        let (fit, mse) = RidgeCv::default().fit(&x, &y).unwrap();
        assert!((fit.alpha - 1e-3).abs() < 1e-12);
        assert!(mse < 1e-6);
    }

    #[test]
    fn test_constant_column_is_harmless() {
        let x: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..10).map(|i| 2.0 * i as f64).collect();
        let fit = fit_ridge(&x, &y, 1e-3).unwrap();
        assert_eq!(fit.coefficients[1], 0.0);
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let x: Vec<[f64; 1]> = vec![[1.0], [2.0]];
        assert!(fit_ridge(&x, &[1.0], 1.0).is_err());
        let empty: Vec<[f64; 1]> = Vec::new();
        assert!(RidgeCv::default().fit(&empty, &[]).is_err());
    }
}
