//! Covariance-based error estimation
//!
//! Second-derivative pass run after the point estimate: finite-difference
//! Hessian from gradients, inverted with a damped Cholesky solve (LU as a
//! last resort). Falls back to diagonal-only uncertainties when the Hessian
//! cannot be inverted to a positive covariance.

use crate::optimizer::ObjectiveFunction;
use nalgebra::DMatrix;
use pf_core::Result;

/// Outcome of the covariance pass.
pub struct CovarianceResult {
    /// Per-parameter symmetric errors, in objective slot order.
    pub errors: Vec<f64>,
    /// Full covariance matrix; `None` when inversion failed and the errors
    /// are diagonal-only estimates.
    pub covariance: Option<DMatrix<f64>>,
    /// Stage status: 0 on a positive-definite covariance, 1 otherwise.
    pub status: i32,
}

/// Estimate parameter errors from the curvature at `best`.
pub fn covariance_pass(
    objective: &dyn ObjectiveFunction,
    best: &[f64],
) -> Result<CovarianceResult> {
    let n = best.len();
    if n == 0 {
        return Ok(CovarianceResult { errors: Vec::new(), covariance: None, status: 0 });
    }

    let hessian = compute_hessian(objective, best)?;
    let diag_errors = diagonal_uncertainties(&hessian, n);

    match invert_hessian(&hessian, n) {
        Some(covariance) => {
            let mut errors = Vec::with_capacity(n);
            let mut all_ok = true;
            for i in 0..n {
                let var = covariance[(i, i)];
                if var.is_finite() && var > 0.0 {
                    errors.push(var.sqrt());
                } else {
                    all_ok = false;
                    errors.push(diag_errors[i]);
                }
            }
            if all_ok {
                Ok(CovarianceResult { errors, covariance: Some(covariance), status: 0 })
            } else {
                log::warn!("Invalid covariance diagonal; using diagonal approximation");
                Ok(CovarianceResult { errors, covariance: None, status: 1 })
            }
        }
        None => {
            log::warn!("Hessian inversion failed, using diagonal approximation");
            Ok(CovarianceResult { errors: diag_errors, covariance: None, status: 1 })
        }
    }
}

/// Forward-difference Hessian from gradients, symmetrised.
fn compute_hessian(objective: &dyn ObjectiveFunction, best: &[f64]) -> Result<DMatrix<f64>> {
    let n = best.len();
    let grad_center = objective.gradient(best)?;

    let mut hessian = DMatrix::zeros(n, n);
    for j in 0..n {
        let eps = 1e-4 * best[j].abs().max(1.0);

        let mut params_plus = best.to_vec();
        params_plus[j] += eps;
        let grad_plus = objective.gradient(&params_plus)?;

        for i in 0..n {
            hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
        }
    }

    let ht = hessian.transpose();
    Ok((&hessian + &ht) * 0.5)
}

/// Invert the Hessian to a covariance matrix.
///
/// Even at a valid minimum the numerically estimated Hessian can be slightly
/// indefinite; a geometrically increased diagonal damping keeps the Cholesky
/// solve from producing negative variances.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == max_attempts {
            break;
        }
        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

/// Uncertainties from the Hessian diagonal (fallback).
fn diagonal_uncertainties(hessian: &DMatrix<f64>, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let hess_ii = hessian[(i, i)];
            1.0 / hess_ii.abs().max(1e-12).sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 1)^2 / (2 * 0.25) + (y + 2)^2 / (2 * 4)
    // Gaussian curvature with sigma_x = 0.5, sigma_y = 2.
    struct TwoGaussians;

    impl ObjectiveFunction for TwoGaussians {
        fn eval(&self, p: &[f64]) -> pf_core::Result<f64> {
            Ok((p[0] - 1.0).powi(2) / 0.5 + (p[1] + 2.0).powi(2) / 8.0)
        }
    }

    #[test]
    fn test_covariance_recovers_gaussian_widths() {
        let result = covariance_pass(&TwoGaussians, &[1.0, -2.0]).unwrap();
        assert_eq!(result.status, 0);
        assert_relative_eq!(result.errors[0], 0.5, epsilon = 1e-3);
        assert_relative_eq!(result.errors[1], 2.0, epsilon = 1e-3);
        assert!(result.covariance.is_some());
    }

    #[test]
    fn test_zero_dimensions_is_trivially_ok() {
        struct Nothing;
        impl ObjectiveFunction for Nothing {
            fn eval(&self, _p: &[f64]) -> pf_core::Result<f64> {
                Ok(0.0)
            }
        }
        let result = covariance_pass(&Nothing, &[]).unwrap();
        assert_eq!(result.status, 0);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_flat_direction_falls_back_to_diagonal() {
        // f depends on x only; the y-y curvature is zero.
        struct Flat;
        impl ObjectiveFunction for Flat {
            fn eval(&self, p: &[f64]) -> pf_core::Result<f64> {
                Ok(p[0] * p[0])
            }
        }
        let result = covariance_pass(&Flat, &[0.0, 0.0]).unwrap();
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.is_finite()));
    }
}
