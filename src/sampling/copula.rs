//! Gaussian copula for correlated frequency draws
//!
//! Correlated normals `x = L z` (L the Cholesky factor of the correlation
//! matrix) are mapped to uniforms through the standard normal CDF.

use rand::Rng;
use rand_distr::StandardNormal;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{RiskEngineError, RiskResult};
use crate::model::{CopulaSpec, CopulaStructure};

const SYMMETRY_TOL: f64 = 1e-9;
const PIVOT_TOL: f64 = 1e-10;
const UNIFORM_CLAMP: f64 = 1e-15;

/// `rho^|i-j|` correlation matrix
pub fn toeplitz_matrix(dim: usize, rho: f64) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|i| {
            (0..dim)
                .map(|j| rho.powi((i as i32 - j as i32).abs()))
                .collect()
        })
        .collect()
}

/// Lower-triangular Cholesky factor of a positive semi-definite matrix
///
/// Zero pivots are allowed (perfectly correlated dimensions) as long as the
/// rest of the column is consistent with them.
pub fn cholesky(matrix: &[Vec<f64>], field: &str) -> RiskResult<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];

    for j in 0..n {
        let diag = matrix[j][j] - (0..j).map(|k| lower[j][k] * lower[j][k]).sum::<f64>();
        if diag < -PIVOT_TOL {
            return Err(RiskEngineError::config(
                field,
                "correlation matrix is not positive semi-definite",
            ));
        }

        if diag <= PIVOT_TOL {
            for i in (j + 1)..n {
                let off = matrix[i][j] - (0..j).map(|k| lower[i][k] * lower[j][k]).sum::<f64>();
                if off.abs() > 1e-8 {
                    return Err(RiskEngineError::config(
                        field,
                        "correlation matrix is not positive semi-definite",
                    ));
                }
            }
            continue;
        }

        let pivot = diag.sqrt();
        lower[j][j] = pivot;
        for i in (j + 1)..n {
            let off = matrix[i][j] - (0..j).map(|k| lower[i][k] * lower[j][k]).sum::<f64>();
            lower[i][j] = off / pivot;
        }
    }

    Ok(lower)
}

/// Gaussian copula with a validated correlation structure
#[derive(Debug, Clone)]
pub struct GaussianCopula {
    lower: Vec<Vec<f64>>,
    normal: Normal,
}

impl GaussianCopula {
    /// Validate `matrix` and factor it
    ///
    /// The matrix must be square with dimension at least 2, unit diagonal,
    /// symmetric, with entries in [-1, 1], and positive semi-definite.
    pub fn new(matrix: &[Vec<f64>], field: &str) -> RiskResult<Self> {
        let n = matrix.len();
        if n < 2 {
            return Err(RiskEngineError::config(field, "copula needs at least two targets"));
        }
        for (i, row) in matrix.iter().enumerate() {
            if row.len() != n {
                return Err(RiskEngineError::config(
                    field,
                    format!("row {} has {} entries, expected {}", i, row.len(), n),
                ));
            }
            for (j, value) in row.iter().enumerate() {
                if !value.is_finite() || value.abs() > 1.0 {
                    return Err(RiskEngineError::config(
                        field,
                        format!("entry [{}][{}] = {} is outside [-1, 1]", i, j, value),
                    ));
                }
                if (value - matrix[j][i]).abs() > SYMMETRY_TOL {
                    return Err(RiskEngineError::config(field, "correlation matrix is not symmetric"));
                }
            }
            if (row[i] - 1.0).abs() > SYMMETRY_TOL {
                return Err(RiskEngineError::config(
                    field,
                    format!("diagonal entry [{}][{}] must be 1", i, i),
                ));
            }
        }

        let lower = cholesky(matrix, field)?;
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| RiskEngineError::Domain(format!("standard normal: {}", e)))?;
        Ok(Self { lower, normal })
    }

    pub fn toeplitz(dim: usize, rho: f64, field: &str) -> RiskResult<Self> {
        if !rho.is_finite() || !(-1.0..=1.0).contains(&rho) {
            return Err(RiskEngineError::config(field, format!("rho {} is outside [-1, 1]", rho)));
        }
        Self::new(&toeplitz_matrix(dim, rho), field)
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Fill `out` with one vector of correlated uniforms in (0, 1)
    pub fn sample_uniforms<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f64]) {
        let n = self.dim();
        let z: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
        for (i, slot) in out.iter_mut().enumerate().take(n) {
            let x: f64 = self.lower[i][..=i].iter().zip(&z).map(|(l, z)| l * z).sum();
            *slot = self.normal.cdf(x).clamp(UNIFORM_CLAMP, 1.0 - UNIFORM_CLAMP);
        }
    }
}

/// Build the copula a spec describes: an explicit matrix sized to the
/// targets, or a toeplitz structure with `rho`
///
/// `field` prefixes error paths (e.g. `dependency.copula`).
pub fn build_copula(spec: &CopulaSpec, field: &str) -> RiskResult<GaussianCopula> {
    match (&spec.matrix, spec.structure) {
        (Some(_), Some(_)) => Err(RiskEngineError::config(
            format!("{}.matrix", field),
            "give either a matrix or a structure, not both",
        )),
        (Some(matrix), None) => {
            if matrix.len() != spec.targets.len() {
                return Err(RiskEngineError::config(
                    format!("{}.matrix", field),
                    format!("dimension {} does not match {} targets", matrix.len(), spec.targets.len()),
                ));
            }
            GaussianCopula::new(matrix, &format!("{}.matrix", field))
        }
        (None, Some(CopulaStructure::Toeplitz)) => {
            let rho = spec
                .rho
                .ok_or_else(|| RiskEngineError::config(format!("{}.rho", field), "required for toeplitz structure"))?;
            GaussianCopula::toeplitz(spec.targets.len(), rho, &format!("{}.rho", field))
        }
        (None, None) => Err(RiskEngineError::config(
            field,
            "a matrix or a toeplitz structure with rho is required",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_toeplitz_structure() {
        let m = toeplitz_matrix(3, 0.5);
        assert_eq!(m[0], vec![1.0, 0.5, 0.25]);
        assert_eq!(m[2][0], 0.25);
    }

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let m = toeplitz_matrix(4, 0.6);
        let l = cholesky(&m, "c").unwrap();
        for i in 0..4 {
            for j in 0..4 {
                let v: f64 = (0..4).map(|k| l[i][k] * l[j][k]).sum();
                assert!((v - m[i][j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_perfect_correlation_allowed() {
        let copula = GaussianCopula::toeplitz(2, 1.0, "c").unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let mut u = [0.0; 2];
        for _ in 0..100 {
            copula.sample_uniforms(&mut rng, &mut u);
            assert!((u[0] - u[1]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_matrices_rejected() {
        let asymmetric = vec![vec![1.0, 0.3], vec![0.2, 1.0]];
        assert!(GaussianCopula::new(&asymmetric, "c").is_err());

        let bad_diag = vec![vec![0.9, 0.0], vec![0.0, 1.0]];
        assert!(GaussianCopula::new(&bad_diag, "c").is_err());

        let not_psd = vec![
            vec![1.0, 0.9, -0.9],
            vec![0.9, 1.0, 0.9],
            vec![-0.9, 0.9, 1.0],
        ];
        let err = GaussianCopula::new(&not_psd, "dependency.copula.matrix").unwrap_err();
        assert!(err.is_configuration());

        assert!(GaussianCopula::new(&[vec![1.0]], "c").is_err());
        assert!(GaussianCopula::toeplitz(3, 1.5, "c").is_err());
    }

    #[test]
    fn test_uniform_marginals_and_correlation() {
        let copula = GaussianCopula::toeplitz(2, 0.8, "c").unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let n = 20_000;
        let mut u = [0.0; 2];
        let mut sum = [0.0; 2];
        let mut concordant = 0usize;
        for _ in 0..n {
            copula.sample_uniforms(&mut rng, &mut u);
            sum[0] += u[0];
            sum[1] += u[1];
            if (u[0] > 0.5) == (u[1] > 0.5) {
                concordant += 1;
            }
        }
        assert!((sum[0] / n as f64 - 0.5).abs() < 0.01);
        assert!((sum[1] / n as f64 - 0.5).abs() < 0.01);
        // P(same side of median) = 1/2 + asin(rho)/pi ~ 0.795 for rho = 0.8
        let share = concordant as f64 / n as f64;
        assert!((share - 0.795).abs() < 0.015, "share {}", share);
    }
}
