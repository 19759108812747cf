//! Smoothed aggregation algebraic multigrid.
//!
//! The hierarchy is built from a serial CSR matrix (the diagonal block of the owned rows):
//!
//! 1. Strong couplings: `|a_ij| >= theta * sqrt(|a_ii a_jj|)`.
//! 2. Greedy aggregation of strongly coupled neighbourhoods.
//! 3. Piecewise constant tentative prolongator, smoothed by damped Jacobi
//!    `P = (I - omega D^{-1} A) P_0` with `omega = 4 / (3 rho)`.
//! 4. Galerkin coarse operator `A_c = P^T A P`.
//!
//! The preconditioner applies one symmetric V-cycle with damped Jacobi smoothing and a dense
//! Cholesky solve on the coarsest level. A coarsest level larger than
//! [`AmgConfig::max_direct_size`], which remains when aggregation stalls or the level limit
//! is reached, is only smoothed.

use crate::error::LinalgError;
use crate::matrix::csr_mul_add;
use crate::pc::Preconditioner;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

/// Configuration of the multigrid hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgConfig {
    /// Couplings weaker than this (relative to the diagonal) are ignored when aggregating.
    pub strong_threshold: f64,
    /// Maximum number of levels, including the coarsest.
    pub max_levels: usize,
    /// Levels with at most this many unknowns are not coarsened further.
    pub coarse_size: usize,
    /// Largest coarsest level that is factorized densely.
    pub max_direct_size: usize,
    /// Jacobi steps on a coarsest level too large to factorize.
    pub num_coarse_smooth: usize,
    /// Number of damped Jacobi steps applied to the tentative prolongator (0 gives plain
    /// aggregation).
    pub num_prolongator_smooths: usize,
    pub num_pre_smooth: usize,
    pub num_post_smooth: usize,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            strong_threshold: 0.08,
            max_levels: 10,
            coarse_size: 50,
            max_direct_size: 2000,
            num_coarse_smooth: 4,
            num_prolongator_smooths: 1,
            num_pre_smooth: 1,
            num_post_smooth: 1,
        }
    }
}

#[derive(Debug, Clone)]
struct Level {
    a: CsrMatrix<f64>,
    inv_diag: Vec<f64>,
    // Damping of the Jacobi smoother
    omega: f64,
    p: CsrMatrix<f64>,
    r: CsrMatrix<f64>,
}

#[derive(Debug, Clone)]
enum CoarseSolver {
    Empty,
    Direct(Cholesky<f64, Dyn>),
    Smoothed {
        a: CsrMatrix<f64>,
        inv_diag: Vec<f64>,
        omega: f64,
        steps: usize,
    },
}

#[derive(Debug, Clone)]
pub struct AmgPreconditioner {
    levels: Vec<Level>,
    coarse: CoarseSolver,
    pre_smooth: usize,
    post_smooth: usize,
}

fn inverse_diagonal(a: &CsrMatrix<f64>) -> Result<Vec<f64>, LinalgError> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            let d = row.get_entry(i).map(|entry| entry.into_value()).unwrap_or(0.0);
            if d > 0.0 {
                Ok(1.0 / d)
            } else {
                Err(LinalgError::NonPositiveDiagonal { row: i })
            }
        })
        .collect()
}

/// Gershgorin bound for the spectral radius of `D^{-1} A`.
fn spectral_radius_bound(a: &CsrMatrix<f64>, inv_diag: &[f64]) -> f64 {
    a.row_iter()
        .zip(inv_diag)
        .map(|(row, d)| d * row.values().iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Assigns every node to an aggregate and returns the aggregate indices and their count.
fn aggregate(a: &CsrMatrix<f64>, theta: f64) -> (Vec<usize>, usize) {
    let n = a.nrows();
    let diag: Vec<f64> = (0..n)
        .map(|i| {
            a.row(i)
                .get_entry(i)
                .map(|entry| entry.into_value())
                .unwrap_or(0.0)
                .abs()
        })
        .collect();
    let strong_neighbors = |i: usize| {
        let row = a.row(i);
        row.col_indices()
            .iter()
            .zip(row.values())
            .filter(|&(&j, v)| j != i && v.abs() >= theta * (diag[i] * diag[j]).sqrt())
            .map(|(&j, v)| (j, v.abs()))
            .collect::<Vec<_>>()
    };

    let mut aggregate_of: Vec<Option<usize>> = vec![None; n];
    let mut num_aggregates = 0;

    // Seed aggregates from nodes whose strong neighbourhood is still free
    for i in 0..n {
        if aggregate_of[i].is_some() {
            continue;
        }
        let neighbors = strong_neighbors(i);
        if neighbors.is_empty() || neighbors.iter().any(|&(j, _)| aggregate_of[j].is_some()) {
            continue;
        }
        aggregate_of[i] = Some(num_aggregates);
        for (j, _) in neighbors {
            aggregate_of[j] = Some(num_aggregates);
        }
        num_aggregates += 1;
    }

    // Attach remaining nodes to the most strongly coupled seeded aggregate
    let seeded = aggregate_of.clone();
    for i in 0..n {
        if aggregate_of[i].is_some() {
            continue;
        }
        aggregate_of[i] = strong_neighbors(i)
            .into_iter()
            .filter_map(|(j, strength)| seeded[j].map(|agg| (agg, strength)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(agg, _)| agg);
    }

    // Whatever is left becomes a singleton
    let aggregates = aggregate_of
        .into_iter()
        .map(|agg| {
            agg.unwrap_or_else(|| {
                num_aggregates += 1;
                num_aggregates - 1
            })
        })
        .collect();
    (aggregates, num_aggregates)
}

fn tentative_prolongator(aggregates: &[usize], num_aggregates: usize) -> CsrMatrix<f64> {
    let mut sizes = vec![0usize; num_aggregates];
    for &agg in aggregates {
        sizes[agg] += 1;
    }
    let mut coo = CooMatrix::new(aggregates.len(), num_aggregates);
    for (i, &agg) in aggregates.iter().enumerate() {
        // Orthonormal columns
        coo.push(i, agg, 1.0 / (sizes[agg] as f64).sqrt());
    }
    CsrMatrix::from(&coo)
}

/// `I - omega D^{-1} A`
fn jacobi_operator(a: &CsrMatrix<f64>, inv_diag: &[f64], omega: f64) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(a.nrows(), a.ncols());
    for (i, row) in a.row_iter().enumerate() {
        coo.push(i, i, 1.0);
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            coo.push(i, j, -omega * inv_diag[i] * v);
        }
    }
    CsrMatrix::from(&coo)
}

impl AmgPreconditioner {
    pub fn new(matrix: &CsrMatrix<f64>, config: &AmgConfig) -> Result<Self, LinalgError> {
        let mut levels = Vec::new();
        let mut a = matrix.clone();

        while a.nrows() > config.coarse_size && levels.len() + 1 < config.max_levels {
            let inv_diag = inverse_diagonal(&a)?;
            let rho = spectral_radius_bound(&a, &inv_diag);
            let (aggregates, num_aggregates) = aggregate(&a, config.strong_threshold);
            if num_aggregates == 0 || num_aggregates >= a.nrows() {
                break;
            }

            let mut p = tentative_prolongator(&aggregates, num_aggregates);
            if config.num_prolongator_smooths > 0 {
                let smoother = jacobi_operator(&a, &inv_diag, 4.0 / (3.0 * rho));
                for _ in 0..config.num_prolongator_smooths {
                    p = &smoother * &p;
                }
            }
            let r = p.transpose();
            let coarse = &(&r * &a) * &p;

            log::debug!(
                "AMG level {}: {} unknowns, {} aggregates",
                levels.len(),
                a.nrows(),
                num_aggregates
            );
            levels.push(Level {
                a,
                inv_diag,
                omega: 1.0 / rho,
                p,
                r,
            });
            a = coarse;
        }

        let coarse = if a.nrows() == 0 {
            CoarseSolver::Empty
        } else if a.nrows() <= config.max_direct_size {
            let dense = DMatrix::from(&a);
            CoarseSolver::Direct(dense.cholesky().ok_or(LinalgError::CoarseSolveFailed)?)
        } else {
            log::warn!(
                "AMG coarsest level has {} unknowns (direct solve limit {}); smoothing it with Jacobi",
                a.nrows(),
                config.max_direct_size
            );
            let inv_diag = inverse_diagonal(&a)?;
            let rho = spectral_radius_bound(&a, &inv_diag);
            CoarseSolver::Smoothed {
                a,
                inv_diag,
                omega: 1.0 / rho,
                steps: config.num_coarse_smooth,
            }
        };

        Ok(Self {
            levels,
            coarse,
            pre_smooth: config.num_pre_smooth,
            post_smooth: config.num_post_smooth,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Whether the coarsest level is solved with a dense factorization.
    pub fn has_direct_coarse_solve(&self) -> bool {
        matches!(self.coarse, CoarseSolver::Direct(_))
    }

    fn smooth(a: &CsrMatrix<f64>, inv_diag: &[f64], omega: f64, b: &[f64], x: &mut [f64], steps: usize) {
        let mut ax = vec![0.0; b.len()];
        for _ in 0..steps {
            ax.fill(0.0);
            csr_mul_add(a, x, &mut ax);
            for i in 0..x.len() {
                x[i] += omega * inv_diag[i] * (b[i] - ax[i]);
            }
        }
    }

    fn coarse_solve(&self, b: &[f64], x: &mut [f64]) {
        match &self.coarse {
            CoarseSolver::Empty => {}
            CoarseSolver::Direct(cholesky) => {
                let solution = cholesky.solve(&DVector::from_column_slice(b));
                x.copy_from_slice(solution.as_slice());
            }
            CoarseSolver::Smoothed {
                a,
                inv_diag,
                omega,
                steps,
            } => {
                x.fill(0.0);
                Self::smooth(a, inv_diag, *omega, b, x, *steps);
            }
        }
    }

    fn v_cycle(&self, depth: usize, b: &[f64], x: &mut [f64]) {
        let Some(level) = self.levels.get(depth) else {
            self.coarse_solve(b, x);
            return;
        };

        x.fill(0.0);
        Self::smooth(&level.a, &level.inv_diag, level.omega, b, x, self.pre_smooth);

        let mut residual = b.to_vec();
        let mut ax = vec![0.0; b.len()];
        csr_mul_add(&level.a, x, &mut ax);
        residual.iter_mut().zip(&ax).for_each(|(r, ax)| *r -= ax);

        let mut coarse_rhs = vec![0.0; level.r.nrows()];
        csr_mul_add(&level.r, &residual, &mut coarse_rhs);
        let mut coarse_x = vec![0.0; coarse_rhs.len()];
        self.v_cycle(depth + 1, &coarse_rhs, &mut coarse_x);
        csr_mul_add(&level.p, &coarse_x, x);

        Self::smooth(&level.a, &level.inv_diag, level.omega, b, x, self.post_smooth);
    }
}

impl Preconditioner for AmgPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError> {
        if r.len() != z.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: r.len(),
                actual: z.len(),
            });
        }
        self.v_cycle(0, r, z);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{aggregate, AmgConfig, AmgPreconditioner};
    use crate::pc::Preconditioner;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    fn laplacian_2d(n: usize) -> CsrMatrix<f64> {
        let index = |i: usize, j: usize| j * n + i;
        let mut coo = CooMatrix::new(n * n, n * n);
        for j in 0..n {
            for i in 0..n {
                coo.push(index(i, j), index(i, j), 4.0);
                if i > 0 {
                    coo.push(index(i, j), index(i - 1, j), -1.0);
                }
                if i + 1 < n {
                    coo.push(index(i, j), index(i + 1, j), -1.0);
                }
                if j > 0 {
                    coo.push(index(i, j), index(i, j - 1), -1.0);
                }
                if j + 1 < n {
                    coo.push(index(i, j), index(i, j + 1), -1.0);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn aggregation_covers_all_nodes() {
        let a = laplacian_2d(8);
        let (aggregates, count) = aggregate(&a, 0.08);
        assert_eq!(aggregates.len(), 64);
        assert!(count > 0 && count < 64);
        assert!(aggregates.iter().all(|&agg| agg < count));
    }

    #[test]
    fn builds_hierarchy_and_reduces_error() {
        let a = laplacian_2d(16);
        let config = AmgConfig {
            coarse_size: 10,
            ..AmgConfig::default()
        };
        let amg = AmgPreconditioner::new(&a, &config).unwrap();
        assert!(amg.num_levels() > 1);

        let x: Vec<f64> = (0..256).map(|i| ((i * 7) % 13) as f64 - 6.0).collect();
        let mut b = vec![0.0; 256];
        crate::matrix::csr_mul_add(&a, &x, &mut b);
        let mut z = vec![0.0; 256];
        amg.apply(&b, &mut z).unwrap();

        // Compare in the energy norm, in which the V-cycle is a contraction
        let energy = |v: &[f64]| {
            let mut av = vec![0.0; v.len()];
            crate::matrix::csr_mul_add(&a, v, &mut av);
            v.iter().zip(&av).map(|(v, av)| v * av).sum::<f64>()
        };
        let error: Vec<f64> = x.iter().zip(&z).map(|(x, z)| x - z).collect();
        assert!(energy(&error) < energy(&x));
    }

    #[test]
    fn stalled_aggregation_does_not_factorize_large_levels() {
        let a = laplacian_2d(8);
        // No coupling is strong, so every node is a singleton and coarsening stops
        let config = AmgConfig {
            strong_threshold: 10.0,
            coarse_size: 10,
            max_direct_size: 20,
            ..AmgConfig::default()
        };
        let amg = AmgPreconditioner::new(&a, &config).unwrap();
        assert_eq!(amg.num_levels(), 1);
        assert!(!amg.has_direct_coarse_solve());

        let b = vec![1.0; 64];
        let mut z = vec![0.0; 64];
        amg.apply(&b, &mut z).unwrap();
        assert!(z.iter().all(|z| z.is_finite() && *z > 0.0));
    }

    #[test]
    fn small_matrix_is_solved_directly() {
        let a = laplacian_2d(3);
        let amg = AmgPreconditioner::new(&a, &AmgConfig::default()).unwrap();
        assert_eq!(amg.num_levels(), 1);
        assert!(amg.has_direct_coarse_solve());
        let x = vec![1.0; 9];
        let mut b = vec![0.0; 9];
        crate::matrix::csr_mul_add(&a, &x, &mut b);
        let mut z = vec![0.0; 9];
        amg.apply(&b, &mut z).unwrap();
        for z in z {
            assert!((z - 1.0).abs() < 1e-12);
        }
    }
}
