//! Block preconditioners.
//!
//! Every rank preconditions only the diagonal block of its owned rows, so applying a
//! preconditioner never communicates.

use crate::amg::{AmgConfig, AmgPreconditioner};
use crate::error::LinalgError;
use crate::matrix::DistMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Approximate inverse `z = P r` acting on the owned entries of a distributed vector.
pub trait Preconditioner: Send + Sync {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError>;
}

impl<'a, P: Preconditioner + ?Sized> Preconditioner for &'a P {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError> {
        (**self).apply(r, z)
    }
}

impl<P: Preconditioner + ?Sized> Preconditioner for Box<P> {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError> {
        (**self).apply(r, z)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError> {
        z.copy_from_slice(r);
        Ok(())
    }
}

/// Diagonal scaling `z_i = r_i / a_ii`.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    /// Requires a strictly positive diagonal.
    pub fn from_diagonal(diagonal: &[f64]) -> Result<Self, LinalgError> {
        let inv_diag = diagonal
            .iter()
            .enumerate()
            .map(|(row, &d)| {
                if d > 0.0 {
                    Ok(1.0 / d)
                } else {
                    Err(LinalgError::NonPositiveDiagonal { row })
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { inv_diag })
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), LinalgError> {
        if r.len() != self.inv_diag.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: self.inv_diag.len(),
                actual: r.len(),
            });
        }
        for ((z, r), d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *z = d * r;
        }
        Ok(())
    }
}

/// Selects the preconditioner used by the Krylov solver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcType {
    None,
    Jacobi,
    /// Smoothed aggregation algebraic multigrid.
    #[default]
    Amg,
}

impl FromStr for PcType {
    type Err = LinalgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "jacobi" => Ok(Self::Jacobi),
            "amg" | "gamg" => Ok(Self::Amg),
            _ => Err(LinalgError::UnknownPcType(s.to_string())),
        }
    }
}

impl fmt::Display for PcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Jacobi => "jacobi",
            Self::Amg => "amg",
        };
        write!(f, "{name}")
    }
}

/// Builds the preconditioner for the diagonal block of an assembled matrix.
pub fn build_preconditioner(
    pc_type: PcType,
    amg_config: &AmgConfig,
    matrix: &DistMatrix,
) -> Result<Box<dyn Preconditioner>, LinalgError> {
    Ok(match pc_type {
        PcType::None => Box::new(IdentityPreconditioner),
        PcType::Jacobi => Box::new(JacobiPreconditioner::from_diagonal(&matrix.diagonal()?)?),
        PcType::Amg => Box::new(AmgPreconditioner::new(matrix.diag_block()?, amg_config)?),
    })
}
