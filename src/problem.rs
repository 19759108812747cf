//! Manufactured diffusion problems with known solutions.

use crate::error::HdgError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// An exact solution `u` of `-div(grad u) = source` on the unit square.
///
/// The boundary data of the problem is the restriction of `u` to the boundary.
pub trait ExactSolution: Send + Sync {
    fn u(&self, x: [f64; 2]) -> f64;

    fn grad_u(&self, x: [f64; 2]) -> [f64; 2];

    /// `-laplace(u)`.
    fn source(&self, x: [f64; 2]) -> f64;
}

/// `u = x + y`, which lies in every discrete space of degree at least one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSolution;

impl ExactSolution for LinearSolution {
    fn u(&self, [x, y]: [f64; 2]) -> f64 {
        x + y
    }

    fn grad_u(&self, _: [f64; 2]) -> [f64; 2] {
        [1.0, 1.0]
    }

    fn source(&self, _: [f64; 2]) -> f64 {
        0.0
    }
}

/// `u = sin(pi x) sin(pi y)`, vanishing on the boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SineSolution;

impl ExactSolution for SineSolution {
    fn u(&self, [x, y]: [f64; 2]) -> f64 {
        (PI * x).sin() * (PI * y).sin()
    }

    fn grad_u(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        [
            PI * (PI * x).cos() * (PI * y).sin(),
            PI * (PI * x).sin() * (PI * y).cos(),
        ]
    }

    fn source(&self, x: [f64; 2]) -> f64 {
        2.0 * PI * PI * self.u(x)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    Linear,
    #[default]
    Sine,
}

impl ProblemKind {
    pub fn exact_solution(self) -> Arc<dyn ExactSolution> {
        match self {
            Self::Linear => Arc::new(LinearSolution),
            Self::Sine => Arc::new(SineSolution),
        }
    }
}

impl FromStr for ProblemKind {
    type Err = HdgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "sine" => Ok(Self::Sine),
            _ => Err(HdgError::UnknownProblem(s.to_string())),
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Sine => write!(f, "sine"),
        }
    }
}
