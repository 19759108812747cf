//! Error type of the HDG diffusion solver.

use crate::phase::Phase;
use hdg_linalg::{CommError, ConvergedReason, LinalgError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HdgError {
    #[error(transparent)]
    Linalg(#[from] LinalgError),
    #[error(transparent)]
    Comm(#[from] CommError),
    /// The per-rank DOF counts do not partition the global DOF set.
    #[error("inconsistent DOF count: {0}")]
    InconsistentDofCount(String),
    /// A stage was invoked out of order.
    #[error("`{operation}` cannot be called in phase {current:?} (allowed: {allowed:?})")]
    PhaseViolation {
        operation: &'static str,
        current: Phase,
        allowed: Vec<Phase>,
    },
    #[error("refinement level {requested} does not exceed the current level {current}")]
    RefinementNotIncreasing { current: usize, requested: usize },
    #[error("Krylov solver did not converge: {reason} (code {code}) after {iterations} iterations", code = .reason.code())]
    NotConverged { reason: ConvergedReason, iterations: usize },
    #[error("unknown face basis `{0}`, expected `legendre` or `lagrange`")]
    UnknownFaceBasis(String),
    #[error("unknown problem `{0}`, expected `linear` or `sine`")]
    UnknownProblem(String),
    #[error("local HDG system of element {element} is singular")]
    SingularElement { element: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("VTK export failed: {0}")]
    Vtk(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl HdgError {
    /// Whether the error may have occurred on a subset of ranks only.
    ///
    /// Such errors leave peers blocked in collectives, so the rank group must be aborted.
    /// The remaining errors are detected identically on every rank.
    pub fn requires_abort(&self) -> bool {
        !matches!(
            self,
            Self::PhaseViolation { .. }
                | Self::RefinementNotIncreasing { .. }
                | Self::NotConverged { .. }
                | Self::InvalidConfig(_)
                | Self::UnknownFaceBasis(_)
                | Self::UnknownProblem(_)
        )
    }
}
