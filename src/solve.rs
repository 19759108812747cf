//! The distributed global trace system and its Krylov solve.

use crate::dofs::DofSet;
use crate::error::HdgError;
use hdg_linalg::{
    build_preconditioner, Communicator, ConvergedReason, DistMatrix, DistVector, KrylovSolver, KspConfig, KspOutput,
    ResidualCriterion,
};
use serde::{Deserialize, Serialize};

/// Matrix and vectors of one solve, all partitioned by the DOF layout.
#[derive(Debug)]
pub struct GlobalSystem {
    pub matrix: DistMatrix,
    pub rhs: DistVector,
    pub solution: DistVector,
    /// Projection of the exact trace, used for error reporting only.
    pub exact_solution: DistVector,
}

/// Outcome of a solve together with the norms reported for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub output: KspOutput,
    pub rhs_norm: f64,
    pub solution_norm: f64,
    /// `||exact_solution - solution||_2`
    pub error_norm: f64,
}

impl SolveReport {
    pub fn reason(&self) -> ConvergedReason {
        self.output.reason
    }
}

impl GlobalSystem {
    /// Allocates the system with the preallocation of the DOF set. The matrix is marked
    /// symmetric positive definite.
    pub fn create(dofs: &DofSet) -> Result<Self, HdgError> {
        let layout = dofs.layout().clone();
        let mut matrix = DistMatrix::new(layout.clone(), dofs.preallocation().clone())?;
        matrix.set_spd(true);
        Ok(Self {
            matrix,
            rhs: DistVector::new(layout.clone()),
            solution: DistVector::new(layout.clone()),
            exact_solution: DistVector::new(layout),
        })
    }

    /// Exchanges stashed entries and freezes the matrix structure. Collective.
    pub fn finalize<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), HdgError> {
        self.matrix.assemble(comm)?;
        self.rhs.assemble(comm)?;
        self.exact_solution.assemble(comm)?;
        self.solution.assemble(comm)?;
        Ok(())
    }

    /// Solves for the trace unknowns, starting from zero. Collective.
    ///
    /// A solve that does not converge is reported, not returned as an error.
    pub fn solve<C: Communicator + ?Sized>(&mut self, comm: &C, config: &KspConfig) -> Result<SolveReport, HdgError> {
        let preconditioner = build_preconditioner(config.pc_type, &config.amg, &self.matrix)?;
        self.solution.fill(0.0);
        let output = KrylovSolver::new(config.ksp_type)
            .with_operator(&self.matrix)
            .with_preconditioner(preconditioner)
            .with_stopping_criterion(ResidualCriterion::from_config(config))
            .with_max_iter(config.max_iter)
            .solve_with_guess(comm, &self.rhs, &mut self.solution)?;

        let rhs_norm = self.rhs.norm2(comm)?;
        let solution_norm = self.solution.norm2(comm)?;
        let mut difference = self.exact_solution.clone();
        difference.axpy(-1.0, &self.solution)?;
        let error_norm = difference.norm2(comm)?;

        log::debug!(
            "{} with {} finished: {} after {} iterations",
            config.ksp_type,
            config.pc_type,
            output.reason,
            output.iterations
        );
        Ok(SolveReport {
            output,
            rhs_norm,
            solution_norm,
            error_norm,
        })
    }
}
