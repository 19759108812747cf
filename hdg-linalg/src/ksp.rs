//! Krylov subspace solvers for distributed linear systems.

use crate::amg::AmgConfig;
use crate::comm::Communicator;
use crate::error::LinalgError;
use crate::layout::Layout;
use crate::matrix::DistMatrix;
use crate::pc::{IdentityPreconditioner, PcType, Preconditioner};
use crate::vector::DistVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A distributed linear map `y = A x`.
pub trait LinearOperator {
    fn layout(&self) -> &Arc<Layout>;

    /// Collective.
    fn apply<C: Communicator + ?Sized>(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), LinalgError>;
}

impl<'a, A: LinearOperator> LinearOperator for &'a A {
    fn layout(&self) -> &Arc<Layout> {
        A::layout(self)
    }

    fn apply<C: Communicator + ?Sized>(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), LinalgError> {
        A::apply(self, comm, x, y)
    }
}

impl LinearOperator for DistMatrix {
    fn layout(&self) -> &Arc<Layout> {
        DistMatrix::layout(self)
    }

    fn apply<C: Communicator + ?Sized>(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), LinalgError> {
        self.mult(comm, x, y)
    }
}

/// Why an iterative solve stopped.
///
/// The integer codes follow the conventions of established distributed solver libraries:
/// positive codes denote convergence, negative codes divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergedReason {
    /// `||r|| <= rtol * ||b||`
    ConvergedRtol,
    /// `||r|| <= atol`, including the trivial case `b = 0`.
    ConvergedAtol,
    /// The iteration limit was reached.
    DivergedIts,
    /// `||r|| >= dtol * ||r_0||`
    DivergedDtol,
    DivergedBreakdown,
    DivergedIndefinitePc,
    DivergedNanOrInf,
    DivergedIndefiniteMat,
}

impl ConvergedReason {
    pub fn code(self) -> i32 {
        match self {
            Self::ConvergedRtol => 2,
            Self::ConvergedAtol => 3,
            Self::DivergedIts => -3,
            Self::DivergedDtol => -4,
            Self::DivergedBreakdown => -5,
            Self::DivergedIndefinitePc => -8,
            Self::DivergedNanOrInf => -9,
            Self::DivergedIndefiniteMat => -10,
        }
    }

    pub fn is_converged(self) -> bool {
        self.code() > 0
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConvergedRtol => "CONVERGED_RTOL",
            Self::ConvergedAtol => "CONVERGED_ATOL",
            Self::DivergedIts => "DIVERGED_ITS",
            Self::DivergedDtol => "DIVERGED_DTOL",
            Self::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            Self::DivergedIndefinitePc => "DIVERGED_INDEFINITE_PC",
            Self::DivergedNanOrInf => "DIVERGED_NANORINF",
            Self::DivergedIndefiniteMat => "DIVERGED_INDEFINITE_MAT",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KspType {
    /// Preconditioned conjugate gradients. Requires a symmetric positive definite operator
    /// and preconditioner.
    #[default]
    Cg,
    /// Preconditioned BiCGStab.
    Bicgstab,
}

impl FromStr for KspType {
    type Err = LinalgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cg" => Ok(Self::Cg),
            "bicgstab" | "bcgs" => Ok(Self::Bicgstab),
            _ => Err(LinalgError::UnknownKspType(s.to_string())),
        }
    }
}

impl fmt::Display for KspType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cg => write!(f, "cg"),
            Self::Bicgstab => write!(f, "bicgstab"),
        }
    }
}

/// Solver and preconditioner selection together with stopping tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KspConfig {
    pub ksp_type: KspType,
    pub pc_type: PcType,
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
    pub max_iter: usize,
    pub amg: AmgConfig,
}

impl Default for KspConfig {
    fn default() -> Self {
        Self {
            ksp_type: KspType::Cg,
            pc_type: PcType::Amg,
            rtol: 1e-8,
            atol: 1e-50,
            dtol: 1e5,
            max_iter: 10000,
            amg: AmgConfig::default(),
        }
    }
}

pub trait StoppingCriterion {
    /// Decides whether to stop before performing iteration `iteration + 1`.
    ///
    /// All arguments are globally reduced quantities, so every rank reaches the same decision.
    fn check(&self, iteration: usize, residual_norm: f64, b_norm: f64, initial_residual_norm: f64) -> Option<ConvergedReason>;
}

/// Stops once `||r|| <= max(rtol * ||b||, atol)`, or when the residual diverges.
///
/// Note that we use the residual recurrence of the Krylov method rather than recomputing
/// `b - A x`. In exact arithmetic the two agree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualCriterion {
    pub rtol: f64,
    pub atol: f64,
    pub dtol: f64,
}

impl ResidualCriterion {
    pub fn new(rtol: f64) -> Self {
        Self { rtol, ..Self::default() }
    }

    pub fn from_config(config: &KspConfig) -> Self {
        Self {
            rtol: config.rtol,
            atol: config.atol,
            dtol: config.dtol,
        }
    }
}

impl Default for ResidualCriterion {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-50,
            dtol: 1e5,
        }
    }
}

impl StoppingCriterion for ResidualCriterion {
    fn check(&self, _iteration: usize, residual_norm: f64, b_norm: f64, initial_residual_norm: f64) -> Option<ConvergedReason> {
        if !residual_norm.is_finite() {
            Some(ConvergedReason::DivergedNanOrInf)
        } else if residual_norm <= self.rtol * b_norm {
            Some(ConvergedReason::ConvergedRtol)
        } else if residual_norm <= self.atol {
            Some(ConvergedReason::ConvergedAtol)
        } else if residual_norm >= self.dtol * initial_residual_norm {
            Some(ConvergedReason::DivergedDtol)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KspOutput {
    pub reason: ConvergedReason,
    /// Number of updates made to the (initial) solution vector.
    pub iterations: usize,
    /// Norm of the final (recursively updated) residual.
    pub residual_norm: f64,
}

/// Preconditioned Krylov solver.
///
/// ```ignore
/// let output = KrylovSolver::new(KspType::Cg)
///     .with_operator(&matrix)
///     .with_preconditioner(pc)
///     .with_stopping_criterion(ResidualCriterion::new(1e-8))
///     .with_max_iter(1000)
///     .solve_with_guess(&comm, &b, &mut x)?;
/// ```
#[derive(Debug)]
pub struct KrylovSolver<A, P, Criterion> {
    ksp_type: KspType,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: usize,
}

impl KrylovSolver<(), IdentityPreconditioner, ResidualCriterion> {
    pub fn new(ksp_type: KspType) -> Self {
        Self {
            ksp_type,
            operator: (),
            preconditioner: IdentityPreconditioner,
            stopping_criterion: ResidualCriterion::default(),
            max_iter: KspConfig::default().max_iter,
        }
    }
}

impl<P, Criterion> KrylovSolver<(), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> KrylovSolver<A, P, Criterion> {
        KrylovSolver {
            ksp_type: self.ksp_type,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<A, P, Criterion> KrylovSolver<A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> KrylovSolver<A, P2, Criterion> {
        KrylovSolver {
            ksp_type: self.ksp_type,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_stopping_criterion<Criterion2>(self, stopping_criterion: Criterion2) -> KrylovSolver<A, P, Criterion2> {
        KrylovSolver {
            ksp_type: self.ksp_type,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }
}

impl<A, P, Criterion> KrylovSolver<A, P, Criterion>
where
    A: LinearOperator,
    P: Preconditioner,
    Criterion: StoppingCriterion,
{
    /// Solves `A x = b`, starting from the current contents of `x`. Collective.
    ///
    /// Failing to converge is not an error: the reason is reported in the output. Errors are
    /// returned only if applying the operator, the preconditioner or a collective fails.
    pub fn solve_with_guess<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        b: &DistVector,
        x: &mut DistVector,
    ) -> Result<KspOutput, LinalgError> {
        if **b.layout() != **self.operator.layout() || **x.layout() != **self.operator.layout() {
            return Err(LinalgError::LayoutMismatch);
        }
        match self.ksp_type {
            KspType::Cg => self.solve_cg(comm, b, x),
            KspType::Bicgstab => self.solve_bicgstab(comm, b, x),
        }
    }

    fn precondition(&self, r: &DistVector, z: &mut DistVector) -> Result<(), LinalgError> {
        self.preconditioner
            .apply(r.local_values(), z.local_values_mut())
    }

    /// `r = b - A x`, returning `(||b||, ||r||)`.
    fn initial_residual<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        b: &DistVector,
        x: &DistVector,
        r: &mut DistVector,
    ) -> Result<(f64, f64), LinalgError> {
        self.operator.apply(comm, x, r)?;
        r.aypx(-1.0, b)?;
        Ok((b.norm2(comm)?, r.norm2(comm)?))
    }

    #[allow(non_snake_case)]
    fn solve_cg<C: Communicator + ?Sized>(&self, comm: &C, b: &DistVector, x: &mut DistVector) -> Result<KspOutput, LinalgError> {
        let mut r = b.duplicate();
        let mut z = b.duplicate();
        let mut p = b.duplicate();
        let mut Ap = b.duplicate();

        let (b_norm, r0_norm) = self.initial_residual(comm, b, x, &mut r)?;
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(KspOutput {
                reason: ConvergedReason::ConvergedAtol,
                iterations: 0,
                residual_norm: 0.0,
            });
        }

        self.precondition(&r, &mut z)?;
        p.copy_from(&z)?;
        let mut zTr = z.dot(comm, &r)?;
        let mut r_norm = r0_norm;
        let mut iterations = 0;

        let reason = loop {
            if let Some(reason) = self
                .stopping_criterion
                .check(iterations, r_norm, b_norm, r0_norm)
            {
                break reason;
            }
            if iterations >= self.max_iter {
                break ConvergedReason::DivergedIts;
            }
            if !zTr.is_finite() {
                break ConvergedReason::DivergedNanOrInf;
            }
            if zTr <= 0.0 {
                break ConvergedReason::DivergedIndefinitePc;
            }

            self.operator.apply(comm, &p, &mut Ap)?;
            let pAp = p.dot(comm, &Ap)?;
            if !pAp.is_finite() {
                break ConvergedReason::DivergedNanOrInf;
            }
            if pAp <= 0.0 {
                break ConvergedReason::DivergedIndefiniteMat;
            }

            let alpha = zTr / pAp;
            x.axpy(alpha, &p)?;
            r.axpy(-alpha, &Ap)?;
            iterations += 1;

            self.precondition(&r, &mut z)?;
            let zTr_next = z.dot(comm, &r)?;
            let beta = zTr_next / zTr;
            // p = z + beta p
            p.aypx(beta, &z)?;
            zTr = zTr_next;
            r_norm = r.norm2(comm)?;
        };

        Ok(KspOutput {
            reason,
            iterations,
            residual_norm: r_norm,
        })
    }

    fn solve_bicgstab<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        b: &DistVector,
        x: &mut DistVector,
    ) -> Result<KspOutput, LinalgError> {
        let mut r = b.duplicate();
        let (b_norm, r0_norm) = self.initial_residual(comm, b, x, &mut r)?;
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(KspOutput {
                reason: ConvergedReason::ConvergedAtol,
                iterations: 0,
                residual_norm: 0.0,
            });
        }

        let r_hat = r.clone();
        let mut p = b.duplicate();
        let mut v = b.duplicate();
        let mut p_hat = b.duplicate();
        let mut s = b.duplicate();
        let mut s_hat = b.duplicate();
        let mut t = b.duplicate();

        let (mut rho_old, mut alpha, mut omega) = (1.0, 1.0, 1.0);
        let mut r_norm = r0_norm;
        let mut iterations = 0;

        let reason = loop {
            if let Some(reason) = self
                .stopping_criterion
                .check(iterations, r_norm, b_norm, r0_norm)
            {
                break reason;
            }
            if iterations >= self.max_iter {
                break ConvergedReason::DivergedIts;
            }

            let rho = r_hat.dot(comm, &r)?;
            if rho == 0.0 || !rho.is_finite() {
                break ConvergedReason::DivergedBreakdown;
            }
            if iterations == 0 {
                p.copy_from(&r)?;
            } else {
                // p = r + beta (p - omega v)
                let beta = (rho / rho_old) * (alpha / omega);
                p.axpy(-omega, &v)?;
                p.aypx(beta, &r)?;
            }

            self.precondition(&p, &mut p_hat)?;
            self.operator.apply(comm, &p_hat, &mut v)?;
            let r_hat_v = r_hat.dot(comm, &v)?;
            if r_hat_v == 0.0 || !r_hat_v.is_finite() {
                break ConvergedReason::DivergedBreakdown;
            }
            alpha = rho / r_hat_v;

            s.waxpy(-alpha, &v, &r)?;
            let s_norm = s.norm2(comm)?;
            if let Some(reason @ (ConvergedReason::ConvergedRtol | ConvergedReason::ConvergedAtol)) = self
                .stopping_criterion
                .check(iterations, s_norm, b_norm, r0_norm)
            {
                x.axpy(alpha, &p_hat)?;
                r.copy_from(&s)?;
                iterations += 1;
                r_norm = s_norm;
                break reason;
            }

            self.precondition(&s, &mut s_hat)?;
            self.operator.apply(comm, &s_hat, &mut t)?;
            let t_dot_t = t.dot(comm, &t)?;
            if t_dot_t == 0.0 || !t_dot_t.is_finite() {
                break ConvergedReason::DivergedBreakdown;
            }
            omega = t.dot(comm, &s)? / t_dot_t;

            x.axpy(alpha, &p_hat)?;
            x.axpy(omega, &s_hat)?;
            r.waxpy(-omega, &t, &s)?;
            iterations += 1;
            r_norm = r.norm2(comm)?;

            if omega == 0.0 {
                break ConvergedReason::DivergedBreakdown;
            }
            rho_old = rho;
        };

        Ok(KspOutput {
            reason,
            iterations,
            residual_norm: r_norm,
        })
    }
}
