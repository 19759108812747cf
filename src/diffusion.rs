//! Solver instance driving the collective pipeline for one polynomial degree.

use crate::assembly::assemble_global_system;
use crate::config::SolverOptions;
use crate::dofs::DofSet;
use crate::error::HdgError;
use crate::events::{ConvergenceLog, ConvergenceRecord, EventSink};
use crate::io::vtk::HdgSolutionDataSetBuilder;
use crate::io::vtk_file_name;
use crate::local::{HdgDiffusionAssembler, TraceElementAssembler};
use crate::mesh::{ElementPartition, QuadMesh};
use crate::phase::{Phase, PhaseTracker};
use crate::postsolve::{recover_interiors, LocalSolution};
use crate::problem::ExactSolution;
use crate::solve::GlobalSystem;
use hdg_linalg::{scatter_to_local, CommExt, Communicator};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Aborts the rank group if `error` may not have been raised on every rank.
pub fn abort_if_required<C: Communicator + ?Sized>(comm: &C, error: HdgError) -> HdgError {
    if error.requires_abort() {
        log::error!("rank {}: {error}; aborting", comm.rank());
        comm.abort();
    }
    error
}

/// Data of the current refinement level.
struct Level {
    index: usize,
    assembler: HdgDiffusionAssembler,
    dofs: DofSet,
    local_solution: Option<Vec<f64>>,
    interiors: Option<LocalSolution>,
}

/// HDG diffusion solver for a fixed polynomial degree on a sequence of refined meshes.
///
/// Every rank of the communicator holds one instance and calls its methods in the same
/// order:
///
/// ```ignore
/// let mut solver = Diffusion::new(&comm, degree, 2, problem, options)?;
/// for level in 0..4 {
///     solver.setup_system(level, &mut events)?;
///     solver.solve_linear_system(&mut events, &mut results)?;
///     solver.vtk_visualizer("output")?;
/// }
/// ```
///
/// Calls out of order fail with [`HdgError::PhaseViolation`] on every rank. Errors that may
/// occur on some ranks only abort the rank group before they are returned.
pub struct Diffusion<'c, C: Communicator + ?Sized> {
    comm: &'c C,
    degree: usize,
    base_divisions: usize,
    problem: Arc<dyn ExactSolution>,
    options: SolverOptions,
    pool: ThreadPool,
    phase: PhaseTracker,
    level: Option<Level>,
    generation: u64,
    cycle: usize,
}

impl<'c, C: Communicator + ?Sized> Diffusion<'c, C> {
    pub fn new(
        comm: &'c C,
        degree: usize,
        base_divisions: usize,
        problem: Arc<dyn ExactSolution>,
        options: SolverOptions,
    ) -> Result<Self, HdgError> {
        options.validate()?;
        if base_divisions == 0 {
            return Err(HdgError::InvalidConfig("the base mesh needs at least one division".to_string()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()
            .map_err(|err| abort_if_required(comm, err.into()))?;
        if comm.rank() == 0 {
            log::info!("There are {} threads available.", pool.current_num_threads());
        }
        Ok(Self {
            comm,
            degree,
            base_divisions,
            problem,
            options,
            pool,
            phase: PhaseTracker::default(),
            level: None,
            generation: 0,
            cycle: 0,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Refinement level set up last.
    pub fn level(&self) -> Option<usize> {
        self.level.as_ref().map(|level| level.index)
    }

    pub fn dofs(&self) -> Option<&DofSet> {
        self.level.as_ref().map(|level| &level.dofs)
    }

    /// Trace values of the interior faces of owned elements, ordered like
    /// [`DofSet::local_faces`]. Available after a solve.
    pub fn local_solution(&self) -> Option<&[f64]> {
        self.level.as_ref()?.local_solution.as_deref()
    }

    pub fn interior_solution(&self) -> Option<&LocalSolution> {
        self.level.as_ref()?.interiors.as_ref()
    }

    fn milestone(&self, events: &mut EventSink, label: &str) -> Result<(), HdgError> {
        if self.comm.rank() == 0 {
            events.milestone(label)?;
        }
        Ok(())
    }

    /// Refines the mesh to `level` and counts the DOFs of the new mesh. Collective.
    ///
    /// Levels must strictly increase between calls on the same instance.
    pub fn setup_system(&mut self, level: usize, events: &mut EventSink) -> Result<(), HdgError> {
        let result = self.setup_system_impl(level, events);
        result.map_err(|err| abort_if_required(self.comm, err))
    }

    fn setup_system_impl(&mut self, level: usize, events: &mut EventSink) -> Result<(), HdgError> {
        self.phase.require(
            "setup_system",
            &[Phase::Uninitialized, Phase::Counted, Phase::PostSolved],
        )?;
        if let Some(current) = self.level() {
            if level <= current {
                return Err(HdgError::RefinementNotIncreasing {
                    current,
                    requested: level,
                });
            }
        }

        let mesh = QuadMesh::refined(self.base_divisions, level)?;

        let rank = self.comm.rank();
        self.milestone(
            events,
            &format!("Rank {rank:5} is in cycle {:5} and is entering counter: ", self.cycle),
        )?;

        let partition = ElementPartition::new(&mesh, rank, self.comm.size());
        let assembler = HdgDiffusionAssembler::new(
            mesh,
            self.problem.clone(),
            self.degree,
            self.options.face_basis,
            self.options.tau,
        )?
        .with_diffusivity(self.options.kappa)?;
        self.generation += 1;
        let dofs = DofSet::count(self.comm, &mesh, &partition, assembler.num_face_dofs(), self.generation)?;

        self.milestone(
            events,
            &format!("Rank {rank:5} is in cycle {:5} and has exited  counter: ", self.cycle),
        )?;
        if rank == 0 {
            log::info!(
                "degree {}, level {level}: {} elements, {} global DOFs",
                self.degree,
                mesh.num_elements(),
                dofs.num_global_dofs()
            );
        }

        self.level = Some(Level {
            index: level,
            assembler,
            dofs,
            local_solution: None,
            interiors: None,
        });
        self.cycle += 1;
        self.phase.advance(Phase::Counted);
        Ok(())
    }

    /// Assembles and solves the global trace system, scatters the solution to the local
    /// array and recovers the interior unknowns. Collective.
    ///
    /// The resulting record is appended to `results` on rank 0 and returned on every rank.
    pub fn solve_linear_system(
        &mut self,
        events: &mut EventSink,
        results: &mut ConvergenceLog,
    ) -> Result<ConvergenceRecord, HdgError> {
        let result = self.solve_linear_system_impl(events, results);
        result.map_err(|err| abort_if_required(self.comm, err))
    }

    fn solve_linear_system_impl(
        &mut self,
        events: &mut EventSink,
        results: &mut ConvergenceLog,
    ) -> Result<ConvergenceRecord, HdgError> {
        self.phase.require("solve_linear_system", &[Phase::Counted])?;
        let comm = self.comm;
        let is_root = comm.rank() == 0;
        let Some(level) = self.level.as_mut() else {
            return Err(HdgError::PhaseViolation {
                operation: "solve_linear_system",
                current: self.phase.current(),
                allowed: vec![Phase::Counted],
            });
        };

        let start = Instant::now();
        if is_root {
            events.milestone("Entering assembly : ")?;
        }
        let mut system = GlobalSystem::create(&level.dofs)?;
        assemble_global_system(&level.assembler, &level.dofs, &mut system, &self.pool)?;
        system.finalize(comm)?;
        if is_root {
            events.milestone("Has finished assembly : ")?;
        }
        self.phase.advance(Phase::Assembled);
        let assembly_seconds = start.elapsed().as_secs_f64();

        let start = Instant::now();
        if is_root {
            events.milestone("Entering solver : ")?;
        }
        let report = system.solve(comm, &self.options.ksp)?;
        let reason = report.reason();
        if is_root {
            events.record(&format!("Converged reason is: {}", reason.code()))?;
            events.record(&format!("Number of iterations is: {}", report.output.iterations))?;
            events.milestone("Finished solver : ")?;
        }
        self.phase.advance(Phase::Solved);

        let local = scatter_to_local(comm, &system.solution, level.dofs.scatter_map(), self.generation)?;
        drop(system);
        self.phase.advance(Phase::Scattered);
        let solve_seconds = start.elapsed().as_secs_f64();

        let start = Instant::now();
        if is_root {
            events.milestone("Entering local solver : ")?;
        }
        let interiors = recover_interiors(&level.assembler, &level.dofs, &local, &self.pool)?;
        if is_root {
            events.milestone("Finished local solver : ")?;
        }
        let local_solve_seconds = start.elapsed().as_secs_f64();

        let u_l2_error = comm.all_reduce_sum_f64(interiors.errors.u_squared)?.sqrt();
        let q_l2_error = comm.all_reduce_sum_f64(interiors.errors.q_squared)?.sqrt();

        level.local_solution = Some(local);
        level.interiors = Some(interiors);
        self.phase.advance(Phase::PostSolved);

        let mesh = level.assembler.mesh();
        let record = ConvergenceRecord {
            degree: self.degree,
            level: level.index,
            h: mesh.element_size()[0],
            num_elements: mesh.num_elements(),
            num_global_dofs: level.dofs.num_global_dofs(),
            ranks: comm.size(),
            iterations: report.output.iterations,
            converged_reason: reason.code(),
            reason: reason.to_string(),
            residual_norm: report.output.residual_norm,
            rhs_norm: report.rhs_norm,
            solution_norm: report.solution_norm,
            error_norm: report.error_norm,
            u_l2_error,
            q_l2_error,
            assembly_seconds,
            solve_seconds,
            local_solve_seconds,
        };

        if is_root {
            results.append(&record)?;
            log::info!("{assembly_seconds} {solve_seconds} {local_solve_seconds}");
            log::info!(
                "{reason} after {} iterations: residual {:.3e}, solution norm {:.6e}, error norm {:.3e}, \
                 L2 errors u {:.3e} q {:.3e}",
                record.iterations,
                record.residual_norm,
                record.solution_norm,
                record.error_norm,
                u_l2_error,
                q_l2_error
            );
            if !reason.is_converged() {
                log::warn!("Krylov solver did not converge: {reason}");
            }
        }

        if !reason.is_converged() && self.options.fail_on_non_convergence {
            return Err(HdgError::NotConverged {
                reason,
                iterations: report.output.iterations,
            });
        }
        Ok(record)
    }

    /// Writes the recovered solution of the owned elements to
    /// `dir/solution-p<degree>-h<level>-rank<rank>.vtk`.
    pub fn vtk_visualizer(&self, dir: impl AsRef<Path>) -> Result<PathBuf, HdgError> {
        let result = self.vtk_visualizer_impl(dir.as_ref());
        result.map_err(|err| abort_if_required(self.comm, err))
    }

    fn vtk_visualizer_impl(&self, dir: &Path) -> Result<PathBuf, HdgError> {
        self.phase.require("vtk_visualizer", &[Phase::PostSolved])?;
        let (Some(level), Some(interiors)) = (self.level.as_ref(), self.interior_solution()) else {
            return Err(HdgError::PhaseViolation {
                operation: "vtk_visualizer",
                current: self.phase.current(),
                allowed: vec![Phase::PostSolved],
            });
        };
        let rank = self.comm.rank();
        let path = dir.join(vtk_file_name(self.degree, level.index, rank));
        HdgSolutionDataSetBuilder::new(&level.assembler, &interiors.elements, rank)
            .with_samples_per_dim(self.degree + 2)
            .with_title(format!("HDG diffusion, degree {}, level {}", self.degree, level.index))
            .export(&path)?;
        Ok(path)
    }
}
