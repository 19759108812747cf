//! Convergence studies over polynomial degrees and refinement levels.

use crate::config::StudyConfig;
use crate::diffusion::{abort_if_required, Diffusion};
use crate::error::HdgError;
use crate::events::{ConvergenceLog, ConvergenceRecord, EventSink};
use hdg_linalg::Communicator;
use std::path::Path;

/// Name of the milestone log in the output directory.
pub const EXECUTION_TIME_FILE: &str = "Execution_Time.txt";
/// Name of the convergence results in the output directory.
pub const CONVERGENCE_RESULT_FILE: &str = "Convergence_Result.txt";

/// Creates the result files on rank 0, truncating earlier results.
///
/// Other ranks, and rank 0 without an output directory, receive sinks that keep nothing on
/// disk.
pub fn create_result_files(rank: usize, output_dir: Option<&Path>) -> Result<(EventSink, ConvergenceLog), HdgError> {
    match output_dir {
        Some(dir) if rank == 0 => {
            std::fs::create_dir_all(dir)?;
            Ok((
                EventSink::create(dir.join(EXECUTION_TIME_FILE))?,
                ConvergenceLog::create(dir.join(CONVERGENCE_RESULT_FILE))?,
            ))
        }
        _ => Ok((EventSink::Disabled, ConvergenceLog::in_memory())),
    }
}

/// Runs the study described by `config`, writing result files to its output directory.
/// Collective.
pub fn run_convergence_study<C>(comm: &C, config: &StudyConfig) -> Result<Vec<ConvergenceRecord>, HdgError>
where
    C: Communicator + ?Sized,
{
    config.validate()?;
    let (mut events, mut results) = create_result_files(comm.rank(), config.output_dir.as_deref())
        .map_err(|err| abort_if_required(comm, err))?;
    run_convergence_study_with(comm, config, &mut events, &mut results)
}

/// Runs the study with the given sinks. Collective.
///
/// One solver instance is created per degree and reused for all of its refinement levels.
/// The first error terminates the study.
pub fn run_convergence_study_with<C>(
    comm: &C,
    config: &StudyConfig,
    events: &mut EventSink,
    results: &mut ConvergenceLog,
) -> Result<Vec<ConvergenceRecord>, HdgError>
where
    C: Communicator + ?Sized,
{
    config.validate()?;
    if config.adaptive && comm.rank() == 0 {
        log::info!("adaptive refinement requested; levels are refined uniformly");
    }

    let problem = config.problem.exact_solution();
    let mut records = Vec::new();
    for degree in config.p_start..config.p_end {
        let mut solver = Diffusion::new(comm, degree, config.base_divisions, problem.clone(), config.solver.clone())?;
        for level in config.h_start..config.h_end {
            solver.setup_system(level, events)?;
            records.push(solver.solve_linear_system(events, results)?);
            if config.write_vtk {
                if let Some(dir) = &config.output_dir {
                    solver.vtk_visualizer(dir)?;
                }
            }
        }
    }
    Ok(records)
}

/// Ratios `log2(e_h / e_{h/2})` of consecutive errors, per degree.
pub fn convergence_rates(records: &[ConvergenceRecord], error: impl Fn(&ConvergenceRecord) -> f64) -> Vec<(usize, f64)> {
    records
        .windows(2)
        .filter(|pair| pair[0].degree == pair[1].degree)
        .map(|pair| (pair[1].degree, (error(&pair[0]) / error(&pair[1])).log2()))
        .collect()
}
