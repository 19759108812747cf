use clap::Parser;
use eyre::eyre;
use hdg_diffusion::hdg_linalg::{run_in_process, Communicator, KspType, PcType, SelfComm};
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::study::convergence_rates;
use hdg_diffusion::{run_convergence_study, ConvergenceRecord, StudyConfig};
use std::path::PathBuf;

/// Convergence study of the HDG discretization of a diffusion problem on the unit square.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON file with a study configuration. Flags override its values.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// First refinement level.
    #[arg(long = "h_0")]
    h_start: Option<usize>,

    /// Refinement level bound (exclusive).
    #[arg(long = "h_n")]
    h_end: Option<usize>,

    /// First polynomial degree.
    #[arg(long = "p_0")]
    p_start: Option<usize>,

    /// Polynomial degree bound (exclusive).
    #[arg(long = "p_n")]
    p_end: Option<usize>,

    /// Adaptive refinement (0 or 1).
    #[arg(long)]
    amr: Option<u8>,

    /// Trace basis: `legendre` or `lagrange`.
    #[arg(long)]
    face_basis: Option<String>,

    /// Manufactured solution: `linear` or `sine`.
    #[arg(long)]
    problem: Option<ProblemKind>,

    /// Constant diffusivity.
    #[arg(long)]
    kappa: Option<f64>,

    #[arg(long, env = "HDG_KSP_TYPE")]
    ksp_type: Option<KspType>,

    #[arg(long, env = "HDG_PC_TYPE")]
    pc_type: Option<PcType>,

    /// Relative residual tolerance of the Krylov solver.
    #[arg(long)]
    rtol: Option<f64>,

    #[arg(long)]
    max_iter: Option<usize>,

    /// Treat a Krylov solve that does not converge as an error.
    #[arg(long)]
    fail_on_non_convergence: bool,

    /// Threads per rank for element-local work.
    #[arg(long)]
    threads: Option<usize>,

    /// Number of ranks to run as threads of this process.
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Run one rank per MPI process. Requires the `mpi-support` feature.
    #[arg(long)]
    mpi: bool,

    /// Directory for result files.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Write the solution of every level as VTK files.
    #[arg(long)]
    vtk: bool,
}

impl Args {
    fn study_config(&self, rank: usize) -> eyre::Result<StudyConfig> {
        let mut config = match &self.config {
            Some(path) => StudyConfig::from_json_file(path)?,
            None => StudyConfig::default(),
        };
        config.h_start = self.h_start.unwrap_or(config.h_start);
        config.h_end = self.h_end.unwrap_or(config.h_end);
        config.p_start = self.p_start.unwrap_or(config.p_start);
        config.p_end = self.p_end.unwrap_or(config.p_end);
        config.adaptive = self.amr.map(|amr| amr != 0).unwrap_or(config.adaptive);
        config.problem = self.problem.unwrap_or(config.problem);
        if let Some(name) = &self.face_basis {
            config.solver.set_face_basis(name, rank);
        }

        let ksp = &mut config.solver.ksp;
        ksp.ksp_type = self.ksp_type.unwrap_or(ksp.ksp_type);
        ksp.pc_type = self.pc_type.unwrap_or(ksp.pc_type);
        ksp.rtol = self.rtol.unwrap_or(ksp.rtol);
        ksp.max_iter = self.max_iter.unwrap_or(ksp.max_iter);
        config.solver.fail_on_non_convergence |= self.fail_on_non_convergence;
        config.solver.threads = self.threads.unwrap_or(config.solver.threads);
        config.solver.kappa = self.kappa.unwrap_or(config.solver.kappa);

        config.output_dir = Some(self.output_dir.clone());
        config.write_vtk |= self.vtk;
        config.validate()?;
        Ok(config)
    }
}

fn report(records: &[ConvergenceRecord]) {
    println!(
        "{:>3} {:>3} {:>9} {:>10} {:>6} {:>12} {:>12} {:>12}",
        "p", "h", "elements", "dofs", "its", "error norm", "|u - u_h|", "|q - q_h|"
    );
    for record in records {
        println!(
            "{:>3} {:>3} {:>9} {:>10} {:>6} {:>12.4e} {:>12.4e} {:>12.4e}",
            record.degree,
            record.level,
            record.num_elements,
            record.num_global_dofs,
            record.iterations,
            record.error_norm,
            record.u_l2_error,
            record.q_l2_error
        );
    }
    for (degree, rate) in convergence_rates(records, |record| record.u_l2_error) {
        println!("p = {degree}: observed rate {rate:.2}");
    }
}

fn run<C: Communicator + ?Sized>(comm: &C, args: &Args) -> eyre::Result<Vec<ConvergenceRecord>> {
    let config = args.study_config(comm.rank())?;
    Ok(run_convergence_study(comm, &config)?)
}

#[cfg(feature = "mpi-support")]
fn run_mpi(args: &Args) -> eyre::Result<()> {
    let comm = hdg_diffusion::hdg_linalg::MpiComm::initialize().ok_or_else(|| eyre!("MPI is already initialized"))?;
    if comm.rank() == 0 {
        log::info!("Usage example: mpiexec -n 8 hdg-diffusion --mpi --h_0 2 --h_n 12 --p_0 1 --p_n 2 --amr 1");
    }
    let records = run(&comm, args)?;
    if comm.rank() == 0 {
        report(&records);
    }
    Ok(())
}

#[cfg(not(feature = "mpi-support"))]
fn run_mpi(_args: &Args) -> eyre::Result<()> {
    Err(eyre!("built without MPI support"))
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.mpi {
        return run_mpi(&args);
    }

    log::info!("Usage example: hdg-diffusion --ranks 8 --h_0 2 --h_n 12 --p_0 1 --p_n 2 --amr 1");
    if args.ranks == 0 {
        return Err(eyre!("at least one rank is required"));
    }
    let records = if args.ranks == 1 {
        run(&SelfComm, &args)?
    } else {
        let mut results = run_in_process(args.ranks, |comm| run(&comm, &args)).into_iter();
        // Every rank returns the same records
        let root = results.next().ok_or_else(|| eyre!("no ranks were run"))??;
        for result in results {
            result?;
        }
        root
    };
    report(&records);
    Ok(())
}
