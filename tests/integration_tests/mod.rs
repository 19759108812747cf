use hdg_diffusion::hdg_linalg::PcType;
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::StudyConfig;
use std::path::PathBuf;

mod output;
mod pipeline;

fn data_output_path() -> PathBuf {
    PathBuf::from("data/integration_tests/")
}

/// Study of a single degree and a range of levels with a tight solver tolerance.
fn study_config(problem: ProblemKind, degree: usize, levels: std::ops::Range<usize>) -> StudyConfig {
    let mut config = StudyConfig {
        p_start: degree,
        p_end: degree + 1,
        h_start: levels.start,
        h_end: levels.end,
        problem,
        ..StudyConfig::default()
    };
    config.solver.ksp.rtol = 1e-12;
    config.solver.ksp.pc_type = PcType::Jacobi;
    config
}
