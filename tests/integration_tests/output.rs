use super::{data_output_path, study_config};
use hdg_diffusion::hdg_linalg::{run_in_process, SelfComm};
use hdg_diffusion::io::vtk_file_name;
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::study::{CONVERGENCE_RESULT_FILE, EXECUTION_TIME_FILE};
use hdg_diffusion::{run_convergence_study, ConvergenceRecord};
use std::fs;

#[test]
fn result_files_are_truncated_between_runs() {
    let dir = data_output_path().join("result_files");
    let mut config = study_config(ProblemKind::Sine, 1, 0..2);
    config.output_dir = Some(dir.clone());

    for _ in 0..2 {
        let records = run_convergence_study(&SelfComm, &config).unwrap();
        assert_eq!(records.len(), 2);

        let results = fs::read_to_string(dir.join(CONVERGENCE_RESULT_FILE)).unwrap();
        let written: Vec<ConvergenceRecord> = results
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1].level, 1);
        assert_eq!(written[1].num_global_dofs, records[1].num_global_dofs);

        // Ten lines per level
        let milestones = fs::read_to_string(dir.join(EXECUTION_TIME_FILE)).unwrap();
        assert_eq!(milestones.lines().count(), 20);
    }
}

#[test]
fn every_rank_exports_its_elements() {
    let dir = data_output_path().join("vtk_export");
    let mut config = study_config(ProblemKind::Linear, 1, 1..2);
    config.output_dir = Some(dir.clone());
    config.write_vtk = true;

    run_in_process(2, |comm| run_convergence_study(&comm, &config).unwrap());

    for rank in 0..2 {
        let contents = fs::read(dir.join(vtk_file_name(1, 1, rank))).unwrap();
        assert!(contents.starts_with(b"# vtk DataFile Version"));
    }
}
