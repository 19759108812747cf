use super::{data_output_path, study_config};
use hdg_diffusion::hdg_linalg::{run_in_process, Communicator, ConvergedReason, PcType, SelfComm};
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::study::{CONVERGENCE_RESULT_FILE, EXECUTION_TIME_FILE};
use hdg_diffusion::{
    run_convergence_study, run_convergence_study_with, ConvergenceLog, EventSink, HdgError, StudyConfig,
};
use matrixcompare::assert_scalar_eq;
use std::fs;

#[test]
fn linear_solution_is_reproduced_on_a_single_rank() {
    let config = study_config(ProblemKind::Linear, 1, 0..1);
    let mut events = EventSink::in_memory();
    let mut results = ConvergenceLog::in_memory();
    let records = run_convergence_study_with(&SelfComm, &config, &mut events, &mut results).unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert!(record.converged_reason > 0, "solver stopped with {}", record.reason);
    assert!(record.iterations > 0);
    assert!(record.error_norm < 1e-6);
    assert!(record.u_l2_error < 1e-6);
    assert!(record.q_l2_error < 1e-6);
    assert_eq!(results.records(), records.as_slice());

    let expected_prefixes = [
        "Rank     0 is in cycle     0 and is entering counter: ",
        "Rank     0 is in cycle     0 and has exited  counter: ",
        "Entering assembly : ",
        "Has finished assembly : ",
        "Entering solver : ",
        "Converged reason is: ",
        "Number of iterations is: ",
        "Finished solver : ",
        "Entering local solver : ",
        "Finished local solver : ",
    ];
    let lines = events.lines();
    assert_eq!(lines.len(), expected_prefixes.len());
    for (line, prefix) in lines.iter().zip(expected_prefixes) {
        assert!(line.starts_with(prefix), "`{line}` does not start with `{prefix}`");
    }
    assert_eq!(lines[5], format!("Converged reason is: {}", record.converged_reason));
    assert_eq!(lines[6], format!("Number of iterations is: {}", record.iterations));
}

#[test]
fn cycles_are_counted_across_levels() {
    let config = study_config(ProblemKind::Sine, 1, 0..3);
    let mut events = EventSink::in_memory();
    let records = run_convergence_study_with(&SelfComm, &config, &mut events, &mut ConvergenceLog::in_memory()).unwrap();

    assert_eq!(records.iter().map(|record| record.level).collect::<Vec<_>>(), vec![0, 1, 2]);
    let counters: Vec<_> = events
        .lines()
        .iter()
        .filter(|line| line.contains("entering counter"))
        .collect();
    assert_eq!(counters.len(), 3);
    assert!(counters[2].starts_with("Rank     0 is in cycle     2"));
}

#[test]
fn rank_count_does_not_change_the_solution() {
    let config = study_config(ProblemKind::Sine, 2, 1..3);
    let serial = run_convergence_study_with(
        &SelfComm,
        &config,
        &mut EventSink::Disabled,
        &mut ConvergenceLog::in_memory(),
    )
    .unwrap();

    let distributed = run_in_process(2, |comm| {
        run_convergence_study_with(&comm, &config, &mut EventSink::Disabled, &mut ConvergenceLog::in_memory())
            .unwrap()
    });

    for records in &distributed {
        assert_eq!(records.len(), serial.len());
        for (parallel, serial) in records.iter().zip(&serial) {
            assert_eq!(parallel.ranks, 2);
            assert_eq!(parallel.num_global_dofs, serial.num_global_dofs);
            let tol = 1e-8 * serial.solution_norm;
            assert_scalar_eq!(parallel.solution_norm, serial.solution_norm, comp = abs, tol = tol);
            assert_scalar_eq!(parallel.u_l2_error, serial.u_l2_error, comp = abs, tol = 1e-8);
        }
    }
    // Reduced quantities agree across ranks, timings do not
    for (first, second) in distributed[0].iter().zip(&distributed[1]) {
        assert_eq!(first.iterations, second.iterations);
        assert_eq!(first.solution_norm, second.solution_norm);
        assert_eq!(first.u_l2_error, second.u_l2_error);
    }
}

#[test]
fn default_solver_converges_on_one_and_three_ranks() {
    // CG with algebraic multigrid and rtol 1e-8
    let config = StudyConfig {
        h_start: 0,
        h_end: 3,
        ..StudyConfig::default()
    };
    let runs: Vec<_> = [1, 3]
        .into_iter()
        .map(|ranks| {
            run_in_process(ranks, |comm| {
                run_convergence_study_with(&comm, &config, &mut EventSink::Disabled, &mut ConvergenceLog::in_memory())
                    .unwrap()
            })
            .remove(0)
        })
        .collect();

    let (serial, distributed) = (&runs[0], &runs[1]);
    assert_eq!(serial.len(), 3);
    for (serial, distributed) in serial.iter().zip(distributed) {
        for record in [serial, distributed] {
            assert_eq!(record.converged_reason, 2, "level {}: {}", record.level, record.reason);
            assert!(record.residual_norm <= 1e-8 * record.rhs_norm);
        }
        assert_eq!(distributed.ranks, 3);
        assert_eq!(distributed.num_global_dofs, serial.num_global_dofs);
        let tol = 1e-4 * serial.solution_norm;
        assert_scalar_eq!(distributed.solution_norm, serial.solution_norm, comp = abs, tol = tol);
        let tol = 1e-3 * serial.u_l2_error;
        assert_scalar_eq!(distributed.u_l2_error, serial.u_l2_error, comp = abs, tol = tol);
    }
    for pair in serial.windows(2) {
        assert!(pair[1].u_l2_error < pair[0].u_l2_error);
    }
}

#[test]
fn non_convergence_is_recorded_by_default() {
    let mut config = study_config(ProblemKind::Sine, 1, 2..3);
    config.solver.ksp.max_iter = 1;
    config.solver.ksp.pc_type = PcType::None;

    let records = run_convergence_study_with(
        &SelfComm,
        &config,
        &mut EventSink::Disabled,
        &mut ConvergenceLog::in_memory(),
    )
    .unwrap();
    assert_eq!(records[0].converged_reason, -3);
    assert_eq!(records[0].iterations, 1);
}

#[test]
fn non_convergence_fails_on_every_rank_when_requested() {
    let mut config = study_config(ProblemKind::Sine, 1, 2..3);
    config.solver.ksp.max_iter = 1;
    config.solver.ksp.pc_type = PcType::None;
    config.solver.fail_on_non_convergence = true;

    let results = run_in_process(2, |comm| {
        let result =
            run_convergence_study_with(&comm, &config, &mut EventSink::Disabled, &mut ConvergenceLog::in_memory());
        (comm.rank(), result)
    });

    for (rank, result) in results {
        assert!(
            matches!(
                result,
                Err(HdgError::NotConverged {
                    reason: ConvergedReason::DivergedIts,
                    iterations: 1
                })
            ),
            "rank {rank} returned {result:?}"
        );
    }
}

#[test]
fn empty_ranges_run_no_levels() {
    let mut events = EventSink::in_memory();
    let mut results = ConvergenceLog::in_memory();
    let config = study_config(ProblemKind::Sine, 1, 2..2);
    let records = run_convergence_study_with(&SelfComm, &config, &mut events, &mut results).unwrap();
    assert!(records.is_empty());
    assert!(events.lines().is_empty());
    assert!(results.records().is_empty());

    let mut config = study_config(ProblemKind::Sine, 1, 0..1);
    config.p_start = 2;
    config.p_end = 1;
    assert!(run_convergence_study_with(&SelfComm, &config, &mut events, &mut results)
        .unwrap()
        .is_empty());
}

#[test]
fn empty_study_still_truncates_result_files() {
    let dir = data_output_path().join("empty_study");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(CONVERGENCE_RESULT_FILE), "stale\n").unwrap();
    fs::write(dir.join(EXECUTION_TIME_FILE), "stale\n").unwrap();

    let mut config = study_config(ProblemKind::Sine, 1, 3..3);
    config.output_dir = Some(dir.clone());
    assert!(run_convergence_study(&SelfComm, &config).unwrap().is_empty());

    assert_eq!(fs::read_to_string(dir.join(CONVERGENCE_RESULT_FILE)).unwrap(), "");
    assert_eq!(fs::read_to_string(dir.join(EXECUTION_TIME_FILE)).unwrap(), "");
}
