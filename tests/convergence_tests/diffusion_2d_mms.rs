//! Method of manufactured solutions for the HDG discretization of
//!   - Delta u = f
//! on the unit square, with u = sin(pi x) sin(pi y).
use hdg_diffusion::hdg_linalg::SelfComm;
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::study::convergence_rates;
use hdg_diffusion::{run_convergence_study, ConvergenceRecord, StudyConfig};
use matrixcompare::assert_scalar_eq;
use std::path::PathBuf;

fn sine_study(degree: usize) -> Vec<ConvergenceRecord> {
    run_convergence_study(&SelfComm, &sine_study_config(degree)).unwrap()
}

fn sine_study_config(degree: usize) -> StudyConfig {
    let mut config = StudyConfig {
        p_start: degree,
        p_end: degree + 1,
        h_start: 1,
        h_end: 5,
        problem: ProblemKind::Sine,
        output_dir: Some(PathBuf::from(format!("data/convergence_tests/diffusion_2d_mms/p{degree}"))),
        ..StudyConfig::default()
    };
    config.solver.ksp.rtol = 1e-12;
    config
}

fn assert_optimal_convergence(degree: usize) {
    let records = sine_study(degree);
    assert_eq!(records.len(), 4);
    for record in &records {
        assert!(record.converged_reason > 0, "level {} stopped with {}", record.level, record.reason);
    }
    for pair in records.windows(2) {
        assert!(pair[1].u_l2_error < pair[0].u_l2_error);
        assert!(pair[1].q_l2_error < pair[0].q_l2_error);
    }

    let rates = convergence_rates(&records, |record| record.u_l2_error);
    let &(rate_degree, last_rate) = rates.last().unwrap();
    assert_eq!(rate_degree, degree);
    assert!(
        last_rate > degree as f64 + 0.5,
        "observed rate {last_rate} for degree {degree}"
    );
}

#[test]
fn sine_solution_converges_with_degree_1() {
    assert_optimal_convergence(1);
}

#[test]
fn sine_solution_converges_with_degree_2() {
    assert_optimal_convergence(2);
}

#[test]
fn diffusivity_scales_flux_but_not_solution() {
    // Scaling kappa and tau together leaves u_h unchanged and scales q_h by kappa
    let kappa = 4.0;
    let mut reference = sine_study_config(1);
    reference.h_end = 3;
    reference.output_dir = None;
    let mut scaled = reference.clone();
    scaled.solver.kappa = kappa;
    scaled.solver.tau = kappa;

    let reference = run_convergence_study(&SelfComm, &reference).unwrap();
    let scaled = run_convergence_study(&SelfComm, &scaled).unwrap();
    assert_eq!(reference.len(), scaled.len());
    for (reference, scaled) in reference.iter().zip(&scaled) {
        let u_tol = 1e-6 * reference.u_l2_error;
        assert_scalar_eq!(scaled.u_l2_error, reference.u_l2_error, comp = abs, tol = u_tol);
        let q_tol = 1e-6 * kappa * reference.q_l2_error;
        assert_scalar_eq!(scaled.q_l2_error, kappa * reference.q_l2_error, comp = abs, tol = q_tol);
    }
}
