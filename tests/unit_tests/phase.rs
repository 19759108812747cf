use hdg_diffusion::hdg_linalg::SelfComm;
use hdg_diffusion::problem::ProblemKind;
use hdg_diffusion::{ConvergenceLog, Diffusion, EventSink, HdgError, Phase, SolverOptions};

fn solver(comm: &SelfComm) -> Diffusion<'_, SelfComm> {
    Diffusion::new(comm, 1, 2, ProblemKind::Linear.exact_solution(), SolverOptions::default()).unwrap()
}

#[test]
fn solve_before_setup_is_rejected() {
    let comm = SelfComm;
    let mut diffusion = solver(&comm);
    let result = diffusion.solve_linear_system(&mut EventSink::Disabled, &mut ConvergenceLog::in_memory());
    assert!(matches!(
        result,
        Err(HdgError::PhaseViolation {
            operation: "solve_linear_system",
            current: Phase::Uninitialized,
            ..
        })
    ));
    assert_eq!(diffusion.phase(), Phase::Uninitialized);
}

#[test]
fn visualization_before_solve_is_rejected() {
    let comm = SelfComm;
    let mut diffusion = solver(&comm);
    diffusion.setup_system(0, &mut EventSink::Disabled).unwrap();
    let result = diffusion.vtk_visualizer("data/unit_tests/phase");
    assert!(matches!(
        result,
        Err(HdgError::PhaseViolation {
            current: Phase::Counted,
            ..
        })
    ));
}

#[test]
fn refinement_levels_must_increase() {
    let comm = SelfComm;
    let mut diffusion = solver(&comm);
    let mut events = EventSink::Disabled;
    diffusion.setup_system(1, &mut events).unwrap();
    assert!(matches!(
        diffusion.setup_system(1, &mut events),
        Err(HdgError::RefinementNotIncreasing { current: 1, requested: 1 })
    ));
    assert!(matches!(
        diffusion.setup_system(0, &mut events),
        Err(HdgError::RefinementNotIncreasing { current: 1, requested: 0 })
    ));
    assert_eq!(diffusion.level(), Some(1));
}

#[test]
fn unrepresentable_refinement_is_rejected() {
    let comm = SelfComm;
    let mut diffusion = solver(&comm);
    let mut events = EventSink::in_memory();
    assert!(matches!(
        diffusion.setup_system(usize::BITS as usize, &mut events),
        Err(HdgError::InvalidConfig(_))
    ));
    assert_eq!(diffusion.phase(), Phase::Uninitialized);
    assert!(events.lines().is_empty());

    diffusion.setup_system(0, &mut events).unwrap();
    assert_eq!(diffusion.phase(), Phase::Counted);
}

#[test]
fn pipeline_advances_through_phases() {
    let comm = SelfComm;
    let mut diffusion = solver(&comm);
    let mut events = EventSink::Disabled;
    let mut results = ConvergenceLog::in_memory();

    diffusion.setup_system(0, &mut events).unwrap();
    assert_eq!(diffusion.phase(), Phase::Counted);
    assert!(diffusion.local_solution().is_none());

    diffusion.solve_linear_system(&mut events, &mut results).unwrap();
    assert_eq!(diffusion.phase(), Phase::PostSolved);
    let dofs = diffusion.dofs().unwrap();
    assert_eq!(diffusion.local_solution().unwrap().len(), dofs.num_local_dofs());
    assert_eq!(diffusion.interior_solution().unwrap().elements.len(), 4);

    // A second solve needs a new level
    assert!(matches!(
        diffusion.solve_linear_system(&mut events, &mut results),
        Err(HdgError::PhaseViolation { .. })
    ));

    diffusion.setup_system(1, &mut events).unwrap();
    assert_eq!(diffusion.phase(), Phase::Counted);
    assert!(diffusion.local_solution().is_none());
    assert_eq!(results.records().len(), 1);
}
