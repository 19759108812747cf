use crate::{setup_level, thread_pool};
use hdg_diffusion::assembly::{assemble_global_system, condense_element};
use hdg_diffusion::hdg_linalg::{run_in_process, SelfComm};
use hdg_diffusion::local::TraceElementAssembler;
use hdg_diffusion::solve::GlobalSystem;
use matrixcompare::assert_scalar_eq;

/// Owned matrix entries and right-hand side of one assembly.
type AssembledSystem = (Vec<(usize, usize, f64)>, Vec<f64>);

#[test]
fn repeated_assembly_is_bit_identical() {
    let runs = run_in_process(2, |comm| {
        let (assembler, dofs) = setup_level(&comm, 1, 1);
        let assemble = |threads| -> AssembledSystem {
            let mut system = GlobalSystem::create(&dofs).unwrap();
            assemble_global_system(&assembler, &dofs, &mut system, &thread_pool(threads)).unwrap();
            system.finalize(&comm).unwrap();
            (system.matrix.local_triplets().unwrap(), system.rhs.local_values().to_vec())
        };
        (assemble(1), assemble(1), assemble(3))
    });

    for (first, second, threaded) in runs {
        assert_eq!(first, second);
        assert_eq!(first, threaded);
    }
}

#[test]
fn assembled_matrix_is_symmetric() {
    let (assembler, dofs) = setup_level(&SelfComm, 1, 2);
    let mut system = GlobalSystem::create(&dofs).unwrap();
    assemble_global_system(&assembler, &dofs, &mut system, &thread_pool(1)).unwrap();
    system.finalize(&SelfComm).unwrap();
    assert!(system.matrix.is_spd());

    let triplets = system.matrix.local_triplets().unwrap();
    for &(i, j, value) in &triplets {
        let transposed = triplets
            .iter()
            .find(|&&(row, col, _)| row == j && col == i)
            .map(|&(_, _, v)| v)
            .unwrap();
        assert_scalar_eq!(value, transposed, comp = abs, tol = 1e-12);
    }
}

#[test]
fn element_contributions_exclude_boundary_faces() {
    let (assembler, dofs) = setup_level(&SelfComm, 0, 1);
    let nf = assembler.num_face_dofs();
    // Every element of the 2 x 2 mesh has two interior faces
    for element in 0..4 {
        let contribution = condense_element(&assembler, &dofs, element).unwrap();
        assert_eq!(contribution.dofs.len(), 2 * nf);
        assert_eq!(contribution.matrix.len(), 4 * nf * nf);
        assert_eq!(contribution.rhs.len(), 2 * nf);
    }
}
