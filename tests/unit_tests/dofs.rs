use crate::{setup_level, thread_pool};
use ::proptest::prelude::*;
use hdg_diffusion::assembly::assemble_global_system;
use hdg_diffusion::dofs::DofSet;
use hdg_diffusion::hdg_linalg::{run_in_process, Communicator};
use hdg_diffusion::mesh::{ElementPartition, QuadMesh};
use hdg_diffusion::solve::GlobalSystem;
use std::collections::HashMap;

#[test]
fn single_rank_owns_every_interior_face() {
    let comm = hdg_diffusion::hdg_linalg::SelfComm;
    let (_, dofs) = setup_level(&comm, 0, 1);
    // 2 x 2 elements have 4 interior faces with 2 DOFs each
    assert_eq!(dofs.num_global_dofs(), 8);
    assert_eq!(dofs.num_owned_dofs(), 8);
    assert_eq!(dofs.num_local_dofs(), 8);
    assert_eq!(dofs.local_faces().len(), 4);

    // Boundary faces carry no DOFs
    let element_dofs = dofs.element_dofs(0);
    assert_eq!(element_dofs.len(), 8);
    assert_eq!(element_dofs.iter().filter(|dof| dof.is_none()).count(), 4);
}

#[test]
fn ghost_faces_share_numbering_with_their_owner() {
    let mesh = QuadMesh::refined(2, 1).unwrap();
    let per_rank = run_in_process(3, |comm| {
        let partition = ElementPartition::new(&mesh, comm.rank(), comm.size());
        let dofs = DofSet::count(&comm, &mesh, &partition, 2, 5).unwrap();
        dofs.local_faces()
            .iter()
            .map(|&face| (face, dofs.global_face_offset(face).unwrap()))
            .collect::<Vec<_>>()
    });

    let mut numbering = HashMap::new();
    for (face, offset) in per_rank.into_iter().flatten() {
        let known = *numbering.entry(face).or_insert(offset);
        assert_eq!(known, offset, "face {face} is numbered inconsistently");
    }
    assert_eq!(numbering.len(), mesh.num_interior_faces());
}

#[test]
fn preallocation_bounds_assembled_row_lengths() {
    run_in_process(3, |comm| {
        let (assembler, dofs) = setup_level(&comm, 1, 2);
        let mut system = GlobalSystem::create(&dofs).unwrap();
        assemble_global_system(&assembler, &dofs, &mut system, &thread_pool(1)).unwrap();
        system.finalize(&comm).unwrap();

        let preallocation = dofs.preallocation();
        assert_eq!(preallocation.num_rows(), dofs.num_owned_dofs());
        for row in 0..dofs.num_owned_dofs() {
            assert!(system.matrix.row_nnz(row) <= preallocation.diag[row] + preallocation.offdiag[row]);
        }
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn owned_dofs_partition_the_global_dofs(level in 0..3usize, ranks in 1..5usize, nf in 1..4usize) {
        let mesh = QuadMesh::refined(2, level).unwrap();
        let results = run_in_process(ranks, |comm| {
            let partition = ElementPartition::new(&mesh, comm.rank(), comm.size());
            let dofs = DofSet::count(&comm, &mesh, &partition, nf, 1).unwrap();
            (dofs.layout().owned_range(), dofs.num_global_dofs(), dofs.scatter_map().len())
        });

        let global = mesh.num_interior_faces() * nf;
        let mut covered = vec![0; global];
        for (owned, num_global, num_local) in results {
            prop_assert_eq!(num_global, global);
            prop_assert!(num_local >= owned.len());
            for dof in owned {
                covered[dof] += 1;
            }
        }
        prop_assert!(covered.iter().all(|&count| count == 1));
    }
}
