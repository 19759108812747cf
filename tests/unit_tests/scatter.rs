use crate::setup_level;
use hdg_diffusion::hdg_linalg::{run_in_process, scatter_to_local, DistVector, LinalgError, SelfComm};

#[test]
fn scatter_delivers_values_of_local_faces() {
    run_in_process(3, |comm| {
        let (_, dofs) = setup_level(&comm, 1, 2);
        let layout = dofs.layout().clone();
        let owned = layout.owned_range();
        let values = owned.clone().map(|dof| dof as f64).collect();
        let global = DistVector::from_local_values(layout, values).unwrap();

        let local = scatter_to_local(&comm, &global, dofs.scatter_map(), dofs.generation()).unwrap();
        assert_eq!(local.len(), dofs.num_local_dofs());
        for &face in dofs.local_faces() {
            let local_offset = dofs.local_face_offset(face).unwrap();
            let global_offset = dofs.global_face_offset(face).unwrap();
            for k in 0..dofs.num_face_dofs() {
                assert_eq!(local[local_offset + k], (global_offset + k) as f64);
            }
        }
    });
}

#[test]
fn scatter_with_stale_generation_fails() {
    let (_, dofs) = setup_level(&SelfComm, 0, 1);
    let global = DistVector::new(dofs.layout().clone());
    let result = scatter_to_local(&SelfComm, &global, dofs.scatter_map(), dofs.generation() + 1);
    assert_eq!(
        result,
        Err(LinalgError::StaleScatter {
            expected: dofs.generation() + 1,
            found: dofs.generation(),
        })
    );
}
