use hdg_diffusion::basis::FaceBasisKind;
use hdg_diffusion::dofs::DofSet;
use hdg_diffusion::hdg_linalg::Communicator;
use hdg_diffusion::local::{HdgDiffusionAssembler, TraceElementAssembler};
use hdg_diffusion::mesh::{ElementPartition, QuadMesh};
use hdg_diffusion::problem::SineSolution;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

mod unit_tests;

/// Assembler and DOF set of the sine problem on the mesh refined `level` times from 2 x 2
/// elements.
fn setup_level<C: Communicator>(comm: &C, level: usize, degree: usize) -> (HdgDiffusionAssembler, DofSet) {
    let mesh = QuadMesh::refined(2, level).unwrap();
    let partition = ElementPartition::new(&mesh, comm.rank(), comm.size());
    let assembler =
        HdgDiffusionAssembler::new(mesh, Arc::new(SineSolution), degree, FaceBasisKind::Legendre, 1.0).unwrap();
    let dofs = DofSet::count(comm, &mesh, &partition, assembler.num_face_dofs(), 1).unwrap();
    (assembler, dofs)
}

fn thread_pool(threads: usize) -> ThreadPool {
    ThreadPoolBuilder::new().num_threads(threads).build().unwrap()
}
