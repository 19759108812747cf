//! Distribution of the trace degrees of freedom across ranks.
//!
//! Every interior face carries `nf` consecutive global DOFs. Boundary faces carry none: their
//! trace values are prescribed. A rank owns the DOFs of the faces it owns (see
//! [`ElementPartition::face_owner`]); the faces of owned elements that belong to other ranks
//! are ghost faces, whose global numbers are requested from their owners.

use crate::error::HdgError;
use crate::mesh::{ElementPartition, QuadMesh};
use hdg_linalg::{CommExt, Communicator, Layout, LinalgError, Preallocation, ScatterMap};
use itertools::Itertools;
use std::sync::Arc;

/// DOF numbering of one refinement level, as seen by one rank.
#[derive(Debug, Clone)]
pub struct DofSet {
    mesh: QuadMesh,
    partition: ElementPartition,
    num_face_dofs: usize,
    layout: Arc<Layout>,
    preallocation: Preallocation,
    /// Sorted interior faces touching owned elements.
    local_faces: Vec<usize>,
    /// First global DOF of each local face.
    local_face_dofs: Vec<usize>,
    scatter: ScatterMap,
    generation: u64,
}

impl DofSet {
    /// Counts and numbers the DOFs of the given mesh. Collective.
    ///
    /// Fails with [`HdgError::InconsistentDofCount`] if the owned counts of all ranks do not
    /// partition the global DOF set.
    pub fn count<C: Communicator + ?Sized>(
        comm: &C,
        mesh: &QuadMesh,
        partition: &ElementPartition,
        num_face_dofs: usize,
        generation: u64,
    ) -> Result<Self, HdgError> {
        let rank = comm.rank();
        let nf = num_face_dofs;
        let is_interior = |face: &usize| !mesh.is_boundary_face(*face);

        let mut local_faces: Vec<usize> = partition
            .owned_elements()
            .flat_map(|element| mesh.element_faces(element))
            .filter(is_interior)
            .collect();
        local_faces.sort_unstable();
        local_faces.dedup();
        let owned_faces: Vec<usize> = local_faces
            .iter()
            .copied()
            .filter(|&face| partition.face_owner(mesh, face) == rank)
            .collect();

        let expected = mesh.num_interior_faces() * nf;
        let layout = match Layout::from_local_size_checked(comm, owned_faces.len() * nf, expected) {
            Ok(layout) => Arc::new(layout),
            Err(LinalgError::InconsistentLayout(msg)) => return Err(HdgError::InconsistentDofCount(msg)),
            Err(err) => return Err(err.into()),
        };
        let first_owned = layout.owned_range().start;
        let owned_face_dof = |face: usize| {
            owned_faces
                .binary_search(&face)
                .ok()
                .map(|position| first_owned + position * nf)
        };

        // Ask the owners of ghost faces for their numbering
        let mut requests = vec![Vec::new(); comm.size()];
        for &face in &local_faces {
            let owner = partition.face_owner(mesh, face);
            if owner != rank {
                requests[owner].push(face as u64);
            }
        }
        let received = comm.all_to_all(requests.clone())?;
        let replies = received
            .iter()
            .map(|faces| {
                faces
                    .iter()
                    .map(|&face| {
                        owned_face_dof(face as usize).map(|dof| dof as u64).ok_or_else(|| {
                            HdgError::InconsistentDofCount(format!("rank {rank} was asked for face {face} it does not own"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let answers = comm.all_to_all(replies)?;

        let mut ghost_dofs = Vec::new();
        for (faces, dofs) in requests.iter().zip(&answers) {
            if faces.len() != dofs.len() {
                return Err(HdgError::InconsistentDofCount(format!(
                    "requested {} ghost faces, received {} numbers",
                    faces.len(),
                    dofs.len()
                )));
            }
            ghost_dofs.extend(faces.iter().zip(dofs).map(|(&face, &dof)| (face as usize, dof as usize)));
        }
        ghost_dofs.sort_unstable();

        let local_face_dofs = local_faces
            .iter()
            .map(|&face| {
                owned_face_dof(face)
                    .or_else(|| {
                        ghost_dofs
                            .binary_search_by_key(&face, |&(ghost, _)| ghost)
                            .ok()
                            .map(|i| ghost_dofs[i].1)
                    })
                    .ok_or_else(|| HdgError::InconsistentDofCount(format!("face {face} has no global number")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let from = local_face_dofs
            .iter()
            .flat_map(|&first| first..first + nf)
            .collect_vec();
        let to = (0..from.len()).collect();
        let scatter = ScatterMap::new(from, to, generation)?;

        let preallocation = face_preallocation(mesh, partition, &owned_faces, nf, rank)?;

        log::debug!(
            "rank {rank}: {} owned DOFs, {} local DOFs, {} global DOFs",
            layout.local_size(),
            scatter.len(),
            layout.global_size()
        );

        Ok(Self {
            mesh: *mesh,
            partition: partition.clone(),
            num_face_dofs: nf,
            layout,
            preallocation,
            local_faces,
            local_face_dofs,
            scatter,
            generation,
        })
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn preallocation(&self) -> &Preallocation {
        &self.preallocation
    }

    pub fn scatter_map(&self) -> &ScatterMap {
        &self.scatter
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mesh(&self) -> &QuadMesh {
        &self.mesh
    }

    pub fn partition(&self) -> &ElementPartition {
        &self.partition
    }

    pub fn num_face_dofs(&self) -> usize {
        self.num_face_dofs
    }

    /// DOFs needed by this rank: the traces of all interior faces of owned elements.
    pub fn num_local_dofs(&self) -> usize {
        self.scatter.len()
    }

    /// DOFs owned by this rank.
    pub fn num_owned_dofs(&self) -> usize {
        self.layout.local_size()
    }

    pub fn num_global_dofs(&self) -> usize {
        self.layout.global_size()
    }

    pub fn local_faces(&self) -> &[usize] {
        &self.local_faces
    }

    /// Position of the first DOF of a face in the rank-local solution array.
    pub fn local_face_offset(&self, face: usize) -> Option<usize> {
        self.local_faces
            .binary_search(&face)
            .ok()
            .map(|position| position * self.num_face_dofs)
    }

    /// First global DOF of a face, if the face is known to this rank.
    pub fn global_face_offset(&self, face: usize) -> Option<usize> {
        self.local_faces
            .binary_search(&face)
            .ok()
            .map(|position| self.local_face_dofs[position])
    }

    /// Global DOFs of an owned element in local trace order, with `None` for the DOFs of
    /// boundary faces.
    pub fn element_dofs(&self, element: usize) -> Vec<Option<usize>> {
        let nf = self.num_face_dofs;
        self.mesh
            .element_faces(element)
            .iter()
            .flat_map(|&face| {
                let first = self.global_face_offset(face);
                (0..nf).map(move |k| first.map(|first| first + k))
            })
            .collect()
    }
}

/// Per-row counts of couplings to DOFs owned by this rank and by other ranks.
///
/// Two faces are coupled if they belong to a common element.
fn face_preallocation(
    mesh: &QuadMesh,
    partition: &ElementPartition,
    owned_faces: &[usize],
    nf: usize,
    rank: usize,
) -> Result<Preallocation, HdgError> {
    let mut diag = Vec::with_capacity(owned_faces.len() * nf);
    let mut offdiag = Vec::with_capacity(owned_faces.len() * nf);
    for &face in owned_faces {
        let coupled = mesh
            .face_elements(face)
            .into_iter()
            .flatten()
            .flat_map(|element| mesh.element_faces(element))
            .filter(|&other| !mesh.is_boundary_face(other))
            .unique();
        let (mut same, mut other) = (0, 0);
        for coupled_face in coupled {
            if partition.face_owner(mesh, coupled_face) == rank {
                same += nf;
            } else {
                other += nf;
            }
        }
        diag.extend(std::iter::repeat(same).take(nf));
        offdiag.extend(std::iter::repeat(other).take(nf));
    }
    Ok(Preallocation::new(diag, offdiag)?)
}
