//! Recovery of the interior unknowns from the scattered trace solution.

use crate::dofs::DofSet;
use crate::error::HdgError;
use crate::local::{ElementErrors, InteriorSolution, TraceElementAssembler};
use hdg_linalg::LinalgError;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Interior unknowns of all owned elements of a rank.
#[derive(Debug, Clone)]
pub struct LocalSolution {
    /// Pairs of element index and interior solution, in element order.
    pub elements: Vec<(usize, InteriorSolution)>,
    /// Sum of the squared element errors of this rank.
    pub errors: ElementErrors,
}

/// Gathers the trace values of an element from the rank-local solution array. Boundary
/// faces take their prescribed values.
pub fn element_trace<A>(assembler: &A, dofs: &DofSet, local: &[f64], element: usize) -> Result<Vec<f64>, HdgError>
where
    A: TraceElementAssembler + ?Sized,
{
    let nf = dofs.num_face_dofs();
    let mut trace = Vec::with_capacity(4 * nf);
    for face in dofs.mesh().element_faces(element) {
        match dofs.local_face_offset(face) {
            Some(offset) => trace.extend_from_slice(&local[offset..offset + nf]),
            None if dofs.mesh().is_boundary_face(face) => trace.extend(assembler.trace_projection(face)),
            None => {
                return Err(HdgError::InconsistentDofCount(format!(
                    "face {face} of owned element {element} has no local DOFs"
                )))
            }
        }
    }
    Ok(trace)
}

/// Recovers the interior unknowns of every owned element. Purely local: no communication.
pub fn recover_interiors<A>(
    assembler: &A,
    dofs: &DofSet,
    local: &[f64],
    pool: &ThreadPool,
) -> Result<LocalSolution, HdgError>
where
    A: TraceElementAssembler + ?Sized,
{
    if local.len() != dofs.num_local_dofs() {
        return Err(LinalgError::DimensionMismatch {
            expected: dofs.num_local_dofs(),
            actual: local.len(),
        }
        .into());
    }

    let recovered: Vec<(usize, InteriorSolution, ElementErrors)> = pool.install(|| {
        dofs.partition()
            .owned_elements()
            .into_par_iter()
            .map(|element| {
                let trace = element_trace(assembler, dofs, local, element)?;
                let interior = assembler.recover_interior(element, &trace)?;
                let errors = assembler.element_errors(element, &interior);
                Ok((element, interior, errors))
            })
            .collect::<Result<_, HdgError>>()
    })?;

    let mut errors = ElementErrors::default();
    let elements = recovered
        .into_iter()
        .map(|(element, interior, element_errors)| {
            errors.u_squared += element_errors.u_squared;
            errors.q_squared += element_errors.q_squared;
            (element, interior)
        })
        .collect();
    Ok(LocalSolution { elements, errors })
}
