//! Assembly of the global trace system from condensed element contributions.

use crate::dofs::DofSet;
use crate::error::HdgError;
use crate::local::TraceElementAssembler;
use crate::solve::GlobalSystem;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use rayon::ThreadPool;

/// Condensed system of one element, restricted to its interior-face DOFs.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementContribution {
    pub element: usize,
    /// Global DOF indices of the rows and columns.
    pub dofs: Vec<usize>,
    /// Row-major.
    pub matrix: Vec<f64>,
    pub rhs: Vec<f64>,
}

/// Computes the contribution of an owned element.
///
/// Trace DOFs on boundary faces are eliminated: their prescribed values are moved to the
/// right-hand side.
pub fn condense_element<A>(assembler: &A, dofs: &DofSet, element: usize) -> Result<ElementContribution, HdgError>
where
    A: TraceElementAssembler + ?Sized,
{
    let n = assembler.num_element_trace_dofs();
    let nf = assembler.num_face_dofs();
    let mut k = DMatrix::zeros(n, n);
    let mut r = DVector::zeros(n);
    assembler.assemble_element_system_into(element, (&mut k).into(), (&mut r).into())?;

    let element_dofs = dofs.element_dofs(element);
    let mut prescribed = DVector::zeros(n);
    for (l, &face) in dofs.mesh().element_faces(element).iter().enumerate() {
        if dofs.mesh().is_boundary_face(face) {
            let g = assembler.trace_projection(face);
            prescribed.rows_mut(l * nf, nf).copy_from_slice(&g);
        }
    }
    r -= &k * &prescribed;

    let (local, global): (Vec<usize>, Vec<usize>) = element_dofs
        .iter()
        .enumerate()
        .filter_map(|(i, dof)| dof.map(|dof| (i, dof)))
        .unzip();
    let matrix = local
        .iter()
        .flat_map(|&i| local.iter().map(move |&j| (i, j)))
        .map(|(i, j)| k[(i, j)])
        .collect();
    let rhs = local.iter().map(|&i| r[i]).collect();

    Ok(ElementContribution {
        element,
        dofs: global,
        matrix,
        rhs,
    })
}

/// Adds the contributions of all owned elements to the global matrix and right-hand side, and
/// inserts the projected exact solution for the owned DOFs.
///
/// Element systems are computed in parallel on `pool`, but added in element order, so
/// repeated assembly gives bit-identical results. Not collective: the system must be
/// finalized afterwards.
pub fn assemble_global_system<A>(
    assembler: &A,
    dofs: &DofSet,
    system: &mut GlobalSystem,
    pool: &ThreadPool,
) -> Result<(), HdgError>
where
    A: TraceElementAssembler + ?Sized,
{
    let elements = dofs.partition().owned_elements();
    let contributions: Vec<ElementContribution> = pool.install(|| {
        elements
            .into_par_iter()
            .map(|element| condense_element(assembler, dofs, element))
            .collect::<Result<_, _>>()
    })?;

    for contribution in &contributions {
        system
            .matrix
            .add_values(&contribution.dofs, &contribution.dofs, &contribution.matrix)?;
        system.rhs.add_values(&contribution.dofs, &contribution.rhs)?;
    }

    let layout = dofs.layout().clone();
    for &face in dofs.local_faces() {
        let Some(first) = dofs.global_face_offset(face) else {
            continue;
        };
        if layout.is_owned(first) {
            let indices: Vec<usize> = (first..first + dofs.num_face_dofs()).collect();
            system
                .exact_solution
                .set_values(&indices, &assembler.trace_projection(face))?;
        }
    }
    log::debug!("added {} element contributions", contributions.len());
    Ok(())
}
