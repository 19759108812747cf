//! Element-local HDG operators for the diffusion problem
//!
//! ```text
//!   kappa^-1 q + grad u = 0,   div q = f   in [0, 1]^2,
//!                        u = g              on the boundary.
//! ```
//!
//! On every element the flux `q` and the scalar `u` are expanded in `Q_p`, and the trace
//! `lambda` of `u` on each face in `P_p`. With the numerical flux
//! `q_hat . n = q . n + tau (u - lambda)` the local equations read
//!
//! ```text
//!   [  A   B ] [Q]   [C]          [0]
//!   [ -B^T D ] [U] + [E] Lambda = [F],
//! ```
//!
//! and flux continuity across faces contributes `C^T Q - E^T U + G Lambda` for every element.
//! Eliminating `Q` and `U` gives the condensed element matrix `K = C_row M^-1 C_col - G` acting
//! on the trace unknowns only, which is symmetric positive semi-definite.

use crate::basis::{ElementBasis, FaceBasis, FaceBasisKind};
use crate::error::HdgError;
use crate::mesh::{QuadMesh, FACE_NORMALS};
use crate::problem::ExactSolution;
use hdg_linalg::LinalgError;
use hdg_quadrature::{gauss, quadrilateral_gauss, Rule};
use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorViewMut};
use std::sync::Arc;

/// Interior unknowns of one element.
#[derive(Debug, Clone, PartialEq)]
pub struct InteriorSolution {
    /// Coefficients of the two flux components.
    pub q: [DVector<f64>; 2],
    pub u: DVector<f64>,
}

/// Squared L2 errors on one element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ElementErrors {
    pub u_squared: f64,
    pub q_squared: f64,
}

/// Values of the recovered fields at a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointValues {
    pub x: [f64; 2],
    pub u: f64,
    pub q: [f64; 2],
}

/// Element-level operations of a hybridized method whose global unknowns live on faces.
///
/// Trace unknowns of an element are ordered face by face, following the local face order of
/// [`QuadMesh::element_faces`], with [`num_face_dofs`](Self::num_face_dofs) unknowns per face.
pub trait TraceElementAssembler: Sync {
    fn num_face_dofs(&self) -> usize;

    fn num_element_trace_dofs(&self) -> usize {
        4 * self.num_face_dofs()
    }

    /// Computes the condensed trace matrix and load vector of an element.
    fn assemble_element_system_into(
        &self,
        element: usize,
        matrix: DMatrixViewMut<f64>,
        rhs: DVectorViewMut<f64>,
    ) -> Result<(), HdgError>;

    /// Coefficients of the L2 projection of the exact solution onto the space of a face.
    ///
    /// On boundary faces this is the prescribed Dirichlet trace.
    fn trace_projection(&self, face: usize) -> Vec<f64>;

    /// Recovers the interior unknowns of an element from its trace values.
    fn recover_interior(&self, element: usize, trace: &[f64]) -> Result<InteriorSolution, HdgError>;

    fn element_errors(&self, element: usize, interior: &InteriorSolution) -> ElementErrors;

    /// Evaluates the recovered fields at a point of the reference element.
    fn evaluate(&self, element: usize, interior: &InteriorSolution, xi: [f64; 2]) -> PointValues;
}

struct ElementOperators {
    /// `[[A, B], [-B^T, D]]`
    m: DMatrix<f64>,
    /// `[C; E]`
    c_col: DMatrix<f64>,
    /// `[C^T, -E^T]`
    c_row: DMatrix<f64>,
    g: DMatrix<f64>,
    /// `[0; 0; F]`
    load: DVector<f64>,
}

/// Reference basis values tabulated at quadrature points.
struct BasisTable {
    values: Vec<Vec<f64>>,
    gradients: Vec<Vec<[f64; 2]>>,
}

impl BasisTable {
    fn tabulate(basis: &ElementBasis, points: impl IntoIterator<Item = [f64; 2]>) -> Self {
        let n = basis.num_functions();
        let (values, gradients) = points
            .into_iter()
            .map(|xi| {
                let mut values = vec![0.0; n];
                let mut gradients = vec![[0.0; 2]; n];
                basis.evaluate(xi, &mut values, &mut gradients);
                (values, gradients)
            })
            .unzip();
        Self { values, gradients }
    }
}

/// Maps a point on the reference face to the reference element, for the given local face.
fn trace_point(local_face: usize, s: f64) -> [f64; 2] {
    match local_face {
        0 => [s, -1.0],
        1 => [1.0, s],
        2 => [s, 1.0],
        _ => [-1.0, s],
    }
}

/// HDG discretization of the diffusion problem on a [`QuadMesh`].
pub struct HdgDiffusionAssembler {
    mesh: QuadMesh,
    problem: Arc<dyn ExactSolution>,
    element_basis: ElementBasis,
    face_basis: FaceBasis,
    tau: f64,
    kappa: f64,
    volume_rule: Rule<2>,
    face_rule: Rule<1>,
    error_rule: Rule<2>,
    volume_table: BasisTable,
    /// Element basis traced onto each local face, at the face quadrature points.
    trace_tables: Vec<BasisTable>,
    face_values: Vec<Vec<f64>>,
    face_mass_inverse: DMatrix<f64>,
}

impl HdgDiffusionAssembler {
    pub fn new(
        mesh: QuadMesh,
        problem: Arc<dyn ExactSolution>,
        degree: usize,
        face_basis: FaceBasisKind,
        tau: f64,
    ) -> Result<Self, HdgError> {
        if !(tau > 0.0) {
            return Err(HdgError::InvalidConfig(format!("stabilization must be positive, got {tau}")));
        }
        let element_basis = ElementBasis::new(degree);
        let face_basis = FaceBasis::new(degree, face_basis)?;

        let volume_rule = quadrilateral_gauss(degree + 2);
        let face_rule = gauss(degree + 2);
        let error_rule = quadrilateral_gauss(degree + 3);

        let volume_table = BasisTable::tabulate(&element_basis, volume_rule.1.iter().copied());
        let trace_tables = (0..4)
            .map(|l| BasisTable::tabulate(&element_basis, face_rule.1.iter().map(|&[s]| trace_point(l, s))))
            .collect();

        let nf = face_basis.num_functions();
        let face_values: Vec<Vec<f64>> = face_rule
            .1
            .iter()
            .map(|&[s]| {
                let mut values = vec![0.0; nf];
                face_basis.evaluate(s, &mut values);
                values
            })
            .collect();

        let mut face_mass = DMatrix::zeros(nf, nf);
        for (w, mu) in face_rule.0.iter().zip(&face_values) {
            let mu = DVector::from_column_slice(mu);
            face_mass += *w * &mu * mu.transpose();
        }
        let face_mass_inverse = face_mass
            .try_inverse()
            .ok_or_else(|| HdgError::InvalidConfig(format!("singular face mass matrix for degree {degree}")))?;

        Ok(Self {
            mesh,
            problem,
            element_basis,
            face_basis,
            tau,
            kappa: 1.0,
            volume_rule,
            face_rule,
            error_rule,
            volume_table,
            trace_tables,
            face_values,
            face_mass_inverse,
        })
    }

    /// Sets a constant diffusivity. The source term is scaled so that the exact solution
    /// remains a solution.
    pub fn with_diffusivity(self, kappa: f64) -> Result<Self, HdgError> {
        if !(kappa > 0.0) {
            return Err(HdgError::InvalidConfig(format!("diffusivity must be positive, got {kappa}")));
        }
        Ok(Self { kappa, ..self })
    }

    pub fn mesh(&self) -> &QuadMesh {
        &self.mesh
    }

    pub fn degree(&self) -> usize {
        self.element_basis.degree()
    }

    pub fn face_basis(&self) -> FaceBasisKind {
        self.face_basis.kind()
    }

    fn to_physical(&self, element: usize, xi: [f64; 2]) -> [f64; 2] {
        let [x0, y0] = self.mesh.element_origin(element);
        let [hx, hy] = self.mesh.element_size();
        [x0 + 0.5 * hx * (xi[0] + 1.0), y0 + 0.5 * hy * (xi[1] + 1.0)]
    }

    fn element_operators(&self, element: usize) -> ElementOperators {
        let n = self.element_basis.num_functions();
        let nf = self.face_basis.num_functions();
        let [hx, hy] = self.mesh.element_size();
        let jacobian_det = 0.25 * hx * hy;
        let gradient_scale = [2.0 / hx, 2.0 / hy];
        let (tau, kappa) = (self.tau, self.kappa);

        let mut m = DMatrix::zeros(3 * n, 3 * n);
        let mut c_col = DMatrix::zeros(3 * n, 4 * nf);
        let mut g = DMatrix::zeros(4 * nf, 4 * nf);
        let mut load = DVector::zeros(3 * n);

        let (weights, points) = &self.volume_rule;
        for (q, (w, xi)) in weights.iter().zip(points).enumerate() {
            let weight = w * jacobian_det;
            let psi = &self.volume_table.values[q];
            let grad_psi = &self.volume_table.gradients[q];
            let f = kappa * self.problem.source(self.to_physical(element, *xi));

            for i in 0..n {
                load[2 * n + i] += weight * f * psi[i];
                for j in 0..n {
                    let mass = weight * psi[i] * psi[j] / kappa;
                    m[(i, j)] += mass;
                    m[(n + i, n + j)] += mass;
                    for d in 0..2 {
                        let b = -weight * psi[j] * grad_psi[i][d] * gradient_scale[d];
                        m[(d * n + i, 2 * n + j)] += b;
                        m[(2 * n + j, d * n + i)] -= b;
                    }
                }
            }
        }

        for (l, normal) in FACE_NORMALS.iter().enumerate() {
            let length = if l % 2 == 0 { hx } else { hy };
            let table = &self.trace_tables[l];
            for (q, w) in self.face_rule.0.iter().enumerate() {
                let weight = 0.5 * w * length;
                let psi = &table.values[q];
                let mu = &self.face_values[q];
                for i in 0..n {
                    for j in 0..n {
                        m[(2 * n + i, 2 * n + j)] += tau * weight * psi[i] * psi[j];
                    }
                    for k in 0..nf {
                        let col = l * nf + k;
                        for d in 0..2 {
                            c_col[(d * n + i, col)] += weight * mu[k] * psi[i] * normal[d];
                        }
                        c_col[(2 * n + i, col)] -= tau * weight * mu[k] * psi[i];
                    }
                }
                for k in 0..nf {
                    for r in 0..nf {
                        g[(l * nf + k, l * nf + r)] -= tau * weight * mu[k] * mu[r];
                    }
                }
            }
        }

        let mut c_row = c_col.transpose();
        c_row.columns_mut(2 * n, n).neg_mut();

        ElementOperators {
            m,
            c_col,
            c_row,
            g,
            load,
        }
    }
}

impl TraceElementAssembler for HdgDiffusionAssembler {
    fn num_face_dofs(&self) -> usize {
        self.face_basis.num_functions()
    }

    fn assemble_element_system_into(
        &self,
        element: usize,
        mut matrix: DMatrixViewMut<f64>,
        mut rhs: DVectorViewMut<f64>,
    ) -> Result<(), HdgError> {
        let ops = self.element_operators(element);
        let num_trace = ops.c_col.ncols();

        // Solve for the trace coupling and the load with a single factorization
        let mut stacked = DMatrix::zeros(ops.m.nrows(), num_trace + 1);
        stacked.columns_mut(0, num_trace).copy_from(&ops.c_col);
        stacked.column_mut(num_trace).copy_from(&ops.load);
        let solved = ops
            .m
            .lu()
            .solve(&stacked)
            .ok_or(HdgError::SingularElement { element })?;

        let k = &ops.c_row * solved.columns(0, num_trace) - &ops.g;
        matrix.copy_from(&((&k + k.transpose()) * 0.5));
        rhs.copy_from(&(&ops.c_row * solved.column(num_trace)));
        Ok(())
    }

    fn trace_projection(&self, face: usize) -> Vec<f64> {
        let (start, direction) = self.mesh.face_geometry(face);
        let mut moments = DVector::zeros(self.face_basis.num_functions());
        for ((w, &[s]), mu) in self.face_rule.0.iter().zip(&self.face_rule.1).zip(&self.face_values) {
            let t = 0.5 * (s + 1.0);
            let x = [start[0] + t * direction[0], start[1] + t * direction[1]];
            let g = self.problem.u(x);
            for (moment, mu_k) in moments.iter_mut().zip(mu) {
                *moment += w * g * mu_k;
            }
        }
        (&self.face_mass_inverse * moments).as_slice().to_vec()
    }

    fn recover_interior(&self, element: usize, trace: &[f64]) -> Result<InteriorSolution, HdgError> {
        let ops = self.element_operators(element);
        if trace.len() != ops.c_col.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: ops.c_col.ncols(),
                actual: trace.len(),
            }
            .into());
        }
        let lambda = DVector::from_column_slice(trace);
        let rhs = &ops.load - &ops.c_col * lambda;
        let solution = ops
            .m
            .lu()
            .solve(&rhs)
            .ok_or(HdgError::SingularElement { element })?;

        let n = self.element_basis.num_functions();
        Ok(InteriorSolution {
            q: [solution.rows(0, n).into_owned(), solution.rows(n, n).into_owned()],
            u: solution.rows(2 * n, n).into_owned(),
        })
    }

    fn element_errors(&self, element: usize, interior: &InteriorSolution) -> ElementErrors {
        let [hx, hy] = self.mesh.element_size();
        let jacobian_det = 0.25 * hx * hy;
        let mut errors = ElementErrors::default();
        for (w, xi) in self.error_rule.0.iter().zip(&self.error_rule.1) {
            let value = self.evaluate(element, interior, *xi);
            let grad_u = self.problem.grad_u(value.x);
            let u_error = self.problem.u(value.x) - value.u;
            let q_error = [
                -self.kappa * grad_u[0] - value.q[0],
                -self.kappa * grad_u[1] - value.q[1],
            ];
            errors.u_squared += w * jacobian_det * u_error * u_error;
            errors.q_squared += w * jacobian_det * (q_error[0] * q_error[0] + q_error[1] * q_error[1]);
        }
        errors
    }

    fn evaluate(&self, element: usize, interior: &InteriorSolution, xi: [f64; 2]) -> PointValues {
        let n = self.element_basis.num_functions();
        let mut psi = vec![0.0; n];
        let mut gradients = vec![[0.0; 2]; n];
        self.element_basis.evaluate(xi, &mut psi, &mut gradients);
        let psi = DVector::from_vec(psi);
        PointValues {
            x: self.to_physical(element, xi),
            u: interior.u.dot(&psi),
            q: [interior.q[0].dot(&psi), interior.q[1].dot(&psi)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HdgDiffusionAssembler, TraceElementAssembler};
    use crate::basis::FaceBasisKind;
    use crate::mesh::QuadMesh;
    use crate::problem::LinearSolution;
    use matrixcompare::assert_matrix_eq;
    use nalgebra::{DMatrix, DVector};
    use std::sync::Arc;

    fn assembler(degree: usize, kind: FaceBasisKind) -> HdgDiffusionAssembler {
        HdgDiffusionAssembler::new(QuadMesh::unit_square(2), Arc::new(LinearSolution), degree, kind, 1.0).unwrap()
    }

    #[test]
    fn condensed_matrix_is_symmetric_positive_semidefinite() {
        for kind in [FaceBasisKind::Legendre, FaceBasisKind::Lagrange] {
            for degree in 0..3 {
                let assembler = assembler(degree, kind);
                let n = assembler.num_element_trace_dofs();
                let mut k = DMatrix::zeros(n, n);
                let mut rhs = DVector::zeros(n);
                assembler
                    .assemble_element_system_into(3, (&mut k).into(), (&mut rhs).into())
                    .unwrap();

                assert_matrix_eq!(k, k.transpose(), comp = abs, tol = 1e-12);
                let min_eigenvalue = k.clone().symmetric_eigenvalues().min();
                assert!(min_eigenvalue > -1e-10, "degree {degree}: eigenvalue {min_eigenvalue}");
            }
        }
    }

    #[test]
    fn linear_solution_is_recovered_exactly_from_its_trace() {
        for kind in [FaceBasisKind::Legendre, FaceBasisKind::Lagrange] {
            let assembler = assembler(1, kind);
            let element = 2;
            let trace: Vec<f64> = assembler
                .mesh()
                .element_faces(element)
                .iter()
                .flat_map(|&face| assembler.trace_projection(face))
                .collect();
            let interior = assembler.recover_interior(element, &trace).unwrap();
            let errors = assembler.element_errors(element, &interior);
            assert!(errors.u_squared < 1e-24, "{errors:?}");
            assert!(errors.q_squared < 1e-22, "{errors:?}");
        }
    }

    #[test]
    fn diffusivity_scales_the_recovered_flux() {
        let assembler = assembler(1, FaceBasisKind::Legendre).with_diffusivity(4.0).unwrap();
        let element = 1;
        let trace: Vec<f64> = assembler
            .mesh()
            .element_faces(element)
            .iter()
            .flat_map(|&face| assembler.trace_projection(face))
            .collect();
        let interior = assembler.recover_interior(element, &trace).unwrap();
        let value = assembler.evaluate(element, &interior, [0.3, -0.2]);
        // q = -kappa grad(x + y)
        let q = DVector::from_row_slice(&value.q);
        assert_matrix_eq!(q, DVector::from_element(2, -4.0), comp = abs, tol = 1e-10);
        assert!((value.u - value.x[0] - value.x[1]).abs() < 1e-10);

        assert!(assembler.with_diffusivity(0.0).is_err());
    }

    #[test]
    fn recovery_rejects_wrong_trace_length() {
        let assembler = assembler(1, FaceBasisKind::Legendre);
        assert!(assembler.recover_interior(0, &[0.0; 3]).is_err());
    }
}
