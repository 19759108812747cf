//! Polynomial bases on the reference quadrilateral and the reference face.

use crate::error::HdgError;
use hdg_quadrature::{gauss_lobatto, legendre_values_and_derivatives};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Basis used for the trace unknowns on every face.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceBasisKind {
    /// Modal Legendre polynomials.
    #[default]
    Legendre,
    /// Nodal polynomials interpolating at the Gauss-Lobatto points.
    Lagrange,
}

impl FromStr for FaceBasisKind {
    type Err = HdgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legendre" => Ok(Self::Legendre),
            "lagrange" => Ok(Self::Lagrange),
            _ => Err(HdgError::UnknownFaceBasis(s.to_string())),
        }
    }
}

impl fmt::Display for FaceBasisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legendre => write!(f, "legendre"),
            Self::Lagrange => write!(f, "lagrange"),
        }
    }
}

/// Tensor-product Legendre basis of `Q_p` on `[-1, 1]^2`.
///
/// Basis function `a * (p + 1) + b` is `P_a(xi) P_b(eta)`.
#[derive(Debug, Clone)]
pub struct ElementBasis {
    degree: usize,
}

impl ElementBasis {
    pub fn new(degree: usize) -> Self {
        Self { degree }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn num_functions(&self) -> usize {
        (self.degree + 1).pow(2)
    }

    /// Values and reference gradients of all basis functions at `xi`.
    pub fn evaluate(&self, xi: [f64; 2], values: &mut [f64], gradients: &mut [[f64; 2]]) {
        let n = self.degree + 1;
        assert_eq!(values.len(), n * n);
        assert_eq!(gradients.len(), n * n);

        let (mut px, mut dpx) = (vec![0.0; n], vec![0.0; n]);
        let (mut py, mut dpy) = (vec![0.0; n], vec![0.0; n]);
        legendre_values_and_derivatives(self.degree, xi[0], &mut px, &mut dpx);
        legendre_values_and_derivatives(self.degree, xi[1], &mut py, &mut dpy);

        for a in 0..n {
            for b in 0..n {
                let i = a * n + b;
                values[i] = px[a] * py[b];
                gradients[i] = [dpx[a] * py[b], px[a] * dpy[b]];
            }
        }
    }
}

/// Basis of `P_p` on the reference face `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct FaceBasis {
    degree: usize,
    kind: FaceBasisKind,
    // Interpolation nodes of the nodal basis
    nodes: Vec<f64>,
}

impl FaceBasis {
    pub fn new(degree: usize, kind: FaceBasisKind) -> Result<Self, HdgError> {
        let nodes = match kind {
            FaceBasisKind::Legendre => Vec::new(),
            FaceBasisKind::Lagrange if degree == 0 => vec![0.0],
            FaceBasisKind::Lagrange => {
                let (_, points) = gauss_lobatto(degree + 1)
                    .map_err(|err| HdgError::InvalidConfig(format!("face basis of degree {degree}: {err}")))?;
                points.into_iter().map(|[x]| x).collect()
            }
        };
        Ok(Self { degree, kind, nodes })
    }

    pub fn kind(&self) -> FaceBasisKind {
        self.kind
    }

    pub fn num_functions(&self) -> usize {
        self.degree + 1
    }

    pub fn evaluate(&self, s: f64, values: &mut [f64]) {
        assert_eq!(values.len(), self.num_functions());
        match self.kind {
            FaceBasisKind::Legendre => {
                let mut derivatives = vec![0.0; values.len()];
                legendre_values_and_derivatives(self.degree, s, values, &mut derivatives);
            }
            FaceBasisKind::Lagrange => {
                for (k, value) in values.iter_mut().enumerate() {
                    *value = self
                        .nodes
                        .iter()
                        .enumerate()
                        .filter(|&(m, _)| m != k)
                        .map(|(_, &node)| (s - node) / (self.nodes[k] - node))
                        .product();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ElementBasis, FaceBasis, FaceBasisKind};
    use matrixcompare::assert_scalar_eq;

    #[test]
    fn face_basis_kind_parsing() {
        assert_eq!("legendre".parse::<FaceBasisKind>().unwrap(), FaceBasisKind::Legendre);
        assert_eq!("Lagrange".parse::<FaceBasisKind>().unwrap(), FaceBasisKind::Lagrange);
        assert!("hermite".parse::<FaceBasisKind>().is_err());
        assert_eq!(FaceBasisKind::default().to_string(), "legendre");
    }

    #[test]
    fn lagrange_face_basis_is_nodal() {
        let basis = FaceBasis::new(2, FaceBasisKind::Lagrange).unwrap();
        let mut values = [0.0; 3];
        for (k, node) in [-1.0, 0.0, 1.0].into_iter().enumerate() {
            basis.evaluate(node, &mut values);
            for (m, &value) in values.iter().enumerate() {
                let expected = if m == k { 1.0 } else { 0.0 };
                assert_scalar_eq!(value, expected, comp = abs, tol = 1e-14);
            }
        }

        let constant = FaceBasis::new(0, FaceBasisKind::Lagrange).unwrap();
        let mut value = [0.0];
        constant.evaluate(0.7, &mut value);
        assert_eq!(value, [1.0]);
    }

    #[test]
    fn element_basis_is_tensor_product() {
        let basis = ElementBasis::new(1);
        let mut values = [0.0; 4];
        let mut gradients = [[0.0; 2]; 4];
        basis.evaluate([0.5, -0.25], &mut values, &mut gradients);
        // Function 3 is xi * eta
        assert_scalar_eq!(values[3], -0.125, comp = abs, tol = 1e-15);
        assert_scalar_eq!(gradients[3][0], -0.25, comp = abs, tol = 1e-15);
        assert_scalar_eq!(gradients[3][1], 0.5, comp = abs, tol = 1e-15);
        // Function 1 is eta
        assert_scalar_eq!(values[1], -0.25, comp = abs, tol = 1e-15);
    }
}
