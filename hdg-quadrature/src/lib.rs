//! Quadrature rules for the reference interval and the reference quadrilateral.
//!
//! The rules are used by the HDG diffusion solver for volume integrals over elements and
//! line integrals over element faces. Rules are returned as `(weights, points)` pairs, and
//! all rules are defined on `[-1, 1]` (or its tensor products).

use std::fmt;
use std::fmt::{Display, Formatter};

pub mod tensor;
pub mod univariate;

pub use tensor::quadrilateral_gauss;
pub use univariate::{gauss, gauss_lobatto, legendre_values_and_derivatives};

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates that a rule satisfying the given requirements is not available.
    NoRuleAvailable,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable => {
                write!(f, "There is no quadrature rule satisfying the requirements available")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A two-dimensional point.
pub type Point2 = Point<2>;

/// A D-dimensional rule.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// A one-dimensional rule.
pub type Rule1d = Rule<1>;

/// A two-dimensional quadrature rule.
pub type Rule2d = Rule<2>;
