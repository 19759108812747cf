//! Structured quadrilateral meshes of the unit square and their partition across ranks.
//!
//! Elements are axis-aligned squares, numbered row by row: element `(i, j)` has index
//! `j * nx + i`. Faces (edges) are numbered horizontal faces first, then vertical faces:
//!
//! - horizontal face `(i, j)` at `y = j / ny`, spanning `[i / nx, (i + 1) / nx]`, has index
//!   `j * nx + i`,
//! - vertical face `(i, j)` at `x = i / nx`, spanning `[j / ny, (j + 1) / ny]`, has index
//!   `nx * (ny + 1) + j * (nx + 1) + i`.
//!
//! The local faces of an element are ordered bottom, right, top, left. Each face is
//! parametrized in the direction of increasing global coordinate, so both adjacent elements
//! see the same orientation.

use crate::error::HdgError;
use std::ops::Range;

/// Local face index of an element.
pub const BOTTOM: usize = 0;
pub const RIGHT: usize = 1;
pub const TOP: usize = 2;
pub const LEFT: usize = 3;

/// Outward unit normals of the local faces.
pub const FACE_NORMALS: [[f64; 2]; 4] = [[0.0, -1.0], [1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]];

/// A uniform mesh of `[0, 1]^2` with `nx * ny` square elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadMesh {
    nx: usize,
    ny: usize,
}

impl QuadMesh {
    /// # Panics
    ///
    /// Panics if `divisions` is zero.
    pub fn unit_square(divisions: usize) -> Self {
        assert!(divisions > 0, "number of divisions must be positive");
        Self {
            nx: divisions,
            ny: divisions,
        }
    }

    /// The mesh obtained by uniformly refining a mesh with `base_divisions` elements per side
    /// `level` times.
    ///
    /// Fails if `base_divisions` is zero or the face count of the refined mesh overflows.
    pub fn refined(base_divisions: usize, level: usize) -> Result<Self, HdgError> {
        let divisions = u32::try_from(level)
            .ok()
            .and_then(|level| 1usize.checked_shl(level))
            .and_then(|factor| base_divisions.checked_mul(factor))
            .filter(|&n| n > 0 && n.checked_mul(2).and_then(|m| m.checked_mul(n + 1)).is_some());
        divisions.map(Self::unit_square).ok_or_else(|| {
            HdgError::InvalidConfig(format!(
                "cannot refine {base_divisions} base divisions to level {level}"
            ))
        })
    }

    pub fn divisions(&self) -> [usize; 2] {
        [self.nx, self.ny]
    }

    pub fn num_elements(&self) -> usize {
        self.nx * self.ny
    }

    fn num_horizontal_faces(&self) -> usize {
        self.nx * (self.ny + 1)
    }

    pub fn num_faces(&self) -> usize {
        self.num_horizontal_faces() + (self.nx + 1) * self.ny
    }

    pub fn num_interior_faces(&self) -> usize {
        self.nx * (self.ny - 1) + (self.nx - 1) * self.ny
    }

    /// Element edge lengths `[hx, hy]`.
    pub fn element_size(&self) -> [f64; 2] {
        [1.0 / self.nx as f64, 1.0 / self.ny as f64]
    }

    /// Lower left corner of an element.
    pub fn element_origin(&self, element: usize) -> [f64; 2] {
        let (i, j) = (element % self.nx, element / self.nx);
        let [hx, hy] = self.element_size();
        [i as f64 * hx, j as f64 * hy]
    }

    /// Global faces of an element in local order (bottom, right, top, left).
    pub fn element_faces(&self, element: usize) -> [usize; 4] {
        let (i, j) = (element % self.nx, element / self.nx);
        let horizontal = |i, j| j * self.nx + i;
        let vertical = |i, j| self.num_horizontal_faces() + j * (self.nx + 1) + i;
        [horizontal(i, j), vertical(i + 1, j), horizontal(i, j + 1), vertical(i, j)]
    }

    /// Elements adjacent to a face, ordered by increasing element index.
    pub fn face_elements(&self, face: usize) -> [Option<usize>; 2] {
        let element = |i, j| j * self.nx + i;
        if face < self.num_horizontal_faces() {
            let (i, j) = (face % self.nx, face / self.nx);
            let below = (j > 0).then(|| element(i, j - 1));
            let above = (j < self.ny).then(|| element(i, j));
            [below, above]
        } else {
            let face = face - self.num_horizontal_faces();
            let (i, j) = (face % (self.nx + 1), face / (self.nx + 1));
            let left = (i > 0).then(|| element(i - 1, j));
            let right = (i < self.nx).then(|| element(i, j));
            [left, right]
        }
    }

    pub fn is_boundary_face(&self, face: usize) -> bool {
        self.face_elements(face).iter().any(Option::is_none)
    }

    /// The adjacent element with the smallest index.
    pub fn first_element_of_face(&self, face: usize) -> usize {
        match self.face_elements(face) {
            [Some(first), _] | [None, Some(first)] => first,
            [None, None] => unreachable!("every face has at least one adjacent element"),
        }
    }

    /// Start point of a face and the direction of its parametrization scaled by the face
    /// length.
    pub fn face_geometry(&self, face: usize) -> ([f64; 2], [f64; 2]) {
        let [hx, hy] = self.element_size();
        if face < self.num_horizontal_faces() {
            let (i, j) = (face % self.nx, face / self.nx);
            ([i as f64 * hx, j as f64 * hy], [hx, 0.0])
        } else {
            let face = face - self.num_horizontal_faces();
            let (i, j) = (face % (self.nx + 1), face / (self.nx + 1));
            ([i as f64 * hx, j as f64 * hy], [0.0, hy])
        }
    }
}

/// Contiguous block partition of the elements of a mesh across the ranks of a group.
///
/// Faces are owned by the owner of their adjacent element with the smallest index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPartition {
    rank: usize,
    offsets: Vec<usize>,
}

impl ElementPartition {
    /// Assigns `num_elements / size` elements to every rank, with the first
    /// `num_elements % size` ranks receiving one additional element.
    pub fn new(mesh: &QuadMesh, rank: usize, size: usize) -> Self {
        let n = mesh.num_elements();
        let (base, remainder) = (n / size, n % size);
        let mut offsets = vec![0];
        for p in 0..size {
            offsets.push(offsets[p] + base + usize::from(p < remainder));
        }
        Self { rank, offsets }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn owned_elements(&self) -> Range<usize> {
        self.offsets[self.rank]..self.offsets[self.rank + 1]
    }

    pub fn element_owner(&self, element: usize) -> usize {
        self.offsets.partition_point(|&offset| offset <= element) - 1
    }

    pub fn face_owner(&self, mesh: &QuadMesh, face: usize) -> usize {
        self.element_owner(mesh.first_element_of_face(face))
    }
}

#[cfg(test)]
mod tests {
    use super::{ElementPartition, QuadMesh, BOTTOM, LEFT, RIGHT, TOP};

    #[test]
    fn element_face_adjacency_is_consistent() {
        let mesh = QuadMesh::unit_square(3);
        assert_eq!(mesh.num_faces(), 24);
        assert_eq!(mesh.num_interior_faces(), 12);

        for element in 0..mesh.num_elements() {
            for face in mesh.element_faces(element) {
                assert!(mesh.face_elements(face).contains(&Some(element)));
            }
        }

        // Element (1, 1) is the center element
        let faces = mesh.element_faces(4);
        assert_eq!(mesh.face_elements(faces[BOTTOM]), [Some(1), Some(4)]);
        assert_eq!(mesh.face_elements(faces[TOP]), [Some(4), Some(7)]);
        assert_eq!(mesh.face_elements(faces[LEFT]), [Some(3), Some(4)]);
        assert_eq!(mesh.face_elements(faces[RIGHT]), [Some(4), Some(5)]);

        let boundary = (0..mesh.num_faces()).filter(|&f| mesh.is_boundary_face(f)).count();
        assert_eq!(boundary, 12);
    }

    #[test]
    fn refinement_doubles_divisions() {
        assert_eq!(QuadMesh::refined(2, 0).unwrap().divisions(), [2, 2]);
        assert_eq!(QuadMesh::refined(2, 3).unwrap().divisions(), [16, 16]);
        assert!(QuadMesh::refined(0, 1).is_err());
        assert!(QuadMesh::refined(2, 63).is_err());
        assert!(QuadMesh::refined(2, 200).is_err());
    }

    #[test]
    fn partition_is_contiguous_and_covering() {
        let mesh = QuadMesh::unit_square(3);
        let partitions: Vec<_> = (0..4).map(|rank| ElementPartition::new(&mesh, rank, 4)).collect();
        let mut covered = vec![0; mesh.num_elements()];
        for partition in &partitions {
            for element in partition.owned_elements() {
                covered[element] += 1;
                assert_eq!(partition.element_owner(element), partition.rank());
            }
        }
        assert!(covered.iter().all(|&count| count == 1));
        assert_eq!(partitions[0].owned_elements(), 0..3);
        assert_eq!(partitions[3].owned_elements(), 7..9);
    }
}
