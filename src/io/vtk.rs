use crate::local::{InteriorSolution, TraceElementAssembler};
use std::path::Path;
use vtkio::model::{
    Attribute, Attributes, ByteOrder, CellType, Cells, DataSet, Piece, UnstructuredGridPiece, Version, VertexNumbers,
    Vtk,
};

use crate::error::HdgError;

/// Builds a VTK dataset of the recovered solution on the elements of one rank.
///
/// Each element is sampled on a regular grid of reference points and exported as a patch of
/// quads that shares no points with neighboring elements, so that the discontinuities of the
/// solution are preserved.
pub struct HdgSolutionDataSetBuilder<'a, A: ?Sized> {
    assembler: &'a A,
    elements: &'a [(usize, InteriorSolution)],
    rank: usize,
    samples_per_dim: usize,
    // Only used for exporting directly to file
    title: Option<String>,
}

impl<'a, A> HdgSolutionDataSetBuilder<'a, A>
where
    A: TraceElementAssembler + ?Sized,
{
    pub fn new(assembler: &'a A, elements: &'a [(usize, InteriorSolution)], rank: usize) -> Self {
        Self {
            assembler,
            elements,
            rank,
            samples_per_dim: 3,
            title: None,
        }
    }

    /// Number of sample points along each edge of an element. At least two.
    pub fn with_samples_per_dim(self, samples: usize) -> Self {
        Self {
            samples_per_dim: samples.max(2),
            ..self
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..self
        }
    }

    pub fn build(&self) -> DataSet {
        let s = self.samples_per_dim;
        let cells_per_element = (s - 1) * (s - 1);

        let mut points = Vec::new();
        let mut u = Vec::new();
        let mut q = Vec::new();
        // Laid out as N, i_1, ..., i_N for every cell
        let mut vertices = Vec::new();

        for (element, interior) in self.elements {
            let first_point = (points.len() / 3) as u32;
            for a in 0..s {
                for b in 0..s {
                    let xi = [
                        -1.0 + 2.0 * b as f64 / (s - 1) as f64,
                        -1.0 + 2.0 * a as f64 / (s - 1) as f64,
                    ];
                    let value = self.assembler.evaluate(*element, interior, xi);
                    points.extend_from_slice(&[value.x[0], value.x[1], 0.0]);
                    u.push(value.u);
                    q.extend_from_slice(&[value.q[0], value.q[1], 0.0]);
                }
            }
            for a in 0..s - 1 {
                for b in 0..s - 1 {
                    let corner = first_point + (a * s + b) as u32;
                    let s = s as u32;
                    vertices.extend_from_slice(&[4, corner, corner + 1, corner + s + 1, corner + s]);
                }
            }
        }

        let num_cells = self.elements.len() * cells_per_element;
        let rank = vec![self.rank as f64; num_cells];
        let piece = UnstructuredGridPiece {
            points: points.into(),
            cells: Cells {
                cell_verts: VertexNumbers::Legacy {
                    num_cells: num_cells as u32,
                    vertices,
                },
                types: vec![CellType::Quad; num_cells],
            },
            data: Attributes {
                point: vec![
                    Attribute::scalars("u", 1).with_data(u),
                    Attribute::vectors("q").with_data(q),
                ],
                cell: vec![Attribute::scalars("rank", 1).with_data(rank)],
            },
        };

        DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(piece))],
        }
    }

    /// Writes the dataset as a legacy VTK file.
    pub fn export(&self, filename: impl AsRef<Path>) -> Result<(), HdgError> {
        let filepath = filename.as_ref();
        let fallback_title = filepath
            .file_stem()
            .map(|os_str| os_str.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        if let Some(dir) = filepath.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Vtk {
            version: Version { major: 4, minor: 1 },
            // Use the file name if no title is given
            title: self.title.clone().unwrap_or(fallback_title),
            byte_order: ByteOrder::BigEndian,
            data: self.build(),
            file_path: None,
        }
        .export(filepath)
        .map_err(|err| HdgError::Vtk(err.to_string()))
    }
}
