//! Row-distributed sparse matrices with explicit preallocation.

use crate::comm::{CommExt, Communicator};
use crate::error::LinalgError;
use crate::layout::Layout;
use crate::vector::DistVector;
use bytemuck::{Pod, Zeroable};
use nalgebra_sparse::CsrMatrix;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Per-row capacities of the diagonal block (columns owned by the same rank as the row)
/// and of the off-diagonal block (columns owned by other ranks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preallocation {
    pub diag: Vec<usize>,
    pub offdiag: Vec<usize>,
}

impl Preallocation {
    pub fn new(diag: Vec<usize>, offdiag: Vec<usize>) -> Result<Self, LinalgError> {
        if diag.len() != offdiag.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: diag.len(),
                actual: offdiag.len(),
            });
        }
        Ok(Self { diag, offdiag })
    }

    pub fn num_rows(&self) -> usize {
        self.diag.len()
    }

    /// Total number of entries row `local_row` may hold.
    pub fn row_capacity(&self, local_row: usize) -> usize {
        self.diag[local_row] + self.offdiag[local_row]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct StashedEntry {
    row: u64,
    col: u64,
    value: f64,
}

#[derive(Debug, Clone, Default)]
struct RowBuilder {
    // Sorted global column indices
    cols: Vec<usize>,
    values: Vec<f64>,
    num_diag: usize,
    num_offdiag: usize,
}

/// Indices of owned entries that other ranks need in order to multiply with their
/// off-diagonal blocks.
#[derive(Debug, Clone)]
struct GhostExchange {
    // For each destination rank, the local indices of the entries to send
    send_indices: Vec<Vec<usize>>,
    num_ghosts: usize,
}

impl GhostExchange {
    fn build<C: Communicator + ?Sized>(comm: &C, layout: &Layout, ghost_columns: &[usize]) -> Result<Self, LinalgError> {
        let mut requests = vec![Vec::new(); comm.size()];
        for &col in ghost_columns {
            requests[layout.owner_of(col)?].push(col as u64);
        }
        let incoming = comm.all_to_all(requests)?;
        let send_indices = incoming
            .into_iter()
            .map(|requested| {
                requested
                    .into_iter()
                    .map(|global| {
                        let global = global as usize;
                        layout.to_local(global).ok_or(LinalgError::NotOwned {
                            index: global,
                            rank: layout.rank(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            send_indices,
            num_ghosts: ghost_columns.len(),
        })
    }

    /// Collects ghost values in the order of the sorted ghost columns. Collective.
    fn gather<C: Communicator + ?Sized>(&self, comm: &C, owned: &[f64]) -> Result<Vec<f64>, LinalgError> {
        let outgoing = self
            .send_indices
            .iter()
            .map(|indices| indices.iter().map(|&i| owned[i]).collect())
            .collect();
        // Sorted ghost columns are grouped by owner in increasing rank order
        let ghosts: Vec<f64> = comm.all_to_all::<f64>(outgoing)?.into_iter().flatten().collect();
        if ghosts.len() != self.num_ghosts {
            return Err(LinalgError::DimensionMismatch {
                expected: self.num_ghosts,
                actual: ghosts.len(),
            });
        }
        Ok(ghosts)
    }
}

#[derive(Debug, Clone)]
struct AssembledBlocks {
    // Columns in local numbering of the owned range
    diag: CsrMatrix<f64>,
    // Columns index into `ghost_columns`
    offdiag: CsrMatrix<f64>,
    ghost_columns: Vec<usize>,
    exchange: GhostExchange,
}

/// A square sparse matrix whose rows are distributed according to a [`Layout`].
///
/// Entries are accumulated additively until the collective [`DistMatrix::assemble`], after
/// which the matrix is immutable and can be applied with [`DistMatrix::mult`]. Each owned row
/// holds at most as many distinct columns as its preallocation permits.
#[derive(Debug, Clone)]
pub struct DistMatrix {
    layout: Arc<Layout>,
    preallocation: Preallocation,
    rows: Vec<RowBuilder>,
    stash: Vec<StashedEntry>,
    spd: bool,
    blocks: Option<AssembledBlocks>,
}

impl DistMatrix {
    pub fn new(layout: Arc<Layout>, preallocation: Preallocation) -> Result<Self, LinalgError> {
        if preallocation.num_rows() != layout.local_size() {
            return Err(LinalgError::DimensionMismatch {
                expected: layout.local_size(),
                actual: preallocation.num_rows(),
            });
        }
        let rows = (0..layout.local_size())
            .map(|i| RowBuilder {
                cols: Vec::with_capacity(preallocation.row_capacity(i)),
                values: Vec::with_capacity(preallocation.row_capacity(i)),
                ..RowBuilder::default()
            })
            .collect();
        Ok(Self {
            layout,
            preallocation,
            rows,
            stash: Vec::new(),
            spd: false,
            blocks: None,
        })
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn preallocation(&self) -> &Preallocation {
        &self.preallocation
    }

    pub fn global_size(&self) -> usize {
        self.layout.global_size()
    }

    /// Declares the matrix symmetric positive definite.
    pub fn set_spd(&mut self, spd: bool) {
        self.spd = spd;
    }

    pub fn is_spd(&self) -> bool {
        self.spd
    }

    pub fn is_assembled(&self) -> bool {
        self.blocks.is_some()
    }

    /// Adds a dense block of values at the given global rows and columns.
    ///
    /// `values` is stored row-major with `rows.len() * cols.len()` entries. Rows owned by
    /// other ranks are stashed until assembly. On error the matrix is left unchanged.
    pub fn add_values(&mut self, rows: &[usize], cols: &[usize], values: &[f64]) -> Result<(), LinalgError> {
        if self.blocks.is_some() {
            return Err(LinalgError::AlreadyAssembled);
        }
        if values.len() != rows.len() * cols.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: rows.len() * cols.len(),
                actual: values.len(),
            });
        }

        self.check_insertion(rows, cols)?;
        for (a, &row) in rows.iter().enumerate() {
            for (b, &col) in cols.iter().enumerate() {
                let value = values[a * cols.len() + b];
                match self.layout.to_local(row) {
                    Some(local_row) => self.insert(local_row, row, col, value)?,
                    None => self.stash.push(StashedEntry {
                        row: row as u64,
                        col: col as u64,
                        value,
                    }),
                }
            }
        }
        Ok(())
    }

    /// Checks index bounds and preallocated capacity for all entries of a block.
    fn check_insertion(&self, rows: &[usize], cols: &[usize]) -> Result<(), LinalgError> {
        let global_size = self.layout.global_size();
        if let Some(index) = rows.iter().chain(cols).copied().find(|&index| index >= global_size) {
            return Err(LinalgError::IndexOutOfRange { index, global_size });
        }

        // (local row, global row, column) of entries not yet in the sparsity pattern
        let mut new_entries: Vec<(usize, usize, usize)> = rows
            .iter()
            .filter_map(|&row| self.layout.to_local(row).map(|local_row| (local_row, row)))
            .flat_map(|(local_row, row)| cols.iter().map(move |&col| (local_row, row, col)))
            .filter(|&(local_row, _, col)| self.rows[local_row].cols.binary_search(&col).is_err())
            .collect();
        new_entries.sort_unstable();
        new_entries.dedup();

        let mut current_row = None;
        let (mut num_diag, mut num_offdiag) = (0, 0);
        for (local_row, row, col) in new_entries {
            if current_row != Some(local_row) {
                current_row = Some(local_row);
                num_diag = self.rows[local_row].num_diag;
                num_offdiag = self.rows[local_row].num_offdiag;
            }
            let (count, capacity, block) = if self.layout.is_owned(col) {
                (&mut num_diag, self.preallocation.diag[local_row], "diagonal")
            } else {
                (&mut num_offdiag, self.preallocation.offdiag[local_row], "off-diagonal")
            };
            if *count >= capacity {
                return Err(LinalgError::PreallocationExceeded { row, col, block });
            }
            *count += 1;
        }
        Ok(())
    }

    fn insert(&mut self, local_row: usize, row: usize, col: usize, value: f64) -> Result<(), LinalgError> {
        let is_diag = self.layout.is_owned(col);
        let builder = &mut self.rows[local_row];
        match builder.cols.binary_search(&col) {
            Ok(pos) => builder.values[pos] += value,
            Err(pos) => {
                let (count, capacity, block) = if is_diag {
                    (&mut builder.num_diag, self.preallocation.diag[local_row], "diagonal")
                } else {
                    (&mut builder.num_offdiag, self.preallocation.offdiag[local_row], "off-diagonal")
                };
                if *count >= capacity {
                    return Err(LinalgError::PreallocationExceeded { row, col, block });
                }
                *count += 1;
                builder.cols.insert(pos, col);
                builder.values.insert(pos, value);
            }
        }
        Ok(())
    }

    /// Delivers stashed entries, finalizes the local blocks and prepares the ghost exchange
    /// used by [`DistMatrix::mult`]. Collective.
    pub fn assemble<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), LinalgError> {
        if self.blocks.is_some() {
            return Err(LinalgError::AlreadyAssembled);
        }

        let mut outgoing = vec![Vec::new(); comm.size()];
        for entry in self.stash.drain(..) {
            outgoing[self.layout.owner_of(entry.row as usize)?].push(entry);
        }
        for entry in comm.all_to_all(outgoing)?.into_iter().flatten() {
            let row = entry.row as usize;
            let local_row = self.layout.to_local(row).ok_or(LinalgError::NotOwned {
                index: row,
                rank: self.layout.rank(),
            })?;
            self.insert(local_row, row, entry.col as usize, entry.value)?;
        }

        let owned = self.layout.owned_range();
        let ghost_columns: Vec<usize> = self
            .rows
            .iter()
            .flat_map(|row| row.cols.iter().copied())
            .filter(|col| !owned.contains(col))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let num_rows = self.rows.len();
        let mut diag = CsrBuffers::with_rows(num_rows);
        let mut offdiag = CsrBuffers::with_rows(num_rows);
        for row in std::mem::take(&mut self.rows) {
            for (col, value) in row.cols.into_iter().zip(row.values) {
                if owned.contains(&col) {
                    diag.push(col - owned.start, value);
                } else {
                    // Every off-rank column was collected into `ghost_columns` above
                    let compressed = ghost_columns.binary_search(&col).map_err(|_| LinalgError::NotOwned {
                        index: col,
                        rank: self.layout.rank(),
                    })?;
                    offdiag.push(compressed, value);
                }
            }
            diag.finish_row();
            offdiag.finish_row();
        }

        let exchange = GhostExchange::build(comm, &self.layout, &ghost_columns)?;
        self.blocks = Some(AssembledBlocks {
            diag: diag.into_csr(num_rows, owned.len())?,
            offdiag: offdiag.into_csr(num_rows, ghost_columns.len())?,
            ghost_columns,
            exchange,
        });
        Ok(())
    }

    fn blocks(&self) -> Result<&AssembledBlocks, LinalgError> {
        self.blocks.as_ref().ok_or(LinalgError::NotAssembled)
    }

    /// Computes `y = A x`. Collective.
    pub fn mult<C: Communicator + ?Sized>(&self, comm: &C, x: &DistVector, y: &mut DistVector) -> Result<(), LinalgError> {
        let blocks = self.blocks()?;
        if **x.layout() != *self.layout || **y.layout() != *self.layout {
            return Err(LinalgError::LayoutMismatch);
        }
        let ghosts = blocks.exchange.gather(comm, x.local_values())?;
        let y = y.local_values_mut();
        y.fill(0.0);
        csr_mul_add(&blocks.diag, x.local_values(), y);
        csr_mul_add(&blocks.offdiag, &ghosts, y);
        Ok(())
    }

    /// The square block coupling owned rows to owned columns, in local numbering.
    pub fn diag_block(&self) -> Result<&CsrMatrix<f64>, LinalgError> {
        Ok(&self.blocks()?.diag)
    }

    /// Diagonal entries of the owned rows.
    pub fn diagonal(&self) -> Result<Vec<f64>, LinalgError> {
        let diag = self.diag_block()?;
        Ok(diag
            .row_iter()
            .enumerate()
            .map(|(i, row)| row.get_entry(i).map(|entry| entry.into_value()).unwrap_or(0.0))
            .collect())
    }

    /// Number of stored entries in an owned row.
    ///
    /// # Panics
    ///
    /// Panics if `local_row` is not a valid local row index.
    pub fn row_nnz(&self, local_row: usize) -> usize {
        match &self.blocks {
            Some(blocks) => blocks.diag.row(local_row).nnz() + blocks.offdiag.row(local_row).nnz(),
            None => self.rows[local_row].cols.len(),
        }
    }

    /// All owned entries as `(global row, global column, value)`, sorted by row and column.
    pub fn local_triplets(&self) -> Result<Vec<(usize, usize, f64)>, LinalgError> {
        let blocks = self.blocks()?;
        let offset = self.layout.owned_range().start;
        let mut triplets = Vec::with_capacity(blocks.diag.nnz() + blocks.offdiag.nnz());
        for i in 0..blocks.diag.nrows() {
            let mut row: Vec<_> = blocks
                .diag
                .row(i)
                .col_indices()
                .iter()
                .zip(blocks.diag.row(i).values())
                .map(|(&j, &v)| (offset + i, offset + j, v))
                .chain(
                    blocks
                        .offdiag
                        .row(i)
                        .col_indices()
                        .iter()
                        .zip(blocks.offdiag.row(i).values())
                        .map(|(&j, &v)| (offset + i, blocks.ghost_columns[j], v)),
                )
                .collect();
            row.sort_by_key(|&(_, col, _)| col);
            triplets.extend(row);
        }
        Ok(triplets)
    }
}

struct CsrBuffers {
    offsets: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl CsrBuffers {
    fn with_rows(num_rows: usize) -> Self {
        let mut offsets = Vec::with_capacity(num_rows + 1);
        offsets.push(0);
        Self {
            offsets,
            cols: Vec::new(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, col: usize, value: f64) {
        self.cols.push(col);
        self.values.push(value);
    }

    fn finish_row(&mut self) {
        self.offsets.push(self.cols.len());
    }

    fn into_csr(self, num_rows: usize, num_cols: usize) -> Result<CsrMatrix<f64>, LinalgError> {
        CsrMatrix::try_from_csr_data(num_rows, num_cols, self.offsets, self.cols, self.values)
            .map_err(|err| LinalgError::SparseFormat(err.to_string()))
    }
}

/// `y += A x` for a serial CSR matrix.
pub(crate) fn csr_mul_add(a: &CsrMatrix<f64>, x: &[f64], y: &mut [f64]) {
    for (row, y_i) in a.row_iter().zip(y.iter_mut()) {
        *y_i += row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, v)| v * x[j])
            .sum::<f64>();
    }
}

#[cfg(test)]
mod tests {
    use super::{DistMatrix, Preallocation};
    use crate::comm::{run_in_process, Communicator, SelfComm};
    use crate::error::LinalgError;
    use crate::layout::Layout;
    use crate::vector::DistVector;
    use std::sync::Arc;

    #[test]
    fn exceeding_preallocation_is_reported() {
        let layout = Arc::new(Layout::uniform(0, 1, 3).unwrap());
        let preallocation = Preallocation::new(vec![1, 2, 2], vec![0, 0, 0]).unwrap();
        let mut a = DistMatrix::new(layout, preallocation).unwrap();
        a.add_values(&[0], &[0], &[1.0]).unwrap();
        // Repeated additions to an existing entry do not consume capacity
        a.add_values(&[0], &[0], &[1.0]).unwrap();
        let result = a.add_values(&[0], &[1], &[1.0]);
        assert_eq!(
            result,
            Err(LinalgError::PreallocationExceeded {
                row: 0,
                col: 1,
                block: "diagonal"
            })
        );
    }

    #[test]
    fn failed_insertion_leaves_matrix_unchanged() {
        let layout = Arc::new(Layout::uniform(0, 1, 2).unwrap());
        let preallocation = Preallocation::new(vec![2, 1], vec![0, 0]).unwrap();
        let mut a = DistMatrix::new(layout, preallocation).unwrap();
        // Row 1 has room for one entry only, so nothing of the block may be inserted
        let result = a.add_values(&[0, 1], &[0, 1], &[2.0, -1.0, -1.0, 2.0]);
        assert_eq!(
            result,
            Err(LinalgError::PreallocationExceeded {
                row: 1,
                col: 1,
                block: "diagonal"
            })
        );
        assert_eq!(
            a.add_values(&[0], &[0, 2], &[1.0, 1.0]),
            Err(LinalgError::IndexOutOfRange { index: 2, global_size: 2 })
        );

        a.add_values(&[0], &[0], &[1.0]).unwrap();
        a.assemble(&SelfComm).unwrap();
        assert_eq!(a.local_triplets().unwrap(), vec![(0, 0, 1.0)]);
    }

    #[test]
    fn insertion_after_assembly_is_rejected() {
        let layout = Arc::new(Layout::uniform(0, 1, 2).unwrap());
        let mut a = DistMatrix::new(layout, Preallocation::new(vec![2, 2], vec![0, 0]).unwrap()).unwrap();
        a.add_values(&[0, 1], &[0, 1], &[2.0, -1.0, -1.0, 2.0]).unwrap();
        a.assemble(&SelfComm).unwrap();
        assert_eq!(a.add_values(&[0], &[0], &[1.0]), Err(LinalgError::AlreadyAssembled));
        assert_eq!(a.diagonal().unwrap(), vec![2.0, 2.0]);
        assert_eq!(a.row_nnz(1), 2);
    }

    #[test]
    fn distributed_mult_matches_serial_product() {
        // 1D Laplacian on 5 unknowns, assembled from 2-node "elements" by every rank
        let n = 5;
        let results = run_in_process(2, |comm| {
            let layout = Arc::new(Layout::uniform(comm.rank(), 2, n).unwrap());
            let range = layout.owned_range();
            let diag = range.clone().map(|_| 3).collect();
            let offdiag = range.clone().map(|_| 1).collect();
            let mut a = DistMatrix::new(layout.clone(), Preallocation::new(diag, offdiag).unwrap()).unwrap();
            // Rank r adds the elements whose first node it owns
            for e in range.clone().filter(|&e| e + 1 < n) {
                a.add_values(&[e, e + 1], &[e, e + 1], &[1.0, -1.0, -1.0, 1.0])
                    .unwrap();
            }
            a.assemble(&comm).unwrap();

            let x_values = range.clone().map(|i| (i * i) as f64).collect();
            let x = DistVector::from_local_values(layout.clone(), x_values).unwrap();
            let mut y = x.duplicate();
            a.mult(&comm, &x, &mut y).unwrap();
            (range, y.local_values().to_vec(), a.local_triplets().unwrap())
        });

        let x: Vec<f64> = (0..n).map(|i| (i * i) as f64).collect();
        let mut expected = vec![0.0; n];
        for e in 0..n - 1 {
            expected[e] += x[e] - x[e + 1];
            expected[e + 1] += x[e + 1] - x[e];
        }

        let mut y = Vec::new();
        let mut nnz = 0;
        for (_, local, triplets) in results {
            y.extend(local);
            nnz += triplets.len();
        }
        assert_eq!(y, expected);
        assert_eq!(nnz, 3 * n - 2);
    }
}
