//! Contiguous row ownership across the ranks of a group.

use crate::comm::{CommExt, Communicator};
use crate::error::LinalgError;
use std::ops::Range;

/// Partition of the global index range `[0, N)` into contiguous, per-rank ownership ranges.
///
/// Rank `p` owns `[offsets[p], offsets[p + 1])`. Distributed vectors and matrices sharing a
/// layout are identically partitioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    rank: usize,
    offsets: Vec<usize>,
}

impl Layout {
    /// Builds a layout from explicit offsets (`size + 1` entries, starting at zero).
    pub fn from_offsets(rank: usize, offsets: Vec<usize>) -> Result<Self, LinalgError> {
        let layout = Self { rank, offsets };
        layout.validate()?;
        Ok(layout)
    }

    /// Builds the layout collectively from the number of indices owned by each rank.
    pub fn from_local_size<C: Communicator + ?Sized>(comm: &C, local_size: usize) -> Result<Self, LinalgError> {
        let sizes = comm.all_gather(&[local_size as u64])?;
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        offsets.push(0);
        for size in sizes.iter().flatten() {
            let last = offsets.last().copied().unwrap_or(0);
            offsets.push(last + *size as usize);
        }
        if offsets.len() != comm.size() + 1 {
            return Err(LinalgError::InconsistentLayout(format!(
                "gathered {} local sizes from a group of {} ranks",
                offsets.len() - 1,
                comm.size()
            )));
        }
        Self::from_offsets(comm.rank(), offsets)
    }

    /// Like [`Layout::from_local_size`], but additionally requires the local sizes to sum to
    /// `expected_global_size`.
    pub fn from_local_size_checked<C: Communicator + ?Sized>(
        comm: &C,
        local_size: usize,
        expected_global_size: usize,
    ) -> Result<Self, LinalgError> {
        let layout = Self::from_local_size(comm, local_size)?;
        if layout.global_size() != expected_global_size {
            return Err(LinalgError::InconsistentLayout(format!(
                "owned sizes sum to {}, but the global size is {}",
                layout.global_size(),
                expected_global_size
            )));
        }
        Ok(layout)
    }

    /// Block distribution of `global_size` indices over `size` ranks, where the first
    /// `global_size % size` ranks own one additional index.
    pub fn uniform(rank: usize, size: usize, global_size: usize) -> Result<Self, LinalgError> {
        let base = global_size / size.max(1);
        let remainder = global_size % size.max(1);
        let mut offsets = Vec::with_capacity(size + 1);
        offsets.push(0);
        for p in 0..size {
            let extra = usize::from(p < remainder);
            offsets.push(offsets[p] + base + extra);
        }
        Self::from_offsets(rank, offsets)
    }

    /// Checks that the ranges are pairwise disjoint and cover `[0, N)`.
    pub fn validate(&self) -> Result<(), LinalgError> {
        if self.offsets.len() < 2 {
            return Err(LinalgError::InconsistentLayout(
                "a layout needs at least one rank".to_string(),
            ));
        }
        if self.offsets[0] != 0 {
            return Err(LinalgError::InconsistentLayout(format!(
                "ownership starts at {} instead of 0",
                self.offsets[0]
            )));
        }
        if let Some(p) = self.offsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(LinalgError::InconsistentLayout(format!(
                "range of rank {} ends at {} before it starts at {}",
                p,
                self.offsets[p + 1],
                self.offsets[p]
            )));
        }
        if self.rank >= self.size() {
            return Err(LinalgError::InconsistentLayout(format!(
                "rank {} is outside a group of {} ranks",
                self.rank,
                self.size()
            )));
        }
        Ok(())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn global_size(&self) -> usize {
        self.offsets[self.size()]
    }

    pub fn range_of(&self, rank: usize) -> Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.range_of(self.rank)
    }

    pub fn local_size(&self) -> usize {
        self.owned_range().len()
    }

    pub fn is_owned(&self, global: usize) -> bool {
        self.owned_range().contains(&global)
    }

    /// Local offset of an owned global index.
    pub fn to_local(&self, global: usize) -> Option<usize> {
        let range = self.owned_range();
        range.contains(&global).then(|| global - range.start)
    }

    /// Rank owning the given global index.
    pub fn owner_of(&self, global: usize) -> Result<usize, LinalgError> {
        if global >= self.global_size() {
            return Err(LinalgError::IndexOutOfRange {
                index: global,
                global_size: self.global_size(),
            });
        }
        // Index of the first offset strictly greater than `global`, minus one. Ranks with
        // empty ranges share offsets and are skipped automatically.
        Ok(self.offsets.partition_point(|&offset| offset <= global) - 1)
    }
}
