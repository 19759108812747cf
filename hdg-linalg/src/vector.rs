//! Row-distributed dense vectors.

use crate::comm::{CommExt, Communicator};
use crate::error::LinalgError;
use crate::layout::Layout;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// How staged values are combined with existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Overwrite the current value.
    Insert,
    /// Add to the current value.
    Add,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct StashedValue {
    index: u64,
    value: f64,
    // 1 for `InsertMode::Add`, 0 for `InsertMode::Insert`
    add: u64,
}

/// A vector whose entries are partitioned across ranks according to a [`Layout`].
///
/// Entries of foreign rows may be set or added on any rank; they are stashed locally and
/// delivered to their owners by the collective [`DistVector::assemble`].
#[derive(Debug, Clone)]
pub struct DistVector {
    layout: Arc<Layout>,
    values: Vec<f64>,
    stash: Vec<StashedValue>,
    mode: Option<InsertMode>,
}

impl DistVector {
    /// Zero vector with the given layout.
    pub fn new(layout: Arc<Layout>) -> Self {
        let values = vec![0.0; layout.local_size()];
        Self {
            layout,
            values,
            stash: Vec::new(),
            mode: None,
        }
    }

    pub fn from_local_values(layout: Arc<Layout>, values: Vec<f64>) -> Result<Self, LinalgError> {
        if values.len() != layout.local_size() {
            return Err(LinalgError::DimensionMismatch {
                expected: layout.local_size(),
                actual: values.len(),
            });
        }
        Ok(Self {
            layout,
            values,
            stash: Vec::new(),
            mode: None,
        })
    }

    /// Zero vector with the same layout as `self`.
    pub fn duplicate(&self) -> Self {
        Self::new(Arc::clone(&self.layout))
    }

    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    pub fn local_values(&self) -> &[f64] {
        &self.values
    }

    pub fn local_values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Value of an owned global entry.
    pub fn get_owned(&self, global: usize) -> Option<f64> {
        self.layout.to_local(global).map(|i| self.values[i])
    }

    pub fn set_values(&mut self, indices: &[usize], values: &[f64]) -> Result<(), LinalgError> {
        self.stage(InsertMode::Insert, indices, values)
    }

    pub fn add_values(&mut self, indices: &[usize], values: &[f64]) -> Result<(), LinalgError> {
        self.stage(InsertMode::Add, indices, values)
    }

    fn stage(&mut self, mode: InsertMode, indices: &[usize], values: &[f64]) -> Result<(), LinalgError> {
        if indices.len() != values.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: indices.len(),
                actual: values.len(),
            });
        }
        match self.mode {
            Some(current) if current != mode => return Err(LinalgError::MixedInsertModes),
            _ => self.mode = Some(mode),
        }

        let global_size = self.layout.global_size();
        for (&index, &value) in indices.iter().zip(values) {
            if index >= global_size {
                return Err(LinalgError::IndexOutOfRange { index, global_size });
            }
            match self.layout.to_local(index) {
                Some(local) => apply(&mut self.values[local], value, mode),
                None => self.stash.push(StashedValue {
                    index: index as u64,
                    value,
                    add: u64::from(mode == InsertMode::Add),
                }),
            }
        }
        Ok(())
    }

    /// Delivers stashed entries to their owning ranks. Collective.
    pub fn assemble<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), LinalgError> {
        let mut outgoing = vec![Vec::new(); comm.size()];
        for entry in self.stash.drain(..) {
            let owner = self.layout.owner_of(entry.index as usize)?;
            outgoing[owner].push(entry);
        }

        let incoming = comm.all_to_all(outgoing)?;
        // Contributions are applied in rank order, which fixes the summation order
        for entry in incoming.iter().flatten() {
            let index = entry.index as usize;
            let local = self.layout.to_local(index).ok_or(LinalgError::NotOwned {
                index,
                rank: self.layout.rank(),
            })?;
            let mode = if entry.add == 1 { InsertMode::Add } else { InsertMode::Insert };
            apply(&mut self.values[local], entry.value, mode);
        }
        self.mode = None;
        Ok(())
    }

    fn check_layout(&self, other: &DistVector) -> Result<(), LinalgError> {
        if Arc::ptr_eq(&self.layout, &other.layout) || self.layout == other.layout {
            Ok(())
        } else {
            Err(LinalgError::LayoutMismatch)
        }
    }

    /// Global dot product. Collective.
    pub fn dot<C: Communicator + ?Sized>(&self, comm: &C, other: &DistVector) -> Result<f64, LinalgError> {
        self.check_layout(other)?;
        let local: f64 = self.values.iter().zip(&other.values).map(|(a, b)| a * b).sum();
        Ok(comm.all_reduce_sum_f64(local)?)
    }

    /// Global Euclidean norm. Collective.
    pub fn norm2<C: Communicator + ?Sized>(&self, comm: &C) -> Result<f64, LinalgError> {
        let local: f64 = self.values.iter().map(|v| v * v).sum();
        Ok(comm.all_reduce_sum_f64(local)?.sqrt())
    }

    /// `self = alpha * x + self`
    pub fn axpy(&mut self, alpha: f64, x: &DistVector) -> Result<(), LinalgError> {
        self.check_layout(x)?;
        self.values
            .iter_mut()
            .zip(&x.values)
            .for_each(|(y, x)| *y += alpha * x);
        Ok(())
    }

    /// `self = x + beta * self`
    pub fn aypx(&mut self, beta: f64, x: &DistVector) -> Result<(), LinalgError> {
        self.check_layout(x)?;
        self.values
            .iter_mut()
            .zip(&x.values)
            .for_each(|(y, x)| *y = x + beta * *y);
        Ok(())
    }

    /// `self = alpha * x + y`
    pub fn waxpy(&mut self, alpha: f64, x: &DistVector, y: &DistVector) -> Result<(), LinalgError> {
        self.check_layout(x)?;
        self.check_layout(y)?;
        for ((w, x), y) in self.values.iter_mut().zip(&x.values).zip(&y.values) {
            *w = alpha * x + y;
        }
        Ok(())
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values.iter_mut().for_each(|v| *v *= alpha);
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }

    pub fn copy_from(&mut self, other: &DistVector) -> Result<(), LinalgError> {
        self.check_layout(other)?;
        self.values.copy_from_slice(&other.values);
        Ok(())
    }
}

fn apply(target: &mut f64, value: f64, mode: InsertMode) {
    match mode {
        InsertMode::Insert => *target = value,
        InsertMode::Add => *target += value,
    }
}
