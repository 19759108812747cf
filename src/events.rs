//! Append-only records of a run: timestamped milestones and convergence results.
//!
//! Both are written by rank 0 only. They are created (and truncated) once at the start of a
//! run and appended to afterwards, and are never reset between refinement levels.

use crate::error::HdgError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Timestamp format of milestone lines, e.g. `2024-03-01.14:05:09`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d.%X";

pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Destination of the milestone log.
#[derive(Debug)]
pub enum EventSink {
    File(File),
    Memory(Vec<String>),
    Disabled,
}

impl EventSink {
    /// Creates the file, truncating previous contents.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, HdgError> {
        Ok(Self::File(File::create(path)?))
    }

    pub fn in_memory() -> Self {
        Self::Memory(Vec::new())
    }

    /// Appends `label` followed by the current time.
    pub fn milestone(&mut self, label: &str) -> Result<(), HdgError> {
        self.record(&format!("{label}{}", timestamp()))
    }

    /// Appends a line verbatim.
    pub fn record(&mut self, line: &str) -> Result<(), HdgError> {
        match self {
            Self::File(file) => {
                writeln!(file, "{line}")?;
                file.flush()?;
            }
            Self::Memory(lines) => lines.push(line.to_string()),
            Self::Disabled => {}
        }
        Ok(())
    }

    /// Lines recorded in memory. Empty for other sinks.
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Memory(lines) => lines,
            _ => &[],
        }
    }
}

/// Results of one refinement level of a convergence study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub degree: usize,
    pub level: usize,
    /// Element size.
    pub h: f64,
    pub num_elements: usize,
    pub num_global_dofs: usize,
    pub ranks: usize,
    pub iterations: usize,
    pub converged_reason: i32,
    pub reason: String,
    pub residual_norm: f64,
    pub rhs_norm: f64,
    pub solution_norm: f64,
    /// Euclidean norm of the difference between the projected exact trace and the solution.
    pub error_norm: f64,
    pub u_l2_error: f64,
    pub q_l2_error: f64,
    pub assembly_seconds: f64,
    /// Krylov solve and scatter.
    pub solve_seconds: f64,
    pub local_solve_seconds: f64,
}

/// Append-only log of [`ConvergenceRecord`]s, one JSON object per line.
#[derive(Debug)]
pub struct ConvergenceLog {
    file: Option<File>,
    records: Vec<ConvergenceRecord>,
}

impl ConvergenceLog {
    /// Creates the file, truncating previous contents.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, HdgError> {
        Ok(Self {
            file: Some(File::create(path)?),
            records: Vec::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            file: None,
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, record: &ConvergenceRecord) -> Result<(), HdgError> {
        if let Some(file) = &mut self.file {
            serde_json::to_writer(&mut *file, record)?;
            writeln!(file)?;
            file.flush()?;
        }
        self.records.push(record.clone());
        Ok(())
    }

    pub fn records(&self) -> &[ConvergenceRecord] {
        &self.records
    }
}
