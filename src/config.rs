//! Configuration of solver instances and convergence studies.
//!
//! Both structs can be read from JSON, where missing fields take their defaults, and are
//! further overridden by command-line flags in the binary.

use crate::basis::FaceBasisKind;
use crate::error::HdgError;
use crate::problem::ProblemKind;
use hdg_linalg::KspConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Settings shared by all refinement levels of one solver instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub ksp: KspConfig,
    /// Return [`HdgError::NotConverged`] instead of recording the failed solve and continuing.
    pub fail_on_non_convergence: bool,
    /// Stabilization parameter of the numerical flux.
    pub tau: f64,
    /// Constant diffusivity `kappa`.
    pub kappa: f64,
    pub face_basis: FaceBasisKind,
    /// Size of the thread pool for element-local work.
    pub threads: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ksp: KspConfig::default(),
            fail_on_non_convergence: false,
            tau: 1.0,
            kappa: 1.0,
            face_basis: FaceBasisKind::default(),
            threads: 1,
        }
    }
}

impl SolverOptions {
    /// Selects the face basis by name.
    ///
    /// An unknown name is reported on rank 0 and the previous basis is kept.
    pub fn set_face_basis(&mut self, name: &str, rank: usize) {
        match name.parse::<FaceBasisKind>() {
            Ok(kind) => self.face_basis = kind,
            Err(err) => {
                if rank == 0 {
                    log::warn!("{err}; keeping the `{}` basis", self.face_basis);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), HdgError> {
        if self.threads == 0 {
            return Err(HdgError::InvalidConfig("at least one thread is required".to_string()));
        }
        if !(self.tau > 0.0) {
            return Err(HdgError::InvalidConfig(format!("stabilization must be positive, got {}", self.tau)));
        }
        if !(self.kappa > 0.0) {
            return Err(HdgError::InvalidConfig(format!("diffusivity must be positive, got {}", self.kappa)));
        }
        if !(self.ksp.rtol > 0.0) || self.ksp.max_iter == 0 {
            return Err(HdgError::InvalidConfig(format!(
                "invalid Krylov tolerances: rtol = {}, max_iter = {}",
                self.ksp.rtol, self.ksp.max_iter
            )));
        }
        Ok(())
    }
}

/// A sweep over polynomial degrees `[p_start, p_end)` and refinement levels
/// `[h_start, h_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub p_start: usize,
    pub p_end: usize,
    pub h_start: usize,
    pub h_end: usize,
    /// Requested adaptive refinement. Refinement is uniform regardless.
    pub adaptive: bool,
    /// Elements per side of the mesh at level zero.
    pub base_divisions: usize,
    pub problem: ProblemKind,
    pub solver: SolverOptions,
    /// Directory for the result files. Nothing is written if unset.
    pub output_dir: Option<PathBuf>,
    pub write_vtk: bool,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            p_start: 1,
            p_end: 2,
            h_start: 0,
            h_end: 4,
            adaptive: false,
            base_divisions: 2,
            problem: ProblemKind::default(),
            solver: SolverOptions::default(),
            output_dir: None,
            write_vtk: false,
        }
    }
}

impl StudyConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HdgError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Empty degree or refinement ranges are valid and run no levels.
    pub fn validate(&self) -> Result<(), HdgError> {
        if self.base_divisions == 0 || self.h_end > 20 {
            return Err(HdgError::InvalidConfig(format!(
                "unsupported mesh: {} base divisions refined up to level {}",
                self.base_divisions, self.h_end
            )));
        }
        self.solver.validate()
    }
}
