//! Distributed hybridized discontinuous Galerkin (HDG) solver for diffusion problems.
//!
//! A run sweeps polynomial degrees and mesh refinement levels. For every level the trace
//! DOFs are counted and distributed across ranks, the statically condensed element systems
//! are assembled into a distributed matrix, the system is solved with a preconditioned Krylov
//! method, and the solution is scattered back to the ranks to recover the interior unknowns
//! element by element.

pub mod assembly;
pub mod basis;
pub mod config;
pub mod diffusion;
pub mod dofs;
pub mod error;
pub mod events;
pub mod io;
pub mod local;
pub mod mesh;
pub mod phase;
pub mod postsolve;
pub mod problem;
pub mod solve;
pub mod study;

pub use config::{SolverOptions, StudyConfig};
pub use diffusion::Diffusion;
pub use error::HdgError;
pub use events::{ConvergenceLog, ConvergenceRecord, EventSink};
pub use phase::Phase;
pub use study::{run_convergence_study, run_convergence_study_with};

pub extern crate hdg_linalg;
pub extern crate nalgebra;
pub extern crate vtkio;
