//! Distributed sparse linear algebra for the HDG diffusion solver.
//!
//! Matrices and vectors are partitioned by contiguous row ranges across the ranks of a
//! [`Communicator`]. All operations that need data from other ranks are *collective*: every
//! rank of the group must call them, in the same order.

pub mod amg;
pub mod comm;
pub mod error;
pub mod ksp;
pub mod layout;
pub mod matrix;
pub mod pc;
pub mod scatter;
pub mod vector;

pub use comm::{run_in_process, CommExt, Communicator, SelfComm, ThreadComm};
#[cfg(feature = "mpi-support")]
pub use comm::MpiComm;
pub use error::{CommError, LinalgError};
pub use ksp::{ConvergedReason, KrylovSolver, KspConfig, KspOutput, KspType, LinearOperator, ResidualCriterion};
pub use layout::Layout;
pub use matrix::{DistMatrix, Preallocation};
pub use pc::{build_preconditioner, PcType, Preconditioner};
pub use scatter::{scatter_to_local, ScatterMap};
pub use vector::{DistVector, InsertMode};
