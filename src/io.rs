//! Output of solutions for visualization.

pub mod vtk;

/// File name of the VTK output of one rank.
pub fn vtk_file_name(degree: usize, level: usize, rank: usize) -> String {
    format!("solution-p{degree}-h{level}-rank{rank}.vtk")
}
