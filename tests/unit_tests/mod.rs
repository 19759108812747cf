mod assembly;
mod dofs;
mod phase;
mod scatter;
