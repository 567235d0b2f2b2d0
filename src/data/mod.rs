//! Data module: grid and decomposition descriptors and their registry

pub mod decomp;
pub mod grid;
pub mod registry;

pub use decomp::{DecompDescriptor, GlobalIndex, UNMAPPED};
pub use grid::{Axis, GridDescriptor};
pub use registry::{DecompId, GridId, Registry};
