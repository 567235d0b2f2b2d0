//! Sparse remap weights: computation through operators, merging, caching
//! and application.

pub mod apply;
pub mod cache;
pub mod operator;
pub mod weights;

pub use apply::{apply_weights, apply_weights_levels, apply_weights_masked};
pub use cache::{RuntimeState, WeightCache, WeightKey, WeightRequest, WeightState};
pub use operator::{ConservativeRemap1d, IdentityRemap, RemapOperator};
pub use weights::{PartitionWeights, RemapWeights, Triplet};
