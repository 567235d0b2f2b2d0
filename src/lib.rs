#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-coupler
//!
//! mesh-coupler is the routing and remapping core of a model-coupling layer:
//! it lets independently parallel simulation components exchange field data
//! defined on different grids and different domain decompositions, without
//! a central broker process.
//!
//! ## Features
//! - Decomposition routing: every process derives, from the full partition
//!   tables of both sides, the run-length encoded segments it sends to or
//!   receives from each remote process
//! - Routers cached per decomposition pair and reused every exchange
//! - Sparse remap weights (triplets) with partition merging, conservation
//!   checks, masked and multi-level application, and a mask-aware cache
//! - Tiled dimension interchange between axis orders of composite grids
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Determinism
//!
//! Routing and weight computation are pure functions of the registered
//! descriptors. Two processes given the same partition tables build
//! bit-identical segment lists; message order is always the sender's
//! ascending local order.
//!
//! ## Errors
//!
//! Every fallible call returns [`CouplerError`]. Nothing in the library
//! aborts; applications decide where to stop with
//! [`coupler_error::exit_on_fatal`].
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-coupler = "0.3"
//! # features = ["mpi-support"]
//! ```

pub mod algs;
pub mod config;
pub mod coupler_error;
pub mod data;
pub mod debug_invariants;
pub mod session;

pub use coupler_error::{CouplerError, ErrorCategory};
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::group::ComponentGroup;
    pub use crate::algs::interchange::{InterchangeTable, interchange};
    pub use crate::algs::partition_table::{PartitionTable, RoutingTags};
    pub use crate::algs::remap::{
        ConservativeRemap1d, IdentityRemap, RemapOperator, RemapWeights, RuntimeState, Triplet,
        WeightState, apply_weights, apply_weights_levels, apply_weights_masked,
    };
    pub use crate::algs::router::{RouteRole, Router, RouterKey, Segment};
    pub use crate::algs::routing::{
        RoutingContext, Side, build_local_router, build_router, build_router_from_tables,
    };
    pub use crate::algs::transfer::{recv_field, redistribute, send_field};
    pub use crate::config::CouplerConfig;
    pub use crate::coupler_error::{CouplerError, ErrorCategory, exit_on_fatal};
    pub use crate::data::{
        Axis, DecompDescriptor, DecompId, GlobalIndex, GridDescriptor, GridId, UNMAPPED,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::session::CouplingSession;
}
