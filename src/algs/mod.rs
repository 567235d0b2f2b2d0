//! Re-export public algorithms.

pub mod communicator;
pub mod group;
pub mod interchange;
pub mod partition_table;
pub mod remap;
pub mod router;
pub mod routing;
pub mod transfer;
pub mod wire;

pub use interchange::{InterchangeTable, interchange};
pub use router::{RouteRole, Router, RouterKey, Segment, SegmentList};
pub use routing::{Side, build_local_router, build_router, build_router_from_tables};
