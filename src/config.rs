//! Runtime tunables for routing, remapping and dimension interchange.

use crate::algs::communicator::CommTag;
use serde::{Deserialize, Serialize};

/// Default tile byte budget for [`interchange`](crate::algs::interchange).
pub const DEFAULT_BLOCK_BYTES: usize = 32 * 1024;

/// Settings shared by everything a [`CouplingSession`](crate::session::CouplingSession) builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplerConfig {
    /// Byte budget of one interchange tile (source and destination working set).
    pub interchange_block_bytes: usize,
    /// Run the global sort-and-scan coverage check when building routers.
    pub check_coverage: bool,
    /// Tolerance used when checking row sums of conservative weights.
    pub conservation_tolerance: f64,
    /// First message tag used by routing exchanges.
    pub base_tag: u16,
}

impl Default for CouplerConfig {
    fn default() -> Self {
        Self {
            interchange_block_bytes: DEFAULT_BLOCK_BYTES,
            check_coverage: false,
            conservation_tolerance: 1e-10,
            base_tag: 0xC0DE,
        }
    }
}

impl CouplerConfig {
    pub fn with_block_bytes(mut self, bytes: usize) -> Self {
        self.interchange_block_bytes = bytes;
        self
    }

    pub fn with_coverage_check(mut self, on: bool) -> Self {
        self.check_coverage = on;
        self
    }

    pub fn with_conservation_tolerance(mut self, tol: f64) -> Self {
        self.conservation_tolerance = tol;
        self
    }

    pub fn with_base_tag(mut self, tag: u16) -> Self {
        self.base_tag = tag;
        self
    }

    /// Base tag as a typed [`CommTag`].
    pub fn tag(&self) -> CommTag {
        CommTag::new(self.base_tag)
    }
}
