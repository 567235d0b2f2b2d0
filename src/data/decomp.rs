//! Decomposition descriptor: which global cells each local process holds.
//!
//! A decomposition maps every locally-held cell (in local logical order) to
//! a global index of a grid, or to [`UNMAPPED`] for local slots that carry
//! no grid cell (padding, halo placeholders). Descriptors are validated on
//! construction and immutable afterwards.

use crate::coupler_error::CouplerError;
use crate::data::registry::GridId;
use crate::debug_invariants::DebugInvariants;
use serde::{Deserialize, Serialize};

/// Index into a grid's global (undecomposed) index space.
pub type GlobalIndex = u64;

/// Sentinel for local cells that do not map to any global cell.
pub const UNMAPPED: GlobalIndex = GlobalIndex::MAX;

/// Per-process view of one decomposition of a grid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompDescriptor {
    component: String,
    name: String,
    grid: Option<GridId>,
    global_size: u64,
    local_to_global: Vec<GlobalIndex>,
}

impl DecompDescriptor {
    /// Build and validate a descriptor.
    ///
    /// # Errors
    /// `IndexOutOfRange` for the first non-sentinel entry outside `[0, global_size)`.
    pub fn new(
        component: impl Into<String>,
        name: impl Into<String>,
        global_size: u64,
        local_to_global: Vec<GlobalIndex>,
    ) -> Result<Self, CouplerError> {
        let d = Self {
            component: component.into(),
            name: name.into(),
            grid: None,
            global_size,
            local_to_global,
        };
        d.validate_invariants()?;
        Ok(d)
    }

    /// Attach the handle of the grid this decomposition partitions.
    pub fn with_grid(mut self, grid: GridId) -> Self {
        self.grid = Some(grid);
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `component::name`, unique within a coupled run.
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.component, self.name)
    }

    pub fn grid(&self) -> Option<GridId> {
        self.grid
    }

    pub fn global_size(&self) -> u64 {
        self.global_size
    }

    pub fn local_cell_count(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn local_to_global(&self) -> &[GlobalIndex] {
        &self.local_to_global
    }

    /// Number of local cells that map to a global cell.
    pub fn mapped_count(&self) -> usize {
        self.local_to_global.iter().filter(|&&g| g != UNMAPPED).count()
    }
}

impl DebugInvariants for DecompDescriptor {
    fn validate_invariants(&self) -> Result<(), CouplerError> {
        validate_indices(&self.full_name(), self.global_size, &self.local_to_global)
    }
}

/// Check every non-sentinel entry of `indices` against `global_size`.
pub(crate) fn validate_indices(
    decomp: &str,
    global_size: u64,
    indices: &[GlobalIndex],
) -> Result<(), CouplerError> {
    match indices
        .iter()
        .position(|&g| g != UNMAPPED && g >= global_size)
    {
        Some(local) => Err(CouplerError::IndexOutOfRange {
            decomp: decomp.to_owned(),
            local,
            global: indices[local],
            global_size,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sentinels() {
        let d = DecompDescriptor::new("atm", "d0", 4, vec![3, UNMAPPED, 0]).unwrap();
        assert_eq!(d.local_cell_count(), 3);
        assert_eq!(d.mapped_count(), 2);
        assert_eq!(d.full_name(), "atm::d0");
    }

    #[test]
    fn rejects_out_of_range() {
        let err = DecompDescriptor::new("atm", "d0", 4, vec![1, 4]).unwrap_err();
        assert_eq!(
            err,
            CouplerError::IndexOutOfRange {
                decomp: "atm::d0".into(),
                local: 1,
                global: 4,
                global_size: 4,
            }
        );
    }
}
