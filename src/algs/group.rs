//! Process groups: which world ranks run a given component.

use crate::coupler_error::CouplerError;
use serde::{Deserialize, Serialize};

/// The set of world ranks belonging to one component, in component-rank order.
///
/// Component rank `r` runs on world rank `world_ranks[r]`; rank 0 is the
/// group's root for cross-component transfers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "GroupRepr")]
pub struct ComponentGroup {
    name: String,
    world_ranks: Vec<usize>,
}

#[derive(Deserialize)]
struct GroupRepr {
    name: String,
    world_ranks: Vec<usize>,
}

impl TryFrom<GroupRepr> for ComponentGroup {
    type Error = CouplerError;

    fn try_from(r: GroupRepr) -> Result<Self, Self::Error> {
        Self::new(r.name, r.world_ranks)
    }
}

impl ComponentGroup {
    /// # Errors
    /// `EmptyGroup` when `world_ranks` is empty.
    pub fn new(name: impl Into<String>, world_ranks: Vec<usize>) -> Result<Self, CouplerError> {
        let name = name.into();
        if world_ranks.is_empty() {
            return Err(CouplerError::EmptyGroup(name));
        }
        Ok(Self { name, world_ranks })
    }

    /// Group occupying world ranks `first..first + len`.
    pub fn contiguous(name: impl Into<String>, first: usize, len: usize) -> Result<Self, CouplerError> {
        Self::new(name, (first..first + len).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.world_ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world_ranks.is_empty()
    }

    pub fn world_ranks(&self) -> &[usize] {
        &self.world_ranks
    }

    /// World rank of component rank 0.
    pub fn root_world_rank(&self) -> usize {
        self.world_ranks[0]
    }

    /// World rank of component rank `rank`.
    pub fn world_rank(&self, rank: usize) -> Option<usize> {
        self.world_ranks.get(rank).copied()
    }

    /// Both groups run on exactly the same processes.
    pub fn same_processes(&self, other: &ComponentGroup) -> bool {
        self.world_ranks == other.world_ranks
    }
}
