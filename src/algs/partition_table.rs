//! Full partition tables: every process's local-to-global list for one decomposition.
//!
//! Routing needs, on every process, the complete partitioning of both sides.
//! Each side rebuilds its own table with an all-gather inside its component;
//! the table then crosses the component boundary exactly once (root to root)
//! and is broadcast inside the receiving component.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::group::ComponentGroup;
use crate::algs::wire::{
    WireCount, WireIndex, WireTableHead, cast_slice, kind, read_records, WIRE_VERSION,
};
use crate::coupler_error::CouplerError;
use crate::data::decomp::{DecompDescriptor, GlobalIndex, UNMAPPED, validate_indices};
use itertools::Itertools;

/// Marker for "no provider" in [`PartitionTable::first_providers`].
pub const NO_PROVIDER: u32 = u32::MAX;

/// Message tags used while building a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutingTags {
    /// Intra-component all-gather of local index lists (uses two tags).
    pub gather: CommTag,
    /// Root-to-root table swap (uses two tags).
    pub exchange: CommTag,
    /// Intra-component broadcast of the remote table (uses two tags).
    pub broadcast: CommTag,
}

impl RoutingTags {
    pub fn from_base(base: CommTag) -> Self {
        Self {
            gather: base,
            exchange: base.offset(2),
            broadcast: base.offset(4),
        }
    }
}

/// Local-to-global lists of every process of one decomposition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionTable {
    decomp: String,
    global_size: u64,
    parts: Vec<Vec<GlobalIndex>>,
}

impl PartitionTable {
    /// Build from explicit per-process lists, validating every entry.
    pub fn new(
        decomp: impl Into<String>,
        global_size: u64,
        parts: Vec<Vec<GlobalIndex>>,
    ) -> Result<Self, CouplerError> {
        let decomp = decomp.into();
        for p in &parts {
            validate_indices(&decomp, global_size, p)?;
        }
        Ok(Self {
            decomp,
            global_size,
            parts,
        })
    }

    /// Rebuild the full table of `decomp` with an all-gather over `comm`.
    pub fn gather<C>(decomp: &DecompDescriptor, comm: &C, tag: CommTag) -> Result<Self, CouplerError>
    where
        C: Communicator,
    {
        let local: Vec<WireIndex> = decomp
            .local_to_global()
            .iter()
            .map(|&g| WireIndex::of(g))
            .collect();
        let all = comm.allgather_bytes(tag, cast_slice(&local))?;
        let mut parts = Vec::with_capacity(all.len());
        for bytes in all {
            let recs: Vec<WireIndex> = read_records(&bytes).map_err(CouplerError::Wire)?;
            parts.push(recs.iter().map(WireIndex::get).collect());
        }
        log::debug!(
            "gathered partition table of `{}` over {} processes",
            decomp.full_name(),
            parts.len()
        );
        Self::new(decomp.full_name(), decomp.global_size(), parts)
    }

    pub fn decomp_name(&self) -> &str {
        &self.decomp
    }

    pub fn global_size(&self) -> u64 {
        self.global_size
    }

    pub fn n_procs(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, rank: usize) -> &[GlobalIndex] {
        &self.parts[rank]
    }

    pub fn parts(&self) -> &[Vec<GlobalIndex>] {
        &self.parts
    }

    /// For every global cell, the lowest rank holding it (or [`NO_PROVIDER`]).
    pub fn first_providers(&self) -> Vec<u32> {
        let mut owner = vec![NO_PROVIDER; self.global_size as usize];
        // ascending rank order, so the first writer wins
        for (rank, part) in self.parts.iter().enumerate() {
            for &g in part {
                if g != UNMAPPED && owner[g as usize] == NO_PROVIDER {
                    owner[g as usize] = rank as u32;
                }
            }
        }
        owner
    }

    /// Sort-and-scan check that every global cell is held by exactly one process.
    ///
    /// Repeats of a cell inside one process are tolerated; its first local
    /// position represents it.
    pub fn check_coverage(&self) -> Result<(), CouplerError> {
        let pairs: Vec<(GlobalIndex, usize)> = self
            .parts
            .iter()
            .enumerate()
            .flat_map(|(r, p)| p.iter().filter(|&&g| g != UNMAPPED).map(move |&g| (g, r)))
            .sorted_unstable()
            .dedup()
            .collect();
        let mut expected: GlobalIndex = 0;
        let mut prev: Option<(GlobalIndex, usize)> = None;
        for (g, r) in pairs {
            if let Some((pg, pr)) = prev {
                if pg == g {
                    return Err(CouplerError::DuplicateCoverage {
                        decomp: self.decomp.clone(),
                        cell: g,
                        first_rank: pr,
                        second_rank: r,
                    });
                }
            }
            if g != expected {
                return Err(CouplerError::MissingCoverage {
                    decomp: self.decomp.clone(),
                    cell: expected,
                });
            }
            expected += 1;
            prev = Some((g, r));
        }
        if expected != self.global_size {
            return Err(CouplerError::MissingCoverage {
                decomp: self.decomp.clone(),
                cell: expected,
            });
        }
        Ok(())
    }

    /// Serialize: [`WireTableHead`], one [`WireCount`] per process (padded to
    /// 8 bytes), then every index as a [`WireIndex`].
    pub fn encode(&self) -> Vec<u8> {
        let head = WireTableHead::new(self.global_size, self.parts.len());
        let mut counts: Vec<WireCount> = self.parts.iter().map(|p| WireCount::new(p.len())).collect();
        if counts.len() % 2 == 1 {
            counts.push(WireCount::new(0));
        }
        let indices: Vec<WireIndex> = self
            .parts
            .iter()
            .flat_map(|p| p.iter().map(|&g| WireIndex::of(g)))
            .collect();
        let mut out = Vec::with_capacity(
            WireTableHead::SIZE + counts.len() * 4 + indices.len() * 8,
        );
        out.extend_from_slice(cast_slice(std::slice::from_ref(&head)));
        out.extend_from_slice(cast_slice(&counts));
        out.extend_from_slice(cast_slice(&indices));
        out
    }

    /// Inverse of [`encode`](Self::encode); `decomp` names the table in diagnostics.
    pub fn decode(decomp: impl Into<String>, bytes: &[u8]) -> Result<Self, CouplerError> {
        let wire = |m: String| CouplerError::Wire(m);
        if bytes.len() < WireTableHead::SIZE {
            return Err(wire(format!(
                "partition table truncated: {} bytes, header needs {}",
                bytes.len(),
                WireTableHead::SIZE
            )));
        }
        let head: Vec<WireTableHead> = read_records(&bytes[..WireTableHead::SIZE]).map_err(wire)?;
        let head = head[0];
        if head.hdr.version() != WIRE_VERSION || head.hdr.kind() != kind::PARTITION_TABLE {
            return Err(wire(format!(
                "unexpected record (version {}, kind {})",
                head.hdr.version(),
                head.hdr.kind()
            )));
        }
        let n = head.n_procs();
        let counts_len = n.div_ceil(2) * 8;
        let rest = &bytes[WireTableHead::SIZE..];
        if rest.len() < counts_len {
            return Err(wire(format!("partition table counts truncated for {n} processes")));
        }
        let counts: Vec<WireCount> = read_records(&rest[..counts_len]).map_err(wire)?;
        let indices: Vec<WireIndex> = read_records(&rest[counts_len..]).map_err(wire)?;
        let total: usize = counts[..n].iter().map(WireCount::get).sum();
        if total != indices.len() {
            return Err(wire(format!(
                "partition table declares {total} indices but carries {}",
                indices.len()
            )));
        }
        let mut parts = Vec::with_capacity(n);
        let mut at = 0;
        for c in &counts[..n] {
            parts.push(indices[at..at + c.get()].iter().map(WireIndex::get).collect());
            at += c.get();
        }
        Self::new(decomp, head.global_size(), parts)
    }
}

/// Obtain the other side's partition table.
///
/// The two group roots swap their serialized tables over `world` (the root
/// with the lower world rank sends first), then each root broadcasts what it
/// received inside its own group over `group_comm`. Every process of the
/// local group returns the same remote table.
pub fn exchange_tables<G, W>(
    local_table: &PartitionTable,
    remote_name: &str,
    group_comm: &G,
    world: &W,
    local_group: &ComponentGroup,
    remote_group: &ComponentGroup,
    tags: RoutingTags,
) -> Result<PartitionTable, CouplerError>
where
    G: Communicator,
    W: Communicator,
{
    let mut remote_bytes = Vec::new();
    if group_comm.rank() == 0 {
        let me = local_group.root_world_rank();
        let peer = remote_group.root_world_rank();
        let encoded = local_table.encode();
        if me < peer {
            world.send_bytes(peer, tags.exchange, &encoded);
            remote_bytes = world.recv_bytes(peer, tags.exchange)?;
        } else {
            remote_bytes = world.recv_bytes(peer, tags.exchange)?;
            world.send_bytes(peer, tags.exchange, &encoded);
        }
        log::debug!(
            "root of `{}` swapped partition tables with `{}` ({} bytes out, {} in)",
            local_group.name(),
            remote_group.name(),
            encoded.len(),
            remote_bytes.len()
        );
    }
    let bytes = group_comm.broadcast_bytes(tags.broadcast, 0, &remote_bytes)?;
    PartitionTable::decode(remote_name, &bytes)
}
